use anyhow::{Result, anyhow};
use serde_json::Value;

/// Incremental decoder for `Content-Length`-framed JSON-RPC streams.
///
/// Bytes are pushed in as they arrive; `next_frame` yields one decoded body
/// at a time. A malformed header block or an unparseable body is reported as
/// an error for that frame only; decoding resumes at the following frame.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
    pending_body_len: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `Ok(Some(value))` for a complete frame, `Ok(None)` when more bytes are
    /// needed, `Err` for a frame that had to be discarded.
    pub fn next_frame(&mut self) -> Result<Option<Value>> {
        if self.pending_body_len.is_none() {
            let Some(header_end) = find_header_terminator(&self.buf) else {
                return Ok(None);
            };
            let header_bytes = self.buf.drain(..header_end + 4).collect::<Vec<u8>>();
            let headers = String::from_utf8_lossy(&header_bytes[..header_end]).into_owned();

            let mut content_length = None;
            for line in headers.split("\r\n") {
                if let Some(value) = line.strip_prefix("Content-Length:") {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }

            let Some(len) = content_length else {
                return Err(anyhow!("header block lacks Content-Length: {headers:?}"));
            };
            self.pending_body_len = Some(len);
        }

        let len = self.pending_body_len.unwrap_or(0);
        if self.buf.len() < len {
            return Ok(None);
        }

        let body = self.buf.drain(..len).collect::<Vec<u8>>();
        self.pending_body_len = None;

        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => Ok(Some(value)),
            Err(err) => Err(anyhow!(
                "discarding unparseable message body ({} bytes): {err}",
                body.len()
            )),
        }
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Serialize a message with its `Content-Length` header; N counts the bytes
/// of the UTF-8 encoded body.
pub fn encode_frame(value: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_frame_split_across_pushes() {
        let frame = encode_frame(&json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        let mut codec = FrameCodec::new();

        codec.push_bytes(&frame[..10]);
        assert!(codec.next_frame().unwrap().is_none());

        codec.push_bytes(&frame[10..]);
        let value = codec.next_frame().unwrap().unwrap();
        assert_eq!(value["method"], "ping");
        assert!(codec.next_frame().unwrap().is_none());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut bytes = encode_frame(&json!({"id": 1})).unwrap();
        bytes.extend(encode_frame(&json!({"id": 2})).unwrap());

        let mut codec = FrameCodec::new();
        codec.push_bytes(&bytes);
        assert_eq!(codec.next_frame().unwrap().unwrap()["id"], 1);
        assert_eq!(codec.next_frame().unwrap().unwrap()["id"], 2);
        assert!(codec.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_headers_without_content_length() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"Content-Type: application/json\r\n\r\n");
        assert!(codec.next_frame().is_err());
    }

    #[test]
    fn recovers_after_unparseable_body() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"Content-Length: 4\r\n\r\n}{!(");
        assert!(codec.next_frame().is_err());

        codec.push_bytes(&encode_frame(&json!({"ok": true})).unwrap());
        assert_eq!(codec.next_frame().unwrap().unwrap()["ok"], true);
    }

    #[test]
    fn ignores_extra_headers() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"Content-Type: application/json\r\nContent-Length: 2\r\n\r\n{}");
        assert_eq!(codec.next_frame().unwrap().unwrap(), json!({}));
    }

    #[test]
    fn content_length_counts_utf8_bytes() {
        let value = json!({"text": "héllo"});
        let frame = encode_frame(&value).unwrap();
        let header_end = frame.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let header = std::str::from_utf8(&frame[..header_end]).unwrap();
        let body_len: usize = header
            .strip_prefix("Content-Length:")
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(body_len, frame.len() - header_end - 4);

        let mut codec = FrameCodec::new();
        codec.push_bytes(&frame);
        assert_eq!(codec.next_frame().unwrap().unwrap(), value);
    }
}
