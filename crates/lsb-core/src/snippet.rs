use serde::{Deserialize, Serialize};

/// A small window of source lines around a location, used when rendering
/// references and definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Zero-based line number of the first line in `lines`.
    pub start_line: u32,
    pub lines: Vec<String>,
}

/// Extract `center_line` plus up to `context_lines` lines on each side.
/// Out-of-range centers clamp to the last line.
pub fn extract_snippet(content: &str, center_line: u32, context_lines: usize) -> Snippet {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Snippet {
            start_line: 0,
            lines: Vec::new(),
        };
    }

    let center = (center_line as usize).min(lines.len() - 1);
    let start = center.saturating_sub(context_lines);
    let end = (center + context_lines + 1).min(lines.len());

    Snippet {
        start_line: start as u32,
        lines: lines[start..end].iter().map(|l| l.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_context_lines() {
        let s = extract_snippet("a\nb\nc\nd\ne\n", 2, 1);
        assert_eq!(s.start_line, 1);
        assert_eq!(s.lines, vec!["b", "c", "d"]);
    }

    #[test]
    fn clamps_at_file_edges() {
        let s = extract_snippet("a\nb\n", 0, 1);
        assert_eq!(s.start_line, 0);
        assert_eq!(s.lines, vec!["a", "b"]);

        let s = extract_snippet("a\nb\n", 10, 1);
        assert_eq!(s.start_line, 0);
        assert_eq!(s.lines, vec!["a", "b"]);
    }

    #[test]
    fn empty_content_yields_empty_snippet() {
        let s = extract_snippet("", 0, 2);
        assert!(s.lines.is_empty());
    }
}
