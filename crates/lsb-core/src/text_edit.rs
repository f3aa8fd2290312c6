use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    /// UTF-16 code unit offset within the line.
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// One human-visible change reconstructed from an edit: where it lands in
/// the original document and what text it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Zero-based; the tool boundary renders these one-based.
    pub line: u32,
    pub character: u32,
    pub old_text: String,
    pub new_text: String,
}

/// Apply `edits` to `content`, resolving UTF-16 positions to byte offsets
/// and splicing in reverse document order so earlier offsets stay valid.
pub fn apply_edits(content: &str, edits: &[TextEdit]) -> Result<String> {
    if edits.is_empty() {
        return Ok(content.to_string());
    }

    let mut replacements = resolve_edits(content, edits)?;
    replacements.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut out = content.to_string();
    for (start, end, new_text) in replacements {
        out.replace_range(start..end, new_text);
    }
    Ok(out)
}

/// Compute the inverse edit list: applying the result to
/// `apply_edits(original, edits)` restores `original` byte-for-byte.
pub fn invert_edits(original: &str, edits: &[TextEdit]) -> Result<Vec<TextEdit>> {
    let mut replacements = resolve_edits(original, edits)?;
    replacements.sort_by_key(|r| (r.0, r.1));
    reject_overlap(&replacements)?;

    let edited = apply_edits(original, edits)?;

    let mut inverses = Vec::with_capacity(replacements.len());
    let mut delta: i64 = 0;
    for (start, end, new_text) in replacements {
        let new_start = (start as i64 + delta) as usize;
        let new_end = new_start + new_text.len();
        inverses.push(TextEdit {
            range: Range {
                start: offset_to_position(&edited, new_start),
                end: offset_to_position(&edited, new_end),
            },
            new_text: original[start..end].to_string(),
        });
        delta += new_text.len() as i64 - (end - start) as i64;
    }
    Ok(inverses)
}

/// Reconstruct per-edit change summaries against the original contents,
/// in document order.
pub fn change_summaries(original: &str, edits: &[TextEdit]) -> Result<Vec<ChangeSummary>> {
    let mut replacements: Vec<(usize, usize, &TextEdit)> = Vec::with_capacity(edits.len());
    let line_starts = compute_line_starts(original);
    for (idx, edit) in edits.iter().enumerate() {
        let start = position_to_offset(&line_starts, original, &edit.range.start)
            .with_context(|| format!("invalid start position for edit #{idx}"))?;
        let end = position_to_offset(&line_starts, original, &edit.range.end)
            .with_context(|| format!("invalid end position for edit #{idx}"))?;
        replacements.push((start, end, edit));
    }
    replacements.sort_by_key(|r| (r.0, r.1));

    Ok(replacements
        .into_iter()
        .map(|(start, end, edit)| ChangeSummary {
            line: edit.range.start.line,
            character: edit.range.start.character,
            old_text: original[start..end].to_string(),
            new_text: edit.new_text.clone(),
        })
        .collect())
}

fn resolve_edits<'a>(content: &str, edits: &'a [TextEdit]) -> Result<Vec<(usize, usize, &'a str)>> {
    let line_starts = compute_line_starts(content);
    let mut out = Vec::with_capacity(edits.len());
    for (idx, edit) in edits.iter().enumerate() {
        let edit_range = normalize_deletion(content, &line_starts, edit);
        let start = position_to_offset(&line_starts, content, &edit_range.start)
            .with_context(|| format!("invalid start position for edit #{idx}"))?;
        let end = position_to_offset(&line_starts, content, &edit_range.end)
            .with_context(|| format!("invalid end position for edit #{idx}"))?;
        if start > end {
            return Err(anyhow!(
                "invalid range for edit #{idx}: start offset {start} > end offset {end}"
            ));
        }
        out.push((start, end, edit.new_text.as_str()));
    }
    Ok(out)
}

/// A deletion spanning whole lines removes the lines themselves: when the
/// replacement is empty, the range starts at column 0 and ends at an
/// end-of-line, the range is widened to swallow the trailing newline.
fn normalize_deletion(content: &str, line_starts: &[usize], edit: &TextEdit) -> Range {
    if !edit.new_text.is_empty() || edit.range.start.character != 0 {
        return edit.range;
    }
    let end_line = edit.range.end.line as usize;
    if end_line + 1 >= line_starts.len() {
        return edit.range;
    }
    let line_len_utf16 = line_utf16_len(content, line_starts, end_line);
    if edit.range.end.character < line_len_utf16 {
        return edit.range;
    }
    Range {
        start: edit.range.start,
        end: Position {
            line: edit.range.end.line + 1,
            character: 0,
        },
    }
}

fn line_utf16_len(content: &str, line_starts: &[usize], line: usize) -> u32 {
    let start = line_starts[line];
    let mut end = if line + 1 < line_starts.len() {
        line_starts[line + 1]
    } else {
        content.len()
    };
    if end > start && content.as_bytes()[end - 1] == b'\n' {
        end -= 1;
    }
    if end > start && content.as_bytes()[end - 1] == b'\r' {
        end -= 1;
    }
    content[start..end]
        .chars()
        .map(|c| c.len_utf16() as u32)
        .sum()
}

fn reject_overlap(sorted: &[(usize, usize, &str)]) -> Result<()> {
    for pair in sorted.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(anyhow!(
                "overlapping edits: [{}, {}) and [{}, {})",
                pair[0].0,
                pair[0].1,
                pair[1].0,
                pair[1].1
            ));
        }
    }
    Ok(())
}

fn compute_line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in content.as_bytes().iter().enumerate() {
        if *b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn position_to_offset(line_starts: &[usize], content: &str, pos: &Position) -> Result<usize> {
    let line = pos.line as usize;
    if line >= line_starts.len() {
        return Err(anyhow!(
            "line {} is out of range (file has {} lines)",
            pos.line,
            line_starts.len()
        ));
    }

    let line_start = line_starts[line];
    let mut line_end = if line + 1 < line_starts.len() {
        line_starts[line + 1]
    } else {
        content.len()
    };
    if line_end > line_start && content.as_bytes()[line_end - 1] == b'\n' {
        line_end -= 1;
    }
    if line_end > line_start && content.as_bytes()[line_end - 1] == b'\r' {
        line_end -= 1;
    }

    let line_text = &content[line_start..line_end];
    let byte_in_line = utf16_col_to_byte_idx(line_text, pos.character);
    Ok((line_start + byte_in_line).min(content.len()))
}

pub fn offset_to_position(content: &str, offset: usize) -> Position {
    let offset = offset.min(content.len());
    let before = &content[..offset];
    let line = before.bytes().filter(|b| *b == b'\n').count() as u32;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let character = content[line_start..offset]
        .chars()
        .map(|c| c.len_utf16() as u32)
        .sum();
    Position { line, character }
}

fn utf16_col_to_byte_idx(line: &str, utf16_col: u32) -> usize {
    if utf16_col == 0 {
        return 0;
    }

    let mut units = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if units == utf16_col {
            return byte_idx;
        }
        units = units.saturating_add(ch.len_utf16() as u32);
        let end = byte_idx + ch.len_utf8();
        if units > utf16_col {
            // Never slice in the middle of a scalar value.
            return end;
        }
    }
    line.len()
}
