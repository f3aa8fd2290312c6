use std::path::{Path, PathBuf};

use serde::Deserialize;

use lsb_core::error::{BrokerError, Result};
use lsb_core::text_edit::Position;

/// The `line` argument of most tools: a one-based line number, or a
/// substring selecting the first line that contains it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LineSelector {
    Number(u32),
    Substring(String),
}

/// Join `rel` onto `root` and refuse anything that escapes the project
/// root after canonicalization.
pub fn canonicalize_within(root: &Path, rel: &Path) -> Result<PathBuf> {
    let joined = if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        root.join(rel)
    };
    let canonical = joined
        .canonicalize()
        .map_err(|_| BrokerError::FileNotFound(joined.clone()))?;
    if !canonical.starts_with(root) {
        return Err(BrokerError::InvalidArgument(format!(
            "path escapes the project root: {}",
            rel.display()
        )));
    }
    Ok(canonical)
}

/// Resolve a line selector to a zero-based line. Substring selection picks
/// the first matching line; ties go to the earliest.
pub fn resolve_line(text: &str, selector: &LineSelector, file_label: &str) -> Result<u32> {
    match selector {
        LineSelector::Number(n) => {
            let total = text.lines().count() as u32;
            if *n == 0 || *n > total.max(1) {
                return Err(BrokerError::InvalidArgument(format!(
                    "line {n} is out of range for {file_label} ({total} lines)"
                )));
            }
            Ok(n - 1)
        }
        LineSelector::Substring(needle) => text
            .lines()
            .position(|line| line.contains(needle.as_str()))
            .map(|idx| idx as u32)
            .ok_or_else(|| BrokerError::LineNotFound {
                file: file_label.to_string(),
                needle: needle.clone(),
            }),
    }
}

/// Locate `symbol` on the given zero-based line; returns its UTF-16 column.
pub fn find_symbol_on_line(text: &str, line: u32, symbol: &str) -> Result<u32> {
    let line_text = text.lines().nth(line as usize).unwrap_or("");
    let byte_idx =
        line_text
            .find(symbol)
            .ok_or_else(|| BrokerError::SymbolNotFoundOnLine {
                symbol: symbol.to_string(),
                line: line + 1,
            })?;
    Ok(byte_to_utf16_col(line_text, byte_idx))
}

/// Combine the line selector with either a one-based `character` or a
/// `target` substring into a zero-based UTF-16 position.
pub fn position_from_args(
    text: &str,
    file_label: &str,
    selector: &LineSelector,
    character: Option<u32>,
    target: Option<&str>,
) -> Result<Position> {
    let line = resolve_line(text, selector, file_label)?;
    let character = match (character, target) {
        (Some(character), _) => {
            if character == 0 {
                return Err(BrokerError::InvalidArgument(
                    "character is one-based and must be >= 1".into(),
                ));
            }
            let line_text = text.lines().nth(line as usize).unwrap_or("");
            let width = utf16_len(line_text);
            let zero_based = character - 1;
            if zero_based > width {
                return Err(BrokerError::InvalidArgument(format!(
                    "character {character} is past the end of line {} ({} columns)",
                    line + 1,
                    width
                )));
            }
            zero_based
        }
        (None, Some(target)) => find_symbol_on_line(text, line, target)?,
        (None, None) => 0,
    };
    Ok(Position { line, character })
}

pub fn byte_to_utf16_col(line: &str, byte_idx: usize) -> u32 {
    line[..byte_idx.min(line.len())]
        .chars()
        .map(|c| c.len_utf16() as u32)
        .sum()
}

pub fn utf16_len(line: &str) -> u32 {
    line.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Render a path relative to the project root where possible.
pub fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
