use std::path::Path;

use serde_json::{Value, json};

use lsb_core::error::{BrokerError, Result};
use lsb_core::text_edit::{self, Position, Range, TextEdit};
use lsb_lsp::path_to_uri;

use crate::BrokerServer;
use crate::args::{FormatDocumentArgs, FormatOptionsArg, GetCodeActionsArgs, RangeArg};
use crate::render;
use crate::resolve::{canonicalize_within, utf16_len};
use crate::workspace_edit::FileChanges;

impl BrokerServer {
    pub(crate) async fn get_code_actions(&self, args: GetCodeActionsArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let range = range_from_arg(&text, &args.range)?;
                let uri = path_to_uri(&op_file)?;
                let diagnostics = entry.client().diagnostics().get(&uri).await;
                let context = serde_json::to_value(&diagnostics).unwrap_or(Value::Array(vec![]));
                let value = entry.client().code_actions(&op_file, range, context).await?;
                Ok(render::render_code_actions(&value))
            })
            .await
    }

    pub(crate) async fn format_document(&self, args: FormatDocumentArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        let op_root = root.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let options = format_options(&args.options);
                let value = match args.range.as_ref() {
                    Some(range_arg) => {
                        let range = range_from_arg(&text, range_arg)?;
                        entry
                            .client()
                            .format_range(&op_file, range, options)
                            .await?
                    }
                    None => entry.client().format_document(&op_file, options).await?,
                };

                if value.is_null() {
                    return Ok("No formatting changes.".to_string());
                }
                let edits: Vec<TextEdit> = serde_json::from_value(value)
                    .map_err(|e| BrokerError::Transport(format!("malformed response: {e}")))?;
                if edits.is_empty() {
                    return Ok("No formatting changes.".to_string());
                }

                // Preview only: nothing is written to disk.
                let summaries = text_edit::change_summaries(&text, &edits)
                    .map_err(|e| BrokerError::EditConflict(format!("{e:#}")))?;
                let changes = vec![FileChanges {
                    path: op_file,
                    summaries,
                }];
                Ok(render::render_change_summaries(
                    &op_root,
                    "Formatting preview (not applied)",
                    &changes,
                ))
            })
            .await
    }
}

fn format_options(options: &FormatOptionsArg) -> Value {
    json!({
        "tabSize": options.tab_size.unwrap_or(2),
        "insertSpaces": options.insert_spaces.unwrap_or(true),
    })
}

/// One-based inclusive range argument → zero-based range. A missing end
/// character means "through the end of that line".
fn range_from_arg(text: &str, arg: &RangeArg) -> Result<Range> {
    let total = text.lines().count() as u32;
    for (label, pos) in [("start", &arg.start), ("end", &arg.end)] {
        if pos.line == 0 || pos.line > total.max(1) {
            return Err(BrokerError::InvalidArgument(format!(
                "{label} line {} is out of range ({total} lines)",
                pos.line
            )));
        }
    }

    let end_line = arg.end.line - 1;
    let end_character = match arg.end.character {
        Some(c) if c >= 1 => c - 1,
        _ => utf16_len(text.lines().nth(end_line as usize).unwrap_or("")),
    };

    Ok(Range {
        start: Position {
            line: arg.start.line - 1,
            character: arg.start.character.map(|c| c.saturating_sub(1)).unwrap_or(0),
        },
        end: Position {
            line: end_line,
            character: end_character,
        },
    })
}
