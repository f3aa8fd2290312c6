use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use lsb_core::error::{BrokerError, Result};
use lsb_core::text_edit::{self, ChangeSummary, TextEdit};
use lsb_lsp::uri_to_path;

/// Applied changes for one file, reconstructed from the original contents
/// and the edits.
#[derive(Debug, Clone)]
pub struct FileChanges {
    pub path: PathBuf,
    pub summaries: Vec<ChangeSummary>,
}

/// Apply a normalized workspace edit in-process.
///
/// Edits for one document are applied end-to-start so earlier positions
/// stay valid. All files are staged before anything is written; a write
/// failure rolls the already-written files back to their original bytes.
/// Writes outside the canonicalized project root are refused.
pub async fn apply_workspace_edit(
    root: &Path,
    changes: &HashMap<String, Vec<TextEdit>>,
) -> Result<Vec<FileChanges>> {
    struct Staged {
        path: PathBuf,
        original: String,
        new_text: String,
        summaries: Vec<ChangeSummary>,
    }

    let root = root
        .canonicalize()
        .map_err(|_| BrokerError::FileNotFound(root.to_path_buf()))?;

    let mut staged = Vec::<Staged>::new();
    for (uri, edits) in changes {
        let path = uri_to_path(uri)?;
        let path = path
            .canonicalize()
            .map_err(|_| BrokerError::FileNotFound(path.clone()))?;
        if !path.starts_with(&root) {
            return Err(BrokerError::InvalidArgument(format!(
                "refusing to write outside the project root: {}",
                path.display()
            )));
        }

        let original = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| BrokerError::FileNotFound(path.clone()))?;

        let summaries = text_edit::change_summaries(&original, edits)
            .map_err(|e| BrokerError::EditConflict(format!("{}: {e:#}", path.display())))?;
        let new_text = text_edit::apply_edits(&original, edits)
            .map_err(|e| BrokerError::EditConflict(format!("{}: {e:#}", path.display())))?;

        staged.push(Staged {
            path,
            original,
            new_text,
            summaries,
        });
    }

    staged.sort_by(|a, b| a.path.cmp(&b.path));

    let mut written = Vec::<usize>::new();
    for (idx, file) in staged.iter().enumerate() {
        match write_atomic(&file.path, file.new_text.as_bytes()).await {
            Ok(()) => written.push(idx),
            Err(err) => {
                for &done in &written {
                    let file = &staged[done];
                    if let Err(restore_err) =
                        tokio::fs::write(&file.path, file.original.as_bytes()).await
                    {
                        warn!(
                            "rollback of {} failed: {restore_err}",
                            file.path.display()
                        );
                    }
                }
                return Err(BrokerError::Transport(format!(
                    "failed to write {}: {err}",
                    file.path.display()
                )));
            }
        }
    }

    Ok(staged
        .into_iter()
        .map(|f| FileChanges {
            path: f.path,
            summaries: f.summaries,
        })
        .collect())
}

/// Temp-file-and-rename replacement; falls back to remove-then-rename for
/// filesystems that refuse to clobber.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());

    let nonce = format!(
        "{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let tmp_path = parent.join(format!(".{file_name}.lsb-tmp-{nonce}"));

    tokio::fs::write(&tmp_path, bytes).await?;
    match tokio::fs::rename(&tmp_path, path).await {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = tokio::fs::remove_file(path).await;
            match tokio::fs::rename(&tmp_path, path).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    Err(err)
                }
            }
        }
    }
}
