use std::path::Path;

use lsb_core::error::{BrokerError, Result};
use lsb_lsp::proto::collect_locations;

use crate::BrokerServer;
use crate::args::{
    FindReferencesArgs, GetCompletionArgs, GetDefinitionsArgs, GetHoverArgs, GetSignatureHelpArgs,
};
use crate::render;
use crate::resolve::{canonicalize_within, position_from_args};

const COMPLETION_LIMIT: usize = 50;

impl BrokerServer {
    pub(crate) async fn get_hover(&self, args: GetHoverArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let position = position_from_args(
                    &text,
                    &args.file_path,
                    &args.line,
                    args.character,
                    args.target.as_deref(),
                )?;
                let value = entry.client().hover(&op_file, position).await?;
                Ok(render::render_hover(&value).unwrap_or_else(|| {
                    format!(
                        "No hover information at {}:{}.",
                        position.line + 1,
                        position.character + 1
                    )
                }))
            })
            .await
    }

    pub(crate) async fn get_definitions(&self, args: GetDefinitionsArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        let op_root = root.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let position = position_from_args(
                    &text,
                    &args.file_path,
                    &args.line,
                    None,
                    Some(&args.symbol_name),
                )?;
                let value = entry.client().definition(&op_file, position).await?;
                let locations = collect_locations(value)
                    .map_err(|e| BrokerError::Transport(format!("malformed response: {e:#}")))?;
                Ok(render::render_definitions(
                    &op_root,
                    &args.symbol_name,
                    &locations,
                ))
            })
            .await
    }

    pub(crate) async fn find_references(&self, args: FindReferencesArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        let op_root = root.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let position = position_from_args(
                    &text,
                    &args.file_path,
                    &args.line,
                    None,
                    Some(&args.symbol_name),
                )?;
                let value = entry.client().references(&op_file, position, true).await?;
                let locations = collect_locations(value)
                    .map_err(|e| BrokerError::Transport(format!("malformed response: {e:#}")))?;
                Ok(render::render_references(
                    &op_root,
                    &args.symbol_name,
                    &locations,
                ))
            })
            .await
    }

    pub(crate) async fn get_completion(&self, args: GetCompletionArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let position = position_from_args(
                    &text,
                    &args.file_path,
                    &args.line,
                    args.character,
                    args.target.as_deref(),
                )?;
                let value = entry.client().completion(&op_file, position).await?;
                Ok(render::render_completions(&value, COMPLETION_LIMIT))
            })
            .await
    }

    pub(crate) async fn get_signature_help(&self, args: GetSignatureHelpArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let position = position_from_args(
                    &text,
                    &args.file_path,
                    &args.line,
                    None,
                    args.target.as_deref(),
                )?;
                let value = entry.client().signature_help(&op_file, position).await?;
                Ok(render::render_signature_help(&value).unwrap_or_else(|| {
                    format!(
                        "No signature help at {}:{}.",
                        position.line + 1,
                        position.character + 1
                    )
                }))
            })
            .await
    }
}
