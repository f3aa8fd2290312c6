use serde::Deserialize;

use crate::resolve::LineSelector;

/// Tool arguments use one-based lines/columns and camelCase wire names;
/// translation to the core's zero-based positions happens at this boundary
/// only.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetHoverArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: LineSelector,
    pub character: Option<u32>,
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindReferencesArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: LineSelector,
    pub symbol_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDefinitionsArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: LineSelector,
    pub symbol_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDiagnosticsArgs {
    pub root: Option<String>,
    #[serde(default)]
    pub file_paths: Vec<String>,
    /// Glob over the root, used when `filePaths` is empty.
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSymbolArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: Option<LineSelector>,
    pub target: String,
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSymbolArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: LineSelector,
    pub symbol_name: String,
    #[serde(default)]
    pub remove_references: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocumentSymbolsArgs {
    pub root: Option<String>,
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetWorkspaceSymbolsArgs {
    pub query: String,
    pub root: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCompletionArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: LineSelector,
    pub character: Option<u32>,
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSignatureHelpArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub line: LineSelector,
    pub target: Option<String>,
}

/// One-based inclusive range argument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeArg {
    pub start: PositionArg,
    pub end: PositionArg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionArg {
    pub line: u32,
    #[serde(default)]
    pub character: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCodeActionsArgs {
    pub root: Option<String>,
    pub file_path: String,
    pub range: RangeArg,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FormatOptionsArg {
    pub tab_size: Option<u32>,
    pub insert_spaces: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDocumentArgs {
    pub root: Option<String>,
    pub file_path: String,
    #[serde(default)]
    pub options: FormatOptionsArg,
    /// Present for `format_range`, absent for `format_document`.
    pub range: Option<RangeArg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchSymbolsArgs {
    pub root: Option<String>,
    pub name: Option<String>,
    pub kind: Option<OneOrMany>,
    pub container_name: Option<String>,
    pub file: Option<String>,
    pub include_children: Option<bool>,
    pub include_external: Option<bool>,
    #[serde(default)]
    pub only_external: bool,
    pub source_library: Option<String>,
}
