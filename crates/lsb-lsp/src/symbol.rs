use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::proto::{DocumentSymbol, Range, SymbolInformation};

/// One node of a document's symbol tree. Children are strictly nested: a
/// child's range lies inside its parent's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolNode {
    pub name: String,
    pub kind: u32,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    /// Container name; only populated for flat `SymbolInformation` results,
    /// hierarchical results derive containers from nesting.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub children: Vec<SymbolNode>,
}

/// `textDocument/documentSymbol` returns either `DocumentSymbol[]`
/// (hierarchical) or `SymbolInformation[]` (flat). Both shapes collapse
/// into `SymbolNode` trees; the flat shape simply has no children.
pub fn parse_document_symbols(value: Value) -> Result<Vec<SymbolNode>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let Some(arr) = value.as_array() else {
        return Err(anyhow!("documentSymbol response is not an array"));
    };
    if arr.is_empty() {
        return Ok(Vec::new());
    }

    // DocumentSymbol is recognizable by its selectionRange.
    let hierarchical = arr[0].get("selectionRange").is_some();
    if hierarchical {
        let roots: Vec<DocumentSymbol> = serde_json::from_value(Value::Array(arr.clone()))
            .context("failed to parse DocumentSymbol[]")?;
        return Ok(roots.iter().map(convert_document_symbol).collect());
    }

    let infos: Vec<SymbolInformation> = serde_json::from_value(Value::Array(arr.clone()))
        .context("failed to parse SymbolInformation[]")?;
    Ok(infos
        .into_iter()
        .map(|info| SymbolNode {
            name: info.name,
            kind: info.kind,
            range: info.location.range,
            selection_range: info.location.range,
            detail: None,
            deprecated: info.deprecated.unwrap_or(false),
            container: info.container_name,
            children: Vec::new(),
        })
        .collect())
}

fn convert_document_symbol(symbol: &DocumentSymbol) -> SymbolNode {
    // SymbolTag::Deprecated == 1; the bare `deprecated` field is the
    // pre-3.16 spelling.
    let deprecated = symbol.deprecated.unwrap_or(false)
        || symbol
            .tags
            .as_ref()
            .map(|tags| tags.contains(&1))
            .unwrap_or(false);

    SymbolNode {
        name: symbol.name.clone(),
        kind: symbol.kind,
        range: symbol.range,
        selection_range: symbol.selection_range,
        detail: symbol.detail.clone(),
        deprecated,
        container: None,
        children: symbol.children.iter().map(convert_document_symbol).collect(),
    }
}

pub fn symbol_kind_name(kind: u32) -> &'static str {
    match kind {
        1 => "File",
        2 => "Module",
        3 => "Namespace",
        4 => "Package",
        5 => "Class",
        6 => "Method",
        7 => "Property",
        8 => "Field",
        9 => "Constructor",
        10 => "Enum",
        11 => "Interface",
        12 => "Function",
        13 => "Variable",
        14 => "Constant",
        15 => "String",
        16 => "Number",
        17 => "Boolean",
        18 => "Array",
        19 => "Object",
        20 => "Key",
        21 => "Null",
        22 => "EnumMember",
        23 => "Struct",
        24 => "Event",
        25 => "Operator",
        26 => "TypeParameter",
        _ => "Unknown",
    }
}

pub fn parse_symbol_kind(kind: &str) -> Option<u32> {
    match kind.to_ascii_lowercase().as_str() {
        "file" => Some(1),
        "module" => Some(2),
        "namespace" => Some(3),
        "package" => Some(4),
        "class" => Some(5),
        "method" => Some(6),
        "property" => Some(7),
        "field" => Some(8),
        "constructor" => Some(9),
        "enum" => Some(10),
        "interface" => Some(11),
        "function" => Some(12),
        "variable" => Some(13),
        "constant" => Some(14),
        "string" => Some(15),
        "number" => Some(16),
        "boolean" => Some(17),
        "array" => Some(18),
        "object" => Some(19),
        "key" => Some(20),
        "null" => Some(21),
        "enummember" | "enum_member" => Some(22),
        "struct" => Some(23),
        "event" => Some(24),
        "operator" => Some(25),
        "typeparameter" | "type_parameter" => Some(26),
        _ => None,
    }
}
