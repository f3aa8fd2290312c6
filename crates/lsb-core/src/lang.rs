use std::path::Path;
use std::time::Duration;

/// Per-language tuning applied on top of the LSP handshake.
///
/// `open_delay` is how long the first `didOpen` on a fresh server is allowed
/// to settle before the first operation; `request_timeout` bounds every
/// request issued for that language.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language_id: &'static str,
    pub open_delay: Duration,
    pub request_timeout: Duration,
    /// Treat the first `publishDiagnostics` as the readiness signal
    /// (rust-analyzer stays quiet until its initial crate graph is built).
    pub wait_for_first_diagnostics: bool,
    /// Pre-open key project files after `initialized` for servers that load
    /// projects lazily (tsserver-family).
    pub preopen_project_files: bool,
}

pub fn profile_for(language_id: &str) -> LanguageProfile {
    match language_id {
        "typescript" | "typescriptreact" | "javascript" | "javascriptreact" => LanguageProfile {
            language_id: "typescript",
            open_delay: Duration::from_millis(500),
            request_timeout: Duration::from_millis(30_000),
            wait_for_first_diagnostics: false,
            preopen_project_files: true,
        },
        "rust" => LanguageProfile {
            language_id: "rust",
            open_delay: Duration::from_millis(1_500),
            request_timeout: Duration::from_millis(60_000),
            wait_for_first_diagnostics: true,
            preopen_project_files: false,
        },
        "python" => LanguageProfile {
            language_id: "python",
            open_delay: Duration::from_millis(1_000),
            request_timeout: Duration::from_millis(30_000),
            wait_for_first_diagnostics: false,
            preopen_project_files: false,
        },
        "go" => LanguageProfile {
            language_id: "go",
            open_delay: Duration::from_millis(500),
            request_timeout: Duration::from_millis(30_000),
            wait_for_first_diagnostics: false,
            preopen_project_files: false,
        },
        _ => LanguageProfile {
            language_id: "plaintext",
            open_delay: Duration::from_millis(500),
            request_timeout: Duration::from_millis(30_000),
            wait_for_first_diagnostics: false,
            preopen_project_files: false,
        },
    }
}

/// Map a file extension to an LSP languageId for `textDocument/didOpen`.
pub fn language_id_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hxx" | "hh" => "cpp",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        _ => "plaintext",
    }
}

/// The language a server is keyed under in the pool. React dialects share
/// their base language's server.
pub fn server_language(language_id: &str) -> &'static str {
    match language_id {
        "typescript" | "typescriptreact" | "javascript" | "javascriptreact" => "typescript",
        "rust" => "rust",
        "python" => "python",
        "go" => "go",
        _ => "plaintext",
    }
}

/// Default server command for a language, used when neither the config file
/// nor `--server-command` overrides it.
pub fn default_server_command(language_id: &str) -> Option<(String, Vec<String>)> {
    let (cmd, args): (&str, &[&str]) = match server_language(language_id) {
        "typescript" => ("typescript-language-server", &["--stdio"]),
        "rust" => ("rust-analyzer", &[]),
        "python" => ("pyright-langserver", &["--stdio"]),
        "go" => ("gopls", &[]),
        _ => return None,
    };
    Some((
        cmd.to_string(),
        args.iter().map(|s| s.to_string()).collect(),
    ))
}

/// Project files worth pre-opening per language so lazy servers load the
/// surrounding project.
pub fn preopen_candidates(language_id: &str) -> &'static [&'static str] {
    match server_language(language_id) {
        "typescript" => &["tsconfig.json", "package.json"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_profile_waits_for_diagnostics() {
        let p = profile_for("rust");
        assert_eq!(p.open_delay, Duration::from_millis(1_500));
        assert_eq!(p.request_timeout, Duration::from_millis(60_000));
        assert!(p.wait_for_first_diagnostics);
    }

    #[test]
    fn typescript_dialects_share_a_server() {
        assert_eq!(server_language("typescriptreact"), "typescript");
        assert_eq!(server_language("javascript"), "typescript");
    }

    #[test]
    fn unknown_extension_falls_back_to_plaintext() {
        assert_eq!(language_id_for_path(Path::new("notes.xyz")), "plaintext");
        let p = profile_for("plaintext");
        assert_eq!(p.open_delay, Duration::from_millis(500));
        assert_eq!(p.request_timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn language_id_covers_common_extensions() {
        assert_eq!(language_id_for_path(Path::new("a.ts")), "typescript");
        assert_eq!(language_id_for_path(Path::new("a.tsx")), "typescriptreact");
        assert_eq!(language_id_for_path(Path::new("a.rs")), "rust");
        assert_eq!(language_id_for_path(Path::new("a.py")), "python");
    }
}
