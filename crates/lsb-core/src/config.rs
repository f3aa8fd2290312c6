use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::lang::{self, LanguageProfile};

/// Environment variable forcing the language id for every request,
/// regardless of file extension.
pub const FORCE_LANGUAGE_ENV: &str = "LSB_FORCE_LANGUAGE";
/// Environment variable pointing at a config file, checked after `--config`.
pub const CONFIG_PATH_ENV: &str = "LSB_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Per-language server overrides, keyed by language id (`rust`,
    /// `typescript`, ...). Anything unset falls back to the built-in profile.
    #[serde(default)]
    pub servers: Option<HashMap<String, ServerOverride>>,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ServerOverride {
    /// Command to start the server (defaults to the built-in per-language
    /// command, e.g. `typescript-language-server`).
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub initialize_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub open_delay_ms: Option<u64>,
    /// Raw `initializationOptions` forwarded on the `initialize` request.
    #[serde(default)]
    #[serde(alias = "initializeOptions")]
    pub initialize_options: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct IndexConfig {
    /// Soft record cap for the persistent symbol cache.
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    /// Debounce window for watcher-driven reindexing, milliseconds.
    #[serde(default)]
    pub reindex_debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct OutputConfig {
    /// Character budget for a single tool's text output.
    #[serde(default)]
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    None,
    Path(PathBuf),
    Env(PathBuf),
    Workspace(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: BrokerConfig,
    pub workspace_root: PathBuf,
    pub source: ConfigSource,
}

/// A server command plus the effective profile for one language, after
/// merging config overrides over the built-in table.
#[derive(Debug, Clone)]
pub struct ResolvedServer {
    pub language: String,
    pub command: String,
    pub args: Vec<String>,
    pub initialize_timeout: Duration,
    pub request_timeout: Duration,
    pub open_delay: Duration,
    pub wait_for_first_diagnostics: bool,
    pub preopen_project_files: bool,
    pub initialize_options: Option<JsonValue>,
}

pub fn load_config(
    cli_config_path: Option<&Path>,
    cli_workspace_root: Option<&Path>,
) -> Result<LoadedConfig> {
    if let Some(path) = cli_config_path {
        let config = read_config_file(path)?;
        let workspace_root =
            resolve_workspace_root(cli_workspace_root, config.workspace_root.as_deref());
        return Ok(LoadedConfig {
            config,
            workspace_root,
            source: ConfigSource::Path(path.to_path_buf()),
        });
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        let path = PathBuf::from(path);
        let config = read_config_file(&path)?;
        let workspace_root =
            resolve_workspace_root(cli_workspace_root, config.workspace_root.as_deref());
        return Ok(LoadedConfig {
            config,
            workspace_root,
            source: ConfigSource::Env(path),
        });
    }

    let fallback_root = cli_workspace_root
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let workspace_root = fallback_root.canonicalize().unwrap_or(fallback_root);

    for candidate in workspace_config_candidates(&workspace_root) {
        if candidate.exists() {
            let config = read_config_file(&candidate)?;
            let effective_root =
                resolve_workspace_root(Some(&workspace_root), config.workspace_root.as_deref());
            return Ok(LoadedConfig {
                config,
                workspace_root: effective_root,
                source: ConfigSource::Workspace(candidate),
            });
        }
    }

    Ok(LoadedConfig {
        config: BrokerConfig::default(),
        workspace_root,
        source: ConfigSource::None,
    })
}

pub fn workspace_config_candidates(root: &Path) -> Vec<PathBuf> {
    vec![root.join(".lsmcp").join("config.toml"), root.join("lsb.toml")]
}

fn read_config_file(path: &Path) -> Result<BrokerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&text)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn resolve_workspace_root(cli: Option<&Path>, from_config: Option<&Path>) -> PathBuf {
    let chosen = cli
        .map(PathBuf::from)
        .or_else(|| from_config.map(PathBuf::from))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    chosen.canonicalize().unwrap_or(chosen)
}

/// `LSB_FORCE_LANGUAGE`, if set and non-empty.
pub fn forced_language() -> Option<String> {
    std::env::var(FORCE_LANGUAGE_ENV)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Merge config overrides (and an optional CLI command override) over the
/// built-in profile and default command for `language`.
pub fn resolve_server(
    config: &BrokerConfig,
    language: &str,
    cli_command_override: Option<&str>,
) -> Result<ResolvedServer> {
    let language = lang::server_language(language).to_string();
    let profile: LanguageProfile = lang::profile_for(&language);
    let overrides = config
        .servers
        .as_ref()
        .and_then(|m| m.get(&language))
        .cloned()
        .unwrap_or_default();

    let (mut command, mut args) = match lang::default_server_command(&language) {
        Some(pair) => pair,
        None => (String::new(), Vec::new()),
    };
    if let Some(c) = overrides.command.as_deref().filter(|c| !c.trim().is_empty()) {
        command = c.to_string();
        args = overrides.args.clone().unwrap_or_default();
    } else if let Some(a) = overrides.args.clone() {
        args = a;
    }
    if let Some(c) = cli_command_override.filter(|c| !c.trim().is_empty()) {
        // The override is a full command line: first token is the program.
        let mut parts = c.split_whitespace().map(str::to_string);
        command = parts.next().unwrap_or_default();
        args = parts.collect();
    }
    if command.is_empty() {
        anyhow::bail!("no language server command configured for language: {language}");
    }

    Ok(ResolvedServer {
        language,
        command,
        args,
        initialize_timeout: overrides
            .initialize_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(15)),
        request_timeout: overrides
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(profile.request_timeout),
        open_delay: overrides
            .open_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(profile.open_delay),
        wait_for_first_diagnostics: profile.wait_for_first_diagnostics,
        preopen_project_files: profile.preopen_project_files,
        initialize_options: overrides.initialize_options,
    })
}
