use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::process::Command as TokioCommand;

use lsb_mcp::{BrokerServer, McpOptions, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "lsb")]
#[command(version, about = "Language server broker: code intelligence tools over MCP")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the tool server over stdio (for MCP clients)
    Mcp {
        /// Optional path to a config file (.lsmcp/config.toml or lsb.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the workspace root (defaults to the current directory)
        #[arg(long)]
        workspace_root: Option<PathBuf>,
        /// Force a language instead of inferring it from file extensions
        #[arg(long)]
        language: Option<String>,
        /// Override the language server command line, e.g. "deno lsp"
        #[arg(long)]
        server_command: Option<String>,
    },
    /// Batch diagnostics over files matching a glob; exits 1 on any error
    Check {
        /// Glob relative to the root, e.g. "src/**/*.ts"
        pattern: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        workspace_root: Option<PathBuf>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        server_command: Option<String>,
    },
    /// Print resolved configuration and language server preflight checks
    Doctor {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        workspace_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Mcp {
            config,
            workspace_root,
            language,
            server_command,
        } => {
            lsb_mcp::run_stdio(McpOptions {
                config_path: config,
                workspace_root,
                language,
                server_command,
            })
            .await
        }
        Command::Check {
            pattern,
            config,
            workspace_root,
            language,
            server_command,
        } => {
            run_check(pattern, config, workspace_root, language, server_command).await
        }
        Command::Doctor {
            config,
            workspace_root,
        } => run_doctor(config, workspace_root).await,
    }
}

async fn run_check(
    pattern: String,
    config: Option<PathBuf>,
    workspace_root: Option<PathBuf>,
    language: Option<String>,
    server_command: Option<String>,
) -> Result<()> {
    let loaded = lsb_core::config::load_config(config.as_deref(), workspace_root.as_deref())?;
    let root = loaded.workspace_root.clone();

    let pool = lsb_lsp::pool::ServerPool::with_process_launcher();
    let server = BrokerServer::from_orchestrator(Orchestrator::new(
        loaded.config,
        loaded.workspace_root,
        pool,
        language,
        server_command,
    ));

    let files = lsb_mcp::collect_files_matching(&root, &pattern)?;
    if files.is_empty() {
        println!("no files match pattern: {pattern}");
        return Ok(());
    }

    let mut error_files = 0usize;
    for file in &files {
        let rel = file
            .strip_prefix(&root)
            .unwrap_or(file)
            .to_string_lossy()
            .to_string();
        match server.diagnostics_for(&root, file).await {
            Ok(diagnostics) => {
                let errors = diagnostics.iter().filter(|d| d.is_error()).count();
                let warnings = diagnostics.len() - errors;
                if errors > 0 {
                    error_files += 1;
                }
                println!("{rel}: {errors} error(s), {warnings} warning(s)");
                for d in &diagnostics {
                    println!(
                        "  {}:{} {}: {}",
                        d.range.start.line + 1,
                        d.range.start.character + 1,
                        d.severity_label(),
                        d.message.trim()
                    );
                }
            }
            Err(err) => {
                error_files += 1;
                eprintln!("{rel}: {err}");
            }
        }
    }

    server.shutdown().await;

    if error_files > 0 {
        eprintln!(
            "{error_files} of {} file(s) have errors",
            files.len()
        );
        std::process::exit(1);
    }
    println!("{} file(s) clean", files.len());
    Ok(())
}

async fn run_doctor(config: Option<PathBuf>, workspace_root: Option<PathBuf>) -> Result<()> {
    let loaded = lsb_core::config::load_config(config.as_deref(), workspace_root.as_deref())?;

    println!("config_source: {:?}", loaded.source);
    println!("workspace_root: {}", loaded.workspace_root.display());
    if let Some(language) = lsb_core::config::forced_language() {
        println!("forced_language: {language} (from LSB_FORCE_LANGUAGE)");
    }

    let mut failures = Vec::<String>::new();
    for language in ["typescript", "rust", "python", "go"] {
        let resolved = match lsb_core::config::resolve_server(&loaded.config, language, None) {
            Ok(resolved) => resolved,
            Err(err) => {
                println!("{language}: <unresolved> ({err})");
                continue;
            }
        };
        println!(
            "{language}: command={} args={:?} request_timeout={:?} open_delay={:?}",
            resolved.command, resolved.args, resolved.request_timeout, resolved.open_delay
        );

        let probe = TokioCommand::new(&resolved.command)
            .arg("--version")
            .output()
            .await;
        match probe {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let version = if !stdout.is_empty() {
                    stdout
                } else if !stderr.is_empty() {
                    stderr
                } else {
                    "<unknown>".to_string()
                };
                println!("  version: {version}");
            }
            Err(err) => {
                println!("  not runnable: {err}");
                failures.push(format!("{language} ({})", resolved.command));
            }
        }
    }

    if !failures.is_empty() {
        eprintln!("doctor_hint: install the missing servers or override them in the config file:");
        for failure in &failures {
            eprintln!("doctor_hint:   {failure}");
        }
        anyhow::bail!("{} language server(s) failed preflight", failures.len());
    }
    Ok(())
}
