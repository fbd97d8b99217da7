//! Sandrun CLI
//!
//! A command-line tool for running code in bubblewrap sandboxes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sandrun::{
    Bubblewrap, Config, EXAMPLE_CONFIG, ExecutionRequest, Executor, LanguageManager,
    ResourceLimits,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandrun")]
#[command(about = "A tool for cached, sandboxed code execution")]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: $SANDRUN_CONFIG, then built-in)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: sandrun.toml)
        #[arg(short, long, default_value = "sandrun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Language ID (e.g., go, python)
        language: String,

        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Toolchain version (e.g., 1.22)
        #[arg(long = "lang-version", value_name = "VERSION")]
        version: String,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// List available languages
    Languages,

    /// Show the effective configuration
    ShowConfig,

    /// Install a language toolchain
    Install {
        language: String,
        version: String,
    },

    /// Install extra packages for a language toolchain
    Pack {
        language: String,
        version: String,
    },
}

/// Per-run overrides of the configured limits
#[derive(Args)]
struct LimitArgs {
    /// Compile wall clock timeout in seconds
    #[arg(long)]
    compile_timeout: Option<u64>,

    /// Run wall clock timeout in seconds
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Compile CPU time limit in seconds
    #[arg(long)]
    compile_cpu_timeout: Option<u64>,

    /// Run CPU time limit in seconds
    #[arg(long)]
    run_cpu_timeout: Option<u64>,

    /// Compile memory limit in KB
    #[arg(long)]
    compile_memory_limit: Option<u64>,

    /// Run memory limit in KB
    #[arg(long)]
    run_memory_limit: Option<u64>,

    /// Compile output cap per stream in KB
    #[arg(long)]
    compile_max_output: Option<u64>,

    /// Run output cap per stream in KB
    #[arg(long)]
    run_max_output: Option<u64>,
}

impl LimitArgs {
    fn compile(&self) -> ResourceLimits {
        ResourceLimits {
            wall_time: self.compile_timeout,
            cpu_time: self.compile_cpu_timeout,
            memory: self.compile_memory_limit,
            max_output: self.compile_max_output,
        }
    }

    fn run(&self) -> ResourceLimits {
        ResourceLimits {
            wall_time: self.run_timeout,
            cpu_time: self.run_cpu_timeout,
            memory: self.run_memory_limit,
            max_output: self.run_max_output,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(languages = config.languages.len(), "configuration loaded");

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            language,
            source,
            version,
            json,
            limits,
        } => {
            let outcome = run_execute(&config, &language, &version, &source, &limits, json).await;
            if json && let Err(err) = &outcome {
                // JSON consumers read stdout, so failures go there too
                println!("{}", error_json(err));
                std::process::exit(1);
            }
            outcome
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Install { language, version } => LanguageManager::from_config(&config)
            .install(&language, &version)
            .await
            .context("install failed"),
        Commands::Pack { language, version } => LanguageManager::from_config(&config)
            .pack(&language, &version)
            .await
            .context("pack failed"),
    }
}

async fn run_execute(
    config: &Config,
    language: &str,
    version: &str,
    source: &Path,
    limits: &LimitArgs,
    json: bool,
) -> Result<()> {
    let code = tokio::fs::read(source)
        .await
        .context("failed to read source file")?;

    let mut request = ExecutionRequest::new(language, version, code)
        .with_compile_limits(limits.compile())
        .with_run_limits(limits.run());
    if let Some(name) = source.file_name().and_then(|name| name.to_str()) {
        request = request.with_filename(name);
    }

    info!(language, version, "running program");
    let sandbox = Arc::new(Bubblewrap::new(config.bwrap_binary()));
    let executor = Executor::from_config(config, sandbox);
    let result = executor
        .execute(&request)
        .await
        .context("execution failed")?;

    if json {
        let encoded =
            serde_json::to_string_pretty(result.as_ref()).context("failed to encode result")?;
        println!("{encoded}");
    } else {
        print!("{}", result.stdout.text);
        if !result.stderr.text.is_empty() {
            eprint!("{}", result.stderr.text);
        }
    }

    // Execution info goes to stderr, keeping stdout clean for piping
    info!(
        status = ?result.status,
        compilation_time = format_args!("{:.1}ms", result.compilation_time_ms),
        execution_time = ?result.execution_time_ms,
        exit_code = result.exit_code,
        "execution result"
    );

    if result.is_success() {
        Ok(())
    } else {
        std::process::exit(result.exit_code.max(1));
    }
}

/// `{"error": "..."}` with the full context chain of `err`
fn error_json(err: &anyhow::Error) -> String {
    serde_json::json!({ "error": format!("{err:#}") }).to_string()
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let manager = LanguageManager::from_config(config);
    let mut languages: Vec<_> = config.languages.iter().collect();
    languages.sort_by_key(|(id, _)| *id);

    for (id, lang) in languages {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        let installed = installed_versions(&manager, config, id);
        if installed.is_empty() {
            println!("  {:<15} {} ({})", id, lang.name, lang_type);
        } else {
            println!(
                "  {:<15} {} ({}) [{}]",
                id,
                lang.name,
                lang_type,
                installed.join(", ")
            );
        }
    }
}

/// Versions with a toolchain directory under the toolchain root
fn installed_versions(manager: &LanguageManager, config: &Config, language: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(config.toolchain_root.join(language)) else {
        return Vec::new();
    };
    let mut versions: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|version| manager.is_installed(language, version))
        .collect();
    versions.sort();
    versions
}

fn show_config(config: &Config) {
    println!("Compile limits:");
    print_limits(&config.stage_defaults(sandrun::Stage::Compile));
    println!("Run limits:");
    print_limits(&config.stage_defaults(sandrun::Stage::Run));
    println!();
    println!("Cache TTL: {}s", config.cache.ttl);
    println!("Max parallel executions: {}", config.cache.max_parallel);
    match config.cache.acquire_timeout {
        Some(timeout) => println!("Slot wait timeout: {timeout}s"),
        None => println!("Slot wait timeout: none"),
    }
    println!();
    println!("Bubblewrap binary: {}", config.bwrap_binary().display());
    println!("Toolchain root: {}", config.toolchain_root.display());
    println!("Scripts root: {}", config.scripts_root.display());
    println!("Server address: {}", config.server.address);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

fn print_limits(limits: &ResourceLimits) {
    println!("  Wall time: {:?} s", limits.wall_time);
    println!("  CPU time: {:?} s", limits.cpu_time);
    println!("  Memory: {:?} KB", limits.memory);
    println!("  Output: {:?} KB", limits.max_output);
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
