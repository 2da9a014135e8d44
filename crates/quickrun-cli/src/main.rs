//! Quickrun CLI
//!
//! A command-line tool for compiling and running source code through an
//! external toolchain.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quickrun::{CompilationResult, Compiler, Config, EXAMPLE_CONFIG, Validator};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quickrun")]
#[command(about = "A tool for compiling and running source code through an external toolchain")]
#[command(version)]
struct Cli {
    /// Path to configuration file
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
    /// Compile and run a source file
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Timeout in seconds
        #[arg(short, long, value_parser = parse_timeout)]
        timeout: Option<Duration>,

        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and run inline source code
    Eval {
        /// Source code
        #[arg(value_name = "CODE")]
        code: String,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run only the static checks on a source file
    Check {
        /// Source file to check
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: quickrun.toml)
        #[arg(short, long, default_value = "quickrun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    ShowConfig,
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

    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };
    if cli.verbose {
        config.verbose = true;
    }

    match cli.command {
        Commands::Run {
            source,
            timeout,
            no_cache,
            json,
        } => {
            if let Some(timeout) = timeout {
                config.timeout = timeout;
            }
            if no_cache {
                config.enable_cache = false;
            }
            run_file(config, &source, json).await
        }
        Commands::Eval { code, json } => run_code(config, &code, json).await,
        Commands::Check { source } => check_file(&config, &source).await,
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::ShowConfig => show_config(&config),
    }
}

/// Parse a positive number of seconds
fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds: {e}"))?;
    if secs.is_nan() || secs <= 0.0 {
        return Err("timeout must be greater than zero".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

async fn run_file(config: Config, source: &Path, json: bool) -> Result<()> {
    if !source.exists() {
        anyhow::bail!("source file '{}' does not exist", source.display());
    }

    info!(source = %source.display(), "running program");
    let compiler = Compiler::new(Some(config));
    let result = compiler.compile(source).await;
    finish(&compiler, &result, json)
}

async fn run_code(config: Config, code: &str, json: bool) -> Result<()> {
    let compiler = Compiler::new(Some(config));
    let result = compiler.compile_code(code).await;
    finish(&compiler, &result, json)
}

/// Print the result and exit with the program's exit code
fn finish(compiler: &Compiler, result: &CompilationResult, json: bool) -> Result<()> {
    if json {
        println!("{}", result.to_json().context("failed to serialize result")?);
    } else {
        // Program output goes to stdout as-is, keeping it clean for piping
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&result.content)
            .and_then(|()| stdout.flush())
            .context("failed to write program output")?;
        let mut stderr = std::io::stderr().lock();
        stderr
            .write_all(&result.error_output)
            .context("failed to write program error output")?;

        if result.has_error() {
            eprintln!("{}: {}", result.status, result.error_message());
        }
    }

    info!(
        status = %result.status,
        exit_code = result.exit_code,
        duration = format_args!("{:.3}s", result.duration.as_secs_f64()),
        compile_time = format_args!("{:.3}s", result.compile_time.as_secs_f64()),
        execution_time = format_args!("{:.3}s", result.execution_time.as_secs_f64()),
        memory = format_args!("{} KB", result.memory_used / 1024),
        cache_hit = result.cache_hit,
        "compilation result"
    );

    compiler.close().context("failed to close compiler")?;

    if result.success {
        Ok(())
    } else {
        std::process::exit(if result.exit_code == 0 {
            1
        } else {
            result.exit_code
        });
    }
}

async fn check_file(config: &Config, source: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let validation = Validator::from_config(config).validate(&content);

    for error in &validation.errors {
        println!("error: {error}");
    }
    for warning in &validation.warnings {
        println!("warning: {warning}");
    }
    println!("complexity: {}", validation.complexity_score);

    if validation.valid {
        println!("OK");
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn show_config(config: &Config) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("failed to serialize configuration")?;
    println!("{json}");
    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_accepts_fractional_seconds() {
        assert_eq!(parse_timeout("2.5"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_timeout("10"), Ok(Duration::from_secs(10)));
    }

    #[test]
    fn timeout_rejects_zero_and_negative() {
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("NaN").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn run_rejects_zero_timeout() {
        let result = Cli::try_parse_from(["quickrun", "run", "main.go", "--timeout", "0"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["quickrun", "run", "main.go", "-t", "1.5"]).unwrap();
        let Commands::Run { timeout, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(timeout, Some(Duration::from_millis(1500)));
    }
}
