use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use jsrev_tools::analysis::deob::{DeobOptions, Deobfuscator};
use jsrev_tools::analysis::obfuscation;
use jsrev_tools::analysis::taint::{self, TaintConfig};
use jsrev_tools::Settings;

#[derive(Parser)]
#[command(name = "jsrev-tools")]
#[command(about = "JavaScript reverse-engineering tools for AI agents")]
#[command(version)]
struct Cli {
    /// Settings file (YAML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the workbench as an MCP server over stdio
    Serve,
    /// One-shot static analysis of a JavaScript file
    Analyze {
        /// File to analyze
        file: PathBuf,

        /// Run the deobfuscation pipeline and print the result
        #[arg(long)]
        deobfuscate: bool,

        /// Aggressive passes (unflattening, VM identification)
        #[arg(long)]
        aggressive: bool,

        /// Rename mangled identifiers
        #[arg(long)]
        rename: bool,

        /// Run taint analysis
        #[arg(long)]
        taint: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // MCP speaks JSON-RPC on stdout; logs go to stderr.
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Command::Serve => jsrev_tools::mcp::run_server(settings).await,
        Command::Analyze {
            file,
            deobfuscate,
            aggressive,
            rename,
            taint: run_taint,
        } => {
            let source = std::fs::read_to_string(&file)?;

            let detection = obfuscation::detect(&source);
            println!("{}", serde_json::to_string_pretty(&detection)?);

            if deobfuscate {
                let opts = DeobOptions {
                    aggressive,
                    rename,
                    use_model: false,
                    ..Default::default()
                };
                let result = Deobfuscator::new().run_sync(&source, &opts);
                eprintln!(
                    "confidence {:.2}, {} transformation(s)",
                    result.confidence,
                    result
                        .transformations
                        .iter()
                        .filter(|t| t.success && t.count > 0)
                        .count()
                );
                println!("{}", result.code);
            }

            if run_taint {
                let report = taint::analyze(&source, &TaintConfig::default())?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }

            Ok(())
        }
    }
}
