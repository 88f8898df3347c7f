//! rootmap: inspect stack maps and safepoint root tables.
//!
//! Run with: `rootmap [OPTIONS] <COMMAND>`

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use commands::Settings;
use error::{EXIT_SUCCESS, EXIT_USAGE_ERROR};
use rootmap_core::{Endianness, TargetConfig};
use rootmap_gc::TableFormat;

#[derive(Parser)]
#[command(name = "rootmap")]
#[command(about = "Inspect stack maps and build safepoint root tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Target preset (x86_64, aarch64, i686)
    #[arg(short, long, global = true, default_value = "x86_64", value_parser = parse_target)]
    target: TargetConfig,

    /// Input and output are big-endian
    #[arg(long, global = true)]
    big_endian: bool,

    /// Table layout
    #[arg(short, long, global = true, value_enum, default_value_t = FormatArg::Uniform)]
    format: FormatArg,

    /// Argument count assumed for every function
    #[arg(long, global = true, default_value_t = 0)]
    arity: u32,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a decoded stack map section
    Dump {
        /// Raw `.llvm_stackmaps` bytes
        input: PathBuf,

        /// One line per location, nothing else
        #[arg(long)]
        raw: bool,
    },

    /// Emit root tables for every function in a stack map
    Build {
        /// Raw `.llvm_stackmaps` bytes
        input: PathBuf,

        /// Write the relocated table section here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Look up the live roots at a return address
    Roots {
        /// Raw `.llvm_stackmaps` bytes
        input: PathBuf,

        /// Return address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_address)]
        address: u64,

        /// Frame base; prints absolute slot addresses
        #[arg(long, value_parser = parse_address)]
        frame_base: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// One root list per function (v1)
    Uniform,
    /// One root list per safepoint (v2)
    PerSafepoint,
}

impl From<FormatArg> for TableFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Uniform => TableFormat::Uniform,
            FormatArg::PerSafepoint => TableFormat::PerSafepoint,
        }
    }
}

fn parse_target(name: &str) -> Result<TargetConfig, String> {
    TargetConfig::preset(name).ok_or_else(|| format!("unknown target `{name}`"))
}

fn parse_address(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid address `{text}`: {err}"))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(if err.use_stderr() {
                EXIT_USAGE_ERROR
            } else {
                EXIT_SUCCESS
            });
        }
    };

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli) {
        Ok(report) => {
            print!("{report}");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(err) => error::report(&err),
    }
}

fn run(cli: Cli) -> anyhow::Result<String> {
    let mut target = cli.target;
    if cli.big_endian {
        target.endianness = Endianness::Big;
    }
    target
        .validate()
        .map_err(rootmap_core::RootMapError::from)
        .context("invalid target configuration")?;

    let settings = Settings {
        target,
        format: cli.format.into(),
        arity: cli.arity,
    };

    match cli.command {
        Commands::Dump { input, raw } => {
            let map = commands::read_stack_map(&input, &settings)?;
            commands::render_dump(&map, raw)
        }
        Commands::Build { input, output } => {
            commands::build(&input, output.as_deref(), &settings)
        }
        Commands::Roots {
            input,
            address,
            frame_base,
        } => commands::roots(&input, address, frame_base, &settings),
    }
}
