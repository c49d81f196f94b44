//! vtable-layout CLI
//!
//! Usage:
//!   vtable-layout [OPTIONS] [FILE]
//!
//! Options:
//!   -t, --timeout <MS>               Solve budget; repeat to solve several budgets in parallel
//!   -c, --config <FILE>              Layout configuration (TOML format)
//!   --backend <search|smt2>          Solver backend
//!   --allow-shared-class-offsets     Let two classes use the same offset
//!   --bound-hint <N>                 Upper bound on the table bound
//!   --format <text|toml>             Report format
//!   --emit-smt2                      Print the SMT-LIB2 encoding and exit
//!   -v, --verbose                    Log solver progress (repeat for more)
//!   -h, --help                       Print help

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use vtable_layout::layout::{self, LayoutResult};
use vtable_layout::report::{self, ReportFormat};
use vtable_layout::{parse_program, BackendKind, Error, LayoutConfig};

#[derive(Parser)]
#[command(name = "vtable-layout")]
#[command(about = "Compact dispatch table layout by selector coloring and row displacement")]
struct Cli {
    /// Input file (reads from stdin if not provided)
    input: Option<PathBuf>,

    /// Solve budget in milliseconds; repeat to solve several budgets in parallel
    #[arg(short, long, value_name = "MS")]
    timeout: Vec<u64>,

    /// Layout configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Solver backend: search or smt2
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Let two classes share an offset
    #[arg(long)]
    allow_shared_class_offsets: bool,

    /// Upper bound on the table bound, to test feasibility
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    bound_hint: Option<i64>,

    /// Report format: text or toml
    #[arg(long, default_value = "text")]
    format: ReportFormat,

    /// Print the SMT-LIB2 encoding of the problem and exit
    #[arg(long)]
    emit_smt2: bool,

    /// Log solver progress to stderr; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    // Read input
    let (source, filename) = match &cli.input {
        Some(path) => match fs::read_to_string(path) {
            Ok(content) => (content, path.display().to_string()),
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => {
            let mut buffer = String::new();
            match io::stdin().read_to_string(&mut buffer) {
                Ok(_) => (buffer, "<stdin>".to_string()),
                Err(e) => {
                    eprintln!("Error reading from stdin: {}", e);
                    process::exit(1);
                }
            }
        }
    };

    if let Err(e) = run(&cli, &config, &source) {
        eprintln!("{}", e.format(&source, &filename));
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "vtable_layout=debug",
        _ => "vtable_layout=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Configuration file first, then command line overrides
fn load_config(cli: &Cli) -> Result<LayoutConfig, Error> {
    let mut config = match &cli.config {
        Some(path) => LayoutConfig::from_file(path)?,
        None => LayoutConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config = config.with_backend(backend);
    }
    if cli.allow_shared_class_offsets {
        config = config.with_distinct_class_offsets(false);
    }
    if let Some(hint) = cli.bound_hint {
        config = config.with_bound_hint(hint);
    }
    if let [timeout_ms] = cli.timeout.as_slice() {
        config = config.with_timeout_ms(*timeout_ms);
    }
    Ok(config)
}

fn run(cli: &Cli, config: &LayoutConfig, source: &str) -> Result<(), Error> {
    let program = parse_program(source)?;

    if cli.emit_smt2 {
        print!("{}", layout::smt2_script(&program, config)?);
        return Ok(());
    }

    if cli.timeout.len() <= 1 {
        let result = layout::compute(&program, config)?;
        return print_report(&result, cli.format);
    }

    let budgets: Vec<Duration> = cli
        .timeout
        .iter()
        .map(|&ms| Duration::from_millis(ms))
        .collect();
    let mut first_error = None;
    for (ms, result) in cli
        .timeout
        .iter()
        .zip(layout::solve_budgets(&program, config, &budgets))
    {
        println!("# timeout {} ms", ms);
        match result {
            Ok(result) => print_report(&result, cli.format)?,
            Err(e) => {
                println!("# error: {}", e);
                first_error.get_or_insert(e);
            }
        }
        println!();
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_report(result: &LayoutResult, format: ReportFormat) -> Result<(), Error> {
    print!("{}", report::render(result, format)?);
    Ok(())
}
