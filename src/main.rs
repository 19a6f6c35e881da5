use anyhow::Result;
use clap::Parser;
use driftcheck::presentation::cli_summary::{print_object_grid, print_perf_summary, print_summary};
use driftcheck::presentation::writers::{all_writers, write_to_file, writer_for};
use driftcheck::{init_tracing, AppConfig, LogLevel, TableConfig};

#[derive(Parser, Debug)]
#[command(
    name = "driftcheck",
    about = "driftcheck: find and repair drift between two replicated SQL databases."
)]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Restrict the run to these tables (repeatable).
    #[arg(short, long = "table")]
    tables: Vec<String>,

    /// Print the summary without writing the repair script.
    #[arg(long)]
    dry_run: bool,

    #[arg(short, long, default_value = "sql")]
    format: String,

    #[arg(short, long)]
    quiet: bool,

    /// -v, -vv, -vvv
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = AppConfig::load(&cli.config)?;

    if cli.quiet {
        cfg.reconcile.quiet = true;
    }
    if cli.verbose > 0 {
        cfg.reconcile.verbosity = cli.verbose.min(3);
    }
    if !cli.tables.is_empty() {
        let configured = std::mem::take(&mut cfg.reconcile.tables);
        cfg.reconcile.tables = cli
            .tables
            .iter()
            .map(|name| {
                configured
                    .iter()
                    .find(|t| &t.name == name)
                    .cloned()
                    .unwrap_or_else(|| TableConfig::new(name.clone()))
            })
            .collect();
    }

    init_tracing(LogLevel::from_options(
        cfg.reconcile.quiet,
        cfg.reconcile.verbosity,
    ));

    let (report, perf) = driftcheck::run_with_timing(&cfg).await?;

    if !cfg.reconcile.quiet {
        print_summary(&report);
        print_object_grid(&report);
        if cfg.reconcile.verbosity >= 2 {
            print_perf_summary(&perf);
        }
    }

    if !cli.dry_run {
        match cli.format.as_str() {
            "all" => {
                for writer in all_writers() {
                    let path = write_to_file(&*writer, &report, &cfg.output.dir)?;
                    println!("Report written to {}", path.display());
                }
            }
            fmt => {
                let writer =
                    writer_for(fmt).ok_or_else(|| anyhow::anyhow!("Unknown format: {}", fmt))?;
                let path = write_to_file(&*writer, &report, &cfg.output.dir)?;
                println!("Repair script written to {}", path.display());
            }
        }
    }

    // drift is reported through the exit code
    if !report.schema.is_identical() {
        std::process::exit(1);
    }
    Ok(())
}
