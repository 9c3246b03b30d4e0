use anyhow::Context;
use clap::Parser;
use generator::survey::{generate, SurveyConfig};
use std::path::PathBuf;
use workflow::config::read_file_list;
use workflow::orchestrator::{Options, Orchestrator};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Batch post-processor for swath sonar files")]
struct Args {
    /// Swath file to process
    #[arg(long, short = 'I')]
    input: Option<PathBuf>,
    /// File listing swath files, one per line
    #[arg(long)]
    list: Option<PathBuf>,
    /// Output file override (single input only)
    #[arg(long, short = 'O')]
    output: Option<PathBuf>,
    /// Files processed concurrently, capped by available cores
    #[arg(long, default_value_t = 1)]
    threads: usize,
    /// Reprocess even when outputs are up to date
    #[arg(long, short = 'F', default_value_t = false)]
    force: bool,
    /// Drop comment records from the output
    #[arg(long, default_value_t = false)]
    strip_comments: bool,
    /// Report what would be processed without processing
    #[arg(long, short = 'T', default_value_t = false)]
    test: bool,
    /// Raise log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Write a synthetic survey into this directory and exit
    #[arg(long)]
    generate: Option<PathBuf>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(dir) = args.generate {
        let files = generate(&dir, &SurveyConfig::default())
            .with_context(|| format!("generating survey in {}", dir.display()))?;
        println!(
            "Synthetic survey -> {} (parameters {})",
            files.input.display(),
            files.parameters.display()
        );
        return Ok(());
    }

    let mut inputs = Vec::new();
    if let Some(list) = &args.list {
        inputs.extend(read_file_list(list)?);
    }
    if let Some(input) = args.input {
        inputs.push(input);
    }
    if inputs.is_empty() {
        anyhow::bail!("no input: pass --input or --list");
    }

    let options = Options {
        threads: args.threads,
        force: args.force,
        strip_comments: args.strip_comments,
        test_only: args.test,
        output: args.output,
    };
    let mut orchestrator = Orchestrator::new(options);
    let reports = orchestrator.run(&inputs)?;

    let processed = reports.iter().filter(|r| r.metrics.is_some()).count();
    let (files, pings, rejected, failed) = orchestrator.metrics().snapshot();
    println!(
        "{} of {} files processed -> {} written, {} pings, {} rejected, {} failed",
        processed,
        reports.len(),
        files,
        pings,
        rejected,
        failed
    );
    for report in reports.iter().filter(|r| r.metrics.is_some()) {
        log::info!("{} -> {}", report.input.display(), report.output.display());
    }
    Ok(())
}
