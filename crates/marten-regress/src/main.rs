use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use marten_regress::{
    CancelToken, ConfigFile, HarnessError, Overrides, RunConfig, RunSummary, discovery, logging,
};

/// Exit code for "the harness could not start" (vs 1 for failed tests)
const EXIT_STARTUP: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "regress")]
#[command(about = "Run Marten toolchain regression tests")]
struct Args {
    /// Path to the configuration file (defaults to ./regress.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tests root directory (overrides the config file)
    #[arg(short, long)]
    tests_dir: Option<PathBuf>,

    /// Toolchain binary directory (overrides the config file)
    #[arg(long)]
    toolchain_dir: Option<PathBuf>,

    /// Worker count; 0 = autodetect (overrides the config file)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Default per-case timeout in seconds (overrides the config file)
    #[arg(long)]
    timeout: Option<u64>,

    /// Only run cases whose path contains this substring
    #[arg(short, long)]
    filter: Option<String>,

    /// List discovered cases without running them
    #[arg(long)]
    list_only: bool,

    /// Output the summary as JSON
    #[arg(long)]
    json: bool,

    /// Treat skipped cases as failures
    #[arg(long)]
    strict: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn startup_error(err: &HarnessError) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), err);
    ExitCode::from(EXIT_STARTUP)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let file = match ConfigFile::load_or_default(args.config.as_deref()) {
        Ok(file) => file,
        Err(e) => return startup_error(&e),
    };
    let overrides = Overrides {
        tests_dir: args.tests_dir.clone(),
        toolchain_dir: args.toolchain_dir.clone(),
        jobs: args.jobs,
        timeout_secs: args.timeout,
    };
    let config = match RunConfig::resolve(file, overrides) {
        Ok(config) => Arc::new(config),
        Err(e) => return startup_error(&e),
    };

    if let Err(e) = logging::init(&config.logging, args.verbose) {
        return startup_error(&e);
    }

    if args.list_only {
        return match discovery::discover(&config, args.filter.as_deref()) {
            Ok(cases) => {
                for case in &cases {
                    println!("{} [{}]", case.path, case.category);
                }
                println!("\nTotal: {} cases", cases.len());
                ExitCode::SUCCESS
            }
            Err(e) => startup_error(&e),
        };
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", "error:".red().bold());
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match runtime.block_on(run_with_interrupt(&args, Arc::clone(&config))) {
        Ok(summary) => {
            report(&args, &summary);
            if summary.success(args.strict) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => startup_error(&e),
    }
}

/// Run the engine on a blocking thread; Ctrl-C trips the cancel token and
/// the partial summary still comes back.
async fn run_with_interrupt(
    args: &Args,
    config: Arc<RunConfig>,
) -> Result<RunSummary, HarnessError> {
    let cancel = CancelToken::new();
    let progress = (!args.json).then(|| {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    });

    let filter = args.filter.clone();
    let worker_cancel = cancel.clone();
    let run_config = Arc::clone(&config);
    let mut run = tokio::task::spawn_blocking(move || {
        marten_regress::run(run_config, filter, worker_cancel, progress)
    });

    let joined = tokio::select! {
        res = &mut run => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, cancelling run");
            cancel.cancel();
            (&mut run).await
        }
    };

    match joined {
        Ok(result) => result,
        Err(e) => Err(HarnessError::Internal(format!("run task failed: {e}"))),
    }
}

fn report(args: &Args, summary: &RunSummary) {
    if args.json {
        match summary.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to serialize summary: {e}"),
        }
    } else {
        summary.print(args.verbose > 0);
        let verdict = if summary.success(args.strict) {
            "OK".green().bold()
        } else {
            "FAILED".red().bold()
        };
        println!("\nResult: {verdict}");
    }
}
