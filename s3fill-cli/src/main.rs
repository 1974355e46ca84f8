use clap::Parser;
use color_eyre::eyre::eyre;
use std::io::Write;
use tracing::{debug, warn};

mod progress;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    ")"
);

/// Fill an S3 or S3-compatible bucket with generated text objects
#[derive(Parser, Debug)]
#[clap(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Args {
    #[clap(flatten)]
    config: s3fill::Config,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that control the CLI itself rather than the upload job
#[derive(Parser, Debug)]
struct Globals {
    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet")]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Exit with an error status if any upload failed.
    ///
    /// By default the exit status is 0 as long as the job ran, even if some or all uploads
    /// failed.
    #[clap(long)]
    fail_on_error: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_logging(&args.globals);

    debug!(?args.config, "Starting");

    let job = progress::with_spinner(
        &args.globals,
        "Preparing S3 client",
        s3fill::UploadJobBuilder::new(args.config).build(),
    )
    .await?;

    let summary = progress::run_upload_job(&args.globals, job).await?;

    report_summary(&summary, args.globals.fail_on_error, &mut std::io::stdout().lock())
}

/// Print the summary line, then decide the exit status.
///
/// The line reports the requested count whether or not every upload succeeded.  Failed uploads
/// only make this an error with `--fail-on-error`.
fn report_summary(
    summary: &s3fill::UploadSummary,
    fail_on_error: bool,
    out: &mut impl Write,
) -> color_eyre::Result<()> {
    writeln!(
        out,
        "File generation complete. {} files uploaded.",
        summary.requested
    )?;

    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            succeeded = summary.succeeded,
            "Some uploads failed"
        );

        if fail_on_error {
            return Err(eyre!(
                "{} of {} uploads failed",
                summary.failed,
                summary.requested
            ));
        }
    }

    Ok(())
}

/// Log to stderr, so that stdout carries only the summary line.
///
/// `RUST_LOG` overrides the level chosen by `--verbose` / `--quiet`.
fn init_logging(globals: &Globals) {
    use tracing_subscriber::EnvFilter;

    let level = if globals.verbose {
        "debug"
    } else if globals.quiet {
        "error"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "h2=warn,hyper=info,rustls=info,aws=warn,{level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(globals.verbose)
        .with_writer(std::io::stderr)
        .init();
}
