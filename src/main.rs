use clap::Parser;
use oplog_relay::{Config, Replicator, Result};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "oplog-relay")]
#[command(about = "MongoDB to MySQL replication bridge", long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, value_name = "FILE", default_value = "oplog-relay.json")]
    config: PathBuf,

    /// Recreate target tables and run a full copy before tailing
    #[arg(long)]
    import: bool,

    /// Keep tailing indefinitely; pass `--forever false` for test harnesses
    #[arg(
        long,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    forever: bool,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    if let Err(e) = run(args).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
    info!("Bye");
}

async fn run(args: Args) -> Result<()> {
    info!("Starting oplog-relay");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)?;
    info!(
        src = %config.src,
        dist = %config.dist,
        collections = config.collections.len(),
        "Configuration loaded"
    );

    let mut replicator = Replicator::new(config).await?;
    if args.import {
        replicator.import_and_start(args.forever).await
    } else {
        replicator.start(args.forever).await
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("oplog_relay=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("oplog_relay=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
