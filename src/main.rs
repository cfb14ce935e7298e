use registry_replicator::cli::{Args, Runner};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse_args();

    let default_level = if args.verbose { "registry_replicator=debug" } else { "registry_replicator=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = runner.run().await {
        runner.output().error(&e.to_string());
        std::process::exit(1);
    }
}
