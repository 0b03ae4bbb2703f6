use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use yakapi::cli::{self, Cli, Command};
use yakapi::server::{self, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Values from .env never override variables already present.
    dotenvy::dotenv().ok();

    let args = Cli::parse();
    init_tracing(&args.log_level);

    match args.command {
        Command::Server => {
            let config = ServerConfig::from_env()?;
            server::run(config).await?;
        }
        Command::Publish { stream, server } => cli::do_pub(&server, &stream).await?,
        Command::Subscribe { streams, server } => cli::do_sub(&server, &streams).await?,
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
