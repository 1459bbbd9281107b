use clap::Parser;
use tracing_subscriber::EnvFilter;

use dombridge::config::{DEFAULT_HOST, DEFAULT_PORT};
use dombridge::error::Result;
use dombridge::services::broker;

#[derive(Parser, Debug)]
#[command(name = "dombridged")]
#[command(about = "DOM bridge broker daemon")]
struct Cli {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dombridge=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    broker::run_with_shutdown(&cli.host, cli.port, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
