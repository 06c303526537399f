use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use name_registry::{
    cli::{Cli, Command, ServeArgs},
    client,
    server::Server,
    store::RecordStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store = RecordStore::open(&args.data_file)
        .await
        .with_context(|| format!("failed to open backing file {}", args.data_file.display()))?;

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(listener, Arc::new(store), args.workers);
    let addr = server.local_addr()?;
    info!(workers = args.workers, "registry listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("registry exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
