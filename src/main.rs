use std::sync::Arc;

use devgate::config::Config;
use devgate::proxy::router::ForwardingRouter;
use devgate::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    // Configuration errors abort here, before the listener binds.
    let cfg = Config::load()?;
    let router = Arc::new(ForwardingRouter::from_config(&cfg)?);

    tokio::select! {
        res = server::listener::run(&cfg, router) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
