use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::router::ForwardingRouter;

pub async fn run(cfg: &Config, router: Arc<ForwardingRouter>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.server.listen_addr).await?;
    info!("Listening on {}", cfg.server.listen_addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, router);
            if let Err(e) = conn.run().await {
                // A client that drops mid-response lands here too; its
                // task ends and any in-flight upstream future is dropped.
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
