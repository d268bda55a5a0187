//! A plain TCP front for the proxy engine.
//!
//! Listens on `SIFT_LISTEN` (default `127.0.0.1:2525`), connects each
//! accepted client to the output server at `SIFT_SERVER` (default
//! `127.0.0.1:25`) and filters every message through the shell
//! command in `SIFT_FILTER` (default `true`, accept everything).

use std::env;
use std::sync::Arc;

use miette::{IntoDiagnostic, Result, WrapErr};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{error, info};

use smtpsift_engine::{Config, Proxy};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listen = env::var("SIFT_LISTEN").unwrap_or("127.0.0.1:2525".to_string());
    let server_addr = env::var("SIFT_SERVER").unwrap_or("127.0.0.1:25".to_string());
    let filter = env::var("SIFT_FILTER").unwrap_or("true".to_string());

    let listener = TcpListener::bind(&listen)
        .await
        .into_diagnostic()
        .wrap_err("Failed to bind listen address")?;
    info!("Listening on {listen}, proxying to {server_addr}");

    let proxy = Arc::new(Proxy::new(Config::new(filter)));

    loop {
        let (client, peer_addr) = listener
            .accept()
            .await
            .into_diagnostic()
            .wrap_err("Failed accepting connection")?;
        info!("Accepted connection from {peer_addr}");

        let proxy = Arc::clone(&proxy);
        let server_addr = server_addr.clone();

        tokio::spawn(async move {
            let server = match TcpStream::connect(&server_addr).await {
                Ok(server) => server,
                Err(e) => {
                    error!("Failed connecting to output server: {e}");
                    return;
                }
            };

            if let Err(e) = proxy
                .handle_connection(client.compat(), server.compat())
                .await
            {
                error!("Session from {peer_addr} ended with an error: {e}");
            }
        });
    }
}
