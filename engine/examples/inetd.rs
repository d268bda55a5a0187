//! An inetd-style front: the smtp client talks on stdin/stdout, the
//! output server is reached over TCP at `SIFT_SERVER` (default
//! `127.0.0.1:25`). The filter command comes from `SIFT_FILTER`.

use std::env;

use miette::{IntoDiagnostic, Result, WrapErr};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;

use smtpsift_engine::{Config, Proxy};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the smtp client, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let server_addr = env::var("SIFT_SERVER").unwrap_or("127.0.0.1:25".to_string());
    let filter = env::var("SIFT_FILTER").unwrap_or("true".to_string());

    let server = TcpStream::connect(&server_addr)
        .await
        .into_diagnostic()
        .wrap_err("Failed connecting to output server")?;

    let client = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());

    Proxy::new(Config::new(filter))
        .handle_connection(client.compat(), server.compat())
        .await
        .into_diagnostic()
        .wrap_err("Session failed")
}
