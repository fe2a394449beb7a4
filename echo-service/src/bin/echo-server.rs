use clap::Parser;
use echo_service::{EchoServer, EchoServiceImpl};
use std::net::SocketAddr;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

/// Serves `echo.Echo` in plaintext.
#[derive(Parser, Debug)]
#[command(name = "echo-server", version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:50051")]
    addr: SocketAddr,

    /// Also serve the gRPC Server Reflection Protocol.
    #[arg(long)]
    reflection: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let reflection = if cli.reflection {
        Some(echo_service::reflection_service()?)
    } else {
        None
    };

    tracing::info!(addr = %cli.addr, reflection = cli.reflection, "serving echo.Echo");

    Server::builder()
        .add_service(EchoServer::new(EchoServiceImpl))
        .add_optional_service(reflection)
        .serve(cli.addr)
        .await?;

    Ok(())
}
