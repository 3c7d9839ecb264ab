use clap::Parser;
use log::{error, info, warn};
use server::config::{Args, ServerConfig};
use server::network::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Hint: set RUST_LOG=info to see connection activity");
    }
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::resolve(&args)?;

    if config.auth.insecure {
        warn!("Insecure authentication enabled: any non-empty token is accepted");
    } else if config.auth.jwt.is_some() && config.audience().is_empty() {
        warn!("No token audience configured; set --audience or GOOGLE_CLIENT_ID");
    } else if config.auth.jwt.is_none() && config.auth.tokens.is_empty() {
        warn!("No tokens configured; every authentication attempt will fail");
    }

    let verifier = config.verifier()?;
    let server = Server::bind(&config, verifier).await?;
    let handle = server.handle();
    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_task => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    handle.shutdown();
    if let Err(e) = server_task.await {
        error!("Server task panicked: {}", e);
    }

    Ok(())
}
