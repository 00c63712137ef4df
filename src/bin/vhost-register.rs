use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use registrar_sdk::{PersistentClient, RegistrarClient, Registration, DEFAULT_SOCKET_PATH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "vhost-register")]
#[command(about = "Register a domain with the vhost registrar", long_about = None)]
struct Cli {
    /// Registrar socket
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Domain name to serve
    #[arg(short, long)]
    domain: String,

    /// Local plain HTTP port to forward to
    #[arg(long, required_unless_present = "https_port", conflicts_with = "https_port")]
    http_port: Option<u16>,

    /// Local HTTPS port to forward to
    #[arg(long)]
    https_port: Option<u16>,

    /// Send the registration and exit; it is withdrawn when the connection closes
    #[arg(long)]
    once: bool,

    /// Seconds between reconnect attempts
    #[arg(long, default_value_t = 30)]
    retry_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vhost_register=info,registrar_sdk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let registration = match (cli.http_port, cli.https_port) {
        (Some(port), _) => Registration::http(&cli.domain, port),
        (None, Some(port)) => Registration::https(&cli.domain, port),
        (None, None) => return Err("one of --http-port or --https-port is required".into()),
    };
    registration.validate()?;

    if cli.once {
        let mut client = RegistrarClient::connect(&cli.socket).await?;
        client.register(&registration).await?;
        client.close().await?;
        tracing::info!(domain = %registration.domain_name, "Registration sent");
        return Ok(());
    }

    let client = PersistentClient::spawn(&cli.socket, Duration::from_secs(cli.retry_secs));
    client.register(registration)?;
    tracing::info!(domain = %cli.domain, "Keeping registration alive, Ctrl+C to withdraw");

    tokio::signal::ctrl_c().await?;
    client.stop().await;
    tracing::info!("Registration withdrawn");
    Ok(())
}
