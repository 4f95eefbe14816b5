use nullmail::config::Config;
use nullmail::smtp::SmtpServer;
use nullmail::{config, health};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::default()
    };
    config.apply_env();

    // Positional argument overrides the listen address, e.g. `:2525`.
    if let Some(addr) = std::env::args().nth(1) {
        config.server.listen_addr = addr;
    }

    init_tracing(&config);

    info!("Starting nullmail v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "SMTP on {}, health on port {}",
        config::normalize_listen_addr(&config.server.listen_addr),
        config.server.health_port
    );

    let health_port = config.server.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port).await {
            error!("Health server error: {}", e);
        }
    });

    let server = SmtpServer::new(config).await;
    server.run().await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_level = if config.logging.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("nullmail={default_level}").into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
