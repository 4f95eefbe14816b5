use crate::config::{normalize_listen_addr, Config};
use crate::error::Result;
use crate::mime::parser::EmailParser;
use crate::security::tls::TlsConfig;
use crate::smtp::session::SmtpSession;
use crate::store::redis::RedisStore;
use crate::utils::validation::EmailValidator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct SmtpServer {
    config: Arc<Config>,
    validator: Arc<EmailValidator>,
    parser: Arc<EmailParser>,
    tls: Option<TlsConfig>,
    store: Option<RedisStore>,
}

impl SmtpServer {
    /// Build a server from configuration, preparing TLS material and
    /// probing the store. Either collaborator may be unavailable; the
    /// server still accepts mail without them.
    pub async fn new(config: Config) -> Self {
        let tls = if config.smtp.enable_tls {
            match TlsConfig::load_or_generate(
                &config.server.hostname,
                &config.smtp.tls_cert_path,
                &config.smtp.tls_key_path,
            ) {
                Ok(tls) => Some(tls),
                Err(e) => {
                    error!("Failed to prepare TLS material: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let store = match RedisStore::connect(&config.store).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Redis connection failed, continuing without store: {}", e);
                None
            }
        };

        Self::with_components(config, tls, store)
    }

    pub fn with_components(
        config: Config,
        tls: Option<TlsConfig>,
        store: Option<RedisStore>,
    ) -> Self {
        let validator = Arc::new(EmailValidator::from_config(&config.validation));
        Self {
            config: Arc::new(config),
            validator,
            parser: Arc::new(EmailParser::new()),
            tls,
            store,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let addr = normalize_listen_addr(&self.config.server.listen_addr);
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP server listening on {}", addr);

        self.run_with_listener(listener).await
    }

    /// Accept connections until a shutdown signal arrives. Exposed so
    /// tests can bind an ephemeral port themselves.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("SMTP server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let session = SmtpSession::new(
                                self.config.clone(),
                                self.validator.clone(),
                                self.parser.clone(),
                                self.tls.clone(),
                                self.store.clone(),
                                peer.to_string(),
                            );
                            tokio::spawn(async move {
                                if let Err(e) = session.handle(socket).await {
                                    error!("Session error for {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
            }
        }

        // In-flight sessions keep their sockets and finish on their own;
        // dropping the listener stops new arrivals.
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
