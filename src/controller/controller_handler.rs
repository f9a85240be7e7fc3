use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::admission::pipeline::AdmissionPipeline;
use crate::configuration::config::Configuration;
use crate::credentials::dev_issuer::DevTokenIssuer;
use crate::credentials::verifier::CredentialVerifier;
use crate::ephemeral::memory_store::MemoryEphemeralStore;
use crate::error_handling::types::{ConfigError, ControllerError};
use crate::rules::consumer::RulesConsumer;
use crate::rules::engine::RulesEngine;
use crate::session_management::session_store::SessionStore;
use crate::session_management::sweeper::SessionSweeper;
use crate::storage::blob_store::FsBlobStore;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::storage_trait::Storage;
use crate::stream::event_stream::{EventRecord, EventStream, InProcessStream};
use crate::summary::builder::SummaryBuilder;
use crate::web_interface::web_server::WebServer;

pub struct Controller {
    config: Configuration,
    storage: Arc<dyn Storage>,
    ephemeral: Arc<MemoryEphemeralStore>,
    engine: Arc<RulesEngine>,
    web_server: WebServer,
    consumer_inputs: Option<Vec<tokio::sync::mpsc::Receiver<EventRecord>>>,
}

impl Controller {
    pub async fn new(config: Configuration) -> Result<Self, ControllerError> {
        config.validate().map_err(ControllerError::Config)?;
        std::fs::create_dir_all(&config.storage_path)
            .map_err(|e| ControllerError::Config(ConfigError::Io(e)))?;

        info!("opening durable storage at {}", config.database_path().display());
        let storage: Arc<dyn Storage> = Arc::new(
            DatabaseStorage::new_file(config.database_path())
                .await
                .map_err(ControllerError::Storage)?,
        );
        let ephemeral = Arc::new(
            MemoryEphemeralStore::with_snapshot(config.ephemeral_snapshot_path())
                .map_err(ControllerError::Ephemeral)?,
        );
        let blobs =
            Arc::new(FsBlobStore::new(config.evidence_path()).map_err(ControllerError::Storage)?);

        let key_source = config
            .credential_key_source()
            .map_err(ControllerError::Config)?;
        let verifier = Arc::new(
            CredentialVerifier::from_source(key_source)
                .map_err(|e| ControllerError::Credential(e.to_string()))?,
        );
        let dev_issuer = match config.credential_signing_key_file {
            Some(ref path) => {
                let issuer = DevTokenIssuer::from_seed_file(path, config.profile)
                    .map_err(|e| ControllerError::Credential(e.to_string()))?;
                if issuer.enabled() {
                    info!("dev token issuer active (profile allows it)");
                } else {
                    info!("dev token issuer configured but disabled by profile");
                }
                Some(Arc::new(issuer))
            }
            None => None,
        };

        let (stream, consumer_inputs) = InProcessStream::open(config.stream_partitions);
        let engine = Arc::new(RulesEngine::new(
            storage.clone(),
            ephemeral.clone(),
            config.score_decay,
            config.alert_cooldown(),
            config.snapshot_interval(),
        ));
        let pipeline = Arc::new(AdmissionPipeline::new(
            storage.clone(),
            ephemeral.clone(),
            blobs.clone(),
            engine.clone(),
            Some(Arc::new(stream) as Arc<dyn EventStream>),
            &config,
        ));
        let sessions = Arc::new(SessionStore::new(storage.clone()));
        let summaries = Arc::new(SummaryBuilder::new(storage.clone()));

        let web_server = WebServer::new(
            verifier,
            sessions,
            pipeline,
            storage.clone(),
            blobs,
            summaries,
            dev_issuer,
            config.max_batch_bytes,
        );

        Ok(Self {
            config,
            storage,
            ephemeral,
            engine,
            web_server,
            consumer_inputs: Some(consumer_inputs),
        })
    }

    pub async fn run(
        &mut self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), ControllerError> {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        for (partition, rx) in self
            .consumer_inputs
            .take()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            let consumer = RulesConsumer::new(self.engine.clone(), partition);
            handles.push(tokio::spawn(consumer.run(rx, shutdown_rx.resubscribe())));
        }

        let sweeper = SessionSweeper::new(
            self.storage.clone(),
            Duration::from_secs(self.config.sweep_interval_secs),
            self.config.session_stale_threshold(),
        );
        handles.push(tokio::spawn(sweeper.run(shutdown_rx.resubscribe())));

        handles.push(tokio::spawn(Self::snapshot_loop(
            self.ephemeral.clone(),
            Duration::from_secs(self.config.ephemeral_snapshot_interval_secs),
            shutdown_rx.resubscribe(),
        )));

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| {
                ControllerError::Config(ConfigError::Invalid(format!("bind address: {}", e)))
            })?;
        info!("service operational");

        // Blocks until the shutdown signal has fired and in-flight
        // requests have drained.
        if let Err(e) = self.web_server.start(addr, shutdown_rx.resubscribe()).await {
            error!("web server exited with error: {}", e);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("background task ended abnormally: {}", e);
            }
        }

        self.engine.flush_pending_snapshots().await;
        if let Err(e) = self.ephemeral.snapshot() {
            error!("final ephemeral snapshot failed: {}", e);
        }
        info!("controller shutdown completed");
        Ok(())
    }

    async fn snapshot_loop(
        ephemeral: Arc<MemoryEphemeralStore>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = ephemeral.snapshot() {
                        error!("periodic ephemeral snapshot failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("ephemeral snapshotter stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use log::debug;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind 0");
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn test_config(dir: &std::path::Path, port: u16) -> Configuration {
        let seed = STANDARD.encode([5u8; 32]);
        let signing_path = dir.join("signing.b64");
        std::fs::File::create(&signing_path)
            .and_then(|mut f| writeln!(f, "{}", seed))
            .unwrap();

        // Matching verifying key for the same seed.
        let signing = ed25519_dalek::SigningKey::from_bytes(&[5u8; 32]);
        let key_path = dir.join("verify.b64");
        std::fs::File::create(&key_path)
            .and_then(|mut f| {
                writeln!(f, "{}", STANDARD.encode(signing.verifying_key().to_bytes()))
            })
            .unwrap();

        let mut config = Configuration::default();
        config.bind_address = "127.0.0.1".into();
        config.port = port;
        config.storage_path = dir.join("data");
        config.credential_key_file = Some(key_path);
        config.credential_signing_key_file = Some(signing_path);
        config.stream_partitions = 2;
        config
    }

    async fn raw_request(port: u16, request: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn controller_serves_and_shuts_down_cleanly() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let port = free_port().await;
        let mut controller = Controller::new(test_config(dir.path(), port)).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(async move {
            let _ = controller.run(shutdown_rx).await;
        });

        // Wait for the listener to come up.
        let mut up = false;
        for _ in 0..50 {
            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                up = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(up, "web server should accept connections");

        // The dev issuer is active under the local profile.
        let response = raw_request(
            port,
            "POST /proctoring/dev/token HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        debug!("dev token response: {}", response);
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("token"));

        // Unauthenticated API calls read as 401.
        let response = raw_request(
            port,
            "POST /proctoring/sessions/start HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 401"));
        assert!(response.contains("credential_invalid"));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("controller should stop in time")
            .unwrap();
    }
}
