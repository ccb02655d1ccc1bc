use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use whatsapp_sessiond::api::{ApiState, AuthSettings};
use whatsapp_sessiond::config::{Config, ObjectStoreConfig, StoreConfig};
use whatsapp_sessiond::creds::CredentialStore;
use whatsapp_sessiond::http::UreqHttpClient;
use whatsapp_sessiond::ingest::IngestionPipeline;
use whatsapp_sessiond::media::{HttpObjectStore, InMemoryObjectStore, MediaTransfer, ObjectStore};
use whatsapp_sessiond::session::SessionManager;
use whatsapp_sessiond::store::{Backend, InMemoryBackend, RestBackend};
use whatsapp_sessiond::sync::ContactSync;
use whatsapp_sessiond::transport::scripted::ScriptedTransportFactory;

#[derive(Parser, Debug)]
#[command(name = "whatsapp-sessiond", about = "WhatsApp session manager daemon")]
struct Args {
    /// Path to a JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {e:?}");
            std::process::exit(1);
        }
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let http = Arc::new(UreqHttpClient::new());

        let backend: Arc<dyn Backend> = match &config.store {
            StoreConfig::Memory => {
                warn!("Using the in-memory store; messages and contacts are lost on restart");
                Arc::new(InMemoryBackend::new())
            }
            StoreConfig::Rest { base_url, api_key } => {
                info!("Using remote store at {base_url}");
                Arc::new(RestBackend::new(http.clone(), base_url, api_key))
            }
        };

        let object_store: Arc<dyn ObjectStore> = match &config.object_store {
            ObjectStoreConfig::Memory => Arc::new(InMemoryObjectStore::new()),
            ObjectStoreConfig::Http {
                base_url,
                public_base_url,
                api_key,
            } => Arc::new(HttpObjectStore::new(
                http.clone(),
                base_url,
                public_base_url,
                api_key,
            )),
        };

        let creds = Arc::new(CredentialStore::new(
            config.credentials_dir.clone(),
            backend.clone(),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            backend.clone(),
            Arc::new(MediaTransfer::new(object_store)),
            config.retention_days,
            config.ingest_batch_size,
        ));
        let sync = Arc::new(ContactSync::new(backend.clone(), config.sync_settings()));

        // The real protocol adapter is wired in by the embedding application
        // through the library API; the standalone binary runs against the
        // in-process loopback transport.
        warn!("No protocol adapter configured; running with the loopback transport");
        let factory = Arc::new(ScriptedTransportFactory::new());

        let manager = SessionManager::new(
            backend.clone(),
            factory,
            creds,
            pipeline,
            sync,
            config.reconnect_policy(),
            Duration::from_secs(config.health_interval_secs),
        );

        manager.auto_reconnect_all().await;
        let health = manager.spawn_health_monitor();

        if config.auth_secret.is_empty() {
            warn!("auth_secret is empty; every API request will be rejected");
        }
        let state = ApiState {
            manager: manager.clone(),
            backend,
            auth: AuthSettings {
                secret: config.auth_secret.clone(),
                allowed_roles: config.allowed_roles.clone(),
            },
        };

        tokio::select! {
            result = whatsapp_sessiond::api::serve(&config.bind, state) => {
                if let Err(e) = result {
                    error!("HTTP server exited: {e:?}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }

        manager.stop_all().await;
        health.abort();
    });
}
