use postwall_db::client::{DbClient, DbError};
use serde::Deserialize;
use server::{ServerState, Settings, cache::PageCache, media::MediaStorage};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error setting up database: {0}")]
    Database(#[from] DbError),
    #[error("Error creating media root: {0}")]
    MediaRoot(std::io::Error),
    #[error("Error installing signal handler: {0}")]
    Signal(std::io::Error),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default = "default_media_root")]
    media_root: PathBuf,
    #[serde(default = "default_login_url")]
    login_url: String,
    #[serde(default = "default_index_cache_seconds")]
    index_cache_seconds: u64,
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_login_url() -> String {
    "/auth/login/".to_owned()
}

fn default_index_cache_seconds() -> u64 {
    20
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postwall_api=debug,\
                postwall_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

/// Drops every cached page whenever the process receives `SIGHUP`.
#[cfg(unix)]
fn clear_cache_on_hangup(page_cache: Arc<PageCache>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("Received SIGHUP, clearing page cache");
            page_cache.clear().await;
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Listening for shutdown signal failed");
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let db_client = DbClient::connect(&env.database_url).await?;
    tokio::fs::create_dir_all(&env.media_root)
        .await
        .map_err(InitError::MediaRoot)?;

    let page_cache = Arc::new(PageCache::new());
    #[cfg(unix)]
    clear_cache_on_hangup(Arc::clone(&page_cache)).map_err(InitError::Signal)?;

    let state = ServerState {
        db_client: Arc::new(db_client),
        page_cache,
        media: Arc::new(MediaStorage::new(env.media_root)),
        settings: Arc::new(Settings {
            login_url: env.login_url,
            index_cache_ttl: Duration::from_secs(env.index_cache_seconds),
        }),
    };
    let app = server::app(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
