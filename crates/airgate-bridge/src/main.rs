mod channel;
mod cleanup;
mod registry;
mod routes;
mod state;
mod tls;
mod uploads;
mod verify;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use airgate_mdns::{multicast_interfaces, MdnsResponder, NoopAwdl};
use airgate_types::ReceiverFlags;

use crate::registry::Registry;
use crate::state::AppState;
use crate::uploads::UploadStore;
use crate::verify::RecordVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airgate=debug,tower_http=info".into()),
        )
        .init();

    // Config
    let port: u16 = std::env::var("AIRGATE_PORT")
        .unwrap_or_else(|_| "8443".into())
        .parse()?;
    let upload_dir: PathBuf = std::env::var("AIRGATE_UPLOAD_DIR")
        .unwrap_or_else(|_| "./uploads".into())
        .into();
    let cert_path: PathBuf = std::env::var("AIRGATE_CERT_PATH")
        .unwrap_or_else(|_| "./certs/airgate-cert.pem".into())
        .into();
    let key_path: PathBuf = std::env::var("AIRGATE_KEY_PATH")
        .unwrap_or_else(|_| "./certs/airgate-key.pem".into())
        .into();
    let awdl_iface = std::env::var("AIRGATE_AWDL_IFACE").unwrap_or_else(|_| "awdl0".into());
    let apple_root: Option<PathBuf> = std::env::var("AIRGATE_APPLE_ROOT").ok().map(Into::into);
    let retention_minutes: u64 = std::env::var("AIRGATE_RETENTION_MINUTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    // Startup preconditions: senders only reach us over the AWDL link.
    let awdl = airgate_mdns::awdl_interfaces(&awdl_iface)?;
    if awdl.is_empty() {
        eprintln!("FATAL: no AWDL interface named {awdl_iface:?} found.");
        eprintln!("       On macOS the system creates awdl0 once peer-to-peer Wi-Fi is active;");
        eprintln!("       on Linux run an AWDL implementation (e.g. owl) first, or point");
        eprintln!("       AIRGATE_AWDL_IFACE at the interface carrying sender traffic.");
        std::process::exit(1);
    }
    let interfaces = multicast_interfaces()?;
    if interfaces.is_empty() {
        eprintln!("FATAL: no multicast-capable network interface available.");
        std::process::exit(1);
    }

    // mDNS responder across every multicast interface: AirDrop answers go
    // out over AWDL, the proxy service over the ordinary LAN.
    let cancel = CancellationToken::new();
    let responder = MdnsResponder::spawn(interfaces, Arc::new(NoopAwdl), cancel.child_token())?;

    let registry = Registry::new(
        responder.clone(),
        port,
        ReceiverFlags::ADVERTISED,
        awdl_iface.clone(),
    );
    registry.publish_proxy().await?;

    let verifier = Arc::new(RecordVerifier::load(apple_root.as_deref()));
    let uploads = Arc::new(UploadStore::new(upload_dir.clone()).await?);

    let retention = Duration::from_secs(retention_minutes * 60);
    tokio::spawn(cleanup::run_cleanup_loop(uploads.clone(), retention, 300));

    let app_state = AppState {
        registry: registry.clone(),
        verifier,
        uploads,
        cancel: cancel.clone(),
    };

    let app = Router::new()
        .route("/Discover", post(routes::discover))
        .route("/Ask", post(routes::ask))
        .route("/Upload", post(routes::upload))
        .route("/hub", get(routes::hub_ws))
        .route("/health", get(routes::health))
        .nest_service("/files", ServeDir::new(&upload_dir))
        .layer(DefaultBodyLimit::max(routes::upload_body_limit()))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let tls_config = tls::load_or_generate(&cert_path, &key_path).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        let cancel = cancel.clone();
        let responder = responder.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            responder.shutdown();
            cancel.cancel();
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });
    }

    info!("airgate listening on https://{addr} (awdl: {awdl_iface})");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    let remaining = registry.peer_count().await;
    if remaining > 0 {
        warn!("{remaining} peer(s) still registered at exit");
    }
    info!("airgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received Ctrl+C, shutting down...");
    }
}
