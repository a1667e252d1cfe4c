use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use chrono::Utc;
use clap::Parser;
use namma_nav::{
    config::{NavConfig, ProviderConfig},
    create_router,
    driver::{self, Services},
    geolocation::{GeolocationOptions, PositionFeed},
    map::CommandQueue,
    provider::OsrmRouteProvider,
    store::{self, FileStore},
    AppState,
};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_STORE_DIR: &str = "data/navigation";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Turn-by-turn navigation session service for the Namma City map"
)]
struct Args {
    /// Address to listen on (env NAMMA_BIND)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// OSRM base URL (env OSRM_URL)
    #[arg(long)]
    osrm_url: Option<String>,

    /// OSRM routing profile, e.g. driving or foot
    #[arg(long)]
    profile: Option<String>,

    /// Per-request timeout for the routing service, in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Directory holding the persisted session and location cache (env NAMMA_STORE_DIR)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// JSON file overriding navigation thresholds and timers
    #[arg(long)]
    nav_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "namma_nav=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let nav_config = match &args.nav_config {
        Some(path) => {
            tracing::info!("loading navigation config from {}", path.display());
            NavConfig::from_path(path)?
        }
        None => NavConfig::default(),
    };

    let defaults = ProviderConfig::default();
    let provider_config = ProviderConfig {
        base_url: args
            .osrm_url
            .or_else(|| std::env::var("OSRM_URL").ok())
            .unwrap_or(defaults.base_url),
        profile: args.profile.unwrap_or(defaults.profile),
        request_timeout_ms: args.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
        max_retries: defaults.max_retries,
    };
    tracing::info!(
        "routing via {} ({})",
        provider_config.base_url,
        provider_config.profile
    );

    let store_dir = args
        .store_dir
        .or_else(|| std::env::var("NAMMA_STORE_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    let store = Arc::new(FileStore::new(&store_dir)?);
    tracing::info!("persisting navigation state in {}", store_dir.display());

    let last_known = match store::load_last_location(
        store.as_ref(),
        Utc::now(),
        nav_config.location_cache_ttl(),
    ) {
        Ok(fix) => fix,
        Err(err) => {
            tracing::warn!("failed to read last known location: {}", err);
            None
        }
    };
    if let Some(fix) = &last_known {
        tracing::info!("seeding position feed with fix from {}", fix.timestamp);
    }

    let map = Arc::new(CommandQueue::default());
    let services = Services {
        provider: Arc::new(OsrmRouteProvider::new(provider_config)?),
        store,
        renderer: map.clone(),
        feed: PositionFeed::seeded(last_known),
        clock: driver::system_clock(),
    };
    let (navigation, _driver) = driver::spawn(nav_config, GeolocationOptions::default(), services);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(AppState { navigation, map }).layer(cors);

    let addr: SocketAddr = match args
        .bind
        .or_else(|| std::env::var("NAMMA_BIND").ok().and_then(|v| v.parse().ok()))
    {
        Some(addr) => addr,
        None => DEFAULT_BIND.parse()?,
    };
    tracing::info!("starting navigation service on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
