//! Falcon Main Server
//!
//! Main entry point: startup ordering is bind sockets, migrate + load
//! persistent state, then start accepting and processing.

use falcon_server::access_control::AccessCache;
use falcon_server::coord_transform::{AreaTable, CalibrationStore, CoordTransformer, MapGeometry};
use falcon_server::detection_buffer::DetectionBuffer;
use falcon_server::dispatcher;
use falcon_server::fanout_hub::FanoutHub;
use falcon_server::frame_bus::{self, FrameBus};
use falcon_server::models::BirdRiskLevel;
use falcon_server::pipeline::{self, PipelineContext, PIPELINE_QUEUE_DEPTH};
use falcon_server::repository::Repository;
use falcon_server::state::{AppConfig, AppState};
use falcon_server::video_relay::VideoRelay;
use falcon_server::zone_engine::{self, ZoneEngine};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "falcon_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Falcon Main Server v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        host = %config.host,
        "Configuration loaded"
    );

    // Bind every socket before touching the database
    let frame_socket = UdpSocket::bind((config.host.as_str(), config.udp_frame_port)).await?;
    let relay_socket = UdpSocket::bind((config.host.as_str(), 0)).await?;
    let inference_listener =
        TcpListener::bind((config.host.as_str(), config.tcp_inference_port)).await?;
    let controller_listener =
        TcpListener::bind((config.host.as_str(), config.tcp_controller_port)).await?;
    let bird_listener = TcpListener::bind((config.host.as_str(), config.tcp_bird_port)).await?;
    let pilot_listener = TcpListener::bind((config.host.as_str(), config.tcp_pilot_port)).await?;
    tracing::info!("Sockets bound");

    // Create database pool and migrate
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    tracing::info!("Database connected");

    let repository = Arc::new(Repository::new(pool.clone(), config.img_dir.clone()));
    repository.migrate().await?;

    // Load persistent state: zone table, authority levels, alerted seed
    let areas = Arc::new(AreaTable::new(repository.get_area_list().await?));
    tracing::info!(zones = areas.areas().len(), "Area table loaded");

    let access = Arc::new(AccessCache::new());
    access.replace(repository.load_access_conditions().await?).await;
    tracing::info!("Access conditions loaded");

    let alerted = repository.known_object_ids().await?;
    let bird_risk = repository
        .get_latest_bird_risk()
        .await?
        .unwrap_or(BirdRiskLevel::Low);
    tracing::info!(
        known_objects = alerted.len(),
        bird_risk = %bird_risk.code(),
        "Persistent state restored"
    );

    // Initialize components
    let frame_bus = Arc::new(FrameBus::new(config.frame_buffer_size, config.frame_age_cap_ms));
    let detection_buffer = Arc::new(DetectionBuffer::new(config.detection_buffer_window_ms));
    let calibration = Arc::new(CalibrationStore::new());
    let hub = Arc::new(FanoutHub::new());
    let zones = Arc::new(ZoneEngine::new(config.hazard_clear_ms, hub.clone()));
    let (pipeline_tx, pipeline_rx) = mpsc::channel(PIPELINE_QUEUE_DEPTH);

    let state = AppState {
        config: config.clone(),
        pool,
        repository: repository.clone(),
        frame_bus: frame_bus.clone(),
        detection_buffer: detection_buffer.clone(),
        calibration: calibration.clone(),
        areas: areas.clone(),
        access: access.clone(),
        zones: zones.clone(),
        hub: hub.clone(),
        bird_risk: Arc::new(RwLock::new(bird_risk)),
        pipeline_tx,
    };

    // Frame ingest + age-out
    tokio::spawn(frame_bus::run_reader(
        frame_bus.clone(),
        frame_socket,
        config.udp_buffer_size,
    ));
    tokio::spawn(frame_bus::run_age_out(
        frame_bus.clone(),
        Duration::from_millis(250),
    ));

    // Zone clear timers
    tokio::spawn(zone_engine::run_clear_timer(zones.clone()));

    // Pipeline worker
    let context = PipelineContext {
        detection_buffer,
        calibration,
        transformer: CoordTransformer::new(MapGeometry::new(
            config.map_width,
            config.map_height,
            config.real_map_width,
            config.real_map_height,
        )),
        areas,
        access,
        zones,
        hub: hub.clone(),
        repository,
    };
    tokio::spawn(pipeline::run_worker(context, pipeline_rx, alerted));

    // Video relay
    let relay = Arc::new(VideoRelay::new(
        relay_socket,
        hub.clone(),
        frame_bus,
        config.udp_relay_port,
    ));
    tokio::spawn(relay.run());

    // Inbound channels
    tokio::spawn(dispatcher::inference::run_listener(
        inference_listener,
        state.clone(),
    ));
    tokio::spawn(dispatcher::controller::run_listener(
        controller_listener,
        state.clone(),
    ));
    tokio::spawn(dispatcher::bird::run_listener(bird_listener, state.clone()));
    tokio::spawn(dispatcher::pilot::run_listener(pilot_listener, state.clone()));

    tracing::info!(
        frames = config.udp_frame_port,
        inference = config.tcp_inference_port,
        controller = config.tcp_controller_port,
        bird = config.tcp_bird_port,
        pilot = config.tcp_pilot_port,
        "Falcon Main Server accepting connections"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining outbound queues");
    tokio::time::sleep(Duration::from_secs(2)).await;
    tracing::info!("Falcon Main Server stopped");
    Ok(())
}
