//! Faceguard Control Surface
//!
//! Wires configuration, logging and every subsystem into an [`AppState`],
//! and exposes operator actions over HTTP.

pub mod settings;
mod error;
mod routes;

pub use settings::{AppConfig, LoggingConfig, MetricsConfig};
pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use camera_capture::CameraConfig;
use chrono::FixedOffset;
use door_lock::{DoorHardware, DoorLockController, HardwareBackend};
use face_match::{EnrollmentRegistry, FaceAnalyzer, ScriptedAnalyzer};
use pipeline::{RecognitionService, SessionHandle, SessionReport};
use security::LockoutController;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Application state shared across handlers
pub struct AppState {
    pub config: AppConfig,
    pub service: RecognitionService,
    pub door: Option<Arc<DoorLockController>>,
    /// Presentation offset for attendance timestamps
    pub display_offset: FixedOffset,
    /// At most one session runs at a time
    pub active: Mutex<Option<SessionHandle>>,
    pub last_report: Mutex<Option<SessionReport>>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    /// Build every subsystem from configuration.
    ///
    /// Hardware setup, a missing analyzer or enrollment directory, or an
    /// unusable store are startup failures.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store = storage::open_store(&config.storage)
            .await
            .context("opening attendance store")?;
        let display_offset = config.storage.display_offset()?;

        let script = config
            .enrollment
            .analyzer_script
            .as_deref()
            .context("no face analyzer configured (set enrollment.analyzer_script)")?;
        let analyzer: Arc<dyn FaceAnalyzer> = Arc::new(
            ScriptedAnalyzer::from_json_file(script)
                .with_context(|| format!("loading analyzer script {}", script.display()))?,
        );
        let registry = Arc::new(
            EnrollmentRegistry::load(&config.enrollment.dir, analyzer).context("loading enrollment directory")?,
        );

        let lockout = Arc::new(LockoutController::new(config.security.clone()));

        let door = if config.door.enabled {
            Some(build_door(&config)?)
        } else {
            info!("Door control disabled");
            None
        };

        let mut service = RecognitionService::new(config.pipeline.clone(), registry, store, lockout)
            .with_liveness(config.liveness.clone())
            .with_matcher(config.matcher.clone())
            .with_downsample(config.camera.downsample)
            .with_frame_rate(config.camera.fps);
        if let Some(door) = &door {
            service = service.with_door(Arc::clone(door));
        }

        Ok(Self {
            config,
            service,
            door,
            display_offset,
            active: Mutex::new(None),
            last_report: Mutex::new(None),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        })
    }

    /// Move a session that ended on its own into `last_report`
    pub async fn reap_finished(&self) {
        let mut active = self.active.lock().await;
        if !active.as_ref().is_some_and(SessionHandle::is_finished) {
            return;
        }
        if let Some(handle) = active.take() {
            match handle.join().await {
                Ok(report) => *self.last_report.lock().await = Some(report),
                Err(e) => warn!(error = %e, "Session ended abnormally"),
            }
        }
    }
}

/// Open the configured camera once and release it.
///
/// Run before serving so an unusable camera fails startup instead of the
/// first session.
pub fn check_camera(config: &CameraConfig) -> anyhow::Result<()> {
    let source = camera_capture::open(config).context("camera unavailable")?;
    let (width, height) = source.resolution();
    info!(index = config.index, width, height, "Camera check succeeded");
    Ok(())
}

fn build_door(config: &AppConfig) -> anyhow::Result<Arc<DoorLockController>> {
    let mut hardware = match config.door.backend {
        HardwareBackend::Simulated => {
            info!("Using simulated door hardware");
            DoorHardware::simulated(&config.door).0
        }
        HardwareBackend::Sysfs => DoorHardware::sysfs(&config.door).context("door hardware setup")?,
    };
    let door = DoorLockController::new(config.door.clone(), hardware.lock_pin, hardware.sensor)
        .context("door controller setup")?;
    door.attach_emergency(hardware.emergency.as_mut())
        .context("emergency button setup")?;
    Ok(door)
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub enrolled_identities: usize,
    pub session_active: bool,
    pub door: Option<door_lock::LockState>,
    pub locked_out: bool,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/door", get(routes::door::status))
        .route("/api/v1/door/unlock", post(routes::door::unlock))
        .route("/api/v1/door/lock", post(routes::door::lock))
        .route("/api/v1/door/emergency", post(routes::door::emergency))
        .route("/api/v1/door/reset", post(routes::door::reset))
        .route("/api/v1/door/status-log", post(routes::door::save_status_log))
        .route("/api/v1/sessions", post(routes::sessions::start).get(routes::sessions::current))
        .route("/api/v1/sessions/stop", post(routes::sessions::stop))
        .route("/api/v1/security", get(routes::sessions::security_status))
        .route("/api/v1/security/reset", post(routes::sessions::security_reset))
        .route(
            "/api/v1/attendance",
            get(routes::attendance::list).delete(routes::attendance::delete_all),
        )
        .route("/api/v1/classes", get(routes::attendance::classes))
        .route("/api/v1/enrollment/reload", post(routes::attendance::reload_enrollment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.reap_finished().await;
    let session_active = state.active.lock().await.is_some();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        enrolled_identities: state.service.registry().snapshot().identities().len(),
        session_active,
        door: state.door.as_ref().map(|door| door.state()),
        locked_out: state.service.lockout().status().locked_out,
    })
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid logging.level")?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Install the Prometheus exporter when configured
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    if let Some(addr) = config.listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }
    Ok(())
}

/// Run the HTTP server until Ctrl-C
pub async fn run_server(state: Arc<AppState>, addr: &str) -> anyhow::Result<()> {
    let app = create_router(Arc::clone(&state));

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    if let Some(handle) = state.active.lock().await.take() {
        handle.stop_and_join().await?;
    }
    if let Some(door) = &state.door {
        door.shutdown();
    }
    Ok(())
}
