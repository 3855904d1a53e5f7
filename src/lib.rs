pub mod calendar;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod events;
pub mod models;
pub mod pattern;
pub mod protocol;
pub mod selection;
pub mod settings;
pub mod store;
pub mod transport;

pub use crate::coordinator::{ApplyOutcome, FilterCoordinator};
pub use crate::engine::{FilterEngine, FilterOutcome};
pub use crate::errors::{AppError, AppResult};
pub use crate::events::{EventEmitter, EventLog, NavigatorEvent};
pub use crate::models::{
    DateRange, DreamEntry, FilterCriteria, FilterOptions, FilterResult, FilterStatistics, NavigatorSettings,
    SelectionMode,
};
pub use crate::pattern::{classify, PatternKind, PatternVisualization};
pub use crate::selection::{SelectionPhase, SelectionStateMachine};
pub use crate::store::{FilterStore, InMemoryFilterStore, QuickFilter};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs a JSON subscriber writing to `<log_dir>/navigator.log`, rotated
/// daily. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(log_dir: &Path, level: &str) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "navigator.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

/// Loads settings, starts logging, and builds a coordinator bound to `store`.
pub async fn open_navigator(
    settings_path: &Path,
    log_dir: &Path,
    store: std::sync::Arc<dyn FilterStore>,
    events: EventEmitter,
) -> AppResult<FilterCoordinator> {
    let settings = settings::load_settings(settings_path)?;
    if let Err(error) = init_tracing(log_dir, &settings.log_level) {
        eprintln!("navigator logging unavailable: {error}");
    }
    Ok(FilterCoordinator::initialize(store, events, settings).await)
}
