use crate::errors::{AppError, AppResult};
use crate::models::NavigatorSettings;
use std::path::Path;

const MIN_TIMEOUT_MS: u64 = 50;
const MAX_TIMEOUT_MS: u64 = 60_000;
const MIN_PROGRESS_INTERVAL: usize = 1;
const MAX_PROGRESS_INTERVAL: usize = 100_000;
const MIN_SPAN_DAYS: i64 = 1;
const MAX_SPAN_DAYS: i64 = 36_600;

/// Reads navigator settings from a YAML file. A missing file yields defaults;
/// missing keys fall back individually.
pub fn load_settings(path: &Path) -> AppResult<NavigatorSettings> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "settings file missing; using defaults");
        return Ok(NavigatorSettings::default());
    }
    let raw = std::fs::read_to_string(path)?;
    parse_settings(&raw)
}

pub fn parse_settings(raw: &str) -> AppResult<NavigatorSettings> {
    if raw.trim().is_empty() {
        return Ok(NavigatorSettings::default());
    }
    let settings: NavigatorSettings = serde_yaml::from_str(raw)?;
    validate_settings(&settings)?;
    Ok(normalize_settings(settings))
}

fn validate_settings(settings: &NavigatorSettings) -> AppResult<()> {
    if settings.log_level.trim().is_empty() {
        return Err(AppError::Config("logLevel cannot be empty".to_string()));
    }
    Ok(())
}

/// Pulls out-of-range values back into the supported bounds.
pub fn normalize_settings(mut settings: NavigatorSettings) -> NavigatorSettings {
    settings.worker_timeout_ms = settings.worker_timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
    settings.worker_ready_timeout_ms = settings
        .worker_ready_timeout_ms
        .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
    settings.progress_interval = settings
        .progress_interval
        .clamp(MIN_PROGRESS_INTERVAL, MAX_PROGRESS_INTERVAL);
    settings.max_selection_span_days = settings
        .max_selection_span_days
        .clamp(MIN_SPAN_DAYS, MAX_SPAN_DAYS);
    settings.thresholds = settings.thresholds.clamped();
    settings.log_level = settings.log_level.trim().to_string();
    settings
}
