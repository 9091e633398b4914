// crates/canon-config/src/lib.rs
// ============================================================================
// Module: Canon Pipeline Configuration
// Description: Validated, scoped options object for the association and
// projection pipeline.
// Purpose: Provide fail-closed parsing of tuning knobs with hard limits,
// built once at startup and never mutated afterward.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A single options object is recognized by the pipeline; there is no
//! per-model configuration. Values are validated at construction time so
//! that a running worker never has to re-check whether its own limits make
//! sense. Invalid input fails closed: [`PipelineOptions::build`] returns an
//! error rather than silently clamping to a default.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Minimum allowed `batch_size`.
const MIN_BATCH_SIZE: u32 = 1;
/// Default `batch_size` when unspecified.
const DEFAULT_BATCH_SIZE: u32 = 500;
/// Default purge interval when purging is enabled but no interval is given.
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(3600);
/// Config filename used when no path is given and the env var is unset.
const DEFAULT_CONFIG_NAME: &str = "canon.toml";
/// Environment variable that overrides the config file path.
const CONFIG_ENV_VAR: &str = "CANON_CONFIG";
/// Maximum accepted config file size, in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Builder Input
// ============================================================================

/// Raw, pre-validation configuration input, typically deserialized from a
/// file or environment.
///
/// Every field is optional; [`PipelineOptions::build`] fills in defaults and
/// rejects combinations that violate the pipeline's invariants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOptionsInput {
    /// Max records per scan page per tick.
    pub batch_size: Option<u32>,
    /// Fallback aggregation tags used when a model declares none.
    pub aggregation_tags: Option<Vec<String>>,
    /// Dotted-path prefixes excluded from canonical and lineage projections.
    pub canonical_exclude_tag_prefixes: Option<Vec<String>>,
    /// Retention window, in seconds, for the intake stage set.
    pub intake_ttl_secs: Option<u64>,
    /// Retention window, in seconds, for the keyed stage set.
    pub keyed_ttl_secs: Option<u64>,
    /// Retention window, in seconds, for parked records.
    pub parked_ttl_secs: Option<u64>,
    /// Retention window, in seconds, for projection tasks.
    pub projection_task_ttl_secs: Option<u64>,
    /// Retention window, in seconds, for rejection reports.
    pub rejection_report_ttl_secs: Option<u64>,
    /// Whether an external purge loop is enabled at all.
    pub purge_enabled: Option<bool>,
    /// Seconds between purge sweeps, when `purge_enabled` is true.
    pub purge_interval_secs: Option<u64>,
    /// Whether rejected records are also written to the parked set.
    pub park_and_sweep_enabled: Option<bool>,
}

// ============================================================================
// SECTION: Validated Options
// ============================================================================

/// Validated pipeline configuration.
///
/// # Invariants
/// - `batch_size >= 1`.
/// - `purge_interval` is `Some` whenever `purge_enabled` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    batch_size: u32,
    aggregation_tags_fallback: Vec<String>,
    canonical_exclude_tag_prefixes: Vec<String>,
    intake_ttl: Option<Duration>,
    keyed_ttl: Option<Duration>,
    parked_ttl: Option<Duration>,
    projection_task_ttl: Option<Duration>,
    rejection_report_ttl: Option<Duration>,
    purge_enabled: bool,
    purge_interval: Duration,
    park_and_sweep_enabled: bool,
}

/// Errors returned while validating a [`PipelineOptionsInput`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `batch_size` was set below [`MIN_BATCH_SIZE`].
    #[error("batch_size must be at least {MIN_BATCH_SIZE}, got {0}")]
    BatchSizeTooSmall(u32),
    /// `purge_interval_secs` was zero while purging was enabled.
    #[error("purge_interval_secs must be greater than zero when purge_enabled is true")]
    PurgeIntervalZero,
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying error, rendered since `io::Error` is not `PartialEq`.
        reason: String,
    },
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`].
    #[error("config file {0} exceeds the {MAX_CONFIG_FILE_SIZE}-byte size limit")]
    TooLarge(PathBuf),
    /// The config file was not valid TOML, or not valid UTF-8.
    #[error("failed to parse config file {path}: {reason}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parser error, rendered.
        reason: String,
    },
}

impl PipelineOptions {
    /// Validates `input`, filling in defaults for every unset field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any supplied value violates the pipeline's
    /// invariants.
    pub fn build(input: PipelineOptionsInput) -> Result<Self, ConfigError> {
        let batch_size = input.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size < MIN_BATCH_SIZE {
            return Err(ConfigError::BatchSizeTooSmall(batch_size));
        }

        let purge_enabled = input.purge_enabled.unwrap_or(false);
        let purge_interval = match input.purge_interval_secs {
            Some(0) if purge_enabled => return Err(ConfigError::PurgeIntervalZero),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_PURGE_INTERVAL,
        };

        Ok(Self {
            batch_size,
            aggregation_tags_fallback: input.aggregation_tags.unwrap_or_default(),
            canonical_exclude_tag_prefixes: input.canonical_exclude_tag_prefixes.unwrap_or_default(),
            intake_ttl: input.intake_ttl_secs.map(Duration::from_secs),
            keyed_ttl: input.keyed_ttl_secs.map(Duration::from_secs),
            parked_ttl: input.parked_ttl_secs.map(Duration::from_secs),
            projection_task_ttl: input.projection_task_ttl_secs.map(Duration::from_secs),
            rejection_report_ttl: input.rejection_report_ttl_secs.map(Duration::from_secs),
            purge_enabled,
            purge_interval,
            park_and_sweep_enabled: input.park_and_sweep_enabled.unwrap_or(true),
        })
    }

    /// Loads options from a TOML file.
    ///
    /// Resolution order for the path: `path`, then the `CANON_CONFIG`
    /// environment variable, then [`DEFAULT_CONFIG_NAME`] in the current
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, exceeds the size
    /// limit, is not valid UTF-8 TOML, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved: PathBuf = match path {
            Some(explicit) => explicit.to_path_buf(),
            None => match env::var_os(CONFIG_ENV_VAR) {
                Some(from_env) => PathBuf::from(from_env),
                None => PathBuf::from(DEFAULT_CONFIG_NAME),
            },
        };

        let metadata = fs::metadata(&resolved).map_err(|err| ConfigError::Io { path: resolved.clone(), reason: err.to_string() })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge(resolved));
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io { path: resolved.clone(), reason: err.to_string() })?;
        let content = std::str::from_utf8(&bytes)
            .map_err(|err| ConfigError::Parse { path: resolved.clone(), reason: err.to_string() })?;
        let input: PipelineOptionsInput =
            toml::from_str(content).map_err(|err| ConfigError::Parse { path: resolved, reason: err.to_string() })?;
        Self::build(input)
    }

    /// Builds options directly from defaults, with no overrides.
    #[must_use]
    pub fn defaults() -> Self {
        Self::build(PipelineOptionsInput::default()).unwrap_or_else(|_| {
            unreachable!("default input always validates")
        })
    }

    /// Max records per scan page per tick.
    #[must_use]
    pub const fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Fallback aggregation tags for models that declare none.
    #[must_use]
    pub fn aggregation_tags_fallback(&self) -> &[String] {
        &self.aggregation_tags_fallback
    }

    /// Dotted-path prefixes excluded from canonical and lineage projections.
    #[must_use]
    pub fn canonical_exclude_tag_prefixes(&self) -> &[String] {
        &self.canonical_exclude_tag_prefixes
    }

    /// Retention window for the intake stage set.
    #[must_use]
    pub const fn intake_ttl(&self) -> Option<Duration> {
        self.intake_ttl
    }

    /// Retention window for the keyed stage set.
    #[must_use]
    pub const fn keyed_ttl(&self) -> Option<Duration> {
        self.keyed_ttl
    }

    /// Retention window for parked records.
    #[must_use]
    pub const fn parked_ttl(&self) -> Option<Duration> {
        self.parked_ttl
    }

    /// Retention window for projection tasks.
    #[must_use]
    pub const fn projection_task_ttl(&self) -> Option<Duration> {
        self.projection_task_ttl
    }

    /// Retention window for rejection reports.
    #[must_use]
    pub const fn rejection_report_ttl(&self) -> Option<Duration> {
        self.rejection_report_ttl
    }

    /// Whether the external purge loop runs at all.
    #[must_use]
    pub const fn purge_enabled(&self) -> bool {
        self.purge_enabled
    }

    /// Interval between purge sweeps.
    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        self.purge_interval
    }

    /// Whether rejected records are also written to the parked set.
    #[must_use]
    pub const fn park_and_sweep_enabled(&self) -> bool {
        self.park_and_sweep_enabled
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let options = PipelineOptions::defaults();
        assert_eq!(options.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(options.park_and_sweep_enabled());
        assert!(!options.purge_enabled());
    }

    #[test]
    fn rejects_batch_size_below_minimum() {
        let input = PipelineOptionsInput { batch_size: Some(0), ..Default::default() };
        let err = PipelineOptions::build(input).unwrap_err();
        assert_eq!(err, ConfigError::BatchSizeTooSmall(0));
    }

    #[test]
    fn rejects_zero_purge_interval_when_purging_enabled() {
        let input = PipelineOptionsInput {
            purge_enabled: Some(true),
            purge_interval_secs: Some(0),
            ..Default::default()
        };
        let err = PipelineOptions::build(input).unwrap_err();
        assert_eq!(err, ConfigError::PurgeIntervalZero);
    }

    #[test]
    fn load_parses_a_toml_file_and_validates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canon.toml");
        fs::write(&path, "batch_size = 25\npark_and_sweep_enabled = false\n").unwrap();

        let options = PipelineOptions::load(Some(&path)).unwrap();
        assert_eq!(options.batch_size(), 25);
        assert!(!options.park_and_sweep_enabled());
    }

    #[test]
    fn load_surfaces_a_validation_error_from_the_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canon.toml");
        fs::write(&path, "batch_size = 0\n").unwrap();

        let err = PipelineOptions::load(Some(&path)).unwrap_err();
        assert_eq!(err, ConfigError::BatchSizeTooSmall(0));
    }

    #[test]
    fn load_reports_io_error_for_a_missing_file() {
        let err = PipelineOptions::load(Some(Path::new("/nonexistent/canon.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn accepts_explicit_overrides() {
        let input = PipelineOptionsInput {
            batch_size: Some(50),
            aggregation_tags: None,
            canonical_exclude_tag_prefixes: Some(vec!["internal.".into()]),
            purge_enabled: Some(true),
            purge_interval_secs: Some(30),
            park_and_sweep_enabled: Some(false),
            ..Default::default()
        };
        let options = PipelineOptions::build(input).unwrap();
        assert_eq!(options.batch_size(), 50);
        assert_eq!(options.purge_interval(), Duration::from_secs(30));
        assert!(!options.park_and_sweep_enabled());
        assert_eq!(options.canonical_exclude_tag_prefixes(), ["internal.".to_string()]);
    }
}
