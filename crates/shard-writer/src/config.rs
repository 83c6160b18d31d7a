//! Shard writer settings.
//!
//! Layered config: built-in defaults -> config file -> `SHARD_WRITER_*`
//! environment variables. CLI overrides are applied by the caller.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::ShardWriterError;

/// Settings recognised by the shard writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardWriterSettings {
    /// Documents per batch handed to the index service
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of writer workers
    #[serde(default = "default_writer_threads")]
    pub writer_threads: usize,

    /// Batches that may wait in the writer queue before enqueue blocks
    #[serde(default = "default_writer_queue_size")]
    pub writer_queue_size: usize,

    /// Name of the staged configuration bundle directory
    #[serde(default = "default_bundle_name")]
    pub bundle_name: String,

    /// Prefix of the shard output directory name
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Seconds between liveness reports while a protected operation runs.
    /// Must be shorter than `host_silence_timeout_secs`.
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    /// Seconds of silence after which the host scheduler kills a task
    #[serde(default = "default_host_silence_timeout")]
    pub host_silence_timeout_secs: u64,

    /// Longest time enqueue may block on a full writer queue
    #[serde(default = "default_enqueue_timeout")]
    pub enqueue_timeout_secs: u64,

    /// Seconds between progress reports while close drains the workers
    #[serde(default = "default_drain_progress_interval")]
    pub drain_progress_interval_secs: u64,

    /// Memory budget for the index writer in MB
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Merge the shard down to one segment before closing
    #[serde(default = "default_optimize")]
    pub optimize: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_batch_size() -> usize {
    20
}

fn default_writer_threads() -> usize {
    2
}

fn default_writer_queue_size() -> usize {
    100
}

fn default_bundle_name() -> String {
    "index-bundle.zip".to_string()
}

fn default_output_prefix() -> String {
    "shard".to_string()
}

fn default_liveness_interval() -> u64 {
    60
}

fn default_host_silence_timeout() -> u64 {
    600
}

fn default_enqueue_timeout() -> u64 {
    600
}

fn default_drain_progress_interval() -> u64 {
    5
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_optimize() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ShardWriterSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            writer_threads: default_writer_threads(),
            writer_queue_size: default_writer_queue_size(),
            bundle_name: default_bundle_name(),
            output_prefix: default_output_prefix(),
            liveness_interval_secs: default_liveness_interval(),
            host_silence_timeout_secs: default_host_silence_timeout(),
            enqueue_timeout_secs: default_enqueue_timeout(),
            drain_progress_interval_secs: default_drain_progress_interval(),
            writer_memory_mb: default_writer_memory_mb(),
            optimize: default_optimize(),
            log_level: default_log_level(),
        }
    }
}

impl ShardWriterSettings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file, when a path is given
    /// 3. Environment variables (SHARD_WRITER_BATCH_SIZE, ...)
    pub fn load(config_path: Option<&str>) -> Result<Self, ShardWriterError> {
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("batch_size", defaults.batch_size as i64)?
            .set_default("writer_threads", defaults.writer_threads as i64)?
            .set_default("writer_queue_size", defaults.writer_queue_size as i64)?
            .set_default("bundle_name", defaults.bundle_name)?
            .set_default("output_prefix", defaults.output_prefix)?
            .set_default(
                "liveness_interval_secs",
                defaults.liveness_interval_secs as i64,
            )?
            .set_default(
                "host_silence_timeout_secs",
                defaults.host_silence_timeout_secs as i64,
            )?
            .set_default("enqueue_timeout_secs", defaults.enqueue_timeout_secs as i64)?
            .set_default(
                "drain_progress_interval_secs",
                defaults.drain_progress_interval_secs as i64,
            )?
            .set_default("writer_memory_mb", defaults.writer_memory_mb as i64)?
            .set_default("optimize", defaults.optimize)?
            .set_default("log_level", defaults.log_level)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("SHARD_WRITER").try_parsing(true));

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ShardWriterError> {
        if self.batch_size == 0 {
            return Err(ShardWriterError::Config("batch_size must be > 0".into()));
        }
        if self.writer_threads == 0 {
            return Err(ShardWriterError::Config("writer_threads must be > 0".into()));
        }
        if self.writer_queue_size == 0 {
            return Err(ShardWriterError::Config(
                "writer_queue_size must be > 0".into(),
            ));
        }
        if self.bundle_name.is_empty() {
            return Err(ShardWriterError::Config("bundle_name must be set".into()));
        }
        if self.liveness_interval_secs == 0
            || self.liveness_interval_secs >= self.host_silence_timeout_secs
        {
            return Err(ShardWriterError::Config(format!(
                "liveness_interval_secs must be between 1 and {} (host silence timeout), got {}",
                self.host_silence_timeout_secs.saturating_sub(1),
                self.liveness_interval_secs
            )));
        }
        if self.drain_progress_interval_secs == 0 {
            return Err(ShardWriterError::Config(
                "drain_progress_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_secs(self.enqueue_timeout_secs)
    }

    pub fn drain_progress_interval(&self) -> Duration {
        Duration::from_secs(self.drain_progress_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = ShardWriterSettings::default();
        assert_eq!(settings.batch_size, 20);
        assert_eq!(settings.writer_threads, 2);
        assert_eq!(settings.writer_queue_size, 100);
        assert_eq!(settings.output_prefix, "shard");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shard-writer.toml");
        std::fs::write(
            &path,
            "batch_size = 50\nwriter_threads = 4\nbundle_name = \"myconf.zip\"\n",
        )
        .unwrap();

        let settings = ShardWriterSettings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.writer_threads, 4);
        assert_eq!(settings.bundle_name, "myconf.zip");
        // Untouched keys keep their defaults
        assert_eq!(settings.writer_queue_size, 100);
        assert!(settings.optimize);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = ShardWriterSettings::load(Some("/nonexistent/shard-writer.toml"));
        assert!(matches!(result, Err(ShardWriterError::Config(_))));
    }

    #[test]
    fn test_liveness_must_beat_silence_timeout() {
        let settings = ShardWriterSettings {
            liveness_interval_secs: 600,
            host_silence_timeout_secs: 600,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ShardWriterError::Config(_))
        ));

        let settings = ShardWriterSettings {
            liveness_interval_secs: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        for settings in [
            ShardWriterSettings {
                batch_size: 0,
                ..Default::default()
            },
            ShardWriterSettings {
                writer_threads: 0,
                ..Default::default()
            },
            ShardWriterSettings {
                writer_queue_size: 0,
                ..Default::default()
            },
        ] {
            assert!(settings.validate().is_err());
        }
    }

    #[test]
    fn test_durations() {
        let settings = ShardWriterSettings::default();
        assert_eq!(settings.liveness_interval(), Duration::from_secs(60));
        assert_eq!(settings.enqueue_timeout(), Duration::from_secs(600));
        assert_eq!(settings.drain_progress_interval(), Duration::from_secs(5));
    }
}
