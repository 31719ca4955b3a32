//! Shared configuration for the courier invocation dispatcher.
//!
//! Configuration is layered with [`ortho_config`]: built-in defaults are
//! overridden by a TOML file (passed with `--config-path`), then by
//! `COURIER_*` environment variables, and finally by command-line flags. The
//! dispatcher only needs a handful of knobs: logging, the size of the shared
//! worker pool, and the protocol tag that marks in-process transports as
//! eligible for inline execution.

mod defaults;
mod logging;

use std::ffi::OsString;

use ortho_config::{OrthoConfig, OrthoResult};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOCAL_PROTOCOL, DEFAULT_LOG_FILTER, DEFAULT_WORKER_NAME_PREFIX,
    DEFAULT_WORKER_THREADS, default_local_protocol, default_log_filter, default_log_format,
    default_worker_threads,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "COURIER")]
pub struct Config {
    /// `tracing` filter expression applied to the global subscriber.
    #[serde(default = "defaults::default_log_filter_string")]
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default)]
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Number of pool workers. Zero disables the pool and runs every
    /// invocation on the calling thread.
    #[serde(default = "defaults::default_worker_threads")]
    #[ortho_config(default = defaults::DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,
    /// Protocol tag identifying in-process transports.
    #[serde(default = "defaults::default_local_protocol_string")]
    #[ortho_config(default = defaults::default_local_protocol_string())]
    pub local_protocol: String,
    /// Prefix used when naming pool worker threads.
    #[serde(default = "defaults::default_worker_name_prefix_string")]
    #[ortho_config(default = defaults::default_worker_name_prefix_string())]
    pub worker_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            worker_threads: defaults::DEFAULT_WORKER_THREADS,
            local_protocol: defaults::default_local_protocol_string(),
            worker_name_prefix: defaults::default_worker_name_prefix_string(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments, environment and any
    /// configuration file.
    ///
    /// # Errors
    ///
    /// Returns the loader error when a source cannot be read or parsed.
    pub fn load() -> OrthoResult<Self> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration using `args` in place of the process arguments.
    ///
    /// # Errors
    ///
    /// Returns the loader error when a source cannot be read or parsed.
    pub fn load_from_iter<I, T>(args: I) -> OrthoResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Filter expression for the global `tracing` subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format for structured logs.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Configured pool size.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Whether invocations should be handed to a worker pool at all.
    #[must_use]
    pub fn pool_enabled(&self) -> bool {
        self.worker_threads > 0
    }

    /// Protocol tag that marks a transport as in-process.
    #[must_use]
    pub fn local_protocol(&self) -> &str {
        self.local_protocol.as_str()
    }

    /// Prefix for worker thread names.
    #[must_use]
    pub fn worker_name_prefix(&self) -> &str {
        self.worker_name_prefix.as_str()
    }
}
