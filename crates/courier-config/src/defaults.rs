/// Default log filter expression used by the dispatcher.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of worker threads in the shared invocation pool.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Protocol tag reported by in-process transports.
pub const DEFAULT_LOCAL_PROTOCOL: &str = "local";

/// Prefix applied to worker thread names.
pub const DEFAULT_WORKER_NAME_PREFIX: &str = "courier-worker";

/// Default log filter expression used by the dispatcher.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default size of the worker pool.
pub fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

/// Default protocol tag treated as in-process.
pub fn default_local_protocol() -> &'static str {
    DEFAULT_LOCAL_PROTOCOL
}

/// Owned local protocol tag for serde defaults.
pub fn default_local_protocol_string() -> String {
    DEFAULT_LOCAL_PROTOCOL.to_owned()
}

/// Owned worker name prefix for serde defaults.
pub fn default_worker_name_prefix_string() -> String {
    DEFAULT_WORKER_NAME_PREFIX.to_owned()
}
