//! Bus configuration.
//!
//! `BusConfig` holds the default policies a `LocalBus` starts with. It is
//! usually loaded from a `courier.toml`; every field has a default so an
//! empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default policies and worker settings for one bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// How long a single send waits for its response.
    #[serde(default = "default_single_response_timeout_ms")]
    pub single_response_timeout_ms: u64,

    /// Length of a broadcast's collection window.
    #[serde(default = "default_broadcast_response_timeout_ms")]
    pub broadcast_response_timeout_ms: u64,

    /// Route sends to remote connections unless a send says otherwise.
    #[serde(default)]
    pub send_to_global: bool,

    /// Let sends time out instead of faulting when a connection breaks.
    #[serde(default)]
    pub ignore_broken_connections: bool,

    /// Forward send-side failures back to the caller.
    #[serde(default = "default_true")]
    pub forward_send_exceptions: bool,

    /// Forward receiver failures back to the caller.
    #[serde(default = "default_true")]
    pub forward_receive_exceptions: bool,

    /// Upper bound between two pipeline iterations when nothing is signaled.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Settings of the dedicated worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// How long `stop` waits for the worker loop to exit.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

fn default_single_response_timeout_ms() -> u64 {
    30_000
}

fn default_broadcast_response_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_worker_name() -> String {
    "courier-worker".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            single_response_timeout_ms: default_single_response_timeout_ms(),
            broadcast_response_timeout_ms: default_broadcast_response_timeout_ms(),
            send_to_global: false,
            ignore_broken_connections: false,
            forward_send_exceptions: true,
            forward_receive_exceptions: true,
            poll_interval_ms: default_poll_interval_ms(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stack_size: None,
        }
    }
}

impl BusConfig {
    pub fn single_response_timeout(&self) -> Duration {
        Duration::from_millis(self.single_response_timeout_ms)
    }

    pub fn broadcast_response_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_response_timeout_ms)
    }

    /// Never zero; `0` is read as one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl WorkerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
