//! Client configuration: connection target and the defaults every new
//! query/result-set object inherits unless overridden per call.
//!
//! Grounded on the `edb-tui` pack member's `Config` builder pattern: plain
//! data plus a `with_*` builder, no file I/O or environment parsing inside
//! the library itself — that belongs to whatever binary embeds it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Restriction;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

/// Connection target and default tuning knobs for a [`crate::Client`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) connect_timeout: Duration,
    pub(crate) default_restriction: Restriction,
    pub(crate) read_buffer_initial_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            default_restriction: Restriction::default(),
            read_buffer_initial_capacity: DEFAULT_READ_BUFFER_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Starts a config targeting `host:port`, with every other field at its
    /// default (no row limit, no time limit, 10s connect timeout).
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig { host: host.into(), port, ..ClientConfig::default() }
    }

    /// Overrides the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the default row-count limit sent with `execute-query`/
    /// `create-resultset`/`next-resultset-batch` for objects that don't
    /// specify their own.
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_restriction.limit = Some(limit);
        self
    }

    /// Overrides the default server-side time limit (milliseconds) applied
    /// to operations that don't specify their own.
    pub fn with_default_timelimit(mut self, timelimit_ms: u64) -> Self {
        self.default_restriction.timelimit = Some(timelimit_ms);
        self
    }

    /// Overrides the initial capacity of the transport's read buffer.
    pub fn with_read_buffer_initial_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_initial_capacity = capacity;
        self
    }
}
