use tracing::debug;

use crate::config::ConnectConfig;
use crate::connection::{Connection, ConnectionError};

/// Opens connections from a fixed configuration. No pooling; every call
/// dials the server. Every failure is surfaced to the caller.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    config: ConnectConfig,
}

impl ConnectionFactory {
    pub fn new(config: ConnectConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Opens and authenticates a new connection.
    pub async fn connect(&self) -> Result<Connection, ConnectionError> {
        debug!(address = %self.config.address(), user = %self.config.user, "opening connection");
        Connection::open(&self.config).await
    }
}
