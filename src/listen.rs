//! LISTEN/NOTIFY notification channel.
//!
//! A [`Listener`] owns a dedicated connection held in listening mode and
//! yields the notifications for one channel in server emission order. The
//! sequence is unbounded until the connection goes away: an explicit
//! [`Listener::unlisten`] ends it cleanly and returns the connection for
//! reuse, while an abnormal disconnect surfaces as a terminal
//! [`ListenError::ChannelClosed`] rather than silent termination.
//!
//! Delivery is at-least-once per server emission with no deduplication;
//! consumers that need idempotence must derive it from the payload.

use futures_util::Stream;
use thiserror::Error;
use tracing::debug;

use crate::connection::{Connection, ConnectionError};
use crate::executor::{self, ExecuteError};
use crate::protocol::Notification;
use crate::statement::Statement;

/// Notification channel errors.
#[derive(Debug, Error)]
pub enum ListenError {
    /// The connection ended while listening; the event sequence is over.
    #[error("notification channel closed: {0}")]
    ChannelClosed(ConnectionError),
    /// The LISTEN or UNLISTEN registration itself failed.
    #[error("channel registration failed: {0}")]
    Registration(#[from] ExecuteError),
}

/// A connection held in listening mode on one channel.
pub struct Listener {
    connection: Connection,
    channel: String,
    ended: bool,
}

impl Listener {
    /// Registers the connection on the channel and enters listening mode.
    pub async fn listen(mut connection: Connection, channel: &str) -> Result<Self, ListenError> {
        let statement = Statement::new(format!("LISTEN {}", quote_identifier(channel)));
        executor::execute_count(&mut connection, &statement).await?;
        debug!(channel, pid = connection.process_id(), "listening");
        Ok(Self {
            connection,
            channel: channel.to_string(),
            ended: false,
        })
    }

    /// The channel this listener is registered on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next notification on this channel.
    ///
    /// Events pushed for other channels registered on the same connection
    /// are not delivered through this handle. Returns
    /// `Err(ListenError::ChannelClosed)` once if the connection ends
    /// abnormally, then `Ok(None)`.
    pub async fn recv(&mut self) -> Result<Option<Notification>, ListenError> {
        if self.ended {
            return Ok(None);
        }
        loop {
            match self.connection.recv_notification().await {
                Ok(notification) if notification.channel == self.channel => {
                    return Ok(Some(notification));
                }
                Ok(other) => {
                    debug!(channel = %other.channel, "dropping notification for unhandled channel");
                }
                Err(e) => {
                    self.ended = true;
                    return Err(ListenError::ChannelClosed(e));
                }
            }
        }
    }

    /// Deregisters from the channel and ends the event sequence cleanly,
    /// returning the connection for reuse.
    pub async fn unlisten(mut self) -> Result<Connection, ListenError> {
        let statement = Statement::new(format!("UNLISTEN {}", quote_identifier(&self.channel)));
        executor::execute_count(&mut self.connection, &statement).await?;
        debug!(channel = %self.channel, "unlistened");
        Ok(self.connection)
    }

    /// Adapts the listener into a `futures` stream of notifications. The
    /// stream ends after the first terminal error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Notification, ListenError>> {
        futures_util::stream::unfold(Some(self), |listener| async move {
            let mut listener = listener?;
            match listener.recv().await {
                Ok(Some(notification)) => Some((Ok(notification), Some(listener))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Quotes a channel name as a SQL identifier.
fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}
