//! A single authenticated channel to the server.
//!
//! A [`Connection`] executes statements in issuance order over one TCP
//! stream framed with the client codec. Asynchronous messages the server
//! may push at any time (notifications, parameter changes, notices) are
//! absorbed here so that higher layers only ever see the messages of the
//! exchange they are driving.
//!
//! A connection that sees a transport-level failure is **tainted**: it is
//! never reused by the pool and should be discarded. A connection whose
//! statement exchange was abandoned mid-stream (for example a dropped row
//! stream) drains to the next ReadyForQuery before starting new work.

mod error;
mod factory;

pub use error::ConnectionError;
pub use factory::ConnectionFactory;

use std::collections::{HashMap, VecDeque};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::config::ConnectConfig;
use crate::protocol::{
    AuthenticationRequest, BackendMessage, ClientCodec, FrontendMessage, Notification,
    StartupMessage,
};

/// One authenticated session with the server.
pub struct Connection {
    framed: Framed<TcpStream, ClientCodec>,
    process_id: i32,
    secret_key: i32,
    parameters: HashMap<String, String>,
    notifications: VecDeque<Notification>,
    mid_exchange: bool,
    tainted: bool,
    closed: bool,
}

impl Connection {
    /// Opens a connection and runs the startup handshake: TCP connect,
    /// startup frame, authentication (trust or cleartext password), then
    /// session parameters up to the first ReadyForQuery.
    pub(crate) async fn open(config: &ConnectConfig) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(config.address()).await?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, ClientCodec::new());
        framed
            .send(StartupMessage::new(config.startup_parameters()))
            .await?;

        let mut connection = Self {
            framed,
            process_id: 0,
            secret_key: 0,
            parameters: HashMap::new(),
            notifications: VecDeque::new(),
            mid_exchange: false,
            tainted: false,
            closed: false,
        };
        connection.authenticate(config).await?;
        Ok(connection)
    }

    async fn authenticate(&mut self, config: &ConnectConfig) -> Result<(), ConnectionError> {
        loop {
            match self.recv_raw().await? {
                BackendMessage::Authentication(AuthenticationRequest::Ok) => {}
                BackendMessage::Authentication(AuthenticationRequest::CleartextPassword) => {
                    let Some(password) = config.password.as_deref() else {
                        return Err(ConnectionError::PasswordRequired);
                    };
                    self.framed
                        .send(FrontendMessage::Password(password.to_string()))
                        .await?;
                }
                BackendMessage::Authentication(AuthenticationRequest::Unsupported(code)) => {
                    return Err(ConnectionError::UnsupportedAuthentication(code));
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    debug!(%notice, "server notice during startup");
                }
                BackendMessage::ErrorResponse(error) => {
                    return Err(ConnectionError::Startup(error));
                }
                BackendMessage::ReadyForQuery { .. } => {
                    debug!(pid = self.process_id, "connection ready");
                    return Ok(());
                }
                other => return Err(self.unexpected(other)),
            }
        }
    }

    /// Server-assigned process id of this session.
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Secret key paired with the process id, identifying this session to
    /// the server.
    pub fn secret_key(&self) -> i32 {
        self.secret_key
    }

    /// A server parameter reported at startup (e.g. `server_version`).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Whether this connection saw a transport failure and must not be
    /// reused.
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    /// Whether the connection has been closed (by either side).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn taint(&mut self) {
        self.tainted = true;
    }

    /// Issues a simple-query frame. The caller must consume the response
    /// messages up to ReadyForQuery (see [`Connection::recv_message`]).
    pub(crate) async fn send_query(&mut self, sql: &str) -> Result<(), ConnectionError> {
        self.ensure_ready().await?;
        debug!(pid = self.process_id, sql, "query");
        self.mid_exchange = true;
        if let Err(e) = self.framed.send(FrontendMessage::Query(sql.to_string())).await {
            self.tainted = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Marks the current exchange as finished (ReadyForQuery consumed).
    pub(crate) fn exchange_finished(&mut self) {
        self.mid_exchange = false;
    }

    /// Drains an abandoned exchange to its ReadyForQuery so a new statement
    /// can start. Fails (and taints) if the transport fails first.
    pub(crate) async fn ensure_ready(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        while self.mid_exchange {
            if let BackendMessage::ReadyForQuery { .. } = self.recv_message().await? {
                self.mid_exchange = false;
            }
        }
        Ok(())
    }

    /// Receives the next exchange-relevant message, absorbing asynchronous
    /// messages: notifications are buffered in arrival order, parameter
    /// changes recorded, notices logged.
    pub(crate) async fn recv_message(&mut self) -> Result<BackendMessage, ConnectionError> {
        loop {
            match self.recv_raw().await? {
                BackendMessage::NotificationResponse(notification) => {
                    self.notifications.push_back(notification);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    debug!(%notice, "server notice");
                }
                message => return Ok(message),
            }
        }
    }

    /// Waits for the next pushed notification. Any other message here means
    /// the wire state diverged from what a listening connection expects.
    pub(crate) async fn recv_notification(&mut self) -> Result<Notification, ConnectionError> {
        if let Some(notification) = self.notifications.pop_front() {
            return Ok(notification);
        }
        loop {
            match self.recv_raw().await? {
                BackendMessage::NotificationResponse(notification) => return Ok(notification),
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    debug!(%notice, "server notice");
                }
                other => return Err(self.unexpected(other)),
            }
        }
    }

    async fn recv_raw(&mut self) -> Result<BackendMessage, ConnectionError> {
        match self.framed.next().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => {
                self.tainted = true;
                Err(e.into())
            }
            None => {
                // EOF - server went away
                self.closed = true;
                self.tainted = true;
                Err(ConnectionError::Closed)
            }
        }
    }

    fn unexpected(&mut self, message: BackendMessage) -> ConnectionError {
        self.tainted = true;
        ConnectionError::UnexpectedMessage(message.kind())
    }

    /// Closes the connection, sending Terminate as a courtesy. The socket
    /// is dropped regardless of whether the frame could be written.
    pub async fn close(mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(pid = self.process_id, "closing connection");
        self.framed.send(FrontendMessage::Terminate).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("process_id", &self.process_id)
            .field("tainted", &self.tainted)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
