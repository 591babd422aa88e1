//! PostgreSQL wire protocol, client side.
//!
//! This module implements the subset of the PostgreSQL v3.0 wire protocol
//! needed to drive a server as a client: startup and cleartext-password
//! authentication, the Simple Query protocol, and asynchronous
//! NotificationResponse delivery for LISTEN/NOTIFY.
//!
//! ## Architecture
//!
//! ```text
//! +----------+                           +----------+
//! |  Client  |  --- FrontendMessage -->  |  Server  |
//! | (this)   |  <-- BackendMessage  ---  |          |
//! +----------+                           +----------+
//!               ^                   ^
//!               |    ClientCodec    |
//!               +-------------------+
//! ```
//!
//! Both directions are fully encodable and decodable: the client role
//! (`ClientCodec`) encodes frontend messages and decodes backend messages,
//! while the backend role (`StartupCodec` / `BackendCodec`) does the
//! reverse and is used by the integration test harness to script a server.
//!
//! ## Terminology
//!
//! - **FrontendMessage**: messages from client to server (Query, Password, ...)
//! - **StartupMessage**: the untyped first frame opening a session
//! - **BackendMessage**: messages from server to client (DataRow, ErrorResponse, ...)

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod types;

pub use backend::{
    AuthenticationRequest, BackendMessage, FieldDescription, Notification, ServerError,
    TransactionStatus,
};
pub use codec::{BackendCodec, ClientCodec, StartupCodec};
pub use error::ProtocolError;
pub use frontend::{FrontendMessage, StartupMessage, StartupParameters};
pub use types::{FormatCode, sql_state, type_oid};
