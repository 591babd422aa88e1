//! aqueduct: a minimal asynchronous PostgreSQL access engine.
//!
//! This crate implements the small core a reactive database application
//! actually depends on: a client-side wire protocol, a connection factory,
//! a bounded asynchronous connection pool, a statement executor with
//! positional parameter binding, a thin repository layer, and a
//! LISTEN/NOTIFY notification channel.
//!
//! ## Architecture
//!
//! ```text
//! +------------+     +----------+
//! | Repository | --> | Executor |
//! +------------+     +----------+
//!        |                |
//!        v                v
//!   +--------+     +------------+     +----------+
//!   |  Pool  | --> | Connection | <-- | Listener |
//!   +--------+     +------------+     +----------+
//!        |                |
//!        v                v
//!   +---------+     +----------+
//!   | Factory |     | Protocol |  <- framing + messages
//!   +---------+     +----------+
//! ```
//!
//! ## Terminology
//!
//! - **Connection**: one authenticated channel to the server, executing
//!   statements in issuance order and receiving pushed notifications
//! - **Lease**: temporary exclusive use of a pooled connection, returned
//!   to the pool on release
//! - **Listener**: a connection held in listening mode, yielding an
//!   order-preserving sequence of notification events

pub mod config;
pub mod connection;
pub mod executor;
pub mod listen;
pub mod pool;
pub mod protocol;
pub mod repository;
pub mod statement;

pub use config::{ConnectConfig, PoolConfig};
pub use connection::{Connection, ConnectionError, ConnectionFactory};
pub use executor::{ExecuteError, Outcome, Row, RowStream, execute};
pub use listen::{ListenError, Listener};
pub use pool::{Pool, PoolError, PooledConn};
pub use protocol::Notification;
pub use repository::{Entity, Repository, RepositoryError, TableMapping};
pub use statement::{Statement, Value};
