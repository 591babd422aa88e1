//! Test utilities for the aqueduct integration tests.
//!
//! `MockPg` is an in-process scripted PostgreSQL backend speaking the same
//! wire subset the crate's client speaks: startup with optional cleartext
//! password, the Simple Query protocol over a tiny in-memory `customer`
//! table, and LISTEN/UNLISTEN/NOTIFY fan-out across connections. A kill
//! switch severs every open connection without a Terminate exchange, which
//! is how the disconnect tests provoke abnormal stream termination.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use aqueduct::protocol::{
    AuthenticationRequest, BackendCodec, BackendMessage, FieldDescription, FrontendMessage,
    Notification, ProtocolError, ServerError, StartupCodec, TransactionStatus, sql_state,
    type_oid,
};
use aqueduct::{ConnectConfig, ConnectionFactory};

/// Backend state shared by all connections: the `customer` table and the
/// listener registry.
#[derive(Default)]
struct Shared {
    rows: Mutex<BTreeMap<i64, Option<String>>>,
    listeners: Mutex<Vec<ListenerEntry>>,
}

struct ListenerEntry {
    conn: i32,
    channel: String,
    tx: mpsc::UnboundedSender<Notification>,
}

/// An in-process scripted PostgreSQL backend on an ephemeral port.
///
/// The accept loop is aborted when dropped; open connections end when the
/// kill watch closes with it.
pub struct MockPg {
    port: u16,
    password: Option<String>,
    shared: Arc<Shared>,
    kill_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MockPg {
    /// Starts a backend that accepts any user without a password.
    pub async fn start() -> Self {
        Self::start_inner(None).await
    }

    /// Starts a backend that demands the given cleartext password.
    pub async fn start_with_password(password: &str) -> Self {
        Self::start_inner(Some(password.to_string())).await
    }

    async fn start_inner(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared::default());
        let (kill_tx, kill_rx) = watch::channel(false);

        let accept_shared = Arc::clone(&shared);
        let accept_password = password.clone();
        let handle = tokio::spawn(async move {
            let mut next_pid = 4000;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                next_pid += 1;
                let shared = Arc::clone(&accept_shared);
                let password = accept_password.clone();
                let kill_rx = kill_rx.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, shared, next_pid, password, kill_rx).await;
                });
            }
        });

        Self {
            port,
            password,
            shared,
            kill_tx,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection configuration matching this backend.
    pub fn config(&self) -> ConnectConfig {
        let config = ConnectConfig::new("127.0.0.1", "postgres")
            .port(self.port)
            .database("testdb")
            .application_name("aqueduct-tests");
        match &self.password {
            Some(password) => config.password(password.clone()),
            None => config,
        }
    }

    pub fn factory(&self) -> ConnectionFactory {
        ConnectionFactory::new(self.config())
    }

    /// Rows currently in the `customer` table, counted backend-side.
    pub fn row_count(&self) -> usize {
        self.shared.rows.lock().len()
    }

    /// Severs every open connection without a Terminate exchange.
    pub fn kill(&self) {
        let _ = self.kill_tx.send(true);
    }
}

impl Drop for MockPg {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct ConnCtx {
    pid: i32,
    shared: Arc<Shared>,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

async fn serve_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    pid: i32,
    password: Option<String>,
    mut kill_rx: watch::Receiver<bool>,
) -> Result<(), ProtocolError> {
    let mut startup_framed = Framed::new(stream, StartupCodec::new());
    let Some(Ok(_startup)) = startup_framed.next().await else {
        return Ok(());
    };
    let mut framed = startup_framed.map_codec(StartupCodec::ready);

    if let Some(expected) = password {
        framed
            .send(BackendMessage::Authentication(
                AuthenticationRequest::CleartextPassword,
            ))
            .await?;
        match framed.next().await {
            Some(Ok(FrontendMessage::Password(given))) if given == expected => {}
            _ => {
                framed
                    .send(BackendMessage::ErrorResponse(ServerError::new(
                        sql_state::INVALID_PASSWORD,
                        "password authentication failed",
                    )))
                    .await?;
                return Ok(());
            }
        }
    }

    framed
        .send(BackendMessage::Authentication(AuthenticationRequest::Ok))
        .await?;
    framed
        .send(BackendMessage::ParameterStatus {
            name: "server_version".to_string(),
            value: "16.0".to_string(),
        })
        .await?;
    framed
        .send(BackendMessage::BackendKeyData {
            process_id: pid,
            secret_key: pid.wrapping_mul(7919),
        })
        .await?;
    framed
        .send(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        })
        .await?;

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let ctx = ConnCtx {
        pid,
        shared: Arc::clone(&shared),
        notify_tx,
    };

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(FrontendMessage::Query(sql))) => {
                    handle_query(&mut framed, &ctx, &sql).await?;
                }
                _ => break,
            },
            notification = notify_rx.recv() => {
                if let Some(notification) = notification {
                    framed
                        .send(BackendMessage::NotificationResponse(notification))
                        .await?;
                }
            }
            _ = kill_rx.changed() => break,
        }
    }

    shared.listeners.lock().retain(|entry| entry.conn != pid);
    Ok(())
}

async fn handle_query(
    framed: &mut Framed<TcpStream, BackendCodec>,
    ctx: &ConnCtx,
    sql: &str,
) -> Result<(), ProtocolError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        framed.send(BackendMessage::EmptyQueryResponse).await?;
    } else if let Some(rest) = strip_prefix_ci(trimmed, "insert into customer") {
        match parse_insert(rest) {
            Some((id, name)) => {
                let inserted = {
                    let mut rows = ctx.shared.rows.lock();
                    if rows.contains_key(&id) {
                        false
                    } else {
                        rows.insert(id, name);
                        true
                    }
                };
                if inserted {
                    framed
                        .send(BackendMessage::CommandComplete {
                            tag: "INSERT 0 1".to_string(),
                        })
                        .await?;
                } else {
                    let mut error = ServerError::new(
                        sql_state::UNIQUE_VIOLATION,
                        "duplicate key value violates unique constraint \"customer_pkey\"",
                    );
                    error.detail = Some(format!("Key (id)=({id}) already exists."));
                    error.constraint = Some("customer_pkey".to_string());
                    framed.send(BackendMessage::ErrorResponse(error)).await?;
                }
            }
            None => send_syntax_error(framed, trimmed).await?,
        }
    } else if trimmed.eq_ignore_ascii_case("select count(*) from customer") {
        let count = ctx.shared.rows.lock().len();
        framed
            .send(BackendMessage::RowDescription {
                fields: vec![FieldDescription::text("count", type_oid::INT8)],
            })
            .await?;
        framed
            .send(BackendMessage::DataRow {
                values: vec![Some(count.to_string().into_bytes())],
            })
            .await?;
        framed
            .send(BackendMessage::CommandComplete {
                tag: "SELECT 1".to_string(),
            })
            .await?;
    } else if trimmed.eq_ignore_ascii_case("select id, first_name from customer") {
        let rows: Vec<(i64, Option<String>)> = ctx
            .shared
            .rows
            .lock()
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();
        framed
            .send(BackendMessage::RowDescription {
                fields: vec![
                    FieldDescription::text("id", type_oid::INT8),
                    FieldDescription::text("first_name", type_oid::TEXT),
                ],
            })
            .await?;
        let count = rows.len();
        for (id, name) in rows {
            framed
                .send(BackendMessage::DataRow {
                    values: vec![Some(id.to_string().into_bytes()), name.map(String::into_bytes)],
                })
                .await?;
        }
        framed
            .send(BackendMessage::CommandComplete {
                tag: format!("SELECT {count}"),
            })
            .await?;
    } else if trimmed.eq_ignore_ascii_case("delete from customer") {
        let deleted = {
            let mut rows = ctx.shared.rows.lock();
            let deleted = rows.len();
            rows.clear();
            deleted
        };
        framed
            .send(BackendMessage::CommandComplete {
                tag: format!("DELETE {deleted}"),
            })
            .await?;
    } else if let Some(rest) = strip_prefix_ci(trimmed, "listen ") {
        let channel = unquote_identifier(rest.trim());
        {
            let mut listeners = ctx.shared.listeners.lock();
            // Re-registering the same channel on the same connection is a
            // no-op, matching the server's LISTEN semantics
            let registered = listeners
                .iter()
                .any(|entry| entry.conn == ctx.pid && entry.channel == channel);
            if !registered {
                listeners.push(ListenerEntry {
                    conn: ctx.pid,
                    channel,
                    tx: ctx.notify_tx.clone(),
                });
            }
        }
        framed
            .send(BackendMessage::CommandComplete {
                tag: "LISTEN".to_string(),
            })
            .await?;
    } else if let Some(rest) = strip_prefix_ci(trimmed, "unlisten ") {
        let channel = unquote_identifier(rest.trim());
        ctx.shared
            .listeners
            .lock()
            .retain(|entry| !(entry.conn == ctx.pid && entry.channel == channel));
        framed
            .send(BackendMessage::CommandComplete {
                tag: "UNLISTEN".to_string(),
            })
            .await?;
    } else if let Some(rest) = strip_prefix_ci(trimmed, "notify ") {
        match parse_notify(rest) {
            Some((channel, payload)) => {
                {
                    let listeners = ctx.shared.listeners.lock();
                    for entry in listeners.iter().filter(|entry| entry.channel == channel) {
                        let _ = entry.tx.send(Notification {
                            process_id: ctx.pid,
                            channel: channel.clone(),
                            payload: payload.clone(),
                        });
                    }
                }
                framed
                    .send(BackendMessage::CommandComplete {
                        tag: "NOTIFY".to_string(),
                    })
                    .await?;
            }
            None => send_syntax_error(framed, trimmed).await?,
        }
    } else if strip_prefix_ci(trimmed, "create table").is_some() {
        framed
            .send(BackendMessage::CommandComplete {
                tag: "CREATE TABLE".to_string(),
            })
            .await?;
    } else {
        send_syntax_error(framed, trimmed).await?;
    }

    framed
        .send(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        })
        .await
}

async fn send_syntax_error(
    framed: &mut Framed<TcpStream, BackendCodec>,
    sql: &str,
) -> Result<(), ProtocolError> {
    framed
        .send(BackendMessage::ErrorResponse(ServerError::new(
            sql_state::SYNTAX_ERROR,
            format!("cannot interpret statement: {sql}"),
        )))
        .await
}

fn strip_prefix_ci<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    if sql.len() < prefix.len() || !sql.is_char_boundary(prefix.len()) {
        return None;
    }
    if sql[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&sql[prefix.len()..])
    } else {
        None
    }
}

fn unquote_identifier(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .map(|inner| inner.replace("\"\"", "\""))
        .unwrap_or_else(|| s.to_string())
}

/// Parses a single-quoted SQL literal (or NULL) into its text value.
fn parse_text_literal(s: &str) -> Option<Option<String>> {
    if s.eq_ignore_ascii_case("null") {
        return Some(None);
    }
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(Some(inner.replace("''", "'")))
}

/// Parses the tail of `INSERT INTO customer ... VALUES (<id>, <name>)`.
fn parse_insert(rest: &str) -> Option<(i64, Option<String>)> {
    let lower = rest.to_ascii_lowercase();
    let at = lower.find("values")?;
    let tail = rest[at + "values".len()..].trim();
    let inner = tail.strip_prefix('(')?.strip_suffix(')')?;
    let (id, name) = inner.split_once(',')?;
    Some((id.trim().parse().ok()?, parse_text_literal(name.trim())?))
}

/// Parses `NOTIFY <channel>[, '<payload>']`.
fn parse_notify(rest: &str) -> Option<(String, String)> {
    match rest.split_once(',') {
        Some((channel, payload)) => {
            let payload = parse_text_literal(payload.trim())??;
            Some((unquote_identifier(channel.trim()), payload))
        }
        None => Some((unquote_identifier(rest.trim()), String::new())),
    }
}
