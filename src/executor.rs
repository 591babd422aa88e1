//! Statement execution over a leased connection.
//!
//! [`execute`] drives one Simple Query exchange: the rendered statement
//! goes out, and the response is either a row stream (RowDescription
//! followed by DataRow frames) or a command completion tag carrying the
//! affected-row count. The row stream is lazy, finite and not restartable;
//! fully consuming it leaves the connection ready for the next statement,
//! while dropping it early leaves the connection to drain the remainder
//! before its next use.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::connection::{Connection, ConnectionError};
use crate::protocol::{BackendMessage, FieldDescription, ServerError};
use crate::statement::{ParameterMismatch, Statement};

/// Statement execution errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Binding arity mismatch, detected before any I/O.
    #[error(transparent)]
    ParameterMismatch(#[from] ParameterMismatch),
    /// The server rejected or failed the statement.
    #[error("execution failed: {0}")]
    Server(#[from] ServerError),
    /// Transport-level failure; the connection is tainted.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A result column could not be read as the requested type.
    #[error("column {index} cannot be read: {reason}")]
    Column { index: usize, reason: &'static str },
}

/// Result of executing one statement.
pub enum Outcome<'a> {
    /// The statement produced a result set.
    Rows(RowStream<'a>),
    /// The statement completed with an affected-row count.
    Affected(u64),
}

impl<'a> Outcome<'a> {
    /// The affected-row count, or an error if the statement returned rows.
    pub fn affected(self) -> Result<u64, ExecuteError> {
        match self {
            Outcome::Affected(count) => Ok(count),
            Outcome::Rows(_) => Err(ExecuteError::Column {
                index: 0,
                reason: "statement returned rows, not an affected-row count",
            }),
        }
    }

    /// The row stream, or an error if the statement returned a count.
    pub fn rows(self) -> Result<RowStream<'a>, ExecuteError> {
        match self {
            Outcome::Rows(stream) => Ok(stream),
            Outcome::Affected(_) => Err(ExecuteError::Column {
                index: 0,
                reason: "statement returned an affected-row count, not rows",
            }),
        }
    }
}

/// Executes a statement on the given connection.
///
/// Parameter arity is validated before anything is written to the wire.
/// A server error is surfaced after the exchange completes, so the
/// connection stays usable; a transport error taints the connection.
pub async fn execute<'a>(
    connection: &'a mut Connection,
    statement: &Statement,
) -> Result<Outcome<'a>, ExecuteError> {
    let sql = statement.render()?;
    connection.send_query(&sql).await?;

    let mut affected = 0u64;
    let mut server_error: Option<ServerError> = None;

    loop {
        match connection.recv_message().await? {
            BackendMessage::RowDescription { fields } => {
                return Ok(Outcome::Rows(RowStream {
                    connection,
                    columns: Arc::from(fields),
                    tag: None,
                    server_error: None,
                    finished: false,
                }));
            }
            BackendMessage::CommandComplete { tag } => {
                affected = parse_command_tag(&tag);
            }
            BackendMessage::EmptyQueryResponse => {}
            BackendMessage::ErrorResponse(error) => {
                // ReadyForQuery still follows; keep the error until then
                server_error = Some(error);
            }
            BackendMessage::ReadyForQuery { .. } => {
                connection.exchange_finished();
                return match server_error {
                    Some(error) => Err(ExecuteError::Server(error)),
                    None => Ok(Outcome::Affected(affected)),
                };
            }
            other => {
                connection.taint();
                return Err(ConnectionError::UnexpectedMessage(other.kind()).into());
            }
        }
    }
}

/// Executes a statement that must not return rows and yields the
/// affected-row count.
pub async fn execute_count(
    connection: &mut Connection,
    statement: &Statement,
) -> Result<u64, ExecuteError> {
    execute(connection, statement).await?.affected()
}

/// Extracts the affected-row count from a CommandComplete tag.
///
/// Tags look like "INSERT 0 1", "DELETE 3", "UPDATE 2", "SELECT 5"; tags
/// without a count ("LISTEN", "NOTIFY") yield 0.
fn parse_command_tag(tag: &str) -> u64 {
    tag.rsplit(' ')
        .next()
        .and_then(|last| last.parse::<u64>().ok())
        .unwrap_or(0)
}

/// A lazy, finite, non-restartable sequence of result rows.
pub struct RowStream<'a> {
    connection: &'a mut Connection,
    columns: Arc<[FieldDescription]>,
    tag: Option<String>,
    server_error: Option<ServerError>,
    finished: bool,
}

impl<'a> RowStream<'a> {
    /// Column metadata for this result set.
    pub fn columns(&self) -> &[FieldDescription] {
        &self.columns
    }

    /// The next row, or `Ok(None)` once the set is exhausted.
    ///
    /// Exhausting the stream consumes the trailing ReadyForQuery, leaving
    /// the connection ready for the next statement.
    pub async fn next(&mut self) -> Result<Option<Row>, ExecuteError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.connection.recv_message().await? {
                BackendMessage::DataRow { values } => {
                    return Ok(Some(Row {
                        columns: self.columns.clone(),
                        values,
                    }));
                }
                BackendMessage::CommandComplete { tag } => {
                    self.tag = Some(tag);
                }
                BackendMessage::ErrorResponse(error) => {
                    self.server_error = Some(error);
                }
                BackendMessage::ReadyForQuery { .. } => {
                    self.finished = true;
                    self.connection.exchange_finished();
                    return match self.server_error.take() {
                        Some(error) => Err(ExecuteError::Server(error)),
                        None => Ok(None),
                    };
                }
                other => {
                    self.connection.taint();
                    return Err(ConnectionError::UnexpectedMessage(other.kind()).into());
                }
            }
        }
    }

    /// Consumes the remainder of the stream and returns the collected rows.
    pub async fn collect(mut self) -> Result<Vec<Row>, ExecuteError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// The CommandComplete tag, available once the stream is exhausted.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl std::fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// One result row. Values arrive in text format under the Simple Query
/// protocol and are parsed on access.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[FieldDescription]>,
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The raw bytes of a column, `None` for SQL NULL.
    pub fn raw(&self, index: usize) -> Result<Option<&[u8]>, ExecuteError> {
        self.values
            .get(index)
            .map(|v| v.as_deref())
            .ok_or(ExecuteError::Column {
                index,
                reason: "no such column",
            })
    }

    /// A column as text, `None` for SQL NULL.
    pub fn text(&self, index: usize) -> Result<Option<&str>, ExecuteError> {
        match self.raw(index)? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|_| ExecuteError::Column {
                    index,
                    reason: "not valid UTF-8",
                }),
            None => Ok(None),
        }
    }

    /// A non-null column parsed as i64.
    pub fn int8(&self, index: usize) -> Result<i64, ExecuteError> {
        let text = self.text(index)?.ok_or(ExecuteError::Column {
            index,
            reason: "unexpected NULL",
        })?;
        text.parse().map_err(|_| ExecuteError::Column {
            index,
            reason: "not a valid integer",
        })
    }
}

/// Convenience: executes a statement expected to return a single scalar
/// i64 (e.g. `SELECT COUNT(*)`), consuming the result set fully.
pub async fn fetch_scalar_i64(
    connection: &mut Connection,
    statement: &Statement,
) -> Result<i64, ExecuteError> {
    let mut stream = execute(connection, statement).await?.rows()?;
    let Some(row) = stream.next().await? else {
        return Err(ExecuteError::Column {
            index: 0,
            reason: "query returned no rows",
        });
    };
    let value = row.int8(0)?;
    // Drain to ReadyForQuery so the connection is immediately reusable
    while stream.next().await?.is_some() {
        debug!("discarding extra scalar row");
    }
    Ok(value)
}
