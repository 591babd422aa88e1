//! Entity-to-table repository layer.
//!
//! Each entity type is bound to one table through an explicit
//! [`TableMapping`] descriptor: the table name plus the ordered column
//! list matching the order of [`Entity::values`]. No reflection; the
//! mapping is constructed once per entity type as a static.

use std::marker::PhantomData;

use thiserror::Error;
use tracing::debug;

use crate::executor::{self, ExecuteError};
use crate::pool::{Pool, PoolError};
use crate::protocol::ServerError;
use crate::statement::{Statement, Value};

/// Maps one entity type to one table: table name and ordered columns. The
/// first column is expected to be the primary key.
#[derive(Debug)]
pub struct TableMapping {
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

impl TableMapping {
    pub const fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self { table, columns }
    }

    fn insert_sql(&self) -> String {
        let mut sql = format!("INSERT INTO {} (", self.table);
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column);
        }
        sql.push_str(") VALUES (");
        for i in 1..=self.columns.len() {
            if i > 1 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&i.to_string());
        }
        sql.push(')');
        sql
    }

    fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table)
    }

    fn delete_all_sql(&self) -> String {
        format!("DELETE FROM {}", self.table)
    }
}

/// An entity persisted to a single table.
pub trait Entity: Sized {
    /// The table mapping for this entity type.
    fn mapping() -> &'static TableMapping;

    /// Field values in mapping column order.
    fn values(&self) -> Vec<Value>;
}

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The row violates a constraint; for `save`, the primary key already
    /// exists (plain insert, no upsert).
    #[error("constraint violation: {0}")]
    ConstraintViolation(ServerError),
    #[error(transparent)]
    Execute(ExecuteError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<ExecuteError> for RepositoryError {
    fn from(e: ExecuteError) -> Self {
        match e {
            ExecuteError::Server(error) if error.is_constraint_violation() => {
                RepositoryError::ConstraintViolation(error)
            }
            other => RepositoryError::Execute(other),
        }
    }
}

/// Save/count/delete-all over one mapped table, leasing connections from
/// the pool per operation.
pub struct Repository<E: Entity> {
    pool: Pool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    /// Inserts the entity as a new row and returns it unchanged.
    ///
    /// Plain insert semantics: an existing primary key fails with
    /// [`RepositoryError::ConstraintViolation`] and leaves the table
    /// untouched.
    pub async fn save(&self, entity: E) -> Result<E, RepositoryError> {
        let mapping = E::mapping();
        let statement = Statement::new(mapping.insert_sql()).bind_all(entity.values());

        let mut leased = self.pool.acquire().await?;
        let result = executor::execute_count(&mut leased, &statement).await;
        let released = self.pool.release(leased).await;
        result?; // an execution failure outranks a release failure
        released?;

        debug!(table = mapping.table, "saved entity");
        Ok(entity)
    }

    /// Number of rows in the mapped table.
    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let statement = Statement::new(E::mapping().count_sql());

        let mut leased = self.pool.acquire().await?;
        let result = executor::fetch_scalar_i64(&mut leased, &statement).await;
        let released = self.pool.release(leased).await;
        let count = result?;
        released?;
        Ok(count)
    }

    /// Deletes every row in the mapped table. Intended for test isolation;
    /// there is deliberately no guard rail here.
    pub async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let statement = Statement::new(E::mapping().delete_all_sql());

        let mut leased = self.pool.acquire().await?;
        let result = executor::execute_count(&mut leased, &statement).await;
        let released = self.pool.release(leased).await;
        let deleted = result?;
        released?;

        debug!(table = E::mapping().table, deleted, "deleted all rows");
        Ok(deleted)
    }
}
