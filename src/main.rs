use std::time::Duration;

use tracing::info;

use aqueduct::{
    ConnectConfig, ConnectionFactory, Entity, Listener, Pool, PoolConfig, Repository, Statement,
    TableMapping, Value, executor,
};

/// The demo entity: a customer row with an externally assigned key.
#[derive(Debug, Clone)]
struct Customer {
    id: i64,
    first_name: String,
}

static CUSTOMER: TableMapping = TableMapping::new("customer", &["id", "first_name"]);

impl Entity for Customer {
    fn mapping() -> &'static TableMapping {
        &CUSTOMER
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.id),
            Value::Text(self.first_name.clone()),
        ]
    }
}

/// Walks through the three access styles (repository, executor, raw
/// connection) and a LISTEN/NOTIFY round trip against the server named by
/// `AQUEDUCT_URL` or the `PG*` environment variables.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ConnectConfig::from_env()?;
    let factory = ConnectionFactory::new(config);
    let pool = Pool::new(
        factory.clone(),
        PoolConfig::new(5).acquire_timeout(Duration::from_secs(5)),
    );

    // The demo table; externally assigned primary key, no upsert
    {
        let mut conn = pool.acquire().await?;
        let ddl =
            Statement::new("CREATE TABLE IF NOT EXISTS customer (id BIGINT PRIMARY KEY, first_name TEXT)");
        executor::execute_count(&mut conn, &ddl).await?;
        pool.release(conn).await?;
    }

    let repository: Repository<Customer> = Repository::new(pool.clone());
    repository.delete_all().await?;

    // Style 1: repository
    let saved = repository
        .save(Customer {
            id: 1,
            first_name: "John".to_string(),
        })
        .await?;
    info!(id = saved.id, "saved via repository");

    // Style 2: statement executor on a pooled connection
    let mut conn = pool.acquire().await?;
    let insert = Statement::new("INSERT INTO customer (id, first_name) VALUES ($1, $2)")
        .bind(2i64)
        .bind("John");
    let inserted = executor::execute_count(&mut conn, &insert).await?;
    pool.release(conn).await?;
    info!(inserted, "inserted via executor");

    // Style 3: raw connection straight from the factory
    let mut raw = factory.connect().await?;
    let insert = Statement::new("insert into customer (id, first_name) values (3, 'John')");
    executor::execute_count(&mut raw, &insert).await?;
    raw.close().await?;
    info!("inserted via raw connection");

    info!(count = repository.count().await?, "rows in customer");

    // Listen on a dedicated connection, notify through the pool
    let mut listener = Listener::listen(factory.connect().await?, "message").await?;

    let mut conn = pool.acquire().await?;
    executor::execute_count(&mut conn, &Statement::new("NOTIFY message, 'hello world'")).await?;
    pool.release(conn).await?;

    let notification =
        tokio::time::timeout(Duration::from_secs(2), listener.recv()).await??;
    if let Some(notification) = notification {
        info!(
            channel = %notification.channel,
            payload = %notification.payload,
            "received notification"
        );
    }

    let conn = listener.unlisten().await?;
    conn.close().await?;

    pool.drain().await;
    Ok(())
}
