//! Shared Postgres test infrastructure.
//!
//! A single container is started on first use and reused across tests in
//! the same binary; each test gets its own connection pool.

use anyhow::{Context, Result};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedPostgres {
    db_url: String,
    _container: ContainerAsync<Postgres>,
}

static SHARED: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _container: container,
        })
    }

    async fn get() -> &'static Self {
        SHARED
            .get_or_init(|| async { Self::init().await.expect("postgres container failed") })
            .await
    }
}

/// Fresh connection pool against the shared, migrated test database.
pub async fn test_pool() -> PgPool {
    let infra = SharedPostgres::get().await;
    PgPool::connect(&infra.db_url)
        .await
        .expect("failed to connect to test database")
}
