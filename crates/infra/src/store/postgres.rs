//! Postgres-backed store implementation.
//!
//! The `Store` trait is synchronous; this adapter owns a Tokio runtime and drives
//! the async SQLx driver with `block_on`. Do not call it from inside another
//! Tokio runtime.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (check constraint violation) | `23514` | `CheckViolation` |
//! | Database (not-null violation) | `23502` | `NotNullViolation` |
//! | Database (other) | Any other | `Other` |
//! | Io / Tls / PoolClosed / PoolTimedOut | N/A | `Unavailable` |
//! | Other | N/A | `Other` |

use sqlx::postgres::{PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::{debug, instrument};

use capplan_core::{DiskId, QueryId, RamId};
use capplan_inventory::{Disk, DiskQuery, DiskRam, Query, QuerySnapshot, Ram};

use super::r#trait::{Statement, Store, StoreError, StoreTx};

/// Schema DDL: five relations with their keys, cascading foreign keys and the
/// same check constraints `capplan_inventory::schema` enforces.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query (
    query_id BIGINT PRIMARY KEY CHECK (query_id > 0),
    purpose  TEXT   NOT NULL,
    size     BIGINT NOT NULL CHECK (size >= 0)
);

CREATE TABLE IF NOT EXISTS disk (
    disk_id    BIGINT PRIMARY KEY CHECK (disk_id > 0),
    company    TEXT   NOT NULL,
    speed      BIGINT NOT NULL CHECK (speed > 0),
    free_space BIGINT NOT NULL CHECK (free_space >= 0),
    cost       BIGINT NOT NULL CHECK (cost > 0)
);

CREATE TABLE IF NOT EXISTS ram (
    ram_id  BIGINT PRIMARY KEY CHECK (ram_id > 0),
    company TEXT   NOT NULL,
    size    BIGINT NOT NULL CHECK (size > 0)
);

CREATE TABLE IF NOT EXISTS disk_ram (
    disk_id BIGINT NOT NULL REFERENCES disk (disk_id) ON DELETE CASCADE,
    ram_id  BIGINT NOT NULL REFERENCES ram (ram_id) ON DELETE CASCADE,
    PRIMARY KEY (disk_id, ram_id)
);

CREATE TABLE IF NOT EXISTS disk_query (
    disk_id       BIGINT NOT NULL REFERENCES disk (disk_id) ON DELETE CASCADE,
    query_id      BIGINT NOT NULL REFERENCES query (query_id) ON DELETE CASCADE,
    query_purpose TEXT   NOT NULL,
    query_size    BIGINT NOT NULL,
    PRIMARY KEY (disk_id, query_id)
);
"#;

/// Postgres-backed inventory store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe. Each `begin` checks out one
/// pooled connection for the lifetime of the transaction.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    runtime: Runtime,
}

impl PostgresStore {
    /// Connect a new pool to `database_url`.
    #[instrument(skip(database_url), err)]
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = build_runtime()?;
        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        debug!("postgres store connected");
        Ok(Self { pool, runtime })
    }

    /// Wrap an existing pool. The pool must not be bound to another runtime's
    /// lifetime that ends before this store is dropped.
    pub fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        Ok(Self {
            pool,
            runtime: build_runtime()?,
        })
    }
}

fn build_runtime() -> Result<Runtime, StoreError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .map_err(|e| StoreError::Unavailable(format!("failed to start runtime: {e}")))
}

impl Store for PostgresStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let tx = self
            .runtime
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        Ok(Box::new(PostgresTx {
            tx,
            runtime: &self.runtime,
        }))
    }

    /// `REPEATABLE READ` takes one snapshot at the first read, so every read of
    /// the transaction agrees with the others.
    fn begin_read(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let mut tx = self
            .runtime
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_read_transaction", e))?;
        self.runtime
            .block_on(
                sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                    .execute(&mut *tx),
            )
            .map_err(|e| map_sqlx_error("begin_read_transaction", e))?;

        Ok(Box::new(PostgresTx {
            tx,
            runtime: &self.runtime,
        }))
    }
}

struct PostgresTx<'a> {
    tx: Transaction<'static, Postgres>,
    runtime: &'a Runtime,
}

impl PostgresTx<'_> {
    fn fetch_optional<T>(
        &mut self,
        operation: &str,
        sql: &'static str,
        id: i64,
        decode: fn(&PgRow) -> Result<T, sqlx::Error>,
    ) -> Result<Option<T>, StoreError> {
        let row = self
            .runtime
            .block_on(sqlx::query(sql).bind(id).fetch_optional(&mut *self.tx))
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.as_ref()
            .map(decode)
            .transpose()
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn fetch_all<T>(
        &mut self,
        operation: &str,
        sql: &'static str,
        decode: fn(&PgRow) -> Result<T, sqlx::Error>,
    ) -> Result<Vec<T>, StoreError> {
        let rows = self
            .runtime
            .block_on(sqlx::query(sql).fetch_all(&mut *self.tx))
            .map_err(|e| map_sqlx_error(operation, e))?;
        decode_rows(operation, &rows, decode)
    }

    fn fetch_all_by<T>(
        &mut self,
        operation: &str,
        sql: &'static str,
        key: i64,
        decode: fn(&PgRow) -> Result<T, sqlx::Error>,
    ) -> Result<Vec<T>, StoreError> {
        let rows = self
            .runtime
            .block_on(sqlx::query(sql).bind(key).fetch_all(&mut *self.tx))
            .map_err(|e| map_sqlx_error(operation, e))?;
        decode_rows(operation, &rows, decode)
    }
}

fn decode_rows<T>(
    operation: &str,
    rows: &[PgRow],
    decode: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error(operation, e))
}

impl StoreTx for PostgresTx<'_> {
    fn execute(&mut self, statement: Statement) -> Result<u64, StoreError> {
        let operation = statement_name(&statement);
        let result = self
            .runtime
            .block_on(run_statement(&mut self.tx, statement))
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(result.rows_affected())
    }

    fn query(&mut self, query_id: QueryId) -> Result<Option<Query>, StoreError> {
        self.fetch_optional(
            "get_query",
            "SELECT query_id, purpose, size FROM query WHERE query_id = $1",
            query_id.get(),
            decode_query,
        )
    }

    fn disk(&mut self, disk_id: DiskId) -> Result<Option<Disk>, StoreError> {
        self.fetch_optional(
            "get_disk",
            "SELECT disk_id, company, speed, free_space, cost FROM disk WHERE disk_id = $1",
            disk_id.get(),
            decode_disk,
        )
    }

    fn ram(&mut self, ram_id: RamId) -> Result<Option<Ram>, StoreError> {
        self.fetch_optional(
            "get_ram",
            "SELECT ram_id, company, size FROM ram WHERE ram_id = $1",
            ram_id.get(),
            decode_ram,
        )
    }

    fn queries(&mut self) -> Result<Vec<Query>, StoreError> {
        self.fetch_all(
            "list_queries",
            "SELECT query_id, purpose, size FROM query ORDER BY query_id ASC",
            decode_query,
        )
    }

    fn disks(&mut self) -> Result<Vec<Disk>, StoreError> {
        self.fetch_all(
            "list_disks",
            "SELECT disk_id, company, speed, free_space, cost FROM disk ORDER BY disk_id ASC",
            decode_disk,
        )
    }

    fn rams(&mut self) -> Result<Vec<Ram>, StoreError> {
        self.fetch_all(
            "list_rams",
            "SELECT ram_id, company, size FROM ram ORDER BY ram_id ASC",
            decode_ram,
        )
    }

    fn disk_rams(&mut self) -> Result<Vec<DiskRam>, StoreError> {
        self.fetch_all(
            "list_disk_rams",
            "SELECT disk_id, ram_id FROM disk_ram ORDER BY disk_id ASC, ram_id ASC",
            decode_disk_ram,
        )
    }

    fn disk_queries(&mut self) -> Result<Vec<DiskQuery>, StoreError> {
        self.fetch_all(
            "list_disk_queries",
            r#"
            SELECT disk_id, query_id, query_purpose, query_size
            FROM disk_query
            ORDER BY disk_id ASC, query_id ASC
            "#,
            decode_disk_query,
        )
    }

    fn queries_within(&mut self, max_size: i64) -> Result<Vec<Query>, StoreError> {
        self.fetch_all_by(
            "list_queries_within",
            "SELECT query_id, purpose, size FROM query WHERE size <= $1 ORDER BY query_id ASC",
            max_size,
            decode_query,
        )
    }

    fn rams_on(&mut self, disk_id: DiskId) -> Result<Vec<Ram>, StoreError> {
        self.fetch_all_by(
            "list_rams_on_disk",
            r#"
            SELECT ram.ram_id, ram.company, ram.size
            FROM ram
            JOIN disk_ram ON disk_ram.ram_id = ram.ram_id
            WHERE disk_ram.disk_id = $1
            ORDER BY ram.ram_id ASC
            "#,
            disk_id.get(),
            decode_ram,
        )
    }

    fn disk_queries_on(&mut self, disk_id: DiskId) -> Result<Vec<DiskQuery>, StoreError> {
        self.fetch_all_by(
            "list_disk_queries_on_disk",
            r#"
            SELECT disk_id, query_id, query_purpose, query_size
            FROM disk_query
            WHERE disk_id = $1
            ORDER BY query_id ASC
            "#,
            disk_id.get(),
            decode_disk_query,
        )
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { tx, runtime } = *self;
        runtime
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { tx, runtime } = *self;
        runtime
            .block_on(tx.rollback())
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn statement_name(statement: &Statement) -> &'static str {
    match statement {
        Statement::InsertQuery(_) => "insert_query",
        Statement::InsertDisk(_) => "insert_disk",
        Statement::InsertRam(_) => "insert_ram",
        Statement::InsertDiskRam(_) => "insert_disk_ram",
        Statement::InsertDiskQuery(_) => "insert_disk_query",
        Statement::DeleteQuery(_) => "delete_query",
        Statement::DeleteDisk(_) => "delete_disk",
        Statement::DeleteRam(_) => "delete_ram",
        Statement::DeleteDiskRam(_) => "delete_disk_ram",
        Statement::DeleteDiskQuery { .. } => "delete_disk_query",
        Statement::AdjustFreeSpace { .. } => "adjust_free_space",
        Statement::AdjustFreeSpaceOfHosts { .. } => "adjust_free_space_of_hosts",
        Statement::AdjustFreeSpaceIfHosting { .. } => "adjust_free_space_if_hosting",
    }
}

async fn run_statement(
    tx: &mut Transaction<'static, Postgres>,
    statement: Statement,
) -> Result<PgQueryResult, sqlx::Error> {
    match statement {
        Statement::InsertQuery(query) => {
            sqlx::query("INSERT INTO query (query_id, purpose, size) VALUES ($1, $2, $3)")
                .bind(query.query_id.get())
                .bind(query.purpose)
                .bind(query.size)
                .execute(&mut **tx)
                .await
        }
        Statement::InsertDisk(disk) => {
            sqlx::query(
                r#"
                INSERT INTO disk (disk_id, company, speed, free_space, cost)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(disk.disk_id.get())
            .bind(disk.company)
            .bind(disk.speed)
            .bind(disk.free_space)
            .bind(disk.cost)
            .execute(&mut **tx)
            .await
        }
        Statement::InsertRam(ram) => {
            sqlx::query("INSERT INTO ram (ram_id, company, size) VALUES ($1, $2, $3)")
                .bind(ram.ram_id.get())
                .bind(ram.company)
                .bind(ram.size)
                .execute(&mut **tx)
                .await
        }
        Statement::InsertDiskRam(link) => {
            sqlx::query("INSERT INTO disk_ram (disk_id, ram_id) VALUES ($1, $2)")
                .bind(link.disk_id.get())
                .bind(link.ram_id.get())
                .execute(&mut **tx)
                .await
        }
        Statement::InsertDiskQuery(link) => {
            sqlx::query(
                r#"
                INSERT INTO disk_query (disk_id, query_id, query_purpose, query_size)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(link.disk_id.get())
            .bind(link.query_id.get())
            .bind(link.snapshot.purpose().to_string())
            .bind(link.snapshot.size())
            .execute(&mut **tx)
            .await
        }
        Statement::DeleteQuery(query_id) => {
            sqlx::query("DELETE FROM query WHERE query_id = $1")
                .bind(query_id.get())
                .execute(&mut **tx)
                .await
        }
        Statement::DeleteDisk(disk_id) => {
            sqlx::query("DELETE FROM disk WHERE disk_id = $1")
                .bind(disk_id.get())
                .execute(&mut **tx)
                .await
        }
        Statement::DeleteRam(ram_id) => {
            sqlx::query("DELETE FROM ram WHERE ram_id = $1")
                .bind(ram_id.get())
                .execute(&mut **tx)
                .await
        }
        Statement::DeleteDiskRam(link) => {
            sqlx::query("DELETE FROM disk_ram WHERE disk_id = $1 AND ram_id = $2")
                .bind(link.disk_id.get())
                .bind(link.ram_id.get())
                .execute(&mut **tx)
                .await
        }
        Statement::DeleteDiskQuery { disk_id, query_id } => {
            sqlx::query("DELETE FROM disk_query WHERE disk_id = $1 AND query_id = $2")
                .bind(disk_id.get())
                .bind(query_id.get())
                .execute(&mut **tx)
                .await
        }
        Statement::AdjustFreeSpace { disk_id, delta } => {
            sqlx::query("UPDATE disk SET free_space = free_space + $2 WHERE disk_id = $1")
                .bind(disk_id.get())
                .bind(delta)
                .execute(&mut **tx)
                .await
        }
        Statement::AdjustFreeSpaceOfHosts { query_id, delta } => {
            sqlx::query(
                r#"
                UPDATE disk SET free_space = free_space + $2
                WHERE disk_id IN (SELECT disk_id FROM disk_query WHERE query_id = $1)
                "#,
            )
            .bind(query_id.get())
            .bind(delta)
            .execute(&mut **tx)
            .await
        }
        Statement::AdjustFreeSpaceIfHosting {
            disk_id,
            query_id,
            delta,
        } => {
            sqlx::query(
                r#"
                UPDATE disk SET free_space = free_space + $3
                WHERE disk_id = $1
                  AND EXISTS (
                      SELECT 1 FROM disk_query WHERE disk_id = $1 AND query_id = $2
                  )
                "#,
            )
            .bind(disk_id.get())
            .bind(query_id.get())
            .bind(delta)
            .execute(&mut **tx)
            .await
        }
    }
}

// Row decoding

fn decode_query(row: &PgRow) -> Result<Query, sqlx::Error> {
    Ok(Query {
        query_id: QueryId::new(row.try_get("query_id")?),
        purpose: row.try_get("purpose")?,
        size: row.try_get("size")?,
    })
}

fn decode_disk(row: &PgRow) -> Result<Disk, sqlx::Error> {
    Ok(Disk {
        disk_id: DiskId::new(row.try_get("disk_id")?),
        company: row.try_get("company")?,
        speed: row.try_get("speed")?,
        free_space: row.try_get("free_space")?,
        cost: row.try_get("cost")?,
    })
}

fn decode_ram(row: &PgRow) -> Result<Ram, sqlx::Error> {
    Ok(Ram {
        ram_id: RamId::new(row.try_get("ram_id")?),
        company: row.try_get("company")?,
        size: row.try_get("size")?,
    })
}

fn decode_disk_ram(row: &PgRow) -> Result<DiskRam, sqlx::Error> {
    Ok(DiskRam::new(
        DiskId::new(row.try_get("disk_id")?),
        RamId::new(row.try_get("ram_id")?),
    ))
}

fn decode_disk_query(row: &PgRow) -> Result<DiskQuery, sqlx::Error> {
    let purpose: String = row.try_get("query_purpose")?;
    Ok(DiskQuery::new(
        DiskId::new(row.try_get("disk_id")?),
        QueryId::new(row.try_get("query_id")?),
        QuerySnapshot::new(purpose, row.try_get("query_size")?),
    ))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                Some("23514") => StoreError::CheckViolation(msg),
                Some("23502") => StoreError::NotNullViolation(msg),
                _ => StoreError::Other(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {}: {}", operation, err))
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(format!("connection failure in {}: {}", operation, err))
        }
        _ => StoreError::Other(format!("sqlx error in {}: {}", operation, err)),
    }
}
