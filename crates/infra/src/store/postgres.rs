//! Postgres-backed credit store.
//!
//! Persists wallets, ledger entries, allocations and fulfillments in the four
//! tables of `schema.sql`, and turns the port's lock scopes into database
//! transactions so several processes can share wallets safely.
//!
//! ## Unit of work
//!
//! `with_wallet_lock` runs one transaction:
//! 1. `SELECT ... FROM credit_wallets WHERE id = $1 FOR UPDATE`
//! 2. Load the wallet's entries, allocations and fulfillments into a staged unit of work
//! 3. Run the closure against it (no database access while it runs)
//! 4. Upsert changed fulfillments, insert new entries and allocations, update the balance cache
//! 5. Commit, or roll back if the closure or any write failed
//!
//! Sequences are per wallet (`MAX(sequence) + 1` under the row lock), so FIFO
//! tie-breaks stay in creation order without a global counter.
//!
//! ## Fulfillment locks
//!
//! `with_fulfillment_lock` holds a transaction-scoped advisory lock keyed on the
//! fulfillment id for the duration of its closure. A row lock would block the
//! nested wallet transaction, which rewrites that same fulfillment row; the
//! advisory lock excludes other processors without touching the row. The
//! closure runs on a second pooled connection, so the pool needs at least two.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | CreditError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Second fulfillment for a source, concurrent wallet creation |
//! | Database (foreign key violation) | `23503` | `NotFound` | Wallet deleted while a unit of work was in flight |
//! | Database (check constraint violation) | `23514` | `InvalidArgument` | Zero amount, non-positive allocation |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | RowNotFound | N/A | `NotFound` | Unexpected missing row |
//! | PoolClosed / other | N/A | `Storage` | Network errors, closed pool |
//!
//! ## Thread Safety
//!
//! `PostgresCreditStore` is `Send + Sync`. The port is synchronous, so every
//! call blocks on the store's tokio runtime; call it from plain threads (the
//! scheduler, request workers), never from inside an async task.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use creditforge_core::{
    AllocationId, CreditError, CreditResult, FulfillmentId, FulfillmentPeriod, OwnerRef, SourceRef, TransactionId,
    WalletId,
};
use creditforge_ledger::{Allocation, CreditTransaction, Fulfillment, Wallet};

use super::staged::StagedTx;
use super::{CreditStore, LedgerTx};

/// Relational layout created by [`PostgresCreditStore::ensure_schema`].
pub const SCHEMA: &str = include_str!("../../schema.sql");

/// Environment variable holding the connection string.
pub const DATABASE_URL_ENV: &str = "CREDITFORGE_DATABASE_URL";

const WALLET_COLUMNS: &str = "id, owner_type, owner_id, balance, metadata, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, wallet_id, sequence, amount, category, expires_at, metadata, fulfillment_id, created_at";
const FULFILLMENT_COLUMNS: &str = "id, wallet_id, source_kind, source_id, fulfillment_type, \
     credits_last_fulfillment, fulfillment_period, last_fulfilled_at, next_fulfillment_at, stops_at, \
     metadata, created_at, updated_at";

/// Postgres credit store behind the synchronous [`CreditStore`] port.
#[derive(Debug, Clone)]
pub struct PostgresCreditStore {
    pool: PgPool,
    handle: Handle,
    _runtime: Option<Arc<Runtime>>,
}

impl PostgresCreditStore {
    /// Use an existing pool, driving queries on `handle`.
    ///
    /// `handle` must belong to a multi-thread runtime; a current-thread
    /// runtime does not drive I/O for callers blocking from other threads.
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool,
            handle,
            _runtime: None,
        }
    }

    /// Connect with a store-owned runtime.
    pub fn connect(database_url: &str, max_connections: u32) -> CreditResult<Self> {
        if max_connections < 2 {
            return Err(CreditError::invalid_argument(
                "the postgres store needs at least two connections",
            ));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("creditforge-pg")
            .enable_all()
            .build()
            .map_err(|e| CreditError::storage(format!("failed to start runtime: {e}")))?;
        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self {
            pool,
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }

    /// Connect using `CREDITFORGE_DATABASE_URL`; `Ok(None)` when it is unset.
    pub fn from_env() -> CreditResult<Option<Self>> {
        match std::env::var(DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::connect(url.trim(), 10).map(Some),
            _ => Ok(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables and indexes if they do not exist.
    pub fn ensure_schema(&self) -> CreditResult<()> {
        self.block_on(async {
            sqlx::raw_sql(SCHEMA)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
            Ok(())
        })
    }

    fn block_on<T>(&self, work: impl Future<Output = CreditResult<T>>) -> CreditResult<T> {
        if Handle::try_current().is_ok() {
            return Err(CreditError::storage(
                "PostgresCreditStore is synchronous; call it outside an async runtime",
            ));
        }
        self.handle.block_on(work)
    }

    async fn begin(&self, operation: &str) -> CreditResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| map_sqlx_error(operation, e))
    }

    /// Lock the wallet row and load everything the unit of work reads.
    #[instrument(skip_all, fields(wallet_id = %wallet_id), err)]
    async fn open_wallet(&self, wallet_id: WalletId) -> CreditResult<(Transaction<'static, Postgres>, StagedTx)> {
        let mut tx = self.begin("begin_wallet").await?;

        let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM credit_wallets WHERE id = $1 FOR UPDATE"))
            .bind(wallet_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_wallet", e))?;
        let wallet = match row {
            Some(row) => wallet_from_row(&row)?,
            None => return Err(CreditError::not_found(format!("wallet {wallet_id}"))),
        };

        let transactions = load_transactions(&mut tx, wallet_id).await?;
        let allocations = load_allocations(&mut tx, wallet_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {FULFILLMENT_COLUMNS} FROM credit_fulfillments WHERE wallet_id = $1"
        ))
        .bind(wallet_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_fulfillments", e))?;
        let fulfillments = rows.iter().map(fulfillment_from_row).collect::<CreditResult<Vec<_>>>()?;

        Ok((tx, StagedTx::new(wallet, transactions, allocations, fulfillments)))
    }

    /// Write the staged tail and commit.
    async fn commit_wallet(&self, mut tx: Transaction<'static, Postgres>, staged: &StagedTx) -> CreditResult<()> {
        // Entries reference fulfillments created in the same unit of work.
        for f in staged.changed_fulfillments() {
            upsert_fulfillment(&mut tx, f).await?;
        }
        for t in staged.new_transactions() {
            insert_transaction(&mut tx, t).await?;
        }
        for a in staged.new_allocations() {
            sqlx::query(
                "INSERT INTO credit_allocations (id, spend_id, source_id, amount) VALUES ($1, $2, $3, $4)",
            )
            .bind(a.id.as_uuid())
            .bind(a.spend_id.as_uuid())
            .bind(a.source_id.as_uuid())
            .bind(a.amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_allocation", e))?;
        }

        let wallet = staged.staged_wallet();
        sqlx::query("UPDATE credit_wallets SET balance = $2, updated_at = $3 WHERE id = $1")
            .bind(wallet.id.as_uuid())
            .bind(wallet.balance)
            .bind(wallet.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_balance", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    fn rollback(&self, tx: Transaction<'static, Postgres>, operation: &str) {
        if let Err(e) = self.handle.block_on(tx.rollback()) {
            warn!(operation, error = %e, "rollback failed; the connection will discard the transaction");
        }
    }
}

impl CreditStore for PostgresCreditStore {
    fn find_or_create_wallet(&self, owner: &OwnerRef, at: DateTime<Utc>) -> CreditResult<Wallet> {
        let wallet = Wallet::open(owner.clone(), at);
        self.block_on(async {
            sqlx::query(
                "INSERT INTO credit_wallets (id, owner_type, owner_id, balance, metadata, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (owner_type, owner_id) DO NOTHING",
            )
            .bind(wallet.id.as_uuid())
            .bind(&owner.owner_type)
            .bind(&owner.owner_id)
            .bind(wallet.balance)
            .bind(Json(&wallet.metadata))
            .bind(wallet.created_at)
            .bind(wallet.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_wallet", e))?;

            let row = sqlx::query(&format!(
                "SELECT {WALLET_COLUMNS} FROM credit_wallets WHERE owner_type = $1 AND owner_id = $2"
            ))
            .bind(&owner.owner_type)
            .bind(&owner.owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_wallet", e))?;
            wallet_from_row(&row)
        })
    }

    fn wallet(&self, id: WalletId) -> CreditResult<Wallet> {
        self.block_on(async {
            let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM credit_wallets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("wallet", e))?;
            match row {
                Some(row) => wallet_from_row(&row),
                None => Err(CreditError::not_found(format!("wallet {id}"))),
            }
        })
    }

    fn wallet_for_owner(&self, owner: &OwnerRef) -> CreditResult<Option<Wallet>> {
        self.block_on(async {
            let row = sqlx::query(&format!(
                "SELECT {WALLET_COLUMNS} FROM credit_wallets WHERE owner_type = $1 AND owner_id = $2"
            ))
            .bind(&owner.owner_type)
            .bind(&owner.owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("wallet_for_owner", e))?;
            row.as_ref().map(wallet_from_row).transpose()
        })
    }

    fn delete_wallet(&self, id: WalletId) -> CreditResult<()> {
        self.block_on(async {
            // Entries, allocations and fulfillments go by ON DELETE CASCADE.
            let result = sqlx::query("DELETE FROM credit_wallets WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_wallet", e))?;
            if result.rows_affected() == 0 {
                return Err(CreditError::not_found(format!("wallet {id}")));
            }
            Ok(())
        })
    }

    fn transactions(&self, wallet_id: WalletId) -> CreditResult<Vec<CreditTransaction>> {
        self.block_on(async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| map_sqlx_error("acquire", e))?;
            load_transactions(&mut conn, wallet_id).await
        })
    }

    fn allocations(&self, wallet_id: WalletId) -> CreditResult<Vec<Allocation>> {
        self.block_on(async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| map_sqlx_error("acquire", e))?;
            load_allocations(&mut conn, wallet_id).await
        })
    }

    fn fulfillment(&self, id: FulfillmentId) -> CreditResult<Option<Fulfillment>> {
        self.block_on(async {
            let row = sqlx::query(&format!("SELECT {FULFILLMENT_COLUMNS} FROM credit_fulfillments WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("fulfillment", e))?;
            row.as_ref().map(fulfillment_from_row).transpose()
        })
    }

    fn fulfillment_for_source(&self, source: &SourceRef) -> CreditResult<Option<Fulfillment>> {
        let kind = encode_enum(&source.kind)?;
        self.block_on(async {
            let row = sqlx::query(&format!(
                "SELECT {FULFILLMENT_COLUMNS} FROM credit_fulfillments WHERE source_kind = $1 AND source_id = $2"
            ))
            .bind(&kind)
            .bind(&source.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fulfillment_for_source", e))?;
            row.as_ref().map(fulfillment_from_row).transpose()
        })
    }

    fn due_fulfillments(&self, now: DateTime<Utc>) -> CreditResult<Vec<Fulfillment>> {
        let rows = self.block_on(async {
            sqlx::query(&format!(
                "SELECT {FULFILLMENT_COLUMNS} FROM credit_fulfillments \
                 WHERE next_fulfillment_at IS NOT NULL \
                   AND next_fulfillment_at <= $1 \
                   AND (stops_at IS NULL OR stops_at > $1) \
                   AND (last_fulfilled_at IS NULL OR next_fulfillment_at > last_fulfilled_at) \
                 ORDER BY next_fulfillment_at ASC, created_at ASC"
            ))
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("due_fulfillments", e))
        })?;
        let due = rows
            .iter()
            .map(fulfillment_from_row)
            .collect::<CreditResult<Vec<_>>>()?
            .into_iter()
            .filter(|f| f.is_due(now))
            .collect();
        Ok(due)
    }

    fn with_wallet_lock<R, F>(&self, wallet_id: WalletId, work: F) -> CreditResult<R>
    where
        F: FnOnce(&mut dyn LedgerTx) -> CreditResult<R>,
    {
        let (tx, mut staged) = self.block_on(self.open_wallet(wallet_id))?;
        let out = match work(&mut staged) {
            Ok(out) => out,
            Err(e) => {
                debug!(wallet_id = %wallet_id, error = %e, "unit of work failed, rolling back");
                self.rollback(tx, "with_wallet_lock");
                return Err(e);
            }
        };
        self.block_on(self.commit_wallet(tx, &staged))?;
        Ok(out)
    }

    fn with_fulfillment_lock<R, F>(&self, id: FulfillmentId, work: F) -> CreditResult<R>
    where
        F: FnOnce() -> CreditResult<R>,
    {
        let tx = self.block_on(async {
            let mut tx = self.begin("begin_fulfillment").await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(advisory_key(id))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_fulfillment", e))?;
            Ok(tx)
        })?;

        let out = work();
        match &out {
            Ok(_) => self.block_on(async { tx.commit().await.map_err(|e| map_sqlx_error("release_fulfillment", e)) })?,
            Err(_) => self.rollback(tx, "with_fulfillment_lock"),
        }
        out
    }
}

/// Advisory-lock key for a fulfillment: the random half of its UUIDv7.
fn advisory_key(id: FulfillmentId) -> i64 {
    let bytes = id.as_uuid().as_bytes();
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[8..]);
    i64::from_be_bytes(low)
}

async fn load_transactions(
    conn: &mut sqlx::PgConnection,
    wallet_id: WalletId,
) -> CreditResult<Vec<CreditTransaction>> {
    let rows = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE wallet_id = $1 ORDER BY sequence ASC"
    ))
    .bind(wallet_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_transactions", e))?;
    rows.iter().map(transaction_from_row).collect()
}

async fn load_allocations(conn: &mut sqlx::PgConnection, wallet_id: WalletId) -> CreditResult<Vec<Allocation>> {
    let rows = sqlx::query(
        "SELECT a.id, a.spend_id, a.source_id, a.amount \
         FROM credit_allocations a \
         JOIN credit_transactions t ON t.id = a.spend_id \
         WHERE t.wallet_id = $1 \
         ORDER BY t.sequence ASC",
    )
    .bind(wallet_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_allocations", e))?;
    rows.iter()
        .map(|row| {
            Ok(Allocation {
                id: AllocationId::from_uuid(column(row, "id")?),
                spend_id: TransactionId::from_uuid(column(row, "spend_id")?),
                source_id: TransactionId::from_uuid(column(row, "source_id")?),
                amount: column(row, "amount")?,
            })
        })
        .collect()
}

async fn insert_transaction(tx: &mut Transaction<'static, Postgres>, t: &CreditTransaction) -> CreditResult<()> {
    let sequence = i64::try_from(t.sequence)
        .map_err(|_| CreditError::storage(format!("sequence {} does not fit a BIGINT", t.sequence)))?;
    sqlx::query(&format!(
        "INSERT INTO credit_transactions ({TRANSACTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    ))
    .bind(t.id.as_uuid())
    .bind(t.wallet_id.as_uuid())
    .bind(sequence)
    .bind(t.amount)
    .bind(t.category.as_str())
    .bind(t.expires_at)
    .bind(Json(&t.metadata))
    .bind(t.fulfillment_id.map(|id| *id.as_uuid()))
    .bind(t.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_transaction", e))?;
    Ok(())
}

async fn upsert_fulfillment(tx: &mut Transaction<'static, Postgres>, f: &Fulfillment) -> CreditResult<()> {
    sqlx::query(&format!(
        "INSERT INTO credit_fulfillments ({FULFILLMENT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         ON CONFLICT (id) DO UPDATE SET \
             credits_last_fulfillment = EXCLUDED.credits_last_fulfillment, \
             fulfillment_period = EXCLUDED.fulfillment_period, \
             last_fulfilled_at = EXCLUDED.last_fulfilled_at, \
             next_fulfillment_at = EXCLUDED.next_fulfillment_at, \
             stops_at = EXCLUDED.stops_at, \
             metadata = EXCLUDED.metadata, \
             updated_at = EXCLUDED.updated_at"
    ))
    .bind(f.id.as_uuid())
    .bind(f.wallet_id.as_uuid())
    .bind(encode_enum(&f.source.kind)?)
    .bind(&f.source.id)
    .bind(encode_enum(&f.fulfillment_type)?)
    .bind(f.credits_last_fulfillment)
    .bind(f.period.map(|p| p.to_string()))
    .bind(f.last_fulfilled_at)
    .bind(f.next_fulfillment_at)
    .bind(f.stops_at)
    .bind(Json(&f.metadata))
    .bind(f.created_at)
    .bind(f.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert_fulfillment", e))?;
    Ok(())
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> CreditResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| CreditError::storage(format!("failed to read column {name}: {e}")))
}

fn wallet_from_row(row: &PgRow) -> CreditResult<Wallet> {
    let Json(metadata) = column::<Json<serde_json::Map<String, serde_json::Value>>>(row, "metadata")?;
    Ok(Wallet {
        id: WalletId::from_uuid(column(row, "id")?),
        owner: OwnerRef::new(column::<String>(row, "owner_type")?, column::<String>(row, "owner_id")?),
        balance: column(row, "balance")?,
        metadata,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> CreditResult<CreditTransaction> {
    let sequence: i64 = column(row, "sequence")?;
    let Json(metadata) = column(row, "metadata")?;
    Ok(CreditTransaction {
        id: TransactionId::from_uuid(column(row, "id")?),
        wallet_id: WalletId::from_uuid(column(row, "wallet_id")?),
        sequence: u64::try_from(sequence)
            .map_err(|_| CreditError::storage(format!("negative sequence {sequence}")))?,
        amount: column(row, "amount")?,
        category: decode_enum("category", &column::<String>(row, "category")?)?,
        expires_at: column(row, "expires_at")?,
        metadata,
        fulfillment_id: column::<Option<Uuid>>(row, "fulfillment_id")?.map(FulfillmentId::from_uuid),
        created_at: column(row, "created_at")?,
    })
}

fn fulfillment_from_row(row: &PgRow) -> CreditResult<Fulfillment> {
    let period = column::<Option<String>>(row, "fulfillment_period")?
        .map(|raw| raw.parse::<FulfillmentPeriod>())
        .transpose()?;
    let Json(metadata) = column(row, "metadata")?;
    Ok(Fulfillment {
        id: FulfillmentId::from_uuid(column(row, "id")?),
        wallet_id: WalletId::from_uuid(column(row, "wallet_id")?),
        source: SourceRef {
            kind: decode_enum("source_kind", &column::<String>(row, "source_kind")?)?,
            id: column(row, "source_id")?,
        },
        fulfillment_type: decode_enum("fulfillment_type", &column::<String>(row, "fulfillment_type")?)?,
        credits_last_fulfillment: column(row, "credits_last_fulfillment")?,
        period,
        last_fulfilled_at: column(row, "last_fulfilled_at")?,
        next_fulfillment_at: column(row, "next_fulfillment_at")?,
        stops_at: column(row, "stops_at")?,
        metadata,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

/// Snake-case name of a unit enum variant, as stored in TEXT columns.
fn encode_enum<T: Serialize>(value: &T) -> CreditResult<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        Ok(other) => Err(CreditError::storage(format!("expected a unit variant, got {other}"))),
        Err(e) => Err(CreditError::storage(format!("failed to encode enum: {e}"))),
    }
}

fn decode_enum<T: DeserializeOwned>(name: &str, raw: &str) -> CreditResult<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| CreditError::storage(format!("unknown {name} {raw:?}: {e}")))
}

/// Map SQLx errors to `CreditError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CreditError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => CreditError::conflict(msg),
                Some("23503") => CreditError::not_found(msg),
                Some("23514") => CreditError::invalid_argument(msg),
                _ => CreditError::storage(msg),
            }
        }
        sqlx::Error::RowNotFound => CreditError::not_found(format!("unexpected row not found in {operation}")),
        sqlx::Error::PoolClosed => CreditError::storage(format!("connection pool closed in {operation}")),
        other => CreditError::storage(format!("sqlx error in {operation}: {other}")),
    }
}
