//! Durable ledger on SQLite via sqlx.
//!
//! Money is stored as decimal TEXT and timestamps as fixed-width RFC 3339
//! TEXT (microseconds, `Z`), so string comparison orders them correctly.
//! Each batch runs inside one `BEGIN IMMEDIATE` transaction, so the write
//! lock is taken up front and concurrent writers queue on the busy timeout
//! instead of deadlocking on a read-to-write upgrade. The account row is
//! updated with a `WHERE version = ?` guard and a zero-row update aborts
//! the whole batch as a conflict. Lock contention that outlasts the busy
//! timeout is reported as a conflict too, so the engine retries it.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{LedgerBatch, LedgerStore, PayoutChange};
use crate::config::LedgerConfig;
use crate::types::{
    Account, AccountDetails, Bet, BetData, LedgerError, Page, Payout, PayoutStatus, Transaction,
    TransactionKind, TransactionStatus,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        balance TEXT NOT NULL,
        bet_limit TEXT,
        daily_loss_limit TEXT,
        daily_deposit_limit TEXT,
        kyc_verified INTEGER NOT NULL DEFAULT 0,
        self_excluded_until TEXT,
        archived_at TEXT,
        created_at TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES accounts(id),
        kind TEXT NOT NULL,
        amount TEXT NOT NULL,
        balance_before TEXT NOT NULL,
        balance_after TEXT NOT NULL,
        status TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        reference TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        related_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, seq)",
    r#"
    CREATE TABLE IF NOT EXISTS bets (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES accounts(id),
        game_id INTEGER NOT NULL,
        amount TEXT NOT NULL,
        multiplier TEXT NOT NULL,
        result TEXT NOT NULL,
        win_amount TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        game_data TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bets_user_time ON bets(user_id, timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS payouts (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES accounts(id),
        amount TEXT NOT NULL,
        method TEXT NOT NULL,
        status TEXT NOT NULL,
        fee TEXT NOT NULL,
        net_amount TEXT NOT NULL,
        account_details TEXT NOT NULL,
        request_date TEXT NOT NULL,
        processed_date TEXT,
        admin_notes TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payouts_user ON payouts(user_id, seq)",
];

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if missing) the configured database and apply the schema.
    pub async fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let url = config.database_url.as_str();
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
        if !in_memory {
            // Readers never wait on the writer.
            options = options.journal_mode(SqliteJournalMode::Wal);
        }
        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
        if in_memory {
            // An in-memory database lives only as long as its connection.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(url, max_connections = config.max_connections, "SQLite ledger ready");
        Ok(ledger)
    }

    /// `open` with default timeouts.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        Self::open(&LedgerConfig {
            database_url: url.to_string(),
            max_connections,
            ..LedgerConfig::default()
        })
        .await
    }

    /// Fresh private in-memory ledger.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn write_batch(&self, batch: LedgerBatch) -> Result<Account, LedgerError> {
        let mut db = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let stored = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(batch.account.id.to_string())
            .fetch_optional(&mut *db)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()?
            .ok_or(LedgerError::UnknownUser(batch.account.id))?;
        batch.validate(&stored)?;

        let mut account = batch.account;
        account.version = stored.version + 1;
        let updated = sqlx::query(
            "UPDATE accounts SET balance = ?, bet_limit = ?, daily_loss_limit = ?, \
             daily_deposit_limit = ?, kyc_verified = ?, self_excluded_until = ?, \
             archived_at = ?, version = ? WHERE id = ? AND version = ?",
        )
        .bind(account.balance.to_string())
        .bind(account.bet_limit.map(|d| d.to_string()))
        .bind(account.daily_loss_limit.map(|d| d.to_string()))
        .bind(account.daily_deposit_limit.map(|d| d.to_string()))
        .bind(account.kyc_verified as i64)
        .bind(account.self_excluded_until.map(fmt_time))
        .bind(account.archived_at.map(fmt_time))
        .bind(account.version as i64)
        .bind(account.id.to_string())
        .bind(stored.version as i64)
        .execute(&mut *db)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::Conflict(format!("account {} changed underneath", account.id)));
        }

        for tx in &batch.transactions {
            insert_transaction(&mut db, tx).await?;
        }
        if let Some(bet) = &batch.bet {
            insert_bet(&mut db, bet).await?;
        }
        if let Some(change) = &batch.payout {
            write_payout(&mut db, change).await?;
        }

        db.commit().await?;
        debug!(
            user_id = %account.id,
            version = account.version,
            entries = batch.transactions.len(),
            "Batch committed"
        );
        Ok(account)
    }

    async fn count(&self, sql: &str, user_id: Uuid) -> Result<u64, LedgerError> {
        let n: i64 = sqlx::query_scalar(sql)
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including extended codes such as
/// SQLITE_BUSY_SNAPSHOT (517).
fn is_contention(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| matches!(code & 0xff, 5 | 6))
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

fn fmt_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("bad timestamp {s:?}: {e}")))
}

fn parse_decimal(s: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(s).map_err(|e| LedgerError::Storage(format!("bad amount {s:?}: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(s).map_err(|e| LedgerError::Storage(format!("bad id {s:?}: {e}")))
}

fn opt<T>(
    value: Option<String>,
    parse: impl Fn(&str) -> Result<T, LedgerError>,
) -> Result<Option<T>, LedgerError> {
    value.as_deref().map(parse).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, LedgerError> {
    serde_json::to_string(value).map_err(|e| LedgerError::Storage(format!("encode failed: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, LedgerError> {
    serde_json::from_str(s).map_err(|e| LedgerError::Storage(format!("decode failed: {e}")))
}

fn account_from_row(row: &SqliteRow) -> Result<Account, LedgerError> {
    Ok(Account {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        username: row.try_get("username")?,
        balance: parse_decimal(&row.try_get::<String, _>("balance")?)?,
        bet_limit: opt(row.try_get("bet_limit")?, parse_decimal)?,
        daily_loss_limit: opt(row.try_get("daily_loss_limit")?, parse_decimal)?,
        daily_deposit_limit: opt(row.try_get("daily_deposit_limit")?, parse_decimal)?,
        kyc_verified: row.try_get::<i64, _>("kyc_verified")? != 0,
        self_excluded_until: opt(row.try_get("self_excluded_until")?, parse_time)?,
        archived_at: opt(row.try_get("archived_at")?, parse_time)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        version: row.try_get::<i64, _>("version")?.max(0) as u64,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, LedgerError> {
    Ok(Transaction {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        kind: TransactionKind::from_str(&row.try_get::<String, _>("kind")?)?,
        amount: parse_decimal(&row.try_get::<String, _>("amount")?)?,
        balance_before: parse_decimal(&row.try_get::<String, _>("balance_before")?)?,
        balance_after: parse_decimal(&row.try_get::<String, _>("balance_after")?)?,
        status: TransactionStatus::from_str(&row.try_get::<String, _>("status")?)?,
        timestamp: parse_time(&row.try_get::<String, _>("timestamp")?)?,
        reference: row.try_get("reference")?,
        description: row.try_get("description")?,
        related_id: opt(row.try_get("related_id")?, parse_uuid)?,
    })
}

fn bet_from_row(row: &SqliteRow) -> Result<Bet, LedgerError> {
    let game_data: BetData = from_json(&row.try_get::<String, _>("game_data")?)?;
    Ok(Bet {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        game_id: row.try_get::<i64, _>("game_id")? as u32,
        amount: parse_decimal(&row.try_get::<String, _>("amount")?)?,
        multiplier: parse_decimal(&row.try_get::<String, _>("multiplier")?)?,
        result: row.try_get::<String, _>("result")?.parse()?,
        win_amount: parse_decimal(&row.try_get::<String, _>("win_amount")?)?,
        timestamp: parse_time(&row.try_get::<String, _>("timestamp")?)?,
        game_data,
    })
}

fn payout_from_row(row: &SqliteRow) -> Result<Payout, LedgerError> {
    let account_details: AccountDetails = from_json(&row.try_get::<String, _>("account_details")?)?;
    Ok(Payout {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
        amount: parse_decimal(&row.try_get::<String, _>("amount")?)?,
        method: row.try_get("method")?,
        status: PayoutStatus::from_str(&row.try_get::<String, _>("status")?)?,
        fee: parse_decimal(&row.try_get::<String, _>("fee")?)?,
        net_amount: parse_decimal(&row.try_get::<String, _>("net_amount")?)?,
        account_details,
        request_date: parse_time(&row.try_get::<String, _>("request_date")?)?,
        processed_date: opt(row.try_get("processed_date")?, parse_time)?,
        admin_notes: row.try_get("admin_notes")?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, username, balance, bet_limit, daily_loss_limit, \
    daily_deposit_limit, kyc_verified, self_excluded_until, archived_at, created_at, version";
const TRANSACTION_COLUMNS: &str = "id, user_id, kind, amount, balance_before, balance_after, \
    status, timestamp, reference, description, related_id";
const BET_COLUMNS: &str =
    "id, user_id, game_id, amount, multiplier, result, win_amount, timestamp, game_data";
const PAYOUT_COLUMNS: &str = "id, user_id, amount, method, status, fee, net_amount, \
    account_details, request_date, processed_date, admin_notes";

fn offset(page: u32, per_page: u32) -> i64 {
    (page.max(1) as i64 - 1) * per_page.max(1) as i64
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

type Tx<'c> = sqlx::Transaction<'c, Sqlite>;

async fn insert_transaction(db: &mut Tx<'_>, tx: &Transaction) -> Result<(), LedgerError> {
    sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(tx.id.to_string())
    .bind(tx.user_id.to_string())
    .bind(tx.kind.as_str())
    .bind(tx.amount.to_string())
    .bind(tx.balance_before.to_string())
    .bind(tx.balance_after.to_string())
    .bind(tx.status.as_str())
    .bind(fmt_time(tx.timestamp))
    .bind(&tx.reference)
    .bind(&tx.description)
    .bind(tx.related_id.map(|id| id.to_string()))
    .execute(&mut **db)
    .await?;
    Ok(())
}

async fn insert_bet(db: &mut Tx<'_>, bet: &Bet) -> Result<(), LedgerError> {
    sqlx::query(&format!("INSERT INTO bets ({BET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"))
        .bind(bet.id.to_string())
        .bind(bet.user_id.to_string())
        .bind(bet.game_id as i64)
        .bind(bet.amount.to_string())
        .bind(bet.multiplier.to_string())
        .bind(bet.result.as_str())
        .bind(bet.win_amount.to_string())
        .bind(fmt_time(bet.timestamp))
        .bind(to_json(&bet.game_data)?)
        .execute(&mut **db)
        .await?;
    Ok(())
}

async fn write_payout(db: &mut Tx<'_>, change: &PayoutChange) -> Result<(), LedgerError> {
    match change {
        PayoutChange::Insert(p) => {
            sqlx::query(&format!(
                "INSERT INTO payouts ({PAYOUT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(p.id.to_string())
            .bind(p.user_id.to_string())
            .bind(p.amount.to_string())
            .bind(&p.method)
            .bind(p.status.as_str())
            .bind(p.fee.to_string())
            .bind(p.net_amount.to_string())
            .bind(to_json(&p.account_details)?)
            .bind(fmt_time(p.request_date))
            .bind(p.processed_date.map(fmt_time))
            .bind(&p.admin_notes)
            .execute(&mut **db)
            .await?;
        }
        PayoutChange::Update { payout, expected } => {
            let result = sqlx::query(
                "UPDATE payouts SET status = ?, processed_date = ?, admin_notes = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(payout.status.as_str())
            .bind(payout.processed_date.map(fmt_time))
            .bind(&payout.admin_notes)
            .bind(payout.id.to_string())
            .bind(expected.as_str())
            .execute(&mut **db)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LedgerError::Conflict(format!(
                    "payout {} is no longer {}",
                    payout.id, expected
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn insert_account(&self, account: &Account) -> Result<(), LedgerError> {
        let result = sqlx::query(&format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(account.balance.to_string())
        .bind(account.bet_limit.map(|d| d.to_string()))
        .bind(account.daily_loss_limit.map(|d| d.to_string()))
        .bind(account.daily_deposit_limit.map(|d| d.to_string()))
        .bind(account.kyc_verified as i64)
        .bind(account.self_excluded_until.map(fmt_time))
        .bind(account.archived_at.map(fmt_time))
        .bind(fmt_time(account.created_at))
        .bind(account.version as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(LedgerError::DuplicateUsername(account.username.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>, LedgerError> {
        sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn commit(&self, batch: LedgerBatch) -> Result<Account, LedgerError> {
        let user_id = batch.account.id;
        match self.write_batch(batch).await {
            Err(LedgerError::Database(e)) if is_contention(&e) => {
                debug!(user_id = %user_id, error = %e, "Database busy, batch refused");
                Err(LedgerError::Conflict(format!("database busy: {e}")))
            }
            other => other,
        }
    }

    async fn payout(&self, payout_id: Uuid) -> Result<Option<Payout>, LedgerError> {
        sqlx::query(&format!("SELECT {PAYOUT_COLUMNS} FROM payouts WHERE id = ?"))
            .bind(payout_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(payout_from_row)
            .transpose()
    }

    async fn payouts(&self, user_id: Uuid) -> Result<Vec<Payout>, LedgerError> {
        sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts WHERE user_id = ? ORDER BY seq DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(payout_from_row)
        .collect()
    }

    async fn transactions(
        &self,
        user_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Transaction>, LedgerError> {
        let total = self
            .count("SELECT COUNT(*) FROM transactions WHERE user_id = ?", user_id)
            .await?;
        let items = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? \
             ORDER BY seq DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id.to_string())
        .bind(per_page.max(1) as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transaction_from_row)
        .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, page, per_page))
    }

    async fn ledger(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? ORDER BY seq"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transaction_from_row)
        .collect()
    }

    async fn bets(&self, user_id: Uuid, page: u32, per_page: u32) -> Result<Page<Bet>, LedgerError> {
        let total = self.count("SELECT COUNT(*) FROM bets WHERE user_id = ?", user_id).await?;
        let items = sqlx::query(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE user_id = ? ORDER BY seq DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id.to_string())
        .bind(per_page.max(1) as i64)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(bet_from_row)
        .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, page, per_page))
    }

    async fn bets_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Bet>, LedgerError> {
        sqlx::query(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE user_id = ? AND timestamp >= ? ORDER BY seq"
        ))
        .bind(user_id.to_string())
        .bind(fmt_time(since))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(bet_from_row)
        .collect()
    }

    async fn deposits_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Decimal, LedgerError> {
        // Decimal TEXT cannot be summed in SQL without going through floats.
        let since = since.map(fmt_time).unwrap_or_default();
        let amounts: Vec<String> = sqlx::query_scalar(
            "SELECT amount FROM transactions \
             WHERE user_id = ? AND kind = ? AND status = ? AND timestamp >= ?",
        )
        .bind(user_id.to_string())
        .bind(TransactionKind::Deposit.as_str())
        .bind(TransactionStatus::Completed.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        amounts.iter().map(|a| parse_decimal(a)).sum()
    }

    async fn withdrawn_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Decimal, LedgerError> {
        let amounts: Vec<String> = sqlx::query_scalar(
            "SELECT amount FROM payouts \
             WHERE user_id = ? AND status IN (?, ?) AND request_date >= ?",
        )
        .bind(user_id.to_string())
        .bind(PayoutStatus::Processing.as_str())
        .bind(PayoutStatus::Completed.as_str())
        .bind(fmt_time(since))
        .fetch_all(&self.pool)
        .await?;
        amounts.iter().map(|a| parse_decimal(a)).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
