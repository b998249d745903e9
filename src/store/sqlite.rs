use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::infection::{FlagOutcome, InfectionPolicy, Transition};
use crate::item::Item;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::model::{now, FlagRecord, InventoryRecord, NewUser, Stock, Transaction, User, UserId, UserStock};
use crate::store::{check_batch, check_debit, InventoryStore, Population, ReportSource, TradeLedger, UserDirectory};
use crate::survivor::allocation_of;
use crate::trade::{BalanceDelta, Settlement};

const USER_COLUMNS: &str = "id, name, latitude, longitude, infected";
const INVENTORY_COLUMNS: &str = "user_id, item, quantity, balance, accessible";
const TRANSACTION_COLUMNS: &str = "id, reference, seller_id, buyer_id, item, quantity, created_at";

/// SQLite-backed store. Multi-step writes run inside an IMMEDIATE
/// transaction, which rolls back on every early return.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(cfg: &Config) -> Result<Self> {
        Self::open_path(&cfg.sqlite_path, Duration::from_millis(cfg.busy_timeout_ms))
    }

    pub fn open_path(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        log(
            Level::Info,
            Domain::Store,
            "opened",
            obj(&[("path", v_str(&path.to_string_lossy()))]),
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet.
    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                infected INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS flags (
                id TEXT PRIMARY KEY,
                flagger_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flags_target ON flags (target_id);
            CREATE TABLE IF NOT EXISTS inventory (
                user_id TEXT NOT NULL,
                item TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                balance INTEGER NOT NULL CHECK (balance >= 0),
                accessible INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (user_id, item)
            );
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                reference TEXT NOT NULL,
                seller_id TEXT NOT NULL,
                buyer_id TEXT NOT NULL,
                item TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_reference ON transactions (reference);
            CREATE INDEX IF NOT EXISTS idx_transactions_seller ON transactions (seller_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_transactions_buyer ON transactions (buyer_id, created_at);
            COMMIT;",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Persistence(format!("lock poisoned: {}", e)))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        infected: row.get(4)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryRecord> {
    let item: String = row.get(1)?;
    Ok(InventoryRecord {
        user_id: row.get(0)?,
        item: Item::parse(&item),
        quantity: row.get(2)?,
        balance: row.get(3)?,
        accessible: row.get(4)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let item: String = row.get(4)?;
    Ok(Transaction {
        id: row.get(0)?,
        reference: row.get(1)?,
        seller_id: row.get(2)?,
        buyer_id: row.get(3)?,
        item: Item::parse(&item),
        quantity: row.get(5)?,
        created_at: from_millis(6, row.get(6)?)?,
    })
}

fn flag_from_row(row: &Row<'_>) -> rusqlite::Result<FlagRecord> {
    Ok(FlagRecord {
        id: row.get(0)?,
        flagger_id: row.get(1)?,
        target_id: row.get(2)?,
        created_at: from_millis(3, row.get(3)?)?,
    })
}

fn find_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, params![id], user_from_row).optional()?)
}

fn stock_of(conn: &Connection, user_id: &str) -> Result<Stock> {
    let sql = format!("SELECT {} FROM inventory WHERE user_id = ?1", INVENTORY_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![user_id], record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records.into_iter().map(|r| (r.item, r)).collect())
}

fn lock_inventory(conn: &Connection, user_id: &str) -> Result<()> {
    conn.execute("UPDATE inventory SET accessible = 0 WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

fn insert_rows(conn: &Connection, rows: &[Transaction]) -> Result<()> {
    let sql = format!(
        "INSERT INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        TRANSACTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    for row in rows {
        stmt.execute(params![
            row.id,
            row.reference,
            row.seller_id,
            row.buyer_id,
            row.item.as_str(),
            row.quantity,
            row.created_at.timestamp_millis()
        ])?;
    }
    Ok(())
}

fn find_record(conn: &Connection, user_id: &str, item: Item) -> Result<Option<InventoryRecord>> {
    let sql = format!("SELECT {} FROM inventory WHERE user_id = ?1 AND item = ?2", INVENTORY_COLUMNS);
    Ok(conn
        .query_row(&sql, params![user_id, item.as_str()], record_from_row)
        .optional()?)
}

/// Work out why a guarded balance update matched no row.
fn rejected_delta(conn: &Connection, d: &BalanceDelta) -> Result<Error> {
    let Some(record) = find_record(conn, &d.user_id, d.item)? else {
        return Ok(Error::ItemNotInStock {
            user_id: d.user_id.clone(),
            item: d.item,
        });
    };
    if d.delta < 0 && !record.accessible {
        return Ok(Error::ItemLocked {
            user_id: d.user_id.clone(),
            item: d.item,
        });
    }
    if i64::from(record.balance) + d.delta < 0 {
        return Ok(Error::InsufficientStock {
            user_id: d.user_id.clone(),
            item: d.item,
            offered: d.delta.unsigned_abs(),
            available: u64::from(record.balance),
        });
    }
    Ok(Error::Persistence(format!("{} balance of {} overflows", d.item, d.user_id)))
}

impl UserDirectory for SqliteStore {
    fn create_user(&self, new_user: &NewUser) -> Result<(User, Stock)> {
        let allocation = allocation_of(new_user)?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: new_user.name.clone(),
            latitude: new_user.latitude,
            longitude: new_user.longitude,
            infected: false,
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO users (id, name, latitude, longitude, infected, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![user.id, user.name, user.latitude, user.longitude, now().timestamp_millis()],
        )?;
        for (item, quantity) in allocation {
            tx.execute(
                "INSERT INTO inventory (user_id, item, quantity, balance, accessible)
                 VALUES (?1, ?2, ?3, ?3, 1)",
                params![user.id, item.as_str(), quantity],
            )?;
        }
        let stock = stock_of(&tx, &user.id)?;
        tx.commit()?;
        Ok((user, stock))
    }

    fn find(&self, id: &str) -> Result<User> {
        find_user(&*self.conn()?, id)?.ok_or_else(|| Error::UserNotFound(id.to_string()))
    }

    fn find_many(&self, ids: &[&str]) -> Result<HashMap<UserId, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM users WHERE id IN ({})",
            USER_COLUMNS,
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params_from_iter(ids.iter()), user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users.into_iter().map(|u| (u.id.clone(), u)).collect())
    }

    fn update_location(&self, id: &str, latitude: f64, longitude: f64) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE users SET latitude = ?2, longitude = ?3 WHERE id = ?1",
            params![id, latitude, longitude],
        )?;
        if changed == 0 {
            return Err(Error::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    fn flags_against(&self, target_id: &str) -> Result<Vec<FlagRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, flagger_id, target_id, created_at FROM flags
             WHERE target_id = ?1 ORDER BY created_at, rowid",
        )?;
        let flags = stmt
            .query_map(params![target_id], flag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(flags)
    }

    fn record_flag(&self, flagger_id: &str, target_id: &str, policy: &InfectionPolicy) -> Result<FlagOutcome> {
        if flagger_id == target_id {
            return Ok(FlagOutcome::Ignored);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        find_user(&tx, flagger_id)?.ok_or_else(|| Error::UserNotFound(flagger_id.to_string()))?;
        let target = find_user(&tx, target_id)?.ok_or_else(|| Error::UserNotFound(target_id.to_string()))?;
        let prior: u32 = tx.query_row(
            "SELECT COUNT(*) FROM flags WHERE target_id = ?1",
            params![target_id],
            |row| row.get(0),
        )?;

        let transition = policy.evaluate(target.status(), prior);
        let mut inventory_locked = false;
        if transition == Transition::BecameInfected {
            tx.execute("UPDATE users SET infected = 1 WHERE id = ?1", params![target_id])?;
            if policy.cascade_lockout {
                lock_inventory(&tx, target_id)?;
                inventory_locked = true;
            }
        }
        tx.execute(
            "INSERT INTO flags (id, flagger_id, target_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), flagger_id, target_id, now().timestamp_millis()],
        )?;
        tx.commit()?;

        Ok(FlagOutcome::Recorded {
            flag_count: prior + 1,
            transition,
            inventory_locked,
        })
    }

    fn set_infected(&self, id: &str) -> Result<()> {
        let changed = self
            .conn()?
            .execute("UPDATE users SET infected = 1 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(Error::UserNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl InventoryStore for SqliteStore {
    fn balances(&self, user_id: &str) -> Result<Stock> {
        stock_of(&*self.conn()?, user_id)
    }

    fn balances_many(&self, user_ids: &[&str]) -> Result<UserStock> {
        let mut result = UserStock::new();
        if user_ids.is_empty() {
            return Ok(result);
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM inventory WHERE user_id IN ({})",
            INVENTORY_COLUMNS,
            placeholders(user_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(user_ids.iter()), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for record in records {
            result
                .entry(record.user_id.clone())
                .or_default()
                .insert(record.item, record);
        }
        Ok(result)
    }

    fn set_balance(&self, user_id: &str, item: Item, balance: u32) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE inventory SET balance = ?3 WHERE user_id = ?1 AND item = ?2",
            params![user_id, item.as_str(), balance],
        )?;
        if changed == 0 {
            return Err(Error::ItemNotInStock {
                user_id: user_id.to_string(),
                item,
            });
        }
        Ok(())
    }

    fn lock_user(&self, user_id: &str) -> Result<()> {
        lock_inventory(&*self.conn()?, user_id)
    }
}

impl TradeLedger for SqliteStore {
    fn append(&self, rows: &[Transaction]) -> Result<()> {
        check_batch(rows)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_rows(&tx, rows)?;
        tx.commit()?;
        Ok(())
    }

    fn settle(&self, settlement: &Settlement) -> Result<()> {
        check_batch(&settlement.rows)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for id in settlement.participants() {
            let user = find_user(&tx, id)?.ok_or(Error::ParticipantMissing)?;
            if user.infected {
                return Err(Error::ParticipantInfected { user_id: id.to_string() });
            }
        }

        for debit in &settlement.debits {
            check_debit(find_record(&tx, &debit.user_id, debit.item)?.as_ref(), debit)?;
        }

        insert_rows(&tx, &settlement.rows)?;

        // Relative, guarded writes: a cell only moves if it stays in range and,
        // when debited, is still accessible.
        for d in &settlement.deltas {
            let changed = tx.execute(
                "UPDATE inventory SET balance = balance + ?3
                 WHERE user_id = ?1 AND item = ?2
                   AND balance + ?3 BETWEEN 0 AND 4294967295
                   AND (accessible = 1 OR ?3 >= 0)",
                params![d.user_id, d.item.as_str(), d.delta],
            )?;
            if changed == 0 {
                return Err(rejected_delta(&tx, d)?);
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn history(&self, user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE (seller_id = ?1 OR buyer_id = ?1) AND created_at BETWEEN ?2 AND ?3
             ORDER BY created_at, rowid",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![user_id, start.timestamp_millis(), end.timestamp_millis()],
                transaction_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn details(&self, reference: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE reference = ?1 ORDER BY rowid",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![reference], transaction_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl ReportSource for SqliteStore {
    fn population(&self) -> Result<Population> {
        let (total, infected): (u32, u32) = self.conn()?.query_row(
            "SELECT COUNT(*), COALESCE(SUM(infected), 0) FROM users",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(Population { total, infected })
    }

    fn item_totals(&self, accessible: bool) -> Result<BTreeMap<Item, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT item, COALESCE(SUM(balance), 0) FROM inventory
             WHERE accessible = ?1 GROUP BY item",
        )?;
        let totals = stmt
            .query_map(params![accessible], |row| {
                let item: String = row.get(0)?;
                let total: i64 = row.get(1)?;
                Ok((Item::parse(&item), total.max(0) as u64))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(totals)
    }
}
