//! Storage contracts consumed by the trade and infection logic, plus the two
//! backends: [`SqliteStore`] for real use and [`MemoryStore`] as an injected
//! in-process store.
//!
//! Single reads are moment-in-time snapshots. The only multi-step writes,
//! [`TradeLedger::settle`] and [`UserDirectory::record_flag`], are each applied
//! as one unit that either fully commits or leaves nothing behind.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::infection::{FlagOutcome, InfectionPolicy};
use crate::item::Item;
use crate::model::{FlagRecord, InventoryRecord, NewUser, Stock, Transaction, User, UserId, UserStock};
use crate::trade::{Debit, Settlement};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait UserDirectory {
    /// Create the user and one inventory record per catalog item.
    fn create_user(&self, new_user: &NewUser) -> Result<(User, Stock)>;
    fn find(&self, id: &str) -> Result<User>;
    /// Users that exist among `ids`; missing ids are simply absent.
    fn find_many(&self, ids: &[&str]) -> Result<HashMap<UserId, User>>;
    fn update_location(&self, id: &str, latitude: f64, longitude: f64) -> Result<()>;
    fn flags_against(&self, target_id: &str) -> Result<Vec<FlagRecord>>;
    /// Persist one flag, evaluating `policy` against the count read in the
    /// same unit. A self-flag is ignored.
    fn record_flag(&self, flagger_id: &str, target_id: &str, policy: &InfectionPolicy) -> Result<FlagOutcome>;
    fn set_infected(&self, id: &str) -> Result<()>;
}

pub trait InventoryStore {
    fn balances(&self, user_id: &str) -> Result<Stock>;
    fn balances_many(&self, user_ids: &[&str]) -> Result<UserStock>;
    fn set_balance(&self, user_id: &str, item: Item, balance: u32) -> Result<()>;
    /// One-way: every record of the user becomes inaccessible.
    fn lock_user(&self, user_id: &str) -> Result<()>;
}

pub trait TradeLedger {
    /// Append rows sharing one reference. Balances are untouched.
    fn append(&self, rows: &[Transaction]) -> Result<()>;
    /// Append the settlement's rows and apply its balance deltas atomically.
    fn settle(&self, settlement: &Settlement) -> Result<()>;
    /// Rows naming `user_id` as either party, created within `[start, end]`.
    fn history(&self, user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Transaction>>;
    fn details(&self, reference: &str) -> Result<Vec<Transaction>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Population {
    pub total: u32,
    pub infected: u32,
}

pub trait ReportSource {
    fn population(&self) -> Result<Population>;
    /// Sum of balances per item over records with the given accessibility.
    fn item_totals(&self, accessible: bool) -> Result<BTreeMap<Item, u64>>;
}

/// Reject an append batch whose rows do not share a single reference.
pub(crate) fn check_batch(rows: &[Transaction]) -> Result<()> {
    if let Some(first) = rows.first() {
        if rows.iter().any(|r| r.reference != first.reference) {
            return Err(Error::Persistence(format!(
                "ledger batch mixes references with {}",
                first.reference
            )));
        }
    }
    Ok(())
}

/// The live record must still be accessible and cover the gross amount given.
pub(crate) fn check_debit(record: Option<&InventoryRecord>, debit: &Debit) -> Result<()> {
    let Some(record) = record else {
        return Err(Error::ItemNotInStock {
            user_id: debit.user_id.clone(),
            item: debit.item,
        });
    };
    if !record.accessible {
        return Err(Error::ItemLocked {
            user_id: debit.user_id.clone(),
            item: debit.item,
        });
    }
    if u64::from(record.balance) < debit.quantity {
        return Err(Error::InsufficientStock {
            user_id: debit.user_id.clone(),
            item: debit.item,
            offered: debit.quantity,
            available: u64::from(record.balance),
        });
    }
    Ok(())
}
