use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::infection::{FlagOutcome, InfectionPolicy, Transition};
use crate::item::Item;
use crate::model::{now, FlagRecord, InventoryRecord, NewUser, Stock, Transaction, User, UserId, UserStock};
use crate::store::{check_batch, check_debit, InventoryStore, Population, ReportSource, TradeLedger, UserDirectory};
use crate::survivor::allocation_of;
use crate::trade::Settlement;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, User>,
    flags: Vec<FlagRecord>,
    inventory: BTreeMap<(UserId, Item), InventoryRecord>,
    ledger: Vec<Transaction>,
}

impl Inner {
    fn user(&self, id: &str) -> Result<&User> {
        self.users.get(id).ok_or_else(|| Error::UserNotFound(id.to_string()))
    }

    fn stock(&self, user_id: &str) -> Stock {
        self.inventory
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| (r.item, r.clone()))
            .collect()
    }

    fn lock_inventory(&mut self, user_id: &str) {
        for record in self.inventory.values_mut().filter(|r| r.user_id == user_id) {
            record.accessible = false;
        }
    }
}

/// Process-local store. Every operation holds one mutex for its whole
/// duration, so multi-step writes are applied all-or-nothing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| Error::Persistence(format!("lock poisoned: {}", e)))
    }
}

impl UserDirectory for MemoryStore {
    fn create_user(&self, new_user: &NewUser) -> Result<(User, Stock)> {
        let allocation = allocation_of(new_user)?;
        let mut inner = self.lock()?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: new_user.name.clone(),
            latitude: new_user.latitude,
            longitude: new_user.longitude,
            infected: false,
        };
        for (item, quantity) in allocation {
            inner.inventory.insert(
                (user.id.clone(), item),
                InventoryRecord {
                    user_id: user.id.clone(),
                    item,
                    quantity,
                    balance: quantity,
                    accessible: true,
                },
            );
        }
        inner.users.insert(user.id.clone(), user.clone());
        let stock = inner.stock(&user.id);
        Ok((user, stock))
    }

    fn find(&self, id: &str) -> Result<User> {
        Ok(self.lock()?.user(id)?.clone())
    }

    fn find_many(&self, ids: &[&str]) -> Result<HashMap<UserId, User>> {
        let inner = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.users.get(*id))
            .map(|u| (u.id.clone(), u.clone()))
            .collect())
    }

    fn update_location(&self, id: &str, latitude: f64, longitude: f64) -> Result<()> {
        let mut inner = self.lock()?;
        let user = inner
            .users
            .get_mut(id)
            .ok_or_else(|| Error::UserNotFound(id.to_string()))?;
        user.latitude = latitude;
        user.longitude = longitude;
        Ok(())
    }

    fn flags_against(&self, target_id: &str) -> Result<Vec<FlagRecord>> {
        let inner = self.lock()?;
        Ok(inner.flags.iter().filter(|f| f.target_id == target_id).cloned().collect())
    }

    fn record_flag(&self, flagger_id: &str, target_id: &str, policy: &InfectionPolicy) -> Result<FlagOutcome> {
        if flagger_id == target_id {
            return Ok(FlagOutcome::Ignored);
        }
        let mut inner = self.lock()?;
        inner.user(flagger_id)?;
        let status = inner.user(target_id)?.status();
        let prior = inner.flags.iter().filter(|f| f.target_id == target_id).count() as u32;

        let transition = policy.evaluate(status, prior);
        let mut inventory_locked = false;
        if transition == Transition::BecameInfected {
            if let Some(user) = inner.users.get_mut(target_id) {
                user.infected = true;
            }
            if policy.cascade_lockout {
                inner.lock_inventory(target_id);
                inventory_locked = true;
            }
        }
        inner.flags.push(FlagRecord {
            id: Uuid::new_v4().to_string(),
            flagger_id: flagger_id.to_string(),
            target_id: target_id.to_string(),
            created_at: now(),
        });
        Ok(FlagOutcome::Recorded {
            flag_count: prior + 1,
            transition,
            inventory_locked,
        })
    }

    fn set_infected(&self, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let user = inner
            .users
            .get_mut(id)
            .ok_or_else(|| Error::UserNotFound(id.to_string()))?;
        user.infected = true;
        Ok(())
    }
}

impl InventoryStore for MemoryStore {
    fn balances(&self, user_id: &str) -> Result<Stock> {
        Ok(self.lock()?.stock(user_id))
    }

    fn balances_many(&self, user_ids: &[&str]) -> Result<UserStock> {
        let inner = self.lock()?;
        let mut result = UserStock::new();
        for record in inner.inventory.values() {
            if user_ids.contains(&record.user_id.as_str()) {
                result
                    .entry(record.user_id.clone())
                    .or_default()
                    .insert(record.item, record.clone());
            }
        }
        Ok(result)
    }

    fn set_balance(&self, user_id: &str, item: Item, balance: u32) -> Result<()> {
        let mut inner = self.lock()?;
        let record = inner
            .inventory
            .get_mut(&(user_id.to_string(), item))
            .ok_or_else(|| Error::ItemNotInStock {
                user_id: user_id.to_string(),
                item,
            })?;
        record.balance = balance;
        Ok(())
    }

    fn lock_user(&self, user_id: &str) -> Result<()> {
        self.lock()?.lock_inventory(user_id);
        Ok(())
    }
}

impl TradeLedger for MemoryStore {
    fn append(&self, rows: &[Transaction]) -> Result<()> {
        check_batch(rows)?;
        self.lock()?.ledger.extend_from_slice(rows);
        Ok(())
    }

    fn settle(&self, settlement: &Settlement) -> Result<()> {
        check_batch(&settlement.rows)?;
        let mut inner = self.lock()?;
        for id in settlement.participants() {
            let user = inner.users.get(id).ok_or(Error::ParticipantMissing)?;
            if user.infected {
                return Err(Error::ParticipantInfected { user_id: id.to_string() });
            }
        }

        for debit in &settlement.debits {
            check_debit(inner.inventory.get(&(debit.user_id.clone(), debit.item)), debit)?;
        }

        // Compute every new balance before touching any of them.
        let mut updates = Vec::with_capacity(settlement.deltas.len());
        for d in &settlement.deltas {
            let key = (d.user_id.clone(), d.item);
            let record = inner.inventory.get(&key).ok_or_else(|| Error::ItemNotInStock {
                user_id: d.user_id.clone(),
                item: d.item,
            })?;
            if d.delta < 0 && !record.accessible {
                return Err(Error::ItemLocked {
                    user_id: d.user_id.clone(),
                    item: d.item,
                });
            }
            let next = i64::from(record.balance) + d.delta;
            if next < 0 {
                return Err(Error::InsufficientStock {
                    user_id: d.user_id.clone(),
                    item: d.item,
                    offered: d.delta.unsigned_abs(),
                    available: u64::from(record.balance),
                });
            }
            let next = u32::try_from(next)
                .map_err(|_| Error::Persistence(format!("{} balance of {} overflows", d.item, d.user_id)))?;
            updates.push((key, next));
        }

        for (key, balance) in updates {
            if let Some(record) = inner.inventory.get_mut(&key) {
                record.balance = balance;
            }
        }
        inner.ledger.extend_from_slice(&settlement.rows);
        Ok(())
    }

    fn history(&self, user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let inner = self.lock()?;
        let mut rows: Vec<Transaction> = inner
            .ledger
            .iter()
            .filter(|t| t.involves(user_id) && t.created_at >= start && t.created_at <= end)
            .cloned()
            .collect();
        // Stable: rows of one trade share a timestamp and keep append order.
        rows.sort_by_key(|t| t.created_at);
        Ok(rows)
    }

    fn details(&self, reference: &str) -> Result<Vec<Transaction>> {
        let inner = self.lock()?;
        Ok(inner.ledger.iter().filter(|t| t.reference == reference).cloned().collect())
    }
}

impl ReportSource for MemoryStore {
    fn population(&self) -> Result<Population> {
        let inner = self.lock()?;
        Ok(Population {
            total: inner.users.len() as u32,
            infected: inner.users.values().filter(|u| u.infected).count() as u32,
        })
    }

    fn item_totals(&self, accessible: bool) -> Result<BTreeMap<Item, u64>> {
        let inner = self.lock()?;
        let mut totals = BTreeMap::new();
        for record in inner.inventory.values().filter(|r| r.accessible == accessible) {
            *totals.entry(record.item).or_insert(0) += u64::from(record.balance);
        }
        Ok(totals)
    }
}
