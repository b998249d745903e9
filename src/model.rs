use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::infection::InfectionStatus;
use crate::item::Item;

pub type UserId = String;

/// Current time at the millisecond precision the stores keep.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis()).single().unwrap_or(now)
}

/// One (user, item) inventory cell.
///
/// `quantity` is the allocation made at onboarding and never changes;
/// `balance` moves with trades and must never go negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub user_id: UserId,
    pub item: Item,
    pub quantity: u32,
    pub balance: u32,
    pub accessible: bool,
}

/// A user's inventory keyed by item.
pub type Stock = BTreeMap<Item, InventoryRecord>;

/// Inventories of several users keyed by user id.
pub type UserStock = HashMap<UserId, Stock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeLine {
    pub item: Item,
    pub quantity: u32,
}

impl TradeLine {
    pub fn new(item: Item, quantity: u32) -> Self {
        Self { item, quantity }
    }

    pub fn value(&self) -> u64 {
        u64::from(self.item.points()) * u64::from(self.quantity)
    }
}

/// One party's side of a trade.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Basket {
    pub user_id: UserId,
    /// Set by settlement; `None` until the trade executes.
    #[serde(default)]
    pub reference: Option<String>,
    pub items: Vec<TradeLine>,
}

impl Basket {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            reference: None,
            items: Vec::new(),
        }
    }

    pub fn with(mut self, item: Item, quantity: u32) -> Self {
        self.items.push(TradeLine::new(item, quantity));
        self
    }

    /// Point value of the basket. Unknown items contribute nothing.
    pub fn value(&self) -> u64 {
        self.items.iter().map(TradeLine::value).sum()
    }

    /// Offered quantity per item, with repeated lines summed.
    pub fn totals(&self) -> BTreeMap<Item, u64> {
        let mut totals = BTreeMap::new();
        for line in &self.items {
            *totals.entry(line.item).or_insert(0) += u64::from(line.quantity);
        }
        totals
    }
}

/// Immutable ledger row: `quantity` of `item` moved from seller to buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub reference: String,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub item: Item,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn involves(&self, user_id: &str) -> bool {
        self.seller_id == user_id || self.buyer_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub infected: bool,
}

impl User {
    pub fn status(&self) -> InfectionStatus {
        InfectionStatus::from(self.infected)
    }
}

/// Onboarding request: profile plus the initial inventory allocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub allocation: Vec<TradeLine>,
}

impl NewUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn with(mut self, item: Item, quantity: u32) -> Self {
        self.allocation.push(TradeLine::new(item, quantity));
        self
    }
}

/// One flagging act. Repeats from the same flagger are separate records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub id: String,
    pub flagger_id: UserId,
    pub target_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basket_value() {
        let basket = Basket::new("a").with(Item::Water, 1).with(Item::Medication, 1);
        assert_eq!(basket.value(), 6);
        let ammo = Basket::new("b").with(Item::Ammunition, 6);
        assert_eq!(ammo.value(), 6);
    }

    #[test]
    fn test_unknown_items_are_worth_nothing() {
        let basket = Basket::new("a").with(Item::Unknown, 50).with(Item::Food, 2);
        assert_eq!(basket.value(), 6);
    }

    #[test]
    fn test_totals_sum_repeated_lines() {
        let basket = Basket::new("a")
            .with(Item::Water, 2)
            .with(Item::Food, 1)
            .with(Item::Water, 3);
        let totals = basket.totals();
        assert_eq!(totals.get(&Item::Water), Some(&5));
        assert_eq!(totals.get(&Item::Food), Some(&1));
        assert_eq!(totals.len(), 2);
    }
}
