use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::item::Item;
use crate::logging::{log_ledger_row, log_settlement, log_trade_rejected, v_str, ProfileScope};
use crate::model::{now, Basket, Transaction, UserId};
use crate::store::{InventoryStore, TradeLedger, UserDirectory};
use crate::trade::verify::TradeVerifier;

/// Net change to one (user, item) cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    pub user_id: UserId,
    pub item: Item,
    pub delta: i64,
}

/// Gross amount of one item a party gives away, before netting against
/// what it receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debit {
    pub user_id: UserId,
    pub item: Item,
    pub quantity: u64,
}

/// Everything one trade writes: its ledger rows and the balance deltas.
///
/// Deltas are folded per cell, so a party that both gives and receives the
/// same item gets a single net write instead of two read-modify-writes.
/// `debits` keeps the gross amounts, which the store re-checks against the
/// live balance before applying any delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub reference: String,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub rows: Vec<Transaction>,
    pub debits: Vec<Debit>,
    pub deltas: Vec<BalanceDelta>,
}

impl Settlement {
    pub fn plan(seller: &Basket, buyer: &Basket, reference: String, created_at: DateTime<Utc>) -> Self {
        let mut rows = Vec::with_capacity(seller.items.len() + buyer.items.len());
        let mut net: BTreeMap<(UserId, Item), i64> = BTreeMap::new();
        let mut gross: BTreeMap<(UserId, Item), u64> = BTreeMap::new();

        for (giver, taker) in [(seller, buyer), (buyer, seller)] {
            for line in &giver.items {
                rows.push(Transaction {
                    id: Uuid::new_v4().to_string(),
                    reference: reference.clone(),
                    seller_id: giver.user_id.clone(),
                    buyer_id: taker.user_id.clone(),
                    item: line.item,
                    quantity: line.quantity,
                    created_at,
                });
                *gross.entry((giver.user_id.clone(), line.item)).or_insert(0) += u64::from(line.quantity);
                let qty = i64::from(line.quantity);
                *net.entry((giver.user_id.clone(), line.item)).or_insert(0) -= qty;
                *net.entry((taker.user_id.clone(), line.item)).or_insert(0) += qty;
            }
        }

        let debits = gross
            .into_iter()
            .map(|((user_id, item), quantity)| Debit { user_id, item, quantity })
            .collect();
        let deltas = net
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|((user_id, item), delta)| BalanceDelta { user_id, item, delta })
            .collect();

        Self {
            reference,
            seller_id: seller.user_id.clone(),
            buyer_id: buyer.user_id.clone(),
            rows,
            debits,
            deltas,
        }
    }

    pub fn participants(&self) -> [&str; 2] {
        [self.seller_id.as_str(), self.buyer_id.as_str()]
    }
}

/// Verifies and settles two-party trades.
pub struct TradeService<S> {
    store: Arc<S>,
    verifier: TradeVerifier<S>,
}

impl<S: UserDirectory + InventoryStore + TradeLedger> TradeService<S> {
    pub fn new(store: Arc<S>) -> Self {
        let verifier = TradeVerifier::new(Arc::clone(&store));
        Self { store, verifier }
    }

    pub fn verify(&self, seller: &Basket, buyer: &Basket) -> Result<()> {
        self.verifier.verify(seller, buyer)
    }

    /// Verify, then write the ledger rows and both parties' balance changes
    /// as one unit. On success both baskets carry the trade reference, which
    /// is also returned.
    pub fn execute(&self, seller: &mut Basket, buyer: &mut Basket) -> Result<String> {
        let _scope = ProfileScope::with_context(
            "settle",
            &[("seller_id", v_str(&seller.user_id)), ("buyer_id", v_str(&buyer.user_id))],
        );
        let settlement = match self.settle(seller, buyer) {
            Ok(settlement) => settlement,
            Err(err) => {
                log_trade_rejected(&seller.user_id, &buyer.user_id, err.code(), &err.to_string());
                return Err(err);
            }
        };

        for row in &settlement.rows {
            log_ledger_row(&row.reference, &row.seller_id, &row.buyer_id, row.item.as_str(), row.quantity);
        }
        log_settlement(
            &settlement.reference,
            &settlement.seller_id,
            &settlement.buyer_id,
            settlement.rows.len(),
            settlement.deltas.len(),
        );

        seller.reference = Some(settlement.reference.clone());
        buyer.reference = Some(settlement.reference.clone());
        Ok(settlement.reference)
    }

    fn settle(&self, seller: &Basket, buyer: &Basket) -> Result<Settlement> {
        self.verifier.verify(seller, buyer)?;
        let settlement = Settlement::plan(seller, buyer, Uuid::new_v4().to_string(), now());
        self.store.settle(&settlement)?;
        Ok(settlement)
    }

    pub fn history(&self, user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Transaction>> {
        self.store.history(user_id, start, end)
    }

    pub fn details(&self, reference: &str) -> Result<Vec<Transaction>> {
        self.store.details(reference)
    }
}
