use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::logging::log_trade_check;
use crate::model::{Basket, Stock, User, UserId};
use crate::store::{InventoryStore, UserDirectory};

/// Both baskets must carry the same point value, compared exactly.
pub fn check_value(seller: &Basket, buyer: &Basket) -> Result<()> {
    let (s, b) = (seller.value(), buyer.value());
    if s != b {
        return Err(Error::ValueMismatch { seller: s, buyer: b });
    }
    Ok(())
}

/// Resolve both parties from a batch lookup.
pub fn check_participants<'a>(
    seller_id: &str,
    buyer_id: &str,
    users: &'a HashMap<UserId, User>,
) -> Result<[&'a User; 2]> {
    if seller_id == buyer_id {
        return Err(Error::SelfTrade);
    }
    if users.len() < 2 {
        return Err(Error::ParticipantMissing);
    }
    match (users.get(seller_id), users.get(buyer_id)) {
        (Some(seller), Some(buyer)) => Ok([seller, buyer]),
        _ => Err(Error::ParticipantMissing),
    }
}

/// First infected participant, if any, fails the trade.
pub fn check_infection(users: &[&User]) -> Result<()> {
    if users.is_empty() {
        return Err(Error::ParticipantMissing);
    }
    match users.iter().find(|u| u.infected) {
        Some(user) => Err(Error::ParticipantInfected { user_id: user.id.clone() }),
        None => Ok(()),
    }
}

/// The party's own balances must cover everything it offers.
///
/// Repeated lines for one item are summed before comparing, and a locked
/// record covers nothing.
pub fn check_stock(stock: Option<&Stock>, basket: &Basket) -> Result<()> {
    let user_id = &basket.user_id;
    let stock = match stock {
        Some(stock) if !stock.is_empty() => stock,
        _ => return Err(Error::InvalidStock { user_id: user_id.clone() }),
    };
    if basket.items.is_empty() {
        return Err(Error::InvalidBasket { user_id: user_id.clone() });
    }
    if let Some(line) = basket.items.iter().find(|l| l.quantity == 0) {
        return Err(Error::InvalidQuantity {
            user_id: user_id.clone(),
            item: line.item,
        });
    }
    for (item, offered) in basket.totals() {
        let record = stock.get(&item).ok_or_else(|| Error::ItemNotInStock {
            user_id: user_id.clone(),
            item,
        })?;
        if !record.accessible {
            return Err(Error::ItemLocked {
                user_id: user_id.clone(),
                item,
            });
        }
        if u64::from(record.balance) < offered {
            return Err(Error::InsufficientStock {
                user_id: user_id.clone(),
                item,
                offered,
                available: u64::from(record.balance),
            });
        }
    }
    Ok(())
}

fn traced<T>(check: &str, seller: &Basket, buyer: &Basket, result: Result<T>) -> Result<T> {
    let outcome = match &result {
        Ok(_) => "pass",
        Err(err) => err.code(),
    };
    log_trade_check(check, outcome, &seller.user_id, &buyer.user_id);
    result
}

/// Read-only validation of a proposed exchange.
///
/// Checks run in a fixed order and stop at the first failure: value
/// equality, participant resolution, infection, then each party's stock
/// against a fresh snapshot.
pub struct TradeVerifier<S> {
    store: Arc<S>,
}

impl<S> Clone for TradeVerifier<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: UserDirectory + InventoryStore> TradeVerifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn verify(&self, seller: &Basket, buyer: &Basket) -> Result<()> {
        traced("value", seller, buyer, check_value(seller, buyer))?;

        let ids = [seller.user_id.as_str(), buyer.user_id.as_str()];
        let users = self.store.find_many(&ids)?;
        let parties = traced(
            "participants",
            seller,
            buyer,
            check_participants(&seller.user_id, &buyer.user_id, &users),
        )?;
        traced("infection", seller, buyer, check_infection(&parties))?;

        let stock = self.store.balances_many(&ids)?;
        traced("seller_stock", seller, buyer, check_stock(stock.get(&seller.user_id), seller))?;
        traced("buyer_stock", seller, buyer, check_stock(stock.get(&buyer.user_id), buyer))?;
        Ok(())
    }
}
