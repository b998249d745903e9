use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::item::Item;
use crate::logging::{log, log_balance_override, obj, v_str, Domain, Level};
use crate::model::{NewUser, Stock, User};
use crate::store::{InventoryStore, UserDirectory};

/// Initial quantity per catalog item. Items left out of the allocation get 0.
pub fn allocation_of(new_user: &NewUser) -> Result<BTreeMap<Item, u32>> {
    if new_user.name.trim().is_empty() {
        return Err(Error::InvalidAllocation("name is required".to_string()));
    }
    let mut allocation: BTreeMap<Item, u32> = Item::CATALOG.into_iter().map(|item| (item, 0)).collect();
    for line in &new_user.allocation {
        let slot = allocation
            .get_mut(&line.item)
            .ok_or_else(|| Error::InvalidAllocation(format!("unknown item {}", line.item)))?;
        *slot = slot
            .checked_add(line.quantity)
            .ok_or_else(|| Error::InvalidAllocation(format!("{} quantity overflows", line.item)))?;
    }
    Ok(allocation)
}

pub struct SurvivorService<S> {
    store: Arc<S>,
}

impl<S: UserDirectory + InventoryStore> SurvivorService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn register(&self, new_user: &NewUser) -> Result<(User, Stock)> {
        let (user, stock) = self.store.create_user(new_user)?;
        log(
            Level::Info,
            Domain::System,
            "registered",
            obj(&[("user_id", v_str(&user.id)), ("name", v_str(&user.name))]),
        );
        Ok((user, stock))
    }

    pub fn find(&self, id: &str) -> Result<User> {
        self.store.find(id)
    }

    pub fn update_location(&self, id: &str, latitude: f64, longitude: f64) -> Result<()> {
        self.store.update_location(id, latitude, longitude)
    }

    pub fn inventory(&self, id: &str) -> Result<Stock> {
        self.store.find(id)?;
        self.store.balances(id)
    }

    /// Overwrite one cell's balance. Trades never go through here.
    pub fn set_balance(&self, id: &str, item: Item, balance: u32) -> Result<()> {
        self.store.find(id)?;
        self.store.set_balance(id, item, balance)?;
        log_balance_override(id, item.as_str(), balance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_fills_catalog() {
        let allocation = allocation_of(&NewUser::new("ann").with(Item::Water, 5)).unwrap();
        assert_eq!(allocation.len(), 4);
        assert_eq!(allocation[&Item::Water], 5);
        assert_eq!(allocation[&Item::Food], 0);
    }

    #[test]
    fn test_allocation_sums_duplicates() {
        let allocation = allocation_of(&NewUser::new("ann").with(Item::Food, 2).with(Item::Food, 3)).unwrap();
        assert_eq!(allocation[&Item::Food], 5);
    }

    #[test]
    fn test_allocation_rejects_unknown_and_blank_name() {
        assert!(matches!(
            allocation_of(&NewUser::new("ann").with(Item::Unknown, 1)),
            Err(Error::InvalidAllocation(_))
        ));
        assert!(matches!(allocation_of(&NewUser::new("  ")), Err(Error::InvalidAllocation(_))));
    }

    #[test]
    fn test_register_and_inventory() {
        let survivors = SurvivorService::new(Arc::new(crate::store::MemoryStore::new()));
        let (user, _) = survivors
            .register(&NewUser::new("ann").at(10.0, 20.0).with(Item::Medication, 2))
            .unwrap();
        survivors.update_location(&user.id, -1.0, 3.5).unwrap();
        let found = survivors.find(&user.id).unwrap();
        assert_eq!((found.latitude, found.longitude), (-1.0, 3.5));

        survivors.set_balance(&user.id, Item::Medication, 7).unwrap();
        let stock = survivors.inventory(&user.id).unwrap();
        assert_eq!(stock[&Item::Medication].balance, 7);
        assert_eq!(stock[&Item::Medication].quantity, 2);
        assert!(matches!(survivors.inventory("ghost"), Err(Error::UserNotFound(_))));
    }
}
