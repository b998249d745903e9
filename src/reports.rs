//! Aggregate reports over the survivor population and the inventory.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::item::Item;
use crate::logging::{log, obj, v_num, Domain, Level};
use crate::store::{Population, ReportSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurvivorReport {
    pub total: u32,
    pub clean: u32,
    pub percentage_clean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfectedReport {
    pub total: u32,
    pub infected: u32,
    pub percentage_infected: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceShare {
    pub item: Item,
    pub balance: u64,
    /// Integer share of `balance` per clean survivor.
    pub per_survivor: u64,
}

fn percentage(part: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(part) * 100.0 / f64::from(total)
}

/// Catalog-complete totals: items with no records still appear with 0.
fn with_catalog(totals: BTreeMap<Item, u64>) -> BTreeMap<Item, u64> {
    let mut full: BTreeMap<Item, u64> = Item::CATALOG.into_iter().map(|item| (item, 0)).collect();
    for (item, total) in totals.into_iter().filter(|(item, _)| item.is_known()) {
        full.insert(item, total);
    }
    full
}

pub struct ReportService<S> {
    store: Arc<S>,
}

impl<S: ReportSource> ReportService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn population(&self) -> Result<Population> {
        let population = self.store.population()?;
        log(
            Level::Debug,
            Domain::Report,
            "population",
            obj(&[
                ("total", v_num(f64::from(population.total))),
                ("infected", v_num(f64::from(population.infected))),
            ]),
        );
        Ok(population)
    }

    pub fn survivors(&self) -> Result<SurvivorReport> {
        let Population { total, infected } = self.population()?;
        let clean = total.saturating_sub(infected);
        Ok(SurvivorReport {
            total,
            clean,
            percentage_clean: percentage(clean, total),
        })
    }

    pub fn infected(&self) -> Result<InfectedReport> {
        let Population { total, infected } = self.population()?;
        Ok(InfectedReport {
            total,
            infected,
            percentage_infected: percentage(infected, total),
        })
    }

    /// Accessible balance per item.
    pub fn resources(&self) -> Result<BTreeMap<Item, u64>> {
        Ok(with_catalog(self.store.item_totals(true)?))
    }

    /// Point value locked away in inaccessible inventories.
    pub fn lost_points(&self) -> Result<u64> {
        let locked = self.store.item_totals(false)?;
        Ok(locked
            .into_iter()
            .map(|(item, balance)| u64::from(item.points()) * balance)
            .sum())
    }

    pub fn resource_sharing(&self) -> Result<Vec<ResourceShare>> {
        let clean = self.survivors()?.clean;
        Ok(self
            .resources()?
            .into_iter()
            .map(|(item, balance)| ResourceShare {
                item,
                balance,
                per_survivor: if clean == 0 { 0 } else { balance / u64::from(clean) },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        population: Population,
        accessible: BTreeMap<Item, u64>,
        locked: BTreeMap<Item, u64>,
    }

    impl ReportSource for Fixed {
        fn population(&self) -> Result<Population> {
            Ok(self.population)
        }

        fn item_totals(&self, accessible: bool) -> Result<BTreeMap<Item, u64>> {
            Ok(if accessible { self.accessible.clone() } else { self.locked.clone() })
        }
    }

    fn service(total: u32, infected: u32) -> ReportService<Fixed> {
        ReportService::new(Arc::new(Fixed {
            population: Population { total, infected },
            accessible: BTreeMap::from([(Item::Water, 10), (Item::Food, 7)]),
            locked: BTreeMap::from([(Item::Water, 2), (Item::Ammunition, 5)]),
        }))
    }

    #[test]
    fn test_survivor_percentages() {
        let reports = service(4, 1);
        let survivors = reports.survivors().unwrap();
        assert_eq!((survivors.total, survivors.clean), (4, 3));
        assert!((survivors.percentage_clean - 75.0).abs() < 1e-9);
        let infected = reports.infected().unwrap();
        assert_eq!(infected.infected, 1);
        assert!((infected.percentage_infected - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_population_reports_zero() {
        let reports = service(0, 0);
        assert_eq!(reports.survivors().unwrap().percentage_clean, 0.0);
        assert_eq!(reports.infected().unwrap().percentage_infected, 0.0);
        assert!(reports.resource_sharing().unwrap().iter().all(|s| s.per_survivor == 0));
    }

    #[test]
    fn test_resources_cover_catalog() {
        let resources = service(4, 1).resources().unwrap();
        assert_eq!(resources.len(), 4);
        assert_eq!(resources[&Item::Water], 10);
        assert_eq!(resources[&Item::Medication], 0);
    }

    #[test]
    fn test_lost_points() {
        // 2 water * 4 + 5 ammunition * 1
        assert_eq!(service(4, 1).lost_points().unwrap(), 13);
    }

    #[test]
    fn test_resource_sharing_divides_by_clean() {
        let shares = service(4, 1).resource_sharing().unwrap();
        let water = shares.iter().find(|s| s.item == Item::Water).unwrap();
        assert_eq!((water.balance, water.per_survivor), (10, 3));
        let food = shares.iter().find(|s| s.item == Item::Food).unwrap();
        assert_eq!(food.per_survivor, 2);
    }
}
