//! Population and resource reports over real stores.

use std::sync::Arc;

use zssn::store::{InventoryStore, ReportSource, UserDirectory};
use zssn::{InfectionPolicy, InfectionService, Item, MemoryStore, NewUser, ReportService, SqliteStore, User};

trait Store: UserDirectory + InventoryStore + ReportSource {}
impl<T: UserDirectory + InventoryStore + ReportSource> Store for T {}

fn register<S: Store>(store: &S, name: &str, allocation: &[(Item, u32)]) -> User {
    let mut new_user = NewUser::new(name);
    for (item, qty) in allocation {
        new_user = new_user.with(*item, *qty);
    }
    store.create_user(&new_user).unwrap().0
}

// ---------------------------------------------------------------------------
// Four survivors, one flagged to the threshold
// ---------------------------------------------------------------------------
fn one_in_four_infected<S: Store>(store: Arc<S>) {
    let a = register(&*store, "a", &[(Item::Water, 3), (Item::Food, 1)]);
    let b = register(&*store, "b", &[(Item::Water, 2), (Item::Ammunition, 10)]);
    let c = register(&*store, "c", &[(Item::Medication, 4)]);
    let d = register(&*store, "d", &[(Item::Water, 5), (Item::Ammunition, 3)]);

    let infection = InfectionService::new(Arc::clone(&store), InfectionPolicy::default());
    for flagger in [&a, &b, &c] {
        infection.flag(&flagger.id, &d.id).unwrap();
    }

    let reports = ReportService::new(Arc::clone(&store));
    let survivors = reports.survivors().unwrap();
    assert_eq!((survivors.total, survivors.clean), (4, 3));
    assert!((survivors.percentage_clean - 75.0).abs() < 1e-9);
    let infected = reports.infected().unwrap();
    assert_eq!((infected.total, infected.infected), (4, 1));
    assert!((infected.percentage_infected - 25.0).abs() < 1e-9);

    // d's inventory is locked and drops out of the shared resources.
    let resources = reports.resources().unwrap();
    assert_eq!(resources[&Item::Water], 5);
    assert_eq!(resources[&Item::Food], 1);
    assert_eq!(resources[&Item::Medication], 4);
    assert_eq!(resources[&Item::Ammunition], 10);

    // 5 water * 4 + 3 ammunition * 1
    assert_eq!(reports.lost_points().unwrap(), 23);

    let sharing = reports.resource_sharing().unwrap();
    let ammo = sharing.iter().find(|s| s.item == Item::Ammunition).unwrap();
    assert_eq!((ammo.balance, ammo.per_survivor), (10, 3));
}

#[test]
fn one_in_four_infected_memory() {
    one_in_four_infected(Arc::new(MemoryStore::new()));
}

#[test]
fn one_in_four_infected_sqlite() {
    one_in_four_infected(Arc::new(SqliteStore::open_in_memory().unwrap()));
}

#[test]
fn empty_population() {
    let reports = ReportService::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
    let survivors = reports.survivors().unwrap();
    assert_eq!((survivors.total, survivors.clean, survivors.percentage_clean), (0, 0, 0.0));
    assert_eq!(reports.lost_points().unwrap(), 0);
    assert!(reports.resources().unwrap().values().all(|v| *v == 0));
}
