//! Flagging, the Clean -> Infected transition and inventory lockout.

use std::sync::Arc;

use zssn::store::{InventoryStore, TradeLedger, UserDirectory};
use zssn::{
    Basket, Error, FlagOutcome, InfectionPolicy, InfectionService, Item, MemoryStore, NewUser, SqliteStore,
    TradeService, Transition, User,
};

trait Store: UserDirectory + InventoryStore + TradeLedger {}
impl<T: UserDirectory + InventoryStore + TradeLedger> Store for T {}

fn register<S: Store>(store: &S, name: &str) -> User {
    store
        .create_user(&NewUser::new(name).with(Item::Water, 2).with(Item::Ammunition, 8))
        .unwrap()
        .0
}

fn all_locked<S: Store>(store: &S, user: &User) -> bool {
    store.balances(&user.id).unwrap().values().all(|r| !r.accessible)
}

// ---------------------------------------------------------------------------
// Third distinct flag flips the target, and it never flips back
// ---------------------------------------------------------------------------
fn flips_at_third_flag<S: Store>(store: Arc<S>) {
    let target = register(&*store, "target");
    let flaggers: Vec<User> = (0..4).map(|i| register(&*store, &format!("f{i}"))).collect();
    let infection = InfectionService::new(Arc::clone(&store), InfectionPolicy::default());

    let first = infection.flag(&flaggers[0].id, &target.id).unwrap();
    assert_eq!(
        first,
        FlagOutcome::Recorded {
            flag_count: 1,
            transition: Transition::Unchanged(zssn::InfectionStatus::Clean),
            inventory_locked: false
        }
    );
    assert!(!infection.flag(&flaggers[1].id, &target.id).unwrap().became_infected());
    assert!(!infection.is_infected(&target.id).unwrap());

    let third = infection.flag(&flaggers[2].id, &target.id).unwrap();
    assert!(third.became_infected());
    assert!(infection.is_infected(&target.id).unwrap());
    assert!(all_locked(&*store, &target));

    // Further flags are recorded but do not transition again.
    let fourth = infection.flag(&flaggers[3].id, &target.id).unwrap();
    assert!(!fourth.became_infected());
    assert!(infection.is_infected(&target.id).unwrap());
    assert_eq!(infection.flag_count(&target.id).unwrap(), 4);
}

#[test]
fn flips_at_third_flag_memory() {
    flips_at_third_flag(Arc::new(MemoryStore::new()));
}

#[test]
fn flips_at_third_flag_sqlite() {
    flips_at_third_flag(Arc::new(SqliteStore::open_in_memory().unwrap()));
}

// ---------------------------------------------------------------------------
// Self-flags are ignored, repeat flags from one flagger all count
// ---------------------------------------------------------------------------
fn self_and_repeat_flags<S: Store>(store: Arc<S>) {
    let target = register(&*store, "target");
    let flagger = register(&*store, "flagger");
    let infection = InfectionService::new(Arc::clone(&store), InfectionPolicy::default());

    for _ in 0..5 {
        assert_eq!(infection.flag(&target.id, &target.id).unwrap(), FlagOutcome::Ignored);
    }
    assert_eq!(infection.flag_count(&target.id).unwrap(), 0);
    assert!(!infection.is_infected(&target.id).unwrap());

    infection.flag(&flagger.id, &target.id).unwrap();
    infection.flag(&flagger.id, &target.id).unwrap();
    assert!(infection.flag(&flagger.id, &target.id).unwrap().became_infected());

    let flags = store.flags_against(&target.id).unwrap();
    assert_eq!(flags.len(), 3);
    assert!(flags.iter().all(|f| f.flagger_id == flagger.id));
}

#[test]
fn self_and_repeat_flags_memory() {
    self_and_repeat_flags(Arc::new(MemoryStore::new()));
}

#[test]
fn self_and_repeat_flags_sqlite() {
    self_and_repeat_flags(Arc::new(SqliteStore::open_in_memory().unwrap()));
}

// ---------------------------------------------------------------------------
// Without cascade the lockout is a separate explicit step
// ---------------------------------------------------------------------------
fn two_step_lockout<S: Store>(store: Arc<S>) {
    let target = register(&*store, "target");
    let flagger = register(&*store, "flagger");
    let policy = InfectionPolicy {
        threshold: 2,
        cascade_lockout: false,
    };
    let infection = InfectionService::new(Arc::clone(&store), policy);

    infection.flag(&flagger.id, &target.id).unwrap();
    let outcome = infection.flag(&flagger.id, &target.id).unwrap();
    assert_eq!(
        outcome,
        FlagOutcome::Recorded {
            flag_count: 2,
            transition: Transition::BecameInfected,
            inventory_locked: false
        }
    );
    assert!(store.balances(&target.id).unwrap().values().all(|r| r.accessible));

    infection.lock_inventory(&target.id).unwrap();
    assert!(all_locked(&*store, &target));
    assert!(matches!(infection.lock_inventory("ghost"), Err(Error::UserNotFound(_))));
}

#[test]
fn two_step_lockout_memory() {
    two_step_lockout(Arc::new(MemoryStore::new()));
}

#[test]
fn two_step_lockout_sqlite() {
    two_step_lockout(Arc::new(SqliteStore::open_in_memory().unwrap()));
}

// ---------------------------------------------------------------------------
// Unknown parties are rejected without recording anything
// ---------------------------------------------------------------------------
fn unknown_parties<S: Store>(store: Arc<S>) {
    let target = register(&*store, "target");
    let infection = InfectionService::new(Arc::clone(&store), InfectionPolicy::default());

    assert!(matches!(infection.flag("ghost", &target.id), Err(Error::UserNotFound(_))));
    assert!(matches!(infection.flag(&target.id, "ghost"), Err(Error::UserNotFound(_))));
    assert_eq!(infection.flag_count(&target.id).unwrap(), 0);
}

#[test]
fn unknown_parties_memory() {
    unknown_parties(Arc::new(MemoryStore::new()));
}

#[test]
fn unknown_parties_sqlite() {
    unknown_parties(Arc::new(SqliteStore::open_in_memory().unwrap()));
}

// ---------------------------------------------------------------------------
// Infected survivors cannot trade, on either side
// ---------------------------------------------------------------------------
fn infected_cannot_trade<S: Store>(store: Arc<S>) {
    let sick = register(&*store, "sick");
    let healthy = register(&*store, "healthy");
    let flaggers: Vec<User> = (0..3).map(|i| register(&*store, &format!("f{i}"))).collect();
    let infection = InfectionService::new(Arc::clone(&store), InfectionPolicy::default());
    for flagger in &flaggers {
        infection.flag(&flagger.id, &sick.id).unwrap();
    }

    let trades = TradeService::new(Arc::clone(&store));
    let mut seller = Basket::new(healthy.id.clone()).with(Item::Water, 1);
    let mut buyer = Basket::new(sick.id.clone()).with(Item::Ammunition, 4);
    let err = trades.execute(&mut seller, &mut buyer).unwrap_err();
    assert_eq!(err, Error::ParticipantInfected { user_id: sick.id.clone() });

    let mut seller = Basket::new(sick.id.clone()).with(Item::Water, 1);
    let mut buyer = Basket::new(healthy.id.clone()).with(Item::Ammunition, 4);
    let err = trades.execute(&mut seller, &mut buyer).unwrap_err();
    assert_eq!(err, Error::ParticipantInfected { user_id: sick.id.clone() });

    assert_eq!(store.balances(&healthy.id).unwrap()[&Item::Water].balance, 2);
    assert_eq!(store.balances(&sick.id).unwrap()[&Item::Ammunition].balance, 8);
}

#[test]
fn infected_cannot_trade_memory() {
    infected_cannot_trade(Arc::new(MemoryStore::new()));
}

#[test]
fn infected_cannot_trade_sqlite() {
    infected_cannot_trade(Arc::new(SqliteStore::open_in_memory().unwrap()));
}
