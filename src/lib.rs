pub mod config;
pub mod error;
pub mod infection;
pub mod item;
pub mod logging;
pub mod model;
pub mod reports;
pub mod store;
pub mod survivor;
pub mod trade;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use infection::{FlagOutcome, InfectionPolicy, InfectionService, InfectionStatus, Transition};
pub use item::Item;
pub use model::{Basket, FlagRecord, InventoryRecord, NewUser, Stock, TradeLine, Transaction, User, UserId};
pub use reports::ReportService;
pub use store::{InventoryStore, MemoryStore, ReportSource, SqliteStore, TradeLedger, UserDirectory};
pub use survivor::SurvivorService;
pub use trade::{Settlement, TradeService, TradeVerifier};
