//! Two-party trade verification and settlement.

pub mod settle;
pub mod verify;

pub use settle::{BalanceDelta, Debit, Settlement, TradeService};
pub use verify::{check_infection, check_participants, check_stock, check_value, TradeVerifier};
