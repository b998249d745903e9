use thiserror::Error;

use crate::item::Item;
use crate::model::UserId;

/// Coarse classification callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ValueMismatch,
    Participant,
    Infection,
    Stock,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid items in trade basket of user {user_id}")]
    InvalidBasket { user_id: UserId },

    #[error("invalid quantity of {item} in trade basket of user {user_id}")]
    InvalidQuantity { user_id: UserId, item: Item },

    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("value of the trade doesn't match: seller offers {seller} points, buyer offers {buyer}")]
    ValueMismatch { seller: u64, buyer: u64 },

    #[error("a participant has been removed or is invalid")]
    ParticipantMissing,

    #[error("you cannot trade with yourself")]
    SelfTrade,

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("participant {user_id} is infected, cannot proceed with transaction")]
    ParticipantInfected { user_id: UserId },

    #[error("invalid stock provided for user {user_id}")]
    InvalidStock { user_id: UserId },

    #[error("user {user_id} doesn't have the item in stock {item}")]
    ItemNotInStock { user_id: UserId, item: Item },

    #[error("user {user_id} doesn't have enough {item} to fulfill transaction: offered {offered}, available {available}")]
    InsufficientStock {
        user_id: UserId,
        item: Item,
        offered: u64,
        available: u64,
    },

    #[error("{item} inventory of user {user_id} is locked")]
    ItemLocked { user_id: UserId, item: Item },

    #[error("storage failure: {0}")]
    Persistence(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidBasket { .. } | Error::InvalidQuantity { .. } | Error::InvalidAllocation(_) => {
                ErrorKind::Validation
            }
            Error::ValueMismatch { .. } => ErrorKind::ValueMismatch,
            Error::ParticipantMissing | Error::SelfTrade | Error::UserNotFound(_) => ErrorKind::Participant,
            Error::ParticipantInfected { .. } => ErrorKind::Infection,
            Error::InvalidStock { .. }
            | Error::ItemNotInStock { .. }
            | Error::InsufficientStock { .. }
            | Error::ItemLocked { .. } => ErrorKind::Stock,
            Error::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Short stable tag for log records.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidBasket { .. } => "invalid_basket",
            Error::InvalidQuantity { .. } => "invalid_quantity",
            Error::InvalidAllocation(_) => "invalid_allocation",
            Error::ValueMismatch { .. } => "value_mismatch",
            Error::ParticipantMissing => "participant_missing",
            Error::SelfTrade => "self_trade",
            Error::UserNotFound(_) => "user_not_found",
            Error::ParticipantInfected { .. } => "participant_infected",
            Error::InvalidStock { .. } => "invalid_stock",
            Error::ItemNotInStock { .. } => "item_not_in_stock",
            Error::InsufficientStock { .. } => "insufficient_stock",
            Error::ItemLocked { .. } => "item_locked",
            Error::Persistence(_) => "persistence",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
