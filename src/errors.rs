//! Unified error type for the escrow engine.
//!
//! Variants are grouped the way callers need to react to them: missing
//! records, validation failures (wrong actor, wrong state, bad input), the
//! expected insufficient-funds outcome, slot reservation conflicts, and
//! storage faults that abort a single request.

use crate::entities::booking::BookingStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors returned by every engine operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Booking {id} not found")]
    BookingNotFound { id: i64 },

    #[error("Listing {id} not found")]
    ListingNotFound { id: i64 },

    #[error("Availability slot {id} not found")]
    SlotNotFound { id: i64 },

    #[error("Account '{key}' not found")]
    AccountNotFound { key: String },

    #[error("Invalid account handle '{handle}'")]
    InvalidHandle { handle: String },

    #[error("Account '{handle}' already exists")]
    AccountExists { handle: String },

    #[error("Account {account_id} is not a party to booking {booking_id}")]
    NotParticipant { account_id: i64, booking_id: i64 },

    #[error("Account {account_id} is not the teacher for booking {booking_id}")]
    NotTeacher { account_id: i64, booking_id: i64 },

    #[error("You cannot book your own listing")]
    OwnListing { listing_id: i64 },

    #[error("Listing {listing_id} does not belong to the teacher who owns slot {slot_id}")]
    SlotOwnerMismatch { listing_id: i64, slot_id: i64 },

    #[error("Account {account_id} does not own slot {slot_id}")]
    NotSlotOwner { account_id: i64, slot_id: i64 },

    #[error("Booking {booking_id} cannot move from {from} to {to} in its current state")]
    InvalidTransition {
        booking_id: i64,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: i64,
        balance: Decimal,
        required: Decimal,
    },

    #[error("Booking {booking_id} is confirmed but holds no escrow amount")]
    MissingEscrow { booking_id: i64 },

    #[error("Availability slot {id} is already reserved")]
    SlotAlreadyReserved { id: i64 },

    #[error("Availability slot {id} is in the past")]
    SlotExpired { id: i64 },

    #[error("Availability slot {id} is reserved and cannot be deleted")]
    SlotReserved { id: i64 },

    #[error("Overlapping availability slot exists")]
    SlotOverlap,

    #[error("Invalid time range: end must be after start")]
    InvalidTimeRange,

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Decimal },
}

impl Error {
    /// True when the error is the expected insufficient-funds outcome rather
    /// than a validation or storage failure.
    #[must_use]
    pub const fn is_insufficient_funds(&self) -> bool {
        matches!(self, Self::InsufficientFunds { .. })
    }

    /// True when the caller lost a race or acted on a booking in the wrong state.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::SlotAlreadyReserved { .. }
        )
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
