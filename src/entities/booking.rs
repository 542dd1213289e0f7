//! Booking entity - a learner's request to take a listing at a given time.
//!
//! Bookings are never deleted. `status` only changes through the transition
//! table in [`BookingStatus::can_transition_to`].

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum BookingStatus {
    /// Requested by the learner, awaiting the teacher
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Accepted; the price sits in escrow
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    /// Escrow released to the teacher
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Declared for future use; no exposed operation reaches it
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    /// Funds frozen in escrow until arbitration
    #[sea_orm(string_value = "IN_DISPUTE")]
    InDispute,
}

impl BookingStatus {
    /// The single table of legal transitions.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Rejected)
                | (
                    Self::Confirmed,
                    Self::Completed | Self::InDispute | Self::Cancelled
                )
        )
    }

    /// No transition leaves a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Cancelled | Self::InDispute
        )
    }

    /// Upper-case wire name, identical to the stored value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::InDispute => "IN_DISPUTE",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub learner_id: i64,
    pub listing_id: i64,
    /// Copied from the listing at request time
    pub teacher_id: i64,
    /// Slot consumed by this booking, if it was booked from one
    pub slot_id: Option<i64>,
    /// Scheduled session time; the reconciler's grace window counts from here
    pub booking_time: DateTimeUtc,
    pub status: BookingStatus,
    /// Amount moved into escrow on acceptance, in minor units
    pub escrow_amount_minor: Option<i64>,
    /// Video room assigned on acceptance
    pub session_room_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::listing::Entity",
        from = "Column::ListingId",
        to = "super::listing::Column::Id"
    )]
    Listing,
    /// Escrow and release entries produced by this booking
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    LedgerEntries,
}

impl Related<super::listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Listing.def()
    }
}

impl Related<super::ledger_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
