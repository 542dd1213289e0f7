//! Ledger entry entity - one immutable DEBIT or CREDIT record.
//!
//! Two entries of equal amount and opposite direction make one transfer.
//! Rows are only ever inserted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a ledger entry relative to its owning account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum Direction {
    /// Tokens leave the account
    #[sea_orm(string_value = "DEBIT")]
    Debit,
    /// Tokens enter the account
    #[sea_orm(string_value = "CREDIT")]
    Credit,
}

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Account whose balance this entry changed
    pub account_id: i64,
    pub direction: Direction,
    /// Always positive, in minor units
    pub amount_minor: i64,
    /// Booking that caused the movement, if any
    pub booking_id: Option<i64>,
    pub memo: String,
    pub created_at: DateTimeUtc,
}

/// Defines relationships between LedgerEntry and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
    /// An entry may belong to a booking
    #[sea_orm(
        belongs_to = "super::booking::Entity",
        from = "Column::BookingId",
        to = "super::booking::Column::Id"
    )]
    Booking,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
