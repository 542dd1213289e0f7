//! Account entity - a token holder, either a user or a system account.
//!
//! `balance_minor` is a cached projection of the ledger, stored in hundredths
//! of a token. It is only ever changed by ledger postings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Unique identifier for the account
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Login handle resolved by the identity collaborator (e.g. an e-mail)
    #[sea_orm(unique)]
    pub handle: String,
    /// Human-readable name used in notifications
    pub display_name: String,
    /// Current balance in minor units (hundredths of a token)
    pub balance_minor: i64,
    /// System accounts (escrow) cannot act as learners or teachers
    pub is_system: bool,
    /// When the account was opened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One account has many ledger entries
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    LedgerEntries,
}

impl Related<super::ledger_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
