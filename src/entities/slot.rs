//! Availability slot entity - a teacher-declared open time window.
//!
//! `reserved` is flipped only by the slot registry's conditional update, and
//! cleared again only when the booking holding the slot is rejected.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Availability slot database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "availability_slots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub teacher_id: i64,
    pub start_time: DateTimeUtc,
    pub end_time: DateTimeUtc,
    /// Timezone label the teacher declared the slot in (display only)
    pub time_zone: String,
    pub reserved: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
