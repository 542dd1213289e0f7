//! Slot registry - teacher availability windows and their reservation guard.
//!
//! Reserving a slot is one conditional `UPDATE`
//! (`reserved = true WHERE id = ? AND NOT reserved AND end_time > now`), so two
//! callers racing for the same slot can never both win. Reserved slots cannot
//! be deleted; only a booking rejection releases them again.

use crate::{
    entities::{Slot, slot},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// Timezone label used when the teacher does not supply one.
pub const DEFAULT_TIME_ZONE: &str = "UTC";

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    AlreadyReserved,
    Expired,
    NotFound,
}

impl ReserveOutcome {
    /// Maps a failed attempt to the error reported to the caller.
    pub fn into_result(self, slot_id: i64) -> Result<()> {
        match self {
            Self::Reserved => Ok(()),
            Self::AlreadyReserved => Err(Error::SlotAlreadyReserved { id: slot_id }),
            Self::Expired => Err(Error::SlotExpired { id: slot_id }),
            Self::NotFound => Err(Error::SlotNotFound { id: slot_id }),
        }
    }
}

/// Atomically reserves an open slot.
#[instrument(skip(conn))]
pub async fn try_reserve<C>(conn: &C, slot_id: i64, now: DateTime<Utc>) -> Result<ReserveOutcome>
where
    C: ConnectionTrait,
{
    let result = Slot::update_many()
        .col_expr(slot::Column::Reserved, Expr::value(true))
        .filter(slot::Column::Id.eq(slot_id))
        .filter(slot::Column::Reserved.eq(false))
        .filter(slot::Column::EndTime.gt(now))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        debug!("Reserved slot {}", slot_id);
        return Ok(ReserveOutcome::Reserved);
    }

    let outcome = match Slot::find_by_id(slot_id).one(conn).await? {
        None => ReserveOutcome::NotFound,
        Some(existing) if existing.reserved => ReserveOutcome::AlreadyReserved,
        Some(_) => ReserveOutcome::Expired,
    };
    debug!("Slot {} not reserved: {:?}", slot_id, outcome);
    Ok(outcome)
}

/// Clears the reservation of a slot whose booking failed.
pub async fn release_reservation<C>(conn: &C, slot_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    Slot::update_many()
        .col_expr(slot::Column::Reserved, Expr::value(false))
        .filter(slot::Column::Id.eq(slot_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Declares a new open slot for `teacher_id`.
///
/// The window must be non-empty and must not overlap another unreserved slot
/// of the same teacher.
#[instrument(skip(db))]
pub async fn create_slot(
    db: &DatabaseConnection,
    teacher_id: i64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    time_zone: Option<&str>,
) -> Result<slot::Model> {
    if end_time <= start_time {
        return Err(Error::InvalidTimeRange);
    }

    let txn = db.begin().await?;

    let overlapping = Slot::find()
        .filter(slot::Column::TeacherId.eq(teacher_id))
        .filter(slot::Column::Reserved.eq(false))
        .filter(slot::Column::StartTime.lt(end_time))
        .filter(slot::Column::EndTime.gt(start_time))
        .one(&txn)
        .await?;
    if overlapping.is_some() {
        return Err(Error::SlotOverlap);
    }

    let created = slot::ActiveModel {
        teacher_id: Set(teacher_id),
        start_time: Set(start_time),
        end_time: Set(end_time),
        time_zone: Set(time_zone
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .unwrap_or(DEFAULT_TIME_ZONE)
            .to_string()),
        reserved: Set(false),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!("Teacher {} opened slot {}", teacher_id, created.id);
    Ok(created)
}

/// Deletes an unreserved slot owned by `teacher_id`.
#[instrument(skip(db))]
pub async fn delete_slot(db: &DatabaseConnection, teacher_id: i64, slot_id: i64) -> Result<()> {
    let result = Slot::delete_many()
        .filter(slot::Column::Id.eq(slot_id))
        .filter(slot::Column::TeacherId.eq(teacher_id))
        .filter(slot::Column::Reserved.eq(false))
        .exec(db)
        .await?;

    if result.rows_affected == 1 {
        info!("Teacher {} deleted slot {}", teacher_id, slot_id);
        return Ok(());
    }

    match Slot::find_by_id(slot_id).one(db).await? {
        None => Err(Error::SlotNotFound { id: slot_id }),
        Some(existing) if existing.teacher_id != teacher_id => Err(Error::NotSlotOwner {
            account_id: teacher_id,
            slot_id,
        }),
        Some(_) => Err(Error::SlotReserved { id: slot_id }),
    }
}

pub async fn get_slot_by_id<C>(db: &C, slot_id: i64) -> Result<Option<slot::Model>>
where
    C: ConnectionTrait,
{
    Slot::find_by_id(slot_id).one(db).await.map_err(Into::into)
}

/// Unreserved slots of a teacher that have not ended yet, earliest first.
pub async fn list_open_slots(
    db: &DatabaseConnection,
    teacher_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<slot::Model>> {
    Slot::find()
        .filter(slot::Column::TeacherId.eq(teacher_id))
        .filter(slot::Column::Reserved.eq(false))
        .filter(slot::Column::EndTime.gt(now))
        .order_by_asc(slot::Column::StartTime)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every slot of a teacher, earliest first.
pub async fn list_slots(db: &DatabaseConnection, teacher_id: i64) -> Result<Vec<slot::Model>> {
    Slot::find()
        .filter(slot::Column::TeacherId.eq(teacher_id))
        .order_by_asc(slot::Column::StartTime)
        .all(db)
        .await
        .map_err(Into::into)
}
