//! Booking state machine - the lifecycle of a booking and the escrow
//! movements tied to its transitions.
//!
//! ```text
//! PENDING ──accept──▶ CONFIRMED ──complete / auto-release──▶ COMPLETED
//!    │                    │
//!    └──reject───▶ REJECTED └──open_dispute──▶ IN_DISPUTE
//! ```
//!
//! Every transition runs in one database transaction whose first write is a
//! compare-and-set on the booking's status (`UPDATE ... WHERE status = from`).
//! Whoever loses a race on the same booking sees zero affected rows and gets
//! [`Error::InvalidTransition`]; funds move only after the status write
//! succeeded and in the same transaction, so they move at most once per
//! transition.

use crate::{
    core::{
        account::get_account_by_id,
        amount::{from_minor, to_minor},
        clock::Clock,
        events::{BookingEvent, BookingEventKind, Notifier},
        ledger::{self, Posting},
        listing::{ListingInfo, ListingLookup},
        slot,
    },
    entities::{Booking, BookingStatus, booking},
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{DatabaseTransaction, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Extra columns written together with a status change.
#[derive(Debug, Default)]
struct TransitionWrites {
    escrow_amount_minor: Option<i64>,
    session_room_id: Option<String>,
}

/// Entry point for every booking operation.
///
/// Cheap to clone; clones share the database pool and collaborators.
#[derive(Clone)]
pub struct BookingEngine {
    db: DatabaseConnection,
    listings: Arc<dyn ListingLookup>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    escrow_account_id: i64,
}

impl BookingEngine {
    /// Wires the engine to its storage and collaborators.
    ///
    /// `escrow_account_id` must name the system escrow account
    /// (see [`crate::core::account::ensure_system_account`]).
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        listings: Arc<dyn ListingLookup>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        escrow_account_id: i64,
    ) -> Self {
        Self {
            db,
            listings,
            notifier,
            clock,
            escrow_account_id,
        }
    }

    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    #[must_use]
    pub const fn escrow_account_id(&self) -> i64 {
        self.escrow_account_id
    }

    /// Current time according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates a PENDING booking for `listing_id`, optionally consuming a slot.
    ///
    /// With a slot, the slot must belong to the listing's teacher and is
    /// reserved in the same transaction that inserts the booking; the session
    /// time is the slot's start. Without one, the session time is now.
    #[instrument(skip(self))]
    pub async fn request_booking(
        &self,
        learner_id: i64,
        listing_id: i64,
        slot_id: Option<i64>,
    ) -> Result<booking::Model> {
        let listing = self.require_listing(listing_id).await?;
        if listing.teacher_id == learner_id {
            return Err(Error::OwnListing { listing_id });
        }
        let learner = get_account_by_id(&self.db, learner_id)
            .await?
            .filter(|account| !account.is_system)
            .ok_or_else(|| Error::AccountNotFound {
                key: learner_id.to_string(),
            })?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let booking_time = match slot_id {
            Some(slot_id) => {
                let requested = slot::get_slot_by_id(&txn, slot_id)
                    .await?
                    .ok_or(Error::SlotNotFound { id: slot_id })?;
                if requested.teacher_id != listing.teacher_id {
                    return Err(Error::SlotOwnerMismatch {
                        listing_id,
                        slot_id,
                    });
                }
                slot::try_reserve(&txn, slot_id, now)
                    .await?
                    .into_result(slot_id)?;
                requested.start_time
            }
            None => now,
        };

        let created = booking::ActiveModel {
            learner_id: Set(learner_id),
            listing_id: Set(listing_id),
            teacher_id: Set(listing.teacher_id),
            slot_id: Set(slot_id),
            booking_time: Set(booking_time),
            status: Set(BookingStatus::Pending),
            escrow_amount_minor: Set(None),
            session_room_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        info!(
            "Learner {} requested booking {} for listing {}",
            learner_id, created.id, listing_id
        );

        let body = if slot_id.is_some() {
            format!(
                "{} requested your available slot for the session: {}",
                learner.display_name, listing.title
            )
        } else {
            format!(
                "{} wants to book your session: {}",
                learner.display_name, listing.title
            )
        };
        self.notify(
            BookingEventKind::BookingRequested,
            &created,
            created.teacher_id,
            Some(learner_id),
            "New Booking Request",
            body,
        );

        Ok(created)
    }

    /// Teacher accepts a PENDING booking and the price moves into escrow.
    ///
    /// If the learner cannot cover the price the booking is rejected instead
    /// and [`Error::InsufficientFunds`] is returned; no funds move in that case.
    #[instrument(skip(self))]
    pub async fn accept(&self, booking_id: i64, acting_teacher: i64) -> Result<booking::Model> {
        let current = self.require_booking(booking_id).await?;
        ensure_teacher(&current, acting_teacher)?;
        ensure_transition(&current, BookingStatus::Confirmed)?;

        let listing = self.require_listing(current.listing_id).await?;
        let price = listing.token_price;
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        advance_status(
            &txn,
            booking_id,
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            TransitionWrites {
                escrow_amount_minor: Some(to_minor(price)?),
                session_room_id: Some(Uuid::new_v4().to_string()),
            },
            now,
        )
        .await?;

        let memo = format!("Escrow for booking #{booking_id}");
        match ledger::transfer(
            &txn,
            current.learner_id,
            self.escrow_account_id,
            price,
            Some(booking_id),
            &memo,
            now,
        )
        .await
        {
            Ok(_) => {}
            Err(shortfall @ Error::InsufficientFunds { .. }) => {
                txn.rollback().await?;
                return self.reject_for_shortfall(&current, &listing, shortfall).await;
            }
            Err(other) => return Err(other),
        }

        txn.commit().await?;
        info!(
            "Booking {} confirmed; {} moved from learner {} to escrow",
            booking_id, price, current.learner_id
        );

        let confirmed = self.require_booking(booking_id).await?;
        let teacher_name = self.display_name(acting_teacher).await;
        self.notify(
            BookingEventKind::BookingAccepted,
            &confirmed,
            confirmed.learner_id,
            Some(acting_teacher),
            "Booking Accepted!",
            format!(
                "{teacher_name} has accepted your request for '{}'.",
                listing.title
            ),
        );
        Ok(confirmed)
    }

    /// Teacher declines a PENDING booking. No funds move; a reserved slot is
    /// released.
    #[instrument(skip(self))]
    pub async fn reject(&self, booking_id: i64, acting_teacher: i64) -> Result<booking::Model> {
        let current = self.require_booking(booking_id).await?;
        ensure_teacher(&current, acting_teacher)?;
        ensure_transition(&current, BookingStatus::Rejected)?;

        self.mark_rejected(&current).await?;
        info!("Booking {} rejected by teacher {}", booking_id, acting_teacher);

        let rejected = self.require_booking(booking_id).await?;
        let teacher_name = self.display_name(acting_teacher).await;
        let title = self.listing_title(rejected.listing_id).await;
        self.notify(
            BookingEventKind::BookingRejected,
            &rejected,
            rejected.learner_id,
            Some(acting_teacher),
            "Booking Rejected",
            format!("{teacher_name} has rejected your request for '{title}'."),
        );
        Ok(rejected)
    }

    /// Either party marks a CONFIRMED booking complete, releasing escrow to
    /// the teacher.
    #[instrument(skip(self))]
    pub async fn complete(&self, booking_id: i64, acting_user: i64) -> Result<booking::Model> {
        let current = self.require_booking(booking_id).await?;
        ensure_participant(&current, acting_user)?;
        ensure_transition(&current, BookingStatus::Completed)?;

        let amount = self.release(&current).await?;
        info!(
            "Booking {} completed by {}; {} released to teacher {}",
            booking_id, acting_user, amount, current.teacher_id
        );

        let completed = self.require_booking(booking_id).await?;
        let title = self.listing_title(completed.listing_id).await;
        let learner_name = self.display_name(completed.learner_id).await;
        self.notify(
            BookingEventKind::BookingCompleted,
            &completed,
            completed.teacher_id,
            Some(acting_user),
            "Session Completed & Funds Released",
            format!(
                "Your session with {learner_name} is complete. {amount} tokens have been added."
            ),
        );
        self.notify(
            BookingEventKind::BookingCompleted,
            &completed,
            completed.learner_id,
            Some(acting_user),
            "Session Complete!",
            format!("How was your session for '{title}'? Please consider leaving a review."),
        );
        Ok(completed)
    }

    /// Either party flags a CONFIRMED booking as disputed. Funds stay frozen
    /// in escrow.
    #[instrument(skip(self))]
    pub async fn open_dispute(&self, booking_id: i64, acting_user: i64) -> Result<booking::Model> {
        let current = self.require_booking(booking_id).await?;
        ensure_participant(&current, acting_user)?;
        ensure_transition(&current, BookingStatus::InDispute)?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;
        advance_status(
            &txn,
            booking_id,
            BookingStatus::Confirmed,
            BookingStatus::InDispute,
            TransitionWrites::default(),
            now,
        )
        .await?;
        txn.commit().await?;
        warn!("Booking {} disputed by {}", booking_id, acting_user);

        let disputed = self.require_booking(booking_id).await?;
        let other_party = if acting_user == disputed.learner_id {
            disputed.teacher_id
        } else {
            disputed.learner_id
        };
        let actor_name = self.display_name(acting_user).await;
        let title = self.listing_title(disputed.listing_id).await;
        self.notify(
            BookingEventKind::DisputeOpened,
            &disputed,
            other_party,
            Some(acting_user),
            "Booking Disputed",
            format!(
                "{actor_name} has opened a dispute for the session: '{title}'. An admin will review it."
            ),
        );
        Ok(disputed)
    }

    /// Releases escrow for every CONFIRMED booking whose session time is
    /// older than `threshold`, returning how many were released.
    ///
    /// Bookings that leave CONFIRMED while the scan runs are skipped by the
    /// same status guard used in [`Self::complete`], so running this twice
    /// never pays a teacher twice.
    #[instrument(skip(self))]
    pub async fn run_reconciliation(&self, threshold: Duration) -> Result<usize> {
        let stale = self.stale_confirmed(threshold).await?;
        Ok(self.release_stale(&stale).await)
    }

    /// CONFIRMED bookings whose session time is older than `threshold`.
    async fn stale_confirmed(&self, threshold: Duration) -> Result<Vec<booking::Model>> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(threshold) else {
            return Ok(Vec::new());
        };
        Booking::find()
            .filter(booking::Column::Status.eq(BookingStatus::Confirmed))
            .filter(booking::Column::BookingTime.lt(cutoff))
            .order_by_asc(booking::Column::BookingTime)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Auto-releases each candidate, skipping those that already left
    /// CONFIRMED.
    async fn release_stale(&self, stale: &[booking::Model]) -> usize {
        let mut released = 0;
        for candidate in stale {
            match self.auto_release(candidate).await {
                Ok(()) => released += 1,
                Err(Error::InvalidTransition { from, .. }) => {
                    debug!(
                        "Booking {} moved to {} before auto-release; skipping",
                        candidate.id, from
                    );
                }
                Err(err) => error!("Failed to auto-release booking {}: {}", candidate.id, err),
            }
        }

        info!("Auto-released escrow for {} booking(s)", released);
        released
    }

    async fn auto_release(&self, candidate: &booking::Model) -> Result<()> {
        let amount = self.release(candidate).await?;
        info!(
            "Auto-released {} for booking {} to teacher {}",
            amount, candidate.id, candidate.teacher_id
        );

        let released = self.require_booking(candidate.id).await?;
        let title = self.listing_title(released.listing_id).await;
        let learner_name = self.display_name(released.learner_id).await;
        self.notify(
            BookingEventKind::EscrowReleased,
            &released,
            released.learner_id,
            None,
            "Funds Auto-Released",
            format!(
                "Funds for '{title}' were automatically released to the teacher after the grace period."
            ),
        );
        self.notify(
            BookingEventKind::EscrowReleased,
            &released,
            released.teacher_id,
            None,
            "Funds Auto-Released",
            format!(
                "{amount} tokens for your session with {learner_name} were automatically released."
            ),
        );
        Ok(())
    }

    /// CONFIRMED -> COMPLETED plus the escrow -> teacher transfer, in one
    /// transaction.
    async fn release(&self, current: &booking::Model) -> Result<Decimal> {
        let amount = current
            .escrow_amount_minor
            .map(from_minor)
            .ok_or(Error::MissingEscrow {
                booking_id: current.id,
            })?;
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        advance_status(
            &txn,
            current.id,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            TransitionWrites::default(),
            now,
        )
        .await?;
        ledger::post(
            &txn,
            &[
                Posting::debit(
                    self.escrow_account_id,
                    amount,
                    Some(current.id),
                    format!("Release funds for booking #{}", current.id),
                ),
                Posting::credit(
                    current.teacher_id,
                    amount,
                    Some(current.id),
                    format!("Payment for booking #{}", current.id),
                ),
            ],
            now,
        )
        .await?;
        txn.commit().await?;

        Ok(amount)
    }

    /// PENDING -> REJECTED, freeing the booking's slot.
    async fn mark_rejected(&self, current: &booking::Model) -> Result<()> {
        let txn = self.db.begin().await?;
        advance_status(
            &txn,
            current.id,
            BookingStatus::Pending,
            BookingStatus::Rejected,
            TransitionWrites::default(),
            self.clock.now(),
        )
        .await?;
        if let Some(slot_id) = current.slot_id {
            slot::release_reservation(&txn, slot_id).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Auto-rejects a booking whose learner could not cover the price and
    /// hands the shortfall back to the caller.
    async fn reject_for_shortfall(
        &self,
        current: &booking::Model,
        listing: &ListingInfo,
        shortfall: Error,
    ) -> Result<booking::Model> {
        self.mark_rejected(current).await?;
        warn!("Booking {} auto-rejected: {}", current.id, shortfall);

        let rejected = self.require_booking(current.id).await?;
        self.notify(
            BookingEventKind::BookingRejected,
            &rejected,
            rejected.learner_id,
            Some(rejected.teacher_id),
            "Booking Rejected",
            format!(
                "Your request for '{}' was rejected due to insufficient funds.",
                listing.title
            ),
        );
        Err(shortfall)
    }

    /// Looks up a booking by id.
    pub async fn get_booking(&self, booking_id: i64) -> Result<Option<booking::Model>> {
        Booking::find_by_id(booking_id)
            .one(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Bookings a learner has requested, newest first.
    pub async fn list_sent(&self, learner_id: i64) -> Result<Vec<booking::Model>> {
        Booking::find()
            .filter(booking::Column::LearnerId.eq(learner_id))
            .order_by_desc(booking::Column::CreatedAt)
            .order_by_desc(booking::Column::Id)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Bookings requested from a teacher's listings, newest first.
    pub async fn list_received(&self, teacher_id: i64) -> Result<Vec<booking::Model>> {
        Booking::find()
            .filter(booking::Column::TeacherId.eq(teacher_id))
            .order_by_desc(booking::Column::CreatedAt)
            .order_by_desc(booking::Column::Id)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    async fn require_booking(&self, booking_id: i64) -> Result<booking::Model> {
        self.get_booking(booking_id)
            .await?
            .ok_or(Error::BookingNotFound { id: booking_id })
    }

    async fn require_listing(&self, listing_id: i64) -> Result<ListingInfo> {
        self.listings
            .find_listing(listing_id)
            .await?
            .ok_or(Error::ListingNotFound { id: listing_id })
    }

    /// Title for notifications; a missing listing must not fail a transition
    /// that has already committed.
    async fn listing_title(&self, listing_id: i64) -> String {
        match self.listings.find_listing(listing_id).await {
            Ok(Some(listing)) => listing.title,
            Ok(None) => format!("listing #{listing_id}"),
            Err(err) => {
                debug!("Listing lookup for notification failed: {}", err);
                format!("listing #{listing_id}")
            }
        }
    }

    async fn display_name(&self, account_id: i64) -> String {
        match get_account_by_id(&self.db, account_id).await {
            Ok(Some(account)) => account.display_name,
            Ok(None) => format!("User #{account_id}"),
            Err(err) => {
                debug!("Account lookup for notification failed: {}", err);
                format!("User #{account_id}")
            }
        }
    }

    fn notify(
        &self,
        kind: BookingEventKind,
        subject: &booking::Model,
        recipient_id: i64,
        actor_id: Option<i64>,
        title: &str,
        body: String,
    ) {
        self.notifier.emit(BookingEvent {
            kind,
            booking_id: subject.id,
            recipient_id,
            actor_id,
            title: title.to_string(),
            body,
            occurred_at: self.clock.now(),
        });
    }
}

fn ensure_teacher(current: &booking::Model, account_id: i64) -> Result<()> {
    if current.teacher_id == account_id {
        Ok(())
    } else {
        Err(Error::NotTeacher {
            account_id,
            booking_id: current.id,
        })
    }
}

fn ensure_participant(current: &booking::Model, account_id: i64) -> Result<()> {
    if current.learner_id == account_id || current.teacher_id == account_id {
        Ok(())
    } else {
        Err(Error::NotParticipant {
            account_id,
            booking_id: current.id,
        })
    }
}

/// Checks the snapshot against the transition table before any write.
fn ensure_transition(current: &booking::Model, to: BookingStatus) -> Result<()> {
    if current.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            booking_id: current.id,
            from: current.status,
            to,
        })
    }
}

/// Compare-and-set of a booking's status.
///
/// Succeeds only if the row is still in `from`; otherwise reports the status
/// the booking actually has.
async fn advance_status(
    txn: &DatabaseTransaction,
    booking_id: i64,
    from: BookingStatus,
    to: BookingStatus,
    writes: TransitionWrites,
    now: DateTime<Utc>,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            booking_id,
            from,
            to,
        });
    }

    let mut update = Booking::update_many()
        .col_expr(booking::Column::Status, Expr::value(to))
        .col_expr(booking::Column::UpdatedAt, Expr::value(now))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.eq(from));
    if let Some(amount_minor) = writes.escrow_amount_minor {
        update = update.col_expr(
            booking::Column::EscrowAmountMinor,
            Expr::value(Some(amount_minor)),
        );
    }
    if let Some(room) = writes.session_room_id {
        update = update.col_expr(booking::Column::SessionRoomId, Expr::value(Some(room)));
    }

    if update.exec(txn).await?.rows_affected == 1 {
        debug!("Booking {} {} -> {}", booking_id, from, to);
        return Ok(());
    }

    let actual = Booking::find_by_id(booking_id)
        .one(txn)
        .await?
        .ok_or(Error::BookingNotFound { id: booking_id })?;
    Err(Error::InvalidTransition {
        booking_id,
        from: actual.status,
        to,
    })
}
