//! Shared test utilities for `SkillEscrow`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{
        BookingEngine,
        account::{ensure_system_account, open_account},
        clock::ManualClock,
        events::{BookingEvent, ChannelNotifier},
        listing::{DbListings, ListingInfo, insert_listing},
    },
    entities,
    errors::Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle of the escrow account created by [`setup_test_engine`].
pub const TEST_ESCROW_HANDLE: &str = "escrow@system.internal";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database in `dir` with all tables initialized.
///
/// Unlike the in-memory database this pool holds several connections, so
/// concurrent callers really race each other.
pub async fn setup_file_db(dir: &tempfile::TempDir) -> Result<DatabaseConnection> {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("escrow.sqlite").display());
    let db = sea_orm::Database::connect(url.as_str()).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Fixed instant the manual clock starts at: 2025-03-01 12:00:00 UTC.
#[must_use]
pub fn test_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_740_830_400, 0).unwrap_or_default()
}

/// Opens a user account whose balance is `grant`.
///
/// The display name is the part of `handle` before the `@`.
pub async fn create_test_account(
    db: &DatabaseConnection,
    handle: &str,
    grant: Decimal,
) -> Result<entities::account::Model> {
    let display_name = handle.split('@').next().unwrap_or(handle);
    open_account(db, handle, display_name, grant, test_epoch()).await
}

/// A booking engine on a fresh database, wired to a manual clock and a
/// channel notifier.
pub struct TestEngine {
    pub db: DatabaseConnection,
    pub engine: BookingEngine,
    pub clock: ManualClock,
    pub events: mpsc::UnboundedReceiver<BookingEvent>,
    pub escrow_id: i64,
    pub learner_id: i64,
    pub teacher_id: i64,
    /// Listing owned by the teacher, priced at 90 tokens
    pub listing: ListingInfo,
}

impl TestEngine {
    /// Events emitted so far, oldest first.
    pub fn drain_events(&mut self) -> Vec<BookingEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Creates a [`TestEngine`].
///
/// # Defaults
/// * learner `learner@example.com` with `learner_grant` tokens
/// * teacher `teacher@example.com` with no tokens
/// * one listing "Intro to Rust" priced at 90
pub async fn setup_test_engine(learner_grant: Decimal) -> Result<TestEngine> {
    setup_test_engine_on(setup_test_db().await?, learner_grant).await
}

/// Creates a [`TestEngine`] on an already initialized database.
pub async fn setup_test_engine_on(db: DatabaseConnection, learner_grant: Decimal) -> Result<TestEngine> {
    let clock = ManualClock::new(test_epoch());

    let escrow = ensure_system_account(&db, TEST_ESCROW_HANDLE, "Escrow", test_epoch()).await?;
    let learner = create_test_account(&db, "learner@example.com", learner_grant).await?;
    let teacher = create_test_account(&db, "teacher@example.com", Decimal::ZERO).await?;
    let listing = insert_listing(&db, teacher.id, "Intro to Rust", Decimal::new(90, 0)).await?;

    let (notifier, events) = ChannelNotifier::new();
    let engine = BookingEngine::new(
        db.clone(),
        Arc::new(DbListings::new(db.clone())),
        Arc::new(notifier),
        Arc::new(clock.clone()),
        escrow.id,
    );

    Ok(TestEngine {
        db,
        engine,
        clock,
        events,
        escrow_id: escrow.id,
        learner_id: learner.id,
        teacher_id: teacher.id,
        listing,
    })
}
