//! Lifecycle events and the notifier seam.
//!
//! The engine emits one [`BookingEvent`] per interested party after each
//! committed transition. Delivery is fire-and-forget: emitting never blocks,
//! never retries and never fails the operation that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingEventKind {
    BookingRequested,
    BookingAccepted,
    BookingRejected,
    BookingCompleted,
    EscrowReleased,
    DisputeOpened,
}

impl fmt::Display for BookingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BookingRequested => "booking-requested",
            Self::BookingAccepted => "booking-accepted",
            Self::BookingRejected => "booking-rejected",
            Self::BookingCompleted => "booking-completed",
            Self::EscrowReleased => "escrow-released",
            Self::DisputeOpened => "dispute-opened",
        })
    }
}

/// A notification addressed to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEvent {
    pub kind: BookingEventKind,
    pub booking_id: i64,
    /// Account the notification is for
    pub recipient_id: i64,
    /// Account whose action caused the event; `None` for the reconciler
    pub actor_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

/// Receives lifecycle events.
pub trait Notifier: Send + Sync {
    /// Hands the event over for delivery. Must not block.
    fn emit(&self, event: BookingEvent);
}

/// Logs every event; the default when no delivery channel is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn emit(&self, event: BookingEvent) {
        info!(
            kind = %event.kind,
            booking_id = event.booking_id,
            recipient_id = event.recipient_id,
            "{}: {}",
            event.title,
            event.body
        );
    }
}

/// Forwards events into an unbounded channel for a delivery worker.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<BookingEvent>,
}

impl ChannelNotifier {
    /// Creates the notifier together with the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BookingEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, event: BookingEvent) {
        if let Err(dropped) = self.sender.send(event) {
            debug!(
                "Notification receiver gone; dropping {} for booking {}",
                dropped.0.kind, dropped.0.booking_id
            );
        }
    }
}
