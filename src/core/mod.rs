/// Account opening, balance reads and identity resolution
pub mod account;
/// Conversion between token amounts and stored minor units
pub mod amount;
/// Booking state machine and escrow movements
pub mod booking;
/// Injectable time source
pub mod clock;
/// Booking lifecycle events and notifier sinks
pub mod events;
/// Append-only double-entry ledger
pub mod ledger;
/// Read model of skill listings
pub mod listing;
/// Periodic auto-release of stale escrow
pub mod reconciler;
/// Teacher availability and slot reservation
pub mod slot;

pub use booking::BookingEngine;
pub use reconciler::{EscrowReconciler, ReconcilerHandle, TickReport};
