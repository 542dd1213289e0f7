//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod booking;
pub mod ledger_entry;
pub mod listing;
pub mod slot;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use booking::{
    BookingStatus, Column as BookingColumn, Entity as Booking, Model as BookingModel,
};
pub use ledger_entry::{
    Column as LedgerEntryColumn, Direction, Entity as LedgerEntry, Model as LedgerEntryModel,
};
pub use listing::{Column as ListingColumn, Entity as Listing, Model as ListingModel};
pub use slot::{Column as SlotColumn, Entity as Slot, Model as SlotModel};
