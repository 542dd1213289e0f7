//! Listing lookup - the read-only view of listings the engine depends on.
//!
//! Listing CRUD belongs to another service. The engine only needs a listing's
//! teacher and price, which it reads through [`ListingLookup`].

use crate::{
    core::amount::{from_minor, positive_minor},
    entities::{Listing, listing},
    errors::Result,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{Set, prelude::*};
use serde::{Deserialize, Serialize};

/// What the engine knows about a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingInfo {
    pub id: i64,
    pub teacher_id: i64,
    pub title: String,
    pub token_price: Decimal,
}

impl From<listing::Model> for ListingInfo {
    fn from(model: listing::Model) -> Self {
        Self {
            id: model.id,
            teacher_id: model.teacher_id,
            title: model.title,
            token_price: from_minor(model.token_price_minor),
        }
    }
}

/// Read access to listings.
#[async_trait]
pub trait ListingLookup: Send + Sync {
    /// Returns the listing, or `None` if it does not exist.
    async fn find_listing(&self, listing_id: i64) -> Result<Option<ListingInfo>>;
}

/// [`ListingLookup`] over the `listings` table.
#[derive(Debug, Clone)]
pub struct DbListings {
    db: DatabaseConnection,
}

impl DbListings {
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ListingLookup for DbListings {
    async fn find_listing(&self, listing_id: i64) -> Result<Option<ListingInfo>> {
        Ok(Listing::find_by_id(listing_id)
            .one(&self.db)
            .await?
            .map(ListingInfo::from))
    }
}

/// Mirrors a listing into the read model. Used by the listing service's sync
/// hook and for seeding.
pub async fn insert_listing<C>(
    db: &C,
    teacher_id: i64,
    title: &str,
    token_price: Decimal,
) -> Result<ListingInfo>
where
    C: ConnectionTrait,
{
    let model = listing::ActiveModel {
        teacher_id: Set(teacher_id),
        title: Set(title.to_string()),
        token_price_minor: Set(positive_minor(token_price)?),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.into())
}
