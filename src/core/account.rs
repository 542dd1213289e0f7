//! Account business logic - opening accounts, balance reads and identity
//! resolution.
//!
//! Balances are never written here directly; opening an account with a grant
//! goes through [`ledger::issue`] so the cached balance always agrees with
//! the ledger.

use crate::{
    config::settings::EscrowSettings,
    core::{amount::from_minor, ledger},
    entities::{Account, account},
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Memo recorded on the grant issued when an account is opened.
pub const INITIAL_GRANT_MEMO: &str = "Initial grant";

/// Resolves an authenticated caller to the account the engine acts for.
///
/// Credential handling lives outside the engine; implementations only map an
/// already-authenticated principal (e.g. an e-mail) to an account id.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Returns the account id for `principal`.
    async fn resolve(&self, principal: &str) -> Result<i64>;
}

/// Resolves principals against the `accounts.handle` column.
#[derive(Debug, Clone)]
pub struct AccountDirectory {
    db: DatabaseConnection,
}

impl AccountDirectory {
    /// Creates a directory backed by `db`.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityResolver for AccountDirectory {
    async fn resolve(&self, principal: &str) -> Result<i64> {
        let account = get_account_by_handle(&self.db, principal)
            .await?
            .ok_or_else(|| Error::AccountNotFound {
                key: principal.to_string(),
            })?;
        if account.is_system {
            // System accounts never act as a learner or teacher.
            return Err(Error::AccountNotFound {
                key: principal.to_string(),
            });
        }
        Ok(account.id)
    }
}

/// Opens a user account and issues `initial_grant` tokens to it.
#[instrument(skip(db))]
pub async fn open_account(
    db: &DatabaseConnection,
    handle: &str,
    display_name: &str,
    initial_grant: Decimal,
    at: DateTime<Utc>,
) -> Result<account::Model> {
    let handle = handle.trim();
    if handle.is_empty() {
        return Err(Error::InvalidHandle {
            handle: handle.to_string(),
        });
    }

    let txn = db.begin().await?;

    if get_account_by_handle(&txn, handle).await?.is_some() {
        return Err(Error::AccountExists {
            handle: handle.to_string(),
        });
    }

    let created = account::ActiveModel {
        handle: Set(handle.to_string()),
        display_name: Set(display_name.to_string()),
        balance_minor: Set(0),
        is_system: Set(false),
        created_at: Set(at),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if initial_grant > Decimal::ZERO {
        ledger::issue(&txn, created.id, initial_grant, INITIAL_GRANT_MEMO, at).await?;
    }

    let opened = Account::find_by_id(created.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            key: created.id.to_string(),
        })?;

    txn.commit().await?;
    info!("Opened account {} ({}) with {}", opened.id, opened.handle, initial_grant);
    Ok(opened)
}

/// Opens a user account with the grant configured under `[escrow]`.
pub async fn open_account_with_settings(
    db: &DatabaseConnection,
    settings: &EscrowSettings,
    handle: &str,
    display_name: &str,
    at: DateTime<Utc>,
) -> Result<account::Model> {
    open_account(db, handle, display_name, settings.initial_grant, at).await
}

/// Returns the system account with `handle`, creating it with a zero balance
/// on first use.
#[instrument(skip(db))]
pub async fn ensure_system_account(
    db: &DatabaseConnection,
    handle: &str,
    display_name: &str,
    at: DateTime<Utc>,
) -> Result<account::Model> {
    if let Some(existing) = get_account_by_handle(db, handle).await? {
        if !existing.is_system {
            return Err(Error::Config {
                message: format!("Account '{handle}' exists but is not a system account"),
            });
        }
        return Ok(existing);
    }

    let created = account::ActiveModel {
        handle: Set(handle.to_string()),
        display_name: Set(display_name.to_string()),
        balance_minor: Set(0),
        is_system: Set(true),
        created_at: Set(at),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!("Created system account {} ({})", created.id, created.handle);
    Ok(created)
}

/// Finds an account by its primary key.
pub async fn get_account_by_id<C>(db: &C, account_id: i64) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find_by_id(account_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds an account by its handle.
pub async fn get_account_by_handle<C>(db: &C, handle: &str) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find()
        .filter(account::Column::Handle.eq(handle))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Current cached balance of an account.
pub async fn balance<C>(db: &C, account_id: i64) -> Result<Decimal>
where
    C: ConnectionTrait,
{
    get_account_by_id(db, account_id)
        .await?
        .map(|account| from_minor(account.balance_minor))
        .ok_or_else(|| Error::AccountNotFound {
            key: account_id.to_string(),
        })
}
