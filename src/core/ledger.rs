//! Ledger store - append-only record of token movements.
//!
//! Every posting inserts one immutable [`ledger_entry`] row and applies the
//! matching delta to the account's cached balance inside the caller's
//! transaction. Debits are a single conditional `UPDATE` that refuses to take
//! a balance below zero, so concurrent debits against the same account can
//! never overdraw it. The store does not pair entries itself; callers build
//! matched DEBIT/CREDIT pairs (see [`transfer`]).

use crate::{
    core::amount::{from_minor, positive_minor},
    entities::{Account, LedgerEntry, account, ledger_entry, ledger_entry::Direction},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{DatabaseTransaction, QueryOrder, Set, prelude::*, sea_query::Expr};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// One side of a ledger movement, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account_id: i64,
    pub direction: Direction,
    pub amount: Decimal,
    pub booking_id: Option<i64>,
    pub memo: String,
}

impl Posting {
    /// Takes `amount` out of `account_id`.
    pub fn debit(
        account_id: i64,
        amount: Decimal,
        booking_id: Option<i64>,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            direction: Direction::Debit,
            amount,
            booking_id,
            memo: memo.into(),
        }
    }

    /// Puts `amount` into `account_id`.
    pub fn credit(
        account_id: i64,
        amount: Decimal,
        booking_id: Option<i64>,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            direction: Direction::Credit,
            amount,
            booking_id,
            memo: memo.into(),
        }
    }
}

/// An account whose cached balance disagrees with its ledger history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDrift {
    pub account_id: i64,
    /// Value stored on the account row
    pub cached: Decimal,
    /// Sum of credits minus sum of debits
    pub derived: Decimal,
}

/// Persists `postings` and applies their balance deltas.
///
/// Must run inside a transaction: on any error the caller drops the
/// transaction and nothing written here survives. All amounts are validated
/// before the first write.
#[instrument(skip(txn, postings), fields(count = postings.len()))]
pub async fn post(
    txn: &DatabaseTransaction,
    postings: &[Posting],
    at: DateTime<Utc>,
) -> Result<Vec<ledger_entry::Model>> {
    let amounts = postings
        .iter()
        .map(|posting| positive_minor(posting.amount))
        .collect::<Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(postings.len());
    for (posting, amount_minor) in postings.iter().zip(amounts) {
        apply_delta(txn, posting.account_id, posting.direction, amount_minor).await?;

        let entry = ledger_entry::ActiveModel {
            account_id: Set(posting.account_id),
            direction: Set(posting.direction),
            amount_minor: Set(amount_minor),
            booking_id: Set(posting.booking_id),
            memo: Set(posting.memo.clone()),
            created_at: Set(at),
            ..Default::default()
        };
        entries.push(entry.insert(txn).await?);
    }

    debug!("Posted {} ledger entries", entries.len());
    Ok(entries)
}

/// Moves `amount` from one account to another as a matched DEBIT/CREDIT pair.
pub async fn transfer(
    txn: &DatabaseTransaction,
    from_account: i64,
    to_account: i64,
    amount: Decimal,
    booking_id: Option<i64>,
    memo: &str,
    at: DateTime<Utc>,
) -> Result<Vec<ledger_entry::Model>> {
    post(
        txn,
        &[
            Posting::debit(from_account, amount, booking_id, memo),
            Posting::credit(to_account, amount, booking_id, memo),
        ],
        at,
    )
    .await
}

/// Issues new tokens to an account (initial grants). This is the only
/// movement recorded as a lone CREDIT.
pub async fn issue(
    txn: &DatabaseTransaction,
    account_id: i64,
    amount: Decimal,
    memo: &str,
    at: DateTime<Utc>,
) -> Result<ledger_entry::Model> {
    let mut entries = post(txn, &[Posting::credit(account_id, amount, None, memo)], at).await?;
    entries.pop().ok_or(Error::Database(DbErr::RecordNotInserted))
}

/// Applies one balance delta with a single `UPDATE` statement.
async fn apply_delta<C>(conn: &C, account_id: i64, direction: Direction, amount_minor: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let update = match direction {
        Direction::Credit => Account::update_many()
            .col_expr(
                account::Column::BalanceMinor,
                Expr::col(account::Column::BalanceMinor).add(amount_minor),
            )
            .filter(account::Column::Id.eq(account_id)),
        Direction::Debit => Account::update_many()
            .col_expr(
                account::Column::BalanceMinor,
                Expr::col(account::Column::BalanceMinor).sub(amount_minor),
            )
            .filter(account::Column::Id.eq(account_id))
            .filter(account::Column::BalanceMinor.gte(amount_minor)),
    };

    if update.exec(conn).await?.rows_affected == 1 {
        return Ok(());
    }

    // Nothing changed: either the account is missing or the guard refused the debit.
    let account = Account::find_by_id(account_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            key: account_id.to_string(),
        })?;

    Err(Error::InsufficientFunds {
        account_id,
        balance: from_minor(account.balance_minor),
        required: from_minor(amount_minor),
    })
}

/// All entries produced by a booking, oldest first.
pub async fn entries_for_booking<C>(db: &C, booking_id: i64) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::BookingId.eq(booking_id))
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// All entries owned by an account, oldest first.
pub async fn entries_for_account<C>(db: &C, account_id: i64) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::AccountId.eq(account_id))
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Recomputes an account's balance from its ledger history.
pub async fn derived_balance<C>(db: &C, account_id: i64) -> Result<Decimal>
where
    C: ConnectionTrait,
{
    let entries = entries_for_account(db, account_id).await?;
    Ok(from_minor(entries.iter().map(signed_minor).sum()))
}

/// Compares every cached balance with its ledger history.
///
/// Returns only the accounts that disagree; an empty vector means the
/// projection is consistent.
#[instrument(skip(db))]
pub async fn audit_balances<C>(db: &C) -> Result<Vec<BalanceDrift>>
where
    C: ConnectionTrait,
{
    let mut derived: HashMap<i64, i64> = HashMap::new();
    for entry in LedgerEntry::find().all(db).await? {
        *derived.entry(entry.account_id).or_default() += signed_minor(&entry);
    }

    let drifts = Account::find()
        .order_by_asc(account::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .filter_map(|account| {
            let expected = derived.get(&account.id).copied().unwrap_or_default();
            (expected != account.balance_minor).then(|| BalanceDrift {
                account_id: account.id,
                cached: from_minor(account.balance_minor),
                derived: from_minor(expected),
            })
        })
        .collect();

    Ok(drifts)
}

const fn signed_minor(entry: &ledger_entry::Model) -> i64 {
    match entry.direction {
        Direction::Credit => entry.amount_minor,
        Direction::Debit => -entry.amount_minor,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::account as accounts;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::TransactionTrait;

    #[tokio::test]
    async fn test_transfer_moves_balance_and_records_pair() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_account(&db, "alice@example.com", dec!(100)).await?;
        let bob = create_test_account(&db, "bob@example.com", dec!(0)).await?;

        let txn = db.begin().await?;
        let entries = transfer(&txn, alice.id, bob.id, dec!(40.25), None, "test", Utc::now()).await?;
        txn.commit().await?;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Debit);
        assert_eq!(entries[1].direction, Direction::Credit);
        assert_eq!(entries[0].amount_minor, entries[1].amount_minor);

        assert_eq!(accounts::balance(&db, alice.id).await?, dec!(59.75));
        assert_eq!(accounts::balance(&db, bob.id).await?, dec!(40.25));
        assert!(audit_balances(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_refuses_to_overdraw() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_account(&db, "alice@example.com", dec!(50)).await?;
        let bob = create_test_account(&db, "bob@example.com", dec!(0)).await?;

        let txn = db.begin().await?;
        let result = transfer(&txn, alice.id, bob.id, dec!(90), None, "test", Utc::now()).await;
        txn.rollback().await?;

        assert!(matches!(
            result,
            Err(Error::InsufficientFunds { balance, required, .. })
                if balance == dec!(50) && required == dec!(90)
        ));
        assert_eq!(accounts::balance(&db, alice.id).await?, dec!(50));
        assert_eq!(accounts::balance(&db, bob.id).await?, dec!(0));
        assert_eq!(entries_for_account(&db, bob.id).await?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_second_posting_rolls_back_first() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_account(&db, "alice@example.com", dec!(10)).await?;

        let txn = db.begin().await?;
        let result = post(
            &txn,
            &[
                Posting::credit(alice.id, dec!(5), None, "credit"),
                Posting::debit(999, dec!(5), None, "missing account"),
            ],
            Utc::now(),
        )
        .await;
        txn.rollback().await?;

        assert!(matches!(result, Err(Error::AccountNotFound { .. })));
        assert_eq!(accounts::balance(&db, alice.id).await?, dec!(10));
        assert_eq!(entries_for_account(&db, alice.id).await?.len(), 1);
        assert!(audit_balances(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_post_rejects_non_positive_amounts_before_writing() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_account(&db, "alice@example.com", dec!(10)).await?;

        let txn = db.begin().await?;
        let result = post(
            &txn,
            &[
                Posting::credit(alice.id, dec!(5), None, "ok"),
                Posting::credit(alice.id, dec!(0), None, "zero"),
            ],
            Utc::now(),
        )
        .await;
        txn.commit().await?;

        assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        assert_eq!(accounts::balance(&db, alice.id).await?, dec!(10));
        Ok(())
    }

    #[tokio::test]
    async fn test_audit_reports_drift() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_account(&db, "alice@example.com", dec!(10)).await?;

        // Tamper with the cached balance behind the ledger's back.
        Account::update_many()
            .col_expr(account::Column::BalanceMinor, Expr::value(5_000_i64))
            .filter(account::Column::Id.eq(alice.id))
            .exec(&db)
            .await?;

        let drifts = audit_balances(&db).await?;
        assert_eq!(
            drifts,
            vec![BalanceDrift {
                account_id: alice.id,
                cached: dec!(50),
                derived: dec!(10),
            }]
        );
        assert_eq!(derived_balance(&db, alice.id).await?, dec!(10));
        Ok(())
    }
}
