//! Wallet Service
//!
//! USDC-cent accounting. Every mutation runs inside a caller-provided
//! transaction with `SELECT ... FOR UPDATE` row locking, so reserve /
//! release / settle compose with order and trade writes atomically.
//! Invariant: balances never go negative, and every debit is paired with a
//! credit or an outstanding reservation.

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::ServiceError;
use crate::models::Wallet;

pub struct WalletService {
    pool: PgPool,
}

impl WalletService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: i64) -> Result<Wallet, ServiceError> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT * FROM user_wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        wallet.ok_or_else(|| ServiceError::NotFound(format!("wallet for user {user_id}")))
    }

    /// Like `get`, but a user who never traded sees an empty wallet
    /// instead of a 404.
    pub async fn get_or_default(&self, user_id: i64) -> Result<Wallet, ServiceError> {
        match self.get(user_id).await {
            Ok(wallet) => Ok(wallet),
            Err(ServiceError::NotFound(_)) => Ok(Wallet {
                user_id,
                usdc_balance_cents: 0,
                usdc_locked_cents: 0,
                blueprint_balance_cents: 0,
                blueprint_locked_cents: 0,
                total_deposited_cents: 0,
                total_withdrawn_cents: 0,
                total_fees_paid_cents: 0,
                updated_at: chrono::Utc::now(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Row-locked fetch, creating an empty wallet on first touch.
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> Result<Wallet, ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO user_wallets (user_id) VALUES ($1)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT * FROM user_wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        wallet.ok_or_else(|| ServiceError::Conflict(format!("wallet row missing for user {user_id}")))
    }

    /// Move available cents into the locked bucket.
    pub async fn reserve(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        cents: i64,
    ) -> Result<(), ServiceError> {
        if cents == 0 {
            return Ok(());
        }

        let wallet = Self::lock_for_update(tx, user_id).await?;
        if wallet.usdc_balance_cents < cents {
            return Err(ServiceError::InsufficientFunds {
                required_cents: cents,
                available_cents: wallet.usdc_balance_cents,
            });
        }

        sqlx::query(
            r#"
            UPDATE user_wallets
            SET usdc_balance_cents = usdc_balance_cents - $1,
                usdc_locked_cents = usdc_locked_cents + $1,
                updated_at = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(cents)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Return reserved cents to the available balance (cancel, expiry,
    /// price improvement).
    pub async fn release(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        cents: i64,
    ) -> Result<(), ServiceError> {
        if cents == 0 {
            return Ok(());
        }

        let wallet = Self::lock_for_update(tx, user_id).await?;
        if wallet.usdc_locked_cents < cents {
            return Err(ServiceError::Conflict(format!(
                "release of {cents} cents exceeds locked {} for user {user_id}",
                wallet.usdc_locked_cents
            )));
        }

        sqlx::query(
            r#"
            UPDATE user_wallets
            SET usdc_balance_cents = usdc_balance_cents + $1,
                usdc_locked_cents = usdc_locked_cents - $1,
                updated_at = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(cents)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Consume reserved cents for a fill: the trade total leaves the
    /// wallet, the fee is accounted on top.
    pub async fn spend_locked(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        total_cents: i64,
        fee_cents: i64,
    ) -> Result<(), ServiceError> {
        let spend = total_cents + fee_cents;
        if spend == 0 {
            return Ok(());
        }

        let wallet = Self::lock_for_update(tx, user_id).await?;
        if wallet.usdc_locked_cents < spend {
            return Err(ServiceError::Conflict(format!(
                "spend of {spend} cents exceeds locked {} for user {user_id}",
                wallet.usdc_locked_cents
            )));
        }

        sqlx::query(
            r#"
            UPDATE user_wallets
            SET usdc_locked_cents = usdc_locked_cents - $1,
                total_fees_paid_cents = total_fees_paid_cents + $2,
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(spend)
        .bind(fee_cents)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Credit sale proceeds (fee already deducted by the caller).
    pub async fn credit(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        cents: i64,
        fee_cents: i64,
    ) -> Result<(), ServiceError> {
        Self::lock_for_update(tx, user_id).await?;

        sqlx::query(
            r#"
            UPDATE user_wallets
            SET usdc_balance_cents = usdc_balance_cents + $1,
                total_fees_paid_cents = total_fees_paid_cents + $2,
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(cents)
        .bind(fee_cents)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// External deposit intake (funding flows live outside this service;
    /// this is the seam they call).
    pub async fn deposit(&self, user_id: i64, cents: i64) -> Result<Wallet, ServiceError> {
        if cents <= 0 {
            return Err(ServiceError::invalid("deposit must be positive"));
        }

        let mut tx = self.pool.begin().await?;
        Self::lock_for_update(&mut tx, user_id).await?;
        sqlx::query(
            r#"
            UPDATE user_wallets
            SET usdc_balance_cents = usdc_balance_cents + $1,
                total_deposited_cents = total_deposited_cents + $1,
                updated_at = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(cents)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get(user_id).await
    }
}
