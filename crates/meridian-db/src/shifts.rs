//! # Shift Concurrency Guard
//!
//! At most one shift is OPEN in the whole store at any time.
//!
//! ```text
//!   (none) ──open──► OPEN ──close──► CLOSED
//! ```
//!
//! `open_shift` checks the user's own open shift and then any open shift,
//! both inside the write transaction. The partial UNIQUE index
//! `idx_shifts_single_open` backs the checks: if another till slips a shift
//! in between, the insert fails on the index and the open is refused the
//! same way.

use chrono::{DateTime, Utc};
use meridian_core::validation::validate_amount_cents;
use meridian_core::{Money, Shift, User, ValidationError};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::shift;

/// Guards opening and closing of cash-drawer shifts.
#[derive(Debug, Clone)]
pub struct ShiftConcurrencyGuard {
    db: Database,
}

impl ShiftConcurrencyGuard {
    pub fn new(db: Database) -> Self {
        ShiftConcurrencyGuard { db }
    }

    /// Opens a shift for `user`.
    ///
    /// Returns `Ok(None)` when the user or anyone else already has an open
    /// shift; nothing is written in that case.
    pub async fn open_shift(&self, user: &User, opening_amount: Money) -> DbResult<Option<Shift>> {
        if !user.is_active {
            return Err(ValidationError::InactiveUser(user.id).into());
        }
        validate_amount_cents("opening_amount", opening_amount.cents())?;

        let user_id = user.id;
        let now = self.db.clock().now();
        let opened = self
            .db
            .write("open_shift", move |conn| {
                Box::pin(open_in(conn, user_id, opening_amount, now))
            })
            .await?;

        if let Some(shift) = &opened {
            info!(
                shift_id = shift.id,
                user_id,
                opening_amount = opening_amount.cents(),
                "Shift opened"
            );
        }
        Ok(opened)
    }

    /// Closes the user's open shift.
    pub async fn close_shift(&self, user: &User, closing_amount: Money) -> DbResult<Shift> {
        validate_amount_cents("closing_amount", closing_amount.cents())?;

        let user_id = user.id;
        let now = self.db.clock().now();
        let closed = self
            .db
            .write("close_shift", move |conn| {
                Box::pin(close_in(conn, user_id, closing_amount, now))
            })
            .await?;

        info!(
            shift_id = closed.id,
            user_id,
            closing_amount = closing_amount.cents(),
            "Shift closed"
        );
        Ok(closed)
    }

    /// Closes the user's open shift after re-checking their password.
    pub async fn close_shift_with_auth(
        &self,
        user: &User,
        password: &str,
        closing_amount: Money,
    ) -> DbResult<Shift> {
        if !self.db.users().verify_password(user.id, password).await? {
            warn!(user_id = user.id, "Shift close refused: password mismatch");
            return Err(DbError::AuthenticationFailed);
        }
        self.close_shift(user, closing_amount).await
    }

    pub async fn current_shift(&self, user: &User) -> DbResult<Option<Shift>> {
        shift::find_open_for_user(self.db.pool(), user.id).await
    }

    /// The open shift of whoever has one (login asks "resume or open?").
    pub async fn any_open_shift(&self) -> DbResult<Option<Shift>> {
        shift::find_any_open(self.db.pool()).await
    }

    /// The user's most recent shifts, newest first.
    pub async fn shift_history(&self, user: &User, limit: u32) -> DbResult<Vec<Shift>> {
        shift::history(self.db.pool(), user.id, limit).await
    }
}

async fn open_in(
    conn: &mut SqliteConnection,
    user_id: i64,
    opening_amount: Money,
    now: DateTime<Utc>,
) -> DbResult<Option<Shift>> {
    if let Some(own) = shift::find_open_for_user(&mut *conn, user_id).await? {
        warn!(user_id, shift_id = own.id, "Shift open refused: user already has an open shift");
        return Ok(None);
    }
    if let Some(other) = shift::find_any_open(&mut *conn).await? {
        warn!(
            user_id,
            shift_id = other.id,
            holder_id = other.user_id,
            "Shift open refused: another user has an open shift"
        );
        return Ok(None);
    }

    match shift::insert_open(&mut *conn, user_id, opening_amount.cents(), now).await {
        Ok(id) => {
            debug!(shift_id = id, user_id, "Shift row inserted");
            shift::find_by_id(&mut *conn, id).await
        }
        Err(err) if err.is_unique_violation_on("status") => {
            warn!(user_id, "Shift open refused: single open shift index");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn close_in(
    conn: &mut SqliteConnection,
    user_id: i64,
    closing_amount: Money,
    now: DateTime<Utc>,
) -> DbResult<Shift> {
    let open = shift::find_open_for_user(&mut *conn, user_id)
        .await?
        .ok_or_else(|| DbError::not_found("Open shift for user", user_id))?;

    if shift::close(&mut *conn, open.id, closing_amount.cents(), now).await? == 0 {
        return Err(DbError::not_found("Open shift", open.id));
    }

    shift::find_by_id(&mut *conn, open.id)
        .await?
        .ok_or_else(|| DbError::not_found("Shift", open.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::fixture;
    use chrono::Duration;
    use meridian_core::ShiftStatus;

    async fn open_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM shifts WHERE status = 'open'")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_user_cannot_open_while_shift_is_open() {
        let fx = fixture().await;
        let shifts = fx.db.shifts();

        let first = shifts
            .open_shift(&fx.manager, Money::from_cents(10_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, ShiftStatus::Open);

        let refused = shifts
            .open_shift(&fx.cashier, Money::from_cents(5_000))
            .await
            .unwrap();
        assert!(refused.is_none());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shifts")
            .fetch_one(fx.db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(shifts.any_open_shift().await.unwrap().unwrap().id, first.id);
        assert!(shifts.current_shift(&fx.cashier).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_at_most_one_open_shift() {
        let fx = fixture().await;
        let shifts = fx.db.shifts();
        let users = [&fx.cashier, &fx.manager, &fx.cashier, &fx.manager];

        for (round, user) in users.iter().enumerate() {
            shifts.open_shift(user, Money::from_cents(100)).await.unwrap();
            shifts.open_shift(&fx.cashier, Money::zero()).await.unwrap();
            shifts.open_shift(&fx.manager, Money::zero()).await.unwrap();
            assert_eq!(open_count(&fx.db).await, 1, "round {round}");

            let holder = shifts.any_open_shift().await.unwrap().unwrap();
            let closer = if holder.user_id == fx.cashier.id {
                &fx.cashier
            } else {
                &fx.manager
            };
            shifts.close_shift(closer, Money::from_cents(100)).await.unwrap();
            assert_eq!(open_count(&fx.db).await, 0);
        }
    }

    #[tokio::test]
    async fn test_index_rejects_a_second_open_row() {
        let fx = fixture().await;
        fx.db
            .shifts()
            .open_shift(&fx.cashier, Money::zero())
            .await
            .unwrap()
            .unwrap();

        let err: DbError = sqlx::query(
            "INSERT INTO shifts (user_id, open_time, opening_amount_cents, status) \
             VALUES (?, '2025-01-01T10:00:00+00:00', 0, 'open')",
        )
        .bind(fx.manager.id)
        .execute(fx.db.pool())
        .await
        .unwrap_err()
        .into();
        assert!(err.is_unique_violation_on("status"));
    }

    #[tokio::test]
    async fn test_close_with_wrong_password_is_refused() {
        let fx = fixture().await;
        let shifts = fx.db.shifts();
        shifts
            .open_shift(&fx.cashier, Money::from_cents(2_000))
            .await
            .unwrap()
            .unwrap();

        let err = shifts
            .close_shift_with_auth(&fx.cashier, "nope", Money::from_cents(2_500))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::AuthenticationFailed));
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(shifts.current_shift(&fx.cashier).await.unwrap().is_some());

        fx.clock.advance(Duration::hours(8));
        let closed = shifts
            .close_shift_with_auth(&fx.cashier, "till-pass", Money::from_cents(2_500))
            .await
            .unwrap();
        assert_eq!(closed.status, ShiftStatus::Closed);
        assert_eq!(closed.closing_amount_cents, Some(2_500));
        assert_eq!(closed.close_time, Some(closed.open_time + Duration::hours(8)));
    }

    #[tokio::test]
    async fn test_close_without_open_shift() {
        let fx = fixture().await;
        let err = fx
            .db
            .shifts()
            .close_shift(&fx.cashier, Money::zero())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reopen_after_close_starts_new_shift() {
        let fx = fixture().await;
        let shifts = fx.db.shifts();

        let first = shifts
            .open_shift(&fx.cashier, Money::from_cents(1_000))
            .await
            .unwrap()
            .unwrap();
        shifts.close_shift(&fx.cashier, Money::from_cents(1_500)).await.unwrap();
        fx.clock.advance(Duration::hours(1));
        let second = shifts
            .open_shift(&fx.cashier, Money::from_cents(1_500))
            .await
            .unwrap()
            .unwrap();

        assert_ne!(first.id, second.id);
        let history = shifts.shift_history(&fx.cashier, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert!(history[0].is_open());
        assert!(!history[1].is_open());
    }

    #[tokio::test]
    async fn test_negative_amounts_are_rejected() {
        let fx = fixture().await;
        let err = fx
            .db
            .shifts()
            .open_shift(&fx.cashier, Money::from_cents(-1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(open_count(&fx.db).await, 0);
    }
}
