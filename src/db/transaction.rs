/*!
 * Transaction Helper Utilities
 *
 * Checkout and payment reconciliation hold row locks for the duration of a
 * transaction. These helpers bound how long a transaction may wait for those
 * locks and turn lock contention into a retryable error.
 */

use crate::errors::ServiceError;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, TransactionTrait,
};
use std::time::Duration;
use tracing::warn;

/// Begins a transaction whose lock waits are capped at `lock_timeout`.
///
/// On Postgres this issues `SET LOCAL lock_timeout`, which is scoped to the
/// transaction. SQLite serializes writers itself, so nothing extra is needed.
pub async fn begin_locked(
    db: &DatabaseConnection,
    lock_timeout: Duration,
) -> Result<DatabaseTransaction, ServiceError> {
    let txn = db.begin().await.map_err(classify_db_error)?;

    if txn.get_database_backend() == DbBackend::Postgres {
        let sql = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis());
        txn.execute_unprepared(&sql)
            .await
            .map_err(classify_db_error)?;
    }

    Ok(txn)
}

/// Maps lock waits and deadlocks to [`ServiceError::LockTimeout`]; every
/// other database failure stays a [`ServiceError::DatabaseError`].
pub fn classify_db_error(err: DbErr) -> ServiceError {
    if is_lock_contention(&err) {
        warn!(error = %err, "lock contention, rejecting request as retryable");
        metrics::counter!("solestore_db.lock_timeouts", 1);
        return ServiceError::LockTimeout(err.to_string());
    }
    ServiceError::DatabaseError(err)
}

/// Applies [`classify_db_error`] to database errors that were converted with `?`.
pub fn reclassify(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::DatabaseError(db_err) => classify_db_error(db_err),
        other => other,
    }
}

fn is_lock_contention(err: &DbErr) -> bool {
    let message = err.to_string().to_lowercase();
    [
        "lock timeout",
        "lock_timeout",
        "deadlock detected",
        "55p03",
        "40p01",
        "database is locked",
        "database table is locked",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn lock_timeouts_are_retryable() {
        let err = DbErr::Custom("canceling statement due to lock timeout".into());
        assert_matches!(classify_db_error(err), ServiceError::LockTimeout(_));

        let err = DbErr::Custom("deadlock detected".into());
        assert_matches!(classify_db_error(err), ServiceError::LockTimeout(_));

        let err = DbErr::Custom("database is locked".into());
        assert_matches!(classify_db_error(err), ServiceError::LockTimeout(_));
    }

    #[test]
    fn other_failures_stay_database_errors() {
        let err = DbErr::Custom("duplicate key value violates unique constraint".into());
        assert_matches!(classify_db_error(err), ServiceError::DatabaseError(_));
    }

    #[test]
    fn reclassify_leaves_business_errors_alone() {
        let err = ServiceError::DatabaseError(DbErr::Custom("database is locked".into()));
        assert_matches!(reclassify(err), ServiceError::LockTimeout(_));

        let err = ServiceError::PriceChanged("AJ1-RED-42".into());
        assert_matches!(reclassify(err), ServiceError::PriceChanged(_));
    }

    #[tokio::test]
    async fn begin_locked_opens_a_transaction_on_sqlite() {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        let txn = begin_locked(&db, Duration::from_millis(500)).await.unwrap();
        txn.commit().await.unwrap();
    }
}
