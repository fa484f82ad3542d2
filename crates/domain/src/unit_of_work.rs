//! Commit-or-rollback handling shared by every multi-step operation.

use store::Transaction;

use crate::DomainError;

/// Ends a unit of work according to the outcome of the work done in it.
///
/// On success the transaction is committed and a commit failure is returned
/// as-is. On failure it is rolled back and the original error is returned;
/// a failed rollback is only logged, since the store discards an
/// uncommitted transaction anyway.
pub(crate) async fn finish<T, R>(tx: T, outcome: Result<R, DomainError>) -> Result<R, DomainError>
where
    T: Transaction,
{
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, cause = %err, "rollback failed");
            }
            Err(err)
        }
    }
}
