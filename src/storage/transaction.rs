use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{LedgerRepository, Repository, TxRepository};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("nested transactions are not supported")]
    Nested,

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),
}

/// Unit-of-work execution.
///
/// `run` begins a transaction and hands `f` a repository bound to it. The
/// transaction commits if `f` returns `Ok`, and rolls back if `f` returns
/// `Err`, panics, or the returned future is dropped before completion. A panic
/// is resumed after the rollback.
pub trait Transactional: Send + Sync {
    /// Repository type handed to the unit of work.
    type Scoped: LedgerRepository;

    fn run<'a, T, E, F>(&'a self, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<TransactionError> + Send + 'a,
        F: for<'t> FnOnce(&'t Self::Scoped) -> BoxFuture<'t, Result<T, E>> + Send + 'a;
}

impl Transactional for Repository {
    type Scoped = TxRepository;

    fn run<'a, T, E, F>(&'a self, f: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<TransactionError> + Send + 'a,
        F: for<'t> FnOnce(&'t Self::Scoped) -> BoxFuture<'t, Result<T, E>> + Send + 'a,
    {
        Box::pin(async move {
            let tx = self
                .pool()
                .begin()
                .await
                .map_err(TransactionError::Begin)?;
            let scoped = TxRepository::new(tx);

            let outcome = AssertUnwindSafe(async { f(&scoped).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(value)) => {
                    scoped.commit().await.map_err(TransactionError::Commit)?;
                    debug!("transaction committed");
                    Ok(value)
                }
                Ok(Err(err)) => {
                    rollback(scoped).await;
                    Err(err)
                }
                Err(panic) => {
                    rollback(scoped).await;
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

/// A repository already inside a transaction refuses to open another one.
impl Transactional for TxRepository {
    type Scoped = TxRepository;

    fn run<'a, T, E, F>(&'a self, _f: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<TransactionError> + Send + 'a,
        F: for<'t> FnOnce(&'t Self::Scoped) -> BoxFuture<'t, Result<T, E>> + Send + 'a,
    {
        warn!("rejected nested transaction");
        Box::pin(future::ready(Err(TransactionError::Nested.into())))
    }
}

/// The caller's error wins over a rollback failure; dropping the
/// transaction on failure still discards its writes.
async fn rollback(scoped: TxRepository) {
    match scoped.rollback().await {
        Ok(()) => debug!("transaction rolled back"),
        Err(err) => error!(error = %err, "transaction rollback failed"),
    }
}
