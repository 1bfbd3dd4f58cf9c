//! Diesel and pool error mapping onto [`DatabaseHandlerError`].

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use crate::domain::ports::DatabaseHandlerError;

use super::pool::PoolError;

pub(super) fn map_pool_error(error: PoolError) -> DatabaseHandlerError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            DatabaseHandlerError::connection(message)
        }
    }
}

/// Map a Diesel error raised while running `operation`.
pub(super) fn map_diesel_error(error: DieselError, operation: &str) -> DatabaseHandlerError {
    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), %operation, "diesel operation failed");
        }
        _ => debug!(%error, %operation, "diesel operation failed"),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            DatabaseHandlerError::connection(format!("{operation}: connection closed"))
        }
        DieselError::DatabaseError(_, info) => {
            DatabaseHandlerError::query(format!("{operation}: {}", info.message()))
        }
        DieselError::DeserializationError(err) => {
            DatabaseHandlerError::corrupt(format!("{operation}: {err}"))
        }
        other => DatabaseHandlerError::query(format!("{operation}: {other}")),
    }
}
