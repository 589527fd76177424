//! IPC handler implementations.
//!
//! Each handler module contains thin handlers that validate parameters,
//! call into the movement store, and map store errors to wire codes.

pub mod export;
pub mod health;
pub mod movement;
pub mod sku;
pub mod stats;

use stockrelay_database::DatabaseError;
use stockrelay_ipc::{error_codes, Response};

/// Map a store error onto the wire error codes.
///
/// Validation failures are caller errors, invalid transitions are conflicts,
/// unknown ids are not-found; everything else is internal.
pub(crate) fn store_error_response(id: &str, err: DatabaseError) -> Response {
    let message = err.to_string();
    match err {
        DatabaseError::Validation(_) => {
            Response::error(id, error_codes::INVALID_PARAMS, &message)
        }
        DatabaseError::InvalidTransition { .. } => {
            Response::error(id, error_codes::CONFLICT, &message)
        }
        DatabaseError::NotFound(_) => Response::error(id, error_codes::NOT_FOUND, &message),
        _ => Response::error(id, error_codes::INTERNAL_ERROR, &message),
    }
}
