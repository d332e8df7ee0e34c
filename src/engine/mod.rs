pub mod assignment;
pub mod lifecycle;

use crate::error::AppError;
use crate::gateway::GatewayError;

/// Maps a collaborator failure onto the caller-facing taxonomy.
pub(crate) fn gateway_failure(err: GatewayError) -> AppError {
    match err {
        GatewayError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
        other => AppError::Upstream(other.to_string()),
    }
}
