//! Fetch outcome classification: error -> (reason, retry delay).
//!
//! | Outcome                              | Reason       | Delay  |
//! |--------------------------------------|--------------|--------|
//! | store error after valid response     | Client       | 5 min  |
//! | transient / no network               | Network      | 1 min  |
//! | 401 / 403                            | Unauthorized | 30 min |
//! | 404                                  | NotFound     | 60 min |
//! | anything else                        | Unknown      | 5 min  |

use std::time::Duration;

use crate::storage::fetch_state::FetchErrorReason;
use crate::transport::TransportError;

pub const RETRY_NETWORK: Duration = Duration::from_secs(60);
pub const RETRY_UNAUTHORIZED: Duration = Duration::from_secs(30 * 60);
pub const RETRY_NOT_FOUND: Duration = Duration::from_secs(60 * 60);
pub const RETRY_CLIENT: Duration = Duration::from_secs(5 * 60);
pub const RETRY_UNKNOWN: Duration = Duration::from_secs(5 * 60);

/// Classifies a transport failure into a persisted reason and retry delay.
#[must_use]
pub fn classify_transport_error(error: &TransportError) -> (FetchErrorReason, Duration) {
    match error {
        TransportError::Network(_) => (FetchErrorReason::Network, RETRY_NETWORK),
        TransportError::Unauthorized => (FetchErrorReason::Unauthorized, RETRY_UNAUTHORIZED),
        TransportError::NotFound => (FetchErrorReason::NotFound, RETRY_NOT_FOUND),
        TransportError::Malformed(_) => (FetchErrorReason::Client, RETRY_CLIENT),
        TransportError::VersionTooOld { .. }
        | TransportError::EventsPruned
        | TransportError::Unexpected { .. } => (FetchErrorReason::Unknown, RETRY_UNKNOWN),
    }
}

/// Classification for a local store failure after a valid response.
#[must_use]
pub fn classify_store_error() -> (FetchErrorReason, Duration) {
    (FetchErrorReason::Client, RETRY_CLIENT)
}
