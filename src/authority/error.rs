//! Queue authority client error types

use thiserror::Error;

/// Failures talking to the queue authority.
///
/// None of these are fatal to the engine: every one is logged and treated as
/// "mutation not confirmed", leaving dedup state untouched so a later event
/// can retry.
#[derive(Error, Debug)]
pub enum AuthorityError {
    /// Request did not complete within the configured timeout
    #[error("queue authority request timed out")]
    Timeout,

    /// Connection or transport failure
    #[error("queue authority request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Shared secret was refused
    #[error("queue authority rejected the shared key")]
    Unauthorized,

    /// Non-success HTTP status
    #[error("queue authority returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Authority answered `ok: false`
    #[error("queue authority refused the request: {0}")]
    Rejected(String),

    /// Body was not the JSON we expect
    #[error("malformed queue authority response: {0}")]
    Malformed(String),
}

impl AuthorityError {
    /// Map a reqwest error, separating timeouts from other transport failures
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AuthorityError::Timeout
        } else {
            AuthorityError::Transport(e)
        }
    }

    /// Whether retrying later could succeed without operator action.
    ///
    /// Timeouts, connection failures and 5xx responses are transient; an
    /// unauthorized or malformed exchange will keep failing until
    /// configuration changes.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthorityError::Timeout | AuthorityError::Rejected(_) => true,
            AuthorityError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            AuthorityError::Status { status, .. } => *status >= 500,
            AuthorityError::Unauthorized | AuthorityError::Malformed(_) => false,
        }
    }
}
