//! Error classification for settlement retries
//!
//! A retryable error leaves the event untouched so the next processing cycle
//! picks it up again; anything else fails the event.

/// JSON-RPC "limit exceeded"
pub const RPC_LIMIT_EXCEEDED: i64 = -32005;
/// JSON-RPC "resource unavailable"
pub const RPC_RESOURCE_UNAVAILABLE: i64 = -32002;
/// Rate limiting, as reported by providers that reuse the HTTP status as code
pub const RPC_RATE_LIMITED: i64 = 429;

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues, rate limiting)
    Transient,
    /// Gas price rejected by the node
    Underpriced,
    /// Nonce already used or transaction already in the pool
    NonceTooLow,
    /// Nonce gap, earlier transactions still pending
    NonceTooHigh,
    /// Revert, bad input, unauthorized
    Permanent,
    /// Nothing matched
    Unknown,
}

impl ErrorClass {
    /// Unknown errors are not retried: an unclassified error on a settlement
    /// fails the event so it surfaces to operators instead of looping.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Transient
                | ErrorClass::Underpriced
                | ErrorClass::NonceTooLow
                | ErrorClass::NonceTooHigh
        )
    }
}

/// Classify a structured JSON-RPC error code. `None` means the code says
/// nothing useful and the message should decide.
pub fn classify_rpc_code(code: i64) -> Option<ErrorClass> {
    match code {
        RPC_LIMIT_EXCEEDED | RPC_RESOURCE_UNAVAILABLE | RPC_RATE_LIMITED => {
            Some(ErrorClass::Transient)
        }
        _ => None,
    }
}

/// Classify an error from its provider message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // A revert reason is free text and may mention the network or a timeout
    if error_lower.contains("reverted") {
        return ErrorClass::Permanent;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("limit exceeded")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low") || error_lower.contains("already known") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") {
        return ErrorClass::NonceTooHigh;
    }

    if error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("not a relayer")
        || error_lower.contains("unauthorized")
        || error_lower.contains("invalid transaction")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
