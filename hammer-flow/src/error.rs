//! Flow control error types.

/// Flow control error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// The throttle stopped issuing tokens because shutdown was signalled.
    #[error("shutdown in progress")]
    Shutdown,
}

/// Result type for flow control operations.
pub type FlowResult<T> = Result<T, FlowError>;
