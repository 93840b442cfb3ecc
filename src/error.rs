use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefnetError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Referral cycle: {parent} is a descendant of {child}")]
    Cycle { child: String, parent: String },
    #[error("User {0} already has a referrer")]
    AlreadyAttached(String),
    #[error("User {0} is already registered")]
    AlreadyRegistered(String),
    #[error("User {0} already has a pending withdrawal request")]
    PendingRequestExists(String),
    #[error("Duplicate transaction reference: {0}")]
    DuplicateReference(String),
    #[error("Concurrent mutation: {0}")]
    ConcurrentMutation(String),
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Coarse classification used by callers that branch on error category
/// (retry on Conflict, 404 on NotFound) without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    State,
    NotFound,
    InsufficientBalance,
    Internal,
}

impl RefnetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefnetError::Validation(_) => ErrorKind::Validation,
            RefnetError::Cycle { .. }
            | RefnetError::AlreadyAttached(_)
            | RefnetError::AlreadyRegistered(_)
            | RefnetError::PendingRequestExists(_)
            | RefnetError::DuplicateReference(_)
            | RefnetError::ConcurrentMutation(_) => ErrorKind::Conflict,
            RefnetError::InvalidTransition { .. } => ErrorKind::State,
            RefnetError::NotFound(_) => ErrorKind::NotFound,
            RefnetError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            RefnetError::Snapshot(_) => ErrorKind::Internal,
        }
    }

    /// End-user-safe message. Admin callers format the full error instead;
    /// this string leaks no internal identifiers or amounts.
    pub fn sanitized(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "The request could not be processed. Please check the values and try again.",
            ErrorKind::Conflict => "The request conflicts with the current state. Please retry.",
            ErrorKind::State => "This action is not available for the current status.",
            ErrorKind::NotFound => "The requested record was not found.",
            ErrorKind::InsufficientBalance => "Insufficient coin balance for this request.",
            ErrorKind::Internal => "An internal error occurred.",
        }
    }
}
