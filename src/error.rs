use thiserror::Error;

/// Caller-facing failures of alert operations.
///
/// Recoverable conditions (no trusted contacts, re-entrant starts, a
/// conflicting active incident) are normal outcome branches on the
/// controller's return types, not errors. Transient collaborator failures are
/// absorbed where they occur and logged.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The operation needs a device permission the user has not granted.
    /// The state machine stays in its pre-operation state.
    #[error("{0} permission denied")]
    PermissionDenied(&'static str),

    /// A collaborator failed in a way the operation could not absorb.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
