use thiserror::Error;

use staeon_core::TxError;

/// spec.md §7: `InvalidTransaction`/`ExpiredTimestamp` — never recorded,
/// returned straight to the caller. `RejectedTransaction` is not an error: it
/// is a successful [`crate::mempool::AcceptOutcome::Rejected`].
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error(transparent)]
    Invalid(#[from] TxError),
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("epoch {0} is already closed")]
    AlreadyClosed(i64),
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("push signature does not recover to {0}'s payout address")]
    InvalidPush(String),
    #[error("penalty signature does not recover to {0}'s payout address")]
    InvalidPenalty(String),
    #[error("registration signature does not recover to the claimed payout address")]
    InvalidRegistration,
    #[error("peer domain `{0}` is not registered")]
    UnknownPeer(String),
}
