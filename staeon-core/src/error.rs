use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address length {0} outside the 25-35 char range")]
    BadLength(usize),
    #[error("address does not belong to the '1' prefix class")]
    WrongClass,
    #[error("base58check decode failed")]
    BadEncoding,
    #[error("base58check checksum mismatch")]
    BadChecksum,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is not finite")]
    NotFinite,
    #[error("amount string `{0}` is not a valid fixed8 decimal")]
    BadFormat(String),
    #[error("amount overflows the internal fixed-point representation")]
    Overflow,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("timestamp falls within the closing window of its epoch")]
    WithinClosingWindow,
    #[error("timestamp is too far in the future (clock skew or propagation window exceeded)")]
    PropagationWindowExceeded,
}

/// Taxonomy from spec.md §7. Not every variant carries the same semantics for
/// recording/gossip; see the callers in staeon-consensus for how each is handled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("output amount must be positive")]
    NonPositiveOutput,
    #[error("input amount must be positive")]
    NonPositiveInput,
    #[error("input signature does not recover to the input address")]
    BadSignature,
    #[error("fee {actual} below minimum fee {min}")]
    BelowMinFee { actual: String, min: String },
    #[error("sum of inputs does not cover sum of outputs plus fee")]
    InsufficientInputs,
    #[error("transaction has no inputs or no outputs")]
    Empty,
    #[error(transparent)]
    Clock(#[from] ClockError),
}
