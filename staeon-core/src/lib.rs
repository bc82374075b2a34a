//! Shared data model and pure functions for Staeon: addresses, fixed-point
//! amounts, the epoch clock, canonical transaction encoding, and the entity
//! types every other Staeon crate builds on. No I/O happens here.

pub mod address;
pub mod amount;
pub mod clock;
pub mod epoch;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod mempool_types;
pub mod peer;
pub mod tx;

pub use address::Address;
pub use amount::Amount;
pub use epoch::{CloseStats, EpochHashPush, EpochSummary, NodePenalization, PenaltyVote};
pub use error::{AddressError, AmountError, ClockError, TxError};
pub use hash::{mini_hashes, Sha256Hash};
pub use ledger::LedgerEntry;
pub use mempool_types::{Movement, Rejection, ValidatedTransaction};
pub use peer::{Peer, PeerRegistration, PeerView};
pub use tx::{input_signing_message, make_txid, min_fee, Transaction, TxInput, TxOutput};
