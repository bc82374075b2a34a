//! The Staeon consensus engine: the mempool admission pipeline, the ledger
//! applying closed epochs, the reputation-weighted peer set, and the
//! push/pull/penalty round that runs at every epoch boundary (spec.md §4).

pub mod epoch_close;
pub mod error;
pub mod ledger;
pub mod mempool;
pub mod penalty;
pub mod peerset;
pub mod round;
pub mod shuffle;

pub use epoch_close::{make_epoch_seed, EpochCloser};
pub use error::{AcceptError, CloseError, ConsensusError};
pub use ledger::Ledger;
pub use mempool::{AcceptOutcome, Mempool};
pub use penalty::{PenaltyOutcome, PenaltyTally, PENALTY_FACTOR, QUORUM_THRESHOLD};
pub use peerset::PeerSet;
pub use round::{
    build_penalization, build_push, classify_pull, consensus_pulls, consensus_pushes,
    judge_penalization, PullClassification, PullExpectation, PushPlan,
};
pub use shuffle::{deterministic_shuffle, make_matrix, ShuffleMatrix, MATRIX_SIZE};
