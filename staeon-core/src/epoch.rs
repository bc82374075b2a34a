use serde::{Deserialize, Serialize};

use crate::hash::Sha256Hash;

/// Close-time statistics kept alongside an [`EpochSummary`], useful for the
/// dashboard/summary endpoint without re-deriving them from the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseStats {
    pub ledger_size: u64,
    pub fees_distributed: f64,
}

/// spec.md §3: `{epoch, epoch_seed, transaction_count, close_stats}`.
/// Immutable once created; one row per closed epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: i64,
    pub epoch_seed: Sha256Hash,
    pub transaction_count: u64,
    pub close_stats: CloseStats,
}

/// spec.md §3 / §4.8: a received push of this node's assigned mini-hashes
/// from `from_domain` to `to_domain`. `hashes` is the concatenation of the
/// assigned mini-hashes in the sender's chosen order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochHashPush {
    pub epoch: i64,
    pub from_domain: String,
    pub to_domain: String,
    pub hashes: String,
    pub signature: String,
}

impl EpochHashPush {
    /// Splits `hashes` back into individual 8-hex-char mini-hashes.
    pub fn mini_hashes(&self) -> Vec<String> {
        self.hashes
            .as_bytes()
            .chunks(8)
            .map(|c| String::from_utf8_lossy(c).to_string())
            .collect()
    }

    pub fn signing_message(&self) -> Vec<u8> {
        let mut msg = self.hashes.clone();
        msg.push_str(&self.to_domain);
        msg.into_bytes()
    }
}

/// spec.md §3: `{epoch, penalized_peer, voting_peer, vote_for}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyVote {
    pub epoch: i64,
    pub penalized_peer: String,
    pub voting_peer: String,
    pub vote_for: bool,
}

/// A signed accusation fanned out by [`crate`] consumers in §4.8 step 3.
/// `push` is `None` for a "silent" (not-present) accusation; `Some` carries
/// the full wrong push so receivers can independently re-check it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePenalization {
    pub epoch: i64,
    pub accuser_domain: String,
    pub accused_domain: String,
    pub correct_hash: String,
    pub push: Option<EpochHashPush>,
    pub signature: String,
}
