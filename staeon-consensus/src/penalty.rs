//! spec.md §4.8 step 5 / §9 open questions (a) and (c): tallying votes on a
//! penalty accusation and applying the resulting reputation adjustment.

use staeon_core::PenaltyVote;

use crate::peerset::PeerSet;

/// Quorum threshold as a fraction of total reputation (open question (c)):
/// an accusation needs votes representing a strict majority of reputation
/// before either side is penalized.
pub const QUORUM_THRESHOLD: f64 = 0.5;

/// Flat reputation cut applied to the losing party (open question (a)).
pub const PENALTY_FACTOR: f64 = 0.10;

#[derive(Debug, Clone, Copy, Default)]
pub struct PenaltyTally {
    pub for_reputation: f64,
    pub against_reputation: f64,
}

impl PenaltyTally {
    pub fn total(&self) -> f64 {
        self.for_reputation + self.against_reputation
    }
}

pub fn tally(peerset: &PeerSet, votes: &[PenaltyVote]) -> PenaltyTally {
    let mut result = PenaltyTally::default();
    for vote in votes {
        let weight = peerset
            .get(&vote.voting_peer)
            .map(|p| p.reputation)
            .unwrap_or(0.0);
        if vote.vote_for {
            result.for_reputation += weight;
        } else {
            result.against_reputation += weight;
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyOutcome {
    AccusedPenalized,
    AccuserPenalized,
    NoQuorum,
}

/// Resolves a tally against the registered peer set's total reputation.
/// Quorum requires the votes cast to cover more than `QUORUM_THRESHOLD` of
/// total reputation; among quorum-reaching votes, the side with strictly
/// more weight wins. A tie at quorum leaves the accuser penalized, since an
/// unresolved accusation should not stand unpunished (spec.md §9(a)).
pub fn resolve(peerset: &PeerSet, tally: PenaltyTally) -> PenaltyOutcome {
    let total = peerset.total_reputation();
    if total <= 0.0 || tally.total() / total <= QUORUM_THRESHOLD {
        return PenaltyOutcome::NoQuorum;
    }
    if tally.for_reputation > tally.against_reputation {
        PenaltyOutcome::AccusedPenalized
    } else {
        PenaltyOutcome::AccuserPenalized
    }
}

/// Applies `outcome` by cutting the losing party's reputation by
/// [`PENALTY_FACTOR`]. A no-op on [`PenaltyOutcome::NoQuorum`].
pub fn apply_outcome(peerset: &PeerSet, accuser_domain: &str, accused_domain: &str, outcome: PenaltyOutcome) {
    let factor = 1.0 - PENALTY_FACTOR;
    match outcome {
        PenaltyOutcome::AccusedPenalized => peerset.adjust_reputation(accused_domain, factor),
        PenaltyOutcome::AccuserPenalized => peerset.adjust_reputation(accuser_domain, factor),
        PenaltyOutcome::NoQuorum => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staeon_core::Address;

    fn peerset_with(reps: &[(&str, f64)]) -> PeerSet {
        let set = PeerSet::new("observer");
        for (domain, reputation) in reps {
            set.upsert(staeon_core::Peer {
                domain: domain.to_string(),
                reputation: *reputation,
                first_registered: chrono::Utc::now(),
                payout_address: Address::from_payload(&[3u8; 20]),
            });
        }
        set
    }

    #[test]
    fn no_quorum_below_threshold() {
        let set = peerset_with(&[("a", 40.0), ("b", 60.0)]);
        let votes = vec![PenaltyVote {
            epoch: 1,
            penalized_peer: "b".into(),
            voting_peer: "a".into(),
            vote_for: true,
        }];
        let t = tally(&set, &votes);
        assert_eq!(resolve(&set, t), PenaltyOutcome::NoQuorum);
    }

    #[test]
    fn majority_for_penalizes_accused() {
        let set = peerset_with(&[("a", 40.0), ("b", 60.0)]);
        let votes = vec![
            PenaltyVote { epoch: 1, penalized_peer: "x".into(), voting_peer: "a".into(), vote_for: true },
            PenaltyVote { epoch: 1, penalized_peer: "x".into(), voting_peer: "b".into(), vote_for: true },
        ];
        let t = tally(&set, &votes);
        assert_eq!(resolve(&set, t), PenaltyOutcome::AccusedPenalized);
        apply_outcome(&set, "accuser", "x", PenaltyOutcome::AccusedPenalized);
    }
}
