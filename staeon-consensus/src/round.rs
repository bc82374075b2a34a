//! spec.md §4.8 `ConsensusRound`: the five-step push/pull/penalty dance that
//! runs every epoch boundary once the shuffle matrix for the new epoch is
//! known.

use rand::seq::SliceRandom;
use rand::thread_rng;

use staeon_core::{mini_hashes, EpochHashPush, NodePenalization};

use crate::shuffle::{ShuffleMatrix, MATRIX_SIZE};

pub struct PushPlan {
    pub to_domain: String,
    pub mini_hash_indices: Vec<usize>,
}

pub struct PullExpectation {
    pub from_domain: String,
    pub mini_hash_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullClassification {
    Correct,
    Wrong { expected: Vec<String> },
    /// spec.md §9 open question (d): the expected sender never pushed at
    /// all. Treated the same as `Wrong` for penalty-vote purposes.
    NotPresent,
}

/// Enumerates which mini-hash indices `domain` is responsible for pushing to
/// (or, with `reverse`, receiving from) each other ranked peer, per the
/// matrix columns that name `domain` at its own rank.
fn plans_for(matrix: &ShuffleMatrix, ranked_domains: &[String], domain: &str, reverse: bool) -> Vec<(String, Vec<usize>)> {
    let Some(rank) = ranked_domains.iter().position(|d| d == domain) else {
        return Vec::new();
    };
    let mut by_peer: Vec<(String, Vec<usize>)> = Vec::new();
    for mini_hash_index in 0..MATRIX_SIZE {
        let counterparties = if reverse {
            // who pushes mini_hash_index to me: scan every ranked peer and
            // check whether push_to(mini_hash_index, their_rank) names me.
            ranked_domains
                .iter()
                .enumerate()
                .filter(|(other_rank, other)| {
                    other.as_str() != domain
                        && matrix
                            .push_to(mini_hash_index, *other_rank)
                            .iter()
                            .any(|d| d == domain)
                })
                .map(|(_, other)| other.clone())
                .collect::<Vec<_>>()
        } else {
            matrix
                .push_to(mini_hash_index, rank)
                .into_iter()
                .filter(|d| d != domain)
                .collect()
        };
        for peer in counterparties {
            match by_peer.iter_mut().find(|(d, _)| *d == peer) {
                Some((_, indices)) => indices.push(mini_hash_index),
                None => by_peer.push((peer, vec![mini_hash_index])),
            }
        }
    }
    by_peer
}

pub fn consensus_pushes(matrix: &ShuffleMatrix, ranked_domains: &[String], my_domain: &str) -> Vec<PushPlan> {
    plans_for(matrix, ranked_domains, my_domain, false)
        .into_iter()
        .map(|(to_domain, mini_hash_indices)| PushPlan {
            to_domain,
            mini_hash_indices,
        })
        .collect()
}

pub fn consensus_pulls(matrix: &ShuffleMatrix, ranked_domains: &[String], my_domain: &str) -> Vec<PullExpectation> {
    plans_for(matrix, ranked_domains, my_domain, true)
        .into_iter()
        .map(|(from_domain, mini_hash_indices)| PullExpectation {
            from_domain,
            mini_hash_indices,
        })
        .collect()
}

/// spec.md §4.8 step 1: builds the signed push for `plan`, concatenating the
/// assigned mini-hashes in a freshly randomized order before signing.
pub fn build_push(
    epoch: i64,
    from_domain: &str,
    plan: &PushPlan,
    hashes: &[String],
    sign: impl FnOnce(&[u8]) -> String,
) -> EpochHashPush {
    let mut assigned: Vec<String> = plan
        .mini_hash_indices
        .iter()
        .filter_map(|&i| hashes.get(i).cloned())
        .collect();
    assigned.shuffle(&mut thread_rng());
    let mut push = EpochHashPush {
        epoch,
        from_domain: from_domain.to_string(),
        to_domain: plan.to_domain.clone(),
        hashes: assigned.join(""),
        signature: String::new(),
    };
    push.signature = sign(&push.signing_message());
    push
}

/// spec.md §4.8 step 2: compares a received push against the set of
/// mini-hashes this node independently derived for `expectation`'s indices.
pub fn classify_pull(
    expectation: &PullExpectation,
    received: Option<&EpochHashPush>,
    hashes: &[String],
) -> PullClassification {
    let Some(push) = received else {
        return PullClassification::NotPresent;
    };
    let expected: Vec<String> = expectation
        .mini_hash_indices
        .iter()
        .filter_map(|&i| hashes.get(i).cloned())
        .collect();
    let mut received_sorted = push.mini_hashes();
    let mut expected_sorted = expected.clone();
    received_sorted.sort();
    expected_sorted.sort();
    if received_sorted == expected_sorted {
        PullClassification::Correct
    } else {
        PullClassification::Wrong { expected }
    }
}

/// spec.md §4.8 step 3: the accuser's signed claim that `accused_domain`
/// failed to correctly push to it.
pub fn build_penalization(
    epoch: i64,
    accuser_domain: &str,
    accused_domain: &str,
    correct_hash: &str,
    push: Option<EpochHashPush>,
    sign: impl FnOnce(&[u8]) -> String,
) -> NodePenalization {
    let mut message = correct_hash.to_string();
    message.push_str(accused_domain);
    NodePenalization {
        epoch,
        accuser_domain: accuser_domain.to_string(),
        accused_domain: accused_domain.to_string(),
        correct_hash: correct_hash.to_string(),
        push,
        signature: sign(message.as_bytes()),
    }
}

/// spec.md §4.8 step 4: how a third peer votes on an accusation, based on
/// its own independent classification of the accused's pull. `None` means
/// abstain — this node's own matrix doesn't expect a pull from the accused
/// at all, so it has no basis to corroborate or refute.
pub fn judge_penalization(
    my_domain: &str,
    accused_domain: &str,
    ranked_domains: &[String],
    matrix: &ShuffleMatrix,
    received: Option<&EpochHashPush>,
    hashes: &[String],
) -> Option<bool> {
    let expectations = consensus_pulls(matrix, ranked_domains, my_domain);
    let expectation = expectations.iter().find(|e| e.from_domain == accused_domain)?;
    match classify_pull(expectation, received, hashes) {
        PullClassification::Correct => Some(false),
        PullClassification::Wrong { .. } | PullClassification::NotPresent => Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shuffle::make_matrix;

    fn domains(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("peer{i}.example")).collect()
    }

    #[test]
    fn pushes_and_pulls_are_mutually_consistent() {
        let seed = staeon_core::Sha256Hash::of(b"epoch-seed");
        let ranked = domains(5);
        let matrix = make_matrix(&ranked, seed);
        for pusher in &ranked {
            for push in consensus_pushes(&matrix, &ranked, pusher) {
                let pulls = consensus_pulls(&matrix, &ranked, &push.to_domain);
                assert!(pulls.iter().any(|p| &p.from_domain == pusher));
            }
        }
    }

    #[test]
    fn classify_pull_detects_mismatch() {
        let seed = staeon_core::Sha256Hash::of(b"epoch-seed");
        let hashes = mini_hashes(seed, 5);
        let expectation = PullExpectation {
            from_domain: "peer0.example".into(),
            mini_hash_indices: vec![0, 1],
        };
        let correct_push = EpochHashPush {
            epoch: 1,
            from_domain: "peer0.example".into(),
            to_domain: "me.example".into(),
            hashes: format!("{}{}", hashes[0], hashes[1]),
            signature: "sig".into(),
        };
        assert_eq!(
            classify_pull(&expectation, Some(&correct_push), &hashes),
            PullClassification::Correct
        );
        assert_eq!(
            classify_pull(&expectation, None, &hashes),
            PullClassification::NotPresent
        );
    }
}
