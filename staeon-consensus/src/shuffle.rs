//! spec.md §4.6: the deterministic 5x5 shuffle matrix each epoch derives
//! from the ranked peer list and the epoch seed, used to assign who pushes
//! which mini-hash to whom.

use staeon_core::Sha256Hash;

pub const MATRIX_SIZE: usize = 5;

/// `deterministic_shuffle(keys, seed, n)`: orders `keys` by
/// `SHA256(key || hex(seed) || n)`, a pure function of the inputs so every
/// honest node derives the identical ordering for a given `n`.
pub fn deterministic_shuffle(keys: &[String], seed: Sha256Hash, n: usize) -> Vec<String> {
    let mut scored: Vec<(Sha256Hash, String)> = keys
        .iter()
        .map(|key| {
            let mut msg = key.clone();
            msg.push_str(&seed.to_hex());
            msg.push_str(&n.to_string());
            (Sha256Hash::of(msg.as_bytes()), key.clone())
        })
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, key)| key).collect()
}

/// The 5x5 matrix of shuffled peer rankings: `matrix[i][j]` is the peer
/// ordering produced by `deterministic_shuffle` with `n = i * 5 + j`. Peers
/// are addressed by their rank in the epoch's canonical reputation ordering
/// (0 = highest reputation), so `matrix[i][j][rank]` names a domain.
pub struct ShuffleMatrix {
    columns: Vec<Vec<Vec<String>>>,
}

/// `make_matrix(ranked_domains, seed)`: builds the 5x5 shuffle matrix over
/// `ranked_domains` (already in reputation rank order).
pub fn make_matrix(ranked_domains: &[String], seed: Sha256Hash) -> ShuffleMatrix {
    let mut columns = Vec::with_capacity(MATRIX_SIZE);
    for i in 0..MATRIX_SIZE {
        let mut row = Vec::with_capacity(MATRIX_SIZE);
        for j in 0..MATRIX_SIZE {
            row.push(deterministic_shuffle(ranked_domains, seed, i * MATRIX_SIZE + j));
        }
        columns.push(row);
    }
    ShuffleMatrix { columns }
}

impl ShuffleMatrix {
    /// `push_to(mini_hash_index, rank)`: the set of domains a peer at `rank`
    /// pushes mini-hash `mini_hash_index` to — the `rank`-th entry of each of
    /// the 5 shuffled orderings `matrix[mini_hash_index][0..5]`, deduplicated.
    pub fn push_to(&self, mini_hash_index: usize, rank: usize) -> Vec<String> {
        let mut targets = Vec::new();
        if mini_hash_index >= MATRIX_SIZE {
            return targets;
        }
        for column in &self.columns[mini_hash_index] {
            if let Some(domain) = column.get(rank) {
                if !targets.contains(domain) {
                    targets.push(domain.clone());
                }
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("peer{i}.example")).collect()
    }

    #[test]
    fn deterministic_shuffle_is_stable_across_calls() {
        let seed = Sha256Hash::of(b"seed");
        let keys = domains(5);
        let a = deterministic_shuffle(&keys, seed, 3);
        let b = deterministic_shuffle(&keys, seed, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn different_n_generally_reorders() {
        let seed = Sha256Hash::of(b"seed");
        let keys = domains(5);
        let a = deterministic_shuffle(&keys, seed, 0);
        let b = deterministic_shuffle(&keys, seed, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn push_to_deduplicates_across_columns() {
        let seed = Sha256Hash::of(b"seed");
        let keys = domains(5);
        let matrix = make_matrix(&keys, seed);
        let targets = matrix.push_to(0, 2);
        let unique: std::collections::HashSet<_> = targets.iter().collect();
        assert_eq!(unique.len(), targets.len());
    }
}
