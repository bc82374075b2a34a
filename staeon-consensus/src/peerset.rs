//! spec.md §4.5: the registered peer set and the reputation-weighted
//! ranking/percentile/consensus-line math the shuffle and penalty-quorum
//! logic both depend on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use staeon_core::{Address, Peer, PeerView};

pub struct PeerSet {
    my_domain: String,
    peers: RwLock<HashMap<String, Peer>>,
}

impl PeerSet {
    pub fn new(my_domain: impl Into<String>) -> Self {
        Self {
            my_domain: my_domain.into(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn my_domain(&self) -> &str {
        &self.my_domain
    }

    pub fn upsert(&self, peer: Peer) {
        self.peers.write().insert(peer.domain.clone(), peer);
    }

    pub fn get(&self, domain: &str) -> Option<Peer> {
        self.peers.read().get(domain).cloned()
    }

    pub fn my_node(&self) -> Option<Peer> {
        self.get(&self.my_domain)
    }

    /// Ranked by reputation desc, then `first_registered` asc, then domain
    /// asc — spec.md §3's tie-break order for the shuffle and for `/peers/`.
    pub fn ranked(&self) -> Vec<Peer> {
        let mut v: Vec<Peer> = self.peers.read().values().cloned().collect();
        v.sort_by(|a, b| {
            b.reputation
                .partial_cmp(&a.reputation)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.first_registered.cmp(&b.first_registered))
                .then_with(|| a.domain.cmp(&b.domain))
        });
        v
    }

    pub fn total_reputation(&self) -> f64 {
        self.peers.read().values().map(|p| p.reputation).sum()
    }

    pub fn rank_of(&self, domain: &str) -> Option<usize> {
        self.ranked().iter().position(|p| p.domain == domain)
    }

    /// `rep_percent(p) = p.reputation / total_reputation * 100` (spec.md §4.5).
    pub fn rep_percent(&self, domain: &str) -> f64 {
        let total = self.total_reputation();
        if total <= 0.0 {
            return 0.0;
        }
        self.get(domain).map(|p| p.reputation / total * 100.0).unwrap_or(0.0)
    }

    /// `rep_percentile(p) = (p.reputation + sum(q.reputation for q ranking
    /// below p)) / total * 100` (spec.md §4.5): the cumulative reputation
    /// share held by `p` together with every peer ranked beneath it.
    pub fn rep_percentile(&self, domain: &str) -> f64 {
        let total = self.total_reputation();
        if total <= 0.0 {
            return 0.0;
        }
        let ranked = self.ranked();
        let Some(pos) = ranked.iter().position(|p| p.domain == domain) else {
            return 0.0;
        };
        let cumulative: f64 = ranked[pos..].iter().map(|p| p.reputation).sum();
        cumulative / total * 100.0
    }

    /// `consensus_line()`: the rank `r` (0-indexed from the top of the
    /// reputation ordering, as returned by [`PeerSet::rank_of`]) of the
    /// lowest-reputation peer whose cumulative-from-the-bottom reputation
    /// first exceeds half the total — spec.md §4.5. Peers at or above this
    /// rank hold collective majority weight; used to decide penalty quorum
    /// (via [`crate::penalty`]) and rejection-dominance at `apply_epoch`.
    pub fn consensus_line(&self) -> usize {
        let total = self.total_reputation();
        let descending = self.ranked();
        if total <= 0.0 {
            return 0;
        }
        let mut ascending = descending.clone();
        ascending.reverse();
        let mut cumulative = 0.0;
        for peer in &ascending {
            cumulative += peer.reputation;
            if cumulative > total / 2.0 {
                return descending
                    .iter()
                    .position(|p| p.domain == peer.domain)
                    .unwrap_or(0);
            }
        }
        descending.len().saturating_sub(1)
    }

    pub fn adjust_reputation(&self, domain: &str, factor: f64) {
        if let Some(peer) = self.peers.write().get_mut(domain) {
            peer.reputation *= factor;
        }
    }

    pub fn views(&self, page: usize, per_page: usize) -> Vec<PeerView> {
        let total = self.total_reputation();
        let ranked = self.ranked();
        let start = page.saturating_mul(per_page);
        ranked
            .into_iter()
            .enumerate()
            .skip(start)
            .take(per_page)
            .map(|(idx, peer)| PeerView {
                percent: if total > 0.0 { peer.reputation / total } else { 0.0 },
                percentile: self.rep_percentile(&peer.domain),
                rank: idx as u64,
                domain: peer.domain,
                reputation: peer.reputation,
                payout_address: peer.payout_address,
            })
            .collect()
    }

    pub fn domains(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn payout_address_of(&self, domain: &str) -> Option<Address> {
        self.get(domain).map(|p| p.payout_address)
    }

    pub fn registered_at(&self, domain: &str) -> Option<DateTime<Utc>> {
        self.get(domain).map(|p| p.first_registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staeon_core::Address;

    fn peer(domain: &str, reputation: f64) -> Peer {
        Peer {
            domain: domain.to_string(),
            reputation,
            first_registered: chrono::Utc::now(),
            payout_address: Address::from_payload(&[1u8; 20]),
        }
    }

    #[test]
    fn rep_percent_divides_by_total() {
        let set = PeerSet::new("a");
        set.upsert(peer("a", 30.0));
        set.upsert(peer("b", 70.0));
        assert!((set.rep_percent("a") - 30.0).abs() < 1e-9);
        assert!((set.rep_percent("b") - 70.0).abs() < 1e-9);
    }

    #[test]
    fn rep_percentile_is_cumulative_from_the_bottom() {
        let set = PeerSet::new("x");
        set.upsert(peer("low", 10.0));
        set.upsert(peer("mid", 20.0));
        set.upsert(peer("high", 70.0));
        // ranked desc: high, mid, low. percentile(mid) = (20+10)/100*100 = 30.
        assert!((set.rep_percentile("mid") - 30.0).abs() < 1e-9);
        assert!((set.rep_percentile("high") - 100.0).abs() < 1e-9);
        assert!((set.rep_percentile("low") - 10.0).abs() < 1e-9);
    }

    #[test]
    fn consensus_line_crosses_majority_from_bottom() {
        let set = PeerSet::new("x");
        set.upsert(peer("low", 10.0));
        set.upsert(peer("mid", 20.0));
        set.upsert(peer("high", 70.0));
        // ascending: low(10) cum=10, mid(20) cum=30, high(70) cum=100 > 50
        // descending order is high, mid, low so high's rank is 0
        assert_eq!(set.consensus_line(), 0);
    }

    #[test]
    fn adjust_reputation_scales_in_place() {
        let set = PeerSet::new("a");
        set.upsert(peer("a", 100.0));
        set.adjust_reputation("a", 0.9);
        assert!((set.get("a").unwrap().reputation - 90.0).abs() < 1e-9);
    }
}
