use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// spec.md §3: `{domain, reputation, first_registered, payout_address}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub domain: String,
    pub reputation: f64,
    pub first_registered: DateTime<Utc>,
    pub payout_address: Address,
}

/// A signed peer-registration attestation, supplementing spec.md §6's
/// `/staeon/peers/` POST body from `original_source/staeon_node/main/views.py`
/// (the registration carries a signature so an unregistered peer cannot
/// squat someone else's domain or payout address).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRegistration {
    pub domain: String,
    pub payout_address: Address,
    pub timestamp: DateTime<Utc>,
    pub signature: String,
}

/// Serializable summary returned by `GET /staeon/peers/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub domain: String,
    pub reputation: f64,
    pub rank: u64,
    pub percent: f64,
    pub percentile: f64,
    pub payout_address: Address,
}
