//! The HTTP surface spec.md §6 enumerates. Out of scope: the administrative
//! dashboard's HTML rendering (spec.md §1) — every endpoint below answers in
//! JSON or plain text instead of the original HTML page.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use staeon_config::NodeIdentity;
use staeon_consensus::{
    judge_penalization, AcceptOutcome, ConsensusError, Ledger, Mempool, PeerSet, ShuffleMatrix,
};
use staeon_core::{
    Address, EpochHashPush, NodePenalization, PeerRegistration, PenaltyVote, Rejection,
    Sha256Hash, Transaction,
};
use staeon_gossip::GossipService;
use staeon_storage::{EpochStore, LedgerStore, MempoolStore, PeerStore, PgStore};

/// Everything this node derived for one epoch's consensus round: the
/// reputation-rank snapshot and shuffle matrix the round was assigned from,
/// and this node's own mini-hashes for that epoch — the inputs
/// `staeon_consensus::round::judge_penalization` (spec.md §4.8 step 4) needs
/// to independently corroborate or refute an incoming accusation.
pub struct RoundContext {
    pub ranked_domains: Vec<String>,
    pub matrix: Arc<ShuffleMatrix>,
    pub hashes: Vec<String>,
}

/// Everything a request handler needs, shared across the process.
#[derive(Clone)]
pub struct RpcState {
    pub store: Arc<PgStore>,
    pub ledger: Arc<Ledger>,
    pub mempool: Arc<Mempool>,
    pub peerset: Arc<PeerSet>,
    pub gossip: Arc<GossipService>,
    pub identity: Arc<NodeIdentity>,
    /// This epoch's gossip fan-out targets, refreshed by the node's epoch
    /// driver from the shuffle matrix (spec.md §4.9).
    pub gossip_targets: Arc<RwLock<Vec<String>>>,
    /// Recent epochs' [`RoundContext`]s, keyed by the epoch the round
    /// operated over. The node's epoch driver inserts one entry per closed
    /// epoch and prunes old ones; `consensus_penalty`/`consensus_vote`
    /// handlers read from it to vote on incoming accusations.
    pub rounds: Arc<RwLock<HashMap<i64, RoundContext>>>,
}

impl RpcState {
    fn targets(&self) -> Vec<String> {
        self.gossip_targets.read().clone()
    }
}

pub async fn serve(addr: SocketAddr, state: RpcState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("staeon RPC listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route(
            "/staeon/transaction/",
            post(submit_transaction),
        )
        .route(
            "/staeon/rejections/",
            get(list_rejections).post(submit_rejection),
        )
        .route("/staeon/peers/", get(list_peers).post(register_peer))
        .route("/staeon/consensus/push", post(consensus_push))
        .route("/staeon/consensus/penalty", post(consensus_penalty))
        .route("/staeon/consensus/vote", post(consensus_vote))
        .route("/staeon/ledger/", get(ledger_query))
        .route("/staeon/summary/", get(summary))
        .with_state(state)
}

/// Maps spec.md §7's error taxonomy to HTTP status: InvalidTransaction /
/// ExpiredTimestamp / InvalidPush / InvalidPenalty / InvalidRegistration all
/// answer 400 with a human-readable reason. RejectedTransaction is not an
/// error — it is a successful 200 "OK".
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

fn bad_request(reason: impl std::fmt::Display) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, format!("Invalid: {reason}"))
}

#[derive(Deserialize)]
struct TransactionForm {
    tx: String,
    /// spec.md supplement (`tx_util.py::make_transaction_authorization`): an
    /// optional [`staeon_consensus::mempool::TxAuthorization`], JSON-encoded,
    /// from a peer that already validated this tx against its own ledger
    /// state. Absent for a tx submitted directly by its originator.
    authorization: Option<String>,
}

async fn submit_transaction(
    State(state): State<RpcState>,
    Form(form): Form<TransactionForm>,
) -> Result<String, ApiError> {
    let tx: Transaction = serde_json::from_str(&form.tx).map_err(bad_request)?;
    let now = Utc::now();
    let domain = state.identity.domain.clone();
    let identity = state.identity.clone();

    let vouched = match &form.authorization {
        Some(raw) => {
            let authorization: staeon_consensus::mempool::TxAuthorization =
                serde_json::from_str(raw).map_err(bad_request)?;
            authorization.txid == tx.txid
                && state
                    .peerset
                    .get(&authorization.domain)
                    .is_some_and(|p| staeon_consensus::mempool::verify_tx_authorization(&authorization, &p.payout_address))
        }
        None => false,
    };

    let outcome = if vouched {
        state
            .mempool
            .accept_tx_authorized(tx.clone(), now, &domain, move |msg| identity.sign(msg))
            .map_err(bad_request)?
    } else {
        state
            .mempool
            .accept_tx(tx.clone(), now, &domain, move |msg| identity.sign(msg))
            .map_err(bad_request)?
    };

    match outcome {
        AcceptOutcome::AlreadyKnown => {}
        AcceptOutcome::Accepted(_) => {
            let authorization = staeon_consensus::mempool::build_tx_authorization(tx.txid, &domain, |msg| {
                state.identity.sign(msg)
            });
            let authorization_json = serde_json::to_string(&authorization).ok();
            state.gossip.broadcast_transaction(&tx, authorization_json.as_deref(), &state.targets());
        }
        AcceptOutcome::Rejected(_, ref rejection) => {
            state.gossip.broadcast_rejection(rejection, &state.targets());
        }
    }
    record_outcome(&state, &tx, &outcome).await;
    Ok("OK".to_string())
}

async fn record_outcome(state: &RpcState, tx: &Transaction, outcome: &AcceptOutcome) {
    let epoch = staeon_core::clock::epoch_of(tx.timestamp);
    if let AcceptOutcome::AlreadyKnown = outcome {
        return;
    }
    let validated = match outcome {
        AcceptOutcome::Accepted(v) => v,
        AcceptOutcome::Rejected(v, _) => v,
        AcceptOutcome::AlreadyKnown => unreachable!(),
    };
    if let Err(e) = state.store.insert_transaction(epoch, validated).await {
        warn!("failed to persist validated transaction: {e}");
    }
    let movements = state.mempool.movements_for_txid(&tx.txid);
    if !movements.is_empty() {
        if let Err(e) = state.store.insert_movements(&tx.txid, tx.timestamp, &movements).await {
            warn!("failed to persist movements: {e}");
        }
    }
    if let AcceptOutcome::Rejected(_, rejection) = outcome {
        if let Err(e) = state.store.insert_rejection(rejection).await {
            warn!("failed to persist rejection: {e}");
        }
    }
}

#[derive(Deserialize)]
struct RejectionForm {
    domain: String,
    txid: String,
    signature: String,
}

async fn submit_rejection(
    State(state): State<RpcState>,
    Form(form): Form<RejectionForm>,
) -> Result<String, ApiError> {
    let txid = Sha256Hash::from_hex(&form.txid).map_err(bad_request)?;
    let peer = state
        .peerset
        .get(&form.domain)
        .ok_or_else(|| bad_request(ConsensusError::UnknownPeer(form.domain.clone())))?;
    let recovers = staeon_crypto::recover(txid.as_bytes(), &form.signature)
        .map(|pk| staeon_crypto::pubkey_to_address(&pk) == peer.payout_address)
        .unwrap_or(false);
    if !recovers {
        return Err(bad_request("rejection signature does not recover to the claimed domain"));
    }
    let rejection = Rejection {
        txid,
        rejecting_domain: form.domain,
        signature: form.signature,
    };
    if state.mempool.record_rejection(rejection.clone()) {
        state.gossip.broadcast_rejection(&rejection, &state.targets());
        if let Err(e) = state.store.insert_rejection(&rejection).await {
            warn!("failed to persist rejection: {e}");
        }
    }
    Ok("OK".to_string())
}

#[derive(Deserialize)]
struct RejectionsQuery {
    epoch: i64,
}

#[derive(Serialize)]
struct RejectionsResponse {
    rejections: Vec<(String, f64)>,
}

async fn list_rejections(
    State(state): State<RpcState>,
    Query(query): Query<RejectionsQuery>,
) -> Json<RejectionsResponse> {
    let txs = state.mempool.filter_for_epoch(query.epoch);
    let rejections = txs
        .into_iter()
        .filter_map(|tx| {
            let rejectors = state.mempool.rejections_for(&tx.txid);
            if rejectors.is_empty() {
                return None;
            }
            let pct: f64 = rejectors
                .iter()
                .map(|r| state.peerset.rep_percent(&r.rejecting_domain))
                .sum();
            Some((tx.txid.to_hex(), pct))
        })
        .collect();
    Json(RejectionsResponse { rejections })
}

#[derive(Deserialize)]
struct PeersQuery {
    page: Option<usize>,
    top: Option<String>,
}

async fn list_peers(State(state): State<RpcState>, Query(query): Query<PeersQuery>) -> Json<serde_json::Value> {
    const PER_PAGE: usize = 5;
    let peers = if query.top.is_some() {
        // spec.md §4.5 supplement (`main/views.py::peers`, `'top' in
        // request.GET` branch): peers whose `rep_percentile` exceeds 50%,
        // independent of the `?page=N` pagination path.
        let all = state.peerset.views(0, state.peerset.ranked().len().max(1));
        all.into_iter().filter(|p| p.percentile > 50.0).collect()
    } else {
        state.peerset.views(query.page.unwrap_or(0), PER_PAGE)
    };
    Json(serde_json::json!({ "peers": peers }))
}

#[derive(Deserialize)]
struct RegistrationForm {
    registration: String,
}

async fn register_peer(
    State(state): State<RpcState>,
    Form(form): Form<RegistrationForm>,
) -> Result<String, ApiError> {
    let registration: PeerRegistration = serde_json::from_str(&form.registration).map_err(bad_request)?;
    let message = registration_signing_message(&registration);
    let recovers = staeon_crypto::recover(&message, &registration.signature)
        .map(|pk| staeon_crypto::pubkey_to_address(&pk) == registration.payout_address)
        .unwrap_or(false);
    if !recovers {
        return Err(ApiError(StatusCode::BAD_REQUEST, ConsensusError::InvalidRegistration.to_string()));
    }
    let peer = staeon_core::Peer {
        domain: registration.domain.clone(),
        reputation: state
            .peerset
            .get(&registration.domain)
            .map(|p| p.reputation)
            .unwrap_or(1.0),
        first_registered: registration.timestamp,
        payout_address: registration.payout_address,
    };
    state.peerset.upsert(peer.clone());
    if let Err(e) = state.store.upsert_peer(&peer).await {
        warn!("failed to persist peer registration: {e}");
    }
    Ok("OK".to_string())
}

fn registration_signing_message(registration: &PeerRegistration) -> Vec<u8> {
    let mut msg = registration.domain.clone();
    msg.push_str(registration.payout_address.as_str());
    msg.push_str(&registration.timestamp.to_rfc3339());
    msg.into_bytes()
}

#[derive(Deserialize)]
struct PushForm {
    obj: String,
}

async fn consensus_push(
    State(state): State<RpcState>,
    Form(form): Form<PushForm>,
) -> Result<String, ApiError> {
    let push: EpochHashPush = serde_json::from_str(&form.obj).map_err(bad_request)?;
    let peer = state
        .peerset
        .get(&push.from_domain)
        .ok_or_else(|| bad_request(ConsensusError::UnknownPeer(push.from_domain.clone())))?;
    let recovers = staeon_crypto::recover(&push.signing_message(), &push.signature)
        .map(|pk| staeon_crypto::pubkey_to_address(&pk) == peer.payout_address)
        .unwrap_or(false);
    if !recovers {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            ConsensusError::InvalidPush(push.from_domain.clone()).to_string(),
        ));
    }
    if let Err(e) = state.store.save_push(&push).await {
        warn!("failed to persist epoch hash push: {e}");
    }
    Ok("OK".to_string())
}

#[derive(Deserialize)]
struct PenaltyForm {
    obj: String,
}

async fn consensus_penalty(
    State(state): State<RpcState>,
    Form(form): Form<PenaltyForm>,
) -> Result<String, ApiError> {
    let penalization: NodePenalization = serde_json::from_str(&form.obj).map_err(bad_request)?;
    let peer = state
        .peerset
        .get(&penalization.accuser_domain)
        .ok_or_else(|| bad_request(ConsensusError::UnknownPeer(penalization.accuser_domain.clone())))?;
    let mut message = penalization.correct_hash.clone();
    message.push_str(&penalization.accused_domain);
    let recovers = staeon_crypto::recover(message.as_bytes(), &penalization.signature)
        .map(|pk| staeon_crypto::pubkey_to_address(&pk) == peer.payout_address)
        .unwrap_or(false);
    if !recovers {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            ConsensusError::InvalidPenalty(penalization.accuser_domain.clone()).to_string(),
        ));
    }
    if let Err(e) = state.store.save_penalization(&penalization).await {
        warn!("failed to persist penalization: {e}");
    }

    // spec.md §4.8 step 4: vote on the accusation using this node's own view
    // of the round the accusation concerns. No cached round (e.g. we
    // hadn't derived a matrix for that epoch, or it's aged out) means we
    // abstain — the same as disagreeing with the accuser about assignment.
    if let Some(round) = state.rounds.read().get(&penalization.epoch) {
        if let Some(vote_for) = judge_penalization(
            &state.identity.domain,
            &penalization.accused_domain,
            &round.ranked_domains,
            &round.matrix,
            penalization.push.as_ref(),
            &round.hashes,
        ) {
            let vote = PenaltyVote {
                epoch: penalization.epoch,
                penalized_peer: penalization.accused_domain.clone(),
                voting_peer: state.identity.domain.clone(),
                vote_for,
            };
            if let Err(e) = state.store.save_penalty_vote(&vote).await {
                warn!("failed to persist own penalty vote: {e}");
            }
            state.gossip.broadcast_penalty_vote(&vote, &state.targets());
        }
    }
    Ok("OK".to_string())
}

#[derive(Deserialize)]
struct VoteForm {
    obj: String,
}

/// spec.md §4.8 step 5: receives a `PenaltyVote` (spec.md §3's data model
/// carries no signature field on the vote itself, unlike pushes and
/// penalizations) from a registered peer. spec.md §6's HTTP table doesn't
/// enumerate a vote endpoint explicitly, but §4.8 step 4 requires votes to be
/// "signed and gossiped" to reach the tally in [`staeon_consensus::penalty`],
/// so this mirrors `consensus/penalty`'s wire shape to carry them.
async fn consensus_vote(
    State(state): State<RpcState>,
    Form(form): Form<VoteForm>,
) -> Result<String, ApiError> {
    let vote: PenaltyVote = serde_json::from_str(&form.obj).map_err(bad_request)?;
    if state.peerset.get(&vote.voting_peer).is_none() {
        return Err(bad_request(ConsensusError::UnknownPeer(vote.voting_peer.clone())));
    }
    if let Err(e) = state.store.save_penalty_vote(&vote).await {
        warn!("failed to persist penalty vote: {e}");
    }
    Ok("OK".to_string())
}

#[derive(Deserialize)]
struct LedgerQuery {
    address: Option<String>,
    sync_start: Option<DateTime<Utc>>,
}

async fn ledger_query(State(state): State<RpcState>, Query(query): Query<LedgerQuery>) -> Result<Response, ApiError> {
    if let Some(address) = query.address {
        let address = Address::parse(&address).map_err(bad_request)?;
        let balance = state
            .ledger
            .entry(&address)
            .map(|e| e.balance.fixed8())
            .unwrap_or_else(|| staeon_core::Amount::ZERO.fixed8());
        return Ok(balance.into_response());
    }
    if let Some(since) = query.sync_start {
        let movements = state
            .store
            .movements_since(since, 500)
            .await
            .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let data: Vec<(String, String, String)> = movements
            .into_iter()
            .map(|(m, ts)| (m.address.into_string(), m.amount.fixed8(), ts.to_rfc3339()))
            .collect();
        return Ok(Json(serde_json::json!({ "data": data })).into_response());
    }
    Err(bad_request("expected `address` or `sync_start` query parameter"))
}

#[derive(Serialize)]
struct SummaryResponse {
    ledger_size: usize,
    total_balance: String,
    peer_count: usize,
    total_reputation: f64,
}

async fn summary(State(state): State<RpcState>) -> Json<SummaryResponse> {
    Json(SummaryResponse {
        ledger_size: state.ledger.len(),
        total_balance: state.ledger.total_balance().fixed8(),
        peer_count: state.peerset.ranked().len(),
        total_reputation: state.peerset.total_reputation(),
    })
}
