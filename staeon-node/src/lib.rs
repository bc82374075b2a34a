//! Wires the Staeon crates together into a running node: an axum RPC server
//! plus a background driver that closes each epoch and runs the
//! push/pull/penalty consensus round at the boundary (spec.md §4.7-§4.9).

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use staeon_config::{NodeIdentity, StaeonConfig};
use staeon_consensus::{
    build_penalization, build_push, classify_pull, consensus_pulls, consensus_pushes,
    make_matrix, penalty, EpochCloser, Ledger, Mempool, PeerSet, PullClassification,
};
use staeon_core::{clock, mini_hashes, Peer, Sha256Hash};
use staeon_gossip::{GossipConfig, GossipService};
use staeon_rpc::{serve, RoundContext, RpcState};
use staeon_storage::{EpochStore, LedgerStore, PeerStore, PgStore};

pub async fn run_node(config_path: PathBuf) -> Result<()> {
    init_logging();
    let cfg = StaeonConfig::load(&config_path).context("loading node config")?;
    info!("starting staeon node with config {:?}", config_path);

    let identity = Arc::new(
        NodeIdentity::load(Path::new(&cfg.network.identity_file)).context("loading node identity")?,
    );
    info!(domain = %identity.domain, "node identity loaded");

    let store = Arc::new(PgStore::connect(&cfg.db.url, cfg.db.pool_size).await?);

    let ledger = Arc::new(Ledger::seed(store.all_entries().await?));
    let peerset = Arc::new(hydrate_peerset(&store, &identity).await?);
    let mempool = Arc::new(Mempool::new(ledger.clone()));

    let gossip = Arc::new(GossipService::new(GossipConfig {
        worker_count: cfg.gossip.worker_count,
        queue_capacity: cfg.gossip.queue_capacity,
        request_timeout: StdDuration::from_secs(cfg.gossip.request_timeout_secs),
    }));

    let gossip_targets = Arc::new(RwLock::new(
        peerset
            .domains()
            .into_iter()
            .filter(|d| d != &identity.domain)
            .chain(cfg.network.bootstrap_peers.iter().cloned())
            .collect(),
    ));

    let state = RpcState {
        store,
        ledger,
        mempool,
        peerset,
        gossip,
        identity,
        gossip_targets,
        rounds: Arc::new(RwLock::new(HashMap::new())),
    };

    let addr: SocketAddr = cfg.api.rest_addr.parse().context("parsing api.rest_addr")?;
    let rpc_state = state.clone();
    let rpc_task = tokio::spawn(async move { serve(addr, rpc_state).await });

    let driver_task = tokio::spawn(async move { epoch_driver(state).await });

    tokio::select! {
        res = rpc_task => res??,
        res = driver_task => res??,
    }
    Ok(())
}

/// Ensures this node is registered in its own [`PeerSet`] (first boot has no
/// row for it yet) before hydrating the rest of the known peers.
async fn hydrate_peerset(store: &PgStore, identity: &NodeIdentity) -> Result<PeerSet> {
    let peerset = PeerSet::new(identity.domain.clone());
    for peer in store.list_peers_by_reputation().await? {
        peerset.upsert(peer);
    }
    if peerset.get(&identity.domain).is_none() {
        let me = Peer {
            domain: identity.domain.clone(),
            reputation: 1.0,
            first_registered: Utc::now(),
            payout_address: identity.payout_address.clone(),
        };
        store.upsert_peer(&me).await?;
        peerset.upsert(me);
    }
    Ok(peerset)
}

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Runs forever, closing one epoch and driving its consensus round at every
/// boundary (spec.md §4.7-§4.9). Errors from a single boundary are logged
/// and the driver moves on to the next one rather than aborting the node.
async fn epoch_driver(state: RpcState) -> Result<()> {
    let mut epoch = clock::epoch_of(Utc::now());
    loop {
        let wait = clock::seconds_til_next_epoch(Utc::now()).max(0.0);
        tokio::time::sleep(StdDuration::from_secs_f64(wait)).await;
        if let Err(e) = run_epoch_boundary(&state, epoch).await {
            warn!(epoch, error = ?e, "epoch boundary failed");
        }
        epoch += 1;
    }
}

async fn run_epoch_boundary(state: &RpcState, epoch: i64) -> Result<()> {
    if state.store.get_summary(epoch).await?.is_some() {
        // Already closed by a previous process lifetime (restart mid-epoch).
        return Ok(());
    }

    let mut rejection_dominated: HashSet<Sha256Hash> = HashSet::new();
    for tx in state.mempool.filter_for_epoch(epoch) {
        let rejectors = state.mempool.rejections_for(&tx.txid);
        if rejectors.is_empty() {
            continue;
        }
        let pct: f64 = rejectors
            .iter()
            .map(|r| state.peerset.rep_percent(&r.rejecting_domain))
            .sum();
        if pct > 50.0 {
            rejection_dominated.insert(tx.txid);
        }
    }

    let summary = {
        let closer = EpochCloser::new(&state.ledger, &state.mempool);
        closer.close_epoch(epoch, |_| false, |txid| rejection_dominated.contains(txid))?
    };
    state.store.save_summary(&summary).await?;
    for entry in state.ledger.entries_sorted_for_seed() {
        state.store.upsert_entry(&entry).await?;
    }
    info!(epoch, tx_count = summary.transaction_count, "epoch closed");

    apply_pending_penalty_votes(state, epoch).await?;

    let next_epoch = epoch + 1;
    let ranked_domains: Vec<String> = state.peerset.ranked().into_iter().map(|p| p.domain).collect();
    let matrix = Arc::new(make_matrix(&ranked_domains, summary.epoch_seed));
    let hashes = mini_hashes(summary.epoch_seed, 5);

    {
        let mut rounds = state.rounds.write();
        rounds.insert(
            next_epoch,
            RoundContext {
                ranked_domains: ranked_domains.clone(),
                matrix: matrix.clone(),
                hashes: hashes.clone(),
            },
        );
        rounds.retain(|&e, _| e + 2 >= epoch);
    }
    *state.gossip_targets.write() = ranked_domains
        .iter()
        .filter(|d| *d != &state.identity.domain)
        .cloned()
        .collect();

    push_step(state, next_epoch, &matrix, &ranked_domains, &hashes).await?;
    tokio::time::sleep(StdDuration::from_secs(clock::CLOSING_WINDOW_SECS as u64)).await;
    pull_step(state, next_epoch, &matrix, &ranked_domains, &hashes).await?;

    Ok(())
}

/// spec.md §4.8 step 5: resolves every accusation raised during `epoch`
/// against the votes it collected, then applies the reputation penalty to
/// whichever side lost.
async fn apply_pending_penalty_votes(state: &RpcState, epoch: i64) -> Result<()> {
    for (accused, accuser) in state.store.accusations_for_epoch(epoch).await? {
        let votes = state.store.penalty_votes_for(epoch, &accused).await?;
        let tally = penalty::tally(&state.peerset, &votes);
        let outcome = penalty::resolve(&state.peerset, tally);
        penalty::apply_outcome(&state.peerset, &accuser, &accused, outcome);
        if let Some(p) = state.peerset.get(&accused) {
            state.store.upsert_peer(&p).await?;
        }
        if let Some(p) = state.peerset.get(&accuser) {
            state.store.upsert_peer(&p).await?;
        }
    }
    Ok(())
}

/// spec.md §4.8 step 1: pushes this node's assigned mini-hashes to every peer
/// the matrix names for `next_epoch`.
async fn push_step(
    state: &RpcState,
    next_epoch: i64,
    matrix: &staeon_consensus::ShuffleMatrix,
    ranked_domains: &[String],
    hashes: &[String],
) -> Result<()> {
    let my_domain = state.identity.domain.clone();
    for plan in consensus_pushes(matrix, ranked_domains, &my_domain) {
        let identity = state.identity.clone();
        let push = build_push(next_epoch, &my_domain, &plan, hashes, move |msg| identity.sign(msg));
        state.store.save_push(&push).await?;
        state.gossip.broadcast_push(&push, std::slice::from_ref(&plan.to_domain));
    }
    Ok(())
}

/// spec.md §4.8 steps 2-3: checks every expected incoming push and raises a
/// signed accusation for anything wrong or missing.
async fn pull_step(
    state: &RpcState,
    next_epoch: i64,
    matrix: &staeon_consensus::ShuffleMatrix,
    ranked_domains: &[String],
    hashes: &[String],
) -> Result<()> {
    let my_domain = state.identity.domain.clone();
    for expectation in consensus_pulls(matrix, ranked_domains, &my_domain) {
        let received = state
            .store
            .get_push(next_epoch, &expectation.from_domain, &my_domain)
            .await?;
        let classification = classify_pull(&expectation, received.as_ref(), hashes);
        if matches!(classification, PullClassification::Correct) {
            continue;
        }
        let expected: Vec<String> = expectation
            .mini_hash_indices
            .iter()
            .filter_map(|&i| hashes.get(i).cloned())
            .collect();
        let correct_hash = expected.join("");
        let identity = state.identity.clone();
        let penalization = build_penalization(
            next_epoch,
            &my_domain,
            &expectation.from_domain,
            &correct_hash,
            received.clone(),
            move |msg| identity.sign(msg),
        );
        state.store.save_penalization(&penalization).await?;
        let targets = state.gossip_targets.read().clone();
        state.gossip.broadcast_penalization(&penalization, &targets);
    }
    Ok(())
}
