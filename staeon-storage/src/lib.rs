//! Postgres-backed persistence for the entities in spec.md §6's persisted
//! state layout: ledger entries, peers, the mempool's validated transactions
//! and movements, rejections, closed epoch summaries, epoch-hash pushes, and
//! penalty votes. JSONB columns carry the full entity for forward-compatible
//! reads; a handful of flat columns exist purely for indexing.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

use staeon_core::{
    Address, EpochHashPush, EpochSummary, LedgerEntry, Movement, NodePenalization, PenaltyVote,
    Peer, Rejection, Sha256Hash, ValidatedTransaction,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_entry(&self, address: &Address) -> Result<Option<LedgerEntry>>;
    async fn upsert_entry(&self, entry: &LedgerEntry) -> Result<()>;
    /// Every ledger entry, used to hydrate the in-memory [`staeon_consensus::Ledger`]
    /// on process start.
    async fn all_entries(&self) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait PeerStore: Send + Sync {
    async fn upsert_peer(&self, peer: &Peer) -> Result<()>;
    async fn get_peer(&self, domain: &str) -> Result<Option<Peer>>;
    /// All known peers, ordered by reputation descending (spec.md §4.2 rank).
    async fn list_peers_by_reputation(&self) -> Result<Vec<Peer>>;
}

#[async_trait]
pub trait MempoolStore: Send + Sync {
    async fn insert_transaction(&self, epoch: i64, tx: &ValidatedTransaction) -> Result<()>;
    async fn insert_movements(
        &self,
        txid: &Sha256Hash,
        timestamp: DateTime<Utc>,
        movements: &[Movement],
    ) -> Result<()>;
    async fn insert_rejection(&self, rejection: &Rejection) -> Result<()>;
    async fn transactions_for_epoch(&self, epoch: i64) -> Result<Vec<ValidatedTransaction>>;
    async fn rejections_for_txid(&self, txid: &Sha256Hash) -> Result<Vec<Rejection>>;
    async fn clear_epoch(&self, epoch: i64) -> Result<()>;
    /// Movements at or after `since`, newest first, capped at `limit`
    /// (spec.md §6 `/staeon/ledger/?sync_start=` — up to 500 rows). Each
    /// movement is paired with the timestamp of the transaction that
    /// produced it, since the wire format reports it alongside the amount.
    async fn movements_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<(Movement, DateTime<Utc>)>>;
    async fn movements_for_address(&self, address: &Address, limit: i64) -> Result<Vec<(Movement, DateTime<Utc>)>>;
}

#[async_trait]
pub trait EpochStore: Send + Sync {
    async fn save_summary(&self, summary: &EpochSummary) -> Result<()>;
    async fn get_summary(&self, epoch: i64) -> Result<Option<EpochSummary>>;
    async fn save_push(&self, push: &EpochHashPush) -> Result<()>;
    async fn get_push(
        &self,
        epoch: i64,
        from_domain: &str,
        to_domain: &str,
    ) -> Result<Option<EpochHashPush>>;
    async fn save_penalty_vote(&self, vote: &PenaltyVote) -> Result<()>;
    async fn penalty_votes_for(&self, epoch: i64, penalized_peer: &str) -> Result<Vec<PenaltyVote>>;
    async fn save_penalization(&self, penalization: &NodePenalization) -> Result<()>;
    /// Distinct `(accused_domain, accuser_domain)` pairs accused during `epoch`,
    /// used to drive the penalty-vote tally at the next epoch boundary
    /// (spec.md §4.8 step 4) without replaying every individual accusation.
    async fn accusations_for_epoch(&self, epoch: i64) -> Result<Vec<(String, String)>>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        info!("running staeon-storage schema migration");
        sqlx::query(
            r#"
        CREATE TABLE IF NOT EXISTS ledger_entries(
            address TEXT PRIMARY KEY,
            data JSONB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS peers(
            domain TEXT PRIMARY KEY,
            data JSONB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS validated_transactions(
            txid TEXT PRIMARY KEY,
            epoch BIGINT NOT NULL,
            data JSONB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_validated_transactions_epoch
            ON validated_transactions(epoch);
        CREATE TABLE IF NOT EXISTS movements(
            id BIGSERIAL PRIMARY KEY,
            txid TEXT NOT NULL,
            address TEXT NOT NULL,
            ts TIMESTAMPTZ NOT NULL,
            data JSONB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_movements_address ON movements(address);
        CREATE INDEX IF NOT EXISTS idx_movements_ts ON movements(ts DESC);
        CREATE TABLE IF NOT EXISTS rejections(
            txid TEXT NOT NULL,
            rejecting_domain TEXT NOT NULL,
            data JSONB NOT NULL,
            PRIMARY KEY(txid, rejecting_domain)
        );
        CREATE TABLE IF NOT EXISTS epoch_summaries(
            epoch BIGINT PRIMARY KEY,
            data JSONB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS epoch_hash_pushes(
            epoch BIGINT NOT NULL,
            from_domain TEXT NOT NULL,
            to_domain TEXT NOT NULL,
            data JSONB NOT NULL,
            PRIMARY KEY(epoch, from_domain, to_domain)
        );
        CREATE TABLE IF NOT EXISTS penalty_votes(
            epoch BIGINT NOT NULL,
            penalized_peer TEXT NOT NULL,
            voting_peer TEXT NOT NULL,
            data JSONB NOT NULL,
            PRIMARY KEY(epoch, penalized_peer, voting_peer)
        );
        CREATE TABLE IF NOT EXISTS node_penalizations(
            id BIGSERIAL PRIMARY KEY,
            epoch BIGINT NOT NULL,
            accuser_domain TEXT NOT NULL,
            accused_domain TEXT NOT NULL,
            data JSONB NOT NULL
        );
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn get_entry(&self, address: &Address) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query("SELECT data FROM ledger_entries WHERE address = $1")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_entry(&self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO ledger_entries(address, data) VALUES ($1, $2)
             ON CONFLICT (address) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(entry.address.as_str())
        .bind(json!(entry))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query("SELECT data FROM ledger_entries").fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            out.push(serde_json::from_value(value)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl PeerStore for PgStore {
    async fn upsert_peer(&self, peer: &Peer) -> Result<()> {
        sqlx::query(
            "INSERT INTO peers(domain, data) VALUES ($1, $2)
             ON CONFLICT (domain) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(&peer.domain)
        .bind(json!(peer))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_peer(&self, domain: &str) -> Result<Option<Peer>> {
        let row = sqlx::query("SELECT data FROM peers WHERE domain = $1")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn list_peers_by_reputation(&self) -> Result<Vec<Peer>> {
        let rows = sqlx::query(
            "SELECT data FROM peers ORDER BY (data->>'reputation')::double precision DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            out.push(serde_json::from_value(value)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl MempoolStore for PgStore {
    async fn insert_transaction(&self, epoch: i64, tx: &ValidatedTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO validated_transactions(txid, epoch, data) VALUES ($1, $2, $3)
             ON CONFLICT (txid) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(tx.txid.to_hex())
        .bind(epoch)
        .bind(json!(tx))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_movements(
        &self,
        txid: &Sha256Hash,
        timestamp: DateTime<Utc>,
        movements: &[Movement],
    ) -> Result<()> {
        for movement in movements {
            sqlx::query("INSERT INTO movements(txid, address, ts, data) VALUES ($1, $2, $3, $4)")
                .bind(txid.to_hex())
                .bind(movement.address.as_str())
                .bind(timestamp)
                .bind(json!(movement))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn insert_rejection(&self, rejection: &Rejection) -> Result<()> {
        sqlx::query(
            "INSERT INTO rejections(txid, rejecting_domain, data) VALUES ($1, $2, $3)
             ON CONFLICT (txid, rejecting_domain) DO NOTHING",
        )
        .bind(rejection.txid.to_hex())
        .bind(&rejection.rejecting_domain)
        .bind(json!(rejection))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transactions_for_epoch(&self, epoch: i64) -> Result<Vec<ValidatedTransaction>> {
        let rows = sqlx::query("SELECT data FROM validated_transactions WHERE epoch = $1")
            .bind(epoch)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            out.push(serde_json::from_value(value)?);
        }
        Ok(out)
    }

    async fn rejections_for_txid(&self, txid: &Sha256Hash) -> Result<Vec<Rejection>> {
        let rows = sqlx::query("SELECT data FROM rejections WHERE txid = $1")
            .bind(txid.to_hex())
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            out.push(serde_json::from_value(value)?);
        }
        Ok(out)
    }

    async fn clear_epoch(&self, epoch: i64) -> Result<()> {
        sqlx::query("DELETE FROM validated_transactions WHERE epoch = $1")
            .bind(epoch)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn movements_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<(Movement, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT data, ts FROM movements WHERE ts >= $1 ORDER BY ts DESC LIMIT $2",
        )
        .bind(since)
        .bind(limit.min(500))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            let ts: DateTime<Utc> = row.try_get("ts")?;
            out.push((serde_json::from_value(value)?, ts));
        }
        Ok(out)
    }

    async fn movements_for_address(&self, address: &Address, limit: i64) -> Result<Vec<(Movement, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT data, ts FROM movements WHERE address = $1 ORDER BY ts DESC LIMIT $2",
        )
        .bind(address.as_str())
        .bind(limit.min(500))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            let ts: DateTime<Utc> = row.try_get("ts")?;
            out.push((serde_json::from_value(value)?, ts));
        }
        Ok(out)
    }
}

#[async_trait]
impl EpochStore for PgStore {
    async fn save_summary(&self, summary: &EpochSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO epoch_summaries(epoch, data) VALUES ($1, $2)
             ON CONFLICT (epoch) DO NOTHING",
        )
        .bind(summary.epoch)
        .bind(json!(summary))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_summary(&self, epoch: i64) -> Result<Option<EpochSummary>> {
        let row = sqlx::query("SELECT data FROM epoch_summaries WHERE epoch = $1")
            .bind(epoch)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn save_push(&self, push: &EpochHashPush) -> Result<()> {
        sqlx::query(
            "INSERT INTO epoch_hash_pushes(epoch, from_domain, to_domain, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (epoch, from_domain, to_domain) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(push.epoch)
        .bind(&push.from_domain)
        .bind(&push.to_domain)
        .bind(json!(push))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_push(
        &self,
        epoch: i64,
        from_domain: &str,
        to_domain: &str,
    ) -> Result<Option<EpochHashPush>> {
        let row = sqlx::query(
            "SELECT data FROM epoch_hash_pushes WHERE epoch = $1 AND from_domain = $2 AND to_domain = $3",
        )
        .bind(epoch)
        .bind(from_domain)
        .bind(to_domain)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn save_penalty_vote(&self, vote: &PenaltyVote) -> Result<()> {
        sqlx::query(
            "INSERT INTO penalty_votes(epoch, penalized_peer, voting_peer, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (epoch, penalized_peer, voting_peer) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(vote.epoch)
        .bind(&vote.penalized_peer)
        .bind(&vote.voting_peer)
        .bind(json!(vote))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn penalty_votes_for(&self, epoch: i64, penalized_peer: &str) -> Result<Vec<PenaltyVote>> {
        let rows = sqlx::query(
            "SELECT data FROM penalty_votes WHERE epoch = $1 AND penalized_peer = $2",
        )
        .bind(epoch)
        .bind(penalized_peer)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: serde_json::Value = row.try_get("data")?;
            out.push(serde_json::from_value(value)?);
        }
        Ok(out)
    }

    async fn save_penalization(&self, penalization: &NodePenalization) -> Result<()> {
        sqlx::query(
            "INSERT INTO node_penalizations(epoch, accuser_domain, accused_domain, data)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(penalization.epoch)
        .bind(&penalization.accuser_domain)
        .bind(&penalization.accused_domain)
        .bind(json!(penalization))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn accusations_for_epoch(&self, epoch: i64) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT accused_domain, accuser_domain FROM node_penalizations WHERE epoch = $1",
        )
        .bind(epoch)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let accused: String = row.try_get("accused_domain")?;
            let accuser: String = row.try_get("accuser_domain")?;
            out.push((accused, accuser));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staeon_core::Amount;

    #[tokio::test]
    #[ignore]
    async fn ledger_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for test");
        let store = PgStore::connect(&url, 5).await.unwrap();
        let address = Address::from_payload(&[3u8; 20]);
        let entry = LedgerEntry {
            address: address.clone(),
            balance: Amount::from_units(12_345_678),
            last_updated: Utc::now(),
        };
        store.upsert_entry(&entry).await.unwrap();
        let fetched = store.get_entry(&address).await.unwrap().unwrap();
        assert_eq!(fetched.balance, entry.balance);
    }
}
