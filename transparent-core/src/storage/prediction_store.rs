use crate::error::Result;
use crate::storage::payout_store::insert_contribution;
use crate::storage::{from_millis, parse_column, to_millis, Storage, Table};
use crate::types::{ContributionKind, ContributionRecord, Lamports, PredictionRecord, WalletAddress};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

pub struct PredictionStore<'a> {
    storage: &'a Storage,
}

impl<'a> PredictionStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Store a prediction on an active game, with the stake transfer that
    /// paid for it. Returns `None` once the game has ended or been cancelled.
    pub async fn place_prediction(
        &self,
        game_id: &str,
        bettor: &WalletAddress,
        bettor_name: &str,
        predicted_winner: &WalletAddress,
        amount: Lamports,
        signature: &str,
    ) -> Result<Option<PredictionRecord>> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active = tx
            .query_row(
                "SELECT 1 FROM games WHERE id = ?1 AND status IN ('waiting', 'playing')",
                params![game_id],
                |_| Ok(()),
            )
            .optional()?;
        if active.is_none() {
            return Ok(None);
        }

        let last_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM predictions WHERE game_id = ?1",
            params![game_id],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        let prediction = PredictionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            game_id: game_id.to_string(),
            bettor: bettor.clone(),
            bettor_name: bettor_name.to_string(),
            predicted_winner: predicted_winner.clone(),
            amount,
            seq: last_seq as u32 + 1,
            settled: false,
            created_at: now,
        };

        tx.execute(
            "INSERT INTO predictions
             (id, game_id, bettor_wallet, bettor_name, predicted_winner_wallet, amount, seq, settled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                prediction.id,
                prediction.game_id,
                prediction.bettor.as_str(),
                prediction.bettor_name,
                prediction.predicted_winner.as_str(),
                prediction.amount.as_u64() as i64,
                prediction.seq,
                to_millis(now),
            ],
        )?;
        insert_contribution(
            &tx,
            &ContributionRecord {
                game_id: game_id.to_string(),
                wallet: bettor.clone(),
                amount,
                kind: ContributionKind::Prediction,
                signature: signature.to_string(),
                created_at: now,
            },
        )?;
        tx.commit()?;
        drop(conn);

        tracing::info!(
            "{} predicted {} wins game {} ({})",
            bettor,
            predicted_winner,
            game_id,
            amount
        );
        self.storage.notify(game_id, Table::Predictions);
        Ok(Some(prediction))
    }

    pub async fn mark_settled(&self, game_id: &str) -> Result<usize> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE predictions SET settled = 1 WHERE game_id = ?1 AND settled = 0",
            params![game_id],
        )?;

        drop(conn);
        if updated > 0 {
            self.storage.notify(game_id, Table::Predictions);
        }
        Ok(updated)
    }

    pub async fn list_predictions(&self, game_id: &str) -> Result<Vec<PredictionRecord>> {
        let conn = self.storage.get_connection().await;
        Ok(query_predictions(&conn, game_id)?)
    }
}

pub(crate) fn query_predictions(
    conn: &Connection,
    game_id: &str,
) -> rusqlite::Result<Vec<PredictionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, game_id, bettor_wallet, bettor_name, predicted_winner_wallet, amount, seq,
                settled, created_at
         FROM predictions WHERE game_id = ?1 ORDER BY seq",
    )?;

    let predictions = stmt
        .query_map(params![game_id], |row| {
            Ok(PredictionRecord {
                id: row.get(0)?,
                game_id: row.get(1)?,
                bettor: parse_column(row, 2, "bettor_wallet")?,
                bettor_name: row.get(3)?,
                predicted_winner: parse_column(row, 4, "predicted_winner_wallet")?,
                amount: Lamports(row.get::<_, i64>(5)? as u64),
                seq: row.get(6)?,
                settled: row.get(7)?,
                created_at: from_millis(row.get(8)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(predictions)
}
