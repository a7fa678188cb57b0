use crate::error::Result;
use crate::storage::{from_millis, parse_column, to_millis, PhaseKey, Storage, Table};
use crate::types::{
    ContributionKind, ContributionRecord, Lamports, PayoutKind, PayoutRecord, WalletAddress,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

/// Escrow bookkeeping: money paid into a game's pot and the payouts owed from it.
pub struct PayoutStore<'a> {
    storage: &'a Storage,
}

impl<'a> PayoutStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Record a confirmed raise into the pot, but only while the game still
    /// sits at `expected`. Returns false, writing nothing, once it has moved on.
    pub async fn record_contribution(
        &self,
        contribution: &ContributionRecord,
        expected: &PhaseKey,
    ) -> Result<bool> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = tx
            .query_row(
                "SELECT 1 FROM games
                 WHERE id = ?1 AND status = ?2 AND game_phase IS ?3 AND current_round = ?4",
                params![
                    contribution.game_id,
                    expected.status.as_str(),
                    expected.phase.map(|p| p.as_str()),
                    expected.round,
                ],
                |_| Ok(()),
            )
            .optional()?;
        if current.is_none() {
            return Ok(false);
        }

        insert_contribution(&tx, contribution)?;
        tx.commit()?;
        drop(conn);

        self.storage.notify(&contribution.game_id, Table::Games);
        Ok(true)
    }

    pub async fn list_contributions(&self, game_id: &str) -> Result<Vec<ContributionRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT game_id, wallet, amount, kind, signature, created_at
             FROM pot_contributions WHERE game_id = ?1 ORDER BY created_at",
        )?;

        let contributions = stmt
            .query_map(params![game_id], |row| {
                Ok(ContributionRecord {
                    game_id: row.get(0)?,
                    wallet: parse_column(row, 1, "wallet")?,
                    amount: Lamports(row.get::<_, i64>(2)? as u64),
                    kind: parse_column(row, 3, "kind")?,
                    signature: row.get(4)?,
                    created_at: from_millis(row.get(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(contributions)
    }

    /// Store a payout plan. Rows that already exist are kept untouched.
    pub async fn record_plan(&self, game_id: &str, plan: &[PayoutRecord]) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        for payout in plan {
            tx.execute(
                "INSERT OR IGNORE INTO payouts (game_id, wallet, kind, amount, signature)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![
                    game_id,
                    payout.wallet.as_str(),
                    payout.kind.as_str(),
                    payout.amount.as_u64() as i64,
                ],
            )?;
        }

        tx.commit()?;
        drop(conn);

        self.storage.notify(game_id, Table::Payouts);
        Ok(())
    }

    /// Declare `winner` and swap in the pot and prediction plan that follows
    /// from it. Returns false, writing nothing, once the game is distributed
    /// or any pot or prediction payout has been sent.
    pub async fn replace_winner_plan(
        &self,
        game_id: &str,
        winner: &WalletAddress,
        plan: &[PayoutRecord],
    ) -> Result<bool> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let paid: i64 = tx.query_row(
            "SELECT COUNT(*) FROM payouts
             WHERE game_id = ?1 AND kind IN ('pot', 'prediction') AND signature IS NOT NULL",
            params![game_id],
            |row| row.get(0),
        )?;
        if paid > 0 {
            return Ok(false);
        }

        let updated = tx.execute(
            "UPDATE games SET winner = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'gameover' AND distributed = 0",
            params![winner.as_str(), to_millis(Utc::now()), game_id],
        )?;
        if updated == 0 {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM payouts WHERE game_id = ?1 AND kind IN ('pot', 'prediction')",
            params![game_id],
        )?;

        for payout in plan
            .iter()
            .filter(|p| matches!(p.kind, PayoutKind::Pot | PayoutKind::Prediction))
        {
            tx.execute(
                "INSERT INTO payouts (game_id, wallet, kind, amount, signature)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![
                    game_id,
                    payout.wallet.as_str(),
                    payout.kind.as_str(),
                    payout.amount.as_u64() as i64,
                ],
            )?;
        }

        tx.commit()?;
        drop(conn);

        self.storage.notify(game_id, Table::Games);
        self.storage.notify(game_id, Table::Payouts);
        Ok(true)
    }

    /// Attach the transfer signature to a payout. Returns false if it was already paid.
    pub async fn mark_paid(
        &self,
        game_id: &str,
        wallet: &WalletAddress,
        kind: PayoutKind,
        signature: &str,
    ) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE payouts SET signature = ?1
             WHERE game_id = ?2 AND wallet = ?3 AND kind = ?4 AND signature IS NULL",
            params![signature, game_id, wallet.as_str(), kind.as_str()],
        )?;

        drop(conn);
        if updated > 0 {
            self.storage.notify(game_id, Table::Payouts);
        }
        Ok(updated > 0)
    }

    pub async fn list_payouts(&self, game_id: &str) -> Result<Vec<PayoutRecord>> {
        let conn = self.storage.get_connection().await;
        Ok(query_payouts(&conn, game_id)?)
    }
}

/// Insert a contribution row inside a caller's transaction. Buy-ins and
/// raises grow `current_pot`; prediction stakes are held separately.
pub(crate) fn insert_contribution(
    tx: &Transaction<'_>,
    contribution: &ContributionRecord,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO pot_contributions (signature, game_id, wallet, amount, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            contribution.signature,
            contribution.game_id,
            contribution.wallet.as_str(),
            contribution.amount.as_u64() as i64,
            contribution.kind.as_str(),
            to_millis(contribution.created_at),
        ],
    )?;

    if contribution.kind != ContributionKind::Prediction {
        tx.execute(
            "UPDATE games SET current_pot = current_pot + ?1, updated_at = ?2 WHERE id = ?3",
            params![
                contribution.amount.as_u64() as i64,
                to_millis(contribution.created_at),
                contribution.game_id,
            ],
        )?;
    }

    tracing::info!(
        "Recorded {} of {} from {} for game {}",
        contribution.kind,
        contribution.amount,
        contribution.wallet,
        contribution.game_id
    );
    Ok(())
}

pub(crate) fn query_payouts(conn: &Connection, game_id: &str) -> rusqlite::Result<Vec<PayoutRecord>> {
    let mut stmt = conn.prepare(
        "SELECT game_id, wallet, kind, amount, signature FROM payouts
         WHERE game_id = ?1 ORDER BY kind, wallet",
    )?;

    let payouts = stmt
        .query_map(params![game_id], |row| {
            Ok(PayoutRecord {
                game_id: row.get(0)?,
                wallet: parse_column(row, 1, "wallet")?,
                kind: parse_column(row, 2, "kind")?,
                amount: Lamports(row.get::<_, i64>(3)? as u64),
                signature: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(payouts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{sample_game, temp_storage, wallet};
    use crate::storage::GameStore;
    use crate::types::{GamePhase, GameStatus};

    fn payout(who: &str, kind: PayoutKind, amount: u64) -> PayoutRecord {
        PayoutRecord {
            game_id: "g1".to_string(),
            wallet: wallet(who),
            kind,
            amount: Lamports(amount),
            signature: None,
        }
    }

    fn raise(signature: &str, amount: u64) -> ContributionRecord {
        ContributionRecord {
            game_id: "g1".to_string(),
            wallet: wallet("alice"),
            amount: Lamports(amount),
            kind: ContributionKind::Raise,
            signature: signature.to_string(),
            created_at: Utc::now(),
        }
    }

    async fn finished_game(storage: &Storage, room_code: &str) {
        let mut game = sample_game("g1", room_code);
        game.status = GameStatus::Gameover;
        game.payout_mode = crate::types::PayoutMode::WinnerTakeAll;
        game.winner = Some(wallet("alice"));
        GameStore::new(storage).insert_game(&game).await.unwrap();
    }

    #[tokio::test]
    async fn test_raise_only_lands_on_expected_phase() {
        let (_dir, storage) = temp_storage().await;
        let games = GameStore::new(&storage);
        let mut game = sample_game("g1", "700800");
        game.status = GameStatus::Playing;
        game.game_phase = Some(GamePhase::Answering);
        game.current_round = 1;
        games.insert_game(&game).await.unwrap();
        let payouts = PayoutStore::new(&storage);

        let answering = PhaseKey::of(&game);
        assert!(payouts.record_contribution(&raise("sig1", 50), &answering).await.unwrap());

        games
            .transition_status("g1", &[GameStatus::Playing], GameStatus::Cancelled)
            .await
            .unwrap();
        assert!(!payouts.record_contribution(&raise("sig2", 7), &answering).await.unwrap());

        let loaded = games.load_game("g1").await.unwrap();
        assert_eq!(loaded.current_pot, Lamports(50));
        let contributions = payouts.list_contributions("g1").await.unwrap();
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].signature, "sig1");
    }

    #[tokio::test]
    async fn test_mark_paid_once() {
        let (_dir, storage) = temp_storage().await;
        GameStore::new(&storage)
            .insert_game(&sample_game("g1", "700900"))
            .await
            .unwrap();
        let payouts = PayoutStore::new(&storage);

        payouts
            .record_plan("g1", &[payout("alice", PayoutKind::Pot, 70), payout("bob", PayoutKind::Pot, 30)])
            .await
            .unwrap();
        // Re-recording keeps the original rows
        payouts
            .record_plan("g1", &[payout("alice", PayoutKind::Pot, 1)])
            .await
            .unwrap();

        assert!(payouts.mark_paid("g1", &wallet("alice"), PayoutKind::Pot, "s1").await.unwrap());
        assert!(!payouts.mark_paid("g1", &wallet("alice"), PayoutKind::Pot, "s2").await.unwrap());

        let listed = payouts.list_payouts("g1").await.unwrap();
        let alice = listed.iter().find(|p| p.wallet == wallet("alice")).unwrap();
        assert_eq!(alice.amount, Lamports(70));
        assert_eq!(alice.signature.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_replace_winner_plan() {
        let (_dir, storage) = temp_storage().await;
        finished_game(&storage, "701000").await;
        let payouts = PayoutStore::new(&storage);

        payouts
            .record_plan(
                "g1",
                &[payout("alice", PayoutKind::Pot, 100), payout("dave", PayoutKind::Prediction, 20)],
            )
            .await
            .unwrap();
        assert!(payouts
            .replace_winner_plan(
                "g1",
                &wallet("bob"),
                &[payout("bob", PayoutKind::Pot, 100), payout("erin", PayoutKind::Prediction, 20)],
            )
            .await
            .unwrap());

        let listed = payouts.list_payouts("g1").await.unwrap();
        let owed: Vec<_> = listed.iter().map(|p| (p.wallet.as_str(), p.kind)).collect();
        assert_eq!(owed, vec![("bob", PayoutKind::Pot), ("erin", PayoutKind::Prediction)]);
        let game = GameStore::new(&storage).load_game("g1").await.unwrap();
        assert_eq!(game.winner, Some(wallet("bob")));
    }

    #[tokio::test]
    async fn test_winner_kept_once_any_payout_sent() {
        let (_dir, storage) = temp_storage().await;
        finished_game(&storage, "701100").await;
        let payouts = PayoutStore::new(&storage);

        payouts
            .record_plan(
                "g1",
                &[payout("alice", PayoutKind::Pot, 100), payout("dave", PayoutKind::Prediction, 20)],
            )
            .await
            .unwrap();
        assert!(payouts.mark_paid("g1", &wallet("alice"), PayoutKind::Pot, "s1").await.unwrap());

        let replaced = payouts
            .replace_winner_plan("g1", &wallet("bob"), &[payout("bob", PayoutKind::Pot, 100)])
            .await
            .unwrap();
        assert!(!replaced);

        let game = GameStore::new(&storage).load_game("g1").await.unwrap();
        assert_eq!(game.winner, Some(wallet("alice")));
        let listed = payouts.list_payouts("g1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|p| p.wallet == wallet("dave") && !p.is_paid()));
    }
}
