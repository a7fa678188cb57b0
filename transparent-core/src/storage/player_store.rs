use crate::error::Result;
use crate::storage::payout_store::insert_contribution;
use crate::storage::{from_millis, parse_column, to_millis, Storage, Table};
use crate::types::{ContributionRecord, PlayerRecord, WalletAddress};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(PlayerRecord),
    AlreadyJoined,
    /// The lobby already holds `max_players` contestants.
    Full,
    /// The game is no longer accepting players.
    Closed,
}

pub struct PlayerStore<'a> {
    storage: &'a Storage,
}

impl<'a> PlayerStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Add a player to a waiting game. The host row is added with `is_host` set
    /// and does not count toward `max_players`.
    ///
    /// A confirmed `buy_in` is recorded in the same transaction as the seat,
    /// so a rejected join never leaves its stake counted in the pot.
    pub async fn add_player(
        &self,
        game_id: &str,
        wallet: &WalletAddress,
        name: &str,
        is_host: bool,
        max_players: usize,
        buy_in: Option<&ContributionRecord>,
    ) -> Result<JoinOutcome> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM games WHERE id = ?1",
                params![game_id],
                |row| row.get(0),
            )
            .optional()?;
        if status.as_deref() != Some("waiting") {
            return Ok(JoinOutcome::Closed);
        }

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM players WHERE game_id = ?1 AND wallet = ?2",
            params![game_id, wallet.as_str()],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Ok(JoinOutcome::AlreadyJoined);
        }

        let (contestants, last_seq): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(is_host = 0), 0), COALESCE(MAX(join_seq), 0)
             FROM players WHERE game_id = ?1",
            params![game_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if !is_host && contestants as usize >= max_players {
            return Ok(JoinOutcome::Full);
        }

        let now = Utc::now();
        let player = PlayerRecord {
            game_id: game_id.to_string(),
            wallet: wallet.clone(),
            name: name.to_string(),
            is_host,
            is_ready: false,
            has_paid: !is_host,
            join_seq: last_seq as u32 + 1,
            joined_at: now,
        };

        tx.execute(
            "INSERT INTO players (game_id, wallet, name, is_host, is_ready, has_paid, join_seq, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                player.game_id,
                player.wallet.as_str(),
                player.name,
                player.is_host,
                player.is_ready,
                player.has_paid,
                player.join_seq,
                to_millis(now),
            ],
        )?;
        if let Some(contribution) = buy_in {
            insert_contribution(&tx, contribution)?;
        }
        tx.commit()?;
        drop(conn);

        tracing::info!("Player {} joined game {}", wallet, game_id);
        self.storage.notify(game_id, Table::Players);
        if buy_in.is_some() {
            self.storage.notify(game_id, Table::Games);
        }
        Ok(JoinOutcome::Joined(player))
    }

    pub async fn set_ready(&self, game_id: &str, wallet: &WalletAddress, ready: bool) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE players SET is_ready = ?1 WHERE game_id = ?2 AND wallet = ?3",
            params![ready, game_id, wallet.as_str()],
        )?;

        drop(conn);
        if updated > 0 {
            self.storage.notify(game_id, Table::Players);
        }
        Ok(updated > 0)
    }

    /// Remove a contestant from a waiting game, taking their buy-in out of the pot.
    pub async fn remove_player(&self, game_id: &str, wallet: &WalletAddress) -> Result<bool> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = tx.execute(
            "DELETE FROM players
             WHERE game_id = ?1 AND wallet = ?2 AND is_host = 0
               AND EXISTS (SELECT 1 FROM games WHERE id = ?1 AND status = 'waiting')",
            params![game_id, wallet.as_str()],
        )?;
        if removed == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE games SET current_pot = MAX(current_pot - buy_in, 0), updated_at = ?1
             WHERE id = ?2",
            params![to_millis(Utc::now()), game_id],
        )?;
        tx.commit()?;
        drop(conn);

        tracing::info!("Player {} left game {}", wallet, game_id);
        self.storage.notify(game_id, Table::Players);
        self.storage.notify(game_id, Table::Games);
        Ok(true)
    }

    pub async fn list_players(&self, game_id: &str) -> Result<Vec<PlayerRecord>> {
        let conn = self.storage.get_connection().await;
        Ok(query_players(&conn, game_id)?)
    }
}

pub(crate) fn query_players(conn: &Connection, game_id: &str) -> rusqlite::Result<Vec<PlayerRecord>> {
    let mut stmt = conn.prepare(
        "SELECT game_id, wallet, name, is_host, is_ready, has_paid, join_seq, joined_at
         FROM players WHERE game_id = ?1 ORDER BY join_seq",
    )?;

    let players = stmt
        .query_map(params![game_id], |row| {
            Ok(PlayerRecord {
                game_id: row.get(0)?,
                wallet: parse_column(row, 1, "wallet")?,
                name: row.get(2)?,
                is_host: row.get(3)?,
                is_ready: row.get(4)?,
                has_paid: row.get(5)?,
                join_seq: row.get(6)?,
                joined_at: from_millis(row.get(7)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(players)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{sample_game, temp_storage, wallet};
    use crate::storage::GameStore;

    #[tokio::test]
    async fn test_join_order_and_capacity() {
        let (_dir, storage) = temp_storage().await;
        GameStore::new(&storage)
            .insert_game(&sample_game("g1", "100200"))
            .await
            .unwrap();
        let players = PlayerStore::new(&storage);

        players.add_player("g1", &wallet("host"), "Host", true, 2, None).await.unwrap();
        players.add_player("g1", &wallet("alice"), "Alice", false, 2, None).await.unwrap();
        players.add_player("g1", &wallet("bob"), "Bob", false, 2, None).await.unwrap();

        let full = players
            .add_player("g1", &wallet("carol"), "Carol", false, 2, None)
            .await
            .unwrap();
        assert_eq!(full, JoinOutcome::Full);

        let again = players
            .add_player("g1", &wallet("alice"), "Alice", false, 2, None)
            .await
            .unwrap();
        assert_eq!(again, JoinOutcome::AlreadyJoined);

        let listed = players.list_players("g1").await.unwrap();
        let names: Vec<_> = listed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Host", "Alice", "Bob"]);
        assert!(listed[0].is_host);
        assert!(!listed[0].has_paid);
        assert!(listed[1].has_paid);
    }

    #[tokio::test]
    async fn test_closed_game_rejects_join() {
        let (_dir, storage) = temp_storage().await;
        let games = GameStore::new(&storage);
        games.insert_game(&sample_game("g1", "100300")).await.unwrap();
        games
            .transition_status("g1", &[crate::types::GameStatus::Waiting], crate::types::GameStatus::Cancelled)
            .await
            .unwrap();

        let outcome = PlayerStore::new(&storage)
            .add_player("g1", &wallet("alice"), "Alice", false, 8, None)
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Closed);
    }

    #[tokio::test]
    async fn test_buy_in_recorded_with_seat() {
        let (_dir, storage) = temp_storage().await;
        let games = GameStore::new(&storage);
        games.insert_game(&sample_game("g1", "100350")).await.unwrap();
        let players = PlayerStore::new(&storage);

        let buy_in = |who: &str| ContributionRecord {
            game_id: "g1".to_string(),
            wallet: wallet(who),
            amount: crate::types::Lamports(100_000_000),
            kind: crate::types::ContributionKind::BuyIn,
            signature: format!("sig-{}", who),
            created_at: Utc::now(),
        };

        let joined = players
            .add_player("g1", &wallet("alice"), "Alice", false, 8, Some(&buy_in("alice")))
            .await
            .unwrap();
        assert!(matches!(joined, JoinOutcome::Joined(_)));

        games
            .transition_status("g1", &[crate::types::GameStatus::Waiting], crate::types::GameStatus::Cancelled)
            .await
            .unwrap();
        let closed = players
            .add_player("g1", &wallet("bob"), "Bob", false, 8, Some(&buy_in("bob")))
            .await
            .unwrap();
        assert_eq!(closed, JoinOutcome::Closed);

        assert_eq!(games.load_game("g1").await.unwrap().current_pot, crate::types::Lamports(100_000_000));
        let contributions = crate::storage::PayoutStore::new(&storage)
            .list_contributions("g1")
            .await
            .unwrap();
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].wallet, wallet("alice"));
    }

    #[tokio::test]
    async fn test_remove_player_refunds_pot_share() {
        let (_dir, storage) = temp_storage().await;
        let games = GameStore::new(&storage);
        let mut game = sample_game("g1", "100400");
        game.current_pot = crate::types::Lamports(200_000_000);
        games.insert_game(&game).await.unwrap();

        let players = PlayerStore::new(&storage);
        players.add_player("g1", &wallet("alice"), "Alice", false, 8, None).await.unwrap();
        players.add_player("g1", &wallet("bob"), "Bob", false, 8, None).await.unwrap();

        assert!(players.remove_player("g1", &wallet("bob")).await.unwrap());
        assert!(!players.remove_player("g1", &wallet("bob")).await.unwrap());

        let loaded = games.load_game("g1").await.unwrap();
        assert_eq!(loaded.current_pot, crate::types::Lamports(100_000_000));
        assert!(players.set_ready("g1", &wallet("alice"), true).await.unwrap());
        assert_eq!(players.list_players("g1").await.unwrap().len(), 1);
    }
}
