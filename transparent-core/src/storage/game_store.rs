use crate::error::{CoreError, Result};
use crate::storage::{
    from_millis, json_column, parse_column, parse_optional_column, to_millis, Storage, Table,
};
use crate::types::{GamePhase, GameRecord, GameStatus, Lamports, RoundRecord, WalletAddress};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

const GAME_COLUMNS: &str = "id, room_code, room_name, host_wallet, buy_in, payout_mode, question_mode,
    question_deck, used_questions, status, game_phase, current_round, num_questions, hot_seat,
    current_question, question_options, current_pot, vote_count, phase_deadline, winner,
    distributed, created_at, updated_at";

/// The stored position a transition starts from; compared before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseKey {
    pub status: GameStatus,
    pub phase: Option<GamePhase>,
    pub round: u32,
}

impl PhaseKey {
    pub fn of(game: &GameRecord) -> Self {
        Self {
            status: game.status,
            phase: game.game_phase,
            round: game.current_round,
        }
    }
}

/// Progress fields written by a phase transition.
#[derive(Debug, Clone, PartialEq)]
pub struct GameProgress {
    pub status: GameStatus,
    pub phase: Option<GamePhase>,
    pub round: u32,
    pub hot_seat: Option<WalletAddress>,
    pub current_question: Option<String>,
    pub question_options: Vec<String>,
    pub used_questions: Vec<usize>,
    pub phase_deadline: Option<DateTime<Utc>>,
}

pub struct GameStore<'a> {
    storage: &'a Storage,
}

impl<'a> GameStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Insert a new game. Returns false when the room code is taken by an active game.
    pub async fn insert_game(&self, game: &GameRecord) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let result = conn.execute(
            &format!(
                "INSERT INTO games ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                GAME_COLUMNS
            ),
            params![
                game.id,
                game.room_code,
                game.room_name,
                game.host_wallet.as_str(),
                game.buy_in.as_u64() as i64,
                game.payout_mode.as_str(),
                game.question_mode.as_str(),
                serde_json::to_string(&game.question_deck)?,
                serde_json::to_string(&game.used_questions)?,
                game.status.as_str(),
                game.game_phase.map(|p| p.as_str()),
                game.current_round,
                game.num_questions,
                game.hot_seat.as_ref().map(|w| w.as_str()),
                game.current_question,
                serde_json::to_string(&game.question_options)?,
                game.current_pot.as_u64() as i64,
                game.vote_count,
                game.phase_deadline.map(to_millis),
                game.winner.as_ref().map(|w| w.as_str()),
                game.distributed,
                to_millis(game.created_at),
                to_millis(game.updated_at),
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        drop(conn);
        self.storage.notify(&game.id, Table::Games);
        Ok(true)
    }

    pub async fn load_game(&self, game_id: &str) -> Result<GameRecord> {
        let conn = self.storage.get_connection().await;
        query_game(&conn, game_id)?
            .ok_or_else(|| CoreError::GameNotFound(game_id.to_string()))
    }

    /// Look a game up by room code, preferring the active one.
    pub async fn find_by_room_code(&self, room_code: &str) -> Result<Option<GameRecord>> {
        let conn = self.storage.get_connection().await;

        let game = conn
            .query_row(
                &format!(
                    "SELECT {} FROM games WHERE room_code = ?1
                     ORDER BY (status IN ('waiting', 'playing')) DESC, created_at DESC
                     LIMIT 1",
                    GAME_COLUMNS
                ),
                params![room_code],
                game_from_row,
            )
            .optional()?;

        Ok(game)
    }

    pub async fn list_games(&self) -> Result<Vec<GameRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM games ORDER BY created_at DESC",
            GAME_COLUMNS
        ))?;

        let games = stmt
            .query_map([], game_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(games)
    }

    /// Compare-and-swap the game's progress. Returns false, writing nothing,
    /// when the stored position no longer matches `expected`.
    pub async fn apply_progress(
        &self,
        game_id: &str,
        expected: &PhaseKey,
        next: &GameProgress,
        new_round: Option<&RoundRecord>,
    ) -> Result<bool> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(
            "UPDATE games SET status = ?1, game_phase = ?2, current_round = ?3, hot_seat = ?4,
                current_question = ?5, question_options = ?6, used_questions = ?7,
                phase_deadline = ?8, vote_count = 0, updated_at = ?9
             WHERE id = ?10 AND status = ?11 AND game_phase IS ?12 AND current_round = ?13",
            params![
                next.status.as_str(),
                next.phase.map(|p| p.as_str()),
                next.round,
                next.hot_seat.as_ref().map(|w| w.as_str()),
                next.current_question,
                serde_json::to_string(&next.question_options)?,
                serde_json::to_string(&next.used_questions)?,
                next.phase_deadline.map(to_millis),
                to_millis(Utc::now()),
                game_id,
                expected.status.as_str(),
                expected.phase.map(|p| p.as_str()),
                expected.round,
            ],
        )?;

        if updated == 0 {
            return Ok(false);
        }

        if let Some(round) = new_round {
            tx.execute(
                "INSERT OR REPLACE INTO rounds (game_id, round, hot_seat, question)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    round.game_id,
                    round.round,
                    round.hot_seat.as_str(),
                    round.question,
                ],
            )?;
        }

        if let Some(question) = &next.current_question {
            tx.execute(
                "UPDATE rounds SET question = ?1 WHERE game_id = ?2 AND round = ?3",
                params![question, game_id, next.round],
            )?;
        }

        tx.commit()?;
        drop(conn);

        self.storage.notify(game_id, Table::Games);
        Ok(true)
    }

    /// Move a game to `to` if its status is one of `from`.
    pub async fn transition_status(
        &self,
        game_id: &str,
        from: &[GameStatus],
        to: GameStatus,
    ) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let allowed: Vec<String> = from.iter().map(|s| format!("'{}'", s.as_str())).collect();
        let updated = conn.execute(
            &format!(
                "UPDATE games SET status = ?1, game_phase = NULL, phase_deadline = NULL,
                    updated_at = ?2
                 WHERE id = ?3 AND status IN ({})",
                allowed.join(", ")
            ),
            params![to.as_str(), to_millis(Utc::now()), game_id],
        )?;

        drop(conn);
        if updated > 0 {
            self.storage.notify(game_id, Table::Games);
        }
        Ok(updated > 0)
    }

    pub async fn set_winner(&self, game_id: &str, winner: &WalletAddress) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE games SET winner = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'gameover' AND distributed = 0",
            params![winner.as_str(), to_millis(Utc::now()), game_id],
        )?;

        drop(conn);
        if updated > 0 {
            self.storage.notify(game_id, Table::Games);
        }
        Ok(updated > 0)
    }

    /// Flip the distributed flag once. Returns false if it was already set.
    pub async fn mark_distributed(&self, game_id: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE games SET distributed = 1, updated_at = ?1 WHERE id = ?2 AND distributed = 0",
            params![to_millis(Utc::now()), game_id],
        )?;

        drop(conn);
        if updated > 0 {
            self.storage.notify(game_id, Table::Games);
        }
        Ok(updated > 0)
    }
}

pub(crate) fn query_game(conn: &Connection, game_id: &str) -> rusqlite::Result<Option<GameRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM games WHERE id = ?1", GAME_COLUMNS),
        params![game_id],
        game_from_row,
    )
    .optional()
}

pub(crate) fn query_rounds(conn: &Connection, game_id: &str) -> rusqlite::Result<Vec<RoundRecord>> {
    let mut stmt = conn.prepare(
        "SELECT game_id, round, hot_seat, question FROM rounds WHERE game_id = ?1 ORDER BY round",
    )?;

    let rounds = stmt
        .query_map(params![game_id], |row| {
            Ok(RoundRecord {
                game_id: row.get(0)?,
                round: row.get(1)?,
                hot_seat: parse_column(row, 2, "hot_seat")?,
                question: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rounds)
}

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<GameRecord> {
    Ok(GameRecord {
        id: row.get(0)?,
        room_code: row.get(1)?,
        room_name: row.get(2)?,
        host_wallet: parse_column(row, 3, "host_wallet")?,
        buy_in: Lamports(row.get::<_, i64>(4)? as u64),
        payout_mode: parse_column(row, 5, "payout_mode")?,
        question_mode: parse_column(row, 6, "question_mode")?,
        question_deck: json_column(row, 7, "question_deck")?,
        used_questions: json_column(row, 8, "used_questions")?,
        status: parse_column(row, 9, "status")?,
        game_phase: parse_optional_column(row, 10, "game_phase")?,
        current_round: row.get(11)?,
        num_questions: row.get(12)?,
        hot_seat: parse_optional_column(row, 13, "hot_seat")?,
        current_question: row.get(14)?,
        question_options: json_column(row, 15, "question_options")?,
        current_pot: Lamports(row.get::<_, i64>(16)? as u64),
        vote_count: row.get(17)?,
        phase_deadline: row.get::<_, Option<i64>>(18)?.map(from_millis),
        winner: parse_optional_column(row, 19, "winner")?,
        distributed: row.get(20)?,
        created_at: from_millis(row.get(21)?),
        updated_at: from_millis(row.get(22)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{sample_game, temp_storage, wallet};

    fn answering(round: u32, hot_seat: &str) -> GameProgress {
        GameProgress {
            status: GameStatus::Playing,
            phase: Some(GamePhase::Answering),
            round,
            hot_seat: Some(wallet(hot_seat)),
            current_question: Some("First question?".to_string()),
            question_options: Vec::new(),
            used_questions: vec![0],
            phase_deadline: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_game() {
        let (_dir, storage) = temp_storage().await;
        let store = GameStore::new(&storage);

        let game = sample_game("g1", "123456");
        assert!(store.insert_game(&game).await.unwrap());

        let loaded = store.load_game("g1").await.unwrap();
        assert_eq!(loaded.room_name, "Friday night");
        assert_eq!(loaded.question_deck.len(), 2);
        assert_eq!(loaded.status, GameStatus::Waiting);
        assert!(loaded.game_phase.is_none());
    }

    #[tokio::test]
    async fn test_room_code_unique_among_active_games() {
        let (_dir, storage) = temp_storage().await;
        let store = GameStore::new(&storage);

        assert!(store.insert_game(&sample_game("g1", "123456")).await.unwrap());
        assert!(!store.insert_game(&sample_game("g2", "123456")).await.unwrap());

        store
            .transition_status("g1", &[GameStatus::Waiting], GameStatus::Cancelled)
            .await
            .unwrap();
        assert!(store.insert_game(&sample_game("g3", "123456")).await.unwrap());

        let found = store.find_by_room_code("123456").await.unwrap().unwrap();
        assert_eq!(found.id, "g3");
    }

    #[tokio::test]
    async fn test_apply_progress_is_compare_and_swap() {
        let (_dir, storage) = temp_storage().await;
        let store = GameStore::new(&storage);
        let game = sample_game("g1", "111222");
        store.insert_game(&game).await.unwrap();

        let expected = PhaseKey::of(&game);
        let round = RoundRecord {
            game_id: "g1".to_string(),
            round: 1,
            hot_seat: wallet("alice"),
            question: None,
        };

        let first = store
            .apply_progress("g1", &expected, &answering(1, "alice"), Some(&round))
            .await
            .unwrap();
        let second = store
            .apply_progress("g1", &expected, &answering(1, "alice"), Some(&round))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let loaded = store.load_game("g1").await.unwrap();
        assert_eq!(loaded.status, GameStatus::Playing);
        assert_eq!(loaded.game_phase, Some(GamePhase::Answering));

        let conn = storage.get_connection().await;
        let rounds = query_rounds(&conn, "g1").unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].question.as_deref(), Some("First question?"));
    }

    #[tokio::test]
    async fn test_winner_and_distribution_flags() {
        let (_dir, storage) = temp_storage().await;
        let store = GameStore::new(&storage);
        store.insert_game(&sample_game("g1", "333444")).await.unwrap();

        // Not over yet
        assert!(!store.set_winner("g1", &wallet("alice")).await.unwrap());

        store
            .transition_status("g1", &[GameStatus::Waiting], GameStatus::Gameover)
            .await
            .unwrap();
        assert!(store.set_winner("g1", &wallet("alice")).await.unwrap());
        assert!(store.mark_distributed("g1").await.unwrap());
        assert!(!store.mark_distributed("g1").await.unwrap());
        assert!(!store.set_winner("g1", &wallet("bob")).await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_publish_change_events() {
        let (_dir, storage) = temp_storage().await;
        let mut rx = storage.subscribe();
        GameStore::new(&storage)
            .insert_game(&sample_game("g1", "555666"))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.game_id, "g1");
        assert_eq!(event.table, crate::storage::Table::Games);
    }
}
