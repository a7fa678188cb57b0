use crate::error::Result;
use crate::storage::{from_millis, parse_column, to_millis, PhaseKey, Storage, Table};
use crate::types::{
    GamePhase, GameStatus, PickVoteRecord, QuestionVoteRecord, SubmittedQuestion, VoteRecord,
    VoteValue, WalletAddress,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

/// Result of a guarded insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The participant already has a row for this round.
    Duplicate,
    /// The game moved on before the write landed.
    Stale,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Per-round submissions: honesty votes, hot-take questions, question votes and pick votes.
///
/// Every write is checked against the game's current phase and round inside the
/// same transaction, and bumps the phase's `vote_count` when it is accepted.
pub struct VoteStore<'a> {
    storage: &'a Storage,
}

impl<'a> VoteStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn submit_vote(
        &self,
        game_id: &str,
        round: u32,
        voter: &WalletAddress,
        vote: VoteValue,
    ) -> Result<InsertOutcome> {
        let now = to_millis(Utc::now());
        self.guarded_insert(game_id, round, GamePhase::VotingHonesty, Table::Votes, |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO votes (game_id, round, voter_wallet, vote, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![game_id, round, voter.as_str(), vote.as_str(), now],
            )
        })
        .await
    }

    pub async fn submit_question(
        &self,
        game_id: &str,
        round: u32,
        submitter: &WalletAddress,
        text: &str,
    ) -> Result<InsertOutcome> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_millis(Utc::now());
        self.guarded_insert(
            game_id,
            round,
            GamePhase::SubmittingQuestions,
            Table::QuestionSubmissions,
            |tx| {
                tx.execute(
                    "INSERT OR IGNORE INTO question_submissions
                     (id, game_id, round, submitter_wallet, question_text, votes, seq, created_at)
                     SELECT ?1, ?2, ?3, ?4, ?5, 0, COALESCE(MAX(seq), 0) + 1, ?6
                     FROM question_submissions WHERE game_id = ?2 AND round = ?3",
                    params![id, game_id, round, submitter.as_str(), text, now],
                )
            },
        )
        .await
    }

    /// Record a vote for a submitted question and bump its tally.
    pub async fn vote_question(
        &self,
        game_id: &str,
        round: u32,
        voter: &WalletAddress,
        submission_id: &str,
    ) -> Result<InsertOutcome> {
        let now = to_millis(Utc::now());
        self.guarded_insert(
            game_id,
            round,
            GamePhase::VotingQuestion,
            Table::QuestionSubmissions,
            |tx| {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO question_votes
                     (game_id, round, voter_wallet, submission_id, created_at)
                     SELECT ?1, ?2, ?3, ?4, ?5
                     WHERE EXISTS (
                        SELECT 1 FROM question_submissions
                        WHERE id = ?4 AND game_id = ?1 AND round = ?2
                     )",
                    params![game_id, round, voter.as_str(), submission_id, now],
                )?;
                if inserted > 0 {
                    tx.execute(
                        "UPDATE question_submissions SET votes = votes + 1 WHERE id = ?1",
                        params![submission_id],
                    )?;
                }
                Ok(inserted)
            },
        )
        .await
    }

    pub async fn vote_pick(
        &self,
        game_id: &str,
        round: u32,
        voter: &WalletAddress,
        option_index: usize,
    ) -> Result<InsertOutcome> {
        let now = to_millis(Utc::now());
        self.guarded_insert(game_id, round, GamePhase::PickingQuestion, Table::Votes, |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO pick_votes
                 (game_id, round, voter_wallet, option_index, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![game_id, round, voter.as_str(), option_index as i64, now],
            )
        })
        .await
    }

    pub async fn list_votes(&self, game_id: &str) -> Result<Vec<VoteRecord>> {
        let conn = self.storage.get_connection().await;
        Ok(query_votes(&conn, game_id)?)
    }

    pub async fn list_submissions(&self, game_id: &str, round: u32) -> Result<Vec<SubmittedQuestion>> {
        let conn = self.storage.get_connection().await;
        Ok(query_submissions(&conn, game_id, round)?)
    }

    async fn guarded_insert<F>(
        &self,
        game_id: &str,
        round: u32,
        phase: GamePhase,
        table: Table,
        insert: F,
    ) -> Result<InsertOutcome>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<usize>,
    {
        let expected = PhaseKey {
            status: GameStatus::Playing,
            phase: Some(phase),
            round,
        };

        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !phase_matches(&tx, game_id, &expected)? {
            return Ok(InsertOutcome::Stale);
        }

        if insert(&tx)? == 0 {
            return Ok(InsertOutcome::Duplicate);
        }

        tx.execute(
            "UPDATE games SET vote_count = vote_count + 1, updated_at = ?1 WHERE id = ?2",
            params![to_millis(Utc::now()), game_id],
        )?;
        tx.commit()?;
        drop(conn);

        self.storage.notify(game_id, table);
        Ok(InsertOutcome::Inserted)
    }
}

fn phase_matches(conn: &Connection, game_id: &str, expected: &PhaseKey) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM games
             WHERE id = ?1 AND status = ?2 AND game_phase IS ?3 AND current_round = ?4",
            params![
                game_id,
                expected.status.as_str(),
                expected.phase.map(|p| p.as_str()),
                expected.round,
            ],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn query_votes(conn: &Connection, game_id: &str) -> rusqlite::Result<Vec<VoteRecord>> {
    let mut stmt = conn.prepare(
        "SELECT game_id, round, voter_wallet, vote, created_at FROM votes
         WHERE game_id = ?1 ORDER BY round, created_at",
    )?;

    let votes = stmt
        .query_map(params![game_id], |row| {
            Ok(VoteRecord {
                game_id: row.get(0)?,
                round: row.get(1)?,
                voter: parse_column(row, 2, "voter_wallet")?,
                vote: parse_column(row, 3, "vote")?,
                created_at: from_millis(row.get(4)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(votes)
}

pub(crate) fn query_submissions(
    conn: &Connection,
    game_id: &str,
    round: u32,
) -> rusqlite::Result<Vec<SubmittedQuestion>> {
    let mut stmt = conn.prepare(
        "SELECT id, game_id, round, submitter_wallet, question_text, votes, seq
         FROM question_submissions WHERE game_id = ?1 AND round = ?2 ORDER BY seq",
    )?;

    let submissions = stmt
        .query_map(params![game_id, round], |row| {
            Ok(SubmittedQuestion {
                id: row.get(0)?,
                game_id: row.get(1)?,
                round: row.get(2)?,
                submitter: parse_column(row, 3, "submitter_wallet")?,
                text: row.get(4)?,
                votes: row.get(5)?,
                seq: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(submissions)
}

pub(crate) fn query_question_votes(
    conn: &Connection,
    game_id: &str,
    round: u32,
) -> rusqlite::Result<Vec<QuestionVoteRecord>> {
    let mut stmt = conn.prepare(
        "SELECT round, voter_wallet, submission_id FROM question_votes
         WHERE game_id = ?1 AND round = ?2 ORDER BY created_at",
    )?;

    let votes = stmt
        .query_map(params![game_id, round], |row| {
            Ok(QuestionVoteRecord {
                round: row.get(0)?,
                voter: parse_column(row, 1, "voter_wallet")?,
                submission_id: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(votes)
}

pub(crate) fn query_pick_votes(
    conn: &Connection,
    game_id: &str,
    round: u32,
) -> rusqlite::Result<Vec<PickVoteRecord>> {
    let mut stmt = conn.prepare(
        "SELECT round, voter_wallet, option_index FROM pick_votes
         WHERE game_id = ?1 AND round = ?2 ORDER BY created_at",
    )?;

    let votes = stmt
        .query_map(params![game_id, round], |row| {
            Ok(PickVoteRecord {
                round: row.get(0)?,
                voter: parse_column(row, 1, "voter_wallet")?,
                option_index: row.get::<_, i64>(2)? as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(votes)
}
