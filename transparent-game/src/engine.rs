use crate::error::{GameError, Result};
use crate::phase::{self, AdvanceTrigger, Transition};
use crate::prediction;
use crate::tally;
use crate::view::GameView;
use crate::{payout, MIN_CUSTOM_QUESTIONS};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use transparent_core::questions::{self, GenerateRequest, QuestionGenerator};
use transparent_core::storage::{
    GameStore, InsertOutcome, JoinOutcome, PayoutStore, PhaseKey, PlayerStore, PredictionStore,
    VoteStore,
};
use transparent_core::types::{
    ContributionKind, ContributionRecord, GamePhase, GameRecord, GameSnapshot, GameStatus,
    Lamports, PayoutKind, PayoutMode, PayoutRecord, PlayerRecord, PredictionRecord, QuestionMode,
    VoteValue, WalletAddress,
};
use transparent_core::{CoreError, EngineConfig, FundsService, Storage};

const ROOM_CODE_ATTEMPTS: usize = 10;

/// Settings chosen by the host when creating a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGame {
    pub room_name: String,
    pub host: WalletAddress,
    pub host_name: String,
    pub buy_in: Lamports,
    pub payout_mode: PayoutMode,
    pub question_mode: QuestionMode,
    /// Zero plays one round per contestant.
    pub num_questions: u32,
    /// Host-authored questions, required in custom mode.
    pub custom_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// This call moved the game; holds the position it moved to.
    Advanced(PhaseKey),
    /// The stored phase had already moved on; nothing was written.
    Unchanged,
}

impl AdvanceOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Advanced(_))
    }
}

/// Validates every game operation and applies it to the store.
///
/// Reads go through a fresh snapshot; writes are guarded in the store by the
/// phase and round they were validated against, so two clients racing on the
/// same action produce one effect.
pub struct GameEngine {
    storage: Arc<Storage>,
    funds: Arc<dyn FundsService>,
    generator: Option<Arc<dyn QuestionGenerator>>,
    config: EngineConfig,
}

impl GameEngine {
    pub fn new(
        storage: Arc<Storage>,
        funds: Arc<dyn FundsService>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            funds,
            generator: None,
            config,
        })
    }

    pub fn with_generator(mut self, generator: Arc<dyn QuestionGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn snapshot(&self, game_id: &str) -> Result<GameSnapshot> {
        self.storage
            .load_snapshot(game_id)
            .await
            .map_err(|e| match e {
                CoreError::GameNotFound(id) => GameError::GameNotFound(id),
                other => GameError::Core(other),
            })
    }

    pub async fn view(&self, game_id: &str) -> Result<GameView> {
        Ok(GameView::new(self.snapshot(game_id).await?, Utc::now()))
    }

    /// Find a game by room code; accepts `123456` or `123-456`.
    pub async fn find_game(&self, room_code: &str) -> Result<GameRecord> {
        let code: String = room_code.chars().filter(|c| c.is_ascii_digit()).collect();
        GameStore::new(&self.storage)
            .find_by_room_code(&code)
            .await?
            .ok_or_else(|| GameError::RoomNotFound(room_code.to_string()))
    }

    pub async fn list_games(&self) -> Result<Vec<GameRecord>> {
        Ok(GameStore::new(&self.storage).list_games().await?)
    }

    pub async fn create_game(&self, new_game: NewGame) -> Result<GameRecord> {
        let host_name = new_game.host_name.trim();
        if host_name.is_empty() {
            return Err(GameError::InvalidConfig("host name cannot be empty".to_string()));
        }

        let question_deck = match new_game.question_mode {
            QuestionMode::Custom => {
                let deck =
                    questions::clean_questions(new_game.custom_questions, self.config.max_question_len);
                if deck.len() < MIN_CUSTOM_QUESTIONS {
                    return Err(GameError::InvalidConfig(
                        "custom mode needs at least one question".to_string(),
                    ));
                }
                deck
            }
            QuestionMode::Classic | QuestionMode::HotTake => self.seed_deck().await,
        };

        let games = GameStore::new(&self.storage);
        let now = Utc::now();
        let mut game = GameRecord {
            id: uuid::Uuid::new_v4().to_string(),
            room_code: String::new(),
            room_name: String::new(),
            host_wallet: new_game.host.clone(),
            buy_in: new_game.buy_in,
            payout_mode: new_game.payout_mode,
            question_mode: new_game.question_mode,
            question_deck,
            used_questions: Vec::new(),
            status: GameStatus::Waiting,
            game_phase: None,
            current_round: 0,
            num_questions: new_game.num_questions,
            hot_seat: None,
            current_question: None,
            question_options: Vec::new(),
            current_pot: Lamports::ZERO,
            vote_count: 0,
            phase_deadline: None,
            winner: None,
            distributed: false,
            created_at: now,
            updated_at: now,
        };

        let mut inserted = false;
        for _ in 0..ROOM_CODE_ATTEMPTS {
            game.room_code = format!("{:06}", rand::thread_rng().gen_range(100_000..1_000_000));
            game.room_name = match new_game.room_name.trim() {
                "" => format!("Room {}", game.display_code()),
                name => name.to_string(),
            };
            if games.insert_game(&game).await? {
                inserted = true;
                break;
            }
            tracing::debug!("Room code {} taken, retrying", game.room_code);
        }
        if !inserted {
            return Err(GameError::internal("could not allocate a free room code"));
        }

        PlayerStore::new(&self.storage)
            .add_player(&game.id, &new_game.host, host_name, true, self.config.max_players, None)
            .await?;

        tracing::info!(
            "Created game {} ({}) in room {}, buy-in {}",
            game.id,
            game.question_mode,
            game.display_code(),
            game.buy_in
        );
        Ok(game)
    }

    /// Join a waiting game, paying the buy-in into the pot first.
    pub async fn join_game(
        &self,
        game_id: &str,
        wallet: &WalletAddress,
        name: &str,
    ) -> Result<PlayerRecord> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;

        if game.status != GameStatus::Waiting {
            return Err(GameError::wrong_status("waiting", game.status));
        }
        if game.is_host(wallet) {
            return Err(GameError::HostNotAllowed("join as a player"));
        }
        if snapshot.player(wallet).is_some() {
            return Err(GameError::AlreadyJoined(wallet.to_string()));
        }
        if snapshot
            .payouts
            .iter()
            .any(|p| &p.wallet == wallet && p.kind == PayoutKind::LeaveRefund)
        {
            return Err(GameError::AlreadyLeft(wallet.to_string()));
        }
        if snapshot.contestants().count() >= self.config.max_players {
            return Err(GameError::GameFull);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::InvalidConfig("player name cannot be empty".to_string()));
        }

        let pot = game.pot_address();
        let buy_in = if game.buy_in.is_zero() {
            None
        } else {
            let signature = self.transfer(wallet, &pot, game.buy_in).await?;
            Some(contribution(game_id, wallet, game.buy_in, ContributionKind::BuyIn, signature))
        };

        let outcome = PlayerStore::new(&self.storage)
            .add_player(game_id, wallet, name, false, self.config.max_players, buy_in.as_ref())
            .await?;

        match outcome {
            JoinOutcome::Joined(player) => Ok(player),
            rejected => {
                // Lost a race after paying; hand the buy-in back
                if buy_in.is_some() {
                    self.transfer(&pot, wallet, game.buy_in).await?;
                }
                Err(match rejected {
                    JoinOutcome::AlreadyJoined => GameError::AlreadyJoined(wallet.to_string()),
                    JoinOutcome::Full => GameError::GameFull,
                    _ => GameError::wrong_status("waiting", GameStatus::Playing),
                })
            }
        }
    }

    pub async fn set_ready(&self, game_id: &str, wallet: &WalletAddress, ready: bool) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        if snapshot.game.status != GameStatus::Waiting {
            return Err(GameError::wrong_status("waiting", snapshot.game.status));
        }
        if snapshot.game.is_host(wallet) {
            return Err(GameError::HostNotAllowed("ready up"));
        }
        if snapshot.player(wallet).is_none() {
            return Err(GameError::NotInGame(wallet.to_string()));
        }

        PlayerStore::new(&self.storage)
            .set_ready(game_id, wallet, ready)
            .await?;
        tracing::info!("{} is {} in game {}", wallet, if ready { "ready" } else { "not ready" }, game_id);
        Ok(())
    }

    /// Host lets a player leave a waiting game and refunds their buy-in.
    /// Calling it again retries a refund that failed to send.
    pub async fn approve_leave(
        &self,
        game_id: &str,
        host: &WalletAddress,
        wallet: &WalletAddress,
    ) -> Result<Option<String>> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        self.require_host(game, host, "approve leaving")?;

        let pending_refund = snapshot
            .payouts
            .iter()
            .find(|p| &p.wallet == wallet && p.kind == PayoutKind::LeaveRefund)
            .cloned();

        if pending_refund.is_none() {
            if game.status != GameStatus::Waiting {
                return Err(GameError::wrong_status("waiting", game.status));
            }
            if snapshot.player(wallet).is_none() {
                return Err(GameError::NotInGame(wallet.to_string()));
            }
            if game.is_host(wallet) {
                return Err(GameError::HostNotAllowed("leave their own game"));
            }

            if !PlayerStore::new(&self.storage).remove_player(game_id, wallet).await? {
                return Err(GameError::StaleWrite);
            }
        }

        let refund = match pending_refund {
            Some(refund) => refund,
            None => {
                let refund = PayoutRecord {
                    game_id: game_id.to_string(),
                    wallet: wallet.clone(),
                    kind: PayoutKind::LeaveRefund,
                    amount: game.buy_in,
                    signature: None,
                };
                if !refund.amount.is_zero() {
                    PayoutStore::new(&self.storage)
                        .record_plan(game_id, std::slice::from_ref(&refund))
                        .await?;
                }
                refund
            }
        };

        tracing::info!("Host approved {} leaving game {}", wallet, game_id);
        if refund.is_paid() || refund.amount.is_zero() {
            return Ok(refund.signature);
        }

        let signature = self.pay(game, &refund).await?;
        Ok(Some(signature))
    }

    pub async fn start_game(&self, game_id: &str, host: &WalletAddress) -> Result<AdvanceOutcome> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        self.require_host(game, host, "start the game")?;

        if game.status != GameStatus::Waiting {
            return Err(GameError::wrong_status("waiting", game.status));
        }

        let contestants: Vec<&PlayerRecord> = snapshot.contestants().collect();
        if contestants.len() < self.config.min_players {
            return Err(GameError::NotEnoughPlayers {
                need: self.config.min_players,
                have: contestants.len(),
            });
        }
        let not_ready: Vec<String> = contestants
            .iter()
            .filter(|p| !p.is_ready)
            .map(|p| p.name.clone())
            .collect();
        if !not_ready.is_empty() {
            return Err(GameError::PlayersNotReady(not_ready));
        }

        let transition = phase::plan_start(
            &snapshot,
            &self.config.phase_durations,
            Utc::now(),
            &mut rand::thread_rng(),
        )?;
        let outcome = self.apply(&snapshot, transition).await?;
        if outcome.advanced() {
            tracing::info!("Game {} started with {} players", game_id, contestants.len());
        }
        Ok(outcome)
    }

    /// Cancel a waiting or playing game and refund every contribution.
    /// Safe to call again to retry refunds that failed to send.
    pub async fn cancel_game(&self, game_id: &str, host: &WalletAddress) -> Result<Vec<PayoutRecord>> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        self.require_host(game, host, "cancel the game")?;

        match game.status {
            GameStatus::Waiting | GameStatus::Playing => {
                let cancelled = GameStore::new(&self.storage)
                    .transition_status(
                        game_id,
                        &[GameStatus::Waiting, GameStatus::Playing],
                        GameStatus::Cancelled,
                    )
                    .await?;
                if cancelled {
                    tracing::warn!("Game {} cancelled by host", game_id);
                }
            }
            GameStatus::Cancelled => {}
            GameStatus::Gameover => return Err(GameError::wrong_status("waiting or playing", game.status)),
        }

        let payouts = PayoutStore::new(&self.storage);
        if !snapshot.payouts.iter().any(|p| p.kind == PayoutKind::Refund) {
            let contributions = payouts.list_contributions(game_id).await?;
            let plan = refund_plan(game_id, &contributions, &snapshot.payouts);
            payouts.record_plan(game_id, &plan).await?;
        }

        let pending: Vec<PayoutRecord> = payouts
            .list_payouts(game_id)
            .await?
            .into_iter()
            .filter(|p| p.kind == PayoutKind::Refund)
            .collect();

        for refund in pending.iter().filter(|p| !p.is_paid()) {
            self.pay(game, refund).await?;
        }

        Ok(payouts
            .list_payouts(game_id)
            .await?
            .into_iter()
            .filter(|p| p.kind == PayoutKind::Refund)
            .collect())
    }

    /// Hot-take: suggest a question for this round.
    pub async fn submit_question(&self, game_id: &str, wallet: &WalletAddress, text: &str) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        self.require_phase(&snapshot, GamePhase::SubmittingQuestions)?;
        self.require_eligible(&snapshot, wallet, "submit a question")?;

        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::InvalidQuestion("question cannot be empty".to_string()));
        }
        if text.chars().count() > self.config.max_question_len {
            return Err(GameError::InvalidQuestion(format!(
                "question is longer than {} characters",
                self.config.max_question_len
            )));
        }

        let round = snapshot.game.current_round;
        let outcome = VoteStore::new(&self.storage)
            .submit_question(game_id, round, wallet, text)
            .await?;
        check_insert(outcome, round)?;

        tracing::info!("{} submitted a question for round {} of {}", wallet, round, game_id);
        Ok(())
    }

    pub async fn vote_question(
        &self,
        game_id: &str,
        wallet: &WalletAddress,
        submission_id: &str,
    ) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        self.require_phase(&snapshot, GamePhase::VotingQuestion)?;
        self.require_eligible(&snapshot, wallet, "vote on questions")?;

        if !snapshot.submissions.iter().any(|s| s.id == submission_id) {
            return Err(GameError::UnknownSubmission(submission_id.to_string()));
        }

        let round = snapshot.game.current_round;
        let outcome = VoteStore::new(&self.storage)
            .vote_question(game_id, round, wallet, submission_id)
            .await?;
        check_insert(outcome, round)?;

        tracing::info!("{} voted for question {} in {}", wallet, submission_id, game_id);
        Ok(())
    }

    pub async fn vote_question_option(
        &self,
        game_id: &str,
        wallet: &WalletAddress,
        option_index: usize,
    ) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        self.require_phase(&snapshot, GamePhase::PickingQuestion)?;
        self.require_eligible(&snapshot, wallet, "pick a question")?;

        let available = snapshot.game.question_options.len();
        if option_index >= available {
            return Err(GameError::InvalidOption {
                index: option_index,
                available,
            });
        }

        let round = snapshot.game.current_round;
        let outcome = VoteStore::new(&self.storage)
            .vote_pick(game_id, round, wallet, option_index)
            .await?;
        check_insert(outcome, round)?;

        tracing::info!("{} picked option {} in {}", wallet, option_index, game_id);
        Ok(())
    }

    /// Host skips the pick vote; a random option becomes the question.
    pub async fn skip_question_pick(&self, game_id: &str, host: &WalletAddress) -> Result<AdvanceOutcome> {
        let snapshot = self.snapshot(game_id).await?;
        self.require_host(&snapshot.game, host, "skip the question pick")?;
        self.require_phase(&snapshot, GamePhase::PickingQuestion)?;

        let options = snapshot.game.question_options.len();
        if options == 0 {
            return Err(GameError::InvalidOption {
                index: 0,
                available: 0,
            });
        }

        let mut rng = rand::thread_rng();
        let index = rng.gen_range(0..options);
        let transition = phase::plan_advance(
            &snapshot,
            &self.config.phase_durations,
            self.config.question_option_count,
            Some(index),
            Utc::now(),
            &mut rng,
        )?;

        tracing::info!("Host skipped the pick in {}, option {} chosen", game_id, index);
        self.apply(&snapshot, transition).await
    }

    pub async fn submit_vote(&self, game_id: &str, wallet: &WalletAddress, vote: VoteValue) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        self.require_phase(&snapshot, GamePhase::VotingHonesty)?;
        self.require_eligible(&snapshot, wallet, "vote on themselves")?;

        let round = snapshot.game.current_round;
        let outcome = VoteStore::new(&self.storage)
            .submit_vote(game_id, round, wallet, vote)
            .await?;
        if !outcome.is_inserted() {
            tracing::warn!("Rejected {} vote from {} in round {}", vote, wallet, round);
        }
        check_insert(outcome, round)?;

        tracing::info!("{} voted {} in round {} of {}", wallet, vote, round, game_id);
        Ok(())
    }

    /// Add to the pot while the hot seat is answering.
    pub async fn raise_pot(&self, game_id: &str, wallet: &WalletAddress, amount: Lamports) -> Result<Lamports> {
        let snapshot = self.snapshot(game_id).await?;
        self.require_phase(&snapshot, GamePhase::Answering)?;
        self.require_eligible(&snapshot, wallet, "raise the pot on themselves")?;

        if amount.is_zero() {
            return Err(GameError::InvalidAmount("raise must be positive".to_string()));
        }

        let pot_address = snapshot.game.pot_address();
        let signature = self.transfer(wallet, &pot_address, amount).await?;
        let raise = contribution(game_id, wallet, amount, ContributionKind::Raise, signature);

        let recorded = PayoutStore::new(&self.storage)
            .record_contribution(&raise, &PhaseKey::of(&snapshot.game))
            .await?;
        if !recorded {
            // The phase closed or the game was cancelled while the raise was in flight
            self.transfer(&pot_address, wallet, amount).await?;
            tracing::warn!("Raise by {} in {} arrived late and was returned", wallet, game_id);
            return Err(GameError::StaleWrite);
        }

        let pot = GameStore::new(&self.storage).load_game(game_id).await?.current_pot;
        tracing::info!("{} raised the pot of {} by {} to {}", wallet, game_id, amount, pot);
        Ok(pot)
    }

    /// Bet on which contestant wins. Anyone may bet while the game is active.
    pub async fn place_prediction(
        &self,
        game_id: &str,
        bettor: &WalletAddress,
        bettor_name: &str,
        predicted_winner: &WalletAddress,
        amount: Lamports,
    ) -> Result<PredictionRecord> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        if !game.status.is_active() {
            return Err(GameError::wrong_status("waiting or playing", game.status));
        }
        if !snapshot.contestants().any(|p| &p.wallet == predicted_winner) {
            return Err(GameError::NotInGame(predicted_winner.to_string()));
        }
        if amount.is_zero() {
            return Err(GameError::InvalidAmount("prediction stake must be positive".to_string()));
        }

        let pot = game.pot_address();
        let signature = self.transfer(bettor, &pot, amount).await?;

        let placed = PredictionStore::new(&self.storage)
            .place_prediction(game_id, bettor, bettor_name.trim(), predicted_winner, amount, &signature)
            .await?;
        let Some(prediction) = placed else {
            // Game ended while the stake was in flight
            self.transfer(&pot, bettor, amount).await?;
            return Err(GameError::wrong_status("waiting or playing", GameStatus::Gameover));
        };

        Ok(prediction)
    }

    /// Advance out of the phase the caller last saw.
    ///
    /// A no-op when the stored phase or round differs from `expected`, so
    /// timer and host advances racing on one phase move it exactly once.
    pub async fn advance_phase(
        &self,
        game_id: &str,
        caller: &WalletAddress,
        expected: &PhaseKey,
        trigger: AdvanceTrigger,
    ) -> Result<AdvanceOutcome> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;

        if PhaseKey::of(game) != *expected {
            tracing::debug!("Advance of {} from stale position ignored", game_id);
            return Ok(AdvanceOutcome::Unchanged);
        }
        if game.status != GameStatus::Playing {
            return Err(GameError::wrong_status("playing", game.status));
        }
        if snapshot.player(caller).is_none() {
            return Err(GameError::NotInGame(caller.to_string()));
        }

        match trigger {
            AdvanceTrigger::Host => self.require_host(game, caller, "force the next phase")?,
            AdvanceTrigger::TimerExpired => {
                let passed = game.phase_deadline.is_some_and(|d| d <= Utc::now());
                if !passed {
                    return Err(GameError::DeadlineNotReached);
                }
            }
            AdvanceTrigger::Quorum => {
                if !phase::quorum_reached(&snapshot) && !game.is_host(caller) {
                    return Err(GameError::HostOnly("advance before everyone has voted"));
                }
            }
        }

        let transition = phase::plan_advance(
            &snapshot,
            &self.config.phase_durations,
            self.config.question_option_count,
            None,
            Utc::now(),
            &mut rand::thread_rng(),
        )?;
        let outcome = self.apply(&snapshot, transition).await?;
        if let AdvanceOutcome::Advanced(key) = &outcome {
            tracing::info!(
                "Game {} advanced ({:?}) to round {} {}",
                game_id,
                trigger,
                key.round,
                key.phase.map_or("gameover", |p| p.as_str())
            );
        }
        Ok(outcome)
    }

    /// Advance out of whatever phase is stored right now.
    pub async fn advance_current(
        &self,
        game_id: &str,
        caller: &WalletAddress,
        trigger: AdvanceTrigger,
    ) -> Result<AdvanceOutcome> {
        let game = GameStore::new(&self.storage).load_game(game_id).await?;
        self.advance_phase(game_id, caller, &PhaseKey::of(&game), trigger)
            .await
    }

    /// Host overrides the suggested winner of a winner-take-all game.
    pub async fn declare_winner(
        &self,
        game_id: &str,
        host: &WalletAddress,
        winner: &WalletAddress,
    ) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        self.require_host(game, host, "declare the winner")?;

        if game.status != GameStatus::Gameover {
            return Err(GameError::wrong_status("gameover", game.status));
        }
        if game.payout_mode != PayoutMode::WinnerTakeAll {
            return Err(GameError::InvalidConfig(
                "split-pot games have no single winner to declare".to_string(),
            ));
        }
        if game.distributed {
            return Err(GameError::AlreadyDistributed);
        }
        if !snapshot.contestants().any(|p| &p.wallet == winner) {
            return Err(GameError::NotInGame(winner.to_string()));
        }

        let scores = tally::scores(&snapshot);
        let mut plan = payout::plan_pot_payouts(game, &scores, Some(winner));
        plan.extend(prediction::settle(game_id, &snapshot.predictions, Some(winner)));

        let replaced = PayoutStore::new(&self.storage)
            .replace_winner_plan(game_id, winner, &plan)
            .await?;
        if !replaced {
            return Err(GameError::AlreadyDistributed);
        }

        tracing::info!("Host declared {} the winner of {}", winner, game_id);
        Ok(())
    }

    /// Send every recorded payout that has not been paid yet.
    ///
    /// Stops at the first funds failure and leaves the game undistributed, so
    /// calling again resumes with the remaining transfers.
    pub async fn distribute_payouts(&self, game_id: &str, host: &WalletAddress) -> Result<Vec<PayoutRecord>> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        self.require_host(game, host, "distribute payouts")?;

        if game.status != GameStatus::Gameover {
            return Err(GameError::wrong_status("gameover", game.status));
        }
        if game.distributed {
            tracing::info!("Payouts for {} already distributed", game_id);
            return Ok(snapshot.payouts);
        }

        let payouts = PayoutStore::new(&self.storage);
        if !snapshot
            .payouts
            .iter()
            .any(|p| matches!(p.kind, PayoutKind::Pot | PayoutKind::Prediction))
        {
            self.record_final_plan(&snapshot).await?;
        }

        let pending: Vec<PayoutRecord> = payouts
            .list_payouts(game_id)
            .await?
            .into_iter()
            .filter(|p| matches!(p.kind, PayoutKind::Pot | PayoutKind::Prediction) && !p.is_paid())
            .collect();

        for payout in &pending {
            self.pay(game, payout).await.map_err(|e| {
                tracing::error!("Payout to {} for {} failed: {}", payout.wallet, game_id, e);
                e
            })?;
        }

        self.finish_distribution(game_id).await?;
        tracing::info!("Distributed {} payouts for {}", pending.len(), game_id);
        Ok(payouts.list_payouts(game_id).await?)
    }

    /// Host marks the game settled without sending the remaining transfers.
    pub async fn override_distribution(&self, game_id: &str, host: &WalletAddress) -> Result<()> {
        let snapshot = self.snapshot(game_id).await?;
        let game = &snapshot.game;
        self.require_host(game, host, "override distribution")?;

        if game.status != GameStatus::Gameover {
            return Err(GameError::wrong_status("gameover", game.status));
        }
        if game.distributed {
            return Ok(());
        }

        let unpaid = snapshot.payouts.iter().filter(|p| !p.is_paid()).count();
        self.finish_distribution(game_id).await?;
        tracing::warn!(
            "Host overrode distribution of {}, {} payouts left unsent",
            game_id,
            unpaid
        );
        Ok(())
    }

    async fn finish_distribution(&self, game_id: &str) -> Result<()> {
        GameStore::new(&self.storage).mark_distributed(game_id).await?;
        PredictionStore::new(&self.storage).mark_settled(game_id).await?;
        Ok(())
    }

    async fn apply(&self, snapshot: &GameSnapshot, transition: Transition) -> Result<AdvanceOutcome> {
        let expected = PhaseKey::of(&snapshot.game);
        let moved = GameStore::new(&self.storage)
            .apply_progress(
                &snapshot.game.id,
                &expected,
                &transition.progress,
                transition.new_round.as_ref(),
            )
            .await?;

        if !moved {
            return Ok(AdvanceOutcome::Unchanged);
        }

        if transition.is_game_over() {
            let finished = self.snapshot(&snapshot.game.id).await?;
            self.record_final_plan(&finished).await?;
            tracing::info!("Game {} is over", snapshot.game.id);
        }

        Ok(AdvanceOutcome::Advanced(PhaseKey {
            status: transition.progress.status,
            phase: transition.progress.phase,
            round: transition.progress.round,
        }))
    }

    /// Record the pot and prediction payouts once, at game over.
    async fn record_final_plan(&self, snapshot: &GameSnapshot) -> Result<()> {
        let game = &snapshot.game;
        let scores = tally::scores(snapshot);
        let winner = match &game.winner {
            Some(w) => Some(w.clone()),
            None => payout::suggested_winner(&scores),
        };

        if game.winner.is_none() {
            if let Some(w) = &winner {
                GameStore::new(&self.storage).set_winner(&game.id, w).await?;
            }
        }

        let mut plan = payout::plan_pot_payouts(game, &scores, winner.as_ref());
        plan.extend(prediction::settle(&game.id, &snapshot.predictions, winner.as_ref()));
        PayoutStore::new(&self.storage).record_plan(&game.id, &plan).await?;

        tracing::info!(
            "Recorded {} payouts for {}, winner {}",
            plan.len(),
            game.id,
            winner.map_or_else(|| "none".to_string(), |w| w.to_string())
        );
        Ok(())
    }

    async fn pay(&self, game: &GameRecord, payout: &PayoutRecord) -> Result<String> {
        let signature = self
            .transfer(&game.pot_address(), &payout.wallet, payout.amount)
            .await?;
        let marked = PayoutStore::new(&self.storage)
            .mark_paid(&game.id, &payout.wallet, payout.kind, &signature)
            .await?;
        if !marked {
            tracing::warn!(
                "Payout {} to {} for {} was already marked paid, transfer {} is extra",
                payout.kind,
                payout.wallet,
                game.id,
                signature
            );
        }
        tracing::info!(
            "Paid {} {} to {} for {}",
            payout.kind,
            payout.amount,
            payout.wallet,
            game.id
        );
        Ok(signature)
    }

    async fn transfer(&self, from: &WalletAddress, to: &WalletAddress, amount: Lamports) -> Result<String> {
        match tokio::time::timeout(self.config.transfer_timeout, self.funds.transfer(from, to, amount)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CoreError::TransferTimeout(format!(
                "{} from {} to {} not confirmed within {:?}",
                amount, from, to, self.config.transfer_timeout
            ))
            .into()),
        }
    }

    async fn seed_deck(&self) -> Vec<String> {
        let (Some(generator), Some(config)) = (&self.generator, &self.config.question_generator) else {
            return questions::built_in_deck();
        };
        let request = GenerateRequest::from_config(config, self.config.max_players);
        questions::seed_deck(Some(generator.as_ref()), &request, self.config.max_question_len).await
    }

    fn require_host(&self, game: &GameRecord, caller: &WalletAddress, action: &'static str) -> Result<()> {
        if game.is_host(caller) {
            Ok(())
        } else {
            tracing::warn!("{} tried to {} in {} without being host", caller, action, game.id);
            Err(GameError::HostOnly(action))
        }
    }

    fn require_phase(&self, snapshot: &GameSnapshot, phase: GamePhase) -> Result<()> {
        let game = &snapshot.game;
        if game.status != GameStatus::Playing {
            return Err(GameError::wrong_status("playing", game.status));
        }
        if game.game_phase != Some(phase) {
            return Err(GameError::wrong_phase(phase, game.game_phase));
        }
        Ok(())
    }

    fn require_eligible(
        &self,
        snapshot: &GameSnapshot,
        wallet: &WalletAddress,
        action: &'static str,
    ) -> Result<()> {
        let game = &snapshot.game;
        if game.is_host(wallet) {
            return Err(GameError::HostNotAllowed(action));
        }
        if snapshot.player(wallet).is_none() {
            return Err(GameError::NotInGame(wallet.to_string()));
        }
        if game.is_hot_seat(wallet) {
            return Err(GameError::HotSeatNotAllowed(action));
        }
        Ok(())
    }
}

fn check_insert(outcome: InsertOutcome, round: u32) -> Result<()> {
    match outcome {
        InsertOutcome::Inserted => Ok(()),
        InsertOutcome::Duplicate => Err(GameError::DuplicateSubmission { round }),
        InsertOutcome::Stale => Err(GameError::StaleWrite),
    }
}

fn contribution(
    game_id: &str,
    wallet: &WalletAddress,
    amount: Lamports,
    kind: ContributionKind,
    signature: String,
) -> ContributionRecord {
    ContributionRecord {
        game_id: game_id.to_string(),
        wallet: wallet.clone(),
        amount,
        kind,
        signature,
        created_at: Utc::now(),
    }
}

/// Refund owed per wallet on cancellation: everything paid in, minus what a
/// leave refund already covered.
fn refund_plan(
    game_id: &str,
    contributions: &[ContributionRecord],
    existing: &[PayoutRecord],
) -> Vec<PayoutRecord> {
    let mut owed: BTreeMap<&WalletAddress, u64> = BTreeMap::new();
    for contribution in contributions {
        *owed.entry(&contribution.wallet).or_insert(0) += contribution.amount.as_u64();
    }
    for refund in existing.iter().filter(|p| p.kind == PayoutKind::LeaveRefund) {
        if let Some(amount) = owed.get_mut(&refund.wallet) {
            *amount = amount.saturating_sub(refund.amount.as_u64());
        }
    }

    owed.into_iter()
        .filter(|(_, amount)| *amount > 0)
        .map(|(wallet, amount)| PayoutRecord {
            game_id: game_id.to_string(),
            wallet: wallet.clone(),
            kind: PayoutKind::Refund,
            amount: Lamports(amount),
            signature: None,
        })
        .collect()
}
