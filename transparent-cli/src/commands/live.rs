use super::{print_view, Context};
use chrono::Utc;
use clap::Args;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use transparent_core::storage::PhaseKey;
use transparent_core::sync::Intent;
use transparent_core::types::{GameSnapshot, VoteValue};
use transparent_core::{
    ClientSession, GameRecord, GameStatus, GameSync, PendingIntents, WalletAddress,
};
use transparent_game::{AdvanceTrigger, GameError, GameView, HostController, PhaseTimer, Result};

#[derive(Args)]
pub struct WatchArgs {
    room: String,
    /// Host: advance on quorum and when the deadline passes
    #[arg(long)]
    host: bool,
    /// Host: send payouts as soon as the game ends
    #[arg(long)]
    auto_distribute: bool,
    /// Advance when the phase deadline passes, as any player
    #[arg(long)]
    timer: bool,
    /// Read moves from stdin: ready, ask <question>, upvote <id>, pick <n>, vote <verdict>
    #[arg(long)]
    play: bool,
}

/// A move typed while watching.
#[derive(Debug, Clone, PartialEq)]
enum Move {
    Ready,
    Ask(String),
    Upvote(String),
    Pick(usize),
    Vote(VoteValue),
}

impl Move {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match word {
            "ready" => Ok(Self::Ready),
            "ask" if !rest.is_empty() => Ok(Self::Ask(rest.to_string())),
            "upvote" if !rest.is_empty() => Ok(Self::Upvote(rest.to_string())),
            "pick" => rest
                .parse()
                .map(Self::Pick)
                .map_err(|_| GameError::InvalidConfig(format!("'{}' is not an option number", rest))),
            "vote" => Ok(Self::Vote(rest.parse()?)),
            _ => Err(GameError::InvalidConfig(format!(
                "unknown move '{}', try ready, ask, upvote, pick or vote",
                line
            ))),
        }
    }

    fn intent(&self, round: u32) -> Intent {
        match self {
            Self::Ready => Intent::Ready,
            Self::Ask(_) => Intent::SubmitQuestion { round },
            Self::Upvote(_) => Intent::VoteQuestion { round },
            Self::Pick(_) => Intent::PickQuestion { round },
            Self::Vote(_) => Intent::HonestyVote { round },
        }
    }
}

pub async fn handle_watch_command(args: WatchArgs, ctx: &Context) -> Result<()> {
    let game = ctx.room(&args.room).await?;

    let session = ClientSession::new();
    let token = session.enter(&game.id);
    let intents = ctx
        .wallet
        .as_ref()
        .map(|wallet| Arc::new(PendingIntents::new(wallet.clone())));
    let mut sync = GameSync::new(ctx.storage.clone(), &ctx.engine_config, session.clone());
    if let Some(intents) = &intents {
        sync = sync.with_intents(intents.clone());
    }
    let local = sync.local();
    let mut snapshots = local.subscribe();

    let stop = CancellationToken::new();
    let sync_task = sync.spawn(token, stop.clone());

    let host_task = if args.host {
        let controller = HostController::new(ctx.engine.clone(), ctx.me()?.clone(), game.id.clone())
            .with_auto_distribute(args.auto_distribute);
        Some(controller.spawn(local.subscribe(), stop.clone()))
    } else {
        None
    };

    let mut timer: Option<(PhaseKey, PhaseTimer)> = None;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut reading = args.play;
    if args.play {
        ctx.me()?;
    }
    println!("Watching {} [{}], Ctrl-C to stop", game.room_name, game.display_code());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = input.next_line(), if reading => {
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        if let Some(intents) = &intents {
                            play_move(ctx, &game.id, &line, local.current().as_deref(), intents).await;
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => reading = false,
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                    continue;
                };
                let view = GameView::new(snapshot.as_ref().clone(), Utc::now());
                println!();
                print_view(&view);
                if let Some(intents) = &intents {
                    print_turn(&snapshot, intents);
                }

                let key = PhaseKey::of(&snapshot.game);
                if args.timer && timer.as_ref().map(|(k, _)| k) != Some(&key) {
                    timer = schedule_timer(ctx, &snapshot.game, key)?;
                }

                let settled = host_task.is_none() || !args.auto_distribute || snapshot.game.distributed;
                if snapshot.game.status == GameStatus::Cancelled
                    || (snapshot.game.status == GameStatus::Gameover && settled)
                {
                    break;
                }
            }
        }
    }

    drop(timer);
    stop.cancel();
    session.leave();

    if let Some(task) = host_task {
        task.await.map_err(|e| GameError::internal(e.to_string()))??;
    }
    sync_task
        .await
        .map_err(|e| GameError::internal(e.to_string()))??;
    Ok(())
}

/// Send one typed move. The intent is shown as done until the write is
/// confirmed by sync, and dropped again if the engine rejects it.
async fn play_move(
    ctx: &Context,
    game_id: &str,
    line: &str,
    snapshot: Option<&GameSnapshot>,
    intents: &PendingIntents,
) {
    let chosen = match Move::parse(line) {
        Ok(chosen) => chosen,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };

    let round = snapshot.map_or(0, |s| s.game.current_round);
    let intent = chosen.intent(round);
    if snapshot.is_some_and(|s| intents.has_acted(s, &intent)) {
        println!("Already sent for this round");
        return;
    }

    intents.record(intent.clone());
    match send_move(ctx, game_id, intents.wallet(), chosen).await {
        Ok(()) => println!("Sent, waiting for confirmation"),
        Err(e) => {
            intents.forget(&intent);
            println!("Rejected: {}", e);
        }
    }
}

async fn send_move(ctx: &Context, game_id: &str, me: &WalletAddress, chosen: Move) -> Result<()> {
    match chosen {
        Move::Ready => ctx.engine.set_ready(game_id, me, true).await,
        Move::Ask(question) => ctx.engine.submit_question(game_id, me, &question).await,
        Move::Upvote(submission) => ctx.engine.vote_question(game_id, me, &submission).await,
        Move::Pick(option) => ctx.engine.vote_question_option(game_id, me, option).await,
        Move::Vote(vote) => ctx.engine.submit_vote(game_id, me, vote).await,
    }
}

fn print_turn(snapshot: &GameSnapshot, intents: &PendingIntents) {
    let Some(intent) = Intent::expected(snapshot, intents.wallet()) else {
        return;
    };
    if intents.has_acted(snapshot, &intent) {
        println!("  You: done");
    } else {
        println!("  You: your move ({:?})", intent);
    }
}

/// Arm a deadline advance for the phase `key` names. Replacing the previous
/// timer drops it, which cancels it.
fn schedule_timer(
    ctx: &Context,
    game: &GameRecord,
    key: PhaseKey,
) -> Result<Option<(PhaseKey, PhaseTimer)>> {
    let Some(deadline) = game.phase_deadline.filter(|_| game.status == GameStatus::Playing) else {
        return Ok(None);
    };

    let engine = ctx.engine.clone();
    let caller = ctx.me()?.clone();
    let game_id = game.id.clone();
    let expected = key.clone();

    let timer = PhaseTimer::schedule(deadline, move || async move {
        match engine
            .advance_phase(&game_id, &caller, &expected, AdvanceTrigger::TimerExpired)
            .await
        {
            Ok(outcome) => tracing::debug!("Deadline advance of {}: {:?}", game_id, outcome),
            Err(e) => tracing::warn!("Deadline advance of {} failed: {}", game_id, e),
        }
    });
    Ok(Some((key, timer)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moves() {
        assert_eq!(Move::parse("ready").unwrap(), Move::Ready);
        assert_eq!(
            Move::parse("ask  Who do you text most? ").unwrap(),
            Move::Ask("Who do you text most?".to_string())
        );
        assert_eq!(Move::parse("pick 2").unwrap(), Move::Pick(2));
        assert_eq!(Move::parse("vote fake").unwrap(), Move::Vote(VoteValue::Fake));
        assert!(Move::parse("pick two").is_err());
        assert!(Move::parse("ask").is_err());
        assert!(Move::parse("shout").is_err());
    }

    #[test]
    fn test_move_intents_carry_round() {
        assert_eq!(Move::Ready.intent(3), Intent::Ready);
        assert_eq!(
            Move::Vote(VoteValue::Transparent).intent(3),
            Intent::HonestyVote { round: 3 }
        );
        assert_eq!(Move::Pick(0).intent(2), Intent::PickQuestion { round: 2 });
    }
}
