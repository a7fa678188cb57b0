use super::{parse_sol, parse_wallet, Context};
use clap::Subcommand;
use transparent_core::types::VoteValue;
use transparent_game::{AdvanceOutcome, AdvanceTrigger, Result};

#[derive(Subcommand)]
pub enum PlayCommands {
    /// Hot-take: suggest a question for the hot seat
    Ask { room: String, question: String },
    /// Hot-take: vote for a suggested question
    Upvote {
        room: String,
        /// Submission id, see 'game show --json'
        submission: String,
    },
    /// Hot-take: vote for one of the offered questions
    Pick { room: String, option: usize },
    /// Host: skip the pick vote and draw an option at random
    SkipPick { room: String },
    /// Judge the hot seat's answer
    Vote {
        room: String,
        /// transparent or fake
        verdict: String,
    },
    /// Add SOL to the pot while the hot seat answers
    Raise { room: String, amount: String },
    /// Bet on who wins
    Predict {
        room: String,
        player: String,
        amount: String,
        /// Name shown next to the bet
        #[arg(long, default_value = "spectator")]
        name: String,
    },
    /// Move to the next phase
    Advance {
        room: String,
        /// Why: host, timer or quorum
        #[arg(short, long, default_value = "host")]
        trigger: String,
    },
}

pub async fn handle_play_command(cmd: PlayCommands, ctx: &Context) -> Result<()> {
    let me = ctx.me()?;

    match cmd {
        PlayCommands::Ask { room, question } => {
            let game = ctx.room(&room).await?;
            ctx.engine.submit_question(&game.id, me, &question).await?;
            println!("Question submitted");
        }

        PlayCommands::Upvote { room, submission } => {
            let game = ctx.room(&room).await?;
            ctx.engine.vote_question(&game.id, me, &submission).await?;
            println!("Vote recorded");
        }

        PlayCommands::Pick { room, option } => {
            let game = ctx.room(&room).await?;
            ctx.engine.vote_question_option(&game.id, me, option).await?;
            println!("Picked option {}", option);
        }

        PlayCommands::SkipPick { room } => {
            let game = ctx.room(&room).await?;
            ctx.engine.skip_question_pick(&game.id, me).await?;
            let game = ctx.engine.snapshot(&game.id).await?.game;
            println!(
                "Question: {}",
                game.current_question.unwrap_or_else(|| "-".to_string())
            );
        }

        PlayCommands::Vote { room, verdict } => {
            let game = ctx.room(&room).await?;
            let vote: VoteValue = verdict.parse()?;
            ctx.engine.submit_vote(&game.id, me, vote).await?;
            println!("Voted {}", vote);
        }

        PlayCommands::Raise { room, amount } => {
            let game = ctx.room(&room).await?;
            let pot = ctx.engine.raise_pot(&game.id, me, parse_sol(&amount)?).await?;
            println!("Pot is now {}", pot);
        }

        PlayCommands::Predict {
            room,
            player,
            amount,
            name,
        } => {
            let game = ctx.room(&room).await?;
            let prediction = ctx
                .engine
                .place_prediction(&game.id, me, &name, &parse_wallet(&player)?, parse_sol(&amount)?)
                .await?;
            println!(
                "Bet {} on {} (#{})",
                prediction.amount, prediction.predicted_winner, prediction.seq
            );
        }

        PlayCommands::Advance { room, trigger } => {
            let game = ctx.room(&room).await?;
            let trigger = match trigger.as_str() {
                "timer" => AdvanceTrigger::TimerExpired,
                "quorum" => AdvanceTrigger::Quorum,
                _ => AdvanceTrigger::Host,
            };
            match ctx.engine.advance_current(&game.id, me, trigger).await? {
                AdvanceOutcome::Advanced(key) => println!(
                    "Advanced to round {} ({})",
                    key.round,
                    key.phase.map_or_else(|| key.status.to_string(), |p| p.to_string())
                ),
                AdvanceOutcome::Unchanged => println!("Someone else already advanced"),
            }
        }
    }

    Ok(())
}
