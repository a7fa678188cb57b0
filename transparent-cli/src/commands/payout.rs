use super::{parse_wallet, payouts_table, Context};
use clap::Subcommand;
use dialoguer::Confirm;
use transparent_game::{GameError, Result};

#[derive(Subcommand)]
pub enum PayoutCommands {
    /// Host: name the winner of a winner-take-all game
    Winner { room: String, player: String },
    /// Host: send every pending payout
    Distribute { room: String },
    /// Host: mark the game settled without sending what is left
    Override {
        room: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Show recorded payouts
    List { room: String },
}

pub async fn handle_payout_command(cmd: PayoutCommands, ctx: &Context) -> Result<()> {
    match cmd {
        PayoutCommands::Winner { room, player } => {
            let game = ctx.room(&room).await?;
            let winner = parse_wallet(&player)?;
            ctx.engine.declare_winner(&game.id, ctx.me()?, &winner).await?;
            println!("{} declared the winner", winner);
        }

        PayoutCommands::Distribute { room } => {
            let game = ctx.room(&room).await?;
            println!("Distributing payouts...");
            let payouts = ctx.engine.distribute_payouts(&game.id, ctx.me()?).await?;
            println!("{}", payouts_table(&payouts));
        }

        PayoutCommands::Override { room, force } => {
            let game = ctx.room(&room).await?;
            if !force {
                let confirmed = Confirm::new()
                    .with_prompt("Mark payouts distributed without sending the rest?")
                    .default(false)
                    .interact()
                    .map_err(|e| GameError::internal(e.to_string()))?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            ctx.engine.override_distribution(&game.id, ctx.me()?).await?;
            println!("Game marked as distributed");
        }

        PayoutCommands::List { room } => {
            let game = ctx.room(&room).await?;
            let snapshot = ctx.engine.snapshot(&game.id).await?;
            if snapshot.payouts.is_empty() {
                println!("No payouts recorded yet.");
                return Ok(());
            }
            println!("{}", payouts_table(&snapshot.payouts));
        }
    }

    Ok(())
}
