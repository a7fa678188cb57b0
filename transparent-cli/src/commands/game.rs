use super::{parse_sol, parse_wallet, print_view, Context};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::{Confirm, Input};
use transparent_core::types::{PayoutMode, QuestionMode};
use transparent_game::{GameError, NewGame, Result};

#[derive(Subcommand)]
pub enum GameCommands {
    /// Create a new game and become its host
    Create {
        /// Room name shown to players
        #[arg(short, long, default_value = "")]
        room_name: String,
        /// Buy-in in SOL
        #[arg(short, long, default_value = "0.1")]
        buy_in: String,
        /// Payout mode (winner-take-all, split-pot)
        #[arg(short, long, default_value = "split-pot")]
        payout: String,
        /// Question mode (classic, hot-take, custom)
        #[arg(short, long, default_value = "classic")]
        mode: String,
        /// Rounds to play, 0 for one per player
        #[arg(short = 'n', long, default_value_t = 0)]
        num_questions: u32,
        /// Custom question, repeatable
        #[arg(short, long = "question")]
        questions: Vec<String>,
        /// Your display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Join a game by room code, paying the buy-in
    Join {
        room: String,
        /// Your display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Mark yourself ready
    Ready {
        room: String,
        /// Mark yourself not ready instead
        #[arg(long)]
        undo: bool,
    },
    /// Host: let a player leave and refund their buy-in
    Leave { room: String, player: String },
    /// Host: start the game once everyone is ready
    Start { room: String },
    /// Host: cancel the game and refund everyone
    Cancel {
        room: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// List games in this data directory
    List,
    /// Show a game
    Show {
        room: String,
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_game_command(cmd: GameCommands, ctx: &Context) -> Result<()> {
    match cmd {
        GameCommands::Create {
            room_name,
            buy_in,
            payout,
            mode,
            num_questions,
            questions,
            name,
        } => {
            let host = ctx.me()?.clone();
            let new_game = NewGame {
                room_name,
                host_name: display_name(ctx, name)?,
                host,
                buy_in: parse_sol(&buy_in)?,
                payout_mode: payout.parse::<PayoutMode>()?,
                question_mode: mode.parse::<QuestionMode>()?,
                num_questions,
                custom_questions: questions,
            };

            println!("Creating game...");
            let game = ctx.engine.create_game(new_game).await?;

            println!("Game created successfully!");
            println!("  Room: {} ({})", game.room_name, game.display_code());
            println!("  ID: {}", game.id);
            println!("  Buy-in: {}", game.buy_in);
            println!("  Mode: {} / {}", game.question_mode, game.payout_mode);
            println!("  Questions in deck: {}", game.question_deck.len());
        }

        GameCommands::Join { room, name } => {
            let game = ctx.room(&room).await?;
            let player = ctx
                .engine
                .join_game(&game.id, ctx.me()?, &display_name(ctx, name)?)
                .await?;
            println!("Joined {} as {} (buy-in {} paid)", game.room_name, player.name, game.buy_in);
        }

        GameCommands::Ready { room, undo } => {
            let game = ctx.room(&room).await?;
            ctx.engine.set_ready(&game.id, ctx.me()?, !undo).await?;
            println!("{}", if undo { "Marked not ready" } else { "Ready!" });
        }

        GameCommands::Leave { room, player } => {
            let game = ctx.room(&room).await?;
            let player = parse_wallet(&player)?;
            match ctx.engine.approve_leave(&game.id, ctx.me()?, &player).await? {
                Some(signature) => println!("{} left, refund sent: {}", player, signature),
                None => println!("{} left", player),
            }
        }

        GameCommands::Start { room } => {
            let game = ctx.room(&room).await?;
            if ctx.engine.start_game(&game.id, ctx.me()?).await?.advanced() {
                println!("Game started!");
            } else {
                println!("Game was already started");
            }
            print_view(&ctx.engine.view(&game.id).await?);
        }

        GameCommands::Cancel { room, force } => {
            let game = ctx.room(&room).await?;
            if !force {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Cancel '{}' and refund every player?", game.room_name))
                    .default(false)
                    .interact()
                    .map_err(|e| GameError::internal(e.to_string()))?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let refunds = ctx.engine.cancel_game(&game.id, ctx.me()?).await?;
            println!("Game cancelled, {} refunds sent", refunds.len());
            println!("{}", super::payouts_table(&refunds));
        }

        GameCommands::List => {
            let games = ctx.engine.list_games().await?;
            if games.is_empty() {
                println!("No games found.");
                println!("Create one with: transparent game create");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Room", "Name", "Status", "Mode", "Pot", "Host"]);
            for game in games {
                table.add_row(vec![
                    game.display_code(),
                    game.room_name.clone(),
                    game.status.to_string(),
                    game.question_mode.to_string(),
                    game.current_pot.to_string(),
                    game.host_wallet.to_string(),
                ]);
            }
            println!("{}", table);
        }

        GameCommands::Show { room, json } => {
            let game = ctx.room(&room).await?;
            let view = ctx.engine.view(&game.id).await?;
            if json {
                let raw = serde_json::to_string_pretty(&view.snapshot)
                    .map_err(|e| GameError::internal(e.to_string()))?;
                println!("{}", raw);
            } else {
                print_view(&view);
            }
        }
    }

    Ok(())
}

fn display_name(ctx: &Context, name: Option<String>) -> Result<String> {
    if let Some(name) = name.or_else(|| ctx.cli_config.default_name.clone()) {
        return Ok(name);
    }
    Input::new()
        .with_prompt("Display name")
        .interact_text()
        .map_err(|e| GameError::internal(e.to_string()))
}
