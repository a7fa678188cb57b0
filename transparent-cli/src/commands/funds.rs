use super::{parse_sol, parse_wallet, Context};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use transparent_core::FundsService;
use transparent_game::Result;

#[derive(Subcommand)]
pub enum FundsCommands {
    /// Credit a local wallet
    Airdrop {
        amount: String,
        /// Wallet to credit, defaults to yours
        #[arg(long)]
        to: Option<String>,
    },
    /// Show a balance
    Balance {
        /// Wallet or pot address, defaults to yours
        address: Option<String>,
    },
    /// Show transfers touching a wallet
    History { address: Option<String> },
}

pub async fn handle_funds_command(cmd: FundsCommands, ctx: &Context) -> Result<()> {
    match cmd {
        FundsCommands::Airdrop { amount, to } => {
            let address = match to {
                Some(raw) => parse_wallet(&raw)?,
                None => ctx.me()?.clone(),
            };
            let balance = ctx.ledger.airdrop(&address, parse_sol(&amount)?).await?;
            println!("Balance for {}: {}", address, balance);
        }

        FundsCommands::Balance { address } => {
            let address = match address {
                Some(raw) => parse_wallet(&raw)?,
                None => ctx.me()?.clone(),
            };
            let balance = ctx.ledger.balance(&address).await?;
            println!("Balance for {}:", address);
            println!("  {} ({} lamports)", balance, balance.as_u64());
        }

        FundsCommands::History { address } => {
            let address = match address {
                Some(raw) => parse_wallet(&raw)?,
                None => ctx.me()?.clone(),
            };
            let transfers = ctx.ledger.history(&address).await?;
            if transfers.is_empty() {
                println!("No transfers for {}", address);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Time", "From", "To", "Amount", "Signature"]);
            for transfer in transfers {
                table.add_row(vec![
                    transfer.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    transfer.from.to_string(),
                    transfer.to.to_string(),
                    transfer.amount.to_string(),
                    transfer.signature[..16.min(transfer.signature.len())].to_string(),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
