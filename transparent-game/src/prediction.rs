//! Side-bet settlement.

use std::collections::BTreeMap;
use transparent_core::types::{Lamports, PayoutKind, PayoutRecord, PredictionRecord, WalletAddress};

/// Total staked on predictions.
pub fn prediction_pot(predictions: &[PredictionRecord]) -> Lamports {
    predictions.iter().map(|p| p.amount).sum()
}

/// Settle every prediction against the declared winner.
///
/// Correct bettors split the whole prediction pot evenly; the lamports left
/// over by integer division go to the earliest correct prediction. With no
/// correct bettors every stake is refunded. Amounts are merged per wallet.
pub fn settle(
    game_id: &str,
    predictions: &[PredictionRecord],
    winner: Option<&WalletAddress>,
) -> Vec<PayoutRecord> {
    let mut ordered: Vec<&PredictionRecord> = predictions.iter().collect();
    ordered.sort_by_key(|p| p.seq);

    let correct: Vec<&PredictionRecord> = ordered
        .iter()
        .copied()
        .filter(|p| Some(&p.predicted_winner) == winner)
        .collect();

    let mut owed: BTreeMap<&WalletAddress, u64> = BTreeMap::new();
    let mut order: Vec<&WalletAddress> = Vec::new();

    if correct.is_empty() {
        for p in &ordered {
            if !owed.contains_key(&p.bettor) {
                order.push(&p.bettor);
            }
            *owed.entry(&p.bettor).or_insert(0) += p.amount.as_u64();
        }
    } else {
        let pot = prediction_pot(predictions).as_u64();
        let count = correct.len() as u64;
        let share = pot / count;
        let remainder = pot % count;

        for (i, p) in correct.iter().enumerate() {
            let amount = if i == 0 { share + remainder } else { share };
            if !owed.contains_key(&p.bettor) {
                order.push(&p.bettor);
            }
            *owed.entry(&p.bettor).or_insert(0) += amount;
        }
    }

    order
        .into_iter()
        .filter_map(|wallet| {
            let amount = owed.get(wallet).copied().unwrap_or(0);
            (amount > 0).then(|| PayoutRecord {
                game_id: game_id.to_string(),
                wallet: wallet.clone(),
                kind: PayoutKind::Prediction,
                amount: Lamports(amount),
                signature: None,
            })
        })
        .collect()
}
