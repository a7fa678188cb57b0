//! Payout computation. Pure functions of the final scores.

use crate::tally::Score;
use transparent_core::types::{GameRecord, Lamports, PayoutKind, PayoutMode, PayoutRecord, WalletAddress};

/// Fixed-point scale applied to honesty ratios before splitting.
const RATIO_SCALE: u128 = 1_000_000_000_000;

/// Highest honesty ratio, ties by join order (the order of `scores`).
pub fn suggested_winner(scores: &[Score]) -> Option<WalletAddress> {
    let mut best: Option<&Score> = None;
    for score in scores {
        match best {
            Some(top) if score.honesty_ratio() <= top.honesty_ratio() => {}
            _ => best = Some(score),
        }
    }
    best.map(|s| s.wallet.clone())
}

/// Split `pot` in proportion to each player's honesty ratio.
///
/// Players nobody voted on have ratio 0 and get nothing. Shares are floored
/// and the leftover lamports go one each to the largest remainders, ties in
/// join order, so the shares always add up to `pot`. If every ratio is 0 the
/// pot is split evenly.
pub fn split_pot(pot: Lamports, scores: &[Score]) -> Vec<(WalletAddress, Lamports)> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut weights: Vec<u128> = scores.iter().map(ratio_weight).collect();
    if weights.iter().all(|w| *w == 0) {
        weights = vec![1; scores.len()];
    }
    let total: u128 = weights.iter().sum();
    let pot_units = pot.as_u64() as u128;

    let mut shares: Vec<(u128, u128)> = weights
        .iter()
        .map(|w| {
            let scaled = pot_units * w;
            (scaled / total, scaled % total)
        })
        .collect();

    let assigned: u128 = shares.iter().map(|(share, _)| share).sum();
    let mut leftover = pot_units - assigned;

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| shares[b].1.cmp(&shares[a].1).then(a.cmp(&b)));
    for index in order {
        if leftover == 0 {
            break;
        }
        shares[index].0 += 1;
        leftover -= 1;
    }

    scores
        .iter()
        .zip(shares)
        .map(|(score, (share, _))| (score.wallet.clone(), Lamports(share as u64)))
        .collect()
}

/// Pot payouts owed at game over. Zero shares are left out.
pub fn plan_pot_payouts(
    game: &GameRecord,
    scores: &[Score],
    winner: Option<&WalletAddress>,
) -> Vec<PayoutRecord> {
    let shares = match game.payout_mode {
        PayoutMode::WinnerTakeAll => match winner {
            Some(w) => vec![(w.clone(), game.current_pot)],
            None => Vec::new(),
        },
        PayoutMode::SplitPot => split_pot(game.current_pot, scores),
    };

    shares
        .into_iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(wallet, amount)| PayoutRecord {
            game_id: game.id.clone(),
            wallet,
            kind: PayoutKind::Pot,
            amount,
            signature: None,
        })
        .collect()
}

fn ratio_weight(score: &Score) -> u128 {
    let total = score.tally.total() as u128;
    if total == 0 {
        return 0;
    }
    score.tally.transparent as u128 * RATIO_SCALE / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::HonestyTally;

    fn score(name: &str, transparent: u32, fake: u32) -> Score {
        Score {
            wallet: WalletAddress::parse(name).unwrap(),
            name: name.to_string(),
            tally: HonestyTally { transparent, fake },
            rounds_in_hot_seat: 1,
        }
    }

    #[test]
    fn test_split_proportional_to_ratio() {
        // 0.75 and 0.25 of a 0.2 SOL pot
        let shares = split_pot(
            Lamports(200_000_000),
            &[score("alice", 3, 1), score("bob", 1, 3)],
        );
        assert_eq!(shares[0].1, Lamports(150_000_000));
        assert_eq!(shares[1].1, Lamports(50_000_000));
    }

    #[test]
    fn test_split_sums_to_pot() {
        let scores = [score("a", 1, 2), score("b", 2, 1), score("c", 1, 0), score("d", 0, 0)];
        for pot in [1u64, 7, 100, 999_999_999, 123_456_789_012] {
            let shares = split_pot(Lamports(pot), &scores);
            let total: u64 = shares.iter().map(|(_, l)| l.as_u64()).sum();
            assert_eq!(total, pot);
            assert_eq!(shares[3].1, Lamports(0));
        }
    }

    #[test]
    fn test_all_zero_ratios_split_evenly() {
        let shares = split_pot(Lamports(10), &[score("a", 0, 2), score("b", 0, 0), score("c", 0, 1)]);
        let amounts: Vec<u64> = shares.iter().map(|(_, l)| l.as_u64()).collect();
        assert_eq!(amounts, vec![4, 3, 3]);
    }

    #[test]
    fn test_suggested_winner_ties_by_join_order() {
        let scores = [score("a", 1, 1), score("b", 2, 0), score("c", 4, 0)];
        assert_eq!(suggested_winner(&scores).unwrap().as_str(), "b");
        assert!(suggested_winner(&[]).is_none());
    }
}
