//! Question selection from a game's deck.

use rand::seq::SliceRandom;
use rand::Rng;
use transparent_core::types::QuestionMode;

/// Minimum number of options offered in the picking phase.
pub const MIN_OPTIONS: usize = 2;

/// Pick the question for a new round.
///
/// Classic and hot-take draw a random unused entry, starting over once every
/// entry has been used. Custom plays the host's list in order, wrapping.
/// Returns the question and the updated used-index list.
pub fn draw_question<R: Rng + ?Sized>(
    mode: QuestionMode,
    deck: &[String],
    used: &[usize],
    round: u32,
    rng: &mut R,
) -> Option<(String, Vec<usize>)> {
    if deck.is_empty() {
        return None;
    }

    match mode {
        QuestionMode::Custom => {
            let index = (round.saturating_sub(1) as usize) % deck.len();
            let mut used = used.to_vec();
            if !used.contains(&index) {
                used.push(index);
            }
            Some((deck[index].clone(), used))
        }
        QuestionMode::Classic | QuestionMode::HotTake => {
            let mut used = used.to_vec();
            let index = draw_unused(deck.len(), &mut used, rng)?;
            Some((deck[index].clone(), used))
        }
    }
}

/// Options for the picking phase: the top submissions first, then random deck
/// entries until there are at least [`MIN_OPTIONS`].
pub fn build_options<R: Rng + ?Sized>(
    ranked: &[String],
    deck: &[String],
    used: &[usize],
    option_count: usize,
    rng: &mut R,
) -> (Vec<String>, Vec<usize>) {
    let mut options: Vec<String> = Vec::with_capacity(option_count);
    for text in ranked {
        if options.len() == option_count {
            break;
        }
        if !options.contains(text) {
            options.push(text.clone());
        }
    }

    let mut used = used.to_vec();
    // Bounded so a deck of duplicates cannot spin forever
    let mut attempts = deck.len() * 2;
    while options.len() < MIN_OPTIONS.min(option_count) && attempts > 0 {
        attempts -= 1;
        let Some(index) = draw_unused(deck.len(), &mut used, rng) else {
            break;
        };
        if !options.contains(&deck[index]) {
            options.push(deck[index].clone());
        }
    }

    (options, used)
}

fn draw_unused<R: Rng + ?Sized>(deck_len: usize, used: &mut Vec<usize>, rng: &mut R) -> Option<usize> {
    if deck_len == 0 {
        return None;
    }

    let mut unused: Vec<usize> = (0..deck_len).filter(|i| !used.contains(i)).collect();
    if unused.is_empty() {
        tracing::debug!("Question deck exhausted, reshuffling");
        used.clear();
        unused = (0..deck_len).collect();
    }

    let index = *unused.choose(rng)?;
    used.push(index);
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn deck(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Question {}?", i)).collect()
    }

    #[test]
    fn test_custom_plays_in_order_and_wraps() {
        let mut rng = StdRng::seed_from_u64(7);
        let deck = deck(2);
        let (q1, used) = draw_question(QuestionMode::Custom, &deck, &[], 1, &mut rng).unwrap();
        let (q2, used) = draw_question(QuestionMode::Custom, &deck, &used, 2, &mut rng).unwrap();
        let (q3, _) = draw_question(QuestionMode::Custom, &deck, &used, 3, &mut rng).unwrap();
        assert_eq!(q1, "Question 0?");
        assert_eq!(q2, "Question 1?");
        assert_eq!(q3, "Question 0?");
    }

    #[test]
    fn test_classic_never_repeats_until_exhausted() {
        let mut rng = StdRng::seed_from_u64(11);
        let deck = deck(3);
        let mut used = Vec::new();
        let mut seen = Vec::new();
        for round in 1..=3 {
            let (q, next) = draw_question(QuestionMode::Classic, &deck, &used, round, &mut rng).unwrap();
            assert!(!seen.contains(&q));
            seen.push(q);
            used = next;
        }
        assert_eq!(used.len(), 3);

        let (_, reshuffled) = draw_question(QuestionMode::Classic, &deck, &used, 4, &mut rng).unwrap();
        assert_eq!(reshuffled.len(), 1);
    }

    #[test]
    fn test_empty_deck_has_no_question() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(draw_question(QuestionMode::Classic, &[], &[], 1, &mut rng).is_none());
    }

    #[test]
    fn test_options_prefer_submissions_and_pad_from_deck() {
        let mut rng = StdRng::seed_from_u64(3);
        let ranked = vec!["Top pick?".to_string()];
        let (options, used) = build_options(&ranked, &deck(5), &[], 4, &mut rng);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0], "Top pick?");
        assert_eq!(used.len(), 1);

        let many: Vec<String> = (0..6).map(|i| format!("S{}", i)).collect();
        let (options, used) = build_options(&many, &deck(5), &[], 4, &mut rng);
        assert_eq!(options, vec!["S0", "S1", "S2", "S3"]);
        assert!(used.is_empty());
    }
}
