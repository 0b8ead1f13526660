use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use super::voters::{RandomVoter, Voter};

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub voter: String,
    /// histogram[h] = nombre de tirages avec h numéros trouvés, h = 0..=k.
    pub histogram: Vec<u32>,
    pub tests: u32,
    pub mean_hits: f64,
    pub pct_three_plus: f64,
    pub pct_four_plus: f64,
    /// Ligne de référence (tirage aléatoire), hors classement des votants.
    pub baseline: bool,
}

/// Espérance du nombre de numéros trouvés par une grille uniforme : k²/N.
pub fn theoretical_mean(domain: Domain) -> f64 {
    let k = domain.pick_count() as f64;
    k * k / domain.size() as f64
}

/// Walk-forward sur les `last` tirages les plus récents : chaque tirage est prédit
/// à partir des seuls tirages plus anciens.
pub fn backtest_voter(voter: &dyn Voter, draws: &[Draw], domain: Domain, last: usize) -> BacktestResult {
    let k = domain.pick_count();
    let mut histogram = vec![0u32; k + 1];
    let n = last.min(draws.len());

    for t in 0..n {
        let past = &draws[t + 1..];
        if past.is_empty() {
            continue;
        }
        let picks = voter.pick(past, domain);
        let hits = picks.iter().filter(|&&x| draws[t].contains(x)).count().min(k);
        histogram[hits] += 1;
    }

    let tests: u32 = histogram.iter().sum();
    let denom = tests.max(1) as f64;
    let weighted: u32 = histogram.iter().enumerate().map(|(h, &c)| h as u32 * c).sum();
    let at_least = |min: usize| histogram.iter().skip(min).sum::<u32>() as f64 / denom * 100.0;

    BacktestResult {
        voter: voter.name().to_string(),
        tests,
        mean_hits: weighted as f64 / denom,
        pct_three_plus: at_least(3),
        pct_four_plus: at_least(4),
        histogram,
        baseline: false,
    }
}

/// Tous les votants en parallèle, barre de progression optionnelle.
/// Une ligne de référence aléatoire, graine `seed`, termine le résultat.
pub fn backtest_all(
    voters: &[Box<dyn Voter>],
    draws: &[Draw],
    domain: Domain,
    last: usize,
    seed: u64,
    progress: bool,
) -> Result<Vec<BacktestResult>> {
    let pb = if progress {
        let pb = ProgressBar::new(voters.len() as u64 + 1);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut results: Vec<BacktestResult> = voters
        .par_iter()
        .map(|voter| {
            let result = backtest_voter(voter.as_ref(), draws, domain, last);
            pb.set_message(voter.name().to_string());
            pb.inc(1);
            result
        })
        .collect();

    let mut baseline = backtest_voter(&RandomVoter::new(seed), draws, domain, last);
    baseline.baseline = true;
    pb.inc(1);
    results.push(baseline);

    pb.finish_and_clear();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::make_test_draws;
    use crate::learning::voters::{all_voters, ColdVoter, FrequencyVoter};

    fn domain() -> Domain {
        Domain::new(49, 6).unwrap()
    }

    #[test]
    fn test_theoretical_mean() {
        assert!((theoretical_mean(domain()) - 36.0 / 49.0).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_counts_every_test() {
        let draws = make_test_draws(120, domain(), 81);
        let result = backtest_voter(&FrequencyVoter::new("frequency", None), &draws, domain(), 50);
        assert_eq!(result.tests, 50);
        assert_eq!(result.histogram.len(), 7);
        assert!(result.mean_hits >= 0.0 && result.mean_hits <= 6.0);
        assert!(result.pct_four_plus <= result.pct_three_plus);
    }

    #[test]
    fn test_oldest_draw_skipped() {
        let draws = make_test_draws(10, domain(), 82);
        let result = backtest_voter(&FrequencyVoter::new("frequency", None), &draws, domain(), 200);
        assert_eq!(result.tests, 9);
    }

    #[test]
    fn test_repeating_history_rewards_frequency() {
        let draw = Draw::new("1", "2024-01-01", vec![3, 9, 17, 28, 36, 44], vec![]);
        let draws = vec![draw; 30];
        let result = backtest_voter(&FrequencyVoter::new("frequency", None), &draws, domain(), 20);
        assert_eq!(result.histogram[6], 20);
        assert_eq!(result.mean_hits, 6.0);
        assert_eq!(result.pct_three_plus, 100.0);
    }

    #[test]
    fn test_backtest_all_parallel() {
        let draws = make_test_draws(80, domain(), 83);
        let voters = all_voters();
        let results = backtest_all(&voters, &draws, domain(), 20, 7, false).unwrap();
        assert_eq!(results.len(), voters.len() + 1);
        for (r, v) in results.iter().zip(&voters) {
            assert_eq!(r.voter, v.name());
            assert_eq!(r.tests, 20);
            assert!(!r.baseline);
        }
        let last = results.last().unwrap();
        assert!(last.baseline);
        assert_eq!(last.voter, "random");
        assert_eq!(last.tests, 20);
    }

    #[test]
    fn test_random_baseline_seeded() {
        let draws = make_test_draws(150, domain(), 84);
        let voters: Vec<Box<dyn Voter>> = vec![Box::new(ColdVoter)];
        let a = backtest_all(&voters, &draws, domain(), 100, 11, false).unwrap();
        let b = backtest_all(&voters, &draws, domain(), 100, 11, false).unwrap();
        assert_eq!(a[1].histogram, b[1].histogram);
        // 600 numéros tirés au hasard : moyenne proche de k²/N ≈ 0,73
        assert!((a[1].mean_hits - theoretical_mean(domain())).abs() < 0.35, "{}", a[1].mean_hits);
    }
}
