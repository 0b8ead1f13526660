pub mod bias;
pub mod entropy;
pub mod periodicity;
pub mod posterior;
pub mod transition;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use sorteo_db::models::{Domain, Draw, Game};

use bias::{BiasReport, ConsistentBias};
use entropy::EntropyReport;
use periodicity::PeriodicityReport;
use posterior::PosteriorReport;
use transition::TransitionReport;

/// Les cinq méthodes d'analyse, dans l'ordre de fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Bias,
    Posterior,
    Periodicity,
    Transition,
    Entropy,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Bias,
        Method::Posterior,
        Method::Periodicity,
        Method::Transition,
        Method::Entropy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Bias => "bias",
            Method::Posterior => "posterior",
            Method::Periodicity => "periodicity",
            Method::Transition => "transition",
            Method::Entropy => "entropy",
        }
    }

    /// Étiquette courte pour les tags de convergence.
    pub fn short(&self) -> &'static str {
        match self {
            Method::Bias => "CHI",
            Method::Posterior => "BAY",
            Method::Periodicity => "FFT",
            Method::Transition => "MKV",
            Method::Entropy => "ENT",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Method::Bias => 0,
            Method::Posterior => 1,
            Method::Periodicity => 2,
            Method::Transition => 3,
            Method::Entropy => 4,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub bias_window: usize,
    pub decay: f64,
    pub max_period: usize,
    pub entropy_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bias_window: 50,
            decay: 0.98,
            max_period: 30,
            entropy_window: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisBundle {
    pub bias: BiasReport,
    pub consistency: Vec<ConsistentBias>,
    pub posterior: PosteriorReport,
    pub periodicity: PeriodicityReport,
    pub transition: TransitionReport,
    pub entropy: EntropyReport,
}

/// Lance les cinq analyseurs sur le même historique.
/// Fonctions pures : on les répartit sur le pool rayon.
pub fn analyze(draws: &[Draw], domain: Domain, config: &AnalysisConfig) -> AnalysisBundle {
    let ((bias, consistency), (posterior, (periodicity, (transition, entropy)))) = rayon::join(
        || {
            (
                bias::detect_bias(draws, domain),
                bias::consistent_bias(draws, domain, config.bias_window),
            )
        },
        || {
            rayon::join(
                || posterior::analyze_posterior(draws, domain, config.decay),
                || {
                    rayon::join(
                        || periodicity::detect_periodicity(draws, domain, config.max_period),
                        || {
                            (
                                transition::analyze_transitions(draws, domain),
                                entropy::analyze_entropy(draws, domain, config.entropy_window),
                            )
                        },
                    )
                },
            )
        },
    );

    AnalysisBundle {
        bias,
        consistency,
        posterior,
        periodicity,
        transition,
        entropy,
    }
}

/// Nombre d'apparitions de chaque numéro (index = numéro - 1).
pub fn count_occurrences(draws: &[Draw], domain: Domain) -> Vec<u32> {
    let mut counts = vec![0u32; domain.size()];
    for draw in draws {
        for &n in &draw.numbers {
            if domain.contains(n) {
                counts[(n - 1) as usize] += 1;
            }
        }
    }
    counts
}

/// Série binaire de présence en ordre chronologique (draws[0] = le plus récent → on inverse).
pub fn occurrence_series(draws: &[Draw], number: u8) -> Vec<f64> {
    draws
        .iter()
        .rev()
        .map(|d| if d.contains(number) { 1.0 } else { 0.0 })
        .collect()
}

/// Fréquences d'une famille de complémentaires (positions de même libellé).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraFrequencies {
    pub label: &'static str,
    /// (valeur, occurrences), du plus au moins fréquent ; à égalité, valeur croissante.
    pub counts: Vec<(u8, u32)>,
}

/// Occurrences de chaque valeur de `range` aux positions données de `Draw::extras`.
/// Les valeurs jamais sorties figurent avec 0, en fin de liste.
pub fn extra_counts(draws: &[Draw], positions: &[usize], range: (u8, u8)) -> Vec<(u8, u32)> {
    let (lo, hi) = range;
    let mut counts: Vec<(u8, u32)> = (lo..=hi).map(|v| (v, 0)).collect();
    for draw in draws {
        for &p in positions {
            if let Some(&e) = draw.extras.get(p) {
                if (lo..=hi).contains(&e) {
                    counts[(e - lo) as usize].1 += 1;
                }
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    counts
}

/// Complémentaires les plus fréquents, famille par famille : complémentaire et
/// reintegro comptés séparément, les deux étoiles ensemble.
pub fn top_extras(draws: &[Draw], game: Game, n: usize) -> Vec<ExtraFrequencies> {
    let labels = game.extra_labels();
    let mut families: Vec<ExtraFrequencies> = Vec::new();
    for (position, &label) in labels.iter().enumerate() {
        if families.iter().any(|f| f.label == label) {
            continue;
        }
        let positions: Vec<usize> = (0..labels.len()).filter(|&p| labels[p] == label).collect();
        let mut counts = extra_counts(draws, &positions, game.extra_slot_range(position));
        counts.retain(|&(_, c)| c > 0);
        counts.truncate(n);
        families.push(ExtraFrequencies { label, counts });
    }
    families
}

/// Historique synthétique uniforme et reproductible, draws[0] = le plus récent.
pub fn make_test_draws(n: usize, domain: Domain, seed: u64) -> Vec<Draw> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pool: Vec<u8> = domain.numbers().collect();
    (0..n)
        .map(|i| {
            pool.shuffle(&mut rng);
            let mut numbers = pool[..domain.pick_count()].to_vec();
            numbers.sort();
            let day = n - i;
            Draw {
                draw_id: format!("{:05}", day),
                date: format!("{:04}-{:02}-{:02}", 2000 + day / 336, (day / 28) % 12 + 1, day % 28 + 1),
                numbers,
                extras: vec![(day % 10) as u8],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new(49, 6).unwrap()
    }

    #[test]
    fn test_make_test_draws_valid() {
        let draws = make_test_draws(30, domain(), 42);
        assert_eq!(draws.len(), 30);
        for d in &draws {
            assert_eq!(d.numbers.len(), 6);
            let mut sorted = d.numbers.clone();
            sorted.dedup();
            assert_eq!(sorted.len(), 6);
            assert!(d.numbers.iter().all(|&n| (1..=49).contains(&n)));
        }
        assert_eq!(make_test_draws(30, domain(), 42), draws);
    }

    #[test]
    fn test_analyze_covers_full_domain() {
        let draws = make_test_draws(120, domain(), 1);
        let bundle = analyze(&draws, domain(), &AnalysisConfig::default());
        assert_eq!(bundle.bias.numbers.len(), 49);
        assert_eq!(bundle.consistency.len(), 49);
        assert_eq!(bundle.posterior.plain.len(), 49);
        assert_eq!(bundle.posterior.decayed.len(), 49);
        assert_eq!(bundle.periodicity.signals.len(), 49);
        assert_eq!(bundle.transition.first_order.len(), 49);
        assert_eq!(bundle.entropy.probabilities.len(), 49);
    }

    #[test]
    fn test_analyze_empty_history() {
        let bundle = analyze(&[], domain(), &AnalysisConfig::default());
        assert_eq!(bundle.bias.draws, 0);
        assert!(!bundle.periodicity.sufficient);
        assert!(!bundle.entropy.sufficient);
        assert!(bundle.transition.second_order.is_none());
    }

    #[test]
    fn test_occurrence_series_chronological() {
        let draws = make_test_draws(5, domain(), 2);
        let target = draws[0].numbers[0];
        let series = occurrence_series(&draws, target);
        assert_eq!(series.len(), 5);
        assert_eq!(series[4], 1.0);
    }

    #[test]
    fn test_top_extras_per_slot() {
        let mut draws = vec![Draw::new("1", "2024-01-01", vec![1, 2, 3, 4, 5, 6], vec![30, 3]); 3];
        draws.push(Draw::new("2", "2024-01-04", vec![1, 2, 3, 4, 5, 6], vec![5, 3]));
        draws.push(Draw::new("3", "2024-01-08", vec![1, 2, 3, 4, 5, 6], vec![3, 7]));

        let top = top_extras(&draws, Game::Primitiva, 3);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].label, "complémentaire");
        assert_eq!(top[0].counts, vec![(30, 3), (3, 1), (5, 1)]);
        assert_eq!(top[1].label, "reintegro");
        assert_eq!(top[1].counts, vec![(3, 4), (7, 1)]);
    }

    #[test]
    fn test_top_extras_stars_pooled() {
        let draws = vec![
            Draw::new("1", "2024-01-02", vec![1, 2, 3, 4, 5], vec![2, 9]),
            Draw::new("2", "2024-01-05", vec![1, 2, 3, 4, 5], vec![9, 11]),
        ];
        let top = top_extras(&draws, Game::Euromillones, 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].counts, vec![(9, 2), (2, 1), (11, 1)]);
    }

    #[test]
    fn test_extra_counts_lists_unseen_values() {
        let draws = vec![Draw::new("1", "2024-01-01", vec![1, 2, 3, 4, 5, 6], vec![30, 4])];
        let counts = extra_counts(&draws, &[1], (0, 9));
        assert_eq!(counts.len(), 10);
        assert_eq!(counts[0], (4, 1));
        assert_eq!(counts[1], (0, 0));
    }

    #[test]
    fn test_method_indices() {
        for (i, m) in Method::ALL.iter().enumerate() {
            assert_eq!(m.index(), i);
        }
    }
}
