//! Fusion des cinq analyseurs en un classement unique par numéro.
//!
//! Chaque analyseur est ramené à un sous-score dans [0,100] (50 = neutre), puis
//! les sous-scores sont pondérés. Les poids statistiques dépendent de ce que les
//! analyseurs détectent sur l'historique courant ; s'il existe des poids appris
//! par la boucle d'apprentissage, ils sont mélangés 50/50 avec ceux-ci.

use serde::Serialize;

use sorteo_db::models::{Domain, Draw, WeightVector};

use crate::analysis::{analyze, AnalysisBundle, AnalysisConfig, Method};

const NEUTRAL: f64 = 50.0;
const ACTIVE_THRESHOLD: f64 = 55.0;
const TAG_THRESHOLD: f64 = 60.0;

/// Poids par méthode, indexés par `Method::index()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MethodWeights(pub [f64; 5]);

impl MethodWeights {
    pub fn get(&self, method: Method) -> f64 {
        self.0[method.index()]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn normalized(self) -> Self {
        let total = self.sum();
        if total > 0.0 && total.is_finite() {
            MethodWeights(self.0.map(|w| w / total))
        } else {
            MethodWeights([0.2; 5])
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Method, f64)> + '_ {
        Method::ALL.iter().map(move |&m| (m, self.get(m)))
    }
}

/// Poids statistiques adaptatifs, normalisés pour sommer à 1.
pub fn statistical_weights(bundle: &AnalysisBundle) -> MethodWeights {
    let bias = if bundle.bias.significant_fraction() > 0.10 { 0.30 } else { 0.10 };
    let posterior = 0.20;
    let periodicity = if bundle.periodicity.confident_fraction(0.5) > 0.05 { 0.20 } else { 0.05 };
    let transition = if bundle.transition.significant_fraction() > 0.05 { 0.15 } else { 0.05 };
    let entropy = if bundle.entropy.low_entropy { 0.15 } else { 0.05 };
    MethodWeights([bias, posterior, periodicity, transition, entropy]).normalized()
}

/// Mélange 50/50 avec les poids appris puis renormalise.
/// Sans poids appris exploitables, les poids statistiques sont rendus tels quels.
pub fn blend_weights(statistical: MethodWeights, learned: Option<&WeightVector>) -> MethodWeights {
    let Some(learned) = learned else {
        return statistical;
    };
    let raw: [f64; 5] = Method::ALL.map(|m| {
        learned
            .get(m.name())
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(0.0)
    });
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return statistical;
    }
    let mut blended = [0.0; 5];
    for i in 0..5 {
        blended[i] = 0.5 * statistical.0[i] + 0.5 * raw[i] / total;
    }
    MethodWeights(blended).normalized()
}

fn scaled(deviation: f64, saturation: f64) -> f64 {
    NEUTRAL + NEUTRAL * (deviation / saturation).clamp(-1.0, 1.0)
}

/// Sous-scores [0,100] de chaque numéro (index = numéro - 1), dans l'ordre de `Method::ALL`.
pub fn sub_scores(bundle: &AnalysisBundle, domain: Domain) -> Vec<[f64; 5]> {
    let rate = domain.uniform_rate();
    let has_history = bundle.bias.draws > 0;
    let has_windows = bundle.consistency.iter().any(|c| c.variance > 0.0 || c.mean_bias != 0.0);
    let entropy = &bundle.entropy;
    let m = entropy.concentrated.len();

    domain
        .numbers()
        .map(|number| {
            let idx = (number - 1) as usize;

            let bias = if has_history {
                let point = scaled(bundle.bias.numbers[idx].bias, 0.5);
                if has_windows {
                    let cons = NEUTRAL + NEUTRAL * (bundle.consistency[idx].consistency / 0.25).clamp(0.0, 1.0);
                    0.7 * point + 0.3 * cons
                } else {
                    point
                }
            } else {
                NEUTRAL
            };

            // Écart à la moyenne a posteriori qu'aurait un numéro parfaitement uniforme
            let posterior = if has_history {
                let deviation = |p: &crate::analysis::posterior::Posterior| {
                    let mass = p.successes + p.failures;
                    let baseline = (1.0 + mass * rate) / (2.0 + mass);
                    (p.mean - baseline) / baseline
                };
                let dev = (deviation(&bundle.posterior.plain[idx]) + deviation(&bundle.posterior.decayed[idx])) / 2.0;
                scaled(dev, 0.5)
            } else {
                NEUTRAL
            };

            let periodicity = if bundle.periodicity.sufficient {
                let s = &bundle.periodicity.signals[idx];
                NEUTRAL + NEUTRAL * s.confidence * (2.0 * s.peak_proximity() - 1.0)
            } else {
                NEUTRAL
            };

            let transition = if bundle.bias.draws >= 2 {
                match bundle.transition.predicted(number) {
                    Some(p) => scaled(p / rate - 1.0, 1.0),
                    None => NEUTRAL,
                }
            } else {
                NEUTRAL
            };

            let entropy_score = if entropy.sufficient {
                match entropy.concentrated.iter().position(|&n| n == number) {
                    Some(rank) => 60.0 + 40.0 * (m - rank) as f64 / m as f64,
                    None => NEUTRAL,
                }
            } else {
                NEUTRAL
            };

            [bias, posterior, periodicity, transition, entropy_score]
                .map(|s| if s.is_finite() { s.clamp(0.0, 100.0) } else { NEUTRAL })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceScore {
    pub number: u8,
    pub score: f64,
    pub active_factors: usize,
    pub tags: String,
    pub sub_scores: [f64; 5],
}

#[derive(Debug, Clone, Serialize)]
pub struct Ranking {
    pub statistical: MethodWeights,
    pub weights: MethodWeights,
    /// Trié par score décroissant, à égalité par numéro croissant.
    pub scores: Vec<ConvergenceScore>,
}

impl Ranking {
    pub fn ranked_numbers(&self) -> Vec<u8> {
        self.scores.iter().map(|s| s.number).collect()
    }

    /// Rang (0 = meilleur) d'un numéro.
    pub fn rank_of(&self, number: u8) -> Option<usize> {
        self.scores.iter().position(|s| s.number == number)
    }
}

pub fn score_bundle(bundle: &AnalysisBundle, domain: Domain, learned: Option<&WeightVector>) -> Ranking {
    let statistical = statistical_weights(bundle);
    let weights = blend_weights(statistical, learned);

    let mut scores: Vec<ConvergenceScore> = sub_scores(bundle, domain)
        .into_iter()
        .zip(domain.numbers())
        .map(|(subs, number)| {
            let score: f64 = subs.iter().zip(weights.0.iter()).map(|(s, w)| s * w).sum();
            let score = if score.is_finite() { score.clamp(0.0, 100.0) } else { NEUTRAL };
            let active_factors = subs.iter().filter(|&&s| s > ACTIVE_THRESHOLD).count();
            let tags = Method::ALL
                .iter()
                .filter(|m| subs[m.index()] > TAG_THRESHOLD)
                .map(|m| m.short())
                .collect::<Vec<_>>()
                .join("+");
            ConvergenceScore {
                number,
                score,
                active_factors,
                tags,
                sub_scores: subs,
            }
        })
        .collect();

    // sort_by est stable : l'ordre 1..N départage les égalités
    scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Ranking {
        statistical,
        weights,
        scores,
    }
}

/// Point d'entrée : analyse puis fusion.
pub fn score(draws: &[Draw], domain: Domain, config: &AnalysisConfig, learned: Option<&WeightVector>) -> Ranking {
    let bundle = analyze(draws, domain, config);
    score_bundle(&bundle, domain, learned)
}

/// Les `n` meilleurs numéros selon le seul sous-score d'une méthode.
pub fn top_by_method(subs: &[[f64; 5]], method: Method, n: usize) -> Vec<u8> {
    let mut order: Vec<usize> = (0..subs.len()).collect();
    order.sort_by(|&a, &b| {
        subs[b][method.index()]
            .partial_cmp(&subs[a][method.index()])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.into_iter().take(n).map(|i| (i + 1) as u8).collect()
}
