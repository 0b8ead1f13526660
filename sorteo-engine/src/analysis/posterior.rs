use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use crate::numeric::ln_beta;

const PRIOR_ALPHA: f64 = 1.0;
const PRIOR_BETA: f64 = 1.0;
/// Borne du log-facteur de Bayes avant exponentiation.
const MAX_LOG_BF: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
pub struct Posterior {
    pub number: u8,
    pub successes: f64,
    pub failures: f64,
    pub mean: f64,
    pub variance: f64,
    pub lower: f64,
    pub upper: f64,
    /// Positif quand l'évidence va dans le sens d'un taux supérieur à k/N.
    pub signed_log_bf: f64,
    pub bayes_factor: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PosteriorReport {
    pub plain: Vec<Posterior>,
    pub decayed: Vec<Posterior>,
    pub decay: f64,
}

fn posterior_from_mass(number: u8, successes: f64, failures: f64, rate: f64) -> Posterior {
    let a = PRIOR_ALPHA + successes;
    let b = PRIOR_BETA + failures;
    let total = a + b;
    let mean = a / total;
    let variance = a * b / (total * total * (total + 1.0));
    let sd = variance.sqrt();

    // Beta-binomiale contre le taux uniforme : ln B(a,b) - ln B(1,1) - [s·ln p0 + f·ln(1-p0)]
    let log_bf = if rate > 0.0 && rate < 1.0 {
        ln_beta(a, b) - ln_beta(PRIOR_ALPHA, PRIOR_BETA) - (successes * rate.ln() + failures * (1.0 - rate).ln())
    } else {
        0.0
    };
    let log_bf = if log_bf.is_finite() { log_bf } else { 0.0 };
    let signed_log_bf = if mean >= rate { log_bf } else { -log_bf };

    Posterior {
        number,
        successes,
        failures,
        mean,
        variance,
        lower: (mean - 1.96 * sd).max(0.0),
        upper: (mean + 1.96 * sd).min(1.0),
        signed_log_bf,
        bayes_factor: log_bf.clamp(-MAX_LOG_BF, MAX_LOG_BF).exp(),
    }
}

/// Beta(1,1) mis à jour par les présences/absences de chaque numéro.
pub fn estimate_posterior(draws: &[Draw], domain: Domain) -> Vec<Posterior> {
    weighted_posterior(draws, domain, 1.0)
}

/// Variante pondérée : chaque tirage compte pour `decay^âge` (âge 0 = le plus récent).
pub fn estimate_decayed_posterior(draws: &[Draw], domain: Domain, decay: f64) -> Vec<Posterior> {
    weighted_posterior(draws, domain, decay.clamp(0.0, 1.0))
}

fn weighted_posterior(draws: &[Draw], domain: Domain, decay: f64) -> Vec<Posterior> {
    let size = domain.size();
    let mut success_mass = vec![0.0f64; size];
    let mut total_mass = 0.0f64;

    let mut weight = 1.0f64;
    for draw in draws {
        total_mass += weight;
        for &n in &draw.numbers {
            if domain.contains(n) {
                success_mass[(n - 1) as usize] += weight;
            }
        }
        weight *= decay;
    }

    let rate = domain.uniform_rate();
    domain
        .numbers()
        .map(|number| {
            let s = success_mass[(number - 1) as usize];
            posterior_from_mass(number, s, (total_mass - s).max(0.0), rate)
        })
        .collect()
}

pub fn analyze_posterior(draws: &[Draw], domain: Domain, decay: f64) -> PosteriorReport {
    PosteriorReport {
        plain: estimate_posterior(draws, domain),
        decayed: estimate_decayed_posterior(draws, domain, decay),
        decay,
    }
}
