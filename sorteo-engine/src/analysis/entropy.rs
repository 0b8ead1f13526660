use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use super::count_occurrences;
use crate::numeric::{mean, variance};

const LOW_ENTROPY_SIGMAS: f64 = 1.5;
const CONCENTRATION_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Serialize)]
pub struct EntropyReport {
    pub window: usize,
    pub entropy: f64,
    pub max_entropy: f64,
    /// entropy / log2(N)
    pub ratio: f64,
    pub reference_mean: f64,
    pub reference_sd: f64,
    pub reference_windows: usize,
    pub low_entropy: bool,
    /// Probabilité empirique de chaque numéro dans la fenêtre (index = numéro - 1).
    pub probabilities: Vec<f64>,
    /// Numéros au-delà de 1,5× la probabilité uniforme, du plus au moins concentré.
    pub concentrated: Vec<u8>,
    pub sufficient: bool,
}

/// Entropie de Shannon (base 2) de la distribution empirique d'un bloc de tirages.
fn window_distribution(draws: &[Draw], domain: Domain) -> (f64, Vec<f64>) {
    let counts = count_occurrences(draws, domain);
    let total: u32 = counts.iter().sum();
    if total == 0 {
        return (0.0, vec![0.0; domain.size()]);
    }
    let probs: Vec<f64> = counts.iter().map(|&c| c as f64 / total as f64).collect();
    let h = probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.log2())
        .sum();
    (h, probs)
}

/// Compare l'entropie des `window` derniers tirages à celle des fenêtres
/// disjointes plus anciennes de même taille.
pub fn analyze_entropy(draws: &[Draw], domain: Domain, window: usize) -> EntropyReport {
    let max_entropy = (domain.size() as f64).log2();
    let effective = window.min(draws.len());

    if effective == 0 {
        return EntropyReport {
            window,
            entropy: 0.0,
            max_entropy,
            ratio: 0.0,
            reference_mean: 0.0,
            reference_sd: 0.0,
            reference_windows: 0,
            low_entropy: false,
            probabilities: vec![0.0; domain.size()],
            concentrated: Vec::new(),
            sufficient: false,
        };
    }

    let (entropy, probabilities) = window_distribution(&draws[..effective], domain);
    let ratio = if max_entropy > 0.0 { entropy / max_entropy } else { 0.0 };

    let reference: Vec<f64> = if effective == window {
        draws[window..]
            .chunks_exact(window)
            .map(|chunk| {
                let (h, _) = window_distribution(chunk, domain);
                if max_entropy > 0.0 { h / max_entropy } else { 0.0 }
            })
            .collect()
    } else {
        Vec::new()
    };

    let reference_mean = mean(&reference);
    let reference_sd = variance(&reference).sqrt();
    let low_entropy = reference.len() >= 2
        && reference_sd > 0.0
        && ratio < reference_mean - LOW_ENTROPY_SIGMAS * reference_sd;

    let threshold = CONCENTRATION_FACTOR / domain.size() as f64;
    let mut concentrated: Vec<u8> = domain
        .numbers()
        .filter(|&n| probabilities[(n - 1) as usize] > threshold)
        .collect();
    concentrated.sort_by(|&a, &b| {
        probabilities[(b - 1) as usize]
            .partial_cmp(&probabilities[(a - 1) as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    EntropyReport {
        window,
        entropy,
        max_entropy,
        ratio,
        reference_mean,
        reference_sd,
        reference_windows: reference.len(),
        low_entropy,
        probabilities,
        concentrated,
        sufficient: true,
    }
}
