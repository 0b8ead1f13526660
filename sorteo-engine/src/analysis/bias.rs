use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use super::count_occurrences;
use crate::numeric::{chi_square_p_value, mean, variance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Significance {
    None,
    Significant,
    VerySignificant,
}

impl Significance {
    pub fn from_p_value(p: f64) -> Self {
        if p < 0.01 {
            Significance::VerySignificant
        } else if p < 0.05 {
            Significance::Significant
        } else {
            Significance::None
        }
    }

    pub fn is_significant(&self) -> bool {
        !matches!(self, Significance::None)
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Significance::None => write!(f, "-"),
            Significance::Significant => write!(f, "*"),
            Significance::VerySignificant => write!(f, "**"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NumberBias {
    pub number: u8,
    pub observed: u32,
    pub expected: f64,
    pub chi_square: f64,
    pub p_value: f64,
    /// (observé - attendu) / attendu
    pub bias: f64,
    pub significance: Significance,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiasReport {
    pub numbers: Vec<NumberBias>,
    pub global_chi_square: f64,
    pub global_p_value: f64,
    pub draws: usize,
}

impl BiasReport {
    pub fn significant_fraction(&self) -> f64 {
        if self.numbers.is_empty() {
            return 0.0;
        }
        let n = self.numbers.iter().filter(|b| b.significance.is_significant()).count();
        n as f64 / self.numbers.len() as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistentBias {
    pub number: u8,
    pub mean_bias: f64,
    pub variance: f64,
    /// mean·1/(1+var), nul si le biais moyen n'est pas positif.
    pub consistency: f64,
}

/// Test du chi-deux numéro par numéro contre la fréquence uniforme E = |H|·k/N.
pub fn detect_bias(draws: &[Draw], domain: Domain) -> BiasReport {
    let counts = count_occurrences(draws, domain);
    let expected = draws.len() as f64 * domain.pick_count() as f64 / domain.size() as f64;

    let numbers: Vec<NumberBias> = domain
        .numbers()
        .map(|number| {
            let observed = counts[(number - 1) as usize];
            let (chi_square, bias) = if expected > 0.0 {
                let diff = observed as f64 - expected;
                (diff * diff / expected, diff / expected)
            } else {
                (0.0, 0.0)
            };
            let p_value = chi_square_p_value(chi_square, 1.0);
            NumberBias {
                number,
                observed,
                expected,
                chi_square,
                p_value,
                bias,
                significance: Significance::from_p_value(p_value),
            }
        })
        .collect();

    let global_chi_square: f64 = numbers.iter().map(|b| b.chi_square).sum();
    let df = (domain.size() - 1).max(1) as f64;

    BiasReport {
        numbers,
        global_chi_square,
        global_p_value: chi_square_p_value(global_chi_square, df),
        draws: draws.len(),
    }
}

/// Fenêtres glissantes de taille `window`, pas de `window/2`, pour repérer
/// les numéros dont le biais reste positif d'une fenêtre à l'autre.
/// Historique plus court qu'une fenêtre : consistance nulle partout.
pub fn consistent_bias(draws: &[Draw], domain: Domain, window: usize) -> Vec<ConsistentBias> {
    let mut per_number: Vec<Vec<f64>> = vec![Vec::new(); domain.size()];

    if window >= 2 && draws.len() >= window {
        let stride = (window / 2).max(1);
        let mut start = 0;
        while start + window <= draws.len() {
            let report = detect_bias(&draws[start..start + window], domain);
            for b in &report.numbers {
                per_number[(b.number - 1) as usize].push(b.bias);
            }
            start += stride;
        }
    }

    domain
        .numbers()
        .map(|number| {
            let biases = &per_number[(number - 1) as usize];
            let mean_bias = mean(biases);
            let var = variance(biases);
            let consistency = if mean_bias > 0.0 { mean_bias / (1.0 + var) } else { 0.0 };
            ConsistentBias {
                number,
                mean_bias,
                variance: var,
                consistency,
            }
        })
        .collect()
}
