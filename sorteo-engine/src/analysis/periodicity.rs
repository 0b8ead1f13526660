use std::f64::consts::PI;

use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use super::occurrence_series;

/// Longueur d'historique minimale pour la recherche de périodes.
pub const MIN_DRAWS: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct PeriodicSignal {
    pub number: u8,
    /// Période dominante en tirages (0 = aucune).
    pub period: usize,
    pub amplitude: f64,
    pub phase: f64,
    /// Tirages restants avant le prochain pic (0 = prochain tirage).
    pub draws_until_peak: usize,
    pub confidence: f64,
}

impl PeriodicSignal {
    fn neutral(number: u8) -> Self {
        Self {
            number,
            period: 0,
            amplitude: 0.0,
            phase: 0.0,
            draws_until_peak: 0,
            confidence: 0.0,
        }
    }

    /// 1 quand le pic tombe au prochain tirage, 0 au creux du cycle.
    pub fn peak_proximity(&self) -> f64 {
        if self.period == 0 {
            return 0.0;
        }
        let angle = 2.0 * PI * self.draws_until_peak as f64 / self.period as f64;
        (1.0 + angle.cos()) / 2.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodicityReport {
    pub signals: Vec<PeriodicSignal>,
    pub sufficient: bool,
}

impl PeriodicityReport {
    pub fn confident_fraction(&self, threshold: f64) -> f64 {
        if !self.sufficient || self.signals.is_empty() {
            return 0.0;
        }
        let n = self.signals.iter().filter(|s| s.confidence > threshold).count();
        n as f64 / self.signals.len() as f64
    }
}

/// Corrélations cosinus/sinus du signal centré pour une période donnée.
fn correlate(signal: &[f64], period: usize) -> (f64, f64) {
    let omega = 2.0 * PI / period as f64;
    signal
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(c, s), (t, &x)| {
            let angle = omega * t as f64;
            (c + x * angle.cos(), s + x * angle.sin())
        })
}

/// Période dominante d'une série binaire chronologique (la plus ancienne en premier).
fn dominant_period(series: &[f64], max_period: usize) -> Option<(usize, f64, f64)> {
    let len = series.len();
    let upper = max_period.min(len / 3);
    if upper < 3 {
        return None;
    }

    let mean = series.iter().sum::<f64>() / len as f64;
    let centered: Vec<f64> = series.iter().map(|&x| x - mean).collect();

    let mut best: Option<(usize, f64, f64)> = None;
    for period in 3..=upper {
        let (c, s) = correlate(&centered, period);
        let amplitude = 2.0 * (c * c + s * s).sqrt() / len as f64;
        if best.map_or(true, |(_, a, _)| amplitude > a) {
            // Forme A·sin(ωt + ψ) : c ∝ sin ψ, s ∝ cos ψ
            best = Some((period, amplitude, c.atan2(s)));
        }
    }
    best.filter(|&(_, amplitude, _)| amplitude > 0.0)
}

/// Analyse de Fourier discrète par numéro sur les périodes 3..min(max_period, len/3).
pub fn detect_periodicity(draws: &[Draw], domain: Domain, max_period: usize) -> PeriodicityReport {
    if draws.len() < MIN_DRAWS {
        return PeriodicityReport {
            signals: domain.numbers().map(PeriodicSignal::neutral).collect(),
            sufficient: false,
        };
    }

    let len = draws.len();
    let noise = 1.0 / (len as f64).sqrt();

    let signals = domain
        .numbers()
        .map(|number| {
            let series = occurrence_series(draws, number);
            let Some((period, amplitude, phase)) = dominant_period(&series, max_period) else {
                return PeriodicSignal::neutral(number);
            };

            let omega = 2.0 * PI / period as f64;
            // Phase au prochain tirage (t = len), distance au pic du sinus (π/2)
            let current = (omega * len as f64 + phase).rem_euclid(2.0 * PI);
            let distance = (PI / 2.0 - current).rem_euclid(2.0 * PI);
            let draws_until_peak = ((distance / omega).round() as usize) % period;

            PeriodicSignal {
                number,
                period,
                amplitude,
                phase,
                draws_until_peak,
                confidence: (amplitude / (3.0 * noise)).clamp(0.0, 1.0),
            }
        })
        .collect();

    PeriodicityReport { signals, sufficient: true }
}
