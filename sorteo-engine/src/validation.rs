use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use sorteo_db::models::{Domain, Draw};

use crate::builder::{clean_candidates, fill_random};
use crate::numeric::{mean, normal_upper_tail, safe_div, sample_variance};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub trials: usize,
    /// Nombre de tirages récents parmi lesquels on tire la cible de chaque essai.
    pub window: usize,
    pub seed: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            trials: 500,
            window: 50,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub trials: usize,
    pub method_mean: f64,
    pub random_mean: f64,
    pub method_variance: f64,
    pub random_variance: f64,
    pub z: f64,
    /// Unilatérale : H1 = la méthode fait mieux que le hasard.
    pub p_value: f64,
    pub improvement_pct: f64,
    pub better_than_random: bool,
    pub ci_low: f64,
    pub ci_high: f64,
}

impl ValidationReport {
    fn neutral() -> Self {
        Self {
            trials: 0,
            method_mean: 0.0,
            random_mean: 0.0,
            method_variance: 0.0,
            random_variance: 0.0,
            z: 0.0,
            p_value: 1.0,
            improvement_pct: 0.0,
            better_than_random: false,
            ci_low: 0.0,
            ci_high: 0.0,
        }
    }
}

/// Monte Carlo : combinaison tirée dans le pool préféré contre combinaison uniforme,
/// toutes deux confrontées au même tirage récent pris au hasard.
pub fn run_validation(preferred: &[u8], draws: &[Draw], domain: Domain, config: &ValidationConfig) -> ValidationReport {
    let window = config.window.min(draws.len());
    if window == 0 || config.trials == 0 {
        return ValidationReport::neutral();
    }

    let k = domain.pick_count();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut pool = clean_candidates(preferred, domain);
    let all: Vec<u8> = domain.numbers().collect();

    let mut method_hits = Vec::with_capacity(config.trials);
    let mut random_hits = Vec::with_capacity(config.trials);

    for _ in 0..config.trials {
        pool.shuffle(&mut rng);
        let mut method: Vec<u8> = pool.iter().copied().take(k).collect();
        fill_random(&mut method, domain, k, &mut rng);

        let random: Vec<u8> = all.choose_multiple(&mut rng, k).copied().collect();

        let target = &draws[rng.random_range(0..window)];
        method_hits.push(method.iter().filter(|&&n| target.contains(n)).count() as f64);
        random_hits.push(random.iter().filter(|&&n| target.contains(n)).count() as f64);
    }

    let n = config.trials as f64;
    let method_mean = mean(&method_hits);
    let random_mean = mean(&random_hits);
    let method_variance = sample_variance(&method_hits);
    let random_variance = sample_variance(&random_hits);

    // Welch
    let se = (method_variance / n + random_variance / n).sqrt();
    let z = safe_div(method_mean - random_mean, se, 0.0);
    let p_value = normal_upper_tail(z);
    let half_width = 1.96 * (method_variance / n).sqrt();

    ValidationReport {
        trials: config.trials,
        method_mean,
        random_mean,
        method_variance,
        random_variance,
        z,
        p_value,
        improvement_pct: safe_div(method_mean - random_mean, random_mean, 0.0) * 100.0,
        better_than_random: p_value < 0.05 && method_mean > random_mean,
        ci_low: method_mean - half_width,
        ci_high: method_mean + half_width,
    }
}
