use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use crate::numeric::{mean, variance};
use crate::popularity::PopularityReport;

const MAX_SUM_SWAPS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Combination {
    /// Toujours triés par ordre croissant.
    pub numbers: Vec<u8>,
    pub popularity: Option<PopularityReport>,
    /// Reintegro joué avec la grille, s'il a été attribué.
    pub extra: Option<u8>,
}

impl Combination {
    pub fn new(mut numbers: Vec<u8>) -> Self {
        numbers.sort();
        Self {
            numbers,
            popularity: None,
            extra: None,
        }
    }

    pub fn hits(&self, draw: &Draw) -> usize {
        self.numbers.iter().filter(|&&n| draw.contains(n)).count()
    }

    pub fn sum(&self) -> u32 {
        self.numbers.iter().map(|&n| n as u32).sum()
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.numbers.iter().map(|n| format!("{:2}", n)).collect::<Vec<_>>().join(" - ");
        write!(f, "{s}")
    }
}

/// Compteurs pair/impair et bas/haut d'une combinaison en construction.
#[derive(Debug, Clone, Copy, Default)]
struct Balance {
    odd: usize,
    even: usize,
    low: usize,
    high: usize,
}

impl Balance {
    fn of(numbers: &[u8], domain: Domain) -> Self {
        let mut b = Balance::default();
        for &n in numbers {
            b.add(n, domain);
        }
        b
    }

    fn add(&mut self, n: u8, domain: Domain) {
        if n % 2 == 1 { self.odd += 1 } else { self.even += 1 }
        if domain.is_low(n) { self.low += 1 } else { self.high += 1 }
    }

    fn accepts(&self, n: u8, domain: Domain, limit: usize) -> bool {
        let parity = if n % 2 == 1 { self.odd } else { self.even };
        let half = if domain.is_low(n) { self.low } else { self.high };
        parity < limit && half < limit
    }
}

/// ceil(k/2) + 1
pub fn balance_limit(k: usize) -> usize {
    k.div_ceil(2) + 1
}

/// Intervalle [moyenne - σ, moyenne + σ] de la somme des k premiers numéros des tirages.
pub fn historical_sum_range(draws: &[Draw], k: usize) -> Option<(f64, f64)> {
    if draws.is_empty() {
        return None;
    }
    let sums: Vec<f64> = draws
        .iter()
        .map(|d| d.numbers.iter().take(k).map(|&n| n as f64).sum())
        .collect();
    let m = mean(&sums);
    let sd = variance(&sums).sqrt();
    Some((m - sd, m + sd))
}

/// Candidats valides, sans doublon, dans l'ordre du classement.
pub(crate) fn clean_candidates(ranked: &[u8], domain: Domain) -> Vec<u8> {
    let mut seen = vec![false; domain.size() + 1];
    ranked
        .iter()
        .copied()
        .filter(|&n| {
            if !domain.contains(n) || seen[n as usize] {
                return false;
            }
            seen[n as usize] = true;
            true
        })
        .collect()
}

/// Complète `numbers` jusqu'à `k` avec des numéros non utilisés tirés uniformément.
pub(crate) fn fill_random(numbers: &mut Vec<u8>, domain: Domain, k: usize, rng: &mut StdRng) {
    if numbers.len() >= k {
        return;
    }
    let mut unused: Vec<u8> = domain.numbers().filter(|n| !numbers.contains(n)).collect();
    unused.shuffle(rng);
    let missing = k - numbers.len();
    numbers.extend(unused.into_iter().take(missing));
}

/// Construit une combinaison équilibrée à partir d'un classement.
///
/// Glouton : on saute tout numéro qui ferait dépasser `ceil(k/2)+1` impairs, pairs,
/// bas ou hauts. Si la somme sort de l'intervalle historique, on échange le minimum
/// (somme trop basse) ou le maximum (trop haute) contre le prochain candidat compatible,
/// au plus 30 fois.
pub fn build_combination(ranked: &[u8], draws: &[Draw], domain: Domain, rng: &mut StdRng) -> Combination {
    let k = domain.pick_count();
    let limit = balance_limit(k);
    let candidates = clean_candidates(ranked, domain);

    let mut chosen: Vec<u8> = Vec::with_capacity(k);
    let mut balance = Balance::default();
    for &n in &candidates {
        if chosen.len() == k {
            break;
        }
        if balance.accepts(n, domain, limit) {
            chosen.push(n);
            balance.add(n, domain);
        }
    }

    if chosen.len() == k {
        if let Some((low, high)) = historical_sum_range(draws, k) {
            adjust_sum(&mut chosen, &candidates, domain, limit, low, high);
        }
    }

    fill_random(&mut chosen, domain, k, rng);
    Combination::new(chosen)
}

fn adjust_sum(chosen: &mut Vec<u8>, candidates: &[u8], domain: Domain, limit: usize, low: f64, high: f64) {
    let mut tried = vec![false; domain.size() + 1];
    for &n in chosen.iter() {
        tried[n as usize] = true;
    }

    for _ in 0..MAX_SUM_SWAPS {
        let sum: f64 = chosen.iter().map(|&n| n as f64).sum();
        let too_high = sum > high;
        if !too_high && sum >= low {
            return;
        }

        let extreme_pos = if too_high {
            chosen.iter().enumerate().max_by_key(|(_, &n)| n).map(|(i, _)| i)
        } else {
            chosen.iter().enumerate().min_by_key(|(_, &n)| n).map(|(i, _)| i)
        };
        let Some(pos) = extreme_pos else { return };
        let removed = chosen.remove(pos);
        let balance = Balance::of(chosen, domain);

        let replacement = candidates.iter().copied().find(|&c| {
            !tried[c as usize]
                && (if too_high { c < removed } else { c > removed })
                && balance.accepts(c, domain, limit)
        });

        match replacement {
            Some(c) => {
                tried[c as usize] = true;
                chosen.insert(pos, c);
            }
            None => {
                chosen.insert(pos, removed);
                return;
            }
        }
    }
}
