use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rayon::prelude::*;

use sorteo_db::models::Domain;

use crate::builder::{clean_candidates, fill_random, Combination};

/// Au-delà, l'énumération des k-sous-ensembles devient trop coûteuse.
pub const MAX_WHEEL_POOL: usize = 24;

/// `m` combinaisons qui se répartissent le classement : à chaque combinaison on
/// prend les candidats les moins utilisés jusque-là (à égalité, le mieux classé).
/// Si le classement compte moins de k numéros, on complète au hasard.
pub fn coverage_design(ranked: &[u8], m: usize, domain: Domain, rng: &mut StdRng) -> Vec<Combination> {
    let k = domain.pick_count();
    let candidates = clean_candidates(ranked, domain);
    let mut usage = vec![0u32; domain.size() + 1];

    (0..m)
        .map(|_| {
            let mut order = candidates.clone();
            // tri stable : l'ordre du classement départage
            order.sort_by_key(|&n| usage[n as usize]);
            let mut numbers: Vec<u8> = order.into_iter().take(k).collect();
            for &n in &numbers {
                usage[n as usize] += 1;
            }
            fill_random(&mut numbers, domain, k, rng);
            Combination::new(numbers)
        })
        .collect()
}

/// Variante diversifiée : un noyau de `min_overlap` numéros commun à toutes les
/// combinaisons, le reste tourne dans le classement avec un décalage i·(k - overlap).
pub fn diverse_design(
    ranked: &[u8],
    m: usize,
    min_overlap: usize,
    domain: Domain,
    rng: &mut StdRng,
) -> Vec<Combination> {
    let k = domain.pick_count();
    let candidates = clean_candidates(ranked, domain);
    let overlap = min_overlap.min(k).min(candidates.len());
    let (core, rest) = candidates.split_at(overlap);
    let free = k - overlap;

    (0..m)
        .map(|i| {
            let mut numbers = core.to_vec();
            if !rest.is_empty() {
                let offset = i * free;
                for j in 0..free.min(rest.len()) {
                    numbers.push(rest[(offset + j) % rest.len()]);
                }
            }
            fill_random(&mut numbers, domain, k, rng);
            Combination::new(numbers)
        })
        .collect()
}

/// Pool équilibré de `size` numéros : on alterne entre la moitié basse (≤ N/2)
/// et la moitié haute du classement, en commençant par la basse.
pub fn candidate_pool(ranked: &[u8], size: usize, domain: Domain) -> Vec<u8> {
    let candidates = clean_candidates(ranked, domain);
    let (low, high): (Vec<u8>, Vec<u8>) = candidates.into_iter().partition(|&n| domain.is_low(n));

    let mut pool = Vec::with_capacity(size);
    let (mut il, mut ih) = (0, 0);
    while pool.len() < size {
        if il < low.len() && (ih >= high.len() || il <= ih) {
            pool.push(low[il]);
            il += 1;
        } else if ih < high.len() {
            pool.push(high[ih]);
            ih += 1;
        } else {
            break;
        }
    }
    pool
}

/// Tous les sous-ensembles de taille `r` des indices 0..n, en masques de bits (ordre lexicographique).
fn subsets(n: usize, r: usize) -> Vec<u32> {
    let mut out = Vec::new();
    if r > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..r).collect();
    loop {
        out.push(idx.iter().fold(0u32, |mask, &i| mask | (1 << i)));
        // incrément de la combinaison
        let mut pos = r;
        loop {
            if pos == 0 {
                return out;
            }
            pos -= 1;
            if idx[pos] < n - r + pos {
                break;
            }
            if pos == 0 {
                return out;
            }
        }
        idx[pos] += 1;
        for j in pos + 1..r {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// Réduction gloutonne (t-couverture) sur un pool de candidats.
///
/// Un ticket couvre un t-sous-ensemble du pool s'il en contient au moins `m` numéros.
/// On choisit à chaque tour le ticket qui couvre le plus de t-sous-ensembles encore
/// découverts, jusqu'à `max_tickets` ou couverture complète.
pub fn wheel_design(pool: &[u8], t: usize, m: usize, max_tickets: usize, k: usize) -> Result<Vec<Combination>> {
    let mut pool = pool.to_vec();
    pool.sort();
    pool.dedup();

    if pool.len() > MAX_WHEEL_POOL {
        bail!("Pool trop grand pour la réduction : {} numéros (max {})", pool.len(), MAX_WHEEL_POOL);
    }
    if t == 0 || m == 0 || m > t || m > k {
        bail!("Paramètres de couverture invalides : t={t}, m={m}, k={k}");
    }
    if pool.len() < k || pool.len() < t {
        return Ok(Vec::new());
    }

    let tickets = subsets(pool.len(), k);
    let mut uncovered = subsets(pool.len(), t);
    let mut chosen: Vec<u32> = Vec::new();
    let covers = |ticket: u32, ts: u32| (ticket & ts).count_ones() as usize >= m;

    while !uncovered.is_empty() && chosen.len() < max_tickets {
        let gains: Vec<usize> = tickets
            .par_iter()
            .map(|&ticket| {
                if chosen.contains(&ticket) {
                    0
                } else {
                    uncovered.iter().filter(|&&ts| covers(ticket, ts)).count()
                }
            })
            .collect();

        // premier maximum : ticket lexicographiquement le plus petit
        let mut best = 0;
        for (i, &g) in gains.iter().enumerate() {
            if g > gains[best] {
                best = i;
            }
        }
        if gains[best] == 0 {
            break;
        }

        let ticket = tickets[best];
        uncovered.retain(|&ts| !covers(ticket, ts));
        chosen.push(ticket);
    }

    log::debug!("Réduction : {} tickets, {} t-sous-ensembles non couverts", chosen.len(), uncovered.len());

    Ok(chosen
        .into_iter()
        .map(|mask| {
            let numbers = (0..pool.len()).filter(|&i| mask & (1 << i) != 0).map(|i| pool[i]).collect();
            Combination::new(numbers)
        })
        .collect())
}
