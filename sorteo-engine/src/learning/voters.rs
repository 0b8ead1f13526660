//! Votants légers : heuristiques bon marché évaluées à chaque itération
//! de l'apprentissage et par le backtest.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use sorteo_db::models::{Domain, Draw};

use crate::analysis::count_occurrences;
use crate::coverage::candidate_pool;

pub trait Voter: Send + Sync {
    fn name(&self) -> &str;
    /// draws[0] = tirage le plus récent. Classement complet de 1..N, du plus au moins favori.
    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8>;

    /// Les k premiers du classement.
    fn pick(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let mut ranked = self.rank(draws, domain);
        ranked.truncate(domain.pick_count());
        ranked
    }
}

/// Classement par score décroissant ; à égalité, ordre numérique.
fn rank_by_score(scores: &[f64]) -> Vec<u8> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));
    order.into_iter().map(|i| (i + 1) as u8).collect()
}

/// Tirages écoulés depuis la dernière sortie de chaque numéro (len si jamais sorti).
pub fn current_gaps(draws: &[Draw], domain: Domain) -> Vec<usize> {
    let mut gaps = vec![draws.len(); domain.size()];
    for (t, draw) in draws.iter().enumerate() {
        for &n in &draw.numbers {
            if domain.contains(n) && gaps[(n - 1) as usize] == draws.len() {
                gaps[(n - 1) as usize] = t;
            }
        }
    }
    gaps
}

pub struct FrequencyVoter {
    name: String,
    window: Option<usize>,
}

impl FrequencyVoter {
    pub fn new(name: &str, window: Option<usize>) -> Self {
        Self { name: name.to_string(), window }
    }
}

impl Voter for FrequencyVoter {
    fn name(&self) -> &str {
        &self.name
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let window = self.window.unwrap_or(draws.len()).min(draws.len());
        let counts = count_occurrences(&draws[..window], domain);
        let scores: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        rank_by_score(&scores)
    }
}

/// Les moins sortis d'abord.
pub struct ColdVoter;

impl Voter for ColdVoter {
    fn name(&self) -> &str {
        "cold"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let scores: Vec<f64> = count_occurrences(draws, domain).iter().map(|&c| -(c as f64)).collect();
        rank_by_score(&scores)
    }
}

/// Tirage uniforme, reproductible : la graine est combinée à la longueur de
/// l'historique, chaque pas du walk-forward tire donc une grille différente.
pub struct RandomVoter {
    seed: u64,
}

impl RandomVoter {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Voter for RandomVoter {
    fn name(&self) -> &str {
        "random"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ (draws.len() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut ranked: Vec<u8> = domain.numbers().collect();
        ranked.shuffle(&mut rng);
        ranked
    }
}

/// Somme des rangs de fréquence sur plusieurs fenêtres ; la plus petite somme gagne.
pub struct ConsensusVoter {
    windows: Vec<usize>,
}

impl ConsensusVoter {
    pub fn new(windows: Vec<usize>) -> Self {
        Self { windows }
    }
}

impl Voter for ConsensusVoter {
    fn name(&self) -> &str {
        "consensus"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let mut rank_sum = vec![0.0f64; domain.size()];
        for &w in &self.windows {
            let ranked = FrequencyVoter::new("", Some(w)).rank(draws, domain);
            for (pos, &n) in ranked.iter().enumerate() {
                rank_sum[(n - 1) as usize] += pos as f64;
            }
        }
        let scores: Vec<f64> = rank_sum.iter().map(|r| -r).collect();
        rank_by_score(&scores)
    }
}

/// Mélange normalisé : excès de fréquence long terme, excès récent, retard relatif.
///
/// Sous `MIX_MIN_HISTORY` tirages, classement par fréquence simple.
pub struct MixVoter {
    pub long_weight: f64,
    pub recent_weight: f64,
    pub overdue_weight: f64,
    pub recent_window: usize,
}

impl Default for MixVoter {
    fn default() -> Self {
        Self {
            long_weight: 0.15,
            recent_weight: 0.70,
            overdue_weight: 0.15,
            recent_window: 12,
        }
    }
}

pub const MIX_MIN_HISTORY: usize = 10;

/// Historique minimal pour tirer le pool d'une roue du classement Mix.
pub const POOL_MIN_HISTORY: usize = 30;

/// Ramène des scores dans [0,1] (écart min-max plancher à 0,001).
fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = (max - min).max(0.001);
    values.iter().map(|v| (v - min) / range).collect()
}

impl MixVoter {
    pub fn scores(&self, draws: &[Draw], domain: Domain) -> Option<Vec<f64>> {
        let n = draws.len();
        if n < MIX_MIN_HISTORY {
            return None;
        }
        let k = domain.pick_count() as f64;
        let size = domain.size() as f64;

        let counts = count_occurrences(draws, domain);
        let expected = n as f64 * k / size;
        let long: Vec<f64> = counts.iter().map(|&c| (c as f64 - expected) / expected.max(1.0)).collect();

        let window = self.recent_window.min(n / 3).max(5);
        let recent_counts = count_occurrences(&draws[..window], domain);
        let recent_expected = window as f64 * k / size;
        let recent: Vec<f64> = recent_counts
            .iter()
            .map(|&c| (c as f64 - recent_expected) / recent_expected.max(1.0))
            .collect();

        let gaps = current_gaps(draws, domain);
        let overdue: Vec<f64> = gaps
            .iter()
            .zip(&counts)
            .map(|(&gap, &c)| {
                let mean_gap = n as f64 / (c.max(1)) as f64;
                (gap as f64 - mean_gap) / mean_gap.max(1.0)
            })
            .collect();

        let (long, recent, overdue) = (min_max(&long), min_max(&recent), min_max(&overdue));
        Some(
            (0..domain.size())
                .map(|i| self.long_weight * long[i] + self.recent_weight * recent[i] + self.overdue_weight * overdue[i])
                .collect(),
        )
    }
}

impl Voter for MixVoter {
    fn name(&self) -> &str {
        "mix_15_70_15"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        match self.scores(draws, domain) {
            Some(scores) => rank_by_score(&scores),
            None => FrequencyVoter::new("", None).rank(draws, domain),
        }
    }
}

/// Pool de `size` numéros pour une roue : 1..=size tant que l'historique est
/// trop court, sinon le classement Mix équilibré bas/haut.
pub fn wheel_pool(draws: &[Draw], domain: Domain, size: usize) -> Vec<u8> {
    if draws.len() < POOL_MIN_HISTORY {
        return domain.numbers().take(size).collect();
    }
    candidate_pool(&MixVoter::default().rank(draws, domain), size, domain)
}

/// Classement Mix réordonné en alternant moitié basse / moitié haute.
pub struct HighLowVoter {
    mix: MixVoter,
}

impl Default for HighLowVoter {
    fn default() -> Self {
        Self { mix: MixVoter::default() }
    }
}

impl Voter for HighLowVoter {
    fn name(&self) -> &str {
        "high_low"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        candidate_pool(&self.mix.rank(draws, domain), domain.size(), domain)
    }
}

pub struct OverdueVoter;

impl Voter for OverdueVoter {
    fn name(&self) -> &str {
        "overdue"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let scores: Vec<f64> = current_gaps(draws, domain).iter().map(|&g| g as f64).collect();
        rank_by_score(&scores)
    }
}

/// Numéros présents dans les paires les plus souvent tirées ensemble.
pub struct PairsVoter {
    top_pairs: usize,
}

impl PairsVoter {
    pub fn new(top_pairs: usize) -> Self {
        Self { top_pairs }
    }
}

impl Voter for PairsVoter {
    fn name(&self) -> &str {
        "pairs"
    }

    fn rank(&self, draws: &[Draw], domain: Domain) -> Vec<u8> {
        let size = domain.size();
        let mut pairs = vec![0u32; size * size];
        for draw in draws {
            for (i, &a) in draw.numbers.iter().enumerate() {
                for &b in &draw.numbers[i + 1..] {
                    if domain.contains(a) && domain.contains(b) && a != b {
                        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                        pairs[(lo - 1) as usize * size + (hi - 1) as usize] += 1;
                    }
                }
            }
        }

        let mut ranked: Vec<(usize, u32)> = pairs.iter().copied().enumerate().filter(|(_, c)| *c > 0).collect();
        // tri stable : à égalité, la paire (lo, hi) la plus petite d'abord
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut scores = vec![0.0f64; size];
        for &(idx, count) in ranked.iter().take(self.top_pairs) {
            scores[idx / size] += count as f64;
            scores[idx % size] += count as f64;
        }
        rank_by_score(&scores)
    }
}

pub fn all_voters() -> Vec<Box<dyn Voter>> {
    vec![
        Box::new(FrequencyVoter::new("frequency", None)),
        Box::new(FrequencyVoter::new("frequency_50", Some(50))),
        Box::new(FrequencyVoter::new("hot_12", Some(12))),
        Box::new(ColdVoter),
        Box::new(ConsensusVoter::new(vec![12, 50, 200])),
        Box::new(MixVoter::default()),
        Box::new(HighLowVoter::default()),
        Box::new(OverdueVoter),
        Box::new(PairsVoter::new(50)),
    ]
}
