//! Apprentissage walk-forward des poids de méthodes.
//!
//! Une itération choisit un point de coupure `i` dans l'historique, ne regarde que
//! `history[i+1..]` (le passé connu à ce moment-là) et compare les choix de chaque
//! méthode au tirage réel `history[i]`. Les réussites sont créditées à la mémoire
//! de poids, par lots de taille fixe.

pub mod backtest;
pub mod credit;
pub mod runner;
pub mod voters;

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use sorteo_db::models::{Draw, Game};

use crate::analysis::{analyze, AnalysisConfig, Method};
use crate::convergence::{sub_scores, top_by_method};
use crate::memory::{WeightMemory, DEFAULT_LEARNING_RATE};
use credit::{CreditBatcher, CreditUpdate};
use voters::{all_voters, Voter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    /// Votants légers, crédit par lots.
    Voters,
    /// Les cinq analyseurs, crédit immédiat.
    Analyzers,
}

impl LearningMode {
    pub const ALL: [LearningMode; 2] = [LearningMode::Voters, LearningMode::Analyzers];

    pub fn name(&self) -> &'static str {
        match self {
            LearningMode::Voters => "voters",
            LearningMode::Analyzers => "analyzers",
        }
    }

    pub fn from_name(name: &str) -> Option<LearningMode> {
        match name {
            "voters" => Some(LearningMode::Voters),
            "analyzers" => Some(LearningMode::Analyzers),
            _ => None,
        }
    }

    /// Une boucle s'efface devant une boucle de priorité supérieure sur le même jeu.
    pub fn priority(&self) -> u8 {
        match self {
            LearningMode::Voters => 0,
            LearningMode::Analyzers => 1,
        }
    }
}

impl std::fmt::Display for LearningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CutStrategy {
    Random,
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub cut: CutStrategy,
    /// Tirages plus récents que la coupure qu'on garde toujours en réserve.
    pub reserve: usize,
    pub voter_min_history: usize,
    pub analyzer_min_history: usize,
    /// Passé maximal donné aux analyseurs.
    pub max_past: usize,
    pub voter_batch: usize,
    pub analyzer_batch: usize,
    /// Nombre de numéros retenus par analyseur pour le crédit.
    pub top_n: usize,
    pub pace_ms: u64,
    pub backoff_ms: u64,
    pub max_iterations: Option<u64>,
    pub seed: u64,
    pub learning_rate: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            cut: CutStrategy::Random,
            reserve: 10,
            voter_min_history: 50,
            analyzer_min_history: 100,
            max_past: 500,
            voter_batch: 10,
            analyzer_batch: 1,
            top_n: 10,
            pace_ms: 0,
            backoff_ms: 500,
            max_iterations: None,
            seed: 42,
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }
}

impl LearningConfig {
    pub fn min_history(&self, mode: LearningMode) -> usize {
        match mode {
            LearningMode::Voters => self.voter_min_history,
            LearningMode::Analyzers => self.analyzer_min_history,
        }
    }

    pub fn batch_size(&self, mode: LearningMode) -> usize {
        match mode {
            LearningMode::Voters => self.voter_batch,
            LearningMode::Analyzers => self.analyzer_batch,
        }
    }
}

/// Coupures valides : au moins `reserve` tirages plus récents et `min_history` plus anciens.
pub fn cut_range(len: usize, min_history: usize, reserve: usize) -> Option<RangeInclusive<usize>> {
    let last = len.checked_sub(min_history + 1)?;
    (last >= reserve).then_some(reserve..=last)
}

/// État explicite d'une boucle d'apprentissage, passé d'une itération à l'autre.
pub struct LearnerState {
    pub mode: LearningMode,
    pub analysis: AnalysisConfig,
    pub iterations: u64,
    rng: StdRng,
    cursor: usize,
    batcher: CreditBatcher,
    voters: Vec<Box<dyn Voter>>,
}

impl LearnerState {
    pub fn new(mode: LearningMode, config: &LearningConfig, analysis: AnalysisConfig) -> Self {
        Self {
            mode,
            analysis,
            iterations: 0,
            rng: StdRng::seed_from_u64(config.seed),
            cursor: 0,
            batcher: CreditBatcher::new(config.batch_size(mode)),
            voters: all_voters(),
        }
    }

    pub fn pending(&self) -> usize {
        self.batcher.len()
    }

    /// Lots moyennés refusés par la mémoire, en attente de réémission.
    pub fn unsent(&self) -> usize {
        self.batcher.unsent_len()
    }

    /// Arrêt de boucle : lots refusés puis lot partiel.
    pub fn drain(&mut self) -> Vec<CreditUpdate> {
        self.batcher.drain_all()
    }

    fn next_cut(&mut self, strategy: CutStrategy, range: RangeInclusive<usize>) -> usize {
        match strategy {
            CutStrategy::Random => self.rng.random_range(range),
            CutStrategy::Sequential => {
                let span = range.end() - range.start() + 1;
                let cut = range.start() + self.cursor % span;
                self.cursor += 1;
                cut
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub cut: usize,
    /// Numéros trouvés par méthode sur le tirage de vérité.
    pub contributions: BTreeMap<String, f64>,
    pub reward: f64,
    /// Mise à jour effectivement poussée à la mémoire (lot plein).
    pub flushed: Option<CreditUpdate>,
    /// Lots en souffrance réécrits avec succès avant cette itération.
    pub resent: usize,
}

fn hits(picks: &[u8], truth: &Draw) -> f64 {
    picks.iter().filter(|&&n| truth.contains(n)).count() as f64
}

/// Une itération. `Ok(None)` si l'historique est trop court pour ce mode.
pub fn run_learning_step(
    history: &[Draw],
    game: Game,
    config: &LearningConfig,
    state: &mut LearnerState,
    memory: &dyn WeightMemory,
) -> Result<Option<StepOutcome>> {
    let mode = state.mode;
    let Some(range) = cut_range(history.len(), config.min_history(mode), config.reserve) else {
        return Ok(None);
    };
    let resent = resend_unsent(game, state, memory)?;

    let domain = game.domain();
    let cut = state.next_cut(config.cut, range);
    let truth = &history[cut];

    let (contributions, reward): (BTreeMap<String, f64>, f64) = match mode {
        LearningMode::Voters => {
            let past = &history[cut + 1..];
            let contributions: BTreeMap<String, f64> = state
                .voters
                .iter()
                .map(|v| (v.name().to_string(), hits(&v.pick(past, domain), truth)))
                .collect();
            let reward = contributions.values().sum::<f64>() / contributions.len().max(1) as f64;
            (contributions, reward)
        }
        LearningMode::Analyzers => {
            let end = (cut + 1 + config.max_past).min(history.len());
            let past = &history[cut + 1..end];
            let bundle = analyze(past, domain, &state.analysis);
            let subs = sub_scores(&bundle, domain);
            let contributions: BTreeMap<String, f64> = Method::ALL
                .iter()
                .map(|&m| (m.name().to_string(), hits(&top_by_method(&subs, m, config.top_n), truth)))
                .collect();
            let reward = contributions.values().sum();
            (contributions, reward)
        }
    };

    state.iterations += 1;
    let flushed = state.batcher.push(CreditUpdate {
        contributions: contributions.clone(),
        reward,
    });
    if let Some(update) = &flushed {
        if let Err(e) = memory.update(game, mode, update) {
            state.batcher.requeue(update.clone());
            return Err(e.context(format!("lot {}/{} conservé pour réémission", game, mode)));
        }
        log::debug!("{}/{} : lot poussé (récompense moyenne {:.2})", game, mode, update.reward);
    }

    Ok(Some(StepOutcome {
        cut,
        contributions,
        reward,
        flushed,
        resent,
    }))
}

/// Réécrit les lots refusés, dans l'ordre ; s'arrête au premier échec.
fn resend_unsent(game: Game, state: &mut LearnerState, memory: &dyn WeightMemory) -> Result<usize> {
    let mut resent = 0;
    while let Some(update) = state.batcher.next_unsent() {
        if let Err(e) = memory.update(game, state.mode, &update) {
            state.batcher.restore_unsent(update);
            return Err(e.context(format!("réémission du lot {}/{}", game, state.mode)));
        }
        resent += 1;
    }
    if resent > 0 {
        log::info!("{}/{} : {} lot(s) en souffrance réécrit(s)", game, state.mode, resent);
    }
    Ok(resent)
}
