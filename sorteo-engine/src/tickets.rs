//! Reintegro joué avec chaque grille d'une roue, et simulation walk-forward
//! des gains par catégorie du barème Primitiva.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use sorteo_db::models::{Draw, Game};

use crate::analysis::extra_counts;
use crate::builder::Combination;
use crate::coverage::wheel_design;
use crate::learning::voters::wheel_pool;

/// Reintegros par défaut quand l'historique n'en contient aucun.
const FALLBACK_REINTEGROS: [u8; 3] = [7, 3, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExtraStrategy {
    /// Les trois reintegros les plus fréquents, par blocs égaux.
    Blocks,
    /// 0, 1, ..., 9, 0, ...
    Cycle,
    /// Les dix valeurs, plus fréquente et moins fréquente intercalées, par blocs.
    Interleaved,
}

impl ExtraStrategy {
    pub const ALL: [ExtraStrategy; 3] = [ExtraStrategy::Blocks, ExtraStrategy::Cycle, ExtraStrategy::Interleaved];

    pub fn name(&self) -> &'static str {
        match self {
            ExtraStrategy::Blocks => "blocks",
            ExtraStrategy::Cycle => "cycle",
            ExtraStrategy::Interleaved => "interleaved",
        }
    }
}

impl std::fmt::Display for ExtraStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Attribue un reintegro à chaque grille, d'après les reintegros de `draws`.
pub fn assign_extras(combinations: &mut [Combination], draws: &[Draw], game: Game, strategy: ExtraStrategy) -> Result<()> {
    let Some(position) = game.reintegro_position() else {
        bail!("{} n'a pas de reintegro", game);
    };
    if combinations.is_empty() {
        return Ok(());
    }
    let range = game.extra_slot_range(position);
    let counts = extra_counts(draws, &[position], range);

    let order: Vec<u8> = match strategy {
        ExtraStrategy::Blocks => {
            let top: Vec<u8> = counts.iter().filter(|c| c.1 > 0).take(3).map(|c| c.0).collect();
            if top.is_empty() {
                FALLBACK_REINTEGROS.to_vec()
            } else {
                top
            }
        }
        ExtraStrategy::Cycle => (range.0..=range.1).collect(),
        ExtraStrategy::Interleaved => {
            let values: Vec<u8> = counts.iter().map(|c| c.0).collect();
            let (frequent, rare) = values.split_at(values.len() / 2);
            frequent.iter().zip(rare).flat_map(|(&a, &b)| [a, b]).collect()
        }
    };

    let total = combinations.len();
    for (idx, combination) in combinations.iter_mut().enumerate() {
        let value = match strategy {
            ExtraStrategy::Cycle => order[idx % order.len()],
            ExtraStrategy::Blocks | ExtraStrategy::Interleaved => order[idx * order.len() / total],
        };
        combination.extra = Some(value);
    }
    Ok(())
}

/// Catégories du barème Primitiva, de la meilleure à la plus basse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PrizeCategory {
    Jackpot,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Refund,
}

impl PrizeCategory {
    pub const ALL: [PrizeCategory; 7] = [
        PrizeCategory::Jackpot,
        PrizeCategory::Second,
        PrizeCategory::Third,
        PrizeCategory::Fourth,
        PrizeCategory::Fifth,
        PrizeCategory::Sixth,
        PrizeCategory::Refund,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PrizeCategory::Jackpot => "6+R",
            PrizeCategory::Second => "6",
            PrizeCategory::Third => "5+R",
            PrizeCategory::Fourth => "5",
            PrizeCategory::Fifth => "4",
            PrizeCategory::Sixth => "3",
            PrizeCategory::Refund => "R",
        }
    }

    /// Gain fixe approché en euros. 0 pour les deux catégories à gain variable.
    pub fn amount(&self) -> u32 {
        match self {
            PrizeCategory::Jackpot | PrizeCategory::Second => 0,
            PrizeCategory::Third => 20_000,
            PrizeCategory::Fourth => 1_500,
            PrizeCategory::Fifth => 48,
            PrizeCategory::Sixth => 8,
            PrizeCategory::Refund => 1,
        }
    }
}

pub fn prize(hits: usize, reintegro: bool) -> Option<PrizeCategory> {
    match (hits, reintegro) {
        (6, true) => Some(PrizeCategory::Jackpot),
        (6, false) => Some(PrizeCategory::Second),
        (5, true) => Some(PrizeCategory::Third),
        (5, false) => Some(PrizeCategory::Fourth),
        (4, _) => Some(PrizeCategory::Fifth),
        (3, _) => Some(PrizeCategory::Sixth),
        (_, true) => Some(PrizeCategory::Refund),
        _ => None,
    }
}

/// Résultat d'un tirage : toutes les catégories touchées, mais seul le meilleur
/// gain est encaissé.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settlement {
    pub categories: Vec<PrizeCategory>,
    pub best: u32,
}

pub fn settle(tickets: &[Combination], draw: &Draw, reintegro_position: usize) -> Settlement {
    let actual = draw.extras.get(reintegro_position).copied();
    let mut settlement = Settlement::default();
    for ticket in tickets {
        let reintegro = ticket.extra.is_some() && ticket.extra == actual;
        if let Some(category) = prize(ticket.hits(draw), reintegro) {
            settlement.categories.push(category);
            settlement.best = settlement.best.max(category.amount());
        }
    }
    settlement
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrizeConfig {
    /// Nombre de tirages récents rejoués.
    pub draws: usize,
    pub pool: usize,
    pub subset: usize,
    pub guarantee: usize,
    pub tickets: usize,
}

impl Default for PrizeConfig {
    fn default() -> Self {
        Self {
            draws: 200,
            pool: 17,
            subset: 3,
            guarantee: 3,
            tickets: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrizeReport {
    pub strategy: ExtraStrategy,
    pub draws: usize,
    /// Un euro par grille.
    pub spent: u64,
    pub won: u64,
    pub balance: i64,
    pub categories: BTreeMap<PrizeCategory, u32>,
}

impl PrizeReport {
    fn new(strategy: ExtraStrategy) -> Self {
        Self {
            strategy,
            draws: 0,
            spent: 0,
            won: 0,
            balance: 0,
            categories: BTreeMap::new(),
        }
    }

    pub fn count(&self, category: PrizeCategory) -> u32 {
        self.categories.get(&category).copied().unwrap_or(0)
    }

    fn record(&mut self, tickets: usize, settlement: &Settlement) {
        self.draws += 1;
        self.spent += tickets as u64;
        self.won += settlement.best as u64;
        for &c in &settlement.categories {
            *self.categories.entry(c).or_insert(0) += 1;
        }
    }

    fn merge(mut self, other: PrizeReport) -> Self {
        self.draws += other.draws;
        self.spent += other.spent;
        self.won += other.won;
        for (c, n) in other.categories {
            *self.categories.entry(c).or_insert(0) += n;
        }
        self
    }
}

/// Walk-forward sur les `config.draws` tirages les plus récents : pour chacun, roue
/// construite sur le seul passé, puis chaque stratégie de reintegro est jouée
/// sur les mêmes grilles.
pub fn simulate_prizes(draws: &[Draw], game: Game, config: &PrizeConfig, strategies: &[ExtraStrategy]) -> Result<Vec<PrizeReport>> {
    if game != Game::Primitiva {
        bail!("Pas de barème de gains pour {}", game);
    }
    let Some(position) = game.reintegro_position() else {
        bail!("{} n'a pas de reintegro", game);
    };
    let domain = game.domain();
    let n = config.draws.min(draws.len().saturating_sub(1));

    let per_draw: Vec<Vec<PrizeReport>> = (0..n)
        .into_par_iter()
        .map(|t| -> Result<Vec<PrizeReport>> {
            let past = &draws[t + 1..];
            let pool = wheel_pool(past, domain, config.pool);
            let wheel = wheel_design(&pool, config.subset, config.guarantee, config.tickets, domain.pick_count())?;
            strategies
                .iter()
                .map(|&strategy| -> Result<PrizeReport> {
                    let mut tickets = wheel.clone();
                    assign_extras(&mut tickets, past, game, strategy)?;
                    let mut report = PrizeReport::new(strategy);
                    report.record(tickets.len(), &settle(&tickets, &draws[t], position));
                    Ok(report)
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut reports: Vec<PrizeReport> = strategies.iter().map(|&s| PrizeReport::new(s)).collect();
    for draw_reports in per_draw {
        reports = reports.into_iter().zip(draw_reports).map(|(acc, r)| acc.merge(r)).collect();
    }
    for report in &mut reports {
        report.balance = report.won as i64 - report.spent as i64;
    }
    log::info!("Simulation des gains {} : {} tirages, {} stratégies", game, n, strategies.len());
    Ok(reports)
}
