use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub draw_id: String,
    pub date: String,
    pub numbers: Vec<u8>,
    pub extras: Vec<u8>,
}

impl Draw {
    pub fn new(draw_id: impl Into<String>, date: impl Into<String>, numbers: Vec<u8>, extras: Vec<u8>) -> Self {
        Self {
            draw_id: draw_id.into(),
            date: date.into(),
            numbers,
            extras,
        }
    }

    pub fn contains(&self, number: u8) -> bool {
        self.numbers.contains(&number)
    }
}

/// Jeux supportés. Chaque variante porte son propre domaine (N, k).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Primitiva,
    Bonoloto,
    Euromillones,
    #[clap(name = "gordo")]
    #[serde(rename = "gordo")]
    ElGordo,
}

impl Game {
    pub fn max_number(&self) -> u8 {
        match self {
            Game::Primitiva | Game::Bonoloto => 49,
            Game::Euromillones => 50,
            Game::ElGordo => 54,
        }
    }

    pub fn pick_count(&self) -> usize {
        match self {
            Game::Primitiva | Game::Bonoloto => 6,
            Game::Euromillones | Game::ElGordo => 5,
        }
    }

    /// Complémentaire + reintegro, étoiles, ou clé.
    pub fn extra_count(&self) -> usize {
        match self {
            Game::Primitiva | Game::Bonoloto | Game::Euromillones => 2,
            Game::ElGordo => 1,
        }
    }

    pub fn extra_range(&self) -> (u8, u8) {
        match self {
            Game::Primitiva | Game::Bonoloto => (0, 49),
            Game::Euromillones => (1, 12),
            Game::ElGordo => (0, 9),
        }
    }

    /// Libellé de chaque position de `Draw::extras` ; les positions de même
    /// libellé sont interchangeables (deux étoiles).
    pub fn extra_labels(&self) -> &'static [&'static str] {
        match self {
            Game::Primitiva | Game::Bonoloto => &["complémentaire", "reintegro"],
            Game::Euromillones => &["étoile", "étoile"],
            Game::ElGordo => &["clé"],
        }
    }

    pub fn extra_slot_range(&self, position: usize) -> (u8, u8) {
        match (self, position) {
            (Game::Primitiva | Game::Bonoloto, 0) => (1, 49),
            (Game::Primitiva | Game::Bonoloto, _) => (0, 9),
            _ => self.extra_range(),
        }
    }

    /// Position du reintegro dans `Draw::extras`.
    pub fn reintegro_position(&self) -> Option<usize> {
        match self {
            Game::Primitiva | Game::Bonoloto => Some(1),
            Game::Euromillones | Game::ElGordo => None,
        }
    }

    /// Nombre de colonnes du bulletin papier.
    pub fn grid_columns(&self) -> u8 {
        match self {
            Game::Primitiva | Game::Bonoloto => 7,
            Game::Euromillones => 10,
            Game::ElGordo => 9,
        }
    }

    pub fn domain(&self) -> Domain {
        Domain {
            max_number: self.max_number(),
            pick_count: self.pick_count(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Game::Primitiva => "primitiva",
            Game::Bonoloto => "bonoloto",
            Game::Euromillones => "euromillones",
            Game::ElGordo => "gordo",
        }
    }

    pub fn from_name(name: &str) -> Option<Game> {
        match name {
            "primitiva" => Some(Game::Primitiva),
            "bonoloto" => Some(Game::Bonoloto),
            "euromillones" => Some(Game::Euromillones),
            "gordo" => Some(Game::ElGordo),
            _ => None,
        }
    }
}

impl std::fmt::Display for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Vue normalisée (N, k) sur laquelle travaillent les analyseurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Domain {
    max_number: u8,
    pick_count: usize,
}

impl Domain {
    pub fn new(max_number: u8, pick_count: usize) -> Result<Self> {
        if max_number == 0 {
            bail!("N doit être strictement positif");
        }
        if pick_count == 0 {
            bail!("k doit être strictement positif");
        }
        if pick_count > max_number as usize {
            bail!("k={} dépasse N={}", pick_count, max_number);
        }
        Ok(Self { max_number, pick_count })
    }

    pub fn max_number(&self) -> u8 {
        self.max_number
    }

    pub fn size(&self) -> usize {
        self.max_number as usize
    }

    pub fn pick_count(&self) -> usize {
        self.pick_count
    }

    /// Probabilité qu'un numéro donné sorte dans un tirage : k / N.
    pub fn uniform_rate(&self) -> f64 {
        self.pick_count as f64 / self.max_number as f64
    }

    pub fn contains(&self, number: u8) -> bool {
        number >= 1 && number <= self.max_number
    }

    pub fn numbers(&self) -> impl Iterator<Item = u8> {
        1..=self.max_number
    }

    /// Moitié basse : numéros ≤ N/2.
    pub fn is_low(&self, number: u8) -> bool {
        (number as usize) * 2 <= self.max_number as usize
    }
}

/// Poids appris par méthode, tels que stockés par la mémoire de poids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub weights: BTreeMap<String, f64>,
    pub updates: u64,
    pub mean_reward: f64,
}

impl WeightVector {
    pub fn get(&self, method: &str) -> Option<f64> {
        self.weights.get(method).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

pub fn validate_draw(draw: &Draw, game: Game) -> Result<()> {
    let domain = game.domain();
    if draw.numbers.len() != domain.pick_count() {
        bail!(
            "{} attend {} numéros, reçu {}",
            game,
            domain.pick_count(),
            draw.numbers.len()
        );
    }
    for &n in &draw.numbers {
        if !domain.contains(n) {
            bail!("Numéro {} hors limites (1-{})", n, domain.max_number());
        }
    }
    for i in 0..draw.numbers.len() {
        for j in (i + 1)..draw.numbers.len() {
            if draw.numbers[i] == draw.numbers[j] {
                bail!("Numéro en double : {}", draw.numbers[i]);
            }
        }
    }
    if draw.extras.len() > game.extra_count() {
        bail!("{} accepte au plus {} numéros complémentaires", game, game.extra_count());
    }
    for (position, &e) in draw.extras.iter().enumerate() {
        let (lo, hi) = game.extra_slot_range(position);
        if e < lo || e > hi {
            bail!("{} {} hors limites ({}-{})", game.extra_labels()[position], e, lo, hi);
        }
    }
    Ok(())
}
