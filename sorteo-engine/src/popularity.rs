//! Score anti-popularité : à quel point une combinaison ressemble à ce que
//! beaucoup d'autres joueurs cochent (et donc partagerait un éventuel gain).
//! 100 = combinaison banale pour personne, 0 = combinaison jouée par tout le monde.

use anyhow::{bail, Result};
use serde::Serialize;

use sorteo_db::models::Game;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    Birthday,
    RoundNumbers,
    Famous,
    Progression,
    SameEnding,
    Consecutive,
    AllLow,
    Grid,
    TrailingZeros,
    RepeatedDigits,
    DateLike,
    Palindrome,
    Sequential,
}

impl PenaltyKind {
    pub fn label(&self) -> &'static str {
        match self {
            PenaltyKind::Birthday => "Dates d'anniversaire",
            PenaltyKind::RoundNumbers => "Multiples de 5/10",
            PenaltyKind::Famous => "Suite célèbre",
            PenaltyKind::Progression => "Progression arithmétique",
            PenaltyKind::SameEnding => "Même chiffre final",
            PenaltyKind::Consecutive => "Numéros consécutifs",
            PenaltyKind::AllLow => "Tous petits numéros",
            PenaltyKind::Grid => "Motif sur la grille",
            PenaltyKind::TrailingZeros => "Zéros finaux",
            PenaltyKind::RepeatedDigits => "Chiffres répétés",
            PenaltyKind::DateLike => "Ressemble à une date",
            PenaltyKind::Palindrome => "Palindrome",
            PenaltyKind::Sequential => "Chiffres qui se suivent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Penalty {
    pub kind: PenaltyKind,
    pub points: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularityReport {
    pub score: u8,
    /// Dans l'ordre d'application des règles.
    pub penalties: Vec<Penalty>,
}

impl PopularityReport {
    fn from_penalties(penalties: Vec<Penalty>) -> Self {
        let total: u32 = penalties.iter().map(|p| p.points as u32).sum();
        let score = 100u32.saturating_sub(total) as u8;
        Self { score, penalties }
    }

    pub fn has(&self, kind: PenaltyKind) -> bool {
        self.penalties.iter().any(|p| p.kind == kind)
    }
}

struct Penalties(Vec<Penalty>);

impl Penalties {
    fn add(&mut self, kind: PenaltyKind, points: u32, cap: u32) {
        let points = points.min(cap);
        if points > 0 {
            self.0.push(Penalty { kind, points: points as u8 });
        }
    }
}

const FAMOUS_SETS: &[&[u8]] = &[
    &[4, 8, 15, 16, 23, 42],
    &[7, 14, 21, 28, 35, 42],
    &[1, 7, 13, 19, 25, 31],
    &[3, 13, 23, 33, 43],
    &[7, 17, 27, 37, 47],
    &[1, 11, 21, 31, 41],
    &[10, 20, 30, 40, 50],
];

fn is_famous(sorted: &[u8]) -> bool {
    let k = sorted.len();
    // 1, 2, ..., k compte aussi comme suite célèbre
    FAMOUS_SETS
        .iter()
        .any(|set| set.len() == k && set.iter().zip(sorted).all(|(a, b)| a == b))
        || (k > 0 && sorted.iter().enumerate().all(|(i, &n)| n as usize == i + 1))
}

fn arithmetic_step(sorted: &[u8]) -> Option<u8> {
    if sorted.len() < 3 {
        return None;
    }
    let step = sorted[1] - sorted[0];
    sorted.windows(2).all(|w| w[1] - w[0] == step).then_some(step)
}

fn longest_run(sorted: &[u8]) -> usize {
    let mut best = usize::from(!sorted.is_empty());
    let mut current = best;
    for w in sorted.windows(2) {
        if w[1] == w[0] + 1 {
            current += 1;
            best = best.max(current);
        } else {
            current = 1;
        }
    }
    best
}

/// Plus grand nombre de numéros alignés sur une même ligne, colonne ou diagonale.
fn grid_alignment(sorted: &[u8], columns: u8) -> usize {
    let cells: Vec<(i32, i32)> = sorted
        .iter()
        .map(|&n| (((n - 1) / columns) as i32, ((n - 1) % columns) as i32))
        .collect();
    let best_by = |key: &dyn Fn(&(i32, i32)) -> i32| {
        let mut keys: Vec<i32> = cells.iter().map(key).collect();
        keys.sort();
        keys.chunk_by(|a, b| a == b).map(|c| c.len()).max().unwrap_or(0)
    };
    [
        best_by(&|c| c.0),
        best_by(&|c| c.1),
        best_by(&|c| c.0 - c.1),
        best_by(&|c| c.0 + c.1),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

/// Score d'une combinaison de numéros pour un jeu donné.
pub fn score_combination(numbers: &[u8], game: Game) -> PopularityReport {
    let mut sorted = numbers.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted.retain(|&n| n >= 1 && n <= game.max_number());
    let k = sorted.len();
    let mut p = Penalties(Vec::new());
    if k == 0 {
        return PopularityReport::from_penalties(p.0);
    }

    let birthdays = sorted.iter().filter(|&&n| n <= 31).count();
    if birthdays == k {
        p.add(PenaltyKind::Birthday, 25, 25);
    } else if birthdays + 1 == k {
        p.add(PenaltyKind::Birthday, 12, 25);
    }

    let round = sorted.iter().filter(|&&n| n % 5 == 0).count();
    if round >= 3 {
        p.add(PenaltyKind::RoundNumbers, 5 * round as u32, 15);
    }

    if is_famous(&sorted) {
        p.add(PenaltyKind::Famous, 30, 30);
    }

    if let Some(step) = arithmetic_step(&sorted) {
        let points = if step == 1 { 15 } else { 20 };
        p.add(PenaltyKind::Progression, points, 20);
    }

    let mut endings = [0u32; 10];
    for &n in &sorted {
        endings[(n % 10) as usize] += 1;
    }
    let same_ending = endings.iter().copied().max().unwrap_or(0);
    if same_ending >= 4 {
        p.add(PenaltyKind::SameEnding, 10 * (same_ending - 2), 30);
    }

    let run = longest_run(&sorted);
    if run == k {
        p.add(PenaltyKind::Consecutive, 25, 25);
    } else if run >= 3 {
        p.add(PenaltyKind::Consecutive, 5 * (run as u32 - 2), 25);
    }

    let low_limit = game.max_number() / 4;
    if sorted.iter().all(|&n| n <= low_limit) {
        p.add(PenaltyKind::AllLow, 20, 20);
    }

    let aligned = grid_alignment(&sorted, game.grid_columns());
    if aligned == k {
        p.add(PenaltyKind::Grid, 20, 20);
    } else if aligned + 1 == k && k >= 5 {
        p.add(PenaltyKind::Grid, 10, 20);
    }

    PopularityReport::from_penalties(p.0)
}

const FAMOUS_DIGITS: &[&str] = &[
    "12345", "54321", "00000", "11111", "22222", "33333", "44444", "55555", "66666", "77777", "88888",
    "99999", "13579", "02468", "12321", "00001", "10000", "69696", "11223",
];

/// Score d'un numéro à 5 chiffres (loterie nationale).
pub fn score_digits(digits: &str) -> Result<PopularityReport> {
    if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        bail!("Un numéro de loterie doit compter exactement 5 chiffres : '{}'", digits);
    }
    let d: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    let mut p = Penalties(Vec::new());

    let zeros = d.iter().rev().take_while(|&&x| x == 0).count() as u32;
    if zeros > 0 {
        p.add(PenaltyKind::TrailingZeros, 10 * zeros, 30);
    }

    let mut counts = [0u32; 10];
    for &x in &d {
        counts[x as usize] += 1;
    }
    let repeated = counts.iter().copied().max().unwrap_or(0);
    if repeated >= 3 {
        p.add(PenaltyKind::RepeatedDigits, 10 * (repeated - 2), 30);
    }

    let day = d[0] * 10 + d[1];
    let month = d[2] * 10 + d[3];
    if (1..=31).contains(&day) && (1..=12).contains(&month) {
        p.add(PenaltyKind::DateLike, 15, 15);
    }

    if d[0] == d[4] && d[1] == d[3] {
        p.add(PenaltyKind::Palindrome, 20, 20);
    }

    if FAMOUS_DIGITS.contains(&digits) {
        p.add(PenaltyKind::Famous, 30, 30);
    }

    let mut run = 1u32;
    let mut best = 1u32;
    let mut dir = 0i8;
    for w in d.windows(2) {
        let step = w[1] as i8 - w[0] as i8;
        if (step == 1 || step == -1) && (run == 1 || step == dir) {
            run += 1;
            dir = step;
        } else if step == 1 || step == -1 {
            run = 2;
            dir = step;
        } else {
            run = 1;
        }
        best = best.max(run);
    }
    if best >= 4 {
        p.add(PenaltyKind::Sequential, 20, 20);
    } else if best == 3 {
        p.add(PenaltyKind::Sequential, 10, 20);
    }

    Ok(PopularityReport::from_penalties(p.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_to_six_is_very_popular() {
        let report = score_combination(&[1, 2, 3, 4, 5, 6], Game::Primitiva);
        assert!(report.score < 50, "score = {}", report.score);
        assert!(report.has(PenaltyKind::Famous));
        assert!(report.has(PenaltyKind::Consecutive));
        assert!(report.has(PenaltyKind::AllLow));
    }

    #[test]
    fn test_scattered_combination_scores_high() {
        let report = score_combination(&[3, 17, 29, 34, 41, 48], Game::Primitiva);
        assert!(report.score >= 80, "score = {} {:?}", report.score, report.penalties);
    }

    #[test]
    fn test_birthday_saturation() {
        let report = score_combination(&[2, 9, 14, 19, 26, 30], Game::Bonoloto);
        assert!(report.has(PenaltyKind::Birthday));
        assert!(!report.has(PenaltyKind::AllLow));
    }

    #[test]
    fn test_round_numbers_capped() {
        let report = score_combination(&[5, 10, 15, 20, 25], Game::Euromillones);
        let round = report.penalties.iter().find(|p| p.kind == PenaltyKind::RoundNumbers).unwrap();
        assert_eq!(round.points, 15);
        assert!(report.has(PenaltyKind::Progression));
    }

    #[test]
    fn test_grid_column() {
        // colonne 1 d'une grille de 7 : 1, 8, 15, 22, 29, 36
        assert_eq!(grid_alignment(&[1, 8, 15, 22, 29, 36], 7), 6);
        let report = score_combination(&[1, 8, 15, 22, 29, 36], Game::Primitiva);
        assert!(report.has(PenaltyKind::Grid));
        // diagonale sur une grille de 10
        assert_eq!(grid_alignment(&[1, 12, 23, 34, 45], 10), 5);
    }

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_run(&[1, 2, 3, 10, 11]), 3);
        assert_eq!(longest_run(&[4]), 1);
        assert_eq!(longest_run(&[]), 0);
    }

    #[test]
    fn test_score_never_underflows() {
        let report = score_combination(&[1, 2, 3, 4, 5], Game::Euromillones);
        assert!(report.score <= 100);
        let empty = score_combination(&[], Game::ElGordo);
        assert_eq!(empty.score, 100);
    }

    #[test]
    fn test_digits_rules() {
        let r = score_digits("12345").unwrap();
        assert!(r.has(PenaltyKind::Famous));
        assert!(r.has(PenaltyKind::Sequential));

        let r = score_digits("25127").unwrap();
        assert!(r.has(PenaltyKind::DateLike));

        let r = score_digits("47000").unwrap();
        assert!(r.has(PenaltyKind::TrailingZeros));
        assert!(r.has(PenaltyKind::RepeatedDigits));

        let r = score_digits("38583").unwrap();
        assert!(r.has(PenaltyKind::Palindrome));

        let r = score_digits("83961").unwrap();
        assert_eq!(r.score, 100, "{:?}", r.penalties);
    }

    #[test]
    fn test_digits_invalid() {
        assert!(score_digits("1234").is_err());
        assert!(score_digits("12a45").is_err());
    }
}
