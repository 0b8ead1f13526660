//! Mémoire des poids appris, par (jeu, mode d'apprentissage).
//!
//! Règle de mise à jour commune (moyenne mobile exponentielle) :
//! `w ← (1-α)·w + α·c/Σc`, les méthodes jamais vues partant de 1/M, puis
//! renormalisation à 1. Une mise à jour de contribution totale nulle ne
//! touche pas aux poids mais compte dans la récompense moyenne.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Context, Result};

use sorteo_db::db::{load_weights, store_weights};
use sorteo_db::models::{Game, WeightVector};
use sorteo_db::rusqlite::Connection;

use crate::learning::credit::CreditUpdate;
use crate::learning::LearningMode;

pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

pub trait WeightMemory: Send + Sync {
    fn get_weights(&self, game: Game, mode: LearningMode) -> Result<WeightVector>;
    /// Seul point de mutation. Appelé depuis un unique écrivain par (jeu, mode).
    fn update(&self, game: Game, mode: LearningMode, update: &CreditUpdate) -> Result<()>;
}

pub fn apply_update(vector: &mut WeightVector, update: &CreditUpdate, learning_rate: f64) {
    let alpha = learning_rate.clamp(0.0, 1.0);
    vector.updates += 1;
    if update.reward.is_finite() {
        vector.mean_reward += (update.reward - vector.mean_reward) / vector.updates as f64;
    }

    let total = update.total();
    if total <= 0.0 {
        return;
    }

    let names: BTreeSet<String> = vector
        .weights
        .keys()
        .chain(update.contributions.keys())
        .cloned()
        .collect();
    let initial = 1.0 / names.len() as f64;

    for name in names {
        let contribution = update
            .contributions
            .get(&name)
            .copied()
            .filter(|c| c.is_finite() && *c > 0.0)
            .unwrap_or(0.0);
        let share = contribution / total;
        let w = vector.weights.entry(name).or_insert(initial);
        *w = (1.0 - alpha) * *w + alpha * share;
    }

    let sum: f64 = vector.weights.values().sum();
    if sum > 0.0 && sum.is_finite() {
        for w in vector.weights.values_mut() {
            *w /= sum;
        }
    }
}

/// Mémoire volatile, pour les tests et les sessions sans base.
pub struct InMemoryWeights {
    learning_rate: f64,
    vectors: RwLock<HashMap<(Game, LearningMode), WeightVector>>,
}

impl InMemoryWeights {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Instantané de tous les vecteurs, clé `jeu/mode`.
    pub fn snapshot(&self) -> Result<WeightSnapshot> {
        let vectors = self.vectors.read().map_err(|_| anyhow!("Verrou des poids empoisonné"))?;
        Ok(WeightSnapshot(
            vectors
                .iter()
                .map(|((game, mode), v)| (snapshot_key(*game, *mode), v.clone()))
                .collect(),
        ))
    }

    pub fn restore(&self, snapshot: &WeightSnapshot) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(|_| anyhow!("Verrou des poids empoisonné"))?;
        for (key, vector) in &snapshot.0 {
            if let Some(slot) = parse_snapshot_key(key) {
                vectors.insert(slot, vector.clone());
            } else {
                log::warn!("Clé d'instantané ignorée : {}", key);
            }
        }
        Ok(())
    }
}

impl Default for InMemoryWeights {
    fn default() -> Self {
        Self::new(DEFAULT_LEARNING_RATE)
    }
}

impl WeightMemory for InMemoryWeights {
    fn get_weights(&self, game: Game, mode: LearningMode) -> Result<WeightVector> {
        let vectors = self.vectors.read().map_err(|_| anyhow!("Verrou des poids empoisonné"))?;
        Ok(vectors.get(&(game, mode)).cloned().unwrap_or_default())
    }

    fn update(&self, game: Game, mode: LearningMode, update: &CreditUpdate) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(|_| anyhow!("Verrou des poids empoisonné"))?;
        let vector = vectors.entry((game, mode)).or_default();
        apply_update(vector, update, self.learning_rate);
        Ok(())
    }
}

/// Mémoire persistée dans la base SQLite (tables `weights` / `weight_stats`).
pub struct SqliteWeights {
    learning_rate: f64,
    conn: Mutex<Connection>,
}

impl SqliteWeights {
    /// La connexion doit déjà être migrée.
    pub fn new(conn: Connection, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            conn: Mutex::new(conn),
        }
    }

    pub fn snapshot(&self, games: &[Game]) -> Result<WeightSnapshot> {
        let conn = self.conn.lock().map_err(|_| anyhow!("Connexion SQLite empoisonnée"))?;
        let mut out = BTreeMap::new();
        for &game in games {
            for mode in LearningMode::ALL {
                let vector = load_weights(&conn, game, mode.name())?;
                if !vector.is_empty() || vector.updates > 0 {
                    out.insert(snapshot_key(game, mode), vector);
                }
            }
        }
        Ok(WeightSnapshot(out))
    }

    /// Écrase les vecteurs présents dans l'instantané, rend le nombre importé.
    pub fn restore(&self, snapshot: &WeightSnapshot) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|_| anyhow!("Connexion SQLite empoisonnée"))?;
        let mut restored = 0;
        for (key, vector) in &snapshot.0 {
            match parse_snapshot_key(key) {
                Some((game, mode)) => {
                    store_weights(&mut conn, game, mode.name(), vector)?;
                    restored += 1;
                }
                None => log::warn!("Clé d'instantané ignorée : {}", key),
            }
        }
        Ok(restored)
    }
}

impl WeightMemory for SqliteWeights {
    fn get_weights(&self, game: Game, mode: LearningMode) -> Result<WeightVector> {
        let conn = self.conn.lock().map_err(|_| anyhow!("Connexion SQLite empoisonnée"))?;
        load_weights(&conn, game, mode.name())
    }

    fn update(&self, game: Game, mode: LearningMode, update: &CreditUpdate) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|_| anyhow!("Connexion SQLite empoisonnée"))?;
        let mut vector = load_weights(&conn, game, mode.name())?;
        apply_update(&mut vector, update, self.learning_rate);
        store_weights(&mut conn, game, mode.name(), &vector)
            .with_context(|| format!("Écriture des poids {}/{}", game, mode.name()))
    }
}

/// Ne retient rien. Sert de bouchon pour les tests de déterminisme.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMemory;

impl WeightMemory for NoopMemory {
    fn get_weights(&self, _game: Game, _mode: LearningMode) -> Result<WeightVector> {
        Ok(WeightVector::default())
    }

    fn update(&self, _game: Game, _mode: LearningMode, _update: &CreditUpdate) -> Result<()> {
        Ok(())
    }
}

/// Export JSON des poids appris.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WeightSnapshot(pub BTreeMap<String, WeightVector>);

fn snapshot_key(game: Game, mode: LearningMode) -> String {
    format!("{}/{}", game.name(), mode.name())
}

fn parse_snapshot_key(key: &str) -> Option<(Game, LearningMode)> {
    let (game, mode) = key.split_once('/')?;
    Some((Game::from_name(game)?, LearningMode::from_name(mode)?))
}

pub fn save_snapshot(snapshot: &WeightSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json).with_context(|| format!("Écriture de {}", path.display()))?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<WeightSnapshot> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Lecture de {}", path.display()))?;
    let snapshot: WeightSnapshot = serde_json::from_str(&json)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorteo_db::db::migrate;

    fn update(pairs: &[(&str, f64)], reward: f64) -> CreditUpdate {
        CreditUpdate {
            contributions: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            reward,
        }
    }

    #[test]
    fn test_apply_update_first_time() {
        let mut v = WeightVector::default();
        apply_update(&mut v, &update(&[("a", 3.0), ("b", 1.0)], 4.0), 0.1);
        // départ 0.5 chacun : a = 0.9·0.5 + 0.1·0.75, b = 0.9·0.5 + 0.1·0.25
        assert!((v.weights["a"] - 0.525).abs() < 1e-12);
        assert!((v.weights["b"] - 0.475).abs() < 1e-12);
        assert_eq!(v.updates, 1);
        assert_eq!(v.mean_reward, 4.0);
    }

    #[test]
    fn test_apply_update_sums_to_one() {
        let mut v = WeightVector::default();
        apply_update(&mut v, &update(&[("a", 1.0)], 1.0), 0.3);
        apply_update(&mut v, &update(&[("b", 2.0), ("c", 2.0)], 4.0), 0.3);
        let sum: f64 = v.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(v.weights.len(), 3);
        assert_eq!(v.mean_reward, 2.5);
    }

    #[test]
    fn test_zero_update_records_reward_only() {
        let mut v = WeightVector::default();
        apply_update(&mut v, &update(&[("a", 1.0)], 1.0), 0.1);
        let before = v.weights.clone();
        apply_update(&mut v, &update(&[("a", 0.0)], 0.0), 0.1);
        assert_eq!(v.weights, before);
        assert_eq!(v.updates, 2);
        assert_eq!(v.mean_reward, 0.5);
    }

    #[test]
    fn test_repeated_credit_converges() {
        let mut v = WeightVector::default();
        for _ in 0..200 {
            apply_update(&mut v, &update(&[("good", 4.0), ("bad", 1.0)], 5.0), 0.1);
        }
        assert!((v.weights["good"] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_in_memory_isolated_by_key() {
        let memory = InMemoryWeights::default();
        memory
            .update(Game::Primitiva, LearningMode::Voters, &update(&[("frequency", 2.0)], 2.0))
            .unwrap();
        assert!(!memory.get_weights(Game::Primitiva, LearningMode::Voters).unwrap().is_empty());
        assert!(memory.get_weights(Game::Primitiva, LearningMode::Analyzers).unwrap().is_empty());
        assert!(memory.get_weights(Game::Bonoloto, LearningMode::Voters).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let memory = InMemoryWeights::default();
        memory
            .update(Game::ElGordo, LearningMode::Analyzers, &update(&[("bias", 1.0)], 1.0))
            .unwrap();
        let snap = memory.snapshot().unwrap();
        assert!(snap.0.contains_key("gordo/analyzers"));

        let other = InMemoryWeights::default();
        other.restore(&snap).unwrap();
        assert_eq!(
            other.get_weights(Game::ElGordo, LearningMode::Analyzers).unwrap(),
            memory.get_weights(Game::ElGordo, LearningMode::Analyzers).unwrap()
        );
    }

    #[test]
    fn test_sqlite_memory_persists() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let memory = SqliteWeights::new(conn, 0.1);
        memory
            .update(Game::Euromillones, LearningMode::Analyzers, &update(&[("bias", 3.0), ("entropy", 1.0)], 4.0))
            .unwrap();
        memory
            .update(Game::Euromillones, LearningMode::Analyzers, &update(&[("bias", 1.0)], 1.0))
            .unwrap();

        let v = memory.get_weights(Game::Euromillones, LearningMode::Analyzers).unwrap();
        assert_eq!(v.updates, 2);
        assert!((v.mean_reward - 2.5).abs() < 1e-12);
        let sum: f64 = v.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);

        let snap = memory.snapshot(&[Game::Euromillones, Game::Primitiva]).unwrap();
        assert_eq!(snap.0.len(), 1);
    }

    #[test]
    fn test_sqlite_restore_skips_unknown_keys() {
        let source = InMemoryWeights::default();
        source
            .update(Game::Primitiva, LearningMode::Voters, &update(&[("hot_12", 2.0), ("pairs", 1.0)], 3.0))
            .unwrap();
        let mut snap = source.snapshot().unwrap();
        snap.0.insert("loto/voters".to_string(), WeightVector::default());

        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let memory = SqliteWeights::new(conn, 0.1);
        assert_eq!(memory.restore(&snap).unwrap(), 1);
        assert_eq!(
            memory.get_weights(Game::Primitiva, LearningMode::Voters).unwrap(),
            source.get_weights(Game::Primitiva, LearningMode::Voters).unwrap()
        );
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let memory = InMemoryWeights::default();
        memory
            .update(Game::Bonoloto, LearningMode::Voters, &update(&[("overdue", 1.0)], 1.0))
            .unwrap();
        let snap = memory.snapshot().unwrap();
        let path = std::env::temp_dir().join(format!("sorteo_snapshot_{}.json", std::process::id()));
        save_snapshot(&snap, &path).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, snap);
    }
}
