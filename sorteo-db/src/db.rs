use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{Draw, Game, WeightVector};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS draws (
    game      TEXT NOT NULL,
    draw_id   TEXT NOT NULL,
    date      TEXT NOT NULL,
    numbers   TEXT NOT NULL,
    extras    TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (game, draw_id)
);

CREATE TABLE IF NOT EXISTS weights (
    game      TEXT NOT NULL,
    scope     TEXT NOT NULL,
    method    TEXT NOT NULL,
    weight    REAL NOT NULL,
    PRIMARY KEY (game, scope, method)
);

CREATE TABLE IF NOT EXISTS weight_stats (
    game         TEXT NOT NULL,
    scope        TEXT NOT NULL,
    updates      INTEGER NOT NULL DEFAULT 0,
    mean_reward  REAL NOT NULL DEFAULT 0.0,
    PRIMARY KEY (game, scope)
);
";

pub fn db_path() -> std::path::PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("data");
    path.push("sorteo.db");
    path
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Impossible de créer le répertoire {:?}", parent))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Impossible d'ouvrir la base {:?}", path))?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Échec de la migration")?;
    Ok(())
}

fn join_numbers(numbers: &[u8]) -> String {
    numbers.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",")
}

fn split_numbers(raw: &str) -> rusqlite::Result<Vec<u8>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|s| {
            s.trim().parse::<u8>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
        })
        .collect()
}

pub fn insert_draw(conn: &Connection, game: Game, draw: &Draw) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO draws (game, draw_id, date, numbers, extras)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            game.name(),
            draw.draw_id,
            draw.date,
            join_numbers(&draw.numbers),
            join_numbers(&draw.extras),
        ],
    ).context("Échec de l'insertion")?;
    Ok(changed > 0)
}

/// Tirages du plus récent au plus ancien (draws[0] = le dernier tirage).
pub fn fetch_last_draws(conn: &Connection, game: Game, limit: u32) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(
        "SELECT draw_id, date, numbers, extras
         FROM draws WHERE game = ?1 ORDER BY date DESC, draw_id DESC LIMIT ?2"
    )?;
    let draws = stmt.query_map(rusqlite::params![game.name(), limit], |row| {
        let numbers: String = row.get(2)?;
        let extras: String = row.get(3)?;
        Ok(Draw {
            draw_id: row.get(0)?,
            date: row.get(1)?,
            numbers: split_numbers(&numbers)?,
            extras: split_numbers(&extras)?,
        })
    })?.collect::<Result<Vec<_>, _>>()?;
    Ok(draws)
}

pub fn count_draws(conn: &Connection, game: Game) -> Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM draws WHERE game = ?1",
        [game.name()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn load_weights(conn: &Connection, game: Game, scope: &str) -> Result<WeightVector> {
    let mut stmt = conn.prepare(
        "SELECT method, weight FROM weights WHERE game = ?1 AND scope = ?2 ORDER BY method"
    )?;
    let weights = stmt.query_map(rusqlite::params![game.name(), scope], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?.collect::<Result<BTreeMap<_, _>, _>>()?;

    let stats: Option<(u64, f64)> = conn.query_row(
        "SELECT updates, mean_reward FROM weight_stats WHERE game = ?1 AND scope = ?2",
        rusqlite::params![game.name(), scope],
        |row| Ok((row.get::<_, i64>(0)? as u64, row.get(1)?)),
    ).optional()?;
    let (updates, mean_reward) = stats.unwrap_or((0, 0.0));

    Ok(WeightVector { weights, updates, mean_reward })
}

/// Remplace atomiquement le vecteur de poids d'un (jeu, portée).
pub fn store_weights(conn: &mut Connection, game: Game, scope: &str, vector: &WeightVector) -> Result<()> {
    let tx = conn.transaction().context("Impossible d'ouvrir la transaction")?;
    tx.execute(
        "DELETE FROM weights WHERE game = ?1 AND scope = ?2",
        rusqlite::params![game.name(), scope],
    )?;
    for (method, weight) in &vector.weights {
        tx.execute(
            "INSERT INTO weights (game, scope, method, weight) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![game.name(), scope, method, weight],
        )?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO weight_stats (game, scope, updates, mean_reward) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![game.name(), scope, vector.updates as i64, vector.mean_reward],
    )?;
    tx.commit().context("Échec de l'écriture des poids")?;
    log::debug!("poids {}/{} enregistrés ({} mises à jour)", game, scope, vector.updates);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_draw(id: &str, date: &str) -> Draw {
        Draw::new(id, date, vec![1, 2, 3, 4, 5, 6], vec![7, 3])
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_count() {
        let conn = memory_db();
        assert_eq!(count_draws(&conn, Game::Primitiva).unwrap(), 0);

        insert_draw(&conn, Game::Primitiva, &test_draw("001", "2024-01-01")).unwrap();
        assert_eq!(count_draws(&conn, Game::Primitiva).unwrap(), 1);
        assert_eq!(count_draws(&conn, Game::Bonoloto).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_ignored() {
        let conn = memory_db();

        let inserted = insert_draw(&conn, Game::Primitiva, &test_draw("001", "2024-01-01")).unwrap();
        assert!(inserted);
        let inserted = insert_draw(&conn, Game::Primitiva, &test_draw("001", "2024-01-01")).unwrap();
        assert!(!inserted);
        // Même identifiant, autre jeu : accepté
        let inserted = insert_draw(&conn, Game::Bonoloto, &test_draw("001", "2024-01-01")).unwrap();
        assert!(inserted);
    }

    #[test]
    fn test_fetch_order_and_roundtrip() {
        let conn = memory_db();

        insert_draw(&conn, Game::Primitiva, &test_draw("001", "2024-01-01")).unwrap();
        insert_draw(&conn, Game::Primitiva, &test_draw("002", "2024-01-05")).unwrap();
        insert_draw(&conn, Game::Primitiva, &test_draw("003", "2024-01-03")).unwrap();

        let draws = fetch_last_draws(&conn, Game::Primitiva, 10).unwrap();
        assert_eq!(draws.len(), 3);
        assert_eq!(draws[0].date, "2024-01-05");
        assert_eq!(draws[2].date, "2024-01-01");
        assert_eq!(draws[0].numbers, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(draws[0].extras, vec![7, 3]);
    }

    #[test]
    fn test_weights_missing_is_empty() {
        let conn = memory_db();
        let w = load_weights(&conn, Game::Primitiva, "analyzers").unwrap();
        assert!(w.is_empty());
        assert_eq!(w.updates, 0);
    }

    #[test]
    fn test_weights_store_and_replace() {
        let mut conn = memory_db();
        let mut vector = WeightVector::default();
        vector.weights.insert("bias".into(), 0.6);
        vector.weights.insert("entropy".into(), 0.4);
        vector.updates = 3;
        vector.mean_reward = 1.5;
        store_weights(&mut conn, Game::Primitiva, "analyzers", &vector).unwrap();

        let loaded = load_weights(&conn, Game::Primitiva, "analyzers").unwrap();
        assert_eq!(loaded, vector);

        let mut replaced = WeightVector::default();
        replaced.weights.insert("bias".into(), 1.0);
        replaced.updates = 4;
        store_weights(&mut conn, Game::Primitiva, "analyzers", &replaced).unwrap();
        let loaded = load_weights(&conn, Game::Primitiva, "analyzers").unwrap();
        assert_eq!(loaded.weights.len(), 1);
        assert_eq!(loaded.updates, 4);

        // Les portées sont indépendantes
        assert!(load_weights(&conn, Game::Primitiva, "voters").unwrap().is_empty());
    }
}
