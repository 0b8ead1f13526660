use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sorteo_db::db::{count_draws, db_path, fetch_last_draws, insert_draw, load_weights, migrate, open_db};
use sorteo_db::models::{validate_draw, Draw, Game, WeightVector};
use sorteo_db::rusqlite::Connection;

use sorteo_engine::analysis::{analyze, top_extras};
use sorteo_engine::builder::build_combination;
use sorteo_engine::config::{EngineConfig, DEFAULT_CONFIG_FILE};
use sorteo_engine::convergence::score;
use sorteo_engine::coverage::{coverage_design, diverse_design, wheel_design};
use sorteo_engine::display;
use sorteo_engine::learning::backtest::{backtest_all, theoretical_mean};
use sorteo_engine::learning::runner::{spawn_learning_loop, LearningRegistry, LoopParams};
use sorteo_engine::learning::voters::{all_voters, wheel_pool};
use sorteo_engine::learning::{CutStrategy, LearningMode};
use sorteo_engine::memory::{load_snapshot, save_snapshot, SqliteWeights, WeightMemory};
use sorteo_engine::popularity::{score_combination, score_digits};
use sorteo_engine::tickets::{assign_extras, simulate_prizes, ExtraStrategy};
use sorteo_engine::validation::run_validation;

#[derive(Parser)]
#[command(name = "sorteo", about = "Analyse statistique et apprentissage walk-forward de tirages de loterie")]
struct Cli {
    /// Base SQLite (défaut : data/sorteo.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Fichier de configuration JSON
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Jeu analysé
    #[arg(short, long, global = true, default_value = "primitiva")]
    game: Game,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lister les derniers tirages
    History {
        /// Nombre de tirages à afficher
        #[arg(short, long, default_value = "10")]
        last: u32,
    },

    /// Ajouter un tirage
    Add {
        /// Identifiant du tirage
        #[arg(long)]
        id: String,

        /// Date ISO (AAAA-MM-JJ)
        #[arg(long)]
        date: String,

        /// Numéros principaux, séparés par des virgules
        #[arg(short, long, value_delimiter = ',', required = true)]
        numbers: Vec<u8>,

        /// Complémentaires (reintegro, étoiles, clé)
        #[arg(short, long, value_delimiter = ',')]
        extras: Vec<u8>,
    },

    /// Lancer les cinq analyseurs
    Analyze {
        /// Fenêtre d'analyse (tout l'historique par défaut)
        #[arg(short, long)]
        window: Option<u32>,
    },

    /// Classement par score de convergence
    Score {
        #[arg(short, long)]
        window: Option<u32>,

        /// Nombre de numéros affichés
        #[arg(short, long, default_value = "15")]
        top: usize,

        /// Ignorer les poids appris
        #[arg(long)]
        no_learned: bool,
    },

    /// Construire une combinaison équilibrée
    Build {
        #[arg(short, long)]
        window: Option<u32>,

        /// Seed pour la reproductibilité
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Générer plusieurs combinaisons couvrantes
    Coverage {
        #[arg(short, long)]
        window: Option<u32>,

        /// Nombre de combinaisons (défaut : 15 avec --wheel, 5 sinon)
        #[arg(short, long)]
        count: Option<usize>,

        /// Noyau commun de N numéros
        #[arg(long, conflicts_with = "wheel")]
        diverse: Option<usize>,

        /// Réduction gloutonne sur un pool équilibré
        #[arg(long)]
        wheel: bool,

        /// Taille du pool de la réduction
        #[arg(long, default_value = "17")]
        pool: usize,

        /// Taille des sous-ensembles à couvrir
        #[arg(long, default_value = "3")]
        subset: usize,

        /// Numéros communs exigés
        #[arg(long, default_value = "3")]
        guarantee: usize,

        /// Attribuer un reintegro à chaque grille
        #[arg(long)]
        extras: Option<ExtraStrategy>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Score anti-popularité d'une combinaison
    Popularity {
        /// Numéros séparés par des virgules
        #[arg(value_delimiter = ',', required_unless_present = "digits")]
        numbers: Vec<u8>,

        /// Jeu à chiffres : chaîne de 5 chiffres
        #[arg(long)]
        digits: Option<String>,
    },

    /// Comparer le classement au hasard (Monte Carlo)
    Validate {
        #[arg(short, long)]
        window: Option<u32>,

        /// Taille du pool préféré
        #[arg(short, long, default_value = "12")]
        pool: usize,

        #[arg(long)]
        trials: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Backtest walk-forward des votants
    Backtest {
        /// Nombre de tirages testés
        #[arg(short, long, default_value = "200")]
        last: usize,

        /// Graine de la référence aléatoire
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Rejouer une roue de grilles avec reintegro et compter les gains
    Prizes {
        /// Nombre de tirages rejoués
        #[arg(short, long)]
        last: Option<usize>,

        #[arg(long)]
        pool: Option<usize>,

        /// Grilles par tirage
        #[arg(short, long)]
        tickets: Option<usize>,

        /// Stratégies comparées (défaut : toutes)
        #[arg(short, long, value_delimiter = ',')]
        strategy: Vec<ExtraStrategy>,
    },

    /// Apprentissage walk-forward en arrière-plan
    Learn {
        #[arg(short, long, default_value = "voters")]
        mode: LearningMode,

        /// Arrêt après N itérations
        #[arg(short, long)]
        iterations: Option<u64>,

        /// Arrêt après N secondes
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Parcours séquentiel des points de coupe
        #[arg(long)]
        sequential: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Afficher, exporter ou importer les poids appris
    Weights {
        #[arg(long, conflicts_with = "import")]
        export: Option<PathBuf>,

        #[arg(long)]
        import: Option<PathBuf>,
    },
}

fn date_seed() -> u64 {
    let today = chrono::Local::now().date_naive();
    let y = today.year() as u64;
    let m = today.month() as u64;
    let d = today.day() as u64;
    y * 10_000 + m * 100 + d
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let path = cli.db.clone().unwrap_or_else(db_path);
    let conn = open_db(&path)?;
    migrate(&conn)?;
    let config = EngineConfig::load_or_default(&cli.config)?;
    let game = cli.game;

    match cli.command {
        Command::History { last } => cmd_history(&conn, game, last),
        Command::Add { id, date, numbers, extras } => cmd_add(&conn, game, Draw::new(id, date, numbers, extras)),
        Command::Analyze { window } => cmd_analyze(&conn, game, window, &config),
        Command::Score { window, top, no_learned } => cmd_score(&conn, game, window, top, no_learned, &config),
        Command::Build { window, seed } => cmd_build(&conn, game, window, seed, &config),
        Command::Coverage {
            window,
            count,
            diverse,
            wheel,
            pool,
            subset,
            guarantee,
            extras,
            seed,
        } => {
            let count = coverage_count(count, wheel);
            let mode = match (wheel, diverse) {
                (true, _) => CoverageMode::Wheel {
                    pool,
                    t: subset,
                    m: guarantee,
                },
                (false, Some(overlap)) => CoverageMode::Diverse(overlap),
                (false, None) => CoverageMode::LeastUsed,
            };
            cmd_coverage(&conn, game, window, count, mode, extras, seed, &config)
        }
        Command::Popularity { numbers, digits } => cmd_popularity(game, &numbers, digits.as_deref()),
        Command::Validate {
            window,
            pool,
            trials,
            seed,
        } => cmd_validate(&conn, game, window, pool, trials, seed, config),
        Command::Backtest { last, seed } => cmd_backtest(&conn, game, last, seed),
        Command::Prizes {
            last,
            pool,
            tickets,
            strategy,
        } => {
            let mut config = config;
            if let Some(last) = last {
                config.prizes.draws = last;
            }
            if let Some(pool) = pool {
                config.prizes.pool = pool;
            }
            if let Some(tickets) = tickets {
                config.prizes.tickets = tickets;
            }
            cmd_prizes(&conn, game, &strategy, &config)
        }
        Command::Learn {
            mode,
            iterations,
            seconds,
            sequential,
            seed,
        } => {
            let mut config = config;
            if sequential {
                config.learning.cut = CutStrategy::Sequential;
            }
            if let Some(seed) = seed {
                config.learning.seed = seed;
            }
            // sans borne explicite, on s'arrête après 200 itérations
            config.learning.max_iterations = iterations.or(config.learning.max_iterations).or(match seconds {
                Some(_) => None,
                None => Some(200),
            });
            cmd_learn(&conn, &path, game, mode, seconds, config)
        }
        Command::Weights { export, import } => cmd_weights(&path, game, export.as_deref(), import.as_deref(), &config),
    }
}

fn load_history(conn: &Connection, game: Game, window: Option<u32>) -> Result<Vec<Draw>> {
    let n = count_draws(conn, game)?;
    if n == 0 {
        bail!("Aucun tirage {} en base. Ajoutez-en d'abord avec : sorteo add", game);
    }
    let limit = window.map_or(n, |w| w.min(n));
    fetch_last_draws(conn, game, limit)
}

fn learned_weights(conn: &Connection, game: Game) -> Result<Option<WeightVector>> {
    let vector = load_weights(conn, game, LearningMode::Analyzers.name())?;
    Ok(if vector.is_empty() { None } else { Some(vector) })
}

fn cmd_history(conn: &Connection, game: Game, last: u32) -> Result<()> {
    let draws = fetch_last_draws(conn, game, last)?;
    display::display_draws(&draws, game);
    Ok(())
}

fn cmd_add(conn: &Connection, game: Game, mut draw: Draw) -> Result<()> {
    draw.numbers.sort();
    validate_draw(&draw, game)?;
    display::display_draws(std::slice::from_ref(&draw), game);
    if insert_draw(conn, game, &draw)? {
        println!("Tirage inséré avec succès.");
    } else {
        println!("Ce tirage existe déjà (doublon ignoré).");
    }
    Ok(())
}

fn cmd_analyze(conn: &Connection, game: Game, window: Option<u32>, config: &EngineConfig) -> Result<()> {
    let draws = load_history(conn, game, window)?;
    let domain = game.domain();
    let bundle = analyze(&draws, domain, &config.analysis);
    display::display_analysis(&bundle, domain);
    Ok(())
}

fn cmd_score(
    conn: &Connection,
    game: Game,
    window: Option<u32>,
    top: usize,
    no_learned: bool,
    config: &EngineConfig,
) -> Result<()> {
    let draws = load_history(conn, game, window)?;
    let learned = if no_learned { None } else { learned_weights(conn, game)? };
    let ranking = score(&draws, game.domain(), &config.analysis, learned.as_ref());
    display::display_ranking(&ranking, top);
    Ok(())
}

fn cmd_build(conn: &Connection, game: Game, window: Option<u32>, seed: Option<u64>, config: &EngineConfig) -> Result<()> {
    let draws = load_history(conn, game, window)?;
    let domain = game.domain();
    let learned = learned_weights(conn, game)?;
    let ranking = score(&draws, domain, &config.analysis, learned.as_ref());

    let seed = seed.unwrap_or_else(date_seed);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut combination = build_combination(&ranking.ranked_numbers(), &draws, domain, &mut rng);
    combination.popularity = Some(score_combination(&combination.numbers, game));

    println!("\nCombinaison {} (seed {})", game, seed);
    display::display_combinations(&[combination], &top_extras(&draws, game, 3));
    Ok(())
}

/// Une roue complète compte 15 grilles par défaut.
fn coverage_count(count: Option<usize>, wheel: bool) -> usize {
    count.unwrap_or(if wheel { 15 } else { 5 })
}

enum CoverageMode {
    LeastUsed,
    Diverse(usize),
    Wheel { pool: usize, t: usize, m: usize },
}

#[allow(clippy::too_many_arguments)]
fn cmd_coverage(
    conn: &Connection,
    game: Game,
    window: Option<u32>,
    count: usize,
    mode: CoverageMode,
    extras: Option<ExtraStrategy>,
    seed: Option<u64>,
    config: &EngineConfig,
) -> Result<()> {
    let draws = load_history(conn, game, window)?;
    let domain = game.domain();
    let seed = seed.unwrap_or_else(date_seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut combinations = match mode {
        CoverageMode::Wheel { pool, t, m } => {
            let pool = wheel_pool(&draws, domain, pool);
            println!("\nPool équilibré ({}) : {:?}", pool.len(), pool);
            wheel_design(&pool, t, m, count, domain.pick_count())?
        }
        CoverageMode::Diverse(overlap) => {
            let learned = learned_weights(conn, game)?;
            let ranking = score(&draws, domain, &config.analysis, learned.as_ref());
            diverse_design(&ranking.ranked_numbers(), count, overlap, domain, &mut rng)
        }
        CoverageMode::LeastUsed => {
            let learned = learned_weights(conn, game)?;
            let ranking = score(&draws, domain, &config.analysis, learned.as_ref());
            coverage_design(&ranking.ranked_numbers(), count, domain, &mut rng)
        }
    };

    for combination in &mut combinations {
        combination.popularity = Some(score_combination(&combination.numbers, game));
    }
    if let Some(strategy) = extras {
        assign_extras(&mut combinations, &draws, game, strategy)?;
    }
    println!("\n{} combinaisons {} (seed {})", combinations.len(), game, seed);
    display::display_combinations(&combinations, &top_extras(&draws, game, 3));
    Ok(())
}

fn cmd_popularity(game: Game, numbers: &[u8], digits: Option<&str>) -> Result<()> {
    if let Some(digits) = digits {
        let report = score_digits(digits)?;
        display::display_popularity(digits, &report);
        return Ok(());
    }

    let mut sorted = numbers.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != game.pick_count() {
        bail!("{} attend {} numéros distincts, reçu {}", game, game.pick_count(), sorted.len());
    }
    let domain = game.domain();
    if let Some(&n) = sorted.iter().find(|&&n| !domain.contains(n)) {
        bail!("Numéro {} hors limites (1-{})", n, domain.max_number());
    }
    let report = score_combination(&sorted, game);
    let label = sorted.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" - ");
    display::display_popularity(&label, &report);
    Ok(())
}

fn cmd_validate(
    conn: &Connection,
    game: Game,
    window: Option<u32>,
    pool: usize,
    trials: Option<usize>,
    seed: Option<u64>,
    mut config: EngineConfig,
) -> Result<()> {
    let draws = load_history(conn, game, window)?;
    let domain = game.domain();
    if let Some(trials) = trials {
        config.validation.trials = trials;
    }
    if let Some(seed) = seed {
        config.validation.seed = seed;
    }

    let learned = learned_weights(conn, game)?;
    let ranking = score(&draws, domain, &config.analysis, learned.as_ref());
    let preferred: Vec<u8> = ranking.ranked_numbers().into_iter().take(pool).collect();
    println!("\nPool préféré : {:?}", preferred);

    let report = run_validation(&preferred, &draws, domain, &config.validation);
    display::display_validation(&report);
    Ok(())
}

fn cmd_backtest(conn: &Connection, game: Game, last: usize, seed: Option<u64>) -> Result<()> {
    let draws = load_history(conn, game, None)?;
    let domain = game.domain();
    let voters = all_voters();
    let seed = seed.unwrap_or_else(date_seed);
    let results = backtest_all(&voters, &draws, domain, last, seed, true)?;
    display::display_backtest(&results, theoretical_mean(domain), domain.pick_count());
    Ok(())
}

fn cmd_prizes(conn: &Connection, game: Game, strategies: &[ExtraStrategy], config: &EngineConfig) -> Result<()> {
    let draws = load_history(conn, game, None)?;
    let strategies = if strategies.is_empty() {
        ExtraStrategy::ALL.to_vec()
    } else {
        strategies.to_vec()
    };

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Simulation sur {} tirages...", config.prizes.draws.min(draws.len())));
    pb.enable_steady_tick(Duration::from_millis(120));
    let reports = simulate_prizes(&draws, game, &config.prizes, &strategies);
    pb.finish_and_clear();

    display::display_prizes(&reports?, &config.prizes);
    Ok(())
}

fn cmd_learn(
    conn: &Connection,
    path: &Path,
    game: Game,
    mode: LearningMode,
    seconds: Option<u64>,
    config: EngineConfig,
) -> Result<()> {
    let history = load_history(conn, game, None)?;

    // connexion dédiée : le thread d'apprentissage est l'unique écrivain des poids
    let memory_conn = open_db(path)?;
    let memory = Arc::new(SqliteWeights::new(memory_conn, config.learning.learning_rate));

    let registry = LearningRegistry::new();
    let params = LoopParams {
        game,
        mode,
        config: config.learning,
        analysis: config.analysis,
    };
    let Some(handle) = spawn_learning_loop(history, params, memory.clone(), &registry)? else {
        println!("Un apprentissage {}/{} est déjà en cours.", game, mode);
        return Ok(());
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("apprentissage {}/{}", game, mode));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while !handle.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            handle.cancel();
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let summary = handle.join().context("Boucle d'apprentissage interrompue")?;
    spinner.finish_and_clear();

    display::display_loop_summary(&summary);
    let vector = memory.get_weights(game, mode)?;
    display::display_weights(&format!("Poids {}/{}", game, mode), &vector);
    Ok(())
}

fn cmd_weights(
    path: &Path,
    game: Game,
    export: Option<&Path>,
    import: Option<&Path>,
    config: &EngineConfig,
) -> Result<()> {
    let memory = SqliteWeights::new(open_db(path)?, config.learning.learning_rate);

    if let Some(file) = import {
        let snapshot = load_snapshot(file)?;
        let restored = memory.restore(&snapshot)?;
        println!("{} vecteurs de poids importés depuis {}", restored, file.display());
        return Ok(());
    }

    if let Some(file) = export {
        let snapshot = memory.snapshot(&[Game::Primitiva, Game::Bonoloto, Game::Euromillones, Game::ElGordo])?;
        save_snapshot(&snapshot, file)?;
        println!("{} vecteurs de poids exportés vers {}", snapshot.0.len(), file.display());
        return Ok(());
    }

    for mode in LearningMode::ALL {
        let vector = memory.get_weights(game, mode)?;
        display::display_weights(&format!("Poids {}/{}", game, mode), &vector);
    }
    Ok(())
}
