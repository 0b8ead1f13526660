use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sorteo_db::models::{Domain, Draw, Game};

use sorteo_engine::analysis::bias::detect_bias;
use sorteo_engine::analysis::periodicity::detect_periodicity;
use sorteo_engine::analysis::{make_test_draws, AnalysisConfig, Method};
use sorteo_engine::builder::build_combination;
use sorteo_engine::convergence::score;
use sorteo_engine::coverage::{coverage_design, wheel_design};
use sorteo_engine::learning::runner::{spawn_learning_loop, LearningRegistry, LoopParams, StopReason};
use sorteo_engine::learning::voters::wheel_pool;
use sorteo_engine::learning::{run_learning_step, LearnerState, LearningConfig, LearningMode};
use sorteo_engine::memory::{InMemoryWeights, NoopMemory, WeightMemory};
use sorteo_engine::popularity::{score_combination, PenaltyKind};
use sorteo_engine::tickets::{assign_extras, simulate_prizes, ExtraStrategy, PrizeConfig};
use sorteo_engine::validation::{run_validation, ValidationConfig};

fn domain_49() -> Domain {
    Domain::new(49, 6).unwrap()
}

/// Remplace `from` par le premier numéro absent du tirage.
fn swap_out(draw: &mut Draw, from: u8, domain: Domain) {
    if let Some(pos) = draw.numbers.iter().position(|&n| n == from) {
        let replacement = domain
            .numbers()
            .find(|&n| n != from && !draw.contains(n))
            .unwrap();
        draw.numbers[pos] = replacement;
        draw.numbers.sort();
    }
}

fn force_in(draw: &mut Draw, number: u8, slot: usize) {
    if !draw.contains(number) {
        let slot = slot % draw.numbers.len();
        draw.numbers[slot] = number;
        draw.numbers.sort();
    }
}

/// 200 tirages où le 7 sort avec une probabilité double de k/N.
fn history_with_hot_seven() -> Vec<Draw> {
    let domain = domain_49();
    let mut draws = make_test_draws(200, domain, 2024);
    let mut rng = StdRng::seed_from_u64(7);
    let p = 2.0 * domain.uniform_rate();
    for draw in &mut draws {
        if rng.random::<f64>() < p {
            let slot = rng.random_range(0..domain.pick_count());
            force_in(draw, 7, slot);
        } else {
            swap_out(draw, 7, domain);
        }
    }
    draws
}

#[test]
fn injected_bias_is_detected_and_ranked() {
    let domain = domain_49();
    let draws = history_with_hot_seven();

    let bias = detect_bias(&draws, domain);
    let seven = &bias.numbers[6];
    assert_eq!(seven.number, 7);
    assert!(seven.p_value < 0.05, "p = {}", seven.p_value);
    assert!(seven.significance.is_significant());
    assert!(seven.bias > 0.0);

    let total: u32 = bias.numbers.iter().map(|b| b.observed).sum();
    assert_eq!(total as usize, draws.len() * domain.pick_count());

    let ranking = score(&draws, domain, &AnalysisConfig::default(), None);
    let rank = ranking.rank_of(7).unwrap();
    assert!(rank < domain.size() / 4, "rang du 7 : {}", rank);
}

#[test]
fn embedded_period_seven_is_found() {
    let domain = domain_49();
    let len = 210;
    let mut draws = make_test_draws(len, domain, 99);
    for (i, draw) in draws.iter_mut().enumerate() {
        // t = position chronologique, la plus ancienne à 0
        let t = len - 1 - i;
        if t % 7 == 0 {
            force_in(draw, 13, t);
        } else {
            swap_out(draw, 13, domain);
        }
    }

    let report = detect_periodicity(&draws, domain, 30);
    assert!(report.sufficient);
    let signal = &report.signals[12];
    assert_eq!(signal.number, 13);
    assert!((signal.period as i64 - 7).abs() <= 1, "période {}", signal.period);
    assert!(signal.confidence > 0.5, "confiance {}", signal.confidence);
}

#[test]
fn coverage_with_tiny_pool_is_padded() {
    let domain = domain_49();
    let mut rng = StdRng::seed_from_u64(5);
    let combinations = coverage_design(&[3, 9], 4, domain, &mut rng);
    assert_eq!(combinations.len(), 4);
    for c in &combinations {
        assert_eq!(c.numbers.len(), 6);
        assert!(c.numbers.contains(&3) && c.numbers.contains(&9));
        let mut unique = c.numbers.clone();
        unique.dedup();
        assert_eq!(unique.len(), 6);
    }

    // pool plus petit que k : aucune grille possible, pas d'erreur
    assert!(wheel_design(&[1, 2, 3], 3, 3, 10, 6).unwrap().is_empty());
}

#[test]
fn built_combinations_respect_bounds() {
    for (game, seed) in [(Game::Primitiva, 1u64), (Game::Euromillones, 2), (Game::ElGordo, 3)] {
        let domain = game.domain();
        let draws = make_test_draws(120, domain, seed);
        let ranking = score(&draws, domain, &AnalysisConfig::default(), None);
        let mut rng = StdRng::seed_from_u64(seed);
        let c = build_combination(&ranking.ranked_numbers(), &draws, domain, &mut rng);

        assert_eq!(c.numbers.len(), domain.pick_count());
        assert!(c.numbers.iter().all(|&n| domain.contains(n)));
        assert!(c.numbers.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn learning_step_is_reproducible() {
    let draws = make_test_draws(160, domain_49(), 11);
    let config = LearningConfig::default();

    for mode in LearningMode::ALL {
        let mut a = LearnerState::new(mode, &config, AnalysisConfig::default());
        let mut b = LearnerState::new(mode, &config, AnalysisConfig::default());
        let first = run_learning_step(&draws, Game::Bonoloto, &config, &mut a, &NoopMemory).unwrap();
        let second = run_learning_step(&draws, Game::Bonoloto, &config, &mut b, &NoopMemory).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
    }
}

#[test]
fn monte_carlo_is_reproducible() {
    let domain = domain_49();
    let draws = make_test_draws(100, domain, 21);
    let preferred = [4, 8, 15, 16, 23, 42, 7, 19];
    let config = ValidationConfig {
        trials: 300,
        window: 40,
        seed: 20240101,
    };
    let a = run_validation(&preferred, &draws, domain, &config);
    let b = run_validation(&preferred, &draws, domain, &config);
    assert_eq!(a, b);
    assert_eq!(a.trials, 300);
    assert!(a.p_value >= 0.0 && a.p_value <= 1.0);
}

#[test]
fn first_six_numbers_are_unpopular() {
    let report = score_combination(&[1, 2, 3, 4, 5, 6], Game::Primitiva);
    assert!(report.score < 50, "score {}", report.score);
    assert!(report.has(PenaltyKind::Famous));
    assert!(report.has(PenaltyKind::Consecutive));
    assert!(report.has(PenaltyKind::AllLow));
}

#[test]
fn learned_weights_flow_back_into_scoring() {
    let domain = Game::Primitiva.domain();
    let draws = make_test_draws(150, domain, 31);
    let memory = Arc::new(InMemoryWeights::default());
    let registry = LearningRegistry::new();

    let config = LearningConfig {
        max_iterations: Some(3),
        ..LearningConfig::default()
    };
    let params = LoopParams {
        game: Game::Primitiva,
        mode: LearningMode::Analyzers,
        config,
        analysis: AnalysisConfig::default(),
    };
    let handle = spawn_learning_loop(draws.clone(), params, memory.clone(), &registry)
        .unwrap()
        .expect("aucune boucle active");
    let summary = handle.join().unwrap();
    assert_eq!(summary.stop_reason, StopReason::MaxIterations);
    assert_eq!(summary.iterations, 3);

    let learned = memory.get_weights(Game::Primitiva, LearningMode::Analyzers).unwrap();
    assert_eq!(learned.updates, 3);
    for m in Method::ALL {
        assert!(learned.get(m.name()).is_some());
    }

    let ranking = score(&draws, domain, &AnalysisConfig::default(), Some(&learned));
    assert!((ranking.weights.sum() - 1.0).abs() < 1e-9);
    assert_eq!(ranking.scores.len(), 49);
}

#[test]
fn wheel_tickets_carry_reintegros() {
    let game = Game::Primitiva;
    let domain = game.domain();
    let draws: Vec<Draw> = make_test_draws(80, domain, 41)
        .into_iter()
        .enumerate()
        .map(|(i, mut d)| {
            d.extras = vec![(i % 49) as u8 + 1, (i * 7 % 10) as u8];
            d
        })
        .collect();

    let pool = wheel_pool(&draws, domain, 12);
    let mut tickets = wheel_design(&pool, 3, 3, 15, domain.pick_count()).unwrap();
    assert!(!tickets.is_empty() && tickets.len() <= 15);
    assign_extras(&mut tickets, &draws, game, ExtraStrategy::Interleaved).unwrap();
    assert!(tickets.iter().all(|t| t.extra.is_some_and(|r| r <= 9)));

    let config = PrizeConfig {
        draws: 5,
        pool: 10,
        tickets: 6,
        ..PrizeConfig::default()
    };
    let a = simulate_prizes(&draws, game, &config, &ExtraStrategy::ALL).unwrap();
    let b = simulate_prizes(&draws, game, &config, &ExtraStrategy::ALL).unwrap();
    assert_eq!(a, b);
    assert!(a.iter().all(|r| r.draws == 5 && r.spent <= 30));
}
