use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use sorteo_db::models::{Draw, Game};

use super::{run_learning_step, LearnerState, LearningConfig, LearningMode};
use crate::analysis::AnalysisConfig;
use crate::memory::WeightMemory;

fn lock_with_recovery<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("verrou {} empoisonné, récupération", name);
            poisoned.into_inner()
        }
    }
}

/// Signal d'annulation coopératif, vérifié une fois par itération.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cv) = &*self.inner;
        *lock_with_recovery(flag, "cancel") = true;
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_with_recovery(&self.inner.0, "cancel")
    }

    /// Attend au plus `timeout` ; rend `true` si l'annulation est arrivée entre-temps.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cv) = &*self.inner;
        let guard = lock_with_recovery(flag, "cancel");
        match cv.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

/// Boucles actives, une au plus par (jeu, mode).
#[derive(Debug, Clone, Default)]
pub struct LearningRegistry {
    active: Arc<Mutex<HashSet<(Game, LearningMode)>>>,
}

impl LearningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_register(&self, game: Game, mode: LearningMode) -> bool {
        lock_with_recovery(&self.active, "registry").insert((game, mode))
    }

    fn release(&self, game: Game, mode: LearningMode) {
        lock_with_recovery(&self.active, "registry").remove(&(game, mode));
    }

    pub fn is_active(&self, game: Game, mode: LearningMode) -> bool {
        lock_with_recovery(&self.active, "registry").contains(&(game, mode))
    }

    pub fn higher_priority_active(&self, game: Game, mode: LearningMode) -> bool {
        lock_with_recovery(&self.active, "registry")
            .iter()
            .any(|&(g, m)| g == game && m.priority() > mode.priority())
    }
}

/// Libère l'entrée du registre même si la boucle panique.
struct Registration {
    registry: LearningRegistry,
    game: Game,
    mode: LearningMode,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.game, self.mode);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Cancelled,
    /// Une boucle de priorité supérieure tourne sur le même jeu.
    Preempted,
    MaxIterations,
    InsufficientHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSummary {
    pub iterations: u64,
    pub updates: u64,
    pub failures: u64,
    pub stop_reason: StopReason,
}

pub struct LearningHandle {
    pub game: Game,
    pub mode: LearningMode,
    token: CancelToken,
    thread: Option<JoinHandle<LoopSummary>>,
}

impl LearningHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub fn join(mut self) -> Result<LoopSummary> {
        let thread = self.thread.take().ok_or_else(|| anyhow!("Boucle déjà jointe"))?;
        thread.join().map_err(|_| anyhow!("La boucle d'apprentissage a paniqué"))
    }
}

impl Drop for LearningHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
        }
    }
}

pub struct LoopParams {
    pub game: Game,
    pub mode: LearningMode,
    pub config: LearningConfig,
    pub analysis: AnalysisConfig,
}

/// Démarre une boucle d'apprentissage sur un thread dédié.
///
/// Rend `Ok(None)` sans rien lancer si une boucle tourne déjà pour ce (jeu, mode).
pub fn spawn_learning_loop(
    history: Vec<Draw>,
    params: LoopParams,
    memory: Arc<dyn WeightMemory>,
    registry: &LearningRegistry,
) -> Result<Option<LearningHandle>> {
    let LoopParams { game, mode, config, analysis } = params;
    if !registry.try_register(game, mode) {
        log::info!("Apprentissage {}/{} déjà actif, démarrage ignoré", game, mode);
        return Ok(None);
    }
    let registration = Registration {
        registry: registry.clone(),
        game,
        mode,
    };

    let token = CancelToken::new();
    let loop_token = token.clone();
    let thread = thread::Builder::new()
        .name(format!("learn-{}-{}", game, mode))
        .spawn(move || {
            let summary = learning_loop(
                &history,
                game,
                mode,
                &config,
                analysis,
                memory.as_ref(),
                &registration.registry,
                &loop_token,
            );
            drop(registration);
            summary
        })
        .context("Impossible de lancer le thread d'apprentissage")?;

    Ok(Some(LearningHandle {
        game,
        mode,
        token,
        thread: Some(thread),
    }))
}

#[allow(clippy::too_many_arguments)]
fn learning_loop(
    history: &[Draw],
    game: Game,
    mode: LearningMode,
    config: &LearningConfig,
    analysis: AnalysisConfig,
    memory: &dyn WeightMemory,
    registry: &LearningRegistry,
    token: &CancelToken,
) -> LoopSummary {
    log::info!("Apprentissage {}/{} démarré sur {} tirages", game, mode, history.len());
    let mut state = LearnerState::new(mode, config, analysis);
    let mut iterations = 0u64;
    let mut updates = 0u64;
    let mut failures = 0u64;
    let backoff = Duration::from_millis(config.backoff_ms);
    let pace = Duration::from_millis(config.pace_ms);

    let stop_reason = loop {
        if token.is_cancelled() {
            break StopReason::Cancelled;
        }
        if registry.higher_priority_active(game, mode) {
            log::info!("Apprentissage {}/{} interrompu : boucle prioritaire active", game, mode);
            break StopReason::Preempted;
        }
        if config.max_iterations.is_some_and(|max| iterations + failures >= max) {
            break StopReason::MaxIterations;
        }

        match run_learning_step(history, game, config, &mut state, memory) {
            Ok(Some(outcome)) => {
                iterations += 1;
                updates += outcome.resent as u64;
                if outcome.flushed.is_some() {
                    updates += 1;
                }
            }
            Ok(None) => {
                log::warn!("Historique trop court pour {}/{} ({} tirages)", game, mode, history.len());
                break StopReason::InsufficientHistory;
            }
            Err(e) => {
                failures += 1;
                log::warn!("Itération {}/{} en échec : {:#}", game, mode, e);
                if token.wait(backoff) {
                    break StopReason::Cancelled;
                }
                continue;
            }
        }

        if !pace.is_zero() && token.wait(pace) {
            break StopReason::Cancelled;
        }
    };

    // lots refusés puis lot partiel en attente
    for update in state.drain() {
        match memory.update(game, mode, &update) {
            Ok(()) => updates += 1,
            Err(e) => log::warn!("Lot {}/{} perdu à l'arrêt : {:#}", game, mode, e),
        }
    }

    log::info!(
        "Apprentissage {}/{} arrêté ({:?}) : {} itérations, {} mises à jour, {} échecs",
        game, mode, stop_reason, iterations, updates, failures
    );
    LoopSummary {
        iterations,
        updates,
        failures,
        stop_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::make_test_draws;
    use crate::learning::credit::CreditUpdate;
    use crate::memory::InMemoryWeights;
    use sorteo_db::models::WeightVector;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn history(n: usize) -> Vec<Draw> {
        make_test_draws(n, Game::Bonoloto.domain(), 71)
    }

    fn params(mode: LearningMode, config: LearningConfig) -> LoopParams {
        LoopParams {
            game: Game::Bonoloto,
            mode,
            config,
            analysis: AnalysisConfig::default(),
        }
    }

    /// Refuse les `failures` premières écritures, compte les écritures réussies.
    struct FlakyMemory {
        failures: AtomicU64,
        stored: AtomicU64,
    }

    impl WeightMemory for FlakyMemory {
        fn get_weights(&self, _game: Game, _mode: LearningMode) -> Result<WeightVector> {
            Ok(WeightVector::default())
        }

        fn update(&self, _game: Game, _mode: LearningMode, _update: &CreditUpdate) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("stockage indisponible")
            }
            self.stored.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_cancel_token_wait() {
        let token = CancelToken::new();
        assert!(!token.wait(Duration::from_millis(5)));
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        assert!(token.wait(Duration::from_secs(10)));
    }

    #[test]
    fn test_runs_to_max_iterations() {
        let memory = Arc::new(InMemoryWeights::default());
        let registry = LearningRegistry::new();
        let config = LearningConfig {
            max_iterations: Some(25),
            ..LearningConfig::default()
        };
        let handle = spawn_learning_loop(history(120), params(LearningMode::Voters, config), memory.clone(), &registry)
            .unwrap()
            .unwrap();
        let summary = handle.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::MaxIterations);
        assert_eq!(summary.iterations, 25);
        // deux lots pleins + le lot partiel vidé à l'arrêt
        assert_eq!(summary.updates, 3);
        assert!(!registry.is_active(Game::Bonoloto, LearningMode::Voters));
        let v = memory.get_weights(Game::Bonoloto, LearningMode::Voters).unwrap();
        assert_eq!(v.updates, 3);
    }

    #[test]
    fn test_duplicate_start_is_noop() {
        let memory: Arc<dyn WeightMemory> = Arc::new(InMemoryWeights::default());
        let registry = LearningRegistry::new();
        let config = LearningConfig {
            pace_ms: 5,
            ..LearningConfig::default()
        };
        let first = spawn_learning_loop(history(120), params(LearningMode::Voters, config.clone()), memory.clone(), &registry)
            .unwrap()
            .unwrap();
        let second = spawn_learning_loop(history(120), params(LearningMode::Voters, config), memory, &registry).unwrap();
        assert!(second.is_none());

        first.cancel();
        let summary = first.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert!(!registry.is_active(Game::Bonoloto, LearningMode::Voters));
    }

    #[test]
    fn test_voters_preempted_by_analyzers() {
        let memory: Arc<dyn WeightMemory> = Arc::new(InMemoryWeights::default());
        let registry = LearningRegistry::new();
        let slow = LearningConfig {
            pace_ms: 20,
            ..LearningConfig::default()
        };
        let analyzers = spawn_learning_loop(history(150), params(LearningMode::Analyzers, slow.clone()), memory.clone(), &registry)
            .unwrap()
            .unwrap();
        let voters = spawn_learning_loop(history(150), params(LearningMode::Voters, slow), memory, &registry)
            .unwrap()
            .unwrap();
        let summary = voters.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Preempted);
        analyzers.cancel();
        assert_eq!(analyzers.join().unwrap().stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let memory = Arc::new(FlakyMemory {
            failures: AtomicU64::new(1),
            stored: AtomicU64::new(0),
        });
        let registry = LearningRegistry::new();
        let config = LearningConfig {
            max_iterations: Some(4),
            backoff_ms: 1,
            ..LearningConfig::default()
        };
        let handle = spawn_learning_loop(history(150), params(LearningMode::Analyzers, config), memory.clone(), &registry)
            .unwrap()
            .unwrap();
        let summary = handle.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::MaxIterations);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.iterations, 3);
        // le lot refusé est réécrit à l'itération suivante
        assert_eq!(summary.updates, 4);
        assert_eq!(memory.stored.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_refused_batches_written_at_stop() {
        let memory = Arc::new(FlakyMemory {
            failures: AtomicU64::new(2),
            stored: AtomicU64::new(0),
        });
        let registry = LearningRegistry::new();
        let config = LearningConfig {
            max_iterations: Some(2),
            backoff_ms: 1,
            ..LearningConfig::default()
        };
        let handle = spawn_learning_loop(history(150), params(LearningMode::Analyzers, config), memory.clone(), &registry)
            .unwrap()
            .unwrap();
        let summary = handle.join().unwrap();
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.updates, 1);
        assert_eq!(memory.stored.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_short_history_stops() {
        let memory: Arc<dyn WeightMemory> = Arc::new(InMemoryWeights::default());
        let registry = LearningRegistry::new();
        let handle = spawn_learning_loop(history(30), params(LearningMode::Voters, LearningConfig::default()), memory, &registry)
            .unwrap()
            .unwrap();
        assert_eq!(handle.join().unwrap().stop_reason, StopReason::InsufficientHistory);
    }
}
