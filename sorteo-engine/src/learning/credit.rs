use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Une affectation de crédit : la part de récompense attribuée à chaque méthode
/// (nombre de numéros trouvés) et la récompense totale associée.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditUpdate {
    pub contributions: BTreeMap<String, f64>,
    pub reward: f64,
}

impl CreditUpdate {
    pub fn total(&self) -> f64 {
        self.contributions
            .values()
            .filter(|c| c.is_finite() && **c > 0.0)
            .sum()
    }
}

/// Regroupe les mises à jour par lots de taille fixe avant de les pousser.
/// Taille 1 = mise à jour immédiate.
///
/// Un lot refusé par la mémoire est remis en file via `requeue` et repart,
/// tel quel, avant tout nouveau lot.
#[derive(Debug, Clone)]
pub struct CreditBatcher {
    batch_size: usize,
    pending: Vec<CreditUpdate>,
    unsent: VecDeque<CreditUpdate>,
}

impl CreditBatcher {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            unsent: VecDeque::new(),
        }
    }

    /// Lot déjà moyenné dont l'écriture a échoué.
    pub fn requeue(&mut self, update: CreditUpdate) {
        self.unsent.push_back(update);
    }

    /// Plus ancien lot en attente de réémission.
    pub fn next_unsent(&mut self) -> Option<CreditUpdate> {
        self.unsent.pop_front()
    }

    /// Remet un lot en tête (nouvel échec de réémission).
    pub fn restore_unsent(&mut self, update: CreditUpdate) {
        self.unsent.push_front(update);
    }

    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    /// Tout ce qui reste à écrire à l'arrêt : lots refusés puis lot partiel.
    pub fn drain_all(&mut self) -> Vec<CreditUpdate> {
        let mut out: Vec<CreditUpdate> = self.unsent.drain(..).collect();
        out.extend(self.flush());
        out
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ajoute une itération ; rend la moyenne du lot quand il est plein.
    pub fn push(&mut self, update: CreditUpdate) -> Option<CreditUpdate> {
        self.pending.push(update);
        if self.pending.len() >= self.batch_size {
            self.flush()
        } else {
            None
        }
    }

    /// Moyenne par méthode (méthode absente d'une itération = 0) puis vidage.
    pub fn flush(&mut self) -> Option<CreditUpdate> {
        if self.pending.is_empty() {
            return None;
        }
        let n = self.pending.len() as f64;
        let mut contributions: BTreeMap<String, f64> = BTreeMap::new();
        let mut reward = 0.0;
        for update in self.pending.drain(..) {
            for (name, c) in update.contributions {
                *contributions.entry(name).or_insert(0.0) += c;
            }
            reward += update.reward;
        }
        for c in contributions.values_mut() {
            *c /= n;
        }
        Some(CreditUpdate {
            contributions,
            reward: reward / n,
        })
    }
}
