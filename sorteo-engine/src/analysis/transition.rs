use serde::Serialize;

use sorteo_db::models::{Domain, Draw};

use crate::numeric::safe_div;

/// Historique minimal pour le second ordre.
pub const SECOND_ORDER_MIN_DRAWS: usize = 100;
const Z_CRITICAL: f64 = 1.96;

/// Comptages des quatre motifs (présent/absent → présent/absent).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TransitionCounts {
    pub appeared_appeared: u32,
    pub appeared_absent: u32,
    pub absent_appeared: u32,
    pub absent_absent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirstOrder {
    pub number: u8,
    pub counts: TransitionCounts,
    /// P(présent | présent au tirage précédent)
    pub p_after_appeared: f64,
    /// P(présent | absent au tirage précédent)
    pub p_after_absent: f64,
    pub z: f64,
    pub significant: bool,
    /// Probabilité prédite pour le prochain tirage selon l'état courant.
    pub predicted: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecondOrder {
    pub number: u8,
    /// Contextes indexés par (avant-dernier, dernier) : 0=AA,1=AP,2=PA,3=PP (A=absent, P=présent).
    pub appearances: [u32; 4],
    pub totals: [u32; 4],
    pub context: usize,
    pub predicted: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub first_order: Vec<FirstOrder>,
    pub second_order: Option<Vec<SecondOrder>>,
}

impl TransitionReport {
    pub fn significant_fraction(&self) -> f64 {
        if self.first_order.is_empty() {
            return 0.0;
        }
        let n = self.first_order.iter().filter(|t| t.significant).count();
        n as f64 / self.first_order.len() as f64
    }

    /// Probabilité prédite combinée ; le second ordre n'est retenu
    /// que si son contexte courant a au moins 10 observations.
    pub fn predicted(&self, number: u8) -> Option<f64> {
        let idx = (number as usize).checked_sub(1)?;
        let first = self.first_order.get(idx)?.predicted;
        let second = self
            .second_order
            .as_ref()
            .and_then(|so| so.get(idx))
            .filter(|s| s.totals[s.context] >= 10)
            .map(|s| s.predicted);
        Some(match second {
            Some(p) => (first + p) / 2.0,
            None => first,
        })
    }
}

/// Test z de deux proportions avec erreur standard poolée.
pub fn two_proportion_z(hits_a: u32, n_a: u32, hits_b: u32, n_b: u32) -> f64 {
    if n_a == 0 || n_b == 0 {
        return 0.0;
    }
    let p_a = hits_a as f64 / n_a as f64;
    let p_b = hits_b as f64 / n_b as f64;
    let pooled = (hits_a + hits_b) as f64 / (n_a + n_b) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n_a as f64 + 1.0 / n_b as f64)).sqrt();
    safe_div(p_a - p_b, se, 0.0)
}

/// Chaîne de Markov présence/absence du premier ordre pour chaque numéro.
/// draws[0] = le plus récent ; la paire (draws[t+1], draws[t]) est une transition ancien → récent.
pub fn first_order(draws: &[Draw], domain: Domain) -> Vec<FirstOrder> {
    let rate = domain.uniform_rate();
    domain
        .numbers()
        .map(|number| {
            let mut counts = TransitionCounts::default();
            for pair in draws.windows(2) {
                let next = pair[0].contains(number);
                let prev = pair[1].contains(number);
                match (prev, next) {
                    (true, true) => counts.appeared_appeared += 1,
                    (true, false) => counts.appeared_absent += 1,
                    (false, true) => counts.absent_appeared += 1,
                    (false, false) => counts.absent_absent += 1,
                }
            }

            let n_after_appeared = counts.appeared_appeared + counts.appeared_absent;
            let n_after_absent = counts.absent_appeared + counts.absent_absent;
            let p_after_appeared = safe_div(counts.appeared_appeared as f64, n_after_appeared as f64, rate);
            let p_after_absent = safe_div(counts.absent_appeared as f64, n_after_absent as f64, rate);
            let z = two_proportion_z(
                counts.appeared_appeared,
                n_after_appeared,
                counts.absent_appeared,
                n_after_absent,
            );

            let predicted = match draws.first() {
                Some(latest) if latest.contains(number) => p_after_appeared,
                Some(_) => p_after_absent,
                None => rate,
            };

            FirstOrder {
                number,
                counts,
                p_after_appeared,
                p_after_absent,
                z,
                significant: z.abs() > Z_CRITICAL,
                predicted,
            }
        })
        .collect()
}

fn context_index(before_last: bool, last: bool) -> usize {
    (before_last as usize) * 2 + last as usize
}

/// Second ordre : conditionné par la paire des deux états précédents.
pub fn second_order(draws: &[Draw], domain: Domain) -> Option<Vec<SecondOrder>> {
    if draws.len() < SECOND_ORDER_MIN_DRAWS {
        return None;
    }
    let rate = domain.uniform_rate();
    Some(
        domain
            .numbers()
            .map(|number| {
                let mut appearances = [0u32; 4];
                let mut totals = [0u32; 4];
                for triple in draws.windows(3) {
                    let ctx = context_index(triple[2].contains(number), triple[1].contains(number));
                    totals[ctx] += 1;
                    if triple[0].contains(number) {
                        appearances[ctx] += 1;
                    }
                }
                let context = context_index(draws[1].contains(number), draws[0].contains(number));
                SecondOrder {
                    number,
                    appearances,
                    totals,
                    context,
                    predicted: safe_div(appearances[context] as f64, totals[context] as f64, rate),
                }
            })
            .collect(),
    )
}

pub fn analyze_transitions(draws: &[Draw], domain: Domain) -> TransitionReport {
    TransitionReport {
        first_order: first_order(draws, domain),
        second_order: second_order(draws, domain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::make_test_draws;

    fn domain() -> Domain {
        Domain::new(49, 6).unwrap()
    }

    #[test]
    fn test_counts_cover_all_pairs() {
        let draws = make_test_draws(50, domain(), 12);
        for t in first_order(&draws, domain()) {
            let c = t.counts;
            let total = c.appeared_appeared + c.appeared_absent + c.absent_appeared + c.absent_absent;
            assert_eq!(total, 49);
        }
    }

    #[test]
    fn test_empty_and_single_draw_neutral() {
        let rate = domain().uniform_rate();
        for draws in [vec![], make_test_draws(1, domain(), 1)] {
            let report = analyze_transitions(&draws, domain());
            assert_eq!(report.first_order.len(), 49);
            assert!(report.second_order.is_none());
            for t in &report.first_order {
                assert!(!t.significant);
                assert!((t.p_after_absent - rate).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_alternating_number_is_significant() {
        let mut draws = make_test_draws(120, domain(), 14);
        // Le 20 alterne strictement présent/absent
        for (t, d) in draws.iter_mut().enumerate() {
            if let Some(pos) = d.numbers.iter().position(|&n| n == 20) {
                let replacement = (1..=49u8).find(|n| *n != 20 && !d.numbers.contains(n)).unwrap();
                d.numbers[pos] = replacement;
            }
            if t % 2 == 0 {
                d.numbers[0] = 20;
            }
        }
        let report = analyze_transitions(&draws, domain());
        let twenty = &report.first_order[19];
        assert_eq!(twenty.p_after_appeared, 0.0);
        assert_eq!(twenty.p_after_absent, 1.0);
        assert!(twenty.significant);
        // draws[0] contient le 20 → prochain tirage prédit absent
        assert_eq!(twenty.predicted, 0.0);

        let second = report.second_order.as_ref().unwrap();
        assert_eq!(second[19].context, context_index(false, true));
        assert_eq!(report.predicted(20), Some(0.0));
    }

    #[test]
    fn test_two_proportion_z_degenerate() {
        assert_eq!(two_proportion_z(0, 0, 3, 10), 0.0);
        assert_eq!(two_proportion_z(0, 10, 0, 10), 0.0);
        assert!(two_proportion_z(9, 10, 1, 10) > 1.96);
    }

    #[test]
    fn test_second_order_requires_history() {
        assert!(second_order(&make_test_draws(99, domain(), 3), domain()).is_none());
        let so = second_order(&make_test_draws(100, domain(), 3), domain()).unwrap();
        for s in &so {
            assert_eq!(s.totals.iter().sum::<u32>(), 98);
        }
    }
}
