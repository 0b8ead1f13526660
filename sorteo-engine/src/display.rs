use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use sorteo_db::models::{Domain, Draw, Game, WeightVector};

use crate::analysis::{AnalysisBundle, ExtraFrequencies, Method};
use crate::builder::Combination;
use crate::convergence::Ranking;
use crate::learning::backtest::BacktestResult;
use crate::learning::runner::LoopSummary;
use crate::popularity::PopularityReport;
use crate::tickets::{PrizeCategory, PrizeConfig, PrizeReport};
use crate::validation::ValidationReport;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn join_numbers(numbers: &[u8]) -> String {
    numbers.iter().map(|n| format!("{:2}", n)).collect::<Vec<_>>().join(" - ")
}

pub fn display_draws(draws: &[Draw], game: Game) {
    if draws.is_empty() {
        println!("Aucun tirage {} à afficher.", game);
        return;
    }

    let mut table = new_table();
    table.set_header(vec!["Tirage", "Date", "Numéros", "Complémentaires"]);
    for draw in draws {
        let mut numbers = draw.numbers.clone();
        numbers.sort();
        table.add_row(vec![
            draw.draw_id.clone(),
            draw.date.clone(),
            join_numbers(&numbers),
            join_numbers(&draw.extras),
        ]);
    }
    println!("{table}");
}

pub fn display_analysis(bundle: &AnalysisBundle, domain: Domain) {
    println!("\n== Analyse sur {} tirages (N={}, k={}) ==\n", bundle.bias.draws, domain.max_number(), domain.pick_count());

    println!(
        "Chi² global : {:.2} (p = {:.4})",
        bundle.bias.global_chi_square, bundle.bias.global_p_value
    );
    let mut table = new_table();
    table.set_header(vec!["Numéro", "Observé", "Attendu", "Biais", "p", "Signif."]);
    let mut significant: Vec<_> = bundle.bias.numbers.iter().filter(|b| b.significance.is_significant()).collect();
    significant.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap_or(std::cmp::Ordering::Equal));
    for b in &significant {
        let color = if b.bias > 0.0 { Color::Green } else { Color::Red };
        table.add_row(vec![
            Cell::new(b.number),
            Cell::new(b.observed),
            Cell::new(format!("{:.1}", b.expected)),
            Cell::new(format!("{:+.2}", b.bias)).fg(color),
            Cell::new(format!("{:.4}", b.p_value)),
            Cell::new(b.significance.to_string()),
        ]);
    }
    if significant.is_empty() {
        println!("  Aucun numéro significativement biaisé.");
    } else {
        println!("{table}");
    }

    if bundle.periodicity.sufficient {
        let mut signals: Vec<_> = bundle.periodicity.signals.iter().filter(|s| s.confidence > 0.5).collect();
        signals.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        println!("\n── Périodicités (confiance > 0,5) : {} ──", signals.len());
        let mut table = new_table();
        table.set_header(vec!["Numéro", "Période", "Amplitude", "Pic dans", "Confiance"]);
        for s in signals.iter().take(10) {
            table.add_row(vec![
                s.number.to_string(),
                s.period.to_string(),
                format!("{:.3}", s.amplitude),
                format!("{} tirages", s.draws_until_peak),
                format!("{:.2}", s.confidence),
            ]);
        }
        if !signals.is_empty() {
            println!("{table}");
        }
    } else {
        println!("\nPériodicité : historique insuffisant.");
    }

    let transitions: Vec<_> = bundle.transition.first_order.iter().filter(|t| t.significant).collect();
    println!("\n── Transitions significatives : {} ──", transitions.len());
    for t in transitions.iter().take(10) {
        println!(
            "  {:2} : P(après sortie) = {:.3}, P(après absence) = {:.3}, z = {:+.2}",
            t.number, t.p_after_appeared, t.p_after_absent, t.z
        );
    }

    let e = &bundle.entropy;
    if e.sufficient {
        println!(
            "\nEntropie ({} derniers) : {:.3} / {:.3} bits (ratio {:.3}, référence {:.3} ± {:.3}){}",
            e.window,
            e.entropy,
            e.max_entropy,
            e.ratio,
            e.reference_mean,
            e.reference_sd,
            if e.low_entropy { "  FENÊTRE BASSE ENTROPIE" } else { "" }
        );
        println!("Concentrés : {}", join_numbers(&e.concentrated));
    }
}

pub fn display_ranking(ranking: &Ranking, top: usize) {
    println!("\n== Poids des méthodes ==");
    for (method, w) in ranking.weights.iter() {
        let bar = "█".repeat((w * 30.0).round() as usize);
        println!(
            "  {:12} {:.3} (stat. {:.3}) {}",
            method.name(),
            w,
            ranking.statistical.get(method),
            bar
        );
    }

    println!("\n── Top {} ──", top);
    let mut table = new_table();
    let mut header = vec!["#".to_string(), "Numéro".to_string(), "Score".to_string()];
    header.extend(Method::ALL.iter().map(|m| m.short().to_string()));
    header.push("Facteurs".to_string());
    header.push("Tags".to_string());
    table.set_header(header);

    for (i, s) in ranking.scores.iter().take(top).enumerate() {
        let color = if s.active_factors >= 3 {
            Color::Green
        } else if s.active_factors >= 1 {
            Color::Yellow
        } else {
            Color::White
        };
        let mut row = vec![
            Cell::new(i + 1),
            Cell::new(s.number).fg(color),
            Cell::new(format!("{:.1}", s.score)).fg(color),
        ];
        row.extend(s.sub_scores.iter().map(|v| Cell::new(format!("{:.0}", v))));
        row.push(Cell::new(s.active_factors));
        row.push(Cell::new(&s.tags));
        table.add_row(row);
    }
    println!("{table}");
}

pub fn display_combinations(combinations: &[Combination], extras: &[ExtraFrequencies]) {
    let with_extra = combinations.iter().any(|c| c.extra.is_some());
    let mut table = new_table();
    let mut header = vec!["#", "Combinaison"];
    if with_extra {
        header.push("R");
    }
    header.extend(["Somme", "Anti-popularité", "Pénalités"]);
    table.set_header(header);
    for (i, c) in combinations.iter().enumerate() {
        let (score, penalties) = match &c.popularity {
            Some(p) => (
                Cell::new(p.score).fg(popularity_color(p.score)),
                p.penalties.iter().map(|x| x.kind.label()).collect::<Vec<_>>().join(", "),
            ),
            None => (Cell::new("-"), String::new()),
        };
        let mut row = vec![Cell::new(i + 1), Cell::new(c.to_string()).fg(Color::Green)];
        if with_extra {
            row.push(Cell::new(c.extra.map_or("-".to_string(), |r| r.to_string())).fg(Color::Cyan));
        }
        row.extend([Cell::new(c.sum()), score, Cell::new(penalties)]);
        table.add_row(row);
    }
    println!("{table}");

    for family in extras.iter().filter(|f| !f.counts.is_empty()) {
        let list = family
            .counts
            .iter()
            .map(|(n, c)| format!("{} ({}×)", n, c))
            .collect::<Vec<_>>()
            .join(", ");
        println!("{} les plus fréquents : {}", capitalize(family.label), list);
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn popularity_color(score: u8) -> Color {
    match score {
        70..=100 => Color::Green,
        40..=69 => Color::Yellow,
        _ => Color::Red,
    }
}

pub fn display_popularity(label: &str, report: &PopularityReport) {
    println!("\n{} → score anti-popularité {}/100", label, report.score);
    if report.penalties.is_empty() {
        println!("  Aucune pénalité.");
        return;
    }
    let mut table = new_table();
    table.set_header(vec!["Règle", "Points"]);
    for p in &report.penalties {
        table.add_row(vec![Cell::new(p.kind.label()), Cell::new(format!("-{}", p.points)).fg(Color::Red)]);
    }
    println!("{table}");
}

pub fn display_validation(report: &ValidationReport) {
    println!("\n== Validation Monte Carlo ({} essais) ==\n", report.trials);
    let mut table = new_table();
    table.set_header(vec!["", "Moyenne", "Variance"]);
    table.add_row(vec![
        "Méthode".to_string(),
        format!("{:.3}", report.method_mean),
        format!("{:.3}", report.method_variance),
    ]);
    table.add_row(vec![
        "Hasard".to_string(),
        format!("{:.3}", report.random_mean),
        format!("{:.3}", report.random_variance),
    ]);
    println!("{table}");
    println!("  IC 95 % méthode : [{:.3}, {:.3}]", report.ci_low, report.ci_high);
    println!("  z = {:.3}, p = {:.4}, amélioration {:+.1} %", report.z, report.p_value, report.improvement_pct);
    if report.better_than_random {
        println!("  Verdict : meilleure que le hasard (p < 0,05)");
    } else {
        println!("  Verdict : pas de différence significative avec le hasard");
    }
}

pub fn display_backtest(results: &[BacktestResult], theoretical: f64, k: usize) {
    println!("\n== Backtest walk-forward ==\n");
    let mut table = new_table();
    let mut header = vec!["Votant".to_string()];
    header.extend((0..=k).map(|h| format!("{}ac", h)));
    header.extend(["Moyenne".to_string(), "3ac+".to_string(), "4ac+".to_string()]);
    table.set_header(header);

    let mut sorted: Vec<&BacktestResult> = results.iter().collect();
    sorted.sort_by(|a, b| b.mean_hits.partial_cmp(&a.mean_hits).unwrap_or(std::cmp::Ordering::Equal));
    // la référence aléatoire en dernière ligne
    sorted.sort_by_key(|r| r.baseline);
    for r in sorted {
        let color = if r.baseline {
            Color::DarkGrey
        } else if r.mean_hits > theoretical {
            Color::Green
        } else {
            Color::White
        };
        let name = if r.baseline {
            format!("{} (référence)", r.voter)
        } else {
            r.voter.clone()
        };
        let mut row = vec![Cell::new(name).fg(color)];
        row.extend(r.histogram.iter().map(Cell::new));
        row.push(Cell::new(format!("{:.3}", r.mean_hits)).fg(color));
        row.push(Cell::new(format!("{:.1}%", r.pct_three_plus)));
        row.push(Cell::new(format!("{:.1}%", r.pct_four_plus)));
        table.add_row(row);
    }
    println!("{table}");
    println!("Référence théorique (k²/N) : {:.3}", theoretical);
}

pub fn display_prizes(reports: &[PrizeReport], config: &PrizeConfig) {
    println!(
        "\n== Gains simulés : roue de {} grilles sur un pool de {} ==\n",
        config.tickets, config.pool
    );
    let mut table = new_table();
    let mut header = vec!["Stratégie".to_string(), "Tirages".to_string(), "Dépensé".to_string(), "Gagné".to_string(), "Solde".to_string()];
    header.extend(PrizeCategory::ALL.iter().map(|c| c.label().to_string()));
    table.set_header(header);

    for r in reports {
        let color = if r.balance >= 0 { Color::Green } else { Color::Red };
        let mut row = vec![
            Cell::new(r.strategy.name()),
            Cell::new(r.draws),
            Cell::new(format!("{} €", r.spent)),
            Cell::new(format!("{} €", r.won)),
            Cell::new(format!("{:+} €", r.balance)).fg(color),
        ];
        row.extend(PrizeCategory::ALL.iter().map(|&c| match r.count(c) {
            0 => Cell::new("-"),
            n => Cell::new(n),
        }));
        table.add_row(row);
    }
    println!("{table}");
    println!("Barème fixe : 5+R ≈ 20000 €, 5 ≈ 1500 €, 4 = 48 €, 3 = 8 €, R = 1 € (6 et 6+R variables, comptés 0)");
}

pub fn display_weights(title: &str, vector: &WeightVector) {
    println!("\n── {} ──", title);
    if vector.is_empty() {
        println!("  Aucun poids appris.");
        return;
    }
    let mut table = new_table();
    table.set_header(vec!["Méthode", "Poids", "Contribution"]);
    let mut entries: Vec<_> = vector.weights.iter().collect();
    entries.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (name, weight) in entries {
        let bar = "█".repeat((weight * 30.0).round() as usize);
        table.add_row(vec![name.clone(), format!("{:.4}", weight), bar]);
    }
    println!("{table}");
    println!("  {} mises à jour, récompense moyenne {:.3}", vector.updates, vector.mean_reward);
}

pub fn display_loop_summary(summary: &LoopSummary) {
    println!(
        "\nApprentissage terminé ({:?}) : {} itérations, {} mises à jour, {} échecs",
        summary.stop_reason, summary.iterations, summary.updates, summary.failures
    );
}
