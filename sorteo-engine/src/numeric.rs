//! Approximations numériques partagées par les analyseurs et le validateur.

use std::f64::consts::PI;

// Abramowitz–Stegun 26.2.17
const B0: f64 = 0.2316419;
const B1: f64 = 0.31938153;
const B2: f64 = -0.356563782;
const B3: f64 = 1.781477937;
const B4: f64 = -1.821255978;
const B5: f64 = 1.330274429;

/// Densité de la loi normale centrée réduite.
pub fn normal_pdf(z: f64) -> f64 {
    (-z * z / 2.0).exp() / (2.0 * PI).sqrt()
}

/// P(Z > z) pour Z ~ N(0,1), approximation rationnelle. Bornée à [0,1].
pub fn normal_upper_tail(z: f64) -> f64 {
    if !z.is_finite() {
        return if z > 0.0 { 0.0 } else { 1.0 };
    }
    if z < 0.0 {
        return 1.0 - normal_upper_tail(-z);
    }
    let t = 1.0 / (1.0 + B0 * z);
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));
    (normal_pdf(z) * poly).clamp(0.0, 1.0)
}

/// p-value bilatérale pour un score z.
pub fn two_sided_p(z: f64) -> f64 {
    (2.0 * normal_upper_tail(z.abs())).clamp(0.0, 1.0)
}

/// p-value du chi-deux par la transformation de Wilson–Hilferty.
pub fn chi_square_p_value(chi_square: f64, df: f64) -> f64 {
    if df <= 0.0 || !chi_square.is_finite() || chi_square <= 0.0 {
        return 1.0;
    }
    let a = 2.0 / (9.0 * df);
    let z = ((chi_square / df).powf(1.0 / 3.0) - (1.0 - a)) / a.sqrt();
    normal_upper_tail(z)
}

const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// ln Γ(x) par l'approximation de Lanczos (g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let mut a = LANCZOS[0];
    for (i, &c) in LANCZOS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// ln B(a, b)
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance de population (diviseur n).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Variance d'échantillon (diviseur n-1).
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Division gardée : `fallback` si le dénominateur est nul ou le résultat non fini.
pub fn safe_div(num: f64, den: f64, fallback: f64) -> f64 {
    if den == 0.0 {
        return fallback;
    }
    let r = num / den;
    if r.is_finite() { r } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_tail_known_values() {
        assert!((normal_upper_tail(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_upper_tail(1.96) - 0.025).abs() < 1e-4);
        assert!((normal_upper_tail(-1.96) - 0.975).abs() < 1e-4);
        assert!(normal_upper_tail(10.0) < 1e-12);
    }

    #[test]
    fn test_upper_tail_bounds() {
        for z in [-50.0, -3.0, 0.5, 3.0, 50.0, f64::INFINITY, f64::NEG_INFINITY] {
            let p = normal_upper_tail(z);
            assert!((0.0..=1.0).contains(&p), "p({z}) = {p}");
        }
    }

    #[test]
    fn test_chi_square_p_value_df1() {
        // χ²(1) = 3.841 ↔ p = 0.05
        let p = chi_square_p_value(3.841, 1.0);
        assert!((p - 0.05).abs() < 0.01, "p = {p}");
        assert_eq!(chi_square_p_value(0.0, 1.0), 1.0);
        assert!(chi_square_p_value(30.0, 1.0) < 0.001);
    }

    #[test]
    fn test_ln_gamma_factorials() {
        assert!(ln_gamma(1.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn test_ln_beta_uniform() {
        // B(1,1) = 1
        assert!(ln_beta(1.0, 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_variance_helpers() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((mean(&v) - 2.5).abs() < 1e-12);
        assert!((variance(&v) - 1.25).abs() < 1e-12);
        assert!((sample_variance(&v) - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(variance(&[]), 0.0);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 0.0, 7.0), 7.0);
        assert_eq!(safe_div(1.0, 2.0, 7.0), 0.5);
    }
}
