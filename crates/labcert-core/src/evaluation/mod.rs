//! Norm evaluation engine.
//!
//! Decides whether a raw measured value satisfies a parameter's norm. Pure
//! functions only; the verdict is advisory (it pre-fills the within-norm flag
//! in the UI) and the flag persisted on a test result is whatever the
//! evaluator submits.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Norm, NormOperator};

/// Categorical results that count as passing for microbiological parameters.
static PASSING_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(absent|ausente|negative|negativa|not\s+detected|no\s+detectad[oa])\b")
        .expect("static pattern")
});

/// Parsed form of a raw result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Numeric(f64),
    Categorical,
}

/// Advisory verdict for UI pre-fill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    /// Parsed numeric value, if the result was numeric
    pub value: Option<f64>,
    pub within_norm: bool,
}

/// Parse a raw result, accepting `,` or `.` as decimal separator.
pub fn parse_measurement(raw: &str) -> Measurement {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Measurement::Categorical;
    }
    match trimmed.replace(',', ".").parse::<f64>() {
        Ok(v) if v.is_finite() => Measurement::Numeric(v),
        _ => Measurement::Categorical,
    }
}

/// Keyword heuristic for non-numeric results.
pub fn is_passing_term(raw: &str) -> bool {
    PASSING_TERMS.is_match(raw)
}

/// Decide whether `raw` satisfies `norm`.
pub fn is_within_norm(norm: &Norm, raw: &str) -> bool {
    match parse_measurement(raw) {
        Measurement::Categorical => is_passing_term(raw),
        Measurement::Numeric(v) => compare(norm.operator, norm.lower, norm.upper, v),
    }
}

/// Verdict plus the parsed value.
pub fn suggest(norm: &Norm, raw: &str) -> Suggestion {
    let value = match parse_measurement(raw) {
        Measurement::Numeric(v) => Some(v),
        Measurement::Categorical => None,
    };
    Suggestion {
        value,
        within_norm: is_within_norm(norm, raw),
    }
}

fn compare(operator: Option<NormOperator>, lower: Option<f64>, upper: Option<f64>, v: f64) -> bool {
    match operator {
        Some(NormOperator::Between) => match (lower, upper) {
            (Some(lo), Some(hi)) => lo <= v && v <= hi,
            _ => false,
        },
        Some(NormOperator::AtMost) => upper.is_some_and(|hi| v <= hi),
        Some(NormOperator::LessThan) => upper.is_some_and(|hi| v < hi),
        Some(NormOperator::AtLeast) => lower.is_some_and(|lo| v >= lo),
        Some(NormOperator::GreaterThan) => lower.is_some_and(|lo| v > lo),
        Some(NormOperator::Equal) => lower.is_some_and(|lo| approx_eq(v, lo)),
        None => match (lower, upper) {
            (Some(lo), Some(hi)) => lo <= v && v <= hi,
            (None, Some(hi)) => v <= hi,
            (Some(lo), None) => v >= lo,
            (None, None) => false,
        },
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Human-readable rendering of a norm's comparison, e.g. `6.5 – 8.5`.
pub fn describe(norm: &Norm) -> Option<String> {
    let (lo, hi) = (norm.lower, norm.upper);
    let text = match (norm.operator, lo, hi) {
        (Some(NormOperator::Between), Some(lo), Some(hi)) | (None, Some(lo), Some(hi)) => {
            format!("{} – {}", fmt_bound(lo), fmt_bound(hi))
        }
        (Some(NormOperator::AtMost), _, Some(hi)) | (None, None, Some(hi)) => {
            format!("≤ {}", fmt_bound(hi))
        }
        (Some(NormOperator::LessThan), _, Some(hi)) => format!("< {}", fmt_bound(hi)),
        (Some(NormOperator::AtLeast), Some(lo), _) | (None, Some(lo), None) => {
            format!("≥ {}", fmt_bound(lo))
        }
        (Some(NormOperator::GreaterThan), Some(lo), _) => format!("> {}", fmt_bound(lo)),
        (Some(NormOperator::Equal), Some(lo), _) => format!("= {}", fmt_bound(lo)),
        _ => return norm.description.clone(),
    };
    Some(text)
}

fn fmt_bound(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
