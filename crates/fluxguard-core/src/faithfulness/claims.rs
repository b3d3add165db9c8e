//! Claim extraction and per-variant verification.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::address::address_spans;
use super::aggregates::Aggregates;

lazy_static! {
    static ref PERCENT: Regex = Regex::new(r"\b(\d{1,3}(?:\.\d+)?)%").unwrap();
    static ref FRACTION: Regex =
        Regex::new(r"(?i)(\d{1,3}(?:[\d,]*\d)?)\s*(?:out of|of)\s*(\d{1,3}(?:[\d,]*\d)?)").unwrap();
    static ref NUMBER: Regex = Regex::new(r"\b\d+[,.]?\d*\b").unwrap();
}

const ROW_WORDS: [&str; 3] = ["row", "flow", "record"];
const SUSPICIOUS_WORDS: [&str; 2] = ["suspicious", "flagged"];

/// A factual assertion parsed out of narrative text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Claim {
    /// `12.5%`
    Percent { text: String, value: f64 },
    /// `3 out of 40`, `3 of 40`
    Fraction {
        text: String,
        num: f64,
        den: f64,
        value: f64,
    },
    Number { text: String, value: f64 },
}

impl Claim {
    pub fn text(&self) -> &str {
        match self {
            Claim::Percent { text, .. } | Claim::Fraction { text, .. } | Claim::Number { text, .. } => {
                text
            }
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Claim::Percent { value, .. } | Claim::Fraction { value, .. } | Claim::Number { value, .. } => {
                *value
            }
        }
    }
}

/// Which aggregate a supported claim was matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupportBasis {
    /// Denominator or value close to the row count.
    RowCount,
    /// Percentage close to the share of suspicious rows.
    SuspiciousShare,
    SuspiciousCount,
    /// Value close to the count of a category named in the text.
    CategoryCount { category: String },
    /// Percentage in a byte context. Accepted without comparing against
    /// any computed share.
    ByteShareProvisional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedClaim {
    #[serde(flatten)]
    pub claim: Claim,
    pub basis: SupportBasis,
}

/// Everything a claim is checked against.
pub struct ClaimContext<'a> {
    /// Lowercased narrative text.
    pub text: String,
    pub aggregates: &'a Aggregates,
    pub tolerance: f64,
}

impl<'a> ClaimContext<'a> {
    pub fn new(text: &str, aggregates: &'a Aggregates, tolerance: f64) -> Self {
        Self {
            text: text.to_lowercase(),
            aggregates,
            tolerance,
        }
    }

    fn mentions_any(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.text.contains(w))
    }

    fn mentions_category(&self, category: &str) -> bool {
        let lower = category.to_lowercase();
        let spaced = lower.replace('_', " ");
        let head = lower.split('_').next().unwrap_or_default();
        [lower.as_str(), spaced.as_str(), head]
            .iter()
            .any(|name| !name.is_empty() && self.text.contains(name))
    }

    /// `|claimed - actual|` within `tolerance` relative to `actual`, with
    /// a floor of one unit on the denominator.
    fn close_relative(&self, claimed: f64, actual: f64) -> bool {
        (claimed - actual).abs() / actual.max(1.0) <= self.tolerance
    }

    /// `|claimed - actual|` within `max(1, actual * tolerance)`.
    fn close_absolute(&self, claimed: f64, actual: f64) -> bool {
        (claimed - actual).abs() <= (actual * self.tolerance).max(1.0)
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.replace(',', "").parse().ok()
}

/// Parse every claim in `text`: percentages, then fractions, then plain
/// numbers. Shapes are matched independently and may overlap; numbers
/// inside dotted-quad addresses are skipped.
pub fn extract_claims(text: &str) -> Vec<Claim> {
    let mut claims = Vec::new();

    for caps in PERCENT.captures_iter(text) {
        if let Some(value) = parse_number(&caps[1]) {
            claims.push(Claim::Percent {
                text: caps[0].to_string(),
                value,
            });
        }
    }

    for caps in FRACTION.captures_iter(text) {
        if let (Some(num), Some(den)) = (parse_number(&caps[1]), parse_number(&caps[2])) {
            claims.push(Claim::Fraction {
                text: caps[0].to_string(),
                num,
                den,
                value: num / den.max(1.0),
            });
        }
    }

    let addresses = address_spans(text);
    for m in NUMBER.find_iter(text) {
        if addresses.iter().any(|span| span.start < m.end() && m.start() < span.end) {
            continue;
        }
        if let Some(value) = parse_number(m.as_str()) {
            claims.push(Claim::Number {
                text: m.as_str().to_string(),
                value,
            });
        }
    }

    claims
}

fn verify_percent(value: f64, ctx: &ClaimContext<'_>) -> Option<SupportBasis> {
    let aggs = ctx.aggregates;
    if ctx.text.contains("suspicious") && aggs.n_rows > 0 {
        if let Some(suspicious) = aggs.suspicious_rows {
            let actual = 100.0 * suspicious as f64 / aggs.n_rows as f64;
            if ctx.close_absolute(value, actual) {
                return Some(SupportBasis::SuspiciousShare);
            }
        }
    }
    if ctx.text.contains("bytes") && aggs.total_bytes.is_some() {
        return Some(SupportBasis::ByteShareProvisional);
    }
    None
}

fn verify_fraction(den: f64, ctx: &ClaimContext<'_>) -> Option<SupportBasis> {
    let n_rows = ctx.aggregates.n_rows;
    (ctx.mentions_any(&ROW_WORDS) && n_rows > 0 && ctx.close_absolute(den, n_rows as f64))
        .then_some(SupportBasis::RowCount)
}

fn verify_number(value: f64, ctx: &ClaimContext<'_>) -> Option<SupportBasis> {
    let aggs = ctx.aggregates;
    if ctx.mentions_any(&ROW_WORDS) && ctx.close_relative(value, aggs.n_rows as f64) {
        return Some(SupportBasis::RowCount);
    }
    if ctx.mentions_any(&SUSPICIOUS_WORDS) {
        if let Some(suspicious) = aggs.suspicious_rows {
            if ctx.close_relative(value, suspicious as f64) {
                return Some(SupportBasis::SuspiciousCount);
            }
        }
    }
    aggs.attack_counts
        .iter()
        .find(|(category, count)| {
            ctx.close_absolute(value, *count as f64) && ctx.mentions_category(category)
        })
        .map(|(category, _)| SupportBasis::CategoryCount {
            category: category.to_string(),
        })
}

/// Check one claim; `None` means unsupported.
pub fn verify_claim(claim: &Claim, ctx: &ClaimContext<'_>) -> Option<SupportBasis> {
    match claim {
        Claim::Percent { value, .. } => verify_percent(*value, ctx),
        Claim::Fraction { den, .. } => verify_fraction(*den, ctx),
        Claim::Number { value, .. } => verify_number(*value, ctx),
    }
}
