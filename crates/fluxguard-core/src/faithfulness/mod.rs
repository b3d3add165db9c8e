//! Faithfulness engine.
//!
//! Cross-checks a model's narrative against ground truth computed from the
//! evidence rows: addresses must appear in the source or destination
//! columns, and numeric claims must land within a relative tolerance of
//! some aggregate. The outcome is a [`FaithfulnessReport`] with a trust
//! score in `[0, 1]`.
//!
//! Independent of the repair pipeline and the sandbox.

pub mod address;
pub mod aggregates;
pub mod claims;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::dataset::Dataset;

pub use address::{check_addresses, AddressCheck};
pub use aggregates::{compute_aggregates, Aggregates, CountTable};
pub use claims::{extract_claims, verify_claim, Claim, ClaimContext, SupportBasis, SupportedClaim};

/// Default relative tolerance for numeric matches.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Share of the unsupported-claim ratio subtracted from the address trust.
pub const UNSUPPORTED_PENALTY: f64 = 0.5;

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Tolerance and the column names the engine looks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub tolerance: f64,
    pub src_column: String,
    pub dst_column: String,
    /// First present column is summed into `total_bytes`.
    pub byte_columns: Vec<String>,
    /// First present column is averaged into `mean_duration`.
    pub duration_columns: Vec<String>,
    /// First present column supplies category counts.
    pub attack_columns: Vec<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            tolerance: DEFAULT_TOLERANCE,
            src_column: "src".to_string(),
            dst_column: "dst".to_string(),
            byte_columns: names(&["Bytes_int", "bytes", "bytes_in", "bytes_out"]),
            duration_columns: names(&["Duration_sec", "duration", "time"]),
            attack_columns: names(&["attackType", "Attack_type", "attack_type"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recommendation {
    Text(String),
    Detailed {
        #[serde(default)]
        text: String,
        /// Row indices or ids, as the model wrote them.
        #[serde(default)]
        evidence_ids: Vec<JsonValue>,
    },
}

impl Recommendation {
    pub fn text(&self) -> &str {
        match self {
            Recommendation::Text(text) | Recommendation::Detailed { text, .. } => text,
        }
    }
}

/// A model-written summary and its recommendations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

impl Narrative {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            recommendations: Vec::new(),
        }
    }

    /// Summary followed by every recommendation, space separated.
    pub fn text(&self) -> String {
        let mut text = format!("{} ", self.summary);
        for rec in &self.recommendations {
            text.push_str(rec.text());
            text.push(' ');
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaithfulnessReport {
    pub ip_check: AddressCheck,
    pub aggregates: Aggregates,
    pub claims_parsed: Vec<Claim>,
    pub supported_claims: Vec<SupportedClaim>,
    pub unsupported_claims: Vec<Claim>,
    pub trust_score: f64,
}

/// Address trust minus half the unsupported-claim ratio, floored at zero.
pub fn trust_score(address_trust: f64, unsupported: usize, total: usize) -> f64 {
    let trust = if total == 0 {
        address_trust
    } else {
        (address_trust - UNSUPPORTED_PENALTY * unsupported as f64 / total as f64).max(0.0)
    };
    round2(trust.clamp(0.0, 1.0))
}

/// Verify `narrative` against `evidence`.
pub fn verify(narrative: &Narrative, evidence: &Dataset, config: &VerifierConfig) -> FaithfulnessReport {
    let text = narrative.text();
    let ip_check = check_addresses(&text, evidence, &config.src_column, &config.dst_column);
    let aggregates = compute_aggregates(evidence, config);
    let claims_parsed = extract_claims(&text);

    let ctx = ClaimContext::new(&text, &aggregates, config.tolerance);
    let mut supported_claims = Vec::new();
    let mut unsupported_claims = Vec::new();
    for claim in &claims_parsed {
        match verify_claim(claim, &ctx) {
            Some(basis) => supported_claims.push(SupportedClaim {
                claim: claim.clone(),
                basis,
            }),
            None => unsupported_claims.push(claim.clone()),
        }
    }

    let trust_score = trust_score(ip_check.trust, unsupported_claims.len(), claims_parsed.len());
    debug!(
        claims = claims_parsed.len(),
        unsupported = unsupported_claims.len(),
        trust_score,
        "faithfulness check complete"
    );

    FaithfulnessReport {
        ip_check,
        aggregates,
        claims_parsed,
        supported_claims,
        unsupported_claims,
        trust_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attacks() -> Dataset {
        let mut rows = Vec::new();
        for i in 0..10 {
            let kind = if i < 3 { "dos" } else { "normal" };
            rows.push(format!(r#"{{"src": "10.0.0.{}", "attackType": "{}"}}"#, i, kind));
        }
        Dataset::from_json_str(&format!("[{}]", rows.join(","))).unwrap()
    }

    #[test]
    fn test_address_exactness() {
        let evidence = Dataset::from_json_str(r#"[{"src": "1.2.3.4", "dst": "5.6.7.8"}]"#).unwrap();
        let report = verify(
            &Narrative::new("Connection from 1.2.3.4 to 9.9.9.9"),
            &evidence,
            &VerifierConfig::default(),
        );
        assert_eq!(report.ip_check.ips_claimed.len(), 2);
        assert_eq!(report.ip_check.ips_verified, 1);
        assert!(report.claims_parsed.is_empty());
        assert_eq!(report.trust_score, 0.5);
    }

    #[test]
    fn test_aggregate_exactness() {
        let evidence = Dataset::from_json_str(
            r#"[{"src": "1.1.1.1", "Bytes_int": 100}, {"src": "2.2.2.2", "Bytes_int": 200}]"#,
        )
        .unwrap();
        let report = verify(&Narrative::default(), &evidence, &VerifierConfig::default());
        assert_eq!(report.aggregates.n_rows, 2);
        assert_eq!(report.aggregates.total_bytes, Some(300));
        assert_eq!(report.trust_score, 1.0);
    }

    #[test]
    fn test_unsupported_claim_is_penalised() {
        let report = verify(
            &Narrative::new("30% of flows are suspicious"),
            &attacks(),
            &VerifierConfig::default(),
        );
        assert_eq!(report.claims_parsed.len(), 2);
        assert_eq!(report.supported_claims.len(), 1);
        assert_eq!(report.supported_claims[0].basis, SupportBasis::SuspiciousShare);
        assert_eq!(report.unsupported_claims.len(), 1);
        assert_eq!(report.trust_score, 0.75);
    }

    #[test]
    fn test_recommendations_are_part_of_the_text() {
        let narrative: Narrative = serde_json::from_value(serde_json::json!({
            "summary": "3 out of 10 records were dos",
            "recommendations": [
                "Block 10.0.0.1",
                {"text": "Review 10.0.0.2", "evidence_ids": ["e1"]}
            ]
        }))
        .unwrap();
        let report = verify(&narrative, &attacks(), &VerifierConfig::default());
        assert_eq!(report.ip_check.ips_verified, 2);
        assert!(report.unsupported_claims.is_empty());
        assert_eq!(report.supported_claims.len(), 3);
        assert_eq!(report.trust_score, 1.0);
    }

    #[test]
    fn test_report_json_field_names() {
        let report = verify(&Narrative::new("2 flows"), &attacks(), &VerifierConfig::default());
        let json = serde_json::to_value(&report).unwrap();
        for key in [
            "ip_check",
            "aggregates",
            "claims_parsed",
            "supported_claims",
            "unsupported_claims",
            "trust_score",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["ip_check"]["trust"], 1.0);
        assert_eq!(json["claims_parsed"][0]["type"], "number");
    }

    #[test]
    fn test_trust_score_formula() {
        assert_eq!(trust_score(1.0, 0, 0), 1.0);
        assert_eq!(trust_score(0.5, 2, 4), 0.25);
        assert_eq!(trust_score(0.2, 4, 4), 0.0);
    }

    proptest! {
        #[test]
        fn prop_trust_score_is_bounded(
            words in prop::collection::vec(
                prop_oneof![
                    "[a-z]{1,8}",
                    "[0-9]{1,4}",
                    "[0-9]{1,3}%",
                    "[0-9]{1,3} of [0-9]{1,3}",
                    "(10|1)\\.[0-9]\\.0\\.[0-9]",
                    Just("rows".to_string()),
                    Just("suspicious".to_string()),
                    Just("bytes".to_string()),
                    Just("dos".to_string()),
                ],
                0..30,
            ),
            bytes in prop::collection::vec(0i64..10_000, 0..6),
        ) {
            let rows: Vec<String> = bytes
                .iter()
                .enumerate()
                .map(|(i, b)| format!(
                    r#"{{"src": "10.0.0.{}", "Bytes_int": {}, "attackType": "{}"}}"#,
                    i, b, if b % 2 == 0 { "dos" } else { "normal" }
                ))
                .collect();
            let evidence = Dataset::from_json_str(&format!("[{}]", rows.join(","))).unwrap();
            let report = verify(&Narrative::new(words.join(" ")), &evidence, &VerifierConfig::default());
            prop_assert!((0.0..=1.0).contains(&report.trust_score));
            prop_assert!((0.0..=1.0).contains(&report.ip_check.trust));
            prop_assert_eq!(
                report.supported_claims.len() + report.unsupported_claims.len(),
                report.claims_parsed.len()
            );
        }
    }
}
