//! Address check: are the dotted-quad addresses a narrative mentions
//! actually present in the evidence?

use std::collections::{BTreeSet, HashSet};
use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::round2;
use crate::dataset::Dataset;

lazy_static! {
    pub(crate) static ref ADDRESS_PATTERN: Regex =
        Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressCheck {
    /// `verified / claimed`, or 1.0 when nothing was claimed.
    pub trust: f64,
    /// Distinct addresses found in the narrative, sorted.
    pub ips_claimed: Vec<String>,
    pub ips_verified: usize,
}

/// Byte ranges of every address-like token in `text`.
pub(crate) fn address_spans(text: &str) -> Vec<Range<usize>> {
    ADDRESS_PATTERN.find_iter(text).map(|m| m.range()).collect()
}

/// Check every address in `text` against the source and destination
/// columns of `evidence`.
pub fn check_addresses(text: &str, evidence: &Dataset, src_column: &str, dst_column: &str) -> AddressCheck {
    let claimed: BTreeSet<String> = ADDRESS_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut known: HashSet<String> = HashSet::new();
    for column in [src_column, dst_column] {
        if let Some(cells) = evidence.column(column) {
            known.extend(cells.iter().filter(|c| !c.is_null()).map(|c| c.to_string()));
        }
    }

    let verified = claimed.iter().filter(|ip| known.contains(*ip)).count();
    let trust = if claimed.is_empty() {
        1.0
    } else {
        verified as f64 / claimed.len() as f64
    };
    AddressCheck {
        trust: round2(trust),
        ips_claimed: claimed.into_iter().collect(),
        ips_verified: verified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> Dataset {
        Dataset::from_json_str(r#"[{"src": "1.2.3.4", "dst": "5.6.7.8"}]"#).unwrap()
    }

    #[test]
    fn test_one_of_two_addresses_verified() {
        let check = check_addresses("Connection from 1.2.3.4 to 9.9.9.9", &evidence(), "src", "dst");
        assert_eq!(check.ips_claimed, vec!["1.2.3.4".to_string(), "9.9.9.9".to_string()]);
        assert_eq!(check.ips_verified, 1);
        assert_eq!(check.trust, 0.5);
    }

    #[test]
    fn test_no_addresses_is_full_trust() {
        let check = check_addresses("Nothing to see", &evidence(), "src", "dst");
        assert!(check.ips_claimed.is_empty());
        assert_eq!(check.trust, 1.0);
    }

    #[test]
    fn test_repeated_address_counts_once() {
        let check = check_addresses("5.6.7.8 talked to 5.6.7.8", &evidence(), "src", "dst");
        assert_eq!(check.ips_claimed.len(), 1);
        assert_eq!(check.ips_verified, 1);
    }

    #[test]
    fn test_missing_columns_verify_nothing() {
        let data = Dataset::from_json_str(r#"[{"host": "1.2.3.4"}]"#).unwrap();
        let check = check_addresses("1.2.3.4", &data, "src", "dst");
        assert_eq!(check.ips_verified, 0);
        assert_eq!(check.trust, 0.0);
    }

    #[test]
    fn test_trust_is_rounded() {
        let data = Dataset::from_json_str(r#"[{"src": "1.1.1.1", "dst": "2.2.2.2"}]"#).unwrap();
        let check = check_addresses("1.1.1.1 3.3.3.3 4.4.4.4", &data, "src", "dst");
        assert_eq!(check.trust, 0.33);
    }
}
