//! Ground-truth aggregates computed from evidence rows.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::VerifierConfig;
use crate::dataset::{count_values, Cell, Dataset};

/// Number of entries kept in the source/destination frequency tables.
pub const TOP_N: usize = 5;

/// Label substituted for missing attack-type values before counting.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Category label that does not count as suspicious.
pub const BENIGN_CATEGORY: &str = "normal";

/// A frequency table that keeps its order (most frequent first) when
/// serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountTable(Vec<(String, usize)>);

impl CountTable {
    pub fn from_counts(counts: Vec<(Cell, usize)>) -> Self {
        Self(counts.into_iter().map(|(cell, n)| (cell.to_string(), n)).collect())
    }

    /// The `n` most frequent entries.
    pub fn head(mut self, n: usize) -> Self {
        self.0.truncate(n);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, n)| (k.as_str(), *n))
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, n)| *n)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CountTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, count) in &self.0 {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CountTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountTableVisitor;

        impl<'de> Visitor<'de> for CountTableVisitor {
            type Value = CountTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of value to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<CountTable, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, count)) = access.next_entry::<String, usize>()? {
                    entries.push((key, count));
                }
                Ok(CountTable(entries))
            }
        }

        deserializer.deserialize_map(CountTableVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub n_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_src: Option<CountTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_dst: Option<CountTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_duration: Option<f64>,
    /// One table per flag-like column, keyed `flags_<column>`.
    #[serde(flatten)]
    pub flags: BTreeMap<String, CountTable>,
    #[serde(default)]
    pub attack_counts: CountTable,
    /// Rows whose attack type is not `normal`; `None` without an attack column.
    #[serde(default)]
    pub suspicious_rows: Option<usize>,
}

fn first_present<'a>(evidence: &Dataset, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(String::as_str)
        .find(|c| evidence.has_column(c))
}

fn numeric(cells: &[Cell]) -> impl Iterator<Item = f64> + '_ {
    cells.iter().filter_map(Cell::as_f64)
}

pub fn compute_aggregates(evidence: &Dataset, config: &VerifierConfig) -> Aggregates {
    let top = |name: &str| {
        evidence.value_counts(name).map(|mut counts| {
            counts.truncate(TOP_N);
            CountTable::from_counts(counts)
        })
    };

    let total_bytes = first_present(evidence, &config.byte_columns)
        .and_then(|c| evidence.column(c))
        .map(|cells| numeric(&cells).sum::<f64>() as i64);

    let mean_duration = first_present(evidence, &config.duration_columns)
        .and_then(|c| evidence.column(c))
        .and_then(|cells| {
            let values: Vec<f64> = numeric(&cells).collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        });

    let flags = evidence
        .columns()
        .iter()
        .filter(|c| c.to_lowercase().contains("flag"))
        .filter_map(|c| {
            evidence
                .value_counts(c)
                .map(|counts| (format!("flags_{}", c), CountTable::from_counts(counts)))
        })
        .collect();

    let (attack_counts, suspicious_rows) = match first_present(evidence, &config.attack_columns)
        .and_then(|c| evidence.column(c))
    {
        Some(cells) => {
            let filled: Vec<Cell> = cells
                .iter()
                .map(|c| {
                    if c.is_null() {
                        Cell::Text(UNKNOWN_CATEGORY.to_string())
                    } else {
                        c.clone()
                    }
                })
                .collect();
            let suspicious = cells
                .iter()
                .filter(|c| c.to_string().to_lowercase() != BENIGN_CATEGORY)
                .count();
            (CountTable::from_counts(count_values(&filled)), Some(suspicious))
        }
        None => (CountTable::default(), None),
    };

    Aggregates {
        n_rows: evidence.len(),
        top_src: top(&config.src_column),
        top_dst: top(&config.dst_column),
        total_bytes,
        mean_duration,
        flags,
        attack_counts,
        suspicious_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregates(json: &str) -> Aggregates {
        let data = Dataset::from_json_str(json).unwrap();
        compute_aggregates(&data, &VerifierConfig::default())
    }

    #[test]
    fn test_row_count_and_byte_total() {
        let aggs = aggregates(
            r#"[{"src": "1.1.1.1", "Bytes_int": 100}, {"src": "2.2.2.2", "Bytes_int": 200}]"#,
        );
        assert_eq!(aggs.n_rows, 2);
        assert_eq!(aggs.total_bytes, Some(300));
        assert_eq!(aggs.top_src.as_ref().map(CountTable::len), Some(2));
        assert!(aggs.top_dst.is_none());
        assert!(aggs.mean_duration.is_none());
    }

    #[test]
    fn test_top_tables_keep_five_most_frequent() {
        let rows: Vec<String> = (0..8)
            .flat_map(|i| std::iter::repeat(format!(r#"{{"dst": "10.0.0.{}"}}"#, i)).take(i + 1))
            .collect();
        let aggs = aggregates(&format!("[{}]", rows.join(",")));
        let top = aggs.top_dst.unwrap();
        assert_eq!(top.len(), TOP_N);
        assert_eq!(top.iter().next(), Some(("10.0.0.7", 8)));
    }

    #[test]
    fn test_first_byte_and_duration_columns_win() {
        let aggs = aggregates(
            r#"[{"bytes": 5, "bytes_in": 1000, "duration": 1.0, "time": 99},
                {"bytes": 7, "bytes_in": 1000, "duration": 2.0, "time": 99}]"#,
        );
        assert_eq!(aggs.total_bytes, Some(12));
        assert_eq!(aggs.mean_duration, Some(1.5));
    }

    #[test]
    fn test_attack_counts_and_suspicious_rows() {
        let aggs = aggregates(
            r#"[{"attackType": "normal"}, {"attackType": "Normal"}, {"attackType": "dos"},
                {"attackType": null}, {"attackType": "dos"}]"#,
        );
        assert_eq!(aggs.attack_counts.get("dos"), Some(2));
        assert_eq!(aggs.attack_counts.get("unknown"), Some(1));
        assert_eq!(aggs.attack_counts.get("normal"), Some(1));
        assert_eq!(aggs.suspicious_rows, Some(3));
    }

    #[test]
    fn test_no_attack_column() {
        let aggs = aggregates(r#"[{"src": "1.1.1.1"}]"#);
        assert!(aggs.attack_counts.is_empty());
        assert_eq!(aggs.suspicious_rows, None);
    }

    #[test]
    fn test_flag_columns_are_flattened_into_json() {
        let aggs = aggregates(r#"[{"Flags": "S"}, {"Flags": "S"}, {"Flags": "A"}]"#);
        let json = serde_json::to_value(&aggs).unwrap();
        assert_eq!(json["flags_Flags"]["S"], 2);
        assert_eq!(json["flags_Flags"]["A"], 1);
        assert_eq!(json["n_rows"], 3);
        assert!(json.get("total_bytes").is_none());
    }

    #[test]
    fn test_count_table_keeps_order_through_json() {
        let aggs = aggregates(
            r#"[{"src": "b"}, {"src": "a"}, {"src": "a"}, {"src": "c"}]"#,
        );
        let text = serde_json::to_string(&aggs.top_src).unwrap();
        assert_eq!(text, r#"{"a":2,"b":1,"c":1}"#);
        let back: CountTable = serde_json::from_str(&text).unwrap();
        assert_eq!(Some(back), aggs.top_src);
    }
}
