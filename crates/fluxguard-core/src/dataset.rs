//! Tabular dataset collaborator.
//!
//! A [`Dataset`] is a rectangular table of named columns holding [`Cell`]s.
//! It is the only view of the caller's data the core ever sees: the
//! faithfulness engine reads it as evidence, and the sandbox executes
//! snippets against a private clone of it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors that can occur while building a dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to parse dataset JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Dataset must be a list of records, found {0}")]
    NotTabular(String),

    #[error("Row has {found} cells but the dataset has {expected} columns")]
    RowLength { expected: usize, found: usize },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),
}

/// A single scalar value in a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Convert a JSON value into a cell. Nested arrays and objects are kept
    /// as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Cell::Null,
            JsonValue::Bool(b) => Cell::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => Cell::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    /// JSON form of the cell. NaN and infinities become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Cell::Null => JsonValue::Null,
            Cell::Bool(b) => JsonValue::Bool(*b),
            Cell::Int(i) => JsonValue::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Cell::Text(s) => JsonValue::String(s.clone()),
        }
    }

    /// Missing values: explicit nulls and NaN floats.
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the cell. Booleans count as 0/1; text is not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Bool(_) | Cell::Int(_) | Cell::Float(_))
    }

    /// Truthiness of the cell, used by boolean masks.
    pub fn truthy(&self) -> bool {
        match self {
            Cell::Null => false,
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i != 0,
            Cell::Float(f) => *f != 0.0 && !f.is_nan(),
            Cell::Text(s) => !s.is_empty(),
        }
    }

    /// Total order used for sorting: numbers, then text, then missing values.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            if cell.is_null() {
                2
            } else if cell.is_numeric() {
                0
            } else {
                1
            }
        }
        match (rank(self), rank(other)) {
            (0, 0) => {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            (1, 1) => self.to_string().cmp(&other.to_string()),
            (ra, rb) => ra.cmp(&rb),
        }
    }

    pub(crate) fn key(&self) -> CellKey {
        match self {
            Cell::Null => CellKey::Null,
            Cell::Bool(b) => CellKey::Bool(*b),
            Cell::Int(i) => CellKey::Int(*i),
            Cell::Float(f) if f.is_nan() => CellKey::Null,
            Cell::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellKey::Int(*f as i64),
            Cell::Float(f) => CellKey::Float(f.to_bits()),
            Cell::Text(s) => CellKey::Text(s.clone()),
        }
    }
}

/// Hashable identity of a cell, used for counting and grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CellKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "None"),
            Cell::Bool(true) => write!(f, "True"),
            Cell::Bool(false) => write!(f, "False"),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", format_float(*x)),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Render a float the way an analyst would expect to read it back:
/// integral values keep a trailing `.0`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// A rectangular table of named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    /// Create an empty dataset with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a dataset from JSON records. Columns are the union of all keys
    /// in first-seen order; absent keys become nulls.
    pub fn from_records(records: &[serde_json::Map<String, JsonValue>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in records {
            for key in record.keys() {
                if !positions.contains_key(key) {
                    positions.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                let mut row = vec![Cell::Null; columns.len()];
                for (key, value) in record {
                    row[positions[key]] = Cell::from_json(value);
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Parse a dataset from a JSON array of objects.
    pub fn from_json_str(json: &str) -> Result<Self, DatasetError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_json_value(&value)
    }

    /// Build a dataset from an already-parsed JSON array of objects.
    pub fn from_json_value(value: &JsonValue) -> Result<Self, DatasetError> {
        let items = value
            .as_array()
            .ok_or_else(|| DatasetError::NotTabular(json_kind(value).to_string()))?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match item {
                JsonValue::Object(map) => records.push(map.clone()),
                other => {
                    return Err(DatasetError::NotTabular(format!(
                        "a list containing {}",
                        json_kind(other)
                    )))
                }
            }
        }
        Ok(Self::from_records(&records))
    }

    /// Append a row. The row must have one cell per column.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), DatasetError> {
        if row.len() != self.columns.len() {
            return Err(DatasetError::RowLength {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].clone()).collect())
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Replace or append a column.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), DatasetError> {
        if values.len() != self.rows.len() {
            return Err(DatasetError::RowLength {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Overwrite one cell.
    pub fn set_cell(&mut self, row: usize, name: &str, value: Cell) -> Result<(), DatasetError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))?;
        let len = self.rows.len();
        let target = self.rows.get_mut(row).ok_or(DatasetError::RowLength {
            expected: len,
            found: row,
        })?;
        target[idx] = value;
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    /// New dataset holding the rows at `positions`, in that order.
    pub fn select_rows(&self, positions: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: positions
                .iter()
                .filter_map(|&p| self.rows.get(p).cloned())
                .collect(),
        }
    }

    /// New dataset holding only `names`, in that order.
    pub fn select_columns(&self, names: &[String]) -> Result<Dataset, DatasetError> {
        let indices = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| DatasetError::UnknownColumn(n.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Dataset {
            columns: names.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Non-null value frequencies for a column, most frequent first.
    /// Ties keep first-seen order.
    pub fn value_counts(&self, name: &str) -> Option<Vec<(Cell, usize)>> {
        let values = self.column(name)?;
        Some(count_values(&values))
    }

    /// Rows as JSON objects.
    pub fn to_records(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|row| {
                let map = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), v.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                JsonValue::Object(map)
            })
            .collect()
    }
}

/// Frequency table of non-null cells, most frequent first, ties in
/// first-seen order.
pub fn count_values(values: &[Cell]) -> Vec<(Cell, usize)> {
    let mut order: Vec<(Cell, usize)> = Vec::new();
    let mut slots: HashMap<CellKey, usize> = HashMap::new();
    for value in values.iter().filter(|v| !v.is_null()) {
        match slots.get(&value.key()) {
            Some(&slot) => order[slot].1 += 1,
            None => {
                slots.insert(value.key(), order.len());
                order.push((value.clone(), 1));
            }
        }
    }
    // sort_by is stable, so equal counts keep first-seen order
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowRef {
                columns: &self.columns,
                row,
            })?;
        }
        seq.end()
    }
}

struct RowRef<'a> {
    columns: &'a [String],
    row: &'a [Cell],
}

impl Serialize for RowRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, cell) in self.columns.iter().zip(self.row) {
            map.serialize_entry(column, &cell.to_json())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Dataset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<serde_json::Map<String, JsonValue>>::deserialize(deserializer)?;
        Ok(Dataset::from_records(&records))
    }
}
