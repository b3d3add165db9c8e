//! Runtime values of the snippet language.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::error::{ExecError, ExecResult};
use crate::dataset::{format_float, Cell, Dataset};

/// A labelled one-dimensional column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub index_name: Option<String>,
    pub index: Vec<Cell>,
    pub values: Vec<Cell>,
}

impl Series {
    /// Series with a positional `0..n` index.
    pub fn new(name: Option<String>, values: Vec<Cell>) -> Self {
        let index = (0..values.len() as i64).map(Cell::Int).collect();
        Self {
            name,
            index_name: None,
            index,
            values,
        }
    }

    pub fn labelled(
        name: Option<String>,
        index_name: Option<String>,
        index: Vec<Cell>,
        values: Vec<Cell>,
    ) -> Self {
        Self {
            name,
            index_name,
            index,
            values,
        }
    }

    pub fn from_column(frame: &Dataset, column: &str) -> Option<Self> {
        frame
            .column(column)
            .map(|values| Series::new(Some(column.to_string()), values))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same labels and name, new values.
    pub fn with_values(&self, values: Vec<Cell>) -> Series {
        Series {
            name: self.name.clone(),
            index_name: self.index_name.clone(),
            index: self.index.clone(),
            values,
        }
    }

    /// Entries at `positions`, labels preserved.
    pub fn select(&self, positions: &[usize]) -> Series {
        Series {
            name: self.name.clone(),
            index_name: self.index_name.clone(),
            index: positions.iter().map(|&p| self.index[p].clone()).collect(),
            values: positions.iter().map(|&p| self.values[p].clone()).collect(),
        }
    }

    pub fn position_of(&self, label: &Cell) -> Option<usize> {
        let key = label.key();
        self.index.iter().position(|l| l.key() == key)
    }

    /// True when the labels are integers, so `s[3]` means label 3.
    pub fn has_integer_index(&self) -> bool {
        self.index.iter().all(|l| matches!(l, Cell::Int(_)))
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Cell> {
        self.values.iter().filter(|c| !c.is_null())
    }

    pub fn dtype(&self) -> &'static str {
        dtype_of(&self.values)
    }
}

/// A Series of string lists, as returned by `.str.split()`. Rows that were
/// missing before the split stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSeries {
    pub name: Option<String>,
    pub index_name: Option<String>,
    pub index: Vec<Cell>,
    pub rows: Vec<Option<Vec<String>>>,
}

impl ListSeries {
    /// Split every text cell of `series` with `split`.
    pub fn split<F>(series: &Series, split: F) -> ExecResult<Self>
    where
        F: Fn(&str) -> ExecResult<Vec<String>>,
    {
        let rows = series
            .values
            .iter()
            .map(|cell| cell.as_str().map(&split).transpose())
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(Self {
            name: series.name.clone(),
            index_name: series.index_name.clone(),
            index: series.index.clone(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One cell per row. Missing rows become NaN.
    pub fn map_rows(&self, f: impl Fn(&[String]) -> Cell) -> Series {
        let values = self
            .rows
            .iter()
            .map(|row| row.as_deref().map_or(Cell::Float(f64::NAN), &f))
            .collect();
        Series::labelled(self.name.clone(), self.index_name.clone(), self.index.clone(), values)
    }

    /// Element `i` of every list. Lists too short for `i` give NaN.
    pub fn get(&self, i: i64) -> Series {
        self.map_rows(|parts| {
            let n = parts.len() as i64;
            let pos = if i < 0 { i + n } else { i };
            if (0..n).contains(&pos) {
                Cell::Text(parts[pos as usize].clone())
            } else {
                Cell::Float(f64::NAN)
            }
        })
    }

    pub fn with_rows(&self, rows: Vec<Option<Vec<String>>>) -> Self {
        Self {
            rows,
            ..self.clone()
        }
    }

    fn row_value(row: &Option<Vec<String>>) -> Value {
        match row {
            Some(parts) => Value::List(parts.iter().cloned().map(Value::Str).collect()),
            None => Value::Float(f64::NAN),
        }
    }

    pub fn to_values(&self) -> Vec<Value> {
        self.rows.iter().map(Self::row_value).collect()
    }
}

/// Pandas-style dtype name inferred from the cells.
pub fn dtype_of(cells: &[Cell]) -> &'static str {
    let mut has_null = false;
    let mut has_float = false;
    let mut has_int = false;
    let mut has_bool = false;
    for cell in cells {
        match cell {
            Cell::Null => has_null = true,
            Cell::Float(f) if f.is_nan() => has_null = true,
            Cell::Float(_) => has_float = true,
            Cell::Int(_) => has_int = true,
            Cell::Bool(_) => has_bool = true,
            Cell::Text(_) => return "object",
        }
    }
    match (has_bool, has_int || has_float) {
        (true, true) => "object",
        (true, false) if !has_null => "bool",
        (true, false) => "object",
        (false, true) if has_float || has_null => "float64",
        (false, true) => "int64",
        (false, false) if has_null => "float64",
        (false, false) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupSelection {
    All,
    Column(String),
    Columns(Vec<String>),
}

/// Result of `frame.groupby(keys)`, optionally narrowed by `[...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub frame: Arc<Dataset>,
    pub keys: Vec<String>,
    pub selection: GroupSelection,
}

impl GroupBy {
    /// Groups in ascending key order. Rows with a missing key are dropped.
    pub fn groups(&self) -> Vec<(Vec<Cell>, Vec<usize>)> {
        let key_idx: Vec<usize> = self
            .keys
            .iter()
            .filter_map(|k| self.frame.column_index(k))
            .collect();

        let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = Vec::new();
        let mut slots = std::collections::HashMap::new();
        for (pos, row) in self.frame.rows().iter().enumerate() {
            let key: Vec<Cell> = key_idx.iter().map(|&i| row[i].clone()).collect();
            if key.iter().any(Cell::is_null) {
                continue;
            }
            let id: Vec<_> = key.iter().map(Cell::key).collect();
            match slots.get(&id) {
                Some(&slot) => {
                    let entry: &mut (Vec<Cell>, Vec<usize>) = &mut groups[slot];
                    entry.1.push(pos);
                }
                None => {
                    slots.insert(id, groups.len());
                    groups.push((key, vec![pos]));
                }
            }
        }
        groups.sort_by(|a, b| {
            a.0.iter()
                .zip(&b.0)
                .map(|(x, y)| x.sort_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        groups
    }

    /// Label used for a group key in a result index.
    pub fn label(key: &[Cell]) -> Cell {
        match key {
            [single] => single.clone(),
            many => Cell::Text(format!(
                "({})",
                many.iter()
                    .map(|c| Value::from_cell(c.clone()).repr())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    pub fn index_name(&self) -> Option<String> {
        match self.keys.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerKind {
    Iloc,
    Loc,
    Str,
}

/// Accessor objects: `.iloc`, `.loc` and `.str`.
#[derive(Debug, Clone, PartialEq)]
pub struct Indexer {
    pub kind: IndexerKind,
    pub target: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Pandas,
    Numpy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered mapping.
    Dict(Vec<(Value, Value)>),
    Array(Vec<Cell>),
    Series(Series),
    ListSeries(Box<ListSeries>),
    Frame(Arc<Dataset>),
    GroupBy(Box<GroupBy>),
    Indexer(Box<Indexer>),
    Module(Module),
    /// Host function by qualified name, e.g. `len` or `np.mean`.
    Function(&'static str),
    /// Method bound to its receiver.
    Method(Box<Value>, String),
    /// `start:stop:step` inside a subscript.
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

impl Value {
    pub fn frame(dataset: Dataset) -> Value {
        Value::Frame(Arc::new(dataset))
    }

    pub fn from_cell(cell: Cell) -> Value {
        match cell {
            Cell::Null => Value::None,
            Cell::Bool(b) => Value::Bool(b),
            Cell::Int(i) => Value::Int(i),
            Cell::Float(f) => Value::Float(f),
            Cell::Text(s) => Value::Str(s),
        }
    }

    /// Scalar view as a dataset cell.
    pub fn to_cell(&self) -> Option<Cell> {
        match self {
            Value::None => Some(Cell::Null),
            Value::Bool(b) => Some(Cell::Bool(*b)),
            Value::Int(i) => Some(Cell::Int(*i)),
            Value::Float(f) => Some(Cell::Float(*f)),
            Value::Str(s) => Some(Cell::Text(s.clone())),
            _ => None,
        }
    }

    pub fn expect_cell(&self, what: &str) -> ExecResult<Cell> {
        self.to_cell().ok_or_else(|| {
            ExecError::type_error(format!(
                "{} must be a scalar, not '{}'",
                what,
                self.type_name()
            ))
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Array(_) => "ndarray",
            Value::Series(_) | Value::ListSeries(_) => "Series",
            Value::Frame(_) => "DataFrame",
            Value::GroupBy(g) => match g.selection {
                GroupSelection::Column(_) => "SeriesGroupBy",
                _ => "DataFrameGroupBy",
            },
            Value::Indexer(i) => match i.kind {
                IndexerKind::Iloc => "_iLocIndexer",
                IndexerKind::Loc => "_LocIndexer",
                IndexerKind::Str => "StringMethods",
            },
            Value::Module(_) => "module",
            Value::Function(_) => "builtin_function_or_method",
            Value::Method(_, _) => "method",
            Value::Slice(..) => "slice",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Python truthiness. Frames and Series refuse, as pandas does.
    pub fn truthy(&self) -> ExecResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Array(cells) => match cells.as_slice() {
                [] => false,
                [one] => one.truthy(),
                _ => {
                    return Err(ExecError::value(
                        "The truth value of an array with more than one element is ambiguous. Use a.any() or a.all()",
                    ))
                }
            },
            Value::Series(_) | Value::ListSeries(_) => {
                return Err(ExecError::value(
                    "The truth value of a Series is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                ))
            }
            Value::Frame(_) => {
                return Err(ExecError::value(
                    "The truth value of a DataFrame is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                ))
            }
            _ => true,
        })
    }

    /// Elements produced by iterating over the value.
    pub fn iterate(&self) -> ExecResult<Vec<Value>> {
        Ok(match self {
            Value::List(v) | Value::Tuple(v) => v.clone(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Dict(d) => d.iter().map(|(k, _)| k.clone()).collect(),
            Value::Array(cells) => cells.iter().cloned().map(Value::from_cell).collect(),
            Value::Series(s) => s.values.iter().cloned().map(Value::from_cell).collect(),
            Value::ListSeries(l) => l.to_values(),
            Value::Frame(f) => f.columns().iter().cloned().map(Value::Str).collect(),
            Value::GroupBy(g) => g
                .groups()
                .into_iter()
                .map(|(key, rows)| {
                    Value::Tuple(vec![
                        Value::from_cell(GroupBy::label(&key)),
                        Value::frame(g.frame.select_rows(&rows)),
                    ])
                })
                .collect(),
            other => {
                return Err(ExecError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    /// Cells of a one-dimensional value, for vectorised operations.
    pub fn to_cells(&self) -> ExecResult<Vec<Cell>> {
        match self {
            Value::Array(cells) => Ok(cells.clone()),
            Value::Series(s) => Ok(s.values.clone()),
            other => other
                .iterate()?
                .iter()
                .map(|v| v.expect_cell("element"))
                .collect(),
        }
    }

    /// JSON form. Frames become records, one-dimensional values lists.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::None => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => Cell::Float(*f).to_json(),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(v) | Value::Tuple(v) => {
                JsonValue::Array(v.iter().map(Value::to_json).collect())
            }
            Value::Dict(d) => JsonValue::Object(
                d.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Array(cells) => JsonValue::Array(cells.iter().map(Cell::to_json).collect()),
            Value::Series(s) => JsonValue::Array(s.values.iter().map(Cell::to_json).collect()),
            Value::ListSeries(l) => JsonValue::Array(l.to_values().iter().map(Value::to_json).collect()),
            Value::Frame(f) => JsonValue::Array(f.to_records()),
            other => JsonValue::String(other.to_string()),
        }
    }

    /// Python `repr()`: strings quoted, containers rendered recursively.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            Value::List(v) => format!("[{}]", join_repr(v)),
            Value::Tuple(v) if v.len() == 1 => format!("({},)", v[0].repr()),
            Value::Tuple(v) => format!("({})", join_repr(v)),
            Value::Dict(d) => format!(
                "{{{}}}",
                d.iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Array(cells) => format!(
                "array([{}])",
                cells
                    .iter()
                    .map(|c| Value::from_cell(c.clone()).repr())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            other => other.to_string(),
        }
    }
}

fn join_repr(values: &[Value]) -> String {
    values.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn quote(s: &str) -> String {
    if s.contains('\'') && !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) | Value::Array(_) => {
                write!(f, "{}", self.repr())
            }
            Value::Series(s) => write!(f, "{}", render_series(s)),
            Value::ListSeries(l) => {
                let shown = l.map_rows(|parts| {
                    Cell::Text(Value::List(parts.iter().cloned().map(Value::Str).collect()).repr())
                });
                write!(f, "{}", render_series(&shown))
            }
            Value::Frame(d) => write!(f, "{}", render_frame(d)),
            Value::GroupBy(g) => write!(f, "<{} by {:?}>", self.type_name(), g.keys),
            Value::Indexer(_) => write!(f, "<{} object>", self.type_name()),
            Value::Module(Module::Pandas) => write!(f, "<module 'pandas'>"),
            Value::Module(Module::Numpy) => write!(f, "<module 'numpy'>"),
            Value::Function(name) => write!(f, "<built-in function {}>", name),
            Value::Method(recv, name) => {
                write!(f, "<bound method {}.{}>", recv.type_name(), name)
            }
            Value::Slice(start, stop, step) => {
                let part = |p: &Option<i64>| p.map_or("None".to_string(), |v| v.to_string());
                write!(f, "slice({}, {}, {})", part(start), part(stop), part(step))
            }
        }
    }
}

const RENDER_ROWS: usize = 20;

fn render_series(s: &Series) -> String {
    let mut out = String::new();
    let width = s
        .index
        .iter()
        .take(RENDER_ROWS)
        .map(|l| l.to_string().chars().count())
        .max()
        .unwrap_or(0);
    for (label, value) in s.index.iter().zip(&s.values).take(RENDER_ROWS) {
        out.push_str(&format!("{:<width$}    {}\n", label.to_string(), value, width = width));
    }
    if s.len() > RENDER_ROWS {
        out.push_str("...\n");
    }
    match &s.name {
        Some(name) => out.push_str(&format!("Name: {}, dtype: {}", name, s.dtype())),
        None => out.push_str(&format!("dtype: {}", s.dtype())),
    }
    out
}

fn render_frame(d: &Dataset) -> String {
    if d.columns().is_empty() {
        return "Empty DataFrame".to_string();
    }
    let shown: Vec<&Vec<Cell>> = d.rows().iter().take(RENDER_ROWS).collect();
    let index_width = shown.len().saturating_sub(1).to_string().len();
    let widths: Vec<usize> = d
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            shown
                .iter()
                .map(|row| row[i].to_string().chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = format!("{:width$}", "", width = index_width);
    for (c, w) in d.columns().iter().zip(&widths) {
        out.push_str(&format!("  {:>w$}", c, w = w));
    }
    for (pos, row) in shown.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("{:<width$}", pos, width = index_width));
        for (cell, w) in row.iter().zip(&widths) {
            out.push_str(&format!("  {:>w$}", cell.to_string(), w = w));
        }
    }
    if d.len() > RENDER_ROWS {
        out.push_str(&format!("\n[{} rows x {} columns]", d.len(), d.columns().len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_inference() {
        assert_eq!(dtype_of(&[Cell::Int(1), Cell::Int(2)]), "int64");
        assert_eq!(dtype_of(&[Cell::Int(1), Cell::Null]), "float64");
        assert_eq!(dtype_of(&[Cell::Bool(true)]), "bool");
        assert_eq!(dtype_of(&[Cell::Text("a".into()), Cell::Int(1)]), "object");
    }

    #[test]
    fn test_repr_of_containers() {
        let v = Value::List(vec![
            Value::Int(1),
            Value::Str("a".into()),
            Value::Tuple(vec![Value::None]),
        ]);
        assert_eq!(v.repr(), "[1, 'a', (None,)]");
        let d = Value::Dict(vec![(Value::Str("k".into()), Value::Float(2.0))]);
        assert_eq!(d.to_string(), "{'k': 2.0}");
    }

    #[test]
    fn test_series_truthiness_is_ambiguous() {
        let s = Value::Series(Series::new(None, vec![Cell::Int(1)]));
        assert!(s.truthy().is_err());
        assert!(!Value::List(vec![]).truthy().unwrap());
    }

    #[test]
    fn test_groups_sorted_and_null_keys_dropped() {
        let frame = Dataset::from_json_str(
            r#"[{"k": "b", "v": 1}, {"k": "a", "v": 2}, {"k": null, "v": 3}, {"k": "b", "v": 4}]"#,
        )
        .unwrap();
        let g = GroupBy {
            frame: Arc::new(frame),
            keys: vec!["k".into()],
            selection: GroupSelection::All,
        };
        let groups = g.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec![Cell::Text("a".into())]);
        assert_eq!(groups[1].1, vec![0, 3]);
    }

    #[test]
    fn test_frame_json_is_records() {
        let frame = Dataset::from_json_str(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        let json = Value::frame(frame).to_json();
        assert_eq!(json, serde_json::json!([{"a": 1}, {"a": 2}]));
    }
}
