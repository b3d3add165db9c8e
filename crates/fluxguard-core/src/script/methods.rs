//! Attribute access and method calls.
//!
//! Each receiver type has a fixed method table. A name outside the table is
//! an `AttributeError`, so the snippet surface is exactly what is listed
//! here and nothing reaches the host through attribute lookup.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use regex::{NoExpand, Regex, RegexBuilder};

use super::ast::BinOp;
use super::builtins::{self, Args};
use super::error::{Budget, ExecError, ExecResult};
use super::indexing;
use super::ops;
use super::stats;
use super::value::{dtype_of, GroupBy, GroupSelection, Indexer, IndexerKind, ListSeries, Series, Value};
use crate::dataset::{count_values, Cell, Dataset, DatasetError};

const FRAME_METHODS: &[&str] = &[
    "head", "tail", "sort_values", "nlargest", "nsmallest", "groupby", "count", "nunique", "sum",
    "mean", "median", "min", "max", "std", "var", "drop_duplicates", "dropna", "fillna",
    "reset_index", "copy", "isna", "isnull", "notna", "notnull", "rename", "drop", "to_dict",
    "select_dtypes", "assign", "to_string",
];

const SERIES_METHODS: &[&str] = &[
    "head", "tail", "sum", "mean", "median", "min", "max", "std", "var", "count", "nunique",
    "unique", "value_counts", "sort_values", "sort_index", "nlargest", "nsmallest", "idxmax",
    "idxmin", "isna", "isnull", "notna", "notnull", "fillna", "dropna", "astype", "tolist",
    "to_list", "to_dict", "isin", "between", "abs", "round", "cumsum", "diff", "shift", "clip",
    "map", "replace", "quantile", "any", "all", "mode", "duplicated", "drop_duplicates",
    "reset_index", "to_frame", "get", "items", "keys", "copy", "rename", "item", "agg",
];

const GROUPBY_METHODS: &[&str] = &[
    "size", "count", "sum", "mean", "median", "min", "max", "std", "var", "nunique", "first",
    "last", "agg", "aggregate",
];

const STR_ACCESSOR_METHODS: &[&str] = &[
    "contains", "startswith", "endswith", "match", "fullmatch", "lower", "upper", "strip",
    "lstrip", "rstrip", "title", "len", "replace", "count", "slice", "isdigit", "isnumeric",
    "split", "get",
];

/// `.str` methods on a Series of lists.
const LIST_ACCESSOR_METHODS: &[&str] = &["get", "len", "join"];

const LIST_METHODS: &[&str] = &[
    "index", "count", "copy", "append", "extend", "insert", "pop", "remove", "sort", "reverse",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "keys", "values", "items", "get", "copy", "update", "pop", "setdefault", "clear",
];

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "title", "capitalize", "count", "find", "isdigit", "isalpha", "zfill", "format",
];

const ARRAY_METHODS: &[&str] = &["tolist", "mean", "sum", "min", "max", "std", "round", "copy"];

fn no_attribute(object: &Value, attr: &str) -> ExecError {
    ExecError::attribute(format!(
        "'{}' object has no attribute '{}'",
        object.type_name(),
        attr
    ))
}

fn frame_error(e: DatasetError) -> ExecError {
    ExecError::value(e.to_string())
}

/// `object.attr`.
pub fn get_attribute(object: &Value, attr: &str) -> ExecResult<Value> {
    let bind = |table: &[&str]| {
        table
            .contains(&attr)
            .then(|| Value::Method(Box::new(object.clone()), attr.to_string()))
    };
    let indexer = |kind: IndexerKind| {
        Value::Indexer(Box::new(Indexer {
            kind,
            target: object.clone(),
        }))
    };

    match object {
        Value::Module(module) => builtins::module_attribute(*module, attr),
        Value::Frame(frame) => match attr {
            "columns" => Ok(Value::Array(
                frame.columns().iter().cloned().map(Cell::Text).collect(),
            )),
            "shape" => Ok(Value::Tuple(vec![
                Value::Int(frame.len() as i64),
                Value::Int(frame.columns().len() as i64),
            ])),
            "size" => Ok(Value::Int((frame.len() * frame.columns().len()) as i64)),
            "empty" => Ok(Value::Bool(frame.is_empty() || frame.columns().is_empty())),
            "ndim" => Ok(Value::Int(2)),
            "iloc" => Ok(indexer(IndexerKind::Iloc)),
            "loc" => Ok(indexer(IndexerKind::Loc)),
            "index" => Ok(Value::Array((0..frame.len() as i64).map(Cell::Int).collect())),
            "values" => Ok(Value::List(
                frame
                    .rows()
                    .iter()
                    .map(|row| Value::List(row.iter().cloned().map(Value::from_cell).collect()))
                    .collect(),
            )),
            "dtypes" => {
                let labels = frame.columns().iter().cloned().map(Cell::Text).collect();
                let values = frame
                    .columns()
                    .iter()
                    .map(|c| Cell::Text(dtype_of(&frame.column(c).unwrap_or_default()).to_string()))
                    .collect();
                Ok(Value::Series(Series::labelled(None, None, labels, values)))
            }
            _ => bind(FRAME_METHODS)
                .or_else(|| Series::from_column(frame, attr).map(Value::Series))
                .ok_or_else(|| no_attribute(object, attr)),
        },
        Value::Series(series) => match attr {
            "str" => {
                if series.values.iter().any(|c| !c.is_null() && c.as_str().is_none()) {
                    return Err(ExecError::attribute(
                        "Can only use .str accessor with string values!",
                    ));
                }
                Ok(indexer(IndexerKind::Str))
            }
            "iloc" => Ok(indexer(IndexerKind::Iloc)),
            "loc" => Ok(indexer(IndexerKind::Loc)),
            "values" => Ok(Value::Array(series.values.clone())),
            "index" => Ok(Value::Array(series.index.clone())),
            "name" => Ok(series.name.clone().map_or(Value::None, Value::Str)),
            "shape" => Ok(Value::Tuple(vec![Value::Int(series.len() as i64)])),
            "size" => Ok(Value::Int(series.len() as i64)),
            "empty" => Ok(Value::Bool(series.is_empty())),
            "ndim" => Ok(Value::Int(1)),
            "dtype" => Ok(Value::Str(series.dtype().to_string())),
            "is_unique" => Ok(Value::Bool(count_values(&series.values).len() == series.len())),
            _ => bind(SERIES_METHODS).ok_or_else(|| no_attribute(object, attr)),
        },
        Value::GroupBy(group) => bind(GROUPBY_METHODS)
            .or_else(|| {
                group.frame.has_column(attr).then(|| {
                    Value::GroupBy(Box::new(GroupBy {
                        frame: Arc::clone(&group.frame),
                        keys: group.keys.clone(),
                        selection: GroupSelection::Column(attr.to_string()),
                    }))
                })
            })
            .ok_or_else(|| no_attribute(object, attr)),
        Value::Indexer(ix) if ix.kind == IndexerKind::Str => {
            let table = match ix.target {
                Value::ListSeries(_) => LIST_ACCESSOR_METHODS,
                _ => STR_ACCESSOR_METHODS,
            };
            bind(table).ok_or_else(|| no_attribute(object, attr))
        }
        Value::ListSeries(lists) => match attr {
            "str" => Ok(indexer(IndexerKind::Str)),
            "shape" => Ok(Value::Tuple(vec![Value::Int(lists.len() as i64)])),
            "size" => Ok(Value::Int(lists.len() as i64)),
            _ => bind(&["tolist", "to_list"]).ok_or_else(|| no_attribute(object, attr)),
        },
        Value::Array(cells) => match attr {
            "size" => Ok(Value::Int(cells.len() as i64)),
            "shape" => Ok(Value::Tuple(vec![Value::Int(cells.len() as i64)])),
            "ndim" => Ok(Value::Int(1)),
            "dtype" => Ok(Value::Str(dtype_of(cells).to_string())),
            _ => bind(ARRAY_METHODS).ok_or_else(|| no_attribute(object, attr)),
        },
        Value::List(_) => bind(LIST_METHODS).ok_or_else(|| no_attribute(object, attr)),
        Value::Tuple(_) => bind(&["index", "count"]).ok_or_else(|| no_attribute(object, attr)),
        Value::Dict(_) => bind(DICT_METHODS).ok_or_else(|| no_attribute(object, attr)),
        Value::Str(_) => bind(STR_METHODS).ok_or_else(|| no_attribute(object, attr)),
        other => Err(no_attribute(other, attr)),
    }
}

/// True when `name` updates `receiver` in place.
pub fn mutates_receiver(receiver: &Value, name: &str) -> bool {
    match receiver {
        Value::List(_) => matches!(
            name,
            "append" | "extend" | "insert" | "pop" | "remove" | "sort" | "reverse" | "clear"
        ),
        Value::Dict(_) => matches!(name, "update" | "pop" | "setdefault" | "clear"),
        _ => false,
    }
}

/// Call a bound method on its receiver.
pub fn call_method(receiver: Value, name: &str, mut args: Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.tick(1)?;
    if mutates_receiver(&receiver, name) {
        // mutation of a temporary: apply it to a copy and return the result
        let mut copy = receiver;
        return call_mutating(&mut copy, name, args, budget);
    }
    let result = match &receiver {
        Value::Frame(frame) => frame_method(frame, name, &mut args, budget),
        Value::Series(series) => series_method(series, name, &mut args, budget),
        Value::GroupBy(group) => groupby_method(group, name, &mut args, budget),
        Value::Indexer(ix) => match (&ix.kind, &ix.target) {
            (IndexerKind::Str, Value::Series(series)) => str_accessor(series, name, &mut args, budget),
            (IndexerKind::Str, Value::ListSeries(lists)) => list_accessor(lists, name, &mut args, budget),
            _ => Err(no_attribute(&receiver, name)),
        },
        Value::ListSeries(lists) => match name {
            "tolist" | "to_list" => Ok(Value::List(lists.to_values())),
            _ => Err(no_attribute(&receiver, name)),
        },
        Value::List(items) | Value::Tuple(items) => sequence_method(&receiver, items, name, &mut args),
        Value::Dict(entries) => dict_method(entries, name, &mut args),
        Value::Str(s) => str_method(s, name, &mut args, budget),
        Value::Array(cells) => array_method(cells, name, &mut args, budget),
        other => Err(no_attribute(other, name)),
    }?;
    args.finish()?;
    Ok(result)
}

/// Call a method that updates `target` in place. Returns what Python
/// returns: `None`, or the popped/defaulted element.
pub fn call_mutating(target: &mut Value, name: &str, mut args: Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.tick(1)?;
    let type_name = target.type_name();
    let unknown = || {
        ExecError::attribute(format!(
            "'{}' object has no attribute '{}'",
            type_name, name
        ))
    };
    let result = match target {
        Value::List(items) => match name {
            "append" => {
                budget.check_len(items.len() + 1)?;
                items.push(args.required(0, "object")?);
                Value::None
            }
            "extend" => {
                let more = args.required(0, "iterable")?.iterate()?;
                budget.check_len(items.len() + more.len())?;
                budget.touch(more.len())?;
                items.extend(more);
                Value::None
            }
            "insert" => {
                let index = args.int_or(0, "index", 0)?;
                let object = args.required(1, "object")?;
                budget.check_len(items.len() + 1)?;
                let len = items.len() as i64;
                let pos = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(pos as usize, object);
                Value::None
            }
            "pop" => {
                if items.is_empty() {
                    return Err(ExecError::index("pop from empty list"));
                }
                let index = args.int_or(0, "index", -1)?;
                let len = items.len() as i64;
                let pos = if index < 0 { index + len } else { index };
                if pos < 0 || pos >= len {
                    return Err(ExecError::index("pop index out of range"));
                }
                items.remove(pos as usize)
            }
            "remove" => {
                let needle = args.required(0, "value")?;
                let pos = items
                    .iter()
                    .position(|v| ops::values_equal(v, &needle))
                    .ok_or_else(|| ExecError::value("list.remove(x): x not in list"))?;
                items.remove(pos);
                Value::None
            }
            "sort" => {
                let reverse = args.bool_or(usize::MAX, "reverse", false)?;
                budget.touch(items.len())?;
                builtins::sort_values(items)?;
                if reverse {
                    items.reverse();
                }
                Value::None
            }
            "reverse" => {
                items.reverse();
                Value::None
            }
            "clear" => {
                items.clear();
                Value::None
            }
            _ => return Err(unknown()),
        },
        Value::Dict(entries) => match name {
            "update" => {
                let mut incoming: Vec<(Value, Value)> = match args.take(0, "other") {
                    None => Vec::new(),
                    Some(Value::Dict(d)) => d,
                    Some(other) => other
                        .iterate()?
                        .into_iter()
                        .map(|pair| match pair.iterate()?.as_slice() {
                            [k, v] => Ok((k.clone(), v.clone())),
                            _ => Err(ExecError::value(
                                "dictionary update sequence element has wrong length",
                            )),
                        })
                        .collect::<ExecResult<_>>()?,
                };
                incoming.extend(args.take_keywords().into_iter().map(|(k, v)| (Value::Str(k), v)));
                budget.check_len(entries.len() + incoming.len())?;
                for (k, v) in incoming {
                    match entries.iter_mut().find(|(e, _)| ops::values_equal(e, &k)) {
                        Some(slot) => slot.1 = v,
                        None => entries.push((k, v)),
                    }
                }
                Value::None
            }
            "pop" => {
                let key = args.required(0, "key")?;
                let default = args.take(1, "default");
                match entries.iter().position(|(k, _)| ops::values_equal(k, &key)) {
                    Some(pos) => entries.remove(pos).1,
                    None => default.ok_or_else(|| ExecError::key(key.repr()))?,
                }
            }
            "setdefault" => {
                let key = args.required(0, "key")?;
                let default = args.take(1, "default").unwrap_or(Value::None);
                match entries.iter().find(|(k, _)| ops::values_equal(k, &key)) {
                    Some((_, v)) => v.clone(),
                    None => {
                        entries.push((key, default.clone()));
                        default
                    }
                }
            }
            "clear" => {
                entries.clear();
                Value::None
            }
            _ => return Err(unknown()),
        },
        _ => return Err(unknown()),
    };
    args.finish()?;
    Ok(result)
}

// ---------------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------------

/// Positions kept by `head(n)` / `tail(n)`, negative `n` counting from the
/// other end.
fn head_tail(len: usize, n: i64, tail: bool) -> Vec<usize> {
    let k = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(len);
    match (tail, n >= 0) {
        (false, true) => (0..k).collect(),
        (false, false) => (0..len - k).collect(),
        (true, true) => (len - k..len).collect(),
        (true, false) => (k..len).collect(),
    }
}

fn column_list(value: &Value) -> ExecResult<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(_) | Value::Tuple(_) | Value::Array(_) => value
            .iterate()?
            .into_iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s),
                other => Err(ExecError::key(other.repr())),
            })
            .collect(),
        other => Err(ExecError::type_error(format!(
            "expected a column name or a list of column names, not {}",
            other.type_name()
        ))),
    }
}

fn check_columns(frame: &Dataset, names: &[String]) -> ExecResult<()> {
    match names.iter().find(|n| !frame.has_column(n)) {
        Some(missing) => Err(ExecError::key(format!("'{}'", missing))),
        None => Ok(()),
    }
}

fn ascending_flags(value: Option<Value>, n: usize) -> ExecResult<Vec<bool>> {
    match value {
        None => Ok(vec![true; n]),
        Some(Value::List(flags)) | Some(Value::Tuple(flags)) => {
            if flags.len() != n {
                return Err(ExecError::value(format!(
                    "Length of ascending ({}) != length of by ({})",
                    flags.len(),
                    n
                )));
            }
            flags.iter().map(Value::truthy).collect()
        }
        Some(flag) => Ok(vec![flag.truthy()?; n]),
    }
}

/// Stable multi-key ordering with missing values last in either direction.
fn sorted_positions(keys: &[&[Cell]], ascending: &[bool], len: usize) -> ExecResult<Vec<usize>> {
    let mut positions: Vec<usize> = (0..len).collect();
    let mut failure: Option<ExecError> = None;
    positions.sort_by(|&a, &b| {
        for (column, &asc) in keys.iter().zip(ascending) {
            let (x, y) = (&column[a], &column[b]);
            let o = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => return Ordering::Greater,
                (false, true) => return Ordering::Less,
                (false, false) => match stats::order(x, y) {
                    Ok(o) if asc => o,
                    Ok(o) => o.reverse(),
                    Err(e) => {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    }
                },
            };
            if o != Ordering::Equal {
                return o;
            }
        }
        Ordering::Equal
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(positions),
    }
}

fn is_numeric_column(cells: &[Cell]) -> bool {
    cells.iter().all(|c| c.is_numeric() || c.is_null())
}

fn numeric_reduction(name: &str) -> bool {
    matches!(name, "sum" | "mean" | "median" | "std" | "var")
}

/// Named reduction over one column of cells.
fn reduce_cells(name: &str, cells: &[Cell]) -> ExecResult<Cell> {
    match name {
        "sum" => stats::sum(cells),
        "mean" => stats::mean(cells),
        "median" => stats::median(cells),
        "min" => stats::min(cells),
        "max" => stats::max(cells),
        "std" => stats::std(cells, 1),
        "var" => stats::var(cells, 1),
        "count" => Ok(Cell::Int(stats::count(cells) as i64)),
        "nunique" => Ok(Cell::Int(count_values(cells).len() as i64)),
        "size" => Ok(Cell::Int(cells.len() as i64)),
        "first" => Ok(cells
            .iter()
            .find(|c| !c.is_null())
            .cloned()
            .unwrap_or(Cell::Float(f64::NAN))),
        "last" => Ok(cells
            .iter()
            .rev()
            .find(|c| !c.is_null())
            .cloned()
            .unwrap_or(Cell::Float(f64::NAN))),
        other => Err(ExecError::attribute(format!(
            "'{}' is not a valid function for aggregation",
            other
        ))),
    }
}

fn build_frame(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> ExecResult<Dataset> {
    let mut out = Dataset::new(columns);
    for row in rows {
        out.push_row(row).map_err(frame_error)?;
    }
    Ok(out)
}

fn fill_column(frame: &mut Dataset, column: &str, fill: &Cell) -> ExecResult<()> {
    if let Some(mut cells) = frame.column(column) {
        for cell in cells.iter_mut().filter(|c| c.is_null()) {
            *cell = fill.clone();
        }
        frame.set_column(column, cells).map_err(frame_error)?;
    }
    Ok(())
}

/// Positions of rows whose key was already seen, honouring `keep`.
fn duplicate_flags(keys: &[Vec<Cell>], keep: &str) -> Vec<bool> {
    let ids: Vec<Vec<_>> = keys.iter().map(|k| k.iter().map(Cell::key).collect()).collect();
    match keep {
        "last" => {
            let mut seen = HashSet::new();
            let mut flags: Vec<bool> = ids.iter().rev().map(|id| !seen.insert(id.clone())).collect();
            flags.reverse();
            flags
        }
        "none" => {
            let mut counts = std::collections::HashMap::new();
            for id in &ids {
                *counts.entry(id.clone()).or_insert(0usize) += 1;
            }
            ids.iter().map(|id| counts[id] > 1).collect()
        }
        _ => {
            let mut seen = HashSet::new();
            ids.iter().map(|id| !seen.insert(id.clone())).collect()
        }
    }
}

fn keep_option(args: &mut Args) -> ExecResult<String> {
    match args.take(usize::MAX, "keep") {
        None => Ok("first".to_string()),
        Some(Value::Str(s)) if s == "first" || s == "last" => Ok(s),
        Some(Value::Bool(false)) => Ok("none".to_string()),
        Some(other) => Err(ExecError::value(format!(
            "keep must be either \"first\", \"last\" or False, not {}",
            other.repr()
        ))),
    }
}

// ---------------------------------------------------------------------------
// DataFrame
// ---------------------------------------------------------------------------

fn frame_method(frame: &Arc<Dataset>, name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.touch(frame.len())?;
    match name {
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?;
            Ok(Value::frame(frame.select_rows(&head_tail(frame.len(), n, name == "tail"))))
        }
        "sort_values" => {
            let by = column_list(&args.required(0, "by")?)?;
            let ascending = ascending_flags(args.take(1, "ascending"), by.len())?;
            check_columns(frame, &by)?;
            let columns: Vec<Vec<Cell>> = by.iter().map(|c| frame.column(c).unwrap_or_default()).collect();
            let keys: Vec<&[Cell]> = columns.iter().map(Vec::as_slice).collect();
            let order = sorted_positions(&keys, &ascending, frame.len())?;
            Ok(Value::frame(frame.select_rows(&order)))
        }
        "nlargest" | "nsmallest" => {
            let n = args.int_or(0, "n", 5)?;
            let by = column_list(&args.required(1, "columns")?)?;
            let _ = keep_option(args)?;
            check_columns(frame, &by)?;
            let columns: Vec<Vec<Cell>> = by.iter().map(|c| frame.column(c).unwrap_or_default()).collect();
            let keys: Vec<&[Cell]> = columns.iter().map(Vec::as_slice).collect();
            let mut order = sorted_positions(&keys, &vec![name == "nsmallest"; by.len()], frame.len())?;
            order.retain(|&p| !columns[0][p].is_null());
            order.truncate(usize::try_from(n).unwrap_or(0));
            Ok(Value::frame(frame.select_rows(&order)))
        }
        "groupby" => {
            let keys = column_list(&args.required(0, "by")?)?;
            let _ = args.bool_or(usize::MAX, "sort", true)?;
            check_columns(frame, &keys)?;
            Ok(Value::GroupBy(Box::new(GroupBy {
                frame: Arc::clone(frame),
                keys,
                selection: GroupSelection::All,
            })))
        }
        "count" | "nunique" | "sum" | "mean" | "median" | "min" | "max" | "std" | "var" => {
            let _ = args.bool_or(usize::MAX, "numeric_only", true)?;
            let mut labels = Vec::new();
            let mut values = Vec::new();
            for column in frame.columns() {
                let cells = frame.column(column).unwrap_or_default();
                // reductions that need numbers skip text columns
                if numeric_reduction(name) && !is_numeric_column(&cells) {
                    continue;
                }
                labels.push(Cell::Text(column.clone()));
                values.push(reduce_cells(name, &cells)?);
            }
            Ok(Value::Series(Series::labelled(None, None, labels, values)))
        }
        "drop_duplicates" => {
            let subset = match args.take(0, "subset") {
                None | Some(Value::None) => frame.columns().to_vec(),
                Some(v) => column_list(&v)?,
            };
            check_columns(frame, &subset)?;
            let keep = keep_option(args)?;
            let keys: Vec<Vec<Cell>> = frame
                .rows()
                .iter()
                .map(|row| {
                    subset
                        .iter()
                        .filter_map(|c| frame.column_index(c))
                        .map(|i| row[i].clone())
                        .collect()
                })
                .collect();
            let flags = duplicate_flags(&keys, &keep);
            let kept: Vec<usize> = (0..frame.len()).filter(|&p| !flags[p]).collect();
            Ok(Value::frame(frame.select_rows(&kept)))
        }
        "dropna" => {
            let how = args.str_or(usize::MAX, "how", "any")?;
            let subset = match args.take(usize::MAX, "subset") {
                None | Some(Value::None) => frame.columns().to_vec(),
                Some(v) => column_list(&v)?,
            };
            check_columns(frame, &subset)?;
            let idx: Vec<usize> = subset.iter().filter_map(|c| frame.column_index(c)).collect();
            let kept: Vec<usize> = frame
                .rows()
                .iter()
                .enumerate()
                .filter(|(_, row)| {
                    let mut missing = idx.iter().map(|&i| row[i].is_null());
                    if how == "all" {
                        !missing.all(|m| m)
                    } else {
                        !missing.any(|m| m)
                    }
                })
                .map(|(p, _)| p)
                .collect();
            Ok(Value::frame(frame.select_rows(&kept)))
        }
        "fillna" => {
            let value = args.required(0, "value")?;
            let mut out = frame.as_ref().clone();
            match &value {
                Value::Dict(entries) => {
                    for (column, fill) in entries {
                        fill_column(&mut out, &column.to_string(), &fill.expect_cell("fill value")?)?;
                    }
                }
                scalar => {
                    let fill = scalar.expect_cell("fill value")?;
                    for column in frame.columns() {
                        fill_column(&mut out, column, &fill)?;
                    }
                }
            }
            Ok(Value::frame(out))
        }
        // frames carry a positional index, so there is nothing to move
        "reset_index" => {
            let _ = args.bool_or(usize::MAX, "drop", false)?;
            Ok(Value::Frame(Arc::clone(frame)))
        }
        "copy" => {
            let _ = args.bool_or(0, "deep", true)?;
            Ok(Value::frame(frame.as_ref().clone()))
        }
        "isna" | "isnull" | "notna" | "notnull" => {
            builtins::missing_mask(&Value::Frame(Arc::clone(frame)), name.starts_with("not"), budget)
        }
        "rename" => {
            let Value::Dict(mapping) = args.required(usize::MAX, "columns")? else {
                return Err(ExecError::type_error("rename(columns=...) expects a dict"));
            };
            let mut out = frame.as_ref().clone();
            for (from, to) in mapping {
                out.rename_column(&from.to_string(), &to.to_string());
            }
            Ok(Value::frame(out))
        }
        "drop" => frame_drop(frame, args),
        "to_dict" => {
            let orient = args.str_or(0, "orient", "dict")?;
            frame_to_dict(frame, &orient)
        }
        "select_dtypes" => {
            let include = args.take(0, "include").map(|v| column_list(&v)).transpose()?;
            let exclude = args.take(1, "exclude").map(|v| column_list(&v)).transpose()?;
            let keep: Vec<String> = frame
                .columns()
                .iter()
                .filter(|c| {
                    let dtype = dtype_of(&frame.column(c).unwrap_or_default());
                    let included = include
                        .as_ref()
                        .map_or(true, |kinds| kinds.iter().any(|k| dtype_matches(dtype, k)));
                    let excluded = exclude
                        .as_ref()
                        .is_some_and(|kinds| kinds.iter().any(|k| dtype_matches(dtype, k)));
                    included && !excluded
                })
                .cloned()
                .collect();
            Ok(Value::frame(frame.select_columns(&keep).map_err(frame_error)?))
        }
        "assign" => {
            let mut out = frame.as_ref().clone();
            for (column, value) in args.take_keywords() {
                let cells = indexing::column_cells(&value, out.len())?;
                out.set_column(&column, cells).map_err(frame_error)?;
            }
            Ok(Value::frame(out))
        }
        "to_string" => Ok(Value::Str(Value::Frame(Arc::clone(frame)).to_string())),
        other => Err(no_attribute(&Value::Frame(Arc::clone(frame)), other)),
    }
}

fn dtype_matches(dtype: &str, wanted: &str) -> bool {
    match wanted {
        "number" | "numeric" => matches!(dtype, "int64" | "float64"),
        "int" | "int64" | "integer" => dtype == "int64",
        "float" | "float64" => dtype == "float64",
        "object" | "str" | "string" | "O" => dtype == "object",
        "bool" => dtype == "bool",
        _ => false,
    }
}

fn frame_drop(frame: &Arc<Dataset>, args: &mut Args) -> ExecResult<Value> {
    let labels = args.take(0, "labels");
    let axis = args.take(1, "axis");
    let columns = args.take(usize::MAX, "columns");
    let index = args.take(usize::MAX, "index");
    let errors = args.str_or(usize::MAX, "errors", "raise")?;
    let on_columns = match &axis {
        Some(Value::Int(1)) => true,
        Some(Value::Str(s)) => s == "columns",
        _ => false,
    };
    let (drop_columns, drop_rows) = match (labels, columns, index) {
        (Some(l), None, None) if on_columns => (Some(l), None),
        (Some(l), None, None) => (None, Some(l)),
        (None, c, i) => (c, i),
        _ => {
            return Err(ExecError::value(
                "Cannot specify both 'labels' and 'index'/'columns'",
            ))
        }
    };

    let mut out = frame.as_ref().clone();
    if let Some(selector) = drop_columns {
        let names = column_list(&selector)?;
        if errors == "raise" {
            if let Some(missing) = names.iter().find(|n| !out.has_column(n)) {
                return Err(ExecError::key(format!("\"['{}'] not found in axis\"", missing)));
            }
        }
        let keep: Vec<String> = out.columns().iter().filter(|c| !names.contains(c)).cloned().collect();
        out = out.select_columns(&keep).map_err(frame_error)?;
    }
    if let Some(selector) = drop_rows {
        let items = match &selector {
            v if v.is_scalar() => vec![v.clone()],
            v => v.iterate()?,
        };
        let mut labels = Vec::with_capacity(items.len());
        for item in &items {
            match item.as_int().filter(|&i| i >= 0 && (i as usize) < out.len()) {
                Some(i) => labels.push(i as usize),
                None if errors == "raise" => {
                    return Err(ExecError::key(format!("\"[{}] not found in axis\"", item.repr())))
                }
                None => {}
            }
        }
        let keep: Vec<usize> = (0..out.len()).filter(|p| !labels.contains(p)).collect();
        out = out.select_rows(&keep);
    }
    Ok(Value::frame(out))
}

fn frame_to_dict(frame: &Dataset, orient: &str) -> ExecResult<Value> {
    let column_values = |c: &str| frame.column(c).unwrap_or_default();
    match orient {
        "dict" => Ok(Value::Dict(
            frame
                .columns()
                .iter()
                .map(|c| {
                    let inner = column_values(c)
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::Int(i as i64), Value::from_cell(v)))
                        .collect();
                    (Value::Str(c.clone()), Value::Dict(inner))
                })
                .collect(),
        )),
        "list" => Ok(Value::Dict(
            frame
                .columns()
                .iter()
                .map(|c| {
                    let items = column_values(c).into_iter().map(Value::from_cell).collect();
                    (Value::Str(c.clone()), Value::List(items))
                })
                .collect(),
        )),
        "records" | "index" => {
            let records: Vec<Value> = frame
                .rows()
                .iter()
                .map(|row| {
                    Value::Dict(
                        frame
                            .columns()
                            .iter()
                            .zip(row)
                            .map(|(c, v)| (Value::Str(c.clone()), Value::from_cell(v.clone())))
                            .collect(),
                    )
                })
                .collect();
            Ok(if orient == "records" {
                Value::List(records)
            } else {
                Value::Dict(
                    records
                        .into_iter()
                        .enumerate()
                        .map(|(i, r)| (Value::Int(i as i64), r))
                        .collect(),
                )
            })
        }
        other => Err(ExecError::value(format!(
            "orient '{}' not understood",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

fn series_method(series: &Series, name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.touch(series.len())?;
    let cells = &series.values;
    match name {
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?;
            Ok(Value::Series(series.select(&head_tail(series.len(), n, name == "tail"))))
        }
        "sum" | "mean" | "median" | "min" | "max" | "count" => {
            let _ = args.bool_or(usize::MAX, "skipna", true)?;
            let _ = args.bool_or(usize::MAX, "numeric_only", false)?;
            reduce_cells(name, cells).map(Value::from_cell)
        }
        "std" | "var" => {
            let ddof = usize::try_from(args.int_or(usize::MAX, "ddof", 1)?).unwrap_or(1);
            let out = if name == "std" {
                stats::std(cells, ddof)?
            } else {
                stats::var(cells, ddof)?
            };
            Ok(Value::from_cell(out))
        }
        "nunique" => {
            let dropna = args.bool_or(0, "dropna", true)?;
            let distinct = count_values(cells).len();
            let extra = usize::from(!dropna && cells.iter().any(Cell::is_null));
            Ok(Value::Int((distinct + extra) as i64))
        }
        "unique" => {
            let mut seen = HashSet::new();
            Ok(Value::Array(
                cells.iter().filter(|c| seen.insert(c.key())).cloned().collect(),
            ))
        }
        "value_counts" => value_counts(series, args),
        "sort_values" => {
            let ascending = args.bool_or(0, "ascending", true)?;
            let order = sorted_positions(&[cells.as_slice()], &[ascending], series.len())?;
            Ok(Value::Series(series.select(&order)))
        }
        "sort_index" => {
            let ascending = args.bool_or(usize::MAX, "ascending", true)?;
            let mut order: Vec<usize> = (0..series.len()).collect();
            order.sort_by(|&a, &b| {
                let o = series.index[a].sort_cmp(&series.index[b]);
                if ascending {
                    o
                } else {
                    o.reverse()
                }
            });
            Ok(Value::Series(series.select(&order)))
        }
        "nlargest" | "nsmallest" => {
            let n = args.int_or(0, "n", 5)?;
            let _ = keep_option(args)?;
            let mut order = sorted_positions(&[cells.as_slice()], &[name == "nsmallest"], series.len())?;
            order.retain(|&p| !cells[p].is_null());
            order.truncate(usize::try_from(n).unwrap_or(0));
            Ok(Value::Series(series.select(&order)))
        }
        "idxmax" | "idxmin" => {
            let want = if name == "idxmax" {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            let pos = stats::arg_extreme(cells, want)?.ok_or_else(|| {
                ExecError::value(format!(
                    "attempt to get {} of an empty sequence",
                    name.replace("idx", "arg")
                ))
            })?;
            Ok(Value::from_cell(series.index[pos].clone()))
        }
        "isna" | "isnull" | "notna" | "notnull" => builtins::missing_mask(
            &Value::Series(series.clone()),
            name.starts_with("not"),
            budget,
        ),
        "fillna" => {
            let fill = args.required(0, "value")?.expect_cell("fill value")?;
            Ok(Value::Series(series.with_values(
                cells
                    .iter()
                    .map(|c| if c.is_null() { fill.clone() } else { c.clone() })
                    .collect(),
            )))
        }
        "dropna" => {
            let kept: Vec<usize> = (0..series.len()).filter(|&p| !cells[p].is_null()).collect();
            Ok(Value::Series(series.select(&kept)))
        }
        "astype" => {
            let dtype = args.required(0, "dtype")?;
            let given = dtype.type_name();
            let Value::Str(dtype) = dtype else {
                return Err(ExecError::type_error(format!(
                    "dtype must be given by name, e.g. 'int' or 'str', not {}",
                    given
                )));
            };
            let converted = cells
                .iter()
                .map(|c| cast_cell(c, &dtype))
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.with_values(converted)))
        }
        "tolist" | "to_list" => Ok(Value::List(cells.iter().cloned().map(Value::from_cell).collect())),
        "to_dict" => Ok(Value::Dict(
            series
                .index
                .iter()
                .zip(cells)
                .map(|(k, v)| (Value::from_cell(k.clone()), Value::from_cell(v.clone())))
                .collect(),
        )),
        "keys" => Ok(Value::Array(series.index.clone())),
        "items" => Ok(Value::List(
            series
                .index
                .iter()
                .zip(cells)
                .map(|(k, v)| Value::Tuple(vec![Value::from_cell(k.clone()), Value::from_cell(v.clone())]))
                .collect(),
        )),
        "isin" => {
            let wanted: HashSet<_> = args
                .required(0, "values")?
                .to_cells()?
                .iter()
                .map(Cell::key)
                .collect();
            Ok(Value::Series(series.with_values(
                cells
                    .iter()
                    .map(|c| Cell::Bool(!c.is_null() && wanted.contains(&c.key())))
                    .collect(),
            )))
        }
        "between" => {
            let left = args.required(0, "left")?.expect_cell("left")?;
            let right = args.required(1, "right")?.expect_cell("right")?;
            let inclusive = args.str_or(2, "inclusive", "both")?;
            let (lo_op, hi_op) = match inclusive.as_str() {
                "both" => (super::ast::CmpOp::GtE, super::ast::CmpOp::LtE),
                "left" => (super::ast::CmpOp::GtE, super::ast::CmpOp::Lt),
                "right" => (super::ast::CmpOp::Gt, super::ast::CmpOp::LtE),
                "neither" => (super::ast::CmpOp::Gt, super::ast::CmpOp::Lt),
                other => {
                    return Err(ExecError::value(format!(
                        "Inclusive has to be either string of 'both', 'left', 'right', or 'neither', not '{}'",
                        other
                    )))
                }
            };
            let flags = cells
                .iter()
                .map(|c| {
                    Ok(Cell::Bool(
                        ops::cell_compare(lo_op, c, &left)? && ops::cell_compare(hi_op, c, &right)?,
                    ))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.with_values(flags)))
        }
        "abs" => builtins::call_function(
            "abs",
            Args::new("abs", vec![Value::Series(series.clone())], Vec::new()),
            budget,
        ),
        "round" => {
            let decimals = i32::try_from(args.int_or(0, "decimals", 0)?).unwrap_or(0);
            builtins::map_numeric(&Value::Series(series.clone()), budget, |c| match c {
                Cell::Int(i) => Ok(Cell::Int(*i)),
                c if c.is_null() => Ok(Cell::Float(f64::NAN)),
                c => c
                    .as_f64()
                    .map(|f| Cell::Float(stats::round_half_even(f, decimals)))
                    .ok_or_else(|| ExecError::type_error("round() requires numeric values")),
            })
        }
        "cumsum" => {
            let mut total: Option<Cell> = None;
            let mut out = Vec::with_capacity(cells.len());
            for cell in cells {
                if cell.is_null() {
                    out.push(Cell::Float(f64::NAN));
                    continue;
                }
                let next = match &total {
                    None => cell.clone(),
                    Some(acc) => ops::cell_binop(BinOp::Add, acc, cell)?,
                };
                out.push(next.clone());
                total = Some(next);
            }
            Ok(Value::Series(series.with_values(out)))
        }
        "diff" => {
            let periods = usize::try_from(args.int_or(0, "periods", 1)?).unwrap_or(1);
            let out = (0..cells.len())
                .map(|i| match i.checked_sub(periods) {
                    Some(j) => ops::cell_binop(BinOp::Sub, &cells[i], &cells[j]),
                    None => Ok(Cell::Float(f64::NAN)),
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.with_values(out)))
        }
        "shift" => {
            let periods = args.int_or(0, "periods", 1)?;
            let n = cells.len() as i64;
            let out = (0..n)
                .map(|i| match i.checked_sub(periods) {
                    Some(src) if (0..n).contains(&src) => cells[src as usize].clone(),
                    _ => Cell::Float(f64::NAN),
                })
                .collect();
            Ok(Value::Series(series.with_values(out)))
        }
        "clip" => {
            let mut bound = |pos: usize, name: &str| {
                args.take(pos, name)
                    .filter(|v| *v != Value::None)
                    .map(|v| v.expect_cell(name))
                    .transpose()
            };
            let lower = bound(0, "lower")?;
            let upper = bound(1, "upper")?;
            let out = cells
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    if let Some(lo) = &lower {
                        if ops::cell_compare(super::ast::CmpOp::Lt, &c, lo)? {
                            c = lo.clone();
                        }
                    }
                    if let Some(hi) = &upper {
                        if ops::cell_compare(super::ast::CmpOp::Gt, &c, hi)? {
                            c = hi.clone();
                        }
                    }
                    Ok(c)
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.with_values(out)))
        }
        "map" => {
            let mapping = args.required(0, "arg")?;
            let lookup = |c: &Cell| -> ExecResult<Cell> {
                let found = match &mapping {
                    Value::Dict(entries) => {
                        let key = Value::from_cell(c.clone());
                        entries
                            .iter()
                            .find(|(k, _)| ops::values_equal(k, &key))
                            .map(|(_, v)| v.expect_cell("mapped value"))
                            .transpose()?
                    }
                    Value::Series(table) => table.position_of(c).map(|p| table.values[p].clone()),
                    other => {
                        return Err(ExecError::type_error(format!(
                            "map() expects a dict or a Series, not {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(found.unwrap_or(Cell::Float(f64::NAN)))
            };
            let out = cells.iter().map(lookup).collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.with_values(out)))
        }
        "replace" => {
            let to_replace = args.required(0, "to_replace")?;
            let value = args.take(1, "value");
            let pairs: Vec<(Cell, Cell)> = match (&to_replace, value) {
                (Value::Dict(entries), None) => entries
                    .iter()
                    .map(|(k, v)| Ok((k.expect_cell("key")?, v.expect_cell("value")?)))
                    .collect::<ExecResult<_>>()?,
                (Value::List(olds), Some(new)) => {
                    let new = new.expect_cell("value")?;
                    olds.iter()
                        .map(|o| Ok((o.expect_cell("to_replace")?, new.clone())))
                        .collect::<ExecResult<_>>()?
                }
                (old, Some(new)) => vec![(old.expect_cell("to_replace")?, new.expect_cell("value")?)],
                (other, None) => {
                    return Err(ExecError::type_error(format!(
                        "replace() needs a value when to_replace is {}",
                        other.type_name()
                    )))
                }
            };
            let out = cells
                .iter()
                .map(|c| {
                    pairs
                        .iter()
                        .find(|(old, _)| old.key() == c.key())
                        .map_or_else(|| c.clone(), |(_, new)| new.clone())
                })
                .collect();
            Ok(Value::Series(series.with_values(out)))
        }
        "quantile" => match args.take(0, "q").unwrap_or(Value::Float(0.5)) {
            Value::List(qs) | Value::Tuple(qs) => {
                let mut labels = Vec::with_capacity(qs.len());
                let mut values = Vec::with_capacity(qs.len());
                for q in &qs {
                    let q = q.as_f64().ok_or_else(|| ExecError::type_error("q must be numeric"))?;
                    labels.push(Cell::Float(q));
                    values.push(stats::quantile(cells, q)?);
                }
                Ok(Value::Series(Series::labelled(series.name.clone(), None, labels, values)))
            }
            q => {
                let q = q.as_f64().ok_or_else(|| ExecError::type_error("q must be numeric"))?;
                stats::quantile(cells, q).map(Value::from_cell)
            }
        },
        "any" => Ok(Value::Bool(series.non_null().any(Cell::truthy))),
        "all" => Ok(Value::Bool(series.non_null().all(Cell::truthy))),
        "mode" => {
            let counts = count_values(cells);
            let top = counts.first().map_or(0, |(_, n)| *n);
            let modes: Vec<Cell> = counts
                .into_iter()
                .filter(|(_, n)| *n == top)
                .map(|(c, _)| c)
                .collect();
            Ok(Value::Series(Series::new(series.name.clone(), builtins::unique_sorted(&modes)?)))
        }
        "duplicated" | "drop_duplicates" => {
            let keep = keep_option(args)?;
            let keys: Vec<Vec<Cell>> = cells.iter().map(|c| vec![c.clone()]).collect();
            let flags = duplicate_flags(&keys, &keep);
            if name == "duplicated" {
                return Ok(Value::Series(series.with_values(flags.into_iter().map(Cell::Bool).collect())));
            }
            let kept: Vec<usize> = (0..series.len()).filter(|&p| !flags[p]).collect();
            Ok(Value::Series(series.select(&kept)))
        }
        "reset_index" => {
            let drop = args.bool_or(usize::MAX, "drop", false)?;
            let value_name = match args.take(usize::MAX, "name") {
                None | Some(Value::None) => series.name.clone().unwrap_or_else(|| "0".to_string()),
                Some(v) => v.to_string(),
            };
            if drop {
                return Ok(Value::Series(Series::new(series.name.clone(), cells.clone())));
            }
            let index_name = series.index_name.clone().unwrap_or_else(|| "index".to_string());
            let rows = series
                .index
                .iter()
                .zip(cells)
                .map(|(k, v)| vec![k.clone(), v.clone()])
                .collect();
            Ok(Value::frame(build_frame(vec![index_name, value_name], rows)?))
        }
        "to_frame" => {
            let column = match args.take(0, "name") {
                None | Some(Value::None) => series.name.clone().unwrap_or_else(|| "0".to_string()),
                Some(v) => v.to_string(),
            };
            let rows = cells.iter().map(|c| vec![c.clone()]).collect();
            Ok(Value::frame(build_frame(vec![column], rows)?))
        }
        "get" => {
            let key = args.required(0, "key")?.expect_cell("key")?;
            let default = args.take(1, "default").unwrap_or(Value::None);
            Ok(series
                .position_of(&key)
                .map_or(default, |p| Value::from_cell(cells[p].clone())))
        }
        "copy" => Ok(Value::Series(series.clone())),
        "rename" => {
            let mut out = series.clone();
            out.name = match args.take(0, "index") {
                None | Some(Value::None) => None,
                Some(v) => Some(v.to_string()),
            };
            Ok(Value::Series(out))
        }
        "item" => match cells.as_slice() {
            [one] => Ok(Value::from_cell(one.clone())),
            _ => Err(ExecError::value(
                "can only convert an array of size 1 to a Python scalar",
            )),
        },
        "agg" => match args.required(0, "func")? {
            Value::Str(func) => reduce_cells(&func, cells).map(Value::from_cell),
            Value::List(funcs) => {
                let mut labels = Vec::with_capacity(funcs.len());
                let mut values = Vec::with_capacity(funcs.len());
                for func in funcs {
                    let func = func.as_str().ok_or_else(|| ExecError::type_error("aggregation names must be strings"))?.to_string();
                    values.push(reduce_cells(&func, cells)?);
                    labels.push(Cell::Text(func));
                }
                Ok(Value::Series(Series::labelled(series.name.clone(), None, labels, values)))
            }
            other => Err(ExecError::type_error(format!(
                "agg() expects a function name or a list of names, not {}",
                other.type_name()
            ))),
        },
        other => Err(no_attribute(&Value::Series(series.clone()), other)),
    }
}

fn value_counts(series: &Series, args: &mut Args) -> ExecResult<Value> {
    let normalize = args.bool_or(0, "normalize", false)?;
    let sort = args.bool_or(1, "sort", true)?;
    let ascending = args.bool_or(2, "ascending", false)?;
    let dropna = args.bool_or(usize::MAX, "dropna", true)?;

    let mut counts = count_values(&series.values);
    let missing = series.values.iter().filter(|c| c.is_null()).count();
    if !dropna && missing > 0 {
        counts.push((Cell::Float(f64::NAN), missing));
        counts.sort_by(|a, b| b.1.cmp(&a.1));
    }
    if !sort {
        let first_seen = |cell: &Cell| {
            let key = cell.key();
            series.values.iter().position(|v| v.key() == key).unwrap_or(usize::MAX)
        };
        counts.sort_by_key(|(cell, _)| first_seen(cell));
    } else if ascending {
        counts.sort_by_key(|(_, n)| *n);
    }

    let total: usize = counts.iter().map(|(_, n)| n).sum();
    let (labels, values): (Vec<Cell>, Vec<Cell>) = counts
        .into_iter()
        .map(|(cell, n)| {
            let value = if normalize {
                Cell::Float(n as f64 / total.max(1) as f64)
            } else {
                Cell::Int(n as i64)
            };
            (cell, value)
        })
        .unzip();
    let name = if normalize { "proportion" } else { "count" };
    Ok(Value::Series(Series::labelled(
        Some(name.to_string()),
        series.name.clone(),
        labels,
        values,
    )))
}

fn cast_cell(cell: &Cell, dtype: &str) -> ExecResult<Cell> {
    match dtype {
        "int" | "int64" | "int32" => match cell {
            Cell::Int(i) => Ok(Cell::Int(*i)),
            Cell::Bool(b) => Ok(Cell::Int(i64::from(*b))),
            Cell::Float(f) if f.is_finite() => Ok(Cell::Int(f.trunc() as i64)),
            Cell::Text(s) => s.trim().parse::<i64>().map(Cell::Int).map_err(|_| {
                ExecError::value(format!("invalid literal for int() with base 10: '{}'", s))
            }),
            _ => Err(ExecError::value(
                "Cannot convert non-finite values (NA or inf) to integer",
            )),
        },
        "float" | "float64" | "float32" => match cell {
            Cell::Null => Ok(Cell::Float(f64::NAN)),
            Cell::Text(s) => s.trim().parse::<f64>().map(Cell::Float).map_err(|_| {
                ExecError::value(format!("could not convert string to float: '{}'", s))
            }),
            other => Ok(Cell::Float(other.as_f64().unwrap_or(f64::NAN))),
        },
        "str" | "string" => Ok(Cell::Text(cell.to_string())),
        "bool" => Ok(Cell::Bool(cell.truthy())),
        "object" | "category" => Ok(cell.clone()),
        other => Err(ExecError::type_error(format!(
            "data type '{}' not understood",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// GroupBy
// ---------------------------------------------------------------------------

fn group_cells(frame: &Dataset, column: &str, rows: &[usize]) -> Vec<Cell> {
    match frame.column_index(column) {
        Some(i) => rows.iter().map(|&r| frame.rows()[r][i].clone()).collect(),
        None => vec![Cell::Null; rows.len()],
    }
}

/// Value columns a frame-level aggregation covers.
fn value_columns(group: &GroupBy, func: &str) -> Vec<String> {
    let frame = &group.frame;
    let candidates: Vec<String> = match &group.selection {
        GroupSelection::All => frame.columns().to_vec(),
        GroupSelection::Columns(cs) => cs.clone(),
        GroupSelection::Column(c) => vec![c.clone()],
    };
    candidates
        .into_iter()
        .filter(|c| !group.keys.contains(c))
        .filter(|c| {
            !numeric_reduction(func) || is_numeric_column(&frame.column(c).unwrap_or_default())
        })
        .collect()
}

/// One aggregated Series over a single column, or group sizes when
/// `column` is `None`.
fn aggregate_series(group: &GroupBy, column: Option<&str>, func: &str) -> ExecResult<Value> {
    let groups = group.groups();
    let mut labels = Vec::with_capacity(groups.len());
    let mut values = Vec::with_capacity(groups.len());
    for (key, rows) in &groups {
        labels.push(GroupBy::label(key));
        values.push(match column {
            Some(c) => reduce_cells(func, &group_cells(&group.frame, c, rows))?,
            None => Cell::Int(rows.len() as i64),
        });
    }
    Ok(Value::Series(Series::labelled(
        column.map(str::to_string),
        group.index_name(),
        labels,
        values,
    )))
}

/// A frame of key columns followed by one column per `(output, column, func)`.
fn aggregate_frame(group: &GroupBy, plan: &[(String, String, String)]) -> ExecResult<Value> {
    let columns = group
        .keys
        .iter()
        .cloned()
        .chain(plan.iter().map(|(output, _, _)| output.clone()))
        .collect();
    let mut rows = Vec::new();
    for (key, positions) in group.groups() {
        let mut row = key;
        for (_, column, func) in plan {
            row.push(reduce_cells(func, &group_cells(&group.frame, column, &positions))?);
        }
        rows.push(row);
    }
    Ok(Value::frame(build_frame(columns, rows)?))
}

fn groupby_method(group: &GroupBy, name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.touch(group.frame.len())?;
    let column = match &group.selection {
        GroupSelection::Column(c) => Some(c.as_str()),
        _ => None,
    };
    match name {
        "size" => aggregate_series(group, None, "size"),
        "agg" | "aggregate" => match args.required(0, "func")? {
            Value::Str(func) => uniform_aggregate(group, column, &func),
            Value::List(funcs) => {
                let funcs = funcs
                    .iter()
                    .map(|f| f.as_str().map(str::to_string).ok_or_else(|| ExecError::type_error("aggregation names must be strings")))
                    .collect::<ExecResult<Vec<_>>>()?;
                let plan: Vec<(String, String, String)> = match column {
                    Some(c) => funcs.iter().map(|f| (f.clone(), c.to_string(), f.clone())).collect(),
                    None => value_columns(group, "")
                        .iter()
                        .flat_map(|c| funcs.iter().map(move |f| (format!("{}_{}", c, f), c.clone(), f.clone())))
                        .collect(),
                };
                aggregate_frame(group, &plan)
            }
            Value::Dict(entries) => {
                let mut plan = Vec::new();
                for (k, v) in entries {
                    let column = k.to_string();
                    if !group.frame.has_column(&column) {
                        return Err(ExecError::key(format!("\"Column(s) ['{}'] do not exist\"", column)));
                    }
                    match v {
                        Value::Str(func) => plan.push((column.clone(), column, func)),
                        Value::List(funcs) => {
                            for f in funcs {
                                let f = f.as_str().ok_or_else(|| ExecError::type_error("aggregation names must be strings"))?;
                                plan.push((format!("{}_{}", column, f), column.clone(), f.to_string()));
                            }
                        }
                        other => {
                            return Err(ExecError::type_error(format!(
                                "aggregation for '{}' must be a name, not {}",
                                column,
                                other.type_name()
                            )))
                        }
                    }
                }
                aggregate_frame(group, &plan)
            }
            other => Err(ExecError::type_error(format!(
                "agg() expects a function name, list or dict, not {}",
                other.type_name()
            ))),
        },
        func => {
            let _ = args.bool_or(usize::MAX, "numeric_only", false)?;
            uniform_aggregate(group, column, func)
        }
    }
}

fn uniform_aggregate(group: &GroupBy, column: Option<&str>, func: &str) -> ExecResult<Value> {
    if func == "size" {
        return aggregate_series(group, None, "size");
    }
    match column {
        Some(c) => aggregate_series(group, Some(c), func),
        None => {
            let plan: Vec<(String, String, String)> = value_columns(group, func)
                .into_iter()
                .map(|c| (c.clone(), c, func.to_string()))
                .collect();
            aggregate_frame(group, &plan)
        }
    }
}

// ---------------------------------------------------------------------------
// .str accessor
// ---------------------------------------------------------------------------

fn compile_pattern(pattern: &str, case: bool, anchor: Option<&str>) -> ExecResult<Regex> {
    let source = match anchor {
        Some("match") => format!("^(?:{})", pattern),
        Some(_) => format!("^(?:{})$", pattern),
        None => pattern.to_string(),
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| ExecError::value(format!("invalid regular expression: {}", e)))
}

fn str_accessor(series: &Series, name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.touch(series.len())?;
    let missing = Cell::Float(f64::NAN);
    let map_text = |f: &dyn Fn(&str) -> Cell| -> Vec<Cell> {
        series
            .values
            .iter()
            .map(|c| match c {
                Cell::Text(s) => f(s),
                _ => missing.clone(),
            })
            .collect()
    };
    let with_na = |flags: Vec<Cell>, na: Option<Value>| -> ExecResult<Vec<Cell>> {
        let Some(na) = na.filter(|v| *v != Value::None) else {
            return Ok(flags);
        };
        let fill = na.expect_cell("na")?;
        Ok(flags
            .into_iter()
            .map(|c| if c.is_null() { fill.clone() } else { c })
            .collect())
    };

    let values = match name {
        "contains" => {
            let pat = args.required(0, "pat")?;
            let pat = pat.as_str().ok_or_else(|| ExecError::type_error("pat must be a string"))?.to_string();
            let case = args.bool_or(1, "case", true)?;
            let _ = args.int_or(2, "flags", 0)?;
            let na = args.take(3, "na");
            let regex = args.bool_or(4, "regex", true)?;
            let flags = if regex {
                let re = compile_pattern(&pat, case, None)?;
                map_text(&|s| Cell::Bool(re.is_match(s)))
            } else if case {
                map_text(&|s| Cell::Bool(s.contains(pat.as_str())))
            } else {
                let needle = pat.to_lowercase();
                map_text(&|s| Cell::Bool(s.to_lowercase().contains(&needle)))
            };
            with_na(flags, na)?
        }
        "match" | "fullmatch" => {
            let pat = args.required(0, "pat")?;
            let pat = pat.as_str().ok_or_else(|| ExecError::type_error("pat must be a string"))?.to_string();
            let case = args.bool_or(1, "case", true)?;
            let _ = args.int_or(2, "flags", 0)?;
            let na = args.take(3, "na");
            let re = compile_pattern(&pat, case, Some(name))?;
            with_na(map_text(&|s| Cell::Bool(re.is_match(s))), na)?
        }
        "startswith" | "endswith" => {
            let prefixes: Vec<String> = match args.required(0, "pat")? {
                Value::Str(s) => vec![s],
                Value::Tuple(items) | Value::List(items) => items.iter().map(|v| v.to_string()).collect(),
                other => {
                    return Err(ExecError::type_error(format!(
                        "expected a string or tuple, not {}",
                        other.type_name()
                    )))
                }
            };
            let na = args.take(1, "na");
            let starts = name == "startswith";
            let flags = map_text(&|s| {
                Cell::Bool(prefixes.iter().any(|p| {
                    if starts {
                        s.starts_with(p.as_str())
                    } else {
                        s.ends_with(p.as_str())
                    }
                }))
            });
            with_na(flags, na)?
        }
        "lower" => map_text(&|s| Cell::Text(s.to_lowercase())),
        "upper" => map_text(&|s| Cell::Text(s.to_uppercase())),
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.take(0, "to_strip").filter(|v| *v != Value::None).map(|v| v.to_string());
            map_text(&|s| Cell::Text(strip_chars(s, name, chars.as_deref())))
        }
        "title" => map_text(&|s| Cell::Text(title_case(s))),
        "len" => map_text(&|s| Cell::Int(s.chars().count() as i64)),
        "isdigit" | "isnumeric" => map_text(&|s| {
            Cell::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        }),
        "count" => {
            let pat = args.required(0, "pat")?.to_string();
            let re = compile_pattern(&pat, true, None)?;
            map_text(&|s| Cell::Int(re.find_iter(s).count() as i64))
        }
        "replace" => {
            let pat = args.required(0, "pat")?.to_string();
            let repl = args.required(1, "repl")?.to_string();
            let n = args.int_or(2, "n", -1)?;
            let case = args.take(3, "case").map(|v| v.truthy()).transpose()?.unwrap_or(true);
            let _ = args.int_or(4, "flags", 0)?;
            let regex = args.bool_or(5, "regex", false)?;
            let limit = usize::try_from(n).unwrap_or(0);
            if regex || !case {
                let source = if regex { pat.clone() } else { regex::escape(&pat) };
                let re = compile_pattern(&source, case, None)?;
                map_text(&|s| Cell::Text(re.replacen(s, limit, NoExpand(&repl)).into_owned()))
            } else if n < 0 {
                map_text(&|s| Cell::Text(s.replace(pat.as_str(), &repl)))
            } else {
                map_text(&|s| Cell::Text(s.replacen(pat.as_str(), &repl, limit)))
            }
        }
        "get" => {
            let i = args.int_or(0, "i", 0)?;
            map_text(&|s| {
                let chars: Vec<char> = s.chars().collect();
                let n = chars.len() as i64;
                let pos = if i < 0 { i + n } else { i };
                if (0..n).contains(&pos) {
                    Cell::Text(chars[pos as usize].to_string())
                } else {
                    missing.clone()
                }
            })
        }
        "split" => {
            let pat = args.take(0, "pat").filter(|v| *v != Value::None).map(|v| v.to_string());
            // pandas reads n=0 as "no limit"
            let n = match args.int_or(1, "n", -1)? {
                0 => -1,
                n => n,
            };
            if args.bool_or(2, "expand", false)? {
                return Err(ExecError::value(
                    "split(expand=True) is not supported; select parts with .str[i]",
                ));
            }
            let _ = args.take(3, "regex");
            let limits: &Budget = budget;
            let lists = ListSeries::split(series, |s| {
                let parts = split_text(s, pat.as_deref(), n)?;
                limits.check_len(parts.len())?;
                Ok(parts)
            })?;
            budget.touch(lists.rows.iter().flatten().map(Vec::len).sum())?;
            return Ok(Value::ListSeries(Box::new(lists)));
        }
        "slice" => {
            let start = args.take(0, "start").and_then(|v| v.as_int());
            let stop = args.take(1, "stop").and_then(|v| v.as_int());
            let step = args.take(2, "step").and_then(|v| v.as_int());
            if step == Some(0) {
                return Err(ExecError::value("slice step cannot be zero"));
            }
            map_text(&|s| {
                let chars: Vec<char> = s.chars().collect();
                let positions = indexing::slice_positions(chars.len(), start, stop, step).unwrap_or_default();
                Cell::Text(positions.iter().map(|&p| chars[p]).collect())
            })
        }
        other => {
            return Err(ExecError::attribute(format!(
                "'StringMethods' object has no attribute '{}'",
                other
            )))
        }
    };
    Ok(Value::Series(series.with_values(values)))
}

fn list_accessor(lists: &ListSeries, name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.touch(lists.len())?;
    let series = match name {
        "get" => lists.get(args.int_or(0, "i", 0)?),
        "len" => lists.map_rows(|parts| Cell::Int(parts.len() as i64)),
        "join" => {
            let sep = args.str_or(0, "sep", "")?;
            lists.map_rows(|parts| Cell::Text(parts.join(&sep)))
        }
        other => {
            return Err(ExecError::attribute(format!(
                "'StringMethods' object has no attribute '{}'",
                other
            )))
        }
    };
    Ok(Value::Series(series))
}

fn strip_chars(s: &str, mode: &str, chars: Option<&str>) -> String {
    let pred = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    match mode {
        "lstrip" => s.trim_start_matches(pred).to_string(),
        "rstrip" => s.trim_end_matches(pred).to_string(),
        _ => s.trim_matches(pred).to_string(),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// list, tuple, dict, str, array
// ---------------------------------------------------------------------------

fn sequence_method(receiver: &Value, items: &[Value], name: &str, args: &mut Args) -> ExecResult<Value> {
    match name {
        "index" => {
            let needle = args.required(0, "value")?;
            items
                .iter()
                .position(|v| ops::values_equal(v, &needle))
                .map(|p| Value::Int(p as i64))
                .ok_or_else(|| ExecError::value(format!("{} is not in {}", needle.repr(), receiver.type_name())))
        }
        "count" => {
            let needle = args.required(0, "value")?;
            Ok(Value::Int(items.iter().filter(|v| ops::values_equal(v, &needle)).count() as i64))
        }
        "copy" if matches!(receiver, Value::List(_)) => Ok(receiver.clone()),
        other => Err(no_attribute(receiver, other)),
    }
}

fn dict_method(entries: &[(Value, Value)], name: &str, args: &mut Args) -> ExecResult<Value> {
    match name {
        "keys" => Ok(Value::List(entries.iter().map(|(k, _)| k.clone()).collect())),
        "values" => Ok(Value::List(entries.iter().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::List(
            entries
                .iter()
                .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "get" => {
            let key = args.required(0, "key")?;
            let default = args.take(1, "default").unwrap_or(Value::None);
            Ok(entries
                .iter()
                .find(|(k, _)| ops::values_equal(k, &key))
                .map_or(default, |(_, v)| v.clone()))
        }
        "copy" => Ok(Value::Dict(entries.to_vec())),
        other => Err(no_attribute(&Value::Dict(Vec::new()), other)),
    }
}

fn str_method(s: &str, name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    let text = |v: String| Ok(Value::Str(v));
    match name {
        "lower" => text(s.to_lowercase()),
        "upper" => text(s.to_uppercase()),
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.take(0, "chars").filter(|v| *v != Value::None).map(|v| v.to_string());
            text(strip_chars(s, name, chars.as_deref()))
        }
        "title" => text(title_case(s)),
        "capitalize" => {
            let mut chars = s.chars();
            text(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "split" => {
            let sep = args.take(0, "sep").filter(|v| *v != Value::None).map(|v| v.to_string());
            let maxsplit = args.int_or(1, "maxsplit", -1)?;
            let parts = split_text(s, sep.as_deref(), maxsplit)?;
            budget.check_len(parts.len())?;
            Ok(Value::List(parts.into_iter().map(Value::Str).collect()))
        }
        "join" => {
            let items = args.required(0, "iterable")?.iterate()?;
            budget.touch(items.len())?;
            let pieces = items
                .iter()
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Str(p) => Ok(p.clone()),
                    other => Err(ExecError::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        i,
                        other.type_name()
                    ))),
                })
                .collect::<ExecResult<Vec<_>>>()?;
            let joined = pieces.join(s);
            budget.check_len(joined.len())?;
            text(joined)
        }
        "replace" => {
            let old = args.required(0, "old")?.to_string();
            let new = args.required(1, "new")?.to_string();
            let count = args.int_or(2, "count", -1)?;
            let out = if count < 0 {
                s.replace(old.as_str(), &new)
            } else {
                s.replacen(old.as_str(), &new, usize::try_from(count).unwrap_or(0))
            };
            budget.check_len(out.len())?;
            text(out)
        }
        "startswith" | "endswith" => {
            let candidates: Vec<String> = match args.required(0, "prefix")? {
                Value::Tuple(items) => items.iter().map(|v| v.to_string()).collect(),
                v => vec![v.to_string()],
            };
            let starts = name == "startswith";
            Ok(Value::Bool(candidates.iter().any(|c| {
                if starts {
                    s.starts_with(c.as_str())
                } else {
                    s.ends_with(c.as_str())
                }
            })))
        }
        "count" => {
            let sub = args.required(0, "sub")?.to_string();
            Ok(Value::Int(if sub.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(sub.as_str()).count() as i64
            }))
        }
        "find" => {
            let sub = args.required(0, "sub")?.to_string();
            Ok(Value::Int(
                s.find(sub.as_str())
                    .map_or(-1, |byte| s[..byte].chars().count() as i64),
            ))
        }
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "zfill" => {
            let width = usize::try_from(args.int_or(0, "width", 0)?).unwrap_or(0);
            let len = s.chars().count();
            if len >= width {
                return text(s.to_string());
            }
            budget.check_len(width)?;
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            text(format!("{}{}{}", sign, "0".repeat(width - len), digits))
        }
        "format" => {
            let positional = args.rest(0);
            let keywords = args.take_keywords();
            let out = str_format(s, &positional, &keywords)?;
            budget.check_len(out.len())?;
            text(out)
        }
        other => Err(no_attribute(&Value::Str(String::new()), other)),
    }
}

/// Python `str.split`: on `sep`, or on runs of whitespace when it is absent.
/// A negative `maxsplit` means no limit.
fn split_text(s: &str, sep: Option<&str>, maxsplit: i64) -> ExecResult<Vec<String>> {
    Ok(match sep {
        None => split_whitespace_n(s, maxsplit),
        Some("") => return Err(ExecError::value("empty separator")),
        Some(sep) => match usize::try_from(maxsplit) {
            Ok(limit) => s.splitn(limit.saturating_add(1), sep).map(str::to_string).collect(),
            Err(_) => s.split(sep).map(str::to_string).collect(),
        },
    })
}

fn split_whitespace_n(s: &str, maxsplit: i64) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(rest[..i].to_string());
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

/// `"{} of {total:,}".format(...)`: auto, numbered and named fields, each
/// with an optional `!r`/`!s` conversion and format spec.
pub fn str_format(template: &str, positional: &[Value], keywords: &[(String, Value)]) -> ExecResult<String> {
    let mut out = String::new();
    let mut auto = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return Err(ExecError::value("Single '{' encountered in format string")),
                    }
                }
                let (head, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (key, conversion) = match head.split_once('!') {
                    Some((k, conv)) => (k, Some(conv)),
                    None => (head, None),
                };
                let value = if key.is_empty() {
                    auto += 1;
                    positional.get(auto - 1).ok_or_else(|| {
                        ExecError::index(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto - 1
                        ))
                    })?
                } else if let Ok(i) = key.parse::<usize>() {
                    positional.get(i).ok_or_else(|| {
                        ExecError::index(format!(
                            "Replacement index {} out of range for positional args tuple",
                            i
                        ))
                    })?
                } else {
                    keywords
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v)
                        .ok_or_else(|| ExecError::key(format!("'{}'", key)))?
                };
                let rendered = match conversion {
                    Some("r") => ops::format_value(&Value::Str(value.repr()), spec)?,
                    Some("s") => ops::format_value(&Value::Str(value.to_string()), spec)?,
                    Some(other) => {
                        return Err(ExecError::value(format!(
                            "Unknown conversion specifier {}",
                            other
                        )))
                    }
                    None => ops::format_value(value, spec)?,
                };
                out.push_str(&rendered);
            }
            '}' => return Err(ExecError::value("Single '}' encountered in format string")),
            other => out.push(other),
        }
    }
    Ok(out)
}

fn array_method(cells: &[Cell], name: &str, args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    let array = || Value::Array(cells.to_vec());
    let numpy = |func: &'static str, mut extra: Vec<(String, Value)>, budget: &mut Budget| {
        extra.retain(|(_, v)| *v != Value::None);
        builtins::call_function(func, Args::new(func, vec![array()], extra), budget)
    };
    match name {
        "tolist" => Ok(Value::List(cells.iter().cloned().map(Value::from_cell).collect())),
        "copy" => Ok(array()),
        "mean" => numpy("np.mean", Vec::new(), budget),
        "sum" => numpy("np.sum", Vec::new(), budget),
        "min" => numpy("np.min", Vec::new(), budget),
        "max" => numpy("np.max", Vec::new(), budget),
        "std" => {
            let ddof = args.take(usize::MAX, "ddof").unwrap_or(Value::None);
            numpy("np.std", vec![("ddof".to_string(), ddof)], budget)
        }
        "round" => {
            let decimals = args.take(0, "decimals").unwrap_or(Value::None);
            numpy("np.round", vec![("decimals".to_string(), decimals)], budget)
        }
        other => Err(no_attribute(&array(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Budget {
        Budget::new(1_000_000, 100_000)
    }

    fn flows() -> Value {
        Value::frame(
            Dataset::from_json_str(
                r#"[
                    {"src": "10.0.0.1", "proto": "tcp", "bytes": 100, "label": "normal"},
                    {"src": "10.0.0.2", "proto": "udp", "bytes": 300, "label": "DoS"},
                    {"src": "10.0.0.1", "proto": "tcp", "bytes": null, "label": "normal"},
                    {"src": "10.0.0.3", "proto": "tcp", "bytes": 50, "label": "PortScan"}
                ]"#,
            )
            .unwrap(),
        )
    }

    fn call(receiver: &Value, name: &str, positional: Vec<Value>, keywords: Vec<(&str, Value)>) -> ExecResult<Value> {
        let method = get_attribute(receiver, name)?;
        let Value::Method(recv, method_name) = method else {
            panic!("{name} is not a method");
        };
        let keywords = keywords.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        call_method(*recv, &method_name, Args::new(name, positional, keywords), &mut budget())
    }

    fn column(frame: &Value, name: &str) -> Value {
        get_attribute(frame, name).unwrap()
    }

    #[test]
    fn test_frame_properties() {
        let df = flows();
        assert_eq!(
            get_attribute(&df, "shape").unwrap(),
            Value::Tuple(vec![Value::Int(4), Value::Int(4)])
        );
        let Value::Array(cols) = get_attribute(&df, "columns").unwrap() else {
            panic!("expected array");
        };
        assert_eq!(cols[0], Cell::Text("src".into()));
        assert!(get_attribute(&df, "to_csv").is_err());
    }

    #[test]
    fn test_value_counts_shape() {
        let proto = column(&flows(), "proto");
        let Value::Series(counts) = call(&proto, "value_counts", vec![], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(counts.name.as_deref(), Some("count"));
        assert_eq!(counts.index_name.as_deref(), Some("proto"));
        assert_eq!(counts.index, vec![Cell::Text("tcp".into()), Cell::Text("udp".into())]);
        assert_eq!(counts.values, vec![Cell::Int(3), Cell::Int(1)]);

        let Value::Series(share) =
            call(&proto, "value_counts", vec![], vec![("normalize", Value::Bool(true))]).unwrap()
        else {
            panic!("expected series");
        };
        assert_eq!(share.values[0], Cell::Float(0.75));
    }

    #[test]
    fn test_sort_values_puts_missing_last() {
        let df = flows();
        let sorted = call(
            &df,
            "sort_values",
            vec![Value::Str("bytes".into())],
            vec![("ascending", Value::Bool(false))],
        )
        .unwrap();
        let Value::Series(bytes) = column(&sorted, "bytes") else {
            panic!("expected series");
        };
        assert_eq!(bytes.values[0], Cell::Int(300));
        assert!(bytes.values[3].is_null());
    }

    #[test]
    fn test_groupby_sum_per_key() {
        let df = flows();
        let grouped = call(&df, "groupby", vec![Value::Str("proto".into())], vec![]).unwrap();
        let by_proto = indexing::subscript(&grouped, &Value::Str("bytes".into()), &mut budget()).unwrap();
        let Value::Series(sums) = call(&by_proto, "sum", vec![], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(sums.index, vec![Cell::Text("tcp".into()), Cell::Text("udp".into())]);
        assert_eq!(sums.values, vec![Cell::Int(150), Cell::Int(300)]);
        assert_eq!(sums.index_name.as_deref(), Some("proto"));

        let Value::Frame(frame) = call(&grouped, "sum", vec![], vec![]).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.columns(), ["proto".to_string(), "bytes".to_string()]);
    }

    #[test]
    fn test_groupby_size_and_agg_dict() {
        let df = flows();
        let grouped = call(&df, "groupby", vec![Value::Str("src".into())], vec![]).unwrap();
        let Value::Series(sizes) = call(&grouped, "size", vec![], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(sizes.values, vec![Cell::Int(2), Cell::Int(1), Cell::Int(1)]);

        let spec = Value::Dict(vec![(Value::Str("bytes".into()), Value::Str("max".into()))]);
        let Value::Frame(frame) = call(&grouped, "agg", vec![spec], vec![]).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.get(0, "bytes"), Some(&Cell::Int(100)));
    }

    #[test]
    fn test_str_accessor_contains_is_case_aware() {
        let label = column(&flows(), "label");
        let accessor = get_attribute(&label, "str").unwrap();
        let Value::Series(mask) = call(
            &accessor,
            "contains",
            vec![Value::Str("dos|portscan".into())],
            vec![("case", Value::Bool(false))],
        )
        .unwrap() else {
            panic!("expected series");
        };
        assert_eq!(
            mask.values,
            vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(false), Cell::Bool(true)]
        );
    }

    #[test]
    fn test_split_parts_out_of_range_are_missing() {
        let src = column(&flows(), "src");
        let accessor = get_attribute(&src, "str").unwrap();
        let lists = call(&accessor, "split", vec![Value::Str(".".into())], vec![]).unwrap();
        assert_eq!(lists.type_name(), "Series");
        let parts = get_attribute(&lists, "str").unwrap();

        let Value::Series(last) = indexing::subscript(&parts, &Value::Int(-1), &mut budget()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(last.values[1], Cell::Text("2".into()));
        let Value::Series(far) = indexing::subscript(&parts, &Value::Int(10), &mut budget()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(far.len(), 4);
        assert!(far.values.iter().all(Cell::is_null));

        let Value::Series(first) = call(&parts, "get", vec![Value::Int(0)], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(first.values[0], Cell::Text("10".into()));
        let Value::Series(counts) = call(&parts, "len", vec![], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(counts.values[0], Cell::Int(4));
    }

    #[test]
    fn test_split_with_limit_and_expand() {
        let src = column(&flows(), "src");
        let accessor = get_attribute(&src, "str").unwrap();
        let lists = call(&accessor, "split", vec![Value::Str(".".into())], vec![("n", Value::Int(1))]).unwrap();
        let Value::List(rows) = call(&lists, "tolist", vec![], vec![]).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(
            rows[0],
            Value::List(vec![Value::Str("10".into()), Value::Str("0.0.1".into())])
        );
        let err = call(&accessor, "split", vec![Value::Str(".".into())], vec![("expand", Value::Bool(true))])
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ValueError);
    }

    #[test]
    fn test_str_accessor_rejects_numbers() {
        let bytes = column(&flows(), "bytes");
        assert!(get_attribute(&bytes, "str").is_err());
    }

    #[test]
    fn test_nlargest_and_idxmax() {
        let bytes = column(&flows(), "bytes");
        let Value::Series(top) = call(&bytes, "nlargest", vec![Value::Int(2)], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(top.index, vec![Cell::Int(1), Cell::Int(0)]);
        assert_eq!(call(&bytes, "idxmax", vec![], vec![]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_list_mutation_in_place() {
        let mut items = Value::List(vec![Value::Int(3), Value::Int(1)]);
        assert!(mutates_receiver(&items, "append"));
        call_mutating(&mut items, "append", Args::new("append", vec![Value::Int(2)], Vec::new()), &mut budget()).unwrap();
        call_mutating(&mut items, "sort", Args::new("sort", Vec::new(), Vec::new()), &mut budget()).unwrap();
        assert_eq!(items, Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn test_str_format_fields() {
        let out = str_format(
            "{} flows, {share:.1%} suspicious, top {0!r}",
            &[Value::Str("x".into())],
            &[("share".to_string(), Value::Float(0.25))],
        )
        .unwrap();
        assert_eq!(out, "x flows, 25.0% suspicious, top 'x'");
        assert!(str_format("{", &[], &[]).is_err());
    }

    #[test]
    fn test_series_reset_index_builds_frame() {
        let proto = column(&flows(), "proto");
        let counts = call(&proto, "value_counts", vec![], vec![]).unwrap();
        let Value::Frame(frame) = call(&counts, "reset_index", vec![], vec![]).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.columns(), ["proto".to_string(), "count".to_string()]);
        assert_eq!(frame.get(0, "count"), Some(&Cell::Int(3)));
    }

    #[test]
    fn test_drop_duplicates_and_dropna() {
        let df = flows();
        let Value::Frame(unique) =
            call(&df, "drop_duplicates", vec![], vec![("subset", Value::Str("src".into()))]).unwrap()
        else {
            panic!("expected frame");
        };
        assert_eq!(unique.len(), 3);
        let Value::Frame(complete) = call(&df, "dropna", vec![], vec![]).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(complete.len(), 3);
    }

    #[test]
    fn test_astype_and_isin() {
        let bytes = column(&flows(), "bytes");
        let Value::Series(text) = call(&bytes, "astype", vec![Value::Str("str".into())], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(text.values[0], Cell::Text("100".into()));
        let wanted = Value::List(vec![Value::Int(50), Value::Int(300)]);
        let Value::Series(mask) = call(&bytes, "isin", vec![wanted], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(
            mask.values,
            vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(false), Cell::Bool(true)]
        );
    }

    #[test]
    fn test_shift_with_extreme_periods() {
        let bytes = column(&flows(), "bytes");
        for periods in [i64::MAX, i64::MIN, -9_223_372_036_854_775_807] {
            let Value::Series(out) = call(&bytes, "shift", vec![Value::Int(periods)], vec![]).unwrap() else {
                panic!("expected series");
            };
            assert_eq!(out.len(), 4);
            assert!(out.values.iter().all(Cell::is_null), "{periods}");
        }
        let Value::Series(out) = call(&bytes, "shift", vec![Value::Int(-1)], vec![]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(out.values[0], Cell::Int(300));
        assert!(out.values[3].is_null());
    }

    #[test]
    fn test_zfill_width_is_capped() {
        let s = Value::Str("-7".into());
        assert_eq!(call(&s, "zfill", vec![Value::Int(4)], vec![]).unwrap(), Value::Str("-007".into()));
        let err = call(&s, "zfill", vec![Value::Int(100_000_000_000)], vec![]).unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ResourceLimit);
    }

    #[test]
    fn test_unknown_keyword_is_rejected() {
        let df = flows();
        assert!(call(&df, "head", vec![], vec![("rows", Value::Int(2))]).is_err());
    }
}
