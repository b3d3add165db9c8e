//! Subscripts: `obj[key]`, `.iloc[...]`, `.loc[...]`, `.str[...]` and
//! item assignment.

use std::sync::Arc;

use super::error::{Budget, ExecError, ExecResult};
use super::value::{GroupBy, GroupSelection, Indexer, IndexerKind, Series, Value};
use crate::dataset::{Cell, Dataset};

/// Positions selected by a Python slice over `len` elements.
pub fn slice_positions(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> ExecResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExecError::value("slice step cannot be zero"));
    }
    let n = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64| if v < 0 { v + n } else { v };

    let mut out = Vec::new();
    if step > 0 {
        let lo = start.map_or(0, |s| clamp(resolve(s), 0, n));
        let hi = stop.map_or(n, |s| clamp(resolve(s), 0, n));
        let mut i = lo;
        while i < hi {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let hi = start.map_or(n - 1, |s| clamp(resolve(s), -1, n - 1));
        let lo = stop.map_or(-1, |s| clamp(resolve(s), -1, n - 1));
        let mut i = hi;
        while i > lo {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    Ok(out)
}

fn normalize_position(pos: i64, len: usize, what: &str) -> ExecResult<usize> {
    let resolved = if pos < 0 { pos + len as i64 } else { pos };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ExecError::index(format!("{} index out of range", what)));
    }
    Ok(resolved as usize)
}

/// Boolean mask positions, or `None` when `key` is not a mask.
fn mask_positions(key: &Value, len: usize) -> ExecResult<Option<Vec<usize>>> {
    let cells = match key {
        Value::Series(s) => &s.values,
        Value::Array(a) => a,
        Value::List(items) if !items.is_empty() && items.iter().all(|v| matches!(v, Value::Bool(_))) => {
            let positions = items
                .iter()
                .enumerate()
                .filter(|(_, v)| matches!(v, Value::Bool(true)))
                .map(|(i, _)| i)
                .collect();
            if items.len() != len {
                return Err(wrong_length(items.len(), len));
            }
            return Ok(Some(positions));
        }
        _ => return Ok(None),
    };
    if !cells.iter().all(|c| matches!(c, Cell::Bool(_)) || c.is_null()) {
        return Ok(None);
    }
    if cells.len() != len {
        return Err(wrong_length(cells.len(), len));
    }
    Ok(Some(
        cells
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Cell::Bool(true)))
            .map(|(i, _)| i)
            .collect(),
    ))
}

fn wrong_length(got: usize, expected: usize) -> ExecError {
    ExecError::value(format!(
        "Item wrong length {} instead of {}.",
        got, expected
    ))
}

fn key_error(key: &Value) -> ExecError {
    ExecError::key(key.repr())
}

fn column_names(key: &Value) -> Option<Vec<String>> {
    match key {
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Array(cells) => cells.iter().map(|c| c.as_str().map(str::to_string)).collect(),
        _ => None,
    }
}

fn select_columns(frame: &Dataset, names: &[String]) -> ExecResult<Dataset> {
    frame.select_columns(names).map_err(|_| {
        let missing: Vec<&String> = names.iter().filter(|n| !frame.has_column(n)).collect();
        ExecError::key(format!("\"None of [{:?}] are in the [columns]\"", missing))
    })
}

fn int_positions(key: &Value) -> Option<Vec<i64>> {
    match key {
        Value::List(items) => items.iter().map(Value::as_int).collect(),
        Value::Array(cells) => cells
            .iter()
            .map(|c| match c {
                Cell::Int(i) => Some(*i),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// `object[key]`.
pub fn subscript(object: &Value, key: &Value, budget: &mut Budget) -> ExecResult<Value> {
    budget.tick(1)?;
    match object {
        Value::Frame(frame) => frame_getitem(frame, key, budget),
        Value::Series(series) => series_getitem(series, key, budget),
        Value::List(items) | Value::Tuple(items) => {
            let is_list = matches!(object, Value::List(_));
            let wrap = |v: Vec<Value>| if is_list { Value::List(v) } else { Value::Tuple(v) };
            match key {
                Value::Slice(a, b, c) => {
                    let pos = slice_positions(items.len(), *a, *b, *c)?;
                    Ok(wrap(pos.iter().map(|&p| items[p].clone()).collect()))
                }
                k => {
                    let i = k.as_int().ok_or_else(|| {
                        ExecError::type_error(format!(
                            "{} indices must be integers or slices, not {}",
                            object.type_name(),
                            k.type_name()
                        ))
                    })?;
                    let what = if is_list { "list" } else { "tuple" };
                    Ok(items[normalize_position(i, items.len(), what)?].clone())
                }
            }
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match key {
                Value::Slice(a, b, c) => {
                    let pos = slice_positions(chars.len(), *a, *b, *c)?;
                    Ok(Value::Str(pos.iter().map(|&p| chars[p]).collect()))
                }
                k => {
                    let i = k.as_int().ok_or_else(|| {
                        ExecError::type_error("string indices must be integers")
                    })?;
                    Ok(Value::Str(
                        chars[normalize_position(i, chars.len(), "string")?].to_string(),
                    ))
                }
            }
        }
        Value::Dict(entries) => entries
            .iter()
            .find(|(k, _)| super::ops::values_equal(k, key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| key_error(key)),
        Value::Array(cells) => {
            if let Some(positions) = mask_positions(key, cells.len())? {
                return Ok(Value::Array(positions.iter().map(|&p| cells[p].clone()).collect()));
            }
            match key {
                Value::Slice(a, b, c) => {
                    let pos = slice_positions(cells.len(), *a, *b, *c)?;
                    Ok(Value::Array(pos.iter().map(|&p| cells[p].clone()).collect()))
                }
                k => {
                    let i = k
                        .as_int()
                        .ok_or_else(|| ExecError::index("only integers, slices and boolean arrays are valid indices"))?;
                    Ok(Value::from_cell(
                        cells[normalize_position(i, cells.len(), "array")?].clone(),
                    ))
                }
            }
        }
        Value::GroupBy(group) => {
            let selection = match key {
                Value::Str(name) => GroupSelection::Column(name.clone()),
                other => match column_names(other) {
                    Some(names) => GroupSelection::Columns(names),
                    None => return Err(key_error(other)),
                },
            };
            let wanted: Vec<&String> = match &selection {
                GroupSelection::Column(c) => vec![c],
                GroupSelection::Columns(cs) => cs.iter().collect(),
                GroupSelection::All => Vec::new(),
            };
            if let Some(missing) = wanted.iter().find(|c| !group.frame.has_column(c)) {
                return Err(ExecError::key(format!("'Column not found: {}'", missing)));
            }
            Ok(Value::GroupBy(Box::new(GroupBy {
                frame: Arc::clone(&group.frame),
                keys: group.keys.clone(),
                selection,
            })))
        }
        Value::Indexer(indexer) => indexer_getitem(indexer, key, budget),
        other => Err(ExecError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn frame_getitem(frame: &Arc<Dataset>, key: &Value, budget: &mut Budget) -> ExecResult<Value> {
    match key {
        Value::Str(name) => Series::from_column(frame, name)
            .map(Value::Series)
            .ok_or_else(|| key_error(key)),
        Value::Slice(a, b, c) => {
            let pos = slice_positions(frame.len(), *a, *b, *c)?;
            Ok(Value::frame(frame.select_rows(&pos)))
        }
        other => {
            if let Some(positions) = mask_positions(other, frame.len())? {
                budget.touch(frame.len())?;
                return Ok(Value::frame(frame.select_rows(&positions)));
            }
            if let Some(names) = column_names(other) {
                budget.touch(frame.len() * names.len())?;
                return Ok(Value::frame(select_columns(frame, &names)?));
            }
            Err(key_error(other))
        }
    }
}

fn series_getitem(series: &Series, key: &Value, budget: &mut Budget) -> ExecResult<Value> {
    if let Some(positions) = mask_positions(key, series.len())? {
        budget.touch(series.len())?;
        return Ok(Value::Series(series.select(&positions)));
    }
    match key {
        Value::Slice(a, b, c) => {
            let pos = slice_positions(series.len(), *a, *b, *c)?;
            Ok(Value::Series(series.select(&pos)))
        }
        Value::List(labels) => {
            let positions = labels
                .iter()
                .map(|l| {
                    let cell = l.expect_cell("label")?;
                    series.position_of(&cell).ok_or_else(|| key_error(l))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.select(&positions)))
        }
        label => {
            let cell = label.expect_cell("label")?;
            if let Some(pos) = series.position_of(&cell) {
                return Ok(Value::from_cell(series.values[pos].clone()));
            }
            // integer keys fall back to positions on a non-integer index
            match (label.as_int(), series.has_integer_index()) {
                (Some(i), false) if !matches!(label, Value::Bool(_)) => Ok(Value::from_cell(
                    series.values[normalize_position(i, series.len(), "series")?].clone(),
                )),
                _ => Err(key_error(label)),
            }
        }
    }
}

fn split_pair(key: &Value) -> (&Value, Option<&Value>) {
    match key {
        Value::Tuple(parts) if parts.len() == 2 => (&parts[0], Some(&parts[1])),
        other => (other, None),
    }
}

/// Row positions chosen by an `.iloc` selector. `None` means a single row.
fn iloc_rows(selector: &Value, len: usize) -> ExecResult<(Vec<usize>, bool)> {
    match selector {
        Value::Slice(a, b, c) => Ok((slice_positions(len, *a, *b, *c)?, false)),
        v if v.as_int().is_some() && !matches!(v, Value::Bool(_)) => {
            let i = v.as_int().unwrap_or(0);
            Ok((vec![normalize_position(i, len, "single positional indexer")?], true))
        }
        other => {
            if let Some(positions) = mask_positions(other, len)? {
                return Ok((positions, false));
            }
            match int_positions(other) {
                Some(ints) => Ok((
                    ints.iter()
                        .map(|&i| normalize_position(i, len, "positional indexers"))
                        .collect::<ExecResult<Vec<_>>>()?,
                    false,
                )),
                None => Err(ExecError::index(format!(
                    ".iloc requires numeric indexers, got {}",
                    other.repr()
                ))),
            }
        }
    }
}

/// Row positions chosen by a `.loc` selector on a range-indexed frame.
/// Label slices include their stop.
fn loc_rows(selector: &Value, len: usize) -> ExecResult<(Vec<usize>, bool)> {
    match selector {
        Value::Slice(a, b, c) => {
            let stop = b.map(|s| s.saturating_add(1));
            Ok((slice_positions(len, *a, stop, *c)?, false))
        }
        v if v.as_int().is_some() && !matches!(v, Value::Bool(_)) => {
            let i = v.as_int().unwrap_or(0);
            if i < 0 || i as usize >= len {
                return Err(key_error(v));
            }
            Ok((vec![i as usize], true))
        }
        other => {
            if let Some(positions) = mask_positions(other, len)? {
                return Ok((positions, false));
            }
            match int_positions(other) {
                Some(ints) => Ok((
                    ints.iter()
                        .map(|&i| {
                            usize::try_from(i)
                                .ok()
                                .filter(|&p| p < len)
                                .ok_or_else(|| key_error(&Value::Int(i)))
                        })
                        .collect::<ExecResult<Vec<_>>>()?,
                    false,
                )),
                None => Err(key_error(other)),
            }
        }
    }
}

enum ColumnPick {
    One(String),
    Many(Vec<String>),
}

fn pick_columns(frame: &Dataset, selector: Option<&Value>, positional: bool) -> ExecResult<ColumnPick> {
    let all = || frame.columns().to_vec();
    let Some(selector) = selector else {
        return Ok(ColumnPick::Many(all()));
    };
    let by_position = |i: i64| -> ExecResult<String> {
        let p = normalize_position(i, frame.columns().len(), "column")?;
        Ok(frame.columns()[p].clone())
    };
    match selector {
        Value::Slice(a, b, c) if positional => {
            let pos = slice_positions(frame.columns().len(), *a, *b, *c)?;
            Ok(ColumnPick::Many(pos.iter().map(|&p| frame.columns()[p].clone()).collect()))
        }
        Value::Slice(None, None, None) => Ok(ColumnPick::Many(all())),
        Value::Int(i) if positional => Ok(ColumnPick::One(by_position(*i)?)),
        Value::Str(name) if !positional => {
            if !frame.has_column(name) {
                return Err(key_error(selector));
            }
            Ok(ColumnPick::One(name.clone()))
        }
        other if positional => match int_positions(other) {
            Some(ints) => Ok(ColumnPick::Many(
                ints.into_iter().map(by_position).collect::<ExecResult<Vec<_>>>()?,
            )),
            None => Err(ExecError::index(".iloc requires numeric indexers")),
        },
        other => match column_names(other) {
            Some(names) => Ok(ColumnPick::Many(names)),
            None => Err(key_error(other)),
        },
    }
}

fn frame_locate(
    frame: &Arc<Dataset>,
    rows: (Vec<usize>, bool),
    columns: ColumnPick,
) -> ExecResult<Value> {
    let (positions, single_row) = rows;
    match (single_row, columns) {
        (true, ColumnPick::One(col)) => Ok(Value::from_cell(
            frame.get(positions[0], &col).cloned().unwrap_or(Cell::Null),
        )),
        (true, ColumnPick::Many(cols)) => {
            let row = positions[0];
            let values = cols
                .iter()
                .map(|c| frame.get(row, c).cloned().unwrap_or(Cell::Null))
                .collect();
            Ok(Value::Series(Series::labelled(
                Some(row.to_string()),
                None,
                cols.into_iter().map(Cell::Text).collect(),
                values,
            )))
        }
        (false, ColumnPick::One(col)) => {
            let values = positions
                .iter()
                .map(|&r| frame.get(r, &col).cloned().unwrap_or(Cell::Null))
                .collect();
            Ok(Value::Series(Series::labelled(
                Some(col),
                None,
                positions.iter().map(|&p| Cell::Int(p as i64)).collect(),
                values,
            )))
        }
        (false, ColumnPick::Many(cols)) => {
            let subset = frame.select_rows(&positions);
            Ok(Value::frame(select_columns(&subset, &cols)?))
        }
    }
}

fn indexer_getitem(indexer: &Indexer, key: &Value, budget: &mut Budget) -> ExecResult<Value> {
    match (&indexer.kind, &indexer.target) {
        (IndexerKind::Iloc, Value::Frame(frame)) => {
            let (rows, cols) = split_pair(key);
            budget.touch(frame.len())?;
            let rows = iloc_rows(rows, frame.len())?;
            let cols = pick_columns(frame, cols, true)?;
            frame_locate(frame, rows, cols)
        }
        (IndexerKind::Loc, Value::Frame(frame)) => {
            let (rows, cols) = split_pair(key);
            budget.touch(frame.len())?;
            let rows = loc_rows(rows, frame.len())?;
            let cols = pick_columns(frame, cols, false)?;
            frame_locate(frame, rows, cols)
        }
        (IndexerKind::Iloc, Value::Series(series)) => {
            let (positions, single) = iloc_rows(key, series.len())?;
            if single {
                return Ok(Value::from_cell(series.values[positions[0]].clone()));
            }
            Ok(Value::Series(series.select(&positions)))
        }
        (IndexerKind::Loc, Value::Series(series)) => series_getitem(series, key, budget),
        (IndexerKind::Str, Value::Series(series)) => {
            budget.touch(series.len())?;
            let values = series
                .values
                .iter()
                .map(|cell| match cell {
                    Cell::Text(s) => match subscript(&Value::Str(s.clone()), key, budget) {
                        Ok(Value::Str(part)) => Ok(Cell::Text(part)),
                        Ok(_) => Ok(Cell::Null),
                        Err(e) if e.kind == super::error::ExecErrorKind::IndexError => {
                            Ok(Cell::Float(f64::NAN))
                        }
                        Err(e) => Err(e),
                    },
                    _ => Ok(Cell::Float(f64::NAN)),
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(series.with_values(values)))
        }
        (IndexerKind::Str, Value::ListSeries(lists)) => {
            budget.touch(lists.len())?;
            match key {
                Value::Slice(a, b, c) => {
                    let rows = lists
                        .rows
                        .iter()
                        .map(|row| {
                            row.as_ref()
                                .map(|parts| {
                                    slice_positions(parts.len(), *a, *b, *c)
                                        .map(|pos| pos.iter().map(|&p| parts[p].clone()).collect::<Vec<String>>())
                                })
                                .transpose()
                        })
                        .collect::<ExecResult<Vec<_>>>()?;
                    Ok(Value::ListSeries(Box::new(lists.with_rows(rows))))
                }
                k => {
                    let i = k.as_int().ok_or_else(|| {
                        ExecError::type_error("list indices must be integers or slices")
                    })?;
                    Ok(Value::Series(lists.get(i)))
                }
            }
        }
        (kind, target) => Err(ExecError::type_error(format!(
            "{:?} indexing is not supported on '{}'",
            kind,
            target.type_name()
        ))),
    }
}

/// Cells for a column assignment: scalars broadcast, sequences must match.
pub fn column_cells(value: &Value, len: usize) -> ExecResult<Vec<Cell>> {
    if let Some(cell) = value.to_cell() {
        return Ok(vec![cell; len]);
    }
    let cells = value.to_cells()?;
    if cells.len() != len {
        return Err(ExecError::value(format!(
            "Length of values ({}) does not match length of index ({})",
            cells.len(),
            len
        )));
    }
    Ok(cells)
}

/// `object[key] = value`.
pub fn assign_item(object: &mut Value, key: Value, value: Value, budget: &mut Budget) -> ExecResult<()> {
    budget.tick(1)?;
    match object {
        Value::Frame(frame) => {
            let Value::Str(name) = &key else {
                return Err(ExecError::type_error(format!(
                    "column assignment needs a column name, not {}",
                    key.type_name()
                )));
            };
            let cells = column_cells(&value, frame.len())?;
            budget.touch(cells.len())?;
            Arc::make_mut(frame)
                .set_column(name, cells)
                .map_err(|e| ExecError::value(e.to_string()))
        }
        Value::Dict(entries) => {
            match entries
                .iter_mut()
                .find(|(k, _)| super::ops::values_equal(k, &key))
            {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
            Ok(())
        }
        Value::List(items) => {
            let i = key
                .as_int()
                .ok_or_else(|| ExecError::type_error("list indices must be integers or slices"))?;
            let pos = normalize_position(i, items.len(), "list assignment")?;
            items[pos] = value;
            Ok(())
        }
        Value::Series(series) => {
            let cell = value.expect_cell("value")?;
            if let Some(positions) = mask_positions(&key, series.len())? {
                for p in positions {
                    series.values[p] = cell.clone();
                }
                return Ok(());
            }
            let label = key.expect_cell("label")?;
            match series.position_of(&label) {
                Some(p) => series.values[p] = cell,
                None => {
                    series.index.push(label);
                    series.values.push(cell);
                }
            }
            Ok(())
        }
        other => Err(ExecError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `frame.loc[rows, column] = value` and `frame.iloc[rows, column] = value`.
pub fn assign_located(
    frame_value: &mut Value,
    kind: IndexerKind,
    key: &Value,
    value: Value,
    budget: &mut Budget,
) -> ExecResult<()> {
    let type_name = frame_value.type_name();
    let Value::Frame(frame) = frame_value else {
        return Err(ExecError::type_error(format!(
            "located assignment is not supported on '{}'",
            type_name
        )));
    };
    let (rows, cols) = split_pair(key);
    budget.touch(frame.len())?;
    let (positions, _) = match kind {
        IndexerKind::Iloc => iloc_rows(rows, frame.len())?,
        _ => loc_rows(rows, frame.len())?,
    };
    let columns: Vec<String> = match cols {
        None => frame.columns().to_vec(),
        Some(Value::Str(name)) if kind == IndexerKind::Loc => vec![name.clone()],
        Some(selector) => match pick_columns(frame, Some(selector), kind == IndexerKind::Iloc)? {
            ColumnPick::One(c) => vec![c],
            ColumnPick::Many(cs) => cs,
        },
    };
    let cells = column_cells(&value, positions.len())?;

    let data = Arc::make_mut(frame);
    for column in &columns {
        if !data.has_column(column) {
            data.set_column(column, vec![Cell::Float(f64::NAN); data.len()])
                .map_err(|e| ExecError::value(e.to_string()))?;
        }
        for (&row, cell) in positions.iter().zip(&cells) {
            data.set_cell(row, column, cell.clone())
                .map_err(|e| ExecError::value(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Budget {
        Budget::new(100_000, 10_000)
    }

    fn flows() -> Value {
        Value::frame(
            Dataset::from_json_str(
                r#"[
                {"src": "1.1.1.1", "Bytes_int": 100, "attackType": "normal"},
                {"src": "2.2.2.2", "Bytes_int": 250, "attackType": "dos"},
                {"src": "1.1.1.1", "Bytes_int": 50, "attackType": "scan"}
            ]"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_python_slices() {
        assert_eq!(slice_positions(5, None, None, None).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_positions(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_positions(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_positions(5, Some(1), Some(100), Some(2)).unwrap(), vec![1, 3]);
        assert!(slice_positions(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_slices_with_extreme_steps() {
        assert_eq!(slice_positions(5, Some(1), None, Some(i64::MAX)).unwrap(), vec![1]);
        assert_eq!(slice_positions(5, None, None, Some(i64::MIN)).unwrap(), vec![4]);
        assert_eq!(slice_positions(5, Some(i64::MIN), Some(i64::MAX), None).unwrap().len(), 5);
        let loc = Value::Indexer(Box::new(Indexer {
            kind: IndexerKind::Loc,
            target: flows(),
        }));
        let Value::Frame(rows) = subscript(&loc, &Value::Slice(Some(1), Some(i64::MAX), None), &mut budget()).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_frame_column_and_missing_column() {
        let df = flows();
        let Value::Series(s) = subscript(&df, &Value::Str("src".into()), &mut budget()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(s.len(), 3);
        let err = subscript(&df, &Value::Str("Bytes".into()), &mut budget()).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'Bytes'");
    }

    #[test]
    fn test_boolean_mask_filters_rows() {
        let df = flows();
        let mask = Value::Series(Series::new(
            None,
            vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(true)],
        ));
        let Value::Frame(f) = subscript(&df, &mask, &mut budget()).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(f.len(), 2);
        let short = Value::Series(Series::new(None, vec![Cell::Bool(true)]));
        assert!(subscript(&df, &short, &mut budget()).is_err());
    }

    #[test]
    fn test_iloc_and_loc() {
        let df = flows();
        let iloc = Value::Indexer(Box::new(Indexer {
            kind: IndexerKind::Iloc,
            target: df.clone(),
        }));
        let cell = subscript(&iloc, &Value::Tuple(vec![Value::Int(-1), Value::Int(1)]), &mut budget()).unwrap();
        assert_eq!(cell, Value::Int(50));

        let loc = Value::Indexer(Box::new(Indexer {
            kind: IndexerKind::Loc,
            target: df,
        }));
        let Value::Frame(head) = subscript(&loc, &Value::Slice(None, Some(1), None), &mut budget()).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(head.len(), 2);
    }

    #[test]
    fn test_value_counts_style_series_lookup() {
        let s = Series::labelled(
            Some("count".into()),
            Some("src".into()),
            vec![Cell::Text("1.1.1.1".into()), Cell::Text("2.2.2.2".into())],
            vec![Cell::Int(2), Cell::Int(1)],
        );
        let v = Value::Series(s);
        assert_eq!(subscript(&v, &Value::Str("2.2.2.2".into()), &mut budget()).unwrap(), Value::Int(1));
        assert_eq!(subscript(&v, &Value::Int(0), &mut budget()).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_column_assignment_copies_on_write() {
        let original = flows();
        let mut copy = original.clone();
        assign_item(&mut copy, Value::Str("flag".into()), Value::Bool(true), &mut budget()).unwrap();
        let (Value::Frame(a), Value::Frame(b)) = (&original, &copy) else {
            panic!("expected frames");
        };
        assert!(!a.has_column("flag"));
        assert!(b.has_column("flag"));
    }

    #[test]
    fn test_located_assignment() {
        let mut df = flows();
        let mask = Value::Series(Series::new(
            None,
            vec![Cell::Bool(true), Cell::Bool(false), Cell::Bool(true)],
        ));
        let key = Value::Tuple(vec![mask, Value::Str("label".into())]);
        assign_located(&mut df, IndexerKind::Loc, &key, Value::Str("x".into()), &mut budget()).unwrap();
        let Value::Frame(f) = df else { panic!("expected frame") };
        assert_eq!(f.get(0, "label"), Some(&Cell::Text("x".into())));
        assert!(f.get(1, "label").unwrap().is_null());
    }

    #[test]
    fn test_list_and_string_indexing() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(subscript(&list, &Value::Int(-1), &mut budget()).unwrap(), Value::Int(3));
        assert!(subscript(&list, &Value::Int(3), &mut budget()).is_err());
        let s = Value::Str("hello".into());
        assert_eq!(subscript(&s, &Value::Slice(None, Some(2), None), &mut budget()).unwrap(), Value::Str("he".into()));
    }
}
