//! Host functions reachable from a snippet.
//!
//! The global namespace exposes exactly the names in [`ALLOWED_BUILTINS`];
//! everything else a snippet can call hangs off the `pd` and `np` handles
//! or off values it already holds.

use std::cmp::Ordering;
use std::sync::Arc;

use super::error::{Budget, ExecError, ExecResult};
use super::ops;
use super::stats;
use super::value::{Module, Series, Value};
use crate::dataset::{Cell, Dataset};

/// Builtins visible to snippets.
pub const ALLOWED_BUILTINS: [&str; 12] = [
    "len", "sum", "min", "max", "sorted", "round", "abs", "range", "enumerate", "zip", "list",
    "dict",
];

const NUMPY_FUNCTIONS: [&str; 11] = [
    "np.array", "np.mean", "np.sum", "np.min", "np.max", "np.median", "np.std", "np.round",
    "np.abs", "np.sqrt", "np.unique",
];

const PANDAS_FUNCTIONS: [&str; 7] = [
    "pd.Series",
    "pd.DataFrame",
    "pd.to_numeric",
    "pd.isna",
    "pd.notna",
    "pd.isnull",
    "pd.notnull",
];

/// Call arguments with Python-style positional/keyword binding.
pub struct Args {
    func: String,
    positional: Vec<Option<Value>>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(func: impl Into<String>, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            func: func.into(),
            positional: positional.into_iter().map(Some).collect(),
            keywords,
        }
    }

    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    /// Take the argument at `pos`, or the keyword `name`.
    pub fn take(&mut self, pos: usize, name: &str) -> Option<Value> {
        if let Some(slot) = self.positional.get_mut(pos) {
            if let Some(v) = slot.take() {
                return Some(v);
            }
        }
        let idx = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(idx).1)
    }

    pub fn required(&mut self, pos: usize, name: &str) -> ExecResult<Value> {
        self.take(pos, name).ok_or_else(|| {
            ExecError::type_error(format!(
                "{}() missing required argument: '{}'",
                self.func, name
            ))
        })
    }

    /// Remaining positional arguments from `start` on.
    pub fn rest(&mut self, start: usize) -> Vec<Value> {
        self.positional
            .iter_mut()
            .skip(start)
            .filter_map(Option::take)
            .collect()
    }

    /// All keyword arguments not yet taken.
    pub fn take_keywords(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.keywords)
    }

    pub fn int_or(&mut self, pos: usize, name: &str, default: i64) -> ExecResult<i64> {
        match self.take(pos, name) {
            None | Some(Value::None) => Ok(default),
            Some(v) => v.as_int().ok_or_else(|| {
                ExecError::type_error(format!(
                    "{}() argument '{}' must be int, not {}",
                    self.func,
                    name,
                    v.type_name()
                ))
            }),
        }
    }

    pub fn bool_or(&mut self, pos: usize, name: &str, default: bool) -> ExecResult<bool> {
        match self.take(pos, name) {
            None => Ok(default),
            Some(v) => v.truthy(),
        }
    }

    pub fn str_or(&mut self, pos: usize, name: &str, default: &str) -> ExecResult<String> {
        match self.take(pos, name) {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s),
            Some(v) => Err(ExecError::type_error(format!(
                "{}() argument '{}' must be str, not {}",
                self.func,
                name,
                v.type_name()
            ))),
        }
    }

    /// Fail on anything the callee did not consume.
    pub fn finish(self) -> ExecResult<()> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(ExecError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.func, name
            )));
        }
        let extra = self.positional.iter().filter(|v| v.is_some()).count();
        if extra > 0 {
            return Err(ExecError::type_error(format!(
                "{}() got {} unexpected positional argument(s)",
                self.func, extra
            )));
        }
        Ok(())
    }
}

/// Resolve a global builtin name.
pub fn lookup_builtin(name: &str) -> Option<Value> {
    ALLOWED_BUILTINS
        .iter()
        .copied()
        .find(|b| *b == name)
        .map(Value::Function)
}

/// `pd.<attr>` and `np.<attr>`.
pub fn module_attribute(module: Module, attr: &str) -> ExecResult<Value> {
    match (module, attr) {
        (Module::Numpy, "nan" | "NaN") => return Ok(Value::Float(f64::NAN)),
        (Module::Numpy, "inf") => return Ok(Value::Float(f64::INFINITY)),
        _ => {}
    }
    let (prefix, table, module_name): (&str, &[&'static str], &str) = match module {
        Module::Numpy => ("np.", &NUMPY_FUNCTIONS, "numpy"),
        Module::Pandas => ("pd.", &PANDAS_FUNCTIONS, "pandas"),
    };
    table
        .iter()
        .copied()
        .find(|f| f.strip_prefix(prefix) == Some(attr))
        .map(Value::Function)
        .ok_or_else(|| {
            ExecError::attribute(format!(
                "module '{}' has no attribute '{}'",
                module_name, attr
            ))
        })
}

pub fn call_function(name: &'static str, mut args: Args, budget: &mut Budget) -> ExecResult<Value> {
    budget.tick(1)?;
    let result = match name {
        "len" => builtin_len(&args.required(0, "obj")?),
        "sum" => {
            let items = args.required(0, "iterable")?;
            let start = args.take(1, "start").unwrap_or(Value::Int(0));
            builtin_sum(&items, start, budget)
        }
        "min" | "max" => {
            let default = args.take(usize::MAX, "default");
            let values = args.rest(0);
            builtin_extreme(name, values, default, budget)
        }
        "sorted" => {
            let items = args.required(0, "iterable")?;
            let reverse = args.bool_or(usize::MAX, "reverse", false)?;
            let mut values = items.iterate()?;
            budget.touch(values.len())?;
            sort_values(&mut values)?;
            if reverse {
                values.reverse();
            }
            Ok(Value::List(values))
        }
        "round" => {
            let x = args.required(0, "number")?;
            let ndigits = args.take(1, "ndigits").filter(|v| *v != Value::None);
            builtin_round(&x, ndigits, budget)
        }
        "abs" => map_numeric(&args.required(0, "x")?, budget, |x| match x {
            Cell::Int(i) => Ok(i.checked_abs().map(Cell::Int).unwrap_or(Cell::Float((*i as f64).abs()))),
            Cell::Bool(b) => Ok(Cell::Int(i64::from(*b))),
            Cell::Float(f) => Ok(Cell::Float(f.abs())),
            Cell::Null => Ok(Cell::Float(f64::NAN)),
            other => Err(ExecError::type_error(format!(
                "bad operand type for abs(): '{}'",
                Value::from_cell(other.clone()).type_name()
            ))),
        }),
        "range" => builtin_range(&mut args, budget),
        "enumerate" => {
            let items = args.required(0, "iterable")?.iterate()?;
            let start = args.int_or(1, "start", 0)?;
            budget.touch(items.len())?;
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    i64::try_from(i)
                        .ok()
                        .and_then(|i| start.checked_add(i))
                        .map(|n| Value::Tuple(vec![Value::Int(n), v]))
                        .ok_or_else(|| ExecError::value("enumerate index does not fit in an integer"))
                })
                .collect::<ExecResult<Vec<_>>>()
                .map(Value::List)
        }
        "zip" => {
            let columns = args
                .rest(0)
                .iter()
                .map(Value::iterate)
                .collect::<ExecResult<Vec<_>>>()?;
            let n = columns.iter().map(Vec::len).min().unwrap_or(0);
            budget.touch(n * columns.len().max(1))?;
            Ok(Value::List(
                (0..n)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "list" => match args.take(0, "iterable") {
            None => Ok(Value::List(Vec::new())),
            Some(v) => {
                let items = v.iterate()?;
                budget.check_len(items.len())?;
                budget.touch(items.len())?;
                Ok(Value::List(items))
            }
        },
        "dict" => builtin_dict(&mut args, budget),
        "np.array" => {
            let data = args.required(0, "object")?;
            numpy_array(&data, budget)
        }
        "np.mean" | "np.sum" | "np.min" | "np.max" | "np.median" | "np.std" => {
            let data = args.required(0, "a")?;
            let ddof = args.int_or(usize::MAX, "ddof", 0)?;
            numpy_reduce(name, &data, ddof, budget)
        }
        "np.round" => {
            let x = args.required(0, "a")?;
            let decimals = args.int_or(1, "decimals", 0)?;
            let decimals = i32::try_from(decimals).unwrap_or(0);
            map_numeric(&x, budget, |c| match c.as_f64() {
                Some(f) => Ok(Cell::Float(stats::round_half_even(f, decimals))),
                None if c.is_null() => Ok(Cell::Float(f64::NAN)),
                None => Err(ExecError::type_error("np.round() requires numeric input")),
            })
        }
        "np.abs" => map_numeric(&args.required(0, "x")?, budget, |c| match c {
            Cell::Int(i) => Ok(Cell::Int(i.saturating_abs())),
            c if c.is_null() => Ok(Cell::Float(f64::NAN)),
            c => c
                .as_f64()
                .map(|f| Cell::Float(f.abs()))
                .ok_or_else(|| ExecError::type_error("bad operand type for abs(): 'str'")),
        }),
        "np.sqrt" => map_numeric(&args.required(0, "x")?, budget, |c| match c.as_f64() {
            Some(f) => Ok(Cell::Float(f.sqrt())),
            None if c.is_null() => Ok(Cell::Float(f64::NAN)),
            None => Err(ExecError::type_error("np.sqrt() requires numeric input")),
        }),
        "np.unique" => {
            let cells = args.required(0, "ar")?.to_cells()?;
            budget.touch(cells.len())?;
            Ok(Value::Array(unique_sorted(&cells)?))
        }
        "pd.Series" => pandas_series(&mut args, budget),
        "pd.DataFrame" => pandas_frame(&mut args, budget),
        "pd.to_numeric" => {
            let data = args.required(0, "arg")?;
            let errors = args.str_or(1, "errors", "raise")?;
            to_numeric(&data, &errors, budget)
        }
        "pd.isna" | "pd.isnull" | "pd.notna" | "pd.notnull" => {
            let data = args.required(0, "obj")?;
            missing_mask(&data, name.contains("not"), budget)
        }
        other => Err(ExecError::name(format!("name '{}' is not defined", other))),
    }?;
    args.finish()?;
    Ok(result)
}

fn builtin_len(value: &Value) -> ExecResult<Value> {
    let n = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(v) | Value::Tuple(v) => v.len(),
        Value::Dict(d) => d.len(),
        Value::Array(a) => a.len(),
        Value::Series(s) => s.len(),
        Value::ListSeries(l) => l.len(),
        Value::Frame(f) => f.len(),
        Value::GroupBy(g) => g.groups().len(),
        other => {
            return Err(ExecError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn builtin_sum(items: &Value, start: Value, budget: &mut Budget) -> ExecResult<Value> {
    let mut total = start;
    for item in items.iterate()? {
        total = ops::binary(super::ast::BinOp::Add, &total, &item, budget)?;
    }
    Ok(total)
}

fn builtin_extreme(
    name: &str,
    values: Vec<Value>,
    default: Option<Value>,
    budget: &mut Budget,
) -> ExecResult<Value> {
    let candidates = match values.len() {
        0 => {
            return Err(ExecError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        1 => values[0].iterate()?,
        _ => values,
    };
    budget.touch(candidates.len())?;
    let want = if name == "min" {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                if py_order(&candidate, &current)? == want {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.or(default)
        .ok_or_else(|| ExecError::value(format!("{}() arg is an empty sequence", name)))
}

/// Python ordering between two values, as used by `sorted`, `min` and `max`.
pub fn py_order(a: &Value, b: &Value) -> ExecResult<Ordering> {
    match (a, b) {
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y) {
                let o = py_order(p, q)?;
                if o != Ordering::Equal {
                    return Ok(o);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => match (a, b) {
                (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
                _ => Err(ExecError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        },
    }
}

/// Stable sort that surfaces the first comparison error.
pub fn sort_values(values: &mut [Value]) -> ExecResult<()> {
    let mut failure: Option<ExecError> = None;
    values.sort_by(|a, b| match py_order(a, b) {
        Ok(o) => o,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn builtin_round(x: &Value, ndigits: Option<Value>, budget: &mut Budget) -> ExecResult<Value> {
    let digits = match &ndigits {
        Some(v) => Some(v.as_int().ok_or_else(|| {
            ExecError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                v.type_name()
            ))
        })?),
        None => None,
    };
    match x {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(x.as_int().unwrap_or(0))),
        Value::Float(f) => match digits {
            None if !f.is_finite() => Err(ExecError::value("cannot convert float NaN to integer")),
            None => Ok(Value::Int(f.round_ties_even() as i64)),
            Some(d) => Ok(Value::Float(stats::round_half_even(
                *f,
                i32::try_from(d).unwrap_or(0),
            ))),
        },
        Value::Series(_) | Value::Array(_) => {
            let d = i32::try_from(digits.unwrap_or(0)).unwrap_or(0);
            map_numeric(x, budget, |c| match c {
                Cell::Int(i) => Ok(Cell::Int(*i)),
                c => match c.as_f64() {
                    Some(f) => Ok(Cell::Float(stats::round_half_even(f, d))),
                    None if c.is_null() => Ok(Cell::Float(f64::NAN)),
                    None => Err(ExecError::type_error("round() requires numeric values")),
                },
            })
        }
        other => Err(ExecError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

/// Apply `f` to a scalar or element-wise to a Series or array.
pub fn map_numeric<F>(value: &Value, budget: &mut Budget, f: F) -> ExecResult<Value>
where
    F: Fn(&Cell) -> ExecResult<Cell>,
{
    match value {
        Value::Series(s) => {
            budget.touch(s.len())?;
            let cells = s.values.iter().map(&f).collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::Series(s.with_values(cells)))
        }
        Value::Array(a) => {
            budget.touch(a.len())?;
            Ok(Value::Array(a.iter().map(&f).collect::<ExecResult<Vec<_>>>()?))
        }
        Value::List(_) | Value::Tuple(_) => {
            let cells = value.to_cells()?;
            budget.touch(cells.len())?;
            Ok(Value::Array(cells.iter().map(&f).collect::<ExecResult<Vec<_>>>()?))
        }
        other => {
            let cell = other.expect_cell("argument")?;
            f(&cell).map(Value::from_cell)
        }
    }
}

fn builtin_range(args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    let ints = args
        .rest(0)
        .iter()
        .map(|v| {
            v.as_int().ok_or_else(|| {
                ExecError::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    v.type_name()
                ))
            })
        })
        .collect::<ExecResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(ExecError::type_error(format!(
                "range expected 1 to 3 arguments, got {}",
                ints.len()
            )))
        }
    };
    if step == 0 {
        return Err(ExecError::value("range() arg 3 must not be zero"));
    }
    // i128 holds any span of two i64 bounds
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let span = if step > 0 { stop - start } else { start - stop }.max(0);
    let n = usize::try_from((span + step.abs() - 1) / step.abs()).unwrap_or(usize::MAX);
    budget.check_len(n)?;
    budget.touch(n)?;
    (0..n)
        .map(|i| {
            i64::try_from(start + i as i128 * step)
                .map(Value::Int)
                .map_err(|_| ExecError::value("range element does not fit in an integer"))
        })
        .collect::<ExecResult<Vec<_>>>()
        .map(Value::List)
}

fn builtin_dict(args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    let mut entries: Vec<(Value, Value)> = Vec::new();
    let mut insert = |k: Value, v: Value| match entries.iter_mut().find(|(e, _)| ops::values_equal(e, &k)) {
        Some(slot) => slot.1 = v,
        None => entries.push((k, v)),
    };
    match args.take(0, "") {
        None => {}
        Some(Value::Dict(d)) => d.into_iter().for_each(|(k, v)| insert(k, v)),
        Some(Value::Series(s)) => {
            budget.touch(s.len())?;
            s.index
                .into_iter()
                .zip(s.values)
                .for_each(|(k, v)| insert(Value::from_cell(k), Value::from_cell(v)));
        }
        Some(other) => {
            let items = other.iterate()?;
            budget.touch(items.len())?;
            for (i, item) in items.into_iter().enumerate() {
                match item.iterate()?.as_slice() {
                    [k, v] => insert(k.clone(), v.clone()),
                    elems => {
                        return Err(ExecError::value(format!(
                            "dictionary update sequence element #{} has length {}; 2 is required",
                            i,
                            elems.len()
                        )))
                    }
                }
            }
        }
    }
    for (k, v) in args.take_keywords() {
        insert(Value::Str(k), v);
    }
    Ok(Value::Dict(entries))
}

fn numpy_array(data: &Value, budget: &mut Budget) -> ExecResult<Value> {
    if let Value::List(items) | Value::Tuple(items) = data {
        if items.iter().any(|i| !i.is_scalar()) {
            return Err(ExecError::type_error(
                "only one-dimensional arrays of scalars are supported",
            ));
        }
    }
    let cells = match data {
        v if v.is_scalar() => vec![v.expect_cell("object")?],
        v => v.to_cells()?,
    };
    budget.check_len(cells.len())?;
    budget.touch(cells.len())?;
    Ok(Value::Array(cells))
}

fn numpy_reduce(name: &str, data: &Value, ddof: i64, budget: &mut Budget) -> ExecResult<Value> {
    let cells = match data {
        v if v.is_scalar() => vec![v.expect_cell("a")?],
        v => v.to_cells()?,
    };
    budget.touch(cells.len())?;
    // numpy propagates NaN; pandas objects skip it
    let skip_missing = matches!(data, Value::Series(_));
    if !skip_missing && cells.iter().any(Cell::is_null) {
        return Ok(Value::Float(f64::NAN));
    }
    let ddof = usize::try_from(ddof).unwrap_or(0);
    let out = match name {
        "np.mean" => stats::mean(&cells)?,
        "np.sum" => stats::sum(&cells)?,
        "np.min" => non_empty(name, &cells).and_then(|_| stats::min(&cells))?,
        "np.max" => non_empty(name, &cells).and_then(|_| stats::max(&cells))?,
        "np.median" => stats::median(&cells)?,
        _ => stats::std(&cells, ddof)?,
    };
    Ok(Value::from_cell(out))
}

fn non_empty(name: &str, cells: &[Cell]) -> ExecResult<()> {
    if cells.is_empty() {
        return Err(ExecError::value(format!(
            "zero-size array to reduction operation {} which has no identity",
            name.trim_start_matches("np.")
        )));
    }
    Ok(())
}

/// Distinct non-missing cells in ascending order.
pub fn unique_sorted(cells: &[Cell]) -> ExecResult<Vec<Cell>> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<Cell> = cells
        .iter()
        .filter(|c| !c.is_null() && seen.insert(c.key()))
        .cloned()
        .collect();
    let mut failure = None;
    out.sort_by(|a, b| {
        stats::order(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

fn pandas_series(args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    let data = args.take(0, "data").unwrap_or(Value::List(Vec::new()));
    let index = args.take(1, "index").filter(|v| *v != Value::None);
    let name = match args.take(usize::MAX, "name") {
        None | Some(Value::None) => None,
        Some(v) => Some(v.to_string()),
    };

    let (labels, values): (Option<Vec<Cell>>, Vec<Cell>) = match data {
        Value::Dict(entries) => {
            let mut labels = Vec::with_capacity(entries.len());
            let mut values = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                labels.push(k.expect_cell("index label")?);
                values.push(v.expect_cell("value")?);
            }
            (Some(labels), values)
        }
        Value::Series(s) => (Some(s.index), s.values),
        v if v.is_scalar() => {
            let n = match &index {
                Some(idx) => idx.iterate()?.len(),
                None => 1,
            };
            (None, vec![v.expect_cell("data")?; n])
        }
        v => (None, v.to_cells()?),
    };
    budget.check_len(values.len())?;
    budget.touch(values.len())?;

    let labels = match index {
        Some(idx) => {
            let cells = idx.to_cells()?;
            if cells.len() != values.len() {
                return Err(ExecError::value(format!(
                    "Length of values ({}) does not match length of index ({})",
                    values.len(),
                    cells.len()
                )));
            }
            Some(cells)
        }
        None => labels,
    };
    Ok(Value::Series(match labels {
        Some(labels) => Series::labelled(name, None, labels, values),
        None => Series::new(name, values),
    }))
}

fn pandas_frame(args: &mut Args, budget: &mut Budget) -> ExecResult<Value> {
    let data = args.take(0, "data").unwrap_or(Value::Dict(Vec::new()));
    let columns = args.take(usize::MAX, "columns");
    let frame = match data {
        Value::Frame(f) => f.as_ref().clone(),
        Value::Dict(entries) => {
            let mut names = Vec::new();
            let mut cols: Vec<Vec<Cell>> = Vec::new();
            for (k, v) in entries {
                names.push(k.to_string());
                cols.push(if v.is_scalar() {
                    vec![v.expect_cell("value")?]
                } else {
                    v.to_cells()?
                });
            }
            let n = cols.iter().map(Vec::len).max().unwrap_or(0);
            let mut frame = Dataset::new(names.clone());
            for col in &mut cols {
                if col.len() == 1 && n > 1 {
                    *col = vec![col[0].clone(); n];
                } else if col.len() != n {
                    return Err(ExecError::value("All arrays must be of the same length"));
                }
            }
            budget.check_len(n)?;
            budget.touch(n * names.len())?;
            for r in 0..n {
                frame
                    .push_row(cols.iter().map(|c| c[r].clone()).collect())
                    .map_err(|e| ExecError::value(e.to_string()))?;
            }
            frame
        }
        Value::List(rows) | Value::Tuple(rows) => {
            budget.check_len(rows.len())?;
            budget.touch(rows.len())?;
            if rows.iter().all(|r| matches!(r, Value::Dict(_))) {
                let records = rows
                    .iter()
                    .map(|r| match r.to_json() {
                        serde_json::Value::Object(map) => Ok(map),
                        _ => Err(ExecError::type_error("expected a dict of records")),
                    })
                    .collect::<ExecResult<Vec<_>>>()?;
                Dataset::from_records(&records)
            } else {
                let names: Vec<String> = match &columns {
                    Some(cols) => cols.iterate()?.iter().map(|c| c.to_string()).collect(),
                    None => {
                        let width = rows.first().map(|r| r.iterate().map(|v| v.len())).transpose()?.unwrap_or(0);
                        (0..width).map(|i| i.to_string()).collect()
                    }
                };
                let mut frame = Dataset::new(names);
                for row in &rows {
                    let cells = row.to_cells()?;
                    frame
                        .push_row(cells)
                        .map_err(|e| ExecError::value(e.to_string()))?;
                }
                frame
            }
        }
        other => {
            return Err(ExecError::value(format!(
                "DataFrame constructor not properly called with {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Frame(Arc::new(frame)))
}

fn parse_number(text: &str) -> Option<Cell> {
    let t = text.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Some(Cell::Int(i));
    }
    t.parse::<f64>().ok().map(Cell::Float)
}

fn to_numeric(data: &Value, errors: &str, budget: &mut Budget) -> ExecResult<Value> {
    if !matches!(errors, "raise" | "coerce" | "ignore") {
        return Err(ExecError::value(
            "invalid error value specified; must be one of 'raise', 'coerce' or 'ignore'",
        ));
    }
    let convert = |pos: usize, cell: &Cell| -> ExecResult<Option<Cell>> {
        match cell {
            Cell::Text(s) => match parse_number(s) {
                Some(c) => Ok(Some(c)),
                None if errors == "coerce" => Ok(Some(Cell::Float(f64::NAN))),
                None if errors == "ignore" => Ok(None),
                None => Err(ExecError::value(format!(
                    "Unable to parse string \"{}\" at position {}",
                    s, pos
                ))),
            },
            Cell::Null => Ok(Some(Cell::Float(f64::NAN))),
            other => Ok(Some(other.clone())),
        }
    };
    match data {
        Value::Series(_) | Value::Array(_) | Value::List(_) | Value::Tuple(_) => {
            let cells = data.to_cells()?;
            budget.touch(cells.len())?;
            let mut out = Vec::with_capacity(cells.len());
            for (pos, cell) in cells.iter().enumerate() {
                match convert(pos, cell)? {
                    Some(c) => out.push(c),
                    None => return Ok(data.clone()),
                }
            }
            Ok(match data {
                Value::Series(s) => Value::Series(s.with_values(out)),
                _ => Value::Array(out),
            })
        }
        scalar => {
            let cell = scalar.expect_cell("arg")?;
            Ok(match convert(0, &cell)? {
                Some(c) => Value::from_cell(c),
                None => scalar.clone(),
            })
        }
    }
}

pub fn missing_mask(data: &Value, invert: bool, budget: &mut Budget) -> ExecResult<Value> {
    let flag = |c: &Cell| Cell::Bool(c.is_null() != invert);
    match data {
        Value::Frame(f) => {
            budget.touch(f.len() * f.columns().len())?;
            let mut out = Dataset::new(f.columns().to_vec());
            for row in f.rows() {
                out.push_row(row.iter().map(flag).collect())
                    .map_err(|e| ExecError::value(e.to_string()))?;
            }
            Ok(Value::frame(out))
        }
        Value::Series(s) => {
            budget.touch(s.len())?;
            Ok(Value::Series(s.with_values(s.values.iter().map(flag).collect())))
        }
        Value::Array(_) | Value::List(_) | Value::Tuple(_) => {
            let cells = data.to_cells()?;
            budget.touch(cells.len())?;
            Ok(Value::Array(cells.iter().map(flag).collect()))
        }
        scalar => Ok(Value::Bool(scalar.expect_cell("obj")?.is_null() != invert)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &'static str, positional: Vec<Value>) -> ExecResult<Value> {
        call_function(name, Args::new(name, positional, Vec::new()), &mut Budget::new(100_000, 1_000))
    }

    fn ints(xs: &[i64]) -> Value {
        Value::List(xs.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn test_only_allow_listed_names_resolve() {
        for name in ALLOWED_BUILTINS {
            assert!(lookup_builtin(name).is_some(), "{name}");
        }
        for name in ["open", "eval", "exec", "__import__", "print", "getattr"] {
            assert!(lookup_builtin(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_len_sum_min_max() {
        assert_eq!(call("len", vec![ints(&[1, 2, 3])]).unwrap(), Value::Int(3));
        assert_eq!(call("sum", vec![ints(&[1, 2, 3])]).unwrap(), Value::Int(6));
        assert_eq!(call("max", vec![ints(&[4, 9, 2])]).unwrap(), Value::Int(9));
        assert_eq!(call("min", vec![Value::Int(4), Value::Float(1.5)]).unwrap(), Value::Float(1.5));
        assert!(call("max", vec![ints(&[])]).is_err());
    }

    #[test]
    fn test_sorted_reverse_and_mixed_types() {
        let args = Args::new("sorted", vec![ints(&[3, 1, 2])], vec![("reverse".into(), Value::Bool(true))]);
        let out = call_function("sorted", args, &mut Budget::new(1000, 1000)).unwrap();
        assert_eq!(out, ints(&[3, 2, 1]));
        let mixed = Value::List(vec![Value::Int(1), Value::Str("a".into())]);
        assert!(call("sorted", vec![mixed]).is_err());
    }

    #[test]
    fn test_round_is_half_even() {
        assert_eq!(call("round", vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(call("round", vec![Value::Float(3.14159), Value::Int(2)]).unwrap(), Value::Float(3.14));
    }

    #[test]
    fn test_range_enumerate_zip() {
        assert_eq!(call("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(), ints(&[5, 3, 1]));
        let pairs = call("zip", vec![ints(&[1, 2, 3]), ints(&[4, 5])]).unwrap();
        assert_eq!(pairs.iterate().unwrap().len(), 2);
        let Value::List(e) = call("enumerate", vec![ints(&[7])]).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(e[0], Value::Tuple(vec![Value::Int(0), Value::Int(7)]));
    }

    #[test]
    fn test_range_respects_collection_cap() {
        let err = call_function(
            "range",
            Args::new("range", vec![Value::Int(10_000)], Vec::new()),
            &mut Budget::new(1_000_000, 100),
        )
        .unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ResourceLimit);
    }

    #[test]
    fn test_range_at_integer_extremes() {
        let err = call("range", vec![Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ResourceLimit);
        assert_eq!(
            call("range", vec![Value::Int(i64::MIN), Value::Int(i64::MAX), Value::Int(1 << 62)]).unwrap(),
            ints(&[i64::MIN, -(1 << 62), 0, 1 << 62])
        );
        assert_eq!(
            call("range", vec![Value::Int(i64::MIN), Value::Int(i64::MAX), Value::Int(i64::MAX)]).unwrap(),
            ints(&[i64::MIN, -1, i64::MAX - 1])
        );
        assert_eq!(
            call("range", vec![Value::Int(i64::MAX), Value::Int(i64::MIN), Value::Int(i64::MIN)]).unwrap(),
            ints(&[i64::MAX, -1])
        );
    }

    #[test]
    fn test_enumerate_start_overflow_is_a_value_error() {
        let err = call("enumerate", vec![ints(&[1, 2]), Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ValueError);
        let Value::List(e) = call("enumerate", vec![ints(&[1]), Value::Int(i64::MAX)]).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(e[0], Value::Tuple(vec![Value::Int(i64::MAX), Value::Int(1)]));
    }

    #[test]
    fn test_dict_from_pairs_and_keywords() {
        let pairs = Value::List(vec![Value::Tuple(vec![Value::Str("a".into()), Value::Int(1)])]);
        let args = Args::new("dict", vec![pairs], vec![("b".into(), Value::Int(2))]);
        let Value::Dict(d) = call_function("dict", args, &mut Budget::new(1000, 1000)).unwrap() else {
            panic!("expected dict");
        };
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_unexpected_keyword_is_rejected() {
        let args = Args::new("len", vec![ints(&[1])], vec![("key".into(), Value::None)]);
        assert!(call_function("len", args, &mut Budget::new(1000, 1000)).is_err());
    }

    #[test]
    fn test_module_attributes() {
        assert!(matches!(module_attribute(Module::Numpy, "nan").unwrap(), Value::Float(f) if f.is_nan()));
        assert_eq!(module_attribute(Module::Pandas, "Series").unwrap(), Value::Function("pd.Series"));
        assert!(module_attribute(Module::Pandas, "read_csv").is_err());
        assert!(module_attribute(Module::Numpy, "load").is_err());
    }

    #[test]
    fn test_numpy_reductions() {
        assert_eq!(call("np.mean", vec![ints(&[1, 2, 3, 4])]).unwrap(), Value::Float(2.5));
        assert_eq!(call("np.std", vec![ints(&[2, 4, 4, 4, 5, 5, 7, 9])]).unwrap(), Value::Float(2.0));
        let nan = call("np.mean", vec![Value::List(vec![Value::Int(1), Value::None])]).unwrap();
        assert!(matches!(nan, Value::Float(f) if f.is_nan()));
        assert_eq!(
            call("np.unique", vec![ints(&[3, 1, 3, 2])]).unwrap(),
            Value::Array(vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)])
        );
    }

    #[test]
    fn test_to_numeric_modes() {
        let s = Value::Series(Series::new(None, vec![Cell::Text("12".into()), Cell::Text("x".into())]));
        assert!(call("pd.to_numeric", vec![s.clone()]).is_err());
        let Value::Series(out) = call("pd.to_numeric", vec![s, Value::Str("coerce".into())]).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(out.values[0], Cell::Int(12));
        assert!(out.values[1].is_null());
    }

    #[test]
    fn test_dataframe_from_dict_of_lists() {
        let data = Value::Dict(vec![
            (Value::Str("a".into()), ints(&[1, 2])),
            (Value::Str("b".into()), Value::Str("x".into())),
        ]);
        let Value::Frame(f) = call("pd.DataFrame", vec![data]).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(f.len(), 2);
        assert_eq!(f.get(1, "b"), Some(&Cell::Text("x".into())));
    }
}
