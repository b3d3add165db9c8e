//! Operators: scalar arithmetic with Python semantics, and element-wise
//! broadcasting over Series and arrays with pandas semantics.
//!
//! The two differ on purpose. `1 / 0` raises, while `df["a"] / 0` yields
//! `inf`; missing cells propagate as NaN through arithmetic and compare
//! unequal to everything.

use std::cmp::Ordering;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::error::{Budget, ExecError, ExecResult};
use super::value::{Series, Value};
use crate::dataset::Cell;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_cell(cell: &Cell) -> Option<Num> {
        match cell {
            Cell::Bool(b) => Some(Num::Int(i64::from(*b))),
            Cell::Int(i) => Some(Num::Int(*i)),
            Cell::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn f(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            Num::Int(i) => Cell::Int(i),
            Num::Float(f) => Cell::Float(f),
        }
    }
}

fn py_floor_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Numeric binary operation. `strict` raises on division by zero the way
/// Python scalars do; otherwise IEEE results are produced.
fn num_binop(op: BinOp, a: Num, b: Num, strict: bool) -> ExecResult<Num> {
    let divides = matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod);
    if divides && b.f() == 0.0 {
        if strict {
            let msg = match (op, a, b) {
                (BinOp::Div, _, _) => "division by zero",
                (BinOp::Mod, Num::Int(_), Num::Int(_)) => "integer modulo by zero",
                (BinOp::FloorDiv, Num::Int(_), Num::Int(_)) => {
                    "integer division or modulo by zero"
                }
                _ => "float modulo",
            };
            return Err(ExecError::zero_division(msg));
        }
        let x = a.f();
        return Ok(Num::Float(match op {
            BinOp::Mod => f64::NAN,
            _ if x == 0.0 || x.is_nan() => f64::NAN,
            _ if x > 0.0 => f64::INFINITY,
            _ => f64::NEG_INFINITY,
        }));
    }

    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::FloorDiv => x
                .checked_div_euclid(y)
                .map(|q| q - i64::from(y < 0 && x.rem_euclid(y) != 0)),
            BinOp::Mod => x
                .checked_rem_euclid(y)
                .map(|r| if r != 0 && y < 0 { r + y } else { r }),
            BinOp::Pow if y >= 0 => u32::try_from(y).ok().and_then(|e| x.checked_pow(e)),
            BinOp::BitAnd => Some(x & y),
            BinOp::BitOr => Some(x | y),
            BinOp::BitXor => Some(x ^ y),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Num::Int(v));
        }
    }

    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
        return Err(ExecError::type_error(format!(
            "unsupported operand type(s) for {}: 'float' and 'float'",
            op.symbol()
        )));
    }

    let (x, y) = (a.f(), b.f());
    Ok(Num::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => py_floor_mod(x, y),
        BinOp::Pow => x.powf(y),
        _ => unreachable!("bitwise operators handled above"),
    }))
}

fn scalar_type(cell: &Cell) -> &'static str {
    Value::from_cell(cell.clone()).type_name()
}

fn unsupported(op: BinOp, a: &str, b: &str) -> ExecError {
    ExecError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a,
        b
    ))
}

/// Element-wise arithmetic on two cells.
pub fn cell_binop(op: BinOp, a: &Cell, b: &Cell) -> ExecResult<Cell> {
    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
        if let (Some(x), Some(y)) = (mask_bit(a), mask_bit(b)) {
            return Ok(Cell::Bool(match op {
                BinOp::BitAnd => x && y,
                BinOp::BitOr => x || y,
                _ => x ^ y,
            }));
        }
    }
    if a.is_null() || b.is_null() {
        return Ok(Cell::Float(f64::NAN));
    }
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) if op == BinOp::Add => Ok(Cell::Text(format!("{x}{y}"))),
        _ => match (Num::from_cell(a), Num::from_cell(b)) {
            (Some(x), Some(y)) => Ok(num_binop(op, x, y, false)?.into_cell()),
            _ => Err(unsupported(op, scalar_type(a), scalar_type(b))),
        },
    }
}

/// Boolean view used by `&`, `|` and `^` on masks. Missing is false.
fn mask_bit(cell: &Cell) -> Option<bool> {
    match cell {
        Cell::Bool(b) => Some(*b),
        Cell::Null => Some(false),
        Cell::Float(f) if f.is_nan() => Some(false),
        _ => None,
    }
}

/// Element-wise comparison on two cells. Missing compares unequal.
pub fn cell_compare(op: CmpOp, a: &Cell, b: &Cell) -> ExecResult<bool> {
    if a.is_null() || b.is_null() {
        return Ok(op == CmpOp::NotEq);
    }
    let ordering = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Cell::Text(x), Cell::Text(y)) => Some(x.cmp(y)),
            _ => None,
        },
    };
    match (op, ordering) {
        (CmpOp::Eq, o) => Ok(o == Some(Ordering::Equal)),
        (CmpOp::NotEq, o) => Ok(o != Some(Ordering::Equal)),
        (_, Some(o)) => Ok(ordering_holds(op, o)),
        (_, None) => Err(ExecError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            scalar_type(a),
            scalar_type(b)
        ))),
    }
}

fn ordering_holds(op: CmpOp, o: Ordering) -> bool {
    match op {
        CmpOp::Lt => o == Ordering::Less,
        CmpOp::LtE => o != Ordering::Greater,
        CmpOp::Gt => o == Ordering::Greater,
        CmpOp::GtE => o != Ordering::Less,
        CmpOp::Eq => o == Ordering::Equal,
        _ => o != Ordering::Equal,
    }
}

/// Shape of a vectorised operand.
enum Vector<'a> {
    Series(&'a Series),
    Array(&'a [Cell]),
}

impl Vector<'_> {
    fn cells(&self) -> &[Cell] {
        match self {
            Vector::Series(s) => &s.values,
            Vector::Array(a) => a,
        }
    }
}

fn as_vector(v: &Value) -> Option<Vector<'_>> {
    match v {
        Value::Series(s) => Some(Vector::Series(s)),
        Value::Array(a) => Some(Vector::Array(a)),
        _ => None,
    }
}

/// Apply a cell operation across one or two vectors, broadcasting scalars.
fn broadcast<F>(left: &Value, right: &Value, budget: &mut Budget, f: F) -> ExecResult<Value>
where
    F: Fn(&Cell, &Cell) -> ExecResult<Cell>,
{
    let (lv, rv) = (as_vector(left), as_vector(right));
    let template = match (&lv, &rv) {
        (Some(Vector::Series(s)), _) | (_, Some(Vector::Series(s))) => Some(*s),
        _ => None,
    };

    let cells = match (&lv, &rv) {
        (Some(l), Some(r)) => {
            let (a, b) = (l.cells(), r.cells());
            if a.len() != b.len() {
                return Err(ExecError::value(format!(
                    "operands could not be broadcast together with shapes ({},) ({},)",
                    a.len(),
                    b.len()
                )));
            }
            budget.touch(a.len())?;
            a.iter().zip(b).map(|(x, y)| f(x, y)).collect::<ExecResult<Vec<_>>>()?
        }
        (Some(l), None) => {
            let scalar = right.expect_cell("operand")?;
            budget.touch(l.cells().len())?;
            l.cells().iter().map(|x| f(x, &scalar)).collect::<ExecResult<Vec<_>>>()?
        }
        (None, Some(r)) => {
            let scalar = left.expect_cell("operand")?;
            budget.touch(r.cells().len())?;
            r.cells().iter().map(|y| f(&scalar, y)).collect::<ExecResult<Vec<_>>>()?
        }
        (None, None) => unreachable!("broadcast requires a vector operand"),
    };

    Ok(match template {
        Some(series) => {
            let mut out = series.with_values(cells);
            // combining two differently named series drops the name
            if let (Some(Vector::Series(a)), Some(Vector::Series(b))) = (&lv, &rv) {
                if a.name != b.name {
                    out.name = None;
                }
            }
            Value::Series(out)
        }
        None => Value::Array(cells),
    })
}

fn is_vector(v: &Value) -> bool {
    as_vector(v).is_some()
}

/// `left <op> right`.
pub fn binary(op: BinOp, left: &Value, right: &Value, budget: &mut Budget) -> ExecResult<Value> {
    if is_vector(left) || is_vector(right) {
        return broadcast(left, right, budget, |a, b| cell_binop(op, a, b));
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            budget.check_len(a.len() + b.len())?;
            Ok(Value::Str(format!("{a}{b}")))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            budget.check_len(a.len() + b.len())?;
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            budget.check_len(a.len() + b.len())?;
            Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, seq @ (Value::Str(_) | Value::List(_) | Value::Tuple(_)), n)
        | (BinOp::Mul, n, seq @ (Value::Str(_) | Value::List(_) | Value::Tuple(_)))
            if n.as_int().is_some() && !matches!(n, Value::Str(_)) =>
        {
            repeat(seq, n.as_int().unwrap_or(0), budget)
        }
        (BinOp::Mod, Value::Str(fmt), args) => percent_format(fmt, args),
        (BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => {
            Ok(Value::Bool(match op {
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                _ => a ^ b,
            }))
        }
        _ => {
            let num = |v: &Value| match v {
                Value::Bool(b) => Some(Num::Int(i64::from(*b))),
                Value::Int(i) => Some(Num::Int(*i)),
                Value::Float(f) => Some(Num::Float(*f)),
                _ => None,
            };
            match (num(left), num(right)) {
                (Some(a), Some(b)) => Ok(match num_binop(op, a, b, true)? {
                    Num::Int(i) => Value::Int(i),
                    Num::Float(f) => Value::Float(f),
                }),
                _ => Err(unsupported(op, left.type_name(), right.type_name())),
            }
        }
    }
}

fn repeat(seq: &Value, times: i64, budget: &mut Budget) -> ExecResult<Value> {
    let times = usize::try_from(times).unwrap_or(0);
    match seq {
        Value::Str(s) => {
            budget.check_len(s.len().saturating_mul(times))?;
            Ok(Value::Str(s.repeat(times)))
        }
        Value::List(v) | Value::Tuple(v) => {
            let n = v.len().saturating_mul(times);
            budget.check_len(n)?;
            budget.touch(n)?;
            let items: Vec<Value> = v.iter().cloned().cycle().take(n).collect();
            Ok(if matches!(seq, Value::List(_)) {
                Value::List(items)
            } else {
                Value::Tuple(items)
            })
        }
        _ => Err(ExecError::type_error("can't multiply sequence")),
    }
}

/// `"%d rows" % n` and `"%s: %.2f" % (a, b)`.
fn percent_format(fmt: &str, args: &Value) -> ExecResult<Value> {
    let args: Vec<Value> = match args {
        Value::Tuple(items) => items.clone(),
        other => vec![other.clone()],
    };
    let mut out = String::new();
    let mut next = args.iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        while let Some(&p) = chars.peek() {
            if p.is_ascii_digit() || p == '.' || p == '-' || p == '+' {
                spec.push(p);
                chars.next();
            } else {
                break;
            }
        }
        let conv = chars
            .next()
            .ok_or_else(|| ExecError::value("incomplete format"))?;
        if conv == '%' {
            out.push('%');
            continue;
        }
        let arg = next
            .next()
            .ok_or_else(|| ExecError::type_error("not enough arguments for format string"))?;
        let piece = match conv {
            's' => arg.to_string(),
            'r' => arg.repr(),
            'd' | 'i' => match arg.as_f64() {
                Some(x) => format!("{}", x.trunc() as i64),
                None => {
                    return Err(ExecError::type_error(format!(
                        "%d format: a real number is required, not {}",
                        arg.type_name()
                    )))
                }
            },
            'f' | 'e' | 'g' => {
                let x = arg.as_f64().ok_or_else(|| {
                    ExecError::type_error("must be real number, not str")
                })?;
                format_number(x, &format!("{spec}{conv}"))?
            }
            other => {
                return Err(ExecError::value(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&piece);
    }
    if next.next().is_some() {
        return Err(ExecError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(Value::Str(out))
}

/// Largest width or precision a format spec may ask for.
pub const MAX_FORMAT_WIDTH: usize = 10_000;

fn format_extent(n: usize, spec: &str) -> ExecResult<usize> {
    if n > MAX_FORMAT_WIDTH {
        return Err(ExecError::resource(format!(
            "format spec '{}' exceeds the width limit of {}",
            spec, MAX_FORMAT_WIDTH
        )));
    }
    Ok(n)
}

/// Apply a format spec such as `.2f`, `,`, `>8` or `.1%` to a number.
pub fn format_number(x: f64, spec: &str) -> ExecResult<String> {
    let (body, kind) = match spec.chars().last() {
        Some(k @ ('f' | 'F' | 'e' | 'g' | '%' | 'd')) => (&spec[..spec.len() - 1], Some(k)),
        _ => (spec, None),
    };
    let (body, precision) = match body.split_once('.') {
        Some((head, prec)) => (
            head,
            Some(
                prec.parse::<usize>()
                    .map_err(|_| ExecError::value(format!("Invalid format specifier '{spec}'")))
                    .and_then(|p| format_extent(p, spec))?,
            ),
        ),
        None => (body, None),
    };
    let grouping = body.contains(',');
    let width: usize = body
        .trim_start_matches(['<', '>', '^', '0', '+', '-'])
        .trim_end_matches(',')
        .parse()
        .unwrap_or(0);
    format_extent(width, spec)?;

    let mut text = match kind {
        Some('%') => format!("{:.*}%", precision.unwrap_or(6), x * 100.0),
        Some('e') => format!("{:.*e}", precision.unwrap_or(6), x),
        Some('d') => format!("{}", x.round() as i64),
        Some(_) => format!("{:.*}", precision.unwrap_or(6), x),
        None => match precision {
            Some(p) => format!("{:.*}", p, x),
            None => format_plain(x),
        },
    };
    if grouping {
        text = group_thousands(&text);
    }
    if text.chars().count() < width {
        let pad = " ".repeat(width - text.chars().count());
        text = if body.starts_with('<') {
            format!("{text}{pad}")
        } else {
            format!("{pad}{text}")
        };
    }
    Ok(text)
}

/// `format(value, spec)`, as used by f-string fields and `str.format`.
pub fn format_value(value: &Value, spec: &str) -> ExecResult<String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    match value {
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => {
            let x = value.as_f64().unwrap_or(0.0);
            // integers keep integer rendering unless a float kind is requested
            if matches!(value, Value::Int(_)) && !spec.ends_with(['f', 'F', 'e', 'g', '%']) {
                return format_number(x, &format!("{}d", spec.trim_end_matches('d')));
            }
            format_number(x, spec)
        }
        other => {
            let text = other.to_string();
            let (align, width) = match spec.chars().next() {
                Some(c @ ('<' | '>' | '^')) => (c, &spec[1..]),
                _ => ('<', spec),
            };
            let width: usize = width.parse().map_err(|_| {
                ExecError::value(format!(
                    "Invalid format specifier '{}' for object of type '{}'",
                    spec,
                    other.type_name()
                ))
            })?;
            format_extent(width, spec)?;
            let len = text.chars().count();
            if len >= width {
                return Ok(text);
            }
            let pad = width - len;
            Ok(match align {
                '>' => format!("{}{}", " ".repeat(pad), text),
                '^' => format!("{}{}{}", " ".repeat(pad / 2), text, " ".repeat(pad - pad / 2)),
                _ => format!("{}{}", text, " ".repeat(pad)),
            })
        }
    }
}

fn format_plain(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

fn group_thousands(text: &str) -> String {
    let (sign, rest) = match text.strip_prefix('-') {
        Some(r) => ("-", r),
        None => ("", text),
    };
    let (int_part, tail) = match rest.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{tail}")
}

/// `left <op> right` for comparisons, including membership and identity.
pub fn compare(op: CmpOp, left: &Value, right: &Value, budget: &mut Budget) -> ExecResult<Value> {
    match op {
        CmpOp::In | CmpOp::NotIn => {
            let found = contains(right, left)?;
            return Ok(Value::Bool(found == (op == CmpOp::In)));
        }
        CmpOp::Is | CmpOp::IsNot => {
            let same = match (left, right) {
                (Value::None, Value::None) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (a, b) if a.is_scalar() && b.is_scalar() => false,
                (a, b) => a == b,
            };
            return Ok(Value::Bool(same == (op == CmpOp::Is)));
        }
        _ => {}
    }

    if is_vector(left) || is_vector(right) {
        return broadcast(left, right, budget, |a, b| Ok(Cell::Bool(cell_compare(op, a, b)?)));
    }

    match (left, right) {
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            sequence_compare(op, a, b, budget).map(Value::Bool)
        }
        (a, b) if a.is_scalar() && b.is_scalar() => {
            let (x, y) = (a.expect_cell("operand")?, b.expect_cell("operand")?);
            if a == &Value::None || b == &Value::None {
                return match op {
                    CmpOp::Eq => Ok(Value::Bool(a == b)),
                    CmpOp::NotEq => Ok(Value::Bool(a != b)),
                    _ => Err(ExecError::type_error(format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        op.symbol(),
                        a.type_name(),
                        b.type_name()
                    ))),
                };
            }
            // float('nan') == float('nan') is False for scalars too
            cell_compare(op, &x, &y).map(Value::Bool)
        }
        (a, b) => match op {
            CmpOp::Eq => Ok(Value::Bool(a == b)),
            CmpOp::NotEq => Ok(Value::Bool(a != b)),
            _ => Err(ExecError::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn sequence_compare(op: CmpOp, a: &[Value], b: &[Value], budget: &mut Budget) -> ExecResult<bool> {
    for (x, y) in a.iter().zip(b) {
        if !values_equal(x, y) {
            return match op {
                CmpOp::Eq => Ok(false),
                CmpOp::NotEq => Ok(true),
                _ => compare(op, x, y, budget)?.truthy(),
            };
        }
    }
    Ok(ordering_holds(op, a.len().cmp(&b.len())))
}

/// Python `==` for scalars and containers, used for dict keys and `in`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
            }
            _ => a == b,
        },
    }
}

/// `needle in container`.
pub fn contains(container: &Value, needle: &Value) -> ExecResult<bool> {
    Ok(match container {
        Value::Str(hay) => match needle {
            Value::Str(n) => hay.contains(n.as_str()),
            other => {
                return Err(ExecError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )))
            }
        },
        Value::List(items) | Value::Tuple(items) => items.iter().any(|i| values_equal(i, needle)),
        Value::Dict(entries) => entries.iter().any(|(k, _)| values_equal(k, needle)),
        Value::Array(cells) => match needle.to_cell() {
            Some(c) => cells.iter().any(|x| x.key() == c.key()),
            None => false,
        },
        // membership on a Series tests its labels
        Value::Series(s) => match needle.to_cell() {
            Some(c) => s.position_of(&c).is_some(),
            None => false,
        },
        Value::Frame(f) => match needle {
            Value::Str(name) => f.has_column(name),
            _ => false,
        },
        other => {
            return Err(ExecError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )))
        }
    })
}

pub fn unary(op: UnaryOp, operand: &Value, budget: &mut Budget) -> ExecResult<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.truthy()?));
    }
    if let Some(vector) = as_vector(operand) {
        budget.touch(vector.cells().len())?;
        let cells = vector
            .cells()
            .iter()
            .map(|c| unary_cell(op, c))
            .collect::<ExecResult<Vec<_>>>()?;
        return Ok(match operand {
            Value::Series(s) => Value::Series(s.with_values(cells)),
            _ => Value::Array(cells),
        });
    }
    let cell = operand.to_cell().ok_or_else(|| {
        ExecError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            unary_symbol(op),
            operand.type_name()
        ))
    })?;
    match (op, &cell) {
        // ~True is -2 for a plain bool
        (UnaryOp::Invert, Cell::Bool(b)) => Ok(Value::Int(!i64::from(*b))),
        _ => unary_cell(op, &cell).map(Value::from_cell),
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Not => "not",
        UnaryOp::Invert => "~",
    }
}

fn unary_cell(op: UnaryOp, cell: &Cell) -> ExecResult<Cell> {
    match (op, cell) {
        (_, c) if c.is_null() && op != UnaryOp::Invert => Ok(Cell::Float(f64::NAN)),
        (UnaryOp::Invert, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
        (UnaryOp::Invert, c) if c.is_null() => Ok(Cell::Bool(true)),
        (UnaryOp::Invert, Cell::Int(i)) => Ok(Cell::Int(!i)),
        (UnaryOp::Neg, Cell::Int(i)) => Ok(i
            .checked_neg()
            .map(Cell::Int)
            .unwrap_or(Cell::Float(-(*i as f64)))),
        (UnaryOp::Neg, Cell::Float(f)) => Ok(Cell::Float(-f)),
        (UnaryOp::Neg, Cell::Bool(b)) => Ok(Cell::Int(-i64::from(*b))),
        (UnaryOp::Pos, c) if c.is_numeric() => Ok(c.clone()),
        (_, c) => Err(ExecError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            unary_symbol(op),
            scalar_type(c)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Budget {
        Budget::new(10_000, 10_000)
    }

    fn bin(op: BinOp, a: Value, b: Value) -> ExecResult<Value> {
        binary(op, &a, &b, &mut budget())
    }

    #[test]
    fn test_python_integer_semantics() {
        assert_eq!(bin(BinOp::Div, Value::Int(7), Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(bin(BinOp::FloorDiv, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(bin(BinOp::Mod, Value::Int(-7), Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(bin(BinOp::Pow, Value::Int(2), Value::Int(10)).unwrap(), Value::Int(1024));
        assert_eq!(bin(BinOp::Pow, Value::Int(2), Value::Int(-1)).unwrap(), Value::Float(0.5));
        assert_eq!(bin(BinOp::Add, Value::Bool(true), Value::Int(1)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_scalar_division_by_zero_raises() {
        let err = bin(BinOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_series_division_by_zero_is_ieee() {
        let s = Value::Series(Series::new(Some("a".into()), vec![Cell::Int(1), Cell::Int(0)]));
        let Value::Series(out) = bin(BinOp::Div, s, Value::Int(0)).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(out.values[0], Cell::Float(f64::INFINITY));
        assert!(out.values[1].is_null());
        assert_eq!(out.name.as_deref(), Some("a"));
    }

    #[test]
    fn test_mask_combination() {
        let a = Value::Series(Series::new(None, vec![Cell::Bool(true), Cell::Bool(false), Cell::Null]));
        let b = Value::Series(Series::new(None, vec![Cell::Bool(true), Cell::Bool(true), Cell::Bool(true)]));
        let Value::Series(and) = bin(BinOp::BitAnd, a.clone(), b.clone()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(and.values, vec![Cell::Bool(true), Cell::Bool(false), Cell::Bool(false)]);
        let Value::Series(not) = unary(UnaryOp::Invert, &a, &mut budget()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(not.values, vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(true)]);
    }

    #[test]
    fn test_series_comparison_with_missing() {
        let s = Value::Series(Series::new(None, vec![Cell::Int(5), Cell::Null, Cell::Text("x".into())]));
        let Value::Series(ne) = compare(CmpOp::NotEq, &s, &Value::Int(5), &mut budget()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(ne.values, vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(true)]);
        assert!(compare(CmpOp::Gt, &s, &Value::Int(1), &mut budget()).is_err());
    }

    #[test]
    fn test_membership() {
        let list = Value::List(vec![Value::Int(1), Value::Str("a".into())]);
        assert_eq!(compare(CmpOp::In, &Value::Float(1.0), &list, &mut budget()).unwrap(), Value::Bool(true));
        assert_eq!(
            compare(CmpOp::NotIn, &Value::Str("b".into()), &list, &mut budget()).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_string_formatting() {
        assert_eq!(
            bin(BinOp::Mod, Value::Str("%d rows, %.1f%%".into()), Value::Tuple(vec![Value::Int(3), Value::Float(12.345)]))
                .unwrap(),
            Value::Str("3 rows, 12.3%".into())
        );
        assert_eq!(format_number(1234567.891, ",.2f").unwrap(), "1,234,567.89");
        assert_eq!(format_number(0.256, ".1%").unwrap(), "25.6%");
    }

    #[test]
    fn test_repetition_is_capped() {
        let mut small = Budget::new(10_000, 10);
        let err = binary(BinOp::Mul, &Value::List(vec![Value::Int(0)]), &Value::Int(11), &mut small)
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ResourceLimit);
        let err = binary(BinOp::Mul, &Value::Str("ab".into()), &Value::Int(i64::MAX), &mut small)
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ExecErrorKind::ResourceLimit);
    }

    #[test]
    fn test_huge_format_widths_are_refused() {
        let kind = |r: ExecResult<String>| r.unwrap_err().kind;
        assert_eq!(kind(format_number(1.0, ".100000000000f")), super::super::error::ExecErrorKind::ResourceLimit);
        assert_eq!(kind(format_number(1.0, ">100000000000")), super::super::error::ExecErrorKind::ResourceLimit);
        assert_eq!(
            kind(format_value(&Value::Str("x".into()), "^100000000000")),
            super::super::error::ExecErrorKind::ResourceLimit
        );
        assert_eq!(format_value(&Value::Str("x".into()), ">3").unwrap(), "  x");
        assert_eq!(format_number(2.5, "8.2f").unwrap(), "    2.50");
    }
}
