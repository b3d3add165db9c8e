//! Column reductions with pandas defaults: missing values are skipped,
//! integer sums stay integers, `std` uses the sample estimator unless told
//! otherwise.

use std::cmp::Ordering;

use super::error::{ExecError, ExecResult};
use crate::dataset::Cell;

fn reject_text(cells: &[Cell], op: &str) -> ExecResult<()> {
    if let Some(text) = cells.iter().find_map(Cell::as_str) {
        return Err(ExecError::type_error(format!(
            "Could not convert string '{}' to numeric for {}",
            text, op
        )));
    }
    Ok(())
}

/// Non-missing numeric values.
pub fn numbers(cells: &[Cell]) -> Vec<f64> {
    cells.iter().filter_map(Cell::as_f64).collect()
}

pub fn sum(cells: &[Cell]) -> ExecResult<Cell> {
    let present: Vec<&Cell> = cells.iter().filter(|c| !c.is_null()).collect();
    if !present.is_empty() && present.iter().all(|c| c.as_str().is_some()) {
        return Ok(Cell::Text(present.iter().filter_map(|c| c.as_str()).collect()));
    }
    reject_text(cells, "sum")?;
    if present.iter().all(|c| matches!(c, Cell::Int(_) | Cell::Bool(_))) {
        let mut total: i64 = 0;
        let mut exact = true;
        for c in &present {
            let v = match c {
                Cell::Int(i) => *i,
                Cell::Bool(b) => i64::from(*b),
                _ => 0,
            };
            match total.checked_add(v) {
                Some(t) => total = t,
                None => {
                    exact = false;
                    break;
                }
            }
        }
        if exact {
            return Ok(Cell::Int(total));
        }
    }
    Ok(Cell::Float(numbers(cells).iter().sum()))
}

pub fn mean(cells: &[Cell]) -> ExecResult<Cell> {
    reject_text(cells, "mean")?;
    let xs = numbers(cells);
    if xs.is_empty() {
        return Ok(Cell::Float(f64::NAN));
    }
    Ok(Cell::Float(xs.iter().sum::<f64>() / xs.len() as f64))
}

pub fn median(cells: &[Cell]) -> ExecResult<Cell> {
    quantile(cells, 0.5)
}

/// Linear-interpolated quantile, `q` in `[0, 1]`.
pub fn quantile(cells: &[Cell], q: f64) -> ExecResult<Cell> {
    reject_text(cells, "quantile")?;
    if !(0.0..=1.0).contains(&q) {
        return Err(ExecError::value("percentiles should all be in the interval [0, 1]"));
    }
    let mut xs = numbers(cells);
    if xs.is_empty() {
        return Ok(Cell::Float(f64::NAN));
    }
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let pos = q * (xs.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    let frac = pos - lo as f64;
    Ok(Cell::Float(xs[lo] + (xs[hi] - xs[lo]) * frac))
}

pub fn var(cells: &[Cell], ddof: usize) -> ExecResult<Cell> {
    reject_text(cells, "var")?;
    let xs = numbers(cells);
    if xs.len() <= ddof {
        return Ok(Cell::Float(f64::NAN));
    }
    let m = xs.iter().sum::<f64>() / xs.len() as f64;
    let ss: f64 = xs.iter().map(|x| (x - m).powi(2)).sum();
    Ok(Cell::Float(ss / (xs.len() - ddof) as f64))
}

pub fn std(cells: &[Cell], ddof: usize) -> ExecResult<Cell> {
    Ok(match var(cells, ddof)? {
        Cell::Float(v) => Cell::Float(v.sqrt()),
        other => other,
    })
}

/// Position of the extreme non-missing value; first occurrence wins.
pub fn arg_extreme(cells: &[Cell], want: Ordering) -> ExecResult<Option<usize>> {
    let mut best: Option<usize> = None;
    for (pos, cell) in cells.iter().enumerate() {
        if cell.is_null() {
            continue;
        }
        best = match best {
            None => Some(pos),
            Some(b) => {
                if order(cell, &cells[b])? == want {
                    Some(pos)
                } else {
                    Some(b)
                }
            }
        };
    }
    Ok(best)
}

pub fn min(cells: &[Cell]) -> ExecResult<Cell> {
    extreme(cells, Ordering::Less)
}

pub fn max(cells: &[Cell]) -> ExecResult<Cell> {
    extreme(cells, Ordering::Greater)
}

fn extreme(cells: &[Cell], want: Ordering) -> ExecResult<Cell> {
    Ok(arg_extreme(cells, want)?
        .map(|p| cells[p].clone())
        .unwrap_or(Cell::Float(f64::NAN)))
}

/// Ordering between two present cells; numbers and text do not mix.
pub fn order(a: &Cell, b: &Cell) -> ExecResult<Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
        _ => match (a, b) {
            (Cell::Text(x), Cell::Text(y)) => Ok(x.cmp(y)),
            _ => Err(ExecError::type_error(
                "'<' not supported between instances of 'str' and a number",
            )),
        },
    }
}

pub fn count(cells: &[Cell]) -> usize {
    cells.iter().filter(|c| !c.is_null()).count()
}

/// Round half to even at `decimals` places, as numpy does.
pub fn round_half_even(x: f64, decimals: i32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let factor = 10f64.powi(decimals);
    (x * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[i64]) -> Vec<Cell> {
        xs.iter().copied().map(Cell::Int).collect()
    }

    #[test]
    fn test_sum_keeps_integers_and_skips_missing() {
        let mut cells = ints(&[100, 200]);
        cells.push(Cell::Null);
        assert_eq!(sum(&cells).unwrap(), Cell::Int(300));
        assert_eq!(sum(&[Cell::Float(0.5), Cell::Int(1)]).unwrap(), Cell::Float(1.5));
        assert_eq!(sum(&[]).unwrap(), Cell::Int(0));
    }

    #[test]
    fn test_text_sum_concatenates_and_mean_rejects() {
        let cells = vec![Cell::Text("a".into()), Cell::Text("b".into())];
        assert_eq!(sum(&cells).unwrap(), Cell::Text("ab".into()));
        assert!(mean(&cells).is_err());
    }

    #[test]
    fn test_median_and_quantile() {
        assert_eq!(median(&ints(&[3, 1, 2])).unwrap(), Cell::Float(2.0));
        assert_eq!(median(&ints(&[1, 2, 3, 4])).unwrap(), Cell::Float(2.5));
        assert_eq!(quantile(&ints(&[0, 10]), 0.9).unwrap(), Cell::Float(9.0));
    }

    #[test]
    fn test_sample_and_population_std() {
        let cells = ints(&[2, 4, 4, 4, 5, 5, 7, 9]);
        assert_eq!(std(&cells, 0).unwrap(), Cell::Float(2.0));
        let Cell::Float(sample) = std(&cells, 1).unwrap() else {
            panic!("expected float");
        };
        assert!((sample - 2.138).abs() < 1e-3);
    }

    #[test]
    fn test_extremes() {
        let cells = vec![Cell::Int(3), Cell::Null, Cell::Int(9), Cell::Int(9)];
        assert_eq!(max(&cells).unwrap(), Cell::Int(9));
        assert_eq!(arg_extreme(&cells, Ordering::Greater).unwrap(), Some(2));
        assert!(max(&[Cell::Null]).unwrap().is_null());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5, 0), 2.0);
        assert_eq!(round_half_even(3.5, 0), 4.0);
        assert_eq!(round_half_even(1.234, 2), 1.23);
    }
}
