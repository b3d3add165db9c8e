//! Runtime errors and resource accounting for snippet evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classes raised while evaluating a snippet.
///
/// Names follow the exception vocabulary analysts already read in
/// tracebacks, so a message like `KeyError: 'Bytes'` means what it says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecErrorKind {
    NameError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    AttributeError,
    ZeroDivisionError,
    ImportError,
    ResourceLimit,
}

impl fmt::Display for ExecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecErrorKind::NameError => "NameError",
            ExecErrorKind::TypeError => "TypeError",
            ExecErrorKind::ValueError => "ValueError",
            ExecErrorKind::KeyError => "KeyError",
            ExecErrorKind::IndexError => "IndexError",
            ExecErrorKind::AttributeError => "AttributeError",
            ExecErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ExecErrorKind::ImportError => "ImportError",
            ExecErrorKind::ResourceLimit => "ResourceLimitError",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
    /// One-based line of the statement that raised, once known.
    pub line: Option<usize>,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::NameError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::TypeError, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::ValueError, message)
    }

    pub fn key(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::KeyError, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::IndexError, message)
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::AttributeError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::ZeroDivisionError, message)
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::ImportError, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::ResourceLimit, message)
    }

    /// Attach a source line unless one is already recorded.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Fuel and size accounting for one evaluation.
///
/// Every evaluation step and every element touched by a vectorised
/// operation burns fuel. Any materialised collection longer than
/// `max_collection_len` is refused.
#[derive(Debug, Clone)]
pub struct Budget {
    remaining: u64,
    max_collection_len: usize,
}

impl Budget {
    pub fn new(max_steps: u64, max_collection_len: usize) -> Self {
        Self {
            remaining: max_steps,
            max_collection_len,
        }
    }

    pub fn tick(&mut self, cost: u64) -> ExecResult<()> {
        match self.remaining.checked_sub(cost) {
            Some(left) => {
                self.remaining = left;
                Ok(())
            }
            None => {
                self.remaining = 0;
                Err(ExecError::resource("step budget exhausted"))
            }
        }
    }

    /// Charge for touching `n` elements.
    pub fn touch(&mut self, n: usize) -> ExecResult<()> {
        self.tick(n as u64)
    }

    pub fn check_len(&self, n: usize) -> ExecResult<()> {
        if n > self.max_collection_len {
            return Err(ExecError::resource(format!(
                "collection of {} elements exceeds the limit of {}",
                n, self.max_collection_len
            )));
        }
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_traceback_tail() {
        let err = ExecError::key("'Bytes'");
        assert_eq!(err.to_string(), "KeyError: 'Bytes'");
        assert_eq!(
            ExecError::resource("x").to_string(),
            "ResourceLimitError: x"
        );
    }

    #[test]
    fn test_at_line_keeps_first_line() {
        let err = ExecError::name("x").at_line(3).at_line(7);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_budget_exhaustion() {
        let mut budget = Budget::new(5, 10);
        assert!(budget.tick(3).is_ok());
        let err = budget.tick(3).unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::ResourceLimit);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.check_len(10).is_ok());
        assert!(budget.check_len(11).is_err());
    }
}
