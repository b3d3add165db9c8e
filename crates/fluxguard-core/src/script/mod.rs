//! The analysis snippet language.
//!
//! Snippets are a block-free, Python-shaped subset with a pandas-flavoured
//! value model. Source goes through [`lexer`] and [`parser`] into an
//! [`ast::Program`], which [`interp::Interpreter`] evaluates against a
//! private dataset copy. Nothing in here can reach the filesystem, the
//! network or the host process: the only callables are the allow-listed
//! builtins, the `pd`/`np` handles and methods on values.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod indexing;
pub mod interp;
pub mod lexer;
pub mod methods;
pub mod ops;
pub mod parser;
pub mod stats;
pub mod value;

pub use ast::Program;
pub use builtins::ALLOWED_BUILTINS;
pub use error::{Budget, ExecError, ExecErrorKind, ExecResult};
pub use interp::{Interpreter, DATASET_NAME};
pub use parser::{parse_program, ParseError, ParseErrorCode};
pub use value::Value;

/// Snippet source that is known to parse.
///
/// The only constructor is [`ValidatedSnippet::parse`], so holding one is
/// proof that the text is syntactically well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSnippet {
    source: String,
    program: Program,
}

impl ValidatedSnippet {
    pub fn parse(source: impl Into<String>) -> Result<Self, ParseError> {
        let source = source.into();
        let program = parse_program(&source)?;
        Ok(Self { source, program })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// True if the snippet assigns `name` at top level.
    pub fn binds(&self, name: &str) -> bool {
        self.program.binds(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_snippet_requires_parse() {
        let snippet = ValidatedSnippet::parse("result = df.head()").unwrap();
        assert_eq!(snippet.source(), "result = df.head()");
        assert!(snippet.binds("result"));
        assert!(ValidatedSnippet::parse("def f():\n    return 1").is_err());
        assert!(ValidatedSnippet::parse("result = (1 + ").is_err());
    }
}
