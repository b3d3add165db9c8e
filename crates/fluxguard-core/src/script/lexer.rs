//! Tokenizer for analysis snippets.
//!
//! Newlines end statements only outside brackets. A backslash at the end of
//! a line joins it with the next. Leading indentation on a statement line is
//! rejected because the language has no blocks.

use super::parser::{ParseError, ParseErrorCode, ParseResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Punct(&'static str),
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

const PUNCT_TWO: [&str; 12] = [
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->",
];
const PUNCT_ONE: [&str; 22] = [
    "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
    "&", "|", "^", "~",
];

const STRING_PREFIXES: [&str; 9] = ["r", "b", "f", "u", "rb", "br", "fr", "rf", "R"];

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the whole source.
    pub fn tokenize(mut self) -> ParseResult<Vec<Token>> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                self.check_indentation()?;
                continue;
            }

            let c = self.chars[self.pos];
            match c {
                '\n' => {
                    self.push_newline();
                    self.advance();
                    self.at_line_start = self.depth == 0;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.advance(),
                '#' => self.skip_comment(),
                '\\' if self.peek(1) == Some('\n') || self.peek(1) == Some('\r') => {
                    self.advance();
                    if self.chars.get(self.pos) == Some(&'\r') {
                        self.advance();
                    }
                    if self.chars.get(self.pos) == Some(&'\n') {
                        self.advance();
                    }
                }
                '"' | '\'' => {
                    let (line, column) = (self.line, self.column);
                    let text = self.read_string(false)?;
                    self.push(TokenKind::Str(text), line, column);
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    self.read_number()?;
                }
                c if c.is_alphabetic() || c == '_' => self.read_name()?,
                _ => self.read_punct()?,
            }
        }

        if self.depth > 0 {
            return Err(self.error(
                ParseErrorCode::UnbalancedBracket,
                "unexpected end of snippet: unclosed bracket",
            ));
        }
        self.push_newline();
        let (line, column) = (self.line, self.column);
        self.push(TokenKind::Eof, line, column);
        Ok(self.tokens)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn push_newline(&mut self) {
        if self.depth > 0 {
            return;
        }
        match self.tokens.last() {
            None => {}
            Some(t) if t.kind == TokenKind::Newline => {}
            Some(_) => {
                let (line, column) = (self.line, self.column);
                self.push(TokenKind::Newline, line, column);
            }
        }
    }

    fn error(&self, code: ParseErrorCode, message: impl Into<String>) -> ParseError {
        ParseError::new(code, message, self.line, self.column)
    }

    fn check_indentation(&mut self) -> ParseResult<()> {
        let mut offset = 0;
        while matches!(self.peek(offset), Some(' ' | '\t' | '\x0c')) {
            offset += 1;
        }
        let blank = matches!(self.peek(offset), None | Some('\n' | '\r' | '#'));
        if offset > 0 && !blank {
            for _ in 0..offset {
                self.advance();
            }
            return Err(self.error(ParseErrorCode::UnexpectedIndent, "unexpected indent"));
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_name(&mut self) -> ParseResult<()> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(0), Some('"' | '\'')) && STRING_PREFIXES.contains(&name.as_str()) {
            let lower = name.to_ascii_lowercase();
            let raw = lower.contains('r');
            let text = self.read_string(raw)?;
            let kind = if lower.contains('f') {
                TokenKind::FStr(text)
            } else {
                TokenKind::Str(text)
            };
            self.push(kind, line, column);
            return Ok(());
        }

        self.push(TokenKind::Name(name), line, column);
        Ok(())
    }

    fn read_number(&mut self) -> ParseResult<()> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        let mut is_float = false;

        while self
            .peek(0)
            .is_some_and(|c| c.is_ascii_digit() || c == '_')
        {
            self.advance();
        }
        if self.peek(0) == Some('.') && !self.peek(1).is_some_and(|c| c.is_alphabetic()) {
            is_float = true;
            self.advance();
            while self
                .peek(0)
                .is_some_and(|c| c.is_ascii_digit() || c == '_')
            {
                self.advance();
            }
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek(1), Some('+' | '-')));
            if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..=sign {
                    self.advance();
                }
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        if self.peek(0).is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.error(ParseErrorCode::InvalidNumber, "invalid decimal literal"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();
        let kind = if is_float {
            TokenKind::Float(text.parse().map_err(|_| {
                ParseError::new(ParseErrorCode::InvalidNumber, "invalid float literal", line, column)
            })?)
        } else {
            match text.parse::<i64>() {
                Ok(i) => TokenKind::Int(i),
                // too large for i64; keep the magnitude as a float
                Err(_) => TokenKind::Float(text.parse().map_err(|_| {
                    ParseError::new(ParseErrorCode::InvalidNumber, "invalid integer literal", line, column)
                })?),
            }
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn read_string(&mut self, raw: bool) -> ParseResult<String> {
        let (line, column) = (self.line, self.column);
        let quote = self.chars[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let quote_len = if triple { 3 } else { 1 };
        for _ in 0..quote_len {
            self.advance();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ParseError::new(
                    ParseErrorCode::UnterminatedString,
                    "unterminated string literal",
                    line,
                    column,
                ));
            };

            if c == quote
                && (!triple || (self.peek(1) == Some(quote) && self.peek(2) == Some(quote)))
            {
                for _ in 0..quote_len {
                    self.advance();
                }
                return Ok(out);
            }

            if c == '\n' && !triple {
                return Err(ParseError::new(
                    ParseErrorCode::UnterminatedString,
                    "unterminated string literal",
                    line,
                    column,
                ));
            }

            if c == '\\' {
                let next = self.peek(1);
                if raw {
                    out.push('\\');
                    self.advance();
                    if let Some(n) = next {
                        out.push(n);
                        self.advance();
                    }
                    continue;
                }
                self.advance();
                match next {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('\n') => {}
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => continue,
                }
                self.advance();
                continue;
            }

            out.push(c);
            self.advance();
        }
    }

    fn read_punct(&mut self) -> ParseResult<()> {
        let (line, column) = (self.line, self.column);
        let two: String = self.chars[self.pos..].iter().take(2).collect();

        if let Some(p) = PUNCT_TWO.iter().copied().find(|p| *p == two) {
            self.advance();
            self.advance();
            self.push(TokenKind::Punct(p), line, column);
            return Ok(());
        }

        let one = self.chars[self.pos].to_string();
        let found = PUNCT_ONE.iter().copied().find(|p| *p == one);
        let Some(p) = found else {
            return Err(self.error(
                ParseErrorCode::UnexpectedCharacter,
                format!("invalid character '{}'", one),
            ));
        };

        match p {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => {
                if self.depth == 0 {
                    return Err(self.error(
                        ParseErrorCode::UnbalancedBracket,
                        format!("unmatched '{}'", p),
                    ));
                }
                self.depth -= 1;
            }
            _ => {}
        }
        self.advance();
        self.push(TokenKind::Punct(p), line, column);
        Ok(())
    }
}

/// Tokenize `source`.
pub fn tokenize(source: &str) -> ParseResult<Vec<Token>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("result = 1.5"),
            vec![
                TokenKind::Name("result".into()),
                TokenKind::Punct("="),
                TokenKind::Float(1.5),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let toks = kinds("x = [1,\n 2]\ny = 3");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_comments_are_skipped() {
        let toks = kinds("# [REMOVED_DANGEROUS] import os\nresult = 1");
        assert_eq!(toks[0], TokenKind::Name("result".into()));
    }

    #[test]
    fn test_string_escapes_and_prefixes() {
        assert_eq!(kinds(r#"'a\'b'"#)[0], TokenKind::Str("a'b".into()));
        assert_eq!(kinds(r#"r'a\d'"#)[0], TokenKind::Str("a\\d".into()));
        assert_eq!(kinds(r#"f"{x}""#)[0], TokenKind::FStr("{x}".into()));
        assert_eq!(kinds("'''a\nb'''")[0], TokenKind::Str("a\nb".into()));
    }

    #[test]
    fn test_backticks_are_rejected() {
        let err = tokenize("```\nresult = 1").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnexpectedCharacter);
    }

    #[test]
    fn test_unexpected_indent() {
        let err = tokenize("x = 1\n    y = 2").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnexpectedIndent);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = tokenize("result = df[").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnbalancedBracket);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("result = 'abc").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnterminatedString);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
    }
}
