//! Recursive-descent parser for analysis snippets.
//!
//! A snippet is "syntactically well-formed" exactly when [`parse_program`]
//! accepts it. The grammar is a block-free subset of Python expressions and
//! assignments; anything needing indentation or user-defined functions is
//! rejected with [`ParseErrorCode::UnsupportedSyntax`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::{
    BinOp, BoolOp, CmpOp, Const, Expr, FStringPart, Program, Stmt, StmtKind, Target, UnaryOp,
};
use super::lexer::{tokenize, Token, TokenKind};

pub type ParseResult<T> = Result<T, ParseError>;

/// Stable parse error codes for deterministic diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorCode {
    UnexpectedCharacter,
    UnexpectedIndent,
    UnterminatedString,
    UnbalancedBracket,
    InvalidNumber,
    UnexpectedToken,
    InvalidTarget,
    UnsupportedSyntax,
}

/// Parse error with a one-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(
        code: ParseErrorCode,
        message: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} (line={}, column={})",
            self.code, self.message, self.line, self.column
        )
    }
}

impl std::error::Error for ParseError {}

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Parse a complete snippet.
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

/// Parse a single expression (used for f-string fields).
pub fn parse_expression(source: &str, line: usize) -> ParseResult<Expr> {
    let tokens = tokenize(source.trim()).map_err(|e| ParseError { line, ..e })?;
    let mut parser = Parser::new(tokens);
    let expr = parser.test()?;
    parser.skip_newlines();
    if !parser.at_eof() {
        return Err(parser.unexpected("end of f-string field"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind(), TokenKind::Punct(q) if *q == p)
    }

    fn is_name(&self, name: &str) -> bool {
        matches!(self.kind(), TokenKind::Name(n) if n == name)
    }

    fn peek_is_name(&self, offset: usize, name: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset).map(|t| &t.kind),
            Some(TokenKind::Name(n)) if n == name
        )
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.is_name(name) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> ParseResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match self.kind().clone() {
            TokenKind::Name(n) if !is_keyword(&n) => {
                self.bump();
                Ok(n)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.kind(), TokenKind::Newline) || self.is_punct(";") {
            self.bump();
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.current();
        let found = match &token.kind {
            TokenKind::Name(n) => format!("'{}'", n),
            TokenKind::Int(i) => format!("'{}'", i),
            TokenKind::Float(f) => format!("'{}'", f),
            TokenKind::Str(_) | TokenKind::FStr(_) => "string literal".to_string(),
            TokenKind::Punct(p) => format!("'{}'", p),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of snippet".to_string(),
        };
        ParseError::new(
            ParseErrorCode::UnexpectedToken,
            format!("invalid syntax: expected {}, found {}", expected, found),
            token.line,
            token.column,
        )
    }

    fn unsupported(&self, what: &str) -> ParseError {
        let token = self.current();
        ParseError::new(
            ParseErrorCode::UnsupportedSyntax,
            format!("{} not supported in analysis snippets", what),
            token.line,
            token.column,
        )
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn program(&mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            body.push(self.statement()?);
            if !(matches!(self.kind(), TokenKind::Newline | TokenKind::Eof) || self.is_punct(";"))
            {
                return Err(self.unexpected("end of statement"));
            }
            self.skip_newlines();
        }
        Ok(Program { body })
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let line = self.current().line;

        if let TokenKind::Name(name) = self.kind().clone() {
            match name.as_str() {
                "import" => return self.import_statement(line),
                "from" => return self.from_import_statement(line),
                "def" | "class" | "for" | "while" | "if" | "with" | "try" | "async" => {
                    return Err(self.unsupported(&format!("'{}' blocks are", name)))
                }
                "return" | "yield" | "del" | "global" | "nonlocal" | "pass" | "break"
                | "continue" | "raise" | "assert" | "lambda" | "elif" | "else" | "except"
                | "finally" => return Err(self.unsupported(&format!("'{}' is", name))),
                _ => {}
            }
        }

        let first = self.expression_list()?;

        if self.eat_punct("=") {
            let target = self.to_target(first)?;
            let value = self.expression_list()?;
            if self.is_punct("=") {
                return Err(self.unsupported("chained assignment is"));
            }
            return Ok(Stmt {
                kind: StmtKind::Assign { target, value },
                line,
            });
        }

        let aug = [
            ("+=", BinOp::Add),
            ("-=", BinOp::Sub),
            ("*=", BinOp::Mul),
            ("/=", BinOp::Div),
            ("%=", BinOp::Mod),
        ];
        for (punct, op) in aug {
            if self.eat_punct(punct) {
                let target = self.to_target(first)?;
                if matches!(target, Target::Unpack(_)) {
                    return Err(ParseError::new(
                        ParseErrorCode::InvalidTarget,
                        "illegal expression for augmented assignment",
                        line,
                        1,
                    ));
                }
                let value = self.expression_list()?;
                return Ok(Stmt {
                    kind: StmtKind::AugAssign { target, op, value },
                    line,
                });
            }
        }

        Ok(Stmt {
            kind: StmtKind::Expr(first),
            line,
        })
    }

    fn dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_identifier()?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    fn import_statement(&mut self, line: usize) -> ParseResult<Stmt> {
        self.bump();
        let module = self.dotted_name()?;
        if self.eat_name("as") {
            self.expect_identifier()?;
        }
        while self.eat_punct(",") {
            self.dotted_name()?;
            if self.eat_name("as") {
                self.expect_identifier()?;
            }
        }
        Ok(Stmt {
            kind: StmtKind::Import { module },
            line,
        })
    }

    fn from_import_statement(&mut self, line: usize) -> ParseResult<Stmt> {
        self.bump();
        let module = self.dotted_name()?;
        if !self.eat_name("import") {
            return Err(self.unexpected("'import'"));
        }
        if self.eat_punct("*") {
            return Ok(Stmt {
                kind: StmtKind::Import { module },
                line,
            });
        }
        let parenthesized = self.eat_punct("(");
        loop {
            self.expect_identifier()?;
            if self.eat_name("as") {
                self.expect_identifier()?;
            }
            if !self.eat_punct(",") {
                break;
            }
            if parenthesized && self.is_punct(")") {
                break;
            }
        }
        if parenthesized {
            self.expect_punct(")")?;
        }
        Ok(Stmt {
            kind: StmtKind::Import { module },
            line,
        })
    }

    fn to_target(&self, expr: Expr) -> ParseResult<Target> {
        match expr {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Subscript { object, index } => Ok(Target::Subscript { object, index }),
            Expr::Tuple(items) | Expr::List(items) => {
                let names = items
                    .into_iter()
                    .map(|item| match item {
                        Expr::Name(n) => Ok(n),
                        _ => Err(self.invalid_target()),
                    })
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(Target::Unpack(names))
            }
            _ => Err(self.invalid_target()),
        }
    }

    fn invalid_target(&self) -> ParseError {
        let token = self.current();
        ParseError::new(
            ParseErrorCode::InvalidTarget,
            "cannot assign to expression",
            token.line,
            token.column,
        )
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// `test (',' test)* [',']`, a bare tuple when commas are present.
    fn expression_list(&mut self) -> ParseResult<Expr> {
        let first = self.test()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.ends_expression_list() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn ends_expression_list(&self) -> bool {
        matches!(self.kind(), TokenKind::Newline | TokenKind::Eof)
            || self.is_punct("=")
            || self.is_punct(";")
            || self.is_punct(")")
    }

    fn test(&mut self) -> ParseResult<Expr> {
        if self.is_name("lambda") {
            return Err(self.unsupported("lambda expressions are"));
        }
        let body = self.or_test()?;
        if self.eat_name("if") {
            let test = self.or_test()?;
            if !self.eat_name("else") {
                return Err(self.unexpected("'else'"));
            }
            let orelse = self.test()?;
            return Ok(Expr::IfElse {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_test(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_name("or") {
            let right = self.and_test()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> ParseResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_name("and") {
            let right = self.not_test()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> ParseResult<Expr> {
        if self.eat_name("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.kind().clone() {
            TokenKind::Punct("==") => CmpOp::Eq,
            TokenKind::Punct("!=") => CmpOp::NotEq,
            TokenKind::Punct("<") => CmpOp::Lt,
            TokenKind::Punct("<=") => CmpOp::LtE,
            TokenKind::Punct(">") => CmpOp::Gt,
            TokenKind::Punct(">=") => CmpOp::GtE,
            TokenKind::Name(n) if n == "in" => CmpOp::In,
            TokenKind::Name(n) if n == "not" && self.peek_is_name(1, "in") => {
                self.bump();
                CmpOp::NotIn
            }
            TokenKind::Name(n) if n == "is" => {
                if self.peek_is_name(1, "not") {
                    self.bump();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.bump();
        Some(op)
    }

    /// Chained comparisons `a < b < c` become `(a < b) and (b < c)`.
    fn comparison(&mut self) -> ParseResult<Expr> {
        let first = self.bit_or()?;
        let mut links: Vec<(CmpOp, Expr)> = Vec::new();
        while let Some(op) = self.comparison_op() {
            links.push((op, self.bit_or()?));
        }
        if links.is_empty() {
            return Ok(first);
        }

        let mut left = first;
        let mut combined: Option<Expr> = None;
        for (op, right) in links {
            let cmp = Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right.clone()),
            };
            combined = Some(match combined {
                None => cmp,
                Some(prev) => Expr::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(prev),
                    right: Box::new(cmp),
                },
            });
            left = right;
        }
        Ok(combined.unwrap_or(left))
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat_punct(punct) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bit_or(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::arith)
    }

    fn arith(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Pos
        } else if self.eat_punct("~") {
            UnaryOp::Invert
        } else {
            return self.power();
        };
        let operand = self.factor()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;
        if self.eat_punct("**") {
            let exponent = self.factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_punct("(") {
                expr = self.call(expr)?;
            } else if self.eat_punct("[") {
                let index = self.subscript()?;
                self.expect_punct("]")?;
                expr = Expr::Subscript {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_punct(".") {
                let attr = match self.kind().clone() {
                    TokenKind::Name(n) => {
                        self.bump();
                        n
                    }
                    _ => return Err(self.unexpected("an attribute name")),
                };
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    attr,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, func: Expr) -> ParseResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.is_punct(")") {
            if self.is_punct("*") || self.is_punct("**") {
                return Err(self.unsupported("argument unpacking is"));
            }
            let is_keyword_arg = matches!(self.kind(), TokenKind::Name(n) if !is_keyword(n))
                && matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokenKind::Punct("="))
                );
            if is_keyword_arg {
                let name = self.expect_identifier()?;
                self.expect_punct("=")?;
                let value = self.test()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.unexpected("a keyword argument"));
                }
                let value = self.test()?;
                if self.is_name("for") {
                    return Err(self.unsupported("generator expressions are"));
                }
                args.push(value);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> ParseResult<Expr> {
        let first = self.slice_item()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.is_punct("]") {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> ParseResult<Expr> {
        let lower = if self.is_punct(":") {
            None
        } else {
            let expr = self.test()?;
            if !self.is_punct(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_punct(":")?;
        let upper = if self.is_punct(":") || self.is_punct("]") || self.is_punct(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_punct(":") && !(self.is_punct("]") || self.is_punct(",")) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Int(i) => {
                self.bump();
                Ok(Expr::Const(Const::Int(i)))
            }
            TokenKind::Float(f) => {
                self.bump();
                Ok(Expr::Const(Const::Float(f)))
            }
            TokenKind::Str(_) | TokenKind::FStr(_) => self.strings(),
            TokenKind::Name(name) => {
                self.bump();
                match name.as_str() {
                    "True" => Ok(Expr::Const(Const::Bool(true))),
                    "False" => Ok(Expr::Const(Const::Bool(false))),
                    "None" => Ok(Expr::Const(Const::None)),
                    n if is_keyword(n) => {
                        self.pos -= 1;
                        Err(self.unexpected("an expression"))
                    }
                    _ => Ok(Expr::Name(name)),
                }
            }
            TokenKind::Punct("(") => {
                self.bump();
                if self.eat_punct(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let inner = self.test()?;
                if self.is_name("for") {
                    return Err(self.unsupported("generator expressions are"));
                }
                if self.eat_punct(")") {
                    return Ok(inner);
                }
                let mut items = vec![inner];
                while self.eat_punct(",") {
                    if self.is_punct(")") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_punct(")")?;
                Ok(Expr::Tuple(items))
            }
            TokenKind::Punct("[") => {
                self.bump();
                let mut items = Vec::new();
                while !self.is_punct("]") {
                    items.push(self.test()?);
                    if self.is_name("for") {
                        return Err(self.unsupported("list comprehensions are"));
                    }
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::List(items))
            }
            TokenKind::Punct("{") => {
                self.bump();
                let mut items = Vec::new();
                while !self.is_punct("}") {
                    let key = self.test()?;
                    if self.is_name("for") {
                        return Err(self.unsupported("comprehensions are"));
                    }
                    if !self.eat_punct(":") {
                        return Err(self.unsupported("set literals are"));
                    }
                    let value = self.test()?;
                    items.push((key, value));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Dict(items))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run an f-string.
    fn strings(&mut self) -> ParseResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            let token = self.current().clone();
            match token.kind {
                TokenKind::Str(s) => {
                    self.bump();
                    parts.push(FStringPart::Literal(s));
                }
                TokenKind::FStr(s) => {
                    self.bump();
                    formatted = true;
                    parts.extend(parse_fstring(&s, token.line, token.column)?);
                }
                _ => break,
            }
        }

        if !formatted {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FStringPart::Literal(s) => s,
                    FStringPart::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Const(Const::Str(text)));
        }
        Ok(Expr::FString(parts))
    }
}

/// Split f-string text into literal runs and `{expr[:spec]}` fields.
fn parse_fstring(text: &str, line: usize, column: usize) -> ParseResult<Vec<FStringPart>> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                let mut depth = 0usize;
                let mut j = i + 1;
                let mut split = None;
                while j < chars.len() {
                    match chars[j] {
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' => depth = depth.saturating_sub(1),
                        '}' if depth == 0 => break,
                        '}' => depth -= 1,
                        ':' if depth == 0 && split.is_none() => split = Some(j),
                        _ => {}
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ParseError::new(
                        ParseErrorCode::UnexpectedToken,
                        "f-string: expecting '}'",
                        line,
                        column,
                    ));
                }
                let end_expr = split.unwrap_or(j);
                let source: String = chars[i + 1..end_expr].iter().collect();
                let spec = split.map(|s| chars[s + 1..j].iter().collect::<String>());
                if source.trim().is_empty() {
                    return Err(ParseError::new(
                        ParseErrorCode::UnexpectedToken,
                        "f-string: empty expression not allowed",
                        line,
                        column,
                    ));
                }
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let expr = parse_expression(&source, line)?;
                parts.push(FStringPart::Field { expr, spec });
                i = j + 1;
            }
            '}' => {
                return Err(ParseError::new(
                    ParseErrorCode::UnexpectedToken,
                    "f-string: single '}' is not allowed",
                    line,
                    column,
                ))
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse_program(source).unwrap_or_else(|e| panic!("{source:?} failed: {e}"))
    }

    #[test]
    fn test_assignment_and_call_chain() {
        let program = parse_ok("result = df['src'].value_counts().head(5)");
        assert_eq!(program.body.len(), 1);
        assert!(program.binds("result"));
    }

    #[test]
    fn test_boolean_mask_filter() {
        parse_ok("result = df[(df['Bytes_int'] > 100) & (df['attackType'] != 'normal')]");
    }

    #[test]
    fn test_keyword_arguments_and_slices() {
        parse_ok("top = df.sort_values('Bytes_int', ascending=False)[:10]\nresult = top.iloc[0:3, 1]");
    }

    #[test]
    fn test_multiple_statements() {
        let program = parse_ok("x = 1; y = 2\n\n# comment\nresult = x + y\n");
        assert_eq!(program.body.len(), 3);
        assert_eq!(program.body[2].line, 4);
    }

    #[test]
    fn test_imports_parse_as_statements() {
        let program = parse_ok("import numpy as np\nfrom os import path\nresult = 1");
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Import { module } if module == "numpy"
        ));
    }

    #[test]
    fn test_blocks_are_unsupported() {
        let err = parse_program("def f(): return 1").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnsupportedSyntax);
        let err = parse_program("for x in df: pass").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnsupportedSyntax);
    }

    #[test]
    fn test_comprehensions_are_unsupported() {
        let err = parse_program("result = [x for x in range(3)]").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnsupportedSyntax);
    }

    #[test]
    fn test_incomplete_assignment_is_rejected() {
        assert!(parse_program("data = ").is_err());
        assert!(parse_program("result = df.head(").is_err());
        assert!(parse_program("Here is the answer you asked for").is_err());
    }

    #[test]
    fn test_invalid_target() {
        let err = parse_program("len(df) = 3").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::InvalidTarget);
    }

    #[test]
    fn test_fstring_fields() {
        let program = parse_ok("result = f'{len(df)} rows, {df.shape[1]:.2f} cols'");
        let StmtKind::Assign { value: Expr::FString(parts), .. } = &program.body[0].kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 4);
    }

    #[test]
    fn test_chained_comparison_desugars() {
        let program = parse_ok("result = 1 < 2 < 3");
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Assign { value: Expr::BoolOp { op: BoolOp::And, .. }, .. }
        ));
    }

    #[test]
    fn test_conditional_expression_and_unpacking() {
        parse_ok("a, b = 1, 2\nresult = a if a > b else b");
    }

    #[test]
    fn test_empty_source_is_valid() {
        assert!(parse_ok("").body.is_empty());
        assert!(parse_ok("\n  \n# only a comment\n").body.is_empty());
    }
}
