//! Tree-walking evaluator for parsed snippets.
//!
//! Names resolve through three scopes: snippet locals, the fixed globals
//! (`df`, `pd`, `np`) and the builtin allow-list. Assignments always land in
//! locals, so the caller reads the result binding from [`Interpreter::local`]
//! once [`Interpreter::run`] returns.

use std::collections::BTreeMap;

use tracing::trace;

use super::ast::{BoolOp, Const, Expr, FStringPart, Program, Stmt, StmtKind, Target};
use super::builtins::{self, Args};
use super::error::{Budget, ExecError, ExecResult};
use super::indexing;
use super::methods;
use super::ops;
use super::value::{IndexerKind, Module, Value};
use crate::dataset::Dataset;

/// Name of the dataset handle inside a snippet.
pub const DATASET_NAME: &str = "df";

pub struct Interpreter {
    globals: BTreeMap<String, Value>,
    locals: BTreeMap<String, Value>,
    budget: Budget,
}

impl Interpreter {
    /// Interpreter whose `df` is `dataset`. The dataset is moved in, so the
    /// caller decides what copy the snippet gets to see.
    pub fn new(dataset: Dataset, budget: Budget) -> Self {
        let mut globals = BTreeMap::new();
        globals.insert(DATASET_NAME.to_string(), Value::frame(dataset));
        globals.insert("pd".to_string(), Value::Module(Module::Pandas));
        globals.insert("np".to_string(), Value::Module(Module::Numpy));
        Self {
            globals,
            locals: BTreeMap::new(),
            budget,
        }
    }

    /// Execute every statement in order, stopping at the first error.
    pub fn run(&mut self, program: &Program) -> ExecResult<()> {
        for stmt in &program.body {
            self.exec(stmt).map_err(|e| e.at_line(stmt.line))?;
        }
        Ok(())
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    pub fn into_locals(self) -> BTreeMap<String, Value> {
        self.locals
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    fn exec(&mut self, stmt: &Stmt) -> ExecResult<()> {
        self.budget.tick(1)?;
        trace!(line = stmt.line, "exec statement");
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = match target {
                    Target::Name(name) => self.lookup(name)?,
                    Target::Subscript { object, index } => {
                        let container = self.eval(object)?;
                        let key = self.eval(index)?;
                        indexing::subscript(&container, &key, &mut self.budget)?
                    }
                    Target::Unpack(_) => {
                        return Err(ExecError::type_error(
                            "illegal expression for augmented assignment",
                        ))
                    }
                };
                let operand = self.eval(value)?;
                let updated = ops::binary(*op, &current, &operand, &mut self.budget)?;
                self.assign(target, updated)
            }
            StmtKind::Expr(expr) => self.eval(expr).map(drop),
            StmtKind::Import { module } => Err(ExecError::import(format!(
                "import of '{}' is not allowed in the sandbox",
                module
            ))),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> ExecResult<()> {
        match target {
            Target::Name(name) => {
                self.locals.insert(name.clone(), value);
                Ok(())
            }
            Target::Unpack(names) => {
                let items = value.iterate()?;
                if items.len() != names.len() {
                    return Err(ExecError::value(if items.len() < names.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            names.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", names.len())
                    }));
                }
                for (name, item) in names.iter().zip(items) {
                    self.locals.insert(name.clone(), item);
                }
                Ok(())
            }
            Target::Subscript { object, index } => {
                let key = self.eval(index)?;
                match object.as_ref() {
                    Expr::Name(name) => {
                        let (slot, budget) = self.slot(name)?;
                        indexing::assign_item(slot, key, value, budget)
                    }
                    Expr::Attribute { object: inner, attr } if attr == "loc" || attr == "iloc" => {
                        let Expr::Name(name) = inner.as_ref() else {
                            return Err(ExecError::type_error(
                                "located assignment needs a named frame",
                            ));
                        };
                        let kind = if attr == "loc" {
                            IndexerKind::Loc
                        } else {
                            IndexerKind::Iloc
                        };
                        let (slot, budget) = self.slot(name)?;
                        indexing::assign_located(slot, kind, &key, value, budget)
                    }
                    _ => Err(ExecError::type_error(
                        "item assignment is only supported on named variables",
                    )),
                }
            }
        }
    }

    /// Split borrow of the local binding for `name` and the budget, copying
    /// a global into locals first.
    fn slot(&mut self, name: &str) -> ExecResult<(&mut Value, &mut Budget)> {
        if !self.locals.contains_key(name) {
            let value = self.lookup(name)?;
            self.locals.insert(name.to_string(), value);
        }
        let value = self
            .locals
            .get_mut(name)
            .ok_or_else(|| ExecError::name(format!("name '{}' is not defined", name)))?;
        Ok((value, &mut self.budget))
    }

    fn lookup(&self, name: &str) -> ExecResult<Value> {
        self.locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .or_else(|| builtins::lookup_builtin(name))
            .ok_or_else(|| ExecError::name(format!("name '{}' is not defined", name)))
    }

    fn eval(&mut self, expr: &Expr) -> ExecResult<Value> {
        self.budget.tick(1)?;
        match expr {
            Expr::Const(c) => Ok(match c {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::Str(s.clone()),
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field { expr, spec } => {
                            let value = self.eval(expr)?;
                            out.push_str(&ops::format_value(&value, spec.as_deref().unwrap_or(""))?);
                        }
                    }
                }
                self.budget.check_len(out.len())?;
                Ok(Value::Str(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                self.budget.check_len(pairs.len())?;
                let mut entries: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    match entries.iter_mut().find(|(e, _)| ops::values_equal(e, &key)) {
                        Some(slot) => slot.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Ok(Value::Dict(entries))
            }
            Expr::Attribute { object, attr } => {
                let object = self.eval(object)?;
                methods::get_attribute(&object, attr)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let key = self.eval(index)?;
                indexing::subscript(&object, &key, &mut self.budget)
            }
            Expr::Slice { lower, upper, step } => Ok(Value::Slice(
                self.slice_bound(lower.as_deref())?,
                self.slice_bound(upper.as_deref())?,
                self.slice_bound(step.as_deref())?,
            )),
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand, &mut self.budget)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right, &mut self.budget)
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::compare(*op, &left, &right, &mut self.budget)
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !left.truthy()?,
                    BoolOp::Or => left.truthy()?,
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> ExecResult<Vec<Value>> {
        self.budget.check_len(exprs.len())?;
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> ExecResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            Value::Int(i) => Ok(Some(i)),
            Value::Bool(b) => Ok(Some(i64::from(b))),
            other => Err(ExecError::type_error(format!(
                "slice indices must be integers or None, not {}",
                other.type_name()
            ))),
        }
    }

    fn call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> ExecResult<Value> {
        let Expr::Attribute { object, attr } = func else {
            let callee = self.eval(func)?;
            let call_args = self.bind_args(&callee, args, kwargs)?;
            return self.call_value(callee, call_args);
        };

        let receiver = self.eval(object)?;
        let callee = methods::get_attribute(&receiver, attr)?;
        let Value::Method(bound, name) = callee else {
            let call_args = self.bind_args(&callee, args, kwargs)?;
            return self.call_value(callee, call_args);
        };

        let positional = self.eval_all(args)?;
        let mut keywords = Vec::with_capacity(kwargs.len());
        let mut inplace = false;
        for (key, expr) in kwargs {
            let value = self.eval(expr)?;
            if key == "inplace" {
                inplace = value.truthy()?;
            } else {
                keywords.push((key.clone(), value));
            }
        }
        let call_args = Args::new(name.clone(), positional, keywords);

        if methods::mutates_receiver(&bound, &name) {
            if let Expr::Name(var) = object.as_ref() {
                let (slot, budget) = self.slot(var)?;
                return methods::call_mutating(slot, &name, call_args, budget);
            }
        }

        let result = methods::call_method(*bound, &name, call_args, &mut self.budget)?;
        if !inplace {
            return Ok(result);
        }
        let Expr::Name(var) = object.as_ref() else {
            return Err(ExecError::value(format!(
                "{}(inplace=True) needs a named receiver",
                name
            )));
        };
        self.locals.insert(var.clone(), result);
        Ok(Value::None)
    }

    fn bind_args(&mut self, callee: &Value, args: &[Expr], kwargs: &[(String, Expr)]) -> ExecResult<Args> {
        let positional = self.eval_all(args)?;
        let mut keywords = Vec::with_capacity(kwargs.len());
        for (key, expr) in kwargs {
            keywords.push((key.clone(), self.eval(expr)?));
        }
        let label = match callee {
            Value::Function(name) => name.rsplit('.').next().unwrap_or(name).to_string(),
            other => other.type_name().to_string(),
        };
        Ok(Args::new(label, positional, keywords))
    }

    fn call_value(&mut self, callee: Value, args: Args) -> ExecResult<Value> {
        match callee {
            Value::Function(name) => builtins::call_function(name, args, &mut self.budget),
            Value::Method(receiver, name) => {
                methods::call_method(*receiver, &name, args, &mut self.budget)
            }
            other => Err(ExecError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Cell;
    use crate::script::error::ExecErrorKind;
    use crate::script::parser::parse_program;

    fn flows() -> Dataset {
        Dataset::from_json_str(
            r#"[
                {"src": "10.0.0.1", "dst": "10.0.0.9", "Bytes_int": 100, "Attack_type": "normal"},
                {"src": "10.0.0.2", "dst": "10.0.0.9", "Bytes_int": 250, "Attack_type": "DoS"},
                {"src": "10.0.0.1", "dst": "10.0.0.8", "Bytes_int": 50, "Attack_type": "DoS"}
            ]"#,
        )
        .unwrap()
    }

    fn run(source: &str) -> ExecResult<Interpreter> {
        let program = parse_program(source).unwrap();
        let mut interp = Interpreter::new(flows(), Budget::new(100_000, 10_000));
        interp.run(&program)?;
        Ok(interp)
    }

    fn result(source: &str) -> Value {
        run(source).unwrap().local("result").cloned().unwrap()
    }

    #[test]
    fn test_arithmetic_and_names() {
        assert_eq!(result("x = 2\nresult = x * 3 + 1"), Value::Int(7));
        assert_eq!(result("a, b = 1, 2\nresult = b - a"), Value::Int(1));
    }

    #[test]
    fn test_undefined_name_reports_line() {
        let err = run("x = 1\nresult = y + 1").err().unwrap();
        assert_eq!(err.kind, ExecErrorKind::NameError);
        assert_eq!(err.line, Some(2));
        assert_eq!(err.message, "name 'y' is not defined");
    }

    #[test]
    fn test_import_is_refused() {
        let err = run("import os").err().unwrap();
        assert_eq!(err.kind, ExecErrorKind::ImportError);
    }

    #[test]
    fn test_builtins_outside_allow_list_are_undefined() {
        let err = run("result = open('/etc/passwd')").err().unwrap();
        assert_eq!(err.kind, ExecErrorKind::NameError);
        let err = run("result = eval('1')").err().unwrap();
        assert_eq!(err.kind, ExecErrorKind::NameError);
    }

    #[test]
    fn test_filter_and_sum() {
        let value = result("result = df[df['Attack_type'] != 'normal']['Bytes_int'].sum()");
        assert_eq!(value, Value::Int(300));
    }

    #[test]
    fn test_groupby_chain() {
        let Value::Series(counts) = result("result = df.groupby('src').size().sort_values(ascending=False)") else {
            panic!("expected series");
        };
        assert_eq!(counts.index[0], Cell::Text("10.0.0.1".into()));
        assert_eq!(counts.values[0], Cell::Int(2));
    }

    #[test]
    fn test_column_assignment_stays_local() {
        let interp = run("df['kb'] = df['Bytes_int'] / 1000\nresult = df['kb'].max()").unwrap();
        assert_eq!(interp.local("result"), Some(&Value::Float(0.25)));
        let Some(Value::Frame(global)) = interp.globals.get(DATASET_NAME) else {
            panic!("df global missing");
        };
        assert!(!global.has_column("kb"));
    }

    #[test]
    fn test_list_mutation_and_inplace() {
        assert_eq!(
            result("xs = [3, 1]\nxs.append(2)\nxs.sort()\nresult = xs"),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        let Value::Frame(frame) = result("df.sort_values('Bytes_int', inplace=True)\nresult = df") else {
            panic!("expected frame");
        };
        assert_eq!(frame.get(0, "Bytes_int"), Some(&Cell::Int(50)));
    }

    #[test]
    fn test_fstring_and_conditional() {
        assert_eq!(
            result("n = len(df)\nresult = f'{n} flows' if n > 1 else 'one'"),
            Value::Str("3 flows".into())
        );
    }

    #[test]
    fn test_step_budget_is_enforced() {
        let program = parse_program("result = sorted(range(5000))").unwrap();
        let mut interp = Interpreter::new(flows(), Budget::new(100, 10_000));
        let err = interp.run(&program).err().unwrap();
        assert_eq!(err.kind, ExecErrorKind::ResourceLimit);
    }

    #[test]
    fn test_loc_assignment() {
        let Value::Frame(frame) = result("df.loc[df['src'] == '10.0.0.2', 'Attack_type'] = 'ddos'\nresult = df") else {
            panic!("expected frame");
        };
        assert_eq!(frame.get(1, "Attack_type"), Some(&Cell::Text("ddos".into())));
    }
}
