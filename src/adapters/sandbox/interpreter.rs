//! Tree-walking evaluator for listener scripts.
//!
//! Values are plain JSON. The only callable things are the builtins in
//! [`call_builtin`]; none of them touch the filesystem, network or processes.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::parser::{BinaryOp, Expr, PathSegment, Program, Stmt, UnaryOp};
use super::ScriptError;

/// Names of the builtins available to scripts.
pub const BUILTINS: &[&str] = &[
    "abs", "bool", "contains", "float", "get", "int", "keys", "len", "lower", "max", "min", "now", "round",
    "str", "trim", "upper",
];

pub struct Interpreter {
    scope: HashMap<String, Value>,
    steps: usize,
    max_steps: usize,
}

impl Interpreter {
    pub fn new(scope: HashMap<String, Value>, max_steps: usize) -> Self {
        Self {
            scope,
            steps: 0,
            max_steps,
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), ScriptError> {
        self.exec_block(&program.statements)
    }

    pub fn into_scope(self) -> HashMap<String, Value> {
        self.scope
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ScriptError::BudgetExceeded(self.max_steps));
        }
        Ok(())
    }

    fn exec_block(&mut self, statements: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in statements {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval(value)?;
                self.scope.insert(name.clone(), value);
            }
            Stmt::Assign { name, path, value } => {
                let value = self.eval(value)?;
                if path.is_empty() {
                    self.scope.insert(name.clone(), value);
                } else {
                    let keys = path
                        .iter()
                        .map(|segment| match segment {
                            PathSegment::Field(f) => Ok(Key::Field(f.clone())),
                            PathSegment::Index(expr) => Key::from_value(self.eval(expr)?),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    let root = self.scope.entry(name.clone()).or_insert(Value::Null);
                    assign_path(root, &keys, value)?;
                }
            }
            Stmt::If { branches, otherwise } => {
                for (cond, body) in branches {
                    if truthy(&self.eval(cond)?) {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    self.exec_block(body)?;
                }
            }
        }
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptError::UnknownVariable(name.clone())),
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Member { target, name } => {
                let target = self.eval(target)?;
                Ok(member(&target, name))
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(index_value(&target, &index))
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                call_builtin(name, &args)
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => match as_number(&value) {
                        Some(Num::Int(i)) => Ok(Value::from(i.checked_neg().unwrap_or(i64::MAX))),
                        Some(Num::Float(f)) => Ok(float(-f)),
                        None => Err(type_error("negate", &value)),
                    },
                }
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right),
            Expr::Conditional { cond, then, otherwise } => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<Value, ScriptError> {
        // Short-circuiting operators evaluate the right side lazily.
        match op {
            BinaryOp::And => {
                let l = self.eval(left)?;
                return Ok(Value::Bool(truthy(&l) && truthy(&self.eval(right)?)));
            }
            BinaryOp::Or => {
                let l = self.eval(left)?;
                return Ok(Value::Bool(truthy(&l) || truthy(&self.eval(right)?)));
            }
            BinaryOp::Coalesce => {
                let l = self.eval(left)?;
                return if l.is_null() { self.eval(right) } else { Ok(l) };
            }
            _ => {}
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
            BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
            BinaryOp::Lt => compare(&l, &r).map(|o| Value::Bool(o == Ordering::Less)),
            BinaryOp::Le => compare(&l, &r).map(|o| Value::Bool(o != Ordering::Greater)),
            BinaryOp::Gt => compare(&l, &r).map(|o| Value::Bool(o == Ordering::Greater)),
            BinaryOp::Ge => compare(&l, &r).map(|o| Value::Bool(o != Ordering::Less)),
            BinaryOp::Add => add(l, r),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, &l, &r),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => Ok(Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

fn as_number(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => n.as_i64().map(Num::Int).or_else(|| n.as_f64().map(Num::Float)),
        _ => None,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(operation: &str, value: &Value) -> ScriptError {
    ScriptError::Type(format!("cannot {operation} a {}", type_name(value)))
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => (a.as_f64() - b.as_f64()).abs() < f64::EPSILON,
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Result<Ordering, ScriptError> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (as_number(l), as_number(r)) {
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| ScriptError::Type("cannot compare NaN".to_string())),
            _ => Err(ScriptError::Type(format!(
                "cannot compare {} with {}",
                type_name(l),
                type_name(r)
            ))),
        },
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn add(l: Value, r: Value) -> Result<Value, ScriptError> {
    match (l, r) {
        (Value::String(a), b) => Ok(Value::String(a + &display(&b))),
        (a, Value::String(b)) => Ok(Value::String(display(&a) + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Ok(Value::Object(a))
        }
        (a, b) => arithmetic(BinaryOp::Add, &a, &b),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ScriptError> {
    let (Some(a), Some(b)) = (as_number(l), as_number(r)) else {
        let culprit = if as_number(l).is_none() { l } else { r };
        return Err(type_error("do arithmetic on", culprit));
    };

    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let checked = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Rem if y != 0 => x.checked_rem(y),
            _ => None,
        };
        if let Some(v) = checked {
            return Ok(Value::from(v));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && y == 0.0 {
        return Err(ScriptError::Type("division by zero".to_string()));
    }
    Ok(float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        _ => x % y,
    }))
}

fn member(target: &Value, name: &str) -> Value {
    match target {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index_value(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| {
                let len = i64::try_from(items.len()).ok()?;
                let i = if i < 0 { len + i } else { i };
                usize::try_from(i).ok()
            })
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        (_, Value::String(key)) => member(target, key),
        _ => Value::Null,
    }
}

enum Key {
    Field(String),
    Index(usize),
}

impl Key {
    fn from_value(value: Value) -> Result<Self, ScriptError> {
        match value {
            Value::String(s) => Ok(Self::Field(s)),
            Value::Number(n) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .map(Self::Index)
                .ok_or_else(|| ScriptError::Type(format!("invalid index {n}"))),
            other => Err(type_error("index with", &other)),
        }
    }
}

/// Write `value` at `keys` below `root`, creating objects for null links.
fn assign_path(root: &mut Value, keys: &[Key], value: Value) -> Result<(), ScriptError> {
    let Some((first, rest)) = keys.split_first() else {
        *root = value;
        return Ok(());
    };

    if root.is_null() {
        *root = Value::Object(Map::new());
    }

    let slot = match (first, root) {
        (Key::Field(f), Value::Object(map)) => map.entry(f.clone()).or_insert(Value::Null),
        (Key::Index(i), Value::Array(items)) => {
            let len = items.len();
            items
                .get_mut(*i)
                .ok_or_else(|| ScriptError::Type(format!("index {i} out of bounds for array of {len}")))?
        }
        (_, other) => return Err(type_error("assign into", other)),
    };
    assign_path(slot, rest, value)
}

fn get_path(value: &Value, path: &str) -> Value {
    path.split('.')
        .filter(|seg| !seg.is_empty())
        .fold(value.clone(), |acc, seg| member(&acc, seg))
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    if args.len() < min || args.len() > max {
        return Err(ScriptError::Arity {
            function: name.to_string(),
            expected: if min == max {
                min.to_string()
            } else {
                format!("{min}..={max}")
            },
            found: args.len(),
        });
    }
    Ok(())
}

fn string_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, ScriptError> {
    value
        .as_str()
        .ok_or_else(|| ScriptError::Type(format!("{name}() expects a string, got {}", type_name(value))))
}

fn extreme(name: &str, args: &[Value], want: Ordering) -> Result<Value, ScriptError> {
    let items: Vec<Value> = match args {
        [Value::Array(items)] => items.clone(),
        _ => args.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => {
                if compare(&item, &current)? == want {
                    item
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| ScriptError::Arity {
        function: name.to_string(),
        expected: "at least 1".to_string(),
        found: 0,
    })
}

pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match name {
        "len" => {
            arity(name, args, 1, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(type_error("take len of", other)),
            };
            Ok(Value::from(n))
        }
        "str" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(display(&args[0])))
        }
        "int" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Bool(b) => Ok(Value::from(i64::from(*b))),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| ScriptError::Type(format!("int() cannot parse '{s}'"))),
                other => match as_number(other) {
                    Some(Num::Int(i)) => Ok(Value::from(i)),
                    #[allow(clippy::cast_possible_truncation)]
                    Some(Num::Float(f)) => Ok(Value::from(f.trunc() as i64)),
                    None => Err(type_error("convert to int", other)),
                },
            }
        }
        "float" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(float)
                    .map_err(|_| ScriptError::Type(format!("float() cannot parse '{s}'"))),
                other => as_number(other)
                    .map(|n| float(n.as_f64()))
                    .ok_or_else(|| type_error("convert to float", other)),
            }
        }
        "bool" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            match as_number(&args[0]) {
                Some(Num::Int(i)) => Ok(Value::from(i.checked_abs().unwrap_or(i64::MAX))),
                Some(Num::Float(f)) => Ok(float(f.abs())),
                None => Err(type_error("take abs of", &args[0])),
            }
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let n = as_number(&args[0]).ok_or_else(|| type_error("round", &args[0]))?;
            let digits = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            if digits == 0 {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(Value::from(n.as_f64().round() as i64));
            }
            let factor = 10f64.powi(i32::try_from(digits).unwrap_or(0));
            Ok(float((n.as_f64() * factor).round() / factor))
        }
        "min" => extreme(name, args, Ordering::Less),
        "max" => extreme(name, args, Ordering::Greater),
        "lower" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.to_lowercase()))
        }
        "upper" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.to_uppercase()))
        }
        "trim" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(string_arg(name, &args[0])?.trim().to_string()))
        }
        "contains" => {
            arity(name, args, 2, 2)?;
            let found = match (&args[0], &args[1]) {
                (Value::String(hay), needle) => hay.contains(display(needle).as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| loose_eq(item, needle)),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                (Value::Null, _) => false,
                (other, _) => return Err(type_error("search in", other)),
            };
            Ok(Value::Bool(found))
        }
        "keys" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
                Value::Null => Ok(Value::Array(Vec::new())),
                other => Err(type_error("list keys of", other)),
            }
        }
        "get" => {
            arity(name, args, 2, 3)?;
            let path = string_arg(name, &args[1])?;
            let found = get_path(&args[0], path);
            Ok(if found.is_null() {
                args.get(2).cloned().unwrap_or(Value::Null)
            } else {
                found
            })
        }
        "now" => {
            arity(name, args, 0, 0)?;
            Ok(Value::String(chrono::Utc::now().to_rfc3339()))
        }
        other => Err(ScriptError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sandbox::parser::parse;
    use serde_json::json;

    fn run(source: &str) -> Result<HashMap<String, Value>, ScriptError> {
        let program = parse(source)?;
        let mut scope = HashMap::new();
        scope.insert("context".to_string(), json!({"tasks": {"002": {"status": "Done", "n": 4}}}));
        let mut interp = Interpreter::new(scope, 1_000);
        interp.run(&program)?;
        Ok(interp.into_scope())
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let scope = run("a = 1 + 2 * 3; b = 7 / 2; c = 'n=' + a; d = 7 % 3").unwrap();
        assert_eq!(scope["a"], json!(7));
        assert_eq!(scope["b"], json!(3.5));
        assert_eq!(scope["c"], json!("n=7"));
        assert_eq!(scope["d"], json!(1));
    }

    #[test]
    fn test_member_access_and_coalesce() {
        let scope = run(
            "s = context.tasks.002.status; m = context.tasks.003.status ?? 'missing'; n = context.tasks['002'].n",
        )
        .unwrap();
        assert_eq!(scope["s"], json!("Done"));
        assert_eq!(scope["m"], json!("missing"));
        assert_eq!(scope["n"], json!(4));
    }

    #[test]
    fn test_nested_assignment_creates_objects() {
        let scope = run("result = {}; result.context.emp_id = 'E7'; result['success'] = true").unwrap();
        assert_eq!(scope["result"], json!({"context": {"emp_id": "E7"}, "success": true}));
    }

    #[test]
    fn test_conditionals() {
        let scope = run("if context.tasks.002.n > 3 { x = 'big' } else { x = 'small' } y = x == 'big' ? 1 : 0").unwrap();
        assert_eq!(scope["x"], json!("big"));
        assert_eq!(scope["y"], json!(1));
    }

    #[test]
    fn test_builtins() {
        let scope = run(
            "a = len([1,2,3]); b = upper('x'); c = contains([1, 2], 2.0); d = max(3, 9, 4); e = get(context, 'tasks.002.n', 0); f = int('42'); g = round(2.346, 2)",
        )
        .unwrap();
        assert_eq!(scope["a"], json!(3));
        assert_eq!(scope["b"], json!("X"));
        assert_eq!(scope["c"], json!(true));
        assert_eq!(scope["d"], json!(9));
        assert_eq!(scope["e"], json!(4));
        assert_eq!(scope["f"], json!(42));
        assert_eq!(scope["g"], json!(2.35));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(run("x = y"), Err(ScriptError::UnknownVariable(_))));
        assert!(matches!(run("x = open('/etc/passwd')"), Err(ScriptError::UnknownFunction(_))));
        assert!(matches!(run("x = 1 / 0"), Err(ScriptError::Type(_))));
        assert!(matches!(run("x = [] < 1"), Err(ScriptError::Type(_))));
        assert!(matches!(run("x = len()"), Err(ScriptError::Arity { .. })));
    }

    #[test]
    fn test_step_budget() {
        let source = (0..600).map(|i| format!("x{i} = {i};")).collect::<String>();
        assert!(matches!(run(&source), Err(ScriptError::BudgetExceeded(1_000))));
    }
}
