//! Deterministic policy expressions.
//!
//! The grammar admits integer arithmetic, comparisons, boolean logic,
//! string equality/containment against fixed literals, bounded list
//! membership, and a small call surface. Floats parse but never validate
//! or evaluate; the profile validator (`profile.rs`) rejects them together
//! with every nondeterministic construct before a rule set is loaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use helm_core::sha256_hex;

// ── Error codes ──────────────────────────────────────────────────────────────

pub const CEL_TYPE_ERROR: &str = "CEL_TYPE_ERROR";
pub const CEL_DIV_ZERO: &str = "CEL_DIV_ZERO";
pub const CEL_OVERFLOW: &str = "CEL_OVERFLOW";
pub const CEL_UNDEFINED: &str = "CEL_UNDEFINED";
pub const CEL_INVALID_ARG: &str = "CEL_INVALID_ARG";
pub const CEL_INTERNAL: &str = "CEL_INTERNAL";

/// Evaluation failure with a fixed code and a hash of the lowercased,
/// whitespace-collapsed message. The raw message never leaves the engine,
/// so error surfaces stay byte-stable across library versions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalError {
    pub code: &'static str,
    pub message_hash: String,
}

impl EvalError {
    pub fn new(code: &'static str, message: &str) -> Self {
        let collapsed = message
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            code,
            message_hash: sha256_hex(collapsed.as_bytes()),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, &self.message_hash[..16])
    }
}

// ── AST ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    /// String containment: `left contains right` with a literal right side.
    Contains,
    /// List membership: `left in right` with a literal list right side.
    In,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i64),
    /// Admitted by the grammar, banned by the profile.
    Float(f64),
    Str(String),
    Bool(bool),
    /// Context variable lookup.
    Var(String),
    List(Vec<Expr>),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Float(x) => write!(f, "{x}"),
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "!({expr})"),
                UnaryOp::Neg => write!(f, "-({expr})"),
            },
            Expr::Binary { op, left, right } => {
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::And => "&&",
                    BinOp::Or => "||",
                    BinOp::Contains => "contains",
                    BinOp::In => "in",
                };
                write!(f, "({left} {sym} {right})")
            }
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ── Evaluation ───────────────────────────────────────────────────────────────

/// Calls the evaluator accepts. Everything else is rejected by the profile
/// before load and refused here as a second line of defense.
pub(crate) const ALLOWED_CALLS: &[&str] = &["size"];

/// Evaluate against a context of JSON values. Deterministic by
/// construction: no clock, no randomness, no I/O.
pub fn eval(expr: &Expr, context: &BTreeMap<String, Value>) -> Result<Value, EvalError> {
    match expr {
        Expr::Int(n) => Ok(Value::from(*n)),
        Expr::Float(_) => Err(EvalError::new(CEL_TYPE_ERROR, "floating point is outside the deterministic profile")),
        Expr::Str(s) => Ok(Value::from(s.clone())),
        Expr::Bool(b) => Ok(Value::from(*b)),
        Expr::Var(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::new(CEL_UNDEFINED, &format!("undefined variable {name}"))),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, context)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Unary { op, expr } => {
            let v = eval(expr, context)?;
            match op {
                UnaryOp::Not => v
                    .as_bool()
                    .map(|b| Value::from(!b))
                    .ok_or_else(|| EvalError::new(CEL_TYPE_ERROR, "! requires a boolean")),
                UnaryOp::Neg => v
                    .as_i64()
                    .and_then(i64::checked_neg)
                    .map(Value::from)
                    .ok_or_else(|| EvalError::new(CEL_TYPE_ERROR, "- requires an integer")),
            }
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, context),
        Expr::Call { name, args } => match name.as_str() {
            "size" => {
                if args.len() != 1 {
                    return Err(EvalError::new(CEL_INVALID_ARG, "size takes one argument"));
                }
                match eval(&args[0], context)? {
                    Value::String(s) => Ok(Value::from(s.len() as i64)),
                    Value::Array(a) => Ok(Value::from(a.len() as i64)),
                    _ => Err(EvalError::new(CEL_TYPE_ERROR, "size requires a string or list")),
                }
            }
            other => Err(EvalError::new(
                CEL_INVALID_ARG,
                &format!("call {other} is outside the deterministic profile"),
            )),
        },
    }
}

/// Evaluate an expression expected to produce a boolean.
pub fn eval_bool(expr: &Expr, context: &BTreeMap<String, Value>) -> Result<bool, EvalError> {
    eval(expr, context)?
        .as_bool()
        .ok_or_else(|| EvalError::new(CEL_TYPE_ERROR, "condition must evaluate to a boolean"))
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    context: &BTreeMap<String, Value>,
) -> Result<Value, EvalError> {
    // Short-circuit logic first.
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = eval(left, context)?
            .as_bool()
            .ok_or_else(|| EvalError::new(CEL_TYPE_ERROR, "logic requires booleans"))?;
        return match (op, l) {
            (BinOp::And, false) => Ok(Value::from(false)),
            (BinOp::Or, true) => Ok(Value::from(true)),
            _ => {
                let r = eval(right, context)?
                    .as_bool()
                    .ok_or_else(|| EvalError::new(CEL_TYPE_ERROR, "logic requires booleans"))?;
                Ok(Value::from(r))
            }
        };
    }

    let l = eval(left, context)?;
    let r = eval(right, context)?;

    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (a, b) = int_pair(&l, &r)?;
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return Err(EvalError::new(CEL_DIV_ZERO, "division by zero"));
                    }
                    a.checked_div(b)
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err(EvalError::new(CEL_DIV_ZERO, "modulo by zero"));
                    }
                    a.checked_rem(b)
                }
                _ => unreachable!(),
            };
            result
                .map(Value::from)
                .ok_or_else(|| EvalError::new(CEL_OVERFLOW, "integer overflow"))
        }
        BinOp::Eq => Ok(Value::from(l == r)),
        BinOp::Ne => Ok(Value::from(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (a, b) = int_pair(&l, &r)?;
            let result = match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            };
            Ok(Value::from(result))
        }
        BinOp::Contains => match (&l, &r) {
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::from(haystack.contains(needle.as_str())))
            }
            _ => Err(EvalError::new(CEL_TYPE_ERROR, "contains requires strings")),
        },
        BinOp::In => match &r {
            Value::Array(items) => Ok(Value::from(items.contains(&l))),
            _ => Err(EvalError::new(CEL_TYPE_ERROR, "in requires a list on the right")),
        },
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

fn int_pair(l: &Value, r: &Value) -> Result<(i64, i64), EvalError> {
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::new(CEL_TYPE_ERROR, "arithmetic requires integers")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(l), right: Box::new(r) }
    }

    #[test]
    fn integer_arithmetic_and_comparison() {
        let e = bin(
            BinOp::Ge,
            bin(BinOp::Add, Expr::Var("used".into()), Expr::Int(100)),
            Expr::Int(500),
        );
        assert_eq!(eval_bool(&e, &ctx(&[("used", json!(450))])).unwrap(), true);
        assert_eq!(eval_bool(&e, &ctx(&[("used", json!(100))])).unwrap(), false);
    }

    #[test]
    fn division_by_zero_has_fixed_code() {
        let e = bin(BinOp::Div, Expr::Int(1), Expr::Int(0));
        let err = eval(&e, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.code, CEL_DIV_ZERO);
        assert_eq!(err.message_hash.len(), 64);
    }

    #[test]
    fn overflow_is_caught() {
        let e = bin(BinOp::Mul, Expr::Int(i64::MAX), Expr::Int(2));
        assert_eq!(eval(&e, &BTreeMap::new()).unwrap_err().code, CEL_OVERFLOW);
    }

    #[test]
    fn undefined_variable() {
        let e = Expr::Var("missing".into());
        assert_eq!(eval(&e, &BTreeMap::new()).unwrap_err().code, CEL_UNDEFINED);
    }

    #[test]
    fn message_hash_collapses_case_and_whitespace() {
        let a = EvalError::new(CEL_INTERNAL, "Something  Went\tWrong");
        let b = EvalError::new(CEL_INTERNAL, "something went wrong");
        assert_eq!(a.message_hash, b.message_hash);
    }

    #[test]
    fn contains_and_in() {
        let e = bin(BinOp::Contains, Expr::Var("path".into()), Expr::Str("/tmp".into()));
        assert!(eval_bool(&e, &ctx(&[("path", json!("/tmp/x"))])).unwrap());

        let e = bin(
            BinOp::In,
            Expr::Var("region".into()),
            Expr::List(vec![Expr::Str("eu".into()), Expr::Str("us".into())]),
        );
        assert!(eval_bool(&e, &ctx(&[("region", json!("eu"))])).unwrap());
    }

    #[test]
    fn float_literal_refuses_to_evaluate() {
        let e = Expr::Float(1.5);
        assert_eq!(eval(&e, &BTreeMap::new()).unwrap_err().code, CEL_TYPE_ERROR);
    }

    #[test]
    fn short_circuit_skips_right_side_errors() {
        let e = bin(BinOp::And, Expr::Bool(false), Expr::Var("missing".into()));
        assert_eq!(eval_bool(&e, &BTreeMap::new()).unwrap(), false);
    }
}
