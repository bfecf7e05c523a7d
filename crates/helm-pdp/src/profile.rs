//! Static deterministic-profile validator (`cel-dp-v1`).
//!
//! Applied to every policy expression before a rule set is loaded. The
//! profile bans anything that could make two evaluations of the same
//! request differ: wall-clock reads, randomness, regex, dynamic typing,
//! and floating point.

use serde::{Deserialize, Serialize};

use crate::expr::{Expr, ALLOWED_CALLS};

pub const PROFILE_VERSION: &str = "cel-dp-v1";

/// Function names whose presence makes an expression nondeterministic or
/// otherwise outside the profile.
const BANNED_FUNCTIONS: &[&str] = &[
    "now",
    "time",
    "timestamp",
    "today",
    "random",
    "rand",
    "uuid",
    "matches",
    "regex",
    "re",
    "dyn",
    "type",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    BannedFunction,
    BannedType,
    Nondeterministic,
}

/// One finding from the static walk. `span` is the path of the offending
/// node within the expression tree, e.g. `left.args[0]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub name: String,
    pub span: String,
}

/// Walk the expression and collect every profile violation. An empty
/// result means the expression may be loaded.
pub fn validate_expression(expr: &Expr) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    walk(expr, "", &mut issues);
    issues
}

fn walk(expr: &Expr, span: &str, issues: &mut Vec<ValidationIssue>) {
    let at = |segment: &str| {
        if span.is_empty() {
            segment.to_string()
        } else {
            format!("{span}.{segment}")
        }
    };

    match expr {
        Expr::Float(x) => issues.push(ValidationIssue {
            issue_type: IssueType::BannedType,
            name: format!("float:{x}"),
            span: span.to_string(),
        }),
        Expr::Int(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Var(_) => {}
        Expr::List(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &at(&format!("[{i}]")), issues);
            }
        }
        Expr::Unary { expr, .. } => walk(expr, &at("expr"), issues),
        Expr::Binary { left, right, .. } => {
            walk(left, &at("left"), issues);
            walk(right, &at("right"), issues);
        }
        Expr::Call { name, args } => {
            if BANNED_FUNCTIONS.contains(&name.as_str()) {
                issues.push(ValidationIssue {
                    issue_type: IssueType::BannedFunction,
                    name: name.clone(),
                    span: span.to_string(),
                });
            } else if !ALLOWED_CALLS.contains(&name.as_str()) {
                issues.push(ValidationIssue {
                    issue_type: IssueType::Nondeterministic,
                    name: name.clone(),
                    span: span.to_string(),
                });
            }
            for (i, arg) in args.iter().enumerate() {
                walk(arg, &at(&format!("args[{i}]")), issues);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(l), right: Box::new(r) }
    }

    #[test]
    fn clean_expression_passes() {
        let e = bin(BinOp::Le, Expr::Var("cost".into()), Expr::Int(500));
        assert!(validate_expression(&e).is_empty());
    }

    #[test]
    fn wall_clock_call_is_banned() {
        let e = bin(
            BinOp::Lt,
            Expr::Call { name: "now".into(), args: vec![] },
            Expr::Var("deadline".into()),
        );
        let issues = validate_expression(&e);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::BannedFunction);
        assert_eq!(issues[0].name, "now");
        assert_eq!(issues[0].span, "left");
    }

    #[test]
    fn float_literal_is_a_banned_type() {
        let e = bin(BinOp::Gt, Expr::Var("score".into()), Expr::Float(0.5));
        let issues = validate_expression(&e);
        assert_eq!(issues[0].issue_type, IssueType::BannedType);
        assert_eq!(issues[0].span, "right");
    }

    #[test]
    fn unknown_call_flagged_nondeterministic() {
        let e = Expr::Call { name: "lookup".into(), args: vec![Expr::Var("k".into())] };
        let issues = validate_expression(&e);
        assert_eq!(issues[0].issue_type, IssueType::Nondeterministic);
    }

    #[test]
    fn size_is_inside_the_profile() {
        let e = bin(
            BinOp::Le,
            Expr::Call { name: "size".into(), args: vec![Expr::Var("tags".into())] },
            Expr::Int(5),
        );
        assert!(validate_expression(&e).is_empty());
    }

    #[test]
    fn nested_issues_carry_paths() {
        let e = Expr::List(vec![
            Expr::Int(1),
            Expr::Call { name: "random".into(), args: vec![] },
        ]);
        let issues = validate_expression(&e);
        assert_eq!(issues[0].span, "[1]");
    }
}
