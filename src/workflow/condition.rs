//! Step Condition Evaluation
//!
//! Conditions are written in a small expression language: literals, context
//! lookups, comparisons and boolean operators. Expressions are compiled into
//! an [`Expr`] tree once and evaluated against a [`WorkflowContext`]; nothing
//! in the language can reach outside the context.
//!
//! ```
//! use promptflow::workflow::condition::Condition;
//! use serde_json::{json, Map};
//!
//! let mut context = Map::new();
//! context.insert("score".into(), json!(7));
//! context.insert("user".into(), json!({"role": "admin"}));
//!
//! let condition = Condition::compile("score >= 5 && context.user.role == 'admin'").unwrap();
//! assert!(condition.evaluate(&context));
//! ```

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Number, Value};

use super::model::WorkflowContext;
use crate::error::ConditionError;

#[derive(Parser)]
#[grammar = "workflow/condition.pest"]
struct ConditionParser;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Compiled condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Lookup path into the context, without the optional `context.` prefix
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

/// A compiled step condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parses an expression.
    pub fn compile(source: &str) -> Result<Self, ConditionError> {
        let error = |message: String| ConditionError {
            expression: source.to_string(),
            message,
        };

        let mut pairs =
            ConditionParser::parse(Rule::condition, source).map_err(|e| error(e.to_string()))?;
        let root = pairs
            .next()
            .and_then(|condition| condition.into_inner().next())
            .ok_or_else(|| error("empty expression".to_string()))?;

        let expr = build_expr(root).map_err(error)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluates the condition and applies truthiness to the result.
    pub fn evaluate(&self, context: &WorkflowContext) -> bool {
        is_truthy(&eval(&self.expr, context))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

/// Compiles and evaluates `source` in one go.
pub fn evaluate_condition(source: &str, context: &WorkflowContext) -> Result<bool, ConditionError> {
    Ok(Condition::compile(source)?.evaluate(context))
}

/// Truthiness of a context value.
///
/// `null`, `false`, `0`, `""`, `[]` and `{}` are false; anything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::or_expr => {
            let mut operands = pair
                .into_inner()
                .filter(|p| p.as_rule() != Rule::or_op)
                .map(build_expr)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if operands.len() == 1 {
                operands.remove(0)
            } else {
                Expr::Or(operands)
            })
        }
        Rule::and_expr => {
            let mut operands = pair
                .into_inner()
                .filter(|p| p.as_rule() != Rule::and_op)
                .map(build_expr)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if operands.len() == 1 {
                operands.remove(0)
            } else {
                Expr::And(operands)
            })
        }
        Rule::unary => {
            let mut negations = 0;
            let mut inner = None;
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::not_op => negations += 1,
                    _ => inner = Some(build_expr(part)?),
                }
            }
            let mut expr = inner.ok_or("missing operand after '!'")?;
            for _ in 0..negations {
                expr = Expr::Not(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::comparison => {
            let mut parts = pair.into_inner();
            let left = parts.next().ok_or("missing left operand")?;
            let left = build_expr(left)?;
            match (parts.next(), parts.next()) {
                (Some(op), Some(right)) => Ok(Expr::Compare(
                    Box::new(left),
                    parse_cmp_op(op.as_str())?,
                    Box::new(build_expr(right)?),
                )),
                _ => Ok(left),
            }
        }
        Rule::group => {
            let inner = pair.into_inner().next().ok_or("empty parentheses")?;
            build_expr(inner)
        }
        Rule::string => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Literal(Value::String(text.to_string())))
        }
        Rule::number => {
            let text = pair.as_str();
            let number = if let Ok(int) = text.parse::<i64>() {
                Number::from(int)
            } else {
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .ok_or_else(|| format!("invalid number '{}'", text))?
            };
            Ok(Expr::Literal(Value::Number(number)))
        }
        Rule::boolean => Ok(Expr::Literal(Value::Bool(pair.as_str() == "true"))),
        Rule::null => Ok(Expr::Literal(Value::Null)),
        Rule::path => {
            let mut segments: Vec<String> = pair.as_str().split('.').map(str::to_string).collect();
            if segments.len() > 1 && segments[0] == "context" {
                segments.remove(0);
            }
            Ok(Expr::Path(segments))
        }
        other => Err(format!("unexpected token {:?}", other)),
    }
}

fn parse_cmp_op(op: &str) -> Result<CmpOp, String> {
    match op {
        "==" => Ok(CmpOp::Eq),
        "!=" => Ok(CmpOp::Ne),
        "<" => Ok(CmpOp::Lt),
        "<=" => Ok(CmpOp::Le),
        ">" => Ok(CmpOp::Gt),
        ">=" => Ok(CmpOp::Ge),
        other => Err(format!("unknown operator '{}'", other)),
    }
}

fn eval(expr: &Expr, context: &WorkflowContext) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(segments) => lookup(context, segments),
        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, context))),
        Expr::And(operands) => Value::Bool(operands.iter().all(|e| is_truthy(&eval(e, context)))),
        Expr::Or(operands) => Value::Bool(operands.iter().any(|e| is_truthy(&eval(e, context)))),
        Expr::Compare(left, op, right) => {
            Value::Bool(compare(&eval(left, context), *op, &eval(right, context)))
        }
    }
}

fn lookup(context: &WorkflowContext, segments: &[String]) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return Value::Null;
    };
    let mut current = match context.get(first) {
        Some(value) => value,
        None => return Value::Null,
    };
    for segment in rest {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => loosely_equal(left, right),
        CmpOp::Ne => !loosely_equal(left, right),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ordering) => match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::Le => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    CmpOp::Ge => ordering.is_ge(),
                    CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
                },
                None => false,
            }
        }
    }
}

/// Numbers compare by value (`1 == 1.0`); everything else by JSON equality.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn context() -> WorkflowContext {
        let mut context = Map::new();
        context.insert("count".into(), json!(3));
        context.insert("ratio".into(), json!(0.5));
        context.insert("name".into(), json!("ada"));
        context.insert("empty".into(), json!(""));
        context.insert("flag".into(), json!(true));
        context.insert("items".into(), json!(["x", "y"]));
        context.insert("user".into(), json!({"role": "admin", "tags": ["a", "b"]}));
        context
    }

    fn eval_str(source: &str) -> bool {
        evaluate_condition(source, &context()).unwrap()
    }

    #[test]
    fn test_truthiness_of_lookups() {
        assert!(eval_str("count"));
        assert!(eval_str("name"));
        assert!(!eval_str("empty"));
        assert!(eval_str("items"));
        assert!(!eval_str("missing"));
        assert!(eval_str("flag"));
    }

    #[test]
    fn test_context_prefix_is_optional() {
        assert!(eval_str("context.name == 'ada'"));
        assert!(eval_str("name == \"ada\""));
    }

    #[test]
    fn test_nested_lookup() {
        assert!(eval_str("user.role == 'admin'"));
        assert!(eval_str("user.tags.1 == 'b'"));
        assert!(!eval_str("user.tags.9"));
        assert!(!eval_str("name.length"));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval_str("count > 2"));
        assert!(eval_str("count >= 3"));
        assert!(!eval_str("count < 3"));
        assert!(eval_str("count <= 3.0"));
        assert!(eval_str("count == 3.0"));
        assert!(eval_str("ratio < 1"));
        assert!(eval_str("-1 < ratio"));
    }

    #[test]
    fn test_string_ordering() {
        assert!(eval_str("name < 'bob'"));
        assert!(!eval_str("name > 'bob'"));
    }

    #[test]
    fn test_mixed_type_ordering_is_false() {
        assert!(!eval_str("name > 1"));
        assert!(!eval_str("name < 1"));
    }

    #[test]
    fn test_boolean_operators() {
        assert!(eval_str("count > 1 && name == 'ada'"));
        assert!(!eval_str("count > 1 && empty"));
        assert!(eval_str("empty || flag"));
        assert!(eval_str("count > 1 and not empty"));
        assert!(eval_str("missing or flag"));
        assert!(eval_str("!empty"));
        assert!(!eval_str("!!empty"));
    }

    #[test]
    fn test_precedence_and_grouping() {
        // && binds tighter than ||
        assert!(eval_str("flag || missing && missing"));
        assert!(!eval_str("(flag || missing) && missing"));
    }

    #[test]
    fn test_literals() {
        assert!(eval_str("true"));
        assert!(!eval_str("false"));
        assert!(!eval_str("null"));
        assert!(eval_str("missing == null"));
        assert!(!eval_str("0"));
        assert!(eval_str("'text'"));
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let mut context = Map::new();
        context.insert("order".into(), json!(1));
        context.insert("android".into(), json!(true));
        context.insert("nothing".into(), json!(false));
        context.insert("trueish".into(), json!("yes"));

        assert!(evaluate_condition("order == 1", &context).unwrap());
        assert!(evaluate_condition("android", &context).unwrap());
        assert!(!evaluate_condition("nothing", &context).unwrap());
        assert!(evaluate_condition("trueish", &context).unwrap());
    }

    #[test]
    fn test_inequality() {
        assert!(eval_str("name != 'bob'"));
        assert!(!eval_str("count != 3"));
    }

    #[test]
    fn test_syntax_errors_are_rejected() {
        for source in ["", "count >", "a = b", "(count", "name == 'open", "process.exit()"] {
            let result = Condition::compile(source);
            assert!(result.is_err(), "'{}' should not compile", source);
        }
    }

    #[test]
    fn test_no_code_execution_surface() {
        // Function-call syntax is not part of the grammar
        assert!(Condition::compile("require('fs')").is_err());
        assert!(Condition::compile("items.length > 0; true").is_err());
    }

    #[test]
    fn test_compiled_tree_shape() {
        let condition = Condition::compile("context.a == 1").unwrap();
        assert_eq!(condition.source(), "context.a == 1");
        assert_eq!(
            condition.expr(),
            &Expr::Compare(
                Box::new(Expr::Path(vec!["a".into()])),
                CmpOp::Eq,
                Box::new(Expr::Literal(json!(1)))
            )
        );
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(is_truthy(&json!(-2)));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!({"a": 1})));
    }
}
