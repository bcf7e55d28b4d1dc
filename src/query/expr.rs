//! Predicate expressions evaluated against a row by the store, and the value ordering they use.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison mode accepted by `filter_<name>=<mode>:<value>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub const ALL: [Comparison; 6] = [
        Comparison::Eq,
        Comparison::Ne,
        Comparison::Gt,
        Comparison::Ge,
        Comparison::Lt,
        Comparison::Le,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Gt => "gt",
            Comparison::Ge => "ge",
            Comparison::Lt => "lt",
            Comparison::Le => "le",
        }
    }

    /// SQL operator applied to the result of a three-way comparison against zero.
    pub fn sql_operator(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Comparison::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let accepted: Vec<&str> = Comparison::ALL.iter().map(|c| c.as_str()).collect();
                AppError::Validation(format!(
                    "Invalid comparison mode '{}'. Accepted modes: {}",
                    s,
                    accepted.join(", ")
                ))
            })
    }
}

/// Expression over the current row. `Field` paths are store column names.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Row,
    Field(Vec<String>),
    Literal(Value),
    Compare {
        op: Comparison,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Regular expression match on a string value.
    Matches { expr: Box<Expr>, pattern: String },
    /// Array membership, or substring for strings.
    Contains { expr: Box<Expr>, value: Value },
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(vec![name.into()])
    }

    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Field(segments.into_iter().map(Into::into).collect())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn compare(self, op: Comparison, rhs: impl Into<Expr>) -> Self {
        Expr::Compare {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Self {
        self.compare(Comparison::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Self {
        self.compare(Comparison::Ne, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        self.compare(Comparison::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        self.compare(Comparison::Ge, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        self.compare(Comparison::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        self.compare(Comparison::Le, rhs)
    }

    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut all) => {
                all.push(other);
                Expr::And(all)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut any) => {
                any.push(other);
                Expr::Or(any)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn matches(self, pattern: impl Into<String>) -> Self {
        Expr::Matches {
            expr: Box::new(self),
            pattern: pattern.into(),
        }
    }

    pub fn contains(self, value: impl Into<Value>) -> Self {
        Expr::Contains {
            expr: Box::new(self),
            value: value.into(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(Value::String(value.to_string()))
    }
}

/// Turns a raw query-string value into the literal a filter compares against:
/// numeric text becomes a number, anything else stays a string.
pub fn coerce_literal(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

// Mirrored by `data_api_rank` in the PostgreSQL store.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::String(s) if numeric_text(s).is_some() => 2,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Value of text that reads as a plain decimal number, surrounding ASCII whitespace allowed.
pub fn numeric_text(s: &str) -> Option<f64> {
    let t = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if t.is_empty() || !t.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
        return None;
    }
    t.parse::<f64>().ok()
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => numeric_text(s),
        _ => None,
    }
}

/// Case-insensitive codepoint order; strings equal up to case put lowercase first.
pub fn compare_text(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| b.cmp(a))
}

/// Total order over JSON values, by rank: null, text, numbers (numeric text included), booleans,
/// arrays, objects. Numbers compare by value, text with [`compare_text`], containers by size first,
/// then element by element (objects in key order).
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a);
    if rank != type_rank(b) {
        return rank.cmp(&type_rank(b));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) if rank == 1 => compare_text(x, y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y.iter())
                .map(|(l, r)| compare_values(l, r))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            let mut xs: Vec<_> = x.iter().collect();
            let mut ys: Vec<_> = y.iter().collect();
            xs.sort_by(|l, r| l.0.cmp(r.0));
            ys.sort_by(|l, r| l.0.cmp(r.0));
            xs.iter()
                .zip(ys.iter())
                .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_modes() {
        assert_eq!("ge".parse::<Comparison>().unwrap(), Comparison::Ge);
        assert_eq!("ne".parse::<Comparison>().unwrap(), Comparison::Ne);
    }

    #[test]
    fn unknown_mode_lists_accepted_set() {
        let err = "contains".parse::<Comparison>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Invalid comparison mode"));
        assert!(message.contains("contains"));
        assert!(message.contains("eq, ne, gt, ge, lt, le"));
    }

    #[test]
    fn numeric_text_compares_numerically() {
        assert_eq!(compare_values(&json!(200), &json!("100")), Ordering::Greater);
        assert_eq!(compare_values(&json!(50), &json!("100")), Ordering::Less);
        assert!(values_equal(&json!(100), &json!("100")));
    }

    #[test]
    fn strings_compare_lexicographically() {
        assert_eq!(compare_values(&json!("Item A"), &json!("Item B")), Ordering::Less);
        assert_eq!(compare_values(&json!("2025-06-15"), &json!("1900-01-01")), Ordering::Greater);
    }

    #[test]
    fn text_ignores_case_then_puts_lowercase_first() {
        let mut names = vec![json!("cherry"), json!("Banana"), json!("apple"), json!("Apple")];
        names.sort_by(compare_values);
        assert_eq!(names, vec![json!("apple"), json!("Apple"), json!("Banana"), json!("cherry")]);
        assert_eq!(compare_text("Zeta", "alpha"), Ordering::Greater);
    }

    #[test]
    fn numeric_text_ranks_with_numbers() {
        assert_eq!(compare_values(&json!("10"), &json!("9")), Ordering::Greater);
        assert_eq!(compare_values(&json!("9"), &json!(9.5)), Ordering::Less);
        assert_eq!(compare_values(&json!(9.5), &json!("10")), Ordering::Less);
        assert_eq!(compare_values(&json!("abc"), &json!("10")), Ordering::Less);
        assert_eq!(numeric_text(" 1e3 "), Some(1000.0));
        assert_eq!(numeric_text("inf"), None);
        assert_eq!(numeric_text("NaN"), None);
    }

    fn mixed_samples() -> Vec<Value> {
        vec![
            Value::Null,
            json!("0"),
            json!(0),
            json!(0.5),
            json!("1"),
            json!(" 2 "),
            json!("10"),
            json!(9.5),
            json!("9"),
            json!(-3),
            json!("abc"),
            json!("ABC"),
            json!("Abc"),
            json!("b"),
            json!(""),
            json!("1e2"),
            json!(true),
            json!(false),
            json!([1, "a"]),
            json!([1]),
            json!(["a"]),
            json!({"k": 1}),
            json!({"k": "1"}),
            json!({"a": 1, "b": 2}),
            json!({"b": 2, "a": 1}),
        ]
    }

    #[test]
    fn comparison_is_a_total_preorder() {
        let samples = mixed_samples();
        for a in &samples {
            assert_eq!(compare_values(a, a), Ordering::Equal, "{}", a);
            for b in &samples {
                assert_eq!(compare_values(a, b), compare_values(b, a).reverse(), "{} vs {}", a, b);
                for c in &samples {
                    let ab = compare_values(a, b);
                    let bc = compare_values(b, c);
                    if ab != Ordering::Greater && bc != Ordering::Greater {
                        assert_ne!(compare_values(a, c), Ordering::Greater, "{} <= {} <= {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn sorting_is_independent_of_input_order() {
        let mut forward = mixed_samples();
        let mut backward: Vec<Value> = mixed_samples().into_iter().rev().collect();
        forward.sort_by(compare_values);
        backward.sort_by(compare_values);
        for (l, r) in forward.iter().zip(backward.iter()) {
            assert_eq!(compare_values(l, r), Ordering::Equal, "{} vs {}", l, r);
        }
        let first_number = forward.iter().position(|v| v == &json!(-3)).unwrap();
        assert!(forward[..first_number].iter().all(|v| v.is_null() || v.is_string()));
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(1), &Value::Null), Ordering::Greater);
    }

    #[test]
    fn coerce_keeps_text() {
        assert_eq!(coerce_literal("100"), json!(100));
        assert_eq!(coerce_literal("2.5"), json!(2.5));
        assert_eq!(coerce_literal("Item A"), json!("Item A"));
    }

    #[test]
    fn builders_flatten_conjunctions() {
        let e = Expr::field("a").eq("x").and(Expr::field("b").gt(json!(1))).and(Expr::Row);
        match e {
            Expr::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }
}
