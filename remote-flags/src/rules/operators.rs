use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::{Number, Value};

use super::context::{kind_of, lookup};
use super::errors::EvaluationError;

/// The fixed operator table. Every operator receives already evaluated
/// operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    StrictEqual,
    NotEqual,
    StrictNotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Not,
    And,
    Or,
    Conditional,
    Add,
    Multiply,
    Subtract,
    Divide,
    Modulo,
    Min,
    Max,
    Count,
    Cat,
    In,
    Var,
    Log,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::StrictEqual => "===",
            Operator::NotEqual => "!=",
            Operator::StrictNotEqual => "!==",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Not => "!",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Conditional => "?:",
            Operator::Add => "+",
            Operator::Multiply => "*",
            Operator::Subtract => "-",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Min => "min",
            Operator::Max => "max",
            Operator::Count => "count",
            Operator::Cat => "cat",
            Operator::In => "in",
            Operator::Var => "var",
            Operator::Log => "log",
        }
    }

    /// Applies the operator to resolved operands. `context` is only read by `var`.
    pub fn apply(self, args: Vec<Value>, context: &Value) -> Result<Value, EvaluationError> {
        match self {
            Operator::Equal => {
                let [a, b] = self.exactly(args)?;
                Ok(Value::Bool(loose_eq(&a, &b)))
            }
            Operator::NotEqual => {
                let [a, b] = self.exactly(args)?;
                Ok(Value::Bool(!loose_eq(&a, &b)))
            }
            Operator::StrictEqual => {
                let [a, b] = self.exactly(args)?;
                Ok(Value::Bool(a == b))
            }
            Operator::StrictNotEqual => {
                let [a, b] = self.exactly(args)?;
                Ok(Value::Bool(a != b))
            }
            Operator::Greater | Operator::GreaterOrEqual => {
                let [a, b] = self.exactly(args)?;
                Ok(Value::Bool(self.holds(&a, &b)?))
            }
            Operator::Less | Operator::LessOrEqual => match args.len() {
                2 => {
                    let [a, b] = self.exactly(args)?;
                    Ok(Value::Bool(self.holds(&a, &b)?))
                }
                3 => {
                    // a < b < c reads as (a < b) and (b < c)
                    let [a, b, c] = self.exactly(args)?;
                    Ok(Value::Bool(self.holds(&a, &b)? && self.holds(&b, &c)?))
                }
                got => Err(self.arity("2 or 3", got)),
            },
            Operator::Not => {
                let [a] = self.exactly(args)?;
                Ok(Value::Bool(!is_truthy(&a)))
            }
            Operator::And => Ok(args.into_iter().fold(Value::Bool(true), |total, arg| {
                if is_truthy(&total) {
                    arg
                } else {
                    total
                }
            })),
            Operator::Or => Ok(args.into_iter().fold(Value::Bool(false), |total, arg| {
                if is_truthy(&total) {
                    total
                } else {
                    arg
                }
            })),
            Operator::Conditional => {
                let [condition, then, otherwise] = self.exactly(args)?;
                Ok(if is_truthy(&condition) { then } else { otherwise })
            }
            Operator::Add => {
                let mut total = 0.0;
                for arg in &args {
                    total += self.to_float(arg)?;
                }
                self.number(total)
            }
            Operator::Multiply => {
                let mut total = 1.0;
                for arg in &args {
                    total *= self.to_float(arg)?;
                }
                self.number(total)
            }
            Operator::Subtract => match args.len() {
                1 => {
                    let [a] = self.exactly(args)?;
                    self.negate(&a)
                }
                2 => {
                    let [a, b] = self.exactly(args)?;
                    self.subtract(&a, &b)
                }
                got => Err(self.arity("1 or 2", got)),
            },
            Operator::Divide => match args.len() {
                1 => {
                    let [a] = self.exactly(args)?;
                    Ok(a)
                }
                2 => {
                    let [a, b] = self.exactly(args)?;
                    let divisor = self.to_float(&b)?;
                    if divisor == 0.0 {
                        return Err(EvaluationError::DivisionByZero);
                    }
                    self.number(self.to_float(&a)? / divisor)
                }
                got => Err(self.arity("1 or 2", got)),
            },
            Operator::Modulo => {
                let [a, b] = self.exactly(args)?;
                self.modulo(&a, &b)
            }
            Operator::Min => self.extreme(args, Ordering::Less),
            Operator::Max => self.extreme(args, Ordering::Greater),
            Operator::Count => Ok(Value::from(
                args.iter().filter(|arg| is_truthy(arg)).count() as u64,
            )),
            Operator::Cat => {
                let mut joined = String::new();
                for arg in &args {
                    match arg {
                        Value::String(s) => joined.push_str(s),
                        other => {
                            return Err(self.mismatch(format!("a {} operand", kind_of(other))))
                        }
                    }
                }
                Ok(Value::String(joined))
            }
            Operator::In => {
                let [needle, haystack] = self.exactly(args)?;
                self.contains(&haystack, &needle).map(Value::Bool)
            }
            Operator::Var => {
                let [path] = self.exactly(args)?;
                let path = match path {
                    Value::String(path) => path,
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(self.mismatch(format!("a {} path", kind_of(&other))));
                    }
                };
                Ok(lookup(context, &path)?.clone())
            }
            Operator::Log => {
                let [a] = self.exactly(args)?;
                tracing::info!(value = %a, "rule log");
                Ok(a)
            }
        }
    }

    fn exactly<const N: usize>(self, args: Vec<Value>) -> Result<[Value; N], EvaluationError> {
        args.try_into().map_err(|args: Vec<Value>| {
            let expected = match N {
                1 => "1",
                2 => "2",
                3 => "3",
                _ => "a fixed number of",
            };
            self.arity(expected, args.len())
        })
    }

    fn arity(self, expected: &'static str, got: usize) -> EvaluationError {
        EvaluationError::Arity {
            operator: self.symbol(),
            expected,
            got,
        }
    }

    fn mismatch(self, detail: String) -> EvaluationError {
        EvaluationError::TypeMismatch {
            operator: self.symbol(),
            detail,
        }
    }

    fn holds(self, a: &Value, b: &Value) -> Result<bool, EvaluationError> {
        let ordering = self.compare(a, b)?;
        Ok(match self {
            Operator::Greater => ordering == Ordering::Greater,
            Operator::GreaterOrEqual => ordering != Ordering::Less,
            Operator::Less => ordering == Ordering::Less,
            _ => ordering != Ordering::Greater,
        })
    }

    fn compare(self, a: &Value, b: &Value) -> Result<Ordering, EvaluationError> {
        let ordering = match (a, b) {
            (Value::Number(x), Value::Number(y)) => as_f64(x).partial_cmp(&as_f64(y)),
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            _ => None,
        };
        ordering.ok_or_else(|| {
            self.mismatch(format!("a {} and a {}", kind_of(a), kind_of(b)))
        })
    }

    fn extreme(self, args: Vec<Value>, keep: Ordering) -> Result<Value, EvaluationError> {
        let mut args = args.into_iter();
        let mut best = args.next().ok_or_else(|| self.arity("at least 1", 0))?;
        for arg in args {
            if self.compare(&arg, &best)? == keep {
                best = arg;
            }
        }
        Ok(best)
    }

    fn contains(self, haystack: &Value, needle: &Value) -> Result<bool, EvaluationError> {
        match (haystack, needle) {
            (Value::String(s), Value::String(n)) => Ok(s.contains(n.as_str())),
            (Value::String(_), other) => Err(self.mismatch(format!(
                "a {} needle in a string",
                kind_of(other)
            ))),
            (Value::Array(items), _) => Ok(items.iter().any(|item| loose_eq(item, needle))),
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            (Value::Object(_), Value::Array(_) | Value::Object(_)) => Err(self.mismatch(
                format!("a {} needle in an object", kind_of(needle)),
            )),
            // containers without membership, or keys that can never match
            _ => Ok(false),
        }
    }

    fn to_float(self, value: &Value) -> Result<f64, EvaluationError> {
        match value {
            Value::Number(n) => Ok(as_f64(n)),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| self.mismatch(format!("the non-numeric string {s:?}"))),
            other => Err(self.mismatch(format!("a {} operand", kind_of(other)))),
        }
    }

    fn number(self, value: f64) -> Result<Value, EvaluationError> {
        Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| self.mismatch("operands producing a non-finite result".to_string()))
    }

    fn numeric(self, value: &Value) -> Result<Numeric, EvaluationError> {
        match value {
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => Numeric::Int(i),
                None => Numeric::Float(as_f64(n)),
            }),
            Value::Bool(b) => Ok(Numeric::Int(i64::from(*b))),
            other => Err(self.mismatch(format!("a {} operand", kind_of(other)))),
        }
    }

    fn negate(self, a: &Value) -> Result<Value, EvaluationError> {
        match self.numeric(a)? {
            Numeric::Int(i) => match i.checked_neg() {
                Some(negated) => Ok(Value::from(negated)),
                None => self.number(-(i as f64)),
            },
            Numeric::Float(f) => self.number(-f),
        }
    }

    fn subtract(self, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
        match (self.numeric(a)?, self.numeric(b)?) {
            (Numeric::Int(x), Numeric::Int(y)) => match x.checked_sub(y) {
                Some(difference) => Ok(Value::from(difference)),
                None => self.number(x as f64 - y as f64),
            },
            (x, y) => self.number(x.as_f64() - y.as_f64()),
        }
    }

    fn modulo(self, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
        // The result takes the sign of the divisor.
        match (self.numeric(a)?, self.numeric(b)?) {
            (_, Numeric::Int(0)) => Err(EvaluationError::DivisionByZero),
            (Numeric::Int(x), Numeric::Int(y)) => {
                let remainder = x.checked_rem(y).unwrap_or(0);
                if remainder != 0 && (remainder < 0) != (y < 0) {
                    Ok(Value::from(remainder + y))
                } else {
                    Ok(Value::from(remainder))
                }
            }
            (x, y) => {
                let (x, y) = (x.as_f64(), y.as_f64());
                if y == 0.0 {
                    return Err(EvaluationError::DivisionByZero);
                }
                let remainder = x % y;
                if remainder != 0.0 && (remainder < 0.0) != (y < 0.0) {
                    self.number(remainder + y)
                } else {
                    self.number(remainder)
                }
            }
        }
    }
}

impl FromStr for Operator {
    type Err = EvaluationError;

    fn from_str(symbol: &str) -> Result<Self, Self::Err> {
        Ok(match symbol {
            "==" => Operator::Equal,
            "===" => Operator::StrictEqual,
            "!=" => Operator::NotEqual,
            "!==" => Operator::StrictNotEqual,
            ">" => Operator::Greater,
            ">=" => Operator::GreaterOrEqual,
            "<" => Operator::Less,
            "<=" => Operator::LessOrEqual,
            "!" => Operator::Not,
            "and" => Operator::And,
            "or" => Operator::Or,
            "?:" => Operator::Conditional,
            "+" => Operator::Add,
            "*" => Operator::Multiply,
            "-" => Operator::Subtract,
            "/" => Operator::Divide,
            "%" => Operator::Modulo,
            "min" => Operator::Min,
            "max" => Operator::Max,
            "count" => Operator::Count,
            "cat" => Operator::Cat,
            "in" => Operator::In,
            "var" => Operator::Var,
            "log" => Operator::Log,
            unknown => return Err(EvaluationError::UnrecognizedOperation(unknown.to_string())),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }
}

fn as_f64(n: &Number) -> f64 {
    // serde_json numbers are always finite, so this only fails for
    // arbitrary precision values, which are not enabled
    n.as_f64().unwrap_or(f64::NAN)
}

/// Truthiness as used by `!`, `and`, `or`, `?:` and `count`.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => as_f64(n) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Equality where `1` and `1.0` are the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => as_f64(x) == as_f64(y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, x)| y.get(key).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn apply(operator: &str, args: Value) -> Result<Value, EvaluationError> {
        let Value::Array(args) = args else {
            panic!("test operands must be an array")
        };
        operator
            .parse::<Operator>()
            .unwrap()
            .apply(args, &json!({}))
    }

    #[test]
    fn test_every_symbol_round_trips() {
        for symbol in [
            "==", "===", "!=", "!==", ">", ">=", "<", "<=", "!", "and", "or", "?:", "+", "*",
            "-", "/", "%", "min", "max", "count", "cat", "in", "var", "log",
        ] {
            assert_eq!(symbol.parse::<Operator>().unwrap().symbol(), symbol);
        }
    }

    #[test]
    fn test_unknown_symbol() {
        let err = "xor".parse::<Operator>().unwrap_err();
        assert_eq!(err.to_string(), "Unrecognized operation xor");
    }

    #[test]
    fn test_equality() {
        assert_eq!(apply("==", json!([1, 1.0])).unwrap(), json!(true));
        assert_eq!(apply("===", json!([1, 1.0])).unwrap(), json!(false));
        assert_eq!(apply("===", json!(["a", "a"])).unwrap(), json!(true));
        assert_eq!(apply("!=", json!(["a", "b"])).unwrap(), json!(true));
        assert_eq!(apply("!==", json!([2, 2])).unwrap(), json!(false));
        assert_eq!(apply("==", json!([[1, 2], [1.0, 2]])).unwrap(), json!(true));
        assert_eq!(apply("==", json!(["1", 1])).unwrap(), json!(false));
    }

    #[test]
    fn test_chained_ranges() {
        assert_eq!(apply("<", json!([1, 2, 3])).unwrap(), json!(true));
        assert_eq!(apply("<", json!([1, 5, 3])).unwrap(), json!(false));
        assert_eq!(apply("<=", json!([1, 1, 3])).unwrap(), json!(true));
        assert_eq!(apply("<=", json!([1, 4, 3])).unwrap(), json!(false));
        // the second comparison never runs when the first fails
        assert_eq!(apply("<", json!([2, 1, "x"])).unwrap(), json!(false));
        assert!(matches!(
            apply(">", json!([1, 2, 3])),
            Err(EvaluationError::Arity { got: 3, .. })
        ));
    }

    #[test]
    fn test_ordering_rejects_mixed_kinds() {
        assert_eq!(apply(">", json!(["b", "a"])).unwrap(), json!(true));
        assert_eq!(apply(">=", json!([2.5, 2])).unwrap(), json!(true));
        assert!(matches!(
            apply("<", json!([1, "2"])),
            Err(EvaluationError::TypeMismatch { operator: "<", .. })
        ));
    }

    #[test]
    fn test_boolean_folds_return_operands() {
        assert_eq!(apply("and", json!([])).unwrap(), json!(true));
        assert_eq!(apply("or", json!([])).unwrap(), json!(false));
        assert_eq!(apply("and", json!([1, "x"])).unwrap(), json!("x"));
        assert_eq!(apply("and", json!([0, "x"])).unwrap(), json!(0));
        assert_eq!(apply("or", json!(["", null, "y"])).unwrap(), json!("y"));
        assert_eq!(apply("!", json!([[]])).unwrap(), json!(true));
        assert_eq!(apply("?:", json!([true, "a", "b"])).unwrap(), json!("a"));
        assert_eq!(apply("?:", json!([0, "a", "b"])).unwrap(), json!("b"));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(apply("+", json!([1, "2", true])).unwrap(), json!(4.0));
        assert_eq!(apply("+", json!([])).unwrap(), json!(0.0));
        assert_eq!(apply("*", json!([2, 3.5])).unwrap(), json!(7.0));
        assert_eq!(apply("-", json!([5, 3])).unwrap(), json!(2));
        assert_eq!(apply("-", json!([5.5, 3])).unwrap(), json!(2.5));
        assert_eq!(apply("-", json!([4])).unwrap(), json!(-4));
        assert_eq!(apply("/", json!([7])).unwrap(), json!(7));
        assert_eq!(apply("/", json!([7, 2])).unwrap(), json!(3.5));
        assert_eq!(apply("%", json!([7, 3])).unwrap(), json!(1));
        assert_eq!(apply("%", json!([-7, 3])).unwrap(), json!(2));
        assert_eq!(apply("%", json!([7, -3])).unwrap(), json!(-2));
        assert_eq!(apply("%", json!([7.5, 2])).unwrap(), json!(1.5));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert_eq!(
            apply("/", json!([1, 0])).unwrap_err(),
            EvaluationError::DivisionByZero
        );
        assert_eq!(
            apply("%", json!([1, 0])).unwrap_err(),
            EvaluationError::DivisionByZero
        );
        assert_eq!(
            apply("%", json!([1.5, 0.0])).unwrap_err(),
            EvaluationError::DivisionByZero
        );
    }

    #[test]
    fn test_arithmetic_type_mismatch() {
        assert!(matches!(
            apply("+", json!([1, "one"])),
            Err(EvaluationError::TypeMismatch { operator: "+", .. })
        ));
        assert!(matches!(
            apply("-", json!(["5", 1])),
            Err(EvaluationError::TypeMismatch { operator: "-", .. })
        ));
        assert!(matches!(
            apply("*", json!([1e308, 1e308])),
            Err(EvaluationError::TypeMismatch { operator: "*", .. })
        ));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(apply("min", json!([3, 1, 2])).unwrap(), json!(1));
        assert_eq!(apply("max", json!([3, 1.5, 2])).unwrap(), json!(3));
        assert_eq!(apply("max", json!(["a", "c", "b"])).unwrap(), json!("c"));
        assert_eq!(apply("count", json!([1, 0, "a", "", null, [1]])).unwrap(), json!(3));
        assert!(matches!(
            apply("min", json!([])),
            Err(EvaluationError::Arity { operator: "min", .. })
        ));
    }

    #[test]
    fn test_strings_and_membership() {
        assert_eq!(apply("cat", json!(["ab", "cd"])).unwrap(), json!("abcd"));
        assert!(apply("cat", json!(["ab", 1])).is_err());
        assert_eq!(apply("in", json!(["pp", "apple"])).unwrap(), json!(true));
        assert_eq!(apply("in", json!([2, [1, 2.0]])).unwrap(), json!(true));
        assert_eq!(apply("in", json!(["k", {"k": 1}])).unwrap(), json!(true));
        assert_eq!(apply("in", json!([1, 12])).unwrap(), json!(false));
        assert_eq!(apply("in", json!([1, null])).unwrap(), json!(false));
        assert!(apply("in", json!([1, "12"])).is_err());
    }

    #[test]
    fn test_var_reads_context() {
        let context = json!({"user": {"tags": ["a", "b"]}, "0": "zero"});
        let var = Operator::Var;
        assert_eq!(
            var.apply(vec![json!("user.tags.1")], &context).unwrap(),
            json!("b")
        );
        assert_eq!(var.apply(vec![json!(0)], &context).unwrap(), json!("zero"));
        assert!(matches!(
            var.apply(vec![json!(true)], &context),
            Err(EvaluationError::TypeMismatch { operator: "var", .. })
        ));
        assert!(matches!(
            var.apply(vec![json!("a"), json!("b")], &context),
            Err(EvaluationError::Arity { operator: "var", got: 2, .. })
        ));
    }
}
