//! A small, sandboxed expression language for condition strings.
//!
//! Expressions such as `data.value > 10 && data.tags.length > 0` are parsed
//! into an [`Expression`] tree and evaluated against a JSON payload.  Nothing
//! is ever compiled or executed as code: the only things an expression can do
//! are read payload fields, compare, and do arithmetic.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | compare
//! compare := sum (("==" | "!=" | "===" | "!==" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | "true" | "false" | "null" | path | "(" or ")"
//! path    := ident ("." ident | "[" (number | string) "]")*
//! ```
//!
//! The root identifier `data` (or `input`) is the payload itself; any other
//! root identifier reads that field of the payload.
//!
//! Expressions are capped at [`MAX_TOKENS`] tokens and [`MAX_NESTING`] levels
//! of grouping or prefix operators, which bounds the tree height.

use serde_json::{Number, Value};
use thiserror::Error;

/// Longest accepted expression, in tokens.
pub const MAX_TOKENS: usize = 1024;

/// Deepest accepted nesting of parentheses, `!`, `not` and unary `-`.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("type mismatch in '{operation}': cannot apply to {left} and {right}")]
    TypeMismatch {
        operation: &'static str,
        left: String,
        right: String,
    },

    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// A payload lookup; an empty path is the payload itself.
    Path(Vec<Segment>),
    Not(Box<Expression>),
    Negate(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or()?;
        match parser.peek() {
            Token::End => Ok(expr),
            other => Err(parser.error(format!("unexpected {other:?}"))),
        }
    }

    pub fn evaluate(&self, payload: &Value) -> Result<Value, EvalError> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Path(segments) => Ok(lookup(payload, segments)),
            Expression::Not(inner) => Ok(Value::Bool(!truthy(&inner.evaluate(payload)?))),
            Expression::Negate(inner) => {
                let v = inner.evaluate(payload)?;
                match v.as_f64() {
                    Some(n) => Ok(number(-n)),
                    None => Err(mismatch("-", &v, &Value::Null)),
                }
            }
            // Short-circuit, returning booleans rather than operands.
            Expression::And(l, r) => Ok(Value::Bool(
                truthy(&l.evaluate(payload)?) && truthy(&r.evaluate(payload)?),
            )),
            Expression::Or(l, r) => Ok(Value::Bool(
                truthy(&l.evaluate(payload)?) || truthy(&r.evaluate(payload)?),
            )),
            Expression::Binary(op, l, r) => {
                binary(*op, &l.evaluate(payload)?, &r.evaluate(payload)?)
            }
        }
    }
}

/// Parse and evaluate `source`, reducing the result to a boolean.
pub fn evaluate_bool(source: &str, payload: &Value) -> Result<bool, EvalError> {
    Ok(truthy(&Expression::parse(source)?.evaluate(payload)?))
}

/// Parse and evaluate `source`.
pub fn evaluate(source: &str, payload: &Value) -> Result<Value, EvalError> {
    Expression::parse(source)?.evaluate(payload)
}

/// `null`, `false`, `0`, `NaN` and `""` are false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Evaluation helpers
// ---------------------------------------------------------------------------

fn lookup(payload: &Value, segments: &[Segment]) -> Value {
    let mut current = payload;
    for (pos, segment) in segments.iter().enumerate() {
        let next = match (segment, current) {
            (Segment::Field(name), Value::Object(map)) => map.get(name),
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            (Segment::Field(name), Value::Array(items)) if name == "length" => {
                return if pos + 1 == segments.len() {
                    Value::from(items.len())
                } else {
                    Value::Null
                };
            }
            (Segment::Field(name), Value::String(s)) if name == "length" => {
                return if pos + 1 == segments.len() {
                    Value::from(s.chars().count())
                } else {
                    Value::Null
                };
            }
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn mismatch(operation: &'static str, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        operation,
        left: left.to_string(),
        right: right.to_string(),
    }
}

/// Equality with numbers compared by value, so `1 == 1.0`.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use BinaryOp::*;

    match op {
        Equal => Ok(Value::Bool(loose_eq(left, right))),
        NotEqual => Ok(Value::Bool(!loose_eq(left, right))),
        Less | LessOrEqual | Greater | GreaterOrEqual => {
            let ordering = match (left, right) {
                (Value::Number(_), Value::Number(_)) => left
                    .as_f64()
                    .zip(right.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                // Incomparable operands never satisfy an ordering.
                _ => None,
            };
            Ok(Value::Bool(match ordering {
                None => false,
                Some(o) => match op {
                    Less => o.is_lt(),
                    LessOrEqual => o.is_le(),
                    Greater => o.is_gt(),
                    _ => o.is_ge(),
                },
            }))
        }
        Add => match (left, right) {
            (Value::String(a), b) => Ok(Value::String(format!("{a}{}", display(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{b}", display(a)))),
            _ => arithmetic("+", left, right, |a, b| Ok(a + b)),
        },
        Subtract => arithmetic("-", left, right, |a, b| Ok(a - b)),
        Multiply => arithmetic("*", left, right, |a, b| Ok(a * b)),
        Divide => arithmetic("/", left, right, |a, b| {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(a / b)
            }
        }),
        Remainder => arithmetic("%", left, right, |a, b| {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(a % b)
            }
        }),
    }
}

fn arithmetic(
    operation: &'static str,
    left: &Value,
    right: &Value,
    f: impl Fn(f64, f64) -> Result<f64, EvalError>,
) -> Result<Value, EvalError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => f(a, b).map(number),
        _ => Err(mismatch(operation, left, right)),
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    End,
}

const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if tokens.len() >= MAX_TOKENS {
            return Err(EvalError::Syntax {
                offset: i,
                message: format!("expression longer than {MAX_TOKENS} tokens"),
            });
        }
        let start = i;

        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f64>().map_err(|_| EvalError::Syntax {
                offset: start,
                message: format!("bad number '{text}'"),
            })?;
            tokens.push((start, Token::Number(n)));
            continue;
        }

        if c == '"' || c == '\'' {
            i += 1;
            let mut text = String::new();
            loop {
                match chars.get(i).copied() {
                    None => {
                        return Err(EvalError::Syntax {
                            offset: start,
                            message: "unterminated string".into(),
                        })
                    }
                    Some('\\') => {
                        if let Some(escaped) = chars.get(i + 1).copied() {
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                        i += 2;
                    }
                    Some(q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push((start, Token::Str(text)));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            continue;
        }

        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '.' => Some(Token::Dot),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((start, token));
            i += 1;
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push((start, Token::Op(op)));
                i += op.len();
            }
            None => {
                return Err(EvalError::Syntax {
                    offset: start,
                    message: format!("unexpected character '{c}'"),
                })
            }
        }
    }

    tokens.push((chars.len(), Token::End));
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: String) -> EvalError {
        EvalError::Syntax {
            offset: self.offset(),
            message,
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Expression, EvalError>) -> Result<Expression, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("expression nested deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Token::Op(op) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.and()?;
        while self.eat_op(&["||"]).is_some() || self.eat_keyword("or") {
            let right = self.and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.not()?;
        while self.eat_op(&["&&"]).is_some() || self.eat_keyword("and") {
            let right = self.not()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expression, EvalError> {
        if self.eat_op(&["!"]).is_some() || self.eat_keyword("not") {
            return Ok(Expression::Not(Box::new(self.nested(Self::not)?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expression, EvalError> {
        let left = self.sum()?;
        let op = match self.eat_op(&["===", "!==", "==", "!=", "<=", ">=", "<", ">"]) {
            Some("===") | Some("==") => BinaryOp::Equal,
            Some("!==") | Some("!=") => BinaryOp::NotEqual,
            Some("<") => BinaryOp::Less,
            Some("<=") => BinaryOp::LessOrEqual,
            Some(">") => BinaryOp::Greater,
            Some(">=") => BinaryOp::GreaterOrEqual,
            _ => return Ok(left),
        };
        let right = self.sum()?;
        Ok(Expression::Binary(op, Box::new(left), Box::new(right)))
    }

    fn sum(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.product()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Subtract };
            let right = self.product()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Expression, EvalError> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let op = match op {
                "*" => BinaryOp::Multiply,
                "/" => BinaryOp::Divide,
                _ => BinaryOp::Remainder,
            };
            let right = self.unary()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, EvalError> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expression::Negate(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat_op(&["!"]).is_some() {
            return Ok(Expression::Not(Box::new(self.nested(Self::unary)?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, EvalError> {
        match self.next() {
            Token::Number(n) => Ok(Expression::Literal(number(n))),
            Token::Str(s) => Ok(Expression::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.nested(Self::or)?;
                match self.next() {
                    Token::RParen => Ok(inner),
                    other => Err(self.error(format!("expected ')', found {other:?}"))),
                }
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expression::Literal(Value::Bool(true))),
                "false" => Ok(Expression::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expression::Literal(Value::Null)),
                "data" | "input" => self.path(Vec::new()),
                _ => self.path(vec![Segment::Field(name)]),
            },
            other => Err(self.error(format!("unexpected {other:?}"))),
        }
    }

    fn path(&mut self, mut segments: Vec<Segment>) -> Result<Expression, EvalError> {
        loop {
            match self.peek() {
                Token::Dot => {
                    self.pos += 1;
                    match self.next() {
                        Token::Ident(field) => segments.push(Segment::Field(field)),
                        other => {
                            return Err(self.error(format!("expected field name, found {other:?}")))
                        }
                    }
                }
                Token::LBracket => {
                    self.pos += 1;
                    let segment = match self.next() {
                        Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                            Segment::Index(n as usize)
                        }
                        Token::Str(field) => Segment::Field(field),
                        other => {
                            return Err(self.error(format!("expected index, found {other:?}")))
                        }
                    };
                    match self.next() {
                        Token::RBracket => segments.push(segment),
                        other => return Err(self.error(format!("expected ']', found {other:?}"))),
                    }
                }
                _ => return Ok(Expression::Path(segments)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compares_payload_fields() {
        assert!(evaluate_bool("data.value > 10", &json!({ "value": 11 })).unwrap());
        assert!(!evaluate_bool("data.value > 10", &json!({ "value": 5 })).unwrap());
        assert!(evaluate_bool("value >= 5", &json!({ "value": 5 })).unwrap());
    }

    #[test]
    fn precedence_and_grouping() {
        let payload = json!({ "a": 2, "b": 3 });
        assert_eq!(evaluate("a + b * 2", &payload).unwrap(), json!(8));
        assert_eq!(evaluate("(a + b) * 2", &payload).unwrap(), json!(10));
        assert!(evaluate_bool("a < b && !(b < a) || false", &payload).unwrap());
        assert!(evaluate_bool("a == 1 or b == 3", &payload).unwrap());
    }

    #[test]
    fn nested_paths_indexes_and_length() {
        let payload = json!({ "user": { "tags": ["x", "y"] }, "name": "abc" });
        assert_eq!(evaluate("data.user.tags[1]", &payload).unwrap(), json!("y"));
        assert_eq!(evaluate("data.user.tags.length", &payload).unwrap(), json!(2));
        assert_eq!(evaluate("data['name'].length", &payload).unwrap(), json!(3));
    }

    #[test]
    fn missing_fields_are_null_and_compare_false() {
        let payload = json!({});
        assert_eq!(evaluate("data.nope.deeper", &payload).unwrap(), Value::Null);
        assert!(!evaluate_bool("data.nope > 3", &payload).unwrap());
        assert!(evaluate_bool("data.nope == null", &payload).unwrap());
    }

    #[test]
    fn string_equality_and_concatenation() {
        let payload = json!({ "kind": "note" });
        assert!(evaluate_bool("data.kind === 'note'", &payload).unwrap());
        assert!(evaluate_bool("kind != \"task\"", &payload).unwrap());
        assert_eq!(evaluate("kind + '-' + 1", &payload).unwrap(), json!("note-1"));
    }

    #[test]
    fn bare_data_is_the_payload() {
        assert!(evaluate_bool("data == 'b'", &json!("b")).unwrap());
        assert!(evaluate_bool("data", &json!([1])).unwrap());
        assert!(!evaluate_bool("data", &json!(0)).unwrap());
    }

    #[test]
    fn arithmetic_type_errors_are_reported() {
        assert!(matches!(
            evaluate("data.s - 1", &json!({ "s": "x" })),
            Err(EvalError::TypeMismatch { operation: "-", .. })
        ));
        assert_eq!(evaluate("1 / 0", &json!({})), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn syntax_errors_are_reported() {
        for bad in ["data.value >", "(1 + 2", "data.", "'open", "a ; b", "1 2"] {
            assert!(
                matches!(Expression::parse(bad), Err(EvalError::Syntax { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let hostile = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(evaluate_bool(&hostile, &json!({})), Err(EvalError::Syntax { .. })));

        let nested = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(matches!(Expression::parse(&nested), Err(EvalError::Syntax { .. })));
        assert!(matches!(Expression::parse(&"!".repeat(MAX_NESTING + 1)), Err(EvalError::Syntax { .. })));

        let fine = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(evaluate(&fine, &json!({})).unwrap(), json!(1));
    }

    #[test]
    fn overlong_expressions_are_rejected() {
        let chain = vec!["1"; MAX_TOKENS].join(" + ");
        assert!(matches!(Expression::parse(&chain), Err(EvalError::Syntax { .. })));
        assert_eq!(evaluate(&vec!["1"; 100].join(" + "), &json!({})).unwrap(), json!(100));
    }

    #[test]
    fn code_is_never_executed() {
        // Anything resembling a call is simply a syntax error.
        assert!(Expression::parse("process.exit(1)").is_err());
        assert!(Expression::parse("constructor.constructor('x')()").is_err());
    }
}
