//! A small boolean expression language for retry predicates.
//!
//! ```text
//! ${body.areWeCool} == 'no'
//! ${header.attempts} < 5 && !(${exception.message} contains 'fatal')
//! ```
//!
//! Variables:
//! - `${body}` or `${body.a.b}` follows a dotted path into the body
//! - `${header.NAME}` and `${property.NAME}` (also `headers`/`exchangeProperty`)
//! - `${exception}`, `${exception.message}` and `${exception.type}`
//!
//! Missing paths resolve to `null`. Expressions are parsed once when the
//! policy is built, so syntax errors never surface during redelivery.

use core::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    iter::Peekable,
    str::FromStr,
};
use std::borrow::Cow;

use rebound_common::{Exchange, Value};

use super::{Predicate, PredicateError};

/// A parsed retry expression
#[derive(Debug, Clone)]
pub struct ExpressionPredicate {
    source: String,
    root: Expr,
}

impl ExpressionPredicate {
    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// If the expression is syntactically invalid or names an unknown variable.
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens: tokens.into_iter().peekable(),
        };

        let root = parser.parse_or()?;
        if let Some((at, _)) = parser.tokens.next() {
            return Err(malformed(source, at, "unexpected trailing input"));
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for ExpressionPredicate {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for ExpressionPredicate {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.source)
    }
}

impl Predicate for ExpressionPredicate {
    fn evaluate(&self, exchange: &Exchange) -> Result<bool, PredicateError> {
        self.root.truth(exchange)
    }

    fn describe(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.source)
    }
}

fn malformed(expression: &str, position: usize, reason: impl Into<String>) -> PredicateError {
    PredicateError::Malformed {
        expression: expression.to_string(),
        position,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl CompareOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "contains",
        }
    }

    fn apply(self, left: &Value, right: &Value) -> Result<bool, PredicateError> {
        match self {
            Self::Eq => Ok(loose_eq(left, right)),
            Self::Ne => Ok(!loose_eq(left, right)),
            Self::Lt => self.ordering(left, right).map(Ordering::is_lt),
            Self::Le => self.ordering(left, right).map(Ordering::is_le),
            Self::Gt => self.ordering(left, right).map(Ordering::is_gt),
            Self::Ge => self.ordering(left, right).map(Ordering::is_ge),
            Self::Contains => contains(left, right).ok_or_else(|| self.mismatch(left, right)),
        }
    }

    fn ordering(self, left: &Value, right: &Value) -> Result<Ordering, PredicateError> {
        let ordering = match (left, right) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => numeric(left)
                .zip(numeric(right))
                .and_then(|(a, b)| a.partial_cmp(&b)),
        };

        ordering.ok_or_else(|| self.mismatch(left, right))
    }

    const fn mismatch(self, left: &Value, right: &Value) -> PredicateError {
        PredicateError::TypeMismatch {
            operator: self.symbol(),
            left: left.type_name(),
            right: right.type_name(),
        }
    }
}

/// Numbers compare as numbers, and text that parses as a number joins in
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Text(text) => text.trim().parse().ok(),
        other => other.as_f64(),
    }
}

#[allow(clippy::float_cmp)]
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(flag), Value::Text(text)) | (Value::Text(text), Value::Bool(flag)) => {
            text.eq_ignore_ascii_case(if *flag { "true" } else { "false" })
        }
        _ => match (numeric(left), numeric(right)) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::Text(text) => Some(match needle {
            Value::Text(needle) => text.contains(needle.as_str()),
            other => text.contains(&other.to_string()),
        }),
        Value::List(items) => Some(items.iter().any(|item| loose_eq(item, needle))),
        Value::Map(map) => needle.as_str().map(|key| map.contains_key(key)),
        Value::Null => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Variable(String),
    Literal(Value),
    Compare(CompareOp),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, PredicateError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '$' => {
                chars.next();
                if chars.next_if(|&(_, c)| c == '{').is_none() {
                    return Err(malformed(source, start, "expected '{' after '$'"));
                }

                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err(malformed(source, start, "unterminated variable")),
                    }
                }
                Token::Variable(name.trim().to_string())
            }
            '\'' | '"' => {
                chars.next();
                Token::Literal(Value::Text(quoted(source, start, c, &mut chars)?))
            }
            '(' => {
                chars.next();
                Token::Open
            }
            ')' => {
                chars.next();
                Token::Close
            }
            '&' | '|' => {
                chars.next();
                if chars.next_if(|&(_, next)| next == c).is_none() {
                    return Err(malformed(source, start, format!("expected '{c}{c}'")));
                }
                if c == '&' { Token::And } else { Token::Or }
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let equals = chars.next_if(|&(_, c)| c == '=').is_some();
                match (c, equals) {
                    ('=', true) => Token::Compare(CompareOp::Eq),
                    ('!', true) => Token::Compare(CompareOp::Ne),
                    ('!', false) => Token::Not,
                    ('<', true) => Token::Compare(CompareOp::Le),
                    ('<', false) => Token::Compare(CompareOp::Lt),
                    ('>', true) => Token::Compare(CompareOp::Ge),
                    ('>', false) => Token::Compare(CompareOp::Gt),
                    _ => return Err(malformed(source, start, "expected '=='")),
                }
            }
            c if c.is_ascii_digit()
                || (c == '-' && source[start + 1..].starts_with(|n: char| n.is_ascii_digit())) =>
            {
                chars.next();
                let mut end = start + 1;
                while let Some((at, _)) = chars.next_if(|&(_, n)| n.is_ascii_digit() || n == '.') {
                    end = at + 1;
                }

                let text = &source[start..end];
                let value = if text.contains('.') {
                    text.parse().ok().map(Value::Float)
                } else {
                    text.parse().ok().map(Value::Int)
                };
                Token::Literal(value.ok_or_else(|| malformed(source, start, "invalid number"))?)
            }
            c if c.is_alphabetic() => {
                let mut end = start;
                while let Some((at, n)) =
                    chars.next_if(|&(_, n)| n.is_alphanumeric() || n == '_')
                {
                    end = at + n.len_utf8();
                }

                match &source[start..end] {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Compare(CompareOp::Contains),
                    word => {
                        return Err(malformed(
                            source,
                            start,
                            format!("unexpected word '{word}', text must be quoted"),
                        ));
                    }
                }
            }
            other => {
                return Err(malformed(
                    source,
                    start,
                    format!("unexpected character '{other}'"),
                ));
            }
        };

        tokens.push((start, token));
    }

    Ok(tokens)
}

fn quoted(
    source: &str,
    start: usize,
    quote: char,
    chars: &mut Peekable<core::str::CharIndices<'_>>,
) -> Result<String, PredicateError> {
    let mut text = String::new();

    loop {
        match chars.next() {
            Some((_, c)) if c == quote => return Ok(text),
            Some((at, '\\')) => match chars.next() {
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, c @ ('\\' | '\'' | '"'))) => text.push(c),
                Some(_) => return Err(malformed(source, at, "unknown escape sequence")),
                None => return Err(malformed(source, start, "unterminated string")),
            },
            Some((_, c)) => text.push(c),
            None => return Err(malformed(source, start, "unterminated string")),
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Peekable<std::vec::IntoIter<(usize, Token)>>,
}

impl Parser<'_> {
    fn parse_or(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.parse_and()?;
        while self.tokens.next_if(|(_, t)| *t == Token::Or).is_some() {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.parse_unary()?;
        while self.tokens.next_if(|(_, t)| *t == Token::And).is_some() {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, PredicateError> {
        if self.tokens.next_if(|(_, t)| *t == Token::Not).is_some() {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, PredicateError> {
        let left = self.parse_primary()?;
        if let Some((_, Token::Compare(op))) =
            self.tokens.next_if(|(_, t)| matches!(t, Token::Compare(_)))
        {
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, PredicateError> {
        match self.tokens.next() {
            Some((_, Token::Literal(value))) => Ok(Expr::Literal(value)),
            Some((at, Token::Variable(name))) => Variable::parse(&name)
                .map(Expr::Variable)
                .ok_or_else(|| malformed(self.source, at, format!("unknown variable '{name}'"))),
            Some((at, Token::Open)) => {
                let inner = self.parse_or()?;
                match self.tokens.next() {
                    Some((_, Token::Close)) => Ok(inner),
                    _ => Err(malformed(self.source, at, "unbalanced '('")),
                }
            }
            Some((at, _)) => Err(malformed(self.source, at, "expected a value")),
            None => Err(malformed(
                self.source,
                self.source.len(),
                "unexpected end of expression",
            )),
        }
    }
}

#[derive(Debug, Clone)]
enum Variable {
    Body(String),
    Header(String),
    Property(String),
    Exception,
    ExceptionMessage,
    ExceptionType,
}

impl Variable {
    fn parse(name: &str) -> Option<Self> {
        let (head, rest) = name
            .split_once('.')
            .map_or((name, None), |(head, rest)| (head, Some(rest)));

        match (head, rest) {
            ("body", None) => Some(Self::Body(String::new())),
            ("body", Some(path)) if !path.is_empty() => Some(Self::Body(path.to_string())),
            ("header" | "headers", Some(key)) if !key.is_empty() => {
                Some(Self::Header(key.to_string()))
            }
            ("property" | "exchangeProperty", Some(key)) if !key.is_empty() => {
                Some(Self::Property(key.to_string()))
            }
            ("exception", None) => Some(Self::Exception),
            ("exception", Some("message")) => Some(Self::ExceptionMessage),
            ("exception", Some("type")) => Some(Self::ExceptionType),
            _ => None,
        }
    }

    fn resolve<'e>(&self, exchange: &'e Exchange) -> Cow<'e, Value> {
        let found = match self {
            Self::Body(path) => exchange.body().path(path),
            Self::Header(key) => lookup(|k| exchange.header(k), key),
            Self::Property(key) => lookup(|k| exchange.property(k), key),
            Self::Exception => {
                return Cow::Owned(
                    exchange
                        .exception()
                        .map_or(Value::Null, |f| Value::Text(f.to_string())),
                );
            }
            Self::ExceptionMessage => {
                return Cow::Owned(
                    exchange
                        .exception()
                        .map_or(Value::Null, |f| Value::from(f.message())),
                );
            }
            Self::ExceptionType => {
                return Cow::Owned(
                    exchange
                        .exception()
                        .map_or(Value::Null, |f| Value::from(f.kind().name())),
                );
            }
        };

        found.map_or(Cow::Owned(Value::Null), Cow::Borrowed)
    }
}

/// Keys may themselves contain dots, so the longest matching key wins and
/// whatever is left is followed as a path into its value.
fn lookup<'e>(get: impl Fn(&str) -> Option<&'e Value>, key: &str) -> Option<&'e Value> {
    get(key).or_else(|| {
        key.rmatch_indices('.')
            .find_map(|(at, _)| get(&key[..at]).and_then(|value| value.path(&key[at + 1..])))
    })
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Variable(Variable),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval<'e>(&'e self, exchange: &'e Exchange) -> Result<Cow<'e, Value>, PredicateError> {
        let result = match self {
            Self::Literal(value) => return Ok(Cow::Borrowed(value)),
            Self::Variable(variable) => return Ok(variable.resolve(exchange)),
            Self::Not(inner) => !inner.truth(exchange)?,
            Self::And(left, right) => left.truth(exchange)? && right.truth(exchange)?,
            Self::Or(left, right) => left.truth(exchange)? || right.truth(exchange)?,
            Self::Compare(op, left, right) => {
                op.apply(&*left.eval(exchange)?, &*right.eval(exchange)?)?
            }
        };

        Ok(Cow::Owned(Value::Bool(result)))
    }

    fn truth(&self, exchange: &Exchange) -> Result<bool, PredicateError> {
        let value = self.eval(exchange)?;
        value.as_bool().ok_or(PredicateError::NotBoolean {
            found: value.type_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rebound_common::{Failure, FailureType};

    use super::*;

    fn eval(expression: &str, exchange: &Exchange) -> Result<bool, PredicateError> {
        ExpressionPredicate::parse(expression)
            .unwrap()
            .evaluate(exchange)
    }

    #[test]
    fn body_field_comparison() {
        let mut exchange = Exchange::new(Value::map().with("areWeCool", "no"));
        assert_eq!(eval("${body.areWeCool} == 'no'", &exchange), Ok(true));

        exchange.set_body(Value::map().with("areWeCool", "yes"));
        assert_eq!(eval("${body.areWeCool} == 'no'", &exchange), Ok(false));
        assert_eq!(eval("${body.areWeCool} != \"no\"", &exchange), Ok(true));
    }

    #[test]
    fn missing_paths_are_null() {
        let exchange = Exchange::new("plain");
        assert_eq!(eval("${body.nothing} == null", &exchange), Ok(true));
        assert_eq!(eval("${header.absent} == 'x'", &exchange), Ok(false));
        assert_eq!(eval("${body} == 'plain'", &exchange), Ok(true));
    }

    #[test]
    fn precedence_and_grouping() {
        let exchange = Exchange::default();
        assert_eq!(eval("true || false && false", &exchange), Ok(true));
        assert_eq!(eval("(true || false) && false", &exchange), Ok(false));
        assert_eq!(eval("not false and !(1 > 2)", &exchange), Ok(true));
    }

    #[test]
    fn numeric_coercion() {
        let mut exchange = Exchange::default();
        exchange.set_header("count", "7");
        exchange.set_header("ratio", 0.5);

        assert_eq!(eval("${header.count} == 7", &exchange), Ok(true));
        assert_eq!(eval("${header.count} < 10", &exchange), Ok(true));
        assert_eq!(eval("${header.ratio} >= 0.5", &exchange), Ok(true));
        assert_eq!(eval("-1 < 0", &exchange), Ok(true));
        assert_eq!(eval("'abc' < 'abd'", &exchange), Ok(true));
    }

    #[test]
    fn dotted_property_names() {
        let mut exchange = Exchange::default();
        exchange.set_property("rebound.redelivery.counter", 3);
        exchange.set_property("order", Value::map().with("lines", 2));

        assert_eq!(eval("${property.rebound.redelivery.counter} == 3", &exchange), Ok(true));
        assert_eq!(eval("${exchangeProperty.order.lines} > 1", &exchange), Ok(true));
    }

    #[test]
    fn exception_variables() {
        let mut exchange = Exchange::default();
        assert_eq!(eval("${exception} == null", &exchange), Ok(true));

        exchange.set_exception(Failure::new(
            FailureType::exception().subtype("IOException"),
            "connection reset",
        ));
        assert_eq!(eval("${exception.type} == 'IOException'", &exchange), Ok(true));
        assert_eq!(eval("${exception.message} contains 'reset'", &exchange), Ok(true));
    }

    #[test]
    fn contains_on_collections() {
        let exchange = Exchange::new(
            Value::map()
                .with("tags", Value::List(vec!["a".into(), "b".into()]))
                .with("meta", Value::map().with("k", 1)),
        );

        assert_eq!(eval("${body.tags} contains 'b'", &exchange), Ok(true));
        assert_eq!(eval("${body.meta} contains 'k'", &exchange), Ok(true));
        assert_eq!(eval("${body.missing} contains 'k'", &exchange), Ok(false));
    }

    #[test]
    fn evaluation_errors() {
        let exchange = Exchange::new(Value::map().with("n", 1));

        assert_eq!(
            eval("${body} > 1", &exchange),
            Err(PredicateError::TypeMismatch {
                operator: ">",
                left: "map",
                right: "int",
            })
        );
        assert_eq!(
            eval("${body.n}", &exchange),
            Err(PredicateError::NotBoolean { found: "int" })
        );
        assert_eq!(eval("true && 'x'", &exchange), Err(PredicateError::NotBoolean { found: "text" }));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let exchange = Exchange::new(Value::map());
        assert_eq!(eval("false && ${body} > 1", &exchange), Ok(false));
        assert_eq!(eval("true || ${body} > 1", &exchange), Ok(true));
    }

    #[test]
    fn malformed_expressions() {
        for expression in [
            "",
            "${body",
            "'unterminated",
            "${body} ==",
            "(true",
            "true false",
            "${nonsense} == 1",
            "${body} = 1",
            "${body} == no",
            "a & b",
        ] {
            assert!(
                matches!(
                    ExpressionPredicate::parse(expression),
                    Err(PredicateError::Malformed { .. })
                ),
                "{expression:?} should be rejected"
            );
        }
    }

    #[test]
    fn describes_itself() {
        let predicate: ExpressionPredicate = "${body} == 'x'".parse().unwrap();
        assert_eq!(predicate.describe(), "${body} == 'x'");
        assert_eq!(predicate.to_string(), "${body} == 'x'");
    }
}
