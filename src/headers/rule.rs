//! Resolved header rules.

use std::fmt;

use crate::expression::{EvalError, Expression, Pattern, Value};
use crate::state::scope::EvaluationScope;

/// What a rule searches for.
#[derive(Debug, Clone)]
pub enum HeaderSource {
    /// No source: the target is inserted as a new header line.
    Insert,
    /// Fixed regular expression.
    Pattern(Pattern),
    /// Fixed literal text, replaced at its first occurrence.
    Literal(String),
    /// Evaluated per request; may yield a pattern, a string or nothing.
    Expression(Expression),
}

/// What a match is replaced with.
#[derive(Debug, Clone)]
pub enum HeaderTarget {
    /// Matches are removed.
    Remove,
    Literal(String),
    /// Evaluated per request; may yield a string or a replacement function.
    Expression(Expression),
}

#[derive(Debug, Clone)]
pub struct HeaderRule {
    pub source: HeaderSource,
    pub target: HeaderTarget,
}

impl HeaderRule {
    pub fn new(source: HeaderSource, target: HeaderTarget) -> Self {
        Self { source, target }
    }

    /// Line to insert before the header terminator.
    pub fn insert(line: &str) -> Self {
        Self::new(HeaderSource::Insert, HeaderTarget::Literal(line.to_string()))
    }

    /// Replace the first match of `pattern` with `replacement`.
    pub fn replace(pattern: Pattern, replacement: &str) -> Self {
        Self::new(HeaderSource::Pattern(pattern), HeaderTarget::Literal(replacement.to_string()))
    }

    pub fn evaluate_source(&self, scope: &EvaluationScope) -> Result<Value, EvalError> {
        match &self.source {
            HeaderSource::Insert => Ok(Value::Null),
            HeaderSource::Pattern(pattern) => Ok(Value::Pattern(pattern.clone())),
            HeaderSource::Literal(text) => Ok(Value::string(text.as_str())),
            HeaderSource::Expression(expression) => scope.evaluate(expression),
        }
    }

    pub fn evaluate_target(&self, scope: &EvaluationScope) -> Result<Value, EvalError> {
        match &self.target {
            HeaderTarget::Remove => Ok(Value::Null),
            HeaderTarget::Literal(text) => Ok(Value::string(text.as_str())),
            HeaderTarget::Expression(expression) => scope.evaluate(expression),
        }
    }
}

impl fmt::Display for HeaderRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            HeaderSource::Insert => f.write_str("\"add\"")?,
            HeaderSource::Pattern(pattern) => write!(f, "{pattern}")?,
            HeaderSource::Literal(text) => write!(f, "{text:?}")?,
            HeaderSource::Expression(expression) => write!(f, "{:?}", expression.source())?,
        }
        f.write_str(" -> ")?;
        match &self.target {
            HeaderTarget::Remove => f.write_str("\"remove\""),
            HeaderTarget::Literal(text) => write!(f, "{text:?}"),
            HeaderTarget::Expression(expression) => write!(f, "{:?}", expression.source()),
        }
    }
}

/// Rules for both directions of one forwarder.
#[derive(Debug, Clone, Default)]
pub struct HeaderTransformations {
    /// Applied to the request header block sent to the backend.
    pub send: Vec<HeaderRule>,
    /// Applied to the response header block returned to the client.
    pub retrieve: Vec<HeaderRule>,
}
