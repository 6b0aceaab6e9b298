//! Expression Compiler
//!
//! Turns the expression strings found in configuration into callables
//! that are evaluated per request.
//!
//! # Data Flow
//! ```text
//! source text ──► lexer ──► parser (identifiers resolved to slots) ──► Node
//!                                                                       │
//! scope values [data, error, request, response, stateAPI, stateAPIs] ──►│eval
//!                                                                       ▼
//!                                                                     Value
//! ```
//!
//! # Design Decisions
//! - Free identifiers are resolved at compile time against a fixed list of
//!   scope names; an unknown name is a compile error, never a runtime one.
//! - `Tools` is always in scope and carries serialization helpers.
//! - Compiled expressions are immutable and cheap to clone (`Arc`), so the
//!   resolved forwarder table can be shared across connections.

mod eval;
mod lexer;
mod parser;
mod value;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use eval::replace;
pub use value::{Function, NativeFn, Pattern, Value};

use parser::Node;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken { found: String, expected: String, offset: usize },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("unknown identifier '{name}' at offset {offset}")]
    UnknownIdentifier { name: String, offset: usize },

    #[error("invalid regular expression /{pattern}/: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl CompileError {
    /// Re-anchor offsets of an error raised inside a nested source
    /// (template substitution) to the enclosing expression.
    pub(crate) fn shifted(self, base: usize) -> Self {
        match self {
            CompileError::UnexpectedChar { ch, offset } => {
                CompileError::UnexpectedChar { ch, offset: offset + base }
            }
            CompileError::Unterminated { what, offset } => {
                CompileError::Unterminated { what, offset: offset + base }
            }
            CompileError::UnexpectedToken { found, expected, offset } => {
                CompileError::UnexpectedToken { found, expected, offset: offset + base }
            }
            CompileError::UnknownIdentifier { name, offset } => {
                CompileError::UnknownIdentifier { name, offset: offset + base }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("cannot read property '{property}' of null")]
    NullProperty { property: String },

    #[error("{receiver} has no method '{method}'")]
    UnknownMethod { receiver: &'static str, method: String },

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("invalid argument to {method}: {reason}")]
    InvalidArgument { method: String, reason: String },

    #[error("{0}")]
    Native(String),
}

#[derive(Clone)]
enum Kind {
    Compiled(Arc<Node>),
    Native(NativeFn),
}

/// A compiled expression, evaluated against positional scope values.
///
/// The order of the values passed to [`Expression::evaluate`] matches the
/// order of the scope names given to [`Expression::compile`].
#[derive(Clone)]
pub struct Expression {
    source: Arc<str>,
    kind: Kind,
}

impl Expression {
    pub fn compile(source: &str, scope_names: &[&str]) -> Result<Self, CompileError> {
        let node = parser::parse(source, scope_names)?;
        Ok(Self {
            source: Arc::from(source),
            kind: Kind::Compiled(Arc::new(node)),
        })
    }

    /// Wrap a Rust closure so it can stand wherever a compiled expression can.
    pub fn native<F>(label: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            source: Arc::from(label),
            kind: Kind::Native(Arc::new(f)),
        }
    }

    /// An expression that ignores its scope.
    pub fn constant(value: Value) -> Self {
        let label = value.to_string();
        Self::native(&label, move |_| Ok(value.clone()))
    }

    pub fn evaluate(&self, scope: &[Value]) -> Result<Value, EvalError> {
        match &self.kind {
            Kind::Compiled(node) => eval::evaluate(node, scope),
            Kind::Native(f) => f(scope),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPE: &[&str] = &["data", "request"];

    #[test]
    fn compile_rejects_unknown_identifiers() {
        let err = Expression::compile("request.path === path", SCOPE).unwrap_err();
        assert!(matches!(err, CompileError::UnknownIdentifier { ref name, .. } if name == "path"));
    }

    #[test]
    fn template_errors_report_enclosing_offsets() {
        let err = Expression::compile("`a ${nope}`", SCOPE).unwrap_err();
        assert_eq!(err, CompileError::UnknownIdentifier { name: "nope".into(), offset: 5 });
    }

    #[test]
    fn native_and_constant_expressions() {
        let echo = Expression::native("echo", |scope| Ok(scope[0].clone()));
        assert_eq!(echo.evaluate(&[Value::from("x")]).unwrap().as_str(), Some("x"));
        let constant = Expression::constant(Value::from(true));
        assert!(constant.evaluate(&[]).unwrap().is_truthy());
        assert_eq!(constant.source(), "true");
    }

    #[test]
    fn compiled_expression_is_reusable() {
        let expr = Expression::compile("data.port || 443", SCOPE).unwrap();
        let with_port = Value::from(serde_json::json!({"port": 8080}));
        assert_eq!(expr.evaluate(&[with_port, Value::Null]).unwrap().as_f64(), Some(8080.0));
        let without = Value::from(serde_json::json!({}));
        assert_eq!(expr.evaluate(&[without, Value::Null]).unwrap().as_f64(), Some(443.0));
    }
}
