//! Typed results of `pre` and `post` expressions.

use crate::expression::Value;

/// Marker string that stops the current expression chain.
pub const BREAK: &str = "break";

/// Result of a `pre` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreOutcome {
    /// Keep evaluating; the "to run" flag is unchanged.
    Continue,
    /// Mark the state API to be called.
    Use,
    /// Skip this state API's call and its `post` expressions.
    Skip,
    /// Stop evaluating `pre` expressions for this state API.
    Break,
    /// Answer the client with this status and end the request.
    Respond(u16),
}

/// Result of a `post` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Continue,
    Break,
    Respond(u16),
}

/// Interpret a number as a status code. Only integral values in the HTTP
/// status range count; anything else is ignored.
fn status(value: &Value) -> Option<Option<u16>> {
    let n = value.as_f64()?;
    if n.fract() == 0.0 && (100.0..=599.0).contains(&n) {
        Some(Some(n as u16))
    } else {
        tracing::warn!(value = n, "Ignoring numeric result outside the HTTP status range");
        Some(None)
    }
}

impl From<&Value> for PreOutcome {
    fn from(value: &Value) -> Self {
        if let Some(code) = status(value) {
            return code.map_or(PreOutcome::Continue, PreOutcome::Respond);
        }
        match value {
            Value::String(s) if s == BREAK => PreOutcome::Break,
            Value::Bool(true) => PreOutcome::Use,
            Value::Bool(false) => PreOutcome::Skip,
            _ => PreOutcome::Continue,
        }
    }
}

impl From<&Value> for PostOutcome {
    fn from(value: &Value) -> Self {
        if let Some(code) = status(value) {
            return code.map_or(PostOutcome::Continue, PostOutcome::Respond);
        }
        match value {
            Value::String(s) if s == BREAK => PostOutcome::Break,
            _ => PostOutcome::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_outcomes() {
        assert_eq!(PreOutcome::from(&Value::Number(403.0)), PreOutcome::Respond(403));
        assert_eq!(PreOutcome::from(&Value::from("break")), PreOutcome::Break);
        assert_eq!(PreOutcome::from(&Value::Bool(true)), PreOutcome::Use);
        assert_eq!(PreOutcome::from(&Value::Bool(false)), PreOutcome::Skip);
        assert_eq!(PreOutcome::from(&Value::Null), PreOutcome::Continue);
        assert_eq!(PreOutcome::from(&Value::from("yes")), PreOutcome::Continue);
    }

    #[test]
    fn post_ignores_booleans() {
        assert_eq!(PostOutcome::from(&Value::Bool(false)), PostOutcome::Continue);
        assert_eq!(PostOutcome::from(&Value::Number(502.0)), PostOutcome::Respond(502));
        assert_eq!(PostOutcome::from(&Value::from("break")), PostOutcome::Break);
    }

    #[test]
    fn out_of_range_numbers_continue() {
        assert_eq!(PreOutcome::from(&Value::Number(0.0)), PreOutcome::Continue);
        assert_eq!(PreOutcome::from(&Value::Number(404.5)), PreOutcome::Continue);
        assert_eq!(PostOutcome::from(&Value::Number(1000.0)), PostOutcome::Continue);
    }
}
