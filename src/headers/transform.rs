//! Applies header rules to a raw header block.

use crate::expression::{self, EvalError, Value};
use crate::observability::metrics;
use crate::state::scope::EvaluationScope;

use super::rule::HeaderRule;

/// Apply `rules` in order to `block`. Each rule sees the output of the
/// previous one; a failing rule is logged and leaves the text untouched.
pub fn transform(block: &str, rules: &[HeaderRule], scope: &EvaluationScope) -> String {
    let mut content = block.to_string();
    for rule in rules {
        match apply(&content, rule, scope) {
            Ok(Some(next)) => content = next,
            Ok(None) => {}
            Err(error) => {
                metrics::record_header_rule_failure();
                tracing::warn!(rule = %rule, error = %error, "Could not apply header transformation");
            }
        }
    }
    content
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn apply(content: &str, rule: &HeaderRule, scope: &EvaluationScope) -> Result<Option<String>, EvalError> {
    let source = rule.evaluate_source(scope)?;
    let target = rule.evaluate_target(scope)?;

    if is_blank(&source) {
        if is_blank(&target) {
            return Ok(None);
        }
        let line = match &target {
            Value::Function(f) => f.call(&[])?.to_string(),
            other => other.to_string(),
        };
        return Ok(insert_line(content, &line));
    }

    tracing::debug!(source = %source, target = %target, "Search and replace header");
    expression::replace(content, &source, &target).map(Some)
}

/// Insert `line` directly before the blank line that ends the header
/// block, reusing the block's own line ending. Without a terminator the
/// block is left alone.
pub fn insert_line(content: &str, line: &str) -> Option<String> {
    let (at, eol) = match (content.find("\r\n\r\n"), content.find("\n\n")) {
        (Some(crlf), Some(lf)) if lf < crlf => (lf, "\n"),
        (Some(crlf), _) => (crlf, "\r\n"),
        (None, Some(lf)) => (lf, "\n"),
        (None, None) => return None,
    };
    let mut out = String::with_capacity(content.len() + line.len() + eol.len());
    out.push_str(&content[..at]);
    out.push_str(eol);
    out.push_str(line);
    out.push_str(&content[at..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Expression, Pattern};
    use crate::headers::rule::{HeaderSource, HeaderTarget};
    use crate::state::scope::EVALUATION_SCOPE_NAMES;

    const BLOCK: &str = "GET / HTTP/1.1\r\nHost: proxy.local\r\nAccept: */*\r\n\r\nbody";

    fn expression(source: &str) -> Expression {
        Expression::compile(source, &EVALUATION_SCOPE_NAMES).unwrap()
    }

    #[test]
    fn insert_places_line_before_separator_once() {
        let rules = [HeaderRule::insert("X-Test: 1")];
        let out = transform(BLOCK, &rules, &EvaluationScope::default());
        assert_eq!(
            out,
            "GET / HTTP/1.1\r\nHost: proxy.local\r\nAccept: */*\r\nX-Test: 1\r\n\r\nbody"
        );
        assert_eq!(out.matches("X-Test: 1").count(), 1);
    }

    #[test]
    fn insert_uses_bare_newlines_when_block_does() {
        let out = insert_line("GET / HTTP/1.1\nHost: a\n\n", "X: 1").unwrap();
        assert_eq!(out, "GET / HTTP/1.1\nHost: a\nX: 1\n\n");
        assert!(insert_line("GET / HTTP/1.1\r\nHost: a", "X: 1").is_none());
    }

    #[test]
    fn pattern_replacement_is_idempotent() {
        let rule = HeaderRule::replace(Pattern::new("Host: [^\\r\\n]*", "").unwrap(), "Host: backend");
        let scope = EvaluationScope::default();
        let once = transform(BLOCK, std::slice::from_ref(&rule), &scope);
        assert!(once.contains("Host: backend\r\nAccept"));
        assert_eq!(transform(&once, std::slice::from_ref(&rule), &scope), once);
    }

    #[test]
    fn dot_pattern_keeps_crlf_line_endings() {
        let rules = [HeaderRule::new(
            HeaderSource::Expression(expression("/Host: .*/")),
            HeaderTarget::Literal("Host: backend".into()),
        )];
        let out = transform(BLOCK, &rules, &EvaluationScope::default());
        assert_eq!(out, "GET / HTTP/1.1\r\nHost: backend\r\nAccept: */*\r\n\r\nbody");
    }

    #[test]
    fn blank_source_and_target_is_a_no_op() {
        let rules = [HeaderRule::new(
            HeaderSource::Expression(expression("''")),
            HeaderTarget::Expression(expression("null")),
        )];
        assert_eq!(transform(BLOCK, &rules, &EvaluationScope::default()), BLOCK);
    }

    #[test]
    fn absent_target_removes_match() {
        let rules = [HeaderRule::new(
            HeaderSource::Pattern(Pattern::new("Accept: [^\\r\\n]*\\r\\n", "i").unwrap()),
            HeaderTarget::Remove,
        )];
        let out = transform(BLOCK, &rules, &EvaluationScope::default());
        assert_eq!(out, "GET / HTTP/1.1\r\nHost: proxy.local\r\n\r\nbody");
    }

    #[test]
    fn failing_rule_does_not_stop_later_rules() {
        let rules = [
            HeaderRule::new(
                HeaderSource::Expression(expression("data.missing.pattern")),
                HeaderTarget::Literal("x".into()),
            ),
            HeaderRule::insert("X-After: yes"),
        ];
        let out = transform(BLOCK, &rules, &EvaluationScope::default());
        assert!(out.contains("X-After: yes\r\n\r\n"));
    }

    #[test]
    fn expressions_see_scope_and_replacement_functions() {
        let scope = EvaluationScope {
            data: Value::from(serde_json::json!({"user": "ada"})),
            ..Default::default()
        };
        let rules = [
            HeaderRule::new(
                HeaderSource::Expression(expression("/accept: (.*)/i")),
                HeaderTarget::Expression(expression("(m, value) => `Accept: ${value.toUpperCase()}`")),
            ),
            HeaderRule::new(
                HeaderSource::Insert,
                HeaderTarget::Expression(expression("`X-User: ${data.user}`")),
            ),
        ];
        let out = transform(BLOCK, &rules, &scope);
        assert!(out.contains("Accept: */*\r\n"));
        assert!(out.contains("X-User: ada\r\n\r\n"));
    }
}
