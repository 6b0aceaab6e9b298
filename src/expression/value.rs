//! Runtime values produced and consumed by compiled expressions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::eval;
use super::parser::LambdaDef;
use super::EvalError;

/// Native function callable from an expression.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// A dynamically typed expression value.
///
/// `undefined` and `null` both collapse into [`Value::Null`].
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Pattern(Pattern),
    Function(Function),
}

/// A compiled regular expression together with its replace mode.
#[derive(Clone)]
pub struct Pattern {
    regex: Regex,
    source: String,
    flags: String,
}

impl Pattern {
    /// Build a pattern from its source and JavaScript-style flags.
    ///
    /// Supported flags: `g` (replace every match), `i`, `m`, `s`.
    ///
    /// CRLF mode is always on, so `.` stops at `\r` and `^`/`$` in
    /// multi-line mode treat `\r\n` as one line terminator.
    pub fn new(source: &str, flags: &str) -> Result<Self, regex::Error> {
        let mut inline = String::from("R");
        for flag in ['i', 'm', 's'] {
            if flags.contains(flag) {
                inline.push(flag);
            }
        }
        let full = format!("(?{inline}){source}");
        Ok(Self {
            regex: Regex::new(&full)?,
            source: source.to_string(),
            flags: flags.to_string(),
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Whether every match is replaced instead of only the first one.
    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

/// A callable value: an arrow function from an expression or a native closure.
#[derive(Clone)]
pub enum Function {
    Lambda(Arc<Closure>),
    Native(NativeFn),
}

/// Arrow function plus the environment it was created in.
pub struct Closure {
    pub(crate) def: Arc<LambdaDef>,
    pub(crate) scope: Arc<[Value]>,
    pub(crate) locals: Vec<(String, Value)>,
}

impl Function {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Function::Native(Arc::new(f))
    }

    /// Invoke the function with positional arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        match self {
            Function::Native(f) => f(args),
            Function::Lambda(closure) => eval::call_closure(closure, args),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Lambda(closure) => write!(f, "[function({})]", closure.def.params.join(", ")),
            Function::Native(_) => f.write_str("[native function]"),
        }
    }
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    /// JavaScript truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Pattern(_) => "regexp",
            Value::Function(_) => "function",
        }
    }

    /// Property lookup; missing properties read as `Null`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Numeric coercion as used by arithmetic and relational operators.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Lossy conversion into JSON; patterns become their source text and
    /// functions become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Function(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(|number| {
                    if n.fract() == 0.0 && n.abs() < 9.0e15 {
                        serde_json::Value::from(*n as i64)
                    } else {
                        serde_json::Value::Number(number)
                    }
                })
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Pattern(p) => serde_json::Value::String(p.to_string()),
        }
    }

    /// Strict (`===`) equality. Arrays and objects compare structurally.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.strict_eq(w)))
            }
            (Value::Pattern(a), Value::Pattern(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }

    /// Loose (`==`) equality with number/string/bool coercion.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "{}", self.to_json()),
            Value::Pattern(p) => write!(f, "{p}"),
            Value::Function(func) => write!(f, "{func:?}"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        Value::from(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map(Value::String).unwrap_or(Value::Null)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Object(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn json_conversion_keeps_integers() {
        let value = Value::from(json!({"status": 200, "ok": true, "tags": ["a"]}));
        assert_eq!(value.to_json(), json!({"status": 200, "ok": true, "tags": ["a"]}));
        assert_eq!(value.get("status").map(ToString::to_string).as_deref(), Some("200"));
    }

    #[test]
    fn loose_equality_coerces_numbers() {
        assert!(Value::from("42").loose_eq(&Value::Number(42.0)));
        assert!(!Value::from("42").strict_eq(&Value::Number(42.0)));
        assert!(!Value::Null.loose_eq(&Value::Bool(false)));
    }

    #[test]
    fn pattern_flags_map_to_inline_flags() {
        let pattern = Pattern::new("host: .*", "gi").unwrap();
        assert!(pattern.regex().is_match("Host: example"));
        assert!(pattern.is_global());
        assert_eq!(pattern.to_string(), "/host: .*/gi");
    }

    #[test]
    fn patterns_treat_crlf_as_line_end() {
        let dot = Pattern::new("Host: .*", "").unwrap();
        assert_eq!(dot.regex().find("Host: a\r\nX: b").unwrap().as_str(), "Host: a");

        let anchored = Pattern::new("^X-Debug: .*$", "m").unwrap();
        assert_eq!(
            anchored.regex().find("GET / HTTP/1.1\r\nX-Debug: on\r\n\r\n").unwrap().as_str(),
            "X-Debug: on"
        );
    }
}
