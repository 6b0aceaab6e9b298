//! Tree-walking evaluator.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Captures;

use super::parser::{BinaryOp, LogicalOp, Node, Property, TemplatePart, UnaryOp};
use super::value::{Closure, Function, Pattern, Value};
use super::EvalError;

struct Env<'a> {
    scope: &'a [Value],
    locals: &'a [(String, Value)],
}

pub(crate) fn evaluate(node: &Node, scope: &[Value]) -> Result<Value, EvalError> {
    eval(node, &Env { scope, locals: &[] })
}

pub(crate) fn call_closure(closure: &Closure, args: &[Value]) -> Result<Value, EvalError> {
    let mut locals = closure.locals.clone();
    for (i, param) in closure.def.params.iter().enumerate() {
        locals.push((param.clone(), args.get(i).cloned().unwrap_or_default()));
    }
    eval(&closure.def.body, &Env { scope: &closure.scope, locals: &locals })
}

fn eval(node: &Node, env: &Env<'_>) -> Result<Value, EvalError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Slot(i) => Ok(env.scope.get(*i).cloned().unwrap_or_default()),
        Node::Local(name) => Ok(env
            .locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()),
        Node::Tools => Ok(tools().clone()),
        Node::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Expr(node) => out.push_str(&eval(node, env)?.to_string()),
                }
            }
            Ok(Value::String(out))
        }
        Node::Array(items) => Ok(Value::Array(
            items.iter().map(|item| eval(item, env)).collect::<Result<_, _>>()?,
        )),
        Node::Object(entries) => {
            let mut map = BTreeMap::new();
            for (key, node) in entries {
                map.insert(key.clone(), eval(node, env)?);
            }
            Ok(Value::Object(map))
        }
        Node::Member { object, property, optional } => {
            let target = eval(object, env)?;
            if target.is_null() && *optional {
                return Ok(Value::Null);
            }
            let key = property_key(property, env)?;
            get_property(&target, &key)
        }
        Node::Call { callee, args, optional } => call(callee, args, *optional, env),
        Node::Unary { op, operand } => {
            let value = eval(operand, env)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
            })
        }
        Node::Binary { op, left, right } => {
            let left = eval(left, env)?;
            let right = eval(right, env)?;
            Ok(binary(*op, &left, &right))
        }
        Node::Logical { op, left, right } => {
            let left = eval(left, env)?;
            let short_circuit = match op {
                LogicalOp::And => !left.is_truthy(),
                LogicalOp::Or => left.is_truthy(),
                LogicalOp::Nullish => !left.is_null(),
            };
            if short_circuit {
                Ok(left)
            } else {
                eval(right, env)
            }
        }
        Node::Conditional { test, consequent, alternate } => {
            if eval(test, env)?.is_truthy() {
                eval(consequent, env)
            } else {
                eval(alternate, env)
            }
        }
        Node::Lambda(def) => Ok(Value::Function(Function::Lambda(Arc::new(Closure {
            def: Arc::clone(def),
            scope: Arc::from(env.scope),
            locals: env.locals.to_vec(),
        })))),
    }
}

fn property_key(property: &Property, env: &Env<'_>) -> Result<String, EvalError> {
    Ok(match property {
        Property::Named(name) => name.clone(),
        Property::Computed(node) => eval(node, env)?.to_string(),
    })
}

fn get_property(target: &Value, key: &str) -> Result<Value, EvalError> {
    match target {
        Value::Null => Err(EvalError::NullProperty { property: key.to_string() }),
        Value::String(s) if key == "length" => Ok(Value::Number(s.chars().count() as f64)),
        Value::String(s) => Ok(key
            .parse::<usize>()
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or_default()),
        Value::Array(items) if key == "length" => Ok(Value::Number(items.len() as f64)),
        Value::Pattern(p) if key == "source" => Ok(Value::string(p.source())),
        Value::Pattern(p) if key == "global" => Ok(Value::Bool(p.is_global())),
        other => Ok(other.get(key).cloned().unwrap_or_default()),
    }
}

fn call(callee: &Node, args: &[Node], optional: bool, env: &Env<'_>) -> Result<Value, EvalError> {
    let args: Vec<Value> = args.iter().map(|arg| eval(arg, env)).collect::<Result<_, _>>()?;

    if let Node::Member { object, property, optional: member_optional } = callee {
        let receiver = eval(object, env)?;
        if receiver.is_null() && (optional || *member_optional) {
            return Ok(Value::Null);
        }
        let name = property_key(property, env)?;
        if let Some(result) = builtin_method(&receiver, &name, &args) {
            return result;
        }
        return match get_property(&receiver, &name)? {
            Value::Function(f) => f.call(&args),
            Value::Null => Err(EvalError::UnknownMethod {
                receiver: receiver.type_name(),
                method: name,
            }),
            other => Err(EvalError::NotCallable(other.type_name().to_string())),
        };
    }

    match eval(callee, env)? {
        Value::Function(f) => f.call(&args),
        Value::Null if optional => Ok(Value::Null),
        other => Err(EvalError::NotCallable(other.type_name().to_string())),
    }
}

fn arg_str<'v>(args: &'v [Value], method: &str) -> Result<&'v str, EvalError> {
    args.first().and_then(Value::as_str).ok_or_else(|| EvalError::InvalidArgument {
        method: method.to_string(),
        reason: "expected a string argument".to_string(),
    })
}

fn arg_index(args: &[Value], i: usize, default: usize) -> usize {
    args.get(i)
        .and_then(Value::as_f64)
        .map(|n| if n.is_nan() || n < 0.0 { 0 } else { n as usize })
        .unwrap_or(default)
}

/// Built-in methods on strings, arrays and patterns. `None` means the
/// receiver has no built-in of that name.
fn builtin_method(receiver: &Value, name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    let result = match (receiver, name) {
        (Value::String(s), "startsWith") => arg_str(args, name).map(|a| Value::Bool(s.starts_with(a))),
        (Value::String(s), "endsWith") => arg_str(args, name).map(|a| Value::Bool(s.ends_with(a))),
        (Value::String(s), "includes") => arg_str(args, name).map(|a| Value::Bool(s.contains(a))),
        (Value::String(s), "indexOf") => arg_str(args, name).map(|a| {
            Value::Number(s.find(a).map(|i| s[..i].chars().count() as f64).unwrap_or(-1.0))
        }),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "trim") => Ok(Value::string(s.trim())),
        (Value::String(s), "toString") => Ok(Value::String(s.clone())),
        (Value::String(s), "substring") => {
            let chars: Vec<char> = s.chars().collect();
            let start = arg_index(args, 0, 0).min(chars.len());
            let end = arg_index(args, 1, chars.len()).min(chars.len());
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        (Value::String(s), "split") => Ok(Value::Array(match args.first() {
            Some(Value::Pattern(p)) => p.regex().split(s).map(Value::string).collect(),
            Some(Value::String(sep)) if sep.is_empty() => {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            }
            Some(Value::String(sep)) => s.split(sep.as_str()).map(Value::string).collect(),
            _ => vec![Value::String(s.clone())],
        })),
        (Value::String(s), "match") => match args.first() {
            Some(Value::Pattern(p)) => Ok(p
                .regex()
                .captures(s)
                .map(|caps| Value::Array(capture_values(&caps)))
                .unwrap_or_default()),
            _ => Err(EvalError::InvalidArgument {
                method: name.to_string(),
                reason: "expected a regular expression".to_string(),
            }),
        },
        (Value::String(s), "replace") => replace(
            s,
            args.first().unwrap_or(&Value::Null),
            args.get(1).unwrap_or(&Value::Null),
        )
        .map(Value::String),
        (Value::Array(items), "includes") => Ok(Value::Bool(
            items.iter().any(|item| args.first().is_some_and(|a| item.strict_eq(a))),
        )),
        (Value::Array(items), "indexOf") => Ok(Value::Number(
            items
                .iter()
                .position(|item| args.first().is_some_and(|a| item.strict_eq(a)))
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        )),
        (Value::Array(items), "join") => {
            let separator = args.first().and_then(Value::as_str).unwrap_or(",");
            Ok(Value::String(
                items.iter().map(ToString::to_string).collect::<Vec<_>>().join(separator),
            ))
        }
        (Value::Pattern(p), "test") => {
            let subject = args.first().map(ToString::to_string).unwrap_or_default();
            Ok(Value::Bool(p.regex().is_match(&subject)))
        }
        (Value::Number(_) | Value::Bool(_), "toString") => Ok(Value::String(receiver.to_string())),
        _ => return None,
    };
    Some(result)
}

fn capture_values(caps: &Captures<'_>) -> Vec<Value> {
    caps.iter()
        .map(|group| group.map(|m| Value::string(m.as_str())).unwrap_or_default())
        .collect()
}

/// Replace the first match (every match for global patterns) of `search`
/// in `text`.
///
/// `search` is a pattern or a literal string; a null or empty search
/// leaves the text unchanged. `replacement` is a string (patterns expand
/// `$1`, `${name}` and `$&`), a function receiving
/// `(match, ...groups, offset, input)`, or null for removal.
pub fn replace(text: &str, search: &Value, replacement: &Value) -> Result<String, EvalError> {
    match (search, replacement) {
        (Value::Pattern(pattern), Value::Function(f)) => replace_with_function(text, pattern, f),
        (Value::Pattern(pattern), replacement) => {
            let expansion = replacement_text(replacement).replace("$&", "${0}");
            let limit = if pattern.is_global() { 0 } else { 1 };
            Ok(pattern.regex().replacen(text, limit, expansion.as_str()).into_owned())
        }
        (Value::String(needle), _) if needle.is_empty() => Ok(text.to_string()),
        (Value::String(needle), Value::Function(f)) => match text.find(needle.as_str()) {
            None => Ok(text.to_string()),
            Some(offset) => {
                let args = [
                    Value::String(needle.clone()),
                    Value::Number(offset as f64),
                    Value::string(text),
                ];
                let inserted = f.call(&args)?.to_string();
                Ok(format!("{}{}{}", &text[..offset], inserted, &text[offset + needle.len()..]))
            }
        },
        (Value::String(needle), replacement) => {
            Ok(text.replacen(needle.as_str(), &replacement_text(replacement), 1))
        }
        (Value::Null, _) => Ok(text.to_string()),
        (other, _) => Err(EvalError::InvalidArgument {
            method: "replace".to_string(),
            reason: format!("cannot search with a {}", other.type_name()),
        }),
    }
}

fn replacement_text(replacement: &Value) -> String {
    match replacement {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn replace_with_function(text: &str, pattern: &Pattern, f: &Function) -> Result<String, EvalError> {
    let mut failure = None;
    let limit = if pattern.is_global() { 0 } else { 1 };
    let replaced = pattern.regex().replacen(text, limit, |caps: &Captures<'_>| {
        if failure.is_some() {
            return String::new();
        }
        let mut args = capture_values(caps);
        let offset = caps.get(0).map(|m| m.start()).unwrap_or_default();
        args.push(Value::Number(offset as f64));
        args.push(Value::string(text));
        match f.call(&args) {
            Ok(value) => value.to_string(),
            Err(e) => {
                failure = Some(e);
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(replaced.into_owned()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Pattern(_), _)
            | (_, Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Pattern(_)) => {
                Value::String(format!("{left}{right}"))
            }
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            Value::Bool(ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            }))
        }
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_eq(right)),
    }
}

/// The `Tools` utility object available to every expression.
fn tools() -> &'static Value {
    static TOOLS: OnceLock<Value> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let represent = Function::native(|args| {
            let value = args.first().cloned().unwrap_or_default();
            Ok(Value::String(match value {
                Value::String(s) => s,
                other => other.to_json().to_string(),
            }))
        });
        let mut map = BTreeMap::new();
        map.insert("represent".to_string(), Value::Function(represent.clone()));
        map.insert("stringify".to_string(), Value::Function(represent));
        Value::Object(map)
    })
}
