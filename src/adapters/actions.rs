//! Evaluator for stub [`Action`]s.
//!
//! Actions run after the body is rendered, in declaration order, against the
//! scenario working memory (`state.`) and the response body (`body.`). String
//! values containing template tags are rendered with the current context first.

use crate::domain::stub::Action;
use crate::domain::EngineError;
use serde_json::{json, Map, Value};
use tera::{Context, Tera};

pub const NAMED_FUNCTIONS: [&str; 10] = [
    "increment", "decrement", "append", "remove", "length", "upper", "lower", "uuid", "now", "sum",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    State,
    Body,
}

/// Registration-time check: target syntax and function name
pub fn validate(action: &Action) -> Result<(), EngineError> {
    parse_target(action.target())?;
    if let Action::InvokeNamedFunction { function, .. } = action {
        if !NAMED_FUNCTIONS.contains(&function.as_str()) {
            return Err(EngineError::validation(format!(
                "unknown function '{}', expected one of {}",
                function,
                NAMED_FUNCTIONS.join(", ")
            )));
        }
    }
    Ok(())
}

/// Apply one action. `context` is the request context; `state` and `response`
/// are refreshed from the arguments before any template is rendered.
pub fn apply(
    action: &Action,
    state: &mut Map<String, Value>,
    body: &mut Value,
    context: &Context,
) -> Result<(), EngineError> {
    let (root, segments) = parse_target(action.target())?;

    let mut context = context.clone();
    context.insert("state", &*state);
    context.insert("response", &*body);

    let value = match action {
        Action::SetField { value, .. } => render_value(value, &context)?,
        Action::Concatenate { parts, separator, .. } => {
            let parts = parts
                .iter()
                .map(|part| render_value(part, &context).map(|v| plain_text(&v)))
                .collect::<Result<Vec<_>, _>>()?;
            Value::String(parts.join(separator))
        }
        Action::InvokeNamedFunction { function, args, .. } => {
            let args = args
                .iter()
                .map(|arg| render_value(arg, &context))
                .collect::<Result<Vec<_>, _>>()?;
            let current = match root {
                Root::State => get_path(state, &segments),
                Root::Body => get_value_path(body, &segments),
            };
            invoke(function, current.unwrap_or(&Value::Null), &args)?
        }
    };

    match root {
        Root::State => set_path(state, &segments, value),
        Root::Body => {
            if segments.is_empty() {
                *body = value;
                Ok(())
            } else {
                if body.is_null() {
                    *body = Value::Object(Map::new());
                }
                let object = body.as_object_mut().ok_or_else(|| {
                    EngineError::Render(format!("cannot set '{}' on a non-object body", action.target()))
                })?;
                set_path(object, &segments, value)
            }
        }
    }
}

/// Render `template` and parse the output as JSON when possible
pub fn render_template(template: &str, context: &Context) -> Result<Value, EngineError> {
    let rendered = Tera::one_off(template, context, false)?;
    Ok(serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered)))
}

fn render_value(value: &Value, context: &Context) -> Result<Value, EngineError> {
    match value {
        Value::String(s) if s.contains("{{") || s.contains("{%") => render_template(s, context),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, field) in fields {
                out.insert(key.clone(), render_value(field, context)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn parse_target(target: &str) -> Result<(Root, Vec<&str>), EngineError> {
    let (root, rest) = match target.split_once('.') {
        Some(("state", rest)) => (Root::State, Some(rest)),
        Some(("body", rest)) => (Root::Body, Some(rest)),
        None if target == "body" => (Root::Body, None),
        _ => {
            return Err(EngineError::validation(format!(
                "action target '{}' must start with 'state.' or 'body.'",
                target
            )))
        }
    };
    let segments: Vec<&str> = rest.map(|r| r.split('.').collect()).unwrap_or_default();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(EngineError::validation(format!("action target '{}' has an empty segment", target)));
    }
    Ok((root, segments))
}

fn get_path<'a>(root: &'a Map<String, Value>, segments: &[&str]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let value = root.get(*first)?;
    if rest.is_empty() {
        Some(value)
    } else {
        get_value_path(value, rest)
    }
}

fn get_value_path<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| current.as_object()?.get(*segment))
}

/// Insert `value` at `segments`, creating intermediate objects as needed
fn set_path(root: &mut Map<String, Value>, segments: &[&str], value: Value) -> Result<(), EngineError> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(EngineError::Render("action target has no field".to_string()));
    };
    let mut current = root;
    for segment in parents {
        current = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| EngineError::Render(format!("expected object at path segment: {}", segment)))?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn invoke(function: &str, current: &Value, args: &[Value]) -> Result<Value, EngineError> {
    match function {
        "increment" => add(current, args.first().unwrap_or(&json!(1)), 1),
        "decrement" => add(current, args.first().unwrap_or(&json!(1)), -1),
        "append" => {
            let mut items = as_list(current, function)?;
            items.extend(args.iter().cloned());
            Ok(Value::Array(items))
        }
        "remove" => match current {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                for arg in args {
                    fields.remove(&plain_text(arg));
                }
                Ok(Value::Object(fields))
            }
            _ => {
                let mut items = as_list(current, function)?;
                items.retain(|item| !args.contains(item));
                Ok(Value::Array(items))
            }
        },
        "length" => {
            let subject = args.first().unwrap_or(current);
            let len = match subject {
                Value::Null => 0,
                Value::Array(items) => items.len(),
                Value::Object(fields) => fields.len(),
                Value::String(s) => s.chars().count(),
                other => {
                    return Err(EngineError::Render(format!("length of a non-collection value {}", other)))
                }
            };
            Ok(json!(len))
        }
        "upper" => Ok(Value::String(plain_text(args.first().unwrap_or(current)).to_uppercase())),
        "lower" => Ok(Value::String(plain_text(args.first().unwrap_or(current)).to_lowercase())),
        "uuid" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
        "now" => Ok(Value::String(chrono::Utc::now().to_rfc3339())),
        "sum" => {
            let mut total = json!(0);
            for arg in args {
                match arg {
                    Value::Array(items) => {
                        for item in items {
                            total = add(&total, item, 1)?;
                        }
                    }
                    other => total = add(&total, other, 1)?,
                }
            }
            Ok(total)
        }
        other => Err(EngineError::validation(format!("unknown function '{}'", other))),
    }
}

/// `current + sign * step`, staying integral when both sides are integers
fn add(current: &Value, step: &Value, sign: i64) -> Result<Value, EngineError> {
    let zero = json!(0);
    let current = if current.is_null() { &zero } else { current };
    if let (Some(a), Some(b)) = (current.as_i64(), step.as_i64()) {
        if let Some(result) = b.checked_mul(sign).and_then(|delta| a.checked_add(delta)) {
            return Ok(json!(result));
        }
    }
    match (current.as_f64(), step.as_f64()) {
        (Some(a), Some(b)) => Ok(json!(a + b * sign as f64)),
        _ => Err(EngineError::Render(format!(
            "cannot do arithmetic on {} and {}",
            current, step
        ))),
    }
}

fn as_list(value: &Value, function: &str) -> Result<Vec<Value>, EngineError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.clone()),
        other => Err(EngineError::Render(format!("{} expects an array, found {}", function, other))),
    }
}
