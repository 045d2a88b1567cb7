use serde_json::{Map, Value};

/// Opaque key → value map carried as task input, agent output and context.
pub type Payload = Map<String, Value>;

/// Look up a dotted path (`"alignment.score"`) inside a payload.
///
/// Each segment indexes an object; a numeric segment also indexes an array.
pub fn get_path<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = payload.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Shallow-merge `other` into `base`. Keys in `other` win.
pub fn merge(base: &mut Payload, other: &Payload) {
    for (key, value) in other {
        base.insert(key.clone(), value.clone());
    }
}

/// Read a boolean field, accepting `true`/`false` and the strings `"true"`/`"false"`.
pub fn get_bool(payload: &Payload, key: &str) -> Option<bool> {
    match payload.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a numeric field, accepting JSON numbers and numeric strings.
pub fn get_f64(payload: &Payload, key: &str) -> Option<f64> {
    as_f64(payload.get(key)?)
}

/// Interpret a JSON value as a number. Strings may carry a trailing `%`.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}
