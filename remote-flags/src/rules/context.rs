use serde_json::Value;

use super::errors::LookupError;

/// Resolves a dot separated path against a context.
///
/// Objects are stepped into by key, arrays by integer index (negative
/// indices count from the end). Anything else along the path is an error
/// naming the segment that could not be resolved.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Result<&'a Value, LookupError> {
    path.split('.').try_fold(context, step)
}

fn step<'a>(current: &'a Value, segment: &str) -> Result<&'a Value, LookupError> {
    match current {
        Value::Object(map) => map
            .get(segment)
            .ok_or_else(|| LookupError::KeyNotFound(segment.to_string())),
        Value::Array(items) => {
            let index = parse_index(segment).ok_or_else(|| LookupError::Unresolvable {
                segment: segment.to_string(),
                kind: kind_of(current),
            })?;
            let resolved = match index {
                Index::FromStart(i) => Some(i),
                Index::FromEnd(i) => items.len().checked_sub(i),
                Index::Overflow => None,
            };
            resolved
                .and_then(|i| items.get(i))
                .ok_or_else(|| LookupError::IndexOutOfRange(segment.to_string()))
        }
        other => Err(LookupError::Unresolvable {
            segment: segment.to_string(),
            kind: kind_of(other),
        }),
    }
}

enum Index {
    FromStart(usize),
    FromEnd(usize),
    Overflow,
}

fn parse_index(segment: &str) -> Option<Index> {
    let (negative, digits) = match segment.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, segment),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = match digits.parse::<usize>() {
        Ok(index) => index,
        Err(_) => return Some(Index::Overflow),
    };
    Some(match (negative, index) {
        // "-0" addresses the first element, like a plain 0
        (true, 0) | (false, _) => Index::FromStart(index),
        (true, _) => Index::FromEnd(index),
    })
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_lookup_nested_keys() {
        let context = json!({"pie": {"filling": "apple"}});
        assert_eq!(lookup(&context, "pie.filling").unwrap(), &json!("apple"));
    }

    #[test]
    fn test_lookup_missing_key_names_the_segment() {
        let context = json!({"pie": {"some": "apple"}});
        let err = lookup(&context, "pie.filling").unwrap_err();
        assert_eq!(err.to_string(), "Invalid context: key 'filling' not found");
    }

    #[test]
    fn test_lookup_array_indices() {
        let context = json!({"rating": [10, 20, 30]});
        assert_eq!(lookup(&context, "rating.0").unwrap(), &json!(10));
        assert_eq!(lookup(&context, "rating.-1").unwrap(), &json!(30));
        assert_eq!(lookup(&context, "rating.-0").unwrap(), &json!(10));
    }

    #[test]
    fn test_lookup_index_out_of_range() {
        let context = json!({"rating": []});
        let err = lookup(&context, "rating.0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid context: key '0': list index out of range"
        );

        let context = json!({"rating": [1, 2]});
        assert!(matches!(
            lookup(&context, "rating.-3"),
            Err(LookupError::IndexOutOfRange(_))
        ));
        assert!(matches!(
            lookup(&context, "rating.99999999999999999999999"),
            Err(LookupError::IndexOutOfRange(_))
        ));
    }

    #[test]
    fn test_lookup_through_scalar_is_an_error() {
        let context = json!({"temp": 5, "rating": [1]});
        assert_eq!(
            lookup(&context, "temp.celsius").unwrap_err(),
            LookupError::Unresolvable {
                segment: "celsius".to_string(),
                kind: "number"
            }
        );
        assert_eq!(
            lookup(&context, "rating.first").unwrap_err(),
            LookupError::Unresolvable {
                segment: "first".to_string(),
                kind: "array"
            }
        );
    }
}
