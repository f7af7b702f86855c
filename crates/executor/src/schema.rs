//! Argument and return-value checks against a tool's declared schema.
//! Values are never coerced; a mismatch is the tool caller's error.

use serde_json::Value;
use toolsmith_core::{Arguments, ParamSpec, ParamType};

pub fn check_arguments(schema: &[ParamSpec], arguments: &Arguments) -> Result<(), String> {
    for param in schema {
        match arguments.get(&param.name) {
            None if param.required => {
                return Err(format!("TypeError: missing required argument '{}'", param.name));
            }
            None => {}
            Some(value) if !param.param_type.matches(value) => {
                return Err(format!(
                    "TypeError: argument '{}' must be {}, got {}",
                    param.name,
                    param.param_type,
                    json_type_name(value)
                ));
            }
            Some(_) => {}
        }
    }

    if let Some(unknown) = arguments
        .keys()
        .find(|key| !schema.iter().any(|p| &p.name == *key))
    {
        return Err(format!("TypeError: unexpected argument '{unknown}'"));
    }
    Ok(())
}

pub fn check_return(expected: Option<ParamType>, value: &Value) -> Result<(), String> {
    match expected {
        Some(ty) if !ty.matches(value) => Err(format!(
            "TypeError: return value must be {ty}, got {}",
            json_type_name(value)
        )),
        _ => Ok(()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    fn schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("a", ParamType::Integer),
            ParamSpec::optional("label", ParamType::String),
        ]
    }

    #[test]
    fn test_accepts_matching_arguments() {
        assert!(check_arguments(&schema(), &args(json!({"a": 1}))).is_ok());
        assert!(check_arguments(&schema(), &args(json!({"a": 1, "label": "x"}))).is_ok());
    }

    #[test]
    fn test_missing_unknown_and_mistyped() {
        let err = check_arguments(&schema(), &args(json!({}))).unwrap_err();
        assert!(err.contains("missing required argument 'a'"));

        let err = check_arguments(&schema(), &args(json!({"a": 1, "z": 2}))).unwrap_err();
        assert!(err.contains("unexpected argument 'z'"));

        let err = check_arguments(&schema(), &args(json!({"a": 1.5}))).unwrap_err();
        assert_eq!(err, "TypeError: argument 'a' must be integer, got number");
    }

    #[test]
    fn test_return_type() {
        assert!(check_return(None, &json!("anything")).is_ok());
        assert!(check_return(Some(ParamType::Number), &json!(3)).is_ok());
        let err = check_return(Some(ParamType::Array), &json!({"a": 1})).unwrap_err();
        assert_eq!(err, "TypeError: return value must be array, got object");
    }
}
