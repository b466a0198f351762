//! Layer 1 — Auto-Wirer (C4): pure, LLM-free parameter binding, §4.3.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use swarm_kernel::capability::{Capability, ParamMap, Parameter, ParameterType};
use swarm_kernel::plan::ParamValue;

/// Resolve `{{<sid>.response.<a.b.c>}}` against the step's source data
/// (P8). Missing fields yield `Value::Null`, never the literal template
/// string.
pub fn resolve_template(template: &str, source_data: &HashMap<String, Value>) -> Value {
    let Some(inner) = template.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) else {
        return Value::Null;
    };
    let mut parts = inner.split('.');
    let Some(step_id) = parts.next() else { return Value::Null };
    if parts.next() != Some("response") {
        return Value::Null;
    }

    let Some(mut current) = source_data.get(step_id) else { return Value::Null };
    for segment in parts {
        match current {
            Value::Object(map) => match map.iter().find(|(k, _)| k.eq_ignore_ascii_case(segment)) {
                Some((_, v)) => current = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

fn is_scalar_value(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// Coercion: string <-> number, string <-> boolean, singleton-array ->
/// scalar when the schema says scalar.
pub fn coerce(value: &Value, param_type: ParameterType) -> Option<Value> {
    match (param_type, value) {
        (ParameterType::String, Value::String(s)) => Some(Value::String(s.clone())),
        (ParameterType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParameterType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ParameterType::Number, Value::Number(n)) => Some(Value::Number(n.clone())),
        (ParameterType::Number, Value::String(s)) => {
            s.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
        }
        (ParameterType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(Value::Number(n.clone())),
        (ParameterType::Integer, Value::String(s)) => s.parse::<i64>().ok().map(|i| Value::Number(i.into())),
        (ParameterType::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
        (ParameterType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParameterType::Array, Value::Array(a)) => Some(Value::Array(a.clone())),
        (ParameterType::Object, Value::Object(o)) => Some(Value::Object(o.clone())),
        (pt, Value::Array(a)) if pt.is_scalar() && a.len() == 1 => coerce(&a[0], pt),
        _ => None,
    }
}

/// When a matched value is a nested object and the parameter expects a
/// scalar: extract the first scalar field whose name matches `P.name` or
/// `P.type`, falling back to the first scalar field at all (§4.3 step 3).
fn extract_scalar_from_object(obj: &Map<String, Value>, param: &Parameter) -> Option<Value> {
    if let Some((_, v)) = obj.iter().find(|(k, v)| k.eq_ignore_ascii_case(&param.name) && is_scalar_value(v)) {
        return Some(v.clone());
    }
    let type_name = format!("{:?}", param.param_type).to_lowercase();
    if let Some((_, v)) = obj.iter().find(|(k, v)| k.eq_ignore_ascii_case(&type_name) && is_scalar_value(v)) {
        return Some(v.clone());
    }
    obj.values().find(|v| is_scalar_value(v)).cloned()
}

fn find_field_any_depth<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some((_, v)) = map.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                return Some(v);
            }
            map.values().find_map(|v| find_field_any_depth(v, name))
        }
        Value::Array(arr) => arr.iter().find_map(|v| find_field_any_depth(v, name)),
        _ => None,
    }
}

fn accept_value(raw: &Value, param: &Parameter) -> Option<Value> {
    if let Some(coerced) = coerce(raw, param.param_type) {
        return Some(coerced);
    }
    if let Value::Object(obj) = raw {
        if param.param_type.is_scalar() {
            return extract_scalar_from_object(obj, param);
        }
    }
    None
}

/// Run Layer 1 over every declared parameter of `capability`. Returns the
/// resolved map, the set of still-missing *required* parameter names for
/// Layer 2 to pick up, and the subset of resolved keys that came from
/// scanning `source_data` rather than from the step's own declared
/// literal/template value.
///
/// Only that scanned subset is "auto-wired" in the P4 sense: a value the
/// planner declared itself (even a placeholder like `amount: 0`) is the
/// plan's own choice, not something this layer invented, so later layers
/// remain free to correct it.
pub fn auto_wire(
    capability: &Capability,
    declared: &HashMap<String, ParamValue>,
    source_data: &HashMap<String, Value>,
) -> (ParamMap, HashSet<String>, HashSet<String>) {
    let mut resolved = ParamMap::new();
    let mut missing_required = HashSet::new();
    let mut auto_wired_keys = HashSet::new();

    let mut source_keys: Vec<&String> = source_data.keys().collect();
    source_keys.sort();

    for param in &capability.parameters {
        let mut accepted = None;

        if let Some(declared_value) = declared.get(&param.name) {
            let raw = match declared_value {
                ParamValue::Literal(v) => Some(v.clone()),
                ParamValue::Template(t) => {
                    let resolved = resolve_template(t, source_data);
                    (!resolved.is_null()).then_some(resolved)
                }
            };
            if let Some(raw) = raw {
                accepted = accept_value(&raw, param);
            }
        }

        if accepted.is_none() {
            for key in &source_keys {
                if let Some(found) = find_field_any_depth(&source_data[*key], &param.name) {
                    if let Some(v) = accept_value(found, param) {
                        accepted = Some(v);
                        auto_wired_keys.insert(param.name.clone());
                        break;
                    }
                }
            }
        }

        match accepted {
            Some(v) => {
                resolved.insert(param.name.clone(), v);
            }
            None if param.required => {
                missing_required.insert(param.name.clone());
            }
            None => {}
        }
    }

    (resolved, missing_required, auto_wired_keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_kernel::capability::Capability;

    fn source() -> HashMap<String, Value> {
        HashMap::from([("step-1".to_string(), serde_json::json!({"response": {"price": 468.285, "currency": {"code": "USD", "name": "US Dollar"}}}))])
    }

    #[test]
    fn template_resolves_dotted_path_case_insensitively() {
        let v = resolve_template("{{step-1.response.Price}}", &source());
        assert_eq!(v, serde_json::json!(468.285));
    }

    #[test]
    fn template_resolves_to_null_for_missing_field_not_literal_string() {
        let v = resolve_template("{{step-1.response.bogus}}", &source());
        assert!(v.is_null());
    }

    #[test]
    fn scans_source_data_for_matching_field_name_at_any_depth() {
        let capability = Capability::new("convert", "/convert").with_parameter(Parameter::new("price", ParameterType::Number, true));
        let (resolved, missing, locked) = auto_wire(&capability, &HashMap::new(), &source());
        assert_eq!(resolved["price"], serde_json::json!(468.285));
        assert!(missing.is_empty());
        assert!(locked.contains("price"));
    }

    #[test]
    fn nested_object_scalar_extraction_heuristic() {
        let capability = Capability::new("convert", "/convert").with_parameter(Parameter::new("code", ParameterType::String, true));
        let (resolved, _, locked) = auto_wire(&capability, &HashMap::new(), &source());
        assert_eq!(resolved["code"], serde_json::json!("USD"));
        assert!(locked.contains("code"));
    }

    #[test]
    fn missing_required_param_is_reported() {
        let capability = Capability::new("convert", "/convert").with_parameter(Parameter::new("symbol", ParameterType::String, true));
        let (resolved, missing, _) = auto_wire(&capability, &HashMap::new(), &source());
        assert!(resolved.get("symbol").is_none());
        assert!(missing.contains("symbol"));
    }

    #[test]
    fn literal_declared_value_takes_priority_over_source_scan() {
        let capability = Capability::new("convert", "/convert").with_parameter(Parameter::new("price", ParameterType::Number, true));
        let declared = HashMap::from([("price".to_string(), ParamValue::Literal(serde_json::json!(1.0)))]);
        let (resolved, _, locked) = auto_wire(&capability, &declared, &source());
        assert_eq!(resolved["price"], serde_json::json!(1.0));
        assert!(!locked.contains("price"), "a planner-declared literal is not locked by P4 — only genuine source-data auto-wiring is");
    }

    #[test]
    fn declared_placeholder_literal_is_not_locked_and_can_be_corrected_later() {
        let capability = Capability::new("convert-currency", "/convert")
            .with_parameter(Parameter::new("amount", ParameterType::Number, true));
        let declared = HashMap::from([("amount".to_string(), ParamValue::Literal(serde_json::json!(0)))]);
        let (resolved, missing, locked) = auto_wire(&capability, &declared, &HashMap::new());
        assert_eq!(resolved["amount"], serde_json::json!(0));
        assert!(missing.is_empty());
        assert!(!locked.contains("amount"));
    }
}
