// Renderability check for the `{root, elements}` UI spec documents the
// `render_ui` tool produces. The renderer itself is an external
// collaborator; the step policy only needs to know whether a retry is due.

use serde_json::Value;

/// True when the tool output carries a spec the external renderer can draw:
/// a non-empty `elements` map, a `root` key present in that map, and a
/// `type` on the root element. A spec the tool auto-repaired
/// (`recoveredFromInvalidSpec`) does not count; the retry loop must not be
/// satisfied by a degraded repair.
pub fn is_renderable_spec(output: &Value) -> bool {
    let spec = match output.get("spec") {
        Some(inner) => inner,
        None => output,
    };

    if flagged_recovered(output) || flagged_recovered(spec) {
        return false;
    }

    let root = match spec.get("root").and_then(Value::as_str) {
        Some(r) if !r.is_empty() => r,
        _ => return false,
    };
    let elements = match spec.get("elements").and_then(Value::as_object) {
        Some(e) if !e.is_empty() => e,
        _ => return false,
    };
    let root_element = match elements.get(root) {
        Some(el) => el,
        None => return false,
    };
    matches!(root_element.get("type").and_then(Value::as_str), Some(t) if !t.is_empty())
}

fn flagged_recovered(value: &Value) -> bool {
    value
        .get("recoveredFromInvalidSpec")
        .map(|v| v.as_bool().unwrap_or(true))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_spec() -> Value {
        json!({
            "spec": {
                "root": "main",
                "elements": {
                    "main": {"type": "stack", "children": ["title"]},
                    "title": {"type": "text", "value": "Hello"}
                }
            }
        })
    }

    #[test]
    fn accepts_well_formed_spec() {
        assert!(is_renderable_spec(&valid_spec()));
    }

    #[test]
    fn accepts_bare_spec_without_wrapper() {
        let spec = valid_spec()["spec"].clone();
        assert!(is_renderable_spec(&spec));
    }

    #[test]
    fn rejects_missing_root_entry() {
        let out = json!({"spec": {"root": "missing", "elements": {"main": {"type": "stack"}}}});
        assert!(!is_renderable_spec(&out));
    }

    #[test]
    fn rejects_empty_elements() {
        let out = json!({"spec": {"root": "main", "elements": {}}});
        assert!(!is_renderable_spec(&out));
    }

    #[test]
    fn rejects_untyped_root_element() {
        let out = json!({"spec": {"root": "main", "elements": {"main": {"children": []}}}});
        assert!(!is_renderable_spec(&out));
    }

    #[test]
    fn rejects_recovered_spec() {
        let mut out = valid_spec();
        out["recoveredFromInvalidSpec"] = json!(true);
        assert!(!is_renderable_spec(&out));

        let mut out = valid_spec();
        out["spec"]["recoveredFromInvalidSpec"] = json!(true);
        assert!(!is_renderable_spec(&out));
    }

    #[test]
    fn recovered_false_still_renderable() {
        let mut out = valid_spec();
        out["recoveredFromInvalidSpec"] = json!(false);
        assert!(is_renderable_spec(&out));
    }
}
