//! Named-placeholder merge of caller data into markup.
//!
//! Placeholders look like `{{invoice_number}}` and are substituted from the
//! job's `data` object before the markup is handed to the browser. This is
//! deliberately not a full template engine: a merge problem must never abort
//! a render, so any failure falls back to the unmerged markup and is logged.

use serde_json::Value;
use tracing::{debug, warn};

/// Merge `data` into `markup`, replacing `{{key}}` placeholders.
///
/// String values are inserted verbatim; other JSON values use their compact
/// JSON form. Placeholders with no matching key are left untouched. If `data`
/// is not an object the merge is skipped entirely.
pub fn merge(markup: &str, data: Option<&Value>) -> String {
    let Some(data) = data else {
        return markup.to_string();
    };

    let Some(fields) = data.as_object() else {
        warn!("template data is not an object, rendering unmerged content");
        return markup.to_string();
    };

    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            // Unterminated placeholder, keep the tail as-is.
            break;
        };

        out.push_str(&rest[..start]);
        let key = rest[start + 2..start + 2 + end].trim();

        match fields.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => {
                debug!(key, "no data for placeholder, leaving as-is");
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
        }

        rest = &rest[start + 2 + end + 2..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_string_values() {
        let merged = merge(
            "<h1>Invoice {{number}}</h1><p>{{ customer }}</p>",
            Some(&json!({ "number": "42", "customer": "Acme" })),
        );
        assert_eq!(merged, "<h1>Invoice 42</h1><p>Acme</p>");
    }

    #[test]
    fn test_merge_non_string_values() {
        let merged = merge("total: {{total}}", Some(&json!({ "total": 19.5 })));
        assert_eq!(merged, "total: 19.5");
    }

    #[test]
    fn test_missing_key_left_untouched() {
        let merged = merge("<p>{{missing}}</p>", Some(&json!({ "other": 1 })));
        assert_eq!(merged, "<p>{{missing}}</p>");
    }

    #[test]
    fn test_no_data_is_identity() {
        assert_eq!(merge("<p>{{a}}</p>", None), "<p>{{a}}</p>");
    }

    #[test]
    fn test_non_object_data_falls_back() {
        let merged = merge("<p>{{a}}</p>", Some(&json!([1, 2])));
        assert_eq!(merged, "<p>{{a}}</p>");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let merged = merge("<p>{{a</p>", Some(&json!({ "a": "x" })));
        assert_eq!(merged, "<p>{{a</p>");
    }
}
