// ABOUTME: Flattens raw FileMaker records into destination-safe columns
// ABOUTME: Renames leading-underscore fields and expands repetitions

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::{ExtractError, Result};
use crate::filemaker::{FieldDescriptor, RawRecord};

/// Prefix substituted for the leading underscore of source field names, which
/// is illegal in the destination storage.
pub const UNDERSCORE_PREFIX: &str = "hsh";

/// A flat destination record: column name to scalar value, ordered by column.
pub type NormalizedRecord = BTreeMap<String, Value>;

/// `_Foo` becomes `hsh_Foo`; anything else passes through. Applying the
/// rename twice is a no-op since the output never starts with an underscore.
pub fn normalize_name(name: &str) -> String {
    if name.starts_with('_') {
        format!("{UNDERSCORE_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

/// Inverse of [`normalize_name`], used when re-reading persisted schemas.
pub fn reconstruct_name(name: &str) -> String {
    match name.strip_prefix("hsh_") {
        Some(rest) => format!("_{rest}"),
        None => name.to_string(),
    }
}

/// Flattens one raw record into destination columns.
///
/// Repetition values arrive keyed `Field(2)` and flatten to `Field_2`; a
/// plain key whose schema declares repetitions flattens to `Field_1`. After
/// flattening, leading-underscore names are renamed. Two distinct source keys
/// mapping to one destination column is an error, never an overwrite.
pub fn normalize_record(
    raw: &RawRecord,
    schema_hint: Option<&[FieldDescriptor]>,
) -> Result<NormalizedRecord> {
    let repeats: HashMap<&str, u32> = schema_hint
        .unwrap_or_default()
        .iter()
        .map(|field| (field.name.as_str(), field.max_repeat))
        .collect();

    let mut out = NormalizedRecord::new();
    let mut sources: HashMap<String, String> = HashMap::new();

    for (key, value) in &raw.field_data {
        let flat = match split_repetition(key) {
            (base, Some(index)) => format!("{base}_{index}"),
            (base, None) => {
                if repeats.get(base).copied().unwrap_or(1) > 1 {
                    format!("{base}_1")
                } else {
                    base.to_string()
                }
            }
        };
        let dest = normalize_name(&flat);

        if let Some(previous) = sources.insert(dest.clone(), key.clone()) {
            return Err(ExtractError::Normalization(format!(
                "source fields '{previous}' and '{key}' both map to column '{dest}'"
            )));
        }
        out.insert(dest, value.clone());
    }

    Ok(out)
}

/// Splits a `Field(2)`-style repetition key into its base name and index.
fn split_repetition(key: &str) -> (&str, Option<u32>) {
    if let Some(stripped) = key.strip_suffix(')') {
        if let Some(open) = stripped.rfind('(') {
            if let Ok(index) = stripped[open + 1..].parse::<u32>() {
                return (&key[..open], Some(index));
            }
        }
    }
    (key, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(fields: &[(&str, Value)]) -> RawRecord {
        let mut field_data = serde_json::Map::new();
        for (name, value) in fields {
            field_data.insert(name.to_string(), value.clone());
        }
        RawRecord {
            field_data,
            record_id: "1".to_string(),
            mod_id: "0".to_string(),
        }
    }

    fn repeat_field(name: &str, max_repeat: u32) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            field_type: "normal".to_string(),
            display_type: String::new(),
            result: String::new(),
            max_repeat,
            global: false,
            not_empty: false,
        }
    }

    #[test]
    fn test_underscore_rename_round_trip() {
        assert_eq!(normalize_name("_Foo"), "hsh_Foo");
        assert_eq!(reconstruct_name("hsh_Foo"), "_Foo");
        assert_eq!(normalize_name("Plain"), "Plain");
        assert_eq!(reconstruct_name("Plain"), "Plain");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_name("_Timestamp_Modified");
        assert_eq!(once, "hsh_Timestamp_Modified");
        assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn test_record_rename_keeps_values() {
        let record = raw(&[("_Foo", json!("bar")), ("Id", json!(7))]);
        let normalized = normalize_record(&record, None).unwrap();
        assert_eq!(normalized.get("hsh_Foo"), Some(&json!("bar")));
        assert_eq!(normalized.get("Id"), Some(&json!(7)));
        assert!(!normalized.contains_key("_Foo"));
    }

    #[test]
    fn test_normalizing_normalized_record_is_noop() {
        let record = raw(&[("_Foo", json!("bar"))]);
        let once = normalize_record(&record, None).unwrap();

        let mut field_data = serde_json::Map::new();
        for (k, v) in &once {
            field_data.insert(k.clone(), v.clone());
        }
        let renormalized = normalize_record(
            &RawRecord {
                field_data,
                record_id: "1".to_string(),
                mod_id: "0".to_string(),
            },
            None,
        )
        .unwrap();
        assert_eq!(once, renormalized);
    }

    #[test]
    fn test_collision_is_reported_not_overwritten() {
        let record = raw(&[("_Foo", json!("a")), ("hsh_Foo", json!("b"))]);
        let err = normalize_record(&record, None).unwrap_err();
        assert!(matches!(err, ExtractError::Normalization(_)));
        assert!(err.to_string().contains("hsh_Foo"));
    }

    #[test]
    fn test_repetition_keys_flatten_to_indexed_columns() {
        let record = raw(&[("Qty", json!(10)), ("Qty(2)", json!(20)), ("Qty(3)", json!(30))]);
        let schema = vec![repeat_field("Qty", 3)];
        let normalized = normalize_record(&record, Some(&schema)).unwrap();
        assert_eq!(normalized.get("Qty_1"), Some(&json!(10)));
        assert_eq!(normalized.get("Qty_2"), Some(&json!(20)));
        assert_eq!(normalized.get("Qty_3"), Some(&json!(30)));
        assert!(!normalized.contains_key("Qty"));
    }

    #[test]
    fn test_non_repeating_field_keeps_its_name() {
        let record = raw(&[("Qty", json!(10))]);
        let schema = vec![repeat_field("Qty", 1)];
        let normalized = normalize_record(&record, Some(&schema)).unwrap();
        assert_eq!(normalized.get("Qty"), Some(&json!(10)));
    }

    #[test]
    fn test_underscore_repetition_combines_both_rules() {
        let record = raw(&[("_Qty(2)", json!(5))]);
        let normalized = normalize_record(&record, None).unwrap();
        assert_eq!(normalized.get("hsh_Qty_2"), Some(&json!(5)));
    }

    #[test]
    fn test_split_repetition_edge_cases() {
        assert_eq!(split_repetition("Qty(2)"), ("Qty", Some(2)));
        assert_eq!(split_repetition("Qty"), ("Qty", None));
        assert_eq!(split_repetition("Qty()"), ("Qty()", None));
        assert_eq!(split_repetition("Qty(x)"), ("Qty(x)", None));
    }
}
