//! Scalar property reconciliation.
//!
//! Properties are dispatched through an explicit typed registry of
//! descriptors rather than by reflective attribute lookup: each descriptor
//! declares its name, value kind, and default, and unknown names fail as a
//! recoverable per-key error. Desired values arrive loosely typed (YAML or
//! CLI strings) and are normalized against the descriptor's kind before
//! comparison - otherwise every reconciliation would degrade to "always
//! changed".

use crate::error::ReconcileError;
use crate::status::StatusRecord;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

/// Column width for `name: value` report lines.
pub const LABEL_WIDTH: usize = 19;

/// Format one aligned `name: value` report line.
pub fn fmt_line(name: &str, value: impl fmt::Display) -> String {
    format!("{name:<width$}: {value}", width = LABEL_WIDTH)
}

/// Marker shown for properties tracking their platform default, and
/// accepted as a desired value meaning "clear the local override".
pub const DEFAULT_MARKER: &str = "*default*";

/// A normalized property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
    /// An explicitly empty reference (e.g. a VM with no netvm).
    Null,
}

impl PropertyValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::from(*b),
            Self::Int(i) => Value::from(*i),
            Self::Str(s) => Value::from(s.clone()),
            Self::List(items) => Value::from(items.clone()),
            Self::Null => Value::Null,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => write!(f, "{}", items.join(", ")),
            Self::Null => write!(f, "none"),
        }
    }
}

/// The kind of value a property accepts, driving coercion and equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    Str,
    /// A string restricted to a fixed set of choices (e.g. a VM label).
    Choice(&'static [&'static str]),
    /// A list of strings (e.g. attached PCI device idents).
    List,
    /// A reference that may be explicitly empty: `""`, `"none"` and null
    /// all normalize to [`PropertyValue::Null`].
    OptionalRef,
}

/// One entry in the property registry.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub kind: PropertyKind,
    /// The value a cleared property reverts to, when the platform defines
    /// one statically. `None` means the default is platform-managed.
    pub default: Option<PropertyValue>,
}

impl PropertyDescriptor {
    pub const fn new(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub fn with_default(mut self, default: PropertyValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Normalize a loosely-typed desired value against this descriptor.
    pub fn coerce(&self, raw: &Value) -> Result<PropertyValue, ReconcileError> {
        let invalid = |detail: &str| ReconcileError::InvalidValue {
            key: self.name.to_string(),
            detail: detail.to_string(),
        };

        match self.kind {
            PropertyKind::Bool => match raw {
                Value::Bool(b) => Ok(PropertyValue::Bool(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(PropertyValue::Bool(false)),
                    Some(1) => Ok(PropertyValue::Bool(true)),
                    _ => Err(invalid("expected a boolean")),
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(PropertyValue::Bool(true)),
                    "false" | "0" | "no" | "off" => Ok(PropertyValue::Bool(false)),
                    _ => Err(invalid("expected a boolean")),
                },
                _ => Err(invalid("expected a boolean")),
            },
            PropertyKind::Int => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(PropertyValue::Int)
                    .ok_or_else(|| invalid("expected an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(PropertyValue::Int)
                    .map_err(|_| invalid("expected an integer")),
                _ => Err(invalid("expected an integer")),
            },
            PropertyKind::Str => match raw {
                Value::String(s) => Ok(PropertyValue::Str(s.clone())),
                Value::Number(n) => Ok(PropertyValue::Str(n.to_string())),
                Value::Bool(b) => Ok(PropertyValue::Str(b.to_string())),
                _ => Err(invalid("expected a string")),
            },
            PropertyKind::Choice(choices) => match raw {
                Value::String(s) if choices.contains(&s.as_str()) => {
                    Ok(PropertyValue::Str(s.clone()))
                }
                _ => Err(invalid(&format!("expected one of {}", choices.join(", ")))),
            },
            PropertyKind::List => match raw {
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => out.push(s.clone()),
                            other => out.push(other.to_string()),
                        }
                    }
                    Ok(PropertyValue::List(out))
                }
                Value::String(s) => Ok(PropertyValue::List(vec![s.clone()])),
                _ => Err(invalid("expected a list")),
            },
            PropertyKind::OptionalRef => match raw {
                Value::Null => Ok(PropertyValue::Null),
                Value::String(s) if s.is_empty() || s.eq_ignore_ascii_case("none") => {
                    Ok(PropertyValue::Null)
                }
                Value::String(s) => Ok(PropertyValue::Str(s.clone())),
                _ => Err(invalid("expected a name or none")),
            },
        }
    }
}

/// Typed lookup of property descriptors. Unknown names become recoverable
/// per-key failures, never uncaught errors.
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    entries: IndexMap<&'static str, PropertyDescriptor>,
}

impl PropertyRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = PropertyDescriptor>) -> Self {
        Self {
            entries: descriptors.into_iter().map(|d| (d.name, d)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The record for a desired property name the registry does not know.
    pub fn invalid_key_record(name: &str) -> StatusRecord {
        StatusRecord::failure(fmt_line(name, "Invalid key!"))
    }
}

/// Current state of one property as reported by the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyState {
    /// The property carries an explicit, local value.
    Value(PropertyValue),
    /// The property tracks the platform default.
    TrackingDefault,
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::TrackingDefault => write!(f, "{DEFAULT_MARKER}"),
        }
    }
}

impl PropertyState {
    fn to_json(&self) -> Value {
        match self {
            Self::Value(value) => value.to_json(),
            Self::TrackingDefault => Value::from(DEFAULT_MARKER),
        }
    }
}

/// What the caller wants done with one property.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredValue {
    /// Report the current value; mutate nothing.
    Query,
    /// Clear the local override and revert to the platform default.
    Reset,
    /// Set to a concrete (still loosely-typed) value.
    Set(Value),
}

/// The decided corrective action for one property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAction {
    /// Report-only; nothing to correct.
    Report,
    /// Current already equals desired.
    Skip,
    /// Set the property to the normalized value.
    Set(PropertyValue),
    /// Clear the local override.
    Clear,
}

/// Decide the skip-or-correct action for one property.
///
/// Performs no I/O: the caller owns both the current-state lookup and the
/// mutation. The returned record already reflects the decision; on
/// `Set`/`Clear` it carries the old/new change entry, and the caller
/// downgrades it to a failure if the mutation subsequently fails.
pub fn reconcile_property(
    desc: &PropertyDescriptor,
    current: &PropertyState,
    desired: &DesiredValue,
) -> (PropertyAction, StatusRecord) {
    match desired {
        DesiredValue::Query => (
            PropertyAction::Report,
            StatusRecord::note(fmt_line(desc.name, current)),
        ),
        DesiredValue::Reset => match current {
            PropertyState::TrackingDefault => (
                PropertyAction::Skip,
                StatusRecord::skip(fmt_line(desc.name, DEFAULT_MARKER)),
            ),
            PropertyState::Value(value) => {
                let record = StatusRecord::success().with_change(
                    desc.name,
                    value.to_json(),
                    DEFAULT_MARKER,
                );
                (PropertyAction::Clear, record)
            }
        },
        DesiredValue::Set(raw) => {
            let desired_value = match desc.coerce(raw) {
                Ok(value) => value,
                Err(ReconcileError::InvalidValue { detail, .. }) => {
                    return (
                        PropertyAction::Skip,
                        StatusRecord::failure(fmt_line(
                            desc.name,
                            format!("Invalid value! ({detail})"),
                        )),
                    );
                }
                Err(err) => {
                    return (
                        PropertyAction::Skip,
                        StatusRecord::failure(fmt_line(desc.name, err)),
                    );
                }
            };

            if matches!(current, PropertyState::Value(value) if *value == desired_value) {
                return (
                    PropertyAction::Skip,
                    StatusRecord::skip(fmt_line(desc.name, current)),
                );
            }

            let record = StatusRecord::success().with_change(
                desc.name,
                current.to_json(),
                desired_value.to_json(),
            );
            (PropertyAction::Set(desired_value), record)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory() -> PropertyDescriptor {
        PropertyDescriptor::new("memory", PropertyKind::Int)
    }

    #[test]
    fn test_fmt_line_alignment() {
        assert_eq!(fmt_line("memory", 400), "memory             : 400");
    }

    #[test]
    fn test_equal_value_skips() {
        let current = PropertyState::Value(PropertyValue::Int(400));
        let (action, record) =
            reconcile_property(&memory(), &current, &DesiredValue::Set(json!(400)));
        assert_eq!(action, PropertyAction::Skip);
        assert!(!record.changed);
        assert_eq!(record.message, "[SKIP] memory             : 400");
    }

    #[test]
    fn test_differing_value_sets() {
        let current = PropertyState::Value(PropertyValue::Int(400));
        let (action, record) =
            reconcile_property(&memory(), &current, &DesiredValue::Set(json!(600)));
        assert_eq!(action, PropertyAction::Set(PropertyValue::Int(600)));
        assert!(record.changed);
        assert_eq!(record.changes["memory"].old, json!(400));
        assert_eq!(record.changes["memory"].new, json!(600));
    }

    #[test]
    fn test_loose_string_normalizes_before_compare() {
        // YAML and CLI often deliver numbers as strings; "400" == 400.
        let current = PropertyState::Value(PropertyValue::Int(400));
        let (action, _) =
            reconcile_property(&memory(), &current, &DesiredValue::Set(json!("400")));
        assert_eq!(action, PropertyAction::Skip);
    }

    #[test]
    fn test_bool_coercion_variants() {
        let desc = PropertyDescriptor::new("autostart", PropertyKind::Bool);
        for raw in [json!(true), json!("true"), json!("1"), json!(1), json!("Yes")] {
            assert_eq!(desc.coerce(&raw).unwrap(), PropertyValue::Bool(true), "{raw}");
        }
        for raw in [json!(false), json!("false"), json!("0"), json!(0), json!("off")] {
            assert_eq!(desc.coerce(&raw).unwrap(), PropertyValue::Bool(false), "{raw}");
        }
        assert!(desc.coerce(&json!("maybe")).is_err());
    }

    #[test]
    fn test_optional_ref_none_forms() {
        let desc = PropertyDescriptor::new("netvm", PropertyKind::OptionalRef);
        for raw in [json!(null), json!(""), json!("none"), json!("None")] {
            assert_eq!(desc.coerce(&raw).unwrap(), PropertyValue::Null, "{raw}");
        }
        assert_eq!(
            desc.coerce(&json!("sys-firewall")).unwrap(),
            PropertyValue::Str("sys-firewall".into())
        );
    }

    #[test]
    fn test_choice_rejects_unknown() {
        let desc = PropertyDescriptor::new(
            "label",
            PropertyKind::Choice(&["red", "green", "blue"]),
        );
        assert!(desc.coerce(&json!("green")).is_ok());
        assert!(desc.coerce(&json!("teal")).is_err());
    }

    #[test]
    fn test_invalid_value_is_recoverable_per_key_failure() {
        let current = PropertyState::Value(PropertyValue::Int(400));
        let (action, record) =
            reconcile_property(&memory(), &current, &DesiredValue::Set(json!("lots")));
        assert_eq!(action, PropertyAction::Skip);
        assert!(record.failed());
        assert!(record.message.contains("memory"));
    }

    #[test]
    fn test_query_reports_without_mutation() {
        let current = PropertyState::Value(PropertyValue::Int(400));
        let (action, record) = reconcile_property(&memory(), &current, &DesiredValue::Query);
        assert_eq!(action, PropertyAction::Report);
        assert!(!record.changed);
        assert_eq!(record.message, "memory             : 400");
    }

    #[test]
    fn test_reset_clears_local_override() {
        let current = PropertyState::Value(PropertyValue::Str("fedora-39".into()));
        let desc = PropertyDescriptor::new("kernel", PropertyKind::Str);
        let (action, record) = reconcile_property(&desc, &current, &DesiredValue::Reset);
        assert_eq!(action, PropertyAction::Clear);
        assert_eq!(record.changes["kernel"].new, json!(DEFAULT_MARKER));
    }

    #[test]
    fn test_reset_skips_when_already_default() {
        let desc = PropertyDescriptor::new("kernel", PropertyKind::Str);
        let (action, record) =
            reconcile_property(&desc, &PropertyState::TrackingDefault, &DesiredValue::Reset);
        assert_eq!(action, PropertyAction::Skip);
        assert!(record.message.starts_with("[SKIP] "));
    }

    #[test]
    fn test_invalid_key_record_format() {
        let record = PropertyRegistry::invalid_key_record("maxmen");
        assert!(record.failed());
        assert_eq!(record.message, "maxmen             : Invalid key!");
    }

    #[test]
    fn test_registry_lookup_preserves_insertion_order() {
        let registry = PropertyRegistry::new([
            PropertyDescriptor::new("memory", PropertyKind::Int),
            PropertyDescriptor::new("maxmem", PropertyKind::Int),
        ]);
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["memory", "maxmem"]);
        assert!(registry.get("memory").is_some());
        assert!(registry.get("vcpus").is_none());
    }
}
