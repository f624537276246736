//! Input values and deferred output references
//!
//! A resource's declared inputs are a tree of [`Input`] values. Leaves are
//! either literal JSON or an [`OutputRef`], a placeholder for a property of
//! another resource that only exists once that resource has been applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Resolved property values, keyed by property name.
pub type Properties = BTreeMap<String, Value>;

/// Declared inputs of a resource, keyed by property name.
pub type Inputs = BTreeMap<String, Input>;

/// Planned value of one input property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Planned {
    Known(Value),
    /// Depends on an output that only exists once its source is applied
    Unknown,
}

impl Planned {
    pub fn known(&self) -> Option<&Value> {
        match self {
            Planned::Known(v) => Some(v),
            Planned::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Planned::Unknown)
    }
}

/// Planned inputs of a resource, keyed by property name.
pub type PlannedProperties = BTreeMap<String, Planned>;

/// Treat fully resolved properties as planned values.
pub fn planned(properties: &Properties) -> PlannedProperties {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), Planned::Known(v.clone())))
        .collect()
}

/// A deferred reference to property `property` of resource `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    resource: String,
    property: String,
}

impl OutputRef {
    pub fn new(resource: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            property: property.into(),
        }
    }

    /// Logical name of the source resource
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Output property on the source resource
    pub fn property(&self) -> &str {
        &self.property
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.property)
    }
}

/// A declared input value.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A literal value
    Value(Value),
    /// A list whose elements may contain references
    List(Vec<Input>),
    /// A map whose values may contain references
    Map(BTreeMap<String, Input>),
    /// A property of another resource, available after it is applied
    Output(OutputRef),
}

impl Input {
    /// Build a list input from anything convertible to inputs.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Input>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a map input from key/value pairs.
    pub fn map<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<Input>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// All output references contained anywhere in this value.
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            Input::Value(_) => {}
            Input::List(items) => items.iter().for_each(|i| i.collect_references(out)),
            Input::Map(entries) => entries.values().for_each(|i| i.collect_references(out)),
            Input::Output(r) => out.push(r),
        }
    }

    /// Resolve for planning; any reference the lookup cannot answer makes
    /// the whole value [`Planned::Unknown`].
    pub fn resolve_planned<F>(&self, lookup: &F) -> Planned
    where
        F: Fn(&OutputRef) -> Option<Value>,
    {
        self.resolve(lookup).map_or(Planned::Unknown, Planned::Known)
    }

    /// Resolve to a concrete value, failing with the first unresolved reference.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, OutputRef>
    where
        F: Fn(&OutputRef) -> Option<Value>,
    {
        Ok(match self {
            Input::Value(v) => v.clone(),
            Input::List(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.resolve(lookup))
                    .collect::<Result<_, _>>()?,
            ),
            Input::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve(lookup)?)))
                    .collect::<Result<_, OutputRef>>()?,
            ),
            Input::Output(r) => lookup(r).ok_or_else(|| r.clone())?,
        })
    }
}

/// Resolve every input of a resource for planning.
pub fn resolve_planned<F>(inputs: &Inputs, lookup: &F) -> PlannedProperties
where
    F: Fn(&OutputRef) -> Option<Value>,
{
    inputs
        .iter()
        .map(|(k, v)| (k.clone(), v.resolve_planned(lookup)))
        .collect()
}

/// Resolve every input of a resource to concrete values.
pub fn resolve_all<F>(inputs: &Inputs, lookup: &F) -> Result<Properties, OutputRef>
where
    F: Fn(&OutputRef) -> Option<Value>,
{
    inputs
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.resolve(lookup)?)))
        .collect()
}

/// Build an input map from key/value pairs.
pub fn inputs<I, K, T>(entries: I) -> Inputs
where
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Into<Input>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

impl From<Value> for Input {
    fn from(v: Value) -> Self {
        Input::Value(v)
    }
}

impl From<OutputRef> for Input {
    fn from(r: OutputRef) -> Self {
        Input::Output(r)
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Input {
    fn from(s: String) -> Self {
        Input::Value(Value::String(s))
    }
}

impl From<bool> for Input {
    fn from(b: bool) -> Self {
        Input::Value(Value::Bool(b))
    }
}

impl From<i64> for Input {
    fn from(n: i64) -> Self {
        Input::Value(Value::from(n))
    }
}

impl From<Vec<Input>> for Input {
    fn from(items: Vec<Input>) -> Self {
        Input::List(items)
    }
}

/// Single-assignment slot holding a resource's outputs once it is applied.
#[derive(Debug, Default)]
pub struct OutputSlot {
    cell: OnceLock<Properties>,
}

impl OutputSlot {
    /// Publish outputs. Returns false if the slot was already resolved.
    pub fn resolve(&self, outputs: Properties) -> bool {
        self.cell.set(outputs).is_ok()
    }

    pub fn get(&self) -> Option<&Properties> {
        self.cell.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Output slots for every resource in a run.
#[derive(Debug, Default)]
pub struct OutputTable {
    slots: BTreeMap<String, OutputSlot>,
}

impl OutputTable {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            slots: names
                .into_iter()
                .map(|n| (n.to_string(), OutputSlot::default()))
                .collect(),
        }
    }

    /// Publish outputs for a resource.
    pub fn resolve(&self, name: &str, outputs: Properties) -> bool {
        self.slots.get(name).is_some_and(|s| s.resolve(outputs))
    }

    /// Value of a reference, if its source has been applied.
    pub fn lookup(&self, r: &OutputRef) -> Option<Value> {
        self.slots
            .get(r.resource())
            .and_then(OutputSlot::get)
            .and_then(|outputs| outputs.get(r.property()).cloned())
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(OutputSlot::is_resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested() -> Input {
        Input::list([Input::map([
            ("subnetwork", Input::from("sub")),
            (
                "accessConfigs",
                Input::list([Input::map([(
                    "natIp",
                    Input::from(OutputRef::new("addr", "address")),
                )])]),
            ),
        ])])
    }

    #[test]
    fn test_references_found_at_any_depth() {
        let input = nested();
        let refs = input.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].to_string(), "addr.address");
    }

    #[test]
    fn test_resolve_planned_marks_unknown() {
        assert_eq!(nested().resolve_planned(&|_| None), Planned::Unknown);

        let known = nested().resolve_planned(&|_| Some(json!("34.1.2.3")));
        assert_eq!(
            known.known().map(|v| &v[0]["accessConfigs"][0]["natIp"]),
            Some(&json!("34.1.2.3"))
        );
    }

    #[test]
    fn test_literal_is_never_unknown() {
        let literal = Input::from("<computed>");
        assert_eq!(
            literal.resolve_planned(&|_| None),
            Planned::Known(json!("<computed>"))
        );
    }

    #[test]
    fn test_resolve_reports_missing_reference() {
        let err = nested().resolve(&|_| None).unwrap_err();
        assert_eq!(err, OutputRef::new("addr", "address"));

        let value = nested()
            .resolve(&|r| (r.property() == "address").then(|| json!("34.1.2.3")))
            .unwrap();
        assert_eq!(value[0]["accessConfigs"][0]["natIp"], json!("34.1.2.3"));
    }

    #[test]
    fn test_output_slot_is_single_assignment() {
        let table = OutputTable::new(["ip1"]);
        let r = OutputRef::new("ip1", "selfLink");
        assert_eq!(table.lookup(&r), None);

        let mut first = Properties::new();
        first.insert("selfLink".into(), json!("link-1"));
        assert!(table.resolve("ip1", first));

        let mut second = Properties::new();
        second.insert("selfLink".into(), json!("link-2"));
        assert!(!table.resolve("ip1", second));
        assert_eq!(table.lookup(&r), Some(json!("link-1")));
        assert!(!table.resolve("missing", Properties::new()));
    }
}
