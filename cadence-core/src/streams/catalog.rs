//! Stream Catalog
//!
//! The set of streams a program may read, with the contract each one
//! follows. A catalog is built once and handed to the engine; there is no
//! global registry.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// How a stream produces values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Emission {
    /// Fed with raw clock readings; emits milliseconds elapsed since the
    /// first reading.
    Elapsed,
    /// Emits when a pass asks for a fresh value.
    OnDemand,
    /// Emits whenever its external source pushes.
    Push,
}

/// The shape every value of a stream has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    /// A number in milliseconds. Unitless input is taken as milliseconds.
    Duration,
    Number,
    Text,
    Boolean,
    /// A structure with numeric `x` and `y`.
    Point,
}

impl Shape {
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Shape::Duration, Value::Number(number)) => {
                matches!(number.unit(), None | Some("ms"))
            }
            (Shape::Number, Value::Number(_)) => true,
            (Shape::Text, Value::Text(_)) => true,
            (Shape::Boolean, Value::Boolean(_)) => true,
            (Shape::Point, Value::Structure(fields)) => ["x", "y"]
                .iter()
                .all(|axis| matches!(fields.get(*axis), Some(Value::Number(_)))),
            _ => false,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Shape::Duration => "a duration in ms",
            Shape::Number => "a number",
            Shape::Text => "text",
            Shape::Boolean => "a boolean",
            Shape::Point => "a structure with numeric x and y",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSpec {
    pub name: Arc<str>,
    pub emission: Emission,
    pub shape: Shape,
    /// Read while the stream has no events or is unavailable.
    pub default: Value,
}

impl StreamSpec {
    pub fn new(name: &str, emission: Emission, shape: Shape, default: Value) -> Self {
        Self {
            name: name.into(),
            emission,
            shape,
            default,
        }
    }

    /// A push stream carrying plain numbers, defaulting to 0.
    pub fn number(name: &str) -> Self {
        Self::new(name, Emission::Push, Shape::Number, Value::number(0.0))
    }
}

/// The streams available to a program, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct StreamCatalog {
    specs: IndexMap<Arc<str>, StreamSpec>,
}

impl StreamCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `time`, `random`, `keyboard`, `mouse-position`, `mouse-button` and
    /// `microphone`.
    pub fn builtin() -> Self {
        Self::empty()
            .with(StreamSpec::new(
                "time",
                Emission::Elapsed,
                Shape::Duration,
                Value::measure(0.0, "ms"),
            ))
            .with(StreamSpec::new(
                "random",
                Emission::OnDemand,
                Shape::Number,
                Value::number(0.0),
            ))
            .with(StreamSpec::new("keyboard", Emission::Push, Shape::Text, Value::text("")))
            .with(StreamSpec::new(
                "mouse-position",
                Emission::Push,
                Shape::Point,
                Value::structure([("x", Value::number(0.0)), ("y", Value::number(0.0))]),
            ))
            .with(StreamSpec::new(
                "mouse-button",
                Emission::Push,
                Shape::Boolean,
                Value::Boolean(false),
            ))
            .with(StreamSpec::number("microphone"))
    }

    /// Add or replace a stream.
    pub fn with(mut self, spec: StreamSpec) -> Self {
        self.specs.insert(Arc::clone(&spec.name), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StreamSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(|name| &**name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &StreamSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_lists_all_streams() {
        let catalog = StreamCatalog::builtin();
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(
            names,
            vec!["time", "random", "keyboard", "mouse-position", "mouse-button", "microphone"]
        );
        assert_eq!(catalog.get("random").unwrap().emission, Emission::OnDemand);
    }

    #[test]
    fn shapes_check_values() {
        assert!(Shape::Duration.accepts(&Value::number(3.0)));
        assert!(Shape::Duration.accepts(&Value::measure(3.0, "ms")));
        assert!(!Shape::Duration.accepts(&Value::measure(3.0, "px")));
        assert!(Shape::Point.accepts(&Value::structure([
            ("x", Value::number(1.0)),
            ("y", Value::number(2.0)),
        ])));
        assert!(!Shape::Point.accepts(&Value::structure([("x", Value::number(1.0))])));
        assert!(!Shape::Text.accepts(&Value::Boolean(true)));
    }

    #[test]
    fn defaults_match_their_shape() {
        for spec in StreamCatalog::builtin().specs() {
            assert!(spec.shape.accepts(&spec.default), "{} default", spec.name);
        }
    }

    #[test]
    fn with_replaces_existing_stream() {
        let catalog = StreamCatalog::builtin().with(StreamSpec::new(
            "keyboard",
            Emission::Push,
            Shape::Text,
            Value::text("?"),
        ));
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.get("keyboard").unwrap().default, Value::text("?"));
    }
}
