//! Values
//!
//! A [`Value`] is the result of evaluating an expression. Exceptions are
//! values too: they flow through further evaluation, display and comparison
//! like anything else, and there is no unwinding.
//!
//! Composite values share their contents behind `Arc`, so cloning a value is
//! cheap and values can cross threads (stream sources push from anywhere).

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ast::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// A blocking diagnostic from static analysis.
    CompileTimeConflict,
    UnknownName,
    RuntimeTypeMismatch,
    /// The pass exceeded its step budget.
    NonTermination,
    StreamUnavailable,
    /// The node is missing parts and cannot be evaluated.
    IncompleteExpression,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionKind::CompileTimeConflict => "CompileTimeConflict",
            ExceptionKind::UnknownName => "UnknownName",
            ExceptionKind::RuntimeTypeMismatch => "RuntimeTypeMismatch",
            ExceptionKind::NonTermination => "NonTermination",
            ExceptionKind::StreamUnavailable => "StreamUnavailable",
            ExceptionKind::IncompleteExpression => "IncompleteExpression",
        };
        f.write_str(name)
    }
}

/// A failure scoped to an expression. Exceptions are ordinary values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    /// What went wrong.
    pub kind: ExceptionKind,
    /// Human-readable detail.
    pub message: String,
    /// The smallest expression the exception is scoped to.
    pub node: Option<NodeId>,
}

/// A number with an optional unit such as `ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Number {
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Arc<str>>,
}

impl Number {
    /// Create a number, with `unit` if given.
    pub fn new(amount: f64, unit: Option<&str>) -> Self {
        Self {
            amount,
            unit: unit.map(Arc::from),
        }
    }

    /// Get the unit, if any.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit().unwrap_or(""))
    }
}

/// A runtime value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Number(Number),
    Text(Arc<str>),
    Boolean(bool),
    List(Arc<[Value]>),
    Structure(Arc<IndexMap<String, Value>>),
    #[serde(skip)]
    Function(Closure),
    Exception(Arc<Exception>),
}

impl Value {
    /// A plain number without a unit.
    pub fn number(amount: f64) -> Self {
        Value::Number(Number::new(amount, None))
    }

    /// A number with a unit.
    pub fn measure(amount: f64, unit: &str) -> Self {
        Value::Number(Number::new(amount, Some(unit)))
    }

    /// A text value.
    pub fn text(text: &str) -> Self {
        Value::Text(Arc::from(text))
    }

    /// A list in iteration order.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    /// A structure whose fields keep their given order.
    ///
    /// A repeated name keeps its first position and its last value.
    pub fn structure<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Value::Structure(Arc::new(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        ))
    }

    /// An exception value scoped to `node`.
    pub fn exception(kind: ExceptionKind, message: impl Into<String>, node: Option<NodeId>) -> Self {
        Value::Exception(Arc::new(Exception {
            kind,
            message: message.into(),
            node,
        }))
    }

    /// Check if this value is an exception.
    pub fn is_exception(&self) -> bool {
        matches!(self, Value::Exception(_))
    }

    /// Get the exception, if this value is one.
    pub fn as_exception(&self) -> Option<&Exception> {
        match self {
            Value::Exception(exception) => Some(exception),
            _ => None,
        }
    }

    /// Kind of the exception, if this value is one.
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        self.as_exception().map(|exception| exception.kind)
    }

    /// Name of the value's type, as used in type mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::List(_) => "list",
            Value::Structure(_) => "structure",
            Value::Function(_) => "function",
            Value::Exception(_) => "exception",
        }
    }

    /// Restore a strong scope link on a closure read back out of `scope`.
    fn strengthened(&self, scope: &Arc<Scope>) -> Value {
        match self {
            Value::Function(closure) if closure.is_weak() => Value::Function(Closure {
                env: Env::Strong(Arc::clone(scope)),
                ..closure.clone()
            }),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Structure(a), Value::Structure(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(amount: f64) -> Self {
        Value::number(amount)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::text(text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(number) => number.fmt(f),
            Value::Text(text) => write!(f, "\"{text}\""),
            Value::Boolean(value) => write!(f, "{value}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    item.fmt(f)?;
                }
                f.write_str("]")
            }
            Value::Structure(fields) => {
                f.write_str("{")?;
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Function(closure) => write!(f, "ƒ({})", closure.parameters.join(" ")),
            Value::Exception(exception) => write!(f, "!{}: {}", exception.kind, exception.message),
        }
    }
}

#[derive(Clone)]
enum Env {
    Strong(Arc<Scope>),
    /// Used while the closure is stored inside the scope it captures.
    Weak(Weak<Scope>),
}

/// A function value: the `Function` node plus the scope it was evaluated in.
#[derive(Clone)]
pub struct Closure {
    function: NodeId,
    body: NodeId,
    parameters: Arc<[String]>,
    env: Env,
}

impl Closure {
    pub(crate) fn new(function: NodeId, body: NodeId, parameters: Arc<[String]>, env: Arc<Scope>) -> Self {
        Self {
            function,
            body,
            parameters,
            env: Env::Strong(env),
        }
    }

    /// The `Function` node that created this closure.
    pub fn function(&self) -> NodeId {
        self.function
    }

    /// The node evaluated on each call.
    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Parameter names in declaration order.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// The captured scope, `None` only if it has already been dropped.
    pub(crate) fn env(&self) -> Option<Arc<Scope>> {
        match &self.env {
            Env::Strong(scope) => Some(Arc::clone(scope)),
            Env::Weak(scope) => scope.upgrade(),
        }
    }

    fn env_ptr(&self) -> *const Scope {
        match &self.env {
            Env::Strong(scope) => Arc::as_ptr(scope),
            Env::Weak(scope) => scope.as_ptr(),
        }
    }

    fn is_weak(&self) -> bool {
        matches!(self.env, Env::Weak(_))
    }

    fn captures(&self, scope: &Arc<Scope>) -> bool {
        std::ptr::eq(self.env_ptr(), Arc::as_ptr(scope))
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function && std::ptr::eq(self.env_ptr(), other.env_ptr())
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("function", &self.function)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Lexical bindings with a link to the enclosing scope.
///
/// A closure defined into the very scope it captures is stored with a weak
/// link, so recursive functions do not keep their scope alive forever; reads
/// hand back a strong copy.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: RwLock<IndexMap<String, Value>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// Create an empty outermost scope.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an empty scope nested in `parent`.
    pub fn child(parent: &Arc<Scope>) -> Arc<Self> {
        Arc::new(Self {
            bindings: RwLock::new(IndexMap::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Bind `name` in this scope, shadowing outer bindings.
    pub fn define(self: &Arc<Self>, name: &str, value: Value) {
        let stored = match value {
            Value::Function(closure) if closure.captures(self) => {
                let weak = Arc::downgrade(self);
                Value::Function(Closure {
                    env: Env::Weak(weak),
                    ..closure
                })
            }
            other => other,
        };
        self.bindings.write().insert(name.to_string(), stored);
    }

    /// Walk the scope chain outward looking for `name`.
    pub fn lookup(self: &Arc<Self>, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.bindings.read().get(name) {
                return Some(value.strengthened(scope));
            }
            scope = scope.parent.as_ref()?;
        }
    }

    /// Number of bindings in this scope alone.
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closure_in(scope: &Arc<Scope>) -> Value {
        Value::Function(Closure::new(
            NodeId::from(1),
            NodeId::from(0),
            Arc::from(vec!["x".to_string()]),
            Arc::clone(scope),
        ))
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::measure(500.0, "ms").to_string(), "500ms");
        assert_eq!(Value::number(2.5).to_string(), "2.5");
        assert_eq!(Value::text("hi").to_string(), "\"hi\"");
        assert_eq!(
            Value::list([Value::number(1.0), Value::Boolean(true)]).to_string(),
            "[1 true]"
        );
        assert_eq!(
            Value::structure([("x", Value::number(1.0)), ("y", Value::number(2.0))]).to_string(),
            "{x: 1, y: 2}"
        );
        assert_eq!(
            Value::exception(ExceptionKind::UnknownName, "nope", None).to_string(),
            "!UnknownName: nope"
        );
    }

    #[test]
    fn units_take_part_in_equality() {
        assert_eq!(Value::measure(1.0, "ms"), Value::measure(1.0, "ms"));
        assert_ne!(Value::measure(1.0, "ms"), Value::number(1.0));
    }

    #[test]
    fn exceptions_compare_like_values() {
        let a = Value::exception(ExceptionKind::UnknownName, "x", Some(NodeId::from(3)));
        let b = Value::exception(ExceptionKind::UnknownName, "x", Some(NodeId::from(3)));
        assert_eq!(a, b);
        assert_eq!(a.exception_kind(), Some(ExceptionKind::UnknownName));
    }

    #[test]
    fn lookup_walks_parent_scopes() {
        let outer = Scope::root();
        outer.define("x", Value::number(1.0));
        let inner = Scope::child(&outer);
        inner.define("y", Value::number(2.0));

        assert_eq!(inner.lookup("x"), Some(Value::number(1.0)));
        assert_eq!(inner.lookup("y"), Some(Value::number(2.0)));
        assert_eq!(outer.lookup("y"), None);
    }

    #[test]
    fn self_capturing_closure_does_not_keep_scope_alive() {
        let scope = Scope::root();
        let weak = Arc::downgrade(&scope);
        scope.define("f", closure_in(&scope));

        let read_back = scope.lookup("f").unwrap();
        match &read_back {
            Value::Function(closure) => assert!(closure.env().is_some()),
            other => panic!("expected function, got {other:?}"),
        }
        assert_eq!(read_back, closure_in(&scope));

        drop(read_back);
        drop(scope);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn closures_differ_by_scope() {
        let first = Scope::root();
        let second = Scope::root();
        assert_ne!(closure_in(&first), closure_in(&second));
    }

    #[test]
    fn data_values_serialize() {
        let value = Value::structure([("x", Value::measure(3.0, "px"))]);
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
