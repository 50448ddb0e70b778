//! Operator semantics.
//!
//! Every function here is total: bad operands produce an exception value
//! scoped to `node`, never an error.

use crate::ast::{BinaryOp, NodeId, UnaryOp};
use crate::value::{ExceptionKind, Number, Value};

pub(crate) fn binary(operator: BinaryOp, left: &Value, right: &Value, node: NodeId) -> Value {
    match operator {
        BinaryOp::Equal => return Value::Boolean(left == right),
        BinaryOp::NotEqual => return Value::Boolean(left != right),
        _ => {}
    }
    if left.is_exception() {
        return left.clone();
    }
    if right.is_exception() {
        return right.clone();
    }

    match (operator, left, right) {
        (BinaryOp::Add, Value::Text(a), Value::Text(b)) => Value::Text(format!("{a}{b}").into()),
        (BinaryOp::And, Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(*a && *b),
        (BinaryOp::Or, Value::Boolean(a), Value::Boolean(b)) => Value::Boolean(*a || *b),
        (_, Value::Number(a), Value::Number(b)) => arithmetic(operator, a, b, node),
        _ => mismatch(
            node,
            format!(
                "cannot apply {} to {} and {}",
                operator.symbol(),
                left.type_name(),
                right.type_name()
            ),
        ),
    }
}

fn arithmetic(operator: BinaryOp, a: &Number, b: &Number, node: NodeId) -> Value {
    let same_unit = a.unit == b.unit;
    // The unit of whichever side has one.
    let either = a.unit.clone().or_else(|| b.unit.clone());
    let single_unit = a.unit.is_none() || b.unit.is_none();

    let unit = match operator {
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Less
        | BinaryOp::Greater
        | BinaryOp::LessOrEqual
        | BinaryOp::GreaterOrEqual => same_unit.then(|| a.unit.clone()),
        BinaryOp::Multiply => single_unit.then_some(either),
        BinaryOp::Divide if same_unit => Some(None),
        BinaryOp::Remainder if same_unit => Some(a.unit.clone()),
        BinaryOp::Divide | BinaryOp::Remainder => single_unit.then_some(either),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Equal | BinaryOp::NotEqual => None,
    };
    let Some(unit) = unit else {
        return mismatch(
            node,
            format!(
                "cannot apply {} to {} and {}",
                operator.symbol(),
                describe(a),
                describe(b)
            ),
        );
    };

    let (x, y) = (a.amount, b.amount);
    let number = |amount: f64| Value::Number(Number { amount, unit: unit.clone() });
    match operator {
        BinaryOp::Add => number(x + y),
        BinaryOp::Subtract => number(x - y),
        BinaryOp::Multiply => number(x * y),
        BinaryOp::Divide => number(x / y),
        BinaryOp::Remainder => number(x % y),
        BinaryOp::Less => Value::Boolean(x < y),
        BinaryOp::Greater => Value::Boolean(x > y),
        BinaryOp::LessOrEqual => Value::Boolean(x <= y),
        BinaryOp::GreaterOrEqual => Value::Boolean(x >= y),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Equal | BinaryOp::NotEqual => mismatch(
            node,
            format!("{} is not an arithmetic operator", operator.symbol()),
        ),
    }
}

fn describe(number: &Number) -> String {
    match number.unit() {
        Some(unit) => unit.to_string(),
        None => "a plain number".to_string(),
    }
}

pub(crate) fn unary(operator: UnaryOp, operand: &Value, node: NodeId) -> Value {
    match (operator, operand) {
        (_, Value::Exception(_)) => operand.clone(),
        (UnaryOp::Negate, Value::Number(number)) => Value::Number(Number {
            amount: -number.amount,
            unit: number.unit.clone(),
        }),
        (UnaryOp::Not, Value::Boolean(value)) => Value::Boolean(!value),
        _ => mismatch(
            node,
            format!("cannot apply {} to {}", operator.symbol(), operand.type_name()),
        ),
    }
}

pub(crate) fn property(subject: &Value, name: &str, node: NodeId) -> Value {
    match subject {
        Value::Exception(_) => subject.clone(),
        Value::Structure(fields) => fields.get(name).cloned().unwrap_or_else(|| {
            Value::exception(
                ExceptionKind::UnknownName,
                format!("structure has no field `{name}`"),
                Some(node),
            )
        }),
        other => mismatch(
            node,
            format!("cannot read `{name}` of {}", other.type_name()),
        ),
    }
}

pub(crate) fn mismatch(node: NodeId, message: String) -> Value {
    Value::exception(ExceptionKind::RuntimeTypeMismatch, message, Some(node))
}
