//! Tree interchange format.
//!
//! The parser and static analysis live outside this crate. They hand trees
//! over as nested [`Expr`] values, usually JSON tagged by `kind`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::node::{BinaryOp, Diagnostic, NodeId, UnaryOp};
use super::tree::{Tree, TreeBuilder};
use crate::error::TreeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Number {
        amount: f64,
        #[serde(default)]
        unit: Option<String>,
    },
    Text {
        text: String,
    },
    Boolean {
        value: bool,
    },
    List {
        #[serde(default)]
        items: Vec<Expr>,
    },
    Structure {
        fields: IndexMap<String, Expr>,
    },
    Property {
        subject: Box<Expr>,
        name: String,
    },
    Reference {
        name: String,
    },
    Binary {
        first: Box<Expr>,
        rest: Vec<(BinaryOp, Expr)>,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        yes: Box<Expr>,
        no: Box<Expr>,
    },
    Function {
        #[serde(default)]
        parameters: Vec<String>,
        body: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        #[serde(default)]
        arguments: Vec<Expr>,
    },
    Bind {
        name: String,
        value: Box<Expr>,
    },
    Block {
        statements: Vec<Expr>,
    },
    Stream {
        name: String,
    },
    Changed {
        stream: String,
    },
    Reaction {
        initial: Box<Expr>,
        #[serde(default)]
        condition: Option<Box<Expr>>,
        next: Box<Expr>,
    },
    Previous,
    Placeholder,
    /// Any expression with a diagnostic attached by static analysis.
    Diagnosed {
        diagnostic: Diagnostic,
        expr: Box<Expr>,
    },
}

impl Expr {
    /// Add this expression and everything below it to `b`.
    pub fn build(&self, b: &mut TreeBuilder) -> NodeId {
        match self {
            Expr::Number { amount, unit } => match unit {
                Some(unit) => b.measure(*amount, unit),
                None => b.number(*amount),
            },
            Expr::Text { text } => b.text(text),
            Expr::Boolean { value } => b.boolean(*value),
            Expr::List { items } => {
                let items: Vec<_> = items.iter().map(|item| item.build(b)).collect();
                b.list(items)
            }
            Expr::Structure { fields } => {
                let values: Vec<_> = fields.values().map(|value| value.build(b)).collect();
                b.structure(fields.keys().map(String::as_str).zip(values))
            }
            Expr::Property { subject, name } => {
                let subject = subject.build(b);
                b.property(subject, name)
            }
            Expr::Reference { name } => b.reference(name),
            Expr::Binary { first, rest } => {
                let first = first.build(b);
                let rest: Vec<_> = rest
                    .iter()
                    .map(|(operator, operand)| (*operator, operand.build(b)))
                    .collect();
                b.chain(first, rest)
            }
            Expr::Unary { operator, operand } => {
                let operand = operand.build(b);
                b.unary(*operator, operand)
            }
            Expr::Conditional { condition, yes, no } => {
                let condition = condition.build(b);
                let yes = yes.build(b);
                let no = no.build(b);
                b.conditional(condition, yes, no)
            }
            Expr::Function { parameters, body } => {
                let body = body.build(b);
                let parameters: Vec<&str> = parameters.iter().map(String::as_str).collect();
                b.function(&parameters, body)
            }
            Expr::Call { callee, arguments } => {
                let callee = callee.build(b);
                let arguments: Vec<_> = arguments.iter().map(|arg| arg.build(b)).collect();
                b.call(callee, arguments)
            }
            Expr::Bind { name, value } => {
                let value = value.build(b);
                b.bind(name, value)
            }
            Expr::Block { statements } => {
                let statements: Vec<_> = statements.iter().map(|s| s.build(b)).collect();
                b.block(statements)
            }
            Expr::Stream { name } => b.stream(name),
            Expr::Changed { stream } => b.changed(stream),
            Expr::Reaction {
                initial,
                condition,
                next,
            } => {
                let initial = initial.build(b);
                match condition {
                    Some(condition) => {
                        let condition = condition.build(b);
                        let next = next.build(b);
                        b.reaction_when(initial, condition, next)
                    }
                    None => {
                        let next = next.build(b);
                        b.reaction(initial, next)
                    }
                }
            }
            Expr::Previous => b.previous(),
            Expr::Placeholder => b.placeholder(),
            Expr::Diagnosed { diagnostic, expr } => {
                let id = expr.build(b);
                b.diagnose(id, diagnostic.clone());
                id
            }
        }
    }
}

impl Tree {
    pub fn from_expr(expr: &Expr) -> Result<Tree, TreeError> {
        let mut builder = TreeBuilder::new();
        let body = expr.build(&mut builder);
        builder.finish(body)
    }

    pub fn from_json(json: &str) -> Result<Tree, TreeError> {
        let expr: Expr = serde_json::from_str(json)?;
        Self::from_expr(&expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    #[test]
    fn parses_operator_chain() {
        let tree = Tree::from_json(
            r#"{
                "kind": "binary",
                "first": {"kind": "number", "amount": 2},
                "rest": [
                    ["add", {"kind": "number", "amount": 3}],
                    ["multiply", {"kind": "number", "amount": 2}]
                ]
            }"#,
        )
        .unwrap();

        let body = tree.children(tree.root())[0];
        match tree.kind(body) {
            NodeKind::Binary { operators } => {
                assert_eq!(operators.as_slice(), &[BinaryOp::Add, BinaryOp::Multiply]);
            }
            other => panic!("expected binary, got {other:?}"),
        }
        assert_eq!(tree.children(body).len(), 3);
    }

    #[test]
    fn parses_reaction_with_condition_and_diagnostic() {
        let tree = Tree::from_json(
            r#"{
                "kind": "reaction",
                "initial": {"kind": "number", "amount": 0},
                "condition": {"kind": "changed", "stream": "time"},
                "next": {
                    "kind": "diagnosed",
                    "diagnostic": {"severity": "blocking", "message": "bad"},
                    "expr": {"kind": "placeholder"}
                }
            }"#,
        )
        .unwrap();

        let reaction = tree.children(tree.root())[0];
        assert_eq!(tree.kind(reaction), &NodeKind::Reaction);
        let next = tree.children(reaction)[2];
        assert!(tree.node(next).is_blocked());
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(matches!(
            Tree::from_json(r#"{"kind": "loop"}"#),
            Err(TreeError::Json(_))
        ));
    }
}
