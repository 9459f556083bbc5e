//! Expression syntax tree.

use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Variable(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// The dotted path this node reads, when it is a pure variable/member chain.
    pub fn static_path(&self) -> Option<String> {
        match self {
            Expr::Variable(name) => Some(name.clone()),
            Expr::Member(base, name) => base.static_path().map(|p| format!("{p}.{name}")),
            _ => None,
        }
    }

    /// Collect every variable or member chain referenced by this tree.
    ///
    /// Chains are reported at their longest static extent (`a.b.c`, not `a`
    /// and `a.b`). Names in `builtins` are skipped.
    pub fn collect_variables(&self, builtins: &[&str], out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Variable(_) | Expr::Member(..) => {
                if let Some(path) = self.static_path() {
                    if !builtins.contains(&path.as_str()) {
                        out.insert(path);
                    }
                } else if let Expr::Member(base, _) = self {
                    base.collect_variables(builtins, out);
                }
            }
            Expr::Array(items) => {
                for item in items {
                    item.collect_variables(builtins, out);
                }
            }
            Expr::Index(base, index) => {
                base.collect_variables(builtins, out);
                index.collect_variables(builtins, out);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.collect_variables(builtins, out);
                }
            }
            Expr::Unary(_, operand) => operand.collect_variables(builtins, out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(builtins, out);
                rhs.collect_variables(builtins, out);
            }
            Expr::Conditional(cond, then, otherwise) => {
                cond.collect_variables(builtins, out);
                then.collect_variables(builtins, out);
                otherwise.collect_variables(builtins, out);
            }
        }
    }
}
