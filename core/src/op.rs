use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Arithmetic operators subject to metamethod fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    /// Metamethod name consulted when no built-in semantics apply.
    pub fn metamethod(&self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
        }
    }
}

impl Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "^",
        };
        write!(f, "{s}")
    }
}

/// Comparison operators. `Ne`, `Gt` and `Ge` have no metamethods of their
/// own; dispatch rewrites them in terms of `Eq`, `Lt` and `Le`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "~=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// Source-level binary operators; the compiler lowers `And`/`Or` to jumps
/// and everything else to a dedicated instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Arith(ArithOp),
    Cmp(CmpOp),
    Concat,
    And,
    Or,
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinOp::Arith(op) => write!(f, "{op}"),
            BinOp::Cmp(op) => write!(f, "{op}"),
            BinOp::Concat => write!(f, ".."),
            BinOp::And => write!(f, "and"),
            BinOp::Or => write!(f, "or"),
        }
    }
}

/// Source-level unary operators. `Not` is pure; `Neg` and `Len` can reach
/// `__unm` / `__len` and therefore lower to suspendable instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

impl Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnOp::Neg => "-",
            UnOp::Not => "not",
            UnOp::Len => "#",
        };
        write!(f, "{s}")
    }
}
