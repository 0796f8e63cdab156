//! The lowered surface syntax fed to the compiler.
//!
//! This is a small, already-desugared tree: no source positions, no sugar
//! forms. Producing it (from a parser, a macro, or by hand in tests) is the
//! host's business.

use serde::{Deserialize, Serialize};

use crate::op::{BinOp, UnOp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    /// `...` — only valid inside a vararg function.
    Vararg,
    /// A name: a local, an upvalue, or (neither in scope) a global read
    /// through `_ENV`.
    Name(String),
    Un(UnOp, Box<Expr>),
    Bin(Box<Expr>, BinOp, Box<Expr>),
    /// `obj[key]`; `obj.field` desugars to a string key.
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Function(FuncBody),
    /// Table constructor: positional items and explicit pairs, in order.
    Table(Vec<TableItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableItem {
    /// `[k] = v` or `name = v`.
    Pair(Expr, Expr),
    /// Positional item, appended at the next integer index from 1.
    Item(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Name(String),
    Index(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `local a, b = e1, e2` — declares after evaluating the right side.
    Local(Vec<String>, Vec<Expr>),
    Assign(Vec<AssignTarget>, Vec<Expr>),
    If {
        /// `(condition, body)` for the `if` and each `elseif`.
        arms: Vec<(Expr, Block)>,
        else_body: Option<Block>,
    },
    While(Expr, Block),
    Do(Block),
    Return(Vec<Expr>),
    Expr(Expr),
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncBody {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    /// Diagnostic name; chunks and anonymous literals get a placeholder.
    pub name: Option<String>,
}

impl Expr {
    pub fn name<S: Into<String>>(s: S) -> Expr {
        Expr::Name(s.into())
    }

    pub fn str<S: Into<String>>(s: S) -> Expr {
        Expr::Str(s.into())
    }

    pub fn bin(lhs: Expr, op: BinOp, rhs: Expr) -> Expr {
        Expr::Bin(Box::new(lhs), op, Box::new(rhs))
    }

    pub fn index(obj: Expr, key: Expr) -> Expr {
        Expr::Index(Box::new(obj), Box::new(key))
    }

    pub fn call(f: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(Box::new(f), args)
    }
}

impl FuncBody {
    /// A chunk: a vararg body with no parameters.
    pub fn chunk(body: Block) -> FuncBody {
        FuncBody {
            params: Vec::new(),
            is_vararg: true,
            body,
            name: None,
        }
    }
}
