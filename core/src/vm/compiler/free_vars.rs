//! Capture analysis.
//!
//! Decides, before a function body is lowered, which of its locals inner
//! function literals reach. Those locals (and parameters) live in shared
//! cells; everything else stays a plain register. The analysis is
//! name-based: a shadowed name may promote an outer local to a cell it did
//! not strictly need, which costs an indirection but never changes meaning.

use crate::ast::{AssignTarget, Block, Expr, FuncBody, Stmt, TableItem};
use crate::util::fast_map::{FastHashSet, fast_hash_set_new};

/// Names referenced by some function literal nested anywhere in `body`
/// that the literal does not bind itself. Intersect with the enclosing
/// function's locals to get its capture set.
pub fn captured_by_inner(body: &Block) -> FastHashSet<String> {
    let mut wanted = fast_hash_set_new();
    collect_inner(body, &mut wanted);
    wanted
}

fn collect_inner(block: &Block, wanted: &mut FastHashSet<String>) {
    for stmt in block {
        each_expr_in_stmt(stmt, &mut |e| {
            if let Expr::Function(fb) = e {
                wanted.extend(free_names(fb));
            }
        });
        match stmt {
            Stmt::If { arms, else_body } => {
                for (_, b) in arms {
                    collect_inner(b, wanted);
                }
                if let Some(b) = else_body {
                    collect_inner(b, wanted);
                }
            }
            Stmt::While(_, b) | Stmt::Do(b) => collect_inner(b, wanted),
            _ => {}
        }
    }
}

/// Free names of one function literal: everything referenced inside it
/// (nested literals included) that its own parameters and locals do not
/// bind at the point of use.
pub fn free_names(fb: &FuncBody) -> FastHashSet<String> {
    let mut c = Collector {
        scopes: vec![fb.params.iter().cloned().collect()],
        free: fast_hash_set_new(),
    };
    c.block(&fb.body);
    c.free
}

struct Collector {
    scopes: Vec<FastHashSet<String>>,
    free: FastHashSet<String>,
}

impl Collector {
    fn bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn reference(&mut self, name: &str) {
        if !self.bound(name) {
            self.free.insert(name.to_string());
        }
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(fast_hash_set_new());
        for stmt in block {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Local(names, exprs) => {
                // The right side sees the outer bindings.
                for e in exprs {
                    self.expr(e);
                }
                if let Some(scope) = self.scopes.last_mut() {
                    scope.extend(names.iter().cloned());
                }
            }
            Stmt::Assign(targets, exprs) => {
                for t in targets {
                    match t {
                        AssignTarget::Name(n) => self.reference(n),
                        AssignTarget::Index(o, k) => {
                            self.expr(o);
                            self.expr(k);
                        }
                    }
                }
                for e in exprs {
                    self.expr(e);
                }
            }
            Stmt::If { arms, else_body } => {
                for (cond, body) in arms {
                    self.expr(cond);
                    self.block(body);
                }
                if let Some(body) = else_body {
                    self.block(body);
                }
            }
            Stmt::While(cond, body) => {
                self.expr(cond);
                self.block(body);
            }
            Stmt::Do(body) => self.block(body),
            Stmt::Return(exprs) => {
                for e in exprs {
                    self.expr(e);
                }
            }
            Stmt::Expr(e) => self.expr(e),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(n) => self.reference(n),
            Expr::Un(_, e) => self.expr(e),
            Expr::Bin(l, _, r) => {
                self.expr(l);
                self.expr(r);
            }
            Expr::Index(o, k) => {
                self.expr(o);
                self.expr(k);
            }
            Expr::Call(f, args) => {
                self.expr(f);
                for a in args {
                    self.expr(a);
                }
            }
            Expr::Function(fb) => {
                // The literal's free names that we don't bind are ours too.
                for name in free_names(fb) {
                    self.reference(&name);
                }
            }
            Expr::Table(items) => {
                for item in items {
                    match item {
                        TableItem::Pair(k, v) => {
                            self.expr(k);
                            self.expr(v);
                        }
                        TableItem::Item(v) => self.expr(v),
                    }
                }
            }
            _ => {}
        }
    }
}

fn each_expr_in_stmt(stmt: &Stmt, f: &mut dyn FnMut(&Expr)) {
    match stmt {
        Stmt::Local(_, exprs) | Stmt::Return(exprs) => {
            for e in exprs {
                each_expr(e, f);
            }
        }
        Stmt::Assign(targets, exprs) => {
            for t in targets {
                if let AssignTarget::Index(o, k) = t {
                    each_expr(o, f);
                    each_expr(k, f);
                }
            }
            for e in exprs {
                each_expr(e, f);
            }
        }
        Stmt::If { arms, .. } => {
            for (cond, _) in arms {
                each_expr(cond, f);
            }
        }
        Stmt::While(cond, _) => each_expr(cond, f),
        Stmt::Do(_) => {}
        Stmt::Expr(e) => each_expr(e, f),
    }
}

fn each_expr(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::Un(_, e) => each_expr(e, f),
        Expr::Bin(l, _, r) => {
            each_expr(l, f);
            each_expr(r, f);
        }
        Expr::Index(o, k) => {
            each_expr(o, f);
            each_expr(k, f);
        }
        Expr::Call(g, args) => {
            each_expr(g, f);
            for a in args {
                each_expr(a, f);
            }
        }
        Expr::Table(items) => {
            for item in items {
                match item {
                    TableItem::Pair(k, v) => {
                        each_expr(k, f);
                        each_expr(v, f);
                    }
                    TableItem::Item(v) => each_expr(v, f),
                }
            }
        }
        // Function literals are a boundary: their bodies are analyzed by
        // `free_names`, not walked from the outside.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{ArithOp, BinOp};

    fn fn_reading(name: &str) -> Expr {
        Expr::Function(FuncBody {
            params: vec![],
            is_vararg: false,
            body: vec![Stmt::Return(vec![Expr::name(name)])],
            name: None,
        })
    }

    #[test]
    fn inner_literal_reference_is_captured() {
        let body = vec![
            Stmt::Local(vec!["x".into()], vec![Expr::Int(1)]),
            Stmt::Local(vec!["f".into()], vec![fn_reading("x")]),
        ];
        let captured = captured_by_inner(&body);
        assert!(captured.contains("x"));
    }

    #[test]
    fn own_locals_are_not_free() {
        let fb = FuncBody {
            params: vec!["a".into()],
            is_vararg: false,
            body: vec![
                Stmt::Local(vec!["b".into()], vec![Expr::Int(2)]),
                Stmt::Return(vec![Expr::bin(
                    Expr::name("a"),
                    BinOp::Arith(ArithOp::Add),
                    Expr::name("b"),
                )]),
            ],
            name: None,
        };
        assert!(free_names(&fb).is_empty());
    }

    #[test]
    fn transitive_capture_through_nested_literal() {
        // The middle literal never mentions x itself; its grandchild does.
        let inner = fn_reading("x");
        let middle = Expr::Function(FuncBody {
            params: vec![],
            is_vararg: false,
            body: vec![Stmt::Return(vec![inner])],
            name: None,
        });
        let body = vec![
            Stmt::Local(vec!["x".into()], vec![Expr::Int(1)]),
            Stmt::Expr(middle),
        ];
        assert!(captured_by_inner(&body).contains("x"));
    }

    #[test]
    fn shadowed_name_is_bound_not_free() {
        let fb = FuncBody {
            params: vec![],
            is_vararg: false,
            body: vec![
                Stmt::Local(vec!["x".into()], vec![Expr::Int(1)]),
                Stmt::Return(vec![Expr::name("x")]),
            ],
            name: None,
        };
        assert!(!free_names(&fb).contains("x"));
    }
}
