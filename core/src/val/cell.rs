use std::sync::{Arc, PoisonError, RwLock};

use super::Val;

/// A heap-shared mutable value slot.
///
/// Every upvalue is a `Variable`, and so is every local that a nested
/// closure captures: capturing clones the handle, never the value, so a
/// write through any alias is visible to all holders. Lifetime is the
/// longest holder via reference counting.
#[derive(Debug, Clone)]
pub struct Variable(Arc<RwLock<Val>>);

impl Variable {
    pub fn new(value: Val) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> Val {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, value: Val) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Two handles alias the same slot.
    pub fn same_cell(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_observe_mutation() {
        let a = Variable::new(Val::Int(1));
        let b = a.clone();
        b.set(Val::Int(7));
        assert_eq!(a.get(), Val::Int(7));
        assert!(a.same_cell(&b));
    }

    #[test]
    fn independent_cells_do_not_alias() {
        let a = Variable::new(Val::Nil);
        let b = Variable::new(Val::Nil);
        assert!(!a.same_cell(&b));
    }
}
