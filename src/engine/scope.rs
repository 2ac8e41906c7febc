//! Lexical scopes
//!
//! Each block, function call and loop iteration gets its own scope chained
//! to the enclosing one. Closures keep their defining scope alive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<String, Slot>,
    parent: Option<ScopeRef>,
}

/// Why an assignment was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Bind a name in this scope, replacing any earlier binding here
    pub fn declare(&mut self, name: impl Into<String>, value: Value, mutable: bool) {
        self.vars.insert(name.into(), Slot { value, mutable });
    }

    /// Remove every binding in this scope, returning the bound values
    pub(crate) fn take_values(&mut self) -> Vec<Value> {
        self.vars.drain().map(|(_, slot)| slot.value).collect()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let mut pending = self.take_values();
        super::value::dismantle(&mut pending);
    }
}

/// Find the value bound to `name`, walking outwards
pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
    let mut current = Rc::clone(scope);
    loop {
        let next = {
            let s = current.borrow();
            if let Some(slot) = s.vars.get(name) {
                return Some(slot.value.clone());
            }
            s.parent.clone()
        };
        current = next?;
    }
}

/// Update the nearest binding of `name`
pub fn assign(scope: &ScopeRef, name: &str, value: Value) -> Result<(), AssignError> {
    let mut current = Rc::clone(scope);
    loop {
        let next = {
            let mut s = current.borrow_mut();
            if let Some(slot) = s.vars.get_mut(name) {
                if !slot.mutable {
                    return Err(AssignError::Constant);
                }
                slot.value = value;
                return Ok(());
            }
            s.parent.clone()
        };
        current = next.ok_or(AssignError::Undeclared)?;
    }
}
