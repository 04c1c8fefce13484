// Field environment: insertion-ordered, name-indexed, scope-chained

use rustc_hash::FxHashMap;

use crate::name::{Name, StringInterner};
use crate::value::Value;

/// A decoded record: the raw value plus where it came from.
#[derive(Debug, Clone)]
pub struct Field {
    /// Enclosing block at decode time; None for synthesized fields.
    pub block: Option<Name>,
    pub id: Name,
    /// Absolute bit offset of the first decoded bit.
    pub pos: u64,
    /// Width in bits; zero for fields not read from the input.
    pub len: u64,
    /// Iteration index of the nearest enclosing repeat.
    pub iter: i64,
    pub raw: Value,
    pub eng: Option<Value>,
}

impl Field {
    pub fn synthesized(id: Name, raw: Value) -> Self {
        Self {
            block: None,
            id,
            pos: 0,
            len: 0,
            iter: 0,
            raw,
            eng: None,
        }
    }

    /// Engineering side, falling back to the raw value.
    pub fn eng(&self) -> &Value {
        self.eng.as_ref().unwrap_or(&self.raw)
    }

    /// Fields named with a leading underscore (or nothing) are decoded but
    /// kept out of output records.
    pub fn hidden(&self, interner: &StringInterner) -> bool {
        let id = interner.resolve(self.id);
        id.is_empty() || id.starts_with('_')
    }
}

/// Ordered field store with a last-position index per name and an optional
/// parent scope. Writes append; reads find the most recent definition,
/// then consult the parent chain.
#[derive(Default)]
pub struct Environment {
    fields: Vec<Field>,
    index: FxHashMap<Name, usize>,
    parent: Option<Box<Environment>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enclosed(parent: Environment) -> Self {
        Self {
            fields: Vec::new(),
            index: FxHashMap::default(),
            parent: Some(Box::new(parent)),
        }
    }

    pub fn define(&mut self, field: Field) {
        self.index.insert(field.id, self.fields.len());
        self.fields.push(field);
    }

    pub fn resolve(&self, name: Name) -> Option<&Field> {
        match self.index.get(&name) {
            Some(&ix) => self.fields.get(ix),
            None => self.parent.as_deref().and_then(|p| p.resolve(name)),
        }
    }

    /// Remove every field with this name from the current scope; with
    /// `all`, walk the parent chain too.
    pub fn delete(&mut self, name: Name, all: bool) {
        if self.index.remove(&name).is_some() {
            self.fields.retain(|f| f.id != name);
            self.reindex();
        }
        if all {
            if let Some(parent) = self.parent.as_deref_mut() {
                parent.delete(name, all);
            }
        }
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (ix, f) in self.fields.iter().enumerate() {
            self.index.insert(f.id, ix);
        }
    }

    /// Fields in this scope, insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Total field count including parents.
    pub fn len(&self) -> usize {
        self.fields.len() + self.parent.as_deref().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every field, keeping allocated capacity for the next pass.
    pub fn clear(&mut self) {
        self.fields.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(interner: &mut StringInterner, id: &str, v: u64) -> Field {
        Field::synthesized(interner.intern(id), Value::Uint(v))
    }

    #[test]
    fn test_define_and_resolve() {
        let mut interner = StringInterner::new();
        let mut env = Environment::new();
        env.define(field(&mut interner, "a", 1));
        let a = interner.intern("a");
        assert_eq!(env.resolve(a).unwrap().raw, Value::Uint(1));
        assert!(env.resolve(interner.intern("b")).is_none());
    }

    #[test]
    fn test_resolve_returns_latest() {
        let mut interner = StringInterner::new();
        let mut env = Environment::new();
        env.define(field(&mut interner, "v", 1));
        env.define(field(&mut interner, "v", 2));
        let v = interner.intern("v");
        assert_eq!(env.resolve(v).unwrap().raw, Value::Uint(2));
        assert_eq!(env.fields().len(), 2);
    }

    #[test]
    fn test_delete_removes_all_occurrences() {
        let mut interner = StringInterner::new();
        let mut env = Environment::new();
        env.define(field(&mut interner, "v", 1));
        env.define(field(&mut interner, "w", 9));
        env.define(field(&mut interner, "v", 2));
        env.delete(interner.intern("v"), false);
        assert_eq!(env.fields().len(), 1);
        let w = interner.intern("w");
        assert_eq!(env.resolve(w).unwrap().raw, Value::Uint(9));
        assert!(env.resolve(interner.intern("v")).is_none());
    }

    #[test]
    fn test_parent_chain() {
        let mut interner = StringInterner::new();
        let mut outer = Environment::new();
        outer.define(field(&mut interner, "x", 10));
        let mut env = Environment::enclosed(outer);
        env.define(field(&mut interner, "y", 20));

        assert_eq!(env.resolve(interner.intern("x")).unwrap().raw, Value::Uint(10));
        assert_eq!(env.resolve(interner.intern("y")).unwrap().raw, Value::Uint(20));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_shadowing_prefers_inner() {
        let mut interner = StringInterner::new();
        let mut outer = Environment::new();
        outer.define(field(&mut interner, "x", 1));
        let mut env = Environment::enclosed(outer);
        env.define(field(&mut interner, "x", 2));
        assert_eq!(env.resolve(interner.intern("x")).unwrap().raw, Value::Uint(2));
    }

    #[test]
    fn test_recursive_delete() {
        let mut interner = StringInterner::new();
        let mut outer = Environment::new();
        outer.define(field(&mut interner, "x", 1));
        let mut env = Environment::enclosed(outer);
        env.define(field(&mut interner, "x", 2));
        env.delete(interner.intern("x"), true);
        assert!(env.resolve(interner.intern("x")).is_none());
        assert_eq!(env.len(), 0);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut interner = StringInterner::new();
        let mut env = Environment::new();
        for i in 0..32 {
            env.define(field(&mut interner, &format!("f{}", i), i));
        }
        let cap = env.fields.capacity();
        env.clear();
        assert!(env.is_empty());
        assert_eq!(env.fields.capacity(), cap);
    }

    #[test]
    fn test_hidden_fields() {
        let mut interner = StringInterner::new();
        let shown = field(&mut interner, "data_len", 1);
        let hidden = field(&mut interner, "_pad", 0);
        assert!(!shown.hidden(&interner));
        assert!(hidden.hidden(&interner));
    }
}
