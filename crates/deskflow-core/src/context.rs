//! Run-scoped variable store
//!
//! The execution context holds every variable visible to a run: a global
//! layer seeded from the trigger payload and the workflow's variable
//! defaults, plus one scope per active loop iteration. Reads coerce values
//! to the declared variable type when one exists, best-effort otherwise.

use crate::domain::workflow::{NodeId, VariableDeclaration};
use crate::error::EngineError;
use crate::types::{self, VariableType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One loop-iteration scope
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scope {
    /// The loop node that owns this scope
    owner: NodeId,
    /// Iteration bindings plus any undeclared writes made inside the body
    bindings: HashMap<String, Value>,
}

/// Mutable variable store scoped to one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    globals: HashMap<String, Value>,
    scopes: Vec<Scope>,
    declared: HashMap<String, VariableType>,
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from workflow variable defaults and a trigger payload
    ///
    /// Payload fields win over variable defaults. Non-object payloads are
    /// bound under the single variable `payload`.
    pub fn seeded(variables: &[VariableDeclaration], payload: &Value) -> Self {
        let mut context = Self::new();
        for declaration in variables {
            context
                .declared
                .insert(declaration.name.clone(), declaration.var_type);
            if let Some(default) = &declaration.default {
                context
                    .globals
                    .insert(declaration.name.clone(), default.clone());
            }
        }
        match payload {
            Value::Object(fields) => {
                for (name, value) in fields {
                    context.globals.insert(name.clone(), value.clone());
                }
            }
            other => {
                context
                    .globals
                    .insert("payload".to_string(), other.clone());
            }
        }
        context
    }

    /// Read a variable, coerced per its declaration when one exists
    pub fn get(&self, name: &str) -> Option<Value> {
        let raw = self.get_raw(name)?.clone();
        Some(match self.declared.get(name) {
            Some(var_type) => types::coerce_declared(*var_type, raw),
            None => types::coerce_best_effort(raw),
        })
    }

    /// Read a variable without coercion
    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.bindings.get(name) {
                return Some(value);
            }
        }
        self.globals.get(name)
    }

    /// Write a variable
    ///
    /// Names declared as workflow variables always write to the global
    /// layer, so loop bodies can publish results past their own iteration.
    /// Everything else writes to the innermost scope when one is open.
    pub fn set(&mut self, name: &str, value: Value) {
        if self.declared.contains_key(name) || self.scopes.is_empty() {
            self.globals.insert(name.to_string(), value);
        } else if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string(), value);
        }
    }

    /// Write directly to the global layer, bypassing scope routing
    ///
    /// Used for the engine's reserved bookkeeping keys.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Remove a global entry
    pub fn remove_global(&mut self, name: &str) {
        self.globals.remove(name);
    }

    /// Fork a child context for one loop iteration
    ///
    /// The child sees every parent binding plus the iteration bindings;
    /// undeclared writes land in the iteration scope and vanish when the
    /// loop exits.
    pub fn fork(&self, owner: &NodeId, bindings: HashMap<String, Value>) -> Self {
        let mut child = self.clone();
        child.scopes.push(Scope {
            owner: owner.clone(),
            bindings,
        });
        child
    }

    /// Drop every scope owned by the given loop node
    pub fn exit_scope(&mut self, owner: &NodeId) {
        self.scopes.retain(|scope| &scope.owner != owner);
    }

    /// Resolve a dotted path, with or without a leading `$`
    ///
    /// The first segment names a context variable, the rest descend into
    /// its structured value.
    pub fn lookup_path(&self, path: &str) -> Option<Value> {
        let path = path.strip_prefix('$').unwrap_or(path);
        match path.split_once('.') {
            Some((head, rest)) => {
                let root = self.get(head)?;
                types::resolve_path(&root, rest).cloned()
            }
            None => self.get(path),
        }
    }

    /// Substitute `$variable` tokens in an action parameter payload
    ///
    /// Only whole-string tokens are substituted, recursively through
    /// arrays and objects; an unresolvable token is a runtime error.
    /// Reserved `$__` keys are never treated as tokens.
    pub fn resolve_params(&self, params: &Value) -> Result<Value, EngineError> {
        match params {
            Value::String(s) if s.len() > 1 && s.starts_with('$') && !s.starts_with("$__") => self
                .lookup_path(s)
                .ok_or_else(|| EngineError::UnresolvedVariable(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_params(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.resolve_params(value)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Snapshot of the global layer, persisted with the run
    pub fn snapshot(&self) -> Value {
        Value::Object(self.globals.clone().into_iter().collect())
    }
}
