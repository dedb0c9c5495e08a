use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    invalid_json, non_empty, BreakpointId, BreakpointKind, BreakpointResult, BreakpointResults,
    Notifier, SendTarget,
};
use crate::error::DapError;
use crate::protocol;
use crate::session::SessionId;

/// Breaks when a named function is entered.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBreakpoint {
    pub id: BreakpointId,
    pub dap: protocol::FunctionBreakpoint,
    pub enabled: bool,
    pub results: BreakpointResults,
}

/// Mutable fields of a [`FunctionBreakpoint`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionBreakpointEdit {
    /// Ignored when empty.
    pub name: String,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub enabled: bool,
}

#[derive(Serialize, Deserialize)]
struct SavedFunctionBreakpoint {
    dap: protocol::FunctionBreakpoint,
    enabled: bool,
}

pub struct FunctionBreakpoints {
    breakpoints: Mutex<Vec<FunctionBreakpoint>>,
    notifier: Arc<Notifier>,
}

impl FunctionBreakpoints {
    pub(crate) fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            breakpoints: Mutex::new(Vec::new()),
            notifier,
        }
    }

    fn send(&self) {
        self.notifier
            .send(BreakpointKind::Function, SendTarget::Function);
    }

    pub fn add(&self, name: impl Into<String>) -> BreakpointId {
        let id = BreakpointId::next();
        self.breakpoints.lock().push(FunctionBreakpoint {
            id,
            dap: protocol::FunctionBreakpoint {
                name: name.into(),
                condition: None,
                hit_condition: None,
            },
            enabled: true,
            results: BreakpointResults::default(),
        });
        self.send();
        id
    }

    pub fn remove(&self, id: BreakpointId) -> bool {
        let removed = {
            let mut breakpoints = self.breakpoints.lock();
            let before = breakpoints.len();
            breakpoints.retain(|b| b.id != id);
            before != breakpoints.len()
        };
        if removed {
            self.send();
        }
        removed
    }

    pub fn remove_all(&self) {
        self.breakpoints.lock().clear();
        self.send();
    }

    pub fn toggle_enabled(&self, id: BreakpointId) -> bool {
        let found = self.with_breakpoint(id, |b| b.enabled = !b.enabled).is_some();
        if found {
            self.send();
        }
        found
    }

    pub fn edit(&self, id: BreakpointId) -> Option<FunctionBreakpointEdit> {
        self.get(id).map(|b| FunctionBreakpointEdit {
            name: b.dap.name,
            condition: b.dap.condition,
            hit_condition: b.dap.hit_condition,
            enabled: b.enabled,
        })
    }

    pub fn apply_edit(&self, id: BreakpointId, edit: FunctionBreakpointEdit) -> bool {
        let found = self
            .with_breakpoint(id, |b| {
                if !edit.name.is_empty() {
                    b.dap.name = edit.name;
                }
                b.dap.condition = non_empty(edit.condition);
                b.dap.hit_condition = non_empty(edit.hit_condition);
                b.enabled = edit.enabled;
            })
            .is_some();
        if found {
            self.send();
        }
        found
    }

    pub fn get(&self, id: BreakpointId) -> Option<FunctionBreakpoint> {
        self.breakpoints.lock().iter().find(|b| b.id == id).cloned()
    }

    pub fn all(&self) -> Vec<FunctionBreakpoint> {
        self.breakpoints.lock().clone()
    }

    pub(crate) fn set_result(&self, id: BreakpointId, session: SessionId, result: BreakpointResult) {
        if self
            .with_breakpoint(id, |b| b.results.set(session, result))
            .is_some()
        {
            self.notifier.updated(BreakpointKind::Function);
        }
    }

    pub(crate) fn clear_session_results(&self, session: SessionId) {
        for breakpoint in self.breakpoints.lock().iter_mut() {
            breakpoint.results.clear(session);
        }
        self.notifier.updated(BreakpointKind::Function);
    }

    pub fn into_json(&self) -> Value {
        let saved: Vec<SavedFunctionBreakpoint> = self
            .breakpoints
            .lock()
            .iter()
            .map(|b| SavedFunctionBreakpoint {
                dap: b.dap.clone(),
                enabled: b.enabled,
            })
            .collect();
        serde_json::to_value(saved).unwrap_or(Value::Null)
    }

    pub fn load_json(&self, value: &Value) -> Result<(), DapError> {
        let saved: Vec<SavedFunctionBreakpoint> =
            serde_json::from_value(value.clone()).map_err(|e| invalid_json("function", e))?;
        *self.breakpoints.lock() = saved
            .into_iter()
            .map(|s| FunctionBreakpoint {
                id: BreakpointId::next(),
                dap: s.dap,
                enabled: s.enabled,
                results: BreakpointResults::default(),
            })
            .collect();
        self.notifier.updated(BreakpointKind::Function);
        Ok(())
    }

    fn with_breakpoint<T>(&self, id: BreakpointId, f: impl FnOnce(&mut FunctionBreakpoint) -> T) -> Option<T> {
        self.breakpoints.lock().iter_mut().find(|b| b.id == id).map(f)
    }
}
