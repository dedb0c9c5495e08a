use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    invalid_json, non_empty, BreakpointId, BreakpointKind, BreakpointResult, BreakpointResults,
    Notifier, SendTarget,
};
use crate::error::DapError;
use crate::protocol::{self, DataBreakpointAccessType, DataBreakpointInfoResponse};
use crate::session::SessionId;

/// Breaks when a piece of data is accessed.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBreakpoint {
    pub id: BreakpointId,
    pub dap: protocol::DataBreakpoint,
    /// The `dataBreakpointInfo` answer the breakpoint was created from.
    pub info: DataBreakpointInfoResponse,
    pub enabled: bool,
    pub results: BreakpointResults,
}

impl DataBreakpoint {
    fn can_persist(&self) -> bool {
        self.info.can_persist.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataBreakpointEdit {
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub enabled: bool,
}

#[derive(Serialize, Deserialize)]
struct SavedDataBreakpoint {
    dap: protocol::DataBreakpoint,
    info: DataBreakpointInfoResponse,
    enabled: bool,
}

pub struct DataBreakpoints {
    breakpoints: Mutex<Vec<DataBreakpoint>>,
    notifier: Arc<Notifier>,
}

impl DataBreakpoints {
    pub(crate) fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            breakpoints: Mutex::new(Vec::new()),
            notifier,
        }
    }

    fn send(&self) {
        self.notifier.send(BreakpointKind::Data, SendTarget::Data);
    }

    /// Add a breakpoint from a `dataBreakpointInfo` answer, which must
    /// carry a data id.
    pub fn add(
        &self,
        info: DataBreakpointInfoResponse,
        access_type: Option<DataBreakpointAccessType>,
    ) -> Result<BreakpointId, DapError> {
        let data_id = info
            .data_id
            .clone()
            .ok_or_else(|| DapError::Other(format!("no data breakpoint available for {}", info.description)))?;
        let id = BreakpointId::next();
        self.breakpoints.lock().push(DataBreakpoint {
            id,
            dap: protocol::DataBreakpoint {
                data_id,
                access_type,
                condition: None,
                hit_condition: None,
            },
            info,
            enabled: true,
            results: BreakpointResults::default(),
        });
        self.send();
        Ok(id)
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

    /// Drop breakpoints whose data id is only valid in the session that
    /// produced it.
    pub fn remove_unpersistable(&self) {
        self.breakpoints.lock().retain(DataBreakpoint::can_persist);
        self.send();
    }

    /// Like [`remove_unpersistable`](Self::remove_unpersistable), for use
    /// after a session ended and there is nothing to push to.
    pub(crate) fn clear_session_data(&self) {
        self.breakpoints.lock().retain(DataBreakpoint::can_persist);
        self.notifier.updated(BreakpointKind::Data);
    }

    pub fn toggle_enabled(&self, id: BreakpointId) -> bool {
        let found = self.with_breakpoint(id, |b| b.enabled = !b.enabled).is_some();
        if found {
            self.send();
        }
        found
    }

    pub fn edit(&self, id: BreakpointId) -> Option<DataBreakpointEdit> {
        self.get(id).map(|b| DataBreakpointEdit {
            condition: b.dap.condition,
            hit_condition: b.dap.hit_condition,
            enabled: b.enabled,
        })
    }

    pub fn apply_edit(&self, id: BreakpointId, edit: DataBreakpointEdit) -> bool {
        let found = self
            .with_breakpoint(id, |b| {
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

    pub fn get(&self, id: BreakpointId) -> Option<DataBreakpoint> {
        self.breakpoints.lock().iter().find(|b| b.id == id).cloned()
    }

    pub fn all(&self) -> Vec<DataBreakpoint> {
        self.breakpoints.lock().clone()
    }

    pub(crate) fn set_result(&self, id: BreakpointId, session: SessionId, result: BreakpointResult) {
        if self
            .with_breakpoint(id, |b| b.results.set(session, result))
            .is_some()
        {
            self.notifier.updated(BreakpointKind::Data);
        }
    }

    pub(crate) fn clear_session_results(&self, session: SessionId) {
        for breakpoint in self.breakpoints.lock().iter_mut() {
            breakpoint.results.clear(session);
        }
        self.notifier.updated(BreakpointKind::Data);
    }

    /// Persistable breakpoints only.
    pub fn into_json(&self) -> Value {
        let saved: Vec<SavedDataBreakpoint> = self
            .breakpoints
            .lock()
            .iter()
            .filter(|b| b.can_persist())
            .map(|b| SavedDataBreakpoint {
                dap: b.dap.clone(),
                info: b.info.clone(),
                enabled: b.enabled,
            })
            .collect();
        serde_json::to_value(saved).unwrap_or(Value::Null)
    }

    pub fn load_json(&self, value: &Value) -> Result<(), DapError> {
        let saved: Vec<SavedDataBreakpoint> =
            serde_json::from_value(value.clone()).map_err(|e| invalid_json("data", e))?;
        *self.breakpoints.lock() = saved
            .into_iter()
            .map(|s| DataBreakpoint {
                id: BreakpointId::next(),
                dap: s.dap,
                info: s.info,
                enabled: s.enabled,
                results: BreakpointResults::default(),
            })
            .collect();
        self.notifier.updated(BreakpointKind::Data);
        Ok(())
    }

    fn with_breakpoint<T>(&self, id: BreakpointId, f: impl FnOnce(&mut DataBreakpoint) -> T) -> Option<T> {
        self.breakpoints.lock().iter_mut().find(|b| b.id == id).map(f)
    }
}
