use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
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

/// A line breakpoint in a file. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBreakpoint {
    pub id: BreakpointId,
    pub file: PathBuf,
    /// What is sent to the adapter.
    pub dap: protocol::SourceBreakpoint,
    pub enabled: bool,
    pub results: BreakpointResults,
}

impl SourceBreakpoint {
    fn new(file: PathBuf, line: i64, column: Option<i64>, enabled: bool) -> Self {
        Self {
            id: BreakpointId::next(),
            file,
            dap: protocol::SourceBreakpoint {
                line,
                column,
                condition: None,
                hit_condition: None,
                log_message: None,
            },
            enabled,
            results: BreakpointResults::default(),
        }
    }

    /// File name without its directory.
    pub fn name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.to_string_lossy().into_owned())
    }

    /// `line` or `line:column`.
    pub fn tag(&self) -> String {
        match self.column() {
            Some(column) => format!("{}:{}", self.line(), column),
            None => self.line().to_string(),
        }
    }

    /// Line where the breakpoint actually is, as reported by an adapter.
    pub fn line(&self) -> i64 {
        self.results
            .current()
            .and_then(|r| r.line)
            .unwrap_or(self.dap.line)
    }

    pub fn column(&self) -> Option<i64> {
        self.results
            .current()
            .and_then(|r| r.column)
            .or(self.dap.column)
    }

    fn sort_key(&self) -> (PathBuf, i64, i64) {
        (self.file.clone(), self.line(), self.column().unwrap_or(0))
    }
}

/// Mutable fields of a [`SourceBreakpoint`]. Empty strings clear the field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceBreakpointEdit {
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedSourceBreakpoint {
    file: PathBuf,
    line: i64,
    #[serde(default)]
    column: Option<i64>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    log_message: Option<String>,
    #[serde(default)]
    hit_condition: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

/// All source breakpoints, kept sorted by file, line and column.
pub struct SourceBreakpoints {
    breakpoints: Mutex<Vec<SourceBreakpoint>>,
    notifier: Arc<Notifier>,
}

impl SourceBreakpoints {
    pub(crate) fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            breakpoints: Mutex::new(Vec::new()),
            notifier,
        }
    }

    fn send(&self, file: PathBuf) {
        self.notifier
            .send(BreakpointKind::Source, SendTarget::SourceFile(file));
    }

    /// Add a breakpoint unless one was already requested at the same spot.
    pub fn add(&self, file: impl Into<PathBuf>, line: i64, column: Option<i64>) -> Option<BreakpointId> {
        let file = file.into();
        let id = {
            let mut breakpoints = self.breakpoints.lock();
            let exists = breakpoints
                .iter()
                .any(|b| b.file == file && b.dap.line == line && b.dap.column == column);
            if exists {
                return None;
            }
            let breakpoint = SourceBreakpoint::new(file.clone(), line, column, true);
            let id = breakpoint.id;
            breakpoints.push(breakpoint);
            breakpoints.sort_by_key(SourceBreakpoint::sort_key);
            id
        };
        self.send(file);
        Some(id)
    }

    pub fn remove(&self, id: BreakpointId) -> bool {
        let removed = {
            let mut breakpoints = self.breakpoints.lock();
            breakpoints
                .iter()
                .position(|b| b.id == id)
                .map(|index| breakpoints.remove(index))
        };
        match removed {
            Some(breakpoint) => {
                self.send(breakpoint.file);
                true
            }
            None => false,
        }
    }

    pub fn remove_all(&self) {
        let removed = std::mem::take(&mut *self.breakpoints.lock());
        let mut files: Vec<PathBuf> = removed.into_iter().map(|b| b.file).collect();
        files.dedup();
        for file in files {
            self.send(file);
        }
    }

    pub fn toggle_enabled(&self, id: BreakpointId) -> bool {
        let file = self.with_breakpoint(id, |b| {
            b.enabled = !b.enabled;
            b.file.clone()
        });
        match file {
            Some(file) => {
                self.send(file);
                true
            }
            None => false,
        }
    }

    /// Remove the breakpoint shown at this position, or add one.
    pub fn toggle(&self, file: impl Into<PathBuf>, line: i64, column: Option<i64>) {
        let file = file.into();
        let existing = self
            .breakpoints
            .lock()
            .iter()
            .find(|b| b.file == file && b.line() == line && b.column() == column)
            .map(|b| b.id);
        match existing {
            Some(id) => {
                self.remove(id);
            }
            None => {
                self.add(file, line, column);
            }
        }
    }

    pub fn edit(&self, id: BreakpointId) -> Option<SourceBreakpointEdit> {
        self.get(id).map(|b| SourceBreakpointEdit {
            condition: b.dap.condition,
            hit_condition: b.dap.hit_condition,
            log_message: b.dap.log_message,
            enabled: b.enabled,
        })
    }

    pub fn apply_edit(&self, id: BreakpointId, edit: SourceBreakpointEdit) -> bool {
        let file = self.with_breakpoint(id, |b| {
            b.dap.condition = non_empty(edit.condition);
            b.dap.hit_condition = non_empty(edit.hit_condition);
            b.dap.log_message = non_empty(edit.log_message);
            b.enabled = edit.enabled;
            b.file.clone()
        });
        match file {
            Some(file) => {
                self.send(file);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: BreakpointId) -> Option<SourceBreakpoint> {
        self.breakpoints.lock().iter().find(|b| b.id == id).cloned()
    }

    pub fn all(&self) -> Vec<SourceBreakpoint> {
        self.breakpoints.lock().clone()
    }

    pub fn breakpoints_for_file(&self, file: &Path) -> Vec<SourceBreakpoint> {
        self.breakpoints
            .lock()
            .iter()
            .filter(|b| b.file == file)
            .cloned()
            .collect()
    }

    pub fn breakpoints_per_file(&self) -> BTreeMap<PathBuf, Vec<SourceBreakpoint>> {
        let mut per_file: BTreeMap<PathBuf, Vec<SourceBreakpoint>> = BTreeMap::new();
        for breakpoint in self.breakpoints.lock().iter() {
            per_file
                .entry(breakpoint.file.clone())
                .or_default()
                .push(breakpoint.clone());
        }
        per_file
    }

    pub fn breakpoints_on_line(&self, file: &Path, line: i64) -> Vec<SourceBreakpoint> {
        self.breakpoints
            .lock()
            .iter()
            .filter(|b| b.file == file && b.line() == line)
            .cloned()
            .collect()
    }

    pub(crate) fn set_result(&self, id: BreakpointId, session: SessionId, result: BreakpointResult) {
        if self
            .with_breakpoint(id, |b| b.results.set(session, result))
            .is_some()
        {
            self.notifier.updated(BreakpointKind::Source);
        }
    }

    pub(crate) fn clear_session_results(&self, session: SessionId) {
        let cleared = self
            .breakpoints
            .lock()
            .iter_mut()
            .fold(false, |any, b| b.results.clear(session) || any);
        if cleared {
            self.notifier.updated(BreakpointKind::Source);
        }
    }

    pub fn into_json(&self) -> Value {
        let saved: Vec<SavedSourceBreakpoint> = self
            .breakpoints
            .lock()
            .iter()
            .map(|b| SavedSourceBreakpoint {
                file: b.file.clone(),
                line: b.dap.line,
                column: b.dap.column,
                enabled: b.enabled,
                condition: b.dap.condition.clone(),
                log_message: b.dap.log_message.clone(),
                hit_condition: b.dap.hit_condition.clone(),
            })
            .collect();
        serde_json::to_value(saved).unwrap_or(Value::Null)
    }

    pub fn load_json(&self, value: &Value) -> Result<(), DapError> {
        let saved: Vec<SavedSourceBreakpoint> =
            serde_json::from_value(value.clone()).map_err(|e| invalid_json("source", e))?;
        let mut loaded: Vec<SourceBreakpoint> = saved
            .into_iter()
            .map(|s| {
                let mut breakpoint = SourceBreakpoint::new(s.file, s.line, s.column, s.enabled);
                breakpoint.dap.condition = s.condition;
                breakpoint.dap.log_message = s.log_message;
                breakpoint.dap.hit_condition = s.hit_condition;
                breakpoint
            })
            .collect();
        loaded.sort_by_key(SourceBreakpoint::sort_key);
        *self.breakpoints.lock() = loaded;
        self.notifier.updated(BreakpointKind::Source);
        Ok(())
    }

    fn with_breakpoint<T>(&self, id: BreakpointId, f: impl FnOnce(&mut SourceBreakpoint) -> T) -> Option<T> {
        self.breakpoints.lock().iter_mut().find(|b| b.id == id).map(f)
    }
}
