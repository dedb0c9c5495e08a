//! Breakpoint persistence between runs.
use std::path::Path;

use anyhow::{Context, Result};

use dapctl_dap::Breakpoints;

/// Load a saved breakpoint set. A missing file leaves `breakpoints` empty.
pub(crate) fn load_breakpoints(path: &Path, breakpoints: &Breakpoints) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))?;
    breakpoints
        .load_json(&value)
        .with_context(|| format!("failed to load breakpoints from {}", path.display()))?;
    tracing::info!("loaded breakpoints from {}", path.display());
    Ok(())
}

pub(crate) fn save_breakpoints(path: &Path, breakpoints: &Breakpoints) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(&breakpoints.into_json())?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("saved breakpoints to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let breakpoints = Breakpoints::new();
        load_breakpoints(&tmp.path().join("none.json"), &breakpoints).unwrap();
        assert!(breakpoints.all().is_empty());
    }

    #[test]
    fn saved_breakpoints_load_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("breakpoints.json");

        let breakpoints = Breakpoints::new();
        breakpoints.source.add("/src/main.rs", 10, None);
        breakpoints.function.add("main");
        save_breakpoints(&path, &breakpoints).unwrap();

        let restored = Breakpoints::new();
        load_breakpoints(&path, &restored).unwrap();
        let lines: Vec<i64> = restored.source.all().iter().map(|b| b.line()).collect();
        assert_eq!(lines, vec![10]);
        assert_eq!(restored.function.all().len(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("breakpoints.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_breakpoints(&path, &Breakpoints::new()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid JSON"));
    }
}
