use std::io;
use std::path::PathBuf;

/// Standard directories used by dapctl.
pub trait Paths: Send + Sync {
    /// `~/.config/dapctl`
    fn config_dir(&self) -> PathBuf;
    /// `~/.local/share/dapctl`
    fn data_dir(&self) -> PathBuf;
    /// `<data_dir>/logs`
    fn log_dir(&self) -> PathBuf;
    /// Default breakpoint persistence file, `<data_dir>/breakpoints.json`.
    fn breakpoints_file(&self) -> PathBuf;
}

/// [`Paths`] rooted at the user's home directory.
pub struct DefaultPaths {
    home: PathBuf,
}

impl DefaultPaths {
    /// Resolve the home directory through `dirs`, falling back to `$HOME`.
    pub fn new() -> io::Result<Self> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not determine home directory"))?;
        Ok(Self { home })
    }

    /// Paths under an explicit root, for tests and `--config-dir` style overrides.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl Paths for DefaultPaths {
    fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join("dapctl")
    }

    fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join("dapctl")
    }

    fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    fn breakpoints_file(&self) -> PathBuf {
        self.data_dir().join("breakpoints.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_are_under_home() {
        let paths = DefaultPaths::with_home("/home/me");
        assert_eq!(paths.config_dir(), PathBuf::from("/home/me/.config/dapctl"));
        assert_eq!(paths.data_dir(), PathBuf::from("/home/me/.local/share/dapctl"));
    }

    #[test]
    fn log_dir_and_breakpoints_are_under_data_dir() {
        let paths = DefaultPaths::with_home("/home/me");
        assert!(paths.log_dir().starts_with(paths.data_dir()));
        assert!(paths.breakpoints_file().starts_with(paths.data_dir()));
        assert!(paths.breakpoints_file().ends_with("breakpoints.json"));
    }

    #[test]
    fn default_paths_resolve_home() {
        let paths = DefaultPaths::new().expect("should resolve home directory");
        assert!(paths.config_dir().ends_with(".config/dapctl"));
    }

    #[test]
    fn default_paths_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DefaultPaths>();
    }
}
