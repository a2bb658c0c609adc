//! Tool configuration.
//!
//! There is no config file. Engine programs are found through environment
//! overrides, then the project's `node_modules/.bin`, then `PATH`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    check::{TscChecker, TypeChecker},
    compile::{Bundler, EsbuildBundler},
    process::{NodeSpawner, ProcessSpawner},
};

pub const TSC_ENV: &str = "GHOSTTS_TSC";
pub const ESBUILD_ENV: &str = "GHOSTTS_ESBUILD";
pub const NODE_ENV: &str = "GHOSTTS_NODE";

pub const SCRATCH_DIR: &str = ".ghostts";
pub const DEFAULT_OUT_DIR: &str = "./dist";

pub const GRACE_PERIOD: Duration = Duration::from_millis(1000);
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
pub const STDERR_QUIET: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub root: PathBuf,
    pub tsc: PathBuf,
    pub esbuild: PathBuf,
    pub node: PathBuf,
    pub scratch_dir: PathBuf,
    pub grace_period: Duration,
    pub shutdown_grace_period: Duration,
    pub debounce_window: Duration,
    pub stderr_quiet: Duration,
    pub clear_screen: bool,
}

impl ToolConfig {
    /// Configuration for a project rooted at `root`, honouring environment overrides.
    pub fn from_env(root: impl Into<PathBuf>) -> Self {
        Self::resolve(root, |key| std::env::var(key).ok())
    }

    /// Like [`ToolConfig::from_env`] with an explicit variable lookup.
    pub fn resolve(root: impl Into<PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let root = root.into();
        let tsc = resolve_program(&root, lookup(TSC_ENV), "tsc");
        let esbuild = resolve_program(&root, lookup(ESBUILD_ENV), "esbuild");
        let node = lookup(NODE_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("node"));
        Self {
            scratch_dir: root.join(SCRATCH_DIR),
            root,
            tsc,
            esbuild,
            node,
            grace_period: GRACE_PERIOD,
            shutdown_grace_period: GRACE_PERIOD,
            debounce_window: DEBOUNCE_WINDOW,
            stderr_quiet: STDERR_QUIET,
            clear_screen: true,
        }
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self.shutdown_grace_period = self.shutdown_grace_period.min(grace);
        self
    }

    /// Grace period used on interrupt; never longer than the restart one.
    #[must_use]
    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace.min(self.grace_period);
        self
    }

    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    #[must_use]
    pub fn with_clear_screen(mut self, clear_screen: bool) -> Self {
        self.clear_screen = clear_screen;
        self
    }

    pub fn checker(&self) -> Arc<dyn TypeChecker> {
        Arc::new(TscChecker::new(&self.tsc))
    }

    pub fn bundler(&self) -> Arc<dyn Bundler> {
        Arc::new(EsbuildBundler::new(&self.esbuild))
    }

    pub fn spawner(&self) -> Arc<dyn ProcessSpawner> {
        Arc::new(NodeSpawner::new(&self.node))
    }
}

fn resolve_program(root: &Path, env_value: Option<String>, name: &str) -> PathBuf {
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(value);
    }
    let local = root.join("node_modules").join(".bin").join(name);
    if local.is_file() {
        return local;
    }
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig::resolve(dir.path(), |_| None);
        assert_eq!(config.tsc, PathBuf::from("tsc"));
        assert_eq!(config.esbuild, PathBuf::from("esbuild"));
        assert_eq!(config.node, PathBuf::from("node"));
        assert_eq!(config.scratch_dir, dir.path().join(".ghostts"));
        assert_eq!(config.grace_period, Duration::from_millis(1000));
        assert!(config.clear_screen);
    }

    #[test]
    fn local_binaries_win_over_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("node_modules/.bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("tsc"), "").unwrap();

        let config = ToolConfig::resolve(dir.path(), |_| None);
        assert_eq!(config.tsc, bin.join("tsc"));
        assert_eq!(config.esbuild, PathBuf::from("esbuild"));
    }

    #[test]
    fn environment_wins_over_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolConfig::resolve(dir.path(), |key| match key {
            TSC_ENV => Some("/opt/ts/bin/tsc".into()),
            NODE_ENV => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.tsc, PathBuf::from("/opt/ts/bin/tsc"));
        assert_eq!(config.node, PathBuf::from("node"));
    }

    #[test]
    fn shutdown_grace_never_exceeds_restart_grace() {
        let config = ToolConfig::resolve(".", |_| None)
            .with_grace_period(Duration::from_millis(500))
            .with_shutdown_grace_period(Duration::from_secs(5));
        assert_eq!(config.shutdown_grace_period, Duration::from_millis(500));
    }
}
