use std::path::{Path, PathBuf};

/// Extensions compiled by the tool.
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts"];

/// Directory names never descended into nor watched.
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist", ".ghostts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Single bundled, inline-source-mapped artifact in the scratch directory.
    Run,
    /// One artifact per source file, mirrored under the output root.
    Build,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Build => write!(f, "build"),
        }
    }
}

/// What to compile and where the result goes. Built once per invocation.
///
/// In run mode `output_root` is the scratch directory; in build mode
/// `entry_path` is the file currently being compiled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompilationUnit {
    entry_path: PathBuf,
    mode: Mode,
    source_root: PathBuf,
    output_root: PathBuf,
}

impl CompilationUnit {
    pub fn run(entry_path: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        let entry_path = entry_path.into();
        let source_root = entry_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            entry_path,
            mode: Mode::Run,
            source_root,
            output_root: scratch_dir.into(),
        }
    }

    pub fn build(
        entry_path: impl Into<PathBuf>,
        source_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            entry_path: entry_path.into(),
            mode: Mode::Build,
            source_root: source_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Where the compiled artifact for this unit lands.
    ///
    /// Run mode always writes `<scratch>/run.js`. Build mode mirrors the entry
    /// path relative to the source root; an entry outside the source root keeps
    /// only its file name.
    pub fn artifact_path(&self) -> PathBuf {
        match self.mode {
            Mode::Run => self.output_root.join("run.js"),
            Mode::Build => {
                let relative = self
                    .entry_path
                    .strip_prefix(&self.source_root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| {
                        self.entry_path
                            .file_name()
                            .map(PathBuf::from)
                            .unwrap_or_default()
                    });
                output_path(&self.output_root, &relative)
            }
        }
    }
}

/// Maps a source path relative to the source root onto the output root.
///
/// `a/b.ts` under `dist` becomes `dist/a/b.js`.
pub fn output_path(output_root: &Path, relative: &Path) -> PathBuf {
    output_root.join(relative).with_extension("js")
}

/// True for compilable sources; declaration files are skipped.
pub fn is_source_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let has_source_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
    has_source_ext && !is_declaration_file(name)
}

fn is_declaration_file(name: &str) -> bool {
    [".d.ts", ".d.mts", ".d.cts"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// True when any component of `path` is one of the ignored directory names.
pub fn is_ignored(path: &Path, ignored: &[String]) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| ignored.iter().any(|i| i == name))
    })
}

pub fn default_ignored_dirs() -> Vec<String> {
    IGNORED_DIRS.iter().map(|d| d.to_string()).collect()
}
