//! The `build` command: transpile a whole source tree, one artifact per file.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, info};

use crate::{
    compile::Bundler,
    error::BuildError,
    report::{Report, Reporter},
    unit::{is_source_file, CompilationUnit, IGNORED_DIRS},
};

/// Cleans `out_dir`, then compiles every eligible file under `src_dir` into it.
///
/// Stops at the first file that fails to compile.
pub async fn build_project(
    src_dir: &Path,
    out_dir: &Path,
    bundler: &dyn Bundler,
    reporter: &dyn Reporter,
) -> Result<Vec<PathBuf>, BuildError> {
    if !src_dir.is_dir() {
        return Err(BuildError::MissingSourceDir(src_dir.to_path_buf()));
    }
    reporter.report(Report::status("Building TypeScript project..."));
    reporter.report(Report::status(format!("   Source: {}", src_dir.display())));
    reporter.report(Report::status(format!("   Output: {}", out_dir.display())));

    clean_output_dir(out_dir).await?;
    reporter.report(Report::status(format!("Cleaned {}", out_dir.display())));

    let sources = collect_sources(src_dir, out_dir)?;
    if sources.is_empty() {
        reporter.report(Report::status(format!(
            "No TypeScript files found in {}",
            src_dir.display()
        )));
        return Ok(Vec::new());
    }
    reporter.report(Report::status(format!(
        "Found {} TypeScript files",
        sources.len()
    )));

    let mut artifacts = Vec::with_capacity(sources.len());
    for source in sources {
        let unit = CompilationUnit::build(&source, src_dir, out_dir);
        let artifact = bundler.compile(&unit).await?;
        reporter.report(Report::status(format!(
            "Built: {} -> {}",
            source.display(),
            artifact.display()
        )));
        artifacts.push(artifact);
    }

    info!(count = artifacts.len(), out_dir = %out_dir.display(), "build finished");
    reporter.report(Report::status(format!(
        "Successfully compiled {} file(s)",
        artifacts.len()
    )));
    reporter.report(Report::status(format!(
        "Output directory: {}",
        out_dir.display()
    )));
    Ok(artifacts)
}

async fn clean_output_dir(out_dir: &Path) -> Result<(), BuildError> {
    match tokio::fs::remove_dir_all(out_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(BuildError::Clean {
                path: out_dir.to_path_buf(),
                source,
            })
        }
    }
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|source| BuildError::Clean {
            path: out_dir.to_path_buf(),
            source,
        })
}

/// Every compilable file under `src_dir`, sorted, skipping ignored directories
/// and the output directory itself.
pub fn collect_sources(src_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let out_dir = out_dir.to_path_buf();
    let walker = WalkBuilder::new(src_dir)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            let ignored_name = entry
                .file_name()
                .to_str()
                .is_some_and(|name| IGNORED_DIRS.contains(&name));
            !ignored_name && !same_dir(entry.path(), &out_dir)
        })
        .build();

    let mut sources = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| BuildError::Scan {
            path: src_dir.to_path_buf(),
            source,
        })?;
        let is_file = entry.file_type().is_some_and(|t| t.is_file());
        if is_file && is_source_file(entry.path()) {
            sources.push(entry.into_path());
        }
    }
    debug!(count = sources.len(), src_dir = %src_dir.display(), "collected sources");
    Ok(sources)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
