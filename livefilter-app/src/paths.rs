//! Locating the native denoiser library and the model artifact.
//!
//! Precedence: environment variable, then the settings file, then the usual
//! build output locations under each search root. An override that points at
//! a missing file is logged and skipped.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::warn;

pub const LIBRARY_ENV: &str = "DEEPFILTER_DYLIB";
pub const MODEL_ENV: &str = "DF_MODEL_TAR";

const LIBRARY_STEMS: &[&str] = &["df", "deepfilter"];
const LIBRARY_DIRS: &[&str] = &[
    "target/release",
    "target/debug",
    "libDF/target/release",
    "libDF/target/debug",
];
const MODEL_CANDIDATES: &[&str] = &[
    "models/DeepFilterNet3_onnx.tar.gz",
    "models/DeepFilterNet2_onnx.tar.gz",
];

/// Directories searched for build outputs: the working directory and the
/// directory holding the executable.
pub fn search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        if !roots.contains(&dir) {
            roots.push(dir);
        }
    }
    roots
}

pub fn resolve_library(configured: Option<&Path>) -> Result<PathBuf> {
    resolve_library_from(std::env::var_os(LIBRARY_ENV), configured, &search_roots())
}

pub fn resolve_model(configured: Option<&Path>) -> Result<PathBuf> {
    resolve_model_from(std::env::var_os(MODEL_ENV), configured, &search_roots())
}

pub fn library_candidates(root: &Path) -> Vec<PathBuf> {
    LIBRARY_DIRS
        .iter()
        .flat_map(|dir| {
            LIBRARY_STEMS
                .iter()
                .map(move |stem| root.join(dir).join(format!("{DLL_PREFIX}{stem}{DLL_SUFFIX}")))
        })
        .collect()
}

pub fn resolve_library_from(
    env: Option<OsString>,
    configured: Option<&Path>,
    roots: &[PathBuf],
) -> Result<PathBuf> {
    if let Some(path) = env.filter(|v| !v.is_empty()).map(PathBuf::from) {
        if path.is_file() {
            return Ok(path);
        }
        warn!("{LIBRARY_ENV} points to {} which does not exist", path.display());
    }
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!("configured library {} does not exist", path.display());
    }

    let candidates: Vec<PathBuf> = roots.iter().flat_map(|r| library_candidates(r)).collect();
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    bail!(
        "{DLL_PREFIX}df{DLL_SUFFIX} not found; build libDF with the capi feature or set \
         {LIBRARY_ENV} to the library path (searched {} locations)",
        candidates.len()
    )
}

pub fn resolve_model_from(
    env: Option<OsString>,
    configured: Option<&Path>,
    roots: &[PathBuf],
) -> Result<PathBuf> {
    if let Some(path) = env.filter(|v| !v.is_empty()).map(PathBuf::from) {
        if path.is_file() {
            return Ok(path);
        }
        warn!("{MODEL_ENV} points to {} which does not exist", path.display());
    }
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!("configured model {} does not exist", path.display());
    }

    for root in roots {
        for candidate in MODEL_CANDIDATES {
            let path = root.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
        }
    }
    bail!(
        "model not found; expected {} or set {MODEL_ENV} to a model archive",
        MODEL_CANDIDATES[0]
    )
}
