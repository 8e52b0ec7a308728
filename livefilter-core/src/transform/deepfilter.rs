//! DeepFilterNet binding through its C API, loaded at run time.
//!
//! C API (libDF `capi` feature):
//! - `df_create(model_path, atten_lim, log_level) -> *mut DFState`
//! - `df_get_frame_length(*mut DFState) -> usize`
//! - `df_process_frame(*mut DFState, *mut f32, *mut f32) -> f32`
//! - `df_set_atten_lim(*mut DFState, f32)`
//! - `df_set_post_filter_beta(*mut DFState, f32)`
//! - `df_free(*mut DFState)`
//! - optional: `df_next_log_msg(*mut DFState) -> *mut c_char`,
//!   `df_free_log_msg(*mut c_char)`
//!
//! The library path is resolved by the caller; nothing here searches for it.

#![allow(unsafe_code)]

use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{EngineError, FrameError, Result};
use crate::transform::{FrameProcessor, TransformFactory, TransformRequest};

/// Upper bound on native log lines forwarded per drain.
const MAX_LOG_LINES_PER_DRAIN: usize = 64;

/// Opaque native state.
#[repr(C)]
pub struct DFState {
    _private: [u8; 0],
}

type DfCreateFn =
    unsafe extern "C" fn(path: *const c_char, atten_lim: f32, log_level: *const c_char) -> *mut DFState;
type DfGetFrameLengthFn = unsafe extern "C" fn(*mut DFState) -> usize;
type DfProcessFrameFn =
    unsafe extern "C" fn(st: *mut DFState, input: *mut f32, output: *mut f32) -> f32;
type DfSetAttenLimFn = unsafe extern "C" fn(*mut DFState, f32);
type DfSetPostFilterBetaFn = unsafe extern "C" fn(*mut DFState, f32);
type DfFreeFn = unsafe extern "C" fn(*mut DFState);
type DfNextLogMsgFn = unsafe extern "C" fn(*mut DFState) -> *mut c_char;
type DfFreeLogMsgFn = unsafe extern "C" fn(*mut c_char);

/// Resolved symbols of one loaded `libdf`.
pub struct DeepFilterLibrary {
    path: PathBuf,
    df_create: DfCreateFn,
    df_get_frame_length: DfGetFrameLengthFn,
    df_process_frame: DfProcessFrameFn,
    df_set_atten_lim: DfSetAttenLimFn,
    df_set_post_filter_beta: DfSetPostFilterBetaFn,
    df_free: DfFreeFn,
    df_next_log_msg: Option<DfNextLogMsgFn>,
    df_free_log_msg: Option<DfFreeLogMsgFn>,
    // Function pointers above are only valid while this is loaded.
    _library: Library,
}

impl DeepFilterLibrary {
    /// Load the shared library at `path` and resolve every required symbol.
    ///
    /// # Errors
    /// `CreationFailed` if the file is missing, cannot be loaded, or lacks a
    /// required symbol.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(EngineError::CreationFailed(format!(
                "native library not found at {}",
                path.display()
            )));
        }

        // SAFETY: loading runs the library's initialisers. The path was
        // resolved by the host application to a libdf build.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            EngineError::CreationFailed(format!("failed to load {}: {e}", path.display()))
        })?;

        // SAFETY: every signature below matches libDF's `capi.rs`.
        unsafe {
            let df_create = required::<DfCreateFn>(&library, b"df_create\0")?;
            let df_get_frame_length =
                required::<DfGetFrameLengthFn>(&library, b"df_get_frame_length\0")?;
            let df_process_frame = required::<DfProcessFrameFn>(&library, b"df_process_frame\0")?;
            let df_set_atten_lim = required::<DfSetAttenLimFn>(&library, b"df_set_atten_lim\0")?;
            let df_set_post_filter_beta =
                required::<DfSetPostFilterBetaFn>(&library, b"df_set_post_filter_beta\0")?;
            let df_free = required::<DfFreeFn>(&library, b"df_free\0")?;
            let df_next_log_msg = optional::<DfNextLogMsgFn>(&library, b"df_next_log_msg\0");
            let df_free_log_msg = optional::<DfFreeLogMsgFn>(&library, b"df_free_log_msg\0");

            Ok(Self {
                path: path.to_path_buf(),
                df_create,
                df_get_frame_length,
                df_process_frame,
                df_set_atten_lim,
                df_set_post_filter_beta,
                df_free,
                df_next_log_msg,
                df_free_log_msg,
                _library: library,
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_log_hooks(&self) -> bool {
        self.df_next_log_msg.is_some() && self.df_free_log_msg.is_some()
    }
}

unsafe fn required<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    library.get::<T>(name).map(|sym| *sym).map_err(|e| {
        EngineError::CreationFailed(format!(
            "missing symbol {}: {e}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        ))
    })
}

unsafe fn optional<T: Copy>(library: &Library, name: &[u8]) -> Option<T> {
    library.get::<T>(name).map(|sym| *sym).ok()
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path
        .to_str()
        .ok_or_else(|| {
            EngineError::CreationFailed(format!("model path is not UTF-8: {}", path.display()))
        })?
        .as_bytes()
        .to_vec();

    CString::new(bytes).map_err(|_| {
        EngineError::CreationFailed(format!("model path contains NUL: {}", path.display()))
    })
}

/// One live DeepFilterNet instance.
pub struct DeepFilterRuntime {
    lib: Arc<DeepFilterLibrary>,
    /// Null once destroyed.
    state: *mut DFState,
    frame_len: usize,
}

// SAFETY: the native state is only touched through `&mut self`, and the
// engine serialises every call behind one mutex, so it is never used from two
// threads at once. libDF keeps no thread-local state per instance.
unsafe impl Send for DeepFilterRuntime {}

impl DeepFilterRuntime {
    /// # Errors
    /// `CreationFailed` if the model is missing or `df_create` returns null.
    pub fn create(lib: Arc<DeepFilterLibrary>, request: &TransformRequest) -> Result<Self> {
        if !request.model_path.is_file() {
            return Err(EngineError::CreationFailed(format!(
                "model file not found at {}",
                request.model_path.display()
            )));
        }

        let model = path_to_cstring(&request.model_path)?;
        let log_level = request
            .log_level
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| EngineError::CreationFailed("log level contains NUL".into()))?;
        let log_ptr = log_level.as_ref().map_or(ptr::null(), |s| s.as_ptr());

        // SAFETY: both strings outlive the call; df_create copies what it needs.
        let state = unsafe { (lib.df_create)(model.as_ptr(), request.attenuation_db, log_ptr) };
        if state.is_null() {
            return Err(EngineError::CreationFailed(format!(
                "df_create returned null for model {}",
                request.model_path.display()
            )));
        }

        // SAFETY: `state` is a live handle from df_create.
        let frame_len = unsafe { (lib.df_get_frame_length)(state) };
        if frame_len == 0 {
            // SAFETY: freed once, never used again.
            unsafe { (lib.df_free)(state) };
            return Err(EngineError::CreationFailed(
                "df_get_frame_length returned 0".into(),
            ));
        }

        if request.log_level.is_some() && !lib.has_log_hooks() {
            warn!(
                library = %lib.path().display(),
                "native library has no log hooks; native log output is dropped"
            );
        }

        info!(
            library = %lib.path().display(),
            frame_len,
            "DeepFilterNet runtime created"
        );

        Ok(Self {
            lib,
            state,
            frame_len,
        })
    }
}

impl FrameProcessor for DeepFilterRuntime {
    fn frame_length(&self) -> usize {
        self.frame_len
    }

    fn set_attenuation_limit(&mut self, db: f32) {
        if self.state.is_null() {
            return;
        }
        // SAFETY: live handle, exclusive access.
        unsafe { (self.lib.df_set_atten_lim)(self.state, db) };
    }

    fn set_post_filter_beta(&mut self, beta: f32) {
        if self.state.is_null() {
            return;
        }
        // SAFETY: live handle, exclusive access.
        unsafe { (self.lib.df_set_post_filter_beta)(self.state, beta) };
    }

    fn process_frame(
        &mut self,
        input: &[f32],
        output: &mut [f32],
    ) -> std::result::Result<f32, FrameError> {
        assert_eq!(input.len(), self.frame_len, "input must be exactly one frame");
        assert_eq!(output.len(), self.frame_len, "output must be exactly one frame");
        if self.state.is_null() {
            return Err(FrameError::Destroyed);
        }

        // SAFETY: both buffers hold exactly frame_len samples. The C API
        // takes `input` as *mut but only reads from it.
        let snr = unsafe {
            (self.lib.df_process_frame)(self.state, input.as_ptr() as *mut f32, output.as_mut_ptr())
        };

        if snr.is_nan() {
            return Err(FrameError::Transform("df_process_frame returned NaN"));
        }
        Ok(snr)
    }

    fn destroy(&mut self) {
        if self.state.is_null() {
            return;
        }
        // SAFETY: non-null means not yet freed; nulled right after.
        unsafe { (self.lib.df_free)(self.state) };
        self.state = ptr::null_mut();
    }

    fn drain_log_messages(&mut self, sink: &mut dyn FnMut(&str)) {
        let (Some(next), Some(free)) = (self.lib.df_next_log_msg, self.lib.df_free_log_msg) else {
            return;
        };
        if self.state.is_null() {
            return;
        }

        for _ in 0..MAX_LOG_LINES_PER_DRAIN {
            // SAFETY: live handle; returned strings are owned by us until
            // passed back to df_free_log_msg.
            let msg = unsafe { next(self.state) };
            if msg.is_null() {
                break;
            }
            let line = unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned();
            unsafe { free(msg) };
            sink(&line);
        }
    }
}

impl Drop for DeepFilterRuntime {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Creates `DeepFilterRuntime`s from one library path. The library is loaded
/// on first use and kept loaded for later creations.
pub struct DeepFilterFactory {
    library_path: PathBuf,
    library: Mutex<Option<Arc<DeepFilterLibrary>>>,
}

impl DeepFilterFactory {
    pub fn new(library_path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
            library: Mutex::new(None),
        }
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn library(&self) -> Result<Arc<DeepFilterLibrary>> {
        let mut slot = self.library.lock();
        if let Some(lib) = slot.as_ref() {
            return Ok(Arc::clone(lib));
        }
        let lib = Arc::new(DeepFilterLibrary::load(&self.library_path)?);
        info!(library = %self.library_path.display(), "native library loaded");
        *slot = Some(Arc::clone(&lib));
        Ok(lib)
    }
}

impl TransformFactory for DeepFilterFactory {
    fn create(&self, request: &TransformRequest) -> Result<Box<dyn FrameProcessor>> {
        let lib = self.library()?;
        Ok(Box::new(DeepFilterRuntime::create(lib, request)?))
    }
}
