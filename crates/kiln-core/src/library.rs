//! Dynamic library loading
//!
//! Libraries are loaded through a [`LibraryPort`] so the platform binding can
//! be replaced (tests install an in-process port). A loaded [`Library`] is a
//! shared handle; the underlying native library is unloaded when the last
//! handle is dropped. The tier-1 [`LibraryTable`] deduplicates loads by path
//! and can resolve a raw native handle back to its [`Library`].

use crate::status::{KilnResult, Status};
use rustc_hash::FxHashMap;
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors reported by a library port
#[derive(Debug, Error)]
pub enum LoadError {
    /// Library file not found or could not be loaded
    #[error("library not loadable: {path}: {reason}")]
    NotLoadable {
        /// Path that was attempted
        path: PathBuf,
        /// Platform error text
        reason: String,
    },

    /// Symbol not found in library
    #[error("symbol not found: {symbol}")]
    SymbolNotFound {
        /// Symbol name that was not found
        symbol: String,
    },

    /// Path or symbol name contains an interior NUL
    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl From<LoadError> for Status {
    fn from(error: LoadError) -> Self {
        tracing::debug!(%error, "library operation failed");
        match error {
            LoadError::NotLoadable { .. } | LoadError::SymbolNotFound { .. } => Status::NotExists,
            LoadError::InvalidName(_) => Status::ArgumentValueInvalid,
        }
    }
}

/// Opaque native library handle, as returned by the platform loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawLibrary(usize);

impl RawLibrary {
    /// Wrap a native handle address
    pub fn from_address(address: usize) -> Self {
        Self(address)
    }

    /// Native handle address
    pub fn address(self) -> usize {
        self.0
    }
}

/// Platform binding for loading libraries and resolving symbols
pub trait LibraryPort: Send + Sync {
    /// Load the library at `path`
    fn load(&self, path: &Path) -> Result<RawLibrary, LoadError>;

    /// Resolve an exported symbol
    fn symbol(&self, library: RawLibrary, name: &str) -> Result<*const c_void, LoadError>;

    /// Unload a library previously returned by [`load`](LibraryPort::load)
    fn unload(&self, library: RawLibrary);
}

/// Library port backed by the operating system loader
///
/// - **Unix**: `dlopen(RTLD_NOW | RTLD_LOCAL)` / `dlsym` / `dlclose`
/// - **Windows**: `LoadLibraryW` / `GetProcAddress` / `FreeLibrary`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLibraryPort;

#[cfg(unix)]
impl LibraryPort for NativeLibraryPort {
    fn load(&self, path: &Path) -> Result<RawLibrary, LoadError> {
        use std::ffi::CStr;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| LoadError::InvalidName(e.to_string()))?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            let reason = unsafe {
                let err_ptr = libc::dlerror();
                if err_ptr.is_null() {
                    "unknown error".to_string()
                } else {
                    CStr::from_ptr(err_ptr).to_string_lossy().into_owned()
                }
            };
            return Err(LoadError::NotLoadable {
                path: path.to_path_buf(),
                reason,
            });
        }

        Ok(RawLibrary(handle as usize))
    }

    fn symbol(&self, library: RawLibrary, name: &str) -> Result<*const c_void, LoadError> {
        let c_name = CString::new(name).map_err(|e| LoadError::InvalidName(e.to_string()))?;

        let symbol = unsafe {
            // Clear any previous error
            libc::dlerror();
            libc::dlsym(library.0 as *mut c_void, c_name.as_ptr())
        };

        if symbol.is_null() {
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
            });
        }
        Ok(symbol as *const c_void)
    }

    fn unload(&self, library: RawLibrary) {
        unsafe {
            libc::dlclose(library.0 as *mut c_void);
        }
    }
}

#[cfg(windows)]
impl LibraryPort for NativeLibraryPort {
    fn load(&self, path: &Path) -> Result<RawLibrary, LoadError> {
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            let code = unsafe { GetLastError() };
            return Err(LoadError::NotLoadable {
                path: path.to_path_buf(),
                reason: format!("error code {}", code),
            });
        }

        Ok(RawLibrary(handle as usize))
    }

    fn symbol(&self, library: RawLibrary, name: &str) -> Result<*const c_void, LoadError> {
        let c_name = CString::new(name).map_err(|e| LoadError::InvalidName(e.to_string()))?;

        let symbol = unsafe { GetProcAddress(library.0 as *mut c_void, c_name.as_ptr()) };
        if symbol.is_null() {
            return Err(LoadError::SymbolNotFound {
                symbol: name.to_string(),
            });
        }
        Ok(symbol as *const c_void)
    }

    fn unload(&self, library: RawLibrary) {
        unsafe {
            FreeLibrary(library.0 as *mut c_void);
        }
    }
}

#[cfg(windows)]
extern "system" {
    fn LoadLibraryW(filename: *const u16) -> *mut c_void;
    fn GetProcAddress(module: *mut c_void, procname: *const std::ffi::c_char) -> *mut c_void;
    fn FreeLibrary(module: *mut c_void) -> i32;
    fn GetLastError() -> u32;
}

struct LibraryInner {
    path: PathBuf,
    raw: RawLibrary,
    port: Arc<dyn LibraryPort>,
}

impl Drop for LibraryInner {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "unloading library");
        self.port.unload(self.raw);
    }
}

/// Shared handle to a loaded library
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl Library {
    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Native handle
    pub fn raw(&self) -> RawLibrary {
        self.inner.raw
    }

    /// Resolve an exported symbol address
    pub fn symbol(&self, name: &str) -> KilnResult<*const c_void> {
        Ok(self.inner.port.symbol(self.inner.raw, name)?)
    }

    /// Resolve an exported function
    ///
    /// # Safety
    ///
    /// `T` must be a function pointer type matching the exported symbol, and
    /// the returned pointer must not be used after this library is dropped.
    pub unsafe fn function<T: Copy>(&self, name: &str) -> KilnResult<T> {
        let symbol = self.symbol(name)?;
        Ok(std::mem::transmute_copy(&symbol))
    }

    /// Check whether two handles refer to the same loaded library
    pub fn ptr_eq(&self, other: &Library) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.inner.path)
            .field("raw", &self.inner.raw)
            .finish()
    }
}

/// Table of loaded libraries, keyed by path and by native handle
///
/// Entries are weak; a library stays loaded only while some [`Library`]
/// handle keeps it alive.
pub struct LibraryTable {
    port: Arc<dyn LibraryPort>,
    by_path: FxHashMap<PathBuf, Weak<LibraryInner>>,
    by_raw: FxHashMap<RawLibrary, Weak<LibraryInner>>,
}

impl LibraryTable {
    /// Create an empty table loading through `port`
    pub fn new(port: Arc<dyn LibraryPort>) -> Self {
        Self {
            port,
            by_path: FxHashMap::default(),
            by_raw: FxHashMap::default(),
        }
    }

    fn purge(&mut self) {
        self.by_path.retain(|_, library| library.strong_count() > 0);
        self.by_raw.retain(|_, library| library.strong_count() > 0);
    }

    /// Load `path`, or return the already loaded library for it
    pub fn load(&mut self, path: &Path) -> KilnResult<Library> {
        self.purge();

        if let Some(inner) = self.by_path.get(path).and_then(Weak::upgrade) {
            return Ok(Library { inner });
        }

        let raw = self.port.load(path)?;
        let inner = Arc::new(LibraryInner {
            path: path.to_path_buf(),
            raw,
            port: self.port.clone(),
        });
        self.by_path
            .insert(path.to_path_buf(), Arc::downgrade(&inner));
        self.by_raw.insert(raw, Arc::downgrade(&inner));

        tracing::debug!(path = %path.display(), "library loaded");
        Ok(Library { inner })
    }

    /// Find the library for a native handle
    pub fn find(&self, raw: RawLibrary) -> Option<Library> {
        self.by_raw
            .get(&raw)
            .and_then(Weak::upgrade)
            .map(|inner| Library { inner })
    }

    /// Number of libraries currently loaded
    pub fn len(&self) -> usize {
        self.by_path
            .values()
            .filter(|library| library.strong_count() > 0)
            .count()
    }

    /// Check whether no library is loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
