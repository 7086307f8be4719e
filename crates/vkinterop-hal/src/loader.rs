/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Dynamic loading of compute runtime libraries.

use std::path::PathBuf;
use std::sync::Arc;

use libloading::Library;
use parking_lot::RwLock;
use types::InteropComputeApi;

use crate::{InteropError, InteropResult};

/// Opens the first library that loads. `env_var`, if set, is tried before `names`.
pub fn open_library(
    api: InteropComputeApi,
    env_var: &str,
    names: &[&str],
) -> InteropResult<Library> {
    let candidates = std::env::var_os(env_var)
        .map(PathBuf::from)
        .into_iter()
        .chain(names.iter().map(PathBuf::from));
    open_first(api, candidates)
}

pub(crate) fn open_first(
    api: InteropComputeApi,
    candidates: impl IntoIterator<Item = PathBuf>,
) -> InteropResult<Library> {
    let mut failures = Vec::new();
    for path in candidates {
        // Loading runs the library's initializers, which is the contract of these runtimes
        match unsafe { Library::new(&path) } {
            Ok(library) => {
                log::debug!("Loaded {api} runtime from {}", path.display());
                return Ok(library);
            }
            Err(e) => failures.push(format!("{}: {e}", path.display())),
        }
    }
    Err(InteropError::backend_not_available(
        api,
        format!("no runtime library could be opened ({})", failures.join("; ")),
    ))
}

/// Declares a struct of function pointers resolved from a [`Library`].
/// A missing required symbol fails the whole table; optional ones become `None`.
macro_rules! function_table {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            required { $($req:ident: $req_ty:ty,)* }
            optional { $($opt:ident: $opt_ty:ty,)* }
        }
    ) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        pub struct $name {
            $(pub $req: $req_ty,)*
            $(pub $opt: Option<$opt_ty>,)*
            _library: ::libloading::Library,
        }
        impl $name {
            /// # Safety
            /// * The declared signatures must match the library's exports
            pub unsafe fn load(
                library: ::libloading::Library,
                api: ::types::InteropComputeApi,
            ) -> $crate::InteropResult<Self> {
                $(
                    let $req: $req_ty = unsafe {
                        *library
                            .get::<$req_ty>(concat!(stringify!($req), "\0").as_bytes())
                            .map_err(|e| {
                                $crate::InteropError::backend_not_available(
                                    api,
                                    format!("missing entry point {}: {e}", stringify!($req)),
                                )
                            })?
                    };
                )*
                $(
                    let $opt: Option<$opt_ty> = unsafe {
                        library
                            .get::<$opt_ty>(concat!(stringify!($opt), "\0").as_bytes())
                            .ok()
                            .map(|symbol| *symbol)
                    };
                    if $opt.is_none() {
                        log::debug!("{api} entry point {} is unavailable", stringify!($opt));
                    }
                )*
                Ok(Self {
                    $($req,)*
                    $($opt,)*
                    _library: library,
                })
            }
        }
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish_non_exhaustive()
            }
        }
    };
}
pub(crate) use function_table;

enum TableState<T> {
    Uninitialized,
    Failed(String),
    Ready(Arc<T>),
}

/// Process wide home of one backend's function table.
///
/// Initialization is attempted once. A failure sticks until [`TableSlot::free`],
/// and every later request reports it as [`InteropError::BackendNotAvailable`].
pub struct TableSlot<T> {
    api: InteropComputeApi,
    state: RwLock<TableState<T>>,
}
impl<T> TableSlot<T> {
    pub const fn new(api: InteropComputeApi) -> Self {
        Self {
            api,
            state: RwLock::new(TableState::Uninitialized),
        }
    }
    #[tracing::instrument(skip_all, fields(api = %self.api))]
    pub fn get_or_init(&self, init: impl FnOnce() -> InteropResult<T>) -> InteropResult<Arc<T>> {
        if let TableState::Ready(table) = &*self.state.read() {
            return Ok(table.clone());
        }
        let mut state = self.state.write();
        match &*state {
            TableState::Ready(table) => return Ok(table.clone()),
            TableState::Failed(reason) => {
                return Err(InteropError::backend_not_available(self.api, reason.clone()));
            }
            TableState::Uninitialized => (),
        }
        match init() {
            Ok(table) => {
                let table = Arc::new(table);
                *state = TableState::Ready(table.clone());
                log::info!("Initialized {} function table", self.api);
                Ok(table)
            }
            Err(e) => {
                log::warn!("Failed to initialize {} function table: {e}", self.api);
                *state = TableState::Failed(e.to_string());
                Err(e)
            }
        }
    }
    /// The table if it has been initialized successfully
    pub fn get(&self) -> InteropResult<Arc<T>> {
        match &*self.state.read() {
            TableState::Ready(table) => Ok(table.clone()),
            TableState::Failed(reason) => {
                Err(InteropError::backend_not_available(self.api, reason.clone()))
            }
            TableState::Uninitialized => Err(InteropError::backend_not_available(
                self.api,
                "function table is not initialized",
            )),
        }
    }
    pub fn is_initialized(&self) -> bool {
        matches!(&*self.state.read(), TableState::Ready(_))
    }
    /// Returns to the uninitialized state. Live resources keep their own reference,
    /// so the library is unloaded once the last of them is gone.
    pub fn free(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.write(), TableState::Uninitialized);
        matches!(previous, TableState::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_stick_until_freed() {
        let slot = TableSlot::<u32>::new(InteropComputeApi::Hip);
        let first = slot.get_or_init(|| {
            Err(InteropError::backend_not_available(
                InteropComputeApi::Hip,
                "nope",
            ))
        });
        assert!(first.is_err());
        let mut called = false;
        let second = slot.get_or_init(|| {
            called = true;
            Ok(1)
        });
        assert!(!called);
        assert!(matches!(second, Err(InteropError::BackendNotAvailable { .. })));
        assert!(!slot.free());
        assert_eq!(*slot.get_or_init(|| Ok(5)).unwrap(), 5);
        assert!(slot.is_initialized());
        assert_eq!(*slot.get().unwrap(), 5);
        assert!(slot.free());
        assert!(slot.get().is_err());
    }

    #[test]
    fn unloadable_candidates_are_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = open_first(
            InteropComputeApi::Cuda,
            [
                PathBuf::from("libvkinterop-does-not-exist.so"),
                file.path().to_path_buf(),
            ],
        );
        match result {
            Err(InteropError::BackendNotAvailable { api, reason }) => {
                assert_eq!(api, InteropComputeApi::Cuda);
                assert!(reason.contains("libvkinterop-does-not-exist.so"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("an empty file loaded as a library"),
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    mod libc_table {
        use super::*;

        function_table! {
            pub struct LibcFunctions {
                required {
                    strlen: unsafe extern "C" fn(*const std::ffi::c_char) -> usize,
                }
                optional {
                    vkinterop_missing_symbol: unsafe extern "C" fn(),
                }
            }
        }
        function_table! {
            pub struct BrokenFunctions {
                required {
                    vkinterop_missing_symbol: unsafe extern "C" fn(),
                }
                optional {}
            }
        }

        fn libc() -> Library {
            open_first(InteropComputeApi::LevelZero, [PathBuf::from("libc.so.6")]).unwrap()
        }

        #[test]
        fn resolves_required_and_optional_symbols() {
            let table =
                unsafe { LibcFunctions::load(libc(), InteropComputeApi::LevelZero) }.unwrap();
            assert!(table.vkinterop_missing_symbol.is_none());
            assert_eq!(unsafe { (table.strlen)(c"four".as_ptr()) }, 4);
        }

        #[test]
        fn missing_required_symbol_fails() {
            let result = unsafe { BrokenFunctions::load(libc(), InteropComputeApi::LevelZero) };
            assert!(matches!(result, Err(InteropError::BackendNotAvailable { .. })));
        }
    }
}
