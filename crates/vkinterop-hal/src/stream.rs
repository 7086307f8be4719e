/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use types::InteropComputeApi;

use crate::{InteropError, InteropResult};

macro_rules! opaque_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[repr(transparent)]
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(pub *mut ::std::ffi::c_void);
            // Runtime handles are thread agnostic; ordering is the stream's job
            unsafe impl Send for $name {}
            unsafe impl Sync for $name {}
            impl $name {
                pub fn null() -> Self {
                    Self(std::ptr::null_mut())
                }
                pub fn is_null(&self) -> bool {
                    self.0.is_null()
                }
            }
        )*
    };
}
pub(crate) use opaque_handle;

opaque_handle! {
    /// `CUstream`. The null stream is the legacy default stream.
    CuStream;
    /// `hipStream_t`
    HipStream;
    /// `ze_command_list_handle_t` of an in-order immediate command list
    ZeCommandList;
    /// Pointer to the embedder's `sycl::queue`
    SyclQueue;
    /// `CUevent`
    CuEvent;
    /// `hipEvent_t`
    HipEvent;
    /// `ze_event_handle_t`
    ZeEvent;
    /// Event created by the registered SYCL runtime
    SyclEvent;
}

/// An ordering domain of the active compute runtime. Never owns the handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamWrapper {
    Cuda(CuStream),
    Hip(HipStream),
    LevelZero(ZeCommandList),
    Sycl(SyclQueue),
}
impl StreamWrapper {
    pub fn api(&self) -> InteropComputeApi {
        match self {
            Self::Cuda(_) => InteropComputeApi::Cuda,
            Self::Hip(_) => InteropComputeApi::Hip,
            Self::LevelZero(_) => InteropComputeApi::LevelZero,
            Self::Sycl(_) => InteropComputeApi::Sycl,
        }
    }
    fn mismatch(&self, expected: InteropComputeApi) -> InteropError {
        InteropError::InvalidStream {
            expected,
            found: self.api(),
        }
    }
    pub fn as_cuda(&self) -> InteropResult<CuStream> {
        match self {
            Self::Cuda(s) => Ok(*s),
            _ => Err(self.mismatch(InteropComputeApi::Cuda)),
        }
    }
    pub fn as_hip(&self) -> InteropResult<HipStream> {
        match self {
            Self::Hip(s) => Ok(*s),
            _ => Err(self.mismatch(InteropComputeApi::Hip)),
        }
    }
    /// Level Zero has no stream objects, so null command lists are rejected here
    pub fn as_level_zero(&self) -> InteropResult<ZeCommandList> {
        match self {
            Self::LevelZero(s) if s.is_null() => Err(InteropError::NullStream {
                api: InteropComputeApi::LevelZero,
            }),
            Self::LevelZero(s) => Ok(*s),
            _ => Err(self.mismatch(InteropComputeApi::LevelZero)),
        }
    }
    pub fn as_sycl(&self) -> InteropResult<SyclQueue> {
        match self {
            Self::Sycl(s) if s.is_null() => Err(InteropError::NullStream {
                api: InteropComputeApi::Sycl,
            }),
            Self::Sycl(s) => Ok(*s),
            _ => Err(self.mismatch(InteropComputeApi::Sycl)),
        }
    }
}

/// Event used to chain compute work after a wait or copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputeEvent {
    Cuda(CuEvent),
    Hip(HipEvent),
    LevelZero(ZeEvent),
    Sycl(SyclEvent),
}
impl ComputeEvent {
    pub fn api(&self) -> InteropComputeApi {
        match self {
            Self::Cuda(_) => InteropComputeApi::Cuda,
            Self::Hip(_) => InteropComputeApi::Hip,
            Self::LevelZero(_) => InteropComputeApi::LevelZero,
            Self::Sycl(_) => InteropComputeApi::Sycl,
        }
    }
    pub(crate) fn expect_api(&self, expected: InteropComputeApi) -> InteropResult<()> {
        if self.api() == expected {
            Ok(())
        } else {
            Err(InteropError::InvalidStream {
                expected,
                found: self.api(),
            })
        }
    }
}

/// Polls `is_done` until it reports completion or `timeout` passes.
pub(crate) fn poll_until(
    timeout: std::time::Duration,
    mut is_done: impl FnMut() -> InteropResult<bool>,
) -> InteropResult<bool> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if is_done()? {
            return Ok(true);
        }
        if std::time::Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(std::time::Duration::from_micros(500));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;

    #[test]
    fn stream_accessors_check_the_tag() {
        let stream = StreamWrapper::Cuda(CuStream::null());
        assert_eq!(stream.api(), InteropComputeApi::Cuda);
        assert!(stream.as_cuda().unwrap().is_null());
        match stream.as_hip() {
            Err(InteropError::InvalidStream { expected, found }) => {
                assert_eq!(expected, InteropComputeApi::Hip);
                assert_eq!(found, InteropComputeApi::Cuda);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_queues_are_not_streams() {
        assert!(matches!(
            StreamWrapper::LevelZero(ZeCommandList::null()).as_level_zero(),
            Err(InteropError::NullStream {
                api: InteropComputeApi::LevelZero
            })
        ));
        let error = StreamWrapper::Sycl(SyclQueue::null()).as_sycl().unwrap_err();
        assert!(matches!(
            error,
            InteropError::NullStream {
                api: InteropComputeApi::Sycl
            }
        ));
        assert_eq!(error.to_string(), "The SYCL stream handle is null");
        assert!(matches!(
            StreamWrapper::Sycl(SyclQueue::null()).as_hip(),
            Err(InteropError::InvalidStream { .. })
        ));
        let list = ZeCommandList(8 as *mut c_void);
        assert_eq!(StreamWrapper::LevelZero(list).as_level_zero().unwrap(), list);
    }

    #[test]
    fn polling_gives_up_after_the_timeout() {
        let mut polls = 0;
        let done = poll_until(std::time::Duration::from_millis(5), || {
            polls += 1;
            Ok(false)
        })
        .unwrap();
        assert!(!done);
        assert!(polls >= 2);
        assert!(poll_until(std::time::Duration::ZERO, || Ok(true)).unwrap());
    }

    #[test]
    fn events_check_their_api() {
        let event = ComputeEvent::LevelZero(ZeEvent(1 as *mut c_void));
        assert!(event.expect_api(InteropComputeApi::LevelZero).is_ok());
        assert!(event.expect_api(InteropComputeApi::Cuda).is_err());
    }
}
