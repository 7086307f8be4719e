/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Process wide state: the selected compute API and one device context per
//! Vulkan device.

use std::sync::Arc;
use std::time::Duration;

use hal::cuda::CudaContext;
use hal::device::candidate_apis;
use hal::hip::HipContext;
use hal::level_zero::LevelZeroContext;
use hal::sycl::{SyclContext, is_sycl_queue_registered};
use hal::{
    ComputeBackend, ComputeDeviceInfo, ComputeEvent, Cuda, DeviceContext, DeviceIdentity, Hip,
    InteropError, InteropResult, LevelZero, StreamWrapper, Sycl,
};
use parking_lot::Mutex;
use types::InteropComputeApi;

#[derive(Clone)]
pub(crate) enum BackendContext {
    Cuda(Arc<CudaContext>),
    Hip(Arc<HipContext>),
    LevelZero(Arc<LevelZeroContext>),
    Sycl(Arc<SyclContext>),
}

/// Runs `$body` with `$ctx` bound to the concrete context and `$b` naming its backend
macro_rules! with_backend {
    ($context:expr, |$ctx:ident, $b:ident| $body:expr) => {
        match $context {
            $crate::state::BackendContext::Cuda($ctx) => {
                type $b = hal::Cuda;
                $body
            }
            $crate::state::BackendContext::Hip($ctx) => {
                type $b = hal::Hip;
                $body
            }
            $crate::state::BackendContext::LevelZero($ctx) => {
                type $b = hal::LevelZero;
                $body
            }
            $crate::state::BackendContext::Sycl($ctx) => {
                type $b = hal::Sycl;
                $body
            }
        }
    };
}
pub(crate) use with_backend;

impl BackendContext {
    fn new(api: InteropComputeApi, identity: &DeviceIdentity) -> InteropResult<Self> {
        Ok(match api {
            InteropComputeApi::Cuda => Self::Cuda(CudaContext::new(identity)?),
            InteropComputeApi::Hip => Self::Hip(HipContext::new(identity)?),
            InteropComputeApi::LevelZero => Self::LevelZero(LevelZeroContext::new(identity)?),
            InteropComputeApi::Sycl => Self::Sycl(SyclContext::new(identity)?),
            InteropComputeApi::None => return Err(no_compute_api()),
        })
    }
    pub fn api(&self) -> InteropComputeApi {
        with_backend!(self, |_ctx, B| B::API)
    }
    pub fn device_info(&self) -> ComputeDeviceInfo {
        with_backend!(self, |ctx, B| DeviceContext::<B>::device_info(&**ctx).clone())
    }
    pub fn create_stream(&self) -> InteropResult<StreamWrapper> {
        with_backend!(self, |ctx, B| DeviceContext::<B>::create_stream(&**ctx))
    }
    pub unsafe fn destroy_stream(&self, stream: StreamWrapper) -> InteropResult<()> {
        with_backend!(self, |ctx, B| unsafe {
            DeviceContext::<B>::destroy_stream(&**ctx, stream)
        })
    }
    pub fn create_event(&self) -> InteropResult<ComputeEvent> {
        with_backend!(self, |ctx, B| DeviceContext::<B>::create_event(&**ctx))
    }
    pub unsafe fn destroy_event(&self, event: ComputeEvent) -> InteropResult<()> {
        with_backend!(self, |ctx, B| unsafe {
            DeviceContext::<B>::destroy_event(&**ctx, event)
        })
    }
}

fn no_compute_api() -> InteropError {
    InteropError::backend_not_available(
        InteropComputeApi::None,
        "no compute API is available for this Vulkan device",
    )
}

struct State {
    selected: InteropComputeApi,
    contexts: Vec<([u8; 16], BackendContext)>,
}
static STATE: Mutex<State> = Mutex::new(State {
    selected: InteropComputeApi::None,
    contexts: Vec::new(),
});

fn initialize(api: InteropComputeApi) -> InteropResult<()> {
    match api {
        InteropComputeApi::Cuda => Cuda::initialize(),
        InteropComputeApi::Hip => Hip::initialize(),
        InteropComputeApi::LevelZero => LevelZero::initialize(),
        InteropComputeApi::Sycl => Sycl::initialize(),
        InteropComputeApi::None => Err(no_compute_api()),
    }
}

fn decide(state: &mut State, identity: &DeviceIdentity) -> InteropComputeApi {
    if state.selected != InteropComputeApi::None {
        return state.selected;
    }
    let api = if is_sycl_queue_registered() {
        InteropComputeApi::Sycl
    } else {
        candidate_apis(identity.driver_id)
            .iter()
            .copied()
            .find(|&api| match initialize(api) {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("{api} is not usable: {e}");
                    false
                }
            })
            .unwrap_or_default()
    };
    if api != InteropComputeApi::None {
        log::info!("Selected {api} for interop with {}", identity.name);
    }
    state.selected = api;
    api
}

/// Picks the compute API for a Vulkan device: a registered SYCL queue wins,
/// otherwise the runtime matching the Vulkan driver, if it can be loaded. The
/// choice sticks until [`reset_compute_api_state`].
pub fn decide_interop_compute_api(identity: &DeviceIdentity) -> InteropComputeApi {
    decide(&mut STATE.lock(), identity)
}
pub fn selected_compute_api() -> InteropComputeApi {
    STATE.lock().selected
}

/// Selects `api` explicitly. Switching away from an API already in use requires
/// [`reset_compute_api_state`] first.
#[tracing::instrument]
pub fn initialize_compute_api(api: InteropComputeApi) -> InteropResult<()> {
    let mut state = STATE.lock();
    if state.selected != InteropComputeApi::None && state.selected != api {
        return Err(InteropError::backend_not_available(
            api,
            format!(
                "{} is already in use; call reset_compute_api_state first",
                state.selected
            ),
        ));
    }
    initialize(api)?;
    state.selected = api;
    Ok(())
}

/// Forgets the selected API, cached device contexts, function tables, the SYCL
/// registration and the Level Zero bindless override. Meant for tests switching
/// backends; resources that are still alive keep what they need.
pub fn reset_compute_api_state() {
    let mut state = STATE.lock();
    state.selected = InteropComputeApi::None;
    state.contexts.clear();
    Cuda::free();
    Hip::free();
    LevelZero::free();
    Sycl::free();
    hal::level_zero::reset_level_zero_bindless_images_mode();
    log::debug!("Compute API state reset");
}

/// The context of the selected API for a Vulkan device, created on first use
pub(crate) fn context_for(identity: &DeviceIdentity) -> InteropResult<BackendContext> {
    let mut state = STATE.lock();
    let api = decide(&mut state, identity);
    if api == InteropComputeApi::None {
        return Err(no_compute_api());
    }
    if let Some((_, context)) = state
        .contexts
        .iter()
        .find(|(uuid, context)| uuid == &identity.uuid && context.api() == api)
    {
        return Ok(context.clone());
    }
    let context = BackendContext::new(api, identity)?;
    state.contexts.push((identity.uuid, context.clone()));
    Ok(context)
}

fn check_stream(api: InteropComputeApi, stream: StreamWrapper) -> InteropResult<()> {
    if stream.api() != api {
        return Err(InteropError::InvalidStream {
            expected: api,
            found: stream.api(),
        });
    }
    Ok(())
}

pub(crate) fn wait(api: InteropComputeApi, stream: StreamWrapper) -> InteropResult<()> {
    check_stream(api, stream)?;
    match api {
        InteropComputeApi::Cuda => Cuda::wait_for_completion(stream),
        InteropComputeApi::Hip => Hip::wait_for_completion(stream),
        InteropComputeApi::LevelZero => LevelZero::wait_for_completion(stream),
        InteropComputeApi::Sycl => Sycl::wait_for_completion(stream),
        InteropComputeApi::None => Err(no_compute_api()),
    }
}
pub(crate) fn wait_timeout(
    api: InteropComputeApi,
    stream: StreamWrapper,
    timeout: Duration,
) -> InteropResult<bool> {
    check_stream(api, stream)?;
    match api {
        InteropComputeApi::Cuda => Cuda::wait_for_completion_timeout(stream, timeout),
        InteropComputeApi::Hip => Hip::wait_for_completion_timeout(stream, timeout),
        InteropComputeApi::LevelZero => LevelZero::wait_for_completion_timeout(stream, timeout),
        InteropComputeApi::Sycl => Sycl::wait_for_completion_timeout(stream, timeout),
        InteropComputeApi::None => Err(no_compute_api()),
    }
}
