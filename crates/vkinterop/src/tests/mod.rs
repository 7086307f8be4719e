/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
#[cfg(unix)]
mod host_scenarios;
#[cfg(unix)]
mod host_sycl;
mod gpu_scenarios;

use hal::InteropError;

/// `unwrap_err` for results whose value isn't `Debug`
pub fn expect_err<T>(result: Result<T, InteropError>) -> InteropError {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    }
}
