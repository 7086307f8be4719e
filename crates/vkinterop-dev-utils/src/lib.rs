/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
pub use paste;
use std::fmt::Write;
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
};

/// Prints every span as it is entered, indented by nesting depth
pub struct EnterSpanPrinter;

impl<S> tracing_subscriber::Layer<S> for EnterSpanPrinter
where
    S: tracing::Subscriber,
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_enter(&self, id: &tracing::Id, ctx: Context<'_, S>) {
        if let Some(span_ref) = ctx.span(id) {
            let depth = span_ref.scope().skip(1).count();
            let mut fields = String::new();
            if let Some(ext) = span_ref
                .extensions()
                .get::<tracing_subscriber::fmt::FormattedFields<
                    tracing_subscriber::fmt::format::DefaultFields,
                >>()
            {
                write!(fields, "{ext}").ok();
            }
            println!(
                "{:indent$}{}::{} [{fields}]",
                "",
                span_ref.metadata().target(),
                span_ref.name(),
                indent = depth * 2 + 1
            );
        }
    }
}
pub fn setup_trace_printer() {
    let _ = tracing_subscriber::registry()
        .with(EnterSpanPrinter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|a| &a != "0" && &a != "false" && !a.is_empty())
}
pub fn setup_trace_printer_if_env() {
    if env_flag("VKINTEROP_LOG_FULL_TRACE") {
        setup_trace_printer();
    }
}
/// Logger setup shared by every test
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();
    setup_trace_printer_if_env();
}
/// Whether `VKINTEROP_SKIP_BACKEND_<NAME>` asks for a backend's tests to be skipped
pub fn backend_skipped(env_name: &str) -> bool {
    env_flag(&format!("VKINTEROP_SKIP_BACKEND_{env_name}"))
}

static SERIAL: parking_lot::Mutex<()> = parking_lot::const_mutex(());
/// Serializes tests that create devices or touch process wide backend state
pub fn serial_guard() -> parking_lot::MutexGuard<'static, ()> {
    SERIAL.lock()
}

#[macro_export]
macro_rules! all_backend_tests_inner {
    ($func_name:ident, $backend_name:literal, $test_name:ident, $backend:ident) => {
        #[test]
        pub fn $func_name() {
            if $crate::backend_skipped($backend_name) {
                return;
            }
            let _guard = $crate::serial_guard();
            $crate::init_test_logging();
            log::info!("{} test", $backend_name);
            $test_name::<hal::$backend>().unwrap();
        }
    };
}
/// Instantiates `$test_name::<B>()` for every backend that has a C ABI. The test
/// itself decides to skip when no matching device exists.
#[macro_export]
macro_rules! all_backend_tests {
    ($test_name:ident) => {
        $crate::paste::paste! {
            $crate::all_backend_tests_inner!([<$test_name _cuda>], "CUDA", $test_name, Cuda);
            $crate::all_backend_tests_inner!([<$test_name _hip>], "HIP", $test_name, Hip);
            $crate::all_backend_tests_inner!([<$test_name _level_zero>], "LEVEL_ZERO", $test_name, LevelZero);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_backend_is_not_skipped() {
        assert!(!backend_skipped("NOT_A_REAL_BACKEND_NAME"));
    }
}
