/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Every error leaving a factory or a resource passes through one sink. By default
//! it is logged and returned; with message boxes enabled the embedding
//! application's dialog hook is shown as well.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hal::{InteropError, InteropResult};
use parking_lot::RwLock;
use types::InteropComputeApi;

/// Shows a modal dialog with a title and a message
pub type ErrorDialogHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

static OPEN_MESSAGE_BOX: AtomicBool = AtomicBool::new(false);
static DIALOG_HOOK: RwLock<Option<ErrorDialogHook>> = RwLock::new(None);

/// Whether compute API errors should also open a message box.
pub fn set_open_message_box_on_compute_api_error(open: bool) {
    OPEN_MESSAGE_BOX.store(open, Ordering::SeqCst);
}
pub fn open_message_box_on_compute_api_error() -> bool {
    OPEN_MESSAGE_BOX.load(Ordering::SeqCst)
}
/// Installs the dialog used when message boxes are enabled. Without one, the
/// message is logged a second time instead.
pub fn set_error_dialog_hook(hook: Option<ErrorDialogHook>) {
    *DIALOG_HOOK.write() = hook;
}

fn report(api: InteropComputeApi, operation: &str, error: &InteropError) {
    if error.is_optional_feature_miss() {
        // Callers decide whether the feature was required
        log::warn!("{operation} ({api}): {error}");
        return;
    }
    log::error!("{operation} ({api}): {error}");
    if open_message_box_on_compute_api_error() {
        let title = format!("{api} interop error");
        let message = format!("{operation} failed: {error}");
        let hook = DIALOG_HOOK.read().clone();
        match hook {
            Some(hook) => hook(&title, &message),
            None => log::error!("{title}: {message}"),
        }
    }
}

/// Passes `result` through the sink.
pub(crate) fn route<T>(
    api: InteropComputeApi,
    operation: &str,
    result: InteropResult<T>,
) -> InteropResult<T> {
    result.inspect_err(|e| report(api, operation, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use types::UnsupportedComputeApiFeature;

    static SHOWN: Mutex<Vec<String>> = Mutex::new(Vec::new());

    #[test]
    fn dialogs_follow_the_toggle() {
        let _guard = dev_utils::serial_guard();
        dev_utils::init_test_logging();
        set_error_dialog_hook(Some(Arc::new(|title, message| {
            SHOWN.lock().push(format!("{title}: {message}"));
        })));
        let failure = || -> InteropResult<()> { Err(InteropError::ExportUnsupported) };

        set_open_message_box_on_compute_api_error(false);
        assert!(route(InteropComputeApi::Cuda, "import", failure()).is_err());
        assert!(SHOWN.lock().is_empty());

        set_open_message_box_on_compute_api_error(true);
        assert!(route(InteropComputeApi::Cuda, "import", failure()).is_err());
        // Optional feature misses never open a dialog
        let miss: InteropResult<()> = Err(InteropError::UnsupportedFeature(
            UnsupportedComputeApiFeature::BindlessImages,
        ));
        assert!(route(InteropComputeApi::LevelZero, "import", miss).is_err());
        assert!(route(InteropComputeApi::Cuda, "import", Ok(())).is_ok());
        {
            let shown = SHOWN.lock();
            assert_eq!(shown.len(), 1);
            assert!(shown[0].starts_with("CUDA interop error"), "{}", shown[0]);
        }

        set_open_message_box_on_compute_api_error(false);
        set_error_dialog_hook(None);
    }
}
