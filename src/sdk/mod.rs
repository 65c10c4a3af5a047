//! Vendor command SDK boundary.
//!
//! The camera is driven through an opaque hardware RPC surface: every call
//! takes an integer handle plus typed parameters and returns a signed `i32`
//! result code (0 = success). Variable-length outputs use the vendor's
//! two-phase convention (call once for the count, allocate, call again for the
//! data), expressed here as an `Option<&mut [T]>` output slice. Error detail
//! comes from a separate last-error call returning an `(api_code, error_code)`
//! pair.
//!
//! [`CommandApi`] abstracts that surface so the engine runs identically
//! against the real vendor library and against [`mock::MockCamera`] in tests.

pub mod codes;
pub mod mock;

use crate::error::{CamResult, CameraError, ErrorRecord};
use codes::{classify, ErrorClass, RC_COMPLETE};
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Opaque vendor device handle.
pub type Handle = i64;

/// One detected device, as reported by the vendor enumeration call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Vendor device identifier used to open a session.
    pub id: String,
    /// Human-readable model name.
    pub model: String,
}

/// Static device facts queried once per connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Sensor width in pixels.
    pub sensor_width: u32,
    /// Sensor height in pixels.
    pub sensor_height: u32,
    /// Frames currently held in the device buffer.
    pub buffer_shoot_frames: u32,
    /// Total frame slots in the device buffer.
    pub buffer_total_frames: u32,
}

/// Metadata for the image currently at the head of the device buffer.
///
/// `size == 0` means no image is available yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageInfo {
    /// Payload size in bytes; zero until an image is ready.
    pub size: u32,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Vendor format code of the payload.
    pub format: i32,
    /// Bits per sample.
    pub bits_per_sample: u32,
}

/// The vendor command API, one method per native call the engine uses.
///
/// Implementations are synchronous: the native calls block briefly and are
/// never pre-empted by cancellation. All async sequencing (delays, polling)
/// lives above this trait.
pub trait CommandApi: Send + Sync {
    /// Initialize the vendor runtime. Called once per process.
    fn init(&self) -> i32;
    /// Shut down the vendor runtime.
    fn exit(&self) -> i32;

    /// Enumerate attached devices (two-phase).
    fn detect(&self, out: Option<&mut [DeviceDescriptor]>, count: &mut u32) -> i32;
    /// Open a session to the device with the given id.
    fn open(&self, device_id: &str, handle: &mut Handle) -> i32;
    /// Close a session. Must tolerate already-closed handles.
    fn close(&self, handle: Handle) -> i32;
    /// Retrieve the `(api_code, error_code)` pair for the last failure.
    fn last_error(&self, handle: Handle) -> (i32, i32);

    /// Set the dynamic-range code. Supported ISO values depend on it.
    fn set_dynamic_range(&self, handle: Handle, code: i32) -> i32;
    /// Enumerate supported ISO values (two-phase).
    fn get_sensitivity_list(&self, handle: Handle, out: Option<&mut [i32]>, count: &mut u32)
        -> i32;
    /// Set the ISO sensitivity.
    fn set_sensitivity(&self, handle: Handle, iso: i32) -> i32;

    /// Enumerate supported shutter-speed codes (two-phase) and whether the
    /// device reports itself bulb capable.
    fn get_shutter_speed_list(
        &self,
        handle: Handle,
        out: Option<&mut [i32]>,
        count: &mut u32,
        bulb_capable: &mut bool,
    ) -> i32;
    /// Set the shutter-speed code.
    fn set_shutter_speed(&self, handle: Handle, code: i32) -> i32;

    /// Query static device facts.
    fn get_device_info(&self, handle: Handle, info: &mut DeviceInfo) -> i32;

    /// Timed release: full press and release in one call.
    fn release_shoot(&self, handle: Handle) -> i32;
    /// Half-press (focus/metering hold), first phase of the bulb sequence.
    fn release_half_press(&self, handle: Handle) -> i32;
    /// Open the shutter for a bulb exposure.
    fn release_bulb_start(&self, handle: Handle) -> i32;
    /// Close the shutter and release the half-press in one combined call.
    fn release_bulb_stop(&self, handle: Handle) -> i32;

    /// Query metadata for the image at the head of the device buffer.
    fn read_image_info(&self, handle: Handle, info: &mut ImageInfo) -> i32;
    /// Read the image payload into a caller-allocated buffer of exactly the
    /// size reported by [`CommandApi::read_image_info`].
    fn read_image(&self, handle: Handle, buf: &mut [u8]) -> i32;
    /// Delete the image at the head of the device buffer.
    fn delete_image(&self, handle: Handle) -> i32;
}

/// Map a non-zero result code to the typed error for `operation`.
///
/// Fetches the last-error pair, classifies it, and wraps everything in the
/// matching [`CameraError`] variant. `Ok(())` when `rc` is success.
pub(crate) fn check(
    api: &dyn CommandApi,
    handle: Handle,
    operation: &'static str,
    rc: i32,
) -> CamResult<()> {
    if rc == RC_COMPLETE {
        return Ok(());
    }
    let (api_code, error_code) = api.last_error(handle);
    let record = ErrorRecord {
        result: rc,
        api_code,
        error_code,
    };
    Err(match classify(error_code) {
        ErrorClass::Retryable => CameraError::Busy {
            operation,
            attempts: 1,
            record,
        },
        ErrorClass::StateDependent => CameraError::Combination { operation, record },
        ErrorClass::NotConnected => CameraError::NotConnected { operation, record },
        ErrorClass::Parameter => CameraError::Parameter { operation, record },
        ErrorClass::Fatal => CameraError::Fatal { operation, record },
    })
}

/// Run a two-phase (count-then-buffer) query and return the filled vector.
///
/// `call` receives `None` on the first phase and must write only the count;
/// on the second phase it receives a slice of exactly that count.
pub fn query_list<T: Default + Clone>(
    api: &dyn CommandApi,
    handle: Handle,
    operation: &'static str,
    mut call: impl FnMut(Option<&mut [T]>, &mut u32) -> i32,
) -> CamResult<Vec<T>> {
    let mut count: u32 = 0;
    check(api, handle, operation, call(None, &mut count))?;
    let mut items = vec![T::default(); count as usize];
    if count > 0 {
        check(api, handle, operation, call(Some(items.as_mut_slice()), &mut count))?;
        items.truncate(count as usize);
    }
    Ok(items)
}

// Process-wide runtime init flag. The vendor library must be initialized
// exactly once per process and must not be re-initialized while any session
// is open, so shutdown is deferred to explicit teardown.
static RUNTIME_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Initialize the vendor runtime if this process has not done so yet.
pub fn ensure_runtime_init(api: &dyn CommandApi) -> CamResult<()> {
    let mut initialized = RUNTIME_INITIALIZED
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if *initialized {
        return Ok(());
    }
    check(api, 0, "runtime_init", api.init())?;
    *initialized = true;
    log::info!("Vendor SDK runtime initialized");
    Ok(())
}

/// Whether the vendor runtime has been initialized in this process.
pub fn runtime_initialized() -> bool {
    *RUNTIME_INITIALIZED
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Shut the vendor runtime down. Intended for process teardown only; open
/// sessions must be closed first.
pub fn runtime_shutdown(api: &dyn CommandApi) {
    let mut initialized = RUNTIME_INITIALIZED
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if *initialized {
        let rc = api.exit();
        if rc != RC_COMPLETE {
            log::warn!("Vendor SDK shutdown returned {}", rc);
        }
        *initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock::MockCamera;
    use std::sync::Arc;

    #[test]
    fn test_query_list_two_phase() {
        let api = MockCamera::with_isos(vec![100, 200, 400]);
        let mut handle = 0;
        assert_eq!(api.open("mock-0", &mut handle), RC_COMPLETE);
        let api: Arc<dyn CommandApi> = Arc::new(api);
        let isos = query_list(api.as_ref(), handle, "get_sensitivity_list", |out, n| {
            api.get_sensitivity_list(handle, out, n)
        })
        .unwrap();
        assert_eq!(isos, vec![100, 200, 400]);
    }

    #[test]
    fn test_query_list_empty() {
        let api = MockCamera::with_isos(vec![]);
        let mut handle = 0;
        assert_eq!(api.open("mock-0", &mut handle), RC_COMPLETE);
        let isos: Vec<i32> =
            query_list(&api, handle, "get_sensitivity_list", |out, n| {
                api.get_sensitivity_list(handle, out, n)
            })
            .unwrap();
        assert!(isos.is_empty());
    }
}
