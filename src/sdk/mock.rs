//! Scriptable mock camera for tests.
//!
//! Implements [`CommandApi`](super::CommandApi) over interior-mutex state and
//! lets tests inject the fault patterns the engine must survive: busy streaks
//! on a given call, combination errors for chosen shutter codes, delayed
//! image readiness, and read failures. Every native call is appended to a
//! call log so tests can assert release sequencing.

use super::codes::{
    ERR_BUSY, ERR_COMBINATION, ERR_HARDWARE, ERR_INVALID_PARAM, RC_COMPLETE, RC_ERROR,
};
use super::{CommandApi, DeviceDescriptor, DeviceInfo, Handle, ImageInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const MOCK_API_CODE: i32 = 0x0102;

#[derive(Default)]
struct MockState {
    open_handle: Option<Handle>,
    next_handle: Handle,
    iso: i32,
    shutter_code: Option<i32>,
    dynamic_range: Option<i32>,
    last_error: (i32, i32),
    calls: Vec<String>,
    // fault scripting
    busy_streaks: HashMap<&'static str, u32>,
    combination_codes: HashSet<i32>,
    fail_all_shutter_codes: bool,
    shutter_query_fails: bool,
    read_fails: bool,
    // pending image
    ready_after_polls: u32,
    polls_seen: u32,
    pending_image: Option<Vec<u8>>,
}

/// In-memory camera with scriptable faults.
pub struct MockCamera {
    isos: Vec<i32>,
    shutter_codes: Vec<i32>,
    reports_bulb: bool,
    descriptor: DeviceDescriptor,
    info: DeviceInfo,
    state: Mutex<MockState>,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCamera {
    /// A camera supporting a typical ISO ladder and the full code table.
    pub fn new() -> Self {
        Self::with_isos(vec![100, 200, 400, 800, 1600, 3200])
    }

    /// A camera with the given supported ISO values.
    pub fn with_isos(isos: Vec<i32>) -> Self {
        let shutter_codes = crate::shutter::reference_codes();
        Self {
            isos,
            shutter_codes,
            reports_bulb: true,
            descriptor: DeviceDescriptor {
                id: "mock-0".to_string(),
                model: "MOCK-X1".to_string(),
            },
            // Small synthetic sensor keeps test payloads cheap.
            info: DeviceInfo {
                sensor_width: 512,
                sensor_height: 512,
                buffer_shoot_frames: 0,
                buffer_total_frames: 8,
            },
            state: Mutex::new(MockState {
                next_handle: 1,
                iso: 200,
                ready_after_polls: 1,
                ..MockState::default()
            }),
        }
    }

    /// Restrict the supported shutter codes and the reported bulb flag.
    pub fn with_shutter_codes(mut self, codes: Vec<i32>, reports_bulb: bool) -> Self {
        self.shutter_codes = codes;
        self.reports_bulb = reports_bulb;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fail the next `n` calls to `operation` with a busy error.
    pub fn set_busy_streak(&self, operation: &'static str, n: u32) {
        self.lock().busy_streaks.insert(operation, n);
    }

    /// Report a combination error whenever one of `codes` is set.
    pub fn fail_codes_with_combination(&self, codes: impl IntoIterator<Item = i32>) {
        self.lock().combination_codes.extend(codes);
    }

    /// Report a combination error for every shutter-speed set call.
    pub fn fail_all_shutter_codes(&self) {
        self.lock().fail_all_shutter_codes = true;
    }

    /// Make the shutter-capability query itself fail.
    pub fn fail_shutter_query(&self) {
        self.lock().shutter_query_fails = true;
    }

    /// Image readiness requires `n` info polls after release (0 = never).
    pub fn set_ready_after_polls(&self, n: u32) {
        self.lock().ready_after_polls = n;
    }

    /// Make `read_image` fail with a hardware error.
    pub fn fail_reads(&self) {
        self.lock().read_fails = true;
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// ISO currently set on the device.
    pub fn current_iso(&self) -> i32 {
        self.lock().iso
    }

    /// Shutter code currently set on the device, if any.
    pub fn current_shutter_code(&self) -> Option<i32> {
        self.lock().shutter_code
    }

    /// Whether an undeleted image is still in the device buffer.
    pub fn has_pending_image(&self) -> bool {
        self.lock().pending_image.is_some()
    }

    fn fail(state: &mut MockState, error_code: i32) -> i32 {
        state.last_error = (MOCK_API_CODE, error_code);
        RC_ERROR
    }

    fn busy_gate(state: &mut MockState, operation: &'static str) -> Option<i32> {
        if let Some(remaining) = state.busy_streaks.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(Self::fail(state, ERR_BUSY));
            }
        }
        None
    }

    fn arm_image(state: &mut MockState, info: DeviceInfo) {
        let size = (info.sensor_width * info.sensor_height * 2) as usize;
        state.pending_image = Some(vec![0xA5; size]);
        state.polls_seen = 0;
    }
}

impl CommandApi for MockCamera {
    fn init(&self) -> i32 {
        self.lock().calls.push("init".to_string());
        RC_COMPLETE
    }

    fn exit(&self) -> i32 {
        self.lock().calls.push("exit".to_string());
        RC_COMPLETE
    }

    fn detect(&self, out: Option<&mut [DeviceDescriptor]>, count: &mut u32) -> i32 {
        self.lock().calls.push("detect".to_string());
        match out {
            None => *count = 1,
            Some(slice) => {
                if let Some(slot) = slice.first_mut() {
                    *slot = self.descriptor.clone();
                }
                *count = 1;
            }
        }
        RC_COMPLETE
    }

    fn open(&self, device_id: &str, handle: &mut Handle) -> i32 {
        let mut state = self.lock();
        state.calls.push(format!("open:{device_id}"));
        if device_id != self.descriptor.id {
            return Self::fail(&mut state, ERR_INVALID_PARAM);
        }
        let h = state.next_handle;
        state.next_handle += 1;
        state.open_handle = Some(h);
        *handle = h;
        RC_COMPLETE
    }

    fn close(&self, handle: Handle) -> i32 {
        let mut state = self.lock();
        state.calls.push(format!("close:{handle}"));
        // Closing an unknown handle is tolerated, like the vendor library.
        if state.open_handle == Some(handle) {
            state.open_handle = None;
        }
        RC_COMPLETE
    }

    fn last_error(&self, _handle: Handle) -> (i32, i32) {
        self.lock().last_error
    }

    fn set_dynamic_range(&self, _handle: Handle, code: i32) -> i32 {
        let mut state = self.lock();
        state.calls.push(format!("set_dynamic_range:{code}"));
        if let Some(rc) = Self::busy_gate(&mut state, "set_dynamic_range") {
            return rc;
        }
        state.dynamic_range = Some(code);
        RC_COMPLETE
    }

    fn get_sensitivity_list(
        &self,
        _handle: Handle,
        out: Option<&mut [i32]>,
        count: &mut u32,
    ) -> i32 {
        let mut state = self.lock();
        state.calls.push("get_sensitivity_list".to_string());
        match out {
            None => *count = self.isos.len() as u32,
            Some(slice) => {
                for (slot, iso) in slice.iter_mut().zip(self.isos.iter()) {
                    *slot = *iso;
                }
                *count = self.isos.len() as u32;
            }
        }
        RC_COMPLETE
    }

    fn set_sensitivity(&self, _handle: Handle, iso: i32) -> i32 {
        let mut state = self.lock();
        state.calls.push(format!("set_sensitivity:{iso}"));
        if let Some(rc) = Self::busy_gate(&mut state, "set_sensitivity") {
            return rc;
        }
        if !self.isos.contains(&iso) {
            return Self::fail(&mut state, ERR_INVALID_PARAM);
        }
        state.iso = iso;
        RC_COMPLETE
    }

    fn get_shutter_speed_list(
        &self,
        _handle: Handle,
        out: Option<&mut [i32]>,
        count: &mut u32,
        bulb_capable: &mut bool,
    ) -> i32 {
        let mut state = self.lock();
        state.calls.push("get_shutter_speed_list".to_string());
        if state.shutter_query_fails {
            return Self::fail(&mut state, ERR_HARDWARE);
        }
        *bulb_capable = self.reports_bulb;
        match out {
            None => *count = self.shutter_codes.len() as u32,
            Some(slice) => {
                for (slot, code) in slice.iter_mut().zip(self.shutter_codes.iter()) {
                    *slot = *code;
                }
                *count = self.shutter_codes.len() as u32;
            }
        }
        RC_COMPLETE
    }

    fn set_shutter_speed(&self, _handle: Handle, code: i32) -> i32 {
        let mut state = self.lock();
        state.calls.push(format!("set_shutter_speed:{code}"));
        if let Some(rc) = Self::busy_gate(&mut state, "set_shutter_speed") {
            return rc;
        }
        if state.fail_all_shutter_codes || state.combination_codes.contains(&code) {
            return Self::fail(&mut state, ERR_COMBINATION);
        }
        state.shutter_code = Some(code);
        RC_COMPLETE
    }

    fn get_device_info(&self, _handle: Handle, info: &mut DeviceInfo) -> i32 {
        self.lock().calls.push("get_device_info".to_string());
        *info = self.info;
        RC_COMPLETE
    }

    fn release_shoot(&self, _handle: Handle) -> i32 {
        let mut state = self.lock();
        state.calls.push("release_shoot".to_string());
        if let Some(rc) = Self::busy_gate(&mut state, "release_shoot") {
            return rc;
        }
        Self::arm_image(&mut state, self.info);
        RC_COMPLETE
    }

    fn release_half_press(&self, _handle: Handle) -> i32 {
        self.lock().calls.push("release_half_press".to_string());
        RC_COMPLETE
    }

    fn release_bulb_start(&self, _handle: Handle) -> i32 {
        let mut state = self.lock();
        state.calls.push("release_bulb_start".to_string());
        if let Some(rc) = Self::busy_gate(&mut state, "release_bulb_start") {
            return rc;
        }
        RC_COMPLETE
    }

    fn release_bulb_stop(&self, _handle: Handle) -> i32 {
        let mut state = self.lock();
        state.calls.push("release_bulb_stop".to_string());
        Self::arm_image(&mut state, self.info);
        RC_COMPLETE
    }

    fn read_image_info(&self, _handle: Handle, info: &mut ImageInfo) -> i32 {
        let mut state = self.lock();
        state.calls.push("read_image_info".to_string());
        *info = ImageInfo::default();
        if let Some(image) = &state.pending_image {
            let len = image.len();
            state.polls_seen += 1;
            if state.ready_after_polls > 0 && state.polls_seen >= state.ready_after_polls {
                *info = ImageInfo {
                    size: len as u32,
                    width: self.info.sensor_width,
                    height: self.info.sensor_height,
                    format: 1,
                    bits_per_sample: 14,
                };
            }
        }
        RC_COMPLETE
    }

    fn read_image(&self, _handle: Handle, buf: &mut [u8]) -> i32 {
        let mut state = self.lock();
        state.calls.push("read_image".to_string());
        if state.read_fails {
            return Self::fail(&mut state, ERR_HARDWARE);
        }
        let copied = match &state.pending_image {
            Some(image) if buf.len() == image.len() => {
                buf.copy_from_slice(image);
                true
            }
            _ => false,
        };
        if copied {
            RC_COMPLETE
        } else {
            Self::fail(&mut state, ERR_INVALID_PARAM)
        }
    }

    fn delete_image(&self, _handle: Handle) -> i32 {
        let mut state = self.lock();
        state.calls.push("delete_image".to_string());
        state.pending_image = None;
        RC_COMPLETE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_streak_clears() {
        let cam = MockCamera::new();
        cam.set_busy_streak("set_sensitivity", 2);
        assert_eq!(cam.set_sensitivity(1, 400), RC_ERROR);
        assert_eq!(cam.set_sensitivity(1, 400), RC_ERROR);
        assert_eq!(cam.set_sensitivity(1, 400), RC_COMPLETE);
        assert_eq!(cam.current_iso(), 400);
    }

    #[test]
    fn test_image_lifecycle() {
        let cam = MockCamera::new();
        cam.set_ready_after_polls(2);
        assert_eq!(cam.release_shoot(1), RC_COMPLETE);

        let mut info = ImageInfo::default();
        assert_eq!(cam.read_image_info(1, &mut info), RC_COMPLETE);
        assert_eq!(info.size, 0);
        assert_eq!(cam.read_image_info(1, &mut info), RC_COMPLETE);
        assert!(info.size > 0);

        let mut buf = vec![0u8; info.size as usize];
        assert_eq!(cam.read_image(1, &mut buf), RC_COMPLETE);
        assert_eq!(cam.delete_image(1), RC_COMPLETE);
        assert!(!cam.has_pending_image());
    }
}
