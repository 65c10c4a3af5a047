//! Image acquisition: readiness polling, download, device-buffer cleanup.
//!
//! After a release sequence completes, the image lands in the device's
//! internal buffer some time later. The acquirer polls the image-info call at
//! a fixed interval up to a bounded attempt count; a non-zero reported size
//! signals availability. The payload is read into a buffer of exactly that
//! size, and the device-side slot is deleted unconditionally, even when the
//! read fails, so buffer slots never leak.

use crate::config::ModelConfig;
use crate::error::{CamResult, CameraError};
use crate::sdk::{self, CommandApi, Handle, ImageInfo};
use std::time::Duration;
use tokio::time::sleep;

/// Bounded polling knobs for image readiness.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Fixed interval between readiness polls.
    pub interval: Duration,
    /// Bounded poll attempts before reporting a timeout.
    pub attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            attempts: 30,
        }
    }
}

impl PollPolicy {
    /// Policy from the per-model configuration knobs.
    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms),
            attempts: cfg.poll_attempts.max(1),
        }
    }
}

/// A downloaded RAW payload plus the device-reported geometry.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Proprietary RAW bytes as read from the device.
    pub bytes: Vec<u8>,
    /// Pixel width reported by the device.
    pub width: u32,
    /// Pixel height reported by the device.
    pub height: u32,
    /// Vendor format code of the payload.
    pub format: i32,
    /// Bits per sample.
    pub bits_per_sample: u32,
}

/// Poll until an image is available, download it, and delete it device-side.
///
/// Exhausting the poll bound without an available image is a reportable
/// [`CameraError::AcquireTimeout`], never a silent empty result.
pub async fn acquire(
    api: &dyn CommandApi,
    handle: Handle,
    policy: &PollPolicy,
) -> CamResult<RawImage> {
    for attempt in 1..=policy.attempts {
        let mut info = ImageInfo::default();
        sdk::check(
            api,
            handle,
            "read_image_info",
            api.read_image_info(handle, &mut info),
        )?;
        if info.size > 0 {
            log::debug!(
                "Image ready after {} poll(s): {} bytes, {}x{}",
                attempt,
                info.size,
                info.width,
                info.height
            );
            return download(api, handle, info);
        }
        if attempt < policy.attempts {
            sleep(policy.interval).await;
        }
    }
    Err(CameraError::AcquireTimeout {
        attempts: policy.attempts,
    })
}

fn download(api: &dyn CommandApi, handle: Handle, info: ImageInfo) -> CamResult<RawImage> {
    let mut bytes = vec![0u8; info.size as usize];
    let read_result = sdk::check(api, handle, "read_image", api.read_image(handle, &mut bytes));

    // Delete even when the read failed: leaving the slot occupied would leak
    // device-side buffer space across captures.
    let rc = api.delete_image(handle);
    if rc != sdk::codes::RC_COMPLETE {
        log::warn!("delete_image returned {} after download, ignoring", rc);
    }

    read_result?;
    Ok(RawImage {
        bytes,
        width: info.width,
        height: info.height,
        format: info.format,
        bits_per_sample: info.bits_per_sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::MockCamera;

    fn fast_policy(attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            attempts,
        }
    }

    #[tokio::test]
    async fn test_acquire_after_delayed_readiness() {
        let mock = MockCamera::new();
        mock.set_ready_after_polls(3);
        assert_eq!(mock.release_shoot(1), sdk::codes::RC_COMPLETE);

        let image = acquire(&mock, 1, &fast_policy(10)).await.unwrap();
        assert_eq!(image.width, 512);
        assert_eq!(image.bytes.len(), 512 * 512 * 2);
        assert!(!mock.has_pending_image(), "image must be deleted device-side");
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_never_ready() {
        let mock = MockCamera::new();
        mock.set_ready_after_polls(0); // never ready
        assert_eq!(mock.release_shoot(1), sdk::codes::RC_COMPLETE);

        let err = acquire(&mock, 1, &fast_policy(5)).await.unwrap_err();
        assert!(matches!(err, CameraError::AcquireTimeout { attempts: 5 }));
    }

    #[tokio::test]
    async fn test_failed_read_still_deletes() {
        let mock = MockCamera::new();
        mock.set_ready_after_polls(1);
        mock.fail_reads();
        assert_eq!(mock.release_shoot(1), sdk::codes::RC_COMPLETE);

        let err = acquire(&mock, 1, &fast_policy(3)).await.unwrap_err();
        assert!(matches!(err, CameraError::Fatal { .. }));
        assert!(
            !mock.has_pending_image(),
            "delete must run even when the read fails"
        );
    }
}
