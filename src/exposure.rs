//! The exposure state machine.
//!
//! Sequences one capture at a time through
//! `Idle → Configuring → Exposing{Timed|Bulb} → Downloading → Ready | Error`.
//! The triggering call returns promptly; the sequence and the post-stop
//! readiness poll run on background tasks that share one mutex-guarded
//! record (state + ready flag + last outcome). Device-level settle delays
//! and the wait-for-duration step are ordinary async sleeps; cancellation is
//! observed only at those suspension points, never mid native call.
//!
//! ## Cancellation
//!
//! Only bulb exposures support an active stop: the stop request short-cuts
//! the wait and issues the bulb-stop command early. Timed exposures cannot
//! be interrupted by the device protocol; a stop during a timed exposure is
//! accepted but has no effect until the device's own timer completes.

use crate::acquire::{self, PollPolicy};
use crate::capability::{self, CapabilitySnapshot};
use crate::channel::DeviceChannel;
use crate::config::ModelConfig;
use crate::error::{CamResult, CameraError};
use crate::retry::{run_with_retry, Attempt, RetryPolicy};
use crate::sdk::{self, Handle};
use crate::shutter::{self, SHUTTER_BULB};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;

/// Relative tolerance for the combination-recovery alternative search.
const ALTERNATIVE_TOLERANCE: f64 = 0.20;
/// Poll interval used by [`ExposureController::wait_outcome`].
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Externally visible state of the exposure engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureState {
    /// Initial state; the only state that accepts a new request.
    Idle,
    /// Negotiating ISO and shutter code with the device.
    Configuring,
    /// Device-timed exposure in flight.
    ExposingTimed,
    /// Software-timed bulb exposure in flight.
    ExposingBulb,
    /// Waiting for the image to land in the device buffer.
    Downloading,
    /// Terminal: outcome available. Reset to Idle before the next capture.
    Ready,
    /// Terminal: capture failed. Reset to Idle before the next capture.
    Error,
}

/// One capture request.
#[derive(Debug, Clone, Copy)]
pub struct ExposureRequest {
    /// Requested duration in seconds; must be positive.
    pub seconds: f64,
    /// Requested ISO; clamped to the nearest supported value.
    pub iso: i32,
}

/// Result of a completed capture.
#[derive(Debug, Clone)]
pub struct ExposureOutcome {
    /// Proprietary RAW payload as downloaded.
    pub bytes: Vec<u8>,
    /// Pixel width reported by the device.
    pub width: u32,
    /// Pixel height reported by the device.
    pub height: u32,
    /// Vendor format code of the payload.
    pub format: i32,
    /// Bits per sample.
    pub bits_per_sample: u32,
    /// ISO actually used (after clamping).
    pub iso: i32,
    /// Shutter code actually in effect.
    pub shutter_code: i32,
    /// Exposure seconds actually used.
    pub seconds: f64,
    /// Completion timestamp.
    pub completed_at: DateTime<Utc>,
}

/// Shared record the sequence task, the poll task, and callers coordinate
/// through. All fields live under one mutex.
struct Shared {
    state: ExposureState,
    image_ready: bool,
    outcome: Option<ExposureOutcome>,
    failure: Option<CameraError>,
}

struct Inner {
    channel: Arc<DeviceChannel>,
    cfg: ModelConfig,
    retry: RetryPolicy,
    poll: PollPolicy,
    shared: Mutex<Shared>,
    snapshot: Mutex<Option<CapabilitySnapshot>>,
    cancel: std::sync::Mutex<watch::Sender<bool>>,
}

/// Drives captures against one device session. Cheap to clone.
#[derive(Clone)]
pub struct ExposureController {
    inner: Arc<Inner>,
}

/// What the configure/expose phases hand to the download phase.
#[derive(Debug, Clone, Copy)]
struct CaptureMeta {
    iso: i32,
    shutter_code: i32,
    seconds: f64,
}

impl ExposureController {
    /// New controller over an open channel, configured for one model.
    pub fn new(channel: Arc<DeviceChannel>, cfg: ModelConfig) -> Self {
        let retry = RetryPolicy::from_config(&cfg);
        let poll = PollPolicy::from_config(&cfg);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                channel,
                cfg,
                retry,
                poll,
                shared: Mutex::new(Shared {
                    state: ExposureState::Idle,
                    image_ready: false,
                    outcome: None,
                    failure: None,
                }),
                snapshot: Mutex::new(None),
                cancel: std::sync::Mutex::new(cancel_tx),
            }),
        }
    }

    /// Current engine state.
    pub async fn state(&self) -> ExposureState {
        self.inner.shared.lock().await.state
    }

    /// Whether a completed image is waiting to be taken.
    pub async fn image_ready(&self) -> bool {
        self.inner.shared.lock().await.image_ready
    }

    /// Return a terminal state (`Ready`/`Error`) to `Idle`.
    ///
    /// Rejected while a capture is in flight.
    pub async fn reset(&self) -> CamResult<()> {
        let mut shared = self.inner.shared.lock().await;
        match shared.state {
            ExposureState::Idle => Ok(()),
            ExposureState::Ready | ExposureState::Error => {
                shared.state = ExposureState::Idle;
                shared.image_ready = false;
                shared.outcome = None;
                shared.failure = None;
                Ok(())
            }
            state => Err(CameraError::NotIdle { state }),
        }
    }

    /// Begin a capture. Returns promptly once the request is accepted; the
    /// sequence and the readiness poll continue on background tasks.
    ///
    /// Known risk, preserved deliberately: when a shutter-speed combination
    /// error survives the recovery attempt, the capture proceeds with the
    /// originally attempted code and a logged warning instead of aborting.
    /// On models that gate shutter speed with a physical dial the software
    /// cannot override, the exposure that runs may differ from the request.
    pub async fn start_capture(&self, request: ExposureRequest) -> CamResult<()> {
        if !request.seconds.is_finite() || request.seconds <= 0.0 {
            return Err(CameraError::InvalidRequest {
                reason: format!("duration must be positive, got {}", request.seconds),
            });
        }
        // Single-flight: accept only from Idle, atomically.
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.state != ExposureState::Idle {
                return Err(CameraError::NotIdle {
                    state: shared.state,
                });
            }
            shared.state = ExposureState::Configuring;
            shared.image_ready = false;
            shared.outcome = None;
            shared.failure = None;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = cancel_tx;

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_capture(request, cancel_rx).await;
        });
        Ok(())
    }

    /// Request a stop. Effective only for bulb exposures; a stop during a
    /// timed exposure is accepted but cannot shorten the device's own timer.
    pub fn stop(&self) {
        let cancel = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = cancel.send(true);
    }

    /// Wait until the capture reaches `Ready` and take the outcome, or
    /// surface the failure that moved the engine to `Error`.
    pub async fn wait_outcome(&self, timeout: Duration) -> CamResult<ExposureOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut shared = self.inner.shared.lock().await;
                match shared.state {
                    ExposureState::Ready => {
                        shared.image_ready = false;
                        if let Some(outcome) = shared.outcome.take() {
                            return Ok(outcome);
                        }
                        // Outcome already taken by an earlier waiter.
                        return Err(CameraError::NotIdle {
                            state: ExposureState::Ready,
                        });
                    }
                    ExposureState::Error => {
                        return Err(shared.failure.take().unwrap_or(CameraError::NotIdle {
                            state: ExposureState::Error,
                        }));
                    }
                    _ => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CameraError::CaptureWaitTimeout);
            }
            sleep(WAIT_POLL).await;
        }
    }

    /// Drop the cached capability snapshot so the next capture re-negotiates.
    pub async fn invalidate_capabilities(&self) {
        *self.inner.snapshot.lock().await = None;
    }

    /// The cached capability snapshot, negotiating one if needed.
    pub async fn capabilities(&self) -> CamResult<CapabilitySnapshot> {
        let mut cached = self.inner.snapshot.lock().await;
        if let Some(snapshot) = cached.as_ref() {
            return Ok(snapshot.clone());
        }
        let snapshot = self.inner.channel.negotiate(&self.inner.cfg).await?;
        *cached = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn set_state(&self, state: ExposureState) {
        self.inner.shared.lock().await.state = state;
    }

    async fn fail(&self, err: CameraError) {
        log::warn!("Capture failed: {}", err);
        let mut shared = self.inner.shared.lock().await;
        shared.state = ExposureState::Error;
        shared.failure = Some(err);
    }

    async fn run_capture(self, request: ExposureRequest, cancel_rx: watch::Receiver<bool>) {
        match self.configure_and_expose(request, cancel_rx).await {
            Ok(meta) => {
                self.set_state(ExposureState::Downloading).await;
                let controller = self.clone();
                // Readiness polling runs on its own task, independent of the
                // path that triggered the stop.
                tokio::spawn(async move {
                    controller.download(meta).await;
                });
            }
            Err(err) => self.fail(err).await,
        }
    }

    async fn configure_and_expose(
        &self,
        request: ExposureRequest,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> CamResult<CaptureMeta> {
        let inner = &self.inner;
        let api = inner.channel.api().clone();
        let handle = inner.channel.handle()?;

        // 1. Clamp ISO to the supported set.
        let snapshot = self.capabilities().await?;
        let iso = if snapshot.supports_iso(request.iso) {
            request.iso
        } else {
            let clamped = snapshot.clamp_iso(request.iso);
            log::info!(
                "Requested ISO {} unsupported; clamped to {}",
                request.iso,
                clamped
            );
            clamped
        };

        // 2. Send ISO, retrying through busy streaks.
        run_with_retry("set_sensitivity", &inner.retry, || {
            Attempt::from_result(sdk::check(
                api.as_ref(),
                handle,
                "set_sensitivity",
                api.set_sensitivity(handle, iso),
            ))
        })
        .await?;

        // 3. ISO changes can shift which shutter codes are legal, so the
        // cached map is stale now; re-negotiate before resolving.
        self.invalidate_capabilities().await;
        let mut snapshot = self.capabilities().await?;

        let code = shutter::resolve(
            request.seconds,
            &snapshot.shutter_map,
            snapshot.bulb_capable,
            shutter::MAX_PROGRAMMABLE_SECS,
        )?;

        // 4. Program the shutter speed. A bulb request sets the reserved
        // bulb code so a dial-selected timed speed cannot govern the release.
        let (set_code, set_secs) = self
            .set_shutter_code(api.as_ref(), handle, code, request.seconds, &mut snapshot)
            .await?;
        let (effective_code, effective_secs) = if set_code == SHUTTER_BULB {
            (SHUTTER_BULB, request.seconds)
        } else {
            (set_code, set_secs)
        };

        // 5. Run the release sequence.
        let seconds_used = if effective_code == SHUTTER_BULB {
            self.set_state(ExposureState::ExposingBulb).await;
            self.expose_bulb(api.as_ref(), handle, request.seconds, &mut cancel_rx)
                .await?
        } else {
            self.set_state(ExposureState::ExposingTimed).await;
            self.expose_timed(api.as_ref(), handle, effective_secs, &mut cancel_rx)
                .await?
        };

        Ok(CaptureMeta {
            iso,
            shutter_code: effective_code,
            seconds: seconds_used,
        })
    }

    /// Send the shutter-speed command, classifying the result.
    ///
    /// Busy retries are bounded; a combination error triggers re-negotiation
    /// and a single alternative attempt before proceeding with the original
    /// code under a warning; anything else aborts the capture.
    async fn set_shutter_code(
        &self,
        api: &dyn sdk::CommandApi,
        handle: Handle,
        code: i32,
        requested_secs: f64,
        snapshot: &mut CapabilitySnapshot,
    ) -> CamResult<(i32, f64)> {
        let inner = &self.inner;
        let result = run_with_retry("set_shutter_speed", &inner.retry, || {
            Attempt::from_result(sdk::check(
                api,
                handle,
                "set_shutter_speed",
                api.set_shutter_speed(handle, code),
            ))
        })
        .await;

        let mapped = snapshot.shutter_map.get(&code).copied();
        let intended_secs = mapped.unwrap_or(requested_secs);

        match result {
            Ok(()) => Ok((code, intended_secs)),
            Err(CameraError::Combination { record, .. }) => {
                log::warn!(
                    "Shutter code {} invalid for current device state ({}); re-negotiating",
                    code,
                    record
                );
                // The combination error invalidated the cached map.
                if let Ok((codes, bulb)) = inner.channel.query_shutter_codes(&inner.cfg).await {
                    snapshot.shutter_map = capability::build_shutter_map(&codes, &inner.cfg);
                    snapshot.bulb_capable = bulb;
                    *inner.snapshot.lock().await = Some(snapshot.clone());
                }

                // No programmable code can honor a beyond-range duration, so
                // the alternative search only applies to timed codes.
                if code != SHUTTER_BULB {
                    if let Some(alt) =
                        find_alternative(&snapshot.shutter_map, requested_secs, code)
                    {
                        let alt_result = sdk::check(
                            api,
                            handle,
                            "set_shutter_speed",
                            api.set_shutter_speed(handle, alt),
                        );
                        match alt_result {
                            Ok(()) => {
                                let alt_secs = snapshot
                                    .shutter_map
                                    .get(&alt)
                                    .copied()
                                    .unwrap_or(requested_secs);
                                log::warn!(
                                    "Using alternative shutter code {} ({}s) for requested {}s",
                                    alt,
                                    alt_secs,
                                    requested_secs
                                );
                                return Ok((alt, alt_secs));
                            }
                            Err(err) => {
                                log::warn!(
                                    "Alternative shutter code {} also failed: {}",
                                    alt,
                                    err
                                );
                            }
                        }
                    }
                }

                // Some models gate shutter speed behind a physical dial the
                // software cannot override. Proceed with what was attempted
                // rather than aborting the capture; the dial-selected speed
                // will govern the exposure.
                log::warn!(
                    "Proceeding with shutter code {} despite combination error; \
                     the device's current setting will govern the exposure",
                    code
                );
                Ok((code, intended_secs))
            }
            Err(err) => Err(err),
        }
    }

    /// Three-phase bulb release: half-press, settle, open, wait, settle,
    /// combined stop. Returns the seconds the shutter was actually open.
    async fn expose_bulb(
        &self,
        api: &dyn sdk::CommandApi,
        handle: Handle,
        seconds: f64,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> CamResult<f64> {
        let settle = Duration::from_millis(self.inner.cfg.settle_ms);

        sdk::check(
            api,
            handle,
            "release_half_press",
            api.release_half_press(handle),
        )?;

        let opened: CamResult<f64> = async {
            sleep(settle).await;
            sdk::check(
                api,
                handle,
                "release_bulb_start",
                api.release_bulb_start(handle),
            )?;

            let opened = tokio::time::Instant::now();
            tokio::select! {
                () = sleep(Duration::from_secs_f64(seconds)) => {}
                _ = changed_to_true(cancel_rx) => {
                    log::info!("Bulb exposure stopped early by request");
                }
            }
            let open_secs = opened.elapsed().as_secs_f64();
            sleep(settle).await;
            Ok(open_secs)
        }
        .await;

        match opened {
            Ok(open_secs) => {
                // One combined call closes the shutter and releases the
                // half-press.
                sdk::check(
                    api,
                    handle,
                    "release_bulb_stop",
                    api.release_bulb_stop(handle),
                )?;
                Ok(open_secs.min(seconds))
            }
            Err(err) => {
                // The half-press is still held; issue a best-effort stop so
                // the camera is not left in the held state.
                let rc = api.release_bulb_stop(handle);
                if rc != crate::sdk::codes::RC_COMPLETE {
                    log::warn!(
                        "release_bulb_stop after failed bulb start returned {}, ignoring",
                        rc
                    );
                }
                Err(err)
            }
        }
    }

    /// Single shoot-and-release call, then wait out the device's own timer
    /// plus slack before polling. Stop requests are accepted but cannot
    /// shorten the device timer.
    async fn expose_timed(
        &self,
        api: &dyn sdk::CommandApi,
        handle: Handle,
        seconds: f64,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> CamResult<f64> {
        run_with_retry("release_shoot", &self.inner.retry, || {
            Attempt::from_result(sdk::check(
                api,
                handle,
                "release_shoot",
                api.release_shoot(handle),
            ))
        })
        .await?;

        let slack = (seconds * 0.2).clamp(1.0, 5.0);
        let total = Duration::from_secs_f64(seconds + slack);
        let started = tokio::time::Instant::now();

        tokio::select! {
            () = sleep(total) => {}
            _ = changed_to_true(cancel_rx) => {
                log::warn!(
                    "Stop requested during a timed exposure; the device timer \
                     cannot be interrupted, waiting for it to complete"
                );
                let remaining = total.saturating_sub(started.elapsed());
                sleep(remaining).await;
            }
        }
        Ok(seconds)
    }

    /// Download phase: poll for readiness, fetch the payload, publish the
    /// outcome. Runs on its own task.
    async fn download(self, meta: CaptureMeta) {
        let api = self.inner.channel.api().clone();
        let handle = match self.inner.channel.handle() {
            Ok(handle) => handle,
            Err(err) => return self.fail(err).await,
        };

        match acquire::acquire(api.as_ref(), handle, &self.inner.poll).await {
            Ok(image) => {
                let outcome = ExposureOutcome {
                    bytes: image.bytes,
                    width: image.width,
                    height: image.height,
                    format: image.format,
                    bits_per_sample: image.bits_per_sample,
                    iso: meta.iso,
                    shutter_code: meta.shutter_code,
                    seconds: meta.seconds,
                    completed_at: Utc::now(),
                };
                let mut shared = self.inner.shared.lock().await;
                shared.outcome = Some(outcome);
                shared.image_ready = true;
                shared.state = ExposureState::Ready;
                log::info!(
                    "Capture ready: ISO {}, code {}, {:.3}s",
                    meta.iso,
                    meta.shutter_code,
                    meta.seconds
                );
            }
            Err(err) => self.fail(err).await,
        }
    }
}

async fn changed_to_true(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without a stop request; wait forever so the
            // select arm never fires.
            std::future::pending::<()>().await;
        }
    }
}

/// Closest legal alternative to `requested` seconds, excluding the code that
/// just failed. Preference order: within ±20% of the request, then not
/// longer than the request, then closest overall.
fn find_alternative(
    map: &std::collections::BTreeMap<i32, f64>,
    requested: f64,
    exclude: i32,
) -> Option<i32> {
    let candidates: Vec<(i32, f64)> = map
        .iter()
        .filter(|(&code, _)| code != exclude && code != SHUTTER_BULB)
        .map(|(&code, &secs)| (code, secs))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let tolerance = requested * ALTERNATIVE_TOLERANCE;
    let within: Vec<(i32, f64)> = candidates
        .iter()
        .copied()
        .filter(|(_, secs)| (secs - requested).abs() <= tolerance)
        .collect();

    let pick_closest = |pool: &[(i32, f64)]| {
        pool.iter()
            .copied()
            .min_by(|a, b| {
                let da = (a.1 - requested).abs();
                let db = (b.1 - requested).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(code, _)| code)
    };

    if !within.is_empty() {
        let not_longer: Vec<(i32, f64)> = within
            .iter()
            .copied()
            .filter(|(_, secs)| *secs <= requested + shutter::DURATION_EPSILON)
            .collect();
        if !not_longer.is_empty() {
            return pick_closest(&not_longer);
        }
        return pick_closest(&within);
    }
    pick_closest(&candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(entries: &[(i32, f64)]) -> std::collections::BTreeMap<i32, f64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_alternative_prefers_not_longer_within_tolerance() {
        // requested 1.0s, failed code mapped to 1.0s; 0.9s and 1.1s both
        // within 20%, the not-longer one must win.
        let map = map_of(&[(100, 0.9), (200, 1.0), (300, 1.1)]);
        assert_eq!(find_alternative(&map, 1.0, 200), Some(100));
    }

    #[test]
    fn test_alternative_accepts_longer_when_nothing_shorter_in_tolerance() {
        let map = map_of(&[(100, 0.5), (300, 1.1)]);
        assert_eq!(find_alternative(&map, 1.0, 999), Some(300));
    }

    #[test]
    fn test_alternative_falls_back_to_closest_overall() {
        let map = map_of(&[(100, 0.2), (300, 3.0)]);
        assert_eq!(find_alternative(&map, 1.0, 999), Some(100));
    }

    #[test]
    fn test_alternative_ignores_bulb_and_excluded() {
        let map = map_of(&[(SHUTTER_BULB, 3600.0), (200, 1.0)]);
        assert_eq!(find_alternative(&map, 1.0, 200), None);
    }
}
