//! Camera control engine for tethered long-exposure astrophotography.
//!
//! This library drives a tethered digital camera over its vendor command SDK
//! to perform deterministic, repeatable captures, then hands the downloaded
//! proprietary RAW payload to an external decoder and crops the result to the
//! sensor's active area.
//!
//! The pieces, leaves first:
//!
//! - [`sdk`] — the opaque vendor RPC boundary, result-code classification,
//!   the two-phase query helper, and a scriptable mock for tests.
//! - [`channel`] — session lifecycle, serialized process-wide.
//! - [`capability`] — ISO/shutter-code negotiation with config fallbacks.
//! - [`shutter`] — the fixed code table and the duration-to-code resolver.
//! - [`exposure`] — the capture state machine (timed and bulb), retry and
//!   combination-error recovery, cancellation.
//! - [`acquire`] — bounded readiness polling and payload download.
//! - [`decode`] — the RAW decoder contract and the active-area crop.
//!
//! ## Example
//!
//! ```no_run
//! use fujicam::{channel::DeviceChannel, config::ModelConfig,
//!               exposure::{ExposureController, ExposureRequest}};
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn run(api: Arc<dyn fujicam::sdk::CommandApi>) -> fujicam::error::CamResult<()> {
//! let channel = Arc::new(DeviceChannel::new(api));
//! let devices = channel.detect().await?;
//! channel.open(&devices[0].id).await?;
//!
//! let camera = ExposureController::new(channel, ModelConfig::default());
//! camera.start_capture(ExposureRequest { seconds: 120.0, iso: 800 }).await?;
//! let outcome = camera.wait_outcome(Duration::from_secs(180)).await?;
//! println!("{} bytes at ISO {}", outcome.bytes.len(), outcome.iso);
//! # Ok(())
//! # }
//! ```

pub mod acquire;
pub mod capability;
pub mod channel;
pub mod config;
pub mod decode;
pub mod error;
pub mod exposure;
pub mod retry;
pub mod sdk;
pub mod shutter;

pub use error::{CamResult, CameraError, ErrorRecord};
pub use exposure::{ExposureController, ExposureOutcome, ExposureRequest, ExposureState};
