//! Capability negotiation: ISO and shutter-speed enumeration.
//!
//! Supported sensitivities are dynamic-range-dependent, so the dynamic range
//! is pinned to the configured reference value before every ISO query. All
//! variable-length queries use the vendor's two-phase convention via
//! [`sdk::query_list`]. When a device query itself fails, the negotiator
//! falls back entirely to the static per-model configuration; capability
//! bounds are never left unset.

use crate::config::ModelConfig;
use crate::error::CamResult;
use crate::sdk::{self, CommandApi, DeviceInfo, Handle};
use crate::shutter::{self, SHUTTER_BULB};
use std::collections::BTreeMap;

/// Common sensitivity ladder used when the device query fails and only the
/// configured min/max bounds are known.
const FALLBACK_ISO_LADDER: [i32; 21] = [
    80, 100, 125, 160, 200, 250, 320, 400, 500, 640, 800, 1000, 1250, 1600, 2000, 2500, 3200,
    6400, 12800, 25600, 51200,
];

/// Everything the exposure engine needs to know about the connected device.
///
/// Rebuilt whenever ISO changes or a combination error invalidates the
/// cached shutter map.
#[derive(Debug, Clone)]
pub struct CapabilitySnapshot {
    /// Supported ISO values, ascending and unique.
    pub isos: Vec<i32>,
    /// Shutter code to actual seconds; always contains the bulb sentinel.
    pub shutter_map: BTreeMap<i32, f64>,
    /// Whether bulb exposures are possible (after config reconciliation).
    pub bulb_capable: bool,
    /// Minimum supported sensitivity.
    pub iso_min: i32,
    /// Maximum supported sensitivity.
    pub iso_max: i32,
    /// Shortest programmable exposure, seconds.
    pub exposure_min_secs: f64,
    /// Longest programmable exposure, seconds (bulb excluded).
    pub exposure_max_secs: f64,
    /// Sensor width in pixels.
    pub sensor_width: u32,
    /// Sensor height in pixels.
    pub sensor_height: u32,
    /// Frames currently in the device buffer.
    pub buffer_shoot_frames: u32,
    /// Total device buffer slots.
    pub buffer_total_frames: u32,
}

impl CapabilitySnapshot {
    /// Clamp a requested ISO to the nearest supported value.
    pub fn clamp_iso(&self, requested: i32) -> i32 {
        let mut best = requested;
        let mut best_dist = i64::MAX;
        for &iso in &self.isos {
            let dist = (i64::from(iso) - i64::from(requested)).abs();
            // On equidistant ties the lower ISO wins (ladder is ascending).
            if dist < best_dist {
                best_dist = dist;
                best = iso;
            }
        }
        best
    }

    /// Whether `iso` is exactly supported.
    pub fn supports_iso(&self, iso: i32) -> bool {
        self.isos.binary_search(&iso).is_ok()
    }
}

/// Query supported ISO values. The dynamic range is set to the configured
/// reference first; a DR failure fails the query rather than being ignored,
/// because the answer would be wrong for the range we are about to shoot in.
pub fn query_sensitivities(
    api: &dyn CommandApi,
    handle: Handle,
    cfg: &ModelConfig,
) -> CamResult<Vec<i32>> {
    sdk::check(
        api,
        handle,
        "set_dynamic_range",
        api.set_dynamic_range(handle, cfg.dynamic_range_code),
    )?;
    let mut isos = sdk::query_list(api, handle, "get_sensitivity_list", |out, n| {
        api.get_sensitivity_list(handle, out, n)
    })?;
    isos.sort_unstable();
    isos.dedup();
    Ok(isos)
}

/// Query supported shutter codes and the bulb flag.
///
/// Reconciliation: some devices misreport themselves bulb-incapable; when the
/// per-model configuration asserts bulb capability, the configuration wins.
pub fn query_shutter_codes(
    api: &dyn CommandApi,
    handle: Handle,
    cfg: &ModelConfig,
) -> CamResult<(Vec<i32>, bool)> {
    let mut bulb_reported = false;
    let mut codes = {
        let mut count: u32 = 0;
        sdk::check(
            api,
            handle,
            "get_shutter_speed_list",
            api.get_shutter_speed_list(handle, None, &mut count, &mut bulb_reported),
        )?;
        let mut codes = vec![0i32; count as usize];
        if count > 0 {
            sdk::check(
                api,
                handle,
                "get_shutter_speed_list",
                api.get_shutter_speed_list(
                    handle,
                    Some(codes.as_mut_slice()),
                    &mut count,
                    &mut bulb_reported,
                ),
            )?;
            codes.truncate(count as usize);
        }
        codes
    };
    codes.sort_unstable();
    codes.dedup();

    let bulb_capable = if !bulb_reported && cfg.force_bulb {
        log::info!(
            "Device reports bulb-incapable but model '{}' config asserts bulb; config wins",
            cfg.model
        );
        true
    } else {
        bulb_reported
    };
    Ok((codes, bulb_capable))
}

/// Build the shutter map for the queried codes.
///
/// Per code, the per-model override wins over the reference table; a code in
/// neither gets the naive reciprocal `1/code` as a last resort (SDK codes are
/// not reciprocals in general, so this is logged and never authoritative).
/// The bulb sentinel is always force-inserted, mapped to the configured
/// maximum bulb duration.
pub fn build_shutter_map(codes: &[i32], cfg: &ModelConfig) -> BTreeMap<i32, f64> {
    let overrides = cfg.shutter_override_map();
    let mut map = BTreeMap::new();
    for &code in codes {
        if code == SHUTTER_BULB {
            continue;
        }
        let duration = if let Some(&secs) = overrides.get(&code) {
            secs
        } else if let Some(secs) = shutter::reference_duration(code) {
            secs
        } else {
            let secs = 1.0 / f64::from(code);
            log::debug!(
                "Shutter code {} unmapped; using reciprocal fallback {}s",
                code,
                secs
            );
            secs
        };
        map.insert(code, duration);
    }
    map.insert(SHUTTER_BULB, cfg.max_bulb_secs);
    map
}

/// Run the full negotiation and produce a [`CapabilitySnapshot`].
///
/// Query failures do not abort the connection: the snapshot falls back to
/// the static per-model defaults so min/max sensitivity and exposure are
/// never unset.
pub fn negotiate(
    api: &dyn CommandApi,
    handle: Handle,
    cfg: &ModelConfig,
) -> CamResult<CapabilitySnapshot> {
    let isos = match query_sensitivities(api, handle, cfg) {
        Ok(isos) if !isos.is_empty() => isos,
        Ok(_) => {
            log::warn!("Device reported no sensitivities; using configured fallback ladder");
            fallback_isos(cfg)
        }
        Err(err) => {
            log::warn!(
                "Sensitivity query failed ({}); using configured fallback ladder",
                err
            );
            fallback_isos(cfg)
        }
    };

    let (shutter_map, bulb_capable) = match query_shutter_codes(api, handle, cfg) {
        Ok((codes, bulb)) => (build_shutter_map(&codes, cfg), bulb),
        Err(err) => {
            log::warn!(
                "Shutter capability query failed ({}); using reference table within configured bounds",
                err
            );
            let codes: Vec<i32> = shutter::REFERENCE_TABLE
                .iter()
                .filter(|(_, d)| *d >= cfg.exposure_min_secs && *d <= cfg.exposure_max_secs)
                .map(|(c, _)| *c)
                .collect();
            (build_shutter_map(&codes, cfg), cfg.force_bulb)
        }
    };

    let mut info = DeviceInfo::default();
    let rc = api.get_device_info(handle, &mut info);
    if let Err(err) = sdk::check(api, handle, "get_device_info", rc) {
        log::warn!("Device info query failed ({}); sensor geometry unknown", err);
        info = DeviceInfo::default();
    }

    let iso_min = isos.first().copied().unwrap_or(cfg.iso_min);
    let iso_max = isos.last().copied().unwrap_or(cfg.iso_max);
    let (exposure_min_secs, exposure_max_secs) = exposure_bounds(&shutter_map, cfg);

    Ok(CapabilitySnapshot {
        isos,
        shutter_map,
        bulb_capable,
        iso_min,
        iso_max,
        exposure_min_secs,
        exposure_max_secs,
        sensor_width: info.sensor_width,
        sensor_height: info.sensor_height,
        buffer_shoot_frames: info.buffer_shoot_frames,
        buffer_total_frames: info.buffer_total_frames,
    })
}

fn fallback_isos(cfg: &ModelConfig) -> Vec<i32> {
    FALLBACK_ISO_LADDER
        .iter()
        .copied()
        .filter(|iso| *iso >= cfg.iso_min && *iso <= cfg.iso_max)
        .collect()
}

fn exposure_bounds(map: &BTreeMap<i32, f64>, cfg: &ModelConfig) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = 0.0f64;
    for (&code, &secs) in map {
        if code == SHUTTER_BULB {
            continue;
        }
        min = min.min(secs);
        max = max.max(secs);
    }
    if min.is_finite() && max > 0.0 {
        (min, max)
    } else {
        (cfg.exposure_min_secs, cfg.exposure_max_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::MockCamera;
    use crate::sdk::CommandApi;

    fn open(mock: &MockCamera) -> Handle {
        let mut h = 0;
        assert_eq!(mock.open("mock-0", &mut h), sdk::codes::RC_COMPLETE);
        h
    }

    #[test]
    fn test_sensitivity_query_sets_dynamic_range_first() {
        let mock = MockCamera::with_isos(vec![400, 100, 200, 400]);
        let h = open(&mock);
        let cfg = ModelConfig::default();
        let isos = query_sensitivities(&mock, h, &cfg).unwrap();
        assert_eq!(isos, vec![100, 200, 400]);

        let calls = mock.calls();
        let dr = calls
            .iter()
            .position(|c| c.starts_with("set_dynamic_range"))
            .unwrap();
        let query = calls
            .iter()
            .position(|c| c == "get_sensitivity_list")
            .unwrap();
        assert!(dr < query, "dynamic range must be pinned before querying");
    }

    #[test]
    fn test_config_wins_bulb_reconciliation() {
        let mock = MockCamera::new().with_shutter_codes(vec![1000000, 500000], false);
        let h = open(&mock);
        let cfg = ModelConfig {
            force_bulb: true,
            ..ModelConfig::default()
        };
        let (_, bulb) = query_shutter_codes(&mock, h, &cfg).unwrap();
        assert!(bulb);

        let cfg = ModelConfig::default();
        let (_, bulb) = query_shutter_codes(&mock, h, &cfg).unwrap();
        assert!(!bulb);
    }

    #[test]
    fn test_build_shutter_map_layering() {
        let mut cfg = ModelConfig::default();
        cfg.shutter_overrides.insert("1000000".to_string(), 0.98);
        // 1000000 overridden, 500000 from reference, 12345 has no mapping.
        let map = build_shutter_map(&[1000000, 500000, 12345], &cfg);
        assert_eq!(map[&1000000], 0.98);
        assert_eq!(map[&500000], 0.5);
        assert!((map[&12345] - 1.0 / 12345.0).abs() < 1e-12);
        assert_eq!(map[&SHUTTER_BULB], cfg.max_bulb_secs);
    }

    #[test]
    fn test_build_shutter_map_is_idempotent() {
        let cfg = ModelConfig::default();
        let codes = crate::shutter::reference_codes();
        let a = build_shutter_map(&codes, &cfg);
        let b = build_shutter_map(&codes, &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn test_negotiate_falls_back_when_shutter_query_fails() {
        let mock = MockCamera::new();
        mock.fail_shutter_query();
        let h = open(&mock);
        let cfg = ModelConfig {
            force_bulb: true,
            ..ModelConfig::default()
        };
        let snap = negotiate(&mock, h, &cfg).unwrap();
        assert!(snap.bulb_capable);
        assert!(snap.shutter_map.contains_key(&SHUTTER_BULB));
        assert!(snap.shutter_map.len() > 1);
        assert!(snap.exposure_max_secs <= cfg.exposure_max_secs);
    }

    #[test]
    fn test_clamp_iso_picks_nearest() {
        let mock = MockCamera::with_isos(vec![100, 200, 400, 800]);
        let h = open(&mock);
        let snap = negotiate(&mock, h, &ModelConfig::default()).unwrap();
        assert_eq!(snap.clamp_iso(250), 200);
        assert_eq!(snap.clamp_iso(700), 800);
        assert_eq!(snap.clamp_iso(400), 400);
        assert!(snap.supports_iso(200));
        assert!(!snap.supports_iso(250));
    }
}
