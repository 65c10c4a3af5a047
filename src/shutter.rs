//! Shutter-speed codes and the duration-to-code resolver.
//!
//! Shutter codes are vendor-defined integers; the duration a code produces is
//! obtained only by table lookup, never by formula. The reference table below
//! is generation-independent and spans 1/180000 s to 60 s on the vendor's
//! sixth-stop code lattice, with the conventional actual durations the
//! firmware exposes. Per-model configuration may override individual entries;
//! queried codes missing from both fall back to the naive reciprocal
//! `1/code`, which is known to be physically dubious and is kept only as a
//! last resort.

use crate::error::{CamResult, CameraError};
use std::collections::BTreeMap;

/// Vendor-reserved code meaning "duration controlled by software timing".
///
/// All real codes on the lattice are positive.
pub const SHUTTER_BULB: i32 = -1;

/// Longest device-native exposure in the reference table, in seconds.
/// Requests beyond this require bulb.
pub const MAX_PROGRAMMABLE_SECS: f64 = 60.0;

/// Tolerance for duration comparisons. Far below the tightest table spacing.
pub const DURATION_EPSILON: f64 = 1e-6;

/// Fixed reference mapping of shutter code to actual exposure seconds.
pub const REFERENCE_TABLE: [(i32, f64); 73] = [
    (6, 5.5555555556e-6),
    (7, 7.6923076923e-6),
    (9, 1.0000000000e-5),
    (12, 1.2500000000e-5),
    (15, 1.5625000000e-5),
    (19, 2.0000000000e-5),
    (24, 2.5000000000e-5),
    (30, 3.1250000000e-5),
    (38, 4.0000000000e-5),
    (48, 5.0000000000e-5),
    (61, 6.2500000000e-5),
    (76, 7.6923076923e-5),
    (96, 1.0000000000e-4),
    (122, 1.2500000000e-4),
    (153, 1.5625000000e-4),
    (193, 2.0000000000e-4),
    (244, 2.5000000000e-4),
    (307, 3.1250000000e-4),
    (387, 4.0000000000e-4),
    (488, 5.0000000000e-4),
    (615, 6.2500000000e-4),
    (775, 7.6923076923e-4),
    (976, 1.0000000000e-3),
    (1230, 1.2500000000e-3),
    (1550, 1.5625000000e-3),
    (1953, 2.0000000000e-3),
    (2460, 2.5000000000e-3),
    (3100, 3.1250000000e-3),
    (3906, 4.0000000000e-3),
    (4921, 5.0000000000e-3),
    (6200, 6.2500000000e-3),
    (7812, 8.0000000000e-3),
    (9843, 0.01),
    (12401, 0.0125),
    (15625, 0.015625),
    (19686, 0.02),
    (24803, 0.025),
    (31250, 0.03125),
    (39372, 0.04),
    (49606, 0.05),
    (62500, 0.0625),
    (78745, 0.07692307692),
    (99212, 0.1),
    (125000, 0.125),
    (157490, 0.15625),
    (198425, 0.2),
    (250000, 0.25),
    (314980, 0.3125),
    (396850, 0.4),
    (500000, 0.5),
    (629960, 0.625),
    (707106, 0.6666666667),
    (793700, 0.7692307692),
    (1000000, 1.0),
    (1259921, 1.3),
    (1414213, 1.5),
    (1587401, 1.6),
    (2000000, 2.0),
    (2519842, 2.5),
    (3174802, 3.2),
    (4000000, 4.0),
    (5039684, 5.0),
    (6349604, 6.4),
    (8000000, 8.0),
    (10079368, 10.0),
    (12699208, 13.0),
    (16000000, 16.0),
    (20158736, 20.0),
    (25398416, 25.0),
    (32000000, 32.0),
    (40317473, 40.0),
    (50796833, 50.0),
    (64000000, 60.0),
];

/// Duration for `code` from the reference table, if present.
pub fn reference_duration(code: i32) -> Option<f64> {
    REFERENCE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| *d)
}

/// All codes in the reference table, ascending.
pub fn reference_codes() -> Vec<i32> {
    REFERENCE_TABLE.iter().map(|(c, _)| *c).collect()
}

/// Map a requested duration to the best device-native code.
///
/// Policy: prefer under-exposure over over-exposure. Among non-bulb entries,
/// pick the largest mapped duration that does not exceed
/// `requested + DURATION_EPSILON`; an exact match (within epsilon) therefore
/// always wins. Requests beyond `max_programmable` need bulb; if the device
/// cannot bulb, that is an out-of-range error. If no non-bulb entry qualifies
/// at all, the bulb sentinel is returned as a last resort.
pub fn resolve(
    requested_secs: f64,
    map: &BTreeMap<i32, f64>,
    bulb_capable: bool,
    max_programmable: f64,
) -> CamResult<i32> {
    if requested_secs > max_programmable + DURATION_EPSILON {
        if bulb_capable {
            return Ok(SHUTTER_BULB);
        }
        return Err(CameraError::ExposureOutOfRange {
            requested: requested_secs,
            max: max_programmable,
        });
    }

    let mut best: Option<(i32, f64)> = None;
    for (&code, &duration) in map {
        if code == SHUTTER_BULB {
            continue;
        }
        if duration <= requested_secs + DURATION_EPSILON {
            match best {
                Some((_, d)) if d >= duration => {}
                _ => best = Some((code, duration)),
            }
        }
    }

    Ok(best.map_or(SHUTTER_BULB, |(code, _)| code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_map() -> BTreeMap<i32, f64> {
        REFERENCE_TABLE.iter().copied().collect()
    }

    #[test]
    fn test_exact_table_points_resolve_to_themselves() {
        let map = reference_map();
        for (code, duration) in REFERENCE_TABLE {
            assert_eq!(
                resolve(duration, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
                code,
                "table point {duration}s should resolve to {code}"
            );
        }
    }

    #[test]
    fn test_one_second_resolves_exactly() {
        let map = reference_map();
        assert_eq!(
            resolve(1.0, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
            1000000
        );
    }

    #[test]
    fn test_floor_rule_excludes_longer_neighbor() {
        // 0.70s sits between 0.6667s (707106) and 0.769s (793700); the longer
        // neighbor would over-expose and must lose.
        let map = reference_map();
        assert_eq!(
            resolve(0.70, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
            707106
        );
    }

    #[test]
    fn test_floor_property_sweep() {
        let map = reference_map();
        let mut d = 1e-5;
        while d <= MAX_PROGRAMMABLE_SECS {
            let code = resolve(d, &map, true, MAX_PROGRAMMABLE_SECS).unwrap();
            if code != SHUTTER_BULB {
                let mapped = map[&code];
                assert!(
                    mapped <= d + DURATION_EPSILON,
                    "resolve({d}) returned {code} mapping to {mapped}, over-exposing"
                );
            }
            d *= 1.37;
        }
    }

    #[test]
    fn test_beyond_max_needs_bulb() {
        let map = reference_map();
        assert_eq!(
            resolve(120.0, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
            SHUTTER_BULB
        );
        let err = resolve(120.0, &map, false, MAX_PROGRAMMABLE_SECS).unwrap_err();
        assert!(matches!(err, CameraError::ExposureOutOfRange { .. }));
    }

    #[test]
    fn test_shorter_than_table_falls_back_to_bulb_sentinel() {
        let map = reference_map();
        let code = resolve(1e-9, &map, true, MAX_PROGRAMMABLE_SECS).unwrap();
        assert_eq!(code, SHUTTER_BULB);
    }

    #[test]
    fn test_bulb_sentinel_entry_is_ignored_for_floor_selection() {
        let mut map = reference_map();
        map.insert(SHUTTER_BULB, 3600.0);
        assert_eq!(
            resolve(0.70, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
            707106
        );
    }
}
