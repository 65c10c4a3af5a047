//! Resolver and shutter-map properties over the public API.

use fujicam::capability::build_shutter_map;
use fujicam::config::ModelConfig;
use fujicam::error::CameraError;
use fujicam::shutter::{
    reference_codes, resolve, DURATION_EPSILON, MAX_PROGRAMMABLE_SECS, REFERENCE_TABLE,
    SHUTTER_BULB,
};

fn full_map() -> std::collections::BTreeMap<i32, f64> {
    build_shutter_map(&reference_codes(), &ModelConfig::default())
}

#[test]
fn every_table_point_is_self_consistent() {
    let map = full_map();
    for (code, duration) in REFERENCE_TABLE {
        assert_eq!(
            resolve(duration, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
            code
        );
    }
}

#[test]
fn resolver_never_over_exposes() {
    let map = full_map();
    // Dense sweep across the programmable range.
    let mut d = 6e-6;
    while d <= MAX_PROGRAMMABLE_SECS {
        let code = resolve(d, &map, true, MAX_PROGRAMMABLE_SECS).unwrap();
        if code != SHUTTER_BULB {
            assert!(map[&code] <= d + DURATION_EPSILON, "{d}s -> code {code}");
        }
        d *= 1.083;
    }
}

#[test]
fn beyond_programmable_range_requires_bulb() {
    let map = full_map();
    assert_eq!(
        resolve(61.0, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
        SHUTTER_BULB
    );
    assert_eq!(
        resolve(120.0, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
        SHUTTER_BULB
    );
    assert!(matches!(
        resolve(120.0, &map, false, MAX_PROGRAMMABLE_SECS),
        Err(CameraError::ExposureOutOfRange { .. })
    ));
}

#[test]
fn exact_request_beats_nearby_candidates() {
    let map = full_map();
    assert_eq!(resolve(1.0, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(), 1000000);
    assert_eq!(
        resolve(0.70, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
        707106
    );
}

#[test]
fn map_build_is_idempotent_and_bulb_is_forced() {
    let cfg = ModelConfig::default();
    let codes = reference_codes();
    let first = build_shutter_map(&codes, &cfg);
    let second = build_shutter_map(&codes, &cfg);
    assert_eq!(first, second);
    assert_eq!(first[&SHUTTER_BULB], cfg.max_bulb_secs);
    // One entry per queried code plus the sentinel.
    assert_eq!(first.len(), codes.len() + 1);
}

#[test]
fn config_override_wins_over_reference_table() {
    let mut cfg = ModelConfig::default();
    cfg.shutter_overrides.insert("64000000".to_string(), 58.0);
    let map = build_shutter_map(&reference_codes(), &cfg);
    assert_eq!(map[&64000000], 58.0);
    // A 58s request now lands on the overridden top entry.
    assert_eq!(
        resolve(58.0, &map, true, MAX_PROGRAMMABLE_SECS).unwrap(),
        64000000
    );
}
