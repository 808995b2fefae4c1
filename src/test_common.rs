// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    data::{
        Antenna, MetadataCatalog, SharedFlags, SpectralWindow, TableKind, VisBuffer,
        VisBufferBuilder,
    },
    marlu::{ndarray::Array3, Complex, RADec, XyzGeocentric},
};

pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// 2017-05-01, in MJD seconds
pub const TEST_TIME: f64 = 57874.0 * 86400.0;

pub fn get_test_antenna(name: &str, east: f64, meridian: f64, diameter: f64) -> Antenna {
    Antenna {
        name: name.to_string(),
        position: XyzGeocentric {
            x: EARTH_RADIUS + meridian,
            y: east,
            z: 0.0,
        },
        diameter,
    }
}

/// A catalog with `num_antennas` 12m antennas spaced 100m apart along an east-west line.
pub fn get_test_catalog(num_antennas: usize) -> MetadataCatalog {
    MetadataCatalog {
        antennas: (0..num_antennas)
            .map(|i| get_test_antenna(&format!("ant{i:02}"), 100.0 * i as f64, 0.0, 12.0))
            .collect(),
        field_names: vec!["3C286".into(), "J1331+3030".into(), "NGC1234".into()],
        spectral_windows: vec![
            SpectralWindow {
                num_chans: 8,
                ref_freq_hz: 1.4e9,
            },
            SpectralWindow {
                num_chans: 16,
                ref_freq_hz: 1.5e9,
            },
        ],
        num_arrays: 1,
        num_observations: 2,
        scan_numbers: vec![1, 2, 3, 4, 5],
        state_intents: vec![
            "CALIBRATE_BANDPASS#ON_SOURCE".into(),
            "CALIBRATE_PHASE#ON_SOURCE".into(),
            "OBSERVE_TARGET#ON_SOURCE".into(),
        ],
        polarization_setups: vec![
            vec!["XX".into(), "XY".into(), "YX".into(), "YY".into()],
            vec!["RR".into(), "LL".into()],
        ],
        kind: TableKind::Visibilities,
    }
}

/// A builder with one row per antenna pair, all at [`TEST_TIME`], ready to be customised.
pub fn get_test_buffer_builder(
    pairs: &[(usize, usize)],
    num_pols: usize,
    num_chans: usize,
) -> VisBufferBuilder {
    let num_rows = pairs.len();
    let shape = (num_pols, num_chans, num_rows);
    let vis = Array3::from_shape_fn(shape, |(pol, chan, row)| {
        Complex::new(row as f32 + 1.0, (pol * num_chans + chan) as f32)
    });
    VisBufferBuilder::default()
        .observation_ids(vec![0_usize; num_rows])
        .scans(vec![1_i32; num_rows])
        .state_ids(vec![0_usize; num_rows])
        .antenna1(pairs.iter().map(|&(a, _)| a).collect::<Vec<_>>())
        .antenna2(pairs.iter().map(|&(_, b)| b).collect::<Vec<_>>())
        .time(vec![TEST_TIME; num_rows])
        .phase_centre(RADec { ra: 0.0, dec: 0.0 })
        .vis(vis)
        .flags(SharedFlags::new(shape))
}

pub fn get_test_buffer(pairs: &[(usize, usize)], num_pols: usize, num_chans: usize) -> VisBuffer {
    get_test_buffer_builder(pairs, num_pols, num_chans)
        .build()
        .unwrap()
}

/// Every cross-correlation of `num_antennas` antennas, plus autocorrelations if asked.
pub fn get_all_pairs(num_antennas: usize, autos: bool) -> Vec<(usize, usize)> {
    let mut pairs = vec![];
    for a in 0..num_antennas {
        for b in a..num_antennas {
            if a != b || autos {
                pairs.push((a, b));
            }
        }
    }
    pairs
}
