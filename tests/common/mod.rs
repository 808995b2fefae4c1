// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use visflag::{
    data::{
        Antenna, MetadataCatalog, SharedFlags, SpectralWindow, TableKind, VisBuffer,
        VisBufferBuilder,
    },
    geometry::local_sidereal_time,
    marlu::{ndarray::Array3, Complex, RADec, XyzGeocentric},
};

pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// 2021-02-16, in MJD seconds
pub const OBS_TIME: f64 = 59261.0 * 86400.0;

/// An antenna `east` metres east of the first one, and `up` metres further along the local
/// vertical.
pub fn antenna(name: &str, east: f64, up: f64, diameter: f64) -> Antenna {
    Antenna {
        name: name.into(),
        position: XyzGeocentric {
            x: EARTH_RADIUS + up,
            y: east,
            z: 0.0,
        },
        diameter,
    }
}

/// Four 12m antennas. `close1` is 5m east of `close0` and 30m above it, the other two are far
/// apart.
pub fn get_catalog() -> MetadataCatalog {
    MetadataCatalog {
        antennas: vec![
            antenna("close0", 0.0, 0.0, 12.0),
            antenna("close1", 5.0, 30.0, 12.0),
            antenna("far0", 200.0, 0.0, 12.0),
            antenna("far1", 400.0, 0.0, 12.0),
        ],
        field_names: vec!["zenith".into()],
        spectral_windows: vec![SpectralWindow {
            num_chans: 4,
            ref_freq_hz: 1.4e9,
        }],
        num_arrays: 1,
        num_observations: 1,
        scan_numbers: vec![1],
        state_intents: vec!["OBSERVE_TARGET#ON_SOURCE".into()],
        polarization_setups: vec![vec!["XX".into(), "YY".into()]],
        kind: TableKind::Visibilities,
    }
}

/// The direction overhead of the array at `time`.
pub fn zenith(time: f64) -> RADec {
    RADec {
        ra: local_sidereal_time(0.0, time),
        dec: 0.0,
    }
}

/// Every baseline of `num_antennas`, autocorrelations included.
pub fn all_pairs(num_antennas: usize) -> Vec<(usize, usize)> {
    (0..num_antennas)
        .flat_map(|a| (a..num_antennas).map(move |b| (a, b)))
        .collect()
}

/// A buffer with every baseline at `time`, looking at the zenith.
pub fn get_buffer(num_antennas: usize, time: f64) -> VisBufferBuilder {
    let pairs = all_pairs(num_antennas);
    let num_rows = pairs.len();
    let shape = (2, 4, num_rows);
    VisBufferBuilder::default()
        .observation_ids(vec![0_usize; num_rows])
        .scans(vec![1_i32; num_rows])
        .state_ids(vec![0_usize; num_rows])
        .antenna1(pairs.iter().map(|&(a, _)| a).collect::<Vec<_>>())
        .antenna2(pairs.iter().map(|&(_, b)| b).collect::<Vec<_>>())
        .time(vec![time; num_rows])
        .phase_centre(zenith(time))
        .vis(Array3::from_elem(shape, Complex::new(1.0_f32, 0.0)))
        .flags(SharedFlags::new(shape))
}

/// One chunk per timestamp, each with one buffer.
pub fn get_chunks(num_antennas: usize, times: &[f64]) -> Vec<Arc<VisBuffer>> {
    times
        .iter()
        .map(|&time| Arc::new(get_buffer(num_antennas, time).build().unwrap()))
        .collect()
}
