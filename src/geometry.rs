// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Antenna positions and their projection into the (u, v, w) frame of a phase centre.
//!
//! Positions are stored in the earth-fixed geocentric frame. For projection they are made relative
//! to the reference antenna (the first one) and rotated into the local geodetic frame at the
//! reference antenna's longitude, which is what [`UVW::from_xyz`] expects.

use log::trace;

use crate::{
    data::Antenna,
    marlu::{
        constants::DAYSEC,
        hifitime::{Duration, Epoch},
        precession::get_lmst,
        RADec, XyzGeocentric, XyzGeodetic, UVW,
    },
};

/// An antenna as far as geometry is concerned.
#[derive(Debug, Clone)]
pub struct AntennaGeometry {
    /// Name, for logging
    pub name: String,
    /// Geocentric position \[metres\]
    pub position: XyzGeocentric,
    /// Dish diameter \[metres\]
    pub diameter: f64,
}

impl From<&Antenna> for AntennaGeometry {
    fn from(ant: &Antenna) -> Self {
        Self {
            name: ant.name.clone(),
            position: ant.position,
            diameter: ant.diameter,
        }
    }
}

/// The ordered antennas of an array, with their positions relative to the reference antenna.
#[derive(Debug, Clone)]
pub struct ArrayGeometry {
    antennas: Vec<AntennaGeometry>,
    reference: XyzGeocentric,
    longitude_rad: f64,
    local_xyzs: Vec<XyzGeodetic>,
}

impl ArrayGeometry {
    /// Geometry for a set of antennas, the first one being the reference.
    pub fn new(antennas: Vec<AntennaGeometry>) -> Self {
        let reference = antennas
            .first()
            .map(|ant| ant.position)
            .unwrap_or(XyzGeocentric {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            });
        let longitude_rad = reference.y.atan2(reference.x);
        let mut geometry = Self {
            antennas: vec![],
            reference,
            longitude_rad,
            local_xyzs: vec![],
        };
        geometry.extend(antennas);
        geometry
    }

    /// Geometry for the antenna table of a catalog.
    pub fn from_catalog(antennas: &[Antenna]) -> Self {
        Self::new(antennas.iter().map(AntennaGeometry::from).collect())
    }

    /// Append antennas after the existing ones. The reference antenna does not change.
    pub fn extend(&mut self, antennas: Vec<AntennaGeometry>) {
        let (sin_long, cos_long) = self.longitude_rad.sin_cos();
        for ant in antennas {
            let local = to_local(ant.position, self.reference, sin_long, cos_long);
            trace!(
                "antenna {} at local ({:.3}, {:.3}, {:.3})m, diameter {}m",
                ant.name,
                local.x,
                local.y,
                local.z,
                ant.diameter
            );
            self.local_xyzs.push(local);
            self.antennas.push(ant);
        }
    }

    /// Number of antennas.
    pub fn len(&self) -> usize {
        self.antennas.len()
    }

    /// Whether there are no antennas at all.
    pub fn is_empty(&self) -> bool {
        self.antennas.is_empty()
    }

    /// The antennas, in order.
    pub fn antennas(&self) -> &[AntennaGeometry] {
        &self.antennas
    }

    /// Longitude of the reference antenna \[radians\].
    pub fn longitude_rad(&self) -> f64 {
        self.longitude_rad
    }

    /// Positions relative to the reference antenna in the local geodetic frame.
    pub fn local_xyzs(&self) -> &[XyzGeodetic] {
        &self.local_xyzs
    }

    /// Project every antenna into the uvw frame of `phase_centre` at `time_mjd_s`.
    pub fn antenna_uvws(&self, phase_centre: RADec, time_mjd_s: f64) -> Vec<UVW> {
        let lst = local_sidereal_time(self.longitude_rad, time_mjd_s);
        let hadec = phase_centre.to_hadec(lst);
        self.local_xyzs
            .iter()
            .map(|&xyz| UVW::from_xyz(xyz, hadec))
            .collect()
    }
}

/// Local mean sidereal time \[radians\] at `longitude_rad` for a UTC time in MJD seconds.
pub fn local_sidereal_time(longitude_rad: f64, time_mjd_s: f64) -> f64 {
    let epoch = Epoch::from_mjd_utc(time_mjd_s / DAYSEC);
    get_lmst(longitude_rad, epoch, Duration::from_seconds(0.0))
}

/// Baseline coordinates of `(ant1, ant2)` from per-antenna coordinates, `ant1 - ant2`.
pub fn baseline_uvw(antenna_uvws: &[UVW], ant1: usize, ant2: usize) -> UVW {
    let (uvw1, uvw2) = (antenna_uvws[ant1], antenna_uvws[ant2]);
    UVW {
        u: uvw1.u - uvw2.u,
        v: uvw1.v - uvw2.v,
        w: uvw1.w - uvw2.w,
    }
}

fn to_local(
    position: XyzGeocentric,
    reference: XyzGeocentric,
    sin_long: f64,
    cos_long: f64,
) -> XyzGeodetic {
    let dx = position.x - reference.x;
    let dy = position.y - reference.y;
    XyzGeodetic {
        x: cos_long * dx + sin_long * dy,
        y: -sin_long * dx + cos_long * dy,
        z: position.z - reference.z,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    const EARTH_RADIUS: f64 = 6_378_137.0;

    fn ant(name: &str, x: f64, y: f64, z: f64) -> AntennaGeometry {
        AntennaGeometry {
            name: name.into(),
            position: XyzGeocentric { x, y, z },
            diameter: 12.0,
        }
    }

    #[test]
    fn test_local_frame_at_zero_longitude() {
        let geometry = ArrayGeometry::new(vec![
            ant("a", EARTH_RADIUS, 0.0, 0.0),
            ant("b", EARTH_RADIUS + 30.0, 5.0, -2.0),
        ]);
        assert_abs_diff_eq!(geometry.longitude_rad(), 0.0);
        let local = geometry.local_xyzs()[1];
        assert_abs_diff_eq!(local.x, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(local.y, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(local.z, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_local_frame_rotates_with_longitude() {
        // the reference sits at 90 degrees east, so geocentric -x points east
        let geometry = ArrayGeometry::new(vec![
            ant("a", 0.0, EARTH_RADIUS, 0.0),
            ant("b", -5.0, EARTH_RADIUS, 0.0),
        ]);
        let local = geometry.local_xyzs()[1];
        assert_abs_diff_eq!(local.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(local.y, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(local.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_antenna_uvws_at_transit() {
        let geometry = ArrayGeometry::new(vec![
            ant("a", EARTH_RADIUS, 0.0, 0.0),
            ant("b", EARTH_RADIUS + 30.0, 5.0, 0.0),
        ]);
        let time = 5_000_000_000.0;
        let lst = local_sidereal_time(geometry.longitude_rad(), time);
        let uvws = geometry.antenna_uvws(RADec { ra: lst, dec: 0.0 }, time);
        assert_abs_diff_eq!(uvws[0].u, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(uvws[1].u, 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(uvws[1].v, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(uvws[1].w, 30.0, epsilon = 1e-6);

        let baseline = baseline_uvw(&uvws, 0, 1);
        assert_abs_diff_eq!(baseline.u, -5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(baseline.w, -30.0, epsilon = 1e-6);
    }

    #[test]
    fn test_extend_keeps_reference() {
        let mut geometry = ArrayGeometry::new(vec![ant("a", EARTH_RADIUS, 0.0, 0.0)]);
        geometry.extend(vec![ant("virtual", EARTH_RADIUS, 0.0, 7.0)]);
        assert_eq!(geometry.len(), 2);
        assert_abs_diff_eq!(geometry.local_xyzs()[1].z, 7.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_geometry() {
        let geometry = ArrayGeometry::new(vec![]);
        assert!(geometry.is_empty());
        assert!(geometry.antenna_uvws(RADec { ra: 0.0, dec: 0.0 }, 0.0).is_empty());
    }
}
