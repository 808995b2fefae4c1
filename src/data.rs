// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The data model the flag agents work on: the metadata catalog of a dataset, the visibility
//! buffers handed to agents, and the flags they share.
//!
//! Visibility and flag cubes are indexed `[polarization, channel, row]`.

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use derive_builder::Builder;

use crate::marlu::{
    ndarray::{Array1, Array3},
    Complex, RADec, XyzGeocentric, UVW,
};

/// What kind of table the rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableKind {
    /// Visibilities, where each row is a baseline.
    #[default]
    Visibilities,
    /// Calibration solutions, where each row belongs to a single antenna (`antenna1`).
    CalibrationSolutions,
}

/// An antenna in the dataset's antenna table.
#[derive(Debug, Clone)]
pub struct Antenna {
    /// Antenna name, e.g. `ea01`
    pub name: String,
    /// Earth-fixed geocentric position \[metres\]
    pub position: XyzGeocentric,
    /// Dish diameter \[metres\]
    pub diameter: f64,
}

/// A spectral window of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralWindow {
    /// Number of channels
    pub num_chans: usize,
    /// Reference frequency \[Hz\], used to express uv distances in wavelengths
    pub ref_freq_hz: f64,
}

/// Everything selection expressions are resolved against.
#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    /// Antenna table
    pub antennas: Vec<Antenna>,
    /// Field names, indexed by field id
    pub field_names: Vec<String>,
    /// Spectral windows, indexed by spectral window id
    pub spectral_windows: Vec<SpectralWindow>,
    /// Number of sub-arrays
    pub num_arrays: usize,
    /// Number of observations
    pub num_observations: usize,
    /// Scan numbers present in the dataset
    pub scan_numbers: Vec<i32>,
    /// Scan intents, indexed by state id
    pub state_intents: Vec<String>,
    /// Correlation product names (e.g. `XX`), per polarization setup id
    pub polarization_setups: Vec<Vec<String>>,
    /// Kind of table
    pub kind: TableKind,
}

impl MetadataCatalog {
    /// Number of antennas in the antenna table.
    pub fn num_antennas(&self) -> usize {
        self.antennas.len()
    }

    /// Look up an antenna id by name.
    pub fn antenna_id(&self, name: &str) -> Option<usize> {
        self.antennas.iter().position(|ant| ant.name == name)
    }
}

/// Flags shared between all agents working on a buffer, and whoever consumes them afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagState {
    /// Flag cube `[pol, chan, row]`
    pub cube: Array3<bool>,
    /// Whole-row flags
    pub rows: Array1<bool>,
}

/// A handle on [`FlagState`] behind a reader-writer lock.
///
/// Cloning the handle does not copy the flags.
#[derive(Debug, Clone)]
pub struct SharedFlags(Arc<RwLock<FlagState>>);

impl SharedFlags {
    /// Unflagged flags for a cube of shape `(num_pols, num_chans, num_rows)`.
    pub fn new(shape: (usize, usize, usize)) -> Self {
        Self::from_cube(Array3::from_elem(shape, false))
    }

    /// Wrap an existing flag cube. Row flags start unset.
    pub fn from_cube(cube: Array3<bool>) -> Self {
        let rows = Array1::from_elem(cube.dim().2, false);
        Self(Arc::new(RwLock::new(FlagState { cube, rows })))
    }

    /// Shape of the flag cube.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.read().cube.dim()
    }

    /// Lock the flags for reading. Flags are plain data, so a poisoned lock is recovered.
    pub fn read(&self) -> RwLockReadGuard<'_, FlagState> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the flags for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, FlagState> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current flag cube.
    pub fn cube(&self) -> Array3<bool> {
        self.read().cube.clone()
    }

    /// A copy of the current row flags.
    pub fn rows(&self) -> Array1<bool> {
        self.read().rows.clone()
    }
}

/// One batch of rows sharing array, field, spectral window and polarization setup.
///
/// Per-row vectors all have one entry per row of the visibility cube.
#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct VisBuffer {
    /// Sub-array id
    #[builder(default)]
    pub array_id: usize,
    /// Field id
    #[builder(default)]
    pub field_id: usize,
    /// Spectral window id
    #[builder(default)]
    pub spw_id: usize,
    /// Polarization setup id
    #[builder(default)]
    pub pol_setup_id: usize,

    /// Observation id of each row
    pub observation_ids: Vec<usize>,
    /// Scan number of each row
    pub scans: Vec<i32>,
    /// State (scan intent) id of each row
    pub state_ids: Vec<usize>,
    /// First antenna of each row
    pub antenna1: Vec<usize>,
    /// Second antenna of each row
    pub antenna2: Vec<usize>,
    /// Timestamp of each row \[MJD seconds, UTC\]
    pub time: Vec<f64>,
    /// Time centroid of each row \[MJD seconds, UTC\], empty to use `time`
    #[builder(default)]
    pub time_centroid: Vec<f64>,
    /// Observed baseline coordinates of each row, `antenna1 - antenna2` \[metres\]
    #[builder(default)]
    pub uvw: Option<Vec<UVW>>,

    /// Phase tracking centre
    pub phase_centre: RADec,
    /// Complex visibilities `[pol, chan, row]`
    pub vis: Array3<Complex<f32>>,
    /// Flags shared by every agent
    pub flags: SharedFlags,
}

impl VisBufferBuilder {
    fn validate(&self) -> Result<(), String> {
        let num_rows = match &self.vis {
            Some(vis) => vis.dim().2,
            None => return Ok(()),
        };
        let row_lengths = [
            ("observation_ids", self.observation_ids.as_ref().map(Vec::len)),
            ("scans", self.scans.as_ref().map(Vec::len)),
            ("state_ids", self.state_ids.as_ref().map(Vec::len)),
            ("antenna1", self.antenna1.as_ref().map(Vec::len)),
            ("antenna2", self.antenna2.as_ref().map(Vec::len)),
            ("time", self.time.as_ref().map(Vec::len)),
        ];
        for (name, len) in row_lengths {
            if let Some(len) = len {
                if len != num_rows {
                    return Err(format!("{name} has {len} entries, expected {num_rows}"));
                }
            }
        }
        if let Some(centroids) = &self.time_centroid {
            if !centroids.is_empty() && centroids.len() != num_rows {
                return Err(format!(
                    "time_centroid has {} entries, expected {num_rows}",
                    centroids.len()
                ));
            }
        }
        if let Some(Some(uvws)) = &self.uvw {
            if uvws.len() != num_rows {
                return Err(format!("uvw has {} entries, expected {num_rows}", uvws.len()));
            }
        }
        if let (Some(vis), Some(flags)) = (&self.vis, &self.flags) {
            if vis.dim() != flags.dim() {
                return Err(format!(
                    "flag shape {:?} does not match visibility shape {:?}",
                    flags.dim(),
                    vis.dim()
                ));
            }
        }
        Ok(())
    }
}

impl VisBuffer {
    /// `(num_pols, num_chans, num_rows)`
    pub fn dim(&self) -> (usize, usize, usize) {
        self.vis.dim()
    }

    /// Number of rows in the buffer.
    pub fn num_rows(&self) -> usize {
        self.vis.dim().2
    }

    /// The time centroid of a row, falling back to its timestamp.
    pub fn row_centroid(&self, row: usize) -> f64 {
        self.time_centroid
            .get(row)
            .copied()
            .unwrap_or(self.time[row])
    }
}

/// Where buffers come from.
///
/// Buffers are grouped into chunks. Flag agents log a summary of their work after each chunk.
pub trait FlagDataHandler {
    /// The catalog selections are resolved against.
    fn catalog(&self) -> &MetadataCatalog;

    /// The next chunk of buffers, `None` once the dataset is exhausted.
    fn next_chunk(&mut self) -> Option<Vec<Arc<VisBuffer>>>;

    /// Number of buffers still to come, if known.
    fn remaining_buffers(&self) -> Option<usize> {
        None
    }
}

/// A [`FlagDataHandler`] over buffers that are already in memory.
#[derive(Debug, Default)]
pub struct MemoryDataHandler {
    catalog: MetadataCatalog,
    chunks: VecDeque<Vec<Arc<VisBuffer>>>,
}

impl MemoryDataHandler {
    /// A handler with no chunks.
    pub fn new(catalog: MetadataCatalog) -> Self {
        Self {
            catalog,
            chunks: VecDeque::new(),
        }
    }

    /// Append a chunk of buffers.
    pub fn push_chunk(&mut self, chunk: Vec<Arc<VisBuffer>>) {
        self.chunks.push_back(chunk);
    }
}

impl FlagDataHandler for MemoryDataHandler {
    fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    fn next_chunk(&mut self) -> Option<Vec<Arc<VisBuffer>>> {
        self.chunks.pop_front()
    }

    fn remaining_buffers(&self) -> Option<usize> {
        Some(self.chunks.iter().map(Vec::len).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{get_test_catalog, get_test_buffer};

    #[test]
    fn test_buffer_builder_rejects_mismatched_rows() {
        let result = VisBufferBuilder::default()
            .observation_ids(vec![0_usize, 0])
            .scans(vec![1_i32, 1])
            .state_ids(vec![0_usize, 0])
            .antenna1(vec![0_usize, 0])
            .antenna2(vec![1_usize])
            .time(vec![0.0_f64, 0.0])
            .phase_centre(RADec { ra: 0.0, dec: 0.0 })
            .vis(Array3::zeros((1, 1, 2)))
            .flags(SharedFlags::new((1, 1, 2)))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_buffer_builder_rejects_mismatched_flags() {
        let result = VisBufferBuilder::default()
            .observation_ids(vec![0_usize])
            .scans(vec![1_i32])
            .state_ids(vec![0_usize])
            .antenna1(vec![0_usize])
            .antenna2(vec![1_usize])
            .time(vec![0.0_f64])
            .phase_centre(RADec { ra: 0.0, dec: 0.0 })
            .vis(Array3::zeros((2, 1, 1)))
            .flags(SharedFlags::new((1, 1, 1)))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_time_centroid_falls_back_to_time() {
        let buffer = get_test_buffer(&[(0, 1), (1, 2)], 2, 4);
        assert_eq!(buffer.row_centroid(1), buffer.time[1]);
    }

    #[test]
    fn test_shared_flags_are_shared_between_clones() {
        let flags = SharedFlags::new((2, 3, 4));
        let other = flags.clone();
        other.write().cube[[1, 2, 3]] = true;
        assert!(flags.read().cube[[1, 2, 3]]);
        assert_eq!(flags.rows().len(), 4);
    }

    #[test]
    fn test_memory_handler_yields_chunks_in_order() {
        let catalog = get_test_catalog(3);
        let mut handler = MemoryDataHandler::new(catalog);
        let first = Arc::new(get_test_buffer(&[(0, 1)], 1, 1));
        let second = Arc::new(get_test_buffer(&[(0, 2), (1, 2)], 1, 1));
        handler.push_chunk(vec![first]);
        handler.push_chunk(vec![second]);
        assert_eq!(handler.remaining_buffers(), Some(2));
        assert_eq!(handler.next_chunk().unwrap()[0].num_rows(), 1);
        assert_eq!(handler.next_chunk().unwrap()[0].num_rows(), 2);
        assert!(handler.next_chunk().is_none());
        assert_eq!(handler.catalog().antenna_id("ant01"), Some(1));
    }
}
