// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The flags an agent writes to: the shared flags of a buffer, plus an optional private cube.

use crate::{
    antenna_pairs::{CubeView, CubeViewMut},
    data::SharedFlags,
    marlu::ndarray::Array3,
};

/// Which cubes a write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagMode {
    /// Only the shared cube.
    #[default]
    Common,
    /// The shared cube and the agent's private cube.
    Private,
}

/// A flag position, `[pol, chan, row]`.
pub type FlagPoint = [usize; 3];

/// Point-level access to the flags of one buffer, for one agent.
#[derive(Debug)]
pub struct FlagCubeStore {
    shared: SharedFlags,
    private: Option<Array3<bool>>,
    mode: FlagMode,
}

impl FlagCubeStore {
    /// Wrap the shared flags of a buffer. In [`FlagMode::Private`] a private cube of the same
    /// shape is allocated, set to the un-flag value `!flag_value`.
    pub fn new(shared: SharedFlags, mode: FlagMode, flag_value: bool) -> Self {
        let private = match mode {
            FlagMode::Common => None,
            FlagMode::Private => Some(Array3::from_elem(shared.dim(), !flag_value)),
        };
        Self {
            shared,
            private,
            mode,
        }
    }

    /// The write mode.
    pub fn mode(&self) -> FlagMode {
        self.mode
    }

    /// The shared flags.
    pub fn shared(&self) -> &SharedFlags {
        &self.shared
    }

    /// The private cube, if there is one.
    pub fn private(&self) -> Option<&Array3<bool>> {
        self.private.as_ref()
    }

    /// Give up the private cube.
    pub fn into_private(self) -> Option<Array3<bool>> {
        self.private
    }

    /// Read a shared flag.
    pub fn read(&self, row: usize, chan: usize, pol: usize) -> bool {
        self.shared.read().cube[[pol, chan, row]]
    }

    /// Write one flag. Takes the shared lock for this point only, prefer [`Self::apply`].
    pub fn write(&mut self, row: usize, chan: usize, pol: usize, value: bool) {
        if let Some(private) = self.private.as_mut() {
            private[[pol, chan, row]] = value;
        }
        self.shared.write().cube[[pol, chan, row]] = value;
    }

    /// Write `value` at every point, and to the row flags of `rows`, under one shared lock.
    pub fn apply(&mut self, points: &[FlagPoint], rows: &[usize], value: bool) {
        if let Some(private) = self.private.as_mut() {
            for &point in points {
                private[point] = value;
            }
        }
        if points.is_empty() && rows.is_empty() {
            return;
        }
        let mut shared = self.shared.write();
        for &point in points {
            shared.cube[point] = value;
        }
        for &row in rows {
            shared.rows[row] = value;
        }
    }

    /// Count the points whose shared flag differs from `value`.
    pub fn count_mismatches(&self, points: &[FlagPoint], value: bool) -> usize {
        let shared = self.shared.read();
        points
            .iter()
            .filter(|&&point| shared.cube[point] != value)
            .count()
    }

    /// A mutable view of the private cube over `rows`.
    pub fn private_view_mut<'a>(&'a mut self, rows: &'a [usize]) -> Option<CubeViewMut<'a, bool>> {
        self.private
            .as_mut()
            .map(|private| CubeViewMut::new(private.view_mut(), rows))
    }

    /// A view of the private cube over `rows`.
    pub fn private_view<'a>(&'a self, rows: &'a [usize]) -> Option<CubeView<'a, bool>> {
        self.private
            .as_ref()
            .map(|private| CubeView::new(private.view(), rows))
    }
}
