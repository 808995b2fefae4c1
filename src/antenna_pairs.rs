// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Grouping the rows of a buffer by antenna pair, and views over one pair's rows.

use std::collections::BTreeMap;

use crate::marlu::ndarray::{ArrayView3, ArrayViewMut3};

/// An unordered pair of antenna ids, stored as `(lower, higher)`.
pub type AntennaPair = (usize, usize);

/// Rows of a buffer, bucketed by antenna pair.
///
/// Built from an already filtered row list, so a pair whose rows were all filtered out has no
/// bucket at all. Autocorrelations are buckets like any other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AntennaPairMap {
    buckets: BTreeMap<AntennaPair, Vec<usize>>,
}

impl AntennaPairMap {
    /// Bucket `rows` by the antennas of each row.
    pub fn build(antenna1: &[usize], antenna2: &[usize], rows: &[usize]) -> Self {
        let mut buckets: BTreeMap<AntennaPair, Vec<usize>> = BTreeMap::new();
        for &row in rows {
            let (a, b) = (antenna1[row], antenna2[row]);
            buckets.entry((a.min(b), a.max(b))).or_default().push(row);
        }
        Self { buckets }
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether there are no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of rows over all buckets.
    pub fn num_rows(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// The rows of a pair, in either antenna order.
    pub fn get(&self, ant1: usize, ant2: usize) -> Option<&[usize]> {
        self.buckets
            .get(&(ant1.min(ant2), ant1.max(ant2)))
            .map(Vec::as_slice)
    }

    /// Buckets in ascending pair order.
    pub fn iter(&self) -> impl Iterator<Item = (AntennaPair, &[usize])> {
        self.buckets
            .iter()
            .map(|(&pair, rows)| (pair, rows.as_slice()))
    }

    /// A read-only view of `cube` restricted to one pair's rows.
    pub fn view<'a, T>(
        &'a self,
        pair: AntennaPair,
        cube: ArrayView3<'a, T>,
    ) -> Option<CubeView<'a, T>> {
        self.get(pair.0, pair.1).map(|rows| CubeView::new(cube, rows))
    }
}

/// A `[pol, chan, local_row]` view of a cube, where local rows index a list of buffer rows.
#[derive(Debug, Clone)]
pub struct CubeView<'a, T> {
    cube: ArrayView3<'a, T>,
    rows: &'a [usize],
}

impl<'a, T> CubeView<'a, T> {
    /// View the `rows` of `cube`.
    pub fn new(cube: ArrayView3<'a, T>, rows: &'a [usize]) -> Self {
        Self { cube, rows }
    }

    /// `(num_pols, num_chans, num_local_rows)`
    pub fn dim(&self) -> (usize, usize, usize) {
        let (num_pols, num_chans, _) = self.cube.dim();
        (num_pols, num_chans, self.rows.len())
    }

    /// The buffer row behind a local row.
    pub fn row_index(&self, local_row: usize) -> usize {
        self.rows[local_row]
    }

    /// The buffer rows of this view.
    pub fn rows(&self) -> &[usize] {
        self.rows
    }

    /// The element at a local position, if it exists.
    pub fn get(&self, pol: usize, chan: usize, local_row: usize) -> Option<&T> {
        let row = *self.rows.get(local_row)?;
        self.cube.get([pol, chan, row])
    }
}

/// A mutable [`CubeView`].
#[derive(Debug)]
pub struct CubeViewMut<'a, T> {
    cube: ArrayViewMut3<'a, T>,
    rows: &'a [usize],
}

impl<'a, T> CubeViewMut<'a, T> {
    /// View the `rows` of `cube` mutably.
    pub fn new(cube: ArrayViewMut3<'a, T>, rows: &'a [usize]) -> Self {
        Self { cube, rows }
    }

    /// `(num_pols, num_chans, num_local_rows)`
    pub fn dim(&self) -> (usize, usize, usize) {
        let (num_pols, num_chans, _) = self.cube.dim();
        (num_pols, num_chans, self.rows.len())
    }

    /// The buffer row behind a local row.
    pub fn row_index(&self, local_row: usize) -> usize {
        self.rows[local_row]
    }

    /// The element at a local position, if it exists.
    pub fn get(&self, pol: usize, chan: usize, local_row: usize) -> Option<&T> {
        let row = *self.rows.get(local_row)?;
        self.cube.get([pol, chan, row])
    }

    /// Set the element at a local position. Returns false if it does not exist.
    pub fn set(&mut self, pol: usize, chan: usize, local_row: usize, value: T) -> bool {
        let row = match self.rows.get(local_row) {
            Some(&row) => row,
            None => return false,
        };
        match self.cube.get_mut([pol, chan, row]) {
            Some(elem) => {
                *elem = value;
                true
            }
            None => false,
        }
    }
}
