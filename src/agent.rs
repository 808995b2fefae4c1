// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The flag agent engine.
//!
//! A [`FlagAgent`] couples a [`DataSelection`] with a [`FlagAlgorithm`]. For every buffer it
//! generates the selected positions, asks the algorithm to decide on each of them and writes its
//! flag value wherever the algorithm says so.

use std::fmt::Debug;

use log::{debug, info, trace, warn};

use crate::{
    antenna_pairs::{AntennaPair, AntennaPairMap, CubeView},
    data::VisBuffer,
    flag_cube::{FlagCubeStore, FlagMode, FlagPoint},
    index::{generate_index, BufferIndex},
    marlu::{ndarray::Array3, Complex},
    selection::DataSelection,
    with_increment_duration,
};

/// How an agent walks the selected positions of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationApproach {
    /// Rows x channels x polarizations, in row order.
    #[default]
    Rows,
    /// Per antenna pair, then the pair's rows x channels x polarizations.
    AntennaPairs,
}

/// What makes one kind of agent different from another.
pub trait FlagAlgorithm: Send + Debug {
    /// Whether the point `(row, chan, pol)` of `buffer` should get the agent's flag value.
    ///
    /// This must not fail. Return `false` when no decision can be made.
    fn decide(&self, buffer: &VisBuffer, row: usize, chan: usize, pol: usize) -> bool;

    /// How the engine iterates selected positions.
    fn iteration_approach(&self) -> IterationApproach {
        IterationApproach::Rows
    }

    /// Called once per selected buffer, before any decision.
    fn pre_process_buffer(&mut self, _buffer: &VisBuffer) {}

    /// Called once per antenna pair before the pair's decisions, in
    /// [`IterationApproach::AntennaPairs`] mode.
    fn pre_process_pair(&mut self, _pair: AntennaPair, _vis: &CubeView<'_, Complex<f32>>) {}
}

/// Flag accounting of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagCounters {
    /// Flags written for the last buffer
    pub buffer_flags: usize,
    /// Flags written in the current chunk
    pub chunk_flags: usize,
    /// Points seen in the current chunk
    pub chunk_points: usize,
    /// Check mode mismatches in the current chunk
    pub chunk_mismatches: usize,
    /// Flags written in earlier chunks
    pub table_flags: usize,
    /// Points seen in earlier chunks
    pub table_points: usize,
    /// Check mode mismatches in earlier chunks
    pub table_mismatches: usize,
    /// Buffers that had something selected
    pub buffers_processed: usize,
    /// Buffers with nothing selected
    pub buffers_skipped: usize,
}

/// What an agent has done so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    /// Agent name
    pub name: String,
    /// The value the agent writes
    pub flag_value: bool,
    /// Flags written
    pub flags: usize,
    /// Points seen
    pub points: usize,
    /// Check mode mismatches
    pub mismatches: usize,
    /// Buffers that had something selected
    pub buffers_processed: usize,
    /// Buffers with nothing selected
    pub buffers_skipped: usize,
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

/// A selection plus an algorithm, and the state of running them over buffers.
#[derive(Debug)]
pub struct FlagAgent {
    name: String,
    selection: DataSelection,
    algorithm: Box<dyn FlagAlgorithm>,
    flag_value: bool,
    mode: FlagMode,
    check_mode: bool,
    profiling: bool,
    private_flags: Option<Array3<bool>>,
    counters: FlagCounters,
}

impl FlagAgent {
    /// A flagging agent writing to the shared flags only.
    pub fn new(
        name: impl Into<String>,
        selection: DataSelection,
        algorithm: Box<dyn FlagAlgorithm>,
    ) -> Self {
        Self {
            name: name.into(),
            selection,
            algorithm,
            flag_value: true,
            mode: FlagMode::Common,
            check_mode: false,
            profiling: false,
            private_flags: None,
            counters: FlagCounters::default(),
        }
    }

    /// Set the value written wherever the algorithm decides positively. `false` unflags.
    pub fn with_flag_value(mut self, flag_value: bool) -> Self {
        self.flag_value = flag_value;
        self
    }

    /// Set which cubes are written.
    pub fn with_mode(mut self, mode: FlagMode) -> Self {
        self.mode = mode;
        self
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value this agent writes.
    pub fn flag_value(&self) -> bool {
        self.flag_value
    }

    /// The selection of this agent.
    pub fn selection(&self) -> &DataSelection {
        &self.selection
    }

    /// In check mode, decisions are compared against the shared flags instead of written.
    pub fn set_check_mode(&mut self, enable: bool) {
        self.check_mode = enable;
    }

    /// Accumulate processing time in [`crate::get_durations`].
    pub fn set_profiling(&mut self, enable: bool) {
        self.profiling = enable;
    }

    /// The private cube of the last processed buffer, in [`FlagMode::Private`].
    pub fn private_flags(&self) -> Option<&Array3<bool>> {
        self.private_flags.as_ref()
    }

    /// Current counters.
    pub fn counters(&self) -> FlagCounters {
        self.counters
    }

    /// Run the whole pipeline on one buffer.
    pub fn process_buffer(&mut self, buffer: &VisBuffer) {
        if self.profiling {
            let key = format!("agent {}", self.name);
            with_increment_duration!(key, self.run_pipeline(buffer));
        } else {
            self.run_pipeline(buffer);
        }
    }

    fn run_pipeline(&mut self, buffer: &VisBuffer) {
        let (num_pols, num_chans, num_rows) = buffer.dim();
        self.counters.chunk_points += num_pols * num_chans * num_rows;
        self.counters.buffer_flags = 0;

        let index = match generate_index(&self.selection, buffer) {
            Some(index) => index,
            None => {
                self.counters.buffers_skipped += 1;
                return;
            }
        };
        trace!(
            "{}: processing {} rows ({:?}..), {} channels, {} pols",
            self.name,
            index.rows.len(),
            index.rows.first(),
            index.channels.len(),
            index.pols.len()
        );

        let mut store = FlagCubeStore::new(buffer.flags.clone(), self.mode, self.flag_value);
        self.algorithm.pre_process_buffer(buffer);

        let points = match self.algorithm.iteration_approach() {
            IterationApproach::Rows => self.decide_rows(buffer, &index),
            IterationApproach::AntennaPairs => self.decide_pairs(buffer, &index),
        };
        let rows = self.row_flags(&index, &points);

        if self.check_mode {
            let mismatches = store.count_mismatches(&points, self.flag_value);
            if mismatches > 0 {
                debug!("{}: {mismatches} flags differ in check mode", self.name);
            }
            self.counters.chunk_mismatches += mismatches;
        } else {
            store.apply(&points, &rows, self.flag_value);
            self.counters.buffer_flags = points.len();
            self.counters.chunk_flags += points.len();
        }
        self.counters.buffers_processed += 1;
        self.private_flags = store.into_private();
    }

    fn decide_rows(&self, buffer: &VisBuffer, index: &BufferIndex) -> Vec<FlagPoint> {
        let mut points = vec![];
        for &row in &index.rows {
            self.decide_row(buffer, index, row, &mut points);
        }
        points
    }

    fn decide_pairs(&mut self, buffer: &VisBuffer, index: &BufferIndex) -> Vec<FlagPoint> {
        let pairs = AntennaPairMap::build(&buffer.antenna1, &buffer.antenna2, &index.rows);
        trace!("{}: iterating {} antenna pairs", self.name, pairs.len());
        let mut points = vec![];
        for (pair, rows) in pairs.iter() {
            if rows.is_empty() {
                warn!(
                    "{}: baseline ({}, {}) has no rows in this buffer",
                    self.name, pair.0, pair.1
                );
                continue;
            }
            let vis = CubeView::new(buffer.vis.view(), rows);
            self.algorithm.pre_process_pair(pair, &vis);
            for local_row in 0..vis.dim().2 {
                self.decide_row(buffer, index, vis.row_index(local_row), &mut points);
            }
        }
        points
    }

    fn decide_row(
        &self,
        buffer: &VisBuffer,
        index: &BufferIndex,
        row: usize,
        points: &mut Vec<FlagPoint>,
    ) {
        for &chan in &index.channels {
            for &pol in &index.pols {
                if self.algorithm.decide(buffer, row, chan, pol) {
                    points.push([pol, chan, row]);
                }
            }
        }
    }

    /// Rows whose row flag changes along with the points.
    ///
    /// Flagging sets the row flag of rows flagged entirely, which can only happen without channel
    /// or polarization filtering. Unflagging clears the row flag of every touched row.
    fn row_flags(&self, index: &BufferIndex, points: &[FlagPoint]) -> Vec<usize> {
        let mut per_row: Vec<(usize, usize)> = vec![];
        for &[_, _, row] in points {
            match per_row.last_mut() {
                Some((last, count)) if *last == row => *count += 1,
                _ => per_row.push((row, 1)),
            }
        }
        if !self.flag_value {
            let mut rows: Vec<usize> = per_row.into_iter().map(|(row, _)| row).collect();
            rows.sort_unstable();
            rows.dedup();
            return rows;
        }
        if self.selection.filter_channels() || self.selection.filter_pols() {
            return vec![];
        }
        let points_per_row = index.channels.len() * index.pols.len();
        let mut rows: Vec<usize> = per_row
            .into_iter()
            .filter(|&(_, count)| count == points_per_row)
            .map(|(row, _)| row)
            .collect();
        rows.sort_unstable();
        rows
    }

    /// Log what was done in the chunk, and fold the chunk into the table counters.
    pub fn chunk_summary(&mut self) {
        let counters = &mut self.counters;
        if counters.chunk_flags > 0 {
            info!(
                "{} => data {} so far: {:.3}%",
                self.name,
                if self.flag_value {
                    "flagged"
                } else {
                    "unflagged"
                },
                percentage(counters.chunk_flags, counters.chunk_points)
            );
        }
        if counters.chunk_mismatches > 0 {
            warn!(
                "{} => {} flags in this chunk do not match in check mode",
                self.name, counters.chunk_mismatches
            );
        }
        counters.table_flags += counters.chunk_flags;
        counters.table_points += counters.chunk_points;
        counters.table_mismatches += counters.chunk_mismatches;
        counters.chunk_flags = 0;
        counters.chunk_points = 0;
        counters.chunk_mismatches = 0;
        counters.buffer_flags = 0;
    }

    /// Log what was done over the whole table, and reset the counters.
    pub fn table_summary(&mut self) {
        let summary = self.summary();
        if summary.flags > 0 {
            info!(
                "{} => percentage of data {} in table selection: {:.3}%",
                self.name,
                if self.flag_value {
                    "flagged"
                } else {
                    "un-flagged"
                },
                percentage(summary.flags, summary.points)
            );
        }
        if summary.mismatches > 0 {
            warn!(
                "{} => {} flags do not match in check mode",
                self.name, summary.mismatches
            );
        }
        self.counters = FlagCounters::default();
    }

    /// Everything done so far, including the current chunk.
    pub fn summary(&self) -> AgentSummary {
        let c = &self.counters;
        AgentSummary {
            name: self.name.clone(),
            flag_value: self.flag_value,
            flags: c.table_flags + c.chunk_flags,
            points: c.table_points + c.chunk_points,
            mismatches: c.table_mismatches + c.chunk_mismatches,
            buffers_processed: c.buffers_processed,
            buffers_skipped: c.buffers_skipped,
        }
    }
}
