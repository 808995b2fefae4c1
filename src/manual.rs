// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flagging or unflagging everything a selection matches.

use crate::{agent::FlagAlgorithm, data::VisBuffer};

/// Decides positively on every selected point.
///
/// Paired with a flag value of `false` this is the `unflag` mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualFlagAlgorithm;

impl FlagAlgorithm for ManualFlagAlgorithm {
    fn decide(&self, _buffer: &VisBuffer, _row: usize, _chan: usize, _pol: usize) -> bool {
        true
    }
}
