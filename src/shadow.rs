// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flagging antennas shadowed by other antennas.
//!
//! An antenna is shadowed when another antenna sits between it and the phase centre, closer than
//! the sum of their radii in the (u, v) plane. Rows with a shadowed antenna are flagged.
//!
//! The set of shadowed antennas only depends on the timestamp, so it is computed once per
//! timestamp and shared between every shadow agent holding the same [`ShadowContext`].

use std::{
    collections::{hash_map::Entry, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use itertools::Itertools;
use log::{debug, trace, warn};

use crate::{
    agent::FlagAlgorithm,
    config::{ConfigRecord, ConfigValue},
    data::{MetadataCatalog, VisBuffer},
    geometry::{baseline_uvw, AntennaGeometry, ArrayGeometry},
    marlu::{RADec, XyzGeocentric, UVW},
};

/// Position of the baseline `(ant1, ant2)`, `ant1 < ant2 < num_antennas`, in the list of all
/// cross-correlation baselines ordered by `ant1` then `ant2`.
///
/// # Panics
///
/// If the pair is not a cross-correlation of `num_antennas` antennas.
pub fn baseline_index(ant1: usize, ant2: usize, num_antennas: usize) -> usize {
    assert!(
        ant1 < ant2 && ant2 < num_antennas,
        "({ant1}, {ant2}) is not a baseline of {num_antennas} antennas"
    );
    let index = ant1 * num_antennas - ant1 * (ant1 + 1) / 2 + (ant2 - ant1 - 1);
    assert!(index < num_antennas * (num_antennas - 1) / 2);
    index
}

/// Which antenna of a baseline is shadowed, if any.
///
/// `uvw` is `ant1 - ant2`. The antennas shadow each other when their projected separation is
/// strictly less than the mean of their diameters minus `tolerance` \[metres\]. The one further
/// from the source is shadowed: `ant1` when `w < 0`, otherwise `ant2`.
pub fn shadowed_antenna(
    uvw: UVW,
    ant1: usize,
    ant2: usize,
    diameter1: f64,
    diameter2: f64,
    tolerance: f64,
) -> Option<usize> {
    if ant1 == ant2 {
        return None;
    }
    let uv_distance = uvw.u.hypot(uvw.v);
    let limit = (diameter1 + diameter2) / 2.0 - tolerance;
    if uv_distance < limit {
        Some(if uvw.w < 0.0 { ant1 } else { ant2 })
    } else {
        None
    }
}

fn parse_additional_antenna(index: usize, record: &ConfigRecord) -> Result<AntennaGeometry, String> {
    let diameter = match record.get("diameter") {
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("diameter of antenna {index} is not a number: {value:?}"))?,
        None => return Err(format!("antenna {index} has no diameter")),
    };
    let position = match record.get("position") {
        Some(ConfigValue::List(values)) if values.len() == 3 => values
            .iter()
            .map(ConfigValue::as_f64)
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| format!("position of antenna {index} has non-numeric elements"))?,
        Some(value) => {
            return Err(format!(
                "position of antenna {index} is not a list of 3 numbers: {value:?}"
            ))
        }
        None => return Err(format!("antenna {index} has no position")),
    };
    let name = match record.get("name") {
        Some(ConfigValue::Str(name)) => name.clone(),
        _ => format!("VIRTUAL{index:02}"),
    };
    Ok(AntennaGeometry {
        name,
        position: XyzGeocentric {
            x: position[0],
            y: position[1],
            z: position[2],
        },
        diameter,
    })
}

/// Read virtual antennas from configuration records.
///
/// Each record needs a numeric `diameter` and a `position` of three geocentric coordinates, and
/// may have a `name`. If any record is malformed, a warning is logged and no antenna is returned.
pub fn parse_additional_antennas(records: &[ConfigRecord]) -> Vec<AntennaGeometry> {
    match records
        .iter()
        .enumerate()
        .map(|(index, record)| parse_additional_antenna(index, record))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(antennas) => antennas,
        Err(reason) => {
            warn!("ignoring all additional antennas: {reason}");
            vec![]
        }
    }
}

/// Results kept before the oldest is dropped, for timestamps some agent never reaches.
const MAX_CACHED_TIMESTAMPS: usize = 256;

/// What a group of shadow agents has in common: the tolerance and every antenna considered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShadowSetup {
    tolerance_bits: u64,
    /// Position and diameter bits of each antenna, in order
    antennas: Arc<[u64]>,
}

impl ShadowSetup {
    fn new(tolerance: f64, antennas: &[AntennaGeometry]) -> Self {
        Self {
            tolerance_bits: tolerance.to_bits(),
            antennas: antennas
                .iter()
                .flat_map(|ant| {
                    [
                        ant.position.x.to_bits(),
                        ant.position.y.to_bits(),
                        ant.position.z.to_bits(),
                        ant.diameter.to_bits(),
                    ]
                })
                .collect(),
        }
    }
}

/// What a shadow computation depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShadowKey {
    time_bits: u64,
    ra_bits: u64,
    dec_bits: u64,
    setup: ShadowSetup,
}

impl ShadowKey {
    fn new(time_mjd_s: f64, phase_centre: RADec, setup: &ShadowSetup) -> Self {
        Self {
            time_bits: time_mjd_s.to_bits(),
            ra_bits: phase_centre.ra.to_bits(),
            dec_bits: phase_centre.dec.to_bits(),
            setup: setup.clone(),
        }
    }
}

#[derive(Debug)]
struct ShadowEntry {
    shadowed: Vec<usize>,
    /// Agents that have read this result
    consumers: Vec<usize>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct ShadowState {
    /// Registered agents per setup
    agents: HashMap<ShadowSetup, usize>,
    entries: HashMap<ShadowKey, ShadowEntry>,
    antenna_uvws: Vec<UVW>,
    recomputes: usize,
    next_agent: usize,
    next_sequence: u64,
}

impl ShadowState {
    /// Drop the entries of `setup` that every registered agent has read.
    fn evict_consumed(&mut self, setup: &ShadowSetup) {
        let registered = self.agents.get(setup).copied().unwrap_or(0);
        self.entries
            .retain(|key, entry| &key.setup != setup || entry.consumers.len() < registered);
    }

    fn evict_oldest(&mut self) {
        while self.entries.len() > MAX_CACHED_TIMESTAMPS {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    trace!(
                        "dropping unread shadow result at {}s",
                        f64::from_bits(key.time_bits)
                    );
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// The shadow computation cache shared by a group of shadow agents.
///
/// Each result is computed by the first agent asking for it, and kept until every agent
/// registered with the same antennas and tolerance has read it.
#[derive(Debug, Default)]
pub struct ShadowContext {
    state: Mutex<ShadowState>,
}

impl ShadowContext {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ShadowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, setup: &ShadowSetup) -> usize {
        let mut state = self.lock();
        *state.agents.entry(setup.clone()).or_insert(0) += 1;
        state.next_agent += 1;
        state.next_agent
    }

    fn unregister(&self, agent: usize, setup: &ShadowSetup) {
        let mut state = self.lock();
        let remaining = state.agents.get(setup).copied().unwrap_or(0).saturating_sub(1);
        if remaining == 0 {
            state.agents.remove(setup);
        } else {
            state.agents.insert(setup.clone(), remaining);
        }
        for (key, entry) in state.entries.iter_mut() {
            if &key.setup == setup {
                entry.consumers.retain(|&consumer| consumer != agent);
            }
        }
        state.evict_consumed(setup);
    }

    /// Shadowed antennas for `key`, read by `agent`, running `compute` if no agent has yet.
    ///
    /// `compute` returns the antenna UVWs and the sorted shadowed antenna ids. It runs under the
    /// lock, so concurrent callers with the same key wait for it and then copy its result.
    fn shadowed_antennas(
        &self,
        agent: usize,
        key: ShadowKey,
        compute: impl FnOnce() -> (Vec<UVW>, Vec<usize>),
    ) -> Vec<usize> {
        let mut state = self.lock();
        let state = &mut *state;
        let entry = match state.entries.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(vacant) => {
                let (antenna_uvws, shadowed) = compute();
                state.antenna_uvws = antenna_uvws;
                state.recomputes += 1;
                state.next_sequence += 1;
                vacant.insert(ShadowEntry {
                    shadowed,
                    consumers: vec![],
                    sequence: state.next_sequence,
                })
            }
        };
        if !entry.consumers.contains(&agent) {
            entry.consumers.push(agent);
        }
        let shadowed = entry.shadowed.clone();
        let registered = state.agents.get(&key.setup).copied().unwrap_or(0);
        if entry.consumers.len() >= registered {
            state.entries.remove(&key);
        }
        state.evict_oldest();
        shadowed
    }

    /// Antenna UVWs of the last computation.
    pub fn antenna_uvws(&self) -> Vec<UVW> {
        self.lock().antenna_uvws.clone()
    }

    /// How many times a shadowed set was computed.
    pub fn recomputes(&self) -> usize {
        self.lock().recomputes
    }

    /// Number of live agents using this context.
    pub fn num_agents(&self) -> usize {
        self.lock().agents.values().sum()
    }

    /// Number of results waiting for some agent to read them.
    pub fn num_cached(&self) -> usize {
        self.lock().entries.len()
    }
}

/// Flags rows where either antenna is shadowed.
#[derive(Debug)]
pub struct ShadowFlagAlgorithm {
    geometry: ArrayGeometry,
    tolerance: f64,
    setup: ShadowSetup,
    id: usize,
    context: Arc<ShadowContext>,
    shadowed_by_time: HashMap<u64, Vec<usize>>,
}

impl ShadowFlagAlgorithm {
    /// Shadow flagging with the catalog antennas plus `additional` virtual antennas.
    ///
    /// A positive `tolerance` \[metres\] allows that much overlap before flagging.
    pub fn new(
        catalog: &MetadataCatalog,
        tolerance: f64,
        additional: Vec<AntennaGeometry>,
        context: Arc<ShadowContext>,
    ) -> Self {
        let mut geometry = ArrayGeometry::from_catalog(&catalog.antennas);
        if !additional.is_empty() {
            debug!(
                "adding {} virtual antennas: {}",
                additional.len(),
                additional.iter().map(|ant| ant.name.as_str()).join(", ")
            );
            geometry.extend(additional);
        }
        let setup = ShadowSetup::new(tolerance, geometry.antennas());
        let id = context.register(&setup);
        Self {
            geometry,
            tolerance,
            setup,
            id,
            context,
            shadowed_by_time: HashMap::new(),
        }
    }

    /// The antennas considered, virtual ones last.
    pub fn geometry(&self) -> &ArrayGeometry {
        &self.geometry
    }

    /// Shadowed antennas at one timestamp, from the rows of `buffer` at that time where uvws were
    /// observed and from the geometry for every other baseline.
    fn compute_shadowed(
        &self,
        buffer: &VisBuffer,
        time_mjd_s: f64,
        rows: &[usize],
    ) -> (Vec<UVW>, Vec<usize>) {
        let antennas = self.geometry.antennas();
        let num_antennas = antennas.len();
        let antenna_uvws = self.geometry.antenna_uvws(buffer.phase_centre, time_mjd_s);
        let mut shadowed = BTreeSet::new();
        if num_antennas < 2 {
            return (antenna_uvws, vec![]);
        }

        let mut observed = vec![false; num_antennas * (num_antennas - 1) / 2];
        if let Some(uvws) = &buffer.uvw {
            for &row in rows {
                let (ant1, ant2) = (buffer.antenna1[row], buffer.antenna2[row]);
                if ant1 == ant2 || ant1 >= num_antennas || ant2 >= num_antennas {
                    continue;
                }
                observed[baseline_index(ant1.min(ant2), ant1.max(ant2), num_antennas)] = true;
                if let Some(ant) = shadowed_antenna(
                    uvws[row],
                    ant1,
                    ant2,
                    antennas[ant1].diameter,
                    antennas[ant2].diameter,
                    self.tolerance,
                ) {
                    shadowed.insert(ant);
                }
            }
        }
        for (ant1, ant2) in (0..num_antennas).tuple_combinations() {
            if observed[baseline_index(ant1, ant2, num_antennas)] {
                continue;
            }
            if let Some(ant) = shadowed_antenna(
                baseline_uvw(&antenna_uvws, ant1, ant2),
                ant1,
                ant2,
                antennas[ant1].diameter,
                antennas[ant2].diameter,
                self.tolerance,
            ) {
                shadowed.insert(ant);
            }
        }
        if !shadowed.is_empty() {
            debug!(
                "at {time_mjd_s}s, shadowed antennas: {}",
                shadowed
                    .iter()
                    .map(|&ant| antennas[ant].name.as_str())
                    .join(", ")
            );
        }
        (antenna_uvws, shadowed.into_iter().collect())
    }
}

impl Drop for ShadowFlagAlgorithm {
    fn drop(&mut self) {
        self.context.unregister(self.id, &self.setup);
    }
}

impl FlagAlgorithm for ShadowFlagAlgorithm {
    fn decide(&self, buffer: &VisBuffer, row: usize, _chan: usize, _pol: usize) -> bool {
        match self.shadowed_by_time.get(&buffer.time[row].to_bits()) {
            Some(shadowed) => {
                shadowed.binary_search(&buffer.antenna1[row]).is_ok()
                    || shadowed.binary_search(&buffer.antenna2[row]).is_ok()
            }
            None => false,
        }
    }

    fn pre_process_buffer(&mut self, buffer: &VisBuffer) {
        self.shadowed_by_time.clear();
        let rows_by_time = (0..buffer.num_rows()).into_group_map_by(|&row| buffer.time[row].to_bits());
        trace!("{} timestamps in buffer", rows_by_time.len());
        for (time_bits, rows) in rows_by_time {
            let time_mjd_s = f64::from_bits(time_bits);
            let key = ShadowKey::new(time_mjd_s, buffer.phase_centre, &self.setup);
            let shadowed = self.context.shadowed_antennas(self.id, key, || {
                self.compute_shadowed(buffer, time_mjd_s, &rows)
            });
            self.shadowed_by_time.insert(time_bits, shadowed);
        }
    }
}
