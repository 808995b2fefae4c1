// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turning a [`DataSelection`] into the row, channel and polarization positions of one buffer.

use std::collections::{BTreeSet, HashMap};

use log::trace;

use crate::{
    data::{TableKind, VisBuffer},
    geometry::baseline_uvw,
    marlu::UVW,
    selection::DataSelection,
};

/// The positions of a buffer that survive a selection, each list in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferIndex {
    /// Row positions
    pub rows: Vec<usize>,
    /// Channel positions
    pub channels: Vec<usize>,
    /// Polarization positions
    pub pols: Vec<usize>,
}

impl BufferIndex {
    /// Whether any of the lists is empty, in which case there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.channels.is_empty() || self.pols.is_empty()
    }

    /// Number of selected points.
    pub fn num_points(&self) -> usize {
        self.rows.len() * self.channels.len() * self.pols.len()
    }
}

/// Buffer-level filters: sub-array, field and spectral window.
pub fn check_buffer(selection: &DataSelection, buffer: &VisBuffer) -> bool {
    let accepts = |ids: &Option<Vec<usize>>, id: usize| match ids {
        Some(ids) => ids.contains(&id),
        None => true,
    };
    accepts(&selection.array_ids, buffer.array_id)
        && accepts(&selection.field_ids, buffer.field_id)
        && accepts(&selection.spw_ids, buffer.spw_id)
}

/// Rows passing every row-level filter.
pub fn generate_rows(selection: &DataSelection, buffer: &VisBuffer) -> Vec<usize> {
    let num_rows = buffer.num_rows();
    if !selection.filter_rows() {
        return (0..num_rows).collect();
    }

    // uvws recomputed from geometry, per distinct timestamp, for buffers without observed uvws
    let mut recomputed: HashMap<u64, Vec<UVW>> = HashMap::new();

    (0..num_rows)
        .filter(|&row| {
            let ant1 = buffer.antenna1[row];
            let ant2 = buffer.antenna2[row];
            if let Some(ids) = &selection.observation_ids {
                if !ids.contains(&buffer.observation_ids[row]) {
                    return false;
                }
            }
            if let Some(ids) = &selection.state_ids {
                if !ids.contains(&buffer.state_ids[row]) {
                    return false;
                }
            }
            if let Some(scans) = &selection.scan_numbers {
                if !scans.contains(&buffer.scans[row]) {
                    return false;
                }
            }
            if let Some(ranges) = &selection.time_ranges {
                let time = buffer.time[row];
                if !ranges.iter().any(|&(lo, hi)| lo <= time && time <= hi) {
                    return false;
                }
            }
            if let Some(antennas) = &selection.antennas {
                let accepted = match selection.table_kind() {
                    TableKind::Visibilities => antennas.matches_baseline(ant1, ant2),
                    TableKind::CalibrationSolutions => antennas.matches_antenna(ant1),
                };
                if !accepted {
                    return false;
                }
            }
            if selection.autocorr_only && ant1 != ant2 {
                return false;
            }
            if selection.uv_ranges.is_some() {
                let uvw = match &buffer.uvw {
                    Some(uvws) => uvws[row],
                    None => match recomputed_uvw(selection, buffer, row, &mut recomputed) {
                        Some(uvw) => uvw,
                        None => return false,
                    },
                };
                let uv_dist = uvw.u.hypot(uvw.v);
                if !selection.uv_distance_accepted(uv_dist, buffer.spw_id) {
                    return false;
                }
            }
            true
        })
        .collect()
}

fn recomputed_uvw(
    selection: &DataSelection,
    buffer: &VisBuffer,
    row: usize,
    cache: &mut HashMap<u64, Vec<UVW>>,
) -> Option<UVW> {
    let geometry = selection.geometry()?;
    let (ant1, ant2) = (buffer.antenna1[row], buffer.antenna2[row]);
    if ant1 >= geometry.len() || ant2 >= geometry.len() {
        return None;
    }
    let time = buffer.time[row];
    let uvws = cache.entry(time.to_bits()).or_insert_with(|| {
        trace!("recomputing uvws for uv range selection at {time}");
        geometry.antenna_uvws(buffer.phase_centre, buffer.row_centroid(row))
    });
    Some(baseline_uvw(uvws, ant1, ant2))
}

/// Channels registered for the buffer's spectral window.
pub fn generate_channels(selection: &DataSelection, buffer: &VisBuffer) -> Vec<usize> {
    let (_, num_chans, _) = buffer.dim();
    match &selection.channel_ranges {
        None => (0..num_chans).collect(),
        Some(ranges) => {
            let mut channels = BTreeSet::new();
            for range in ranges.iter().filter(|range| range.spw == buffer.spw_id) {
                if range.start < num_chans {
                    channels.extend(range.start..=range.stop.min(num_chans - 1));
                }
            }
            channels.into_iter().collect()
        }
    }
}

/// Polarizations accepted for the buffer's polarization setup.
pub fn generate_pols(selection: &DataSelection, buffer: &VisBuffer) -> Vec<usize> {
    let (num_pols, _, _) = buffer.dim();
    match &selection.polarizations {
        None => (0..num_pols).collect(),
        Some(map) => map
            .get(&buffer.pol_setup_id)
            .map(|positions| {
                positions
                    .iter()
                    .copied()
                    .filter(|&pol| pol < num_pols)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Every index list for a buffer, or `None` if the buffer has nothing selected.
pub fn generate_index(selection: &DataSelection, buffer: &VisBuffer) -> Option<BufferIndex> {
    if !check_buffer(selection, buffer) {
        trace!(
            "buffer (array {}, field {}, spw {}) rejected by selection",
            buffer.array_id,
            buffer.field_id,
            buffer.spw_id
        );
        return None;
    }
    let index = BufferIndex {
        rows: generate_rows(selection, buffer),
        channels: generate_channels(selection, buffer),
        pols: generate_pols(selection, buffer),
    };
    if index.is_empty() {
        trace!(
            "nothing selected in buffer: {} rows, {} channels, {} pols",
            index.rows.len(),
            index.channels.len(),
            index.pols.len()
        );
        return None;
    }
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::MetadataCatalog,
        selection::{SelectionConfig, SelectionConfigBuilder},
        test_common::{get_all_pairs, get_test_buffer, get_test_buffer_builder, get_test_catalog},
    };

    fn rows_for(config: SelectionConfig, catalog: &MetadataCatalog, buffer: &VisBuffer) -> Vec<usize> {
        let selection = DataSelection::new(&config, catalog).unwrap();
        generate_rows(&selection, buffer)
    }

    #[test]
    fn test_identity_without_filters() {
        let buffer = get_test_buffer(&get_all_pairs(4, true), 4, 8);
        let index = generate_index(&DataSelection::all(), &buffer).unwrap();
        assert_eq!(index.rows, (0..10).collect::<Vec<_>>());
        assert_eq!(index.channels, (0..8).collect::<Vec<_>>());
        assert_eq!(index.pols, vec![0, 1, 2, 3]);
        assert_eq!(index.num_points(), 10 * 8 * 4);
    }

    #[test]
    fn test_buffer_level_filters() {
        let catalog = get_test_catalog(4);
        let buffer = get_test_buffer_builder(&[(0, 1)], 4, 8)
            .field_id(2_usize)
            .build()
            .unwrap();
        let config = SelectionConfigBuilder::default()
            .field("0,1")
            .build()
            .unwrap();
        let selection = DataSelection::new(&config, &catalog).unwrap();
        assert!(!check_buffer(&selection, &buffer));
        assert!(generate_index(&selection, &buffer).is_none());

        let config = SelectionConfigBuilder::default().spw("0").build().unwrap();
        let selection = DataSelection::new(&config, &catalog).unwrap();
        assert!(check_buffer(&selection, &buffer));
    }

    #[test]
    fn test_selection_composition_is_intersection() {
        let catalog = get_test_catalog(5);
        let pairs = get_all_pairs(5, true);
        let num_rows = pairs.len();
        let buffer = get_test_buffer_builder(&pairs, 1, 1)
            .scans((0..num_rows).map(|row| (row % 3) as i32 + 1).collect::<Vec<_>>())
            .time(
                (0..num_rows)
                    .map(|row| 1000.0 + (row % 4) as f64)
                    .collect::<Vec<_>>(),
            )
            .build()
            .unwrap();

        let criteria = [
            SelectionConfigBuilder::default().antenna("1;3&4").build().unwrap(),
            SelectionConfigBuilder::default().scan("2~3").build().unwrap(),
            SelectionConfigBuilder::default()
                .timerange("1000.5~1002.5")
                .build()
                .unwrap(),
            SelectionConfigBuilder::default().autocorr(true).build().unwrap(),
        ];
        for a in &criteria {
            for b in &criteria {
                let mut both = a.clone();
                both.antenna = a.antenna.clone().or_else(|| b.antenna.clone());
                both.scan = a.scan.clone().or_else(|| b.scan.clone());
                both.timerange = a.timerange.clone().or_else(|| b.timerange.clone());
                both.autocorr = a.autocorr || b.autocorr;

                let rows_a: BTreeSet<usize> = rows_for(a.clone(), &catalog, &buffer).into_iter().collect();
                let rows_b: BTreeSet<usize> = rows_for(b.clone(), &catalog, &buffer).into_iter().collect();
                let rows_both: BTreeSet<usize> = rows_for(both, &catalog, &buffer).into_iter().collect();
                let expected: BTreeSet<usize> = rows_a.intersection(&rows_b).copied().collect();
                assert_eq!(rows_both, expected, "{a} and {b}");
            }
        }
    }

    #[test]
    fn test_negated_baseline_rows() {
        let catalog = get_test_catalog(3);
        let buffer = get_test_buffer(&[(0, 1), (0, 2), (1, 2), (1, 0)], 1, 1);
        let config = SelectionConfigBuilder::default()
            .antenna("!0&1")
            .build()
            .unwrap();
        assert_eq!(rows_for(config, &catalog, &buffer), vec![1, 2]);
    }

    #[test]
    fn test_calibration_table_uses_antenna1() {
        let mut catalog = get_test_catalog(3);
        catalog.kind = TableKind::CalibrationSolutions;
        let buffer = get_test_buffer(&[(0, 0), (1, 1), (2, 2)], 1, 1);
        let config = SelectionConfigBuilder::default()
            .antenna("!1")
            .build()
            .unwrap();
        assert_eq!(rows_for(config, &catalog, &buffer), vec![1]);
    }

    #[test]
    fn test_uvrange_with_observed_uvws() {
        let catalog = get_test_catalog(3);
        let uvws = vec![
            UVW { u: 3.0, v: 4.0, w: 100.0 },
            UVW { u: 30.0, v: 40.0, w: 0.0 },
            UVW { u: 0.0, v: 0.0, w: 0.0 },
        ];
        let buffer = get_test_buffer_builder(&[(0, 1), (0, 2), (1, 1)], 1, 1)
            .uvw(uvws)
            .build()
            .unwrap();
        let config = SelectionConfigBuilder::default()
            .uvrange("1~10m")
            .build()
            .unwrap();
        assert_eq!(rows_for(config, &catalog, &buffer), vec![0]);

        // 50m at 1.4GHz is about 233 wavelengths
        let config = SelectionConfigBuilder::default()
            .uvrange(">0.2klambda")
            .build()
            .unwrap();
        assert_eq!(rows_for(config, &catalog, &buffer), vec![1]);
    }

    #[test]
    fn test_uvrange_with_recomputed_uvws() {
        let catalog = get_test_catalog(4);
        // antennas are 100m apart east-west, which stays 100m in the uv plane for a source at
        // the pole
        let buffer = get_test_buffer_builder(&[(0, 1), (0, 2), (1, 3), (2, 2)], 1, 1)
            .phase_centre(crate::marlu::RADec {
                ra: 0.0,
                dec: std::f64::consts::FRAC_PI_2,
            })
            .build()
            .unwrap();
        let config = SelectionConfigBuilder::default()
            .uvrange("150~250")
            .build()
            .unwrap();
        assert_eq!(rows_for(config, &catalog, &buffer), vec![1, 2]);
    }

    #[test]
    fn test_unregistered_channels_are_empty() {
        let catalog = get_test_catalog(2);
        let buffer = get_test_buffer(&[(0, 1)], 1, 8);
        let config = SelectionConfigBuilder::default()
            .spw("0:20~30")
            .build()
            .unwrap();
        let selection = DataSelection::new(&config, &catalog).unwrap();
        assert!(check_buffer(&selection, &buffer));
        assert!(generate_channels(&selection, &buffer).is_empty());
        assert!(generate_index(&selection, &buffer).is_none());
    }

    #[test]
    fn test_channels_for_buffer_spw() {
        let catalog = get_test_catalog(2);
        let buffer = get_test_buffer_builder(&[(0, 1)], 1, 16)
            .spw_id(1_usize)
            .build()
            .unwrap();
        let config = SelectionConfigBuilder::default()
            .spw("0:0~3,1:2~4;3~5")
            .build()
            .unwrap();
        let selection = DataSelection::new(&config, &catalog).unwrap();
        assert_eq!(generate_channels(&selection, &buffer), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_pols_for_buffer_setup() {
        let catalog = get_test_catalog(2);
        let config = SelectionConfigBuilder::default()
            .correlation("XY,LL")
            .build()
            .unwrap();
        let selection = DataSelection::new(&config, &catalog).unwrap();

        let linear = get_test_buffer(&[(0, 1)], 4, 1);
        assert_eq!(generate_pols(&selection, &linear), vec![1]);

        let circular = get_test_buffer_builder(&[(0, 1)], 2, 1)
            .pol_setup_id(1_usize)
            .build()
            .unwrap();
        assert_eq!(generate_pols(&selection, &circular), vec![1]);

        let unknown = get_test_buffer_builder(&[(0, 1)], 2, 1)
            .pol_setup_id(7_usize)
            .build()
            .unwrap();
        assert!(generate_pols(&selection, &unknown).is_empty());
    }
}
