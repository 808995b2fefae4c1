// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resolving data selection expressions against a [`MetadataCatalog`].
//!
//! Every key of a [`SelectionConfig`] is optional and resolved independently. A key that is
//! present always becomes a filter, even when its expression matches nothing: in that case the
//! filter rejects everything. Keys that are absent impose no restriction.
//!
//! # Examples
//!
//! ```rust
//! use visflag::{
//!     data::{MetadataCatalog, SpectralWindow},
//!     selection::{DataSelection, SelectionConfigBuilder},
//! };
//!
//! let catalog = MetadataCatalog {
//!     spectral_windows: vec![SpectralWindow { num_chans: 64, ref_freq_hz: 1.4e9 }],
//!     ..Default::default()
//! };
//! let config = SelectionConfigBuilder::default()
//!     .spw("0:10~20;40~50")
//!     .build()
//!     .unwrap();
//! let selection = DataSelection::new(&config, &catalog).unwrap();
//! assert!(selection.filter_channels());
//! assert_eq!(selection.channel_ranges.unwrap().len(), 2);
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use derive_builder::Builder;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::{
    data::{MetadataCatalog, TableKind},
    error::SelectionError,
    geometry::ArrayGeometry,
    marlu::{
        constants::DAYSEC,
        hifitime::{Duration, Epoch},
    },
};

lazy_static! {
    static ref RE_UVRANGE: Regex = Regex::new(
        r"^(?P<op>[<>]?)\s*(?P<lo>[0-9.]+(?:[eE][+-]?[0-9]+)?)\s*(?:~\s*(?P<hi>[0-9.]+(?:[eE][+-]?[0-9]+)?))?\s*(?P<unit>m|km|lambda|klambda|Mlambda)?$"
    )
    .unwrap();
    static ref RE_DATETIME: Regex = Regex::new(
        r"^(?P<y>\d{4})/(?P<mo>\d{1,2})/(?P<d>\d{1,2})/(?P<h>\d{1,2}):(?P<mi>\d{1,2}):(?P<s>\d{1,2}(?:\.\d*)?)$"
    )
    .unwrap();
}

/// Correlation expressions may carry a visibility mapping prefix, which doesn't affect selection.
const VIS_MAPPING_PREFIXES: [&str; 5] = ["ABS_", "ARG_", "REAL_", "IMAG_", "NORM_"];

/// The selection keys of an agent configuration. Each is an optional expression.
#[derive(Builder, Debug, Clone, Default, PartialEq, Eq)]
#[builder(setter(into, strip_option), default)]
pub struct SelectionConfig {
    /// Sub-array ids, e.g. `0,2~3`
    pub array: Option<String>,
    /// Field ids or names, e.g. `0,3C*`
    pub field: Option<String>,
    /// Scan numbers, e.g. `1~4,>10`
    pub scan: Option<String>,
    /// Time ranges, e.g. `2020/01/01/10:00:00~2020/01/01/11:00:00`
    pub timerange: Option<String>,
    /// Spectral windows with optional channel ranges, e.g. `0:0~31;40~63,1`
    pub spw: Option<String>,
    /// Antennas and baselines, optionally negated, e.g. `!ea01&ea02;ea05`
    pub antenna: Option<String>,
    /// Uv-distance ranges, e.g. `0~1.5klambda`
    pub uvrange: Option<String>,
    /// Correlation products, e.g. `XX,YY`
    pub correlation: Option<String>,
    /// Observation ids
    pub observation: Option<String>,
    /// Scan intent patterns, e.g. `*BANDPASS*`
    pub intent: Option<String>,
    /// Only select autocorrelations
    pub autocorr: bool,
}

impl Display for SelectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = [
            ("array", &self.array),
            ("field", &self.field),
            ("scan", &self.scan),
            ("timerange", &self.timerange),
            ("spw", &self.spw),
            ("antenna", &self.antenna),
            ("uvrange", &self.uvrange),
            ("correlation", &self.correlation),
            ("observation", &self.observation),
            ("intent", &self.intent),
        ];
        let mut parts: Vec<String> = keys
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}='{v}'")))
            .collect();
        if self.autocorr {
            parts.push("autocorr=True".into());
        }
        if parts.is_empty() {
            write!(f, "all data")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// An inclusive channel range registered for one spectral window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    /// Spectral window id
    pub spw: usize,
    /// First channel
    pub start: usize,
    /// Last channel, inclusive
    pub stop: usize,
}

/// An inclusive range of projected baseline lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRange {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
    /// Whether bounds are in wavelengths rather than metres
    pub wavelengths: bool,
}

impl UvRange {
    fn contains(&self, uv_dist_m: f64, wavelength_m: Option<f64>) -> bool {
        let dist = if self.wavelengths {
            match wavelength_m {
                Some(wavelength) => uv_dist_m / wavelength,
                None => return false,
            }
        } else {
            uv_dist_m
        };
        self.min <= dist && dist <= self.max
    }
}

/// Antennas and baselines selected by an antenna expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AntennaSelection {
    /// Antennas named on their own, used for tables with one antenna per row
    pub antennas: Vec<usize>,
    /// Selected baselines, `(lower, higher)`
    pub baselines: Vec<(usize, usize)>,
    /// Whether the expression was negated
    pub negated: bool,
}

impl AntennaSelection {
    /// Whether a row with antennas `(ant1, ant2)` passes. Pairs match in either order.
    pub fn matches_baseline(&self, ant1: usize, ant2: usize) -> bool {
        let key = (ant1.min(ant2), ant1.max(ant2));
        let found = self.baselines.binary_search(&key).is_ok();
        found != self.negated
    }

    /// Whether a single antenna was selected. Negation does not apply here.
    pub fn matches_antenna(&self, ant: usize) -> bool {
        self.antennas.binary_search(&ant).is_ok()
    }
}

/// A [`SelectionConfig`] resolved against a catalog.
///
/// `None` means the key was not given, `Some` of an empty list means it matches nothing.
#[derive(Debug, Clone, Default)]
pub struct DataSelection {
    /// Selected sub-array ids
    pub array_ids: Option<Vec<usize>>,
    /// Selected field ids
    pub field_ids: Option<Vec<usize>>,
    /// Selected spectral window ids
    pub spw_ids: Option<Vec<usize>>,
    /// Channel ranges per selected spectral window
    pub channel_ranges: Option<Vec<ChannelRange>>,
    /// Selected scan numbers
    pub scan_numbers: Option<Vec<i32>>,
    /// Selected time ranges \[MJD seconds\], inclusive
    pub time_ranges: Option<Vec<(f64, f64)>>,
    /// Selected antennas and baselines
    pub antennas: Option<AntennaSelection>,
    /// Selected uv ranges
    pub uv_ranges: Option<Vec<UvRange>>,
    /// Selected observation ids
    pub observation_ids: Option<Vec<usize>>,
    /// Selected state ids
    pub state_ids: Option<Vec<usize>>,
    /// Accepted correlation positions per polarization setup id
    pub polarizations: Option<BTreeMap<usize, Vec<usize>>>,
    /// Only autocorrelations
    pub autocorr_only: bool,

    pub(crate) table_kind: TableKind,
    pub(crate) spw_ref_freqs: Vec<f64>,
    pub(crate) geometry: Option<ArrayGeometry>,
}

impl DataSelection {
    /// A selection that lets everything through.
    pub fn all() -> Self {
        Self::default()
    }

    /// Resolve every key of `config` against `catalog`.
    ///
    /// # Errors
    ///
    /// Will return [`SelectionError`] if an expression can't be parsed, or if none of the
    /// requested correlation products exist.
    pub fn new(
        config: &SelectionConfig,
        catalog: &MetadataCatalog,
    ) -> Result<Self, SelectionError> {
        let num_antennas = catalog.num_antennas();
        let mut selection = Self {
            table_kind: catalog.kind,
            spw_ref_freqs: catalog
                .spectral_windows
                .iter()
                .map(|spw| spw.ref_freq_hz)
                .collect(),
            autocorr_only: config.autocorr,
            ..Default::default()
        };

        if let Some(expr) = present(&config.array) {
            selection.array_ids = Some(parse_ids("array", expr, catalog.num_arrays)?);
        }
        if let Some(expr) = present(&config.field) {
            selection.field_ids = Some(parse_fields(expr, &catalog.field_names)?);
        }
        if let Some(expr) = present(&config.spw) {
            let (spw_ids, ranges) = parse_spw(expr, catalog)?;
            selection.spw_ids = Some(spw_ids);
            selection.channel_ranges = Some(ranges);
        }
        if let Some(expr) = present(&config.scan) {
            selection.scan_numbers = Some(parse_scans(expr, &catalog.scan_numbers)?);
        }
        if let Some(expr) = present(&config.timerange) {
            selection.time_ranges = Some(parse_timerange(expr)?);
        }
        if let Some(expr) = present(&config.antenna) {
            selection.antennas = Some(parse_antennas(expr, catalog)?);
        }
        if let Some(expr) = present(&config.uvrange) {
            selection.uv_ranges = Some(parse_uvrange(expr)?);
            if num_antennas > 0 {
                selection.geometry = Some(ArrayGeometry::from_catalog(&catalog.antennas));
            }
        }
        if let Some(expr) = present(&config.correlation) {
            selection.polarizations = parse_correlation(expr, &catalog.polarization_setups)?;
        }
        if let Some(expr) = present(&config.observation) {
            selection.observation_ids =
                Some(parse_ids("observation", expr, catalog.num_observations)?);
        }
        if let Some(expr) = present(&config.intent) {
            selection.state_ids = Some(parse_intents(expr, &catalog.state_intents)?);
        }

        debug!("resolved selection {config}: {selection:?}");
        Ok(selection)
    }

    /// Whether any row-level filter is active.
    pub fn filter_rows(&self) -> bool {
        self.scan_numbers.is_some()
            || self.time_ranges.is_some()
            || self.antennas.is_some()
            || self.uv_ranges.is_some()
            || self.observation_ids.is_some()
            || self.state_ids.is_some()
            || self.autocorr_only
    }

    /// Whether channels are filtered.
    pub fn filter_channels(&self) -> bool {
        self.channel_ranges.is_some()
    }

    /// Whether polarizations are filtered.
    pub fn filter_pols(&self) -> bool {
        self.polarizations.is_some()
    }

    pub(crate) fn table_kind(&self) -> TableKind {
        self.table_kind
    }

    /// Wavelength at the reference frequency of a spectral window \[metres\].
    pub(crate) fn wavelength_m(&self, spw: usize) -> Option<f64> {
        self.spw_ref_freqs
            .get(spw)
            .filter(|&&freq| freq > 0.0)
            .map(|&freq| crate::marlu::constants::VEL_C / freq)
    }

    pub(crate) fn geometry(&self) -> Option<&ArrayGeometry> {
        self.geometry.as_ref()
    }

    pub(crate) fn uv_distance_accepted(&self, uv_dist_m: f64, spw: usize) -> bool {
        match &self.uv_ranges {
            None => true,
            Some(ranges) => {
                let wavelength = self.wavelength_m(spw);
                ranges
                    .iter()
                    .any(|range| range.contains(uv_dist_m, wavelength))
            }
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn unparsable(key: &'static str, expression: &str, reason: impl Into<String>) -> SelectionError {
    SelectionError::Unparsable {
        key,
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn tokens(expr: &str) -> impl Iterator<Item = &str> {
    expr.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// Turn a `*` / `?` wildcard pattern into an anchored regex.
fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$"))
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    expr: &str,
    token: &str,
) -> Result<T, SelectionError> {
    token
        .trim()
        .parse()
        .map_err(|_| unparsable(key, expr, format!("\"{token}\" is not a number")))
}

/// Parse one id token (`N`, `A~B`, `<N`, `>N`, `*`) into ids, given the number of known ids.
fn parse_id_token(
    key: &'static str,
    expr: &str,
    token: &str,
    num_known: usize,
) -> Result<Vec<usize>, SelectionError> {
    if token == "*" {
        return Ok((0..num_known).collect());
    }
    if let Some(rest) = token.strip_prefix('<') {
        let bound: usize = parse_number(key, expr, rest)?;
        return Ok((0..bound.min(num_known)).collect());
    }
    if let Some(rest) = token.strip_prefix('>') {
        let bound: usize = parse_number(key, expr, rest)?;
        return Ok(match bound.checked_add(1) {
            Some(first) => (first..num_known).collect(),
            None => vec![],
        });
    }
    if let Some((lo, hi)) = token.split_once('~') {
        let lo: usize = parse_number(key, expr, lo)?;
        let hi: usize = parse_number(key, expr, hi)?;
        if lo > hi {
            return Err(unparsable(key, expr, format!("range {lo}~{hi} is reversed")));
        }
        return Ok((lo..hi.saturating_add(1).min(num_known)).collect());
    }
    Ok(vec![parse_number(key, expr, token)?])
}

fn parse_ids(
    key: &'static str,
    expr: &str,
    num_known: usize,
) -> Result<Vec<usize>, SelectionError> {
    let mut ids = BTreeSet::new();
    for token in tokens(expr) {
        ids.extend(parse_id_token(key, expr, token, num_known)?);
    }
    Ok(ids.into_iter().collect())
}

fn is_id_token(token: &str) -> bool {
    token
        .trim_start_matches(['<', '>'])
        .chars()
        .all(|c| c.is_ascii_digit() || c == '~' || c.is_whitespace())
}

/// Ids of every name matching a wildcard pattern.
fn match_names(
    key: &'static str,
    expr: &str,
    pattern: &str,
    names: &[String],
) -> Result<Vec<usize>, SelectionError> {
    if let Some(idx) = names.iter().position(|name| name == pattern) {
        return Ok(vec![idx]);
    }
    let regex = wildcard_regex(pattern).map_err(|e| unparsable(key, expr, e.to_string()))?;
    Ok(names
        .iter()
        .enumerate()
        .filter(|(_, name)| regex.is_match(name))
        .map(|(idx, _)| idx)
        .collect())
}

fn parse_fields(expr: &str, field_names: &[String]) -> Result<Vec<usize>, SelectionError> {
    let mut ids = BTreeSet::new();
    for token in tokens(expr) {
        if token != "*" && !is_id_token(token) {
            let matched = match_names("field", expr, token, field_names)?;
            if matched.is_empty() {
                warn!("field selection \"{token}\" matches no field");
            }
            ids.extend(matched);
        } else {
            ids.extend(parse_id_token("field", expr, token, field_names.len())?);
        }
    }
    Ok(ids.into_iter().collect())
}

fn parse_scans(expr: &str, scan_numbers: &[i32]) -> Result<Vec<i32>, SelectionError> {
    let mut scans = BTreeSet::new();
    for token in tokens(expr) {
        if token == "*" {
            scans.extend(scan_numbers.iter().copied());
        } else if let Some(rest) = token.strip_prefix('<') {
            let bound: i32 = parse_number("scan", expr, rest)?;
            scans.extend(scan_numbers.iter().copied().filter(|&s| s < bound));
        } else if let Some(rest) = token.strip_prefix('>') {
            let bound: i32 = parse_number("scan", expr, rest)?;
            scans.extend(scan_numbers.iter().copied().filter(|&s| s > bound));
        } else if let Some((lo, hi)) = token.split_once('~') {
            let lo: i32 = parse_number("scan", expr, lo)?;
            let hi: i32 = parse_number("scan", expr, hi)?;
            if lo > hi {
                return Err(unparsable("scan", expr, format!("range {lo}~{hi} is reversed")));
            }
            scans.extend(scan_numbers.iter().copied().filter(|s| (lo..=hi).contains(s)));
        } else {
            scans.insert(parse_number("scan", expr, token)?);
        }
    }
    Ok(scans.into_iter().collect())
}

fn parse_intents(expr: &str, state_intents: &[String]) -> Result<Vec<usize>, SelectionError> {
    let mut ids = BTreeSet::new();
    for token in tokens(expr) {
        let regex =
            wildcard_regex(token).map_err(|e| unparsable("intent", expr, e.to_string()))?;
        // a state can carry several comma separated intents, any of them may match
        ids.extend(
            state_intents
                .iter()
                .enumerate()
                .filter(|(_, intents)| {
                    regex.is_match(intents) || intents.split(',').any(|i| regex.is_match(i.trim()))
                })
                .map(|(idx, _)| idx),
        );
    }
    Ok(ids.into_iter().collect())
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        _ => 0,
    }
}

/// A time value, either MJD seconds or a `YYYY/MM/DD/hh:mm:ss` UTC date.
fn parse_time_value(expr: &str, value: &str) -> Result<f64, SelectionError> {
    let value = value.trim();
    if let Ok(mjd_s) = value.parse::<f64>() {
        return Ok(mjd_s);
    }
    let caps = RE_DATETIME
        .captures(value)
        .ok_or_else(|| unparsable("timerange", expr, format!("\"{value}\" is not a time")))?;
    let year: i32 = parse_number("timerange", expr, &caps["y"])?;
    let month: u8 = parse_number("timerange", expr, &caps["mo"])?;
    let day: u8 = parse_number("timerange", expr, &caps["d"])?;
    let hour: f64 = parse_number("timerange", expr, &caps["h"])?;
    let minute: f64 = parse_number("timerange", expr, &caps["mi"])?;
    let second: f64 = parse_number("timerange", expr, &caps["s"])?;
    if !(1..=12).contains(&month)
        || day == 0
        || day > days_in_month(year, month)
        || hour >= 24.0
        || minute >= 60.0
        || second >= 61.0
    {
        return Err(unparsable(
            "timerange",
            expr,
            format!("\"{value}\" is not a valid date"),
        ));
    }
    let epoch = Epoch::from_gregorian_utc_at_midnight(year, month, day)
        + Duration::from_seconds(hour * 3600.0 + minute * 60.0 + second);
    Ok(epoch.to_mjd_utc_days() * DAYSEC)
}

fn parse_timerange(expr: &str) -> Result<Vec<(f64, f64)>, SelectionError> {
    let mut ranges = vec![];
    for token in tokens(expr) {
        let range = if let Some(rest) = token.strip_prefix('<') {
            (f64::NEG_INFINITY, parse_time_value(expr, rest)?)
        } else if let Some(rest) = token.strip_prefix('>') {
            (parse_time_value(expr, rest)?, f64::INFINITY)
        } else if let Some((lo, hi)) = token.split_once('~') {
            let lo = parse_time_value(expr, lo)?;
            let hi = parse_time_value(expr, hi)?;
            if lo > hi {
                return Err(unparsable("timerange", expr, "range is reversed"));
            }
            (lo, hi)
        } else {
            let start = parse_time_value(expr, token)?;
            (start, start + 1.0)
        };
        ranges.push(range);
    }
    Ok(ranges)
}

fn parse_spw(
    expr: &str,
    catalog: &MetadataCatalog,
) -> Result<(Vec<usize>, Vec<ChannelRange>), SelectionError> {
    let num_spws = catalog.spectral_windows.len();
    let mut spw_ids = BTreeSet::new();
    let mut ranges = vec![];
    for token in tokens(expr) {
        let (spw_part, chan_part) = match token.split_once(':') {
            Some((spw_part, chan_part)) => (spw_part.trim(), Some(chan_part)),
            None => (token, None),
        };
        let ids = parse_id_token("spw", expr, spw_part, num_spws)?;
        for &spw in &ids {
            let last_chan = catalog
                .spectral_windows
                .get(spw)
                .map_or(usize::MAX, |window| window.num_chans.saturating_sub(1));
            match chan_part {
                None => ranges.push(ChannelRange {
                    spw,
                    start: 0,
                    stop: last_chan,
                }),
                Some(chans) => {
                    for chan_token in chans.split(';').map(str::trim) {
                        let (start, stop) = match chan_token.split_once('~') {
                            Some((lo, hi)) => (
                                parse_number::<usize>("spw", expr, lo)?,
                                parse_number::<usize>("spw", expr, hi)?,
                            ),
                            None => {
                                let chan = parse_number::<usize>("spw", expr, chan_token)?;
                                (chan, chan)
                            }
                        };
                        if start > stop {
                            return Err(unparsable(
                                "spw",
                                expr,
                                format!("channel range {start}~{stop} is reversed"),
                            ));
                        }
                        if start > last_chan {
                            warn!("channel {start} is beyond the last channel of spw {spw}");
                            continue;
                        }
                        ranges.push(ChannelRange {
                            spw,
                            start,
                            stop: stop.min(last_chan),
                        });
                    }
                }
            }
        }
        spw_ids.extend(ids);
    }
    Ok((spw_ids.into_iter().collect(), ranges))
}

/// Resolve one side of an antenna term: an id, an id range, or a name pattern.
fn resolve_antennas(
    expr: &str,
    token: &str,
    catalog: &MetadataCatalog,
) -> Result<Vec<usize>, SelectionError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(unparsable("antenna", expr, "empty antenna in baseline"));
    }
    let names: Vec<String> = catalog.antennas.iter().map(|a| a.name.clone()).collect();
    if let Some(id) = catalog.antenna_id(token) {
        return Ok(vec![id]);
    }
    let mut ids = BTreeSet::new();
    for part in token.split(',').map(str::trim) {
        if is_id_token(part) || part == "*" {
            ids.extend(parse_id_token("antenna", expr, part, names.len())?);
        } else {
            let matched = match_names("antenna", expr, part, &names)?;
            if matched.is_empty() {
                warn!("antenna selection \"{part}\" matches no antenna");
            }
            ids.extend(matched);
        }
    }
    Ok(ids.into_iter().collect())
}

fn parse_antennas(expr: &str, catalog: &MetadataCatalog) -> Result<AntennaSelection, SelectionError> {
    let (negated, body) = match expr.trim().strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, expr.trim()),
    };
    let all: Vec<usize> = (0..catalog.num_antennas()).collect();
    let mut antennas = BTreeSet::new();
    let mut baselines = BTreeSet::new();
    let mut add = |a: usize, b: usize, autos: bool| {
        if a != b || autos {
            baselines.insert((a.min(b), a.max(b)));
        }
    };

    for term in body.split(';').map(str::trim).filter(|t| !t.is_empty()) {
        let (left, rest) = match term.find('&') {
            Some(idx) => (&term[..idx], &term[idx..]),
            None => (term, ""),
        };
        let num_amps = rest.chars().take_while(|&c| c == '&').count();
        let right = rest[num_amps..].trim();
        let left = resolve_antennas(expr, left, catalog)?;
        match (num_amps, right.is_empty()) {
            (0, _) => {
                for &a in &left {
                    antennas.insert(a);
                    for &b in &all {
                        add(a, b, true);
                    }
                }
            }
            (1 | 2, true) => {
                for &a in &left {
                    for &b in &all {
                        add(a, b, num_amps == 2);
                    }
                }
            }
            (1 | 2, false) => {
                let right = resolve_antennas(expr, right, catalog)?;
                for &a in &left {
                    for &b in &right {
                        add(a, b, num_amps == 2);
                    }
                }
            }
            (3, true) => {
                for &a in &left {
                    add(a, a, true);
                }
            }
            _ => {
                return Err(unparsable(
                    "antenna",
                    expr,
                    format!("\"{term}\" is not a valid baseline"),
                ))
            }
        }
    }

    Ok(AntennaSelection {
        antennas: antennas.into_iter().collect(),
        baselines: baselines.into_iter().collect(),
        negated,
    })
}

fn parse_uvrange(expr: &str) -> Result<Vec<UvRange>, SelectionError> {
    let mut ranges = vec![];
    for token in tokens(expr) {
        let caps = RE_UVRANGE
            .captures(token)
            .ok_or_else(|| unparsable("uvrange", expr, format!("\"{token}\" is not a range")))?;
        let lo: f64 = parse_number("uvrange", expr, &caps["lo"])?;
        let hi: Option<f64> = match caps.name("hi") {
            Some(hi) => Some(parse_number("uvrange", expr, hi.as_str())?),
            None => None,
        };
        let (scale, wavelengths) = match caps.name("unit").map(|u| u.as_str()) {
            None | Some("m") => (1.0, false),
            Some("km") => (1e3, false),
            Some("lambda") => (1.0, true),
            Some("klambda") => (1e3, true),
            Some(_) => (1e6, true),
        };
        let (min, max) = match (&caps["op"], hi) {
            ("<", None) => (0.0, lo),
            (">", None) => (lo, f64::INFINITY),
            ("", Some(hi)) => (lo, hi),
            _ => {
                return Err(unparsable(
                    "uvrange",
                    expr,
                    format!("\"{token}\" must be A~B, <A or >A"),
                ))
            }
        };
        if min > max {
            return Err(unparsable("uvrange", expr, "range is reversed"));
        }
        ranges.push(UvRange {
            min: min * scale,
            max: max * scale,
            wavelengths,
        });
    }
    Ok(ranges)
}

/// Map requested correlation products to their positions in every polarization setup.
///
/// Returns `None` when the expression selects every product.
fn parse_correlation(
    expr: &str,
    setups: &[Vec<String>],
) -> Result<Option<BTreeMap<usize, Vec<usize>>>, SelectionError> {
    let upper = expr.to_uppercase();
    let mut requested: Vec<String> = vec![];
    for token in tokens(&upper) {
        let product = VIS_MAPPING_PREFIXES
            .iter()
            .find_map(|prefix| token.strip_prefix(prefix))
            .unwrap_or(token);
        if product == "ALL" || product == "*" {
            return Ok(None);
        }
        if product.is_empty() || !product.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(unparsable(
                "correlation",
                expr,
                format!("\"{token}\" is not a correlation product"),
            ));
        }
        if !requested.iter().any(|r| r == product) {
            requested.push(product.to_string());
        }
    }

    let available: BTreeSet<&str> = setups.iter().flatten().map(String::as_str).collect();
    let (kept, missing): (Vec<String>, Vec<String>) = requested
        .into_iter()
        .partition(|product| available.contains(product.as_str()));
    if !missing.is_empty() {
        warn!(
            "correlation products {} are not available and will be ignored",
            missing.join(",")
        );
    }
    if kept.is_empty() {
        return Err(SelectionError::NoCorrelations {
            requested: expr.to_string(),
            available: available.into_iter().collect::<Vec<_>>().join(","),
        });
    }

    Ok(Some(
        setups
            .iter()
            .enumerate()
            .map(|(setup_id, products)| {
                let positions = products
                    .iter()
                    .enumerate()
                    .filter(|(_, product)| kept.contains(*product))
                    .map(|(pos, _)| pos)
                    .collect();
                (setup_id, positions)
            })
            .collect(),
    ))
}
