// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Visflag is a library for flagging interferometric visibilities.
//!
//! Flag agents each combine a data selection with a flagging algorithm. A scheduler runs them over
//! buffers of visibilities, and they write their decisions to flags shared by every agent. Agents
//! can flag or unflag everything they select, or flag antennas shadowed by other antennas.
//!
//! # Examples
//!
//! Here's an example of how to flag the baselines of an antenna, and shadowed antennas.
//!
//! ```rust
//! use std::sync::Arc;
//! use visflag::{
//!     config::{create_agent, AgentConfig},
//!     data::{Antenna, MemoryDataHandler, MetadataCatalog, SharedFlags, SpectralWindow,
//!            VisBufferBuilder},
//!     marlu::{ndarray::Array3, Complex, RADec, XyzGeocentric},
//!     scheduler::{flag_chunks, AgentScheduler},
//!     shadow::ShadowContext,
//! };
//!
//! // describe the array
//! let catalog = MetadataCatalog {
//!     antennas: (0..3)
//!         .map(|i| Antenna {
//!             name: format!("ant{i}"),
//!             position: XyzGeocentric { x: 6378137.0, y: 100.0 * i as f64, z: 0.0 },
//!             diameter: 12.0,
//!         })
//!         .collect(),
//!     spectral_windows: vec![SpectralWindow { num_chans: 4, ref_freq_hz: 1.4e9 }],
//!     polarization_setups: vec![vec!["XX".into(), "YY".into()]],
//!     ..Default::default()
//! };
//!
//! // one buffer with the three baselines
//! let shape = (2, 4, 3);
//! let buffer = VisBufferBuilder::default()
//!     .observation_ids(vec![0_usize; 3])
//!     .scans(vec![1_i32; 3])
//!     .state_ids(vec![0_usize; 3])
//!     .antenna1(vec![0_usize, 0, 1])
//!     .antenna2(vec![1_usize, 2, 2])
//!     .time(vec![4.9e9_f64; 3])
//!     .phase_centre(RADec { ra: 0.0, dec: 0.5 })
//!     .vis(Array3::from_elem(shape, Complex::new(1.0_f32, 0.0)))
//!     .flags(SharedFlags::new(shape))
//!     .build()
//!     .unwrap();
//! let buffer = Arc::new(buffer);
//! let mut handler = MemoryDataHandler::new(catalog.clone());
//! handler.push_chunk(vec![buffer.clone()]);
//!
//! // create the agents
//! let context = Arc::new(ShadowContext::new());
//! let mut scheduler = AgentScheduler::new();
//! for command in ["mode=manual antenna='ant0&ant1'", "mode=shadow background=true"] {
//!     let config = AgentConfig::from_command(command).unwrap();
//!     scheduler.push(create_agent(&config, &catalog, &context).unwrap());
//! }
//!
//! // flag everything
//! let summaries = flag_chunks(&mut handler, &mut scheduler, false).unwrap();
//! assert_eq!(summaries[0].flags, 2 * 4);
//! assert!(buffer.flags.rows()[0]);
//! ```

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use lazy_static::lazy_static;

pub use marlu;

pub mod agent;
pub mod antenna_pairs;
pub mod config;
pub mod data;
pub mod error;
pub mod flag_cube;
pub mod geometry;
pub mod index;
pub mod manual;
pub mod scheduler;
pub mod selection;
pub mod shadow;
pub mod worker;

#[cfg(test)]
mod test_common;

pub use agent::{AgentSummary, FlagAgent, FlagAlgorithm, IterationApproach};
pub use config::{create_agent, AgentConfig, AgentConfigBuilder, AgentMode};
pub use data::{FlagDataHandler, MemoryDataHandler, MetadataCatalog, VisBuffer};
pub use error::{AgentError, ConfigError, FlagError, SelectionError};
pub use flag_cube::{FlagCubeStore, FlagMode};
pub use scheduler::{flag_chunks, AgentScheduler};
pub use selection::{DataSelection, SelectionConfig, SelectionConfigBuilder};
pub use shadow::{ShadowContext, ShadowFlagAlgorithm};
pub use worker::{AgentHandle, ExecutionMode};

lazy_static! {
    #[doc(hidden)]
    pub static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Run the statements, adding the time they took to the duration named `$name`.
#[macro_export]
macro_rules! with_increment_duration {
    ($name:expr, $($s:stmt);+ $(;)?) => {{
        let _now = std::time::Instant::now();
        let _res = { $($s)* };
        *$crate::DURATIONS
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry($name.into())
            .or_insert_with(std::time::Duration::default) += _now.elapsed();
        _res
    }};
}

/// The durations accumulated by [`with_increment_duration`] so far.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
