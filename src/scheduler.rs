// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Driving a list of agents over buffers.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, trace};

use crate::{
    agent::AgentSummary,
    data::{FlagDataHandler, VisBuffer},
    error::FlagError,
    worker::AgentHandle,
};

/// An ordered collection of agents, applied to buffers in registration order.
#[derive(Debug, Default)]
pub struct AgentScheduler {
    agents: Vec<AgentHandle>,
}

impl AgentScheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent after every agent already registered.
    pub fn push(&mut self, agent: AgentHandle) {
        self.agents.push(agent);
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether there are no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agent names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(AgentHandle::name).collect()
    }

    /// Start every background agent.
    ///
    /// # Errors
    ///
    /// The first agent that fails to start.
    pub fn start(&mut self) -> Result<(), FlagError> {
        for agent in &mut self.agents {
            agent.start()?;
        }
        Ok(())
    }

    /// Stop every background agent. Every agent is stopped even if some fail.
    ///
    /// # Errors
    ///
    /// The first failure.
    pub fn terminate(&mut self) -> Result<(), FlagError> {
        let mut result = Ok(());
        for agent in &mut self.agents {
            if let Err(e) = agent.terminate() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Hand `buffer` to every agent.
    ///
    /// # Errors
    ///
    /// The first agent that fails.
    pub fn queue_process(&mut self, buffer: &Arc<VisBuffer>) -> Result<(), FlagError> {
        for agent in &mut self.agents {
            agent.queue_process(buffer.clone())?;
        }
        Ok(())
    }

    /// Wait for every agent to finish its buffer.
    ///
    /// # Errors
    ///
    /// The first agent that fails.
    pub fn complete_process(&mut self) -> Result<(), FlagError> {
        for agent in &mut self.agents {
            agent.complete_process()?;
        }
        Ok(())
    }

    /// Run every agent on `buffer`.
    ///
    /// With `sequential`, each agent finishes before the next starts. Otherwise unflagging agents
    /// run first, then flagging agents, the agents of each group running concurrently when they
    /// are in background mode.
    ///
    /// # Errors
    ///
    /// The first agent that fails.
    pub fn apply(&mut self, buffer: &Arc<VisBuffer>, sequential: bool) -> Result<(), FlagError> {
        if sequential {
            for agent in &mut self.agents {
                agent.queue_process(buffer.clone())?;
                agent.complete_process()?;
            }
            return Ok(());
        }
        for flag_value in [false, true] {
            let (mut group, _): (Vec<&mut AgentHandle>, Vec<_>) = self
                .agents
                .iter_mut()
                .partition(|agent| agent.flag_value() == flag_value);
            for agent in group.iter_mut() {
                agent.queue_process(buffer.clone())?;
            }
            for agent in group.iter_mut() {
                agent.complete_process()?;
            }
        }
        Ok(())
    }

    /// Turn profiling on or off for every agent.
    ///
    /// # Errors
    ///
    /// The first poisoned agent.
    pub fn set_profiling(&self, enable: bool) -> Result<(), FlagError> {
        for agent in &self.agents {
            agent.with_agent(|agent| agent.set_profiling(enable))?;
        }
        Ok(())
    }

    /// Turn check mode on or off for every agent.
    ///
    /// # Errors
    ///
    /// The first poisoned agent.
    pub fn set_check_mode(&self, enable: bool) -> Result<(), FlagError> {
        for agent in &self.agents {
            agent.with_agent(|agent| agent.set_check_mode(enable))?;
        }
        Ok(())
    }

    /// Log the chunk summary of every agent.
    ///
    /// # Errors
    ///
    /// The first poisoned agent.
    pub fn chunk_summary(&self) -> Result<(), FlagError> {
        for agent in &self.agents {
            agent.chunk_summary()?;
        }
        Ok(())
    }

    /// Log the table summary of every agent.
    ///
    /// # Errors
    ///
    /// The first poisoned agent.
    pub fn table_summary(&self) -> Result<(), FlagError> {
        for agent in &self.agents {
            agent.table_summary()?;
        }
        Ok(())
    }

    /// Counters of every agent, in registration order.
    ///
    /// # Errors
    ///
    /// The first poisoned agent.
    pub fn summaries(&self) -> Result<Vec<AgentSummary>, FlagError> {
        self.agents.iter().map(AgentHandle::summary).collect()
    }
}

/// Run `scheduler` over every chunk of `handler`.
///
/// Chunk summaries are logged after each chunk, and a table summary at the end. Agents are
/// terminated before returning.
///
/// # Errors
///
/// The first agent failure, after terminating every agent.
pub fn flag_chunks(
    handler: &mut dyn FlagDataHandler,
    scheduler: &mut AgentScheduler,
    draw_progress: bool,
) -> Result<Vec<AgentSummary>, FlagError> {
    let result = run_chunks(handler, scheduler, draw_progress);
    let terminated = scheduler.terminate();
    let summaries = result?;
    terminated?;
    Ok(summaries)
}

fn run_chunks(
    handler: &mut dyn FlagDataHandler,
    scheduler: &mut AgentScheduler,
    draw_progress: bool,
) -> Result<Vec<AgentSummary>, FlagError> {
    let draw_target = if draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let progress = ProgressBar::with_draw_target(
        handler.remaining_buffers().map(|len| len as u64),
        draw_target,
    )
    .with_style(
        ProgressStyle::with_template(
            "{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    )
    .with_position(0)
    .with_message("flagging buffers");

    info!(
        "flagging with {} agents: {}",
        scheduler.len(),
        scheduler.names().join(", ")
    );
    scheduler.start()?;
    let mut num_chunks = 0;
    while let Some(chunk) = handler.next_chunk() {
        trace!("chunk {num_chunks} has {} buffers", chunk.len());
        for buffer in &chunk {
            scheduler.apply(buffer, false)?;
            progress.inc(1);
        }
        scheduler.chunk_summary()?;
        num_chunks += 1;
    }
    progress.finish_with_message("flagging complete");
    let summaries = scheduler.summaries()?;
    scheduler.table_summary()?;
    info!("flagged {num_chunks} chunks");
    Ok(summaries)
}
