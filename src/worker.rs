// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running an agent in the caller's thread or in a background worker.
//!
//! In background mode a worker owns a thread and receives buffers one at a time. At most one
//! buffer is in flight per agent: queueing a new buffer first waits for the previous one.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, trace, warn};

use crate::{
    agent::{AgentSummary, FlagAgent},
    data::VisBuffer,
    error::{AgentError, FlagError},
};

/// Where an agent's processing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// In the thread that queues the buffer.
    #[default]
    Synchronous,
    /// In a dedicated worker thread.
    Background,
}

enum Message {
    Process(Arc<VisBuffer>),
    Terminate,
}

struct Worker {
    requests: Sender<Message>,
    completions: Receiver<()>,
    handle: JoinHandle<()>,
    in_flight: bool,
}

fn worker_loop(
    name: String,
    agent: Arc<Mutex<FlagAgent>>,
    requests: Receiver<Message>,
    completions: Sender<()>,
) {
    trace!("worker of agent {name} started");
    for message in requests.iter() {
        match message {
            Message::Process(buffer) => {
                match agent.lock() {
                    Ok(mut agent) => agent.process_buffer(&buffer),
                    Err(_) => {
                        error!("agent {name} is poisoned, stopping its worker");
                        break;
                    }
                }
                if completions.send(()).is_err() {
                    break;
                }
            }
            Message::Terminate => break,
        }
    }
    trace!("worker of agent {name} stopped");
}

/// A [`FlagAgent`] and the means to run it.
pub struct AgentHandle {
    name: String,
    flag_value: bool,
    mode: ExecutionMode,
    agent: Arc<Mutex<FlagAgent>>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("flag_value", &self.flag_value)
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish()
    }
}

impl AgentHandle {
    /// Wrap an agent. Nothing is started until [`Self::start`] or the first buffer.
    pub fn new(agent: FlagAgent, mode: ExecutionMode) -> Self {
        Self {
            name: agent.name().to_string(),
            flag_value: agent.flag_value(),
            mode,
            agent: Arc::new(Mutex::new(agent)),
            worker: None,
        }
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value the agent writes.
    pub fn flag_value(&self) -> bool {
        self.flag_value
    }

    /// Execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Whether a background worker is alive.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn lock(&self) -> Result<MutexGuard<'_, FlagAgent>, AgentError> {
        self.agent.lock().map_err(|_: PoisonError<_>| AgentError::Poisoned {
            agent: self.name.clone(),
        })
    }

    /// Run `f` on the agent. Waits for an in-flight buffer to finish.
    ///
    /// # Errors
    ///
    /// [`AgentError::Poisoned`] if processing panicked.
    pub fn with_agent<R>(&self, f: impl FnOnce(&mut FlagAgent) -> R) -> Result<R, FlagError> {
        let mut agent = self.lock()?;
        Ok(f(&mut agent))
    }

    /// Start the background worker. Does nothing for synchronous agents or if already started.
    ///
    /// # Errors
    ///
    /// [`AgentError::Spawn`] if the thread can't be created.
    pub fn start(&mut self) -> Result<(), FlagError> {
        if self.mode == ExecutionMode::Synchronous || self.worker.is_some() {
            return Ok(());
        }
        let (requests_tx, requests_rx) = bounded(1);
        let (completions_tx, completions_rx) = bounded(1);
        let agent = self.agent.clone();
        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("agent-{}", self.name))
            .spawn(move || worker_loop(name, agent, requests_rx, completions_tx))
            .map_err(|source| AgentError::Spawn {
                agent: self.name.clone(),
                source,
            })?;
        self.worker = Some(Worker {
            requests: requests_tx,
            completions: completions_rx,
            handle,
            in_flight: false,
        });
        Ok(())
    }

    /// Hand a buffer to the agent.
    ///
    /// Synchronous agents process it before returning. Background agents are started if needed,
    /// and the call only blocks while a previous buffer is still being processed.
    ///
    /// # Errors
    ///
    /// Fails if the worker is gone or the agent is poisoned.
    pub fn queue_process(&mut self, buffer: Arc<VisBuffer>) -> Result<(), FlagError> {
        if self.mode == ExecutionMode::Synchronous {
            self.lock()?.process_buffer(&buffer);
            return Ok(());
        }
        self.start()?;
        self.complete_process()?;
        let name = &self.name;
        if let Some(worker) = self.worker.as_mut() {
            worker
                .requests
                .send(Message::Process(buffer))
                .map_err(|_| AgentError::WorkerDisconnected {
                    agent: name.clone(),
                })?;
            worker.in_flight = true;
        }
        Ok(())
    }

    /// Wait until the last queued buffer is done. Returns at once if nothing is in flight.
    ///
    /// # Errors
    ///
    /// [`AgentError::WorkerDisconnected`] if the worker stopped without finishing.
    pub fn complete_process(&mut self) -> Result<(), FlagError> {
        let name = &self.name;
        match self.worker.as_mut() {
            Some(worker) if worker.in_flight => {
                worker.in_flight = false;
                worker
                    .completions
                    .recv()
                    .map_err(|_| AgentError::WorkerDisconnected {
                        agent: name.clone(),
                    })?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Stop the background worker, after it finishes any in-flight buffer. Safe to call twice.
    ///
    /// # Errors
    ///
    /// [`AgentError::WorkerPanicked`] if the worker thread panicked.
    pub fn terminate(&mut self) -> Result<(), FlagError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(()),
        };
        if worker.requests.send(Message::Terminate).is_err() {
            warn!("worker of agent {} had already stopped", self.name);
        }
        drop(worker.requests);
        worker.handle.join().map_err(|_| AgentError::WorkerPanicked {
            agent: self.name.clone(),
        })?;
        Ok(())
    }

    /// Log the chunk summary of the agent.
    ///
    /// # Errors
    ///
    /// [`AgentError::Poisoned`] if processing panicked.
    pub fn chunk_summary(&self) -> Result<(), FlagError> {
        self.with_agent(FlagAgent::chunk_summary)
    }

    /// Log the table summary of the agent.
    ///
    /// # Errors
    ///
    /// [`AgentError::Poisoned`] if processing panicked.
    pub fn table_summary(&self) -> Result<(), FlagError> {
        self.with_agent(FlagAgent::table_summary)
    }

    /// Counters of the agent.
    ///
    /// # Errors
    ///
    /// [`AgentError::Poisoned`] if processing panicked.
    pub fn summary(&self) -> Result<AgentSummary, FlagError> {
        self.with_agent(|agent| agent.summary())
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            error!("{e}");
        }
    }
}
