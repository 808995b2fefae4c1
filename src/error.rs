// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur while configuring or running flag agents.

use thiserror::Error;

/// An expression given for one of the selection keys could not be resolved.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    /// The expression does not follow the grammar of its key.
    #[error("Could not parse {key} selection \"{expression}\": {reason}")]
    Unparsable {
        /// selection key, e.g. `spw`
        key: &'static str,
        /// the offending expression
        expression: String,
        /// what went wrong
        reason: String,
    },

    /// None of the requested correlation products exist in any polarization setup.
    #[error("None of the requested correlation products ({requested}) are available, available products are {available}")]
    NoCorrelations {
        /// the requested products
        requested: String,
        /// the products found in the catalog
        available: String,
    },
}

/// An agent configuration value is missing, unknown or malformed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A key that no agent understands.
    #[error("Unknown configuration key \"{key}\"")]
    UnknownKey {
        /// the key
        key: String,
    },

    /// A value that can't be interpreted for its key.
    #[error("Invalid value for {key}. Expected {expected}, received \"{received}\"")]
    InvalidValue {
        /// the key
        key: String,
        /// a description of what was expected
        expected: String,
        /// the value received
        received: String,
    },

    /// The flagging mode is not known.
    #[error("Unknown flagging mode \"{0}\", expected one of manual, unflag, shadow")]
    UnknownMode(String),

    /// The command string could not be tokenized.
    #[error("Could not split flag command \"{0}\" into tokens")]
    Tokenize(String),

    /// A builder was missing a required field.
    #[error("Could not build configuration: {0}")]
    Builder(String),
}

/// Something went wrong while driving an agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The background worker of an agent is gone, most likely because it panicked.
    #[error("The background worker of agent {agent} has stopped unexpectedly")]
    WorkerDisconnected {
        /// agent name
        agent: String,
    },

    /// The background worker panicked while being joined.
    #[error("The background worker of agent {agent} panicked")]
    WorkerPanicked {
        /// agent name
        agent: String,
    },

    /// The operating system refused to start a worker thread.
    #[error("Could not start the background worker of agent {agent}: {source}")]
    Spawn {
        /// agent name
        agent: String,
        /// the underlying error
        source: std::io::Error,
    },

    /// The lock around an agent was poisoned by a panic.
    #[error("The state of agent {agent} was poisoned by a panic")]
    Poisoned {
        /// agent name
        agent: String,
    },
}

/// Any error this crate can produce.
#[derive(Error, Debug)]
pub enum FlagError {
    /// An error derived from [`SelectionError`]
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// An error derived from [`ConfigError`]
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error derived from [`AgentError`]
    #[error(transparent)]
    Agent(#[from] AgentError),
}
