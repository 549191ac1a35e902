use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;


pub use codes::{describe_error_code, ErrorCode};

/// Exit code used when a run ends in the aborted state
pub const EXIT_ABORTED: i32 = 3;

/// Exit code used when a run is stopped by an interrupt
pub const EXIT_INTERRUPTED: i32 = 130;

/// The unified error type for the simdrive application
#[derive(Error, Debug)]
pub enum SimError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Generation error: {message}")]
    Generation {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Checkpoint error: {message}")]
    Checkpoint {
        code: u16,
        message: String,
        simulation: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Engine error: {message}")]
    Engine {
        code: u16,
        message: String,
        step: Option<u64>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Run error: {message}")]
    Run {
        code: u16,
        message: String,
        destination: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SimError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message, None)
    }

    /// Create a configuration error with specific code and path
    pub fn config_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create a generation error with specific code
    pub fn generation(code: u16, message: impl Into<String>) -> Self {
        Self::Generation {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a checkpoint error with specific code and simulation
    pub fn checkpoint(code: u16, message: impl Into<String>, simulation: Option<String>) -> Self {
        Self::Checkpoint {
            code,
            message: message.into(),
            simulation,
            source: None,
        }
    }

    /// Create an engine error with specific code and step
    pub fn engine(code: u16, message: impl Into<String>, step: Option<u64>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
            step,
            source: None,
        }
    }

    /// Create a run control error
    pub fn run(code: u16, message: impl Into<String>, destination: Option<String>) -> Self {
        Self::Run {
            code,
            message: message.into(),
            destination,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Generation { source: src, .. }
            | Self::Checkpoint { source: src, .. }
            | Self::Engine { source: src, .. }
            | Self::Run { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Generation { message, .. }
            | Self::Checkpoint { message, .. }
            | Self::Engine { message, .. }
            | Self::Run { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Generation { code, .. }
            | Self::Checkpoint { code, .. }
            | Self::Engine { code, .. }
            | Self::Run { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Run { code, .. } if *code == ErrorCode::RUN_ABORTED => EXIT_ABORTED,
            Self::Run { code, .. } if *code == ErrorCode::RUN_INTERRUPTED => EXIT_INTERRUPTED,
            Self::Config { .. } => 2,
            Self::Generation { .. } => 4,
            Self::Checkpoint { .. } => 5,
            Self::Engine { .. } => 6,
            Self::Run { .. } => 7,
            Self::Other { .. } => 1,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, path, .. } => match path {
                Some(p) => format!("Configuration problem in {}: {}", p.display(), message),
                None => format!("Configuration problem: {}", message),
            },
            Self::Generation { message, .. } => format!("Generation service problem: {}", message),
            Self::Checkpoint {
                message,
                simulation,
                ..
            } => match simulation {
                Some(sim) => format!("Checkpoint error for '{}': {}", sim, message),
                None => format!("Checkpoint error: {}", message),
            },
            Self::Engine { message, step, .. } => match step {
                Some(s) => format!("Simulation failed at step {}: {}", s, message),
                None => format!("Simulation error: {}", message),
            },
            Self::Run {
                message,
                destination,
                ..
            } => match destination {
                Some(dest) => format!("Run '{}': {}", dest, message),
                None => format!("Run error: {}", message),
            },
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        let mut msg = format!("{:#}", self);
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            msg.push_str(&format!("\n  caused by: {}", err));
            source = err.source();
        }
        msg
    }
}

impl From<crate::checkpoint::CheckpointError> for SimError {
    fn from(err: crate::checkpoint::CheckpointError) -> Self {
        use crate::checkpoint::CheckpointError;

        let (code, simulation) = match &err {
            CheckpointError::NotFound { simulation } => {
                (ErrorCode::CHECKPOINT_NOT_FOUND, Some(simulation.clone()))
            }
            CheckpointError::AlreadyExists { simulation }
            | CheckpointError::InvalidName { simulation } => {
                (ErrorCode::CHECKPOINT_GENERIC, Some(simulation.clone()))
            }
            CheckpointError::Corrupted { simulation, .. } => {
                (ErrorCode::CHECKPOINT_CORRUPTED, Some(simulation.clone()))
            }
            CheckpointError::OrderViolation { simulation, .. } => {
                (ErrorCode::CHECKPOINT_ORDER_VIOLATION, Some(simulation.clone()))
            }
            CheckpointError::IncompatibleVersion { simulation, .. } => {
                (ErrorCode::CHECKPOINT_INCOMPATIBLE_VERSION, Some(simulation.clone()))
            }
            CheckpointError::Io { .. } => (ErrorCode::CHECKPOINT_IO_ERROR, None),
            CheckpointError::Serialization(_) => (ErrorCode::CHECKPOINT_CORRUPTED, None),
        };

        SimError::checkpoint(code, err.to_string(), simulation).with_source(err)
    }
}
