use std::error::Error as StdError;
use thiserror::Error;

use crate::port::PortError;

pub type EncoderResult<T> = Result<T, EncoderError>;

/// Failure taxonomy for the encoder pipeline.
///
/// `Config` and `Resource` are surfaced synchronously from `start` and leave
/// the encoder in `Idle`. `Sink` and `Port` originate on the callback context
/// and are stored as the pending error until the controlling context observes
/// them. `Protocol` covers misuse of the state machine; the encoder keeps its
/// prior valid state.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("configuration: {message}")]
    Config { message: String },
    #[error("resource: {source}")]
    Resource {
        #[from]
        source: PortError,
    },
    #[error("sink write failed: {source}")]
    Sink {
        #[source]
        source: std::io::Error,
    },
    #[error("port fault: {message}")]
    Port { message: String },
    #[error("protocol: {message}")]
    Protocol { message: String },
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl EncoderError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn sink(source: std::io::Error) -> Self {
        Self::Sink { source }
    }

    pub fn port(message: impl Into<String>) -> Self {
        Self::Port {
            message: message.into(),
        }
    }

    pub fn with_context(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Context {
            context: context.into(),
            source: source.into(),
        }
    }
}
