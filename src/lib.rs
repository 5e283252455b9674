//! Realtime voice session controller.
//!
//! Negotiates a peer connection to a realtime inference service, drives one
//! voice session through its lifecycle and reassembles the streamed response
//! into a single message for the host application.

mod config;
mod consts;
mod error;
mod media;
mod reassembler;
mod session;
mod token;
mod transport;

pub use realtime_voice_types as types;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use error::{Error, Result};
pub use media::{AudioConstraints, LocalMedia, MediaSource};
pub use reassembler::{clean, Reassembler, Reassembly};
pub use session::{
    Affordance, ConnectionState, SessionController, SessionHandle, SessionObserver, Status,
};
pub use token::{HttpTokenProvider, StaticTokenProvider, TokenProvider};
pub use transport::{
    ConnectivityState, EventSink, Negotiator, SdpExchange, Transport, TransportEvent,
};

#[cfg(feature = "utils")]
pub use media::Microphone;

#[cfg(feature = "webrtc")]
pub use transport::WebRtcNegotiator;

#[cfg(feature = "utils")]
pub use realtime_voice_utils as utils;
