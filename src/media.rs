//! Local audio acquisition.
//!
//! The transport only needs mono f32 frames and a way to stop the device, so
//! the capture backend sits behind [`MediaSource`] / [`LocalMedia`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

#[cfg(feature = "utils")]
mod microphone;

#[cfg(feature = "utils")]
pub use microphone::Microphone;

/// Acoustic conditioning requested for the capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A live local capture. Owned exclusively by one transport.
pub trait LocalMedia: Send {
    fn sample_rate(&self) -> u32;

    /// Hands out the frame receiver. Only the first call returns it.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>>;

    /// Stops the device. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fails with [`crate::Error::Media`] when the device is denied or unavailable.
    async fn acquire(&self, constraints: &AudioConstraints) -> Result<Box<dyn LocalMedia>>;
}
