use async_trait::async_trait;
use realtime_voice_utils::audio::Conditioner;
use realtime_voice_utils::capture::InputCapture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::{AudioConstraints, LocalMedia, MediaSource};

const NOISE_GATE_THRESHOLD: f32 = 0.005;
const AGC_TARGET_RMS: f32 = 0.08;
const AGC_MAX_GAIN: f32 = 8.0;

/// The host microphone, opened through cpal.
pub struct Microphone {
    device: Option<String>,
    capacity: usize,
}

impl Microphone {
    pub fn new(device: Option<String>, capacity: usize) -> Self {
        Self { device, capacity }
    }
}

#[async_trait]
impl MediaSource for Microphone {
    async fn acquire(&self, constraints: &AudioConstraints) -> Result<Box<dyn LocalMedia>> {
        let device = self.device.clone();
        let capacity = self.capacity;
        let capture = tokio::task::spawn_blocking(move || InputCapture::open(device, capacity))
            .await
            .map_err(|e| Error::Media(e.to_string()))?
            .map_err(|e| Error::Media(e.to_string()))?;

        tracing::info!(sample_rate = capture.sample_rate(), "Microphone acquired");
        Ok(Box::new(MicrophoneTrack::new(capture, constraints, capacity)))
    }
}

fn conditioner_for(constraints: &AudioConstraints) -> Conditioner {
    let mut conditioner = Conditioner::new();
    if constraints.auto_gain_control {
        conditioner = conditioner.with_auto_gain(AGC_TARGET_RMS, AGC_MAX_GAIN);
    }
    if constraints.noise_suppression {
        conditioner = conditioner.with_noise_gate(NOISE_GATE_THRESHOLD);
    }
    if constraints.echo_cancellation {
        // No host AEC through cpal; capture is halted while the assistant responds.
        tracing::debug!("Echo cancellation requested, relying on turn-taking");
    }
    conditioner
}

struct MicrophoneTrack {
    capture: InputCapture,
    sample_rate: u32,
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    forward: Option<JoinHandle<()>>,
}

impl MicrophoneTrack {
    fn new(mut capture: InputCapture, constraints: &AudioConstraints, capacity: usize) -> Self {
        let sample_rate = capture.sample_rate();
        let mut conditioner = conditioner_for(constraints);
        let raw = capture.take_frames();

        let (frames, forward) = match raw {
            Some(raw) if conditioner.is_passthrough() => (Some(raw), None),
            Some(mut raw) => {
                let (tx, rx) = mpsc::channel(capacity);
                let forward = tokio::spawn(async move {
                    while let Some(mut frame) = raw.recv().await {
                        conditioner.process(&mut frame);
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                (Some(rx), Some(forward))
            }
            None => (None, None),
        };

        Self {
            capture,
            sample_rate,
            frames,
            forward,
        }
    }
}

impl LocalMedia for MicrophoneTrack {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.frames.take()
    }

    fn stop(&mut self) {
        if self.capture.is_running() {
            tracing::debug!("Stopping microphone");
        }
        self.capture.stop();
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
    }

    fn is_live(&self) -> bool {
        self.capture.is_running()
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        self.stop();
    }
}
