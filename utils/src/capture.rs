use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::mpsc;

use crate::audio::downmix;
use crate::device;

/// A running microphone stream delivering mono f32 frames.
///
/// `cpal::Stream` is not `Send`, so the stream lives on its own thread and is
/// dropped there when [`InputCapture::stop`] is called or the handle is dropped.
pub struct InputCapture {
    sample_rate: u32,
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    worker: StreamWorker,
}

impl InputCapture {
    /// Opens the input device and starts capturing. Blocks until the device is playing.
    pub fn open(device_name: Option<String>, capacity: usize) -> anyhow::Result<Self> {
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (worker, sample_rate) =
            spawn_worker("audio-capture", move || build_stream(device_name.as_deref(), frame_tx))?;

        Ok(Self {
            sample_rate,
            frames: Some(frame_rx),
            worker,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hands out the frame receiver. Only the first call returns it.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.frames.take()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Signals the capture thread and returns without waiting for the device to close.
    pub fn stop(&mut self) {
        self.worker.stop();
    }
}

impl Drop for InputCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to the thread that owns a stream.
struct StreamWorker {
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl StreamWorker {
    fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// Builds a stream on a named thread and keeps it there until stopped.
/// Blocks until `build` has finished and returns the stream's sample rate.
fn spawn_worker<S, F>(name: &str, build: F) -> anyhow::Result<(StreamWorker, u32)>
where
    F: FnOnce() -> anyhow::Result<(S, u32)> + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel::<anyhow::Result<u32>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new().name(name.to_string()).spawn(move || {
        let stream = match build() {
            Ok((stream, sample_rate)) => {
                let _ = ready_tx.send(Ok(sample_rate));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        // Either an explicit stop or the sender being dropped ends capture.
        let _ = stop_rx.recv();
        drop(stream);
        tracing::debug!("Input stream released");
    })?;

    let sample_rate = match ready_rx.recv() {
        Ok(result) => result?,
        Err(_) => return Err(anyhow::anyhow!("capture thread exited before the stream started")),
    };
    Ok((
        StreamWorker {
            stop_tx: Some(stop_tx),
        },
        sample_rate,
    ))
}

fn build_stream(
    device_name: Option<&str>,
    frame_tx: mpsc::Sender<Vec<f32>>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let input = device::get_or_default_input(device_name)?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let default_config = input.default_input_config()?;
    let input_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channel_count = input_config.channels as usize;
    tracing::debug!("Input stream config: {:?}", &input_config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let audio = downmix(data, channel_count);
        match frame_tx.try_send(audio) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Audio frame dropped, consumer is behind");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    };

    let stream = input.build_input_stream(
        &input_config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((stream, input_config.sample_rate.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// A stream whose release takes a while, like a device closing.
    struct SlowRelease {
        released: Arc<AtomicBool>,
    }

    impl Drop for SlowRelease {
        fn drop(&mut self) {
            std::thread::sleep(Duration::from_millis(200));
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_does_not_wait_for_release() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let (mut worker, sample_rate) =
            spawn_worker("test-capture", move || Ok((SlowRelease { released: flag }, 16_000)))
                .unwrap();
        assert_eq!(sample_rate, 16_000);
        assert!(worker.is_running());

        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(!worker.is_running());
        worker.stop();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !released.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "stream was never released");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn build_failure_is_reported() {
        let result =
            spawn_worker::<(), _>("test-capture", || Err(anyhow::anyhow!("no input device")));
        match result {
            Err(e) => assert!(e.to_string().contains("no input device")),
            Ok(_) => panic!("worker started without a stream"),
        }
    }
}
