use std::collections::VecDeque;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Clock rate of the G.711 mu-law (PCMU) payload sent on the audio track.
pub const PCMU_SAMPLE_RATE: u32 = 8000;
/// Duration of one RTP audio sample in milliseconds.
pub const FRAME_MS: u64 = 20;
/// Number of PCMU samples in one frame.
pub const PCMU_FRAME_SAMPLES: usize = (PCMU_SAMPLE_RATE as u64 * FRAME_MS / 1000) as usize;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Feeds arbitrarily sized buffers through a fixed-chunk resampler.
pub struct StreamResampler {
    resampler: Option<FastFixedIn<f32>>,
    pending: VecDeque<f32>,
    chunk_size: usize,
}

impl StreamResampler {
    pub fn new(
        in_sampling_rate: u32,
        out_sampling_rate: u32,
        chunk_size: usize,
    ) -> anyhow::Result<Self> {
        let resampler = if in_sampling_rate == out_sampling_rate {
            None
        } else {
            Some(create_resampler(in_sampling_rate as f64, out_sampling_rate as f64, chunk_size)?)
        };
        Ok(Self {
            resampler,
            pending: VecDeque::with_capacity(chunk_size * 2),
            chunk_size,
        })
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };

        self.pending.extend(samples.iter().copied());
        let mut resampled = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(out) => {
                    if let Some(channel) = out.first() {
                        resampled.extend_from_slice(channel);
                    }
                }
                Err(e) => tracing::warn!("Failed to resample chunk: {}", e),
            }
        }
        resampled
    }
}

/// Encodes one linear sample as G.711 mu-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(MULAW_CLIP) + MULAW_BIAS;

    let segment = ((value >> 7) & 0xFF) as u8;
    let exponent = 7 - segment.leading_zeros() as i32;
    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn encode_mulaw(pcm32: &[f32]) -> Vec<u8> {
    pcm32
        .iter()
        .map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            linear_to_mulaw(v)
        })
        .collect()
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[derive(Debug, Clone)]
struct AutoGain {
    target_rms: f32,
    max_gain: f32,
    gain: f32,
}

/// Software conditioning applied to captured frames: automatic gain and a noise gate.
#[derive(Debug, Clone, Default)]
pub struct Conditioner {
    auto_gain: Option<AutoGain>,
    gate_threshold: Option<f32>,
}

impl Conditioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_gain(mut self, target_rms: f32, max_gain: f32) -> Self {
        self.auto_gain = Some(AutoGain {
            target_rms,
            max_gain,
            gain: 1.0,
        });
        self
    }

    pub fn with_noise_gate(mut self, threshold: f32) -> Self {
        self.gate_threshold = Some(threshold);
        self
    }

    pub fn is_passthrough(&self) -> bool {
        self.auto_gain.is_none() && self.gate_threshold.is_none()
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        let level = rms(samples);

        if let Some(threshold) = self.gate_threshold {
            if level < threshold {
                samples.iter_mut().for_each(|s| *s = 0.0);
                return;
            }
        }

        if let Some(agc) = self.auto_gain.as_mut() {
            if level > 1e-4 {
                let desired = (agc.target_rms / level).min(agc.max_gain);
                // Smooth towards the desired gain so words don't pump.
                agc.gain += (desired - agc.gain) * 0.2;
            }
            let gain = agc.gain;
            samples.iter_mut().for_each(|s| *s = (*s * gain).clamp(-1.0, 1.0));
        }
    }
}
