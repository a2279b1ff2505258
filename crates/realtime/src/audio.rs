//! Audio I/O adapter built on `cpal`.
//!
//! Capture runs on whatever thread the audio backend drives its callback
//! from; the callback only converts, resamples, and chunks samples into
//! fixed-size PCM16 frames, then hands them to the session engine through a
//! non-blocking channel send. It never touches session state. Playback goes
//! through an SPSC ring buffer so enqueuing frames can never block the
//! capture path.

use crate::error::RealtimeError;
use crate::pcm::{self, API_SAMPLE_RATE, FRAME_SAMPLES};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use ringbuf::{
    HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use rubato::Resampler;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fixed audio parameters for one session.
#[derive(Debug, Clone)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub frame_samples: usize,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: API_SAMPLE_RATE,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

/// Owns the physical device streams. `cpal` streams are not `Send`, so this
/// stays with the session owner; the engine task only ever sees the mic
/// channel and the [`PlaybackHandle`].
pub struct AudioIo {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
}

impl AudioIo {
    /// Opens the default capture and playback devices.
    ///
    /// Capture frames are delivered through `mic_tx`; the returned
    /// [`PlaybackHandle`] accepts assistant audio for the speaker. A device
    /// that cannot be opened is a reported, non-fatal error: the caller is
    /// expected to continue the session without audio.
    pub fn open(
        spec: &AudioSpec,
        mic_tx: mpsc::Sender<Vec<i16>>,
    ) -> Result<(Self, PlaybackHandle), RealtimeError> {
        let host = cpal::default_host();

        let input = build_capture_stream(&host, spec, mic_tx)?;
        let (output, playback) = build_playback_stream(&host, spec)?;

        input
            .play()
            .map_err(|e| RealtimeError::Device(e.to_string()))?;
        output
            .play()
            .map_err(|e| RealtimeError::Device(e.to_string()))?;
        info!("audio devices opened");

        Ok((
            Self {
                input: Some(input),
                output: Some(output),
            },
            playback,
        ))
    }

    /// Stops capture and playback and releases the device handles. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stream) = self.input.take() {
            let _ = stream.pause();
        }
        if let Some(stream) = self.output.take() {
            let _ = stream.pause();
        }
    }
}

impl Drop for AudioIo {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Writes assistant audio toward the output device without blocking.
pub struct PlaybackHandle {
    producer: HeapProd<i16>,
    resampler: Option<StreamResampler>,
}

impl PlaybackHandle {
    /// Enqueues PCM16 samples at the API rate. Overflow beyond the ring's
    /// capacity is dropped rather than blocking the caller.
    pub fn write(&mut self, pcm: &[i16]) {
        match &mut self.resampler {
            None => {
                let pushed = self.producer.push_slice(pcm);
                if pushed < pcm.len() {
                    debug!(dropped = pcm.len() - pushed, "playback ring full");
                }
            }
            Some(resampler) => {
                let converted = resampler.process(&pcm::i16_to_f32(pcm));
                let samples = pcm::f32_to_i16(&converted);
                let pushed = self.producer.push_slice(&samples);
                if pushed < samples.len() {
                    debug!(dropped = samples.len() - pushed, "playback ring full");
                }
            }
        }
    }
}

fn build_capture_stream(
    host: &cpal::Host,
    spec: &AudioSpec,
    mic_tx: mpsc::Sender<Vec<i16>>,
) -> Result<cpal::Stream, RealtimeError> {
    let device = host
        .default_input_device()
        .ok_or_else(|| RealtimeError::Device("no input device present".into()))?;
    let (config, sample_format) = pick_input_config(&device, spec.sample_rate)?;
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;

    let resampler = if device_rate != spec.sample_rate {
        info!(device_rate, api_rate = spec.sample_rate, "resampling capture");
        Some(
            StreamResampler::new(device_rate as f64, spec.sample_rate as f64)
                .map_err(|e| RealtimeError::Device(e.to_string()))?,
        )
    } else {
        None
    };
    let state = CaptureState {
        tx: mic_tx,
        resampler,
        frame: Vec::with_capacity(spec.frame_samples),
        frame_samples: spec.frame_samples,
    };

    let err_fn = |e| warn!(error = %e, "input stream error");
    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut state = state;
            device.build_input_stream(
                &config,
                move |data: &[f32], _| state.feed(&downmix(data, channels)),
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut state = state;
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    state.feed(&downmix(&pcm::i16_to_f32(data), channels));
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(RealtimeError::Device(format!(
                "unsupported input sample format {other:?}"
            )));
        }
    }
    .map_err(|e| RealtimeError::Device(e.to_string()))?;
    Ok(stream)
}

fn build_playback_stream(
    host: &cpal::Host,
    spec: &AudioSpec,
) -> Result<(cpal::Stream, PlaybackHandle), RealtimeError> {
    let device = host
        .default_output_device()
        .ok_or_else(|| RealtimeError::Device("no output device present".into()))?;
    let (config, sample_format) = pick_output_config(&device, spec.sample_rate)?;
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;

    // Several seconds of headroom so streamed chunks are absorbed even when
    // the device callback lags.
    let ring = HeapRb::<i16>::new(device_rate as usize * 4);
    let (producer, consumer) = ring.split();

    let resampler = if device_rate != spec.sample_rate {
        info!(device_rate, api_rate = spec.sample_rate, "resampling playback");
        Some(
            StreamResampler::new(spec.sample_rate as f64, device_rate as f64)
                .map_err(|e| RealtimeError::Device(e.to_string()))?,
        )
    } else {
        None
    };

    let err_fn = |e| warn!(error = %e, "output stream error");
    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut consumer = consumer;
            device.build_output_stream(
                &config,
                move |out: &mut [f32], _| {
                    for frame in out.chunks_mut(channels) {
                        let value = consumer
                            .try_pop()
                            .map(|s| s as f32 / 32768.0)
                            .unwrap_or(0.0);
                        frame.fill(value);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut consumer = consumer;
            device.build_output_stream(
                &config,
                move |out: &mut [i16], _| {
                    for frame in out.chunks_mut(channels) {
                        let value = consumer.try_pop().unwrap_or(0);
                        frame.fill(value);
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(RealtimeError::Device(format!(
                "unsupported output sample format {other:?}"
            )));
        }
    }
    .map_err(|e| RealtimeError::Device(e.to_string()))?;

    Ok((
        stream,
        PlaybackHandle {
            producer,
            resampler,
        },
    ))
}

/// Prefers a mono config at the requested rate, falling back to the device
/// default when unsupported.
fn pick_input_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<(StreamConfig, SampleFormat), RealtimeError> {
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.channels() == 1
                && range.min_sample_rate().0 <= rate
                && range.max_sample_rate().0 >= rate
            {
                let cfg = range.with_sample_rate(SampleRate(rate));
                return Ok((cfg.config(), cfg.sample_format()));
            }
        }
    }
    let default = device
        .default_input_config()
        .map_err(|e| RealtimeError::Device(e.to_string()))?;
    Ok((default.config(), default.sample_format()))
}

fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<(StreamConfig, SampleFormat), RealtimeError> {
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.channels() == 1
                && range.min_sample_rate().0 <= rate
                && range.max_sample_rate().0 >= rate
            {
                let cfg = range.with_sample_rate(SampleRate(rate));
                return Ok((cfg.config(), cfg.sample_format()));
            }
        }
    }
    let default = device
        .default_output_config()
        .map_err(|e| RealtimeError::Device(e.to_string()))?;
    Ok((default.config(), default.sample_format()))
}

/// Per-stream capture state living inside the device callback.
struct CaptureState {
    tx: mpsc::Sender<Vec<i16>>,
    resampler: Option<StreamResampler>,
    frame: Vec<i16>,
    frame_samples: usize,
}

impl CaptureState {
    /// Accepts mono samples at the device rate and emits fixed-size PCM16
    /// frames at the API rate. Frames are handed off with `try_send`; if the
    /// engine is gone or saturated the frame is dropped, never blocked on.
    fn feed(&mut self, mono: &[f32]) {
        let at_api_rate = match &mut self.resampler {
            Some(resampler) => resampler.process(mono),
            None => mono.to_vec(),
        };
        for &sample in &at_api_rate {
            let value = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            self.frame.push(value);
            if self.frame.len() == self.frame_samples {
                let frame =
                    std::mem::replace(&mut self.frame, Vec::with_capacity(self.frame_samples));
                let _ = self.tx.try_send(frame);
            }
        }
    }
}

/// Buffered fixed-chunk wrapper around `rubato::FastFixedIn`.
struct StreamResampler {
    inner: rubato::FastFixedIn<f32>,
    pending: Vec<f32>,
    chunk: usize,
}

impl StreamResampler {
    fn new(in_rate: f64, out_rate: f64) -> anyhow::Result<Self> {
        let chunk = 1024;
        Ok(Self {
            inner: pcm::resampler(in_rate, out_rate, chunk)?,
            pending: Vec::with_capacity(chunk * 2),
            chunk,
        })
    }

    /// Buffers input until a full chunk is available, then resamples.
    /// Output may lag input by up to one chunk.
    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= self.chunk {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk).collect();
            match self.inner.process(&[chunk], None) {
                Ok(mut resampled) => out.append(&mut resampled[0]),
                Err(e) => warn!(error = %e, "resampler failed, dropping chunk"),
            }
        }
        out
    }
}

/// Averages interleaved channels down to mono. Identity for mono input.
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn downmix_averages_stereo() {
        let stereo = [0.5f32, -0.5, 1.0, 0.0];
        let mono = downmix(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert_abs_diff_eq!(mono[0], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn downmix_is_identity_for_mono() {
        let mono = [0.25f32, -0.25];
        assert_eq!(downmix(&mono, 1), mono.to_vec());
    }

    #[test]
    fn stream_resampler_halves_rate() {
        let mut resampler = StreamResampler::new(48_000.0, 24_000.0).unwrap();
        let input = vec![0.1f32; 2048];
        let output = resampler.process(&input);
        // Two full chunks in, roughly half the samples out.
        assert!((output.len() as i64 - 1024).unsigned_abs() < 32);
    }

    #[test]
    fn stream_resampler_buffers_partial_chunks() {
        let mut resampler = StreamResampler::new(48_000.0, 24_000.0).unwrap();
        assert!(resampler.process(&vec![0.0f32; 512]).is_empty());
        assert!(!resampler.process(&vec![0.0f32; 512]).is_empty());
    }

    #[tokio::test]
    async fn capture_state_emits_fixed_frames() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut state = CaptureState {
            tx,
            resampler: None,
            frame: Vec::new(),
            frame_samples: 4,
        };
        state.feed(&[0.5, 0.5, 0.5]);
        assert!(rx.try_recv().is_err());
        state.feed(&[0.5, 0.5, 0.5, 0.5, 0.5]);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), 4);
        assert_eq!(frame[0], 16384);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), 4);
    }

    #[tokio::test]
    async fn capture_state_drops_when_channel_full() {
        let (tx, _rx) = mpsc::channel(1);
        let mut state = CaptureState {
            tx,
            resampler: None,
            frame: Vec::new(),
            frame_samples: 2,
        };
        // Third frame overflows the capacity-1 channel; must not panic or block.
        state.feed(&[0.0; 6]);
    }
}
