use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Host, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use futures_util::Stream;
use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pcm::CAPTURE_SAMPLE_RATE;

/// Samples accumulated before a buffer is handed to the main thread.
pub const CAPTURE_BUFFER_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Audio capture configuration
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    /// Device ID to capture from (None = default device)
    pub device_id: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u32,
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub id: String,
    pub is_default: bool,
    pub channel_count: u32,
}

/// Fixed-size accumulation buffer driven from the real-time audio callback.
///
/// Every invocation copies all available input samples at the write cursor;
/// whenever the cursor reaches capacity the full buffer is copied out
/// through `on_full` and the cursor resets. The callback itself never
/// decides to stop — capture ends by dropping the stream.
#[derive(Debug)]
pub struct CaptureBuffer {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::with_capacity(CAPTURE_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
        }
    }

    /// Samples currently waiting for the buffer to fill.
    pub fn pending(&self) -> usize {
        self.write_pos
    }

    pub fn push(&mut self, samples: &[f32], mut on_full: impl FnMut(Vec<f32>)) {
        for &sample in samples {
            self.buffer[self.write_pos] = sample;
            self.write_pos += 1;

            if self.write_pos == self.buffer.len() {
                on_full(self.buffer.clone());
                self.write_pos = 0;
            }
        }
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Microphone capture using CPAL. Filled buffers cross to the orchestration
/// context over an async channel; nothing is shared with the audio thread
/// by direct memory access.
pub struct CpalCapture {
    #[allow(dead_code)]
    config: CaptureConfig,
    stream: Option<CpalStream>,
    rx: mpsc::Receiver<Vec<f32>>,
    _host: Host,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        // Get the device
        let device = if let Some(id) = &config.device_id {
            host.devices()
                .map_err(|e| CaptureError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == *id).unwrap_or(false))
                .ok_or_else(|| CaptureError::Device(format!("Device not found: {}", id)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| CaptureError::Device("No default input device found".into()))?
        };

        // Channel for filled buffers crossing to the main thread
        let (tx, rx) = mpsc::channel(32);
        let tx = Arc::new(Mutex::new(tx));

        let supported_configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| CaptureError::Config(e.to_string()))?
            .collect();

        // Prefer a config with native support for our capture rate
        let mut supported_config = None;
        for cfg in &supported_configs {
            if cfg.min_sample_rate().0 <= CAPTURE_SAMPLE_RATE
                && cfg.max_sample_rate().0 >= CAPTURE_SAMPLE_RATE
            {
                supported_config = Some(cfg.with_sample_rate(cpal::SampleRate(CAPTURE_SAMPLE_RATE)));
                log::info!(
                    "Found config with native {}Hz support: {:?}",
                    CAPTURE_SAMPLE_RATE,
                    cfg.sample_format()
                );
                break;
            }
        }

        if supported_config.is_none() {
            supported_config = Some(
                device
                    .default_input_config()
                    .map_err(|e| CaptureError::Config(e.to_string()))?,
            );
        }
        let supported_config = supported_config
            .ok_or_else(|| CaptureError::Config("No usable input config".into()))?;

        if config.channel >= u32::from(supported_config.channels()) {
            return Err(CaptureError::Config(format!(
                "Selected channel {} is not available (device has {} channels)",
                config.channel,
                supported_config.channels()
            )));
        }

        let stream_config = cpal::StreamConfig {
            channels: supported_config.channels(),
            sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = move |err| {
            log::error!("Audio capture stream error: {}", err);
        };

        log::info!(
            "Audio capture configured: {} channels @ {}Hz (format: {:?})",
            stream_config.channels,
            CAPTURE_SAMPLE_RATE,
            supported_config.sample_format()
        );

        let stream = match supported_config.sample_format() {
            SampleFormat::I16 => Self::build_stream::<i16>(
                &device,
                &stream_config,
                tx.clone(),
                config.channel,
                err_fn,
            )?,
            SampleFormat::U16 => Self::build_stream::<u16>(
                &device,
                &stream_config,
                tx.clone(),
                config.channel,
                err_fn,
            )?,
            SampleFormat::F32 => Self::build_stream::<f32>(
                &device,
                &stream_config,
                tx.clone(),
                config.channel,
                err_fn,
            )?,
            _ => return Err(CaptureError::Config("Unsupported sample format".into())),
        };

        stream
            .play()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        Ok(Self {
            config,
            stream: Some(stream),
            rx,
            _host: host,
        })
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        tx: Arc<Mutex<mpsc::Sender<Vec<f32>>>>,
        channel: u32,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static + Copy,
    ) -> Result<CpalStream, CaptureError>
    where
        T: Sample + SizedSample + Send + Sync + 'static,
        f32: FromSample<T>,
    {
        let mut accumulator = CaptureBuffer::new();
        let channels = config.channels as usize;

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    // Extract the selected channel and convert to f32
                    for frame in data.chunks(channels) {
                        if let Some(sample) = frame.get(channel as usize) {
                            let value = f32::from_sample(*sample);
                            accumulator.push(&[value], |full| {
                                if let Ok(tx) = tx.lock() {
                                    // Never block the audio thread; a full
                                    // channel drops the buffer instead.
                                    let _ = tx.try_send(full);
                                }
                            });
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::Stream(e.to_string()))
    }

    /// Stop capturing by tearing down the stream.
    pub fn stop(&mut self) {
        self.stream.take();
    }

    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let default_device = host.default_input_device();

        let mut result = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                let config = device
                    .default_input_config()
                    .map_err(|e| CaptureError::Config(e.to_string()))?;

                result.push(AudioDeviceInfo {
                    name: name.clone(),
                    id: name.clone(),
                    is_default: default_device
                        .as_ref()
                        .map(|d| d.name().unwrap_or_default())
                        == Some(name),
                    channel_count: u32::from(config.channels()),
                });
            }
        }

        Ok(result)
    }
}

impl Stream for CpalCapture {
    type Item = Vec<f32>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiple_flushes_in_order() {
        let mut buffer = CaptureBuffer::new();
        let mut flushes: Vec<Vec<f32>> = Vec::new();

        // 3 buffers' worth, values encode push order
        let samples: Vec<f32> = (0..CAPTURE_BUFFER_SIZE * 3).map(|i| i as f32).collect();
        buffer.push(&samples, |full| flushes.push(full));

        assert_eq!(flushes.len(), 3);
        for (i, flush) in flushes.iter().enumerate() {
            assert_eq!(flush.len(), CAPTURE_BUFFER_SIZE);
            assert_eq!(flush[0], (i * CAPTURE_BUFFER_SIZE) as f32);
            assert_eq!(
                flush[CAPTURE_BUFFER_SIZE - 1],
                (i * CAPTURE_BUFFER_SIZE + CAPTURE_BUFFER_SIZE - 1) as f32
            );
        }
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_partial_fill_holds_samples() {
        let mut buffer = CaptureBuffer::new();
        let mut flushes = 0;

        buffer.push(&vec![0.1; 100], |_| flushes += 1);
        assert_eq!(flushes, 0);
        assert_eq!(buffer.pending(), 100);

        // Top up to exactly one buffer
        buffer.push(&vec![0.2; CAPTURE_BUFFER_SIZE - 100], |_| flushes += 1);
        assert_eq!(flushes, 1);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_flush_spanning_pushes_preserves_order() {
        let mut buffer = CaptureBuffer::with_capacity(4);
        let mut flushes: Vec<Vec<f32>> = Vec::new();

        buffer.push(&[1.0, 2.0, 3.0], |full| flushes.push(full));
        buffer.push(&[4.0, 5.0], |full| flushes.push(full));

        assert_eq!(flushes, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn test_many_small_pushes() {
        let mut buffer = CaptureBuffer::with_capacity(8);
        let mut flushes = 0;

        for i in 0..64 {
            buffer.push(&[i as f32], |_| flushes += 1);
        }
        assert_eq!(flushes, 8);
        assert_eq!(buffer.pending(), 0);
    }
}

#[cfg(all(test, feature = "test-audio"))]
mod device_tests {
    use super::*;
    use futures_util::StreamExt;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_capture_produces_full_buffers() {
        let mut capture = match CpalCapture::new(CaptureConfig::default()) {
            Ok(capture) => capture,
            Err(e) => {
                log::warn!("Audio device not available in test environment: {}", e);
                return;
            }
        };

        if let Ok(Some(buffer)) =
            tokio::time::timeout(std::time::Duration::from_secs(5), capture.next()).await
        {
            assert_eq!(buffer.len(), CAPTURE_BUFFER_SIZE);
        }
    }
}
