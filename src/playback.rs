use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream as CpalStream;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use thiserror::Error;

use crate::pcm::{self, PLAYBACK_SAMPLE_RATE};

/// Maximum chunks buffered before new audio is rejected. Bounds memory when
/// the network produces faster than the device consumes.
pub const PLAYBACK_QUEUE_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Playback channel closed")]
    ChannelClosed,
}

/// An immutable block of f32 PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Build a chunk from raw PCM16 bytes as received from the wire.
    pub fn from_pcm16(bytes: &[u8]) -> Self {
        Self {
            samples: pcm::i16_bytes_to_f32(bytes),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Messages crossing into the playback context. Exactly two: append a chunk,
/// or clear everything already buffered.
#[derive(Debug)]
pub enum PlaybackCommand {
    Append(AudioChunk),
    Interrupt,
}

/// Bounded FIFO of audio chunks, drained incrementally into output quanta.
#[derive(Debug)]
pub struct PlaybackQueue {
    chunks: VecDeque<AudioChunk>,
    /// Read position inside the head chunk.
    head_pos: usize,
    capacity: usize,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::with_capacity(PLAYBACK_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            head_pos: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Append a chunk. When the queue is at capacity the chunk is rejected
    /// so already-accepted audio stays contiguous; returns false in that
    /// case.
    pub fn push(&mut self, chunk: AudioChunk) -> bool {
        if self.chunks.len() >= self.capacity {
            log::warn!(
                "Playback queue full ({} chunks), dropping incoming chunk of {} samples",
                self.chunks.len(),
                chunk.len()
            );
            return false;
        }
        self.chunks.push_back(chunk);
        true
    }

    /// Drop everything, including the partially-consumed head. Used when the
    /// remote speaker is interrupted and buffered audio must not be heard.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head_pos = 0;
    }

    /// Fill one output quantum. Copies `min(remaining_output,
    /// remaining_chunk)` from the head until the output is full or the queue
    /// runs dry, then pads the rest with silence. Returns the number of real
    /// samples written.
    pub fn drain_into(&mut self, out: &mut [f32]) -> usize {
        let mut filled = 0;

        while filled < out.len() {
            let Some(head) = self.chunks.front() else {
                break;
            };

            let remaining = head.len() - self.head_pos;
            if remaining == 0 {
                // Empty (or fully consumed) head: discard and continue.
                self.chunks.pop_front();
                self.head_pos = 0;
                continue;
            }

            let n = remaining.min(out.len() - filled);
            out[filled..filled + n]
                .copy_from_slice(&head.samples()[self.head_pos..self.head_pos + n]);
            filled += n;
            self.head_pos += n;

            if self.head_pos == head.len() {
                self.chunks.pop_front();
                self.head_pos = 0;
            }
        }

        // Underrun: pad with silence.
        for sample in &mut out[filled..] {
            *sample = 0.0;
        }

        filled
    }

    /// Apply one inbound command.
    pub fn apply(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Append(chunk) => {
                self.push(chunk);
            }
            PlaybackCommand::Interrupt => {
                log::debug!("Playback interrupted, clearing {} chunks", self.chunks.len());
                self.clear();
            }
        }
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Speaker playback using CPAL. The output callback owns the queue and
/// drains its command receiver with non-blocking reads at the top of every
/// quantum; the orchestration context only ever talks to it through the
/// channel.
pub struct CpalPlayer {
    stream: Option<CpalStream>,
    tx: Sender<PlaybackCommand>,
}

impl CpalPlayer {
    pub fn new() -> Result<Self, PlaybackError> {
        let (tx, rx) = channel();
        let stream = Self::build_stream(rx)?;
        stream
            .play()
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            tx,
        })
    }

    fn build_stream(rx: Receiver<PlaybackCommand>) -> Result<CpalStream, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("No output device found".to_string()))?;

        log::debug!("Playback device: {:?}", device.name());

        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;
        let channels = supported_config.channels() as usize;

        let stream_config = cpal::StreamConfig {
            channels: supported_config.channels(),
            sample_rate: cpal::SampleRate(PLAYBACK_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "Audio playback configured: {} channels @ {}Hz",
            channels,
            PLAYBACK_SAMPLE_RATE
        );

        let mut queue = PlaybackQueue::new();
        let mut mono = Vec::new();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Drain pending commands without blocking the audio
                    // thread, then fill the quantum.
                    while let Ok(command) = rx.try_recv() {
                        queue.apply(command);
                    }

                    let frames = data.len() / channels;
                    mono.resize(frames, 0.0);
                    queue.drain_into(&mut mono);

                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                move |err| {
                    log::error!("Playback stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        Ok(stream)
    }

    /// Sender half for the session controller.
    pub fn command_sender(&self) -> Sender<PlaybackCommand> {
        self.tx.clone()
    }

    pub fn enqueue(&self, chunk: AudioChunk) -> Result<(), PlaybackError> {
        self.tx
            .send(PlaybackCommand::Append(chunk))
            .map_err(|_| PlaybackError::ChannelClosed)
    }

    pub fn interrupt(&self) -> Result<(), PlaybackError> {
        self.tx
            .send(PlaybackCommand::Interrupt)
            .map_err(|_| PlaybackError::ChannelClosed)
    }

    /// Stop playback by tearing down the stream.
    pub fn stop(&mut self) {
        self.stream.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: Vec<f32>) -> AudioChunk {
        AudioChunk::new(samples)
    }

    #[test]
    fn test_drain_concatenates_chunks_in_order() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(vec![1.0, 2.0]));
        queue.push(chunk(vec![3.0]));
        queue.push(chunk(vec![4.0, 5.0]));

        let mut out = [0.0f32; 5];
        let filled = queue.drain_into(&mut out);
        assert_eq!(filled, 5);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(vec![1.0, 2.0]));

        let mut out = [9.0f32; 4];
        let filled = queue.drain_into(&mut out);
        assert_eq!(filled, 2);
        assert_eq!(out, [1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_partial_head_consumption() {
        let mut queue = PlaybackQueue::new();
        let samples: Vec<f32> = (0..200).map(|i| i as f32).collect();
        queue.push(chunk(samples.clone()));
        queue.push(chunk(vec![500.0; 50]));
        queue.push(chunk(vec![600.0; 10]));

        // First quantum: 100 samples from chunk 1 only
        let mut out = vec![0.0f32; 100];
        queue.drain_into(&mut out);
        assert_eq!(out, samples[..100].to_vec());

        // Second quantum of 200: tail of chunk 1, all of chunks 2 and 3,
        // then 40 samples of silence
        let mut out = vec![7.0f32; 200];
        let filled = queue.drain_into(&mut out);
        assert_eq!(filled, 160);
        assert_eq!(out[..100], samples[100..200]);
        assert_eq!(out[100..150], [500.0; 50]);
        assert_eq!(out[150..160], [600.0; 10]);
        assert_eq!(out[160..], [0.0; 40]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_chunk_discarded() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(vec![]));
        queue.push(chunk(vec![1.0]));

        let mut out = [0.0f32; 2];
        let filled = queue.drain_into(&mut out);
        assert_eq!(filled, 1);
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn test_interrupt_clears_everything() {
        let mut queue = PlaybackQueue::new();
        for _ in 0..5 {
            queue.push(chunk(vec![1.0; 64]));
        }
        queue.apply(PlaybackCommand::Interrupt);

        let mut out = [5.0f32; 64];
        let filled = queue.drain_into(&mut out);
        assert_eq!(filled, 0);
        assert_eq!(out, [0.0; 64]);
    }

    #[test]
    fn test_interrupt_discards_partial_head() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(vec![1.0; 100]));

        let mut out = [0.0f32; 30];
        queue.drain_into(&mut out);
        queue.clear();

        let mut out = [5.0f32; 10];
        assert_eq!(queue.drain_into(&mut out), 0);
        assert_eq!(out, [0.0; 10]);
    }

    #[test]
    fn test_capacity_rejects_not_evicts() {
        let mut queue = PlaybackQueue::with_capacity(2);
        assert!(queue.push(chunk(vec![1.0])));
        assert!(queue.push(chunk(vec![2.0])));
        assert!(!queue.push(chunk(vec![3.0])));

        // Rejected chunk never plays; accepted audio is intact
        let mut out = [0.0f32; 3];
        assert_eq!(queue.drain_into(&mut out), 2);
        assert_eq!(out, [1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_chunk_from_pcm16() {
        let bytes = pcm::f32_to_i16_bytes(&[0.5, -0.5]);
        let chunk = AudioChunk::from_pcm16(&bytes);
        assert_eq!(chunk.len(), 2);
        assert!((chunk.samples()[0] - 0.5).abs() < 1e-3);
    }
}

#[cfg(all(test, feature = "test-audio"))]
mod device_tests {
    use super::*;
    use serial_test::serial;
    use std::f32::consts::PI;
    use std::time::Duration;

    #[test]
    #[serial]
    fn test_sine_wave_playback() {
        let player = match CpalPlayer::new() {
            Ok(player) => player,
            Err(e) => {
                log::warn!("Audio device not available in test environment: {}", e);
                return;
            }
        };

        // 1 second of 440Hz
        let samples: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / PLAYBACK_SAMPLE_RATE as f32).sin() * 0.3)
            .collect();
        player.enqueue(AudioChunk::new(samples)).unwrap();
        std::thread::sleep(Duration::from_millis(1200));
    }
}
