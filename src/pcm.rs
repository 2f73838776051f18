//! PCM sample conversion shared by the capture, playback and wire layers.
//!
//! Everything on the wire is 16-bit little-endian PCM; everything handed to
//! the audio hardware is f32. Microphone audio is captured at 16kHz, model
//! audio arrives at 24kHz.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Sample rate of captured microphone audio sent to the model.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio received from the model.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Convert 16-bit little-endian PCM bytes to f32 samples in [-1.0, 1.0].
/// A trailing odd byte is ignored.
pub fn i16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Convert f32 samples to 16-bit little-endian PCM bytes.
pub fn f32_to_i16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut pcm_data = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        pcm_data.extend_from_slice(&sample_i16.to_le_bytes());
    }

    pcm_data
}

/// Encode f32 samples as the base64 PCM16 payload used in media chunks.
pub fn encode_pcm_base64(samples: &[f32]) -> String {
    BASE64.encode(f32_to_i16_bytes(samples))
}

/// Decode a base64 media-chunk payload back to raw PCM16 bytes.
pub fn decode_pcm_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(data)
}
