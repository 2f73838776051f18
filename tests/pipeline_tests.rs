//! Audio pipeline property tests: capture flush accounting and playback
//! drain ordering, with the inbound codec in the loop where it matters.

use voice_live_rs::{
    capture::{CaptureBuffer, CAPTURE_BUFFER_SIZE},
    events::{self, ResponseEvent},
    pcm,
    playback::{AudioChunk, PlaybackCommand, PlaybackQueue},
};

#[test]
fn test_capture_flush_count_matches_input() {
    // N a multiple of the buffer size -> exactly N / size flushes of
    // exactly size samples each, in push order.
    for buffers in [1usize, 2, 7] {
        let mut capture = CaptureBuffer::new();
        let mut flushes: Vec<Vec<f32>> = Vec::new();

        let samples: Vec<f32> = (0..CAPTURE_BUFFER_SIZE * buffers)
            .map(|i| (i % 1000) as f32 / 1000.0)
            .collect();

        // Feed in odd-sized slices to exercise flushes spanning pushes.
        for slice in samples.chunks(777) {
            capture.push(slice, |full| flushes.push(full));
        }

        assert_eq!(flushes.len(), buffers);
        let replayed: Vec<f32> = flushes.into_iter().flatten().collect();
        assert_eq!(replayed, samples);
        assert_eq!(capture.pending(), 0);
    }
}

#[test]
fn test_playback_drain_equals_concatenation() {
    let chunks = vec![
        vec![0.1f32; 130],
        vec![0.2f32; 64],
        vec![0.3f32; 333],
        vec![0.4f32; 1],
    ];
    let expected: Vec<f32> = chunks.iter().flatten().copied().collect();

    let mut queue = PlaybackQueue::new();
    for samples in &chunks {
        queue.push(AudioChunk::new(samples.clone()));
    }

    // Drain over uneven quanta; output must be the concatenation followed
    // by silence, never reordered.
    let mut drained = Vec::new();
    for quantum in [100usize, 100, 100, 100, 100, 100] {
        let mut out = vec![0.0f32; quantum];
        queue.drain_into(&mut out);
        drained.extend(out);
    }

    assert_eq!(drained[..expected.len()], expected[..]);
    assert!(drained[expected.len()..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_scenario_three_chunks_two_drains() {
    // Chunks of {200, 50, 10} samples; first drain of 100
    // yields chunk1[0..100], second drain of 200 yields chunk1[100..200] ++
    // chunk2 ++ chunk3 ++ 40 samples of silence.
    let chunk1: Vec<f32> = (0..200).map(|i| 0.001 * i as f32).collect();
    let chunk2 = vec![0.5f32; 50];
    let chunk3 = vec![-0.5f32; 10];

    let mut queue = PlaybackQueue::new();
    queue.push(AudioChunk::new(chunk1.clone()));
    queue.push(AudioChunk::new(chunk2.clone()));
    queue.push(AudioChunk::new(chunk3.clone()));

    let mut out = vec![0.0f32; 100];
    queue.drain_into(&mut out);
    assert_eq!(out, chunk1[..100].to_vec());

    let mut out = vec![9.0f32; 200];
    let filled = queue.drain_into(&mut out);
    assert_eq!(filled, 160);
    assert_eq!(out[..100], chunk1[100..]);
    assert_eq!(out[100..150], chunk2[..]);
    assert_eq!(out[150..160], chunk3[..]);
    assert!(out[160..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_interrupt_then_drain_is_silence() {
    let mut queue = PlaybackQueue::new();
    for _ in 0..5 {
        queue.push(AudioChunk::new(vec![0.7f32; 256]));
    }

    queue.apply(PlaybackCommand::Interrupt);

    let mut out = vec![1.0f32; 256];
    let filled = queue.drain_into(&mut out);
    assert_eq!(filled, 0);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn test_wire_audio_frames_to_playback() {
    // Binary frames from the socket, through the codec, into the queue.
    let original: Vec<f32> = (0..260).map(|i| ((i % 64) as f32 - 32.0) / 64.0).collect();
    let frames = [
        pcm::f32_to_i16_bytes(&original[..200]),
        pcm::f32_to_i16_bytes(&original[200..250]),
        pcm::f32_to_i16_bytes(&original[250..]),
    ];

    let mut queue = PlaybackQueue::new();
    for frame in frames {
        match events::decode_binary(frame) {
            ResponseEvent::Audio(bytes) => {
                queue.push(AudioChunk::from_pcm16(&bytes));
            }
            other => panic!("Expected Audio, got {:?}", other),
        }
    }

    let mut out = vec![0.0f32; 300];
    let filled = queue.drain_into(&mut out);
    assert_eq!(filled, 260);
    for (a, b) in original.iter().zip(out.iter()) {
        assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
    }
    assert!(out[260..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_queue_bound_holds_under_flood() {
    let mut queue = PlaybackQueue::new();
    let mut accepted = 0;
    for _ in 0..500 {
        if queue.push(AudioChunk::new(vec![0.1f32; 16])) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 100);
    assert_eq!(queue.len(), 100);
}
