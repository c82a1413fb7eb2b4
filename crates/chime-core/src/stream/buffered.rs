//! Decode-ahead buffering for non-realtime-safe streams
//!
//! A decode stream that does file I/O cannot be read from the audio path,
//! so a producer thread decodes ahead into a bounded ring of interleaved
//! samples. The consumer side presents the same [`DecodeStream`] interface
//! as the wrapped stream. Streams that declare themselves realtime-safe are
//! passed through untouched, with no thread and no ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use super::DecodeStream;

/// Ring capacity in seconds of audio
const RING_CAPACITY_SECS: f32 = 1.0;

/// Frames decoded per producer iteration (keeps the lock-free decode step
/// bounded to roughly 100 ms of audio)
const DECODE_INCREMENT_SECS: f32 = 0.1;

/// Bounded circular buffer of interleaved samples
struct Ring {
    buf: Vec<f32>,
    /// Read position in samples
    head: usize,
    /// Occupied samples
    len: usize,
}

impl Ring {
    fn room(&self) -> usize {
        self.buf.len() - self.len
    }

    fn push(&mut self, samples: &[f32]) {
        debug_assert!(samples.len() <= self.room());
        let cap = self.buf.len();
        let mut tail = (self.head + self.len) % cap;
        for &s in samples {
            self.buf[tail] = s;
            tail = (tail + 1) % cap;
        }
        self.len += samples.len();
    }

    fn pop(&mut self, out: &mut [f32]) {
        debug_assert!(out.len() <= self.len);
        let cap = self.buf.len();
        for s in out.iter_mut() {
            *s = self.buf[self.head];
            self.head = (self.head + 1) % cap;
        }
        self.len -= out.len();
    }
}

struct Shared {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
    /// Producer teardown flag
    should_die: AtomicBool,
    /// Set by the producer when the wrapped stream ends; checked under the
    /// ring mutex so the final partial read cannot tear
    finished: AtomicBool,
}

/// A [`DecodeStream`] wrapper that decodes ahead on a producer thread when
/// the wrapped stream is not realtime-safe.
pub struct BufferedStream {
    /// Pass-through stream (realtime-safe case)
    inner: Option<Box<dyn DecodeStream>>,
    /// Ring shared with the producer (buffered case)
    shared: Option<Arc<Shared>>,
    producer: Option<JoinHandle<()>>,
    channels: u32,
    sample_rate: f32,
    length_in_frames: Option<u64>,
}

impl BufferedStream {
    /// Wrap a decode stream, spawning a producer thread if it needs one
    pub fn new(stream: Box<dyn DecodeStream>) -> Self {
        let channels = stream.num_channels();
        let sample_rate = stream.sample_rate();
        let length_in_frames = stream.length_in_frames();

        if stream.realtime_safe() {
            return Self {
                inner: Some(stream),
                shared: None,
                producer: None,
                channels,
                sample_rate,
                length_in_frames,
            };
        }

        let capacity_frames = (sample_rate * RING_CAPACITY_SECS) as usize;
        let shared = Arc::new(Shared {
            ring: Mutex::new(Ring {
                buf: vec![0.0; capacity_frames * channels as usize],
                head: 0,
                len: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            should_die: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });

        let producer = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("chime-decode".into())
                .spawn(move || producer_loop(stream, shared))
                .expect("failed to spawn decode thread")
        };
        log::debug!(
            "decode-ahead thread started ({}ch, {} Hz, ring {} frames)",
            channels,
            sample_rate,
            capacity_frames
        );

        Self {
            inner: None,
            shared: Some(shared),
            producer: Some(producer),
            channels,
            sample_rate,
            length_in_frames,
        }
    }

    /// Whether a producer thread is decoding ahead for this stream
    pub fn is_buffered(&self) -> bool {
        self.shared.is_some()
    }

    fn read_buffered(&mut self, out: &mut [f32], frames: usize) -> usize {
        let shared = self.shared.as_ref().unwrap();
        let ch = self.channels as usize;
        let mut read = 0;

        while read < frames {
            let mut ring = shared.ring.lock().unwrap();
            while ring.len == 0 {
                // The finished flag is only trusted while the mutex is
                // held; the producer latches it under this mutex together
                // with its final append.
                if shared.finished.load(Ordering::Acquire) {
                    return read;
                }
                ring = shared.not_empty.wait(ring).unwrap();
            }
            let ring_frames = ring.len / ch;
            let n = ring_frames.min(frames - read);
            ring.pop(&mut out[read * ch..(read + n) * ch]);
            drop(ring);
            shared.not_full.notify_one();
            read += n;
        }
        read
    }
}

impl DecodeStream for BufferedStream {
    fn num_channels(&self) -> u32 {
        self.channels
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn length_in_frames(&self) -> Option<u64> {
        self.length_in_frames
    }

    fn realtime_safe(&self) -> bool {
        // Either the wrapped stream already was, or the producer makes it so
        true
    }

    fn read_samples_float(&mut self, out: &mut [f32], frames: usize) -> usize {
        match &mut self.inner {
            Some(stream) => stream.read_samples_float(out, frames),
            None => self.read_buffered(out, frames),
        }
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.should_die.store(true, Ordering::Release);
            shared.not_full.notify_all();
        }
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

fn producer_loop(mut stream: Box<dyn DecodeStream>, shared: Arc<Shared>) {
    let ch = stream.num_channels() as usize;
    let increment = (stream.sample_rate() * DECODE_INCREMENT_SECS) as usize;
    let mut scratch = vec![0.0f32; increment * ch];

    loop {
        if shared.should_die.load(Ordering::Acquire) {
            break;
        }

        // Figure out how much room the ring has, waiting if it is full
        let request = {
            let mut ring = shared.ring.lock().unwrap();
            loop {
                if shared.should_die.load(Ordering::Acquire) {
                    return;
                }
                let room_frames = ring.room() / ch;
                if room_frames > 0 {
                    break room_frames.min(increment);
                }
                ring = shared.not_full.wait(ring).unwrap();
            }
        };

        // Decode with the mutex released; this is where file I/O happens
        let got = stream.read_samples_float(&mut scratch[..request * ch], request);
        let ended = got < request;

        // The finished flag is latched under the ring mutex together with
        // the final append, so a consumer holding the mutex can never see
        // "empty and finished" while a last partial block is still in
        // flight.
        {
            let mut ring = shared.ring.lock().unwrap();
            if got > 0 {
                ring.push(&scratch[..got * ch]);
            }
            if ended {
                shared.finished.store(true, Ordering::Release);
            }
        }
        if ended {
            shared.not_empty.notify_all();
            log::debug!("decode-ahead thread finished");
            break;
        } else if got > 0 {
            shared.not_empty.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    /// MemoryStream that pretends to need a decode thread
    struct SlowStream(MemoryStream);

    impl DecodeStream for SlowStream {
        fn num_channels(&self) -> u32 {
            self.0.num_channels()
        }
        fn sample_rate(&self) -> f32 {
            self.0.sample_rate()
        }
        fn length_in_frames(&self) -> Option<u64> {
            self.0.length_in_frames()
        }
        fn realtime_safe(&self) -> bool {
            false
        }
        fn read_samples_float(&mut self, out: &mut [f32], frames: usize) -> usize {
            // Simulate blocking I/O
            std::thread::sleep(std::time::Duration::from_micros(200));
            self.0.read_samples_float(out, frames)
        }
    }

    #[test]
    fn test_realtime_safe_stream_passes_through() {
        let stream = MemoryStream::mono(vec![1.0; 16], 48000.0);
        let buffered = BufferedStream::new(Box::new(stream));
        assert!(!buffered.is_buffered());
    }

    #[test]
    fn test_buffered_stream_delivers_all_samples_in_order() {
        let data: Vec<f32> = (0..10_000).map(|i| i as f32).collect();
        let stream = SlowStream(MemoryStream::mono(data.clone(), 48000.0));
        let mut buffered = BufferedStream::new(Box::new(stream));
        assert!(buffered.is_buffered());

        let mut collected = Vec::new();
        let mut out = [0.0f32; 256];
        loop {
            let got = buffered.read_samples_float(&mut out, 256);
            collected.extend_from_slice(&out[..got]);
            if got < 256 {
                break;
            }
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn test_buffered_stream_stereo_keeps_frames_intact() {
        let data: Vec<f32> = (0..2_000).map(|i| i as f32).collect();
        let stream = SlowStream(MemoryStream::stereo(data.clone(), 44100.0));
        let mut buffered = BufferedStream::new(Box::new(stream));

        let mut collected = Vec::new();
        let mut out = [0.0f32; 34]; // odd frame count to stress the ring
        loop {
            let got = buffered.read_samples_float(&mut out, 17);
            collected.extend_from_slice(&out[..got * 2]);
            if got < 17 {
                break;
            }
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn test_drop_joins_producer_without_consuming() {
        let data = vec![0.5f32; 100_000];
        let stream = SlowStream(MemoryStream::mono(data, 48000.0));
        let buffered = BufferedStream::new(Box::new(stream));
        // Dropping while the producer is mid-decode must not hang
        drop(buffered);
    }
}
