/// Pull-based 16-bit PCM byte stream over a shared synth
use std::io::Read;

use super::voice::quantize;
use super::Synth;

pub const PCM_CHANNELS: usize = 2;
const BYTES_PER_SAMPLE: usize = 2;
pub const BYTES_PER_FRAME: usize = PCM_CHANNELS * BYTES_PER_SAMPLE;

/// Continuous signed 16-bit little-endian stereo stream.
///
/// Every `read` fills the whole buffer, holding the voice pool lock for the
/// duration of that one buffer. A frame that does not fit is carried over to
/// the next read, so frames stay aligned whatever the buffer size. The
/// stream never ends: only an empty buffer reads 0 bytes.
pub struct PcmStream {
    synth: Synth,
    carry: [u8; BYTES_PER_FRAME],
    carry_len: usize,
}

impl PcmStream {
    pub fn new(synth: Synth) -> Self {
        Self {
            synth,
            carry: [0; BYTES_PER_FRAME],
            carry_len: 0,
        }
    }

    pub fn synth(&self) -> &Synth {
        &self.synth
    }
}

fn frame_bytes(sample: i16) -> [u8; BYTES_PER_FRAME] {
    let bytes = sample.to_le_bytes();
    let mut frame = [0u8; BYTES_PER_FRAME];
    for chunk in frame.chunks_exact_mut(BYTES_PER_SAMPLE) {
        chunk.copy_from_slice(&bytes);
    }
    frame
}

impl Read for PcmStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // leftover bytes of a frame split by the previous read
        let start = BYTES_PER_FRAME - self.carry_len;
        let pending = self.carry_len.min(buf.len());
        buf[..pending].copy_from_slice(&self.carry[start..start + pending]);
        self.carry_len -= pending;
        let rest = &mut buf[pending..];
        if rest.is_empty() {
            return Ok(pending);
        }

        let mut pool = self.synth.lock();
        let whole = rest.len() / BYTES_PER_FRAME * BYTES_PER_FRAME;
        let (frames, tail) = rest.split_at_mut(whole);
        for frame in frames.chunks_exact_mut(BYTES_PER_FRAME) {
            frame.copy_from_slice(&frame_bytes(quantize(pool.next_sample())));
        }
        if !tail.is_empty() {
            let frame = frame_bytes(quantize(pool.next_sample()));
            tail.copy_from_slice(&frame[..tail.len()]);
            self.carry = frame;
            self.carry_len = BYTES_PER_FRAME - tail.len();
        }

        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthConfig;

    fn stream() -> PcmStream {
        PcmStream::new(Synth::new(44100, &SynthConfig::default()))
    }

    #[test]
    fn test_fills_whole_buffer() {
        let mut stream = stream();
        let mut buf = [0xAAu8; 10];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 10);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_left_and_right_match() {
        let mut stream = stream();
        stream.synth().set_volume(1.0);
        stream.synth().note_on(2, 57, 127);

        let mut buf = vec![0u8; BYTES_PER_FRAME * 2048];
        stream.read_exact(&mut buf).unwrap();

        let mut nonzero = false;
        for frame in buf.chunks_exact(BYTES_PER_FRAME) {
            let left = i16::from_le_bytes([frame[0], frame[1]]);
            let right = i16::from_le_bytes([frame[2], frame[3]]);
            assert_eq!(left, right);
            nonzero |= left != 0;
        }
        assert!(nonzero);
    }

    #[test]
    fn test_short_reads_never_end_and_stay_aligned() {
        let config = SynthConfig::default();
        let mut reference = PcmStream::new(Synth::new(44100, &config));
        let mut chunked = PcmStream::new(Synth::new(44100, &config));
        for stream in [&reference, &chunked] {
            stream.synth().set_volume(1.0);
            stream.synth().note_on(0, 69, 127);
        }

        let mut expected = vec![0u8; BYTES_PER_FRAME * 300];
        reference.read_exact(&mut expected).unwrap();

        // odd buffer sizes, including ones shorter than a frame
        let mut got = Vec::new();
        let mut sizes = [3usize, 1, 7, 2, 5].iter().cycle();
        while got.len() < expected.len() {
            let size = (*sizes.next().unwrap()).min(expected.len() - got.len());
            let mut buf = vec![0u8; size];
            assert_eq!(chunked.read(&mut buf).unwrap(), size);
            got.extend_from_slice(&buf);
        }
        assert_eq!(got, expected);

        let mut small = [0u8; 3];
        chunked.read_exact(&mut small).unwrap();
    }

    #[test]
    fn test_empty_buffer_reads_nothing() {
        let mut stream = stream();
        assert_eq!(stream.read(&mut []).unwrap(), 0);
    }
}
