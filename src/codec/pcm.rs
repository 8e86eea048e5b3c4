//! PCM16 encoder and decoder
//!
//! Samples are clamped to [-1.0, 1.0], scaled by 32767 and truncated toward
//! zero. Decoding divides by 32767, so a round trip is accurate to one
//! quantization step.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::PCM16_SCALE;
use crate::error::CodecError;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Convert one normalized float sample to PCM16
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    // NaN clamps to NaN and casts to 0.
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

/// Convert one PCM16 sample back to a normalized float
#[inline]
pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Fixed-frame PCM16 encoder
pub struct Pcm16Encoder {
    frame_size: usize,
    /// Encoding buffer (reused across frames)
    encode_buffer: BytesMut,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl Pcm16Encoder {
    /// Create an encoder for frames of exactly `frame_size` samples
    pub fn new(frame_size: usize) -> Result<Self, CodecError> {
        if frame_size == 0 {
            return Err(CodecError::InvalidFrameSize {
                expected: 1,
                actual: 0,
            });
        }

        Ok(Self {
            frame_size,
            encode_buffer: BytesMut::with_capacity(frame_size * BYTES_PER_SAMPLE),
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode one frame of mono samples.
    ///
    /// The returned payload is exactly `frame_size * 2` bytes.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize {
                expected: self.frame_size,
                actual: samples.len(),
            });
        }

        self.encode_buffer.reserve(self.payload_len());
        for &sample in samples {
            self.encode_buffer.put_i16_le(encode_sample(sample));
        }

        let payload = self.encode_buffer.split().freeze();
        self.frames_encoded += 1;
        self.bytes_produced += payload.len() as u64;

        Ok(payload)
    }

    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Encoded payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.frame_size * BYTES_PER_SAMPLE
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.bytes_produced = 0;
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

/// PCM16 decoder
///
/// Accepts payloads of any even length of at least one sample.
#[derive(Default)]
pub struct Pcm16Decoder {
    frames_decoded: u64,
    frames_rejected: u64,
    samples_produced: u64,
}

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a payload without decoding it
    pub fn validate(data: &[u8]) -> Result<usize, CodecError> {
        if data.len() < BYTES_PER_SAMPLE {
            return Err(CodecError::PayloadTooShort(data.len()));
        }
        if data.len() % BYTES_PER_SAMPLE != 0 {
            return Err(CodecError::OddPayloadLength(data.len()));
        }
        Ok(data.len() / BYTES_PER_SAMPLE)
    }

    /// Decode a payload into a fresh sample vector
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError> {
        let mut out = Vec::new();
        self.decode_into(data, &mut out)?;
        Ok(out)
    }

    /// Decode a payload into `out`, replacing its contents.
    ///
    /// `out` keeps its allocation between calls.
    pub fn decode_into(&mut self, data: &[u8], out: &mut Vec<f32>) -> Result<usize, CodecError> {
        let count = match Self::validate(data) {
            Ok(count) => count,
            Err(e) => {
                self.frames_rejected += 1;
                return Err(e);
            }
        };

        out.clear();
        out.extend(
            data.chunks_exact(BYTES_PER_SAMPLE)
                .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]]))),
        );

        self.frames_decoded += 1;
        self.samples_produced += count as u64;
        Ok(count)
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
            samples_produced: self.samples_produced,
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.frames_rejected = 0;
        self.samples_produced = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub samples_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STEP: f32 = 1.0 / 32767.0;

    #[test]
    fn test_encoder_rejects_zero_frame_size() {
        assert!(Pcm16Encoder::new(0).is_err());
    }

    #[test]
    fn test_encode_layout_is_little_endian() {
        let mut encoder = Pcm16Encoder::new(3).unwrap();
        let payload = encoder.encode(&[1.0, -1.0, 0.5]).unwrap();

        assert_eq!(payload.len(), 6);
        assert_eq!(&payload[0..2], &32767i16.to_le_bytes());
        assert_eq!(&payload[2..4], &(-32767i16).to_le_bytes());
        // 0.5 * 32767 = 16383.5, truncated toward zero
        assert_eq!(&payload[4..6], &16383i16.to_le_bytes());
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        assert_eq!(encode_sample(3.0), 32767);
        assert_eq!(encode_sample(-7.5), -32767);
        assert_eq!(encode_sample(f32::NAN), 0);
    }

    #[test]
    fn test_encoder_rejects_wrong_frame_length() {
        let mut encoder = Pcm16Encoder::new(960).unwrap();
        let err = encoder.encode(&[0.0; 959]).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidFrameSize {
                expected: 960,
                actual: 959
            }
        );
        assert_eq!(encoder.stats().frames_encoded, 0);
    }

    #[test]
    fn test_encoder_stats() {
        let mut encoder = Pcm16Encoder::new(480).unwrap();
        for _ in 0..3 {
            encoder.encode(&[0.25; 480]).unwrap();
        }
        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 3);
        assert_eq!(stats.bytes_produced, 3 * 960);

        encoder.reset_stats();
        assert_eq!(encoder.stats().frames_encoded, 0);
    }

    #[test]
    fn test_decoder_rejects_malformed() {
        let mut decoder = Pcm16Decoder::new();
        assert_eq!(
            decoder.decode(&[0x01, 0x02, 0x03]).unwrap_err(),
            CodecError::OddPayloadLength(3)
        );
        assert_eq!(
            decoder.decode(&[0x01]).unwrap_err(),
            CodecError::PayloadTooShort(1)
        );
        assert_eq!(decoder.decode(&[]).unwrap_err(), CodecError::PayloadTooShort(0));
        assert_eq!(decoder.stats().frames_rejected, 3);
        assert_eq!(decoder.stats().frames_decoded, 0);
    }

    #[test]
    fn test_decode_into_reuses_buffer() {
        let mut encoder = Pcm16Encoder::new(4).unwrap();
        let mut decoder = Pcm16Decoder::new();
        let mut out = Vec::with_capacity(16);

        let payload = encoder.encode(&[0.0, 1.0, -1.0, 0.0]).unwrap();
        assert_eq!(decoder.decode_into(&payload, &mut out).unwrap(), 4);
        assert_eq!(out, vec![0.0, 1.0, -1.0, 0.0]);

        // A shorter payload replaces, not appends
        assert_eq!(decoder.decode_into(&payload[..2], &mut out).unwrap(), 1);
        assert_eq!(out, vec![0.0]);
        assert!(out.capacity() >= 16);
    }

    proptest! {
        #[test]
        fn prop_roundtrip_within_one_step(samples in prop::collection::vec(-1.0f32..=1.0, 1..512)) {
            let mut encoder = Pcm16Encoder::new(samples.len()).unwrap();
            let mut decoder = Pcm16Decoder::new();

            let payload = encoder.encode(&samples).unwrap();
            prop_assert_eq!(payload.len(), samples.len() * 2);

            let decoded = decoder.decode(&payload).unwrap();
            prop_assert_eq!(decoded.len(), samples.len());
            for (original, restored) in samples.iter().zip(decoded.iter()) {
                prop_assert!((original - restored).abs() <= STEP + f32::EPSILON);
            }
        }
    }
}
