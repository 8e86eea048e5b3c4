//! PCM16 codec
//!
//! Converts fixed-size blocks of normalized float samples into raw
//! little-endian signed 16-bit payloads and back. No framing metadata:
//! the sample count of a payload is its byte length divided by two.

pub mod pcm;

pub use pcm::{Pcm16Decoder, Pcm16Encoder};
