//! # celt-rs
//!
//! A transform-domain audio codec for 48 kHz PCM: frames of 120 to 960
//! samples are windowed through an MDCT, band energies are coded with a
//! predictive Laplace model, and the normalized band shapes are coded as
//! algebraic pulse vectors under an adaptive bit allocation. Encoder and
//! decoder share one exact-precision range coder, so every decision the
//! encoder makes can be replayed from the packet alone.

pub mod alloc;
pub mod bands;
pub mod cwrs;
pub mod decoder;
pub mod encoder;
pub mod energy;
pub mod error;
pub mod laplace;
pub mod mdct;
pub mod modes;
pub mod pvq;
pub mod range;
pub mod spread;
pub mod tables;
pub mod tf;
pub mod transient;

pub use decoder::{Decoder, DecoderConfig};
pub use encoder::{Encoder, EncoderConfig};
pub use error::{CodecError, CodecResult, ConfigError, ConfigResult, InputDataError};
pub use modes::{Mode, SAMPLE_RATE};
