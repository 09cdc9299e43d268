//! Inbound event normalization and transcript windowing.

pub mod event;
pub mod window;

pub use event::{Normalizer, RawEvent, Utterance};
pub use window::{TranscriptWindow, WindowBuilder};
