//! Audio plumbing for AutoKey
//!
//! This module connects audio to the key detector:
//! - Ring: Shared mono sample ring filled by the capture callback
//! - Capture: cpal input streams with device switching
//! - Engine: Detection thread with command/event channels
//! - File: Offline replay of decoded files in sliding windows

mod capture;
mod engine;
mod file;
mod ring;
mod source;

pub use capture::{input_devices, Capture, RingSource};
pub use engine::{DetectionEngine, EngineCommand, EngineEvent, EngineSettings};
pub use file::{DecodeError, FileReplay, TimedWindow};
pub use ring::{SampleRing, DEFAULT_BUFFER_SECS};
pub use source::{AudioSource, AudioWindow, CaptureError};
