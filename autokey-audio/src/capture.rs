//! Live input capture via cpal
//!
//! The stream callback downmixes to mono and pushes into the shared ring.
//! Every stream (re)start rebinds the ring, which readers see as a restart.
//! `cpal::Stream` is not `Send`, so the `Capture` stays on the thread that
//! opened it and hands a `RingSource` to the detection thread instead.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;

use crate::ring::SampleRing;
use crate::source::{AudioSource, AudioWindow, CaptureError};

/// Last stream error reported by the callback, taken by the consumer
type FaultSlot = Arc<Mutex<Option<String>>>;

/// Names of the available input devices on the default host
pub fn input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// An open input stream feeding a `SampleRing`
pub struct Capture {
    host: cpal::Host,
    ring: Arc<SampleRing>,
    fault: FaultSlot,
    stream: Option<cpal::Stream>,
    device_name: String,
}

impl Capture {
    /// Open the named input device (or the default one) and start capturing
    pub fn open(device: Option<&str>, buffer_secs: f32) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let ring = Arc::new(SampleRing::new(44_100, buffer_secs));
        let mut capture = Self {
            host,
            ring,
            fault: Arc::new(Mutex::new(None)),
            stream: None,
            device_name: String::new(),
        };
        capture.switch_device(device)?;
        Ok(capture)
    }

    /// Restart capture on another device, rebinding the ring to its rate
    pub fn switch_device(&mut self, name: Option<&str>) -> Result<(), CaptureError> {
        let device = self.find_device(name)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let built = build_for_device(&device, self.ring.clone(), self.fault.clone());
        install(&mut self.stream, &self.ring, &self.fault, built, |stream| {
            stream
                .play()
                .map_err(|e| CaptureError::Stream(e.to_string()))
        })?;

        tracing::info!(
            device = %device_name,
            sample_rate = self.ring.sample_rate(),
            "capture started"
        );
        self.device_name = device_name;
        Ok(())
    }

    /// A `Send` handle the detection thread reads windows from
    pub fn source(&self) -> RingSource {
        RingSource::with_fault_slot(self.ring.clone(), self.fault.clone())
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.ring.sample_rate()
    }

    fn find_device(&self, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
        match name {
            None => self.host.default_input_device().ok_or(CaptureError::NoDevice),
            Some(wanted) => self
                .host
                .input_devices()
                .map_err(|e| CaptureError::Stream(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string())),
        }
    }
}

/// Build a stopped input stream for `device`, with its sample rate
fn build_for_device(
    device: &cpal::Device,
    ring: Arc<SampleRing>,
    fault: FaultSlot,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(device, &config, ring, fault),
        SampleFormat::I16 => build_stream::<i16>(device, &config, ring, fault),
        SampleFormat::U16 => build_stream::<u16>(device, &config, ring, fault),
        other => Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
    }?;
    Ok((stream, config.sample_rate.0))
}

/// Replace the running stream with a newly built one
///
/// A failed build leaves the old stream and the ring untouched. A failed
/// start is left in the fault slot so the reader reports it.
fn install<S>(
    slot: &mut Option<S>,
    ring: &SampleRing,
    fault: &FaultSlot,
    built: Result<(S, u32), CaptureError>,
    play: impl FnOnce(&S) -> Result<(), CaptureError>,
) -> Result<(), CaptureError> {
    let (stream, sample_rate) = built?;

    // Old stream stops here, before the ring is cleared for the new one
    *slot = None;
    ring.rebind(sample_rate);
    *fault.lock() = None;

    if let Err(e) = play(&stream) {
        let message = match &e {
            CaptureError::Stream(message) => message.clone(),
            other => other.to_string(),
        };
        *fault.lock() = Some(message);
        return Err(e);
    }
    *slot = Some(stream);
    Ok(())
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<SampleRing>,
    fault: FaultSlot,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    // Grows to the largest callback once, then reused
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                ring.push_interleaved(&scratch, channels);
            },
            move |err| {
                tracing::warn!(error = %err, "input stream error");
                *fault.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| CaptureError::Stream(e.to_string()))
}

/// Reads windows out of a shared ring, surfacing stream faults once
pub struct RingSource {
    ring: Arc<SampleRing>,
    fault: FaultSlot,
    /// Ring generation last seen by `restarted`
    generation: u64,
}

impl RingSource {
    pub fn new(ring: Arc<SampleRing>) -> Self {
        Self::with_fault_slot(ring, Arc::new(Mutex::new(None)))
    }

    fn with_fault_slot(ring: Arc<SampleRing>, fault: FaultSlot) -> Self {
        let generation = ring.generation();
        Self {
            ring,
            fault,
            generation,
        }
    }
}

impl AudioSource for RingSource {
    fn window(&mut self) -> Result<AudioWindow, CaptureError> {
        if let Some(message) = self.fault.lock().take() {
            return Err(CaptureError::Stream(message));
        }
        Ok(self.ring.window())
    }

    fn restarted(&mut self) -> bool {
        let generation = self.ring.generation();
        let restarted = generation != self.generation;
        self.generation = generation;
        restarted
    }
}
