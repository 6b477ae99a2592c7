//! Detection engine - runs the key detector on its own thread
//!
//! The engine owns the `KeyDetector` and pulls windows from an `AudioSource`
//! at a fixed interval. Commands go in and events come out over bounded
//! crossbeam channels; a lagging consumer loses events rather than stalling
//! the analysis thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use autokey_analysis::{Detection, KeyDetector};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::source::{AudioSource, CaptureError};

/// Commands sent to the detection thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Forget all history and any lock
    Reset,
}

/// Events sent from the detection thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Result of one tick
    Detection(Detection),
    /// The source switched rate and the detector was rebound
    SampleRateChanged(u32),
    /// The source failed to deliver a window
    SourceError(CaptureError),
}

/// Timing and buffering of the detection loop
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    /// Pause after a source error before trying again
    pub error_backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(120),
            error_backoff: Duration::from_millis(500),
            channel_capacity: 1024,
        }
    }
}

/// Granularity of sleeps, so `stop()` is not held up by a long interval
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Handle to the detection thread
pub struct DetectionEngine {
    command_tx: Sender<EngineCommand>,
    event_rx: Receiver<EngineEvent>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), CaptureError>>>,
}

impl DetectionEngine {
    /// Start the detection thread
    pub fn spawn<S>(detector: KeyDetector, source: S, settings: EngineSettings) -> Self
    where
        S: AudioSource + 'static,
    {
        let capacity = settings.channel_capacity.max(1);
        let (command_tx, command_rx) = bounded(capacity);
        let (event_tx, event_rx) = bounded(capacity);
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            detector,
            source,
            settings,
            commands: command_rx,
            events: event_tx,
            running: running.clone(),
        };
        let handle = thread::spawn(move || worker.run());

        Self {
            command_tx,
            event_rx,
            running,
            handle: Some(handle),
        }
    }

    /// Send a command to the detection thread
    pub fn send(&self, cmd: EngineCommand) {
        if let Err(e) = self.command_tx.try_send(cmd) {
            tracing::warn!(command = ?cmd, error = %e, "engine command dropped");
        }
    }

    pub fn reset(&self) {
        self.send(EngineCommand::Reset);
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Event receiver, for blocking or `select!` use
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.event_rx
    }

    /// False once stopped or once the thread ended on its own
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it, returning how it ended
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::Relaxed);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CaptureError::Stream("detection thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "detection engine ended with error");
        }
    }
}

/// State owned by the detection thread
struct Worker<S> {
    detector: KeyDetector,
    source: S,
    settings: EngineSettings,
    commands: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
    running: Arc<AtomicBool>,
}

impl<S: AudioSource> Worker<S> {
    fn run(mut self) -> Result<(), CaptureError> {
        tracing::info!(
            sample_rate = self.detector.sample_rate(),
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            "detection engine started"
        );

        let result = self.run_loop();
        self.running.store(false, Ordering::Relaxed);

        match &result {
            Ok(()) => tracing::info!("detection engine stopped"),
            Err(e) => tracing::error!(error = %e, "detection engine failed"),
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), CaptureError> {
        while self.running.load(Ordering::Relaxed) {
            let started = Instant::now();
            let window = self.source.window();
            // Commands sent while the source was producing apply to this window
            self.drain_commands();

            let pause = match window {
                Ok(window) => {
                    let restarted = self.source.restarted();
                    if window.sample_rate != self.detector.sample_rate() {
                        if let Err(e) = self.detector.rebind_sample_rate(window.sample_rate) {
                            let err = CaptureError::from(e);
                            self.emit(EngineEvent::SourceError(err.clone()));
                            return Err(err);
                        }
                        self.emit(EngineEvent::SampleRateChanged(window.sample_rate));
                    } else if restarted {
                        tracing::info!("input restarted, detector reset");
                        self.detector.reset();
                    }
                    let detection = self.detector.detect_key(&window.samples);
                    self.emit(EngineEvent::Detection(detection));
                    self.settings.poll_interval.saturating_sub(started.elapsed())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "audio source failed");
                    self.emit(EngineEvent::Detection(Detection::none()));
                    self.emit(EngineEvent::SourceError(e));
                    self.settings.error_backoff
                }
            };

            self.sleep(pause);
        }
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                EngineCommand::Reset => {
                    tracing::info!("detector reset");
                    self.detector.reset();
                }
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("event dropped, consumer lagging");
        }
    }

    fn sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AudioWindow;
    use autokey_analysis::{ConfigError, DetectorConfig, Key, LockPhase, PitchClass};
    use std::collections::VecDeque;

    const RATE: u32 = 16_000;
    const WAIT: Duration = Duration::from_secs(5);

    /// Replays scripted results, then repeats the last one
    struct ScriptedSource {
        script: VecDeque<Result<AudioWindow, CaptureError>>,
        last: Result<AudioWindow, CaptureError>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<AudioWindow, CaptureError>>) -> Self {
            let last = script
                .last()
                .cloned()
                .unwrap_or_else(|| Ok(AudioWindow::new(Vec::new(), RATE)));
            Self {
                script: script.into(),
                last,
            }
        }
    }

    impl AudioSource for ScriptedSource {
        fn window(&mut self) -> Result<AudioWindow, CaptureError> {
            self.script.pop_front().unwrap_or_else(|| self.last.clone())
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            channel_capacity: 64,
        }
    }

    fn detector() -> KeyDetector {
        let mut config = DetectorConfig::default();
        config.extractor.use_hpss = false;
        KeyDetector::new(RATE, config).unwrap()
    }

    fn silence(sample_rate: u32) -> AudioWindow {
        AudioWindow::new(vec![0.0; sample_rate as usize * 2], sample_rate)
    }

    fn next(engine: &DetectionEngine) -> EngineEvent {
        engine.events().recv_timeout(WAIT).unwrap()
    }

    #[test]
    fn test_silence_reports_nothing() {
        let mut engine =
            DetectionEngine::spawn(detector(), ScriptedSource::new(vec![Ok(silence(RATE))]), settings());

        assert_eq!(next(&engine), EngineEvent::Detection(Detection::none()));
        assert_eq!(next(&engine), EngineEvent::Detection(Detection::none()));
        assert!(engine.stop().is_ok());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_source_error_then_recovery() {
        let fault = CaptureError::Stream("unplugged".to_string());
        let source = ScriptedSource::new(vec![Err(fault.clone()), Ok(silence(RATE))]);
        let mut engine = DetectionEngine::spawn(detector(), source, settings());

        assert_eq!(next(&engine), EngineEvent::Detection(Detection::none()));
        assert_eq!(next(&engine), EngineEvent::SourceError(fault));
        assert_eq!(next(&engine), EngineEvent::Detection(Detection::none()));
        assert!(engine.stop().is_ok());
    }

    #[test]
    fn test_rate_change_rebinds() {
        let source = ScriptedSource::new(vec![Ok(silence(22_050))]);
        let mut engine = DetectionEngine::spawn(detector(), source, settings());

        assert_eq!(next(&engine), EngineEvent::SampleRateChanged(22_050));
        assert_eq!(next(&engine), EngineEvent::Detection(Detection::none()));
        // Already bound, no second notification
        assert_eq!(next(&engine), EngineEvent::Detection(Detection::none()));
        assert!(engine.stop().is_ok());
    }

    #[test]
    fn test_invalid_rate_ends_thread() {
        let source = ScriptedSource::new(vec![Ok(silence(500))]);
        let mut engine = DetectionEngine::spawn(detector(), source, settings());

        let expected = CaptureError::Engine(ConfigError::InvalidSampleRate(500));
        assert_eq!(next(&engine), EngineEvent::SourceError(expected.clone()));
        assert_eq!(engine.stop(), Err(expected));
        // Already joined
        assert_eq!(engine.stop(), Ok(()));
    }

    /// Hands out windows pushed by the test, one per tick
    struct FedSource {
        windows: Receiver<(AudioWindow, bool)>,
        restarted: bool,
    }

    impl FedSource {
        fn new(windows: Receiver<(AudioWindow, bool)>) -> Self {
            Self {
                windows,
                restarted: false,
            }
        }
    }

    impl AudioSource for FedSource {
        fn window(&mut self) -> Result<AudioWindow, CaptureError> {
            match self.windows.recv_timeout(WAIT) {
                Ok((window, restarted)) => {
                    self.restarted = restarted;
                    Ok(window)
                }
                Err(_) => Err(CaptureError::Stream("feed closed".to_string())),
            }
        }

        fn restarted(&mut self) -> bool {
            std::mem::take(&mut self.restarted)
        }
    }

    fn tones(notes: &[(f32, f32)]) -> AudioWindow {
        let n = RATE as usize * 2;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                notes
                    .iter()
                    .map(|(f, a)| a * (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum::<f32>()
                    * 0.1
            })
            .collect();
        AudioWindow::new(samples, RATE)
    }

    fn c_major_window() -> AudioWindow {
        tones(&[
            (523.2511, 1.0),
            (587.3295, 0.3),
            (659.2551, 0.8),
            (698.4565, 0.3),
            (783.9909, 0.9),
            (880.0000, 0.3),
            (987.7666, 0.3),
        ])
    }

    fn g_major_window() -> AudioWindow {
        tones(&[
            (391.9954, 1.0),
            (440.0000, 0.3),
            (493.8833, 0.8),
            (523.2511, 0.3),
            (587.3295, 0.9),
            (659.2551, 0.3),
            (739.9888, 0.3),
        ])
    }

    fn detection(engine: &DetectionEngine) -> Detection {
        match next(engine) {
            EngineEvent::Detection(detection) => detection,
            other => panic!("expected a detection, got {:?}", other),
        }
    }

    /// Lock the engine on C major, then show that one G window alone does not move it
    fn locked_on_c(feed: &Sender<(AudioWindow, bool)>, engine: &DetectionEngine) {
        let c_major = Key::major(PitchClass::C);
        let window = c_major_window();
        let mut last = Detection::none();
        for _ in 0..10 {
            feed.send((window.clone(), false)).unwrap();
            last = detection(engine);
        }
        assert_eq!(last.key, Some(c_major));

        feed.send((g_major_window(), false)).unwrap();
        assert_eq!(detection(engine).key, Some(c_major));
    }

    #[test]
    fn test_reset_command_clears_lock() {
        let (feed, windows) = crossbeam_channel::unbounded();
        let mut engine = DetectionEngine::spawn(detector(), FedSource::new(windows), settings());
        locked_on_c(&feed, &engine);

        engine.reset();
        feed.send((g_major_window(), false)).unwrap();
        // Fresh history: the G window is reported as it is
        assert_eq!(detection(&engine).key, Some(Key::major(PitchClass::wrapping(7))));

        drop(feed);
        assert!(engine.stop().is_ok());
    }

    #[test]
    fn test_restarted_source_clears_lock() {
        let (feed, windows) = crossbeam_channel::unbounded();
        let mut engine = DetectionEngine::spawn(detector(), FedSource::new(windows), settings());
        locked_on_c(&feed, &engine);

        // New device at the same rate
        feed.send((g_major_window(), true)).unwrap();
        assert_eq!(detection(&engine).key, Some(Key::major(PitchClass::wrapping(7))));

        drop(feed);
        assert!(engine.stop().is_ok());
    }

    #[test]
    fn test_send_after_exit_is_harmless() {
        let source = ScriptedSource::new(vec![Ok(silence(500))]);
        let mut engine = DetectionEngine::spawn(detector(), source, settings());
        assert!(matches!(next(&engine), EngineEvent::SourceError(_)));
        assert!(engine.stop().is_err());

        engine.reset();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_detector_is_sendable_and_fresh() {
        let detector = detector();
        assert_eq!(detector.phase(), LockPhase::Unlocked);
        let handle = thread::spawn(move || detector.sample_rate());
        assert_eq!(handle.join().unwrap(), RATE);
    }
}
