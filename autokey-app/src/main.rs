//! AutoKey - live musical key tracking
//!
//! Listens to an input device (or replays a file) and reports the key the
//! detector has locked onto, for keeping pitch correction in key.

mod settings;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{select, unbounded, Receiver};

use autokey_analysis::{Detection, Key, KeyDetector};
use autokey_audio::{input_devices, Capture, DetectionEngine, EngineEvent, FileReplay};

use settings::Settings;

const USAGE: &str = "\
usage: autokey [--device NAME] [--config PATH]
       autokey --file PATH [--config PATH]
       autokey --list-devices

live commands: r (reset), d NAME (switch device), q (quit)";

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Live { device: Option<String> },
    File(PathBuf),
    ListDevices,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    mode: Mode,
    config: Option<PathBuf>,
}

fn parse_args<I>(args: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut device = None;
    let mut file = None;
    let mut config = None;
    let mut list = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--device" | "-d" => device = Some(args.next().context("--device needs a name")?),
            "--config" | "-c" => {
                config = Some(PathBuf::from(args.next().context("--config needs a path")?))
            }
            "--file" | "-f" => file = Some(PathBuf::from(args.next().context("--file needs a path")?)),
            "--list-devices" | "-l" => list = true,
            "--help" | "-h" => {
                return Ok(Args {
                    mode: Mode::Help,
                    config,
                })
            }
            other => bail!("unexpected argument `{}`\n\n{}", other, USAGE),
        }
    }

    let mode = match (list, file, device) {
        (true, _, _) => Mode::ListDevices,
        (false, Some(_), Some(_)) => bail!("--file and --device cannot be combined"),
        (false, Some(path), None) => Mode::File(path),
        (false, None, device) => Mode::Live { device },
    };
    Ok(Args { mode, config })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    match args.mode {
        Mode::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        Mode::ListDevices => {
            for name in input_devices()? {
                println!("{}", name);
            }
            Ok(())
        }
        Mode::File(path) => {
            let settings = Settings::load(args.config.as_deref())?;
            run_file(&path, &settings)
        }
        Mode::Live { device } => {
            let settings = Settings::load(args.config.as_deref())?;
            run_live(device.as_deref(), &settings)
        }
    }
}

/// Replay a file and print every change of reported key
fn run_file(path: &Path, settings: &Settings) -> Result<()> {
    let replay = FileReplay::open(path, settings.window_secs, settings.hop_secs)
        .with_context(|| format!("decoding {}", path.display()))?;
    let mut detector = KeyDetector::new(replay.sample_rate(), settings.detector.clone())
        .context("building detector")?;

    let mut tracker = ChangeTracker::default();
    let mut last = Detection::none();
    for timed in replay.windows() {
        let detection = detector.detect_key(&timed.window.samples);
        if tracker.changed(&detection) {
            println!("{:>8.1}s  {}", timed.end_secs, detection);
        }
        last = detection;
    }

    println!("final     {}", last);
    Ok(())
}

/// Capture from a device until `q` or end of input
fn run_live(device: Option<&str>, settings: &Settings) -> Result<()> {
    let mut capture = Capture::open(device, settings.buffer_secs).context("opening input")?;
    let detector = KeyDetector::new(capture.sample_rate(), settings.detector.clone())
        .context("building detector")?;
    let mut engine = DetectionEngine::spawn(detector, capture.source(), settings.engine.clone());

    println!("listening on {}", capture.device_name());
    let input = spawn_stdin_reader();
    let mut tracker = ChangeTracker::default();

    loop {
        select! {
            recv(engine.events()) -> event => match event {
                Ok(EngineEvent::Detection(detection)) => {
                    if tracker.changed(&detection) {
                        println!("{}", detection);
                    }
                }
                Ok(EngineEvent::SampleRateChanged(rate)) => {
                    tracing::info!(sample_rate = rate, "input rate changed");
                }
                Ok(EngineEvent::SourceError(e)) => {
                    tracing::warn!(error = %e, "input error");
                }
                // The engine ended on its own; stop() reports why
                Err(_) => break,
            },
            recv(input) -> line => {
                let Ok(line) = line else { break };
                match line.trim() {
                    "q" | "quit" => break,
                    "r" | "reset" => {
                        engine.reset();
                        println!("reset");
                    }
                    cmd if cmd.starts_with("d ") => {
                        let name = cmd[2..].trim();
                        match capture.switch_device(Some(name)) {
                            Ok(()) => println!("listening on {}", capture.device_name()),
                            Err(e) => eprintln!("cannot switch device: {}", e),
                        }
                    }
                    "" => {}
                    other => eprintln!("unknown command `{}`", other),
                }
            }
        }
    }

    engine.stop().context("detection engine")?;
    Ok(())
}

/// Lines from stdin, closed on EOF
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Remembers the last reported key so only changes are printed
#[derive(Debug, Default)]
struct ChangeTracker {
    last: Option<Option<Key>>,
}

impl ChangeTracker {
    fn changed(&mut self, detection: &Detection) -> bool {
        let changed = self.last != Some(detection.key);
        self.last = Some(detection.key);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autokey_analysis::PitchClass;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_default_is_live_default_device() {
        let parsed = args(&[]).unwrap();
        assert_eq!(parsed.mode, Mode::Live { device: None });
        assert_eq!(parsed.config, None);
    }

    #[test]
    fn test_live_with_device_and_config() {
        let parsed = args(&["--device", "USB Mic", "--config", "/tmp/a.conf"]).unwrap();
        assert_eq!(
            parsed.mode,
            Mode::Live {
                device: Some("USB Mic".to_string())
            }
        );
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/a.conf")));
    }

    #[test]
    fn test_file_mode() {
        let parsed = args(&["--file", "song.flac"]).unwrap();
        assert_eq!(parsed.mode, Mode::File(PathBuf::from("song.flac")));
    }

    #[test]
    fn test_list_devices_wins() {
        assert_eq!(args(&["--device", "x", "-l"]).unwrap().mode, Mode::ListDevices);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["--device"]).is_err());
        assert!(args(&["--file", "a.wav", "--device", "x"]).is_err());
    }

    #[test]
    fn test_change_tracker() {
        let c_major = Key::major(PitchClass::C);
        let mut tracker = ChangeTracker::default();

        assert!(tracker.changed(&Detection::none()));
        assert!(!tracker.changed(&Detection::unreported(0.4)));
        assert!(tracker.changed(&Detection::reported(c_major, 0.8)));
        assert!(!tracker.changed(&Detection::reported(c_major, 0.9)));
        assert!(tracker.changed(&Detection::none()));
    }
}
