//! Signal Hunter console entrypoint.
//!
//! Proxies the chosen input device to the chosen output device and reports
//! anomalies and template matches as they are detected.
//!
//! # Threads
//!
//! - Capture and analysis workers: owned by [`AudioProxyPipeline`]
//! - Event printer: drains the observer channel and prints detections
//! - Stdin reader: forwards console commands until EOF

mod cli_utils;
mod commands;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use signal_hunter::audio::{self, CpalBackend, DeviceDirection};
use signal_hunter::dsp::SignalTemplate;
use signal_hunter::telemetry::init_tracing;
use signal_hunter::{
    load_template_set, AudioProxyPipeline, ChannelObserver, DetectionReport, EngineConfig,
    EngineEvent, EngineResult, JsonTemplateStore, PipelineHandle, PipelineStats, TemplateStore,
};
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::cli_utils::{describe_device, list_devices, resolve_device};
use crate::commands::{parse_command, ConsoleCommand, HELP};

const EVENT_QUEUE_CAPACITY: usize = 256;

fn main() -> Result<()> {
    let config = EngineConfig::parse_args()?;

    if let Some(path) = init_tracing(&config) {
        eprintln!("Trace log: {}", path.display());
    }

    if config.list_devices {
        return list_devices();
    }

    let store = JsonTemplateStore::open(&config.template_dir)
        .with_context(|| format!("failed to open {}", config.template_dir.display()))?;
    let templates = load_template_set(&store).context("failed to load templates")?;
    println!(
        "Loaded {} template(s) from {}",
        templates.len(),
        store.dir().display()
    );

    let devices = if config.input_device.is_some() || config.output_device.is_some() {
        audio::list_devices().context("failed to list audio devices")?
    } else {
        Vec::new()
    };
    let input = resolve_device(
        &devices,
        config.input_device.as_deref(),
        DeviceDirection::Capture,
    )?;
    let output = resolve_device(
        &devices,
        config.output_device.as_deref(),
        DeviceDirection::Render,
    )?;

    let (observer, events) = ChannelObserver::bounded(EVENT_QUEUE_CAPACITY);
    let mut pipeline = AudioProxyPipeline::new(config.pipeline_config());
    let handle = pipeline
        .start(&CpalBackend::new(), &input, &output, templates, Arc::new(observer))
        .context("failed to start the audio proxy")?;
    handle.calibrate(config.calibration_frames)?;

    println!("Signal Hunter running");
    println!("  input:  {}", describe_device(handle.input_device()));
    println!("  output: {}", describe_device(handle.output_device()));
    println!(
        "Calibrating on the next {} frames; keep the band quiet.",
        config.calibration_frames
    );
    println!("Press Enter (or Ctrl-D) to stop. Type 'help' for commands.");

    let (stopped_tx, stopped_rx) = bounded(1);
    let printer = spawn_event_printer(events, stopped_tx);
    let lines = spawn_stdin_reader();

    let export_dir = config.export_dir.clone().unwrap_or_else(std::env::temp_dir);
    let console = Console {
        handle: &handle,
        store: &store,
        export_dir: &export_dir,
        calibration_frames: config.calibration_frames,
    };
    console.run(&lines, &stopped_rx);

    let stats = pipeline.stop().context("failed to stop the audio proxy")?;
    let flushed = pipeline.flush_black_box(&export_dir);
    // The handle and the pipeline hold the last observer senders.
    drop(handle);
    drop(pipeline);
    if printer.join().is_err() {
        warn!("event printer panicked");
    }

    println!("{}", format_stats(&stats));
    match flushed {
        Ok(path) => println!("Black box written to {}", path.display()),
        Err(err) => eprintln!("Black box not written: {err}"),
    }
    Ok(())
}

struct Console<'a> {
    handle: &'a PipelineHandle,
    store: &'a JsonTemplateStore,
    export_dir: &'a Path,
    calibration_frames: usize,
}

impl Console<'_> {
    fn run(&self, lines: &Receiver<String>, stopped: &Receiver<()>) {
        loop {
            let line = select! {
                recv(lines) -> line => match line {
                    Ok(line) => line,
                    Err(_) => return,
                },
                recv(stopped) -> _ => {
                    eprintln!("Pipeline stopped on its own.");
                    return;
                }
            };
            match parse_command(&line) {
                ConsoleCommand::Quit => return,
                ConsoleCommand::Help => println!("{HELP}"),
                command => report(self.execute(command)),
            }
        }
    }

    fn execute(&self, command: ConsoleCommand) -> EngineResult<String> {
        match command {
            ConsoleCommand::Calibrate => {
                self.handle.calibrate(self.calibration_frames)?;
                Ok("Recalibrating; keep the band quiet.".to_string())
            }
            ConsoleCommand::ResetNoise => {
                self.handle.reset_noise()?;
                Ok("Noise model cleared.".to_string())
            }
            ConsoleCommand::Snapshot => {
                let context = serde_json::json!({ "trigger": "console" });
                let receipt = self.handle.export_snapshot(self.export_dir, &context)?;
                Ok(format!(
                    "Snapshot written to {} (sha256 {})",
                    receipt.directory.display(),
                    receipt.sha256
                ))
            }
            ConsoleCommand::SaveTemplate { name, shape } => {
                let data = self.handle.capture_template(shape)?;
                let template = SignalTemplate::new(name.as_str(), data.clone())?;
                self.store.save(&name, &data)?;
                self.handle.upsert_template(template)?;
                Ok(format!("Template '{name}' saved."))
            }
            ConsoleCommand::DeleteTemplate(name) => {
                let removed = self.store.delete(&name)?;
                self.handle.remove_template(&name)?;
                Ok(if removed {
                    format!("Template '{name}' deleted.")
                } else {
                    format!("No template named '{name}'.")
                })
            }
            ConsoleCommand::Stats => {
                let black_box = self.handle.black_box()?;
                Ok(format!(
                    "{}\nBlack box holds {:.1}s of audio",
                    format_stats(&self.handle.stats()),
                    black_box.buffered_seconds()
                ))
            }
            ConsoleCommand::Unknown(text) => Ok(format!("Unknown command '{text}'; try 'help'.")),
            ConsoleCommand::Quit | ConsoleCommand::Help => Ok(String::new()),
        }
    }
}

fn report(outcome: EngineResult<String>) {
    match outcome {
        Ok(message) => println!("{message}"),
        Err(err) => eprintln!("{err}"),
    }
}

fn spawn_event_printer(
    events: Receiver<EngineEvent>,
    stopped: Sender<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events.iter() {
            match event {
                EngineEvent::Detection(report) if report.detected => {
                    println!("{}", format_detection(&report));
                }
                EngineEvent::Calibrated { frames } => {
                    println!("Noise floor calibrated from {frames} frames.");
                }
                EngineEvent::Fault(fault) => {
                    eprintln!(
                        "{} fault: {} ({} in a row)",
                        if fault.fatal { "Fatal" } else { "Stream" },
                        fault.error,
                        fault.consecutive
                    );
                    if fault.fatal {
                        let _ = stopped.try_send(());
                    }
                }
                EngineEvent::Stopped { stats } => {
                    info!(analyzed = stats.frames_analyzed, "pipeline stopped");
                }
                _ => {}
            }
        }
    })
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = bounded(4);
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn format_detection(report: &DetectionReport) -> String {
    let mut line = format!("[#{}] anomaly", report.sequence);
    if let Some(z) = report.max_z {
        line.push_str(&format!(" z={z:.1}"));
    }
    if let Some(freq) = report.peak_frequency_hz {
        line.push_str(&format!(" peak={freq:.0}Hz"));
    }
    if let Some(traits) = &report.characteristics {
        line.push_str(&format!(
            " bw={:.0}Hz centroid={:.0}Hz",
            traits.bandwidth_hz, traits.spectral_centroid_hz
        ));
        if let Some(snr) = traits.snr_db {
            line.push_str(&format!(" snr={snr:.1}dB"));
        }
    }
    match (&report.match_name, report.match_score) {
        (Some(name), Some(score)) => line.push_str(&format!(" match={name} ({score:.2})")),
        (None, Some(score)) => line.push_str(&format!(" unidentified (best {score:.2})")),
        _ => {}
    }
    line
}

fn format_stats(stats: &PipelineStats) -> String {
    format!(
        "Frames: captured {} forwarded {} analyzed {} dropped {} | stream faults {} | events dropped {}",
        stats.frames_captured,
        stats.frames_forwarded,
        stats.frames_analyzed,
        stats.frames_dropped,
        stats.stream_faults,
        stats.observer_drops
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_lists_match_and_traits() {
        let report = DetectionReport {
            sequence: 42,
            detected: true,
            max_z: Some(12.5),
            peak_frequency_hz: Some(1_000.0),
            match_name: Some("beacon".to_string()),
            match_score: Some(0.91),
            ..DetectionReport::default()
        };
        assert_eq!(
            format_detection(&report),
            "[#42] anomaly z=12.5 peak=1000Hz match=beacon (0.91)"
        );
    }

    #[test]
    fn format_stats_lists_every_counter() {
        let stats = PipelineStats {
            frames_captured: 10,
            frames_forwarded: 9,
            frames_analyzed: 7,
            frames_dropped: 2,
            stream_faults: 1,
            observer_drops: 3,
        };
        assert_eq!(
            format_stats(&stats),
            "Frames: captured 10 forwarded 9 analyzed 7 dropped 2 | stream faults 1 | events dropped 3"
        );
    }

    #[test]
    fn format_detection_reports_unidentified_score() {
        let report = DetectionReport {
            sequence: 7,
            detected: true,
            match_score: Some(0.4),
            ..DetectionReport::default()
        };
        assert_eq!(format_detection(&report), "[#7] anomaly unidentified (best 0.40)");
    }
}
