use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    systems::crossing::{CountingLine, CrossingCounter, FrameOutcome, LineOrientation},
    tracking::{TrackedDetection, TrackedFrame},
};

pub const PROGRESS_EVERY_FRAMES: u64 = 500;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

fn default_fps() -> f32 {
    25.0
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f32,
    /// Zero if unknown
    #[serde(default)]
    pub total_frames: u64,
}

/// Per-frame tracked detections of one video, in frame order
pub trait TrackSource {
    fn info(&self) -> VideoInfo;

    /// None once the video is exhausted. An error means the source itself
    /// can no longer be read.
    fn next_frame(&mut self) -> Option<Result<TrackedFrame>>;
}

/// Track file with a [`VideoInfo`] header line followed by one
/// [`TrackedFrame`] per line. Lines are read as raw bytes so that one
/// corrupt line (bad JSON or bad UTF-8) only costs that frame.
pub struct JsonLinesTrackSource<R: BufRead> {
    info: VideoInfo,
    reader: R,
    buf: Vec<u8>,
    line_number: usize,
    frames_read: u64,
}

impl JsonLinesTrackSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("could not open track file {:?}", path))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("could not read track file {:?}", path))
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

impl<R: BufRead> JsonLinesTrackSource<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut source = JsonLinesTrackSource {
            info: VideoInfo {
                width: 0,
                height: 0,
                fps: default_fps(),
                total_frames: 0,
            },
            reader,
            buf: Vec::new(),
            line_number: 0,
            frames_read: 0,
        };

        loop {
            if !source.read_line()? {
                bail!("track file is empty");
            }
            if !is_blank(&source.buf) {
                break;
            }
        }

        source.info = serde_json::from_slice(&source.buf)
            .map_err(|e| anyhow!("invalid header on line {}: {e}", source.line_number))?;

        Ok(source)
    }

    /// Next raw line into `buf`; false at end of input
    fn read_line(&mut self) -> std::io::Result<bool> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        Ok(true)
    }
}

impl<R: BufRead> TrackSource for JsonLinesTrackSource<R> {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Option<Result<TrackedFrame>> {
        loop {
            match self.read_line() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e.into())),
            }
            if is_blank(&self.buf) {
                continue;
            }
            self.frames_read += 1;

            return Some(Ok(match serde_json::from_slice::<TrackedFrame>(&self.buf) {
                Ok(frame) => frame,
                Err(e) => {
                    // One bad line only costs that frame
                    warn!(
                        "Unreadable detections on line {}: {}; treating as empty frame",
                        self.line_number, e
                    );
                    TrackedFrame {
                        frame: self.frames_read,
                        detections: Vec::new(),
                    }
                }
            }));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    /// Vertical line position as a fraction of frame width
    pub vline: Option<f32>,
    /// Horizontal line position as a fraction of frame height
    pub hline: Option<f32>,
    pub confidence_threshold: f32,
    pub model: String,
    /// Recorded as `video_file` in the report
    pub video_id: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            vline: None,
            hline: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            model: String::from("unknown"),
            video_id: String::from("unknown"),
        }
    }
}

/// Written once at the end of a counting run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CountReport {
    pub video_file: String,
    pub box_count: usize,
    pub frames_processed: u64,
    pub processing_time_seconds: f64,
    pub processing_fps: f64,
    pub line_type: LineOrientation,
    pub line_position: f32,
    pub line_pixel: f32,
    pub confidence_threshold: f32,
    pub model: String,
    pub timestamp: String,
}

fn round_tenths(v: f64) -> f64 {
    (v * 10.).round() / 10.
}

/// Run every frame of `source` through a [`CrossingCounter`]. `on_frame` sees
/// each frame with its outcome (for annotation or display).
pub fn run_analysis<T, F>(
    source: &mut T,
    settings: &AnalysisSettings,
    mut on_frame: F,
) -> Result<CountReport>
where
    T: TrackSource + ?Sized,
    F: FnMut(&TrackedFrame, &FrameOutcome),
{
    let video = source.info();
    if video.width == 0 || video.height == 0 {
        bail!(
            "track source reports an empty frame size ({}x{})",
            video.width,
            video.height
        );
    }
    info!(
        "Video: {}x{} @ {:.1}fps, {} frames",
        video.width, video.height, video.fps, video.total_frames
    );

    let line = CountingLine::from_fractions(settings.vline, settings.hline, video.width, video.height);
    let fraction = line.fraction.unwrap_or_default();
    match line.orientation {
        LineOrientation::Vertical => info!(
            "Counting line: vertical at X={} ({:.0}% from left)",
            line.position,
            fraction * 100.
        ),
        LineOrientation::Horizontal => info!(
            "Counting line: horizontal at Y={} ({:.0}% from top)",
            line.position,
            fraction * 100.
        ),
    }

    let mut counter = CrossingCounter::new(line);
    let start_time = Instant::now();

    while let Some(next) = source.next_frame() {
        let frame = next?;
        let detections: Vec<TrackedDetection> = frame
            .detections
            .iter()
            .filter(|d| d.confidence >= settings.confidence_threshold)
            .cloned()
            .collect();
        if detections.len() < frame.detections.len() {
            debug!(
                "Frame {}: {} detection(s) below confidence {}",
                frame.frame,
                frame.detections.len() - detections.len(),
                settings.confidence_threshold
            );
        }

        let outcome = counter.process_frame(&detections);
        on_frame(&frame, &outcome);

        let frames = counter.frames_processed();
        if frames % PROGRESS_EVERY_FRAMES == 0 {
            let elapsed = start_time.elapsed().as_secs_f64();
            let pct = if video.total_frames > 0 {
                frames as f64 / video.total_frames as f64 * 100.
            } else {
                0.
            };
            let fps = if elapsed > 0. { frames as f64 / elapsed } else { 0. };
            info!(
                "Progress: {}/{} ({:.0}%) - {:.1} fps processing - boxes so far: {}",
                frames,
                video.total_frames,
                pct,
                fps,
                counter.total()
            );
        }
    }

    let elapsed = start_time.elapsed().as_secs_f64();
    let frames = counter.frames_processed();
    let fps = if elapsed > 0. { frames as f64 / elapsed } else { 0. };
    info!(
        "Analysis complete: {} frames in {:.1}s ({:.1} fps)",
        frames, elapsed, fps
    );
    info!("Total boxes counted: {}", counter.total());

    let line = counter.line();
    Ok(CountReport {
        video_file: settings.video_id.clone(),
        box_count: counter.total(),
        frames_processed: frames,
        processing_time_seconds: round_tenths(elapsed),
        processing_fps: round_tenths(fps),
        line_type: line.orientation,
        line_position: fraction,
        line_pixel: line.position,
        confidence_threshold: settings.confidence_threshold,
        model: settings.model.clone(),
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

/// File stem used to name the result file for a video
pub fn report_stem(video_id: &str) -> String {
    Path::new(video_id)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| String::from("video"))
}

/// Writes `result_<stem>.json` into `results_dir`, creating it if needed
pub fn write_report(report: &CountReport, results_dir: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(results_dir)
        .with_context(|| format!("could not create results directory {:?}", results_dir))?;
    let path = results_dir.join(format!("result_{stem}.json"));
    let text = serde_json::to_string_pretty(report)?;
    fs::write(&path, text).with_context(|| format!("could not write {:?}", path))?;
    info!("Results saved: {:?}", path);
    Ok(path)
}
