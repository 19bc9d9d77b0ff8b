//! Audio track extraction through an external ffmpeg binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::AudioExtractor;
use crate::error::MediaError;

const OUTPUT_NAME: &str = "flashdeck_startle_audio.wav";

/// Writes the audio track of a video to a fixed WAV file in `output_dir`.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    pub program: PathBuf,
    pub output_dir: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(program: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_NAME)
    }
}

impl AudioExtractor for FfmpegExtractor {
    fn extract(&self, video: &Path) -> Result<PathBuf, MediaError> {
        let out = self.output_path();
        let failed = |message: String| MediaError::ExtractionFailed {
            path: video.to_path_buf(),
            message,
        };

        let status = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar", "44100", "-ac", "2"])
            .arg(&out)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| failed(e.to_string()))?;

        if !status.success() {
            return Err(failed(format!("ffmpeg exited with {status}")));
        }
        if !out.exists() {
            return Err(failed("no audio written".into()));
        }
        debug!(video = %video.display(), audio = %out.display(), "audio extracted");
        Ok(out)
    }
}
