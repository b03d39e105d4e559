use crate::cost::Mode;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use log::info;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process::Command;

// skidsteer-{mode}-{日時}.mp4
pub fn video_filename(mode: Mode, now: DateTime<Utc>) -> String {
    format!("skidsteer-{}-{}.mp4", mode.label(), now.format("%Y-%m-%d_%H%M%S"))
}

/// ffmpeg による連番 PNG の MP4 エンコード
#[derive(Debug, Clone)]
pub struct Encoder {
    pub program: String,
    pub fps: u32,
    pub crf: u32,
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            fps: 16,
            crf: 25,
        }
    }
}

impl Encoder {
    pub fn args(&self, frames_dir: &Path, out: &Path) -> Vec<OsString> {
        let pattern = frames_dir.join("%03d.png");
        vec![
            "-r".into(),
            self.fps.to_string().into(),
            "-f".into(),
            "image2".into(),
            "-i".into(),
            pattern.into_os_string(),
            "-vcodec".into(),
            "libx264".into(),
            "-crf".into(),
            self.crf.to_string().into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            out.as_os_str().to_owned(),
        ]
    }

    pub fn encode(&self, frames_dir: &Path, out: &Path) -> Result<()> {
        // 古い動画があれば消す
        if out.exists() {
            fs::remove_file(out).with_context(|| format!("Failed to remove {}", out.display()))?;
        }

        let status = Command::new(&self.program)
            .args(self.args(frames_dir, out))
            .status()
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        info!("Saving video to: {}", out.display());
        Ok(())
    }
}

// base64 で埋め込んだ <video> タグ
pub fn embed_html(video: &[u8]) -> String {
    format!(
        r#"<video alt="test" controls>
    <source src="data:video/mp4;base64,{}" type="video/mp4" />
</video>
"#,
        STANDARD.encode(video)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_uses_mode_and_utc_stamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(
            video_filename(Mode::Swingup, now),
            "skidsteer-swingup-2024-03-05_070809.mp4"
        );
        assert_eq!(video_filename(Mode::Spin, now), "skidsteer-spin-2024-03-05_070809.mp4");
    }

    #[test]
    fn ffmpeg_arguments() {
        let args = Encoder::default().args(Path::new("/tmp/frames"), Path::new("out.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "-r", "16", "-f", "image2", "-i", "/tmp/frames/%03d.png", "-vcodec", "libx264",
                "-crf", "25", "-pix_fmt", "yuv420p", "out.mp4"
            ]
        );
    }

    #[test]
    fn failing_encoder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Encoder {
            program: "false".to_string(),
            ..Default::default()
        };
        assert!(encoder.encode(dir.path(), &dir.path().join("out.mp4")).is_err());
    }

    #[test]
    fn missing_encoder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Encoder {
            program: "no-such-encoder-binary".to_string(),
            ..Default::default()
        };
        assert!(encoder.encode(dir.path(), &dir.path().join("out.mp4")).is_err());
    }

    #[test]
    fn stale_output_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        fs::write(&out, b"old").unwrap();
        let encoder = Encoder {
            program: "true".to_string(),
            ..Default::default()
        };
        encoder.encode(dir.path(), &out).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn html_embeds_base64() {
        let html = embed_html(b"abc");
        assert!(html.contains("data:video/mp4;base64,YWJj"));
        assert!(html.starts_with("<video"));
    }
}
