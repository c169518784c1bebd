// Audio/video backend (ffmpeg)

use crate::command::{check_path, CommandRunner};
use crate::parse_request;
use async_trait::async_trait;
use mediaflow_core::port::{HealthReport, MediaService, ServiceCapabilities, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::info;

const AUDIO_TYPES: &[&str] = &["mp3", "wav", "aac", "ogg", "flac", "m4a"];
const VIDEO_TYPES: &[&str] = &["mp4", "webm", "mov", "mkv"];
const SAMPLE_RATES: &[u32] = &[8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 96_000];
const MAX_BITRATE_KBPS: u32 = 100_000;

/// Hex (`0xRRGGBB[AA]`) or a plain named color
static WAVEFORM_COLOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:0x[0-9A-Fa-f]{6}(?:[0-9A-Fa-f]{2})?|[A-Za-z]{1,32})$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeKind {
    Audio,
    Video,
}

impl fmt::Display for TranscodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeKind::Audio => f.write_str("audio"),
            TranscodeKind::Video => f.write_str("video"),
        }
    }
}

/// Waveform image rendered from an audio input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformSpec {
    pub output: String,
    #[serde(default = "default_waveform_width")]
    pub width: u32,
    #[serde(default = "default_waveform_height")]
    pub height: u32,
    #[serde(default)]
    pub color: Option<String>,
}

fn default_waveform_width() -> u32 {
    1200
}

fn default_waveform_height() -> u32 {
    240
}

/// Input document for `TranscodeService`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Trim start
    #[serde(default)]
    pub start_ms: Option<u64>,
    /// Trim length
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub waveform: Option<WaveformSpec>,
}

impl TranscodeRequest {
    pub fn validate(&self, kind: TranscodeKind) -> Result<(), ServiceError> {
        check_path("input", &self.input)?;
        check_path("output", &self.output)?;

        for (field, value) in [("container", &self.container), ("codec", &self.codec)] {
            if let Some(value) = value {
                let valid = !value.is_empty()
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                if !valid {
                    return Err(invalid(format!("invalid {}: {:?}", field, value)));
                }
            }
        }
        if let Some(bitrate) = self.bitrate_kbps {
            if bitrate == 0 || bitrate > MAX_BITRATE_KBPS {
                return Err(invalid(format!(
                    "bitrate_kbps {} outside 1..={}",
                    bitrate, MAX_BITRATE_KBPS
                )));
            }
        }
        if let Some(rate) = self.sample_rate {
            if !SAMPLE_RATES.contains(&rate) {
                return Err(invalid(format!("unsupported sample rate {}", rate)));
            }
        }
        if self.duration_ms == Some(0) {
            return Err(invalid("duration_ms must be > 0".into()));
        }
        if let Some(waveform) = &self.waveform {
            if kind != TranscodeKind::Audio {
                return Err(invalid("waveform is only available for audio".into()));
            }
            check_path("waveform.output", &waveform.output)?;
            if waveform.width == 0 || waveform.height == 0 {
                return Err(invalid("waveform dimensions must be > 0".into()));
            }
            if let Some(color) = &waveform.color {
                let valid = WAVEFORM_COLOR
                    .as_ref()
                    .is_some_and(|re| re.is_match(color));
                if !valid {
                    return Err(invalid(format!("invalid waveform color '{}'", color)));
                }
            }
        }
        Ok(())
    }

    /// ffmpeg arguments for the main transcode
    pub fn render_args(&self, kind: TranscodeKind) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];
        // Input-side seek
        if let Some(start) = self.start_ms {
            args.extend(["-ss".into(), seconds(start)]);
        }
        args.extend(["-i".into(), self.input.clone()]);
        if let Some(duration) = self.duration_ms {
            args.extend(["-t".into(), seconds(duration)]);
        }

        let (codec_flag, bitrate_flag) = match kind {
            TranscodeKind::Audio => {
                args.push("-vn".into());
                ("-c:a", "-b:a")
            }
            TranscodeKind::Video => ("-c:v", "-b:v"),
        };
        if let Some(codec) = &self.codec {
            args.extend([codec_flag.into(), codec.clone()]);
        }
        if let Some(bitrate) = self.bitrate_kbps {
            args.extend([bitrate_flag.into(), format!("{}k", bitrate)]);
        }
        if let Some(rate) = self.sample_rate {
            args.extend(["-ar".into(), rate.to_string()]);
        }
        if let Some(container) = &self.container {
            args.extend(["-f".into(), container.clone()]);
        }
        args.push(self.output.clone());
        args
    }
}

impl WaveformSpec {
    /// ffmpeg arguments rendering a single waveform frame from `input`
    pub fn render_args(&self, input: &str) -> Vec<String> {
        let mut filter = format!("showwavespic=s={}x{}", self.width, self.height);
        if let Some(color) = &self.color {
            filter.push_str(&format!(":colors={}", color));
        }
        vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            input.to_string(),
            "-filter_complex".into(),
            filter,
            "-frames:v".into(),
            "1".into(),
            self.output.clone(),
        ]
    }
}

/// Milliseconds as ffmpeg seconds ("12.345")
fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn invalid(message: String) -> ServiceError {
    ServiceError::InvalidInput(message)
}

/// ffmpeg-backed audio or video service
pub struct TranscodeService {
    kind: TranscodeKind,
    name: String,
    runner: CommandRunner,
    binary: String,
}

impl TranscodeService {
    pub fn new(kind: TranscodeKind, runner: CommandRunner, binary: impl Into<String>) -> Self {
        Self {
            kind,
            name: format!("ffmpeg-{}", kind),
            runner,
            binary: binary.into(),
        }
    }

    pub fn kind(&self) -> TranscodeKind {
        self.kind
    }
}

#[async_trait]
impl MediaService for TranscodeService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_media(
        &self,
        input: &serde_json::Value,
        _options: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let request: TranscodeRequest = parse_request(input)?;
        request.validate(self.kind)?;

        let transcode = self
            .runner
            .run(&self.binary, &request.render_args(self.kind))
            .await?;
        let mut duration_ms = transcode.duration_ms;

        let waveform = match &request.waveform {
            Some(spec) => {
                let output = self
                    .runner
                    .run(&self.binary, &spec.render_args(&request.input))
                    .await?;
                duration_ms += output.duration_ms;
                Some(spec.output.clone())
            }
            None => None,
        };

        info!(
            kind = %self.kind,
            input = %request.input,
            output = %request.output,
            waveform = waveform.is_some(),
            duration_ms,
            "Transcode completed"
        );
        Ok(json!({
            "output": request.output,
            "waveform": waveform,
            "duration_ms": duration_ms,
        }))
    }

    async fn validate_input(
        &self,
        input: &serde_json::Value,
        _options: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let request: TranscodeRequest = parse_request(input)?;
        request.validate(self.kind)
    }

    fn supported_types(&self) -> Vec<String> {
        let types = match self.kind {
            TranscodeKind::Audio => AUDIO_TYPES,
            TranscodeKind::Video => VIDEO_TYPES,
        };
        types.iter().map(|t| t.to_string()).collect()
    }

    fn capabilities(&self) -> ServiceCapabilities {
        let mut operations = vec!["transcode".to_string(), "trim".to_string()];
        if self.kind == TranscodeKind::Audio {
            operations.push("waveform".to_string());
        }
        ServiceCapabilities {
            operations,
            max_input_bytes: None,
            max_concurrency: None,
        }
    }

    async fn health_check(&self) -> Result<HealthReport, ServiceError> {
        match self.runner.probe(&self.binary, "-version").await {
            Ok(version) => Ok(HealthReport {
                healthy: true,
                message: Some(version),
            }),
            Err(e) => Ok(HealthReport::unhealthy(e.to_string())),
        }
    }

    async fn cleanup(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> TranscodeRequest {
        TranscodeRequest {
            input: "raw/intro.wav".into(),
            output: "out/intro.mp3".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_audio_args() {
        let req = TranscodeRequest {
            codec: Some("libmp3lame".into()),
            bitrate_kbps: Some(192),
            sample_rate: Some(44_100),
            start_ms: Some(1_500),
            duration_ms: Some(30_000),
            ..request()
        };

        assert_eq!(
            req.render_args(TranscodeKind::Audio),
            vec![
                "-hide_banner",
                "-y",
                "-ss",
                "1.500",
                "-i",
                "raw/intro.wav",
                "-t",
                "30.000",
                "-vn",
                "-c:a",
                "libmp3lame",
                "-b:a",
                "192k",
                "-ar",
                "44100",
                "out/intro.mp3"
            ]
        );
    }

    #[test]
    fn test_video_args_use_video_flags() {
        let req = TranscodeRequest {
            input: "raw/intro.mov".into(),
            output: "out/intro.webm".into(),
            codec: Some("libvpx-vp9".into()),
            bitrate_kbps: Some(2_000),
            container: Some("webm".into()),
            ..Default::default()
        };
        let args = req.render_args(TranscodeKind::Video);

        assert!(!args.contains(&"-vn".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libvpx-vp9"]));
        assert!(args.windows(2).any(|w| w == ["-b:v", "2000k"]));
        assert!(args.windows(2).any(|w| w == ["-f", "webm"]));
    }

    #[test]
    fn test_waveform_args() {
        let spec = WaveformSpec {
            output: "out/wave.png".into(),
            width: 800,
            height: 120,
            color: Some("0x2b6cb0".into()),
        };
        let args = spec.render_args("raw/intro.wav");
        assert_eq!(args[5], "showwavespic=s=800x120:colors=0x2b6cb0");
        assert_eq!(args.last().map(String::as_str), Some("out/wave.png"));
    }

    #[test]
    fn test_validation() {
        assert!(request().validate(TranscodeKind::Audio).is_ok());

        let bad_rate = TranscodeRequest {
            sample_rate: Some(12_345),
            ..request()
        };
        assert!(bad_rate.validate(TranscodeKind::Audio).is_err());

        let bad_codec = TranscodeRequest {
            codec: Some("aac; rm -rf".into()),
            ..request()
        };
        assert!(bad_codec.validate(TranscodeKind::Audio).is_err());

        let video_waveform = TranscodeRequest {
            waveform: Some(WaveformSpec {
                output: "w.png".into(),
                width: 10,
                height: 10,
                color: None,
            }),
            ..request()
        };
        assert!(video_waveform.validate(TranscodeKind::Audio).is_ok());
        assert!(video_waveform.validate(TranscodeKind::Video).is_err());

        let flag_output = TranscodeRequest {
            output: "-f".into(),
            ..request()
        };
        assert!(flag_output.validate(TranscodeKind::Audio).is_err());
    }

    #[test]
    fn test_waveform_color_validation() {
        let with_color = |color: &str| TranscodeRequest {
            waveform: Some(WaveformSpec {
                output: "w.png".into(),
                width: 10,
                height: 10,
                color: Some(color.into()),
            }),
            ..request()
        };

        for ok in ["0x2b6cb0", "0x2b6cb0ff", "steelblue", "Red"] {
            assert!(with_color(ok).validate(TranscodeKind::Audio).is_ok(), "{ok}");
        }
        for bad in ["red,split[a][b]", "0x12", "0x2b6cb0f", "blue;drop", "", "0xzzzzzz"] {
            assert!(with_color(bad).validate(TranscodeKind::Audio).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_waveform_defaults() {
        let req: TranscodeRequest = serde_json::from_value(json!({
            "input": "a.wav",
            "output": "a.mp3",
            "waveform": {"output": "a.png"}
        }))
        .unwrap();
        let waveform = req.waveform.unwrap();
        assert_eq!((waveform.width, waveform.height), (1200, 240));
    }

    #[tokio::test]
    async fn test_service_metadata() {
        let service = TranscodeService::new(
            TranscodeKind::Audio,
            CommandRunner::new(vec![], Duration::from_secs(1)),
            "ffmpeg",
        );
        assert_eq!(service.name(), "ffmpeg-audio");
        assert!(service.supported_types().contains(&"wav".to_string()));
        assert!(service
            .capabilities()
            .operations
            .contains(&"waveform".to_string()));

        let missing_input = json!({"output": "x.mp3"});
        assert!(matches!(
            service.validate_input(&missing_input, &json!({})).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
