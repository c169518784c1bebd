// Image backend (ImageMagick)
//
// Operations are planned in pure code first (geometry and format only), then
// rendered to a single `magick` invocation.

use crate::command::{check_path, CommandRunner};
use crate::parse_request;
use async_trait::async_trait;
use mediaflow_core::port::{HealthReport, MediaService, ServiceCapabilities, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

const SUPPORTED_FORMATS: &[&str] = &["png", "jpeg", "jpg", "webp", "gif", "tiff", "bmp"];
const MAX_DIMENSION: u32 = 16_384;

/// Geometry and format of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// A single image transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ImageOperation {
    /// Fit inside `width`x`height` (aspect kept) or stretch to it exactly
    Resize {
        width: u32,
        height: u32,
        #[serde(default = "default_true")]
        keep_aspect: bool,
    },
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Rotate {
        degrees: i32,
    },
    Convert {
        format: String,
    },
    /// Lossy quality 1..=100
    Compress {
        quality: u8,
    },
    Grayscale,
}

fn default_true() -> bool {
    true
}

impl ImageOperation {
    pub fn name(&self) -> &'static str {
        match self {
            ImageOperation::Resize { .. } => "resize",
            ImageOperation::Crop { .. } => "crop",
            ImageOperation::Rotate { .. } => "rotate",
            ImageOperation::Convert { .. } => "convert",
            ImageOperation::Compress { .. } => "compress",
            ImageOperation::Grayscale => "grayscale",
        }
    }

    /// Parameter checks that need no source image
    pub fn validate(&self) -> Result<(), ServiceError> {
        match self {
            ImageOperation::Resize { width, height, .. } => check_dimensions(*width, *height),
            ImageOperation::Crop { width, height, .. } => check_dimensions(*width, *height),
            ImageOperation::Rotate { .. } | ImageOperation::Grayscale => Ok(()),
            ImageOperation::Convert { format } => check_format(format),
            ImageOperation::Compress { quality } => {
                if (1..=100).contains(quality) {
                    Ok(())
                } else {
                    Err(invalid(format!("quality {} outside 1..=100", quality)))
                }
            }
        }
    }

    /// Geometry/format after applying this operation to `info`
    pub fn apply(&self, info: &ImageInfo) -> Result<ImageInfo, ServiceError> {
        self.validate()?;
        let mut next = info.clone();

        match self {
            ImageOperation::Resize {
                width,
                height,
                keep_aspect,
            } => {
                if *keep_aspect {
                    let scale = f64::min(
                        f64::from(*width) / f64::from(info.width),
                        f64::from(*height) / f64::from(info.height),
                    );
                    next.width = scaled(info.width, scale);
                    next.height = scaled(info.height, scale);
                } else {
                    next.width = *width;
                    next.height = *height;
                }
            }
            ImageOperation::Crop {
                x,
                y,
                width,
                height,
            } => {
                let fits_x = x.checked_add(*width).is_some_and(|r| r <= info.width);
                let fits_y = y.checked_add(*height).is_some_and(|b| b <= info.height);
                if !(fits_x && fits_y) {
                    return Err(invalid(format!(
                        "crop {}x{}+{}+{} exceeds {}x{} image",
                        width, height, x, y, info.width, info.height
                    )));
                }
                next.width = *width;
                next.height = *height;
            }
            ImageOperation::Rotate { degrees } => {
                // Bounding box of the rotated rectangle
                let radians = f64::from(degrees.rem_euclid(360)).to_radians();
                let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
                let (w, h) = (f64::from(info.width), f64::from(info.height));
                next.width = (w * cos + h * sin).round().max(1.0) as u32;
                next.height = (w * sin + h * cos).round().max(1.0) as u32;
            }
            ImageOperation::Convert { format } => next.format = format.to_lowercase(),
            ImageOperation::Compress { .. } | ImageOperation::Grayscale => {}
        }
        Ok(next)
    }

    /// ImageMagick arguments for this operation
    pub fn render_args(&self) -> Vec<String> {
        match self {
            ImageOperation::Resize {
                width,
                height,
                keep_aspect,
            } => {
                let suffix = if *keep_aspect { "" } else { "!" };
                vec!["-resize".into(), format!("{}x{}{}", width, height, suffix)]
            }
            ImageOperation::Crop {
                x,
                y,
                width,
                height,
            } => vec![
                "-crop".into(),
                format!("{}x{}+{}+{}", width, height, x, y),
                "+repage".into(),
            ],
            ImageOperation::Rotate { degrees } => vec!["-rotate".into(), degrees.to_string()],
            // Output format is carried by the output path prefix
            ImageOperation::Convert { .. } => Vec::new(),
            ImageOperation::Compress { quality } => vec!["-quality".into(), quality.to_string()],
            ImageOperation::Grayscale => vec!["-colorspace".into(), "Gray".into()],
        }
    }
}

fn scaled(value: u32, scale: f64) -> u32 {
    (f64::from(value) * scale).round().max(1.0) as u32
}

fn invalid(message: String) -> ServiceError {
    ServiceError::InvalidInput(message)
}

fn check_dimensions(width: u32, height: u32) -> Result<(), ServiceError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(invalid(format!(
            "dimensions {}x{} outside 1..={}",
            width, height, MAX_DIMENSION
        )));
    }
    Ok(())
}

fn check_format(format: &str) -> Result<(), ServiceError> {
    if SUPPORTED_FORMATS.contains(&format.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(invalid(format!("unsupported image format: {}", format)))
    }
}

/// Input document for `ImageService`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub input: String,
    pub output: String,
    /// Known source geometry; identified with the tool when absent
    #[serde(default)]
    pub source: Option<ImageInfo>,
    #[serde(default)]
    pub operations: Vec<ImageOperation>,
}

impl ImageRequest {
    /// Fold every operation over `source`
    pub fn plan(&self, source: &ImageInfo) -> Result<ImageInfo, ServiceError> {
        self.operations
            .iter()
            .try_fold(source.clone(), |info, op| op.apply(&info))
    }

    /// Full argument list: input, operations, then output
    pub fn render_args(&self, strip_metadata: bool) -> Vec<String> {
        let mut args = vec![self.input.clone()];
        if strip_metadata {
            args.push("-strip".into());
        }
        args.extend(self.operations.iter().flat_map(ImageOperation::render_args));

        let target_format = self.operations.iter().rev().find_map(|op| match op {
            ImageOperation::Convert { format } => Some(format.to_lowercase()),
            _ => None,
        });
        args.push(match target_format {
            Some(format) => format!("{}:{}", format, self.output),
            None => self.output.clone(),
        });
        args
    }

    fn validate(&self) -> Result<(), ServiceError> {
        check_path("input", &self.input)?;
        check_path("output", &self.output)?;
        if self.operations.is_empty() {
            return Err(invalid("at least one operation is required".into()));
        }
        for op in &self.operations {
            op.validate()?;
        }
        match &self.source {
            Some(source) => self.plan(source).map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Parse `identify -format "%w %h %m"` output
fn parse_identify(stdout: &str) -> Result<ImageInfo, ServiceError> {
    let mut parts = stdout.split_whitespace();
    let mut dimension = |name: &str| -> Result<u32, ServiceError> {
        parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ServiceError::Failed(format!("identify returned no {}", name)))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;
    let format = parts
        .next()
        .map(str::to_lowercase)
        .ok_or_else(|| ServiceError::Failed("identify returned no format".into()))?;
    Ok(ImageInfo {
        width,
        height,
        format,
    })
}

/// ImageMagick-backed image service
pub struct ImageService {
    runner: CommandRunner,
    binary: String,
}

impl ImageService {
    pub fn new(runner: CommandRunner, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    async fn identify(&self, path: &str) -> Result<ImageInfo, ServiceError> {
        let args = vec![
            "identify".to_string(),
            "-format".to_string(),
            "%w %h %m".to_string(),
            path.to_string(),
        ];
        let output = self.runner.run(&self.binary, &args).await?;
        parse_identify(&output.stdout)
    }
}

#[async_trait]
impl MediaService for ImageService {
    fn name(&self) -> &str {
        "imagemagick"
    }

    async fn process_media(
        &self,
        input: &serde_json::Value,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let request: ImageRequest = parse_request(input)?;
        request.validate()?;

        let source = match &request.source {
            Some(source) => source.clone(),
            None => self.identify(&request.input).await?,
        };
        let planned = request.plan(&source)?;

        let strip = options
            .get("strip_metadata")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let output = self
            .runner
            .run(&self.binary, &request.render_args(strip))
            .await?;

        info!(
            input = %request.input,
            output = %request.output,
            operations = request.operations.len(),
            width = planned.width,
            height = planned.height,
            "Image processed"
        );
        Ok(json!({
            "output": request.output,
            "width": planned.width,
            "height": planned.height,
            "format": planned.format,
            "operations": request.operations.iter().map(ImageOperation::name).collect::<Vec<_>>(),
            "duration_ms": output.duration_ms,
        }))
    }

    async fn validate_input(
        &self,
        input: &serde_json::Value,
        _options: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let request: ImageRequest = parse_request(input)?;
        request.validate()
    }

    fn supported_types(&self) -> Vec<String> {
        SUPPORTED_FORMATS.iter().map(|f| f.to_string()).collect()
    }

    fn capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities {
            operations: ["resize", "crop", "rotate", "convert", "compress", "grayscale"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_input_bytes: None,
            max_concurrency: None,
        }
    }

    async fn health_check(&self) -> Result<HealthReport, ServiceError> {
        match self.runner.probe(&self.binary, "-version").await {
            Ok(version) if !version.is_empty() => Ok(HealthReport {
                healthy: true,
                message: Some(version),
            }),
            Ok(_) => Ok(HealthReport::unhealthy("empty version output")),
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

    fn info(width: u32, height: u32) -> ImageInfo {
        ImageInfo {
            width,
            height,
            format: "png".into(),
        }
    }

    #[test]
    fn test_operations_deserialize_by_tag() {
        let ops: Vec<ImageOperation> = serde_json::from_value(json!([
            {"op": "resize", "width": 400, "height": 300},
            {"op": "crop", "x": 0, "y": 0, "width": 100, "height": 100},
            {"op": "grayscale"}
        ]))
        .unwrap();

        assert_eq!(
            ops[0],
            ImageOperation::Resize {
                width: 400,
                height: 300,
                keep_aspect: true
            }
        );
        assert_eq!(ops[2], ImageOperation::Grayscale);

        let unknown: Result<ImageOperation, _> =
            serde_json::from_value(json!({"op": "sharpen"}));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_resize_keeps_aspect() {
        let fit = ImageOperation::Resize {
            width: 400,
            height: 400,
            keep_aspect: true,
        };
        assert_eq!(fit.apply(&info(1600, 900)).unwrap(), info(400, 225));

        let exact = ImageOperation::Resize {
            width: 400,
            height: 400,
            keep_aspect: false,
        };
        assert_eq!(exact.apply(&info(1600, 900)).unwrap(), info(400, 400));
        assert_eq!(exact.render_args(), vec!["-resize", "400x400!"]);
    }

    #[test]
    fn test_crop_bounds() {
        let inside = ImageOperation::Crop {
            x: 10,
            y: 10,
            width: 90,
            height: 40,
        };
        assert_eq!(inside.apply(&info(100, 50)).unwrap(), info(90, 40));
        assert_eq!(inside.render_args(), vec!["-crop", "90x40+10+10", "+repage"]);

        let outside = ImageOperation::Crop {
            x: 20,
            y: 0,
            width: 90,
            height: 40,
        };
        assert!(matches!(
            outside.apply(&info(100, 50)),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rotate_bounding_box() {
        let quarter = ImageOperation::Rotate { degrees: 90 };
        assert_eq!(quarter.apply(&info(640, 480)).unwrap(), info(480, 640));

        let negative = ImageOperation::Rotate { degrees: -180 };
        assert_eq!(negative.apply(&info(640, 480)).unwrap(), info(640, 480));
    }

    #[test]
    fn test_parameter_validation() {
        assert!(ImageOperation::Compress { quality: 0 }.validate().is_err());
        assert!(ImageOperation::Compress { quality: 85 }.validate().is_ok());
        assert!(ImageOperation::Convert {
            format: "psd".into()
        }
        .validate()
        .is_err());
        assert!(ImageOperation::Resize {
            width: 0,
            height: 10,
            keep_aspect: true
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_request_plan_and_render() {
        let request = ImageRequest {
            input: "in/cv.png".into(),
            output: "out/cv-thumb".into(),
            source: Some(info(1200, 800)),
            operations: vec![
                ImageOperation::Resize {
                    width: 300,
                    height: 300,
                    keep_aspect: true,
                },
                ImageOperation::Convert {
                    format: "WEBP".into(),
                },
                ImageOperation::Compress { quality: 80 },
            ],
        };

        let planned = request.plan(&info(1200, 800)).unwrap();
        assert_eq!(
            planned,
            ImageInfo {
                width: 300,
                height: 200,
                format: "webp".into()
            }
        );
        assert_eq!(
            request.render_args(true),
            vec![
                "in/cv.png",
                "-strip",
                "-resize",
                "300x300",
                "-quality",
                "80",
                "webp:out/cv-thumb"
            ]
        );
    }

    #[test]
    fn test_parse_identify() {
        assert_eq!(parse_identify("640 480 PNG").unwrap(), info(640, 480));
        assert!(parse_identify("garbage").is_err());
    }

    #[tokio::test]
    async fn test_validate_input_rejects_bad_requests() {
        let service = ImageService::new(
            CommandRunner::new(vec![], Duration::from_secs(1)),
            "magick",
        );
        let options = json!({});

        let no_ops = json!({"input": "a.png", "output": "b.png", "operations": []});
        assert!(service.validate_input(&no_ops, &options).await.is_err());

        let escaping = json!({
            "input": "../secret.png",
            "output": "b.png",
            "operations": [{"op": "grayscale"}]
        });
        assert!(service.validate_input(&escaping, &options).await.is_err());

        let ok = json!({
            "input": "a.png",
            "output": "b.png",
            "operations": [{"op": "rotate", "degrees": 90}]
        });
        assert!(service.validate_input(&ok, &options).await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_reports_missing_binary() {
        let service = ImageService::new(
            CommandRunner::new(vec![], Duration::from_secs(1)),
            "/definitely/not/magick",
        );
        let report = service.health_check().await.unwrap();
        assert!(!report.healthy);
    }
}
