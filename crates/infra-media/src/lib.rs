// Mediaflow Infrastructure - Media Backends
// Implements: MediaService (ImageMagick for images, ffmpeg for audio/video)

pub mod command;
pub mod image;
pub mod transcode;

pub use command::{CommandOutput, CommandRunner};
pub use image::{ImageInfo, ImageOperation, ImageRequest, ImageService};
pub use transcode::{TranscodeKind, TranscodeRequest, TranscodeService, WaveformSpec};

/// Parse a service input object into a typed request
pub(crate) fn parse_request<T: serde::de::DeserializeOwned>(
    input: &serde_json::Value,
) -> Result<T, mediaflow_core::port::ServiceError> {
    serde_json::from_value(input.clone())
        .map_err(|e| mediaflow_core::port::ServiceError::InvalidInput(e.to_string()))
}
