//! ImageMagick `convert` adapter: dithers and reduces a screenshot for e-ink.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::ports::{EncodeError, EncodeParams, Encoder};

const SOURCE: &str = "infra::imagemagick";
const INPUT_FILE: &str = "input.png";

#[derive(Debug, Clone)]
pub struct ImageMagickEncoder {
    convert_path: PathBuf,
}

impl ImageMagickEncoder {
    pub fn new(convert_path: PathBuf) -> Self {
        Self { convert_path }
    }

    fn command(&self, input: &Path, output: &Path, params: &EncodeParams) -> Command {
        let mut command = Command::new(&self.convert_path);
        command
            .arg(input)
            .arg("-dither")
            .arg(&params.dither)
            .arg("-remap")
            .arg(&params.remap)
            .arg("-depth")
            .arg(params.depth.to_string())
            .arg("-colors")
            .arg(params.colors.to_string())
            .arg("-strip")
            .arg(format!("{}:{}", params.format.extension(), output.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Encoder for ImageMagickEncoder {
    async fn encode(&self, raw: Bytes, params: &EncodeParams) -> Result<Bytes, EncodeError> {
        let started_at = Instant::now();
        let staging = tempfile::Builder::new()
            .prefix("rasterslot-encode-")
            .tempdir()
            .map_err(EncodeError::Io)?;
        let input = staging.path().join(INPUT_FILE);
        let output_path = staging
            .path()
            .join(format!("encoded.{}", params.format.extension()));

        tokio::fs::write(&input, &raw)
            .await
            .map_err(EncodeError::Io)?;

        let output = self
            .command(&input, &output_path, params)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = SOURCE,
                    op = "imagemagick::encode",
                    result = "error",
                    error_code = "spawn_cli",
                    convert = %self.convert_path.display(),
                    error = %err,
                    "Failed to spawn ImageMagick"
                );
                if err.kind() == ErrorKind::NotFound {
                    EncodeError::NotFound(err)
                } else {
                    EncodeError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = SOURCE,
                op = "imagemagick::encode",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "convert_cli",
                stderr = %stderr,
                "ImageMagick invocation failed"
            );
            return Err(EncodeError::Cli { exit_code, stderr });
        }

        let encoded = tokio::fs::read(&output_path)
            .await
            .map_err(EncodeError::Io)?;
        debug!(
            target = SOURCE,
            op = "imagemagick::encode",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            format = %params.format,
            input_bytes = raw.len(),
            output_bytes = encoded.len(),
            "Image encoded"
        );

        Ok(Bytes::from(encoded))
    }
}
