//! Headless Chromium rasterizer driven through its command line.
//!
//! Each call stages the document in a private temporary directory together
//! with a throwaway browser profile. The directory and the browser process are
//! both tied to the returned future, so a cancelled render leaves nothing
//! behind.

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

use crate::{
    application::ports::{RasterError, Rasterizer},
    domain::artifact::Viewport,
};

const SOURCE: &str = "infra::chromium";
const DOCUMENT_FILE: &str = "document.html";
const SCREENSHOT_FILE: &str = "screenshot.png";
const PROFILE_DIR: &str = "profile";

#[derive(Debug, Clone)]
pub struct ChromiumRasterizer {
    browser_path: PathBuf,
    staging_root: PathBuf,
}

impl ChromiumRasterizer {
    pub fn new(browser_path: PathBuf) -> Self {
        Self {
            browser_path,
            staging_root: std::env::temp_dir(),
        }
    }

    /// Stage documents under `root` instead of the system temp directory.
    pub fn with_staging_root(mut self, root: PathBuf) -> Self {
        self.staging_root = root;
        self
    }

    fn command(&self, staging: &Path, viewport: Viewport) -> Command {
        let mut command = Command::new(&self.browser_path);
        command
            .arg("--headless")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg(format!("--window-size={},{}", viewport.width, viewport.height))
            .arg("--force-device-scale-factor=1")
            .arg(format!(
                "--user-data-dir={}",
                staging.join(PROFILE_DIR).display()
            ))
            .arg(format!(
                "--screenshot={}",
                staging.join(SCREENSHOT_FILE).display()
            ))
            .arg(format!("file://{}", staging.join(DOCUMENT_FILE).display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Rasterizer for ChromiumRasterizer {
    async fn rasterize(&self, html: &str, viewport: Viewport) -> Result<Bytes, RasterError> {
        let started_at = Instant::now();
        let staging = tempfile::Builder::new()
            .prefix("rasterslot-")
            .tempdir_in(&self.staging_root)
            .map_err(RasterError::Io)?;

        tokio::fs::write(staging.path().join(DOCUMENT_FILE), html)
            .await
            .map_err(RasterError::Io)?;

        let output = self
            .command(staging.path(), viewport)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = SOURCE,
                    op = "chromium::rasterize",
                    result = "error",
                    error_code = "spawn_browser",
                    browser = %self.browser_path.display(),
                    error = %err,
                    "Failed to spawn browser"
                );
                if err.kind() == ErrorKind::NotFound {
                    RasterError::NotFound(err)
                } else {
                    RasterError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = SOURCE,
                op = "chromium::rasterize",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "browser_exit",
                stderr = %stderr,
                "Browser invocation failed"
            );
            return Err(RasterError::Browser { exit_code, stderr });
        }

        let screenshot = match tokio::fs::read(staging.path().join(SCREENSHOT_FILE)).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return Err(RasterError::MissingOutput),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RasterError::MissingOutput);
            }
            Err(err) => return Err(RasterError::Io(err)),
        };

        debug!(
            target = SOURCE,
            op = "chromium::rasterize",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            viewport = %viewport,
            png_bytes = screenshot.len(),
            "Document rasterized"
        );

        Ok(Bytes::from(screenshot))
    }
}
