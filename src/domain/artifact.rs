//! Published raster artifacts and the parameters that shape them.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use time::OffsetDateTime;

use super::slot::SlotKey;

/// Final on-disk encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Png,
    Bmp,
}

impl ArtifactFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactFormat::Png => "image/png",
            ArtifactFormat::Bmp => "image/bmp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Png => "png",
            ArtifactFormat::Bmp => "bmp",
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ArtifactFormat::Png),
            "bmp" => Ok(ArtifactFormat::Bmp),
            other => Err(format!("unsupported artifact format `{other}`")),
        }
    }
}

/// Browser viewport used for rasterization; encoded output must match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The output of one successful pipeline run.
///
/// Artifacts are immutable once built. A slot holds one behind an `Arc` and a
/// later publish replaces the handle instead of touching the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: SlotKey,
    pub bytes: Bytes,
    pub format: ArtifactFormat,
    pub produced_at: OffsetDateTime,
}

impl Artifact {
    pub fn new(key: SlotKey, bytes: Bytes, format: ArtifactFormat) -> Self {
        Self {
            key,
            bytes,
            format,
            produced_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
