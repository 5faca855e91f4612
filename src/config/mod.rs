//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::artifact::{ArtifactFormat, Viewport};

mod cli;
#[cfg(test)]
mod tests;

pub use cli::{CliArgs, Command, GlobalOverrides, RenderArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "rasterslot";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_TEMPLATE_PATH: &str = "template.liquid";
const DEFAULT_BROWSER_PATH: &str = "chromium";
const DEFAULT_VIEWPORT_WIDTH: u32 = 800;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 480;
const DEFAULT_RASTER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_CONVERT_PATH: &str = "convert";
const DEFAULT_DITHER: &str = "FloydSteinberg";
const DEFAULT_REMAP: &str = "pattern:gray50";
const DEFAULT_DEPTH: u32 = 1;
const DEFAULT_COLORS: u32 = 2;
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_OUTPUT_BASE_NAME: &str = "output";
const DEFAULT_MAX_CONCURRENCY: u32 = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub template: TemplateSettings,
    pub raster: RasterSettings,
    pub encode: EncodeSettings,
    pub output: OutputSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_body_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub path: PathBuf,
    pub allow_inline: bool,
}

#[derive(Debug, Clone)]
pub struct RasterSettings {
    pub browser_path: PathBuf,
    pub viewport: Viewport,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub convert_path: PathBuf,
    pub format: ArtifactFormat,
    pub dither: String,
    pub remap: String,
    pub depth: NonZeroU32,
    pub colors: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub base_name: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lock_scope: LockScope,
    pub max_concurrency: NonZeroU32,
}

/// How far the slot store's mutual exclusion reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Only operations on the same key serialize, and only around the publish.
    PerKey,
    /// One store-wide lock is held across raster, encode and publish.
    Global,
}

impl FromStr for LockScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_key" => Ok(LockScope::PerKey),
            "global" => Ok(LockScope::Global),
            other => Err(format!("unknown lock scope `{other}`")),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("RASTERSLOT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.global);
    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    template: RawTemplateSettings,
    raster: RawRasterSettings,
    encode: RawEncodeSettings,
    output: RawOutputSettings,
    pipeline: RawPipelineSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(path) = overrides.template_path.as_ref() {
            self.template.path = Some(path.clone());
        }
        if let Some(path) = overrides.browser_path.as_ref() {
            self.raster.browser_path = Some(path.clone());
        }
        if let Some(path) = overrides.convert_path.as_ref() {
            self.encode.convert_path = Some(path.clone());
        }
        if let Some(path) = overrides.output_path.as_ref() {
            self.output.directory = Some(path.clone());
        }
        if let Some(name) = overrides.output_base_name.as_ref() {
            self.output.base_name = Some(name.clone());
        }
        if let Some(format) = overrides.encode_format.as_ref() {
            self.encode.format = Some(format.clone());
        }
        if let Some(seconds) = overrides.raster_timeout_seconds {
            self.raster.timeout_seconds = Some(seconds);
        }
        if let Some(scope) = overrides.lock_scope.as_ref() {
            self.pipeline.lock_scope = Some(scope.clone());
        }
        if let Some(max) = overrides.max_concurrency {
            self.pipeline.max_concurrency = Some(max);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.server_max_body_bytes {
            self.server.max_body_bytes = Some(limit);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            template,
            raster,
            encode,
            output,
            pipeline,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            template: build_template_settings(template)?,
            raster: build_raster_settings(raster)?,
            encode: build_encode_settings(encode)?,
            output: build_output_settings(output)?,
            pipeline: build_pipeline_settings(pipeline)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let max_body_value = server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_bytes = NonZeroU64::new(max_body_value)
        .ok_or_else(|| LoadError::invalid("server.max_body_bytes", "must be greater than zero"))?;
    usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "server.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_body_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_template_settings(template: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    let path = template
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_PATH));
    non_empty_path(&path, "template.path")?;

    Ok(TemplateSettings {
        path,
        allow_inline: template.allow_inline.unwrap_or(true),
    })
}

fn build_raster_settings(raster: RawRasterSettings) -> Result<RasterSettings, LoadError> {
    let browser_path = raster
        .browser_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BROWSER_PATH));
    non_empty_path(&browser_path, "raster.browser_path")?;

    let width = non_zero_u32(
        raster.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH).into(),
        "raster.width",
    )?;
    let height = non_zero_u32(
        raster.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT).into(),
        "raster.height",
    )?;

    let timeout_secs = raster.timeout_seconds.unwrap_or(DEFAULT_RASTER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "raster.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RasterSettings {
        browser_path,
        viewport: Viewport {
            width: width.get(),
            height: height.get(),
        },
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_encode_settings(encode: RawEncodeSettings) -> Result<EncodeSettings, LoadError> {
    let convert_path = encode
        .convert_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERT_PATH));
    non_empty_path(&convert_path, "encode.convert_path")?;

    let format = match encode.format {
        Some(value) => ArtifactFormat::from_str(&value)
            .map_err(|reason| LoadError::invalid("encode.format", reason))?,
        None => ArtifactFormat::Png,
    };

    let dither = non_empty_string(encode.dither, DEFAULT_DITHER, "encode.dither")?;
    let remap = non_empty_string(encode.remap, DEFAULT_REMAP, "encode.remap")?;

    Ok(EncodeSettings {
        convert_path,
        format,
        dither,
        remap,
        depth: non_zero_u32(
            encode.depth.unwrap_or(DEFAULT_DEPTH).into(),
            "encode.depth",
        )?,
        colors: non_zero_u32(
            encode.colors.unwrap_or(DEFAULT_COLORS).into(),
            "encode.colors",
        )?,
    })
}

fn build_output_settings(output: RawOutputSettings) -> Result<OutputSettings, LoadError> {
    let directory = output
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    non_empty_path(&directory, "output.directory")?;

    let base_name = non_empty_string(
        output.base_name,
        DEFAULT_OUTPUT_BASE_NAME,
        "output.base_name",
    )?;
    if base_name.contains(['/', '\\']) || base_name.starts_with('.') {
        return Err(LoadError::invalid(
            "output.base_name",
            "must be a plain file name",
        ));
    }

    Ok(OutputSettings {
        directory,
        base_name,
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    let lock_scope = match pipeline.lock_scope {
        Some(value) => LockScope::from_str(&value)
            .map_err(|reason| LoadError::invalid("pipeline.lock_scope", reason))?,
        None => LockScope::PerKey,
    };

    let max_concurrency = non_zero_u32(
        pipeline
            .max_concurrency
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .into(),
        "pipeline.max_concurrency",
    )?;

    Ok(PipelineSettings {
        lock_scope,
        max_concurrency,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    path: Option<PathBuf>,
    allow_inline: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRasterSettings {
    browser_path: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEncodeSettings {
    convert_path: Option<PathBuf>,
    format: Option<String>,
    dither: Option<String>,
    remap: Option<String>,
    depth: Option<u32>,
    colors: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOutputSettings {
    directory: Option<PathBuf>,
    base_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    lock_scope: Option<String>,
    max_concurrency: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty_path(path: &std::path::Path, key: &'static str) -> Result<(), LoadError> {
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(())
}

fn non_empty_string(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
