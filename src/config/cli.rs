use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the rasterslot binary.
#[derive(Debug, Parser)]
#[command(name = "rasterslot", version, about = "Template-to-raster rendering server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RASTERSLOT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub global: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Run the pipeline once for a JSON data file and publish the result.
    Render(RenderArgs),
}

/// Overrides shared by every command.
///
/// The environment names match the deployment variables the container images
/// already export, so they are honoured without the `RASTERSLOT__` prefix.
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the template file read on every render request.
    #[arg(long = "template-path", env = "TEMPLATE_PATH", value_name = "PATH", global = true)]
    pub template_path: Option<PathBuf>,

    /// Override the headless browser executable.
    #[arg(long = "browser-path", env = "CHROMIUM_PATH", value_name = "PATH", global = true)]
    pub browser_path: Option<PathBuf>,

    /// Override the ImageMagick `convert` executable.
    #[arg(long = "convert-path", value_name = "PATH", global = true)]
    pub convert_path: Option<PathBuf>,

    /// Override the directory artifacts are persisted to.
    #[arg(long = "output-path", env = "OUTPUT_PATH", value_name = "PATH", global = true)]
    pub output_path: Option<PathBuf>,

    /// Override the artifact file base name.
    #[arg(long = "output-base-name", value_name = "NAME", global = true)]
    pub output_base_name: Option<String>,

    /// Override the artifact encoding (png|bmp).
    #[arg(long = "encode-format", value_name = "FORMAT", global = true)]
    pub encode_format: Option<String>,

    /// Override the pipeline deadline.
    #[arg(long = "raster-timeout-seconds", value_name = "SECONDS", global = true)]
    pub raster_timeout_seconds: Option<u64>,

    /// Override the slot lock scope (per_key|global).
    #[arg(long = "pipeline-lock-scope", value_name = "SCOPE", global = true)]
    pub lock_scope: Option<String>,

    /// Override the number of pipelines allowed to invoke collaborators at once.
    #[arg(long = "pipeline-max-concurrency", value_name = "COUNT", global = true)]
    pub max_concurrency: Option<u32>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "server-max-body-bytes", value_name = "BYTES")]
    pub server_max_body_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// JSON object merged into the template.
    #[arg(long = "data", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: PathBuf,

    /// Slot to publish into; the default slot when omitted.
    #[arg(long = "key", value_name = "KEY")]
    pub key: Option<String>,
}
