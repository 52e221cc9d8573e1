//! Conversion of command-line arguments into typed configuration

use crate::cli::main_impl::Cli;
use crate::{
    config::{parse_backend_provider, RemovalConfig, ServerConfig},
    models::ModelSpec,
    utils::ModelSpecParser,
};
use anyhow::{Context, Result};

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Convert CLI arguments to a validated [`ServerConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let removal = Self::removal_config(cli)?;

        ServerConfig::builder()
            .host(cli.host.clone())
            .port(cli.port)
            .allowed_origins(cli.allowed_origins.clone())
            .allow_credentials(!cli.no_credentials)
            .max_upload_bytes(Self::upload_limit(cli.max_upload_mb))
            .removal(removal)
            .build()
            .context("Invalid server configuration")
    }

    pub(crate) fn removal_config(cli: &Cli) -> Result<RemovalConfig> {
        let (backend_type, execution_provider) = parse_backend_provider(&cli.execution_provider)
            .context("Invalid execution provider format")?;

        let model_spec = Self::model_spec(cli);
        ModelSpecParser::validate(&model_spec).context("Invalid model specification")?;

        let mut builder = RemovalConfig::builder()
            .model_spec(model_spec)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .debug(cli.verbose >= 2)
            .intra_threads(cli.threads)
            .inter_threads(cli.threads);
        if let Some(cache_dir) = &cli.cache_dir {
            builder = builder.cache_dir(cache_dir);
        }

        builder.build().context("Invalid removal configuration")
    }

    /// Model from `--model`, with `--variant` taking precedence over a `:variant` suffix
    pub(crate) fn model_spec(cli: &Cli) -> ModelSpec {
        let spec = cli
            .model
            .as_deref()
            .map(ModelSpecParser::parse)
            .unwrap_or_default();

        ModelSpec {
            variant: cli.variant.clone().or(spec.variant),
            source: spec.source,
        }
    }

    fn upload_limit(max_upload_mb: usize) -> usize {
        max_upload_mb
            .saturating_mul(1024 * 1024)
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}
