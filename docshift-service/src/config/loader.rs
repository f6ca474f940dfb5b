//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::static_config::ServiceConfig;

/// Environment variable prefix, e.g. `DOCSHIFT__TOOLS__OFFICE__PATH`.
const ENV_PREFIX: &str = "DOCSHIFT";

/// Load the service configuration from `config.{toml,yaml,json}` (optional)
/// overridden by environment variables.
pub fn load_service_config() -> ServiceResult<ServiceConfig> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("limits.supported_input_formats")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize service config: {}", e),
        })
}
