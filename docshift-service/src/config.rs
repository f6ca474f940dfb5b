//! Service configuration.
//!
//! Everything is read once at startup from an optional `config.*` file in the
//! working directory and `DOCSHIFT__*` environment variables. The resulting
//! [`ServiceConfig`] is immutable and shared behind an `Arc`.

mod loader;
mod static_config;
mod tools_config;

pub use loader::load_service_config;
pub use static_config::ServiceConfig;
pub use tools_config::{ToolConfig, ToolsConfig};
