//! Configuration module
//!
//! User configuration lives in `config.toml` under the platform config
//! directory and can be overridden with `GITWEAVE_*` environment variables.

mod settings;

pub use settings::*;
