//! Gateway configuration: schema, file discovery, loading, validation.
//!
//! Config is looked up as `tern.{toml,yaml,yml,json}` in the working
//! directory, then in `~/.config/tern/`. String values may reference
//! environment variables as `${VAR}`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, find_config_file, load_config, set_config_dir},
    schema::{LoginPolicy, TernConfig},
};
