// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./deskline.toml` > `~/.config/deskline/deskline.toml`
//! > `/etc/deskline/deskline.toml` with environment variable overrides via the
//! `DESKLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::DesklineConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/deskline/deskline.toml";

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "deskline.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/deskline/deskline.toml`
/// 3. `~/.config/deskline/deskline.toml`
/// 4. `./deskline.toml`
/// 5. `DESKLINE_*` environment variables
pub fn load_config() -> Result<DesklineConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<DesklineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<DesklineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the layered Figment before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// `~/.config/deskline/deskline.toml`, when a config dir exists on this platform.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("deskline").join(LOCAL_CONFIG_FILE))
}

/// Environment provider with explicit section mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `DESKLINE_AUTH_SESSION_SECRET` must become
/// `auth.session_secret`, not `auth.session.secret`.
fn env_provider() -> Env {
    Env::prefixed("DESKLINE_").map(|key| {
        let mapped = key
            .as_str()
            .replacen("server_", "server.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("auth_", "auth.", 1)
            .replacen("chat_", "chat.", 1);
        mapped.into()
    })
}
