// mistrestore - restore Mist organization configuration backups
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::client::DEFAULT_HOST;

pub const DEFAULT_BACKUP_FOLDER: &str = "./org_backup";
pub const TOKEN_ENV: &str = "MIST_APITOKEN";
pub const HOST_ENV: &str = "MIST_HOST";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_token: Option<String>,
    pub host: Option<String>,
    pub backup_folder: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error(
        "API token is required; set it with `mistrestore configure --token <token>` or {TOKEN_ENV}"
    )]
    MissingApiToken,
}

/// Values on the command line; they win over everything else.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub api_token: Option<String>,
    pub host: Option<String>,
    pub backup_folder: Option<String>,
}

#[derive(Debug)]
pub struct EffectiveConfig {
    pub api_token: String,
    pub host: String,
    pub backup_folder: PathBuf,
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".mistrestore.yaml")),
        Scope::User => {
            if let Ok(custom) = env::var("MISTRESTORE_CONFIG_DIR") {
                return Ok(PathBuf::from(custom).join("config.yaml"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("mistrestore").join("config.yaml"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = read_if_exists(&config_path(Scope::User, cwd)?)?.unwrap_or_default();
    let local = read_if_exists(&config_path(Scope::Local, cwd)?)?.unwrap_or_default();
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(config).context("serializing config")?;
    fs::write(&path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Files, then environment, then flags. The token is only required when
/// `require_token` is set so that dry runs work without credentials.
pub fn resolve(cwd: &Path, overrides: Overrides, require_token: bool) -> Result<EffectiveConfig> {
    let mut merged = load(cwd)?;

    if let Some(token) = non_empty_env(TOKEN_ENV) {
        merged.api_token = Some(token);
    }
    if let Some(host) = non_empty_env(HOST_ENV) {
        merged.host = Some(host);
    }
    if let Some(token) = overrides.api_token {
        merged.api_token = Some(token);
    }
    if let Some(host) = overrides.host {
        merged.host = Some(host);
    }
    if let Some(folder) = overrides.backup_folder {
        merged.backup_folder = Some(folder);
    }

    let api_token = match merged.api_token.map(|t| t.trim().to_string()) {
        Some(token) if !token.is_empty() => token,
        _ if require_token => return Err(ConfigError::MissingApiToken.into()),
        _ => String::new(),
    };

    Ok(EffectiveConfig {
        api_token,
        host: merged.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
        backup_folder: PathBuf::from(
            merged
                .backup_folder
                .unwrap_or_else(|| DEFAULT_BACKUP_FOLDER.to_string()),
        ),
    })
}

/// Shows the first and last four characters of a secret.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(Some(config))
}

fn merge(user: Config, local: Config) -> Config {
    Config {
        api_token: local.api_token.or(user.api_token),
        host: local.host.or(user.host),
        backup_folder: local.backup_folder.or(user.backup_folder),
    }
}
