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


//! Loading an organization backup and locating the files saved next to it.

use crate::catalog::{Catalog, FollowUp, Operation};
use crate::rewrite::ConfigObject;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BACKUP_FILE: &str = "org_conf_file.json";
pub const FILE_PREFIX: &str = "org_conf_file";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("reading backup file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing backup file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("backup has no org `data.id`; it was not produced by an org backup")]
    MissingOrgId,
    #[error("listing backups in {}", path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    org: ConfigObject,
    #[serde(default)]
    sites: HashMap<String, ConfigObject>,
}

/// A parsed backup: the org section and the per-site sections keyed by the
/// source site id.
#[derive(Debug, Clone)]
pub struct Snapshot {
    org: ConfigObject,
    sites: HashMap<String, ConfigObject>,
    source_org_id: String,
    dir: PathBuf,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let contents = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|source| SnapshotError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_value(value, dir).map_err(|err| match err {
            SnapshotError::Parse { source, .. } => SnapshotError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Builds a snapshot from an already parsed document. `dir` is where
    /// side-car assets are looked up.
    pub fn from_value(value: Value, dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let raw: RawSnapshot =
            serde_json::from_value(value).map_err(|source| SnapshotError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        let source_org_id = raw
            .org
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(SnapshotError::MissingOrgId)?
            .to_string();

        Ok(Self {
            org: raw.org,
            sites: raw.sites,
            source_org_id,
            dir: dir.into(),
        })
    }

    pub fn source_org_id(&self) -> &str {
        &self.source_org_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn org_data(&self) -> Option<&ConfigObject> {
        self.org.get("data").and_then(Value::as_object)
    }

    pub fn org_settings(&self) -> Option<&ConfigObject> {
        self.org.get("settings").and_then(Value::as_object)
    }

    /// Raw org-level entry, used for bulk imports.
    pub fn org_value(&self, key: &str) -> Option<&Value> {
        self.org.get(key)
    }

    pub fn org_objects(&self, key: &str) -> Vec<ConfigObject> {
        objects(self.org.get(key))
    }

    pub fn site_value(&self, source_site_id: &str, key: &str) -> Option<&Value> {
        self.sites.get(source_site_id).and_then(|site| site.get(key))
    }

    /// Objects of one type backed up under a site. A singleton such as the
    /// site settings comes back as a one-element list.
    pub fn site_objects(&self, source_site_id: &str, key: &str) -> Vec<ConfigObject> {
        objects(self.site_value(source_site_id, key))
    }

    /// Number of API writes a full restore of this snapshot performs, used
    /// to size the progress display.
    pub fn count_steps(&self, catalog: &Catalog) -> usize {
        let mut total = 2;
        for step in &catalog.org {
            if !self.org.contains_key(step.key) {
                continue;
            }
            if let Operation::Import { .. } = step.operation {
                total += 1;
                continue;
            }
            let owners = self.org_objects(step.key);
            total += owners.len();
            if step.follow_up == FollowUp::SiteObjects {
                for site in &owners {
                    let Some(site_id) = site.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    for site_step in &catalog.site {
                        total += match site_step.operation {
                            Operation::Import { .. } => {
                                usize::from(self.site_value(site_id, site_step.key).is_some())
                            }
                            _ => self.site_objects(site_id, site_step.key).len(),
                        };
                    }
                }
            }
        }
        total
    }
}

fn objects(value: Option<&Value>) -> Vec<ConfigObject> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).cloned().collect(),
        Some(Value::Object(map)) if !map.is_empty() => vec![map.clone()],
        _ => Vec::new(),
    }
}

/// Backup folders available under `backup_folder`, sorted case-insensitively.
pub fn list_backups(backup_folder: &Path) -> Result<Vec<String>, SnapshotError> {
    let entries = fs::read_dir(backup_folder).map_err(|source| SnapshotError::List {
        path: backup_folder.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort_by_key(|name| name.to_lowercase());
    Ok(names)
}

pub fn backup_file(backup_folder: &Path, source_backup: &str) -> PathBuf {
    backup_folder.join(source_backup).join(BACKUP_FILE)
}

/// Side-car files for a WLAN captive portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalAssets {
    pub template: PathBuf,
    pub image: PathBuf,
}

/// Builds the deterministic names the backup gave to side-car files. All
/// ids are from the source organization.
#[derive(Debug, Clone)]
pub struct AssetLocator {
    dir: PathBuf,
}

impl AssetLocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn wlan_portal(&self, org_id: &str, site_id: Option<&str>, wlan_id: &str) -> PortalAssets {
        let stem = match site_id {
            Some(site_id) => format!("{FILE_PREFIX}_org_{org_id}_site_{site_id}_wlan_{wlan_id}"),
            None => format!("{FILE_PREFIX}_org_{org_id}_wlan_{wlan_id}"),
        };
        PortalAssets {
            template: self.dir.join(format!("{stem}.json")),
            image: self.dir.join(format!("{stem}.png")),
        }
    }

    pub fn map_image(&self, org_id: &str, site_id: &str, map_id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}_org_{org_id}_site_{site_id}_map_{map_id}.png"))
    }
}
