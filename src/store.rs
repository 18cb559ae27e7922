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


//! Boundary between the restore engine and the platform API.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::cell::Cell;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Where an object is created: an organization or one of its sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    Org(String),
    Site(String),
}

impl Scope {
    pub fn id(&self) -> &str {
        match self {
            Scope::Org(id) | Scope::Site(id) => id,
        }
    }

    /// Path segment under `/api/v1/`.
    pub fn path(&self) -> String {
        match self {
            Scope::Org(id) => format!("orgs/{id}"),
            Scope::Site(id) => format!("sites/{id}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Org(id) => write!(f, "org {id}"),
            Scope::Site(id) => write!(f, "site {id}"),
        }
    }
}

/// Write operations the restore needs. Every call blocks until the API
/// answers; a non-success status is an `Err`.
pub trait ObjectStore {
    /// Creates one object and returns the API's representation of it,
    /// including the newly issued `id`.
    fn create(&self, scope: &Scope, collection: &str, body: &Value) -> Result<Value>;

    fn update_setting(&self, scope: &Scope, body: &Value) -> Result<Value>;

    fn import(&self, scope: &Scope, collection: &str, body: &Value) -> Result<Value>;

    fn update_org(&self, org_id: &str, body: &Value) -> Result<Value>;

    fn update_portal_template(&self, scope: &Scope, wlan_id: &str, body: &Value)
    -> Result<Value>;

    fn upload_portal_image(&self, scope: &Scope, wlan_id: &str, image: &Path) -> Result<()>;

    fn upload_map_image(&self, site_id: &str, map_id: &str, image: &Path) -> Result<()>;
}

/// Accepts every write without touching the API and hands out synthetic
/// identifiers so references still resolve during a dry run.
#[derive(Debug, Default)]
pub struct DryRunStore {
    issued: Cell<u64>,
}

impl DryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self.issued.get() + 1;
        self.issued.set(n);
        format!("00000000-0000-4000-8000-{n:012x}")
    }
}

impl ObjectStore for DryRunStore {
    fn create(&self, scope: &Scope, collection: &str, body: &Value) -> Result<Value> {
        let id = self.next_id();
        info!(%scope, collection, %id, "dry run: would create object");
        let mut created = body.clone();
        if let Some(map) = created.as_object_mut() {
            map.insert("id".into(), json!(id));
        }
        Ok(created)
    }

    fn update_setting(&self, scope: &Scope, body: &Value) -> Result<Value> {
        info!(%scope, "dry run: would update settings");
        Ok(body.clone())
    }

    fn import(&self, scope: &Scope, collection: &str, body: &Value) -> Result<Value> {
        let count = body.as_array().map_or(0, Vec::len);
        info!(%scope, collection, count, "dry run: would import objects");
        Ok(json!([]))
    }

    fn update_org(&self, org_id: &str, body: &Value) -> Result<Value> {
        info!(org_id, "dry run: would update org info");
        Ok(body.clone())
    }

    fn update_portal_template(
        &self,
        scope: &Scope,
        wlan_id: &str,
        body: &Value,
    ) -> Result<Value> {
        info!(%scope, wlan_id, "dry run: would update portal template");
        Ok(body.clone())
    }

    fn upload_portal_image(&self, scope: &Scope, wlan_id: &str, image: &Path) -> Result<()> {
        info!(%scope, wlan_id, image = %image.display(), "dry run: would upload portal image");
        Ok(())
    }

    fn upload_map_image(&self, site_id: &str, map_id: &str, image: &Path) -> Result<()> {
        info!(site_id, map_id, image = %image.display(), "dry run: would upload map image");
        Ok(())
    }
}
