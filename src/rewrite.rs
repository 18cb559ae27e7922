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


//! Rewrites the identifiers a backed-up object holds so they point at the
//! objects created in the destination organization.

use crate::registry::IdentifierRegistry;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::trace;

pub type ConfigObject = Map<String, Value>;

/// Server-assigned fields that must not be sent back on create.
const READ_ONLY_FIELDS: &[&str] = &[
    "id",
    "msp_id",
    "org_id",
    "site_id",
    "site_ids",
    "url",
    "bg_image_url",
    "portal_template_url",
    "portal_sso_url",
    "thumbnail_url",
    "template_url",
    "ui_url",
];

/// Fields whose values look like identifiers but name things outside the
/// backup (identity providers, beacon UUIDs).
pub const EXEMPT_FIELDS: &[&str] = &[
    "issuer",
    "idp_sso_url",
    "custom_logout_url",
    "sso_issuer",
    "sso_idp_sso_url",
    "ibeacon_uuid",
];

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER
        .get_or_init(|| {
            Regex::new(
                r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-5][0-9a-f]{3}-[089ab][0-9a-f]{3}-[0-9a-f]{12}$",
            )
            .unwrap_or_else(|err| panic!("identifier pattern does not compile: {err}"))
        })
        .is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub field: String,
    pub old_id: String,
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub object: ConfigObject,
    pub unresolved: Vec<UnresolvedReference>,
}

impl Rewrite {
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Strips read-only fields from `object`, then replaces every
/// identifier-shaped value with its destination counterpart. Values the
/// registry does not know are reported back and left untouched.
pub fn rewrite(
    mut object: ConfigObject,
    object_type: &str,
    registry: &IdentifierRegistry,
) -> Rewrite {
    strip_read_only(&mut object, object_type);

    let mut unresolved = Vec::new();
    for (field, value) in object.iter_mut() {
        rewrite_value(field, value, registry, &mut unresolved);
    }

    Rewrite { object, unresolved }
}

fn strip_read_only(object: &mut ConfigObject, object_type: &str) {
    for field in READ_ONLY_FIELDS {
        // a webhook's url is its target, not a generated link
        if object_type == "webhooks" && *field == "url" {
            continue;
        }
        object.remove(*field);
    }

    if let Some(Value::Array(policies)) = object.get_mut("service_policies") {
        for policy in policies.iter_mut().filter_map(Value::as_object_mut) {
            policy.remove("id");
        }
    }

    match object_type {
        "maps" => {
            if let Some(Value::Array(areas)) = object.get_mut("intended_coverage_areas") {
                for area in areas.iter_mut().filter_map(Value::as_object_mut) {
                    area.remove("id");
                    area.remove("map_id");
                }
            }
            object.remove("sitesurvey_path");
        }
        "evpn_topologies" => {
            object.insert("overwrite".into(), Value::Bool(true));
        }
        _ => {}
    }
}

fn rewrite_value(
    field: &str,
    value: &mut Value,
    registry: &IdentifierRegistry,
    unresolved: &mut Vec<UnresolvedReference>,
) {
    if EXEMPT_FIELDS.contains(&field) {
        return;
    }
    match value {
        Value::String(text) => resolve(field, text, registry, unresolved),
        Value::Array(items) => {
            for item in items.iter_mut() {
                rewrite_value(field, item, registry, unresolved);
            }
        }
        Value::Object(map) => {
            for (nested, item) in map.iter_mut() {
                rewrite_value(nested, item, registry, unresolved);
            }
        }
        _ => {}
    }
}

fn resolve(
    field: &str,
    text: &mut String,
    registry: &IdentifierRegistry,
    unresolved: &mut Vec<UnresolvedReference>,
) {
    if !is_identifier(text) || registry.is_destination_id(text) {
        return;
    }
    if let Some(new_id) = registry.get_new_id(text) {
        trace!(field, old_id = %text, new_id, label = registry.label(text), "reference rewritten");
        *text = new_id.to_string();
        return;
    }
    let reference = UnresolvedReference {
        field: field.to_string(),
        old_id: text.clone(),
    };
    if !unresolved.contains(&reference) {
        unresolved.push(reference);
    }
}
