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


//! Old-to-new identifier table for a single restore run.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub new_id: String,
    pub label: String,
}

/// Maps identifiers from the backed-up organization to the identifiers the
/// destination issued when the same objects were created.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
    mappings: HashMap<String, Mapping>,
    issued: HashSet<String>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `old_id` now lives at `new_id`. Empty or missing ids are
    /// ignored; a second call for the same `old_id` replaces the first.
    pub fn add_mapping(&mut self, new_id: Option<&str>, old_id: Option<&str>, label: &str) {
        match (non_empty(new_id), non_empty(old_id)) {
            (Some(new_id), Some(old_id)) => {
                debug!(old_id, new_id, label, "registering identifier mapping");
                self.issued.insert(new_id.to_string());
                self.mappings.insert(
                    old_id.to_string(),
                    Mapping {
                        new_id: new_id.to_string(),
                        label: label.to_string(),
                    },
                );
            }
            _ => {
                warn!(?old_id, ?new_id, label, "skipping incomplete identifier mapping");
            }
        }
    }

    pub fn get_new_id(&self, old_id: &str) -> Option<&str> {
        self.mappings.get(old_id).map(|m| m.new_id.as_str())
    }

    pub fn label(&self, old_id: &str) -> Option<&str> {
        self.mappings.get(old_id).map(|m| m.label.as_str())
    }

    /// True for identifiers handed out by the destination during this run.
    pub fn is_destination_id(&self, id: &str) -> bool {
        self.issued.contains(id)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "2b7a6f1e-93c4-4d5e-8f01-0123456789ab";
    const NEW: &str = "9c1d2e3f-4a5b-4c6d-9e7f-ba9876543210";

    #[test]
    fn lookup_is_stable_across_calls() {
        let mut registry = IdentifierRegistry::new();
        registry.add_mapping(Some(NEW), Some(OLD), "wlan \"corp\"");

        assert_eq!(registry.get_new_id(OLD), Some(NEW));
        assert_eq!(registry.get_new_id(OLD), Some(NEW));
        assert_eq!(registry.label(OLD), Some("wlan \"corp\""));
        assert!(registry.is_destination_id(NEW));
        assert!(!registry.is_destination_id(OLD));
    }

    #[test]
    fn ignores_empty_or_missing_ids() {
        let mut registry = IdentifierRegistry::new();
        registry.add_mapping(None, Some(OLD), "site");
        registry.add_mapping(Some(""), Some(OLD), "site");
        registry.add_mapping(Some(NEW), None, "site");
        registry.add_mapping(Some(NEW), Some("  "), "site");

        assert_eq!(registry.get_new_id(OLD), None);
        assert_eq!(registry.label(OLD), None);
        assert!(!registry.is_destination_id(NEW));
    }

    #[test]
    fn last_write_wins() {
        let mut registry = IdentifierRegistry::new();
        registry.add_mapping(Some("first"), Some(OLD), "a");
        registry.add_mapping(Some(NEW), Some(OLD), "b");

        assert_eq!(registry.get_new_id(OLD), Some(NEW));
        assert_eq!(registry.label(OLD), Some("b"));
    }
}
