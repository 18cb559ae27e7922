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


//! Per-object results of a restore run and the progress events emitted
//! while it runs.

use crate::rewrite::UnresolvedReference;
use crate::store::Scope;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// References still unknown after the replay pass.
    Unresolved {
        references: Vec<UnresolvedReference>,
    },
    /// The API refused the object or could not be reached.
    Api { message: String },
    /// The owning site was never created, so there was nowhere to put it.
    MissingScope { owner: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Deployed { new_id: Option<String> },
    Failed(Failure),
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectReport {
    pub object_type: String,
    pub name: String,
    pub scope: Option<Scope>,
    pub old_id: Option<String>,
    pub attempts: u32,
    pub outcome: Outcome,
}

impl ObjectReport {
    pub fn is_deployed(&self) -> bool {
        matches!(self.outcome, Outcome::Deployed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetWarning {
    pub owner: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub destination_org_id: String,
    pub objects: Vec<ObjectReport>,
    pub warnings: Vec<AssetWarning>,
    /// Requests that went through the replay pass.
    pub replayed: usize,
}

impl RestoreReport {
    pub fn deployed(&self) -> impl Iterator<Item = &ObjectReport> {
        self.objects.iter().filter(|o| o.is_deployed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ObjectReport> {
        self.objects.iter().filter(|o| !o.is_deployed())
    }

    pub fn unresolved(&self) -> impl Iterator<Item = (&ObjectReport, &[UnresolvedReference])> {
        self.objects.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed(Failure::Unresolved { references }) => Some((o, references.as_slice())),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn find(&self, object_type: &str, name: &str) -> Option<&ObjectReport> {
        self.objects
            .iter()
            .find(|o| o.object_type == object_type && o.name == name)
    }

    /// True when every object made it to the destination. Asset warnings
    /// do not count against this.
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Deferred,
    Warning,
    Failure,
}

/// Progress notifications for whoever renders the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent<'a> {
    Section(&'a str),
    Started(&'a str),
    Finished {
        message: &'a str,
        status: StepStatus,
        /// Whether this closes one of the counted writes.
        counted: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, outcome: Outcome) -> ObjectReport {
        ObjectReport {
            object_type: "wlans".into(),
            name: name.into(),
            scope: None,
            old_id: None,
            attempts: 1,
            outcome,
        }
    }

    #[test]
    fn splits_deployed_failed_and_unresolved() {
        let reference = UnresolvedReference {
            field: "template_id".into(),
            old_id: "x".into(),
        };
        let report = RestoreReport {
            objects: vec![
                entry("ok", Outcome::Deployed { new_id: Some("n".into()) }),
                entry(
                    "api",
                    Outcome::Failed(Failure::Api {
                        message: "HTTP 400".into(),
                    }),
                ),
                entry(
                    "dangling",
                    Outcome::Failed(Failure::Unresolved {
                        references: vec![reference.clone()],
                    }),
                ),
            ],
            ..RestoreReport::default()
        };

        assert_eq!(report.deployed().count(), 1);
        assert_eq!(report.failed().count(), 2);
        let unresolved: Vec<_> = report.unresolved().collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].0.name, "dangling");
        assert_eq!(unresolved[0].1, &[reference]);
        assert!(!report.is_clean());
        assert!(report.find("wlans", "ok").is_some());
    }

    #[test]
    fn serializes_outcomes_with_tags() {
        let value = serde_json::to_value(entry(
            "api",
            Outcome::Failed(Failure::Api {
                message: "boom".into(),
            }),
        ))
        .unwrap();
        assert_eq!(value["outcome"]["status"], "failed");
        assert_eq!(value["outcome"]["kind"], "api");
        assert_eq!(value["outcome"]["message"], "boom");
    }
}
