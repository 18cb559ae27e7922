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


//! Objects held back during the main pass because they referenced
//! something the destination did not have yet.

use crate::catalog::{ObjectDescriptor, Write};
use crate::rewrite::ConfigObject;
use crate::store::Scope;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub descriptor: ObjectDescriptor,
    pub write: Write,
    pub scope: Scope,
    /// The object as left by the first rewrite: read-only fields stripped,
    /// known references already pointing at the destination.
    pub object: ConfigObject,
    pub old_id: Option<String>,
    /// Source site the object was backed up under, for site-level types.
    pub source_site_id: Option<String>,
    pub name: String,
    pub attempt_count: u32,
}

#[derive(Debug, Error)]
#[error("replay queue already drained; {object_type} {name} cannot be deferred again")]
pub struct QueueClosed {
    pub object_type: &'static str,
    pub name: String,
}

/// FIFO of deferred requests. It is drained once; anything offered after
/// that is refused so a reference that never resolves cannot loop.
#[derive(Debug, Default)]
pub struct ReplayQueue {
    pending: VecDeque<ReplayRequest>,
    drained: bool,
}

impl ReplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: ReplayRequest) -> Result<(), QueueClosed> {
        if self.drained {
            return Err(QueueClosed {
                object_type: request.descriptor.key,
                name: request.name,
            });
        }
        self.pending.push_back(request);
        Ok(())
    }

    pub fn drain(&mut self) -> Vec<ReplayRequest> {
        self.drained = true;
        self.pending.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> ReplayRequest {
        ReplayRequest {
            descriptor: ObjectDescriptor::create("wlans", "Org wlans", "wlans"),
            write: Write::Create { collection: "wlans" },
            scope: Scope::Org("org".into()),
            object: ConfigObject::new(),
            old_id: None,
            source_site_id: None,
            name: name.into(),
            attempt_count: 1,
        }
    }

    #[test]
    fn drains_in_insertion_order() {
        let mut queue = ReplayQueue::new();
        queue.enqueue(request("first")).unwrap();
        queue.enqueue(request("second")).unwrap();

        let names: Vec<_> = queue.drain().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["first", "second"]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn refuses_requests_after_drain() {
        let mut queue = ReplayQueue::new();
        queue.enqueue(request("first")).unwrap();
        queue.drain();

        let err = queue.enqueue(request("late")).unwrap_err();
        assert_eq!(err.name, "late");
        assert_eq!(err.object_type, "wlans");
        assert!(queue.drain().is_empty());
    }
}
