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


//! Ordered table of the object types a restore walks through.
//!
//! The order encodes dependencies between types: templates, profiles and
//! policies are created before the sites that reference them, and sites
//! before the WLANs and tags that may point at them. Site-level types are
//! walked for each site right after that site is created.

/// How one backed-up object is written to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    /// `POST {scope}/{collection}`, returns the created object.
    Create { collection: &'static str },
    /// `PUT {scope}/setting`, one singleton per scope.
    UpdateSetting,
    /// `PUT orgs/{id}` on the destination org itself.
    UpdateOrg,
}

/// What the restore calls on the API for a backed-up type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Objects go out one at a time and may be deferred.
    Write(Write),
    /// `POST {scope}/{collection}/import` with the whole backed-up list.
    Import { collection: &'static str },
}

/// Work attached to an object that has to run once the object exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    None,
    WlanPortal,
    MapImage,
    SiteObjects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Key of the type in the backup document, also the type named in
    /// reports.
    pub key: &'static str,
    pub label: &'static str,
    pub operation: Operation,
    pub follow_up: FollowUp,
}

impl ObjectDescriptor {
    const fn new(key: &'static str, label: &'static str, operation: Operation) -> Self {
        Self {
            key,
            label,
            operation,
            follow_up: FollowUp::None,
        }
    }

    pub const fn create(key: &'static str, label: &'static str, collection: &'static str) -> Self {
        Self::new(key, label, Operation::Write(Write::Create { collection }))
    }

    pub const fn import(key: &'static str, label: &'static str, collection: &'static str) -> Self {
        Self::new(key, label, Operation::Import { collection })
    }

    pub const fn setting(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, Operation::Write(Write::UpdateSetting))
    }

    pub const fn update_org(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, Operation::Write(Write::UpdateOrg))
    }

    pub const fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = follow_up;
        self
    }

    pub fn is_import(&self) -> bool {
        matches!(self.operation, Operation::Import { .. })
    }

    /// Progress line for one object of this type.
    pub fn message(&self, name: &str) -> String {
        match self.operation {
            Operation::Write(Write::Create { .. }) => format!("Creating {} {name}", self.key),
            _ => format!("Updating {}", self.label),
        }
    }
}

/// The destination org, updated from `org.data` before anything else.
pub const ORG_INFO: ObjectDescriptor = ObjectDescriptor::update_org("org", "Org info");
pub const ORG_SETTINGS: ObjectDescriptor = ObjectDescriptor::setting("settings", "Org settings");

const ORG_STEPS: &[ObjectDescriptor] = &[
    ObjectDescriptor::create("assetfilters", "Org assetfilters", "assetfilters"),
    ObjectDescriptor::create("deviceprofiles", "Org deviceprofiles", "deviceprofiles"),
    ObjectDescriptor::create("switchprofiles", "Org switchprofiles", "deviceprofiles"),
    ObjectDescriptor::create("hubprofiles", "Org hubprofiles", "deviceprofiles"),
    ObjectDescriptor::create("evpn_topologies", "Org evpn_topologies", "evpn_topologies"),
    ObjectDescriptor::create("secpolicies", "Org secpolicies", "secpolicies"),
    ObjectDescriptor::create("aptemplates", "Org aptemplates", "aptemplates"),
    ObjectDescriptor::create("networktemplates", "Org networktemplates", "networktemplates"),
    ObjectDescriptor::create("networks", "Org networks", "networks"),
    ObjectDescriptor::create("services", "Org services", "services"),
    ObjectDescriptor::create("servicepolicies", "Org servicepolicies", "servicepolicies"),
    ObjectDescriptor::create("vpns", "Org vpns", "vpns"),
    ObjectDescriptor::create("gatewaytemplates", "Org gatewaytemplates", "gatewaytemplates"),
    ObjectDescriptor::create("alarmtemplates", "Org alarmtemplates", "alarmtemplates"),
    ObjectDescriptor::create("rftemplates", "Org rftemplates", "rftemplates"),
    ObjectDescriptor::create("webhooks", "Org webhooks", "webhooks"),
    ObjectDescriptor::create("mxclusters", "Org mxclusters", "mxclusters"),
    ObjectDescriptor::create("mxtunnels", "Org mxtunnels", "mxtunnels"),
    ObjectDescriptor::create("wxtunnels", "Org wxtunnels", "wxtunnels"),
    ObjectDescriptor::create("sitetemplates", "Org sitetemplates", "sitetemplates"),
    ObjectDescriptor::create("sitegroups", "Org sitegroups", "sitegroups"),
    ObjectDescriptor::create("sites", "Org sites", "sites")
        .with_follow_up(FollowUp::SiteObjects),
    ObjectDescriptor::create("templates", "Org templates", "templates"),
    ObjectDescriptor::create("wlans", "Org wlans", "wlans")
        .with_follow_up(FollowUp::WlanPortal),
    ObjectDescriptor::create("wxtags", "Org wxtags", "wxtags"),
    ObjectDescriptor::create("wxrules", "Org wxrules", "wxrules"),
    ObjectDescriptor::create("pskportals", "Org pskportals", "pskportals"),
    ObjectDescriptor::import("psks", "Org psks", "psks"),
    ObjectDescriptor::create("nactags", "Org nactags", "nactags"),
    ObjectDescriptor::create("nacrules", "Org nacrules", "nacrules"),
    ObjectDescriptor::import("usermacs", "Org usermacs", "usermacs"),
    ObjectDescriptor::create("ssos", "Org ssos", "ssos"),
    ObjectDescriptor::create("ssoroles", "Org ssoroles", "ssoroles"),
];

const SITE_STEPS: &[ObjectDescriptor] = &[
    ObjectDescriptor::setting("settings", "Site settings"),
    ObjectDescriptor::create("maps", "Site maps", "maps").with_follow_up(FollowUp::MapImage),
    ObjectDescriptor::create("zones", "Site zones", "zones"),
    ObjectDescriptor::create("rssizones", "Site rssizones", "rssizones"),
    ObjectDescriptor::create("assets", "Site assets", "assets"),
    ObjectDescriptor::create("assetfilters", "Site assetfilters", "assetfilters"),
    ObjectDescriptor::create("beacons", "Site beacons", "beacons"),
    ObjectDescriptor::import("psks", "Site psks", "psks"),
    ObjectDescriptor::create("vbeacons", "Site vbeacons", "vbeacons"),
    ObjectDescriptor::create("evpn_topologies", "Site EVPN topologies", "evpn_topologies"),
    ObjectDescriptor::create("webhooks", "Site webhooks", "webhooks"),
    ObjectDescriptor::create("wxtunnels", "Site wxtunnels", "wxtunnels"),
    ObjectDescriptor::create("wlans", "Site wlans", "wlans")
        .with_follow_up(FollowUp::WlanPortal),
    ObjectDescriptor::create("wxtags", "Site wxtags", "wxtags"),
    ObjectDescriptor::create("wxrules", "Site wxrules", "wxrules"),
];

/// The org-level and site-level steps, each in deployment order.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub org: Vec<ObjectDescriptor>,
    pub site: Vec<ObjectDescriptor>,
}

impl Catalog {
    pub fn standard() -> Self {
        Self {
            org: ORG_STEPS.to_vec(),
            site: SITE_STEPS.to_vec(),
        }
    }

}
