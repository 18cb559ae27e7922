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


//! Replays a backup into a destination organization.
//!
//! Objects are created in catalog order. Each one is first passed through
//! the reference rewriter; if it still points at something the destination
//! does not have yet, it is parked in the replay queue and retried once at
//! the end of the run, after every other object had its chance to register
//! its new identifier.

use crate::backup::{AssetLocator, Snapshot};
use crate::catalog::{Catalog, FollowUp, ORG_INFO, ORG_SETTINGS, ObjectDescriptor, Operation, Write};
use crate::registry::IdentifierRegistry;
use crate::replay::{ReplayQueue, ReplayRequest};
use crate::report::{
    AssetWarning, DeployEvent, Failure, ObjectReport, Outcome, RestoreReport, StepStatus,
};
use crate::rewrite::{ConfigObject, UnresolvedReference, rewrite};
use crate::store::{ObjectStore, Scope};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RestoreError {
    /// The cancel flag was raised between two objects. Whatever was created
    /// before that stays in the destination.
    #[error("restore interrupted after {} objects", report.objects.len())]
    Interrupted { report: Box<RestoreReport> },
}

/// Raised internally when the cancel flag is seen.
struct Interrupted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Main,
    Replay,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub destination_org_id: String,
    /// Kept on the destination org when the backed-up org info is applied.
    pub destination_org_name: Option<String>,
    pub cancel: Arc<AtomicBool>,
}

impl RestoreOptions {
    pub fn new(destination_org_id: impl Into<String>) -> Self {
        Self {
            destination_org_id: destination_org_id.into(),
            destination_org_name: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// State owned by one restore run.
#[derive(Debug)]
pub struct RestoreContext {
    pub registry: IdentifierRegistry,
    pub replay: ReplayQueue,
    assets: AssetLocator,
    source_org_id: String,
    destination_org_id: String,
    cancel: Arc<AtomicBool>,
    report: RestoreReport,
}

impl RestoreContext {
    pub fn new(snapshot: &Snapshot, options: &RestoreOptions) -> Self {
        Self {
            registry: IdentifierRegistry::new(),
            replay: ReplayQueue::new(),
            assets: AssetLocator::new(snapshot.dir()),
            source_org_id: snapshot.source_org_id().to_string(),
            destination_org_id: options.destination_org_id.clone(),
            cancel: Arc::clone(&options.cancel),
            report: RestoreReport {
                destination_org_id: options.destination_org_id.clone(),
                ..RestoreReport::default()
            },
        }
    }
}

/// Restores `snapshot` into the destination named by `options`, walking
/// `catalog` in order. Per-object failures end up in the returned report;
/// only an interruption stops the run early.
pub fn deploy_catalog<S>(
    store: &S,
    catalog: &Catalog,
    snapshot: &Snapshot,
    options: &RestoreOptions,
    observer: &mut dyn FnMut(&DeployEvent<'_>),
) -> Result<RestoreReport, RestoreError>
where
    S: ObjectStore + ?Sized,
{
    let mut deployer = Deployer {
        store,
        catalog,
        snapshot,
        ctx: RestoreContext::new(snapshot, options),
        destination_org_name: options.destination_org_name.clone(),
        observer,
    };
    match deployer.run() {
        Ok(()) => Ok(deployer.ctx.report),
        Err(Interrupted) => {
            warn!("restore interrupted by user");
            Err(RestoreError::Interrupted {
                report: Box::new(deployer.ctx.report),
            })
        }
    }
}

struct Deployer<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    catalog: &'a Catalog,
    snapshot: &'a Snapshot,
    ctx: RestoreContext,
    destination_org_name: Option<String>,
    observer: &'a mut dyn FnMut(&DeployEvent<'_>),
}

/// One object on its way to the API.
struct Pending {
    descriptor: ObjectDescriptor,
    write: Write,
    scope: Scope,
    old_id: Option<String>,
    source_site_id: Option<String>,
    name: String,
    attempts: u32,
}

impl Pending {
    fn message(&self) -> String {
        self.descriptor.message(&self.name)
    }

    fn label(&self) -> String {
        format!("{} {}", self.descriptor.key, self.name)
    }

    fn report(&self, outcome: Outcome) -> ObjectReport {
        ObjectReport {
            object_type: self.descriptor.key.to_string(),
            name: self.name.clone(),
            scope: Some(self.scope.clone()),
            old_id: self.old_id.clone(),
            attempts: self.attempts,
            outcome,
        }
    }
}

impl<S: ObjectStore + ?Sized> Deployer<'_, S> {
    fn run(&mut self) -> Result<(), Interrupted> {
        let destination = self.ctx.destination_org_id.clone();
        let source = self.ctx.source_org_id.clone();
        self.ctx
            .registry
            .add_mapping(Some(&destination), Some(&source), "root");
        info!(%source, %destination, "starting restore");

        self.section(&format!("Deploying Org {destination}"));
        self.deploy_org_info()?;
        self.deploy_org_settings()?;

        self.section("Deploying Org Objects");
        let (catalog, snapshot) = (self.catalog, self.snapshot);
        let org_scope = Scope::Org(destination);
        for descriptor in catalog.org.iter().copied() {
            match descriptor.operation {
                Operation::Import { collection } => {
                    self.check_cancel()?;
                    self.import(
                        descriptor,
                        collection,
                        &org_scope,
                        snapshot.org_value(descriptor.key),
                    );
                }
                Operation::Write(write) => {
                    for object in snapshot.org_objects(descriptor.key) {
                        self.deploy_object(
                            descriptor,
                            write,
                            org_scope.clone(),
                            object,
                            None,
                            Pass::Main,
                        )?;
                    }
                }
            }
        }

        let requests = self.ctx.replay.drain();
        self.ctx.report.replayed = requests.len();
        if !requests.is_empty() {
            self.section("Retrying missing objects");
            info!(count = requests.len(), "replaying deferred objects");
        }
        for request in requests {
            self.check_cancel()?;
            self.replay(request)?;
        }

        self.section("Deployment Done");
        Ok(())
    }

    fn check_cancel(&self) -> Result<(), Interrupted> {
        if self.ctx.cancel.load(Ordering::SeqCst) {
            return Err(Interrupted);
        }
        Ok(())
    }

    fn emit(&mut self, event: DeployEvent<'_>) {
        (self.observer)(&event);
    }

    fn section(&mut self, title: &str) {
        info!("{title}");
        self.emit(DeployEvent::Section(title));
    }

    fn finish(&mut self, message: &str, status: StepStatus, counted: bool) {
        self.emit(DeployEvent::Finished {
            message,
            status,
            counted,
        });
    }

    /// Org info and org settings go through the same rewrite as every other
    /// object, so a reference to an org object created later defers them.
    fn deploy_org_info(&mut self) -> Result<(), Interrupted> {
        let Some(mut data) = self.snapshot.org_data().cloned() else {
            debug!("backup has no org info");
            return Ok(());
        };
        match &self.destination_org_name {
            Some(name) => {
                data.insert("name".into(), Value::String(name.clone()));
            }
            None => {
                data.remove("name");
            }
        }
        let scope = Scope::Org(self.ctx.destination_org_id.clone());
        self.deploy_object(ORG_INFO, Write::UpdateOrg, scope, data, None, Pass::Main)
    }

    fn deploy_org_settings(&mut self) -> Result<(), Interrupted> {
        let Some(settings) = self.snapshot.org_settings().cloned() else {
            debug!("backup has no org settings");
            return Ok(());
        };
        let scope = Scope::Org(self.ctx.destination_org_id.clone());
        self.deploy_object(
            ORG_SETTINGS,
            Write::UpdateSetting,
            scope,
            settings,
            None,
            Pass::Main,
        )
    }

    fn record_import(
        &mut self,
        object_type: &str,
        name: &str,
        scope: Scope,
        message: &str,
        result: Result<Value>,
    ) {
        let outcome = match result {
            Ok(_) => {
                self.finish(message, StepStatus::Success, true);
                Outcome::Deployed { new_id: None }
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "{message} failed");
                self.finish(message, StepStatus::Failure, true);
                Outcome::Failed(Failure::Api {
                    message: format!("{err:#}"),
                })
            }
        };
        self.ctx.report.objects.push(ObjectReport {
            object_type: object_type.to_string(),
            name: name.to_string(),
            scope: Some(scope),
            old_id: None,
            attempts: 1,
            outcome,
        });
    }

    /// Bulk imports go out in one call and are never deferred. Known
    /// references are still rewritten.
    fn import(
        &mut self,
        descriptor: ObjectDescriptor,
        collection: &str,
        scope: &Scope,
        value: Option<&Value>,
    ) {
        let Some(Value::Array(items)) = value else {
            return;
        };
        if items.is_empty() {
            return;
        }
        let message = format!("Importing {} ({} entries)", descriptor.label, items.len());
        self.emit(DeployEvent::Started(&message));

        let body: Vec<Value> = items
            .iter()
            .filter_map(Value::as_object)
            .map(|item| {
                let rewritten = rewrite(item.clone(), descriptor.key, &self.ctx.registry);
                for reference in &rewritten.unresolved {
                    warn!(object_type = descriptor.key, field = %reference.field, old_id = %reference.old_id, "imported entry keeps unknown reference");
                }
                Value::Object(rewritten.object)
            })
            .collect();
        let result = self.store.import(scope, collection, &Value::Array(body));
        let name = format!("{} entries", items.len());
        self.record_import(descriptor.key, &name, scope.clone(), &message, result);
    }

    fn deploy_object(
        &mut self,
        descriptor: ObjectDescriptor,
        write: Write,
        scope: Scope,
        object: ConfigObject,
        source_site_id: Option<String>,
        pass: Pass,
    ) -> Result<(), Interrupted> {
        self.check_cancel()?;
        let pending = Pending {
            descriptor,
            write,
            scope,
            old_id: object.get("id").and_then(Value::as_str).map(String::from),
            source_site_id,
            name: display_name(&object),
            attempts: 1,
        };
        let message = pending.message();
        self.emit(DeployEvent::Started(&message));

        let rewritten = rewrite(object, descriptor.key, &self.ctx.registry);
        if rewritten.is_resolved() {
            return self.submit(pending, rewritten.object);
        }

        if pass == Pass::Main {
            debug!(
                object_type = descriptor.key,
                name = %pending.name,
                missing = ?rewritten.unresolved,
                "deferring object until replay"
            );
            let request = ReplayRequest {
                descriptor,
                write,
                scope: pending.scope.clone(),
                object: rewritten.object,
                old_id: pending.old_id.clone(),
                source_site_id: pending.source_site_id.clone(),
                name: pending.name.clone(),
                attempt_count: 1,
            };
            match self.ctx.replay.enqueue(request) {
                Ok(()) => {
                    self.finish(&message, StepStatus::Deferred, false);
                    return Ok(());
                }
                Err(closed) => warn!("{closed}"),
            }
        }

        self.fail_unresolved(pending, rewritten.unresolved);
        Ok(())
    }

    fn replay(&mut self, request: ReplayRequest) -> Result<(), Interrupted> {
        let pending = Pending {
            descriptor: request.descriptor,
            write: request.write,
            scope: request.scope,
            old_id: request.old_id,
            source_site_id: request.source_site_id,
            name: request.name,
            attempts: request.attempt_count + 1,
        };
        let message = pending.message();
        self.emit(DeployEvent::Started(&message));

        let rewritten = rewrite(request.object, request.descriptor.key, &self.ctx.registry);
        if rewritten.is_resolved() {
            self.submit(pending, rewritten.object)
        } else {
            self.fail_unresolved(pending, rewritten.unresolved);
            Ok(())
        }
    }

    fn fail_unresolved(
        &mut self,
        pending: Pending,
        references: Vec<UnresolvedReference>,
    ) {
        for reference in &references {
            warn!(
                object_type = pending.descriptor.key,
                name = %pending.name,
                field = %reference.field,
                old_id = %reference.old_id,
                "reference could not be resolved"
            );
        }
        let message = pending.message();
        self.finish(&message, StepStatus::Failure, true);
        if pending.descriptor.follow_up == FollowUp::SiteObjects {
            self.skip_site_objects(&pending);
        }
        self.ctx
            .report
            .objects
            .push(pending.report(Outcome::Failed(Failure::Unresolved { references })));
    }

    /// Sends a fully rewritten object to the API and records the result.
    fn submit(&mut self, pending: Pending, body: ConfigObject) -> Result<(), Interrupted> {
        let message = pending.message();
        let body = Value::Object(body);
        let result = match pending.write {
            Write::Create { collection } => self
                .store
                .create(&pending.scope, collection, &body)
                .map(|created| created.get("id").and_then(Value::as_str).map(String::from)),
            Write::UpdateSetting => self.store.update_setting(&pending.scope, &body).map(|_| None),
            Write::UpdateOrg => self
                .store
                .update_org(pending.scope.id(), &body)
                .map(|_| None),
        };

        match result {
            Ok(new_id) => {
                if let Write::Create { .. } = pending.write {
                    self.ctx.registry.add_mapping(
                        new_id.as_deref(),
                        pending.old_id.as_deref(),
                        &pending.label(),
                    );
                }
                info!(object_type = pending.descriptor.key, name = %pending.name, ?new_id, "object deployed");
                self.finish(&message, StepStatus::Success, true);
                self.ctx.report.objects.push(pending.report(Outcome::Deployed {
                    new_id: new_id.clone(),
                }));
                self.follow_up(&pending, new_id.as_deref())
            }
            Err(err) => {
                let detail = format!("{err:#}");
                error!(object_type = pending.descriptor.key, name = %pending.name, error = %detail, "object creation failed");
                self.finish(&message, StepStatus::Failure, true);
                if pending.descriptor.follow_up == FollowUp::SiteObjects {
                    self.skip_site_objects(&pending);
                }
                self.ctx
                    .report
                    .objects
                    .push(pending.report(Outcome::Failed(Failure::Api { message: detail })));
                Ok(())
            }
        }
    }

    fn follow_up(&mut self, owner: &Pending, new_id: Option<&str>) -> Result<(), Interrupted> {
        match owner.descriptor.follow_up {
            FollowUp::None => Ok(()),
            FollowUp::WlanPortal => {
                self.deploy_wlan_portal(owner, new_id);
                Ok(())
            }
            FollowUp::MapImage => {
                self.deploy_map_image(owner, new_id);
                Ok(())
            }
            FollowUp::SiteObjects => match new_id {
                Some(new_site_id) => self.deploy_site_objects(owner, new_site_id),
                None => {
                    self.skip_site_objects(owner);
                    Ok(())
                }
            },
        }
    }

    /// Creates everything backed up under a site, scoped to the site that
    /// was just created for it. Objects of a site created during replay are
    /// not deferred again.
    fn deploy_site_objects(&mut self, site: &Pending, new_site_id: &str) -> Result<(), Interrupted> {
        let Some(source_site_id) = site.old_id.clone() else {
            return Ok(());
        };
        let pass = if site.attempts > 1 {
            Pass::Replay
        } else {
            Pass::Main
        };
        self.section(&format!("Deploying Site {}", site.name));
        let (catalog, snapshot) = (self.catalog, self.snapshot);
        let scope = Scope::Site(new_site_id.to_string());
        for descriptor in catalog.site.iter().copied() {
            let write = match descriptor.operation {
                Operation::Import { collection } => {
                    self.check_cancel()?;
                    self.import(
                        descriptor,
                        collection,
                        &scope,
                        snapshot.site_value(&source_site_id, descriptor.key),
                    );
                    continue;
                }
                Operation::Write(write) => write,
            };
            let objects = snapshot.site_objects(&source_site_id, descriptor.key);
            if objects.is_empty() {
                debug!(site = %site.name, step = descriptor.key, "nothing to process");
            }
            for object in objects {
                self.deploy_object(
                    descriptor,
                    write,
                    scope.clone(),
                    object,
                    Some(source_site_id.clone()),
                    pass,
                )?;
            }
        }
        self.section("Deploying Other Org Objects");
        Ok(())
    }

    /// Records every object backed up under a site that could not be created.
    fn skip_site_objects(&mut self, site: &Pending) {
        let Some(source_site_id) = site.old_id.as_deref() else {
            return;
        };
        let (catalog, snapshot) = (self.catalog, self.snapshot);
        for descriptor in &catalog.site {
            let names: Vec<String> = if descriptor.is_import() {
                match snapshot.site_value(source_site_id, descriptor.key) {
                    Some(Value::Array(items)) if !items.is_empty() => {
                        vec![format!("{} entries", items.len())]
                    }
                    _ => Vec::new(),
                }
            } else {
                snapshot
                    .site_objects(source_site_id, descriptor.key)
                    .iter()
                    .map(display_name)
                    .collect()
            };
            for name in names {
                warn!(site = %site.name, object_type = descriptor.key, %name, "skipped, site was not created");
                let message = descriptor.message(&name);
                self.finish(&message, StepStatus::Failure, true);
                self.ctx.report.objects.push(ObjectReport {
                    object_type: descriptor.key.to_string(),
                    name,
                    scope: None,
                    old_id: None,
                    attempts: 0,
                    outcome: Outcome::Failed(Failure::MissingScope {
                        owner: site.name.clone(),
                    }),
                });
            }
        }
    }

    fn deploy_wlan_portal(&mut self, wlan: &Pending, new_id: Option<&str>) {
        let (Some(old_wlan_id), Some(new_wlan_id)) = (wlan.old_id.as_deref(), new_id) else {
            return;
        };
        let assets = self.ctx.assets.wlan_portal(
            &self.ctx.source_org_id,
            wlan.source_site_id.as_deref(),
            old_wlan_id,
        );

        if assets.template.is_file() {
            let message = format!("Creating Portal Template for WLAN {}", wlan.name);
            self.emit(DeployEvent::Started(&message));
            let result = read_json(&assets.template).and_then(|template| {
                self.store
                    .update_portal_template(&wlan.scope, new_wlan_id, &template)
            });
            self.asset_result(&wlan.label(), &message, result.map(|_| ()));
        } else {
            debug!(wlan = %wlan.name, path = %assets.template.display(), "no portal template found");
        }

        if assets.image.is_file() {
            let message = format!("Uploading Portal image for WLAN {}", wlan.name);
            self.emit(DeployEvent::Started(&message));
            let result = self
                .store
                .upload_portal_image(&wlan.scope, new_wlan_id, &assets.image);
            self.asset_result(&wlan.label(), &message, result);
        } else {
            self.missing_asset(&wlan.label(), "portal image", &assets.image);
        }
    }

    fn deploy_map_image(&mut self, map: &Pending, new_id: Option<&str>) {
        let (Some(old_map_id), Some(source_site_id)) =
            (map.old_id.as_deref(), map.source_site_id.as_deref())
        else {
            return;
        };
        let image = self
            .ctx
            .assets
            .map_image(&self.ctx.source_org_id, source_site_id, old_map_id);
        if !image.is_file() {
            self.missing_asset(&map.label(), "floorplan image", &image);
            return;
        }
        let message = format!("Uploading image floorplan {}", map.name);
        self.emit(DeployEvent::Started(&message));
        let result = match new_id {
            Some(new_map_id) => self
                .store
                .upload_map_image(map.scope.id(), new_map_id, &image),
            None => Err(anyhow::anyhow!("map was created without an id")),
        };
        self.asset_result(&map.label(), &message, result);
    }

    fn missing_asset(&mut self, owner: &str, kind: &str, path: &Path) {
        warn!(owner, kind, path = %path.display(), "no side-car file found, upload skipped");
        self.ctx.report.warnings.push(AssetWarning {
            owner: owner.to_string(),
            message: format!("no {kind} at {}, upload skipped", path.display()),
        });
    }

    fn asset_result(&mut self, owner: &str, message: &str, result: Result<()>) {
        match result {
            Ok(()) => self.finish(message, StepStatus::Success, false),
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(owner, error = %detail, "{message} failed");
                self.finish(message, StepStatus::Warning, false);
                self.ctx.report.warnings.push(AssetWarning {
                    owner: owner.to_string(),
                    message: format!("{message}: {detail}"),
                });
            }
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

/// Name shown for an object in progress output and reports.
pub fn display_name(object: &ConfigObject) -> String {
    object
        .get("name")
        .or_else(|| object.get("ssid"))
        .and_then(Value::as_str)
        .map(|name| format!("\"{name}\""))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DryRunStore;
    use crate::store::fake::{Call, RecordingStore};
    use serde_json::json;
    use tempfile::tempdir;

    const ORG_OLD: &str = "0a0a0a0a-0000-4000-8000-000000000001";
    const ORG_NEW: &str = "0b0b0b0b-0000-4000-8000-000000000002";
    const A_OLD: &str = "aaaaaaaa-1111-4111-8111-111111111111";
    const B_OLD: &str = "bbbbbbbb-2222-4222-8222-222222222222";
    const SITE_OLD: &str = "cccccccc-3333-4333-8333-333333333333";
    const GROUP_OLD: &str = "dddddddd-4444-4444-8444-444444444444";
    const WLAN_OLD: &str = "eeeeeeee-5555-4555-8555-555555555555";
    const MAP_OLD: &str = "ffffffff-6666-4666-8666-666666666666";
    const MISSING: &str = "99999999-9999-4999-9999-999999999999";

    fn alpha() -> ObjectDescriptor {
        ObjectDescriptor::create("alpha", "Org alpha", "alpha")
    }

    fn beta() -> ObjectDescriptor {
        ObjectDescriptor::create("beta", "Org beta", "beta")
    }

    fn org_only(org: Vec<ObjectDescriptor>) -> Catalog {
        Catalog { org, site: vec![] }
    }

    fn snapshot(value: Value) -> Snapshot {
        Snapshot::from_value(value, ".").unwrap()
    }

    fn pair(b_reference: &str) -> Snapshot {
        snapshot(json!({
            "org": {
                "data": {"id": ORG_OLD, "name": "source"},
                "alpha": [{"id": A_OLD, "name": "a"}],
                "beta": [{"id": B_OLD, "name": "b", "alpha_id": b_reference}]
            }
        }))
    }

    fn run(
        store: &dyn ObjectStore,
        catalog: &Catalog,
        snapshot: &Snapshot,
    ) -> Result<RestoreReport, RestoreError> {
        deploy_catalog(store, catalog, snapshot, &RestoreOptions::new(ORG_NEW), &mut |_| {})
    }

    #[test]
    fn dependency_first_resolves_in_the_main_pass() {
        let store = RecordingStore::new();
        let catalog = org_only(vec![alpha(), beta()]);
        let report = run(&store, &catalog, &pair(A_OLD)).unwrap();

        assert_eq!(store.created_names(), ["a", "b"]);
        let new_a = store.new_id_for("a").unwrap();
        let created = store.created();
        assert_eq!(created[1].1["alpha_id"], json!(new_a));
        assert!(created[1].1.get("id").is_none());
        assert_eq!(report.replayed, 0);
        assert!(report.is_clean());
        assert_eq!(report.find("beta", "\"b\"").unwrap().attempts, 1);
    }

    #[test]
    fn dependent_first_is_deferred_then_replayed() {
        let store = RecordingStore::new();
        let catalog = org_only(vec![beta(), alpha()]);
        let mut events = Vec::new();
        let report = deploy_catalog(
            &store,
            &catalog,
            &pair(A_OLD),
            &RestoreOptions::new(ORG_NEW),
            &mut |event| {
                if let DeployEvent::Finished { message, status, .. } = event {
                    events.push((message.to_string(), *status));
                }
            },
        )
        .unwrap();

        assert_eq!(store.created_names(), ["a", "b"]);
        assert_eq!(
            store.created()[1].1["alpha_id"],
            json!(store.new_id_for("a").unwrap())
        );
        assert_eq!(report.replayed, 1);
        let b = report.find("beta", "\"b\"").unwrap();
        assert!(b.is_deployed());
        assert_eq!(b.attempts, 2);
        assert_eq!(b.old_id.as_deref(), Some(B_OLD));
        assert!(events.contains(&("Creating beta \"b\"".to_string(), StepStatus::Deferred)));
        assert!(events.contains(&("Creating beta \"b\"".to_string(), StepStatus::Success)));
    }

    #[test]
    fn reference_outside_the_backup_fails_after_one_replay() {
        let store = RecordingStore::new();
        let catalog = org_only(vec![beta(), alpha()]);
        let report = run(&store, &catalog, &pair(MISSING)).unwrap();

        assert_eq!(store.created_names(), ["a"]);
        let unresolved: Vec<_> = report.unresolved().collect();
        assert_eq!(unresolved.len(), 1);
        let (object, references) = unresolved[0];
        assert_eq!(object.name, "\"b\"");
        assert_eq!(object.attempts, 2);
        assert_eq!(references[0].old_id, MISSING);
        assert_eq!(references[0].field, "alpha_id");
        assert_eq!(report.replayed, 1);
    }

    #[test]
    fn references_to_the_source_org_point_at_the_destination() {
        let store = RecordingStore::new();
        let catalog = org_only(vec![alpha()]);
        let snapshot = snapshot(json!({
            "org": {
                "data": {"id": ORG_OLD},
                "alpha": [{"id": A_OLD, "name": "a", "owner": ORG_OLD}]
            }
        }));
        let report = run(&store, &catalog, &snapshot).unwrap();

        assert_eq!(store.created()[0].1["owner"], ORG_NEW);
        assert_eq!(report.replayed, 0);
    }

    #[test]
    fn api_failures_are_recorded_and_the_run_continues() {
        let store = RecordingStore::rejecting(&["a"]);
        let catalog = org_only(vec![alpha(), beta()]);
        let report = run(&store, &catalog, &pair(A_OLD)).unwrap();

        assert!(store.created_names().is_empty());
        let a = report.find("alpha", "\"a\"").unwrap();
        assert!(matches!(&a.outcome, Outcome::Failed(Failure::Api { message }) if message.contains("HTTP 400")));
        // b waited for a, which never appeared
        let b = report.find("beta", "\"b\"").unwrap();
        assert!(matches!(b.outcome, Outcome::Failed(Failure::Unresolved { .. })));
        assert_eq!(b.attempts, 2);
    }

    #[test]
    fn applies_org_info_and_settings_to_the_destination() {
        let store = RecordingStore::new();
        let snapshot = snapshot(json!({
            "org": {
                "data": {"id": ORG_OLD, "name": "source", "msp_id": MISSING, "alarmtemplate_id": null},
                "settings": {"id": MISSING, "mgmt": {"use_wxtunnel": false}}
            }
        }));
        let mut options = RestoreOptions::new(ORG_NEW);
        options.destination_org_name = Some("destination".into());
        deploy_catalog(&store, &Catalog::standard(), &snapshot, &options, &mut |_| {}).unwrap();

        let calls = store.calls();
        assert_eq!(
            calls[0],
            Call::Org {
                org_id: ORG_NEW.into(),
                body: json!({"name": "destination", "alarmtemplate_id": null})
            }
        );
        assert_eq!(
            calls[1],
            Call::Setting {
                scope: Scope::Org(ORG_NEW.into()),
                body: json!({"mgmt": {"use_wxtunnel": false}})
            }
        );
    }

    #[test]
    fn org_preamble_waits_for_objects_it_references() {
        let store = RecordingStore::new();
        let snapshot = snapshot(json!({
            "org": {
                "data": {"id": ORG_OLD, "name": "source", "alarmtemplate_id": A_OLD},
                "settings": {"alarmtemplate_id": A_OLD},
                "alarmtemplates": [{"id": A_OLD, "name": "alarms"}]
            }
        }));
        let mut options = RestoreOptions::new(ORG_NEW);
        options.destination_org_name = Some("destination".into());
        let report =
            deploy_catalog(&store, &Catalog::standard(), &snapshot, &options, &mut |_| {}).unwrap();

        let new_template = store.new_id_for("alarms").unwrap();
        let calls = store.calls();
        assert!(matches!(&calls[0], Call::Create { collection, .. } if collection == "alarmtemplates"));
        assert_eq!(
            calls[1],
            Call::Org {
                org_id: ORG_NEW.into(),
                body: json!({"name": "destination", "alarmtemplate_id": new_template})
            }
        );
        assert_eq!(
            calls[2],
            Call::Setting {
                scope: Scope::Org(ORG_NEW.into()),
                body: json!({"alarmtemplate_id": new_template})
            }
        );
        assert_eq!(report.replayed, 2);
        assert_eq!(report.find("org", "\"destination\"").unwrap().attempts, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn org_settings_with_unknown_reference_are_never_sent() {
        let store = RecordingStore::new();
        let snapshot = snapshot(json!({
            "org": {
                "data": {"id": ORG_OLD},
                "settings": {"alarmtemplate_id": MISSING, "mgmt": {}}
            }
        }));
        let report = run(&store, &Catalog::standard(), &snapshot).unwrap();

        assert!(!store.calls().iter().any(|c| matches!(c, Call::Setting { .. })));
        let (settings, references) = report.unresolved().next().unwrap();
        assert_eq!(settings.object_type, "settings");
        assert_eq!(settings.attempts, 2);
        assert_eq!(references[0].field, "alarmtemplate_id");
        assert_eq!(references[0].old_id, MISSING);
    }

    fn org_with_site(extra_site_fields: Value) -> Value {
        let mut site = json!({"id": SITE_OLD, "name": "Paris", "sitegroup_ids": [GROUP_OLD]});
        for (k, v) in extra_site_fields.as_object().unwrap() {
            site[k] = v.clone();
        }
        json!({
            "org": {
                "data": {"id": ORG_OLD},
                "sitegroups": [{"id": GROUP_OLD, "name": "emea"}],
                "sites": [site]
            },
            "sites": {
                SITE_OLD: {
                    "settings": {"site_id": SITE_OLD, "rogue": {"enabled": true}},
                    "maps": [{"id": MAP_OLD, "name": "floor 1"}],
                    "wlans": [{"id": WLAN_OLD, "ssid": "corp", "map_id": MAP_OLD}],
                    "psks": [{"id": A_OLD, "name": "key", "site_id": SITE_OLD}]
                }
            }
        })
    }

    #[test]
    fn site_objects_are_created_under_the_new_site() {
        let store = RecordingStore::new();
        let report = run(
            &store,
            &Catalog::standard(),
            &snapshot(org_with_site(json!({}))),
        )
        .unwrap();

        let new_site = store.new_id_for("Paris").unwrap();
        let site_scope = Scope::Site(new_site.clone());
        let calls = store.calls();
        assert!(calls.contains(&Call::Setting {
            scope: site_scope.clone(),
            body: json!({"rogue": {"enabled": true}})
        }));
        assert!(calls.contains(&Call::Import {
            scope: site_scope.clone(),
            collection: "psks".into(),
            body: json!([{"name": "key"}])
        }));
        let wlan = calls
            .iter()
            .find_map(|c| match c {
                Call::Create { scope, collection, body, .. } if collection == "wlans" => {
                    Some((scope.clone(), body.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(wlan.0, site_scope);
        assert_eq!(wlan.1["map_id"], json!(store.new_id_for("floor 1").unwrap()));
        assert!(report.is_clean());
        assert_eq!(report.replayed, 0);
    }

    #[test]
    fn failed_site_skips_everything_under_it() {
        let store = RecordingStore::rejecting(&["Paris"]);
        let report = run(
            &store,
            &Catalog::standard(),
            &snapshot(org_with_site(json!({}))),
        )
        .unwrap();

        assert_eq!(store.created_names(), ["emea"]);
        let skipped: Vec<_> = report
            .objects
            .iter()
            .filter(|o| matches!(&o.outcome, Outcome::Failed(Failure::MissingScope { owner }) if owner == "\"Paris\""))
            .map(|o| o.object_type.as_str())
            .collect();
        assert_eq!(skipped, ["settings", "maps", "psks", "wlans"]);
    }

    #[test]
    fn site_deferred_in_main_pass_brings_its_objects_in_replay() {
        let store = RecordingStore::new();
        let sites = ObjectDescriptor::create("sites", "Org sites", "sites")
            .with_follow_up(FollowUp::SiteObjects);
        let groups = ObjectDescriptor::create("sitegroups", "Org sitegroups", "sitegroups");
        let wlans = ObjectDescriptor::create("wlans", "Site wlans", "wlans");
        let zones = ObjectDescriptor::create("zones", "Site zones", "zones");
        let catalog = Catalog {
            org: vec![sites, groups],
            site: vec![wlans, zones],
        };
        let mut value = org_with_site(json!({}));
        value["sites"][SITE_OLD]["zones"] = json!([{"id": B_OLD, "name": "z", "beacon": MISSING}]);

        let report = run(&store, &catalog, &snapshot(value)).unwrap();

        assert_eq!(store.created_names(), ["emea", "Paris"]);
        assert!(report.find("sites", "\"Paris\"").unwrap().is_deployed());
        assert!(report.find("wlans", "\"corp\"").is_some());
        // created during replay, so its own missing reference is final
        let zone = report.find("zones", "\"z\"").unwrap();
        assert_eq!(zone.attempts, 1);
        assert!(matches!(zone.outcome, Outcome::Failed(Failure::Unresolved { .. })));
        assert_eq!(report.replayed, 1);
    }

    #[test]
    fn missing_portal_image_is_a_warning_not_a_failure() {
        let store = RecordingStore::new();
        let snapshot = snapshot(json!({
            "org": {
                "data": {"id": ORG_OLD},
                "wlans": [{"id": WLAN_OLD, "ssid": "guest"}]
            }
        }));
        let report = run(&store, &Catalog::standard(), &snapshot).unwrap();

        assert!(report.find("wlans", "\"guest\"").unwrap().is_deployed());
        assert!(report.is_clean());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("portal image"));
        assert!(!store.calls().iter().any(|c| matches!(c, Call::PortalImage { .. })));
    }

    #[test]
    fn uploads_side_car_files_named_after_source_ids() {
        let dir = tempdir().unwrap();
        let stem = format!("org_conf_file_org_{ORG_OLD}_wlan_{WLAN_OLD}");
        fs::write(dir.path().join(format!("{stem}.json")), r#"{"locales": {}}"#).unwrap();
        fs::write(dir.path().join(format!("{stem}.png")), b"png").unwrap();
        fs::write(
            dir.path().join(format!(
                "org_conf_file_org_{ORG_OLD}_site_{SITE_OLD}_map_{MAP_OLD}.png"
            )),
            b"png",
        )
        .unwrap();
        let mut value = org_with_site(json!({}));
        value["org"]["wlans"] = json!([{"id": WLAN_OLD, "ssid": "guest"}]);
        let snapshot = Snapshot::from_value(value, dir.path()).unwrap();

        let store = RecordingStore::new();
        let report = run(&store, &Catalog::standard(), &snapshot).unwrap();

        let new_site = store.new_id_for("Paris").unwrap();
        let new_map = store.new_id_for("floor 1").unwrap();
        let calls = store.calls();
        assert!(calls.contains(&Call::MapImage {
            site_id: new_site,
            map_id: new_map
        }));
        let org_wlan = store
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::Create { scope: Scope::Org(_), collection, new_id, .. } if collection == "wlans" => {
                    Some(new_id.clone())
                }
                _ => None,
            })
            .unwrap();
        assert!(calls.contains(&Call::PortalTemplate {
            scope: Scope::Org(ORG_NEW.into()),
            wlan_id: org_wlan.clone()
        }));
        assert!(calls.contains(&Call::PortalImage {
            scope: Scope::Org(ORG_NEW.into()),
            wlan_id: org_wlan
        }));
        // only the site wlan has no image on disk
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].owner.contains("corp"));
    }

    #[test]
    fn failed_uploads_leave_the_owner_deployed() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path()
                .join(format!("org_conf_file_org_{ORG_OLD}_wlan_{WLAN_OLD}.png")),
            b"png",
        )
        .unwrap();
        let snapshot = Snapshot::from_value(
            json!({"org": {"data": {"id": ORG_OLD}, "wlans": [{"id": WLAN_OLD, "ssid": "guest"}]}}),
            dir.path(),
        )
        .unwrap();
        let store = RecordingStore::failing_uploads();
        let report = run(&store, &Catalog::standard(), &snapshot).unwrap();

        assert!(report.find("wlans", "\"guest\"").unwrap().is_deployed());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("portal image rejected"));
    }

    #[test]
    fn interruption_stops_before_the_next_object() {
        let store = RecordingStore::new();
        let options = RestoreOptions::new(ORG_NEW);
        options.cancel.store(true, Ordering::SeqCst);
        let err = deploy_catalog(
            &store,
            &org_only(vec![alpha(), beta()]),
            &pair(A_OLD),
            &options,
            &mut |_| {},
        )
        .unwrap_err();

        let RestoreError::Interrupted { report } = err;
        assert!(report.objects.is_empty());
        assert!(store.calls().is_empty());
    }

    #[test]
    fn dry_run_store_completes_a_full_restore() {
        let store = DryRunStore::new();
        let report = run(
            &store,
            &Catalog::standard(),
            &snapshot(org_with_site(json!({}))),
        )
        .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.replayed, 0);
        assert!(report.find("wlans", "\"corp\"").unwrap().is_deployed());
    }

    #[test]
    fn display_name_prefers_name_then_ssid() {
        let named = json!({"name": "a", "ssid": "b"});
        assert_eq!(display_name(named.as_object().unwrap()), "\"a\"");
        let ssid = json!({"ssid": "b"});
        assert_eq!(display_name(ssid.as_object().unwrap()), "\"b\"");
        assert_eq!(display_name(&ConfigObject::new()), "");
    }
}
