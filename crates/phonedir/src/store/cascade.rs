//! Cascading deletes.
//!
//! A delete is planned before anything is touched: the subtree below the
//! root is walked into a flat list of file deletions (children before
//! parents, root last) plus the menu items elsewhere in the tree that point
//! into it. The plan is then executed step by step and every step's outcome
//! is reported.
//!
//! A record is only deleted once all of its children are gone. When any
//! step fails, the records above it stay, and the menus that survive are
//! pruned of the children that were deleted, so the tree never holds a
//! dangling reference. The caller gets [`PartialFailure`] and may retry.

use super::{item_target, unlink, DirectoryStore};
use crate::error::{PartialFailure, Result, StoreError};
use crate::model::RecordKey;
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use phonedir_protocol::MenuItem;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, info_span, warn};

/// Times a plan is rebuilt when the tree changes while locks are taken.
pub(super) const MAX_PLAN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Remove a record file
    DeleteFile,
    /// Remove the items pointing at a record from one menu
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    /// File or menu item was already gone
    AlreadyAbsent,
    Failed(String),
    /// Not attempted because an earlier step failed
    Skipped(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::AlreadyAbsent)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeStep {
    pub action: StepAction,
    pub record: RecordKey,
    /// Menu edited by an unlink step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu: Option<RecordKey>,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub root: RecordKey,
    pub steps: Vec<CascadeStep>,
}

impl CascadeReport {
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.outcome.is_success())
    }

    /// Files this cascade removed or found already removed.
    pub fn deleted_files(&self) -> Vec<&RecordKey> {
        self.steps
            .iter()
            .filter(|s| s.action == StepAction::DeleteFile && s.outcome.is_success())
            .map(|s| &s.record)
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct PlannedDelete {
    record: RecordKey,
    children: Vec<RecordKey>,
}

/// Everything one delete will touch.
#[derive(Debug, PartialEq, Eq)]
struct DeletionPlan {
    root: RecordKey,
    /// Children before parents; the root is last.
    deletes: Vec<PlannedDelete>,
    /// Menus inside the subtree, root included when it is a menu.
    subtree_menus: Vec<RecordKey>,
    /// `(menu, target)` for items outside the subtree pointing into it.
    inbound: Vec<(RecordKey, RecordKey)>,
}

impl DeletionPlan {
    fn lock_keys(&self) -> BTreeSet<RecordKey> {
        let mut keys: BTreeSet<RecordKey> = self.deletes.iter().map(|d| d.record.clone()).collect();
        keys.extend(self.subtree_menus.iter().cloned());
        keys.extend(self.inbound.iter().map(|(menu, _)| menu.clone()));
        keys
    }
}

impl DirectoryStore {
    /// Delete a zone with its branches and localities, then drop it from
    /// the main menu.
    pub fn delete_zone(&self, zone: &ZoneId) -> Result<CascadeReport> {
        self.delete_subtree(RecordKey::Zone(zone.clone()))
    }

    /// Delete a branch with its localities, then drop it from its zone.
    pub fn delete_branch(&self, zone: &ZoneId, branch: &BranchId) -> Result<CascadeReport> {
        self.delete_subtree(RecordKey::Branch(zone.clone(), branch.clone()))
    }

    /// Delete a locality file, then every menu item pointing at it.
    pub fn delete_locality(&self, locality: &LocalityId) -> Result<CascadeReport> {
        self.delete_subtree(RecordKey::Locality(locality.clone()))
    }

    fn delete_subtree(&self, root: RecordKey) -> Result<CascadeReport> {
        let span = info_span!("cascade_delete", root = %root);
        let _enter = span.enter();

        for attempt in 1..=MAX_PLAN_ATTEMPTS {
            let draft = self.plan_deletion(&root)?;
            let locks = self.locks.lock_all(draft.lock_keys())?;
            // Re-plan under the locks; the tree may have changed meanwhile.
            let plan = self.plan_deletion(&root)?;
            if plan.lock_keys().iter().all(|key| locks.holds(key)) {
                return self.execute_plan(plan);
            }
            drop(locks);
            debug!(attempt, "Tree changed while locking, planning again");
        }
        Err(StoreError::Conflict(format!(
            "{root} kept changing while being deleted; try again"
        )))
    }

    fn plan_deletion(&self, root: &RecordKey) -> Result<DeletionPlan> {
        if !self.exists(root)? {
            return Err(StoreError::NotFound(format!("{root} does not exist")));
        }

        let mut deletes = Vec::new();
        let mut subtree_menus = Vec::new();
        let root_children = match root {
            RecordKey::MainMenu => {
                return Err(StoreError::Validation(
                    "the main menu cannot be deleted".to_string(),
                ))
            }
            RecordKey::Locality(_) => Vec::new(),
            RecordKey::Branch(..) => {
                let children = self.menu_children(root)?;
                for locality in &children {
                    push_unique(&mut deletes, locality.clone(), Vec::new());
                }
                subtree_menus.push(root.clone());
                children
            }
            RecordKey::Zone(_) => {
                let children = self.menu_children(root)?;
                for child in &children {
                    if let RecordKey::Branch(..) = child {
                        let localities = match self.menu_children(child) {
                            Ok(localities) => {
                                subtree_menus.push(child.clone());
                                localities
                            }
                            Err(e) if e.is_not_found() => Vec::new(),
                            Err(e) => return Err(e),
                        };
                        for locality in &localities {
                            push_unique(&mut deletes, locality.clone(), Vec::new());
                        }
                        push_unique(&mut deletes, child.clone(), localities);
                    } else {
                        push_unique(&mut deletes, child.clone(), Vec::new());
                    }
                }
                subtree_menus.push(root.clone());
                children
            }
        };
        deletes.push(PlannedDelete {
            record: root.clone(),
            children: root_children,
        });

        let subtree: HashSet<&RecordKey> = subtree_menus.iter().collect();
        let scan = self.scan_menus()?;
        let mut inbound = Vec::new();
        for planned in &deletes {
            for menu in scan.referrers(&planned.record) {
                if !subtree.contains(&menu) {
                    inbound.push((menu, planned.record.clone()));
                }
            }
        }

        Ok(DeletionPlan {
            root: root.clone(),
            deletes,
            subtree_menus,
            inbound,
        })
    }

    /// Records a zone or branch menu points at.
    fn menu_children(&self, menu: &RecordKey) -> Result<Vec<RecordKey>> {
        let loaded = self.load::<MenuItem>(menu)?;
        let mut children = Vec::new();
        for item in &loaded.doc.children {
            match item_target(item).map(RecordKey::from) {
                Some(child @ RecordKey::Locality(_)) => children.push(child),
                // A zone only owns branches filed under it.
                Some(RecordKey::Branch(owner, branch))
                    if matches!(menu, RecordKey::Zone(zone) if *zone == owner) =>
                {
                    children.push(RecordKey::Branch(owner, branch))
                }
                _ => warn!(%menu, url = %item.url, "Ignoring unrecognized menu item in cascade"),
            }
        }
        let mut seen = HashSet::new();
        children.retain(|child| seen.insert(child.clone()));
        Ok(children)
    }

    fn execute_plan(&self, plan: DeletionPlan) -> Result<CascadeReport> {
        let mut steps = Vec::new();
        let mut gone: HashSet<RecordKey> = HashSet::new();

        for planned in &plan.deletes {
            let remaining = planned
                .children
                .iter()
                .filter(|child| !gone.contains(*child))
                .count();
            let outcome = if remaining > 0 {
                StepOutcome::Skipped(format!("{remaining} children were not deleted"))
            } else {
                match self.remove_record(&planned.record) {
                    Ok(true) => StepOutcome::Done,
                    Ok(false) => StepOutcome::AlreadyAbsent,
                    Err(e) => {
                        warn!(record = %planned.record, error = %e, "Cascade step failed");
                        StepOutcome::Failed(e.to_string())
                    }
                }
            };
            if outcome.is_success() {
                gone.insert(planned.record.clone());
            }
            steps.push(CascadeStep {
                action: StepAction::DeleteFile,
                record: planned.record.clone(),
                menu: None,
                outcome,
            });
        }

        for (menu, target) in &plan.inbound {
            if gone.contains(target) {
                steps.push(self.unlink_step(menu, &[target.clone()]).remove(0));
            } else {
                steps.push(CascadeStep {
                    action: StepAction::Unlink,
                    record: target.clone(),
                    menu: Some(menu.clone()),
                    outcome: StepOutcome::Skipped("record was not deleted".to_string()),
                });
            }
        }

        // Surviving menus of the subtree must not point at deleted records.
        let mut deleted: Vec<RecordKey> = gone.iter().cloned().collect();
        deleted.sort();
        for menu in &plan.subtree_menus {
            if !gone.contains(menu) {
                steps.extend(self.unlink_step(menu, &deleted));
            }
        }

        let report = CascadeReport {
            root: plan.root,
            steps,
        };
        if report.is_complete() {
            info!(
                root = %report.root,
                files = report.deleted_files().len(),
                "Cascade delete complete"
            );
            Ok(report)
        } else {
            warn!(
                root = %report.root,
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Cascade delete incomplete"
            );
            Err(StoreError::PartialFailure(Box::new(PartialFailure::Cascade(report))))
        }
    }

    /// Remove items for `targets` from one menu in a single rewrite. One
    /// step per target the menu listed; a single `AlreadyAbsent` step when
    /// it listed none.
    fn unlink_step(&self, menu: &RecordKey, targets: &[RecordKey]) -> Vec<CascadeStep> {
        let step = |record: RecordKey, outcome: StepOutcome| CascadeStep {
            action: StepAction::Unlink,
            record,
            menu: Some(menu.clone()),
            outcome,
        };
        let first = targets.first().cloned().unwrap_or(RecordKey::MainMenu);

        let mut loaded = match self.load::<MenuItem>(menu) {
            Ok(loaded) => loaded,
            Err(e) if e.is_not_found() => return vec![step(first, StepOutcome::AlreadyAbsent)],
            Err(e) => return vec![step(first, StepOutcome::Failed(e.to_string()))],
        };
        let removed: Vec<RecordKey> = targets
            .iter()
            .filter(|target| {
                target
                    .link_target()
                    .map(|link| unlink(&mut loaded.doc, &link) > 0)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if removed.is_empty() {
            return if targets.len() == 1 {
                vec![step(first, StepOutcome::AlreadyAbsent)]
            } else {
                Vec::new()
            };
        }

        let outcome = match self.save(&loaded) {
            Ok(_) => StepOutcome::Done,
            Err(e) => {
                warn!(%menu, error = %e, "Failed to update menu during cascade");
                StepOutcome::Failed(e.to_string())
            }
        };
        removed
            .into_iter()
            .map(|record| step(record, outcome.clone()))
            .collect()
    }
}

fn push_unique(deletes: &mut Vec<PlannedDelete>, record: RecordKey, children: Vec<RecordKey>) {
    if !deletes.iter().any(|d| d.record == record) {
        deletes.push(PlannedDelete { record, children });
    }
}
