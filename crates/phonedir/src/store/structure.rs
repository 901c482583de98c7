//! Creating and renaming zones, branches and localities.
//!
//! A create writes the new child file first and then the parent menu. If
//! the parent cannot be written the child is removed again, so no record
//! is ever left unreferenced by a failed create.

use super::cascade::MAX_PLAN_ATTEMPTS;
use super::{lists, rename_items, DirectoryStore};
use crate::error::{Result, StoreError};
use crate::model::{
    missing_locality_id, missing_zone_id, validate_display_name, RecordKey, MISSING_LOCALITY_ID,
    MISSING_ZONE_ID,
};
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use phonedir_protocol::{Directory, LinkTarget, Menu, MenuItem};
use serde::Serialize;
use std::ops::AddAssign;
use tracing::{debug, info};

/// What an ensure call had to create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnsureOutcome {
    pub localities_created: usize,
    pub menus_created: usize,
    pub menus_updated: usize,
}

impl AddAssign for EnsureOutcome {
    fn add_assign(&mut self, other: Self) {
        self.localities_created += other.localities_created;
        self.menus_created += other.menus_created;
        self.menus_updated += other.menus_updated;
    }
}

impl DirectoryStore {
    /// Create a zone and list it in the main menu.
    pub fn add_zone(&self, name: &str) -> Result<ZoneId> {
        let name = validate_display_name(name)?;
        let id = ZoneId::from_name(&name)?;
        if id.as_str() == MISSING_ZONE_ID {
            return Err(StoreError::Conflict(format!(
                "zone id '{id}' is reserved for the holding zone"
            )));
        }
        let key = RecordKey::Zone(id.clone());
        let target = LinkTarget::Zone(id.clone());

        let _locks = self.locks.lock_all([key.clone(), RecordKey::MainMenu])?;
        let mut main = self.load_or_new_main_menu()?;
        if self.exists(&key)? || lists(&main.doc, &target) {
            return Err(StoreError::Conflict(format!("zone '{id}' already exists")));
        }

        self.create_record(&key, &Menu::new(name.clone()))?;
        main.doc.children.push(self.menu_item(&name, &target));
        if let Err(err) = self.save(&main) {
            self.rollback_create(&key);
            return Err(err);
        }

        info!(zone = %id, %name, "Added zone");
        Ok(id)
    }

    /// Retitle a zone. The id, and so every URL, stays the same.
    pub fn rename_zone(&self, zone: &ZoneId, new_name: &str) -> Result<()> {
        let name = validate_display_name(new_name)?;
        let key = RecordKey::Zone(zone.clone());

        let _locks = self.locks.lock_all([key.clone(), RecordKey::MainMenu])?;
        let mut menu = self.load::<MenuItem>(&key)?;
        let mut main = self.load::<MenuItem>(&RecordKey::MainMenu)?;
        menu.doc.title = Some(name.clone());
        rename_items(&mut main.doc, &LinkTarget::Zone(zone.clone()), &name);
        self.save(&menu)?;
        self.save(&main)?;

        info!(%zone, %name, "Renamed zone");
        Ok(())
    }

    /// Create a branch and list it in its zone.
    pub fn add_branch(&self, zone: &ZoneId, name: &str) -> Result<BranchId> {
        let name = validate_display_name(name)?;
        let id = BranchId::from_name(&name)?;
        let key = RecordKey::Branch(zone.clone(), id.clone());
        let zone_key = RecordKey::Zone(zone.clone());
        let target = LinkTarget::Branch {
            zone: zone.clone(),
            branch: id.clone(),
        };

        let _locks = self.locks.lock_all([key.clone(), zone_key.clone()])?;
        let mut parent = self.load::<MenuItem>(&zone_key)?;
        if self.exists(&key)? || lists(&parent.doc, &target) {
            return Err(StoreError::Conflict(format!(
                "branch '{id}' already exists in zone '{zone}'"
            )));
        }

        self.create_record(&key, &Menu::new(name.clone()))?;
        parent.doc.children.push(self.menu_item(&name, &target));
        if let Err(err) = self.save(&parent) {
            self.rollback_create(&key);
            return Err(err);
        }

        info!(%zone, branch = %id, %name, "Added branch");
        Ok(id)
    }

    /// Create a locality under a zone, or under a branch of that zone.
    ///
    /// Locality ids are global: Conflict if the id exists anywhere.
    pub fn add_locality(
        &self,
        zone: &ZoneId,
        branch: Option<&BranchId>,
        name: &str,
    ) -> Result<LocalityId> {
        let name = validate_display_name(name)?;
        let id = LocalityId::from_name(&name)?;
        if id.as_str() == MISSING_LOCALITY_ID {
            return Err(StoreError::Conflict(format!(
                "locality id '{id}' is reserved for the holding locality"
            )));
        }
        let key = RecordKey::Locality(id.clone());
        let parent_key = parent_key(zone, branch);
        let target = LinkTarget::Locality(id.clone());

        let _locks = self.locks.lock_all([key.clone(), parent_key.clone()])?;
        let mut parent = self.load::<MenuItem>(&parent_key)?;
        if self.exists(&key)? {
            return Err(StoreError::Conflict(format!(
                "locality '{id}' already exists"
            )));
        }

        self.create_record(&key, &Directory::new(name.clone()))?;
        parent.doc.children.push(self.menu_item(&name, &target));
        if let Err(err) = self.save(&parent) {
            self.rollback_create(&key);
            return Err(err);
        }

        info!(%zone, branch = ?branch.map(BranchId::as_str), locality = %id, %name, "Added locality");
        Ok(id)
    }

    /// Retitle a locality and every menu item that points at it.
    pub fn rename_locality(&self, locality: &LocalityId, new_name: &str) -> Result<()> {
        let name = validate_display_name(new_name)?;
        let key = RecordKey::Locality(locality.clone());

        for attempt in 1..=MAX_PLAN_ATTEMPTS {
            let draft = self.find_references(&key)?;
            let locks = self
                .locks
                .lock_all(std::iter::once(key.clone()).chain(draft))?;
            // A menu may have started listing the locality before the locks.
            let parents = self.find_references(&key)?;
            if !parents.iter().all(|parent| locks.holds(parent)) {
                drop(locks);
                debug!(attempt, "References changed while locking, scanning again");
                continue;
            }

            let mut record = self.load_directory(locality)?;
            record.doc.title = Some(name.clone());
            self.save(&record)?;

            let target = LinkTarget::Locality(locality.clone());
            for parent_key in &parents {
                let mut parent = self.load::<MenuItem>(parent_key)?;
                rename_items(&mut parent.doc, &target, &name);
                self.save(&parent)?;
            }

            info!(%locality, %name, parents = parents.len(), "Renamed locality");
            return Ok(());
        }
        Err(StoreError::Conflict(format!(
            "menus listing '{locality}' kept changing during the rename; try again"
        )))
    }

    /// Make sure a zone file exists and is listed in the main menu.
    pub fn ensure_zone(&self, zone: &ZoneId, name: &str) -> Result<EnsureOutcome> {
        let key = RecordKey::Zone(zone.clone());
        let target = LinkTarget::Zone(zone.clone());
        let mut outcome = EnsureOutcome::default();

        let _locks = self.locks.lock_all([key.clone(), RecordKey::MainMenu])?;
        if !self.exists(&key)? {
            self.create_record(&key, &Menu::new(name))?;
            outcome.menus_created += 1;
        }
        let mut main = self.load_or_new_main_menu()?;
        if !lists(&main.doc, &target) {
            main.doc.children.push(self.menu_item(name, &target));
            let created = main.is_new();
            self.save(&main)?;
            if created {
                outcome.menus_created += 1;
            } else {
                outcome.menus_updated += 1;
            }
        }
        if outcome != EnsureOutcome::default() {
            info!(%zone, ?outcome, "Ensured zone");
        }
        Ok(outcome)
    }

    /// Make sure a locality file exists and is listed by its parent menu,
    /// which must exist.
    pub fn ensure_locality(
        &self,
        zone: &ZoneId,
        branch: Option<&BranchId>,
        locality: &LocalityId,
        name: &str,
    ) -> Result<EnsureOutcome> {
        let key = RecordKey::Locality(locality.clone());
        let _locks = self.locks.lock_all([key, parent_key(zone, branch)])?;
        self.ensure_locality_locked(zone, branch, locality, name)
    }

    /// [`Self::ensure_locality`] for callers already holding the locality
    /// and parent locks.
    pub(crate) fn ensure_locality_locked(
        &self,
        zone: &ZoneId,
        branch: Option<&BranchId>,
        locality: &LocalityId,
        name: &str,
    ) -> Result<EnsureOutcome> {
        let key = RecordKey::Locality(locality.clone());
        let parent_key = parent_key(zone, branch);
        let target = LinkTarget::Locality(locality.clone());
        let mut outcome = EnsureOutcome::default();

        let mut parent = self.load::<MenuItem>(&parent_key)?;
        if !self.exists(&key)? {
            self.create_record(&key, &Directory::new(name))?;
            outcome.localities_created += 1;
        }
        if !lists(&parent.doc, &target) {
            parent.doc.children.push(self.menu_item(name, &target));
            if let Err(err) = self.save(&parent) {
                if outcome.localities_created > 0 {
                    self.rollback_create(&key);
                }
                return Err(err);
            }
            outcome.menus_updated += 1;
        }
        if outcome != EnsureOutcome::default() {
            info!(%locality, parent = %parent_key, ?outcome, "Ensured locality");
        }
        Ok(outcome)
    }

    /// Lazily create the holding zone and its locality.
    pub fn ensure_missing_locality(&self) -> Result<EnsureOutcome> {
        let name = self.config.missing_zone_name.clone();
        let zone = missing_zone_id();
        let mut outcome = self.ensure_zone(&zone, &name)?;
        outcome += self.ensure_locality(&zone, None, &missing_locality_id(), &name)?;
        Ok(outcome)
    }
}

pub(crate) fn parent_key(zone: &ZoneId, branch: Option<&BranchId>) -> RecordKey {
    match branch {
        Some(branch) => RecordKey::Branch(zone.clone(), branch.clone()),
        None => RecordKey::Zone(zone.clone()),
    }
}
