//! Keyed resource store.
//!
//! Insertion order is preserved so payload rebuilds are stable: a rebuild
//! re-walks the resources in the order they were added and each one records
//! the meta slice it owns. Deletion never cascades; the safe-to-delete
//! report lists blockers without mutating anything.

use std::collections::HashMap;

use crate::kernel::payload::Primitives;
use crate::model::build_item::BuildItem;
use crate::resources::key::ResourceKey;
use crate::resources::{Resource, ResourceError, ResourceKind};

/// Blockers preventing a resource deletion.
#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    pub blockers: Vec<String>,
}

impl DeletionReport {
    pub fn is_safe(&self) -> bool {
        self.blockers.is_empty()
    }
}

#[derive(Default)]
pub struct ResourceManager {
    order: Vec<ResourceKey>,
    resources: HashMap<ResourceKey, Resource>,
    name_counter: u32,
    payload_dirty: bool,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource if the key is new; an existing key keeps its
    /// resource untouched.
    pub fn add_resource(&mut self, key: ResourceKey, kind: ResourceKind) -> bool {
        if self.resources.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.resources.insert(key.clone(), Resource::new(key, kind));
        self.payload_dirty = true;
        true
    }

    pub fn has_resource(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    pub fn get_resource(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn get_resource_mut(&mut self, key: &ResourceKey) -> Option<&mut Resource> {
        self.resources.get_mut(key)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Resources in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.order.iter().filter_map(|key| self.resources.get(key))
    }

    /// Load every in-use resource that has not been loaded yet. Returns the
    /// number of resources that did work.
    pub fn load_resources(&mut self) -> Result<usize, ResourceError> {
        let mut loaded = 0;
        for key in &self.order {
            let resource = self
                .resources
                .get_mut(key)
                .expect("order and map are in sync");
            if !resource.is_in_use() {
                continue;
            }
            if resource.load()? {
                loaded += 1;
            }
        }
        if loaded > 0 {
            self.payload_dirty = true;
        }
        Ok(loaded)
    }

    /// Rebuild the global payload from all in-use resources, in insertion
    /// order.
    pub fn write_resources(&mut self, primitives: &mut Primitives) -> Result<(), ResourceError> {
        primitives.clear();
        for key in &self.order {
            let resource = self
                .resources
                .get_mut(key)
                .expect("order and map are in sync");
            if !resource.is_in_use() || !resource.is_loaded() {
                continue;
            }
            resource.write(primitives)?;
        }
        self.payload_dirty = false;
        Ok(())
    }

    pub fn delete_resource(&mut self, key: &ResourceKey) -> Result<(), ResourceError> {
        if self.resources.remove(key).is_none() {
            return Err(ResourceError::ResourceNotFound(key.display_name()));
        }
        self.order.retain(|k| k != key);
        self.payload_dirty = true;
        Ok(())
    }

    /// Drop everything and reset the generated-name counter.
    pub fn clear(&mut self) {
        self.order.clear();
        self.resources.clear();
        self.name_counter = 0;
        self.payload_dirty = true;
    }

    pub fn is_payload_dirty(&self) -> bool {
        self.payload_dirty
    }

    /// Generated display names for unnamed resources.
    pub fn next_resource_name(&mut self, prefix: &str) -> String {
        self.name_counter += 1;
        format!("{prefix}_{}", self.name_counter)
    }

    /// Report what blocks deleting `key`: build items whose components
    /// reference it. Never mutates state.
    pub fn safe_to_delete(&self, key: &ResourceKey, build_items: &[BuildItem]) -> DeletionReport {
        let mut report = DeletionReport::default();
        let Some(id) = key.resource_id() else {
            return report;
        };
        for item in build_items {
            if item.id() == id
                || item
                    .components()
                    .iter()
                    .any(|component| component.object_id == id)
            {
                report.blockers.push(item.name().to_string());
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::types::{BallData, BeamData};
    use crate::model::build_item::{BuildItem, Component};
    use crate::resources::beam_lattice::BeamLatticeResource;
    use glam::{Mat4, Vec3};

    fn lattice_kind() -> ResourceKind {
        let beams = vec![BeamData::new(Vec3::ZERO, Vec3::X, 0.2, 0.2)];
        let balls = vec![BallData::new(Vec3::X, 0.3)];
        ResourceKind::BeamLattice(BeamLatticeResource::new(beams, balls).unwrap())
    }

    #[test]
    fn duplicate_keys_are_not_inserted() {
        let mut manager = ResourceManager::new();
        assert!(manager.add_resource(ResourceKey::from_resource_id(1), lattice_kind()));
        assert!(!manager.add_resource(ResourceKey::from_resource_id(1), lattice_kind()));
        assert_eq!(manager.resource_count(), 1);
    }

    #[test]
    fn load_twice_does_no_additional_work() {
        let mut manager = ResourceManager::new();
        manager.add_resource(ResourceKey::from_resource_id(1), lattice_kind());
        manager.add_resource(ResourceKey::from_resource_id(2), lattice_kind());

        assert_eq!(manager.load_resources().unwrap(), 2);
        assert_eq!(manager.load_resources().unwrap(), 0);
    }

    #[test]
    fn write_resources_records_owned_meta_slices() {
        let mut manager = ResourceManager::new();
        let key1 = ResourceKey::from_resource_id(1);
        let key2 = ResourceKey::from_resource_id(2);
        manager.add_resource(key1.clone(), lattice_kind());
        manager.add_resource(key2.clone(), lattice_kind());
        manager.load_resources().unwrap();

        let mut primitives = Primitives::new();
        manager.write_resources(&mut primitives).unwrap();
        assert!(!manager.is_payload_dirty());

        let (s1, e1) = manager.get_resource(&key1).unwrap().meta_range();
        let (s2, e2) = manager.get_resource(&key2).unwrap().meta_range();
        assert_eq!(s1, 0);
        assert!(e1 > s1);
        assert_eq!(s2, e1);
        assert_eq!(e2, primitives.meta_count());
    }

    #[test]
    fn out_of_use_resources_are_skipped_but_keep_their_payload() {
        let mut manager = ResourceManager::new();
        let key = ResourceKey::from_resource_id(1);
        manager.add_resource(key.clone(), lattice_kind());
        manager.load_resources().unwrap();

        manager.get_resource_mut(&key).unwrap().set_in_use(false);
        let mut primitives = Primitives::new();
        manager.write_resources(&mut primitives).unwrap();
        assert_eq!(primitives.meta_count(), 0);

        // Re-enabling writes without reloading.
        manager.get_resource_mut(&key).unwrap().set_in_use(true);
        assert_eq!(manager.load_resources().unwrap(), 0);
        manager.write_resources(&mut primitives).unwrap();
        assert!(primitives.meta_count() > 0);
    }

    #[test]
    fn delete_unknown_key_reports_not_found() {
        let mut manager = ResourceManager::new();
        let err = manager
            .delete_resource(&ResourceKey::from_resource_id(9))
            .unwrap_err();
        assert!(matches!(err, ResourceError::ResourceNotFound(_)));
    }

    #[test]
    fn safe_to_delete_lists_referencing_build_items() {
        let mut manager = ResourceManager::new();
        let key = ResourceKey::from_resource_id(5);
        manager.add_resource(key.clone(), lattice_kind());

        let mut item = BuildItem::new(1, Mat4::IDENTITY, "PN-1");
        item.add_component(Component {
            object_id: 5,
            transform: Mat4::IDENTITY,
        });
        let items = vec![item, BuildItem::new(2, Mat4::IDENTITY, "PN-2")];

        let report = manager.safe_to_delete(&key, &items);
        assert!(!report.is_safe());
        assert_eq!(report.blockers.len(), 1);
        // No mutation happened.
        assert!(manager.has_resource(&key));

        let unreferenced = manager.safe_to_delete(&ResourceKey::from_resource_id(99), &items);
        assert!(unreferenced.is_safe());
    }

    #[test]
    fn generated_names_count_up_and_reset_on_clear() {
        let mut manager = ResourceManager::new();
        assert_eq!(manager.next_resource_name("stack"), "stack_1");
        assert_eq!(manager.next_resource_name("stack"), "stack_2");
        manager.clear();
        assert_eq!(manager.next_resource_name("stack"), "stack_1");
    }
}
