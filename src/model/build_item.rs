//! Placement instances: a build item positions an object (and its
//! component subtree) on the build plate.

use glam::Mat4;

use crate::resources::key::ResourceId;

#[derive(Debug, Clone)]
pub struct Component {
    pub object_id: ResourceId,
    pub transform: Mat4,
}

#[derive(Debug, Clone)]
pub struct BuildItem {
    id: ResourceId,
    transform: Mat4,
    part_number: String,
    name: String,
    components: Vec<Component>,
}

pub type BuildItems = Vec<BuildItem>;

impl BuildItem {
    pub fn new(id: ResourceId, transform: Mat4, part_number: impl Into<String>) -> Self {
        Self {
            id,
            transform,
            part_number: part_number.into(),
            name: format!("BuildItem_{id}"),
            components: Vec::new(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    pub fn part_number(&self) -> &str {
        &self.part_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_component(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_derives_from_id() {
        let item = BuildItem::new(42, Mat4::IDENTITY, "PN-7");
        assert_eq!(item.name(), "BuildItem_42");
        assert_eq!(item.part_number(), "PN-7");
    }

    #[test]
    fn components_accumulate() {
        let mut item = BuildItem::new(1, Mat4::IDENTITY, "");
        item.add_component(Component {
            object_id: 2,
            transform: Mat4::from_translation(glam::Vec3::X),
        });
        item.add_component(Component {
            object_id: 3,
            transform: Mat4::IDENTITY,
        });
        assert_eq!(item.components().len(), 2);
        assert_eq!(item.components()[0].object_id, 2);
    }
}
