//! Resource identity.
//!
//! Resources are addressed by value keys instead of pointers: an optional
//! file path, an optional numeric id from the scene container, and an
//! optional hash of generated text. The display name is presentation only
//! and excluded from identity.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

pub type ResourceId = u32;

#[derive(Debug, Clone, Default)]
pub struct ResourceKey {
    filename: Option<PathBuf>,
    resource_id: Option<ResourceId>,
    text_hash: Option<u64>,
    display_name: Option<String>,
}

impl ResourceKey {
    pub fn from_filename(filename: impl AsRef<Path>) -> Self {
        Self {
            filename: Some(filename.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn from_resource_id(resource_id: ResourceId) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Self::default()
        }
    }

    pub fn from_text(text: &str) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            text_hash: Some(hasher.finish()),
            ..Self::default()
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.resource_id
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = Some(name.into());
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            if !name.is_empty() {
                return name.clone();
            }
        }
        if let Some(filename) = &self.filename {
            return filename.display().to_string();
        }
        if let Some(id) = self.resource_id {
            return format!("resource {id}");
        }
        if let Some(hash) = self.text_hash {
            return format!("text #{hash:x}");
        }
        String::new()
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.resource_id == other.resource_id
            && self.text_hash == other.text_hash
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filename.hash(state);
        self.resource_id.hash(state);
        self.text_hash.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_does_not_affect_identity() {
        let mut a = ResourceKey::from_resource_id(7);
        let b = ResourceKey::from_resource_id(7);
        a.set_display_name("lattice");
        assert_eq!(a, b);
    }

    #[test]
    fn different_sources_are_different_keys() {
        assert_ne!(
            ResourceKey::from_filename("a.stl"),
            ResourceKey::from_filename("b.stl")
        );
        assert_ne!(
            ResourceKey::from_resource_id(1),
            ResourceKey::from_resource_id(2)
        );
        assert_ne!(ResourceKey::from_text("x"), ResourceKey::from_text("y"));
        assert_eq!(ResourceKey::from_text("x"), ResourceKey::from_text("x"));
    }

    #[test]
    fn display_name_fallbacks() {
        assert_eq!(ResourceKey::from_resource_id(3).display_name(), "resource 3");
        assert_eq!(
            ResourceKey::from_filename("part.stl").display_name(),
            "part.stl"
        );
        let mut named = ResourceKey::from_resource_id(3);
        named.set_display_name("bracket");
        assert_eq!(named.display_name(), "bracket");
    }
}
