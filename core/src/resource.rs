//! Local resource bookkeeping.
//!
//! The table records which resources (and their attributes) the endpoint
//! believes are published. It never talks to the backend itself; callers
//! pair table mutations with the matching backend commands. Absence is a
//! `bool`/`Option`, never an error.

use crate::error::AdvertiseError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single addressable attribute of a resource.
///
/// Permission and property flags are carried verbatim; their bit meanings
/// belong to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: Uuid,
    pub permissions: u32,
    pub properties: u32,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn new(id: Uuid, permissions: u32, properties: u32, value: Vec<u8>) -> Self {
        Self {
            id,
            permissions,
            properties,
            value,
        }
    }
}

/// A published resource and its attributes.
///
/// Attributes are attached before the resource is handed to the backend;
/// a resource that is already published cannot grow new attributes. Swaps
/// snapshot the attribute list and rebuild it under the new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub primary: bool,
    pub attributes: Vec<Attribute>,
}

impl Resource {
    pub fn new(id: Uuid, primary: bool) -> Self {
        Self {
            id,
            primary,
            attributes: Vec::new(),
        }
    }

    /// Look up an attribute by id.
    pub fn attribute(&self, id: Uuid) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.id == id)
    }

    pub fn attribute_mut(&mut self, id: Uuid) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.id == id)
    }
}

/// In-memory resource-id → resource mapping, in insertion order.
///
/// Owned exclusively by the controller; readers see it only through the
/// published snapshot.
#[derive(Debug, Default)]
pub struct ResourceTable {
    entries: Vec<Resource>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `resource.id`. Returns the prior
    /// entry when this is an overwrite; the caller is responsible for
    /// retracting it from the backend first.
    pub fn put(&mut self, resource: Resource) -> Option<Resource> {
        match self.entries.iter().position(|r| r.id == resource.id) {
            Some(idx) => {
                let old = std::mem::replace(&mut self.entries[idx], resource);
                Some(old)
            }
            None => {
                self.entries.push(resource);
                None
            }
        }
    }

    /// Remove an entry. Returns `false` when the id is unknown.
    pub fn remove_by_id(&mut self, id: Uuid) -> bool {
        match self.entries.iter().position(|r| r.id == id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, id: Uuid) -> Option<&Resource> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Resource> {
        self.entries.iter_mut().find(|r| r.id == id)
    }

    /// First entry in insertion order, if any. The swap sequence snapshots
    /// this resource's attributes.
    pub fn first(&self) -> Option<&Resource> {
        self.entries.first()
    }

    pub fn list_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|r| r.id).collect()
    }

    pub fn descriptors(&self) -> &[Resource] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a caller-supplied resource/attribute identifier.
///
/// The nil UUID is rejected along with malformed strings; the platform
/// treats it as the "failed to parse" sentinel.
pub fn parse_id(raw: &str) -> Result<Uuid, AdvertiseError> {
    let id = Uuid::parse_str(raw).map_err(|_| AdvertiseError::InvalidId(raw.to_string()))?;
    if id.is_nil() {
        return Err(AdvertiseError::InvalidId(raw.to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(id: Uuid) -> Resource {
        Resource::new(id, true)
    }

    #[test]
    fn test_put_and_get() {
        let mut table = ResourceTable::new();
        let id = Uuid::new_v4();

        assert!(table.put(res(id)).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(id).expect("present").id, id);
    }

    #[test]
    fn test_put_overwrites_colliding_id() {
        let mut table = ResourceTable::new();
        let id = Uuid::new_v4();

        let mut first = res(id);
        first.attributes.push(Attribute::new(Uuid::new_v4(), 1, 1, vec![1]));
        table.put(first);

        let replaced = table.put(res(id)).expect("old entry returned");
        assert_eq!(replaced.attributes.len(), 1);

        // Never two entries under one id.
        assert_eq!(table.len(), 1);
        assert!(table.get(id).expect("present").attributes.is_empty());
    }

    #[test]
    fn test_remove_by_id_reports_absence() {
        let mut table = ResourceTable::new();
        let id = Uuid::new_v4();

        assert!(!table.remove_by_id(id));
        table.put(res(id));
        assert!(table.remove_by_id(id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_list_ids_keeps_insertion_order() {
        let mut table = ResourceTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.put(res(a));
        table.put(res(b));

        assert_eq!(table.list_ids(), vec![a, b]);
        assert_eq!(table.first().expect("first").id, a);
    }

    #[test]
    fn test_clear() {
        let mut table = ResourceTable::new();
        table.put(res(Uuid::new_v4()));
        table.put(res(Uuid::new_v4()));
        table.clear();
        assert!(table.is_empty());
        assert!(table.first().is_none());
    }

    #[test]
    fn test_attribute_lookup() {
        let attr_id = Uuid::new_v4();
        let mut resource = res(Uuid::new_v4());
        resource
            .attributes
            .push(Attribute::new(attr_id, 2, 2, b"hi".to_vec()));

        assert_eq!(resource.attribute(attr_id).expect("attr").value, b"hi");
        assert!(resource.attribute(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_parse_id_accepts_well_formed() {
        let id = parse_id("df010000-0000-1000-8000-00805f9b34fb").expect("valid");
        assert!(!id.is_nil());
    }

    #[test]
    fn test_parse_id_rejects_garbage_and_nil() {
        assert!(matches!(
            parse_id("not-a-uuid"),
            Err(AdvertiseError::InvalidId(_))
        ));
        assert!(matches!(
            parse_id("00000000-0000-0000-0000-000000000000"),
            Err(AdvertiseError::InvalidId(_))
        ));
    }
}
