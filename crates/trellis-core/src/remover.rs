//! # Entity Remover
//!
//! Deletes store elements together with their bookkeeping.
//!
//! Order per element: index entries, then the type record, then the element
//! itself. A node's attached relationships go first, each through the same
//! sequence. A failure before deletion leaves the element in place with
//! partially cleaned bookkeeping; a failure after it is returned as-is.

use crate::entity::EntityRef;
use crate::index::IndexProvider;
use crate::infrastructure::MappingInfrastructure;
use crate::{Direction, ElementRef, MappingError};
use tracing::debug;

pub struct EntityRemover<'a> {
    infra: &'a MappingInfrastructure,
}

impl<'a> EntityRemover<'a> {
    pub fn new(infra: &'a MappingInfrastructure) -> Self {
        Self { infra }
    }

    /// Remove `element`. Removing an already removed element is a state error.
    pub fn remove(&self, element: ElementRef) -> Result<(), MappingError> {
        let db = self.infra.db();
        if !db.in_transaction() {
            return Err(MappingError::NoTransaction("remove"));
        }
        if !db.contains(element)? {
            return Err(MappingError::ElementRemoved(element));
        }

        if let ElementRef::Node(node) = element {
            for rel in db.relationships(node, None, Direction::Both)? {
                self.remove_one(ElementRef::Relationship(rel.id))?;
            }
        }
        self.remove_one(element)
    }

    /// Remove the element bound to `entity` and unbind the instance.
    pub fn remove_entity(&self, entity: &EntityRef) -> Result<(), MappingError> {
        let (type_name, element) = {
            let e = entity.borrow();
            (e.type_name().to_string(), e.persistent_state())
        };
        let element = element.ok_or(MappingError::Unbound(type_name))?;
        self.remove(element)?;
        entity.borrow_mut().set_persistent_state(None);
        Ok(())
    }

    fn remove_one(&self, element: ElementRef) -> Result<(), MappingError> {
        let db = self.infra.db();
        let entries = IndexProvider::new(db).remove_all(element)?;
        self.infra.type_representation().clear_type(element)?;
        match element {
            ElementRef::Node(node) => db.delete_node(node)?,
            ElementRef::Relationship(rel) => db.delete_relationship(rel)?,
        }
        debug!(%element, index_entries = entries, "removed");
        Ok(())
    }
}
