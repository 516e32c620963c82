use crate::entity::EntityRef;
use crate::infrastructure::MappingInfrastructure;
use crate::persister::MappingPolicy;
use crate::{ElementRef, MappingError, NodeId, Path, RelationshipId};

/// A raw path whose segments are converted to entities on access.
///
/// Each element is projected as its recorded type when asked for; nothing
/// is loaded when the path is created.
pub struct EntityPath<'a> {
    infra: &'a MappingInfrastructure,
    path: Path,
    policy: MappingPolicy,
}

impl<'a> EntityPath<'a> {
    pub(crate) fn new(infra: &'a MappingInfrastructure, path: Path, policy: MappingPolicy) -> Self {
        Self {
            infra,
            path,
            policy,
        }
    }

    /// The underlying raw path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.path.length()
    }

    fn project(&self, element: ElementRef) -> Result<EntityRef, MappingError> {
        self.infra.persister().project(element, &self.policy)
    }

    pub fn start_entity(&self) -> Result<Option<EntityRef>, MappingError> {
        self.path
            .start_node()
            .map(|n| self.project(ElementRef::Node(n)))
            .transpose()
    }

    pub fn end_entity(&self) -> Result<Option<EntityRef>, MappingError> {
        self.path
            .end_node()
            .map(|n| self.project(ElementRef::Node(n)))
            .transpose()
    }

    pub fn last_relationship_entity(&self) -> Result<Option<EntityRef>, MappingError> {
        self.path
            .last_relationship()
            .map(|r| self.project(ElementRef::Relationship(r)))
            .transpose()
    }

    /// Node entities in path order, projected as iterated.
    pub fn node_entities(&self) -> impl Iterator<Item = Result<EntityRef, MappingError>> + '_ {
        self.path
            .nodes
            .iter()
            .map(|n: &NodeId| self.project(ElementRef::Node(*n)))
    }

    /// Relationship entities in path order, projected as iterated.
    pub fn relationship_entities(
        &self,
    ) -> impl Iterator<Item = Result<EntityRef, MappingError>> + '_ {
        self.path
            .relationships
            .iter()
            .map(|r: &RelationshipId| self.project(ElementRef::Relationship(*r)))
    }
}
