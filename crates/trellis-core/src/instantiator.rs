//! # Entity Instantiator
//!
//! Creates the instance for a store element and binds it. One interface for
//! both element kinds; the kind is a parameter.

use crate::entity::EntityRef;
use crate::infrastructure::MappingInfrastructure;
use crate::mapping::MappedType;
use crate::{ElementKind, ElementRef, MappingError};
use std::sync::Arc;
use tracing::{trace, warn};

/// A freshly created, bound instance and the type it was created as.
pub struct Instantiated {
    pub entity: EntityRef,
    pub mapped: Arc<MappedType>,
}

pub struct EntityInstantiator<'a> {
    infra: &'a MappingInfrastructure,
    kind: ElementKind,
}

impl<'a> EntityInstantiator<'a> {
    pub fn new(infra: &'a MappingInfrastructure, kind: ElementKind) -> Self {
        Self { infra, kind }
    }

    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        self.kind
    }

    /// The type to instantiate: the recorded type when it is `requested` or
    /// one of its subtypes, `requested` otherwise.
    fn concrete_type(
        &self,
        element: ElementRef,
        requested: &Arc<MappedType>,
    ) -> Result<Arc<MappedType>, MappingError> {
        let Some(recorded) = self.infra.type_representation().read_type(element)? else {
            return Ok(Arc::clone(requested));
        };
        if recorded == requested.name {
            return Ok(Arc::clone(requested));
        }
        match self.infra.mapping_context().descriptor(&recorded) {
            Ok(mapped) if mapped.is_a(&requested.name) => Ok(mapped),
            Ok(_) => Ok(Arc::clone(requested)),
            Err(e) => {
                warn!(%element, recorded = %recorded, error = %e, "recorded type unusable, using requested type");
                Ok(Arc::clone(requested))
            }
        }
    }

    /// Create and bind an instance for `element`.
    pub fn create(
        &self,
        element: ElementRef,
        requested: &Arc<MappedType>,
    ) -> Result<Instantiated, MappingError> {
        if element.kind() != self.kind || requested.kind != self.kind {
            return Err(MappingError::KindMismatch {
                expected: requested.kind,
                actual: element,
            });
        }
        if !self.infra.db().contains(element)? {
            return Err(MappingError::ElementRemoved(element));
        }

        let mapped = self.concrete_type(element, requested)?;
        let entity = mapped.new_instance();
        {
            let mut instance = entity.borrow_mut();
            if instance.type_name() != mapped.name {
                return Err(MappingError::TypeMismatch {
                    expected: mapped.name.clone(),
                    actual: instance.type_name().to_string(),
                });
            }
            instance.set_persistent_state(Some(element));
        }
        trace!(%element, type_name = %mapped.name, "instantiated");
        Ok(Instantiated { entity, mapped })
    }
}
