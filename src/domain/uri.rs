//! `requirements://` resource URIs and their canonical `<scheme>://<reference>` form.

use std::fmt;

use crate::domain::model::{is_reference, EntityKind, EntityLookup};
use crate::errors::ServiceError;
use crate::store::RequirementsRepository;

pub const RESOURCE_URI_PREFIX: &str = "requirements://";

/// Parsed external URI: `requirements://<collection>[/<id-or-reference>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Collection(EntityKind),
    Entity {
        kind: EntityKind,
        lookup: EntityLookup,
    },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self, ServiceError> {
        let rest = uri.strip_prefix(RESOURCE_URI_PREFIX).ok_or_else(|| {
            ServiceError::validation("resource URI must start with requirements://")
        })?;

        let (segment, identifier) = match rest.split_once('/') {
            Some((segment, identifier)) => (segment, Some(identifier)),
            None => (rest, None),
        };

        let kind = EntityKind::from_collection(segment).ok_or_else(|| {
            ServiceError::validation(format!(
                "unknown resource kind '{segment}', expected one of: epics, user-stories, acceptance-criteria, requirements"
            ))
        })?;

        match identifier.filter(|identifier| !identifier.is_empty()) {
            None => Ok(Self::Collection(kind)),
            Some(identifier) => Ok(Self::Entity {
                kind,
                lookup: parse_identifier(identifier)?,
            }),
        }
    }
}

fn parse_identifier(identifier: &str) -> Result<EntityLookup, ServiceError> {
    // no trimming: whitespace inside a URI is not an identifier
    if identifier.trim() != identifier {
        return Err(invalid_identifier());
    }
    EntityLookup::parse(identifier).ok_or_else(invalid_identifier)
}

fn invalid_identifier() -> ServiceError {
    ServiceError::validation(
        "resource identifier must be a canonical id or a reference such as EP-001",
    )
}

/// Internal address of a single entity, always keyed by its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUri {
    pub kind: EntityKind,
    pub reference: String,
}

impl CanonicalUri {
    pub fn parse(uri: &str) -> Result<Self, ServiceError> {
        let unsupported = || ServiceError::validation(format!("unsupported resource URI: {uri}"));

        let (scheme, reference) = uri.split_once("://").ok_or_else(unsupported)?;
        let kind = EntityKind::from_scheme(scheme).ok_or_else(unsupported)?;
        if !is_reference(reference) || EntityKind::from_reference(reference) != Some(kind) {
            return Err(unsupported());
        }

        Ok(Self {
            kind,
            reference: reference.to_string(),
        })
    }

    pub fn lookup(&self) -> EntityLookup {
        EntityLookup::Reference(self.reference.clone())
    }
}

impl fmt::Display for CanonicalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.scheme(), self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedUri {
    /// Collection URIs pass through unchanged.
    Collection(EntityKind),
    Canonical(CanonicalUri),
}

impl fmt::Display for ResolvedUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(kind) => write!(f, "{RESOURCE_URI_PREFIX}{}", kind.collection()),
            Self::Canonical(canonical) => canonical.fmt(f),
        }
    }
}

/// Translates an external URI into its canonical form. The entity must
/// exist; a failed lookup surfaces the repository error unchanged.
pub async fn resolve(
    repository: &dyn RequirementsRepository,
    uri: &str,
) -> Result<ResolvedUri, ServiceError> {
    match ResourceUri::parse(uri)? {
        ResourceUri::Collection(kind) => Ok(ResolvedUri::Collection(kind)),
        ResourceUri::Entity { kind, lookup } => {
            let entity = repository.get_entity(kind, &lookup).await?;
            Ok(ResolvedUri::Canonical(CanonicalUri {
                kind,
                reference: entity.reference_id().to_string(),
            }))
        }
    }
}
