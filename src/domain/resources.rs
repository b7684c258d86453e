//! Planning artifacts exposed as MCP resources.
//!
//! External URIs use `requirements://<collection>[/<id-or-reference>]`; reads
//! answer with the canonical `<scheme>://<reference>` form.

use rust_mcp_sdk::schema::{ReadResourceContent, ReadResourceResult, Resource, TextResourceContents};
use serde::Serialize;

use crate::domain::model::{Entity, EntityKind, Pagination, MAX_PAGE_LIMIT};
use crate::domain::uri::{resolve, CanonicalUri, ResolvedUri, RESOURCE_URI_PREFIX};
use crate::errors::ServiceError;
use crate::store::RequirementsRepository;

const JSON_MIME_TYPE: &str = "application/json";

fn collection_uri(kind: EntityKind) -> String {
    format!("{RESOURCE_URI_PREFIX}{}", kind.collection())
}

fn collection_resource(kind: EntityKind) -> Resource {
    Resource {
        annotations: None,
        description: Some(format!("All {} records", kind.display_name().to_lowercase())),
        icons: vec![],
        meta: None,
        mime_type: Some(JSON_MIME_TYPE.to_string()),
        name: kind.collection().to_string(),
        size: None,
        title: None,
        uri: collection_uri(kind),
    }
}

fn entity_resource(entity: &Entity) -> Resource {
    Resource {
        annotations: None,
        description: Some(format!(
            "{} {}",
            entity.kind().display_name(),
            entity.reference_id()
        )),
        icons: vec![],
        meta: None,
        mime_type: Some(JSON_MIME_TYPE.to_string()),
        name: entity.reference_id().to_string(),
        size: None,
        title: Some(entity.title().to_string()),
        uri: format!("{}/{}", collection_uri(entity.kind()), entity.reference_id()),
    }
}

/// One descriptor per collection followed by one per entity.
pub async fn build_resources_list(
    repository: &dyn RequirementsRepository,
) -> Result<Vec<Resource>, ServiceError> {
    let mut resources = EntityKind::RESOURCE_KINDS
        .into_iter()
        .map(collection_resource)
        .collect::<Vec<_>>();

    for kind in EntityKind::RESOURCE_KINDS {
        let mut offset = 0;
        loop {
            let page = repository
                .list_entities(kind, Pagination::new(Some(MAX_PAGE_LIMIT), Some(offset))?)
                .await?;
            resources.extend(page.data.iter().map(entity_resource));

            offset += MAX_PAGE_LIMIT;
            if page.data.is_empty() || offset as usize >= page.total_count {
                break;
            }
        }
    }

    Ok(resources)
}

fn text_contents<T: Serialize>(uri: String, payload: &T) -> ReadResourceResult {
    ReadResourceResult {
        contents: vec![ReadResourceContent::from(TextResourceContents {
            meta: None,
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            text: serde_json::to_string(payload).expect("resource payload serialization"),
            uri,
        })],
        meta: None,
    }
}

pub async fn handle_resources_read(
    repository: &dyn RequirementsRepository,
    uri: &str,
) -> Result<ReadResourceResult, ServiceError> {
    let resolved = if uri.starts_with(RESOURCE_URI_PREFIX) {
        resolve(repository, uri).await?
    } else {
        ResolvedUri::Canonical(CanonicalUri::parse(uri)?)
    };

    match resolved {
        ResolvedUri::Collection(kind) => {
            let page = repository.list_entities(kind, Pagination::default()).await?;
            Ok(text_contents(collection_uri(kind), &page))
        }
        ResolvedUri::Canonical(canonical) => {
            let entity = repository
                .get_entity(canonical.kind, &canonical.lookup())
                .await?;
            Ok(text_contents(canonical.to_string(), &entity))
        }
    }
}
