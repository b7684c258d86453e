//! Tools exposed through `tools/list` and `tools/call`.
//!
//! Descriptors come from the `mcp_tool` structs below; arguments are coerced
//! explicitly from the raw argument map so every tool shares the same error
//! wording.

use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::model::{
    EntityKind, EntityLookup, Pagination, Priority, RelationshipType, RequirementType,
};
use crate::domain::utils::{
    optional_count, optional_integer, optional_string, optional_string_list, required_integer,
    required_string, required_string_allow_empty, Arguments,
};
use crate::errors::{McpError, ServiceError};
use crate::mcp::context::RequestContext;
use crate::store::{
    AssigneeChange, EntityChanges, NewAcceptanceCriteria, NewEpic, NewRelationship,
    NewRequirement, NewSteeringDocument, NewUserStory, SearchQuery, Services,
    SteeringDocumentChanges, SteeringDocumentFilter,
};

#[macros::mcp_tool(
    name = "create_epic",
    description = "Create a new epic. Priority is 1 (critical) to 4 (low)."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateEpicTool {
    pub title: String,
    pub priority: i64,
    pub description: Option<String>,
    /// User id or username.
    pub assignee_id: Option<String>,
}

#[macros::mcp_tool(
    name = "update_epic",
    description = "Update an epic by id or reference (EP-001). An empty assignee_id unassigns."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateEpicTool {
    pub epic_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub status: Option<String>,
    pub assignee_id: Option<String>,
}

#[macros::mcp_tool(
    name = "create_user_story",
    description = "Create a user story inside an epic."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateUserStoryTool {
    pub epic_id: String,
    pub title: String,
    pub priority: i64,
    pub description: Option<String>,
    pub assignee_id: Option<String>,
}

#[macros::mcp_tool(
    name = "update_user_story",
    description = "Update a user story by id or reference (US-001). An empty assignee_id unassigns."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateUserStoryTool {
    pub user_story_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub status: Option<String>,
    pub assignee_id: Option<String>,
}

#[macros::mcp_tool(
    name = "create_acceptance_criteria",
    description = "Add an acceptance criterion to a user story."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateAcceptanceCriteriaTool {
    pub user_story_id: String,
    pub description: String,
}

#[macros::mcp_tool(
    name = "create_requirement",
    description = "Create a requirement under a user story. Type is one of Functional, Non-Functional, Business Rule, Interface, Data."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateRequirementTool {
    pub user_story_id: String,
    pub title: String,
    pub priority: i64,
    #[serde(rename = "type")]
    pub requirement_type: String,
    pub acceptance_criteria_id: Option<String>,
    pub description: Option<String>,
    pub assignee_id: Option<String>,
}

#[macros::mcp_tool(
    name = "update_requirement",
    description = "Update a requirement by id or reference (REQ-001). Status is Draft, Active or Obsolete."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateRequirementTool {
    pub requirement_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub status: Option<String>,
    pub assignee_id: Option<String>,
}

#[macros::mcp_tool(
    name = "create_relationship",
    description = "Link two requirements: depends_on, blocks, relates_to, conflicts_with or derives_from."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateRelationshipTool {
    pub source_requirement_id: String,
    pub target_requirement_id: String,
    pub relationship_type: String,
}

#[macros::mcp_tool(
    name = "search_global",
    description = "Search epics, user stories, acceptance criteria, requirements and steering documents.",
    read_only_hint = true
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchGlobalTool {
    pub query: String,
    /// Restrict to: epic, user_story, acceptance_criteria, requirement, steering_document.
    pub entity_types: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[macros::mcp_tool(
    name = "search_requirements",
    description = "Search requirements by reference, title or description.",
    read_only_hint = true
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchRequirementsTool {
    pub query: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[macros::mcp_tool(
    name = "list_steering_documents",
    description = "List steering documents. Pass an empty query to list all.",
    read_only_hint = true
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListSteeringDocumentsTool {
    pub query: String,
    pub creator_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[macros::mcp_tool(
    name = "create_steering_document",
    description = "Create a steering document."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateSteeringDocumentTool {
    pub title: String,
    pub description: Option<String>,
}

#[macros::mcp_tool(
    name = "get_steering_document",
    description = "Fetch a steering document by id or reference (STD-001).",
    read_only_hint = true
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetSteeringDocumentTool {
    pub steering_document_id: String,
}

#[macros::mcp_tool(
    name = "update_steering_document",
    description = "Update a steering document. Only its creator or an administrator may do so."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UpdateSteeringDocumentTool {
    pub steering_document_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[macros::mcp_tool(
    name = "link_steering_document_to_epic",
    description = "Attach a steering document to an epic."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct LinkSteeringDocumentToEpicTool {
    pub steering_document_id: String,
    pub epic_id: String,
}

#[macros::mcp_tool(
    name = "unlink_steering_document_from_epic",
    description = "Detach a steering document from an epic."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct UnlinkSteeringDocumentFromEpicTool {
    pub steering_document_id: String,
    pub epic_id: String,
}

#[macros::mcp_tool(
    name = "get_epic_steering_documents",
    description = "List the steering documents linked to an epic.",
    read_only_hint = true
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetEpicSteeringDocumentsTool {
    pub epic_id: String,
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![
        CreateEpicTool::tool(),
        UpdateEpicTool::tool(),
        CreateUserStoryTool::tool(),
        UpdateUserStoryTool::tool(),
        CreateAcceptanceCriteriaTool::tool(),
        CreateRequirementTool::tool(),
        UpdateRequirementTool::tool(),
        CreateRelationshipTool::tool(),
        SearchGlobalTool::tool(),
        SearchRequirementsTool::tool(),
        ListSteeringDocumentsTool::tool(),
        CreateSteeringDocumentTool::tool(),
        GetSteeringDocumentTool::tool(),
        UpdateSteeringDocumentTool::tool(),
        LinkSteeringDocumentToEpicTool::tool(),
        UnlinkSteeringDocumentFromEpicTool::tool(),
        GetEpicSteeringDocumentsTool::tool(),
    ]
}

pub async fn handle_tools_call(
    services: &Services,
    ctx: &RequestContext,
    name: &str,
    args: Arguments,
) -> Result<CallToolResult, McpError> {
    match name {
        "create_epic" => create_epic(services, ctx, &args).await,
        "update_epic" => update_entity(services, ctx, &args, EntityKind::Epic, "epic_id").await,
        "create_user_story" => create_user_story(services, ctx, &args).await,
        "update_user_story" => {
            update_entity(services, ctx, &args, EntityKind::UserStory, "user_story_id").await
        }
        "create_acceptance_criteria" => create_acceptance_criteria(services, ctx, &args).await,
        "create_requirement" => create_requirement(services, ctx, &args).await,
        "update_requirement" => {
            update_entity(services, ctx, &args, EntityKind::Requirement, "requirement_id").await
        }
        "create_relationship" => create_relationship(services, ctx, &args).await,
        "search_global" => search_global(services, &args).await,
        "search_requirements" => search_requirements(services, &args).await,
        "list_steering_documents" => list_steering_documents(services, &args).await,
        "create_steering_document" => create_steering_document(services, ctx, &args).await,
        "get_steering_document" => get_steering_document(services, &args).await,
        "update_steering_document" => update_steering_document(services, ctx, &args).await,
        "link_steering_document_to_epic" => {
            link_steering_document(services, ctx, &args, true).await
        }
        "unlink_steering_document_from_epic" => {
            link_steering_document(services, ctx, &args, false).await
        }
        "get_epic_steering_documents" => get_epic_steering_documents(services, &args).await,
        _ => Err(McpError::MethodNotFound(format!("Unknown tool: {name}"))),
    }
}

fn text_block(text: String) -> ContentBlock {
    ContentBlock::from(TextContent::new(text, None, None))
}

/// Success shape shared by every tool: a summary line and the serialized payload.
fn tool_result<T: Serialize>(summary: String, payload: &T) -> CallToolResult {
    let serialized =
        serde_json::to_string_pretty(payload).expect("tool result payload serialization");
    CallToolResult {
        content: vec![text_block(summary), text_block(serialized)],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

fn parse_lookup(raw: &str, field: &str) -> Result<EntityLookup, McpError> {
    EntityLookup::parse(raw).ok_or_else(|| {
        McpError::invalid_params(format!(
            "'{field}' must be a canonical id or a reference such as EP-001"
        ))
    })
}

/// Resolves an id-or-reference argument to the entity's canonical id.
async fn resolve_entity_id(
    services: &Services,
    args: &Arguments,
    field: &str,
    kind: EntityKind,
) -> Result<Uuid, McpError> {
    let lookup = parse_lookup(&required_string(args, field)?, field)?;
    let entity = services.requirements.get_entity(kind, &lookup).await?;
    Ok(entity.id())
}

async fn resolve_steering_document_id(
    services: &Services,
    args: &Arguments,
) -> Result<Uuid, McpError> {
    let field = "steering_document_id";
    let lookup = parse_lookup(&required_string(args, field)?, field)?;
    let document = services.steering_documents.get_steering_document(&lookup).await?;
    Ok(document.id)
}

async fn assignee_change(services: &Services, args: &Arguments) -> Result<AssigneeChange, McpError> {
    match optional_string(args, "assignee_id")? {
        None => Ok(AssigneeChange::Keep),
        Some(raw) if raw.trim().is_empty() => Ok(AssigneeChange::Unassign),
        Some(raw) => {
            let user = services.users.find_user(&raw).await?;
            Ok(AssigneeChange::Assign(user.id))
        }
    }
}

async fn initial_assignee(services: &Services, args: &Arguments) -> Result<Option<Uuid>, McpError> {
    match assignee_change(services, args).await? {
        AssigneeChange::Assign(user_id) => Ok(Some(user_id)),
        AssigneeChange::Keep | AssigneeChange::Unassign => Ok(None),
    }
}

fn priority(args: &Arguments) -> Result<Priority, McpError> {
    Ok(Priority::new(required_integer(args, "priority")?)?)
}

fn pagination(args: &Arguments) -> Result<Pagination, McpError> {
    Ok(Pagination::new(
        optional_count(args, "limit")?,
        optional_count(args, "offset")?,
    )?)
}

async fn create_epic(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let creator = ctx.require_editor()?;
    let input = NewEpic {
        title: required_string(args, "title")?,
        description: optional_string(args, "description")?,
        priority: priority(args)?,
        creator_id: creator.id,
        assignee_id: initial_assignee(services, args).await?,
    };

    let epic = services.requirements.create_epic(input).await?;
    Ok(tool_result(
        format!("Created epic {}: {}", epic.reference_id, epic.title),
        &epic,
    ))
}

async fn create_user_story(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let creator = ctx.require_editor()?;
    let input = NewUserStory {
        epic_id: resolve_entity_id(services, args, "epic_id", EntityKind::Epic).await?,
        title: required_string(args, "title")?,
        description: optional_string(args, "description")?,
        priority: priority(args)?,
        creator_id: creator.id,
        assignee_id: initial_assignee(services, args).await?,
    };

    let story = services.requirements.create_user_story(input).await?;
    Ok(tool_result(
        format!("Created user story {}: {}", story.reference_id, story.title),
        &story,
    ))
}

async fn create_acceptance_criteria(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let author = ctx.require_editor()?;
    let input = NewAcceptanceCriteria {
        user_story_id: resolve_entity_id(services, args, "user_story_id", EntityKind::UserStory)
            .await?,
        description: required_string(args, "description")?,
        author_id: author.id,
    };

    let criteria = services.requirements.create_acceptance_criteria(input).await?;
    Ok(tool_result(
        format!("Created acceptance criteria {}", criteria.reference_id),
        &criteria,
    ))
}

async fn create_requirement(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let creator = ctx.require_editor()?;
    let acceptance_criteria_id = match optional_string(args, "acceptance_criteria_id")? {
        Some(raw) if !raw.trim().is_empty() => Some(
            resolve_entity_id(
                services,
                args,
                "acceptance_criteria_id",
                EntityKind::AcceptanceCriteria,
            )
            .await?,
        ),
        _ => None,
    };

    let input = NewRequirement {
        user_story_id: resolve_entity_id(services, args, "user_story_id", EntityKind::UserStory)
            .await?,
        acceptance_criteria_id,
        title: required_string(args, "title")?,
        description: optional_string(args, "description")?,
        priority: priority(args)?,
        requirement_type: RequirementType::parse(&required_string(args, "type")?)?,
        creator_id: creator.id,
        assignee_id: initial_assignee(services, args).await?,
    };

    let requirement = services.requirements.create_requirement(input).await?;
    Ok(tool_result(
        format!(
            "Created requirement {}: {}",
            requirement.reference_id, requirement.title
        ),
        &requirement,
    ))
}

/// Shared by every `update_*` tool; the kind selects the id field and status set.
async fn update_entity(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
    kind: EntityKind,
    id_field: &str,
) -> Result<CallToolResult, McpError> {
    ctx.require_editor()?;
    let id = resolve_entity_id(services, args, id_field, kind).await?;
    let changes = EntityChanges {
        title: optional_string(args, "title")?,
        description: optional_string(args, "description")?,
        priority: optional_integer(args, "priority")?
            .map(Priority::new)
            .transpose()?,
        status: optional_string(args, "status")?,
        assignee: assignee_change(services, args).await?,
    };

    let entity = services.requirements.update_entity(kind, id, changes).await?;
    Ok(tool_result(
        format!(
            "Updated {} {}",
            kind.display_name().to_lowercase(),
            entity.reference_id()
        ),
        &entity,
    ))
}

async fn create_relationship(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let creator = ctx.require_editor()?;
    let input = NewRelationship {
        source_requirement_id: resolve_entity_id(
            services,
            args,
            "source_requirement_id",
            EntityKind::Requirement,
        )
        .await?,
        target_requirement_id: resolve_entity_id(
            services,
            args,
            "target_requirement_id",
            EntityKind::Requirement,
        )
        .await?,
        relationship_type: RelationshipType::parse(&required_string(args, "relationship_type")?)?,
        created_by: creator.id,
    };

    let relationship = services.requirements.create_relationship(input).await?;
    Ok(tool_result(
        format!("Created {:?} relationship", relationship.relationship_type),
        &relationship,
    ))
}

fn parse_search_kind(raw: &str) -> Result<EntityKind, ServiceError> {
    let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
    [
        EntityKind::Epic,
        EntityKind::UserStory,
        EntityKind::AcceptanceCriteria,
        EntityKind::Requirement,
        EntityKind::SteeringDocument,
    ]
    .into_iter()
    .find(|kind| {
        kind.scheme() == normalized || kind.collection().replace('-', "_") == normalized
    })
    .ok_or_else(|| ServiceError::validation(format!("unknown entity type: {raw}")))
}

async fn search_global(services: &Services, args: &Arguments) -> Result<CallToolResult, McpError> {
    let kinds = optional_string_list(args, "entity_types")?
        .iter()
        .map(|raw| parse_search_kind(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let query = SearchQuery {
        query: required_string(args, "query")?,
        kinds,
        pagination: pagination(args)?,
    };

    let page = services.requirements.search(&query).await?;
    Ok(tool_result(
        format!(
            "Found {} results for '{}'",
            page.total_count, query.query
        ),
        &page,
    ))
}

async fn search_requirements(
    services: &Services,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let query = SearchQuery {
        query: required_string(args, "query")?,
        kinds: vec![EntityKind::Requirement],
        pagination: pagination(args)?,
    };

    let page = services.requirements.search(&query).await?;
    Ok(tool_result(
        format!(
            "Found {} requirements for '{}'",
            page.total_count, query.query
        ),
        &page,
    ))
}

async fn list_steering_documents(
    services: &Services,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let creator_id = match optional_string(args, "creator_id")? {
        Some(raw) if !raw.trim().is_empty() => Some(services.users.find_user(&raw).await?.id),
        _ => None,
    };
    let filter = SteeringDocumentFilter {
        query: required_string_allow_empty(args, "query")?,
        creator_id,
        pagination: pagination(args)?,
    };

    let page = services
        .steering_documents
        .list_steering_documents(&filter)
        .await?;
    Ok(tool_result(
        format!("Found {} steering documents", page.total_count),
        &page,
    ))
}

async fn create_steering_document(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let creator = ctx.require_editor()?;
    let input = NewSteeringDocument {
        title: required_string(args, "title")?,
        description: optional_string(args, "description")?,
        creator_id: creator.id,
    };

    let document = services
        .steering_documents
        .create_steering_document(input)
        .await?;
    Ok(tool_result(
        format!(
            "Created steering document {}: {}",
            document.reference_id, document.title
        ),
        &document,
    ))
}

async fn get_steering_document(
    services: &Services,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let field = "steering_document_id";
    let lookup = parse_lookup(&required_string(args, field)?, field)?;
    let document = services
        .steering_documents
        .get_steering_document(&lookup)
        .await?;
    Ok(tool_result(
        format!(
            "Steering document {}: {}",
            document.reference_id, document.title
        ),
        &document,
    ))
}

async fn update_steering_document(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let actor = ctx.require_editor()?;
    let id = resolve_steering_document_id(services, args).await?;
    let changes = SteeringDocumentChanges {
        title: optional_string(args, "title")?,
        description: optional_string(args, "description")?,
    };

    let document = services
        .steering_documents
        .update_steering_document(id, changes, actor)
        .await?;
    Ok(tool_result(
        format!("Updated steering document {}", document.reference_id),
        &document,
    ))
}

async fn link_steering_document(
    services: &Services,
    ctx: &RequestContext,
    args: &Arguments,
    link: bool,
) -> Result<CallToolResult, McpError> {
    ctx.require_editor()?;
    let document_id = resolve_steering_document_id(services, args).await?;
    let epic_id = resolve_entity_id(services, args, "epic_id", EntityKind::Epic).await?;

    let summary = if link {
        services
            .steering_documents
            .link_steering_document(document_id, epic_id)
            .await?;
        "Linked steering document to epic"
    } else {
        services
            .steering_documents
            .unlink_steering_document(document_id, epic_id)
            .await?;
        "Unlinked steering document from epic"
    };

    Ok(tool_result(
        summary.to_string(),
        &serde_json::json!({
            "steering_document_id": document_id,
            "epic_id": epic_id,
            "linked": link,
        }),
    ))
}

async fn get_epic_steering_documents(
    services: &Services,
    args: &Arguments,
) -> Result<CallToolResult, McpError> {
    let epic_id = resolve_entity_id(services, args, "epic_id", EntityKind::Epic).await?;
    let documents = services
        .steering_documents
        .list_epic_steering_documents(epic_id)
        .await?;
    Ok(tool_result(
        format!("Found {} steering documents for the epic", documents.len()),
        &documents,
    ))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::domain::model::{AuthenticatedUser, UserRole};
    use crate::store::InMemoryStore;

    fn setup(role: UserRole) -> (Services, RequestContext) {
        let user = AuthenticatedUser::new("alice", role);
        let store = Arc::new(InMemoryStore::new([user.clone()], vec![]));
        let ctx = RequestContext::new("test", Some(user), CancellationToken::new());
        (Services::from_store(store), ctx)
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().expect("object arguments")
    }

    fn payload(result: &CallToolResult) -> Value {
        let value = serde_json::to_value(result).expect("serialization");
        let text = value["content"][1]["text"].as_str().expect("payload text");
        serde_json::from_str(text).expect("payload json")
    }

    async fn call(services: &Services, ctx: &RequestContext, name: &str, value: Value) -> Result<CallToolResult, McpError> {
        handle_tools_call(services, ctx, name, args(value)).await
    }

    #[test]
    fn every_tool_has_a_unique_name_and_required_fields() {
        let tools = build_tools_list();
        let names = tools.iter().map(|tool| tool.name.clone()).collect::<HashSet<_>>();
        assert_eq!(names.len(), tools.len());

        for tool in tools {
            let schema = serde_json::to_value(&tool.input_schema).expect("schema");
            assert_eq!(schema["type"], json!("object"), "{}", tool.name);
            let required = schema["required"].as_array().expect("required array");
            assert!(!required.is_empty(), "{}", tool.name);
        }
    }

    #[tokio::test]
    async fn builds_the_hierarchy_by_reference() {
        let (services, ctx) = setup(UserRole::User);

        let epic = call(&services, &ctx, "create_epic", json!({"title": "Signup", "priority": 2}))
            .await
            .expect("epic");
        assert_eq!(payload(&epic)["reference_id"], json!("EP-001"));

        let story = call(
            &services,
            &ctx,
            "create_user_story",
            json!({"epic_id": "EP-001", "title": "Register", "priority": 2.0}),
        )
        .await
        .expect("story");
        assert_eq!(payload(&story)["reference_id"], json!("US-001"));

        call(
            &services,
            &ctx,
            "create_acceptance_criteria",
            json!({"user_story_id": "US-001", "description": "Email is validated"}),
        )
        .await
        .expect("criteria");

        let requirement = call(
            &services,
            &ctx,
            "create_requirement",
            json!({
                "user_story_id": "US-001",
                "acceptance_criteria_id": "AC-001",
                "title": "Validate email",
                "priority": 1,
                "type": "Functional"
            }),
        )
        .await
        .expect("requirement");
        let body = payload(&requirement);
        assert_eq!(body["reference_id"], json!("REQ-001"));
        assert_eq!(body["type"], json!("Functional"));
    }

    #[tokio::test]
    async fn update_with_empty_assignee_unassigns() {
        let (services, ctx) = setup(UserRole::Administrator);
        call(
            &services,
            &ctx,
            "create_epic",
            json!({"title": "Signup", "priority": 2, "assignee_id": "alice"}),
        )
        .await
        .expect("epic");

        let updated = call(
            &services,
            &ctx,
            "update_epic",
            json!({"epic_id": "EP-001", "assignee_id": "", "status": "In Progress"}),
        )
        .await
        .expect("updated");

        let body = payload(&updated);
        assert_eq!(body["assignee_id"], Value::Null);
        assert_eq!(body["status"], json!("In Progress"));
    }

    #[tokio::test]
    async fn rejects_mistyped_and_out_of_range_arguments() {
        let (services, ctx) = setup(UserRole::User);

        let err = call(&services, &ctx, "create_epic", json!({"title": "x", "priority": "high"}))
            .await
            .expect_err("string priority");
        assert!(matches!(err, McpError::InvalidParams(_)));

        let err = call(&services, &ctx, "create_epic", json!({"title": "x", "priority": 9}))
            .await
            .expect_err("priority range");
        assert!(matches!(err, McpError::Service(ServiceError::Validation(_))));

        let err = call(&services, &ctx, "update_epic", json!({"epic_id": "epic one"}))
            .await
            .expect_err("bad identifier");
        assert!(matches!(err, McpError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn commenters_cannot_modify() {
        let (services, ctx) = setup(UserRole::Commenter);

        let err = call(&services, &ctx, "create_epic", json!({"title": "Signup", "priority": 2}))
            .await
            .expect_err("forbidden");
        assert!(matches!(err, McpError::Service(ServiceError::Forbidden(_))));

        call(&services, &ctx, "search_global", json!({"query": "signup"}))
            .await
            .expect("search stays available");
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let (services, ctx) = setup(UserRole::User);

        let err = call(&services, &ctx, "drop_database", json!({}))
            .await
            .expect_err("unknown");
        assert_eq!(err, McpError::MethodNotFound("Unknown tool: drop_database".to_string()));
    }

    #[tokio::test]
    async fn steering_documents_round_trip_through_tools() {
        let (services, ctx) = setup(UserRole::User);
        call(&services, &ctx, "create_epic", json!({"title": "Signup", "priority": 2}))
            .await
            .expect("epic");
        call(
            &services,
            &ctx,
            "create_steering_document",
            json!({"title": "Security baseline", "description": "Validate all input"}),
        )
        .await
        .expect("document");

        call(
            &services,
            &ctx,
            "link_steering_document_to_epic",
            json!({"steering_document_id": "STD-001", "epic_id": "EP-001"}),
        )
        .await
        .expect("linked");

        let linked = call(&services, &ctx, "get_epic_steering_documents", json!({"epic_id": "EP-001"}))
            .await
            .expect("linked documents");
        assert_eq!(payload(&linked)[0]["reference_id"], json!("STD-001"));

        let listed = call(&services, &ctx, "list_steering_documents", json!({"query": ""}))
            .await
            .expect("listed");
        assert_eq!(payload(&listed)["total_count"], json!(1));

        let err = call(
            &services,
            &ctx,
            "link_steering_document_to_epic",
            json!({"steering_document_id": "STD-001", "epic_id": "EP-001"}),
        )
        .await
        .expect_err("duplicate link");
        assert!(matches!(err, McpError::Service(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn search_global_filters_by_entity_type() {
        let (services, ctx) = setup(UserRole::User);
        call(&services, &ctx, "create_epic", json!({"title": "Email signup", "priority": 2}))
            .await
            .expect("epic");

        let all = call(&services, &ctx, "search_global", json!({"query": "email"}))
            .await
            .expect("search");
        assert_eq!(payload(&all)["total_count"], json!(1));

        let requirements = call(
            &services,
            &ctx,
            "search_global",
            json!({"query": "email", "entity_types": ["requirement"]}),
        )
        .await
        .expect("search");
        assert_eq!(payload(&requirements)["total_count"], json!(0));

        let err = call(
            &services,
            &ctx,
            "search_global",
            json!({"query": "email", "entity_types": ["widget"]}),
        )
        .await
        .expect_err("unknown type");
        assert!(matches!(err, McpError::Service(ServiceError::Validation(_))));
    }
}
