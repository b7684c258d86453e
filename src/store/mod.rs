//! Service-layer seams consumed by the MCP gateway and the REST surface.
//!
//! Each operation is atomic with respect to its own entity and the inline
//! anchors attached to it. Implementations own their transactional discipline.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::anchors::InlineSelection;
use crate::domain::model::{
    AcceptanceCriteria, AuthenticatedUser, Comment, Entity, EntityKind, EntityLookup, Epic,
    Page, Pagination, Priority, Prompt, RelationshipType, Requirement, RequirementRelationship,
    RequirementType, SteeringDocument, UserStory,
};
use crate::errors::ServiceError;

pub use memory::InMemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssigneeChange {
    #[default]
    Keep,
    Unassign,
    Assign(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEpic {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUserStory {
    pub epic_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAcceptanceCriteria {
    pub user_story_id: Uuid,
    pub description: String,
    pub author_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRequirement {
    pub user_story_id: Uuid,
    pub acceptance_criteria_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub requirement_type: RequirementType,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
}

/// Partial update applied to any hierarchy entity. Fields a kind does not
/// carry must be left unset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<String>,
    pub assignee: AssigneeChange,
}

impl EntityChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.assignee == AssigneeChange::Keep
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship {
    pub source_requirement_id: Uuid,
    pub target_requirement_id: Uuid,
    pub relationship_type: RelationshipType,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    /// Empty means every searchable kind.
    pub kinds: Vec<EntityKind>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub entity_type: EntityKind,
    pub id: Uuid,
    pub reference_id: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SteeringDocumentFilter {
    pub query: String,
    pub creator_id: Option<Uuid>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSteeringDocument {
    pub title: String,
    pub description: Option<String>,
    pub creator_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SteeringDocumentChanges {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    pub selection: InlineSelection,
}

#[async_trait]
pub trait RequirementsRepository: Send + Sync {
    async fn get_entity(
        &self,
        kind: EntityKind,
        lookup: &EntityLookup,
    ) -> Result<Entity, ServiceError>;

    async fn list_entities(
        &self,
        kind: EntityKind,
        pagination: Pagination,
    ) -> Result<Page<Entity>, ServiceError>;

    async fn create_epic(&self, input: NewEpic) -> Result<Epic, ServiceError>;

    async fn create_user_story(&self, input: NewUserStory) -> Result<UserStory, ServiceError>;

    async fn create_acceptance_criteria(
        &self,
        input: NewAcceptanceCriteria,
    ) -> Result<AcceptanceCriteria, ServiceError>;

    async fn create_requirement(&self, input: NewRequirement)
        -> Result<Requirement, ServiceError>;

    /// Applies `changes` and reconciles inline anchors when the body changed.
    async fn update_entity(
        &self,
        kind: EntityKind,
        id: Uuid,
        changes: EntityChanges,
    ) -> Result<Entity, ServiceError>;

    async fn create_relationship(
        &self,
        input: NewRelationship,
    ) -> Result<RequirementRelationship, ServiceError>;

    async fn search(&self, query: &SearchQuery) -> Result<Page<SearchHit>, ServiceError>;
}

#[async_trait]
pub trait SteeringDocumentRepository: Send + Sync {
    async fn list_steering_documents(
        &self,
        filter: &SteeringDocumentFilter,
    ) -> Result<Page<SteeringDocument>, ServiceError>;

    async fn create_steering_document(
        &self,
        input: NewSteeringDocument,
    ) -> Result<SteeringDocument, ServiceError>;

    async fn get_steering_document(
        &self,
        lookup: &EntityLookup,
    ) -> Result<SteeringDocument, ServiceError>;

    async fn update_steering_document(
        &self,
        id: Uuid,
        changes: SteeringDocumentChanges,
        actor: &AuthenticatedUser,
    ) -> Result<SteeringDocument, ServiceError>;

    async fn link_steering_document(&self, document_id: Uuid, epic_id: Uuid)
        -> Result<(), ServiceError>;

    async fn unlink_steering_document(
        &self,
        document_id: Uuid,
        epic_id: Uuid,
    ) -> Result<(), ServiceError>;

    async fn list_epic_steering_documents(
        &self,
        epic_id: Uuid,
    ) -> Result<Vec<SteeringDocument>, ServiceError>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create_comment(&self, input: NewComment) -> Result<Comment, ServiceError>;

    async fn list_comments(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Comment>, ServiceError>;

    /// Inline comments whose anchor is currently visible.
    async fn list_visible_inline_comments(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Comment>, ServiceError>;

    async fn list_replies(&self, comment_id: Uuid) -> Result<Vec<Comment>, ServiceError>;

    async fn set_resolved(
        &self,
        comment_id: Uuid,
        resolved: bool,
        actor: &AuthenticatedUser,
    ) -> Result<Comment, ServiceError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Finds a user by canonical id or username.
    async fn find_user(&self, id_or_username: &str) -> Result<AuthenticatedUser, ServiceError>;
}

#[async_trait]
pub trait PromptRepository: Send + Sync {
    async fn get_active(&self) -> Result<Option<Prompt>, ServiceError>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>, ServiceError>;

    async fn get_prompt(&self, name: &str) -> Result<Prompt, ServiceError>;
}

/// The service seams handed to the MCP handlers and the REST routes.
#[derive(Clone)]
pub struct Services {
    pub requirements: Arc<dyn RequirementsRepository>,
    pub steering_documents: Arc<dyn SteeringDocumentRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub prompts: Arc<dyn PromptRepository>,
}

impl Services {
    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            requirements: store.clone(),
            steering_documents: store.clone(),
            comments: store.clone(),
            users: store.clone(),
            prompts: store,
        }
    }
}
