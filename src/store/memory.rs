//! Process-local implementation of every store trait.
//!
//! All state sits behind one `RwLock`, so each operation, including the anchor
//! reconciliation that follows a body edit, is applied atomically.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    AssigneeChange, CommentRepository, EntityChanges, NewAcceptanceCriteria, NewComment, NewEpic,
    NewRelationship, NewRequirement, NewSteeringDocument, NewUserStory, PromptRepository,
    RequirementsRepository, SearchHit, SearchQuery, SteeringDocumentChanges,
    SteeringDocumentFilter, SteeringDocumentRepository, UserDirectory,
};
use crate::domain::anchors::AnchorChange;
use crate::domain::model::{
    parse_canonical_id, AcceptanceCriteria, AuthenticatedUser, Comment, Entity, EntityKind,
    EntityLookup, Epic, Page, Pagination, Priority, Prompt, Requirement, RequirementRelationship,
    RequirementStatus, SteeringDocument, UserRole, UserStory, WorkflowStatus,
};
use crate::errors::ServiceError;

const MAX_TITLE_CHARS: usize = 500;
const MAX_DESCRIPTION_CHARS: usize = 50_000;

#[derive(Debug, Default)]
struct StoreState {
    epics: HashMap<Uuid, Epic>,
    user_stories: HashMap<Uuid, UserStory>,
    acceptance_criteria: HashMap<Uuid, AcceptanceCriteria>,
    requirements: HashMap<Uuid, Requirement>,
    relationships: Vec<RequirementRelationship>,
    steering_documents: HashMap<Uuid, SteeringDocument>,
    /// (steering document, epic)
    steering_links: HashSet<(Uuid, Uuid)>,
    comments: Vec<Comment>,
    users: HashMap<Uuid, AuthenticatedUser>,
    prompts: Vec<Prompt>,
    sequences: HashMap<EntityKind, u64>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new(users: impl IntoIterator<Item = AuthenticatedUser>, prompts: Vec<Prompt>) -> Self {
        let state = StoreState {
            users: users.into_iter().map(|user| (user.id, user)).collect(),
            prompts,
            ..StoreState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }
}

/// Entities addressable by a human-readable reference.
trait Referenced: Clone {
    fn reference(&self) -> &str;
}

macro_rules! impl_referenced {
    ($($ty:ty),+) => {
        $(impl Referenced for $ty {
            fn reference(&self) -> &str {
                &self.reference_id
            }
        })+
    };
}

impl_referenced!(Epic, UserStory, AcceptanceCriteria, Requirement, SteeringDocument);

fn find_in<'a, T: Referenced>(items: &'a HashMap<Uuid, T>, lookup: &EntityLookup) -> Option<&'a T> {
    match lookup {
        EntityLookup::Id(id) => items.get(id),
        EntityLookup::Reference(wanted) => items.values().find(|item| item.reference() == wanted),
    }
}

fn reference_sequence(reference: &str) -> u64 {
    reference
        .rsplit_once('-')
        .and_then(|(_, number)| number.parse().ok())
        .unwrap_or(0)
}

fn sorted_by_reference<T: Referenced>(items: &HashMap<Uuid, T>) -> Vec<T> {
    let mut values = items.values().cloned().collect::<Vec<_>>();
    values.sort_by_key(|item| reference_sequence(item.reference()));
    values
}

fn validate_title(title: &str) -> Result<String, ServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ServiceError::validation(
            "title must not exceed 500 characters",
        ));
    }
    Ok(title.to_string())
}

fn normalize_description(description: Option<String>) -> Result<Option<String>, ServiceError> {
    let Some(description) = description else {
        return Ok(None);
    };
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ServiceError::validation(
            "description must not exceed 50000 characters",
        ));
    }
    Ok(Some(description).filter(|value| !value.trim().is_empty()))
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|value| value.to_lowercase().contains(needle))
}

impl StoreState {
    fn next_reference(&mut self, kind: EntityKind) -> String {
        let sequence = self.sequences.entry(kind).or_insert(0);
        *sequence += 1;
        kind.format_reference(*sequence)
    }

    fn ensure_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(ServiceError::not_found_named("User", user_id.to_string()))
        }
    }

    fn find_entity(&self, kind: EntityKind, lookup: &EntityLookup) -> Result<Entity, ServiceError> {
        let found = match kind {
            EntityKind::Epic => find_in(&self.epics, lookup).cloned().map(Entity::Epic),
            EntityKind::UserStory => find_in(&self.user_stories, lookup)
                .cloned()
                .map(Entity::UserStory),
            EntityKind::AcceptanceCriteria => find_in(&self.acceptance_criteria, lookup)
                .cloned()
                .map(Entity::AcceptanceCriteria),
            EntityKind::Requirement => find_in(&self.requirements, lookup)
                .cloned()
                .map(Entity::Requirement),
            EntityKind::SteeringDocument => {
                return Err(ServiceError::validation(
                    "steering documents are not part of the requirements hierarchy",
                ))
            }
        };

        found.ok_or_else(|| ServiceError::not_found(kind, lookup.to_string()))
    }

    fn find_steering_document(
        &self,
        lookup: &EntityLookup,
    ) -> Result<&SteeringDocument, ServiceError> {
        find_in(&self.steering_documents, lookup).ok_or_else(|| ServiceError::not_found(EntityKind::SteeringDocument, lookup.to_string()))
    }

    fn reconcile_anchors(&mut self, kind: EntityKind, entity_id: Uuid, body: &str) {
        let anchored = self.comments.iter_mut().filter(|comment| {
            comment.entity_type == kind && comment.entity_id == entity_id
        });

        for comment in anchored {
            let Some(anchor) = comment.anchor.as_mut() else {
                continue;
            };
            match anchor.reconcile(body) {
                AnchorChange::Unchanged => {}
                AnchorChange::Moved { from, to } => {
                    debug!(comment_id = %comment.id, from, to, "inline anchor moved");
                }
                AnchorChange::Hidden => {
                    debug!(comment_id = %comment.id, "inline anchor hidden");
                }
                AnchorChange::Restored => {
                    debug!(comment_id = %comment.id, "inline anchor restored");
                }
            }
        }
    }
}

fn apply_assignee(target: &mut Option<Uuid>, change: AssigneeChange) {
    match change {
        AssigneeChange::Keep => {}
        AssigneeChange::Unassign => *target = None,
        AssigneeChange::Assign(user_id) => *target = Some(user_id),
    }
}

/// Applies the fields shared by epics, user stories and requirements.
/// Returns whether the description changed.
fn apply_planning_changes(
    title: &mut String,
    description: &mut Option<String>,
    priority: &mut Priority,
    assignee_id: &mut Option<Uuid>,
    changes: &EntityChanges,
) -> Result<bool, ServiceError> {
    if let Some(new_title) = &changes.title {
        *title = validate_title(new_title)?;
    }
    if let Some(new_priority) = changes.priority {
        *priority = new_priority;
    }
    apply_assignee(assignee_id, changes.assignee);

    let Some(new_description) = &changes.description else {
        return Ok(false);
    };
    let new_description = normalize_description(Some(new_description.clone()))?;
    let changed = *description != new_description;
    *description = new_description;
    Ok(changed)
}

#[async_trait]
impl RequirementsRepository for InMemoryStore {
    async fn get_entity(
        &self,
        kind: EntityKind,
        lookup: &EntityLookup,
    ) -> Result<Entity, ServiceError> {
        self.state.read().await.find_entity(kind, lookup)
    }

    async fn list_entities(
        &self,
        kind: EntityKind,
        pagination: Pagination,
    ) -> Result<Page<Entity>, ServiceError> {
        let state = self.state.read().await;
        let entities = match kind {
            EntityKind::Epic => sorted_by_reference(&state.epics)
                .into_iter()
                .map(Entity::Epic)
                .collect(),
            EntityKind::UserStory => {
                sorted_by_reference(&state.user_stories)
                    .into_iter()
                    .map(Entity::UserStory)
                    .collect()
            }
            EntityKind::AcceptanceCriteria => {
                sorted_by_reference(&state.acceptance_criteria)
                    .into_iter()
                    .map(Entity::AcceptanceCriteria)
                    .collect()
            }
            EntityKind::Requirement => {
                sorted_by_reference(&state.requirements)
                    .into_iter()
                    .map(Entity::Requirement)
                    .collect()
            }
            EntityKind::SteeringDocument => {
                return Err(ServiceError::validation(
                    "steering documents are not part of the requirements hierarchy",
                ))
            }
        };

        Ok(pagination.apply(entities))
    }

    async fn create_epic(&self, input: NewEpic) -> Result<Epic, ServiceError> {
        let title = validate_title(&input.title)?;
        let description = normalize_description(input.description)?;

        let mut state = self.state.write().await;
        if let Some(assignee_id) = input.assignee_id {
            state.ensure_user(assignee_id)?;
        }

        let now = Utc::now();
        let epic = Epic {
            id: Uuid::new_v4(),
            reference_id: state.next_reference(EntityKind::Epic),
            title,
            description,
            priority: input.priority,
            status: WorkflowStatus::Backlog,
            creator_id: input.creator_id,
            assignee_id: input.assignee_id,
            created_at: now,
            last_modified: now,
        };
        state.epics.insert(epic.id, epic.clone());
        Ok(epic)
    }

    async fn create_user_story(&self, input: NewUserStory) -> Result<UserStory, ServiceError> {
        let title = validate_title(&input.title)?;
        let description = normalize_description(input.description)?;

        let mut state = self.state.write().await;
        if !state.epics.contains_key(&input.epic_id) {
            return Err(ServiceError::not_found(
                EntityKind::Epic,
                input.epic_id.to_string(),
            ));
        }
        if let Some(assignee_id) = input.assignee_id {
            state.ensure_user(assignee_id)?;
        }

        let now = Utc::now();
        let story = UserStory {
            id: Uuid::new_v4(),
            reference_id: state.next_reference(EntityKind::UserStory),
            epic_id: input.epic_id,
            title,
            description,
            priority: input.priority,
            status: WorkflowStatus::Backlog,
            creator_id: input.creator_id,
            assignee_id: input.assignee_id,
            created_at: now,
            last_modified: now,
        };
        state.user_stories.insert(story.id, story.clone());
        Ok(story)
    }

    async fn create_acceptance_criteria(
        &self,
        input: NewAcceptanceCriteria,
    ) -> Result<AcceptanceCriteria, ServiceError> {
        let description = normalize_description(Some(input.description))?
            .ok_or_else(|| ServiceError::validation("description must not be empty"))?;

        let mut state = self.state.write().await;
        if !state.user_stories.contains_key(&input.user_story_id) {
            return Err(ServiceError::not_found(
                EntityKind::UserStory,
                input.user_story_id.to_string(),
            ));
        }

        let now = Utc::now();
        let criteria = AcceptanceCriteria {
            id: Uuid::new_v4(),
            reference_id: state.next_reference(EntityKind::AcceptanceCriteria),
            user_story_id: input.user_story_id,
            description,
            author_id: input.author_id,
            created_at: now,
            last_modified: now,
        };
        state
            .acceptance_criteria
            .insert(criteria.id, criteria.clone());
        Ok(criteria)
    }

    async fn create_requirement(
        &self,
        input: NewRequirement,
    ) -> Result<Requirement, ServiceError> {
        let title = validate_title(&input.title)?;
        let description = normalize_description(input.description)?;

        let mut state = self.state.write().await;
        if !state.user_stories.contains_key(&input.user_story_id) {
            return Err(ServiceError::not_found(
                EntityKind::UserStory,
                input.user_story_id.to_string(),
            ));
        }
        if let Some(criteria_id) = input.acceptance_criteria_id {
            let criteria = state.acceptance_criteria.get(&criteria_id).ok_or_else(|| {
                ServiceError::not_found(EntityKind::AcceptanceCriteria, criteria_id.to_string())
            })?;
            if criteria.user_story_id != input.user_story_id {
                return Err(ServiceError::validation(
                    "acceptance criteria must belong to the same user story",
                ));
            }
        }
        if let Some(assignee_id) = input.assignee_id {
            state.ensure_user(assignee_id)?;
        }

        let now = Utc::now();
        let requirement = Requirement {
            id: Uuid::new_v4(),
            reference_id: state.next_reference(EntityKind::Requirement),
            user_story_id: input.user_story_id,
            acceptance_criteria_id: input.acceptance_criteria_id,
            title,
            description,
            priority: input.priority,
            status: RequirementStatus::Draft,
            requirement_type: input.requirement_type,
            creator_id: input.creator_id,
            assignee_id: input.assignee_id,
            created_at: now,
            last_modified: now,
        };
        state
            .requirements
            .insert(requirement.id, requirement.clone());
        Ok(requirement)
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: Uuid,
        changes: EntityChanges,
    ) -> Result<Entity, ServiceError> {
        if changes.is_empty() {
            return Err(ServiceError::validation("no fields to update"));
        }

        let mut state = self.state.write().await;
        if let AssigneeChange::Assign(user_id) = changes.assignee {
            state.ensure_user(user_id)?;
        }

        let missing = || ServiceError::not_found(kind, id.to_string());
        let now = Utc::now();
        let (entity, body_changed) = match kind {
            EntityKind::Epic => {
                let mut epic = state.epics.get(&id).cloned().ok_or_else(missing)?;
                let body_changed = apply_planning_changes(
                    &mut epic.title,
                    &mut epic.description,
                    &mut epic.priority,
                    &mut epic.assignee_id,
                    &changes,
                )?;
                if let Some(status) = &changes.status {
                    epic.status = WorkflowStatus::parse(status)?;
                }
                epic.last_modified = now;
                state.epics.insert(id, epic.clone());
                (Entity::Epic(epic), body_changed)
            }
            EntityKind::UserStory => {
                let mut story = state.user_stories.get(&id).cloned().ok_or_else(missing)?;
                let body_changed = apply_planning_changes(
                    &mut story.title,
                    &mut story.description,
                    &mut story.priority,
                    &mut story.assignee_id,
                    &changes,
                )?;
                if let Some(status) = &changes.status {
                    story.status = WorkflowStatus::parse(status)?;
                }
                story.last_modified = now;
                state.user_stories.insert(id, story.clone());
                (Entity::UserStory(story), body_changed)
            }
            EntityKind::Requirement => {
                let mut requirement = state.requirements.get(&id).cloned().ok_or_else(missing)?;
                let body_changed = apply_planning_changes(
                    &mut requirement.title,
                    &mut requirement.description,
                    &mut requirement.priority,
                    &mut requirement.assignee_id,
                    &changes,
                )?;
                if let Some(status) = &changes.status {
                    requirement.status = RequirementStatus::parse(status)?;
                }
                requirement.last_modified = now;
                state.requirements.insert(id, requirement.clone());
                (Entity::Requirement(requirement), body_changed)
            }
            EntityKind::AcceptanceCriteria => {
                if changes.title.is_some()
                    || changes.priority.is_some()
                    || changes.status.is_some()
                    || changes.assignee != AssigneeChange::Keep
                {
                    return Err(ServiceError::validation(
                        "acceptance criteria only support description updates",
                    ));
                }
                let mut criteria = state
                    .acceptance_criteria
                    .get(&id)
                    .cloned()
                    .ok_or_else(missing)?;
                let description = normalize_description(changes.description.clone())?
                    .ok_or_else(|| ServiceError::validation("description must not be empty"))?;
                let body_changed = criteria.description != description;
                criteria.description = description;
                criteria.last_modified = now;
                state.acceptance_criteria.insert(id, criteria.clone());
                (Entity::AcceptanceCriteria(criteria), body_changed)
            }
            EntityKind::SteeringDocument => {
                return Err(ServiceError::validation(
                    "steering documents are not part of the requirements hierarchy",
                ))
            }
        };

        if body_changed {
            state.reconcile_anchors(kind, id, entity.body());
        }
        Ok(entity)
    }

    async fn create_relationship(
        &self,
        input: NewRelationship,
    ) -> Result<RequirementRelationship, ServiceError> {
        if input.source_requirement_id == input.target_requirement_id {
            return Err(ServiceError::validation(
                "a requirement cannot have a relationship with itself",
            ));
        }

        let mut state = self.state.write().await;
        for requirement_id in [input.source_requirement_id, input.target_requirement_id] {
            if !state.requirements.contains_key(&requirement_id) {
                return Err(ServiceError::not_found(
                    EntityKind::Requirement,
                    requirement_id.to_string(),
                ));
            }
        }

        let duplicate = state.relationships.iter().any(|existing| {
            existing.source_requirement_id == input.source_requirement_id
                && existing.target_requirement_id == input.target_requirement_id
                && existing.relationship_type == input.relationship_type
        });
        if duplicate {
            return Err(ServiceError::Conflict(
                "relationship already exists".to_string(),
            ));
        }

        let relationship = RequirementRelationship {
            id: Uuid::new_v4(),
            source_requirement_id: input.source_requirement_id,
            target_requirement_id: input.target_requirement_id,
            relationship_type: input.relationship_type,
            created_by: input.created_by,
            created_at: Utc::now(),
        };
        state.relationships.push(relationship.clone());
        Ok(relationship)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Page<SearchHit>, ServiceError> {
        let needle = query.query.trim().to_lowercase();
        let wanted = |kind: EntityKind| query.kinds.is_empty() || query.kinds.contains(&kind);
        let matches = |reference: &str, title: &str, description: Option<&str>| {
            contains_ignore_case(Some(reference), &needle)
                || contains_ignore_case(Some(title), &needle)
                || contains_ignore_case(description, &needle)
        };

        let state = self.state.read().await;
        let mut hits = Vec::new();

        if wanted(EntityKind::Epic) {
            hits.extend(
                sorted_by_reference(&state.epics)
                    .into_iter()
                    .filter(|epic| {
                        matches(&epic.reference_id, &epic.title, epic.description.as_deref())
                    })
                    .map(|epic| SearchHit {
                        entity_type: EntityKind::Epic,
                        id: epic.id,
                        reference_id: epic.reference_id,
                        title: epic.title,
                        description: epic.description,
                    }),
            );
        }
        if wanted(EntityKind::UserStory) {
            hits.extend(
                sorted_by_reference(&state.user_stories)
                    .into_iter()
                    .filter(|story| {
                        matches(&story.reference_id, &story.title, story.description.as_deref())
                    })
                    .map(|story| SearchHit {
                        entity_type: EntityKind::UserStory,
                        id: story.id,
                        reference_id: story.reference_id,
                        title: story.title,
                        description: story.description,
                    }),
            );
        }
        if wanted(EntityKind::AcceptanceCriteria) {
            hits.extend(
                sorted_by_reference(&state.acceptance_criteria)
                    .into_iter()
                    .filter(|ac| matches(&ac.reference_id, &ac.description, None))
                    .map(|ac| SearchHit {
                        entity_type: EntityKind::AcceptanceCriteria,
                        id: ac.id,
                        title: ac.reference_id.clone(),
                        reference_id: ac.reference_id,
                        description: Some(ac.description),
                    }),
            );
        }
        if wanted(EntityKind::Requirement) {
            hits.extend(
                sorted_by_reference(&state.requirements)
                    .into_iter()
                    .filter(|requirement| {
                        matches(
                            &requirement.reference_id,
                            &requirement.title,
                            requirement.description.as_deref(),
                        )
                    })
                    .map(|requirement| SearchHit {
                        entity_type: EntityKind::Requirement,
                        id: requirement.id,
                        reference_id: requirement.reference_id,
                        title: requirement.title,
                        description: requirement.description,
                    }),
            );
        }
        if wanted(EntityKind::SteeringDocument) {
            hits.extend(
                sorted_by_reference(&state.steering_documents)
                    .into_iter()
                    .filter(|document| {
                        matches(
                            &document.reference_id,
                            &document.title,
                            document.description.as_deref(),
                        )
                    })
                    .map(|document| SearchHit {
                        entity_type: EntityKind::SteeringDocument,
                        id: document.id,
                        reference_id: document.reference_id,
                        title: document.title,
                        description: document.description,
                    }),
            );
        }

        Ok(query.pagination.apply(hits))
    }
}

#[async_trait]
impl SteeringDocumentRepository for InMemoryStore {
    async fn list_steering_documents(
        &self,
        filter: &SteeringDocumentFilter,
    ) -> Result<Page<SteeringDocument>, ServiceError> {
        let needle = filter.query.trim().to_lowercase();
        let state = self.state.read().await;
        let documents = sorted_by_reference(&state.steering_documents)
            .into_iter()
            .filter(|document| filter.creator_id.is_none_or(|id| document.creator_id == id))
            .filter(|document| {
                needle.is_empty()
                    || contains_ignore_case(Some(&document.reference_id), &needle)
                    || contains_ignore_case(Some(&document.title), &needle)
                    || contains_ignore_case(document.description.as_deref(), &needle)
            })
            .collect();

        Ok(filter.pagination.apply(documents))
    }

    async fn create_steering_document(
        &self,
        input: NewSteeringDocument,
    ) -> Result<SteeringDocument, ServiceError> {
        let title = validate_title(&input.title)?;
        let description = normalize_description(input.description)?;

        let mut state = self.state.write().await;
        let now = Utc::now();
        let document = SteeringDocument {
            id: Uuid::new_v4(),
            reference_id: state.next_reference(EntityKind::SteeringDocument),
            title,
            description,
            creator_id: input.creator_id,
            created_at: now,
            last_modified: now,
        };
        state
            .steering_documents
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_steering_document(
        &self,
        lookup: &EntityLookup,
    ) -> Result<SteeringDocument, ServiceError> {
        self.state
            .read()
            .await
            .find_steering_document(lookup)
            .cloned()
    }

    async fn update_steering_document(
        &self,
        id: Uuid,
        changes: SteeringDocumentChanges,
        actor: &AuthenticatedUser,
    ) -> Result<SteeringDocument, ServiceError> {
        if changes.title.is_none() && changes.description.is_none() {
            return Err(ServiceError::validation("no fields to update"));
        }

        let mut state = self.state.write().await;
        let mut document = state
            .find_steering_document(&EntityLookup::Id(id))?
            .clone();
        if document.creator_id != actor.id && actor.role != UserRole::Administrator {
            return Err(ServiceError::Forbidden(
                "only the creator or an administrator can update a steering document",
            ));
        }

        if let Some(title) = &changes.title {
            document.title = validate_title(title)?;
        }
        if changes.description.is_some() {
            document.description = normalize_description(changes.description)?;
        }
        document.last_modified = Utc::now();
        state.steering_documents.insert(id, document.clone());
        Ok(document)
    }

    async fn link_steering_document(
        &self,
        document_id: Uuid,
        epic_id: Uuid,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        state.find_steering_document(&EntityLookup::Id(document_id))?;
        state.find_entity(EntityKind::Epic, &EntityLookup::Id(epic_id))?;

        if !state.steering_links.insert((document_id, epic_id)) {
            return Err(ServiceError::Conflict(
                "steering document is already linked to the epic".to_string(),
            ));
        }
        Ok(())
    }

    async fn unlink_steering_document(
        &self,
        document_id: Uuid,
        epic_id: Uuid,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        if !state.steering_links.remove(&(document_id, epic_id)) {
            return Err(ServiceError::not_found_named(
                "Steering document link",
                format!("{document_id} -> {epic_id}"),
            ));
        }
        Ok(())
    }

    async fn list_epic_steering_documents(
        &self,
        epic_id: Uuid,
    ) -> Result<Vec<SteeringDocument>, ServiceError> {
        let state = self.state.read().await;
        state.find_entity(EntityKind::Epic, &EntityLookup::Id(epic_id))?;

        let mut documents = state
            .steering_links
            .iter()
            .filter(|(_, linked_epic)| *linked_epic == epic_id)
            .filter_map(|(document_id, _)| state.steering_documents.get(document_id).cloned())
            .collect::<Vec<_>>();
        documents.sort_by_key(|document| reference_sequence(&document.reference_id));
        Ok(documents)
    }
}

#[async_trait]
impl CommentRepository for InMemoryStore {
    async fn create_comment(&self, input: NewComment) -> Result<Comment, ServiceError> {
        if !EntityKind::RESOURCE_KINDS.contains(&input.entity_type) {
            return Err(ServiceError::validation(
                "comments can only be attached to epics, user stories, acceptance criteria or requirements",
            ));
        }
        let content = input.content.trim();
        if content.is_empty() {
            return Err(ServiceError::validation("content must not be empty"));
        }

        let mut state = self.state.write().await;
        let entity = state.find_entity(input.entity_type, &EntityLookup::Id(input.entity_id))?;

        if let Some(parent_id) = input.parent_comment_id {
            let parent = state
                .comments
                .iter()
                .find(|comment| comment.id == parent_id)
                .ok_or_else(|| ServiceError::not_found_named("Comment", parent_id.to_string()))?;
            if parent.entity_type != input.entity_type || parent.entity_id != input.entity_id {
                return Err(ServiceError::ParentEntityMismatch);
            }
            if !input.selection.is_empty() {
                return Err(ServiceError::InvalidInlineData);
            }
        }

        let anchor = input.selection.into_anchor(entity.body())?;
        let now = Utc::now();
        let comment = Comment {
            id: Uuid::new_v4(),
            entity_type: input.entity_type,
            entity_id: input.entity_id,
            author_id: input.author_id,
            content: content.to_string(),
            parent_comment_id: input.parent_comment_id,
            is_resolved: false,
            anchor,
            created_at: now,
            updated_at: now,
        };
        state.comments.push(comment.clone());
        Ok(comment)
    }

    async fn list_comments(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Comment>, ServiceError> {
        let state = self.state.read().await;
        state.find_entity(kind, &EntityLookup::Id(entity_id))?;

        Ok(state
            .comments
            .iter()
            .filter(|comment| comment.entity_type == kind && comment.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn list_visible_inline_comments(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Comment>, ServiceError> {
        let state = self.state.read().await;
        state.find_entity(kind, &EntityLookup::Id(entity_id))?;

        Ok(state
            .comments
            .iter()
            .filter(|comment| comment.entity_type == kind && comment.entity_id == entity_id)
            .filter(|comment| {
                comment
                    .anchor
                    .as_ref()
                    .is_some_and(|anchor| anchor.is_visible)
            })
            .cloned()
            .collect())
    }

    async fn list_replies(&self, comment_id: Uuid) -> Result<Vec<Comment>, ServiceError> {
        let state = self.state.read().await;
        if !state.comments.iter().any(|comment| comment.id == comment_id) {
            return Err(ServiceError::not_found_named(
                "Comment",
                comment_id.to_string(),
            ));
        }

        Ok(state
            .comments
            .iter()
            .filter(|comment| comment.parent_comment_id == Some(comment_id))
            .cloned()
            .collect())
    }

    async fn set_resolved(
        &self,
        comment_id: Uuid,
        resolved: bool,
        actor: &AuthenticatedUser,
    ) -> Result<Comment, ServiceError> {
        let mut state = self.state.write().await;
        let comment = state
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
            .ok_or_else(|| ServiceError::not_found_named("Comment", comment_id.to_string()))?;

        if comment.author_id != actor.id && actor.role != UserRole::Administrator {
            return Err(ServiceError::Forbidden(
                "only the author or an administrator can resolve a comment",
            ));
        }

        comment.is_resolved = resolved;
        comment.updated_at = Utc::now();
        Ok(comment.clone())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, id_or_username: &str) -> Result<AuthenticatedUser, ServiceError> {
        let wanted = id_or_username.trim();
        let state = self.state.read().await;
        let found = match parse_canonical_id(wanted) {
            Some(id) => state.users.get(&id),
            None => state.users.values().find(|user| user.username == wanted),
        };

        found
            .cloned()
            .ok_or_else(|| ServiceError::not_found_named("User", wanted))
    }
}

#[async_trait]
impl PromptRepository for InMemoryStore {
    async fn get_active(&self) -> Result<Option<Prompt>, ServiceError> {
        let state = self.state.read().await;
        Ok(state.prompts.iter().find(|prompt| prompt.is_active).cloned())
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, ServiceError> {
        Ok(self.state.read().await.prompts.clone())
    }

    async fn get_prompt(&self, name: &str) -> Result<Prompt, ServiceError> {
        let state = self.state.read().await;
        state
            .prompts
            .iter()
            .find(|prompt| prompt.name == name)
            .cloned()
            .ok_or_else(|| ServiceError::not_found_named("Prompt", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::anchors::InlineSelection;
    use crate::domain::model::{RelationshipType, RequirementType};

    fn admin() -> AuthenticatedUser {
        AuthenticatedUser::new("alice", UserRole::Administrator)
    }

    async fn store_with_epic(description: &str) -> (InMemoryStore, AuthenticatedUser, Epic) {
        let user = admin();
        let store = InMemoryStore::new([user.clone()], vec![]);
        let epic = store
            .create_epic(NewEpic {
                title: "Signup".to_string(),
                description: Some(description.to_string()),
                priority: Priority::new(2).expect("priority"),
                creator_id: user.id,
                assignee_id: None,
            })
            .await
            .expect("epic created");
        (store, user, epic)
    }

    fn inline(text: &str, start: i64, end: i64) -> InlineSelection {
        InlineSelection {
            linked_text: Some(text.to_string()),
            text_position_start: Some(start),
            text_position_end: Some(end),
        }
    }

    fn new_comment(epic: &Epic, author: &AuthenticatedUser, selection: InlineSelection) -> NewComment {
        NewComment {
            entity_type: EntityKind::Epic,
            entity_id: epic.id,
            author_id: author.id,
            content: "Needs a regex".to_string(),
            parent_comment_id: None,
            selection,
        }
    }

    #[tokio::test]
    async fn references_are_allocated_per_kind() {
        let (store, user, epic) = store_with_epic("body").await;
        assert_eq!(epic.reference_id, "EP-001");

        let second = store
            .create_epic(NewEpic {
                title: "Billing".to_string(),
                description: None,
                priority: Priority::new(3).expect("priority"),
                creator_id: user.id,
                assignee_id: None,
            })
            .await
            .expect("epic created");
        assert_eq!(second.reference_id, "EP-002");

        let document = store
            .create_steering_document(NewSteeringDocument {
                title: "Style guide".to_string(),
                description: None,
                creator_id: user.id,
            })
            .await
            .expect("document created");
        assert_eq!(document.reference_id, "STD-001");
    }

    #[tokio::test]
    async fn description_edit_reconciles_inline_anchors() {
        let (store, user, epic) = store_with_epic("Please validate email field").await;
        let comment = store
            .create_comment(new_comment(&epic, &user, inline("validate email", 7, 21)))
            .await
            .expect("inline comment created");

        store
            .update_entity(
                EntityKind::Epic,
                epic.id,
                EntityChanges {
                    description: Some("We must validate email field".to_string()),
                    ..EntityChanges::default()
                },
            )
            .await
            .expect("epic updated");

        let visible = store
            .list_visible_inline_comments(EntityKind::Epic, epic.id)
            .await
            .expect("visible comments");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, comment.id);
        let anchor = visible[0].anchor.as_ref().expect("anchor");
        assert_eq!((anchor.start, anchor.end), (8, 22));
    }

    #[tokio::test]
    async fn hidden_anchors_are_kept_but_not_listed_as_visible() {
        let (store, user, epic) = store_with_epic("Please validate email field").await;
        store
            .create_comment(new_comment(&epic, &user, inline("validate email", 7, 21)))
            .await
            .expect("inline comment created");

        store
            .update_entity(
                EntityKind::Epic,
                epic.id,
                EntityChanges {
                    description: Some("Phone number only".to_string()),
                    ..EntityChanges::default()
                },
            )
            .await
            .expect("epic updated");

        let visible = store
            .list_visible_inline_comments(EntityKind::Epic, epic.id)
            .await
            .expect("visible comments");
        assert!(visible.is_empty());

        let all = store
            .list_comments(EntityKind::Epic, epic.id)
            .await
            .expect("all comments");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].anchor.as_ref().map(|anchor| anchor.is_visible), Some(false));
    }

    #[tokio::test]
    async fn replies_must_target_the_parent_entity() {
        let (store, user, epic) = store_with_epic("body").await;
        let other = store
            .create_epic(NewEpic {
                title: "Other".to_string(),
                description: None,
                priority: Priority::new(1).expect("priority"),
                creator_id: user.id,
                assignee_id: None,
            })
            .await
            .expect("epic created");
        let parent = store
            .create_comment(new_comment(&epic, &user, InlineSelection::default()))
            .await
            .expect("parent created");

        let mut reply = new_comment(&other, &user, InlineSelection::default());
        reply.parent_comment_id = Some(parent.id);
        let err = store.create_comment(reply).await.expect_err("must fail");
        assert_eq!(err, ServiceError::ParentEntityMismatch);

        let mut reply = new_comment(&epic, &user, InlineSelection::default());
        reply.parent_comment_id = Some(parent.id);
        store.create_comment(reply).await.expect("reply created");
        let replies = store.list_replies(parent.id).await.expect("replies");
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn blank_comment_content_is_rejected() {
        let (store, user, epic) = store_with_epic("body").await;
        let mut input = new_comment(&epic, &user, InlineSelection::default());
        input.content = "   ".to_string();

        let err = store.create_comment(input).await.expect_err("must fail");
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_relationships_conflict() {
        let (store, user, epic) = store_with_epic("body").await;
        let story = store
            .create_user_story(NewUserStory {
                epic_id: epic.id,
                title: "As a user".to_string(),
                description: None,
                priority: Priority::new(2).expect("priority"),
                creator_id: user.id,
                assignee_id: None,
            })
            .await
            .expect("story created");
        let mut ids = Vec::new();
        for title in ["Validate input", "Store input"] {
            let requirement = store
                .create_requirement(NewRequirement {
                    user_story_id: story.id,
                    acceptance_criteria_id: None,
                    title: title.to_string(),
                    description: None,
                    priority: Priority::new(2).expect("priority"),
                    requirement_type: RequirementType::Functional,
                    creator_id: user.id,
                    assignee_id: None,
                })
                .await
                .expect("requirement created");
            ids.push(requirement.id);
        }

        let relationship = NewRelationship {
            source_requirement_id: ids[0],
            target_requirement_id: ids[1],
            relationship_type: RelationshipType::DependsOn,
            created_by: user.id,
        };
        store
            .create_relationship(relationship.clone())
            .await
            .expect("first relationship");
        let err = store
            .create_relationship(relationship)
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn steering_documents_link_and_unlink() {
        let (store, user, epic) = store_with_epic("body").await;
        let document = store
            .create_steering_document(NewSteeringDocument {
                title: "Security baseline".to_string(),
                description: Some("All input is validated".to_string()),
                creator_id: user.id,
            })
            .await
            .expect("document created");

        store
            .link_steering_document(document.id, epic.id)
            .await
            .expect("linked");
        let linked = store
            .list_epic_steering_documents(epic.id)
            .await
            .expect("linked documents");
        assert_eq!(linked.len(), 1);

        store
            .unlink_steering_document(document.id, epic.id)
            .await
            .expect("unlinked");
        let err = store
            .unlink_steering_document(document.id, epic.id)
            .await
            .expect_err("second unlink fails");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn only_creator_or_admin_updates_steering_documents() {
        let (store, user, _) = store_with_epic("body").await;
        let document = store
            .create_steering_document(NewSteeringDocument {
                title: "Security baseline".to_string(),
                description: None,
                creator_id: user.id,
            })
            .await
            .expect("document created");
        let stranger = AuthenticatedUser::new("bob", UserRole::User);

        let err = store
            .update_steering_document(
                document.id,
                SteeringDocumentChanges {
                    title: Some("Renamed".to_string()),
                    description: None,
                },
                &stranger,
            )
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn search_matches_reference_title_and_description() {
        let (store, _, _) = store_with_epic("Collect the email address").await;

        let query = SearchQuery {
            query: "EMAIL".to_string(),
            kinds: vec![],
            pagination: Pagination::default(),
        };
        let page = store.search(&query).await.expect("search");
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].reference_id, "EP-001");

        let query = SearchQuery {
            query: "email".to_string(),
            kinds: vec![EntityKind::Requirement],
            pagination: Pagination::default(),
        };
        assert_eq!(store.search(&query).await.expect("search").total_count, 0);
    }

    #[tokio::test]
    async fn users_resolve_by_id_or_username() {
        let (store, user, _) = store_with_epic("body").await;

        let by_name = store.find_user("alice").await.expect("by name");
        let by_id = store.find_user(&user.id.to_string()).await.expect("by id");
        assert_eq!(by_name, by_id);
        assert!(store.find_user("mallory").await.is_err());
    }
}
