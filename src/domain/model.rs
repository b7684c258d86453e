//! Planning artifacts and the identifiers used to address them.

use std::{fmt, sync::OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::anchors::InlineAnchor;
use crate::errors::ServiceError;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Epic,
    UserStory,
    AcceptanceCriteria,
    Requirement,
    SteeringDocument,
}

impl EntityKind {
    /// Kinds addressable through `requirements://` resource URIs and comments.
    pub const RESOURCE_KINDS: [EntityKind; 4] = [
        EntityKind::Epic,
        EntityKind::UserStory,
        EntityKind::AcceptanceCriteria,
        EntityKind::Requirement,
    ];

    pub fn reference_prefix(self) -> &'static str {
        match self {
            Self::Epic => "EP",
            Self::UserStory => "US",
            Self::AcceptanceCriteria => "AC",
            Self::Requirement => "REQ",
            Self::SteeringDocument => "STD",
        }
    }

    /// Path segment used in external URIs and REST routes.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Epic => "epics",
            Self::UserStory => "user-stories",
            Self::AcceptanceCriteria => "acceptance-criteria",
            Self::Requirement => "requirements",
            Self::SteeringDocument => "steering-documents",
        }
    }

    /// Scheme of the canonical `<scheme>://<reference>` URI.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::UserStory => "user_story",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::Requirement => "requirement",
            Self::SteeringDocument => "steering_document",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Epic => "Epic",
            Self::UserStory => "User story",
            Self::AcceptanceCriteria => "Acceptance criteria",
            Self::Requirement => "Requirement",
            Self::SteeringDocument => "Steering document",
        }
    }

    pub fn from_collection(segment: &str) -> Option<Self> {
        Self::RESOURCE_KINDS
            .into_iter()
            .find(|kind| kind.collection() == segment)
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Self::RESOURCE_KINDS
            .into_iter()
            .find(|kind| kind.scheme() == scheme)
    }

    pub fn from_reference(reference: &str) -> Option<Self> {
        let (prefix, _) = reference.split_once('-')?;
        [
            Self::Epic,
            Self::UserStory,
            Self::AcceptanceCriteria,
            Self::Requirement,
            Self::SteeringDocument,
        ]
        .into_iter()
        .find(|kind| kind.reference_prefix() == prefix)
    }

    pub fn format_reference(self, sequence: u64) -> String {
        format!("{}-{sequence:03}", self.reference_prefix())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(EP|US|AC|REQ|STD)-[0-9]+$").expect("valid reference regex"))
}

pub fn is_reference(value: &str) -> bool {
    reference_pattern().is_match(value)
}

/// A canonical identifier is the 36-character hyphenated UUID form.
pub fn parse_canonical_id(value: &str) -> Option<Uuid> {
    if value.len() != 36 {
        return None;
    }
    Uuid::parse_str(value).ok()
}

/// How a caller addressed an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityLookup {
    Id(Uuid),
    Reference(String),
}

impl EntityLookup {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(id) = parse_canonical_id(raw) {
            return Some(Self::Id(id));
        }
        is_reference(raw).then(|| Self::Reference(raw.to_string()))
    }
}

impl fmt::Display for EntityLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Reference(reference) => f.write_str(reference),
        }
    }
}

/// 1 = critical, 2 = high, 3 = medium, 4 = low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: i64) -> Result<Self, ServiceError> {
        match value {
            1..=4 => Ok(Self(value as u8)),
            _ => Err(ServiceError::validation("priority must be between 1 and 4")),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = ServiceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(i64::from(value))
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Lifecycle shared by epics and user stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Backlog,
    Draft,
    #[serde(rename = "In Progress")]
    InProgress,
    Done,
    Cancelled,
}

impl WorkflowStatus {
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "backlog" => Ok(Self::Backlog),
            "draft" => Ok(Self::Draft),
            "in progress" | "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(ServiceError::validation(
                "status must be one of: Backlog, Draft, In Progress, Done, Cancelled",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementStatus {
    Draft,
    Active,
    Obsolete,
}

impl RequirementStatus {
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "obsolete" => Ok(Self::Obsolete),
            _ => Err(ServiceError::validation(
                "status must be one of: Draft, Active, Obsolete",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementType {
    Functional,
    #[serde(rename = "Non-Functional")]
    NonFunctional,
    #[serde(rename = "Business Rule")]
    BusinessRule,
    Interface,
    Data,
}

impl RequirementType {
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ")
            .as_str()
        {
            "functional" => Ok(Self::Functional),
            "non functional" => Ok(Self::NonFunctional),
            "business rule" => Ok(Self::BusinessRule),
            "interface" => Ok(Self::Interface),
            "data" => Ok(Self::Data),
            _ => Err(ServiceError::validation(
                "type must be one of: Functional, Non-Functional, Business Rule, Interface, Data",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    DependsOn,
    Blocks,
    RelatesTo,
    ConflictsWith,
    DerivesFrom,
}

impl RelationshipType {
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "depends_on" => Ok(Self::DependsOn),
            "blocks" => Ok(Self::Blocks),
            "relates_to" => Ok(Self::RelatesTo),
            "conflicts_with" => Ok(Self::ConflictsWith),
            "derives_from" => Ok(Self::DerivesFrom),
            _ => Err(ServiceError::validation(
                "relationship type must be one of: depends_on, blocks, relates_to, conflicts_with, derives_from",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Administrator,
    User,
    Commenter,
}

impl UserRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Some(Self::Administrator),
            "user" => Some(Self::User),
            "commenter" => Some(Self::Commenter),
            _ => None,
        }
    }

    pub fn can_edit(self) -> bool {
        matches!(self, Self::Administrator | Self::User)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
}

impl AuthenticatedUser {
    pub fn new(username: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            role,
        }
    }

    pub fn require_editor(&self) -> Result<(), ServiceError> {
        if self.role.can_edit() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("role does not permit modifications"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: Uuid,
    pub reference_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: WorkflowStatus,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub id: Uuid,
    pub reference_id: String,
    pub epic_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: WorkflowStatus,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    pub id: Uuid,
    pub reference_id: String,
    pub user_story_id: Uuid,
    pub description: String,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: Uuid,
    pub reference_id: String,
    pub user_story_id: Uuid,
    pub acceptance_criteria_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: RequirementStatus,
    #[serde(rename = "type")]
    pub requirement_type: RequirementType,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementRelationship {
    pub id: Uuid,
    pub source_requirement_id: Uuid,
    pub target_requirement_id: Uuid,
    pub relationship_type: RelationshipType,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringDocument {
    pub id: Uuid,
    pub reference_id: String,
    pub title: String,
    pub description: Option<String>,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
    pub is_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<InlineAnchor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    pub is_active: bool,
}

/// Any planning artifact that can be read as a resource or carry comments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entity {
    Epic(Epic),
    UserStory(UserStory),
    AcceptanceCriteria(AcceptanceCriteria),
    Requirement(Requirement),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Epic(_) => EntityKind::Epic,
            Self::UserStory(_) => EntityKind::UserStory,
            Self::AcceptanceCriteria(_) => EntityKind::AcceptanceCriteria,
            Self::Requirement(_) => EntityKind::Requirement,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Epic(epic) => epic.id,
            Self::UserStory(story) => story.id,
            Self::AcceptanceCriteria(criteria) => criteria.id,
            Self::Requirement(requirement) => requirement.id,
        }
    }

    pub fn reference_id(&self) -> &str {
        match self {
            Self::Epic(epic) => &epic.reference_id,
            Self::UserStory(story) => &story.reference_id,
            Self::AcceptanceCriteria(criteria) => &criteria.reference_id,
            Self::Requirement(requirement) => &requirement.reference_id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Epic(epic) => &epic.title,
            Self::UserStory(story) => &story.title,
            Self::AcceptanceCriteria(criteria) => &criteria.description,
            Self::Requirement(requirement) => &requirement.title,
        }
    }

    /// Text that inline comment anchors point into.
    pub fn body(&self) -> &str {
        match self {
            Self::Epic(epic) => epic.description.as_deref().unwrap_or_default(),
            Self::UserStory(story) => story.description.as_deref().unwrap_or_default(),
            Self::AcceptanceCriteria(criteria) => &criteria.description,
            Self::Requirement(requirement) => requirement.description.as_deref().unwrap_or_default(),
        }
    }

    pub fn canonical_uri(&self) -> String {
        format!("{}://{}", self.kind().scheme(), self.reference_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Result<Self, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ServiceError::validation("limit must be between 1 and 100"));
        }
        Ok(Self {
            limit,
            offset: offset.unwrap_or(0),
        })
    }

    pub fn apply<T>(self, items: Vec<T>) -> Page<T> {
        let total_count = items.len();
        let data = items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page {
            data,
            total_count,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Listing envelope shared by every entity collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_count: usize,
    pub limit: u32,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_match_the_closed_prefix_set() {
        assert!(is_reference("EP-001"));
        assert!(is_reference("REQ-42"));
        assert!(is_reference("STD-7"));
        assert!(!is_reference("EP-"));
        assert!(!is_reference("EP--1"));
        assert!(!is_reference("XX-1"));
        assert!(!is_reference("ep-1"));
        assert!(!is_reference("EP-٣"));
        assert!(!is_reference("REQ-１２"));
    }

    #[test]
    fn lookup_distinguishes_ids_from_references() {
        let id = Uuid::new_v4();
        assert_eq!(
            EntityLookup::parse(&id.to_string()),
            Some(EntityLookup::Id(id))
        );
        assert_eq!(
            EntityLookup::parse("US-003"),
            Some(EntityLookup::Reference("US-003".to_string()))
        );
        assert_eq!(EntityLookup::parse(&id.simple().to_string()), None);
        assert_eq!(EntityLookup::parse("story three"), None);
    }

    #[test]
    fn references_are_zero_padded() {
        assert_eq!(EntityKind::Epic.format_reference(1), "EP-001");
        assert_eq!(EntityKind::Requirement.format_reference(1234), "REQ-1234");
        assert_eq!(EntityKind::from_reference("AC-010"), Some(EntityKind::AcceptanceCriteria));
    }

    #[test]
    fn collection_and_scheme_names_round_trip() {
        for kind in EntityKind::RESOURCE_KINDS {
            assert_eq!(EntityKind::from_collection(kind.collection()), Some(kind));
            assert_eq!(EntityKind::from_scheme(kind.scheme()), Some(kind));
        }
        assert_eq!(EntityKind::from_collection("steering-documents"), None);
    }

    #[test]
    fn priority_rejects_out_of_range_values() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(5).is_err());
        assert_eq!(Priority::new(2).map(Priority::value), Ok(2));
    }

    #[test]
    fn pagination_bounds_are_enforced() {
        assert!(Pagination::new(Some(0), None).is_err());
        assert!(Pagination::new(Some(101), None).is_err());

        let page = Pagination::new(Some(2), Some(1))
            .expect("valid pagination")
            .apply(vec![1, 2, 3, 4]);
        assert_eq!(page.data, vec![2, 3]);
        assert_eq!(page.total_count, 4);
    }

    #[test]
    fn workflow_status_accepts_spaced_and_snake_forms() {
        assert_eq!(WorkflowStatus::parse("In Progress"), Ok(WorkflowStatus::InProgress));
        assert_eq!(WorkflowStatus::parse("in_progress"), Ok(WorkflowStatus::InProgress));
        assert!(WorkflowStatus::parse("started").is_err());
    }
}
