//! Inline comment anchors.
//!
//! An anchor ties a comment to `linked_text` at character offsets
//! `[start, end)` of an entity body. Offsets count Unicode scalar values, not
//! bytes. While an anchor is visible, `body[start..end] == linked_text`.
//! When the body changes, [`InlineAnchor::reconcile`] relocates the anchor or
//! hides it. Anchors are never dropped by reconciliation.

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAnchor {
    pub linked_text: String,
    #[serde(rename = "text_position_start")]
    pub start: usize,
    #[serde(rename = "text_position_end")]
    pub end: usize,
    pub is_visible: bool,
}

/// Outcome of reconciling one anchor against a new body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorChange {
    Unchanged,
    Moved { from: usize, to: usize },
    Hidden,
    Restored,
}

/// Raw inline fields as submitted by a caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InlineSelection {
    pub linked_text: Option<String>,
    pub text_position_start: Option<i64>,
    pub text_position_end: Option<i64>,
}

impl InlineSelection {
    pub fn is_empty(&self) -> bool {
        self.linked_text.is_none()
            && self.text_position_start.is_none()
            && self.text_position_end.is_none()
    }

    /// Validates the selection against `body`. Returns `None` when no inline
    /// field was supplied at all.
    pub fn into_anchor(self, body: &str) -> Result<Option<InlineAnchor>, ServiceError> {
        if self.is_empty() {
            return Ok(None);
        }

        let (Some(linked_text), Some(start), Some(end)) = (
            self.linked_text,
            self.text_position_start,
            self.text_position_end,
        ) else {
            return Err(ServiceError::InvalidInlineData);
        };

        InlineAnchor::create(body, linked_text, start, end).map(Some)
    }
}

impl InlineAnchor {
    pub fn create(
        body: &str,
        linked_text: String,
        start: i64,
        end: i64,
    ) -> Result<Self, ServiceError> {
        if linked_text.is_empty() {
            return Err(ServiceError::EmptyLinkedText);
        }

        let (Ok(start), Ok(end)) = (usize::try_from(start), usize::try_from(end)) else {
            return Err(ServiceError::InvalidTextPosition);
        };
        if start > end || end > body.chars().count() {
            return Err(ServiceError::InvalidTextPosition);
        }

        if char_slice(body, start, end) != Some(linked_text.as_str()) {
            return Err(ServiceError::InvalidTextPosition);
        }

        Ok(Self {
            linked_text,
            start,
            end,
            is_visible: true,
        })
    }

    /// Holds for every visible anchor after creation or reconciliation.
    pub fn matches(&self, body: &str) -> bool {
        char_slice(body, self.start, self.end) == Some(self.linked_text.as_str())
    }

    pub fn reconcile(&mut self, body: &str) -> AnchorChange {
        if self.matches(body) {
            if self.is_visible {
                return AnchorChange::Unchanged;
            }
            self.is_visible = true;
            return AnchorChange::Restored;
        }

        let best = occurrences(body, &self.linked_text)
            .into_iter()
            .min_by_key(|position| (position.abs_diff(self.start), *position));

        match best {
            Some(position) => {
                let from = self.start;
                let width = self.linked_text.chars().count();
                self.start = position;
                self.end = position + width;
                self.is_visible = true;
                AnchorChange::Moved { from, to: position }
            }
            None => {
                // stored positions are kept for audit
                self.is_visible = false;
                AnchorChange::Hidden
            }
        }
    }
}

fn byte_offset(body: &str, char_index: usize) -> Option<usize> {
    body.char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(body.len()))
        .nth(char_index)
}

fn char_slice(body: &str, start: usize, end: usize) -> Option<&str> {
    let from = byte_offset(body, start)?;
    let to = byte_offset(body, end)?;
    body.get(from..to)
}

/// Character offsets of every (possibly overlapping) occurrence of `needle`.
fn occurrences(body: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }

    body.char_indices()
        .enumerate()
        .filter(|(_, (byte, _))| body[*byte..].starts_with(needle))
        .map(|(position, _)| position)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(body: &str, text: &str, start: i64, end: i64) -> InlineAnchor {
        InlineAnchor::create(body, text.to_string(), start, end).expect("valid anchor")
    }

    #[test]
    fn keeps_anchor_when_text_stays_at_same_offset() {
        let mut anchor = anchor("Please validate email field", "validate email", 7, 21);

        let change = anchor.reconcile("Kindly validate email field today");

        assert_eq!(change, AnchorChange::Unchanged);
        assert!(anchor.is_visible);
        assert_eq!((anchor.start, anchor.end), (7, 21));
    }

    #[test]
    fn moves_anchor_to_single_new_occurrence() {
        let mut anchor = anchor("Please validate email field", "validate email", 7, 21);

        let change = anchor.reconcile("We must validate email field");

        assert_eq!(change, AnchorChange::Moved { from: 7, to: 8 });
        assert_eq!((anchor.start, anchor.end), (8, 22));
        assert!(anchor.matches("We must validate email field"));
    }

    #[test]
    fn hides_anchor_and_keeps_positions_when_text_disappears() {
        let mut anchor = anchor("Please validate email field", "validate email", 7, 21);

        let change = anchor.reconcile("Please check the phone field");

        assert_eq!(change, AnchorChange::Hidden);
        assert!(!anchor.is_visible);
        assert_eq!((anchor.start, anchor.end), (7, 21));
    }

    #[test]
    fn restores_hidden_anchor_when_text_returns() {
        let mut anchor = anchor("Please validate email field", "validate email", 7, 21);
        anchor.reconcile("Please check the phone field");

        let change = anchor.reconcile("Please validate email field");

        assert_eq!(change, AnchorChange::Restored);
        assert!(anchor.is_visible);
    }

    #[test]
    fn picks_occurrence_closest_to_previous_start() {
        let mut anchor = anchor("xxxxxab", "ab", 5, 7);

        anchor.reconcile("ab ab ab");

        assert_eq!((anchor.start, anchor.end), (6, 8));
    }

    #[test]
    fn prefers_earlier_occurrence_on_equal_distance() {
        let mut anchor = anchor("xxab", "ab", 2, 4);

        anchor.reconcile("ab--ab");

        assert_eq!((anchor.start, anchor.end), (0, 2));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let body = "Prüfe die E-Mail-Adresse";
        let mut anchor = anchor(body, "E-Mail", 10, 16);

        anchor.reconcile("Bitte prüfe die E-Mail-Adresse");

        assert_eq!((anchor.start, anchor.end), (16, 22));
        assert!(anchor.matches("Bitte prüfe die E-Mail-Adresse"));
    }

    #[test]
    fn create_rejects_empty_linked_text() {
        let err = InlineAnchor::create("body", String::new(), 0, 0).expect_err("must fail");
        assert_eq!(err, ServiceError::EmptyLinkedText);
    }

    #[test]
    fn create_rejects_out_of_range_and_mismatched_positions() {
        for (start, end) in [(-1, 3), (3, 2), (0, 99)] {
            let err = InlineAnchor::create("body", "bo".to_string(), start, end)
                .expect_err("must fail");
            assert_eq!(err, ServiceError::InvalidTextPosition);
        }

        let err = InlineAnchor::create("body", "dy".to_string(), 0, 2).expect_err("must fail");
        assert_eq!(err, ServiceError::InvalidTextPosition);
    }

    #[test]
    fn partial_selection_is_invalid_inline_data() {
        let selection = InlineSelection {
            linked_text: Some("body".to_string()),
            text_position_start: Some(0),
            text_position_end: None,
        };

        let err = selection.into_anchor("body").expect_err("must fail");
        assert_eq!(err, ServiceError::InvalidInlineData);
    }

    #[test]
    fn empty_selection_is_a_plain_comment() {
        let anchor = InlineSelection::default()
            .into_anchor("body")
            .expect("no inline data");
        assert!(anchor.is_none());
    }
}
