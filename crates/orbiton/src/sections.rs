//! Progressive disclosure for long ledger content.
//!
//! A section wraps the full text of one ledger entry and shows a bounded
//! preview until the user expands it. Sections refer to entries by id only;
//! the ledger stays the single owner of the content it records.

use std::fmt;

use serde::{Deserialize, Serialize};
use session_store::{ExecutionId, MessageId};

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(pub u64);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    ToolOutput,
    AgentText,
}

impl SectionKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ToolOutput => "tool output",
            Self::AgentText => "agent text",
        }
    }
}

/// Ledger entry a section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryRef {
    Message(MessageId),
    ToolExecution(ExecutionId),
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(id) => id.fmt(f),
            Self::ToolExecution(id) => id.fmt(f),
        }
    }
}

/// Size above which content is collapsed behind a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpandThreshold {
    pub max_lines: usize,
    pub max_chars: usize,
}

impl Default for ExpandThreshold {
    fn default() -> Self {
        Self {
            max_lines: 5,
            max_chars: 100,
        }
    }
}

impl ExpandThreshold {
    #[must_use]
    pub fn exceeded_by(&self, content: &str) -> bool {
        content.lines().count() > self.max_lines || content.chars().count() > self.max_chars
    }

    /// First `max_lines` lines capped at `max_chars` characters, with a note
    /// of what was left out. Content within the threshold is returned as is.
    #[must_use]
    pub fn preview(&self, content: &str) -> String {
        if !self.exceeded_by(content) {
            return content.to_string();
        }

        let head = content
            .lines()
            .take(self.max_lines)
            .collect::<Vec<_>>()
            .join("\n");
        let head: String = head.chars().take(self.max_chars).collect();
        let total_chars = content.chars().count();
        let omitted = total_chars.saturating_sub(head.chars().count());
        let total_lines = content.lines().count();

        format!("{head}\n… [+{omitted} chars, {total_lines} lines]")
    }
}

#[derive(Debug, Clone)]
struct Section {
    id: SectionId,
    kind: SectionKind,
    owner: EntryRef,
    content: String,
    preview: String,
    expanded: bool,
}

/// What the display shows for a section right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionView {
    pub id: SectionId,
    pub kind: SectionKind,
    pub owner: EntryRef,
    pub expanded: bool,
    /// Full content when expanded, preview otherwise.
    pub text: String,
}

impl Section {
    fn view(&self) -> SectionView {
        SectionView {
            id: self.id,
            kind: self.kind,
            owner: self.owner,
            expanded: self.expanded,
            text: if self.expanded {
                self.content.clone()
            } else {
                self.preview.clone()
            },
        }
    }
}

/// Sections in registration order. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Default)]
pub struct SectionRegistry {
    sections: Vec<Section>,
    last_id: u64,
}

impl SectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collapsed section. Owner validity is the caller's concern.
    pub fn register(
        &mut self,
        kind: SectionKind,
        owner: EntryRef,
        content: impl Into<String>,
        threshold: &ExpandThreshold,
    ) -> SectionId {
        let content = content.into();
        self.last_id += 1;
        let id = SectionId(self.last_id);
        self.sections.push(Section {
            id,
            kind,
            owner,
            preview: threshold.preview(&content),
            content,
            expanded: false,
        });
        id
    }

    /// Flips a section and returns its new `expanded` state.
    pub fn toggle(&mut self, id: SectionId) -> Result<bool, SessionError> {
        let section = self
            .sections
            .iter_mut()
            .find(|section| section.id == id)
            .ok_or(SessionError::UnknownSection { id })?;
        section.expanded = !section.expanded;
        Ok(section.expanded)
    }

    pub fn get(&self, id: SectionId) -> Result<SectionView, SessionError> {
        self.sections
            .iter()
            .find(|section| section.id == id)
            .map(Section::view)
            .ok_or(SessionError::UnknownSection { id })
    }

    /// Section registered after `current`. Stays put at the end; with no
    /// cursor yields the first section.
    #[must_use]
    pub fn next_section_after(&self, current: Option<SectionId>) -> Option<SectionId> {
        match current {
            None => self.sections.first().map(|section| section.id),
            Some(current) => self
                .sections
                .iter()
                .find(|section| section.id > current)
                .map(|section| section.id)
                .or_else(|| self.last()),
        }
    }

    /// Section registered before `current`. Stays put at the start; with no
    /// cursor yields the last section.
    #[must_use]
    pub fn previous_section_before(&self, current: Option<SectionId>) -> Option<SectionId> {
        match current {
            None => self.last(),
            Some(current) => self
                .sections
                .iter()
                .rev()
                .find(|section| section.id < current)
                .map(|section| section.id)
                .or_else(|| self.sections.first().map(|section| section.id)),
        }
    }

    #[must_use]
    pub fn last(&self) -> Option<SectionId> {
        self.sections.last().map(|section| section.id)
    }

    #[must_use]
    pub fn for_owner(&self, owner: EntryRef) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|section| section.owner == owner)
            .map(|section| section.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = SectionView> + '_ {
        self.sections.iter().map(Section::view)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn owner(id: u64) -> EntryRef {
        EntryRef::ToolExecution(ExecutionId(id))
    }

    #[test]
    fn preview_of_long_result_is_bounded() {
        let threshold = ExpandThreshold {
            max_lines: 5,
            max_chars: 200,
        };
        let content = "x".repeat(500);

        let preview = threshold.preview(&content);

        assert!(preview.starts_with(&"x".repeat(200)));
        assert!(!preview.starts_with(&"x".repeat(201)));
        assert!(preview.ends_with("… [+300 chars, 1 lines]"));
    }

    #[test]
    fn preview_keeps_first_lines() {
        let threshold = ExpandThreshold {
            max_lines: 2,
            max_chars: 1_000,
        };

        let preview = threshold.preview("one\ntwo\nthree\nfour");

        assert_eq!(preview, "one\ntwo\n… [+11 chars, 4 lines]");
    }

    #[test]
    fn content_within_threshold_is_its_own_preview() {
        let threshold = ExpandThreshold::default();
        assert!(!threshold.exceeded_by("short"));
        assert_eq!(threshold.preview("short"), "short");
    }

    #[test]
    fn toggle_twice_restores_collapsed_state() {
        let threshold = ExpandThreshold::default();
        let mut registry = SectionRegistry::new();
        let content = "line\n".repeat(20);
        let id = registry.register(SectionKind::ToolOutput, owner(1), content.clone(), &threshold);

        let collapsed = registry.get(id).expect("section");
        assert!(!collapsed.expanded);
        assert_ne!(collapsed.text, content);

        assert!(registry.toggle(id).expect("toggle"));
        assert_eq!(registry.get(id).expect("section").text, content);

        assert!(!registry.toggle(id).expect("toggle"));
        assert_eq!(registry.get(id).expect("section"), collapsed);
    }

    #[test]
    fn short_content_reads_the_same_in_both_states() {
        let threshold = ExpandThreshold::default();
        let mut registry = SectionRegistry::new();
        let id = registry.register(SectionKind::AgentText, owner(1), "brief", &threshold);

        let collapsed = registry.get(id).expect("section").text;
        registry.toggle(id).expect("toggle");
        assert_eq!(registry.get(id).expect("section").text, collapsed);
    }

    #[test]
    fn unknown_section_is_not_found() {
        let mut registry = SectionRegistry::new();

        let error = registry.toggle(SectionId(9)).expect_err("unknown section");
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(registry.get(SectionId(9)).is_err());
    }

    #[test]
    fn navigation_does_not_wrap() {
        let threshold = ExpandThreshold::default();
        let mut registry = SectionRegistry::new();
        let first = registry.register(SectionKind::ToolOutput, owner(1), "a", &threshold);
        let second = registry.register(SectionKind::ToolOutput, owner(2), "b", &threshold);
        let third = registry.register(SectionKind::AgentText, owner(3), "c", &threshold);

        assert_eq!(registry.next_section_after(None), Some(first));
        assert_eq!(registry.next_section_after(Some(first)), Some(second));
        assert_eq!(registry.next_section_after(Some(third)), Some(third));

        assert_eq!(registry.previous_section_before(None), Some(third));
        assert_eq!(registry.previous_section_before(Some(second)), Some(first));
        assert_eq!(registry.previous_section_before(Some(first)), Some(first));
    }

    #[test]
    fn empty_registry_has_nowhere_to_go() {
        let registry = SectionRegistry::new();
        assert_eq!(registry.next_section_after(None), None);
        assert_eq!(registry.previous_section_before(Some(SectionId(1))), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn sections_are_found_by_owner() {
        let threshold = ExpandThreshold::default();
        let mut registry = SectionRegistry::new();
        let id = registry.register(SectionKind::ToolOutput, owner(7), "out", &threshold);

        assert_eq!(registry.for_owner(owner(7)), Some(id));
        assert_eq!(registry.for_owner(owner(8)), None);
        assert_eq!(registry.iter().map(|view| view.id).collect::<Vec<_>>(), vec![id]);
    }
}
