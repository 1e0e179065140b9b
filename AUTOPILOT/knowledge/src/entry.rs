use std::sync::Arc;

use autopilot_skills::SkillId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Origin of a knowledge entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    /// Derived from an audit finding.
    Finding,
    /// Lesson learned by reflection.
    Lesson,
    /// Record of an applied skill mutation.
    Mutation,
    /// Suggested change that was not applied.
    Proposal,
}

impl KnowledgeKind {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Finding => "finding",
            Self::Lesson => "lesson",
            Self::Mutation => "mutation",
            Self::Proposal => "proposal",
        }
    }
}

/// A decayable fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Identifier.
    pub id: String,
    /// Topic used for deduplication and lookup.
    pub topic: String,
    /// Origin.
    pub kind: KnowledgeKind,
    /// The fact itself.
    pub content: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// How often the fact was re-observed.
    pub validations: u32,
    /// Surfaced to decision context.
    pub high_priority: bool,
    /// Archived entries are kept but no longer surfaced.
    pub archived: bool,
    /// Supporting statistics.
    pub evidence: Value,
    /// Skill the fact is about.
    pub skill_id: Option<SkillId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last validation (creation counts).
    pub last_validated: DateTime<Utc>,
    /// Last decay step applied.
    pub last_decayed: Option<DateTime<Utc>>,
}

impl KnowledgeEntry {
    /// Fresh entry.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        kind: KnowledgeKind,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("kn-{}", Uuid::new_v4()),
            topic: topic.into(),
            kind,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            validations: 0,
            high_priority: false,
            archived: false,
            evidence: Value::Null,
            skill_id: None,
            created_at: now,
            last_validated: now,
            last_decayed: None,
        }
    }

    /// Attaches evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }

    /// Attributes the entry to a skill.
    #[must_use]
    pub fn with_skill(mut self, skill_id: Option<SkillId>) -> Self {
        self.skill_id = skill_id;
        self
    }

    /// Backdates the last validation.
    #[must_use]
    pub const fn validated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_validated = at;
        self
    }
}

/// Filter for [`KnowledgeBase::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeQuery {
    /// Topic prefix.
    pub topic_prefix: Option<String>,
    /// Restrict to one kind.
    pub kind: Option<KnowledgeKind>,
    /// Include archived entries.
    pub include_archived: bool,
    /// Minimum confidence.
    pub min_confidence: f64,
}

impl KnowledgeQuery {
    /// Entries whose topic starts with `prefix`.
    #[must_use]
    pub fn topic(prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Restricts to one kind.
    #[must_use]
    pub const fn of_kind(mut self, kind: KnowledgeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn admits(&self, entry: &KnowledgeEntry) -> bool {
        (self.include_archived || !entry.archived)
            && entry.confidence >= self.min_confidence
            && self.kind.map_or(true, |kind| kind == entry.kind)
            && self
                .topic_prefix
                .as_deref()
                .map_or(true, |prefix| entry.topic.starts_with(prefix))
    }
}

/// Order-preserving store of knowledge entries.
///
/// Readable by anyone; only the librarian in this crate mutates it.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Arc<RwLock<IndexMap<String, KnowledgeEntry>>>,
}

impl KnowledgeBase {
    /// Empty base.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<KnowledgeEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Live entry for a topic.
    #[must_use]
    pub fn by_topic(&self, topic: &str) -> Option<KnowledgeEntry> {
        self.entries
            .read()
            .values()
            .find(|entry| entry.topic == topic && !entry.archived)
            .cloned()
    }

    /// Entries matching a query, in insertion order.
    #[must_use]
    pub fn query(&self, query: &KnowledgeQuery) -> Vec<KnowledgeEntry> {
        self.entries
            .read()
            .values()
            .filter(|entry| query.admits(entry))
            .cloned()
            .collect()
    }

    /// Promoted, live entries, most confident first.
    #[must_use]
    pub fn high_priority(&self) -> Vec<KnowledgeEntry> {
        let mut out: Vec<KnowledgeEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.high_priority && !entry.archived)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out
    }

    /// Every entry.
    #[must_use]
    pub fn all(&self) -> Vec<KnowledgeEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of entries, archived included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the base is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn insert(&self, entry: KnowledgeEntry) -> String {
        let id = entry.id.clone();
        self.entries.write().insert(id.clone(), entry);
        id
    }

    pub(crate) fn update<F, R>(&self, id: &str, update: F) -> Option<R>
    where
        F: FnOnce(&mut KnowledgeEntry) -> R,
    {
        self.entries.write().get_mut(id).map(update)
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_by_prefix_kind_and_archive() {
        let base = KnowledgeBase::new();
        base.insert(KnowledgeEntry::new("audit.fn.r1", KnowledgeKind::Finding, "missed loss", 0.6));
        let lesson = base.insert(KnowledgeEntry::new(
            "lesson.pause",
            KnowledgeKind::Lesson,
            "pausing weekend dips is premature",
            0.7,
        ));
        base.update(&lesson, |entry| entry.archived = true);

        assert_eq!(base.query(&KnowledgeQuery::topic("audit.")).len(), 1);
        assert!(base
            .query(&KnowledgeQuery::default().of_kind(KnowledgeKind::Lesson))
            .is_empty());
        let archived = KnowledgeQuery {
            include_archived: true,
            ..KnowledgeQuery::default()
        };
        assert_eq!(base.query(&archived).len(), 2);
        assert!(base.by_topic("lesson.pause").is_none());
    }
}
