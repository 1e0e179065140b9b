use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::{
    seed::bootstrap_skills,
    skill::{GoalSkill, MetaSkill, Skill, SkillBody, SkillId, SkillKind, SkillStats},
    thresholds::ThresholdConfig,
};

/// Errors surfaced by the skill registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkillError {
    /// No skill with that id.
    #[error("skill not found: {0}")]
    NotFound(SkillId),
    /// A skill with that id is already registered.
    #[error("skill already registered: {0}")]
    Duplicate(SkillId),
    /// Archived skills are read-only.
    #[error("skill is archived: {0}")]
    Archived(SkillId),
    /// Operation requires a different skill shape.
    #[error("skill {id} is a {actual:?} skill, expected {expected:?}")]
    WrongKind {
        /// Skill id.
        id: SkillId,
        /// Shape the operation needs.
        expected: SkillKind,
        /// Shape found.
        actual: SkillKind,
    },
}

/// Thread-safe skill registry preserving registration order.
///
/// Each write replaces one record under the write lock, so readers never observe a
/// half-updated skill.
#[derive(Debug, Default, Clone)]
pub struct SkillStore {
    skills: Arc<RwLock<IndexMap<SkillId, Skill>>>,
}

impl SkillStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the bootstrap skill set.
    #[must_use]
    pub fn bootstrap() -> Self {
        let store = Self::new();
        for skill in bootstrap_skills() {
            // Seed ids are unique by construction.
            let _ = store.register(skill);
        }
        store
    }

    /// Registers a new skill, assigning its registration ordinal.
    pub fn register(&self, mut skill: Skill) -> Result<SkillId, SkillError> {
        let mut guard = self.skills.write();
        if guard.contains_key(&skill.id) {
            return Err(SkillError::Duplicate(skill.id));
        }
        skill.ordinal = guard.len() as u64;
        let id = skill.id.clone();
        debug!(skill = %id, kind = ?skill.kind(), "skill registered");
        guard.insert(id.clone(), skill);
        Ok(id)
    }

    /// Retrieves a skill by id.
    #[must_use]
    pub fn get(&self, id: &SkillId) -> Option<Skill> {
        self.skills.read().get(id).cloned()
    }

    /// Number of registered skills, archived included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }

    /// Snapshot of every skill in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Skill> {
        self.skills.read().values().cloned().collect()
    }

    /// Active rule skills in registration order.
    #[must_use]
    pub fn active_rules(&self) -> Vec<Skill> {
        self.skills
            .read()
            .values()
            .filter(|skill| skill.is_active() && skill.kind() == SkillKind::Rule)
            .cloned()
            .collect()
    }

    /// Active experience skills.
    #[must_use]
    pub fn experiences(&self) -> Vec<Skill> {
        self.of_kind(SkillKind::Experience)
    }

    /// Latest active config skill's thresholds, or the defaults.
    #[must_use]
    pub fn thresholds(&self) -> ThresholdConfig {
        self.skills
            .read()
            .values()
            .rev()
            .filter(|skill| skill.is_active())
            .find_map(|skill| match &skill.body {
                SkillBody::Config(config) => Some(config.thresholds.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Latest active meta policy, or the defaults.
    #[must_use]
    pub fn meta_policy(&self) -> MetaSkill {
        self.skills
            .read()
            .values()
            .rev()
            .filter(|skill| skill.is_active())
            .find_map(|skill| match &skill.body {
                SkillBody::Meta(meta) => Some(meta.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Active goal for a product (case-insensitive).
    #[must_use]
    pub fn goal_for(&self, product: &str) -> Option<GoalSkill> {
        self.skills
            .read()
            .values()
            .filter(|skill| skill.is_active())
            .find_map(|skill| match &skill.body {
                SkillBody::Goal(goal) if goal.product.eq_ignore_ascii_case(product) => {
                    Some(goal.clone())
                }
                _ => None,
            })
    }

    /// Every active goal.
    #[must_use]
    pub fn goals(&self) -> Vec<GoalSkill> {
        self.skills
            .read()
            .values()
            .filter(|skill| skill.is_active())
            .filter_map(|skill| match &skill.body {
                SkillBody::Goal(goal) => Some(goal.clone()),
                _ => None,
            })
            .collect()
    }

    /// Applies a configuration edit, bumping the version.
    pub fn edit<F>(&self, id: &SkillId, edit: F) -> Result<Skill, SkillError>
    where
        F: FnOnce(&mut Skill),
    {
        let mut guard = self.skills.write();
        let skill = guard
            .get_mut(id)
            .ok_or_else(|| SkillError::NotFound(id.clone()))?;
        if skill.archived {
            return Err(SkillError::Archived(id.clone()));
        }
        edit(skill);
        skill.version += 1;
        skill.updated_at = Utc::now();
        Ok(skill.clone())
    }

    /// Enables or disables a skill. No-op (and no version bump) when unchanged.
    pub fn set_enabled(&self, id: &SkillId, enabled: bool) -> Result<Skill, SkillError> {
        let current = self.get(id).ok_or_else(|| SkillError::NotFound(id.clone()))?;
        if current.enabled == enabled {
            return Ok(current);
        }
        self.edit(id, |skill| skill.enabled = enabled)
    }

    /// Archives a skill; archived skills are kept but never match.
    pub fn archive(&self, id: &SkillId) -> Result<Skill, SkillError> {
        let mut guard = self.skills.write();
        let skill = guard
            .get_mut(id)
            .ok_or_else(|| SkillError::NotFound(id.clone()))?;
        if !skill.archived {
            skill.archived = true;
            skill.version += 1;
            skill.updated_at = Utc::now();
        }
        Ok(skill.clone())
    }

    /// Updates rolling counters without bumping the configuration version.
    pub fn update_stats<F>(&self, id: &SkillId, update: F) -> Result<SkillStats, SkillError>
    where
        F: FnOnce(&mut SkillStats),
    {
        let mut guard = self.skills.write();
        let skill = guard
            .get_mut(id)
            .ok_or_else(|| SkillError::NotFound(id.clone()))?;
        update(&mut skill.stats);
        Ok(skill.stats)
    }

    fn of_kind(&self, kind: SkillKind) -> Vec<Skill> {
        self.skills
            .read()
            .values()
            .filter(|skill| skill.is_active() && skill.kind() == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::{ConfigSkill, RuleSkill};

    #[test]
    fn registration_assigns_ordinals_and_rejects_duplicates() {
        let store = SkillStore::new();
        store
            .register(Skill::rule("a", "a", RuleSkill::default()))
            .unwrap();
        store
            .register(Skill::rule("b", "b", RuleSkill::default()))
            .unwrap();
        assert_eq!(store.get(&"b".into()).unwrap().ordinal, 1);
        assert_eq!(
            store.register(Skill::rule("a", "a", RuleSkill::default())),
            Err(SkillError::Duplicate("a".into()))
        );
    }

    #[test]
    fn edits_bump_version_but_stats_do_not() {
        let store = SkillStore::new();
        let id = store
            .register(Skill::rule("a", "a", RuleSkill::default()))
            .unwrap();
        store.set_enabled(&id, false).unwrap();
        store.set_enabled(&id, false).unwrap();
        assert_eq!(store.get(&id).unwrap().version, 2);
        store.update_stats(&id, |stats| stats.correct += 1).unwrap();
        let skill = store.get(&id).unwrap();
        assert_eq!(skill.version, 2);
        assert_eq!(skill.stats.correct, 1);
        assert!(store.active_rules().is_empty());
    }

    #[test]
    fn archived_skills_are_kept_and_frozen() {
        let store = SkillStore::new();
        let id = store
            .register(Skill::rule("a", "a", RuleSkill::default()))
            .unwrap();
        store.archive(&id).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.edit(&id, |skill| skill.priority = 5).unwrap_err(),
            SkillError::Archived(id)
        );
    }

    #[test]
    fn latest_config_skill_wins() {
        let store = SkillStore::bootstrap();
        let mut thresholds = ThresholdConfig::default();
        thresholds.version = 7;
        thresholds.classifier.severe_roas = 0.3;
        store
            .register(Skill::new(
                "config.v7",
                "thresholds v7",
                SkillBody::Config(ConfigSkill { thresholds }),
            ))
            .unwrap();
        assert_eq!(store.thresholds().version, 7);
    }
}
