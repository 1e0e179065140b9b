use autopilot_skills::Verdict;
use autopilot_triage::Label;
use indexmap::IndexMap;
use uuid::Uuid;

/// What one cycle concluded about an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityState {
    /// Screener verdict.
    pub verdict: Verdict,
    /// Classifier label, when classified.
    pub label: Option<Label>,
}

impl EntityState {
    fn severity(self) -> u8 {
        match (self.verdict, self.label) {
            (_, Some(Label::LossSevere)) => 3,
            (_, Some(label)) if label.is_loss() => 2,
            (Verdict::NeedsDecision, _) => 1,
            _ => 0,
        }
    }
}

/// Verdicts and labels of one cycle, replaced wholesale when the next cycle ends.
#[derive(Debug, Clone, Default)]
pub struct CycleCache {
    cycle_id: Option<Uuid>,
    entities: IndexMap<String, EntityState>,
}

impl CycleCache {
    /// Empty cache for `cycle_id`.
    #[must_use]
    pub fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id: Some(cycle_id),
            entities: IndexMap::new(),
        }
    }

    /// Cycle the cache describes.
    #[must_use]
    pub const fn cycle_id(&self) -> Option<Uuid> {
        self.cycle_id
    }

    /// Records an entity's verdict.
    pub fn record(&mut self, entity_id: impl Into<String>, verdict: Verdict) {
        self.entities
            .insert(entity_id.into(), EntityState { verdict, label: None });
    }

    /// Attaches a label to a recorded entity.
    pub fn label(&mut self, entity_id: &str, label: Label) {
        if let Some(state) = self.entities.get_mut(entity_id) {
            state.label = Some(label);
        }
    }

    /// State of one entity.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.get(entity_id).copied()
    }

    /// Entities seen in both cycles whose state got worse since `previous`.
    #[must_use]
    pub fn escalated_since(&self, previous: &Self) -> Vec<String> {
        self.entities
            .iter()
            .filter(|(id, now)| {
                previous
                    .get(id)
                    .is_some_and(|before| now.severity() > before.severity())
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of entities recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
