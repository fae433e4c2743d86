//! The top-level handle composing every store plus shared services.
//!
//! Mirrors the teacher's top-level database struct: one object owning all
//! storage and exposing `new`/a handful of store accessors, constructed
//! once per process and shared behind an `Arc` by callers.
use crate::config::MemoGardenConfig;
use crate::context::ContextSubsystem;
use crate::entity::EntityStore;
use crate::events::EventBus;
use crate::soil::FactStore;
use crate::transaction::{ConsistencyReport, TransactionCoordinator};

/// Owns every store and shared service the verb dispatcher operates on.
pub struct MemoGarden {
    pub config: MemoGardenConfig,
    pub entities: EntityStore,
    pub facts: FactStore,
    pub context: ContextSubsystem,
    pub events: EventBus,
    pub transactions: TransactionCoordinator,
}

impl MemoGarden {
    pub fn new(config: MemoGardenConfig) -> Self {
        let entities = EntityStore::new(config.baseline_entity_types.clone());
        let facts = FactStore::new(config.baseline_item_types.clone());
        Self {
            config,
            entities,
            facts,
            context: ContextSubsystem::new(),
            events: EventBus::new(),
            transactions: TransactionCoordinator::new(),
        }
    }

    /// Run the startup consistency sweep. Call once before serving traffic.
    pub fn init(&self) -> ConsistencyReport {
        self.transactions.init_system(&self.entities, &self.facts)
    }

    pub fn status(&self) -> ConsistencyReport {
        self.transactions.check_consistency(&self.entities, &self.facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_garden_starts_normal() {
        let garden = MemoGarden::new(MemoGardenConfig::default());
        assert_eq!(garden.init().status, crate::transaction::SystemStatus::Normal);
    }
}
