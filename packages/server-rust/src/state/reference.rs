//! Reference data: the permanent in-process catalog of item, skill, and
//! entity definitions.
//!
//! Built once at startup from the built-in catalog (optionally overlaid
//! with rows from the database) and shared as `Arc<ReferenceData>`.
//! Never mutated afterwards, so no guard is needed.

use std::collections::HashMap;

use tilefall_core::defs::{
    builtin_entities, builtin_items, builtin_skills, EntityDef, ItemDef, SkillDef,
};
use tilefall_core::skills::SkillType;

/// Immutable definition catalog.
pub struct ReferenceData {
    items_by_id: HashMap<u32, ItemDef>,
    item_ids_by_name: HashMap<String, u32>,
    skills: HashMap<SkillType, SkillDef>,
    entities_by_id: HashMap<u32, EntityDef>,
    entity_ids_by_name: HashMap<String, u32>,
}

impl ReferenceData {
    /// Builds the catalog from explicit definition lists.
    #[must_use]
    pub fn from_parts(items: Vec<ItemDef>, skills: Vec<SkillDef>, entities: Vec<EntityDef>) -> Self {
        let item_ids_by_name = items.iter().map(|i| (i.name.clone(), i.id)).collect();
        let entity_ids_by_name = entities.iter().map(|e| (e.name.clone(), e.id)).collect();
        Self {
            items_by_id: items.into_iter().map(|i| (i.id, i)).collect(),
            item_ids_by_name,
            skills: skills.into_iter().map(|s| (s.skill, s)).collect(),
            entities_by_id: entities.into_iter().map(|e| (e.id, e)).collect(),
            entity_ids_by_name,
        }
    }

    /// Builds the catalog from the built-in definitions.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_parts(builtin_items(), builtin_skills(), builtin_entities())
    }

    #[must_use]
    pub fn item(&self, id: u32) -> Option<&ItemDef> {
        self.items_by_id.get(&id)
    }

    #[must_use]
    pub fn item_by_name(&self, name: &str) -> Option<&ItemDef> {
        self.item_ids_by_name.get(name).and_then(|id| self.item(*id))
    }

    /// The XP-curve multiplier for a skill; 1.0 when undeclared.
    #[must_use]
    pub fn xp_multiplier(&self, skill: SkillType) -> f64 {
        self.skills.get(&skill).map_or(1.0, |s| s.xp_multiplier)
    }

    #[must_use]
    pub fn entity(&self, id: u32) -> Option<&EntityDef> {
        self.entities_by_id.get(&id)
    }

    #[must_use]
    pub fn entity_by_name(&self, name: &str) -> Option<&EntityDef> {
        self.entity_ids_by_name
            .get(name)
            .and_then(|id| self.entity(*id))
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items_by_id.len()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities_by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_resolves_by_id_and_name() {
        let data = ReferenceData::builtin();
        let sword = data.item_by_name("bronze_sword").expect("catalog item");
        assert_eq!(data.item(sword.id).unwrap().name, "bronze_sword");

        let goblin = data.entity_by_name("GOBLIN").expect("catalog entity");
        assert_eq!(data.entity(goblin.id).unwrap().name, "GOBLIN");
    }

    #[test]
    fn unknown_lookups_return_none() {
        let data = ReferenceData::builtin();
        assert!(data.item(9999).is_none());
        assert!(data.item_by_name("excalibur").is_none());
        assert!(data.entity_by_name("DRAGON").is_none());
    }

    #[test]
    fn xp_multiplier_defaults_to_one() {
        let data = ReferenceData::from_parts(Vec::new(), Vec::new(), Vec::new());
        assert!((data.xp_multiplier(SkillType::Attack) - 1.0).abs() < f64::EPSILON);
    }
}
