//! Skills manager: per-player levels and experience.
//!
//! Skills live in the `player:{id}:skills` hash, one field per skill name.
//! Levels are always recomputed from total experience through the XP curve
//! (with the skill's multiplier), never incremented directly.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tilefall_core::skills::{level_for_xp, xp_for_level, SkillType};

use crate::cache::{keys, CacheEngine, DirtyCategory};
use crate::db::{DurableStore, SkillRow};

use super::reference::ReferenceData;

const F_HYDRATED: &str = "_hydrated";

/// One skill's stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub level: u32,
    pub experience: u64,
}

/// Outcome of one experience award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpAward {
    pub skill: SkillType,
    pub previous_level: u32,
    pub current_level: u32,
    pub xp_gained: u64,
    pub experience: u64,
    pub leveled_up: bool,
}

fn decode_skills(map: &HashMap<String, String>) -> Vec<(SkillType, SkillRecord)> {
    let mut skills: Vec<(SkillType, SkillRecord)> = map
        .iter()
        .filter(|(field, _)| !field.starts_with('_'))
        .filter_map(|(field, value)| {
            let skill = field.parse().ok()?;
            let record = serde_json::from_str(value).ok()?;
            Some((skill, record))
        })
        .collect();
    skills.sort_unstable_by_key(|(skill, _)| skill.as_str());
    skills
}

fn encode_record(record: &SkillRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// Façade over the cache for `player:{id}:skills`.
pub struct SkillsManager {
    cache: Arc<dyn CacheEngine>,
    store: Arc<dyn DurableStore>,
    reference: Arc<ReferenceData>,
}

impl SkillsManager {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        reference: Arc<ReferenceData>,
    ) -> Self {
        Self {
            cache,
            store,
            reference,
        }
    }

    /// Reads all skills, hydrating from the durable store on a miss.
    pub async fn get_all_skills(
        &self,
        player_id: i64,
    ) -> anyhow::Result<Vec<(SkillType, SkillRecord)>> {
        let key = keys::player_skills(player_id);
        let map = self.cache.hgetall(&key).await?;
        if !map.is_empty() {
            return Ok(decode_skills(&map));
        }
        self.hydrate(player_id).await?;
        let map = self.cache.hgetall(&key).await?;
        Ok(decode_skills(&map))
    }

    /// Reads one skill. `None` when the player has never been granted it.
    pub async fn get_skill(
        &self,
        player_id: i64,
        skill: SkillType,
    ) -> anyhow::Result<Option<SkillRecord>> {
        Ok(self
            .get_all_skills(player_id)
            .await?
            .into_iter()
            .find(|(s, _)| *s == skill)
            .map(|(_, record)| record))
    }

    /// Grants every skill the player does not have yet at its starting
    /// level (hitpoints 10, everything else 1). Idempotent: existing
    /// progress is never reset.
    pub async fn grant_all(&self, player_id: i64) -> anyhow::Result<()> {
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let reference = Arc::clone(&self.reference);
        self.cache
            .update_hash(
                &keys::player_skills(player_id),
                Box::new(move |map| {
                    for skill in SkillType::ALL {
                        let field = skill.as_str();
                        if map.contains_key(field) {
                            continue;
                        }
                        let level = skill.starting_level();
                        let record = SkillRecord {
                            level,
                            experience: xp_for_level(level, reference.xp_multiplier(skill)),
                        };
                        map.insert(field.to_string(), encode_record(&record));
                    }
                    true
                }),
            )
            .await?;
        Ok(())
    }

    /// Adds experience to a skill and recomputes its level from the total.
    ///
    /// Zero-amount awards return `None` and change nothing. The skill is
    /// granted at its starting level first if missing.
    pub async fn add_experience(
        &self,
        player_id: i64,
        skill: SkillType,
        amount: u64,
    ) -> anyhow::Result<Option<XpAward>> {
        if amount == 0 {
            return Ok(None);
        }
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let multiplier = self.reference.xp_multiplier(skill);
        let cell = Arc::new(parking_lot::Mutex::new(None::<XpAward>));
        let out = Arc::clone(&cell);
        self.cache
            .update_hash(
                &keys::player_skills(player_id),
                Box::new(move |map| {
                    let field = skill.as_str();
                    let previous: SkillRecord = map
                        .get(field)
                        .and_then(|v| serde_json::from_str(v).ok())
                        .unwrap_or_else(|| {
                            let level = skill.starting_level();
                            SkillRecord {
                                level,
                                experience: xp_for_level(level, multiplier),
                            }
                        });

                    let experience = previous.experience.saturating_add(amount);
                    let current_level = level_for_xp(experience, multiplier);
                    let record = SkillRecord {
                        level: current_level,
                        experience,
                    };
                    map.insert(field.to_string(), encode_record(&record));
                    *out.lock() = Some(XpAward {
                        skill,
                        previous_level: previous.level,
                        current_level,
                        xp_gained: amount,
                        experience,
                        leveled_up: current_level > previous.level,
                    });
                    true
                }),
            )
            .await?;
        let award = *cell.lock();
        Ok(award)
    }

    /// Sum of all skill levels.
    pub async fn total_level(&self, player_id: i64) -> anyhow::Result<u32> {
        Ok(self
            .get_all_skills(player_id)
            .await?
            .iter()
            .map(|(_, record)| record.level)
            .sum())
    }

    /// Snapshot for the batch sync coordinator.
    pub async fn snapshot_rows(&self, player_id: i64) -> anyhow::Result<Vec<SkillRow>> {
        Ok(self
            .get_all_skills(player_id)
            .await?
            .into_iter()
            .map(|(skill, record)| SkillRow {
                player_id,
                skill: skill.as_str().to_string(),
                current_level: i32::try_from(record.level).unwrap_or(1),
                experience: i64::try_from(record.experience).unwrap_or(i64::MAX),
            })
            .collect())
    }

    /// Drops the hot skills from the cache (after logout sync).
    pub async fn clear(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache.del(&keys::player_skills(player_id)).await?;
        Ok(())
    }

    async fn ensure_hydrated(&self, player_id: i64) -> anyhow::Result<()> {
        let key = keys::player_skills(player_id);
        if self.cache.exists(&key).await? {
            return Ok(());
        }
        self.hydrate(player_id).await
    }

    async fn hydrate(&self, player_id: i64) -> anyhow::Result<()> {
        let rows = self.store.load_skills(player_id).await?;
        let mut fields = vec![(F_HYDRATED.to_string(), "1".to_string())];
        for row in rows {
            let Ok(skill) = row.skill.parse::<SkillType>() else {
                tracing::warn!(player_id, skill = %row.skill, "ignoring unknown skill row");
                continue;
            };
            let record = SkillRecord {
                level: u32::try_from(row.current_level.max(1)).unwrap_or(1),
                experience: u64::try_from(row.experience.max(0)).unwrap_or(0),
            };
            fields.push((skill.as_str().to_string(), encode_record(&record)));
        }
        self.cache.hset(&keys::player_skills(player_id), fields).await?;
        Ok(())
    }

    /// Marks the skills category dirty. Called before the mutation it
    /// covers, so a cancelled task can leave a spurious flag but never an
    /// unflagged change.
    async fn mark_dirty(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache
            .sadd(DirtyCategory::Skills.key(), &player_id.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tilefall_core::skills::HITPOINTS_START_LEVEL;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::NullStore;

    fn manager() -> SkillsManager {
        SkillsManager::new(
            Arc::new(MemoryCache::new()),
            Arc::new(NullStore),
            Arc::new(ReferenceData::builtin()),
        )
    }

    #[tokio::test]
    async fn grant_all_sets_starting_levels() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();

        let skills = mgr.get_all_skills(1).await.unwrap();
        assert_eq!(skills.len(), SkillType::ALL.len());
        for (skill, record) in skills {
            if skill == SkillType::Hitpoints {
                assert_eq!(record.level, HITPOINTS_START_LEVEL);
                assert!(record.experience > 0, "level 10 implies banked XP");
            } else {
                assert_eq!(record.level, 1, "{skill} starts at level 1");
                assert_eq!(record.experience, 0);
            }
        }
    }

    #[tokio::test]
    async fn grant_all_is_idempotent() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();
        mgr.add_experience(1, SkillType::Attack, 500).await.unwrap();
        let before = mgr.get_skill(1, SkillType::Attack).await.unwrap().unwrap();
        assert!(before.level > 1);

        mgr.grant_all(1).await.unwrap();
        let after = mgr.get_skill(1, SkillType::Attack).await.unwrap().unwrap();
        assert_eq!(after, before, "second grant must not reset progress");
    }

    #[tokio::test]
    async fn add_experience_levels_up_from_xp_total() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();

        let award = mgr
            .add_experience(1, SkillType::Attack, 2000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(award.previous_level, 1);
        assert!(award.current_level > 1);
        assert!(award.leveled_up);
        assert_eq!(award.xp_gained, 2000);
        assert_eq!(award.experience, 2000);
    }

    #[tokio::test]
    async fn small_award_does_not_level() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();

        let award = mgr
            .add_experience(1, SkillType::Attack, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(award.current_level, 1);
        assert!(!award.leveled_up);
    }

    #[tokio::test]
    async fn zero_award_is_a_no_op() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();
        assert!(mgr
            .add_experience(1, SkillType::Attack, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn exact_threshold_reaches_the_level() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();

        let xp_for_5 = xp_for_level(5, 1.0);
        let award = mgr
            .add_experience(1, SkillType::Attack, xp_for_5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(award.current_level, 5);
        assert_eq!(award.experience, xp_for_5);
    }

    #[tokio::test]
    async fn total_level_sums_all_skills() {
        let mgr = manager();
        mgr.grant_all(1).await.unwrap();

        let expected = u32::try_from(SkillType::ALL.len() - 1).unwrap() + HITPOINTS_START_LEVEL;
        assert_eq!(mgr.total_level(1).await.unwrap(), expected);

        mgr.add_experience(1, SkillType::Attack, 2000).await.unwrap();
        assert!(mgr.total_level(1).await.unwrap() > expected);
    }

    #[tokio::test]
    async fn award_to_ungranted_skill_grants_it_first() {
        let mgr = manager();
        let award = mgr
            .add_experience(1, SkillType::Mining, 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(award.previous_level, 1);
        assert_eq!(award.experience, 100);
    }
}
