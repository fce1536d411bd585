use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{SemaphoreError, SemaphoreGroup, SemaphoreGroupConfig, SemaphoreHistoryStore};
use crate::consumer::ConsumerStore;

/// A ticket as seen by group membership: who holds it and what tier it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberCandidate {
    pub email: String,
    pub event_id: String,
    pub product_id: String,
}

/// Result of recomputing one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupUpdate {
    pub group_id: String,
    pub root: String,
    pub member_count: usize,
    /// A new history entry was appended.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreGroupInfo {
    pub group_id: String,
    pub name: String,
}

/// Computes and records the configured groups of one pipeline.
pub struct SemaphoreGroupProvider {
    pipeline_id: String,
    groups: Vec<SemaphoreGroupConfig>,
    consumers: Arc<dyn ConsumerStore>,
    history: Arc<dyn SemaphoreHistoryStore>,
}

impl SemaphoreGroupProvider {
    pub fn new(
        pipeline_id: impl Into<String>,
        groups: Vec<SemaphoreGroupConfig>,
        consumers: Arc<dyn ConsumerStore>,
        history: Arc<dyn SemaphoreHistoryStore>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            groups,
            consumers,
            history,
        }
    }

    /// Drop history for groups that are no longer configured.
    pub fn start(&self) -> Result<u64, SemaphoreError> {
        let mut deleted = 0;
        for group_id in self.history.group_ids(&self.pipeline_id)? {
            if !self.has_group(&group_id) {
                deleted += self.history.delete_group(&self.pipeline_id, &group_id)?;
                info!(
                    pipeline_id = %self.pipeline_id,
                    group_id = %group_id,
                    "removed history of unconfigured semaphore group"
                );
            }
        }
        Ok(deleted)
    }

    /// Recompute every group from the candidates and the consumer ledger,
    /// appending history for groups whose root moved.
    pub fn update(&self, candidates: &[MemberCandidate]) -> Result<Vec<GroupUpdate>, SemaphoreError> {
        if self.groups.is_empty() {
            return Ok(Vec::new());
        }

        let emails: Vec<String> = candidates
            .iter()
            .map(|c| c.email.to_lowercase())
            .filter(|e| !e.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let commitments: HashMap<String, String> = self
            .consumers
            .load_by_emails(&self.pipeline_id, &emails)?
            .into_iter()
            .map(|record| (record.email, record.commitment))
            .collect();

        let mut updates = Vec::with_capacity(self.groups.len());
        for config in &self.groups {
            let members = candidates
                .iter()
                .filter(|c| config.admits(&c.event_id, &c.product_id))
                .filter_map(|c| commitments.get(&c.email.to_lowercase()).cloned());
            let group = SemaphoreGroup::new(&config.group_id, &config.name, members);
            let changed = self.history.record_if_changed(&self.pipeline_id, &group)?;

            debug!(
                pipeline_id = %self.pipeline_id,
                group_id = %group.id,
                members = group.members.len(),
                changed,
                "semaphore group recomputed"
            );

            updates.push(GroupUpdate {
                group_id: group.id.clone(),
                root: group.root.clone(),
                member_count: group.members.len(),
                changed,
            });
        }

        Ok(updates)
    }

    pub fn latest_group(&self, group_id: &str) -> Result<Option<SemaphoreGroup>, SemaphoreError> {
        if !self.has_group(group_id) {
            return Ok(None);
        }
        Ok(self
            .history
            .latest(&self.pipeline_id, group_id)?
            .map(|entry| entry.snapshot))
    }

    pub fn group_by_root(
        &self,
        group_id: &str,
        root: &str,
    ) -> Result<Option<SemaphoreGroup>, SemaphoreError> {
        if !self.has_group(group_id) {
            return Ok(None);
        }
        self.history.get_by_root(&self.pipeline_id, group_id, root)
    }

    pub fn latest_root(&self, group_id: &str) -> Result<Option<String>, SemaphoreError> {
        if !self.has_group(group_id) {
            return Ok(None);
        }
        self.history.latest_root(&self.pipeline_id, group_id)
    }

    pub fn supported_groups(&self) -> Vec<SemaphoreGroupInfo> {
        self.groups
            .iter()
            .map(|g| SemaphoreGroupInfo {
                group_id: g.group_id.clone(),
                name: g.name.clone(),
            })
            .collect()
    }

    fn has_group(&self, group_id: &str) -> bool {
        self.groups.iter().any(|g| g.group_id == group_id)
    }
}
