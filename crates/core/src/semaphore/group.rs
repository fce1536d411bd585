use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rule selecting tickets whose holders belong to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCriterion {
    pub event_id: String,
    /// Restrict to one product; `None` matches every product of the event.
    #[serde(default)]
    pub product_id: Option<String>,
}

/// Configured semaphore group of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreGroupConfig {
    pub group_id: String,
    pub name: String,
    /// Empty criteria admit every ticket of the pipeline.
    #[serde(default)]
    pub member_criteria: Vec<MemberCriterion>,
}

impl SemaphoreGroupConfig {
    pub fn admits(&self, event_id: &str, product_id: &str) -> bool {
        self.member_criteria.is_empty()
            || self.member_criteria.iter().any(|c| {
                c.event_id == event_id && c.product_id.as_deref().is_none_or(|p| p == product_id)
            })
    }
}

/// Group membership with its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreGroup {
    pub id: String,
    pub name: String,
    /// Sorted, deduplicated member commitments.
    pub members: Vec<String>,
    pub root: String,
}

impl SemaphoreGroup {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        members: impl IntoIterator<Item = String>,
    ) -> Self {
        let id = id.into();
        let mut members: Vec<String> = members.into_iter().collect();
        members.sort();
        members.dedup();
        let root = compute_root(&id, &members);
        Self {
            id,
            name: name.into(),
            members,
            root,
        }
    }

    pub fn contains(&self, commitment: &str) -> bool {
        self.members.binary_search_by(|m| m.as_str().cmp(commitment)).is_ok()
    }
}

/// Hex SHA-256 Merkle root over the sorted members. An odd node at any level
/// is carried up unchanged. The empty group hashes its own id.
pub fn compute_root(group_id: &str, members: &[String]) -> String {
    if members.is_empty() {
        let mut hasher = Sha256::new();
        hasher.update(b"empty-group:");
        hasher.update(group_id.as_bytes());
        return hex::encode(hasher.finalize());
    }

    let mut level: Vec<[u8; 32]> = members
        .iter()
        .map(|m| Sha256::digest(m.as_bytes()).into())
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                }
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two nodes"),
            })
            .collect();
    }

    hex::encode(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_are_sorted_and_unique() {
        let group = SemaphoreGroup::new(
            "g",
            "Group",
            vec!["b".to_string(), "a".to_string(), "b".to_string()],
        );
        assert_eq!(group.members, vec!["a", "b"]);
        assert!(group.contains("a"));
        assert!(!group.contains("c"));
    }

    #[test]
    fn test_root_ignores_input_order() {
        let a = SemaphoreGroup::new("g", "G", vec!["x".to_string(), "y".to_string()]);
        let b = SemaphoreGroup::new("g", "G", vec!["y".to_string(), "x".to_string()]);
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn test_root_changes_with_membership() {
        let a = SemaphoreGroup::new("g", "G", vec!["x".to_string()]);
        let b = SemaphoreGroup::new("g", "G", vec!["x".to_string(), "z".to_string()]);
        assert_ne!(a.root, b.root);
    }

    #[test]
    fn test_empty_roots_differ_per_group() {
        let a = SemaphoreGroup::new("g1", "G", Vec::<String>::new());
        let b = SemaphoreGroup::new("g2", "G", Vec::<String>::new());
        assert_ne!(a.root, b.root);
        assert_eq!(a.root.len(), 64);
    }

    #[test]
    fn test_single_member_root_is_leaf_hash() {
        let group = SemaphoreGroup::new("g", "G", vec!["m".to_string()]);
        assert_eq!(group.root, hex::encode(Sha256::digest(b"m")));
    }

    #[test]
    fn test_odd_member_count() {
        let members: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let group = SemaphoreGroup::new("g", "G", members);
        assert_eq!(group.members.len(), 3);
        assert_eq!(group.root.len(), 64);
    }

    #[test]
    fn test_criteria_matching() {
        let open = SemaphoreGroupConfig {
            group_id: "all".to_string(),
            name: "All".to_string(),
            member_criteria: vec![],
        };
        assert!(open.admits("e1", "p1"));

        let scoped = SemaphoreGroupConfig {
            group_id: "staff".to_string(),
            name: "Staff".to_string(),
            member_criteria: vec![
                MemberCriterion {
                    event_id: "e1".to_string(),
                    product_id: Some("staff".to_string()),
                },
                MemberCriterion {
                    event_id: "e2".to_string(),
                    product_id: None,
                },
            ],
        };
        assert!(scoped.admits("e1", "staff"));
        assert!(!scoped.admits("e1", "general"));
        assert!(scoped.admits("e2", "anything"));
        assert!(!scoped.admits("e3", "staff"));
    }
}
