//! Replication group view
//!
//! Rebuilt from the broker on every pass and never stored. Members are kept
//! sorted by SID so anything derived from the group is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use oradb_common::crd::DatabaseRole;

use crate::error::BrokerError;

/// One database in the broker configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// SID, upper case
    pub sid: String,
    /// Role as reported by the broker
    pub role: DatabaseRole,
}

/// Live membership of one broker configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationGroup {
    members: Vec<Member>,
}

impl ReplicationGroup {
    /// Group from `SID:ROLE` rows. A SID listed twice keeps its last role.
    pub fn from_broker(rows: Vec<(String, DatabaseRole)>) -> Self {
        let by_sid: BTreeMap<String, DatabaseRole> = rows
            .into_iter()
            .map(|(sid, role)| (sid.to_ascii_uppercase(), role))
            .collect();
        Self {
            members: by_sid
                .into_iter()
                .map(|(sid, role)| Member { sid, role })
                .collect(),
        }
    }

    /// True when the broker has no configuration
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Members sorted by SID
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Member with the given SID, case-insensitive
    pub fn member(&self, sid: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.sid.eq_ignore_ascii_case(sid))
    }

    /// True when `sid` is a member
    pub fn contains(&self, sid: &str) -> bool {
        self.member(sid).is_some()
    }

    /// Role of `sid`, if it is a member
    pub fn role(&self, sid: &str) -> Option<DatabaseRole> {
        self.member(sid).map(|m| m.role)
    }

    /// The single primary.
    ///
    /// Any other count means the group is unhealthy or mid role change.
    pub fn primary(&self) -> Result<&Member, BrokerError> {
        let primaries: Vec<&Member> = self
            .members
            .iter()
            .filter(|m| m.role == DatabaseRole::Primary)
            .collect();
        match primaries.as_slice() {
            [only] => Ok(only),
            other => Err(BrokerError::PrimaryCount { count: other.len() }),
        }
    }

    /// Members that are not primary
    pub fn standbys(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(|m| m.role != DatabaseRole::Primary)
    }

    /// Failover targets `sid` should have: every other member
    pub fn failover_targets(&self, sid: &str) -> BTreeSet<String> {
        self.members
            .iter()
            .filter(|m| !m.sid.eq_ignore_ascii_case(sid))
            .map(|m| m.sid.clone())
            .collect()
    }
}

/// Parse a comma-separated target list. Order and case are not significant.
pub fn parse_targets(value: &str) -> BTreeSet<String> {
    value
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Comma-joined property value for a target set
pub fn join_targets(targets: &BTreeSet<String>) -> String {
    targets.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(rows: &[(&str, DatabaseRole)]) -> ReplicationGroup {
        ReplicationGroup::from_broker(
            rows.iter()
                .map(|(sid, role)| (sid.to_string(), *role))
                .collect(),
        )
    }

    #[test]
    fn full_mesh_targets_exclude_only_self() {
        let g = group(&[
            ("ORCL3", DatabaseRole::PhysicalStandby),
            ("ORCL1", DatabaseRole::Primary),
            ("ORCL2", DatabaseRole::PhysicalStandby),
        ]);

        for member in g.members() {
            let targets = g.failover_targets(&member.sid);
            assert_eq!(targets.len(), g.len() - 1);
            assert!(!targets.contains(&member.sid));
        }
        assert_eq!(
            g.failover_targets("orcl2"),
            BTreeSet::from(["ORCL1".to_string(), "ORCL3".to_string()])
        );
    }

    #[test]
    fn single_member_has_no_targets() {
        let g = group(&[("ORCL1", DatabaseRole::Primary)]);
        assert!(g.failover_targets("ORCL1").is_empty());
    }

    #[test]
    fn exactly_one_primary_required() {
        let healthy = group(&[
            ("ORCL1", DatabaseRole::Primary),
            ("ORCL2", DatabaseRole::PhysicalStandby),
        ]);
        assert_eq!(healthy.primary().unwrap().sid, "ORCL1");

        let split = group(&[
            ("ORCL1", DatabaseRole::Primary),
            ("ORCL2", DatabaseRole::Primary),
        ]);
        assert!(matches!(
            split.primary(),
            Err(BrokerError::PrimaryCount { count: 2 })
        ));

        let headless = group(&[("ORCL2", DatabaseRole::PhysicalStandby)]);
        assert!(matches!(
            headless.primary(),
            Err(BrokerError::PrimaryCount { count: 0 })
        ));
    }

    #[test]
    fn members_are_sorted_and_case_folded() {
        let g = group(&[
            ("orcl2", DatabaseRole::PhysicalStandby),
            ("ORCL1", DatabaseRole::Primary),
        ]);
        let sids: Vec<&str> = g.members().iter().map(|m| m.sid.as_str()).collect();
        assert_eq!(sids, ["ORCL1", "ORCL2"]);
        assert_eq!(g.role("Orcl2"), Some(DatabaseRole::PhysicalStandby));
        assert_eq!(g.standbys().count(), 1);
    }

    #[test]
    fn target_lists_compare_as_sets() {
        assert_eq!(parse_targets("'ORCL3, orcl2'"), parse_targets("ORCL2,ORCL3"));
        assert!(parse_targets("''").is_empty());
        assert_eq!(
            join_targets(&parse_targets("ORCL3,ORCL2")),
            "ORCL2,ORCL3"
        );
    }
}
