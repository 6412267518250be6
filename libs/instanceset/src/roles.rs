//! Role priorities and the instance ordering built on them.
//!
//! The base order puts low-priority roles first and, within one priority,
//! names in descending order:
//!
//! `unknown -> learner -> follower-2 -> follower-1 -> leader`
//!
//! Updates and scale-in walk this order so the leader is touched last.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use iset_id::compare_names;

use crate::model::{Instance, ReplicaRole};

/// Priority and quorum flag of a declared role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleInfo {
    pub priority: i32,
    pub participates_in_quorum: bool,
}

/// Index of declared roles by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePriorities {
    roles: BTreeMap<String, RoleInfo>,
}

impl RolePriorities {
    pub fn new(roles: &[ReplicaRole]) -> Self {
        let roles = roles
            .iter()
            .map(|r| {
                (
                    r.name.to_lowercase(),
                    RoleInfo {
                        priority: r.update_priority,
                        participates_in_quorum: r.participates_in_quorum,
                    },
                )
            })
            .collect();
        Self { roles }
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn info(&self, role: &str) -> Option<RoleInfo> {
        self.roles.get(&role.to_lowercase()).copied()
    }

    /// Priority of `role`; unknown and missing roles rank lowest.
    pub fn priority(&self, role: Option<&str>) -> i32 {
        role.and_then(|r| self.info(r)).map_or(0, |i| i.priority)
    }

    pub fn priority_of(&self, instance: &Instance) -> i32 {
        self.priority(instance.role().as_deref())
    }

    /// Highest declared priority, the leader's.
    pub fn highest(&self) -> Option<i32> {
        self.roles.values().map(|i| i.priority).max()
    }

    /// Base order over `(role, name)` pairs.
    pub fn compare(
        &self,
        a_role: Option<&str>,
        a_name: &str,
        b_role: Option<&str>,
        b_name: &str,
    ) -> Ordering {
        self.priority(a_role)
            .cmp(&self.priority(b_role))
            .then_with(|| compare_names(b_name, a_name))
    }

    pub fn compare_instances(&self, a: &Instance, b: &Instance) -> Ordering {
        self.compare(a.role().as_deref(), a.name(), b.role().as_deref(), b.name())
    }

    /// Sorts in base order, or its reverse.
    pub fn sort_instances<I>(&self, instances: &mut [I], reverse: bool)
    where
        I: AsRef<Instance>,
    {
        instances.sort_by(|a, b| {
            let ord = self.compare_instances(a.as_ref(), b.as_ref());
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

impl AsRef<Instance> for Instance {
    fn as_ref(&self) -> &Instance {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectMeta, PodObject};
    use iset_id::labels;

    fn roles() -> Vec<ReplicaRole> {
        vec![
            ReplicaRole {
                name: "Leader".to_string(),
                update_priority: 3,
                participates_in_quorum: true,
            },
            ReplicaRole {
                name: "follower".to_string(),
                update_priority: 2,
                participates_in_quorum: true,
            },
            ReplicaRole {
                name: "learner".to_string(),
                update_priority: 1,
                participates_in_quorum: false,
            },
        ]
    }

    fn instance(name: &str, role: Option<&str>) -> Instance {
        let mut metadata = ObjectMeta::named("default", name);
        if let Some(role) = role {
            metadata.labels.insert(labels::ROLE.to_string(), role.to_string());
        }
        Instance {
            pod: PodObject {
                metadata,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn names(instances: &[&Instance]) -> Vec<String> {
        instances.iter().map(|i| i.name().to_string()).collect()
    }

    #[test]
    fn test_priority_lookup_is_case_insensitive() {
        let priorities = RolePriorities::new(&roles());
        assert_eq!(priorities.priority(Some("LEADER")), 3);
        assert_eq!(priorities.priority(Some("witness")), 0);
        assert_eq!(priorities.priority(None), 0);
        assert_eq!(priorities.highest(), Some(3));
    }

    #[test]
    fn test_base_order() {
        let priorities = RolePriorities::new(&roles());
        let a = instance("pg-0", Some("leader"));
        let b = instance("pg-1", Some("follower"));
        let c = instance("pg-2", Some("follower"));
        let d = instance("pg-3", Some("learner"));
        let e = instance("pg-4", None);
        let mut list = vec![&a, &b, &c, &d, &e];

        priorities.sort_instances(&mut list, false);
        assert_eq!(names(&list), vec!["pg-4", "pg-3", "pg-2", "pg-1", "pg-0"]);

        priorities.sort_instances(&mut list, true);
        assert_eq!(names(&list), vec!["pg-0", "pg-1", "pg-2", "pg-3", "pg-4"]);
    }

    #[test]
    fn test_names_compare_numerically() {
        let priorities = RolePriorities::default();
        let a = instance("pg-2", None);
        let b = instance("pg-10", None);
        let mut list = vec![&a, &b];

        priorities.sort_instances(&mut list, false);
        assert_eq!(names(&list), vec!["pg-10", "pg-2"]);
    }
}
