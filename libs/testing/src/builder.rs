//! Fluent builder for instance-set specs.

use iset_instanceset::model::{
    Container, InstanceSet, InstanceTemplate, InstanceUpdateStrategy, MemberUpdateStrategy,
    ObjectMeta, OrdinalRange, Ordinals, PodManagementPolicy, PodUpdatePolicy, ReplicaRole,
    RollingUpdate, UpdateStrategyType,
};
use iset_reconcile::IntOrPercent;

use crate::TEST_NAMESPACE;

/// Builds an [`InstanceSet`] with one `main` container.
///
/// ```ignore
/// let set = InstanceSetBuilder::new("pg")
///     .replicas(3)
///     .template("hot", 1)
///     .roles_leader_follower()
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct InstanceSetBuilder {
    set: InstanceSet,
}

impl InstanceSetBuilder {
    pub fn new(name: &str) -> Self {
        let mut set = InstanceSet {
            metadata: ObjectMeta::named(TEST_NAMESPACE, name),
            ..Default::default()
        };
        set.metadata.uid = format!("uid-{name}");
        set.metadata.generation = 1;
        set.metadata.resource_version = "1".to_string();
        set.spec
            .selector
            .insert("app".to_string(), name.to_string());
        set.spec.template.metadata.labels.insert("app".to_string(), name.to_string());
        set.spec.template.spec.containers.push(Container {
            name: "main".to_string(),
            image: "busybox:1.36".to_string(),
            ..Default::default()
        });
        Self { set }
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.set.spec.replicas = replicas;
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        if let Some(main) = self.set.spec.template.spec.containers.first_mut() {
            main.image = image.to_string();
        }
        self
    }

    pub fn cpu(mut self, cpu: &str) -> Self {
        if let Some(main) = self.set.spec.template.spec.containers.first_mut() {
            main.resources.requests.insert("cpu".to_string(), cpu.to_string());
        }
        self
    }

    pub fn dns_policy(mut self, policy: &str) -> Self {
        self.set.spec.template.spec.dns_policy = Some(policy.to_string());
        self
    }

    /// Adds a named template with `replicas` and no ordinal constraint.
    pub fn template(mut self, name: &str, replicas: i32) -> Self {
        self.set.spec.instances.push(InstanceTemplate {
            name: name.to_string(),
            replicas: Some(replicas),
            ..Default::default()
        });
        self
    }

    /// Adds a named template constrained to `ranges` and `discrete`.
    pub fn template_with_ordinals(
        mut self,
        name: &str,
        replicas: i32,
        ranges: &[(i32, i32)],
        discrete: &[i32],
    ) -> Self {
        self.set.spec.instances.push(InstanceTemplate {
            name: name.to_string(),
            replicas: Some(replicas),
            ordinals: ordinals(ranges, discrete),
            ..Default::default()
        });
        self
    }

    /// Adds a fully specified template.
    pub fn instance_template(mut self, template: InstanceTemplate) -> Self {
        self.set.spec.instances.push(template);
        self
    }

    pub fn default_ordinals(mut self, ranges: &[(i32, i32)], discrete: &[i32]) -> Self {
        self.set.spec.default_template_ordinals = ordinals(ranges, discrete);
        self
    }

    pub fn flat(mut self, flat: bool) -> Self {
        self.set.spec.flat_instance_ordinal = flat;
        self
    }

    pub fn offline(mut self, names: &[&str]) -> Self {
        self.set.spec.offline_instances = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn role(mut self, name: &str, update_priority: i32, participates_in_quorum: bool) -> Self {
        self.set.spec.roles.push(ReplicaRole {
            name: name.to_string(),
            update_priority,
            participates_in_quorum,
        });
        self
    }

    /// `leader` (priority 2) and `follower` (priority 1), both in quorum.
    pub fn roles_leader_follower(self) -> Self {
        self.role("leader", 2, true).role("follower", 1, true)
    }

    pub fn parallel(mut self, concurrency: Option<IntOrPercent>) -> Self {
        self.set.spec.pod_management_policy = PodManagementPolicy::Parallel;
        self.set.spec.parallel_pod_management_concurrency = concurrency;
        self
    }

    pub fn rolling_update(mut self, replicas: Option<IntOrPercent>, max_unavailable: Option<IntOrPercent>) -> Self {
        self.set.spec.instance_update_strategy = Some(InstanceUpdateStrategy {
            strategy_type: UpdateStrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdate {
                replicas,
                max_unavailable,
            }),
        });
        self
    }

    pub fn on_delete(mut self) -> Self {
        self.set.spec.instance_update_strategy = Some(InstanceUpdateStrategy {
            strategy_type: UpdateStrategyType::OnDelete,
            rolling_update: None,
        });
        self
    }

    pub fn member_update_strategy(mut self, strategy: MemberUpdateStrategy) -> Self {
        self.set.spec.member_update_strategy = Some(strategy);
        self
    }

    pub fn strict_in_place(mut self) -> Self {
        self.set.spec.pod_update_policy = PodUpdatePolicy::StrictInPlace;
        self
    }

    pub fn min_ready_seconds(mut self, seconds: i32) -> Self {
        self.set.spec.min_ready_seconds = seconds;
        self
    }

    pub fn paused(mut self) -> Self {
        self.set.spec.paused = true;
        self
    }

    pub fn build(self) -> InstanceSet {
        self.set
    }
}

fn ordinals(ranges: &[(i32, i32)], discrete: &[i32]) -> Ordinals {
    Ordinals {
        ranges: ranges
            .iter()
            .map(|&(start, end)| OrdinalRange { start, end })
            .collect(),
        discrete: discrete.to_vec(),
    }
}
