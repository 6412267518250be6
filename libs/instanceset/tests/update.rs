//! Rolling updates across whole passes.

use iset_events::EventReason;
use iset_id::labels;
use iset_instanceset::lifecycle::LIFECYCLE_RETRY_DELAY;
use iset_instanceset::model::{
    Instance, MemberUpdateStrategy, CONDITION_UPDATE_RESTRICTED,
};
use iset_instanceset::NoLifecycleActions;
use iset_reconcile::IntOrPercent;
use iset_testing::instance::{mark_not_ready, mark_ready, set_role};
use iset_testing::{Cluster, InstanceSetBuilder, RecordingLifecycle};

fn image(instance: &Instance) -> &str {
    &instance.pod.spec.containers[0].image
}

fn images(cluster: &Cluster) -> Vec<String> {
    cluster.instances().into_iter().map(|i| image(i).to_string()).collect()
}

fn set_image(cluster: &mut Cluster, new_image: &str) {
    let new_image = new_image.to_string();
    cluster.edit(move |set| set.spec.template.spec.containers[0].image = new_image);
}

fn set_dns_policy(cluster: &mut Cluster, policy: &str) {
    let policy = policy.to_string();
    cluster.edit(move |set| set.spec.template.spec.dns_policy = Some(policy));
}

fn reasons(cluster: &Cluster) -> Vec<EventReason> {
    cluster.events().iter().map(|e| e.reason).collect()
}

fn leader_on_zero(name: &str) -> Option<&'static str> {
    if name.ends_with("-0") {
        Some("leader")
    } else {
        Some("follower")
    }
}

fn converged(builder: InstanceSetBuilder) -> Cluster {
    let mut cluster = Cluster::new(builder.build());
    cluster.converge(&NoLifecycleActions, 20).unwrap();
    cluster
}

#[test]
fn test_recreate_rollout_goes_highest_ordinal_first() {
    let mut cluster = converged(InstanceSetBuilder::new("pg").replicas(3));
    let old_revision = cluster.set().status.update_revision.clone();
    assert_eq!(cluster.set().status.current_revision, old_revision);

    set_dns_policy(&mut cluster, "Default");
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1"]);
    assert!(reasons(&cluster).contains(&EventReason::InstanceRecreated));

    // The recreated instance comes back at the new revision and blocks the
    // next recreate until it is available.
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1", "pg-2"]);
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names().len(), 3);

    cluster.converge(&NoLifecycleActions, 30).unwrap();
    let status = &cluster.set().status;
    assert_ne!(status.update_revision, old_revision);
    assert_eq!(status.current_revision, status.update_revision);
    assert_eq!(status.updated_replicas, 3);
    for instance in cluster.instances() {
        assert_eq!(instance.revision(), status.update_revisions[instance.name()]);
    }
}

#[test]
fn test_image_change_updates_in_place_one_at_a_time() {
    let mut cluster = converged(InstanceSetBuilder::new("pg").replicas(3));
    let revision = cluster.set().status.update_revision.clone();

    set_image(&mut cluster, "busybox:1.37");
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.deletes.is_empty());
    assert_eq!(images(&cluster), vec!["busybox:1.36", "busybox:1.36", "busybox:1.37"]);
    assert!(reasons(&cluster).contains(&EventReason::InstanceUpdatedInPlace));

    cluster.converge(&NoLifecycleActions, 20).unwrap();
    assert_eq!(images(&cluster), vec!["busybox:1.37"; 3]);
    assert_eq!(cluster.set().status.update_revision, revision);
}

#[test]
fn test_max_unavailable_widens_each_step() {
    let mut cluster = converged(
        InstanceSetBuilder::new("pg")
            .replicas(3)
            .rolling_update(None, Some(IntOrPercent::Int(2))),
    );

    set_image(&mut cluster, "busybox:1.37");
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(images(&cluster), vec!["busybox:1.36", "busybox:1.37", "busybox:1.37"]);
}

#[test]
fn test_replicas_quota_stops_partial_rollout() {
    let mut cluster = converged(
        InstanceSetBuilder::new("pg")
            .replicas(3)
            .rolling_update(Some(IntOrPercent::Int(1)), None),
    );

    set_image(&mut cluster, "busybox:1.37");
    cluster.converge(&NoLifecycleActions, 20).unwrap();
    assert_eq!(images(&cluster), vec!["busybox:1.36", "busybox:1.36", "busybox:1.37"]);
}

#[test]
fn test_resources_recreate_without_vertical_scaling() {
    let options = iset_instanceset::EngineOptions {
        pod_vertical_scaling: false,
    };
    let mut cluster = Cluster::new(InstanceSetBuilder::new("pg").replicas(2).cpu("500m").build())
        .with_options(options);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    cluster.edit(|set| {
        set.spec.template.spec.containers[0]
            .resources
            .requests
            .insert("cpu".to_string(), "1".to_string());
    });
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(result.commit.deletes, vec!["pg-1".to_string()]);
}

#[test]
fn test_unhealthy_updated_instance_stops_rollout() {
    let builder = InstanceSetBuilder::new("pg")
        .replicas(3)
        .parallel(None)
        .rolling_update(None, Some(IntOrPercent::Int(2)));
    let mut cluster = converged(builder);

    set_dns_policy(&mut cluster, "Default");
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(result.commit.deletes, vec!["pg-1".to_string(), "pg-2".to_string()]);
    cluster.reconcile(&NoLifecycleActions).unwrap();
    cluster.kubelet_tick();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1", "pg-2"]);

    // pg-2 is already at the new revision, but while it is down pg-0 waits.
    mark_not_ready(cluster.instance_mut("pg-2").unwrap());
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.deletes.is_empty());

    let now = cluster.now();
    mark_ready(cluster.instance_mut("pg-2").unwrap(), now);
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(result.commit.deletes, vec!["pg-0".to_string()]);
}

#[test]
fn test_strict_in_place_blocks_recreate() {
    let mut cluster = converged(InstanceSetBuilder::new("pg").replicas(2).strict_in_place());

    set_dns_policy(&mut cluster, "Default");
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.deletes.is_empty());
    assert!(cluster.set().status.condition(CONDITION_UPDATE_RESTRICTED).is_some());
    assert!(reasons(&cluster).contains(&EventReason::UpdateRestricted));

    cluster.edit(|set| set.spec.template.spec.dns_policy = None);
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(cluster.set().status.condition(CONDITION_UPDATE_RESTRICTED).is_none());
}

#[test]
fn test_on_delete_never_touches_instances() {
    let mut cluster = converged(InstanceSetBuilder::new("pg").replicas(2).on_delete());

    set_dns_policy(&mut cluster, "Default");
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.is_status_only());
    assert_eq!(cluster.set().status.updated_replicas, 0);
}

#[test]
fn test_pending_outdated_instance_is_recreated_at_once() {
    let mut cluster = Cluster::new(InstanceSetBuilder::new("pg").replicas(2).parallel(None).build());
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names().len(), 2);

    set_dns_policy(&mut cluster, "Default");
    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(result.commit.deletes, vec!["pg-0".to_string()]);
}

#[test]
fn test_unprobed_role_holds_back_every_update() {
    let builder = InstanceSetBuilder::new("pg")
        .replicas(3)
        .roles_leader_follower()
        .rolling_update(None, Some(IntOrPercent::Int(1)));
    let mut cluster = Cluster::new(builder.build()).with_role_probe(leader_on_zero);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    cluster
        .instance_mut("pg-1")
        .unwrap()
        .pod
        .metadata
        .labels
        .remove(labels::ROLE);
    set_image(&mut cluster, "busybox:1.37");

    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.updates.is_empty());
    assert!(result.commit.deletes.is_empty());

    set_role(cluster.instance_mut("pg-1").unwrap(), "follower");
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(images(&cluster), vec!["busybox:1.36", "busybox:1.36", "busybox:1.37"]);
}

#[test]
fn test_serial_roles_update_leader_last() {
    let builder = InstanceSetBuilder::new("pg")
        .replicas(3)
        .roles_leader_follower()
        .member_update_strategy(MemberUpdateStrategy::Serial);
    let mut cluster = Cluster::new(builder.build()).with_role_probe(leader_on_zero);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    set_image(&mut cluster, "busybox:1.37");
    let mut order = Vec::new();
    for _ in 0..3 {
        let result = cluster.reconcile(&NoLifecycleActions).unwrap();
        order.extend(result.commit.updates.iter().map(|i| i.name().to_string()));
    }
    assert_eq!(order, vec!["pg-2", "pg-1", "pg-0"]);
}

#[test]
fn test_recreate_runs_switchover_first() {
    let builder = InstanceSetBuilder::new("pg")
        .replicas(3)
        .roles_leader_follower();
    let lifecycle = RecordingLifecycle::new();
    let mut cluster = Cluster::new(builder.build()).with_role_probe(leader_on_zero);
    cluster.converge(&lifecycle, 20).unwrap();

    set_dns_policy(&mut cluster, "Default");
    lifecycle.fail("pg-2");
    let result = cluster.reconcile(&lifecycle).unwrap();
    assert_eq!(lifecycle.calls_to("switchover"), vec!["pg-2"]);
    assert!(result.commit.deletes.is_empty());
    assert_eq!(result.requeue_after, Some(LIFECYCLE_RETRY_DELAY));

    lifecycle.recover("pg-2");
    let result = cluster.reconcile(&lifecycle).unwrap();
    assert_eq!(result.commit.deletes, vec!["pg-2".to_string()]);
}
