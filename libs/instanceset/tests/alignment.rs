//! Creation and scale-in, driven pass by pass through a simulated cluster.

use std::time::Duration;

use iset_events::EventReason;
use iset_instanceset::lifecycle::LIFECYCLE_RETRY_DELAY;
use iset_instanceset::NoLifecycleActions;
use iset_reconcile::IntOrPercent;
use iset_testing::instance::mark_not_ready;
use iset_testing::{Cluster, InstanceSetBuilder, RecordingLifecycle};

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

#[test]
fn test_ordered_ready_creates_one_at_a_time() {
    let set = InstanceSetBuilder::new("pg").replicas(3).build();
    let mut cluster = Cluster::new(set);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0"]);

    // pg-0 is still pending, nothing else may start.
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0"]);

    cluster.kubelet_tick();
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1"]);

    cluster.converge(&NoLifecycleActions, 20).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1", "pg-2"]);
    let status = &cluster.set().status;
    assert_eq!(status.replicas, 3);
    assert_eq!(status.ready_replicas, 3);
    assert_eq!(status.init_replicas, 3);
    assert!(status.is_initially_provisioned());
}

#[test]
fn test_ordered_ready_waits_for_min_ready_seconds() {
    let set = InstanceSetBuilder::new("pg").replicas(2).min_ready_seconds(10).build();
    let mut cluster = Cluster::new(set);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    cluster.kubelet_tick();

    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0"]);
    assert_eq!(result.requeue_after, Some(Duration::from_secs(10)));

    cluster.advance(Duration::from_secs(10));
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1"]);
}

#[test]
fn test_parallel_respects_concurrency() {
    let set = InstanceSetBuilder::new("pg")
        .replicas(5)
        .parallel(Some(IntOrPercent::Int(2)))
        .build();
    let mut cluster = Cluster::new(set);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1"]);

    // Both new instances are unavailable and use up the budget.
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names().len(), 2);

    cluster.kubelet_tick();
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1", "pg-2", "pg-3"]);

    cluster.converge(&NoLifecycleActions, 20).unwrap();
    assert_eq!(cluster.names().len(), 5);
}

#[test]
fn test_parallel_without_limit_creates_everything() {
    let set = InstanceSetBuilder::new("pg").replicas(4).parallel(None).build();
    let mut cluster = Cluster::new(set);

    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(result.commit.creates.len(), 4);
}

#[test]
fn test_scale_in_takes_two_passes_per_instance() {
    let set = InstanceSetBuilder::new("pg").replicas(3).build();
    let mut cluster = Cluster::new(set);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    cluster.edit(|set| set.spec.replicas = 1);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1", "pg-2"]);
    assert!(cluster.instance("pg-2").unwrap().scaled_down);
    assert!(!cluster.instance("pg-1").unwrap().scaled_down);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0", "pg-1"]);
    assert!(!cluster.instance("pg-1").unwrap().scaled_down);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(cluster.instance("pg-1").unwrap().scaled_down);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0"]);

    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.is_status_only());
    assert_eq!(cluster.set().status.replicas, 1);
}

#[test]
fn test_parallel_scale_in_uses_concurrency() {
    let set = InstanceSetBuilder::new("pg")
        .replicas(5)
        .parallel(Some(IntOrPercent::Int(4)))
        .build();
    let mut cluster = Cluster::new(set);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    cluster.edit(|set| set.spec.replicas = 1);
    cluster.reconcile(&NoLifecycleActions).unwrap();
    let marked: Vec<bool> = cluster.instances().iter().map(|i| i.scaled_down).collect();
    assert_eq!(marked, vec![false, true, true, true, true]);

    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names(), vec!["pg-0"]);
}

#[test]
fn test_scale_out_restores_marked_instance() {
    let set = InstanceSetBuilder::new("pg").replicas(3).build();
    let mut cluster = Cluster::new(set);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    cluster.edit(|set| set.spec.replicas = 2);
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(cluster.instance("pg-2").unwrap().scaled_down);

    cluster.edit(|set| set.spec.replicas = 3);
    cluster.reconcile(&NoLifecycleActions).unwrap();
    assert_eq!(cluster.names().len(), 3);
    assert!(!cluster.instance("pg-2").unwrap().scaled_down);
}

#[test]
fn test_scale_in_of_unready_instance_is_reported() {
    let set = InstanceSetBuilder::new("pg").replicas(2).build();
    let mut cluster = Cluster::new(set);
    cluster.converge(&NoLifecycleActions, 20).unwrap();

    mark_not_ready(cluster.instance_mut("pg-1").unwrap());
    cluster.edit(|set| set.spec.replicas = 1);
    cluster.reconcile(&NoLifecycleActions).unwrap();

    assert!(reasons(&cluster).contains(&EventReason::ScaleInNotReady));
}

#[test]
fn test_member_leave_runs_before_delete() {
    let set = InstanceSetBuilder::new("pg")
        .replicas(3)
        .roles_leader_follower()
        .build();
    let lifecycle = RecordingLifecycle::new();
    let mut cluster = Cluster::new(set).with_role_probe(leader_on_zero);
    cluster.converge(&lifecycle, 20).unwrap();
    assert!(lifecycle.calls().is_empty());

    cluster.edit(|set| set.spec.replicas = 2);
    cluster.reconcile(&lifecycle).unwrap();
    assert!(lifecycle.calls_to("memberLeave").is_empty());

    lifecycle.fail("pg-2");
    let result = cluster.reconcile(&lifecycle).unwrap();
    assert_eq!(lifecycle.calls_to("memberLeave"), vec!["pg-2"]);
    assert!(cluster.instance("pg-2").is_some());
    assert_eq!(result.requeue_after, Some(LIFECYCLE_RETRY_DELAY));
    assert!(reasons(&cluster).contains(&EventReason::LifecycleActionFailed));

    lifecycle.recover("pg-2");
    cluster.reconcile(&lifecycle).unwrap();
    assert!(cluster.instance("pg-2").is_none());
    assert!(reasons(&cluster).contains(&EventReason::MemberLeft));
}

#[test]
fn test_member_join_after_initial_provisioning() {
    let set = InstanceSetBuilder::new("pg")
        .replicas(3)
        .roles_leader_follower()
        .build();
    let lifecycle = RecordingLifecycle::new();
    let mut cluster = Cluster::new(set).with_role_probe(leader_on_zero);
    cluster.converge(&lifecycle, 20).unwrap();
    assert!(cluster.set().status.is_initially_provisioned());
    assert!(cluster.instances().iter().all(|i| i.member_joined));

    cluster.edit(|set| set.spec.replicas = 4);
    cluster.reconcile(&lifecycle).unwrap();
    assert!(!cluster.instance("pg-3").unwrap().member_joined);

    cluster.kubelet_tick();
    cluster.reconcile(&lifecycle).unwrap();
    assert_eq!(lifecycle.calls_to("memberJoin"), vec!["pg-3"]);
    assert!(cluster.instance("pg-3").unwrap().member_joined);
    assert!(reasons(&cluster).contains(&EventReason::MemberJoined));
}

#[test]
fn test_paused_set_is_left_alone() {
    let set = InstanceSetBuilder::new("pg").replicas(2).paused().build();
    let mut cluster = Cluster::new(set);

    let result = cluster.reconcile(&NoLifecycleActions).unwrap();
    assert!(result.commit.creates.is_empty());
    assert_eq!(cluster.set().status.observed_generation, 1);
}
