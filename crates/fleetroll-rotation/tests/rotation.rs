use std::sync::Arc;

use fleetroll_core::sim::{FleetDescription, SimCall, SimOp, SimulatedCloud};
use fleetroll_core::{
    CloudError, ConnectivityConfig, ControlPlane, InstanceState, LifecycleState, ProgressEvent,
    RecordingSink, RotationConfig, SshConfig,
};
use fleetroll_remote::{
    ConnectivityValidator, RemoteError, RemoteShell, ScriptedRun, SimulatedShell,
};
use fleetroll_rotation::{RotationEngine, RotationError};

struct Harness {
    cloud: Arc<SimulatedCloud>,
    shell: Arc<SimulatedShell>,
    sink: Arc<RecordingSink>,
    engine: RotationEngine,
}

impl Harness {
    fn new(fleet: &str) -> Self {
        let cloud = Arc::new(SimulatedCloud::from_fleet(
            FleetDescription::from_toml_str(fleet).unwrap(),
        ));
        let shell = Arc::new(SimulatedShell::new(cloud.clone()));
        let sink = Arc::new(RecordingSink::new());
        let engine = RotationEngine::new(
            cloud.clone(),
            RemoteShell::new(SshConfig::default(), shell.clone()),
            sink.clone(),
            RotationConfig::default(),
        );
        Self {
            cloud,
            shell,
            sink,
            engine,
        }
    }

    fn validator(&self) -> ConnectivityValidator {
        ConnectivityValidator::new(
            RemoteShell::new(SshConfig::default(), self.shell.clone()),
            ConnectivityConfig::default(),
        )
    }

    fn capacity_changes(&self) -> Vec<u32> {
        self.cloud
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::SetDesiredCapacity { capacity, .. } => Some(capacity),
                _ => None,
            })
            .collect()
    }

    fn detached(&self) -> Vec<String> {
        self.cloud
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::DetachMember {
                    member,
                    decrement_desired_capacity,
                    ..
                } => {
                    assert!(!decrement_desired_capacity);
                    Some(member)
                }
                _ => None,
            })
            .collect()
    }

    fn reattached(&self) -> Vec<String> {
        self.cloud
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::AttachMember { member, .. } => Some(member),
                _ => None,
            })
            .collect()
    }

    fn desired(&self) -> u32 {
        self.cloud.group("web").unwrap().desired_capacity
    }
}

/// Stack `web-prod` owning group `web` (desired 2, max 3): `i-a` runs the
/// old launch configuration, `i-b` the current one.
const MIXED: &str = r#"
[[stacks]]
name = "web-prod"
[[stacks.resources]]
logical_id = "WebGroup"
resource_type = "AWS::AutoScaling::AutoScalingGroup"
physical_id = "web"

[[groups]]
name = "web"
desired_capacity = 2
max_size = 3
launch_configuration = "lc-v2"
[[groups.members]]
id = "i-a"
launch_configuration = "lc-v1"
address = "10.0.0.11"
volumes = ["vol-a"]
[[groups.members]]
id = "i-b"
launch_configuration = "lc-v2"
address = "10.0.0.12"
volumes = ["vol-b"]
"#;

#[tokio::test(start_paused = true)]
async fn up_to_date_group_is_left_alone() {
    let h = Harness::new(&MIXED.replace("lc-v1", "lc-v2"));

    let report = h.engine.rotate("web").await.unwrap();

    assert!(report.outdated.is_empty());
    assert!(h.cloud.calls().is_empty());
    assert!(matches!(
        h.sink.events().last(),
        Some(ProgressEvent::Success(msg)) if msg.contains("up to date")
    ));
}

#[tokio::test(start_paused = true)]
async fn outdated_member_is_replaced_and_capacity_restored() {
    let h = Harness::new(MIXED);

    let report = h.engine.rotate("web").await.unwrap();

    assert_eq!(report.outdated, ["i-a"]);
    assert_eq!(report.shut_down, ["i-a"]);
    assert_eq!(report.terminated, ["i-a"]);
    assert_eq!(report.volumes_deleted, ["vol-a"]);
    assert!(report.scaled_up && report.capacity_restored);

    assert_eq!(h.detached(), ["i-a"]);
    assert_eq!(h.capacity_changes(), [3, 2]);
    assert_eq!(h.desired(), 2);
    assert_eq!(h.cloud.instance("i-a").unwrap().state, InstanceState::Terminated);
    assert_eq!(h.cloud.instance("i-b").unwrap().state, InstanceState::Running);
    assert!(h.cloud.volume_exists("vol-b"));
    assert!(!h.cloud.volume_exists("vol-a"));

    let shutdowns: Vec<_> = h
        .shell
        .commands()
        .into_iter()
        .filter(|c| c.command == "sudo shutdown -h now")
        .collect();
    assert_eq!(shutdowns.len(), 1);
    assert_eq!(shutdowns[0].host, "10.0.0.11");

    assert!(h.sink.mentions("Instances: i-b (InService)"));
}

#[tokio::test(start_paused = true)]
async fn group_at_max_size_rotates_without_scaling() {
    let h = Harness::new(&MIXED.replace("max_size = 3", "max_size = 2"));

    let report = h.engine.rotate("web").await.unwrap();

    assert_eq!(report.shut_down, ["i-a"]);
    assert!(!report.scaled_up && !report.capacity_restored);
    assert!(h.capacity_changes().is_empty());
    assert_eq!(h.desired(), 2);
}

#[tokio::test(start_paused = true)]
async fn terminating_member_is_skipped() {
    let h = Harness::new(
        &MIXED
            .replace("lc-v2\"\naddress = \"10.0.0.12\"", "lc-v1\"\naddress = \"10.0.0.12\"")
            .replace(
                "address = \"10.0.0.11\"",
                "address = \"10.0.0.11\"\nlifecycle = \"Terminating\"",
            ),
    );

    let report = h.engine.rotate("web").await.unwrap();

    assert_eq!(report.outdated, ["i-a", "i-b"]);
    assert_eq!(report.shut_down, ["i-b"]);
    assert_eq!(h.detached(), ["i-b"]);
    assert!(h.sink.mentions("i-a is already terminated"));
    assert_eq!(h.capacity_changes(), [3, 2]);
}

#[tokio::test(start_paused = true)]
async fn detach_rejected_as_not_in_group_is_not_reattached() {
    let h = Harness::new(MIXED);
    h.cloud.fail_on(
        SimOp::DetachMember,
        "i-a",
        CloudError::Validation(
            "The instance i-a is not part of Auto Scaling group web.".to_string(),
        ),
    );

    let report = h.engine.rotate("web").await.unwrap();

    assert!(h.reattached().is_empty());
    assert!(report.shut_down.is_empty());
    assert_eq!(h.cloud.instance("i-a").unwrap().state, InstanceState::Running);
    assert_eq!(h.capacity_changes(), [3, 2]);
}

#[tokio::test(start_paused = true)]
async fn other_detach_error_reattaches_and_aborts() {
    let h = Harness::new(&MIXED.replace("lc-v2\"\naddress = \"10.0.0.12\"", "lc-v1\"\naddress = \"10.0.0.12\""));
    h.cloud.fail_on(
        SimOp::DetachMember,
        "i-a",
        CloudError::Api("InternalFailure".to_string()),
    );

    let err = h.engine.rotate("web").await.unwrap_err();

    assert!(matches!(err, RotationError::Cloud(CloudError::Api(_))));
    assert_eq!(h.reattached(), ["i-a"]);
    // The loop stopped at the first member.
    assert_eq!(h.detached(), ["i-a"]);
    assert_eq!(h.capacity_changes(), [3, 2]);
    assert!(h.sink.failures().iter().any(|m| m.contains("Failed to detach i-a")));
}

#[tokio::test(start_paused = true)]
async fn later_member_failure_still_tears_down_earlier_ones() {
    let h = Harness::new(&MIXED.replace("lc-v2\"\naddress = \"10.0.0.12\"", "lc-v1\"\naddress = \"10.0.0.12\""));
    h.cloud.fail_on(
        SimOp::DetachMember,
        "i-b",
        CloudError::Api("InternalFailure".to_string()),
    );

    let err = h.engine.rotate("web").await.unwrap_err();

    assert!(matches!(err, RotationError::Cloud(CloudError::Api(_))));
    assert_eq!(h.detached(), ["i-a", "i-b"]);
    assert_eq!(h.reattached(), ["i-b"]);
    assert_eq!(h.cloud.instance("i-a").unwrap().state, InstanceState::Terminated);
    assert_eq!(h.cloud.instance("i-b").unwrap().state, InstanceState::Running);
    assert!(!h.cloud.volume_exists("vol-a"));
    assert!(h.cloud.volume_exists("vol-b"));
    assert_eq!(h.capacity_changes(), [3, 2]);
    assert!(h.sink.mentions("Terminated i-a"));
}

#[tokio::test(start_paused = true)]
async fn throttled_calls_are_retried() {
    let h = Harness::new(MIXED);
    let throttled = || CloudError::Throttled("Rate exceeded".to_string());
    h.cloud.fail_next(SimOp::DescribeGroup, throttled());
    h.cloud.fail_next(SimOp::DescribeMember, throttled());
    h.cloud.fail_on(SimOp::DetachMember, "i-a", throttled());
    h.cloud.fail_next(SimOp::DescribeInstance, throttled());

    let report = h.engine.rotate("web").await.unwrap();

    assert_eq!(report.shut_down, ["i-a"]);
    assert_eq!(report.terminated, ["i-a"]);
    assert_eq!(report.volumes_deleted, ["vol-a"]);
    assert_eq!(h.detached(), ["i-a", "i-a"]);
    assert!(h.reattached().is_empty());
    assert_eq!(h.capacity_changes(), [3, 2]);
    assert!(h.sink.failures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn persistent_throttling_fails_before_any_change() {
    let h = Harness::new(MIXED);
    for _ in 0..5 {
        h.cloud.fail_next(
            SimOp::DescribeGroup,
            CloudError::Throttled("Rate exceeded".to_string()),
        );
    }

    let started = tokio::time::Instant::now();
    let err = h.engine.rotate("web").await.unwrap_err();

    assert!(matches!(err, RotationError::Cloud(CloudError::Throttled(_))));
    assert_eq!(started.elapsed(), std::time::Duration::from_secs(8));
    assert!(h.capacity_changes().is_empty());
    assert!(h.detached().is_empty());
}

#[tokio::test(start_paused = true)]
async fn capacity_timeout_reattaches_and_still_restores_once() {
    let h = Harness::new(MIXED);
    h.cloud.hold_capacity("web", true);

    let err = h.engine.rotate("web").await.unwrap_err();

    assert!(matches!(err, RotationError::CapacityTimeout { attempts: 60, .. }));
    assert_eq!(h.reattached(), ["i-a"]);
    assert_eq!(h.capacity_changes(), [3, 2]);
    assert_eq!(
        h.cloud.group("web").unwrap().members[1].lifecycle,
        LifecycleState::InService
    );
    let polls = h
        .sink
        .events()
        .iter()
        .filter(|e| e.message().starts_with("Instances: "))
        .count();
    assert_eq!(polls, 60);
}

#[tokio::test(start_paused = true)]
async fn member_that_never_comes_into_service_fails_the_rotation() {
    let h = Harness::new(MIXED);
    h.cloud.set_member_lifecycle("i-a", LifecycleState::Pending);

    let started = tokio::time::Instant::now();
    let err = h.engine.rotate("web").await.unwrap_err();

    assert!(matches!(err, RotationError::MemberNotReady { ref member, attempts: 60 } if member == "i-a"));
    assert!(started.elapsed() >= std::time::Duration::from_secs(590));
    assert!(h.detached().is_empty());
    assert_eq!(h.capacity_changes(), [3, 2]);
}

#[tokio::test(start_paused = true)]
async fn failed_preflight_mutates_nothing() {
    let h = Harness::new(MIXED);
    for _ in 0..3 {
        h.shell
            .script(ScriptedRun::exit(255, "", "Permission denied (publickey)."));
    }
    let stack = h.cloud.describe_stack("web-prod").await.unwrap();

    let err = h
        .engine
        .rotate_stack(&stack, &h.validator())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RotationError::Remote(RemoteError::Connectivity { exit_status: Some(255), .. })
    ));
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rotate_stack_resolves_group_after_preflight() {
    let h = Harness::new(MIXED);
    let stack = h.cloud.describe_stack("web-prod").await.unwrap();

    let report = h
        .engine
        .rotate_stack(&stack, &h.validator())
        .await
        .unwrap();

    assert_eq!(report.group, "web");
    assert_eq!(report.shut_down, ["i-a"]);
    assert_eq!(h.shell.commands()[0].command, "/bin/true");
    assert!(h.sink.mentions("Remote shell reachable"));
}
