//! fleetroll-core: shared types for fleet rotation and change-set review.
//!
//! Everything the other fleetroll crates agree on lives here: the data
//! model for groups, members, instances and change sets, the control-plane
//! traits through which all cloud calls flow, the TOML configuration, and
//! the write-only progress sink.
//!
//! # Modules
//!
//! - **`types`** - Group, Member, instance, stack and change-set records
//! - **`cloud`** - `ControlPlane` / `ChangeSetApi` traits and `CloudError`
//! - **`config`** - `fleetroll.toml` parsing and duration strings
//! - **`retry`** - bounded retry of throttled control-plane calls
//! - **`progress`** - `ProgressSink` with tracing and recording sinks
//! - **`sim`** - in-memory control plane used for rehearsals and tests

pub mod cloud;
pub mod config;
pub mod progress;
pub mod retry;
pub mod sim;
pub mod types;

pub use cloud::{ChangeSetApi, CloudError, CloudResult, ControlPlane};
pub use config::{
    ChangeSetConfig, ConnectivityConfig, FleetrollConfig, PollBudget, RetryConfig, RotationConfig,
    SshConfig,
};
pub use retry::{RetryingControlPlane, retry_transient};
pub use progress::{ProgressEvent, ProgressSink, RecordingSink, TracingSink};
pub use types::*;
