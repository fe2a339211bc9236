//! fleetroll-rotation: rolling replacement of a group's outdated members.
//!
//! The engine scales the group up by one, then cycles every member whose
//! launch configuration is out of date: wait until it is in service,
//! detach it, wait for the group to refill, shut it down and wait for it
//! to stop. Stopped members are terminated and their volumes deleted in a
//! separate teardown phase, and the extra capacity is given back.
//!
//! # Phases
//!
//! ```text
//! rotate(group)
//!   ├── identify outdated        (none → done, nothing changed)
//!   ├── scale up by one          (only below max size)
//!   ├── cycle each member        (first error stops the loop)
//!   │     wait InService → detach → wait capacity → collect volumes
//!   │     → shutdown → wait stopped
//!   ├── teardown                 (always; failures logged per member/volume)
//!   └── restore capacity         (only if scaled up; failure logged)
//! ```

pub mod engine;
pub mod error;
pub mod session;
pub mod wait;

pub use engine::RotationEngine;
pub use error::{RotationError, RotationResult};
pub use session::{RotationReport, RotationSession};
pub use wait::{InstanceWait, MemberReadiness};
