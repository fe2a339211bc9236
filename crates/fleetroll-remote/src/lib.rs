//! fleetroll-remote: remote shell access to group members.
//!
//! Builds ssh command lines from `SshConfig`, runs them through a
//! `RemoteExecutor`, picks a reachable member of a deployment for
//! connectivity checks, and verifies that the remote shell works before
//! anything is mutated.
//!
//! # Architecture
//!
//! ```text
//! TargetSelector::choose(stack) → RemoteTarget
//!        │
//! ConnectivityValidator::verify(target)
//!   └── RemoteShell::exec("/bin/true", host)     (retried, fixed backoff)
//!         ├── SshCommandBuilder → RemoteCommand
//!         └── RemoteExecutor::run → CommandOutput
//! ```
//!
//! A non-zero exit status is returned as data by the executor; only the
//! validator turns it into an error.

pub mod command;
pub mod connectivity;
pub mod doctor;
pub mod error;
pub mod executor;
pub mod selector;
pub mod sim;

pub use command::{RemoteCommand, SshCommandBuilder};
pub use connectivity::{ConnectivityValidator, ProbeResult};
pub use doctor::{CheckOutcome, CheckStatus, check_connectivity, preflight};
pub use error::{RemoteError, RemoteResult};
pub use executor::{CommandOutput, ForkExecutor, RemoteExecutor, RemoteShell};
pub use selector::{RemoteTarget, TargetSelector};
pub use sim::{ScriptedRun, SimulatedShell};
