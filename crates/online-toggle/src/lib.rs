//! online-toggle: keeps a server's online-mode flag in line with an ON, OFF
//! or DYNAMIC policy.
//!
//! DYNAMIC mirrors the reachability of an external status endpoint and is
//! re-evaluated on a timer. Everything that touches the live flag goes
//! through [`engine::ToggleEngine`], which serializes those changes.

pub mod accessor;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod mode;
pub mod probe;
pub mod scheduler;
pub mod server;
pub mod store;

pub use accessor::{StateAccessor, Transition};
pub use command::{Authorizer, CommandResponse, CommandStatus, CommandSurface, PermissionTable};
pub use config::{PersistedConfig, ToggleConfig};
pub use engine::{CycleReport, ToggleEngine};
pub use error::{ApplyError, HostError, StoreError};
pub use host::{InMemoryHost, PropertiesHost, ServerHost};
pub use mode::ToggleMode;
pub use probe::{Reachability, ReachabilityChecker, StatusProbe};
pub use scheduler::{Scheduler, SchedulerState};
