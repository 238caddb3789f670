//! The Invocation Coordinator and the Instance Table/Reaper it drives.

mod coordinator;
mod instance_table;

pub use coordinator::{Coordinator, WarmupOutcome};
pub use instance_table::{Instance, InstanceTable, Reaper};
