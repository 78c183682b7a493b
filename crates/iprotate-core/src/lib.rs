//! Shared data model and error taxonomy for the cloud-iprotate workspace.

pub mod error;
pub mod naming;
pub mod types;

pub use error::{FleetError, PipelineStep};
pub use types::{AccountRecord, AccountStatus, InstanceRecord, OutputFormat, RouterSection};
