//! Cloud capability ports and the `aws` CLI adapter.

pub mod api;
pub mod aws_cli;
pub mod error;
mod exec;
pub mod poll;

pub use api::{
    CloudApi, CloudConnector, CommandRegistration, CommandStatus, CommandTarget, ImageFilter,
    ImageSummary, InstanceState, InstanceSummary, Invocation, LaunchRequest,
};
pub use aws_cli::AwsCliConnector;
pub use error::CloudError;
pub use poll::{PollPolicy, PollStep, Poller, sleep_or_cancel};
