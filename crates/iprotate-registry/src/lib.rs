//! Account registry: the JSON account store and the task that owns it.

pub mod actor;
pub mod store;

pub use actor::{InstancesUpdate, RegistryHandle, StatusChange};
pub use store::AccountStore;
