pub mod directory_sync;
pub mod instance_management;
pub mod observability;
pub mod type_registry;
