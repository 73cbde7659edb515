pub mod backend;
pub mod commands;
pub mod local_instances;
pub mod observability;
pub mod port_pool;
pub mod reconciliation;
