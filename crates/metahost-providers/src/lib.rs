//! In-process implementations of the metahost collaborator contracts.
//!
//! These back the standalone binary and the test suites. Networked brokers,
//! database stores and remote authorization services implement the same
//! traits from `metahost-core`.

pub mod authorization;
pub mod bus;
pub mod store;

pub use authorization::LocalAuthorizer;
pub use bus::{InMemoryBus, SentMessage};
pub use store::InMemoryStore;
