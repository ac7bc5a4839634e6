pub mod credential;
pub mod pool;

pub use credential::{CredentialQueue, CredentialTurn};
pub use pool::{JobRunner, WorkItem, WorkerPool};
