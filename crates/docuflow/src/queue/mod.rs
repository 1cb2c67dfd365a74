pub mod lock;
pub mod model;
pub mod repo;

pub use lock::ProcessingLock;
pub use model::{JobState, QueuedJob};
pub use repo::JobQueue;
