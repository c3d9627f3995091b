pub mod task_lock;
pub mod task_store;

pub use task_lock::{LockOutcome, TaskLock};
pub use task_store::TaskStore;
