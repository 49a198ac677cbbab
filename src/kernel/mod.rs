pub mod scheduler;
pub mod task;
pub mod task_state;
