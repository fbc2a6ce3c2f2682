//! Job description types: what the operator asked for and the per-municipality
//! units of work it expands into.

pub mod portal;
pub mod spec;
pub mod task;

pub use portal::Portal;
pub use spec::{ExecutionMode, JobSpec, Period, PeriodKind, Target, MAX_RANGE_DAYS, MAX_WORKERS};
pub use task::{ErrorKind, Started, Task, TaskError, TaskResult, TaskStatus};
