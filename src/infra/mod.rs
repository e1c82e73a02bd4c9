pub mod clock;
pub mod scheduler;
pub mod traits;

pub use clock::SystemClock;
pub use scheduler::Scheduler;
pub use traits::{Clock, JobCallback, JobFuture};

use std::sync::Arc;

pub fn create_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub fn create_scheduler() -> Arc<Scheduler> {
    Arc::new(Scheduler::new())
}
