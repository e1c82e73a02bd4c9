use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source of wall-clock time, injectable so day rollover can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date of `now` in `timezone`.
    fn today(&self, timezone: Tz) -> NaiveDate {
        self.now().with_timezone(&timezone).date_naive()
    }

    fn name(&self) -> &str;
}

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Body of a recurring job. Receives the job's own token so a run that was
/// queued behind a cancellation can notice and bail out.
pub type JobCallback = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;
