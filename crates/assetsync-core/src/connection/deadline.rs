// Owned one-shot timers for the connection task.
//
// A `Deadline` is plain data living inside the task that polls it, so
// cancelling one is just overwriting a field: a disarmed deadline has no
// outstanding timer anywhere and can never fire.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Fire `after` from now, replacing any previous arming.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub(crate) fn cancel(&mut self) {
        self.at = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Resolves when the deadline passes; never resolves while disarmed.
    ///
    /// The returned future captures the arming time by value, so it holds
    /// no borrow of `self` and can sit in a `select!` next to handlers that
    /// mutate the owning task.
    pub(crate) fn expired(&self) -> impl Future<Output = ()> + Send + 'static {
        let at = self.at;
        async move {
            match at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        }
    }
}
