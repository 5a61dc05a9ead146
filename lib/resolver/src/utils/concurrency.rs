use futures::{future::BoxFuture, stream, StreamExt};

/// Runs a set of futures concurrently on the current task, at most `limit` at a time.
///
/// Results come back in completion order, callers that care about ordering tag them.
pub struct ConcurrencyScope<'exec, T> {
    jobs: Vec<BoxFuture<'exec, T>>,
    limit: usize,
}

impl<'exec, T> ConcurrencyScope<'exec, T> {
    pub fn new(limit: usize) -> Self {
        Self {
            jobs: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn spawn(&mut self, future: BoxFuture<'exec, T>) {
        self.jobs.push(future);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub async fn join_all(self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.jobs.len());
        let mut jobs = stream::iter(self.jobs).buffer_unordered(self.limit);
        while let Some(result) = jobs.next().await {
            results.push(result);
        }
        results
    }
}
