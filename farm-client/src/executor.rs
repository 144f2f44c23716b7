//! Concurrent execution of one operation against several servers.

use indexmap::IndexMap;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::config::UpstreamTimeouts;
use crate::errors::{ClientError, Result};
use crate::metrics_defs::{FANOUT_DURATION, FANOUT_SERVER_FAILURE};
use crate::registry::ServerDescriptor;

/// Per-server results of a fan-out, in the order the servers were given.
#[derive(Debug)]
pub struct Outcome<T> {
    results: IndexMap<String, Result<T>>,
}

impl<T> Outcome<T> {
    pub fn results(&self) -> impl Iterator<Item = (&str, &Result<T>)> {
        self.results.iter().map(|(name, result)| (name.as_str(), result))
    }

    pub fn into_results(self) -> IndexMap<String, Result<T>> {
        self.results
    }

    pub fn get(&self, server: &str) -> Option<&Result<T>> {
        self.results.get(server)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClientError> {
        self.results.values().filter_map(|result| result.as_ref().err())
    }

    /// Every failure as `"<server>: <reason>"`, joined with `"; "`.
    pub fn error_text(&self) -> Option<String> {
        let messages: Vec<String> = self.failures().map(ToString::to_string).collect();
        (!messages.is_empty()).then(|| messages.join("; "))
    }
}

/// Runs a task per server concurrently and waits for all of them.
///
/// A failing server never cancels the others. The only bound is the overall
/// fan-out timeout: servers that have not answered by then are reported as
/// [`ClientError::Timeout`].
#[derive(Clone, Debug)]
pub struct FanOutExecutor {
    timeout: Duration,
}

impl FanOutExecutor {
    pub fn new(timeouts: &UpstreamTimeouts) -> Self {
        Self {
            timeout: Duration::from_secs(timeouts.fanout_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        servers: Vec<ServerDescriptor>,
        task: F,
    ) -> Outcome<T>
    where
        F: Fn(ServerDescriptor) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let mut pending: IndexMap<String, Option<Result<T>>> = servers
            .iter()
            .map(|server| (server.name.clone(), None))
            .collect();

        let mut join_set = JoinSet::new();
        let mut task_servers = HashMap::new();

        for server in servers {
            let name = server.name.clone();
            let future = task(server);
            let task_name = name.clone();
            let abort_handle = join_set.spawn(async move { (task_name, future.await) });
            task_servers.insert(abort_handle.id(), name);
        }

        let deadline = sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    join_set.abort_all();
                    break;
                },
                joined = join_set.join_next_with_id() => {
                    match joined {
                        Some(Ok((_, (name, result)))) => {
                            if let Some(slot) = pending.get_mut(&name) {
                                *slot = Some(result);
                            }
                        }
                        Some(Err(e)) => {
                            let Some(name) = task_servers.get(&e.id()) else {
                                tracing::error!(error = %e, "fan-out task failed for unknown server");
                                continue;
                            };
                            tracing::error!(server = %name, error = %e, "fan-out task panicked");
                            if let Some(slot) = pending.get_mut(name) {
                                *slot = Some(Err(ClientError::Internal {
                                    server: name.clone(),
                                    reason: "task panicked".into(),
                                }));
                            }
                        }
                        // No more tasks
                        None => break,
                    }
                }
            }
        }

        let results: IndexMap<String, Result<T>> = pending
            .into_iter()
            .map(|(name, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(ClientError::Timeout {
                        server: name.clone(),
                    })
                });
                (name, result)
            })
            .collect();

        histogram!(FANOUT_DURATION, "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        for error in results.values().filter_map(|r| r.as_ref().err()) {
            let server = error.server().unwrap_or_default().to_string();
            tracing::warn!(operation, server = %server, error = %error, "server failed during fan-out");
            counter!(FANOUT_SERVER_FAILURE, "operation" => operation, "server" => server)
                .increment(1);
        }

        Outcome { results }
    }
}
