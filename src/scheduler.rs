//! Bounded-concurrency query scheduling.
//!
//! Hierarchy levels can fan out into many instance queries at once; the
//! scheduler caps how many run against the executor concurrently (default
//! 10). Slots are granted in subscription order (FIFO). A scheduled query
//! whose subscribers all drop before the slot grant never reaches the
//! executor, and a query is never re-executed when additional subscribers
//! attach to an already-started stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{HierarchyError, HierarchyResult};
use crate::executor::{InstanceQuery, QueryExecutor, QueryReaderConfig, Row, RowStream};
use crate::streams::SharedStream;

/// Default number of concurrently executing queries.
pub const DEFAULT_QUERY_CONCURRENCY: usize = 10;

/// Holds the executor's row stream together with its concurrency slot. The
/// slot is released when the stream is dropped, which the shared stream does
/// on the terminal signal.
struct GuardedRows {
    rows: RowStream,
    _permit: OwnedSemaphorePermit,
}

impl Stream for GuardedRows {
    type Item = HierarchyResult<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rows.poll_next_unpin(cx)
    }
}

/// Dispatches query executions with bounded concurrency.
pub struct QueryScheduler {
    slots: Arc<Semaphore>,
}

impl QueryScheduler {
    pub fn new(concurrency: usize) -> Self {
        QueryScheduler {
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Schedule a query against the executor. The returned stream is shared
    /// and replayable; the executor is only invoked once a slot is granted
    /// and a subscriber polls.
    pub fn schedule(
        &self,
        executor: Arc<dyn QueryExecutor>,
        query: InstanceQuery,
        config: QueryReaderConfig,
    ) -> SharedStream<Row> {
        self.schedule_with(move || {
            trace!(sql = %query.sql, "executing scheduled query");
            executor.create_query_reader(query, config)
        })
    }

    /// Schedule an arbitrary row-stream factory. The factory runs after the
    /// concurrency slot is acquired.
    pub fn schedule_with(
        &self,
        factory: impl FnOnce() -> RowStream + Send + 'static,
    ) -> SharedStream<Row> {
        let slots = Arc::clone(&self.slots);
        let rows = stream::once(async move {
            match slots.acquire_owned().await {
                Ok(permit) => GuardedRows {
                    rows: factory(),
                    _permit: permit,
                }
                .boxed(),
                // The semaphore is never closed while the scheduler lives;
                // surface the condition instead of panicking.
                Err(_) => stream::once(async {
                    Err(HierarchyError::executor(anyhow::anyhow!(
                        "query scheduler shut down"
                    )))
                })
                .boxed(),
            }
        })
        .flatten()
        .boxed();
        SharedStream::new(rows)
    }
}
