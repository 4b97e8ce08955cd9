//! Shared replayable streams.
//!
//! The cache and the query scheduler both hand the same produced sequence to
//! multiple consumers. [`SharedStream`] multicasts a source stream: one
//! subscriber at a time drives the source, every emitted item is buffered,
//! and subscribers replay the buffer before waiting for fresh items. A
//! terminal error is stored in an error slot and delivered to every
//! subscriber that reaches the end of the buffer.
//!
//! The source is only polled on demand. A shared stream whose subscribers
//! all drop before the first poll never touches the source at all.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex;

use crate::error::{HierarchyError, HierarchyResult};

enum Terminal {
    Complete,
    Failed(HierarchyError),
}

struct State<T> {
    source: Option<BoxStream<'static, HierarchyResult<T>>>,
    buffer: Vec<T>,
    terminal: Option<Terminal>,
}

/// A multicast, replayable stream of `T`.
pub struct SharedStream<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        SharedStream {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> SharedStream<T> {
    /// Wrap a cold source stream. The source is not polled until the first
    /// subscriber needs an item past the (initially empty) buffer.
    pub fn new(source: BoxStream<'static, HierarchyResult<T>>) -> Self {
        SharedStream {
            state: Arc::new(Mutex::new(State {
                source: Some(source),
                buffer: Vec::new(),
                terminal: None,
            })),
        }
    }

    /// A shared stream over an already-materialized item list.
    pub fn from_items(items: Vec<T>) -> Self {
        SharedStream {
            state: Arc::new(Mutex::new(State {
                source: None,
                buffer: items,
                terminal: Some(Terminal::Complete),
            })),
        }
    }

    /// Subscribe to the stream. Buffered items are replayed first; the
    /// subscriber that exhausts the buffer drives the source for everyone.
    pub fn subscribe(&self) -> BoxStream<'static, HierarchyResult<T>> {
        let state = Arc::clone(&self.state);
        stream::unfold((0usize, false), move |(next, done)| {
            let state = Arc::clone(&state);
            async move {
                if done {
                    return None;
                }
                loop {
                    let mut guard = state.lock().await;
                    if next < guard.buffer.len() {
                        let item = guard.buffer[next].clone();
                        return Some((Ok(item), (next + 1, false)));
                    }
                    match &guard.terminal {
                        Some(Terminal::Complete) => return None,
                        Some(Terminal::Failed(err)) => {
                            return Some((Err(err.clone()), (next, true)));
                        }
                        None => {}
                    }
                    // Drive the source while holding the lock. A competing
                    // subscriber parks on the lock and sees the new buffer
                    // entry on wake-up. If this subscriber is dropped
                    // mid-poll the source stays intact for the next one.
                    let item = match guard.source.as_mut() {
                        Some(source) => source.next().await,
                        None => None,
                    };
                    match item {
                        Some(Ok(value)) => guard.buffer.push(value),
                        Some(Err(err)) => {
                            guard.terminal = Some(Terminal::Failed(err));
                            guard.source = None;
                        }
                        None => {
                            guard.terminal = Some(Terminal::Complete);
                            guard.source = None;
                        }
                    }
                }
            }
        })
        .boxed()
    }

    /// Whether the source has terminated and all items are buffered.
    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.terminal.is_some()
    }
}
