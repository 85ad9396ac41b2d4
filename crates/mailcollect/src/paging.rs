//! Lazy flattening of cursor-paged APIs into a stream of items.
//!
//! At most one page is buffered. The next page is requested only once the
//! consumer has drained the current one, so a consumer that stops early
//! (for example with `take(n)`) never triggers further requests.

use std::collections::VecDeque;
use std::future::Future;

use futures_util::stream::{self, BoxStream};

use crate::error::Result;

/// One page of results and the cursor for the next, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

struct State<F, T> {
    fetch: F,
    buffer: VecDeque<T>,
    cursor: Cursor,
}

/// Builds a stream that calls `fetch_page(None)` for the first page and
/// `fetch_page(Some(cursor))` for each following one.
///
/// A failed page fetch is yielded as an error and ends the stream.
pub fn paginate<'a, T, F, Fut>(fetch_page: F) -> BoxStream<'a, Result<T>>
where
    T: Send + 'a,
    F: FnMut(Option<String>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>>> + Send + 'a,
{
    let state = State {
        fetch: fetch_page,
        buffer: VecDeque::new(),
        cursor: Cursor::Start,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.buffer.pop_front() {
                return Some((Ok(item), state));
            }

            let cursor = match std::mem::replace(&mut state.cursor, Cursor::Exhausted) {
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
                Cursor::Exhausted => return None,
            };

            match (state.fetch)(cursor).await {
                Ok(page) => {
                    state.buffer.extend(page.items);
                    if let Some(next) = page.next {
                        state.cursor = Cursor::Next(next);
                    }
                }
                Err(e) => return Some((Err(e), state)),
            }
        }
    }))
}
