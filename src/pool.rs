//! Bounded worker pool for independent tasks
//!
//! Both per-target builds and per-path transfers run through this pool:
//! a fixed number of worker threads pull items off a shared queue until it
//! drains or cancellation is requested. Items never started after a cancel
//! are dropped and reported as `None` in the result vector.
//!
//! Ordering between items is not guaranteed and callers must not rely on
//! it; results are returned in input order regardless of completion order.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::signal::CancelFlag;

/// Run `task` over `items` with at most `limit` items in flight.
///
/// Returns one slot per input item, in input order: `Some(result)` for items
/// that ran, `None` for items dropped because cancellation was requested
/// before they started.
pub fn run_bounded<T, R, F>(limit: usize, items: Vec<T>, cancel: &CancelFlag, task: F) -> Vec<Option<R>>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> R + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = limit.max(1).min(total);
    let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..total).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.is_set() {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut q) => q.pop_front(),
                    Err(_) => None,
                };
                let Some((index, item)) = next else { break };

                let result = task(index, item);

                if let Ok(mut slots) = results.lock() {
                    slots[index] = Some(result);
                }
            });
        }
    });

    results.into_inner().unwrap_or_default()
}
