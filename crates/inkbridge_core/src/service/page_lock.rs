//! Per-page pass exclusion.
//!
//! # Invariants
//! - At most one guard exists per page id at a time.
//! - Dropping the guard releases the page.

use crate::model::block::PageId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Shared registry of pages with a pass or edit in flight.
#[derive(Debug, Clone, Default)]
pub struct PageLocks {
    active: Arc<Mutex<HashSet<PageId>>>,
}

impl PageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `page_id`, or returns `None` when it is already claimed.
    pub fn try_acquire(&self, page_id: &str) -> Option<PageGuard> {
        if !self.active.lock().insert(page_id.to_string()) {
            return None;
        }
        Some(PageGuard {
            active: Arc::clone(&self.active),
            page_id: page_id.to_string(),
        })
    }

    pub fn is_locked(&self, page_id: &str) -> bool {
        self.active.lock().contains(page_id)
    }
}

/// Exclusive claim on one page.
#[derive(Debug)]
pub struct PageGuard {
    active: Arc<Mutex<HashSet<PageId>>>,
    page_id: PageId,
}

impl PageGuard {
    pub fn page_id(&self) -> &str {
        &self.page_id
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::PageLocks;
    use std::thread;

    #[test]
    fn second_claim_fails_until_guard_drops() {
        let locks = PageLocks::new();
        let guard = locks.try_acquire("page-1").expect("first claim");
        assert!(locks.try_acquire("page-1").is_none());
        assert!(locks.try_acquire("page-2").is_some());

        drop(guard);
        assert!(!locks.is_locked("page-1"));
        assert!(locks.try_acquire("page-1").is_some());
    }

    #[test]
    fn claims_are_shared_across_threads() {
        let locks = PageLocks::new();
        let _guard = locks.try_acquire("page-1").expect("first claim");
        let other = locks.clone();
        let contended = thread::spawn(move || other.try_acquire("page-1").is_none())
            .join()
            .expect("thread should not panic");
        assert!(contended);
    }

    #[test]
    fn panicking_holder_still_releases_the_page() {
        let locks = PageLocks::new();
        let other = locks.clone();
        let result = thread::spawn(move || {
            let _guard = other.try_acquire("page-1").expect("first claim");
            panic!("pass aborted");
        })
        .join();

        assert!(result.is_err());
        assert!(!locks.is_locked("page-1"));
        assert!(locks.try_acquire("page-1").is_some());
    }
}
