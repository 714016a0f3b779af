// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation shared between async tasks and blocking workers.
///
/// Blocking code polls [`is_cancelled`](Self::is_cancelled) between units of
/// work; async code awaits [`cancelled`](Self::cancelled). A child handle is
/// cancelled when either it or any ancestor is.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    flag: AtomicBool,
    signal: watch::Sender<bool>,
    parent: Option<CancellationHandle>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancellationHandle>) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                signal,
                parent,
            }),
        }
    }

    /// Handle that is also cancelled whenever `self` is
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .map_or(false, CancellationHandle::is_cancelled)
    }

    /// Resolves once this handle itself is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.inner.signal.subscribe();
        if *receiver.borrow() {
            return;
        }
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_child_follows_parent() {
        let parent = CancellationHandle::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let sibling = parent.child();
        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn test_cancelled_pending_until_cancel() {
        let handle = CancellationHandle::new();
        let mut waiter = tokio_test::task::spawn(handle.cancelled());

        tokio_test::assert_pending!(waiter.poll());
        handle.cancel();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cancellation was not observed")
            .unwrap();
    }
}
