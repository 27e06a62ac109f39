use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use super::message::Request;

/// Unbounded FIFO of requests. Pushing wakes one waiter.
#[derive(Default)]
pub struct PendingQueue {
    items: Mutex<VecDeque<Request>>,
    pushed: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Request>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_back(&self, request: Request) {
        self.lock().push_back(request);
        self.pushed.notify_one();
    }

    /// Head insertion for requeued requests and heartbeat acks.
    pub fn push_front(&self, request: Request) {
        self.lock().push_front(request);
        self.pushed.notify_one();
    }

    /// Puts `requests` ahead of everything queued, keeping their order.
    pub fn prepend(&self, requests: Vec<Request>) {
        if requests.is_empty() {
            return;
        }
        {
            let mut items = self.lock();
            for request in requests.into_iter().rev() {
                items.push_front(request);
            }
        }
        self.pushed.notify_one();
    }

    pub fn pop_front(&self) -> Option<Request> {
        self.lock().pop_front()
    }

    pub fn drain(&self) -> Vec<Request> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.lock().iter().map(|r| r.id).collect()
    }

    pub fn notified(&self) -> Notified<'_> {
        self.pushed.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: i64) -> Request {
        Request {
            id,
            method: "private/get-account-summary".to_string(),
            nonce: id,
            params: None,
            api_key: None,
            signature: None,
        }
    }

    #[test]
    fn test_fifo_with_head_insertion() {
        let queue = PendingQueue::new();
        queue.push_back(request(2));
        queue.push_back(request(3));
        queue.push_front(request(1));
        assert_eq!(queue.ids(), vec![1, 2, 3]);
        assert_eq!(queue.pop_front().map(|r| r.id), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_prepend_keeps_order() {
        let queue = PendingQueue::new();
        queue.push_back(request(10));
        queue.prepend(vec![request(1), request(2), request(3)]);
        assert_eq!(queue.ids(), vec![1, 2, 3, 10]);
        assert_eq!(queue.drain().len(), 4);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = std::sync::Arc::new(PendingQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;
        queue.push_back(request(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
