use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ClipBoardInner<T> {
    queue: VecDeque<T>,
    num_in: u64,
    num_out: u64,
}

/// A FIFO hand-off between one producer thread and one consumer.
///
/// Items are moved in and moved out; the ClipBoard never clones its payload, so a batch lives
/// in at most one place at a time. Popping never waits for data: an empty ClipBoard returns
/// `None` immediately. The lock is held only for the queue mutation itself.
///
/// The in/out counters are cumulative and never reset. They are updated under the same lock as
/// the queue so `size() == num_data_in() - num_data_out()` always holds.
///
/// Sharing one ClipBoard between several producers or several consumers is not supported.
#[derive(Debug)]
pub struct ClipBoard<T> {
    inner: Mutex<ClipBoardInner<T>>,
}

impl<T> Default for ClipBoard<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClipBoard<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClipBoardInner {
                queue: VecDeque::new(),
                num_in: 0,
                num_out: 0,
            }),
        }
    }

    // A panic while holding the lock cannot leave the queue half-modified, so a poisoned
    // lock is still usable.
    fn lock(&self) -> MutexGuard<'_, ClipBoardInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_data(&self, item: T) {
        let mut inner = self.lock();
        inner.queue.push_back(item);
        inner.num_in += 1;
    }

    pub fn pop_data(&self) -> Option<T> {
        let mut inner = self.lock();
        let item = inner.queue.pop_front()?;
        inner.num_out += 1;
        Some(item)
    }

    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn num_data_in(&self) -> u64 {
        self.lock().num_in
    }

    pub fn num_data_out(&self) -> u64 {
        self.lock().num_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_and_counters() {
        let clipboard = ClipBoard::new();
        clipboard.push_data(vec![1]);
        clipboard.push_data(vec![2, 2]);
        clipboard.push_data(vec![3, 3, 3]);
        assert_eq!(clipboard.size(), 3);
        assert_eq!(clipboard.num_data_in(), 3);

        assert_eq!(clipboard.pop_data(), Some(vec![1]));
        assert_eq!(clipboard.pop_data(), Some(vec![2, 2]));
        assert_eq!(clipboard.pop_data(), Some(vec![3, 3, 3]));
        assert_eq!(clipboard.num_data_in(), 3);
        assert_eq!(clipboard.num_data_out(), 3);

        assert_eq!(clipboard.pop_data(), None);
        assert_eq!(clipboard.num_data_in(), 3);
        assert_eq!(clipboard.num_data_out(), 3);
        assert!(clipboard.empty());
    }

    #[test]
    fn test_producer_thread() {
        let clipboard = Arc::new(ClipBoard::new());
        let producer = {
            let clipboard = clipboard.clone();
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    clipboard.push_data(i);
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 1000 {
            match clipboard.pop_data() {
                Some(i) => received.push(i),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert_eq!(received, (0..1000).collect::<Vec<_>>());
        assert_eq!(clipboard.num_data_in(), 1000);
        assert_eq!(clipboard.num_data_out(), 1000);
    }
}
