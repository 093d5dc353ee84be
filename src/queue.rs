// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Blocking FIFO of raw port reads between the YMODEM-G reader and the
//! block assembler.
//!
//! The queue starts at a modest capacity and doubles (up to a hard limit)
//! instead of blocking the producer. Closing it wakes every waiter, which is
//! how either side of the pipeline tells the other to stop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
}

struct QueueState {
    items: VecDeque<Vec<u8>>,
    capacity: usize,
    closed: bool,
}

pub struct ChunkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    max_capacity: usize,
}

impl ChunkQueue {
    pub fn new(capacity: usize, max_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ChunkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            max_capacity: max_capacity.max(capacity),
        }
    }

    /// Append a chunk, growing the queue if it is full. Blocks only once the
    /// hard limit is reached, until a chunk is taken or the queue is closed.
    pub fn put(&self, chunk: Vec<u8>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.items.len() < state.capacity {
                state.items.push_back(chunk);
                self.not_empty.notify_one();
                return Ok(());
            }
            if state.capacity < self.max_capacity {
                state.capacity = (state.capacity * 2).min(self.max_capacity);
                debug!("Chunk queue grown to {}", state.capacity);
                continue;
            }
            self.not_full.wait(&mut state);
        }
    }

    /// Oldest chunk, waiting up to `timeout` for one. Chunks queued before
    /// a close are still handed out; after that a closed queue is an error.
    pub fn take(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(chunk) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(chunk));
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.items.pop_front().inspect(|_| {
                    self.not_full.notify_one();
                }));
            }
        }
    }

    /// Wake all waiters; later puts fail and takes fail once drained.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Remove and return everything queued, oldest first
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut state = self.state.lock();
        let items = state.items.drain(..).collect();
        self.not_full.notify_all();
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let q = ChunkQueue::new(4, 4);
        for i in 0..4u8 {
            q.put(vec![i]).unwrap();
        }
        for i in 0..4u8 {
            assert_eq!(q.take(Duration::ZERO).unwrap(), Some(vec![i]));
        }
        assert_eq!(q.take(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn test_grows_instead_of_blocking() {
        let q = ChunkQueue::new(2, 16);
        for i in 0..10u8 {
            q.put(vec![i]).unwrap();
        }
        assert_eq!(q.len(), 10);
        assert_eq!(q.capacity(), 16);
        let drained = q.drain();
        assert_eq!(drained.len(), 10);
        assert_eq!(drained[9], vec![9]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_put_blocks_at_limit_until_take() {
        let q = Arc::new(ChunkQueue::new(1, 2));
        q.put(vec![1]).unwrap();
        q.put(vec![2]).unwrap();

        let producer = {
            let q = q.clone();
            std::thread::spawn(move || q.put(vec![3]))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len(), 2);

        assert_eq!(q.take(Duration::ZERO).unwrap(), Some(vec![1]));
        producer.join().unwrap().unwrap();
        assert_eq!(q.take(Duration::ZERO).unwrap(), Some(vec![2]));
        assert_eq!(q.take(Duration::ZERO).unwrap(), Some(vec![3]));
    }

    #[test]
    fn test_close_wakes_blocked_take() {
        let q = Arc::new(ChunkQueue::new(4, 4));
        let consumer = {
            let q = q.clone();
            std::thread::spawn(move || q.take(Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), Err(QueueError::Closed));
        assert_eq!(q.put(vec![1]), Err(QueueError::Closed));
        assert!(q.is_closed());
    }

    #[test]
    fn test_close_wakes_blocked_put() {
        let q = Arc::new(ChunkQueue::new(1, 1));
        q.put(vec![0]).unwrap();
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || q.put(vec![1]))
        };
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(producer.join().unwrap(), Err(QueueError::Closed));
    }

    #[test]
    fn test_drains_before_reporting_closed() {
        let q = ChunkQueue::new(4, 4);
        q.put(vec![7]).unwrap();
        q.close();
        assert_eq!(q.take(Duration::ZERO).unwrap(), Some(vec![7]));
        assert_eq!(q.take(Duration::ZERO), Err(QueueError::Closed));
    }

    #[test]
    fn test_concurrent_consumers_never_share_a_chunk() {
        let q = Arc::new(ChunkQueue::new(8, 64));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(Some(chunk)) = q.take(Duration::from_millis(200)) {
                        seen.push(u32::from_be_bytes(chunk.try_into().unwrap()));
                    }
                    seen
                })
            })
            .collect();

        for i in 0..1000u32 {
            q.put(i.to_be_bytes().to_vec()).unwrap();
        }

        let mut all: Vec<u32> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
