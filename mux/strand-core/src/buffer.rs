// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A size-class free list for receive and staging buffers.
//!
//! Buffers are handed out as [`NetBuf`] guards; dropping a guard returns
//! the allocation to its class. Every exit path, including unwinds,
//! releases through `Drop`, and a released buffer cannot be released
//! twice because the guard is consumed by value.

use std::sync::{Arc, Mutex};

/// Allocation sizes served from the free lists; anything larger is
/// allocated directly and not retained.
const CLASSES: [usize; 4] = [4 << 10, 16 << 10, 64 << 10, 1 << 20];

/// Buffers kept per class before further releases are dropped
const MAX_RETAINED: usize = 32;

#[derive(Default)]
struct Shelf {
    buffers: Vec<Vec<u8>>,
}

/// A shared pool of reusable byte buffers
#[derive(Clone)]
pub struct NetBufPool {
    shelves: Arc<[Mutex<Shelf>; 4]>,
}

impl Default for NetBufPool {
    fn default() -> Self {
        Self::new()
    }
}

impl NetBufPool {
    pub fn new() -> Self {
        Self {
            shelves: Arc::new([
                Mutex::new(Shelf::default()),
                Mutex::new(Shelf::default()),
                Mutex::new(Shelf::default()),
                Mutex::new(Shelf::default()),
            ]),
        }
    }

    fn class_of(size: usize) -> Option<usize> {
        CLASSES.iter().position(|class| size <= *class)
    }

    /// Acquires a buffer with capacity for at least `size` bytes
    ///
    /// The returned buffer is empty; callers append or resize as needed.
    pub fn get(&self, size: usize) -> NetBuf {
        let Some(class) = Self::class_of(size) else {
            return NetBuf {
                data: Vec::with_capacity(size),
                class: None,
                pool: self.clone(),
            };
        };

        let recycled = self.shelves[class]
            .lock()
            .ok()
            .and_then(|mut shelf| shelf.buffers.pop());
        let data = recycled.unwrap_or_else(|| Vec::with_capacity(CLASSES[class]));

        NetBuf {
            data,
            class: Some(class),
            pool: self.clone(),
        }
    }

    fn put(&self, class: usize, mut data: Vec<u8>) {
        data.clear();
        if let Ok(mut shelf) = self.shelves[class].lock() {
            if shelf.buffers.len() < MAX_RETAINED {
                shelf.buffers.push(data);
            }
        }
    }

    #[cfg(test)]
    fn retained(&self, class: usize) -> usize {
        self.shelves[class].lock().unwrap().buffers.len()
    }
}

/// A pooled buffer; returns to its pool on drop
pub struct NetBuf {
    data: Vec<u8>,
    class: Option<usize>,
    pool: NetBufPool,
}

impl NetBuf {
    /// Detaches the allocation from the pool
    pub fn into_vec(mut self) -> Vec<u8> {
        self.class = None;
        core::mem::take(&mut self.data)
    }
}

impl core::ops::Deref for NetBuf {
    type Target = Vec<u8>;

    #[inline]
    fn deref(&self) -> &Vec<u8> {
        &self.data
    }
}

impl core::ops::DerefMut for NetBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl Drop for NetBuf {
    fn drop(&mut self) {
        if let Some(class) = self.class.take() {
            let data = core::mem::take(&mut self.data);
            self.pool.put(class, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_recycle_within_class() {
        let pool = NetBufPool::new();
        {
            let mut buf = pool.get(1000);
            buf.extend_from_slice(&[1, 2, 3]);
            assert_eq!(&buf[..], &[1, 2, 3]);
        }
        assert_eq!(pool.retained(0), 1);

        let buf = pool.get(1000);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 4 << 10);
        drop(buf);
        assert_eq!(pool.retained(0), 1);
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let pool = NetBufPool::new();
        let buf = pool.get((1 << 20) + 1);
        drop(buf);
        for class in 0..CLASSES.len() {
            assert_eq!(pool.retained(class), 0);
        }
    }

    #[test]
    fn into_vec_detaches() {
        let pool = NetBufPool::new();
        let mut buf = pool.get(16);
        buf.extend_from_slice(b"abc");
        let vec = buf.into_vec();
        assert_eq!(vec, b"abc");
        assert_eq!(pool.retained(0), 0);
    }

    #[test]
    fn class_selection() {
        assert_eq!(NetBufPool::class_of(1), Some(0));
        assert_eq!(NetBufPool::class_of(4 << 10), Some(0));
        assert_eq!(NetBufPool::class_of((4 << 10) + 1), Some(1));
        assert_eq!(NetBufPool::class_of(1 << 20), Some(3));
        assert_eq!(NetBufPool::class_of((1 << 20) + 1), None);
    }
}
