use serde::{Deserialize, Serialize};

use super::grid::LayerId;
use crate::error::{Error, Result};

/// A routing track on one layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TrackId {
    pub layer: LayerId,
    pub index: i64,
    /// Width in number of tracks.
    pub width: usize,
}

impl TrackId {
    #[inline]
    pub fn new(layer: LayerId, index: i64) -> Self {
        Self {
            layer,
            index,
            width: 1,
        }
    }

    /// The track `delta` indices away on the same layer.
    #[inline]
    pub fn offset(&self, delta: i64) -> Self {
        Self {
            index: self.index + delta,
            ..*self
        }
    }
}

/// A fixed-size pool of slots handed out in cyclic order.
///
/// Slot `k` of the overall allocation sequence is `slots[k % capacity]`, so a
/// slot is reused once the allocation wraps around.
#[derive(Debug, Clone)]
pub struct TrackRing<T> {
    slots: Vec<T>,
    cursor: usize,
}

impl<T: Clone> TrackRing<T> {
    pub fn new(slots: Vec<T>) -> Self {
        Self { slots, cursor: 0 }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots handed out so far, including wrapped ones.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Takes the next `n` slots, wrapping around the end of the pool.
    ///
    /// More than `capacity` slots at once would hand out a slot twice.
    pub fn take(&mut self, n: usize) -> Result<Vec<T>> {
        let capacity = self.capacity();
        if n > capacity {
            return Err(Error::ResourceExhausted {
                required: n,
                available: capacity,
            });
        }
        let out = (0..n)
            .map(|i| self.slots[(self.cursor + i) % capacity].clone())
            .collect();
        self.cursor += n;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps() {
        let mut ring = TrackRing::new((0..6).collect::<Vec<usize>>());
        assert_eq!(ring.take(1).unwrap(), vec![0]);
        assert_eq!(ring.take(2).unwrap(), vec![1, 2]);
        assert_eq!(ring.take(4).unwrap(), vec![3, 4, 5, 0]);
        assert_eq!(ring.cursor(), 7);
    }

    #[test]
    fn test_ring_rejects_oversized_request() {
        let mut ring = TrackRing::new(vec![TrackId::new(4, 0), TrackId::new(4, 1)]);
        assert!(matches!(
            ring.take(3),
            Err(Error::ResourceExhausted {
                required: 3,
                available: 2
            })
        ));
        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn test_empty_ring() {
        let mut ring: TrackRing<usize> = TrackRing::new(Vec::new());
        assert!(ring.take(0).unwrap().is_empty());
        assert!(ring.take(1).is_err());
    }
}
