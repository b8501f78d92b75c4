//! Streaming group-by over clustered input
//!
//! Every consumer that buffers items sharing a key (divergence pruning,
//! training-set grouping) goes through [`GroupConsecutive`], so the final
//! group is always flushed exactly once when the input ends.

use std::iter::Peekable;

/// Iterator adaptor yielding `(key, items)` for each run of equal keys
pub struct GroupConsecutive<I, F, K>
where
    I: Iterator,
{
    iter: Peekable<I>,
    key_fn: F,
    pending_key: Option<K>,
}

impl<I, F, K> Iterator for GroupConsecutive<I, F, K>
where
    I: Iterator,
    F: FnMut(&I::Item) -> K,
    K: PartialEq,
{
    type Item = (K, Vec<I::Item>);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.iter.next()?;
        let key = match self.pending_key.take() {
            Some(key) => key,
            None => (self.key_fn)(&first),
        };
        let mut group = vec![first];
        while let Some(item) = self.iter.peek() {
            let next_key = (self.key_fn)(item);
            if next_key != key {
                self.pending_key = Some(next_key);
                break;
            }
            if let Some(item) = self.iter.next() {
                group.push(item);
            }
        }
        Some((key, group))
    }
}

/// Extension trait adding `group_consecutive` to every iterator
pub trait GroupConsecutiveExt: Iterator + Sized {
    /// Group runs of consecutive items with equal keys
    ///
    /// Items are not sorted; equal keys separated by other keys form
    /// separate groups.
    fn group_consecutive<F, K>(self, key_fn: F) -> GroupConsecutive<Self, F, K>
    where
        F: FnMut(&Self::Item) -> K,
        K: PartialEq,
    {
        GroupConsecutive {
            iter: self.peekable(),
            key_fn,
            pending_key: None,
        }
    }
}

impl<I: Iterator> GroupConsecutiveExt for I {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_consecutive() {
        let items = vec![("a", 1), ("a", 2), ("b", 3), ("a", 4)];
        let groups: Vec<_> = items.into_iter().group_consecutive(|x| x.0).collect();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], ("a", vec![("a", 1), ("a", 2)]));
        assert_eq!(groups[1], ("b", vec![("b", 3)]));
        // the last group is flushed once at end of input
        assert_eq!(groups[2], ("a", vec![("a", 4)]));
    }

    #[test]
    fn test_group_consecutive_empty() {
        let items: Vec<i32> = Vec::new();
        assert_eq!(items.into_iter().group_consecutive(|x| *x).count(), 0);
    }

    #[test]
    fn test_group_consecutive_single_group() {
        let groups: Vec<_> = vec![1, 1, 1].into_iter().group_consecutive(|x| *x).collect();
        assert_eq!(groups, vec![(1, vec![1, 1, 1])]);
    }
}
