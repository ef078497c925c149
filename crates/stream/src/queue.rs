use std::cmp::Ordering;

/// Error returned when reading from an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("priority queue is empty")]
    Empty,
}

/// Sorted-vector priority queue.
///
/// Values are kept in ascending comparator order; the tail holds the
/// highest-priority value, so `peek` and `pop` are O(1) and `push` is a binary
/// search plus a shift. Among equal values the earliest push is popped first.
/// Deletion is linear in the worst case and expected to be rare.
pub struct PriorityQueue<T, F = fn(&T, &T) -> Ordering>
where
    F: Fn(&T, &T) -> Ordering,
{
    values: Vec<T>,
    cmp: F,
}

impl<T: Ord> PriorityQueue<T> {
    /// A max-queue using the natural ordering of `T`.
    pub fn max() -> Self {
        Self::with_comparator(T::cmp)
    }
}

impl<T, F> PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    pub fn with_comparator(cmp: F) -> Self {
        Self {
            values: Vec::new(),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First index whose value does not compare less than `value`.
    fn lower_bound(&self, value: &T) -> usize {
        self.values
            .partition_point(|v| (self.cmp)(v, value) == Ordering::Less)
    }

    pub fn push(&mut self, value: T) {
        let index = self.lower_bound(&value);
        self.values.insert(index, value);
    }

    pub fn peek(&self) -> Result<&T, QueueError> {
        self.values.last().ok_or(QueueError::Empty)
    }

    pub fn pop(&mut self) -> Result<T, QueueError> {
        self.values.pop().ok_or(QueueError::Empty)
    }

    /// Values in pop order, highest priority first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter().rev()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<T, F> PriorityQueue<T, F>
where
    T: PartialEq,
    F: Fn(&T, &T) -> Ordering,
{
    /// Remove every value equal to `value`. Returns whether anything was
    /// removed.
    ///
    /// Equal values always compare equal, so they all sit in the single run
    /// of comparator-equal values starting at the lower bound; only that run
    /// is scanned.
    pub fn delete(&mut self, value: &T) -> bool {
        let start = self.lower_bound(value);
        let end = start
            + self.values[start..]
                .iter()
                .take_while(|v| (self.cmp)(*v, value) == Ordering::Equal)
                .count();

        let before = self.values.len();
        let mut index = start;
        let mut run_end = end;
        while index < run_end {
            if self.values[index] == *value {
                self.values.remove(index);
                run_end -= 1;
            } else {
                index += 1;
            }
        }
        self.values.len() != before
    }
}

impl<T: std::fmt::Debug, F> std::fmt::Debug for PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("values", &self.values)
            .finish()
    }
}
