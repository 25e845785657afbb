//! Cursor over a changeset's marks with length-aligned popping.

use crate::mark::algebra::split_mark;
use crate::mark::Mark;

/// Walks a mark list front to back, splitting marks so that callers can
/// consume spans of exactly the length they need.
#[derive(Debug)]
pub struct MarkQueue<'a, T> {
    marks: &'a [Mark<T>],
    index: usize,
    stash: Option<Mark<T>>,
}

impl<'a, T: Clone> MarkQueue<'a, T> {
    pub fn new(marks: &'a [Mark<T>]) -> Self {
        Self {
            marks,
            index: 0,
            stash: None,
        }
    }

    pub fn peek(&self) -> Option<&Mark<T>> {
        self.stash.as_ref().or_else(|| self.marks.get(self.index))
    }

    pub fn is_empty(&self) -> bool {
        self.peek().is_none()
    }

    pub fn pop(&mut self) -> Option<Mark<T>> {
        if let Some(stashed) = self.stash.take() {
            return Some(stashed);
        }
        let mark = self.marks.get(self.index).cloned();
        if mark.is_some() {
            self.index += 1;
        }
        mark
    }

    /// Pops at most `length` of the next mark, stashing the remainder.
    pub fn pop_up_to(&mut self, length: u32) -> Option<Mark<T>> {
        let mark = self.pop()?;
        if mark.count <= length {
            return Some(mark);
        }
        let (head, tail) = split_mark(&mark, length);
        self.stash = Some(tail);
        Some(head)
    }
}
