use std::mem;

use crate::models::{Batch, Comment, Record, Submission};

/// Independent per-kind buffers that hand back a full [`Batch`] once a kind reaches the
/// threshold. Filling one kind never flushes the other.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    submissions: Vec<Submission>,
    comments: Vec<Comment>,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        BatchAccumulator {
            batch_size,
            submissions: Vec::with_capacity(batch_size),
            comments: Vec::new(),
        }
    }

    /// Buffers `record`, returning the kind's full batch when this record completes it.
    pub fn push(&mut self, record: Record) -> Option<Batch> {
        match record {
            Record::Submission(s) => {
                self.submissions.push(s);
                (self.submissions.len() >= self.batch_size)
                    .then(|| Batch::Submissions(self.take_submissions()))
            }
            Record::Comment(c) => {
                self.comments.push(c);
                (self.comments.len() >= self.batch_size)
                    .then(|| Batch::Comments(self.take_comments()))
            }
        }
    }

    /// Takes whatever is left at end of stream; at most one partial batch per kind.
    pub fn drain(&mut self) -> Vec<Batch> {
        let mut rest = Vec::with_capacity(2);
        if !self.submissions.is_empty() {
            rest.push(Batch::Submissions(mem::take(&mut self.submissions)));
        }
        if !self.comments.is_empty() {
            rest.push(Batch::Comments(mem::take(&mut self.comments)));
        }
        rest
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.submissions.len() + self.comments.len()
    }

    fn take_submissions(&mut self) -> Vec<Submission> {
        mem::replace(&mut self.submissions, Vec::with_capacity(self.batch_size))
    }

    fn take_comments(&mut self) -> Vec<Comment> {
        mem::replace(&mut self.comments, Vec::with_capacity(self.batch_size))
    }
}
