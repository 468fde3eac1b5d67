//! Readiness tracking shared by the build task manager and the operation
//! evaluator.
//!
//! Nodes are dense indices.  A node becomes ready once every predecessor has
//! finished; among ready nodes the lowest index is handed out first, which is
//! registration order for both callers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Done,
}

#[derive(Debug)]
pub struct ReadyQueue {
    remaining: Vec<usize>,
    successors: Vec<Vec<usize>>,
    states: Vec<NodeState>,
    ready: BinaryHeap<Reverse<usize>>,
    running: usize,
    done: usize,
}

impl ReadyQueue {
    /// Build from per-node predecessor lists.  Duplicate entries count once.
    pub fn from_predecessors(predecessors: &[Vec<usize>]) -> Self {
        let n = predecessors.len();
        let mut successors = vec![Vec::new(); n];
        let mut remaining = vec![0; n];
        for (node, preds) in predecessors.iter().enumerate() {
            let mut preds = preds.clone();
            preds.sort_unstable();
            preds.dedup();
            for p in preds {
                successors[p].push(node);
                remaining[node] += 1;
            }
        }
        let mut queue = ReadyQueue::new(remaining, successors);
        for node in 0..n {
            if queue.remaining[node] == 0 {
                queue.mark_ready(node);
            }
        }
        queue
    }

    /// Build from counts and successor lists that already agree with each
    /// other.  Nodes listed in `start` have one count released up front.
    pub fn from_counts(remaining: Vec<usize>, successors: Vec<Vec<usize>>, start: &[usize]) -> Self {
        let mut queue = ReadyQueue::new(remaining, successors);
        for &node in start {
            queue.release(node);
        }
        queue
    }

    fn new(remaining: Vec<usize>, successors: Vec<Vec<usize>>) -> Self {
        let n = remaining.len();
        ReadyQueue {
            remaining,
            successors,
            states: vec![NodeState::Pending; n],
            ready: BinaryHeap::new(),
            running: 0,
            done: 0,
        }
    }

    fn mark_ready(&mut self, node: usize) {
        self.states[node] = NodeState::Ready;
        self.ready.push(Reverse(node));
    }

    fn release(&mut self, node: usize) {
        if self.states[node] != NodeState::Pending {
            return;
        }
        self.remaining[node] = self.remaining[node].saturating_sub(1);
        if self.remaining[node] == 0 {
            self.mark_ready(node);
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, node: usize) -> NodeState {
        self.states[node]
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Take the lowest ready node and mark it running.
    pub fn start_next(&mut self) -> Option<usize> {
        let Reverse(node) = self.ready.pop()?;
        self.states[node] = NodeState::Running;
        self.running += 1;
        Some(node)
    }

    /// Mark a running node done, readying successors whose predecessors are
    /// now all done.
    pub fn finish(&mut self, node: usize) {
        debug_assert_eq!(self.states[node], NodeState::Running);
        self.states[node] = NodeState::Done;
        self.running -= 1;
        self.done += 1;
        for i in 0..self.successors[node].len() {
            let s = self.successors[node][i];
            self.release(s);
        }
    }

    /// Mark a running node finished without releasing its successors, which
    /// then never become ready.
    pub fn abandon(&mut self, node: usize) {
        debug_assert_eq!(self.states[node], NodeState::Running);
        self.states[node] = NodeState::Done;
        self.running -= 1;
        self.done += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.states.len()
    }

    /// Nodes left Pending with nothing ready or running: the order can never
    /// complete.  Returns them in index order.
    pub fn stuck(&self) -> Option<Vec<usize>> {
        if self.is_complete() || self.has_ready() || self.running > 0 {
            return None;
        }
        Some(
            (0..self.states.len())
                .filter(|&n| self.states[n] == NodeState::Pending)
                .collect(),
        )
    }
}
