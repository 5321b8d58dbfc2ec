use serde::{Deserialize, Serialize};
use spyglass_symbols::hashing::hash_pcs;

/// One sampled call stack: the sampled thread plus the program counters from
/// leaf (index 0) to root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStack {
    pub thread_id: i32,
    pub pcs: Vec<u64>,
}

impl CallStack {
    pub fn new(thread_id: i32, pcs: Vec<u64>) -> Self {
        Self { thread_id, pcs }
    }

    pub fn depth(&self) -> usize {
        self.pcs.len()
    }

    /// Content hash over (depth, pcs). The thread id is not part of the
    /// identity: identical stacks sampled on different threads share a hash
    /// and are interned once.
    pub fn content_hash(&self) -> u64 {
        hash_pcs(&self.pcs)
    }
}

/// One occurrence of an interned call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallstackEvent {
    pub timestamp_ns: u64,
    pub callstack_hash: u64,
    pub thread_id: i32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_is_pure() {
        let a = CallStack::new(7, vec![0x10400, 0x10550]);
        let b = CallStack::new(7, vec![0x10400, 0x10550]);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_ignores_thread_id() {
        let a = CallStack::new(7, vec![0x10400, 0x10550]);
        let b = CallStack::new(8, vec![0x10400, 0x10550]);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_covers_content_and_depth() {
        let a = CallStack::new(7, vec![0x10400, 0x10550]);
        let b = CallStack::new(7, vec![0x10400, 0x10551]);
        let c = CallStack::new(7, vec![0x10400]);
        assert_ne!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }
}
