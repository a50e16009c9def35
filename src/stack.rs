//! Bounded evaluation stack of owned token strings.
//!
//! Every operand and intermediate result lives here as its textual token;
//! typing happens lazily when an operation resolves a popped token.

/// Smallest stack any interpreter can be constructed with.
pub const MIN_STACK_SIZE: usize = 3;

/// LIFO stack with a fixed capacity decided at construction time.
#[derive(Debug)]
pub struct Stack {
    items: Vec<String>,
    capacity: usize,
}

impl Stack {
    /// Creates an empty stack holding at most `capacity` tokens.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a token. Fails on a full stack or an empty token.
    #[must_use]
    pub fn push(&mut self, token: &str) -> bool {
        if token.is_empty() || self.items.len() >= self.capacity {
            return false;
        }
        self.items.push(token.to_owned());
        true
    }

    /// Pops the most recent token, or `None` when empty.
    pub fn pop(&mut self) -> Option<String> {
        self.items.pop()
    }

    /// Duplicates the top token. Fails when empty or full.
    #[must_use]
    pub fn duplicate(&mut self) -> bool {
        if self.items.is_empty() || self.items.len() >= self.capacity {
            return false;
        }
        let top = self.items[self.items.len() - 1].clone();
        self.items.push(top);
        true
    }

    /// Exchanges the two topmost tokens. Fails with fewer than two entries.
    #[must_use]
    pub fn swap(&mut self) -> bool {
        let len = self.items.len();
        if len < 2 {
            return false;
        }
        self.items.swap(len - 1, len - 2);
        true
    }

    /// Discards all tokens.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens from bottom to top.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        self.items.iter().map(String::as_str)
    }
}
