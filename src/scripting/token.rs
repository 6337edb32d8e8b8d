/// `scripting/token.rs` — per-dispatch-site resolution cache
///
/// A trigger, alias or timer keeps one `CacheToken`. Once it is `Broken`
/// the site is skipped without touching the VM. The only way back is a full
/// engine reset: each token remembers the engine generation it was last
/// settled in, and a token from an older generation starts over.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    #[default]
    Unresolved,
    Resolved,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheToken {
    state: TokenState,
    generation: u64,
}

impl CacheToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: TokenState, generation: u64) -> Self {
        Self { state, generation }
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        self.state == TokenState::Broken
    }

    /// Engine generation the current state belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bring the token into engine generation `current`. A token settled in
    /// an earlier generation (before a reset) is unresolved again.
    pub(crate) fn sync(&mut self, current: u64) {
        if self.generation < current {
            self.state = TokenState::Unresolved;
            self.generation = current;
        }
    }

    /// No-op on a broken token.
    pub(crate) fn mark_resolved(&mut self) {
        if self.state == TokenState::Unresolved {
            self.state = TokenState::Resolved;
        }
    }

    pub(crate) fn mark_broken(&mut self) {
        self.state = TokenState::Broken;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_never_becomes_resolved() {
        let mut token = CacheToken::new();
        token.sync(1);
        token.mark_resolved();
        assert_eq!(token.state(), TokenState::Resolved);
        token.mark_broken();
        token.mark_resolved();
        assert!(token.is_broken());
    }

    #[test]
    fn broken_clears_only_in_a_later_generation() {
        let mut token = CacheToken::from_state(TokenState::Broken, 3);
        token.sync(3);
        assert!(token.is_broken());
        token.sync(2);
        assert!(token.is_broken());
        token.sync(4);
        assert_eq!(token.state(), TokenState::Unresolved);
        assert_eq!(token.generation(), 4);
    }
}
