//! Exhaustion policies applied when a host is at capacity

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What `borrow` does when no idle connection exists and the active count
/// has reached the configured maximum.
///
/// # Examples
///
/// ```
/// use hostpool::{ExhaustedAction, ExhaustionPolicy};
/// use std::time::Duration;
///
/// let wait = Some(Duration::from_millis(250));
/// assert_eq!(ExhaustionPolicy::Fail.on_exhausted(wait), ExhaustedAction::Fail);
/// assert_eq!(ExhaustionPolicy::Block.on_exhausted(wait), ExhaustedAction::Wait(wait));
/// assert_eq!(ExhaustionPolicy::Grow.on_exhausted(wait), ExhaustedAction::Grow);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ExhaustionPolicy {
    /// Fail immediately with `PoolExhausted`
    Fail,

    /// Wait for a released connection or a freed slot, up to the maximum wait
    #[default]
    Block,

    /// Ignore the active ceiling and create another connection
    Grow,
}

/// Decision taken for a single exhausted borrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedAction {
    Fail,
    /// Suspend the caller; `None` waits until a handoff arrives
    Wait(Option<Duration>),
    Grow,
}

impl ExhaustionPolicy {
    /// Decide what an exhausted borrow should do.
    pub fn on_exhausted(self, max_wait: Option<Duration>) -> ExhaustedAction {
        match self {
            ExhaustionPolicy::Fail => ExhaustedAction::Fail,
            ExhaustionPolicy::Block => ExhaustedAction::Wait(max_wait),
            ExhaustionPolicy::Grow => ExhaustedAction::Grow,
        }
    }

    /// Map a policy name to a policy. Unknown names yield `Block`.
    ///
    /// ```
    /// use hostpool::ExhaustionPolicy;
    ///
    /// assert_eq!(ExhaustionPolicy::from_name("WHEN_EXHAUSTED_GROW"), ExhaustionPolicy::Grow);
    /// assert_eq!(ExhaustionPolicy::from_name("fail"), ExhaustionPolicy::Fail);
    /// assert_eq!(ExhaustionPolicy::from_name("sometimes"), ExhaustionPolicy::Block);
    /// ```
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_uppercase();
        match name.strip_prefix("WHEN_EXHAUSTED_").unwrap_or(&name) {
            "FAIL" => ExhaustionPolicy::Fail,
            "GROW" => ExhaustionPolicy::Grow,
            _ => ExhaustionPolicy::Block,
        }
    }

    /// Whether a saturated pool under this policy counts as exhausted.
    /// A growing pool never does.
    pub fn can_exhaust(self) -> bool {
        !matches!(self, ExhaustionPolicy::Grow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_block() {
        assert_eq!(ExhaustionPolicy::default(), ExhaustionPolicy::Block);
        assert_eq!(ExhaustionPolicy::from_name(""), ExhaustionPolicy::Block);
    }

    #[test]
    fn test_block_without_limit_waits_indefinitely() {
        assert_eq!(
            ExhaustionPolicy::Block.on_exhausted(None),
            ExhaustedAction::Wait(None)
        );
    }

    #[test]
    fn test_grow_never_exhausts() {
        assert!(ExhaustionPolicy::Fail.can_exhaust());
        assert!(ExhaustionPolicy::Block.can_exhaust());
        assert!(!ExhaustionPolicy::Grow.can_exhaust());
    }
}
