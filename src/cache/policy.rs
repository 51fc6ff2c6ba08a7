//! Invalidation Policy Module
//!
//! Describes how a single entry becomes stale.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::cache::Dependency;
use crate::error::{CacheError, Result};

/// Longest accepted sliding window.
pub const MAX_SLIDING_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// == Invalidation ==
/// Expiry strategy of an entry. Exactly one strategy is active per entry and
/// it never changes after the entry is created.
#[derive(Clone, Default)]
pub enum Invalidation {
    /// Entry lives until it is removed or overwritten
    #[default]
    Never,
    /// Expires once `now >= at`
    Absolute(DateTime<Utc>),
    /// Expires once it has not been read for the window
    Sliding(Duration),
    /// Expires as soon as any dependency reports a change
    Dependencies(Vec<Arc<dyn Dependency>>),
}

impl Invalidation {
    /// Expires at `at`, normalized to UTC.
    pub fn absolute<Tz: TimeZone>(at: DateTime<Tz>) -> Self {
        Self::Absolute(at.with_timezone(&Utc))
    }

    /// Expires `ttl` from now.
    pub fn absolute_in(ttl: Duration) -> Self {
        let at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::Absolute(at)
    }

    /// Expires after `window` without a read.
    ///
    /// Fails unless `0 < window <= 365 days`.
    pub fn sliding(window: Duration) -> Result<Self> {
        if window.is_zero() || window > MAX_SLIDING_WINDOW {
            return Err(CacheError::InvalidSlidingWindow(window));
        }
        Ok(Self::Sliding(window))
    }

    /// Expires when any of `dependencies` changes. No dependencies means no expiry.
    pub fn dependencies<I>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Dependency>>,
    {
        let dependencies: Vec<_> = dependencies.into_iter().collect();
        if dependencies.is_empty() {
            Self::Never
        } else {
            Self::Dependencies(dependencies)
        }
    }

    /// Whether any strategy can ever expire the entry.
    pub fn can_expire(&self) -> bool {
        match self {
            Self::Never => false,
            Self::Absolute(_) | Self::Sliding(_) => true,
            Self::Dependencies(dependencies) => !dependencies.is_empty(),
        }
    }

    /// Evaluates the active strategy at `now` for an entry last read at `accessed`.
    pub fn has_expired(&self, now: DateTime<Utc>, accessed: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::Absolute(at) => now >= *at,
            Self::Sliding(window) => {
                // Clock going backwards reads as zero elapsed time.
                let elapsed = (now - accessed).to_std().unwrap_or(Duration::ZERO);
                elapsed >= *window
            }
            Self::Dependencies(dependencies) => dependencies.iter().any(|d| d.has_changed()),
        }
    }

    /// Dependencies attached to this policy, if any.
    pub fn dependency_list(&self) -> &[Arc<dyn Dependency>] {
        match self {
            Self::Dependencies(dependencies) => dependencies,
            _ => &[],
        }
    }
}

impl fmt::Debug for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Absolute(at) => f.debug_tuple("Absolute").field(at).finish(),
            Self::Sliding(window) => f.debug_tuple("Sliding").field(window).finish(),
            Self::Dependencies(dependencies) => f
                .debug_tuple("Dependencies")
                .field(&dependencies.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SignalDependency;
    use chrono::FixedOffset;

    #[test]
    fn test_sliding_window_bounds() {
        assert!(matches!(
            Invalidation::sliding(Duration::ZERO),
            Err(CacheError::InvalidSlidingWindow(_))
        ));
        assert!(matches!(
            Invalidation::sliding(MAX_SLIDING_WINDOW + Duration::from_secs(1)),
            Err(CacheError::InvalidSlidingWindow(_))
        ));
        assert!(Invalidation::sliding(MAX_SLIDING_WINDOW).is_ok());
        assert!(Invalidation::sliding(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_absolute_is_normalized_to_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();

        match Invalidation::absolute(local) {
            Invalidation::Absolute(at) => {
                assert_eq!(at, Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap());
            }
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn test_absolute_boundary() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let policy = Invalidation::absolute(at);

        assert!(!policy.has_expired(at - chrono::Duration::milliseconds(1), at));
        assert!(policy.has_expired(at, at));
    }

    #[test]
    fn test_sliding_boundary() {
        let accessed = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let policy = Invalidation::sliding(Duration::from_secs(2)).unwrap();

        assert!(!policy.has_expired(accessed + chrono::Duration::milliseconds(1999), accessed));
        assert!(policy.has_expired(accessed + chrono::Duration::seconds(2), accessed));
        assert!(!policy.has_expired(accessed - chrono::Duration::seconds(5), accessed));
    }

    #[test]
    fn test_empty_dependencies_never_expire() {
        let policy = Invalidation::dependencies(Vec::new());
        assert!(matches!(policy, Invalidation::Never));
        assert!(!policy.can_expire());
    }

    #[test]
    fn test_dependency_change_expires() {
        let dependency = SignalDependency::new();
        let policy = Invalidation::dependencies([dependency.clone() as Arc<dyn Dependency>]);
        let now = Utc::now();

        assert!(policy.can_expire());
        assert!(!policy.has_expired(now, now));
        dependency.signal();
        assert!(policy.has_expired(now, now));
    }

    #[test]
    fn test_can_expire() {
        assert!(!Invalidation::Never.can_expire());
        assert!(Invalidation::absolute_in(Duration::from_secs(60)).can_expire());
        assert!(Invalidation::sliding(Duration::from_secs(60))
            .unwrap()
            .can_expire());
    }
}
