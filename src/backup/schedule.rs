//! Scheduling gate: which sets run in this invocation, and in which order.

use crate::backup::backup_set::BackupSet;
use crate::backup::outcome::SkipReason;
use crate::backup::result_error::error::Error;
use crate::backup::run_state::{RunState, RunStateStore};
use chrono::{DateTime, FixedOffset, TimeDelta};
use itertools::Itertools;

/// Decides whether `set` may start at `now`, given its persisted state.
pub fn check(
    set: &BackupSet,
    now: DateTime<FixedOffset>,
    state: Option<&RunState>,
) -> std::result::Result<(), SkipReason> {
    if *set.disabled() {
        return Err(SkipReason::Disabled);
    }

    if let (Some(interval), Some(last_success)) = (
        set.interval(),
        state.and_then(|s| s.last_success().as_ref()),
    ) {
        let interval = TimeDelta::from_std(*interval).unwrap_or(TimeDelta::MAX);
        let elapsed = now.signed_duration_since(*last_success);
        if elapsed < interval {
            return Err(SkipReason::IntervalNotElapsed {
                remaining: interval.checked_sub(&elapsed).unwrap_or(interval),
            });
        }
    }

    if let Some(window) = set.runtime() {
        if !window.contains(now.time()) {
            return Err(SkipReason::OutsideRuntimeWindow);
        }
    }

    Ok(())
}

/// Result of gating every set of one invocation.
#[derive(Debug, Default)]
pub struct Schedule<'a> {
    /// Ascending priority, declaration order among equals.
    pub runnable: Vec<&'a BackupSet>,
    pub skipped: Vec<(&'a BackupSet, SkipReason)>,
    /// Sets whose run state could not be read. Only that set fails.
    pub failed: Vec<(&'a BackupSet, Error)>,
}

/// Gates `sets` (in declaration order) against freshly loaded state.
///
/// `force` bypasses the interval and runtime window rules, but a disabled set
/// stays disabled.
pub fn plan<'a, I, S>(
    sets: I,
    now: DateTime<FixedOffset>,
    store: &S,
    force: bool,
) -> Schedule<'a>
where
    I: IntoIterator<Item = &'a BackupSet>,
    S: RunStateStore + ?Sized,
{
    let mut schedule = Schedule::default();
    for set in sets {
        let verdict = if force {
            if *set.disabled() {
                Err(SkipReason::Disabled)
            } else {
                Ok(())
            }
        } else {
            match store.load(set.name()) {
                Ok(state) => check(set, now, state.as_ref()),
                Err(e) => {
                    schedule.failed.push((set, e));
                    continue;
                }
            }
        };

        match verdict {
            Ok(()) => schedule.runnable.push(set),
            Err(reason) => schedule.skipped.push((set, reason)),
        }
    }

    // sorted_by_key is stable
    schedule.runnable = schedule
        .runnable
        .into_iter()
        .sorted_by_key(|s| *s.pri())
        .collect();
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_set::RuntimeWindow;
    use crate::backup::result_error::result::Result;
    use crate::backup::run_state::MemoryRunStateStore;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, h, m, 0)
            .unwrap()
    }

    macro_rules! set {
        ($name:expr $(, $field:ident = $value:expr)* $(,)?) => {
            BackupSet::builder()
                .name($name)
                .backup_list(vec!["/home".to_owned()])
                .src("{dirname}")
                .dst("/backup/{setname}")
                $(.$field($value))*
                .build()
        };
    }

    fn succeeded_at(t: DateTime<FixedOffset>) -> RunState {
        RunState::succeeded(t.with_timezone(&Utc))
    }

    #[test]
    fn test_interval_gate() {
        let set = set!("home", interval = Duration::from_secs(30 * 60));
        let now = at(12, 0);

        let recent = succeeded_at(now - TimeDelta::minutes(29));
        assert_eq!(
            check(&set, now, Some(&recent)),
            Err(SkipReason::IntervalNotElapsed {
                remaining: TimeDelta::minutes(1)
            })
        );

        let older = succeeded_at(now - TimeDelta::minutes(31));
        assert!(check(&set, now, Some(&older)).is_ok());
        assert!(check(&set, now, None).is_ok());
    }

    #[test]
    fn test_interval_counts_only_success() {
        let set = set!("home", interval = Duration::from_secs(3600));
        let now = at(12, 0);
        let state = succeeded_at(now - TimeDelta::hours(2))
            .attempted((now - TimeDelta::minutes(5)).with_timezone(&Utc));
        assert!(check(&set, now, Some(&state)).is_ok());
    }

    #[test]
    fn test_runtime_window_gate() {
        let window: RuntimeWindow = "05:07:00-05:30:00".parse().unwrap();
        let set = set!("home", runtime = window);
        assert_eq!(
            check(&set, at(5, 0), None),
            Err(SkipReason::OutsideRuntimeWindow)
        );
        assert!(check(&set, at(5, 15), None).is_ok());
        assert!(check(&set, at(5, 31), None).is_err());
    }

    #[test]
    fn test_disabled_is_never_eligible() {
        let set = set!("home", disabled = true);
        assert_eq!(check(&set, at(5, 0), None), Err(SkipReason::Disabled));
    }

    #[test]
    fn test_plan_orders_by_priority_then_declaration() {
        let sets = vec![
            set!("b", pri = 10),
            set!("a", pri = 10),
            set!("first", pri = -1),
            set!("off", disabled = true),
            set!("c", pri = 10),
        ];
        let store = MemoryRunStateStore::default();
        let schedule = plan(&sets, at(1, 0), &store, false);

        let names: Vec<_> = schedule.runnable.iter().map(|s| s.name().as_str()).collect();
        assert_eq!(names, vec!["first", "b", "a", "c"]);
        assert_eq!(schedule.skipped.len(), 1);
        assert_eq!(schedule.skipped[0].1, SkipReason::Disabled);
    }

    #[test]
    fn test_force_ignores_interval_and_window_but_not_disabled() {
        let window: RuntimeWindow = "05:07:00-05:30:00".parse().unwrap();
        let sets = vec![
            set!("windowed", runtime = window),
            set!("recent", interval = Duration::from_secs(86400)),
            set!("off", disabled = true),
        ];
        let now = at(12, 0);
        let store = MemoryRunStateStore::with_states([(
            "recent".to_owned(),
            succeeded_at(now - TimeDelta::hours(1)),
        )]);

        let gated = plan(&sets, now, &store, false);
        assert!(gated.runnable.is_empty());
        assert_eq!(gated.skipped.len(), 3);

        let forced = plan(&sets, now, &store, true);
        let names: Vec<_> = forced.runnable.iter().map(|s| s.name().as_str()).collect();
        assert_eq!(names, vec!["windowed", "recent"]);
        assert_eq!(forced.skipped[0].0.name(), "off");
    }

    struct UnreadableStore;

    impl RunStateStore for UnreadableStore {
        fn load(&self, set_name: &str) -> Result<Option<RunState>> {
            if set_name == "broken" {
                Err(Error::config(format!("cannot read state of {set_name}")))
            } else {
                Ok(None)
            }
        }

        fn save(&self, _: &str, _: &RunState) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unreadable_state_fails_only_that_set() {
        let sets = vec![set!("broken"), set!("healthy"), set!("off", disabled = true)];
        let schedule = plan(&sets, at(1, 0), &UnreadableStore, false);

        let names: Vec<_> = schedule.runnable.iter().map(|s| s.name().as_str()).collect();
        assert_eq!(names, vec!["healthy"]);
        assert_eq!(schedule.failed.len(), 1);
        assert_eq!(schedule.failed[0].0.name(), "broken");
        assert_eq!(schedule.skipped.len(), 1);

        let forced = plan(&sets, at(1, 0), &UnreadableStore, true);
        assert!(forced.failed.is_empty());
        assert_eq!(forced.runnable.len(), 2);
    }
}
