//! Scheduled and deferred functor execution, per §4.8 Chronology.
//!
//! A deferred functor runs on the next drain (deadline = now). A scheduled
//! timer is ordered by deadline and re-inserted if periodic. Multiple
//! waiters serialize through a single lock; a parent chronology may be
//! injected so a nested context composes into a larger one.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type Functor = Box<dyn FnMut() + Send>;

struct Timer {
    deadline: Instant,
    period: Option<Duration>,
    token: u64,
    cancelled: bool,
    functor: Functor,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Timer) -> bool {
        self.deadline == other.deadline && self.token == other.token
    }
}
impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Timer) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    /// Reversed so [`BinaryHeap`] (a max-heap) surfaces the earliest
    /// deadline first; ties broken by insertion order (`token`), per §5
    /// ("timers with equal deadlines fire in insertion order").
    fn cmp(&self, other: &Timer) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.token.cmp(&self.token))
    }
}

struct State {
    scheduled: BinaryHeap<Timer>,
    deferred: VecDeque<Timer>,
    next_token: u64,
}

/// A handle to a pending timer, usable with [`Chronology::cancel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A hierarchical timer store. A [`Chronology`] with a parent drains its own
/// timers first, then asks the parent to drain, composing into a larger
/// context without either store needing to know about the other's timers.
pub struct Chronology {
    state: Mutex<State>,
    parent: Option<Arc<Chronology>>,
}

impl Chronology {
    pub fn new() -> Chronology {
        Chronology {
            state: Mutex::new(State {
                scheduled: BinaryHeap::new(),
                deferred: VecDeque::new(),
                next_token: 0,
            }),
            parent: None,
        }
    }

    pub fn with_parent(parent: Arc<Chronology>) -> Chronology {
        Chronology {
            state: Mutex::new(State {
                scheduled: BinaryHeap::new(),
                deferred: VecDeque::new(),
                next_token: 0,
            }),
            parent: Some(parent),
        }
    }

    /// Enqueues `functor` to run on the next [`Chronology::drain`], with no
    /// deadline ordering against other deferred work.
    pub fn execute(&self, functor: impl FnMut() + Send + 'static) -> TimerId {
        let mut state = self.state.lock().unwrap();
        let token = state.next_token;
        state.next_token += 1;
        state.deferred.push_back(Timer {
            deadline: Instant::now(),
            period: None,
            token,
            cancelled: false,
            functor: Box::new(functor),
        });
        TimerId(token)
    }

    /// Schedules `functor` to run once `delay` has elapsed, repeating every
    /// `delay` afterwards if `periodic` is set.
    pub fn schedule(&self, delay: Duration, periodic: bool, functor: impl FnMut() + Send + 'static) -> TimerId {
        let mut state = self.state.lock().unwrap();
        let token = state.next_token;
        state.next_token += 1;
        state.scheduled.push(Timer {
            deadline: Instant::now() + delay,
            period: periodic.then_some(delay),
            token,
            cancelled: false,
            functor: Box::new(functor),
        });
        TimerId(token)
    }

    /// Marks a pending timer cancelled; it is dropped, not run, the next
    /// time it would otherwise be drained.
    pub fn cancel(&self, id: TimerId) {
        let mut state = self.state.lock().unwrap();
        // BinaryHeap has no in-place mutation; rebuild with the match
        // flagged cancelled rather than removed, so heap order is untouched.
        let scheduled = std::mem::take(&mut state.scheduled);
        state.scheduled = scheduled
            .into_iter()
            .map(|mut t| {
                if t.token == id.0 {
                    t.cancelled = true;
                }
                t
            })
            .collect();
        for timer in state.deferred.iter_mut() {
            if timer.token == id.0 {
                timer.cancelled = true;
            }
        }
    }

    /// Returns the duration until the next pending timer fires, consulting
    /// the parent chronology too; `None` means no pending timer at any
    /// level (wait indefinitely).
    pub fn next_deadline(&self) -> Option<Duration> {
        let own = {
            let state = self.state.lock().unwrap();
            if !state.deferred.is_empty() {
                Some(Duration::ZERO)
            } else {
                state
                    .scheduled
                    .peek()
                    .map(|t| t.deadline.saturating_duration_since(Instant::now()))
            }
        };
        let parent = self.parent.as_ref().and_then(|p| p.next_deadline());
        match (own, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drains deferred functors and every scheduled timer whose deadline has
    /// passed, up to `budget` total runs, then asks the parent chronology to
    /// drain under the remaining budget. Returns the number of functors run.
    pub fn drain(&self, budget: usize) -> usize {
        let mut ran = 0;
        while ran < budget {
            let next = {
                let mut state = self.state.lock().unwrap();
                if let Some(mut timer) = state.deferred.pop_front() {
                    Some(timer_take(&mut timer))
                } else if state
                    .scheduled
                    .peek()
                    .is_some_and(|t| t.cancelled || t.deadline <= Instant::now())
                {
                    let mut timer = state.scheduled.pop().unwrap();
                    if timer.cancelled {
                        None
                    } else if let Some(period) = timer.period {
                        let mut requeued = Timer {
                            deadline: timer.deadline + period,
                            period: timer.period,
                            token: timer.token,
                            cancelled: false,
                            functor: std::mem::replace(&mut timer.functor, Box::new(|| {})),
                        };
                        let functor = std::mem::replace(&mut requeued.functor, Box::new(|| {}));
                        state.scheduled.push(requeued);
                        Some(functor)
                    } else {
                        Some(timer.functor)
                    }
                } else {
                    None
                }
            };
            match next {
                Some(mut functor) => {
                    functor();
                    ran += 1;
                }
                None => break,
            }
        }
        if let Some(parent) = &self.parent {
            ran += parent.drain(budget.saturating_sub(ran));
        }
        ran
    }
}

fn timer_take(timer: &mut Timer) -> Functor {
    std::mem::replace(&mut timer.functor, Box::new(|| {}))
}

impl Default for Chronology {
    fn default() -> Chronology {
        Chronology::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn deferred_runs_on_next_drain() {
        let chrono = Chronology::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        chrono.execute(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(chrono.drain(8), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduled_timers_fire_in_deadline_order() {
        let chrono = Chronology::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        chrono.schedule(Duration::from_millis(20), false, move || o1.lock().unwrap().push(2));
        let o2 = order.clone();
        chrono.schedule(Duration::from_millis(0), false, move || o2.lock().unwrap().push(1));
        std::thread::sleep(Duration::from_millis(30));
        chrono.drain(8);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn cancelled_timer_is_skipped() {
        let chrono = Chronology::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let id = chrono.schedule(Duration::from_millis(0), false, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        chrono.cancel(id);
        chrono.drain(8);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn periodic_timer_is_requeued() {
        let chrono = Chronology::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        chrono.schedule(Duration::from_millis(0), true, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        chrono.drain(1);
        std::thread::sleep(Duration::from_millis(1));
        chrono.drain(1);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parent_chronology_drains_after_child() {
        let parent = Arc::new(Chronology::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let op = order.clone();
        parent.execute(move || op.lock().unwrap().push("parent"));
        let child = Chronology::with_parent(parent.clone());
        let oc = order.clone();
        child.execute(move || oc.lock().unwrap().push("child"));
        child.drain(8);
        assert_eq!(*order.lock().unwrap(), vec!["child", "parent"]);
    }
}
