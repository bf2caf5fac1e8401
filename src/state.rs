use crate::report::{self, Summary};
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Published {
    pub snapshot: Snapshot,
    pub report: String,
    pub summary: Summary,
}

impl Published {
    pub fn new(snapshot: Snapshot) -> Self {
        let report = report::render(&snapshot);
        let summary = Summary::from_snapshot(&snapshot);
        Self {
            snapshot,
            report,
            summary,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct History {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub latest: Option<Arc<Published>>,
    pub cpu_history: VecDeque<f64>,
    pub mem_history: VecDeque<f64>,
    pub history_len: usize,
    pub refreshes_completed: u64,
}

impl State {
    pub fn new(now_unix: i64, history_len: usize) -> Self {
        Self {
            started_at_unix: now_unix,
            history_len,
            cpu_history: VecDeque::with_capacity(history_len),
            mem_history: VecDeque::with_capacity(history_len),
            ..Self::default()
        }
    }

    pub fn publish(&mut self, published: Arc<Published>) {
        let snap = &published.snapshot;
        if let Some(cpu) = snap.cpu.total_percent {
            push_bounded(&mut self.cpu_history, cpu, self.history_len);
        }
        if let Some(mem) = snap.memory.percent {
            push_bounded(&mut self.mem_history, mem, self.history_len);
        }
        self.refreshes_completed += 1;
        self.latest = Some(published);
    }

    pub fn history(&self) -> History {
        History {
            cpu: self.cpu_history.iter().copied().collect(),
            memory: self.mem_history.iter().copied().collect(),
        }
    }
}

fn push_bounded(series: &mut VecDeque<f64>, value: f64, cap: usize) {
    if cap == 0 {
        return;
    }
    while series.len() >= cap {
        series.pop_front();
    }
    series.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::tests::{aggregator, FakeProvider};

    fn published(cpu: Option<f64>, mem: Option<f64>) -> Arc<Published> {
        let mut snap = aggregator().capture_from(&mut FakeProvider::default());
        snap.cpu.total_percent = cpu;
        snap.memory.percent = mem;
        Arc::new(Published::new(snap))
    }

    #[test]
    fn publish_replaces_latest_as_a_unit() {
        let mut state = State::new(0, 30);
        assert!(state.latest.is_none());

        let first = published(Some(10.0), Some(40.0));
        state.publish(first.clone());
        let second = published(Some(20.0), Some(41.0));
        state.publish(second.clone());

        let latest = state.latest.clone().unwrap();
        assert!(Arc::ptr_eq(&latest, &second));
        assert_eq!(latest.report, report::render(&latest.snapshot));
        assert_eq!(latest.summary.cpu, "20.0% (4c)");
        assert_eq!(state.refreshes_completed, 2);
        // readers holding the old snapshot keep it intact
        assert_eq!(first.snapshot.cpu.total_percent, Some(10.0));
    }

    #[test]
    fn history_is_bounded() {
        let mut state = State::new(0, 3);
        for i in 0..10 {
            state.publish(published(Some(i as f64), Some(50.0 + i as f64)));
            assert!(state.cpu_history.len() <= 3);
            assert!(state.mem_history.len() <= 3);
        }
        let history = state.history();
        assert_eq!(history.cpu, vec![7.0, 8.0, 9.0]);
        assert_eq!(history.memory, vec![57.0, 58.0, 59.0]);
    }

    #[test]
    fn unmeasured_samples_are_skipped() {
        let mut state = State::new(0, 5);
        state.publish(published(Some(1.0), None));
        state.publish(published(None, Some(2.0)));
        let history = state.history();
        assert_eq!(history.cpu, vec![1.0]);
        assert_eq!(history.memory, vec![2.0]);
    }
}
