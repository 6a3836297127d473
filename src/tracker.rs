//! State Tracker: the authoritative in-memory session state — phase, current thread,
//! current frame, last stop reason, thread list, and a bounded output ring buffer.
//!
//! The output buffer records DAP `output` events rather than scraping a debugger's raw
//! stdout: every line is already tagged with a category by the adapter that sent it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::types::{FrameInfo, OutputCategory, OutputRecord, RecentOutput, SessionState, ThreadInfo};

const DEFAULT_MAX_OUTPUT_LINES: usize = 1000;

struct TrackerState {
    phase: SessionState,
    current_thread_id: Option<i64>,
    current_frame: Option<FrameInfo>,
    threads: Vec<ThreadInfo>,
    stop_reason: Option<String>,
    output: VecDeque<OutputRecord>,
    max_output_lines: usize,
}

/// Single-session state, serialized behind a mutex so it can be shared between the
/// caller's task and the background event-handling task without either awaiting while
/// holding the lock.
pub struct StateTracker {
    inner: Mutex<TrackerState>,
}

impl StateTracker {
    pub fn new(max_output_lines: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                phase: SessionState::Inactive,
                current_thread_id: None,
                current_frame: None,
                threads: Vec::new(),
                stop_reason: None,
                output: VecDeque::new(),
                max_output_lines: if max_output_lines == 0 { DEFAULT_MAX_OUTPUT_LINES } else { max_output_lines },
            }),
        }
    }

    pub fn phase(&self) -> SessionState {
        self.inner.lock().unwrap().phase
    }

    /// Applies a phase transition. Resets thread/frame/output state when entering
    /// `inactive` or `terminated`, per the documented transition table.
    pub fn transition(&self, to: SessionState) {
        let mut state = self.inner.lock().unwrap();
        state.phase = to;
        if matches!(to, SessionState::Inactive | SessionState::Terminated) {
            state.current_thread_id = None;
            state.current_frame = None;
            state.threads.clear();
            state.stop_reason = None;
            state.output.clear();
        }
    }

    pub fn current_thread(&self) -> Option<i64> {
        self.inner.lock().unwrap().current_thread_id
    }

    pub fn set_current_thread(&self, id: i64) {
        self.inner.lock().unwrap().current_thread_id = Some(id);
    }

    pub fn set_threads(&self, threads: Vec<ThreadInfo>) {
        self.inner.lock().unwrap().threads = threads;
    }

    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.inner.lock().unwrap().threads.clone()
    }

    /// Records a `stopped` event: phase → stopped, remembers the reason, and adopts
    /// the reported thread id if one was given.
    pub fn record_stopped(&self, reason: String, thread_id: Option<i64>) {
        let mut state = self.inner.lock().unwrap();
        state.phase = SessionState::Stopped;
        state.stop_reason = Some(reason);
        if let Some(id) = thread_id {
            state.current_thread_id = Some(id);
        }
    }

    pub fn set_current_frame(&self, frame: FrameInfo) {
        self.inner.lock().unwrap().current_frame = Some(frame);
    }

    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.inner.lock().unwrap().current_frame.clone()
    }

    pub fn current_frame_id(&self) -> Option<i64> {
        self.inner.lock().unwrap().current_frame.as_ref().map(|f| f.id)
    }

    /// A continue/step request succeeded: phase → running, current frame and stop
    /// reason clear, but the current thread id is preserved.
    pub fn record_continued(&self) {
        let mut state = self.inner.lock().unwrap();
        state.phase = SessionState::Running;
        state.current_frame = None;
        state.stop_reason = None;
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.inner.lock().unwrap().stop_reason.clone()
    }

    pub fn has_valid_context(&self) -> bool {
        let state = self.inner.lock().unwrap();
        matches!(state.phase, SessionState::Stopped) && state.current_frame.is_some() && state.current_thread_id.is_some()
    }

    /// Splits `text` on CR/LF, skips empty segments, and pushes each remaining line,
    /// trimming the oldest entries once the cap is exceeded.
    pub fn push_output(&self, text: &str, category: OutputCategory) {
        let mut state = self.inner.lock().unwrap();
        let cap = state.max_output_lines;
        for line in text.split(['\r', '\n']) {
            if line.is_empty() {
                continue;
            }
            state.output.push_back(OutputRecord {
                text: line.to_string(),
                category: category.clone(),
                timestamp: SystemTime::now(),
            });
            while state.output.len() > cap {
                state.output.pop_front();
            }
        }
    }

    /// Filters by `since` (exclusive) and trims to `max_lines`, returning the
    /// `{stdout, stderr, truncated}` shape: `stdout` joins every `stdout`/`console`
    /// line, `stderr` joins every `stderr` line, each newline-separated.
    pub fn query_output(&self, since: Option<SystemTime>, max_lines: Option<usize>) -> RecentOutput {
        let state = self.inner.lock().unwrap();
        let mut matching: Vec<&OutputRecord> = state
            .output
            .iter()
            .filter(|rec| since.map(|s| rec.timestamp > s).unwrap_or(true))
            .collect();

        let truncated = match max_lines {
            Some(max) if matching.len() > max => {
                matching = matching.split_off(matching.len() - max);
                true
            }
            _ => false,
        };

        let stdout = matching
            .iter()
            .filter(|rec| matches!(rec.category, OutputCategory::Stdout | OutputCategory::Console))
            .map(|rec| rec.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let stderr = matching
            .iter()
            .filter(|rec| matches!(rec.category, OutputCategory::Stderr))
            .map(|rec| rec.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        RecentOutput { stdout, stderr, truncated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_to_terminated_resets_frame_and_output() {
        let tracker = StateTracker::new(10);
        tracker.transition(SessionState::Running);
        tracker.record_stopped("breakpoint".into(), Some(1));
        tracker.set_current_frame(FrameInfo { id: 1, name: "main".into(), line: 10, column: 1, source: None });
        tracker.push_output("hello", OutputCategory::Stdout);

        tracker.transition(SessionState::Terminated);

        assert_eq!(tracker.current_frame_id(), None);
        assert_eq!(tracker.current_thread(), None);
        assert_eq!(tracker.query_output(None, None).stdout, "");
    }

    #[test]
    fn continued_preserves_thread_but_clears_frame() {
        let tracker = StateTracker::new(10);
        tracker.set_current_thread(7);
        tracker.record_stopped("step".into(), Some(7));
        tracker.set_current_frame(FrameInfo { id: 2, name: "f".into(), line: 5, column: 1, source: None });

        tracker.record_continued();

        assert_eq!(tracker.current_thread(), Some(7));
        assert_eq!(tracker.current_frame_id(), None);
        assert!(!tracker.has_valid_context());
    }

    #[test]
    fn output_buffer_drops_oldest_past_cap() {
        let tracker = StateTracker::new(3);
        for i in 0..5 {
            tracker.push_output(&format!("line{i}"), OutputCategory::Stdout);
        }
        let out = tracker.query_output(None, None);
        assert_eq!(out.stdout, "line2\nline3\nline4");
    }

    #[test]
    fn query_output_splits_by_category() {
        let tracker = StateTracker::new(10);
        tracker.push_output("from stdout", OutputCategory::Stdout);
        tracker.push_output("from console", OutputCategory::Console);
        tracker.push_output("from stderr", OutputCategory::Stderr);

        let out = tracker.query_output(None, None);
        assert_eq!(out.stdout, "from stdout\nfrom console");
        assert_eq!(out.stderr, "from stderr");
        assert!(!out.truncated);
    }

    #[test]
    fn has_valid_context_requires_stopped_frame_and_thread() {
        let tracker = StateTracker::new(10);
        assert!(!tracker.has_valid_context());
        tracker.record_stopped("pause".into(), Some(1));
        assert!(!tracker.has_valid_context());
        tracker.set_current_frame(FrameInfo { id: 1, name: "main".into(), line: 1, column: 1, source: None });
        assert!(tracker.has_valid_context());
    }
}
