//! # Live Progress Module / 实时进度模块
//!
//! Per-module live counters and the background renderer that keeps the
//! terminal current. Every mutation of the live state array and every
//! immediate write goes through one mutex, so a progress redraw can never
//! interleave mid-character with a test-completion line.
//!
//! 按模块的实时计数器以及保持终端最新的后台渲染器。
//! 实时状态数组的每次变更和每次即时写入都经过同一把互斥锁，
//! 因此进度重绘永远不会与测试完成行在字符中间交错。

use crate::reporting::terminal::{ProgressLine, TerminalBackend};
use rust_i18n::t;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Renders `73h 59m 12s` style durations, dropping leading zero parts.
/// Sub-second durations render as `0s` so a duration is never empty.
pub fn human_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// One currently in-flight test shown as a detail line.
#[derive(Debug, Clone)]
pub struct ActiveTest {
    pub id: u64,
    pub uid: String,
    pub display_name: String,
    pub started: Instant,
}

/// Live counters of one module run. `version` increases monotonically on
/// every change so the renderer can tell a stale line from a current one.
///
/// 单个模块运行的实时计数器。`version` 在每次变化时单调递增，
/// 以便渲染器区分过期行与当前行。
#[derive(Debug, Clone)]
pub struct TestProgressState {
    pub id: u64,
    pub version: u64,
    pub display_name: String,
    pub target_framework: Option<String>,
    pub architecture: Option<String>,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub discovered: u64,
    pub discovered_names: Vec<String>,
    pub try_count: u32,
    pub active_tests: Vec<ActiveTest>,
    pub exit_code: Option<i32>,
    pub success: Option<bool>,
    started: Instant,
    frozen_elapsed: Option<Duration>,
    last_instance_id: Option<String>,
}

impl TestProgressState {
    pub fn new(id: u64, display_name: String) -> Self {
        Self {
            id,
            version: 0,
            display_name,
            target_framework: None,
            architecture: None,
            passed: 0,
            failed: 0,
            skipped: 0,
            discovered: 0,
            discovered_names: Vec::new(),
            try_count: 0,
            active_tests: Vec::new(),
            exit_code: None,
            success: None,
            started: Instant::now(),
            frozen_elapsed: None,
            last_instance_id: None,
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Records one handshake of the module's test host. A changed instance
    /// id means the host restarted inside the same execution: a retry.
    pub fn notify_handshake(&mut self, instance_id: &str) {
        if self.last_instance_id.as_deref() != Some(instance_id) {
            self.last_instance_id = Some(instance_id.to_string());
            self.try_count += 1;
        }
        self.bump();
    }

    pub fn report_passing_test(&mut self) {
        self.passed += 1;
        self.bump();
    }

    pub fn report_failed_test(&mut self) {
        self.failed += 1;
        self.bump();
    }

    pub fn report_skipped_test(&mut self) {
        self.skipped += 1;
        self.bump();
    }

    pub fn discover_test(&mut self, display_name: &str) {
        self.discovered += 1;
        self.discovered_names.push(display_name.to_string());
        self.bump();
    }

    pub fn add_active_test(&mut self, id: u64, uid: &str, display_name: &str) {
        self.active_tests.push(ActiveTest {
            id,
            uid: uid.to_string(),
            display_name: display_name.to_string(),
            started: Instant::now(),
        });
        self.bump();
    }

    pub fn remove_active_test(&mut self, uid: &str) {
        let before = self.active_tests.len();
        self.active_tests.retain(|test| test.uid != uid);
        if self.active_tests.len() != before {
            self.bump();
        }
    }

    pub fn total_tests(&self) -> u64 {
        self.passed + self.failed + self.skipped
    }

    /// Stops the stopwatch; the state keeps answering `elapsed()` with the
    /// frozen value in its completed form.
    pub fn finish(&mut self, exit_code: i32, success: bool) {
        self.frozen_elapsed = Some(self.started.elapsed());
        self.exit_code = Some(exit_code);
        self.success = Some(success);
        self.bump();
    }

    pub fn elapsed(&self) -> Duration {
        self.frozen_elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    fn main_line(&self) -> ProgressLine {
        ProgressLine {
            id: self.id,
            version: self.version,
            body: format!(
                "[{}/{}/{}] {}",
                self.passed,
                self.failed,
                self.skipped,
                crate::core::models::decorate_with_frameworks(
                    &self.display_name,
                    self.target_framework.as_deref(),
                    self.architecture.as_deref(),
                )
            ),
            duration: format!("({})", human_duration(self.elapsed())),
        }
    }
}

struct ProgressInner {
    backend: Box<dyn TerminalBackend>,
    slots: Vec<Option<TestProgressState>>,
    show_progress: bool,
    stopped: bool,
}

impl ProgressInner {
    /// Builds the visible snapshot: one main line per live module plus as
    /// many in-flight detail lines as the screen height allows, with the
    /// last slot replaced by a `N more running` summary when they overflow.
    fn snapshot(&self) -> Vec<ProgressLine> {
        let (width, height) = self.backend.dimensions();
        let mut lines = Vec::new();

        let live: Vec<&TestProgressState> = self.slots.iter().flatten().collect();
        let active_total: usize = live.iter().map(|state| state.active_tests.len()).sum();
        let mut detail_budget =
            (height as usize).saturating_sub(live.len() + 1).min(active_total);
        if active_total > detail_budget {
            detail_budget = detail_budget.saturating_sub(1);
        }

        let mut details_rendered = 0usize;
        for state in &live {
            lines.push(clamp_line(state.main_line(), width));
            for test in &state.active_tests {
                if details_rendered == detail_budget {
                    continue;
                }
                details_rendered += 1;
                lines.push(clamp_line(
                    ProgressLine {
                        id: test.id,
                        version: 0,
                        body: format!("  {}", test.display_name),
                        duration: format!("({})", human_duration(test.started.elapsed())),
                    },
                    width,
                ));
            }
        }

        if active_total > details_rendered {
            let remaining = active_total - details_rendered;
            lines.push(clamp_line(
                ProgressLine {
                    // Stable identity so the summary line patches its count
                    // via version, not position luck.
                    id: u64::MAX,
                    version: remaining as u64,
                    body: format!("  {}", t!("progress.more_running", count = remaining)),
                    duration: String::new(),
                },
                width,
            ));
        }

        lines
    }

    fn render(&mut self) {
        let lines = self.snapshot();
        self.backend.render_progress(&lines);
    }
}

/// Keeps a progress line no wider than the terminal, so a drawn row can
/// never wrap and break the renderer's row accounting.
fn clamp_line(mut line: ProgressLine, width: u16) -> ProgressLine {
    let width = width.max(8) as usize;
    let duration_len = line.duration.chars().count();
    let max_body = width.saturating_sub(duration_len + 1);
    if line.body.chars().count() > max_body {
        line.body = line.body.chars().take(max_body.saturating_sub(1)).collect();
        line.body.push('…');
    }
    line
}

/// The progress-aware terminal: owns the single renderer mutex, the slot
/// array and the background tick task.
///
/// 感知进度的终端：拥有唯一的渲染互斥锁、槽位数组以及后台滴答任务。
pub struct ProgressTerminal {
    inner: Arc<Mutex<ProgressInner>>,
    cadence: Duration,
    interactive: bool,
    cancel: CancellationToken,
    tick: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProgressTerminal {
    pub fn new(backend: Box<dyn TerminalBackend>, show_progress: bool) -> Self {
        let cadence = backend.update_cadence();
        let interactive = backend.is_interactive();
        Self {
            inner: Arc::new(Mutex::new(ProgressInner {
                backend,
                slots: Vec::new(),
                show_progress,
                stopped: false,
            })),
            cadence,
            interactive,
            cancel: CancellationToken::new(),
            tick: Mutex::new(None),
        }
    }

    /// Starts the periodic redraw. Idempotent; the tick stops for good when
    /// [`stop_showing_progress`](Self::stop_showing_progress) runs.
    pub fn start_showing_progress(&self) {
        let mut tick = self.tick.lock().unwrap();
        if tick.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let cadence = self.cadence;
        *tick = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(cadence) => {
                        let mut inner = inner.lock().unwrap();
                        if !inner.stopped && inner.show_progress {
                            inner.render();
                        }
                    }
                }
            }
        }));
    }

    /// Erases the progress view and stops the tick, exactly once. Later
    /// calls are no-ops, so cancellation and normal completion can both
    /// request the stop without double-erasing.
    pub fn stop_showing_progress(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.stopped {
                inner.stopped = true;
                inner.backend.erase_progress();
            }
        }
        self.cancel.cancel();
    }

    /// Adds a live module and returns its slot index.
    pub fn add_worker(&self, state: TestProgressState) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if let Some(free) = inner.slots.iter().position(Option::is_none) {
            inner.slots[free] = Some(state);
            free
        } else {
            inner.slots.push(Some(state));
            inner.slots.len() - 1
        }
    }

    /// Removes a live module, handing back its state in completed form.
    pub fn remove_worker(&self, slot: usize) -> Option<TestProgressState> {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.get_mut(slot).and_then(Option::take)
    }

    /// Mutates one module's live state under the renderer mutex.
    pub fn update_worker<R>(
        &self,
        slot: usize,
        update: impl FnOnce(&mut TestProgressState) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .map(update)
    }

    /// Writes an immediate block. On an interactive surface the progress
    /// view is erased first and redrawn after, so output lines never land
    /// inside the progress block.
    pub fn write_to_terminal(&self, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        let stopped = inner.stopped;
        if self.interactive && !stopped {
            inner.backend.erase_progress();
            inner.backend.write_block(text);
            if inner.show_progress {
                inner.render();
            }
        } else {
            inner.backend.write_block(text);
        }
    }

    /// Forces one redraw now, used by tests instead of waiting for a tick.
    pub fn refresh_now(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.stopped && inner.show_progress {
            inner.render();
        }
    }
}

impl Drop for ProgressTerminal {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.tick.lock().unwrap().take() {
            handle.abort();
        }
    }
}
