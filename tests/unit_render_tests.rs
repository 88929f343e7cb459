//! # Renderer Unit Tests / 渲染器单元测试
//!
//! The diffing progress renderer: idempotent redraws, the width-shrink
//! full-redraw rule and the in-flight detail-line budget.

mod common;

use common::SharedBuffer;
use module_runner::reporting::progress::{ProgressTerminal, TestProgressState};
use module_runner::reporting::terminal::{AnsiTerminal, PlainTerminal, ProgressLine, TerminalBackend};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

fn line(id: u64, version: u64, body: &str, duration: &str) -> ProgressLine {
    ProgressLine {
        id,
        version,
        body: body.to_string(),
        duration: duration.to_string(),
    }
}

/// Redrawing an unchanged snapshot is structurally idempotent: the second
/// frame patches the same-width duration text and touches nothing else.
#[test]
fn unchanged_snapshot_redraw_is_idempotent() {
    let buffer = SharedBuffer::default();
    let mut terminal = AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (100, 30)));

    let snapshot = vec![
        line(1, 4, "[2/0/1] alpha.tests (net9.0)", "(12s)"),
        line(2, 9, "[5/1/0] beta.tests (net9.0)", "(47s)"),
    ];
    terminal.render_progress(&snapshot);
    let first_frame = buffer.contents();
    buffer.clear();

    terminal.render_progress(&snapshot);
    let second_frame = buffer.contents();

    // Durations unchanged in width and value, ids and versions unchanged:
    // the bodies must not be re-emitted.
    assert!(first_frame.contains("alpha.tests"));
    assert!(!second_frame.contains("alpha.tests"));
    assert!(!second_frame.contains("beta.tests"));
    assert!(second_frame.contains("(12s)"));
    assert!(second_frame.contains("(47s)"));
}

/// Scenario D: the terminal narrows between two ticks. The renderer must
/// erase and redraw from scratch instead of patching rows whose positions
/// it can no longer trust.
#[test]
fn width_shrink_between_ticks_forces_full_redraw() {
    let width = Arc::new(AtomicU16::new(100));
    let probed = Arc::clone(&width);
    let buffer = SharedBuffer::default();
    let mut terminal = AnsiTerminal::with_size_probe(
        buffer.clone(),
        Box::new(move || (probed.load(Ordering::Relaxed), 30)),
    );

    let snapshot = vec![line(1, 1, "[0/0/0] alpha.tests", "(3s)")];
    terminal.render_progress(&snapshot);
    buffer.clear();

    width.store(50, Ordering::Relaxed);
    terminal.render_progress(&snapshot);
    let frame = buffer.contents();
    // The body reappears: this was a full redraw, not a timestamp patch.
    assert!(frame.contains("alpha.tests"));
}

/// More in-flight details than fit: as many as fit minus one, then one
/// synthesized summary line instead of the rest.
#[test]
fn detail_lines_are_budgeted_with_a_summary_tail() {
    let buffer = SharedBuffer::default();
    // Height 6: one module line, three detail lines, one summary line.
    let backend = PlainTerminal::with_size_probe(buffer.clone(), Box::new(|| (100, 6)));
    let progress = ProgressTerminal::new(Box::new(backend), true);

    let mut state = TestProgressState::new(1, "alpha.tests".to_string());
    for index in 0..8 {
        state.add_active_test(100 + index, &format!("uid-{index}"), &format!("slow_test_{index}"));
    }
    progress.add_worker(state);
    progress.refresh_now();

    let frame = buffer.contents();
    assert!(frame.contains("alpha.tests"));
    assert!(frame.contains("slow_test_0"));
    assert!(frame.contains("slow_test_2"));
    assert!(!frame.contains("slow_test_3"));
    assert!(frame.contains("5 more running"));
}

/// The plain back-end never moves the cursor, so stopping progress leaves
/// prior blocks untouched.
#[test]
fn plain_backend_blocks_are_never_overwritten() {
    let buffer = SharedBuffer::default();
    let backend = PlainTerminal::with_size_probe(buffer.clone(), Box::new(|| (100, 24)));
    let progress = ProgressTerminal::new(Box::new(backend), true);

    let state = TestProgressState::new(1, "alpha.tests".to_string());
    let slot = progress.add_worker(state);
    progress.refresh_now();
    progress.update_worker(slot, |state| state.report_passing_test());
    progress.refresh_now();
    progress.stop_showing_progress();

    let frame = buffer.contents();
    assert!(!frame.contains('\x1b'));
    assert!(frame.contains("[0/0/0] alpha.tests"));
    assert!(frame.contains("[1/0/0] alpha.tests"));
}

/// Stopping progress twice erases exactly once; immediate writes after the
/// stop go straight through.
#[test]
fn stop_is_single_use_and_immediate_writes_still_land() {
    let buffer = SharedBuffer::default();
    let backend = AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (100, 24)));
    let progress = ProgressTerminal::new(Box::new(backend), true);

    progress.add_worker(TestProgressState::new(1, "alpha.tests".to_string()));
    progress.refresh_now();
    buffer.clear();

    progress.stop_showing_progress();
    let first_stop = buffer.contents();
    assert!(first_stop.contains("\x1b[J"), "stop must erase the block");

    buffer.clear();
    progress.stop_showing_progress();
    assert!(buffer.contents().is_empty(), "second stop must be a no-op");

    progress.write_to_terminal("late line\n");
    assert!(buffer.contents().contains("late line"));
}

/// Interactive immediate writes interleave cleanly: erase, write, redraw,
/// so the message never lands inside the progress block.
#[test]
fn interactive_write_redraws_the_progress_block() {
    let buffer = SharedBuffer::default();
    let backend = AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (100, 24)));
    let progress = ProgressTerminal::new(Box::new(backend), true);

    progress.add_worker(TestProgressState::new(1, "alpha.tests".to_string()));
    progress.refresh_now();
    buffer.clear();

    progress.write_to_terminal("failed some_test (1s)\n");
    let frame = buffer.contents();
    let message_at = frame.find("failed some_test").unwrap();
    let progress_at = frame.rfind("alpha.tests").unwrap();
    assert!(
        message_at < progress_at,
        "progress must be redrawn below the message:\n{frame}"
    );
}

/// A worker slot freed by one module is reused by the next.
#[test]
fn worker_slots_are_reused_after_removal() {
    let buffer = SharedBuffer::default();
    let backend = PlainTerminal::with_size_probe(buffer.clone(), Box::new(|| (100, 24)));
    let progress = ProgressTerminal::new(Box::new(backend), true);

    let first = progress.add_worker(TestProgressState::new(1, "a".to_string()));
    let second = progress.add_worker(TestProgressState::new(2, "b".to_string()));
    assert_ne!(first, second);

    let removed = progress.remove_worker(first).unwrap();
    assert_eq!(removed.id, 1);
    let third = progress.add_worker(TestProgressState::new(3, "c".to_string()));
    assert_eq!(third, first);
}

/// Backend probe selection honors the explicit no-progress override.
#[test]
fn no_progress_override_selects_the_plain_backend() {
    let backend = module_runner::reporting::terminal::select_backend(false, true);
    assert!(!backend.is_interactive());
}
