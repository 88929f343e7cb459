//! # Terminal Back-ends Module / 终端后端模块
//!
//! The two rendering back-ends behind the live progress view. The ANSI
//! back-end diffs the previous frame against the current one and redraws
//! only changed lines; the plain back-end never moves the cursor and prints
//! fresh progress blocks instead, for redirected output and dumb terminals.
//!
//! 实时进度视图背后的两种渲染后端。ANSI 后端将上一帧与当前帧
//! 进行差分，仅重绘变化的行；普通后端从不移动光标，
//! 而是打印全新的进度块，用于重定向输出和哑终端。

use crossterm::{
    cursor::{MoveToColumn, MoveToNextLine, MoveUp},
    queue,
    terminal::{Clear, ClearType},
};
use std::io::Write;
use std::time::Duration;

/// Redraw cadence of the in-place ANSI view. Only seconds are shown on
/// screen, so half a second keeps it feeling live without burning cycles.
pub const ANSI_UPDATE_CADENCE: Duration = Duration::from_millis(500);

/// Cadence of the plain back-end. Its blocks stay on screen forever, so
/// they must be rare.
pub const PLAIN_UPDATE_CADENCE: Duration = Duration::from_secs(3);

/// One line of the live progress snapshot, with the duration text kept
/// apart from the body so the renderer can patch it in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLine {
    /// Identity of the thing this line shows; stable across frames.
    pub id: u64,
    /// Bumped on every state change; an unchanged id+version pair means
    /// only the clock moved.
    pub version: u64,
    /// Everything left of the duration. No ANSI sequences, so its display
    /// width is its character count.
    pub body: String,
    /// The trailing `(1m 5s)` part.
    pub duration: String,
}

impl ProgressLine {
    pub fn body_width(&self) -> u16 {
        self.body.chars().count() as u16
    }

    pub fn duration_len(&self) -> u16 {
        self.duration.chars().count() as u16
    }
}

/// What was physically drawn for one line of the previous frame; just
/// enough to decide between a timestamp patch and a full redraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedProgressItem {
    pub id: u64,
    pub version: u64,
    pub duration_len: u16,
}

/// A rendering surface the progress view can draw on. All methods are
/// called under the single renderer mutex.
pub trait TerminalBackend: Send {
    /// Whether this back-end supports in-place redraw.
    fn is_interactive(&self) -> bool;

    /// How often the background tick should redraw.
    fn update_cadence(&self) -> Duration;

    /// `(columns, rows)` of the surface.
    fn dimensions(&self) -> (u16, u16);

    /// Writes an immediate block of output (test lines, summaries). The
    /// caller erased the progress view first when that is necessary.
    fn write_block(&mut self, text: &str);

    /// Draws the given snapshot, diffing against the previous frame when
    /// the back-end keeps one.
    fn render_progress(&mut self, lines: &[ProgressLine]);

    /// Removes the progress view from screen, if it is in place.
    fn erase_progress(&mut self);
}

type SizeProbe = Box<dyn Fn() -> (u16, u16) + Send>;

fn probe_terminal_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or((80, 24))
}

/// Whether stdout is attached to a terminal that understands cursor
/// movement. CI environments get the plain back-end even when they look
/// interactive, since their log capture rarely replays control sequences.
pub fn stdout_accepts_ansi() -> bool {
    use std::io::IsTerminal;
    static IN_CI: once_cell::sync::Lazy<bool> =
        once_cell::sync::Lazy::new(|| std::env::var_os("CI").is_some());
    std::io::stdout().is_terminal() && !*IN_CI
}

/// Picks the back-end from explicit overrides, CI detection and capability
/// probing, in that order.
pub fn select_backend(force_ansi: bool, no_progress: bool) -> Box<dyn TerminalBackend> {
    if no_progress {
        return Box::new(PlainTerminal::new(std::io::stdout()));
    }
    if force_ansi || stdout_accepts_ansi() {
        Box::new(AnsiTerminal::new(std::io::stdout()))
    } else {
        Box::new(PlainTerminal::new(std::io::stdout()))
    }
}

/// The cursor-moving back-end. Keeps the previous frame's bookkeeping and
/// emits the minimal redraw for each new snapshot.
pub struct AnsiTerminal<W: Write + Send> {
    out: W,
    size_probe: SizeProbe,
    previous: Vec<RenderedProgressItem>,
    last_width: u16,
}

impl AnsiTerminal<std::io::Stdout> {
    pub fn new(out: std::io::Stdout) -> Self {
        Self::with_size_probe(out, Box::new(probe_terminal_size))
    }
}

impl<W: Write + Send> AnsiTerminal<W> {
    /// Constructor with an injectable size probe, used by tests to force
    /// width changes between frames.
    pub fn with_size_probe(out: W, size_probe: SizeProbe) -> Self {
        Self {
            out,
            size_probe,
            previous: Vec::new(),
            last_width: 0,
        }
    }

    fn write_full_line(&mut self, line: &ProgressLine) {
        let _ = write!(self.out, "{} {}\r\n", line.body, line.duration);
    }

    fn erase_block(&mut self) {
        if self.previous.is_empty() {
            return;
        }
        let _ = queue!(
            self.out,
            MoveUp(self.previous.len() as u16),
            MoveToColumn(0),
            Clear(ClearType::FromCursorDown),
        );
        self.previous.clear();
    }
}

impl<W: Write + Send> TerminalBackend for AnsiTerminal<W> {
    fn is_interactive(&self) -> bool {
        true
    }

    fn update_cadence(&self) -> Duration {
        ANSI_UPDATE_CADENCE
    }

    fn dimensions(&self) -> (u16, u16) {
        (self.size_probe)()
    }

    fn write_block(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn render_progress(&mut self, lines: &[ProgressLine]) {
        let (width, _) = (self.size_probe)();

        // A resized terminal invalidates every previous row position, so
        // in-place patches would land on the wrong cells. Full restart.
        if width != self.last_width {
            self.erase_block();
            self.last_width = width;
        }

        if self.previous.is_empty() {
            for line in lines {
                self.write_full_line(line);
            }
        } else {
            let previous = std::mem::take(&mut self.previous);
            let _ = queue!(
                self.out,
                MoveUp(previous.len() as u16),
                MoveToColumn(0)
            );

            for (index, line) in lines.iter().enumerate() {
                match previous.get(index) {
                    Some(prev) if prev.id == line.id && prev.version == line.version => {
                        if prev.duration_len == line.duration_len() {
                            // Same identity, same version, same duration
                            // width: only the timestamp text moved.
                            let _ = queue!(self.out, MoveToColumn(line.body_width() + 1));
                            let _ = write!(self.out, "{}", line.duration);
                            let _ = queue!(self.out, MoveToNextLine(1));
                        } else {
                            // A duration that changed width would leave
                            // stale characters behind; erase the row.
                            let _ = queue!(self.out, Clear(ClearType::CurrentLine), MoveToColumn(0));
                            self.write_full_line(line);
                        }
                    }
                    Some(_) => {
                        let _ = queue!(self.out, Clear(ClearType::CurrentLine), MoveToColumn(0));
                        self.write_full_line(line);
                    }
                    None => {
                        self.write_full_line(line);
                    }
                }
            }

            // Rows the previous frame had but this one does not.
            if previous.len() > lines.len() {
                let _ = queue!(self.out, Clear(ClearType::FromCursorDown));
            }
        }

        self.previous = lines
            .iter()
            .map(|line| RenderedProgressItem {
                id: line.id,
                version: line.version,
                duration_len: line.duration_len(),
            })
            .collect();
        let _ = self.out.flush();
    }

    fn erase_progress(&mut self) {
        self.erase_block();
        let _ = self.out.flush();
    }
}

/// The no-cursor-movement back-end for redirected output. Progress blocks
/// are printed and left in place; no diff bookkeeping happens at all.
pub struct PlainTerminal<W: Write + Send> {
    out: W,
    size_probe: SizeProbe,
}

impl PlainTerminal<std::io::Stdout> {
    pub fn new(out: std::io::Stdout) -> Self {
        Self::with_size_probe(out, Box::new(probe_terminal_size))
    }
}

impl<W: Write + Send> PlainTerminal<W> {
    pub fn with_size_probe(out: W, size_probe: SizeProbe) -> Self {
        Self { out, size_probe }
    }
}

impl<W: Write + Send> TerminalBackend for PlainTerminal<W> {
    fn is_interactive(&self) -> bool {
        false
    }

    fn update_cadence(&self) -> Duration {
        PLAIN_UPDATE_CADENCE
    }

    fn dimensions(&self) -> (u16, u16) {
        (self.size_probe)()
    }

    fn write_block(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn render_progress(&mut self, lines: &[ProgressLine]) {
        for line in lines {
            let _ = writeln!(self.out, "{} {}", line.body, line.duration);
        }
        let _ = self.out.flush();
    }

    fn erase_progress(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared sink so the test can inspect what a backend wrote.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        fn clear(&self) {
            self.0.lock().unwrap().clear();
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn line(id: u64, version: u64, body: &str, duration: &str) -> ProgressLine {
        ProgressLine {
            id,
            version,
            body: body.to_string(),
            duration: duration.to_string(),
        }
    }

    #[test]
    fn unchanged_snapshot_only_patches_durations() {
        let buffer = SharedBuffer::default();
        let mut terminal =
            AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (120, 40)));

        let lines = vec![line(1, 1, "[0/0/0] my.tests", "(1s)")];
        terminal.render_progress(&lines);
        buffer.clear();

        // Identical id+version and an equal-width duration: the second
        // frame must not rewrite the body at all.
        let lines = vec![line(1, 1, "[0/0/0] my.tests", "(2s)")];
        terminal.render_progress(&lines);
        let second_frame = buffer.contents();
        assert!(second_frame.contains("(2s)"));
        assert!(!second_frame.contains("my.tests"));
    }

    #[test]
    fn duration_width_change_forces_full_line_redraw() {
        let buffer = SharedBuffer::default();
        let mut terminal =
            AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (120, 40)));

        terminal.render_progress(&[line(1, 1, "[0/0/0] my.tests", "(59s)")]);
        buffer.clear();

        // "(59s)" -> "(1m 0s)" grows; an in-place patch would overlap
        // neighbouring characters.
        terminal.render_progress(&[line(1, 1, "[0/0/0] my.tests", "(1m 0s)")]);
        let frame = buffer.contents();
        assert!(frame.contains("my.tests"));
        assert!(frame.contains("(1m 0s)"));
    }

    #[test]
    fn version_bump_redraws_the_line() {
        let buffer = SharedBuffer::default();
        let mut terminal =
            AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (120, 40)));

        terminal.render_progress(&[line(1, 1, "[0/0/0] my.tests", "(1s)")]);
        buffer.clear();
        terminal.render_progress(&[line(1, 2, "[1/0/0] my.tests", "(1s)")]);
        assert!(buffer.contents().contains("[1/0/0] my.tests"));
    }

    #[test]
    fn width_change_between_ticks_redraws_from_scratch() {
        let width = Arc::new(AtomicU16::new(120));
        let probe_width = Arc::clone(&width);
        let buffer = SharedBuffer::default();
        let mut terminal = AnsiTerminal::with_size_probe(
            buffer.clone(),
            Box::new(move || (probe_width.load(Ordering::Relaxed), 40)),
        );

        terminal.render_progress(&[line(1, 1, "[0/0/0] my.tests", "(1s)")]);
        buffer.clear();

        width.store(60, Ordering::Relaxed);
        // Same id, same version, same duration width: without the shrink
        // this would be a patch-only frame.
        terminal.render_progress(&[line(1, 1, "[0/0/0] my.tests", "(2s)")]);
        assert!(buffer.contents().contains("my.tests"));
    }

    #[test]
    fn plain_backend_prints_fresh_blocks_without_control_sequences() {
        let buffer = SharedBuffer::default();
        let mut terminal =
            PlainTerminal::with_size_probe(buffer.clone(), Box::new(|| (80, 24)));

        terminal.render_progress(&[line(1, 1, "[0/0/0] my.tests", "(1s)")]);
        terminal.erase_progress();
        terminal.render_progress(&[line(1, 2, "[1/0/0] my.tests", "(2s)")]);

        let output = buffer.contents();
        assert!(!output.contains('\x1b'));
        assert!(output.contains("[0/0/0] my.tests (1s)"));
        assert!(output.contains("[1/0/0] my.tests (2s)"));
    }

    #[test]
    fn vanished_lines_are_erased() {
        let buffer = SharedBuffer::default();
        let mut terminal =
            AnsiTerminal::with_size_probe(buffer.clone(), Box::new(|| (120, 40)));

        terminal.render_progress(&[
            line(1, 1, "[0/0/0] first.tests", "(1s)"),
            line(2, 1, "[0/0/0] second.tests", "(1s)"),
        ]);
        buffer.clear();

        terminal.render_progress(&[line(1, 1, "[0/0/0] first.tests", "(1s)")]);
        // Clear-from-cursor-down removes the second row.
        assert!(buffer.contents().contains("\x1b[J"));
    }
}
