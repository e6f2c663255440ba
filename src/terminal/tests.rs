use super::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::settings::Timings;
use super::types::OutputStream;

const HOME_PROMPT: &str = "\u{1b}[36m~\u{1b}[0m $ ";

#[derive(Default)]
struct RecordingDisplay {
    screen: String,
    clears: usize,
    bottom_scrolls: usize,
    focused: bool,
    disposed: bool,
}

impl TerminalDisplay for RecordingDisplay {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.screen.push_str(&String::from_utf8_lossy(data));
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.screen.clear();
        self.clears += 1;
        Ok(())
    }

    fn scroll_to_top(&mut self) -> Result<()> {
        Ok(())
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        self.bottom_scrolls += 1;
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        (80, 24)
    }

    fn focus(&mut self) -> Result<()> {
        self.focused = true;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.disposed = true;
        Ok(())
    }
}

struct StaticLocator(HashMap<String, PathBuf>);

impl CommandLocator for StaticLocator {
    fn locate(&self, name: &str, _workdir: &WorkingDirectoryContext) -> Option<PathBuf> {
        self.0.get(name).cloned()
    }
}

fn scratch_home() -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "panelterm-home-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).expect("create scratch home");
    dir.canonicalize().expect("canonical scratch home")
}

fn test_settings() -> Settings {
    Settings {
        backend: ShellBackend::Simulated,
        timings: Timings {
            kill_grace_ms: 200,
            ..Timings::default()
        },
        ..Settings::default()
    }
}

fn view_with(settings: Settings, tools: &[(&str, &str)]) -> TerminalView<RecordingDisplay> {
    let locator = StaticLocator(
        tools
            .iter()
            .map(|(name, path)| (name.to_string(), PathBuf::from(path)))
            .collect(),
    );
    let mut view = TerminalView::new(
        RecordingDisplay::default(),
        settings,
        Box::new(locator),
        WorkingDirectoryContext::new(scratch_home()),
    );
    view.open().expect("open view");
    view
}

fn test_view(tools: &[(&str, &str)]) -> TerminalView<RecordingDisplay> {
    view_with(test_settings(), tools)
}

fn typed(view: &mut TerminalView<RecordingDisplay>, text: &str) {
    view.handle_input(text.as_bytes()).expect("handle input");
}

fn pump_until(
    view: &mut TerminalView<RecordingDisplay>,
    done: impl Fn(&TerminalView<RecordingDisplay>) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        view.pump_events().expect("pump events");
        view.tick(Instant::now()).expect("tick");
        if done(view) {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn screen(view: &TerminalView<RecordingDisplay>) -> &str {
    &view.display.screen
}

fn session_target(view: &TerminalView<RecordingDisplay>) -> Option<SessionId> {
    match view.router.target() {
        InputTarget::Session(id) => Some(id),
        _ => None,
    }
}

#[test]
fn open_shows_banner_and_prompt() {
    let view = test_view(&[]);

    assert!(view.display.focused);
    assert!(screen(&view).contains("panelterm"));
    assert!(screen(&view).ends_with(HOME_PROMPT));
    assert_eq!(view.router.target(), InputTarget::LineEditor);
    assert_eq!(view.router.bind_count(), 1);
}

#[test]
fn close_detaches_input_and_disposes_display() {
    let mut view = test_view(&[]);
    view.close().expect("close");

    assert!(view.display.disposed);
    assert_eq!(view.router.target(), InputTarget::Detached);
    typed(&mut view, "zzz\r");
    assert!(!screen(&view).contains("zzz"));
}

#[test]
fn clear_twice_equals_clear_once() {
    let mut view = test_view(&[]);
    typed(&mut view, "clear\r");
    let once = screen(&view).to_string();
    typed(&mut view, "clear\r");

    assert_eq!(screen(&view), once);
    assert_eq!(screen(&view), HOME_PROMPT);
    assert_eq!(view.display.clears, 2);
    assert!(view.session.is_none());
}

#[test]
fn cd_moves_context_and_prompt() {
    let mut view = test_view(&[]);
    let target = Path::new("/tmp").canonicalize().expect("canonical tmp");
    typed(&mut view, "cd /tmp\r");

    assert_eq!(view.workdir.path(), target.as_path());
    let segment = view.workdir.prompt_segment();
    assert!(screen(&view).ends_with(&format!("\u{1b}[36m{segment}\u{1b}[0m $ ")));

    typed(&mut view, "cd\r");
    assert_eq!(view.workdir.path(), view.workdir.home());
    assert!(screen(&view).ends_with(HOME_PROMPT));
}

#[test]
fn cd_to_missing_directory_reports_and_stays() {
    let mut view = test_view(&[]);
    let before = view.workdir.path().to_path_buf();
    typed(&mut view, "cd /definitely/not/here\r");

    assert!(screen(&view).contains("cd: no such file or directory: /definitely/not/here\r\n"));
    assert_eq!(view.workdir.path(), before.as_path());
    assert!(screen(&view).ends_with(HOME_PROMPT));
}

#[test]
fn unknown_command_never_spawns() {
    let mut view = test_view(&[]);
    typed(&mut view, "nonexistentcmd --flag\r");

    assert!(screen(&view).contains("nonexistentcmd: command not found\r\n"));
    assert!(view.session.is_none());
    assert_eq!(view.session_state(), SessionState::Idle);
    assert_eq!(view.router.target(), InputTarget::LineEditor);
    assert!(screen(&view).ends_with(HOME_PROMPT));
}

#[test]
fn missing_claude_reports_not_found() {
    let mut view = test_view(&[("expect", "/bin/cat")]);
    typed(&mut view, "claude\r");

    assert!(screen(&view).contains("claude: command not found\r\n"));
    assert!(view.session.is_none());
}

#[test]
fn empty_enter_reprompts() {
    let mut view = test_view(&[]);
    typed(&mut view, "   \r");

    assert!(screen(&view).ends_with(&format!("{HOME_PROMPT}   \r\n{HOME_PROMPT}")));
    assert_eq!(view.editor.history().len(), 0);
}

#[test]
fn ctrl_c_clears_pending_line() {
    let mut view = test_view(&[]);
    typed(&mut view, "abc");
    view.handle_input(&[CTRL_C]).expect("ctrl-c");

    assert_eq!(view.editor.buffer(), "");
    assert!(screen(&view).ends_with(&format!("abc^C\r\n{HOME_PROMPT}")));
}

#[test]
fn backspace_erases_last_character() {
    let mut view = test_view(&[]);
    typed(&mut view, "lsx\u{7f}");

    assert_eq!(view.editor.buffer(), "ls");
    assert!(screen(&view).ends_with("lsx\u{8} \u{8}"));
}

#[test]
fn history_index_stays_in_bounds() {
    let mut view = test_view(&[]);
    typed(&mut view, "first\r");
    typed(&mut view, "second\r");

    typed(&mut view, "\u{1b}[A\u{1b}[A\u{1b}[A\u{1b}[A");
    assert_eq!(view.editor.buffer(), "first");
    assert_eq!(view.editor.history().index(), 0);

    typed(&mut view, "\u{1b}[B\u{1b}[B\u{1b}[B\u{1b}[B");
    assert_eq!(view.editor.buffer(), "");
    let history = view.editor.history();
    assert_eq!(history.index(), history.len());
    assert_eq!(history.entries(), ["first".to_string(), "second".to_string()]);
}

#[test]
fn auto_run_dispatches_default_command() {
    let settings = Settings {
        auto_run: true,
        default_command: "nonexistentcmd".to_string(),
        ..test_settings()
    };
    let view = view_with(settings, &[]);

    assert!(screen(&view).contains("nonexistentcmd: command not found\r\n"));
    assert!(screen(&view).ends_with(HOME_PROMPT));
}

#[test]
fn pty_backend_failure_falls_back_to_line_editor() {
    let settings = Settings {
        backend: ShellBackend::Pty,
        shell: Some("/definitely/missing/shell".to_string()),
        ..test_settings()
    };
    let view = view_with(settings, &[]);

    assert!(view.pty.is_none());
    assert_eq!(view.router.target(), InputTarget::LineEditor);
    assert!(screen(&view).ends_with(HOME_PROMPT));
}

#[test]
fn cat_session_echoes_and_ends_on_eof() {
    let mut view = test_view(&[("cat", "/bin/cat")]);
    typed(&mut view, "cat\r");
    assert!(session_target(&view).is_some());
    assert_eq!(view.session_state(), SessionState::Running);

    typed(&mut view, "hello\r");
    assert!(pump_until(&mut view, |v| screen(v).contains("hello\r\nhello\r\n")));
    assert_eq!(view.session_state(), SessionState::Running);
    assert!(view.display.bottom_scrolls > 0);

    typed(&mut view, "\u{4}");
    assert!(pump_until(&mut view, |v| screen(v).contains("[cat exited]")));
    assert_eq!(view.router.target(), InputTarget::LineEditor);
    assert_eq!(view.session_state(), SessionState::Idle);
    assert!(screen(&view).ends_with(HOME_PROMPT));
}

#[test]
fn ctrl_c_before_output_kills_session() {
    let mut view = test_view(&[("sh", "/bin/sh")]);
    typed(&mut view, "sh\r");
    assert!(session_target(&view).is_some());

    view.handle_input(&[CTRL_C]).expect("ctrl-c");
    assert!(screen(&view).contains("^C\r\n"));
    assert!(pump_until(&mut view, |v| screen(v).contains("[sh terminated by SIGTERM]")));
    assert_eq!(view.router.target(), InputTarget::LineEditor);
}

#[test]
fn ctrl_c_after_output_interrupts_session() {
    let mut view = test_view(&[("cat", "/bin/cat")]);
    typed(&mut view, "cat\r");
    typed(&mut view, "ping\r");
    assert!(pump_until(&mut view, |v| screen(v).contains("ping\r\nping\r\n")));

    view.handle_input(&[CTRL_C]).expect("ctrl-c");
    assert!(!screen(&view).contains("^C"));
    assert!(pump_until(&mut view, |v| screen(v).contains("[cat terminated by SIGINT]")));
}

#[test]
fn session_output_is_filtered_and_stale_output_dropped() {
    let mut view = test_view(&[("cat", "/bin/cat")]);
    typed(&mut view, "cat\r");
    let id = session_target(&view).expect("session bound");

    view.handle_event(AppEvent::SessionOutput {
        id,
        stream: OutputStream::Stdout,
        data: b"one\ntwo".to_vec(),
    })
    .expect("output");
    assert!(screen(&view).ends_with("one\r\ntwo"));
    assert!(view.session.as_ref().is_some_and(|s| s.has_output()));

    let before = screen(&view).to_string();
    view.handle_event(AppEvent::SessionOutput {
        id: id + 100,
        stream: OutputStream::Stderr,
        data: b"stale".to_vec(),
    })
    .expect("stale output");
    assert_eq!(screen(&view), before);

    view.restart().expect("restart");
}

#[test]
fn restart_rebinds_exactly_once() {
    let mut view = test_view(&[("sh", "/bin/sh")]);
    let cycles = 3;
    for _ in 0..cycles {
        typed(&mut view, "sh\r");
        assert!(session_target(&view).is_some());
        view.restart().expect("restart");
        assert_eq!(view.router.target(), InputTarget::LineEditor);
        assert!(view.session.is_none());
    }

    // Open binds once; each cycle binds the session and then the editor.
    assert_eq!(view.router.bind_count(), 1 + 2 * cycles);
    assert_eq!(view.editor.history().len(), 0);
    assert_eq!(view.display.clears, cycles);
    assert!(view.deadlines.is_empty());
}

#[test]
fn claude_watchdog_hints_then_gives_up() {
    let mut view = test_view(&[("claude", "/bin/sh")]);
    typed(&mut view, "claude\r");
    let started = Instant::now();

    assert!(screen(&view).contains("[claude via direct]"));
    let id = session_target(&view).expect("claude session bound");
    assert!(view.session.as_ref().is_some_and(|s| s.is_interactive()));
    assert_eq!(view.deadlines.len(), 3);

    view.tick(started + Duration::from_millis(2100)).expect("nudge");
    assert!(!screen(&view).contains("longer than expected"));

    view.tick(started + Duration::from_millis(5100)).expect("hint");
    assert!(screen(&view).contains(SLOW_START_HINT));
    assert_eq!(session_target(&view), Some(id));

    view.tick(started + Duration::from_millis(15100)).expect("give up");
    assert!(screen(&view).contains(GIVE_UP_NOTICE));
    assert!(pump_until(&mut view, |v| screen(v).contains("[claude terminated by SIGTERM]")));
    assert_eq!(view.router.target(), InputTarget::LineEditor);
    assert!(view.deadlines.is_empty());
}

#[test]
fn claude_simple_forces_direct_strategy() {
    let mut view = test_view(&[("claude", "/bin/sh"), ("expect", "/bin/cat")]);
    typed(&mut view, "claude-simple\r");

    assert!(screen(&view).contains("[claude via direct]"));
    assert!(session_target(&view).is_some());
    view.restart().expect("restart");
}

#[test]
fn check_claude_reports_helpers_and_strategy() {
    let mut view = test_view(&[("claude", "/bin/sh"), ("stdbuf", "/bin/cat")]);
    typed(&mut view, "check-claude\r");

    let out = screen(&view);
    assert!(out.contains("claude: /bin/sh\r\n"));
    assert!(out.contains("expect: missing"));
    assert!(out.contains("stdbuf: available"));
    assert!(out.contains("strategy: stdbuf\r\n"));
    assert!(out.contains("version: "));
    assert!(view.session.is_none());
    assert!(out.ends_with(HOME_PROMPT));
}

#[test]
fn claude_nudge_writes_a_newline_to_a_silent_session() {
    let mut view = test_view(&[("claude", "/bin/cat")]);
    typed(&mut view, "claude\r");
    let started = Instant::now();
    assert!(session_target(&view).is_some());

    view.tick(started + Duration::from_millis(2100)).expect("nudge");
    assert!(pump_until(&mut view, |v| v.session.as_ref().is_some_and(|s| s.has_output())));
    assert!(screen(&view).ends_with("[claude via direct]\u{1b}[0m\r\n\r\n"));
    assert!(!screen(&view).contains(SLOW_START_HINT));
    view.restart().expect("restart");
}

#[test]
fn claude_watchdog_stands_down_once_output_arrives() {
    let mut view = test_view(&[("claude", "/bin/cat")]);
    typed(&mut view, "claude\r");
    let started = Instant::now();

    typed(&mut view, "hi\n");
    assert!(pump_until(&mut view, |v| screen(v).contains("hi\r\n")));

    view.tick(started + Duration::from_millis(15100)).expect("all deadlines");
    assert!(!screen(&view).contains(SLOW_START_HINT));
    assert!(!screen(&view).contains(GIVE_UP_NOTICE));
    assert_eq!(view.session_state(), SessionState::Running);
    assert!(session_target(&view).is_some());
    assert!(view.deadlines.is_empty());
    view.restart().expect("restart");
}

#[test]
fn interrupt_in_the_middle_of_input_keeps_surrounding_bytes() {
    let mut view = test_view(&[("sh", "/bin/sh")]);
    typed(&mut view, "sh\r");
    assert!(session_target(&view).is_some());

    view.handle_input(b"foo\x03bar").expect("input");
    assert!(screen(&view).contains("foo^C\r\nbar"));
    assert!(pump_until(&mut view, |v| screen(v).contains("[sh terminated by SIGTERM]")));
}

#[test]
fn restart_does_not_wait_for_a_stubborn_session() {
    let mut settings = test_settings();
    settings.timings.kill_grace_ms = 1500;
    let mut view = view_with(settings, &[("sh", "/bin/sh")]);
    typed(&mut view, "sh\r");
    typed(&mut view, "trap '' TERM; echo ar''med\r");
    assert!(pump_until(&mut view, |v| screen(v).contains("armed\r\n")));

    let started = Instant::now();
    view.restart().expect("restart");
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(view.retired.len(), 1);
    assert_eq!(view.router.target(), InputTarget::LineEditor);

    assert!(pump_until(&mut view, |v| v.retired.is_empty()));
}

#[test]
fn backspace_over_wide_char_erases_both_columns() {
    let mut view = test_view(&[]);
    typed(&mut view, "日\u{7f}");
    assert!(screen(&view).ends_with("日\u{8} \u{8}\u{8} \u{8}"));
}

#[test]
fn stream_close_releases_held_output() {
    let mut view = test_view(&[("cat", "/bin/cat")]);
    typed(&mut view, "cat\r");
    let id = session_target(&view).expect("session bound");

    view.handle_event(AppEvent::SessionOutput {
        id,
        stream: OutputStream::Stdout,
        data: b"done\x1b[2J".to_vec(),
    })
    .expect("output");
    assert!(screen(&view).ends_with("done"));

    view.handle_event(AppEvent::SessionStreamClosed {
        id,
        stream: OutputStream::Stdout,
    })
    .expect("close");
    assert!(screen(&view).ends_with("done\u{1b}[2J"));
    view.restart().expect("restart");
}
