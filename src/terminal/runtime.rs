use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::input::key_event_to_bytes;
use super::probe::ProcessLocator;
use super::*;

const ACTIVE_POLL_MS: u64 = 33;
const IDLE_POLL_MS: u64 = 100;
const MAX_EVENTS_PER_FRAME: u16 = 64;

enum HostKey {
    Quit,
    Restart,
}

fn host_key(key: &KeyEvent) -> Option<HostKey> {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(HostKey::Quit)
        }
        KeyCode::F(5) => Some(HostKey::Restart),
        _ => None,
    }
}

pub(crate) fn run_app(settings: Settings) -> Result<()> {
    let display = CrosstermDisplay::new(settings.placement);
    let locator = Box::new(ProcessLocator::new(settings.timings.probe_timeout()));
    let workdir = WorkingDirectoryContext::from_env();
    tracing::info!(
        cwd = %workdir.path().display(),
        backend = ?settings.backend,
        placement = ?settings.placement,
        "opening terminal panel"
    );

    let mut view = TerminalView::new(display, settings, locator, workdir);
    view.open()?;
    let result = event_loop(&mut view);
    if let Err(err) = &result {
        tracing::error!(error = %err, "event loop failed");
    }
    view.close()?;
    result
}

fn event_loop<D: TerminalDisplay>(view: &mut TerminalView<D>) -> Result<()> {
    loop {
        view.pump_events()?;
        view.tick(Instant::now())?;

        if view.should_quit {
            break;
        }

        let timeout = if view.is_busy() {
            Duration::from_millis(ACTIVE_POLL_MS)
        } else {
            Duration::from_millis(IDLE_POLL_MS)
        };
        if !event::poll(timeout).context("event poll")? {
            continue;
        }

        let mut drained_events: u16 = 0;
        loop {
            match event::read().context("event read")? {
                Event::Key(key) if !matches!(key.kind, KeyEventKind::Release) => {
                    match host_key(&key) {
                        Some(HostKey::Quit) => view.should_quit = true,
                        Some(HostKey::Restart) => view.restart()?,
                        None => {
                            if let Some(bytes) = key_event_to_bytes(key) {
                                view.handle_input(&bytes)?;
                            }
                        }
                    }
                }
                Event::Paste(text) => view.handle_input(text.as_bytes())?,
                Event::Resize(cols, rows) => view.resize(cols, rows),
                _ => {}
            }

            drained_events = drained_events.saturating_add(1);
            if view.should_quit || drained_events >= MAX_EVENTS_PER_FRAME {
                break;
            }
            if !event::poll(Duration::from_millis(0)).context("event poll drain")? {
                break;
            }
        }
    }
    tracing::info!(state = ?view.session_state(), "closing terminal panel");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_keys_are_not_forwarded() {
        let quit = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        let restart = KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE);
        let plain = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert!(matches!(host_key(&quit), Some(HostKey::Quit)));
        assert!(matches!(host_key(&restart), Some(HostKey::Restart)));
        assert!(host_key(&plain).is_none());
    }
}
