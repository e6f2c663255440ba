use super::*;
use super::probe::run_captured;
use super::strategy::{select_strategy, SessionStrategy};

/// Tools that only prompt when told they are interactive.
const INTERACTIVE_TOOLS: &[&str] = &["python", "python3", "node", "mongo", "psql"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum CommandKind {
    Clear,
    Cd,
    CheckClaude,
    ClaudeSimple,
    Claude,
    Interactive,
    External,
}

pub(super) fn classify(name: &str) -> CommandKind {
    match name {
        "clear" => CommandKind::Clear,
        "cd" => CommandKind::Cd,
        "check-claude" => CommandKind::CheckClaude,
        "claude-simple" => CommandKind::ClaudeSimple,
        "claude" => CommandKind::Claude,
        _ if INTERACTIVE_TOOLS.contains(&name) => CommandKind::Interactive,
        _ => CommandKind::External,
    }
}

fn repl_args(name: &str, args: Vec<String>) -> Vec<String> {
    if !args.is_empty() {
        return args;
    }
    match name {
        "python" | "python3" => vec!["-i".to_string(), "-u".to_string()],
        "node" => vec!["-i".to_string()],
        _ => args,
    }
}

impl<D: TerminalDisplay> TerminalView<D> {
    /// Runs one submitted line. Built-ins finish with a prompt; launches hand input to the session.
    pub(super) fn dispatch_line(&mut self, line: &str) -> Result<()> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return self.show_prompt();
        };
        let args: Vec<String> = words.map(str::to_string).collect();
        let kind = classify(name);
        tracing::debug!(name, ?kind, args = args.len(), "dispatching command");

        match kind {
            CommandKind::Clear => {
                self.display.clear()?;
                self.display.scroll_to_top()?;
                self.show_prompt()
            }
            CommandKind::Cd => {
                let target = args.first().map(String::as_str);
                if let Err(err) = self.workdir.change_dir(target) {
                    self.display.write_str(&format!("cd: {err}\r\n"))?;
                }
                self.show_prompt()
            }
            CommandKind::CheckClaude => self.check_claude(),
            CommandKind::Claude => self.launch_claude(args, None),
            CommandKind::ClaudeSimple => self.launch_claude(args, Some(SessionStrategy::Direct)),
            CommandKind::Interactive | CommandKind::External => {
                let Some(program) = self.locator.locate(name, &self.workdir) else {
                    self.display
                        .write_str(&format!("{name}: command not found\r\n"))?;
                    return self.show_prompt();
                };
                let spec = if kind == CommandKind::Interactive {
                    LaunchSpec {
                        interactive: true,
                        ..LaunchSpec::plain(name, &program, repl_args(name, args))
                    }
                } else {
                    LaunchSpec::plain(name, &program, args)
                };
                self.start_session(spec)
            }
        }
    }

    fn launch_claude(&mut self, args: Vec<String>, forced: Option<SessionStrategy>) -> Result<()> {
        let Some(program) = self.locator.locate("claude", &self.workdir) else {
            self.display.write_str("claude: command not found\r\n")?;
            return self.show_prompt();
        };
        let strategy =
            forced.unwrap_or_else(|| select_strategy(self.locator.as_ref(), &self.workdir));
        tracing::info!(path = %program.display(), strategy = strategy.as_str(), "launching claude");
        self.write_notice("2", &format!("[claude via {}]", strategy.as_str()))?;
        let spec = strategy.launch_spec("claude", &program, &args);
        self.start_session(spec)
    }

    fn check_claude(&mut self) -> Result<()> {
        let mut report = Vec::new();
        let located = self.locator.locate("claude", &self.workdir);
        match &located {
            Some(path) => report.push(format!("claude: {}", path.display())),
            None => report.push("claude: not found".to_string()),
        }
        for strategy in SessionStrategy::ORDER {
            if let Some(helper) = strategy.helper() {
                let status = if strategy.probe(self.locator.as_ref(), &self.workdir) {
                    "available"
                } else {
                    "missing"
                };
                report.push(format!("  {:<10} {helper}: {status}", strategy.as_str()));
            }
        }
        let chosen = select_strategy(self.locator.as_ref(), &self.workdir);
        report.push(format!("strategy: {}", chosen.as_str()));
        if let Some(path) = located {
            let version = run_captured(
                &path,
                &["--version"],
                &self.workdir,
                self.settings.timings.probe_timeout(),
            );
            match version {
                Some(out) if !out.trim().is_empty() => {
                    report.push(format!("version: {}", out.trim()))
                }
                _ => report.push("version: unavailable".to_string()),
            }
        }
        for line in report {
            self.display.write_str(&format!("{line}\r\n"))?;
        }
        self.show_prompt()
    }
}
