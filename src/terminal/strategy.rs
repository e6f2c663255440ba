use std::path::Path;

use super::probe::CommandLocator;
use super::workdir::WorkingDirectoryContext;

const PYTHON_PTY_BRIDGE: &str = "import pty, sys; pty.spawn(sys.argv[1:])";

/// Ways of running a tool that misbehaves when its stdout is a pipe, best first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionStrategy {
    Expect,
    Stdbuf,
    Unbuffer,
    PythonPty,
    Direct,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LaunchSpec {
    pub(crate) label: String,
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) interactive: bool,
    /// Echo and buffer keystrokes locally, sending whole lines; for tools without a pty.
    pub(crate) cooked: bool,
    pub(crate) watchdog: bool,
}

impl LaunchSpec {
    pub(crate) fn plain(label: &str, program: &Path, args: Vec<String>) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string_lossy().to_string(),
            args,
            interactive: false,
            cooked: true,
            watchdog: false,
        }
    }
}

impl SessionStrategy {
    pub(crate) const ORDER: [SessionStrategy; 5] = [
        SessionStrategy::Expect,
        SessionStrategy::Stdbuf,
        SessionStrategy::Unbuffer,
        SessionStrategy::PythonPty,
        SessionStrategy::Direct,
    ];

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SessionStrategy::Expect => "expect",
            SessionStrategy::Stdbuf => "stdbuf",
            SessionStrategy::Unbuffer => "unbuffer",
            SessionStrategy::PythonPty => "python-pty",
            SessionStrategy::Direct => "direct",
        }
    }

    pub(crate) fn helper(&self) -> Option<&'static str> {
        match self {
            SessionStrategy::Expect => Some("expect"),
            SessionStrategy::Stdbuf => Some("stdbuf"),
            SessionStrategy::Unbuffer => Some("unbuffer"),
            SessionStrategy::PythonPty => Some("python3"),
            SessionStrategy::Direct => None,
        }
    }

    pub(crate) fn probe(
        &self,
        locator: &dyn CommandLocator,
        workdir: &WorkingDirectoryContext,
    ) -> bool {
        match self.helper() {
            Some(helper) => locator.is_available(helper, workdir),
            None => true,
        }
    }

    pub(crate) fn launch_spec(&self, label: &str, tool: &Path, args: &[String]) -> LaunchSpec {
        let tool = tool.to_string_lossy().to_string();
        let (program, launch_args) = match self {
            SessionStrategy::Expect => {
                let mut words = vec![tcl_quote(&tool)];
                words.extend(args.iter().map(|arg| tcl_quote(arg)));
                let script = format!("spawn -noecho {}; interact", words.join(" "));
                ("expect".to_string(), vec!["-c".to_string(), script])
            }
            SessionStrategy::Stdbuf => {
                let mut all = vec!["-oL".to_string(), "-eL".to_string(), tool];
                all.extend(args.iter().cloned());
                ("stdbuf".to_string(), all)
            }
            SessionStrategy::Unbuffer => {
                let mut all = vec!["-p".to_string(), tool];
                all.extend(args.iter().cloned());
                ("unbuffer".to_string(), all)
            }
            SessionStrategy::PythonPty => {
                let mut all = vec!["-c".to_string(), PYTHON_PTY_BRIDGE.to_string(), tool];
                all.extend(args.iter().cloned());
                ("python3".to_string(), all)
            }
            SessionStrategy::Direct => (tool, args.to_vec()),
        };
        LaunchSpec {
            label: label.to_string(),
            program,
            args: launch_args,
            interactive: true,
            cooked: false,
            watchdog: true,
        }
    }
}

pub(crate) fn select_strategy(
    locator: &dyn CommandLocator,
    workdir: &WorkingDirectoryContext,
) -> SessionStrategy {
    SessionStrategy::ORDER
        .into_iter()
        .find(|strategy| strategy.probe(locator, workdir))
        .unwrap_or(SessionStrategy::Direct)
}

fn tcl_quote(word: &str) -> String {
    if !word.is_empty() && !word.contains(['{', '}', '\\']) {
        return format!("{{{word}}}");
    }
    let mut out = String::with_capacity(word.len() + 2);
    out.push('"');
    for ch in word.chars() {
        if matches!(ch, '"' | '\\' | '$' | '[' | ']' | '{' | '}') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}
