//! Debug-console meta commands.
//!
//! Text typed in the client's debug console starting with `!` is a meta
//! command that manages the debug session itself rather than evaluating a
//! script expression. Parsing yields a closed [`ReplCommand`]; execution
//! returns the console lines to print.

use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;

use crate::bridge::DebugBridge;
use crate::error::DapError;

/// Prefix marking a meta command.
pub const META_PREFIX: char = '!';

/// Registry of debuggable scripts; backs `!list`, `!select` and `!switch`.
pub trait ScriptDirectory: Send + Sync {
    /// `(id, name)` of every attached script, ordered by id.
    fn attached_debuggers(&self) -> Vec<(usize, String)>;

    /// Script new connections attach to.
    fn current_id(&self) -> Option<usize>;

    /// Change the script new connections attach to.
    fn set_current_id(&self, id: Option<usize>) -> Result<(), DapError>;
}

/// A parsed meta command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    List,
    Select(usize),
    Switch(usize),
    SetError(String),
    GetError,
    /// `None` reports the current state.
    ExecEndNotify(Option<bool>),
}

/// Why a meta command line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplError {
    #[error("Syntax error : {0}")]
    Syntax(String),
    #[error("Error : '{0}' is not a valid script id")]
    BadId(String),
    #[error("Error : expected 'on' or 'off'")]
    BadToggle,
    #[error("Error setting regex: no pattern given")]
    MissingPattern,
}

impl ReplCommand {
    /// Parse a command line with or without the leading `!`.
    pub fn parse(line: &str) -> Result<Self, ReplError> {
        let text = line.trim();
        let text = text.strip_prefix(META_PREFIX).unwrap_or(text).trim_start();
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (text, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "help" => Ok(ReplCommand::Help),
            "list" => Ok(ReplCommand::List),
            "select" => parse_id(rest).map(ReplCommand::Select),
            "switch" => parse_id(rest).map(ReplCommand::Switch),
            "seterror" if rest.is_empty() => Err(ReplError::MissingPattern),
            "seterror" => Ok(ReplCommand::SetError(rest.to_string())),
            "geterror" => Ok(ReplCommand::GetError),
            "execendnotify" => match rest.to_ascii_lowercase().as_str() {
                "" => Ok(ReplCommand::ExecEndNotify(None)),
                "on" => Ok(ReplCommand::ExecEndNotify(Some(true))),
                "off" => Ok(ReplCommand::ExecEndNotify(Some(false))),
                _ => Err(ReplError::BadToggle),
            },
            _ => Err(ReplError::Syntax(text.to_string())),
        }
    }
}

fn parse_id(text: &str) -> Result<usize, ReplError> {
    text.parse().map_err(|_| ReplError::BadId(text.to_string()))
}

/// The `!help` listing.
pub fn help_lines() -> Vec<String> {
    [
        "Available Commands : ",
        "    !help - gets this help",
        "    !list - lists the other scripts which can be debugged",
        "    !select <id> - select another script for future sessions",
        "    !switch <id> - switch to another script (same as select + disconnect)",
        "    !seterror <regex> - sets the regex which tells which errors to trap",
        "    !geterror - gets the current value of the regex which tells which errors to trap",
        "    !execendnotify [on|off] - sets the notification of end of execution on or off (default = off)",
        "    ... or type an expression to evaluate it on the fly.",
    ]
    .iter()
    .map(|l| l.to_string())
    .collect()
}

/// Lines printed for an unparseable command.
pub fn error_lines(err: &ReplError) -> Vec<String> {
    match err {
        ReplError::Syntax(_) => {
            let mut lines = vec![format!("{err}\n")];
            lines.extend(help_lines());
            lines
        }
        other => vec![other.to_string()],
    }
}

/// The `!list` table. `this` marks the script the session is bound to.
pub fn list_lines(directory: &dyn ScriptDirectory, this: Option<usize>) -> Vec<String> {
    let current = directory.current_id();
    directory
        .attached_debuggers()
        .into_iter()
        .map(|(id, name)| {
            let default = if current == Some(id) { " (default)" } else { "" };
            let marker = if this == Some(id) { " (this)" } else { "" };
            format!("{id:>9} : {name}{default}{marker}")
        })
        .collect()
}

/// `!select`: change the default script for future sessions.
pub fn select_lines(directory: &dyn ScriptDirectory, id: usize) -> Vec<String> {
    match directory.set_current_id(Some(id)) {
        Ok(()) => vec![format!(
            "Next time you'll attach the debugger, it will be attached to script #{id}"
        )],
        Err(e) => vec![format!("Error selecting debugger: {e}")],
    }
}

/// Output of running a command against a bound session.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplOutcome {
    /// Console lines, printed in order.
    pub lines: Vec<String>,
    /// The session should end so the next one attaches elsewhere.
    pub close_session: bool,
}

/// Execution context of a bound session's REPL.
pub struct Repl<'a> {
    pub bridge: &'a DebugBridge,
    pub directory: Option<&'a dyn ScriptDirectory>,
    pub notify_execution_end: &'a AtomicBool,
}

impl Repl<'_> {
    /// Run `command` and collect what to print.
    pub fn execute(&self, command: ReplCommand) -> ReplOutcome {
        let mut outcome = ReplOutcome::default();
        match command {
            ReplCommand::Help => outcome.lines = help_lines(),
            ReplCommand::List => {
                outcome.lines = match self.directory {
                    Some(dir) => list_lines(dir, Some(self.bridge.id())),
                    None => vec![format!("{:>9} : {} (this)", self.bridge.id(), self.bridge.name())],
                }
            }
            ReplCommand::Select(id) => outcome.lines = self.select(id),
            ReplCommand::Switch(id) => {
                outcome.lines = self.select(id);
                outcome.close_session = self
                    .directory
                    .is_some_and(|dir| dir.current_id() == Some(id));
            }
            ReplCommand::SetError(pattern) => match Regex::new(&pattern) {
                Ok(re) => {
                    self.bridge.set_error_filter(re);
                    outcome.lines = vec![format!("Current error regex : {pattern}")];
                }
                Err(e) => outcome.lines = vec![format!("Error setting regex: {e}")],
            },
            ReplCommand::GetError => {
                outcome.lines = vec![format!("Current error regex : {}", self.bridge.error_filter())]
            }
            ReplCommand::ExecEndNotify(toggle) => {
                if let Some(on) = toggle {
                    self.notify_execution_end.store(on, Ordering::SeqCst);
                }
                let state = if self.notify_execution_end.load(Ordering::SeqCst) {
                    "enabled"
                } else {
                    "disabled"
                };
                outcome.lines = vec![format!("Notifications of execution end are : {state}")];
            }
        }
        outcome
    }

    fn select(&self, id: usize) -> Vec<String> {
        match self.directory {
            Some(dir) => select_lines(dir, id),
            None => vec![format!(
                "Error selecting debugger: {}",
                DapError::UnknownDebugger(id)
            )],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeOptions;
    use std::sync::Mutex;

    struct FakeDirectory {
        scripts: Vec<(usize, String)>,
        current: Mutex<Option<usize>>,
    }

    impl FakeDirectory {
        fn new(ids: &[usize]) -> Self {
            Self {
                scripts: ids.iter().map(|id| (*id, format!("script{id}"))).collect(),
                current: Mutex::new(ids.first().copied()),
            }
        }
    }

    impl ScriptDirectory for FakeDirectory {
        fn attached_debuggers(&self) -> Vec<(usize, String)> {
            self.scripts.clone()
        }
        fn current_id(&self) -> Option<usize> {
            *self.current.lock().unwrap()
        }
        fn set_current_id(&self, id: Option<usize>) -> Result<(), DapError> {
            if let Some(id) = id {
                if !self.scripts.iter().any(|(i, _)| *i == id) {
                    return Err(DapError::UnknownDebugger(id));
                }
            }
            *self.current.lock().unwrap() = id;
            Ok(())
        }
    }

    #[test]
    fn repl_parse_commands() {
        assert_eq!(ReplCommand::parse("!help"), Ok(ReplCommand::Help));
        assert_eq!(ReplCommand::parse("  !LIST "), Ok(ReplCommand::List));
        assert_eq!(ReplCommand::parse("select 3"), Ok(ReplCommand::Select(3)));
        assert_eq!(ReplCommand::parse("!switch  12"), Ok(ReplCommand::Switch(12)));
        assert_eq!(
            ReplCommand::parse("!seterror ^index .*"),
            Ok(ReplCommand::SetError("^index .*".into()))
        );
        assert_eq!(ReplCommand::parse("!geterror"), Ok(ReplCommand::GetError));
        assert_eq!(ReplCommand::parse("!execendnotify"), Ok(ReplCommand::ExecEndNotify(None)));
        assert_eq!(
            ReplCommand::parse("!execendnotify ON"),
            Ok(ReplCommand::ExecEndNotify(Some(true)))
        );
    }

    #[test]
    fn repl_parse_errors() {
        assert_eq!(ReplCommand::parse("!frobnicate"), Err(ReplError::Syntax("frobnicate".into())));
        assert_eq!(ReplCommand::parse("!seterror"), Err(ReplError::MissingPattern));
        assert_eq!(ReplCommand::parse("!seterror   "), Err(ReplError::MissingPattern));
        assert_eq!(ReplCommand::parse("!select x"), Err(ReplError::BadId("x".into())));
        assert_eq!(ReplCommand::parse("!execendnotify maybe"), Err(ReplError::BadToggle));
    }

    #[test]
    fn repl_syntax_error_echoes_help() {
        let lines = error_lines(&ReplError::Syntax("bogus".into()));
        assert_eq!(lines[0], "Syntax error : bogus\n");
        assert_eq!(lines[1], "Available Commands : ");
        assert_eq!(lines.len(), 1 + help_lines().len());
        assert_eq!(error_lines(&ReplError::BadToggle), vec!["Error : expected 'on' or 'off'"]);
        assert_eq!(
            error_lines(&ReplError::MissingPattern),
            vec!["Error setting regex: no pattern given"]
        );
    }

    #[test]
    fn repl_list_marks_default_and_this() {
        let dir = FakeDirectory::new(&[1, 5]);
        let lines = list_lines(&dir, Some(5));
        assert_eq!(
            lines,
            vec!["        1 : script1 (default)", "        5 : script5 (this)"]
        );
    }

    #[test]
    fn repl_select_reports_unknown_id() {
        let dir = FakeDirectory::new(&[1]);
        assert_eq!(
            select_lines(&dir, 1),
            vec!["Next time you'll attach the debugger, it will be attached to script #1"]
        );
        assert_eq!(
            select_lines(&dir, 9),
            vec!["Error selecting debugger: cannot find debugger with id 9"]
        );
    }

    fn bridge() -> DebugBridge {
        DebugBridge::new("main", Some(Box::new(|_| None)), BridgeOptions::default())
    }

    #[test]
    fn repl_error_filter_round_trip() {
        let b = bridge();
        let flag = AtomicBool::new(false);
        let repl = Repl { bridge: &b, directory: None, notify_execution_end: &flag };

        let out = repl.execute(ReplCommand::SetError("^oops".into()));
        assert_eq!(out.lines, vec!["Current error regex : ^oops"]);
        assert_eq!(b.error_filter(), "^oops");

        let out = repl.execute(ReplCommand::SetError("(".into()));
        assert!(out.lines[0].starts_with("Error setting regex: "));
        assert_eq!(
            repl.execute(ReplCommand::GetError).lines,
            vec!["Current error regex : ^oops"]
        );
    }

    #[test]
    fn repl_exec_end_notify_toggles() {
        let b = bridge();
        let flag = AtomicBool::new(false);
        let repl = Repl { bridge: &b, directory: None, notify_execution_end: &flag };

        assert_eq!(
            repl.execute(ReplCommand::ExecEndNotify(None)).lines,
            vec!["Notifications of execution end are : disabled"]
        );
        repl.execute(ReplCommand::ExecEndNotify(Some(true)));
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(
            repl.execute(ReplCommand::ExecEndNotify(None)).lines,
            vec!["Notifications of execution end are : enabled"]
        );
    }

    #[test]
    fn repl_switch_closes_only_on_success() {
        let b = bridge();
        let flag = AtomicBool::new(false);
        let dir = FakeDirectory::new(&[1, 2]);
        let repl = Repl { bridge: &b, directory: Some(&dir), notify_execution_end: &flag };

        assert!(repl.execute(ReplCommand::Switch(2)).close_session);
        assert_eq!(dir.current_id(), Some(2));
        assert!(!repl.execute(ReplCommand::Switch(7)).close_session);

        let alone = Repl { bridge: &b, directory: None, notify_execution_end: &flag };
        let out = alone.execute(ReplCommand::Switch(2));
        assert!(!out.close_session);
        assert!(out.lines[0].starts_with("Error selecting debugger"));
    }
}
