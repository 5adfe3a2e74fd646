//! Session served while no script is attached.
//!
//! Answers enough of the protocol for a client to connect and pick a
//! script through the debug console.

use std::sync::Arc;

use serde_json::Value;

use crate::adapter::main_thread_body;
use crate::protocol::{EvaluateArguments, EvaluateResponseBody};
use crate::repl::{error_lines, help_lines, list_lines, select_lines, ReplCommand, ScriptDirectory, META_PREFIX};
use crate::session::{parse_args, Command, HandlerResult, RequestHandler, SessionContext};

/// Handler for connections made when there is nothing to debug.
pub struct DetachedSession {
    directory: Arc<dyn ScriptDirectory>,
}

impl DetachedSession {
    pub fn new(directory: Arc<dyn ScriptDirectory>) -> Self {
        Self { directory }
    }

    fn repl_lines(&self, line: &str) -> Vec<String> {
        match ReplCommand::parse(line) {
            Ok(ReplCommand::Help) => help_lines(),
            Ok(ReplCommand::List) => list_lines(self.directory.as_ref(), None),
            Ok(ReplCommand::Select(id)) | Ok(ReplCommand::Switch(id)) => {
                select_lines(self.directory.as_ref(), id)
            }
            Ok(_) => vec!["No script is attached; only !help, !list and !select are available.".into()],
            Err(e) => error_lines(&e),
        }
    }
}

impl RequestHandler for DetachedSession {
    fn greet(&mut self, ctx: &SessionContext) {
        ctx.send_text(&format!(
            "Connected to moonlit {} on process {}",
            env!("CARGO_PKG_VERSION"),
            std::process::id()
        ));
        ctx.send_text("No script is attached to the debugger.");
        ctx.send_text("Type '!list' to see the available scripts and '!select <id>' to pick one, then reconnect.");
    }

    fn handle(&mut self, ctx: &SessionContext, command: Command, args: &Value) -> HandlerResult {
        match command {
            Command::Threads => Ok(Some(main_thread_body())),
            Command::Evaluate => {
                let args: EvaluateArguments = parse_args(command, args)?;
                let line = args.expression.trim();
                let line = line.strip_prefix(META_PREFIX).unwrap_or(line);
                for text in self.repl_lines(line) {
                    ctx.send_text(&text);
                }
                let body = EvaluateResponseBody {
                    result: String::new(),
                    result_type: None,
                    variables_reference: 0,
                };
                Ok(Some(serde_json::json!(body)))
            }
            _ => Ok(None),
        }
    }
}
