//! Continuation commands handed from the session to the interpreter.

use std::fmt;
use std::time::SystemTime;

/// What the interpreter should do after a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Resume until the next breakpoint or pause.
    Run,
    /// Step into the next call.
    StepIn,
    /// Run until the current function returns.
    StepOut,
    /// Step over the next statement.
    StepOver,
    /// Stop at the next opportunity.
    Pause,
    /// Arm a breakpoint at the action's location.
    SetBreakpoint,
    /// Disarm a breakpoint at the action's location.
    ClearBreakpoint,
    /// Flip a breakpoint at the action's location.
    ToggleBreakpoint,
    /// Re-publish watch snapshots.
    Refresh,
    /// Re-publish everything, including sources.
    HardRefresh,
    /// Clear every breakpoint in the action's source.
    ResetBreakpoints,
    /// Step one bytecode instruction into calls.
    ByteCodeStepIn,
    /// Step one bytecode instruction over calls.
    ByteCodeStepOver,
    /// Step bytecode until the current function returns.
    ByteCodeStepOut,
    /// No-op.
    None,
}

impl ActionKind {
    /// Whether the action carries a breakpoint location.
    pub fn is_breakpoint(self) -> bool {
        matches!(
            self,
            ActionKind::SetBreakpoint | ActionKind::ClearBreakpoint | ActionKind::ToggleBreakpoint
        )
    }
}

/// A `(source_id, line, column)` triple in debugger-native coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionLocation {
    /// Registered source id.
    pub source_id: usize,
    /// Line number.
    pub line: i64,
    /// Column number.
    pub column: i64,
}

/// One continuation command. Consumed exactly once by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct DebuggerAction {
    /// The command.
    pub kind: ActionKind,
    /// Target for breakpoint-kind actions.
    pub location: Option<ActionLocation>,
    /// When the action was created.
    pub created_at: SystemTime,
}

impl DebuggerAction {
    /// An action with no location.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            location: None,
            created_at: SystemTime::now(),
        }
    }

    /// A breakpoint-kind action at `(source_id, line, column)`.
    pub fn at(kind: ActionKind, source_id: usize, line: i64, column: i64) -> Self {
        Self {
            location: Some(ActionLocation {
                source_id,
                line,
                column,
            }),
            ..Self::new(kind)
        }
    }

    /// Time elapsed since the action was created.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed().unwrap_or_default()
    }
}

impl Default for DebuggerAction {
    fn default() -> Self {
        Self::new(ActionKind::Run)
    }
}

impl fmt::Display for DebuggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind.is_breakpoint(), self.location) {
            (true, Some(loc)) => write!(
                f,
                "{:?} {}:({},{})",
                self.kind, loc.source_id, loc.line, loc.column
            ),
            _ => write!(f, "{:?}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_default_is_run() {
        let action = DebuggerAction::default();
        assert_eq!(action.kind, ActionKind::Run);
        assert!(action.location.is_none());
    }

    #[test]
    fn action_display_breakpoint_kind_includes_location() {
        let action = DebuggerAction::at(ActionKind::ToggleBreakpoint, 1, 42, 10);
        assert_eq!(action.to_string(), "ToggleBreakpoint 1:(42,10)");
    }

    #[test]
    fn action_display_other_kinds_is_name_only() {
        assert_eq!(DebuggerAction::new(ActionKind::StepOver).to_string(), "StepOver");
        let located_run = DebuggerAction::at(ActionKind::Run, 1, 2, 3);
        assert_eq!(located_run.to_string(), "Run");
    }

    #[test]
    fn action_breakpoint_kinds() {
        assert!(ActionKind::SetBreakpoint.is_breakpoint());
        assert!(ActionKind::ClearBreakpoint.is_breakpoint());
        assert!(!ActionKind::ResetBreakpoints.is_breakpoint());
        assert!(!ActionKind::ByteCodeStepIn.is_breakpoint());
    }

    #[test]
    fn action_age_is_non_negative() {
        let action = DebuggerAction::new(ActionKind::Pause);
        assert!(action.age() < std::time::Duration::from_secs(60));
    }
}
