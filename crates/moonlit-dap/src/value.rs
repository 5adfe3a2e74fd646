//! Values exposed by the interpreter for inspection.

use crate::protocol::Variable;

/// A runtime value as the debugger sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugValue {
    /// `nil`.
    Nil,
    /// No value at all (e.g. an empty return).
    Void,
    /// A boolean.
    Boolean(bool),
    /// A number.
    Number(f64),
    /// A string.
    String(String),
    /// A function, described by its address or name.
    Function(String),
    /// A table as ordered key/value pairs.
    Table(Vec<(DebugValue, DebugValue)>),
    /// A multiple-value tuple.
    Tuple(Vec<DebugValue>),
    /// Host userdata, described by its descriptor name.
    UserData(String),
}

impl DebugValue {
    /// Script-level type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            DebugValue::Nil => "nil",
            DebugValue::Void => "void",
            DebugValue::Boolean(_) => "boolean",
            DebugValue::Number(_) => "number",
            DebugValue::String(_) => "string",
            DebugValue::Function(_) => "function",
            DebugValue::Table(_) => "table",
            DebugValue::Tuple(_) => "tuple",
            DebugValue::UserData(_) => "userdata",
        }
    }

    /// Whether inspecting the value yields child rows.
    pub fn is_expandable(&self) -> bool {
        matches!(self, DebugValue::Table(_) | DebugValue::Tuple(_))
    }

    /// One-line rendering for the debug console and variable views.
    pub fn to_debug_print_string(&self) -> String {
        match self {
            DebugValue::Nil => "nil".to_string(),
            DebugValue::Void => "void".to_string(),
            DebugValue::Boolean(b) => b.to_string(),
            DebugValue::Number(n) => format_number(*n),
            DebugValue::String(s) => format!("\"{s}\""),
            DebugValue::Function(desc) => format!("function: {desc}"),
            DebugValue::Table(entries) => format!("table: {} entries", entries.len()),
            DebugValue::Tuple(items) => items
                .iter()
                .map(DebugValue::to_debug_print_string)
                .collect::<Vec<_>>()
                .join(", "),
            DebugValue::UserData(desc) => format!("userdata: {desc}"),
        }
    }

    /// Rows shown when the value is expanded: `(value)` and `(type)`
    /// followed by one row per table entry or tuple element.
    pub fn inspect(&self) -> Vec<Variable> {
        let mut rows = vec![
            Variable::leaf("(value)", self.to_debug_print_string()),
            Variable::leaf("(type)", self.type_name()),
        ];
        match self {
            DebugValue::Table(entries) => {
                rows.extend(
                    entries
                        .iter()
                        .map(|(k, v)| Variable::leaf(key_label(k), v.to_debug_print_string())),
                );
            }
            DebugValue::Tuple(items) => {
                rows.extend(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| Variable::leaf(format!("[{i}]"), v.to_debug_print_string())),
                );
            }
            _ => {}
        }
        rows
    }
}

fn key_label(key: &DebugValue) -> String {
    match key {
        DebugValue::String(s) => s.clone(),
        other => format!("[{}]", other.to_debug_print_string()),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_names() {
        assert_eq!(DebugValue::Nil.type_name(), "nil");
        assert_eq!(DebugValue::Tuple(vec![]).type_name(), "tuple");
        assert_eq!(DebugValue::UserData("File".into()).type_name(), "userdata");
    }

    #[test]
    fn value_print_strings() {
        assert_eq!(DebugValue::Number(3.0).to_debug_print_string(), "3");
        assert_eq!(DebugValue::Number(2.5).to_debug_print_string(), "2.5");
        assert_eq!(DebugValue::String("hi".into()).to_debug_print_string(), "\"hi\"");
        assert_eq!(DebugValue::Boolean(false).to_debug_print_string(), "false");
        assert_eq!(
            DebugValue::Tuple(vec![DebugValue::Number(1.0), DebugValue::Nil]).to_debug_print_string(),
            "1, nil"
        );
    }

    #[test]
    fn value_inspect_table_lists_entries() {
        let table = DebugValue::Table(vec![
            (DebugValue::String("x".into()), DebugValue::Number(1.0)),
            (DebugValue::Number(1.0), DebugValue::Boolean(true)),
        ]);
        let rows = table.inspect();
        let names: Vec<&str> = rows.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["(value)", "(type)", "x", "[1]"]);
        assert_eq!(rows[1].value, "table");
        assert_eq!(rows[3].value, "true");
    }

    #[test]
    fn value_inspect_scalar_has_two_rows() {
        let rows = DebugValue::Number(7.0).inspect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "7");
        assert_eq!(rows[1].value, "number");
    }

    #[test]
    fn value_expandable_only_for_containers() {
        assert!(DebugValue::Table(vec![]).is_expandable());
        assert!(DebugValue::Tuple(vec![]).is_expandable());
        assert!(!DebugValue::String("t".into()).is_expandable());
    }
}
