//! Source registration and on-disk resolution.
//!
//! Every chunk the interpreter loads is registered here. When the injected
//! finder cannot point at an existing file, the text is written to a
//! generated temporary file and that path becomes the source's override.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A chunk of script source registered by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCode {
    /// Interpreter-assigned chunk id.
    pub id: usize,
    /// Display name, usually the path the script was loaded from.
    pub name: String,
    /// Full source text.
    pub code: String,
}

impl SourceCode {
    /// Create a registration record.
    pub fn new(id: usize, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            code: code.into(),
        }
    }
}

/// A source range in debugger-native coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceRef {
    /// Registered source id.
    pub source_id: usize,
    /// First line of the range.
    pub from_line: i64,
    /// Last line of the range.
    pub to_line: i64,
    /// First column of the range.
    pub from_char: i64,
    /// Last column of the range.
    pub to_char: i64,
    /// The location is inside host (native) code.
    pub is_native: bool,
}

impl SourceRef {
    /// A single-line range in script code.
    pub fn line(source_id: usize, line: i64) -> Self {
        Self {
            source_id,
            from_line: line,
            to_line: line,
            ..Self::default()
        }
    }
}

/// A runtime error raised by the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    /// Raw message, matched against the error filter.
    pub message: String,
    /// Message decorated with location information, when available.
    pub decorated_message: Option<String>,
}

impl RuntimeError {
    /// An error with no decoration.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            decorated_message: None,
        }
    }

    /// The text shown to the user.
    pub fn display_message(&self) -> &str {
        self.decorated_message.as_deref().unwrap_or(&self.message)
    }
}

/// What clients are told about a registered source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Registered source id.
    pub id: usize,
    /// Display name.
    pub name: String,
    /// Path clients should open.
    pub path: String,
    /// `path` differs from `name` (resolved elsewhere or materialized).
    pub is_override: bool,
}

/// Maps a registered source to the file that holds it, if any.
pub type SourceFinder = Box<dyn Fn(&SourceCode) -> Option<PathBuf> + Send + Sync>;

/// The default finder: the display name is the path.
pub fn name_as_path() -> SourceFinder {
    Box::new(|src: &SourceCode| Some(PathBuf::from(&src.name)))
}

const TEMP_FOOTER: &str = "\n\n\
-- --------------------------------------------------------------------------\n\
-- This file was generated by the debugger as a placeholder for a script\n\
-- chunk held in memory. It is not valid after the host process restarts.\n\
-- --------------------------------------------------------------------------\n";

/// Where materialized sources go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempSettings {
    /// Target directory; the system temp dir when `None`.
    pub dir: Option<PathBuf>,
    /// Extension without a leading dot.
    pub extension: String,
}

impl Default for TempSettings {
    fn default() -> Self {
        Self {
            dir: None,
            extension: "lua".to_string(),
        }
    }
}

/// Write `source` plus the placeholder footer to a fresh temp file that
/// outlives the process. Returns `None` on any I/O failure.
pub fn materialize(source: &SourceCode, settings: &TempSettings) -> Option<PathBuf> {
    let suffix = format!(".{}", settings.extension);
    let mut builder = tempfile::Builder::new();
    builder.prefix("moonlit-").suffix(&suffix);
    let created = match &settings.dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };

    let result = created.and_then(|mut file| {
        file.write_all(source.code.as_bytes())?;
        file.write_all(TEMP_FOOTER.as_bytes())?;
        file.flush()?;
        file.keep().map(|(_, path)| path).map_err(|e| e.error)
    });
    match result {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(source_id = source.id, error = %e, "failed to materialize source");
            None
        }
    }
}

/// Slash-unified, case-folded form used for path lookups.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Registered sources in registration order plus their path overrides.
pub struct SourceRegistry {
    sources: Vec<SourceCode>,
    overrides: HashMap<usize, PathBuf>,
    finder: SourceFinder,
    temp: TempSettings,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new(finder: SourceFinder, temp: TempSettings) -> Self {
        Self {
            sources: Vec::new(),
            overrides: HashMap::new(),
            finder,
            temp,
        }
    }

    /// Record `source` and resolve its on-disk path.
    ///
    /// Re-registering an id replaces its text in place. An override, once
    /// created for an id, is never replaced.
    pub fn register(&mut self, source: SourceCode) -> SourceInfo {
        let id = source.id;
        if !self.overrides.contains_key(&id) {
            if let Some(path) = self.resolve(&source) {
                self.overrides.insert(id, path);
            }
        }

        match self.sources.iter_mut().find(|s| s.id == id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
        tracing::debug!(source_id = id, overridden = self.is_override(id), "registered source");
        self.info(id).unwrap_or(SourceInfo {
            id,
            name: String::new(),
            path: String::new(),
            is_override: false,
        })
    }

    /// The override path to record for `source`, if any.
    fn resolve(&self, source: &SourceCode) -> Option<PathBuf> {
        match (self.finder)(source) {
            Some(path) if path.is_file() => {
                if path == Path::new(&source.name) {
                    None
                } else {
                    Some(path)
                }
            }
            _ => materialize(source, &self.temp),
        }
    }

    /// The source registered under `id`.
    pub fn get(&self, id: usize) -> Option<&SourceCode> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// The path clients should open for `id`.
    pub fn file(&self, id: usize) -> Option<String> {
        if let Some(path) = self.overrides.get(&id) {
            return Some(path.to_string_lossy().into_owned());
        }
        self.get(id).map(|s| s.name.clone())
    }

    /// Whether `id` resolved to a path other than its name.
    pub fn is_override(&self, id: usize) -> bool {
        self.overrides.contains_key(&id)
    }

    /// Notification payload for `id`.
    pub fn info(&self, id: usize) -> Option<SourceInfo> {
        let source = self.get(id)?;
        Some(SourceInfo {
            id,
            name: source.name.clone(),
            path: self.file(id).unwrap_or_else(|| source.name.clone()),
            is_override: self.is_override(id),
        })
    }

    /// Notification payloads for every source, in registration order.
    pub fn infos(&self) -> Vec<SourceInfo> {
        self.sources.iter().filter_map(|s| self.info(s.id)).collect()
    }

    /// Find a source by path. Overrides are matched first, then names.
    pub fn find_by_path(&self, path: &str) -> Option<usize> {
        if path.is_empty() {
            return None;
        }
        let wanted = normalize_path(path);
        let by_override = self
            .sources
            .iter()
            .filter_map(|s| self.overrides.get(&s.id).map(|p| (s.id, p)))
            .find(|(_, p)| normalize_path(&p.to_string_lossy()) == wanted)
            .map(|(id, _)| id);
        by_override.or_else(|| {
            self.sources
                .iter()
                .find(|s| normalize_path(&s.name) == wanted)
                .map(|s| s.id)
        })
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.len())
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
