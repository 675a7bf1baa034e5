//! "Open in editor" support for the error overlay.

use fob_hmr::SOURCES_ENDPOINT;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use tokio::process::Command;
use tokio::task::JoinHandle;

static LOCATION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)(?::(\d+))?(?::(\d+))?$").expect("valid regex"));

/// File position to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorTarget {
    pub file: PathBuf,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Opens files in the user's editor.
pub trait EditorLauncher: Send + Sync {
    /// Fire and forget; failures are logged, never returned.
    fn open(&self, target: &EditorTarget);
}

/// Launches the configured editor, `$VISUAL`, `$EDITOR` or VS Code.
#[derive(Debug, Clone, Default)]
pub struct SystemEditor {
    command: Option<String>,
}

impl SystemEditor {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    fn resolve_command(&self) -> String {
        self.command
            .clone()
            .or_else(|| std::env::var("VISUAL").ok())
            .or_else(|| std::env::var("EDITOR").ok())
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "code".to_string())
    }
}

/// Program and arguments to open `target` with `editor`.
pub fn editor_command(editor: &str, target: &EditorTarget) -> (String, Vec<String>) {
    let mut parts = editor.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_else(|| "code".to_string());
    let mut args: Vec<String> = parts.collect();

    let name = Path::new(&program)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let file = target.file.display().to_string();
    let line = target.line.unwrap_or(1);
    let column = target.column.unwrap_or(1);

    match name.as_str() {
        "code" | "code-insiders" | "codium" | "vscodium" | "cursor" => {
            args.push("--goto".to_string());
            args.push(format!("{file}:{line}:{column}"));
        }
        "subl" | "zed" => args.push(format!("{file}:{line}:{column}")),
        _ => {
            if target.line.is_some() {
                args.push(format!("+{line}"));
            }
            args.push(file);
        }
    }
    (program, args)
}

/// Spawn the editor and reap it in the background.
///
/// Must be called inside a tokio runtime.
pub fn spawn_editor(program: &str, args: &[String]) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let program = program.to_string();
    Ok(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(%program, error = %e, "Failed to wait for editor");
                None
            }
        }
    }))
}

impl EditorLauncher for SystemEditor {
    fn open(&self, target: &EditorTarget) {
        let editor = self.resolve_command();
        let (program, args) = editor_command(&editor, target);
        tracing::debug!(%program, file = %target.file.display(), "Opening editor");

        if let Err(e) = spawn_editor(&program, &args) {
            tracing::warn!(%program, error = %e, "Failed to launch editor");
        }
    }
}

/// Turn the `file` parameter of an editor request into a target.
///
/// Accepts `path`, `path:line` and `path:line:column`, where `path` is either
/// under the sources endpoint or relative to the project root.
pub fn parse_editor_target(file: &str, project_root: &Path) -> EditorTarget {
    let (path, line, column) = match LOCATION_SUFFIX.captures(file) {
        Some(caps) => (
            caps.get(1).map_or(file, |m| m.as_str()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
            caps.get(3).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (file, None, None),
    };

    let sources_prefix = format!("{SOURCES_ENDPOINT}/");
    let file = match path.strip_prefix(sources_prefix.as_str()) {
        Some(relative) => project_root.join(relative),
        None => {
            let path = Path::new(path);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                project_root.join(path)
            }
        }
    };

    EditorTarget { file, line, column }
}
