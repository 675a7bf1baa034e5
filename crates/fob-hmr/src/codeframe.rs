//! Code frames: a few lines of code around a position, with a gutter and a
//! caret under the reported column.
//!
//! ```text
//!   1 | import { a } from './a';
//! > 2 | a.foo();
//!     |   ^
//!   3 | export {};
//! ```

use owo_colors::OwoColorize;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?P<comment>//.*$|/\*.*?\*/)"#,
        r#"|(?P<string>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`)"#,
        r"|(?P<number>\b\d+(?:\.\d+)?\b)",
        r"|(?P<keyword>\b(?:import|export|from|default|const|let|var|function|return|if|else|for|while|do|switch|case|break|continue|new|class|extends|super|this|typeof|instanceof|in|of|async|await|yield|throw|try|catch|finally|null|undefined|true|false)\b)",
    ))
    .expect("valid regex")
});

#[derive(Debug, Clone, Copy)]
pub struct CodeFrameOptions {
    /// Lines shown above and below the highlighted line
    pub context_lines: usize,
    pub use_color: bool,
    pub syntax_highlighting: bool,
}

impl Default for CodeFrameOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            use_color: false,
            syntax_highlighting: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeFrameRenderer {
    options: CodeFrameOptions,
}

impl CodeFrameRenderer {
    pub fn new(options: CodeFrameOptions) -> Self {
        Self { options }
    }

    pub fn with_context_lines(mut self, context_lines: usize) -> Self {
        self.options.context_lines = context_lines;
        self
    }

    /// Render the frame around a 1-based `line`/`column`.
    ///
    /// Returns `None` when the line is outside the code.
    pub fn render(&self, code: &str, line: u32, column: u32) -> Option<String> {
        let lines: Vec<&str> = code.lines().collect();
        let line = line as usize;
        if line == 0 || line > lines.len() {
            return None;
        }

        let start = line.saturating_sub(self.options.context_lines).max(1);
        let end = line.saturating_add(self.options.context_lines).min(lines.len());
        let width = end.to_string().len();
        let mut out = Vec::with_capacity(end - start + 2);

        for number in start..=end {
            let text = self.highlight(lines[number - 1]);
            let gutter = format!("{number:>width$} |");
            if number == line {
                out.push(format!("> {} {text}", self.paint_marker(&gutter)));
                // The caret never goes past the end of the line
                let max_pad = lines[number - 1].chars().count();
                let caret_pad = " ".repeat((column.saturating_sub(1) as usize).min(max_pad));
                let empty_gutter = format!("{:>width$} |", "");
                out.push(format!(
                    "  {} {caret_pad}{}",
                    self.paint_gutter(&empty_gutter),
                    self.paint_marker("^")
                ));
            } else {
                out.push(format!("  {} {text}", self.paint_gutter(&gutter)));
            }
        }

        Some(out.join("\n"))
    }

    fn highlight(&self, line: &str) -> String {
        if !(self.options.use_color && self.options.syntax_highlighting) {
            return line.to_string();
        }
        TOKEN
            .replace_all(line, |caps: &Captures<'_>| {
                if let Some(m) = caps.name("comment") {
                    m.as_str().dimmed().to_string()
                } else if let Some(m) = caps.name("string") {
                    m.as_str().green().to_string()
                } else if let Some(m) = caps.name("number") {
                    m.as_str().magenta().to_string()
                } else if let Some(m) = caps.name("keyword") {
                    m.as_str().cyan().to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    fn paint_gutter(&self, s: &str) -> String {
        if self.options.use_color {
            s.dimmed().to_string()
        } else {
            s.to_string()
        }
    }

    fn paint_marker(&self, s: &str) -> String {
        if self.options.use_color {
            s.red().bold().to_string()
        } else {
            s.to_string()
        }
    }
}
