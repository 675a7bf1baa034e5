//! Rendering of build diagnostics for HMR `error` messages.
//!
//! Each diagnostic is rendered twice through miette's graphical handler:
//! once with ANSI colours for terminals and once without, HTML-escaped, for
//! the browser overlay.

use crate::protocol::{HmrDiagnostics, RenderedDiagnostic};
use miette::{
    Diagnostic, GraphicalReportHandler, GraphicalTheme, LabeledSpan, NamedSource, SourceCode,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A diagnostic reported by the build pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDiagnostic {
    pub message: String,
    /// Plugin or pipeline stage that produced the diagnostic
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Contents of `file_path`; read from disk when absent
    #[serde(default)]
    pub source: Option<String>,
    /// 1-based
    #[serde(default)]
    pub line: Option<u32>,
    /// 1-based
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub documentation_url: Option<String>,
}

impl BuildDiagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Borrowed view of a [`BuildDiagnostic`] that miette can render.
#[derive(Debug)]
struct Report<'a> {
    diagnostic: &'a BuildDiagnostic,
    source: Option<NamedSource<String>>,
    span: Option<(usize, usize)>,
}

impl<'a> Report<'a> {
    fn new(diagnostic: &'a BuildDiagnostic) -> Self {
        let contents = diagnostic.source.clone().or_else(|| {
            diagnostic
                .file_path
                .as_ref()
                .and_then(|p| std::fs::read_to_string(p).ok())
        });

        let (source, span) = match (contents, diagnostic.line) {
            (Some(contents), Some(line)) => {
                let span = line_col_to_offset(&contents, line, diagnostic.column.unwrap_or(1))
                    .map(|offset| (offset, token_len(&contents, offset)));
                let name = diagnostic
                    .file_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                (Some(NamedSource::new(name, contents)), span)
            }
            _ => (None, None),
        };

        Self {
            diagnostic,
            source,
            span,
        }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.diagnostic.message)
    }
}

impl std::error::Error for Report<'_> {}

impl Diagnostic for Report<'_> {
    fn code<'b>(&'b self) -> Option<Box<dyn fmt::Display + 'b>> {
        self.diagnostic
            .origin
            .as_ref()
            .map(|o| Box::new(o.clone()) as Box<dyn fmt::Display>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.source.as_ref().map(|s| s as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let (offset, len) = self.span?;
        Some(Box::new(std::iter::once(LabeledSpan::new(None, offset, len))))
    }
}

/// Render diagnostics into the ANSI and HTML forms sent to clients.
pub fn render_diagnostics(diagnostics: &[BuildDiagnostic]) -> HmrDiagnostics {
    let ansi_handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode()).with_links(false);
    let plain_handler =
        GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor()).with_links(false);

    let mut rendered = HmrDiagnostics::default();
    for diagnostic in diagnostics {
        let report = Report::new(diagnostic);
        let has_frame = report.span.is_some();

        let ansi_frame = if has_frame {
            render(&ansi_handler, &report)
        } else {
            String::new()
        };
        let plain_frame = if has_frame {
            render(&plain_handler, &report)
        } else {
            String::new()
        };

        let message = match &diagnostic.origin {
            Some(origin) => format!("{origin}: {}", diagnostic.message),
            None => diagnostic.message.clone(),
        };
        let stack = diagnostic.stack.clone().unwrap_or_default();
        let documentation = diagnostic.documentation_url.clone().unwrap_or_default();

        rendered.ansi.push(RenderedDiagnostic {
            message: message.clone(),
            stack: stack.clone(),
            codeframe: ansi_frame,
            hints: diagnostic.hints.clone(),
            documentation: documentation.clone(),
        });
        rendered.html.push(RenderedDiagnostic {
            message: escape_html(&message),
            stack: escape_html(&stack),
            codeframe: escape_html(&plain_frame),
            hints: diagnostic.hints.iter().map(|h| escape_html(h)).collect(),
            documentation: escape_html(&documentation),
        });
    }
    rendered
}

fn render(handler: &GraphicalReportHandler, report: &Report<'_>) -> String {
    let mut out = String::new();
    if handler.render_report(&mut out, report).is_err() {
        out.clear();
    }
    out
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Byte offset of a 1-based line and column.
fn line_col_to_offset(source: &str, line: u32, column: u32) -> Option<usize> {
    let line_idx = (line as usize).checked_sub(1)?;
    let mut offset = 0;
    for (idx, text) in source.split('\n').enumerate() {
        if idx == line_idx {
            let col = text
                .char_indices()
                .nth(column.saturating_sub(1) as usize)
                .map(|(pos, _)| pos)
                .unwrap_or(text.len());
            return Some(offset + col);
        }
        offset += text.len() + 1;
    }
    None
}

/// Length of the identifier starting at `offset`, at least one byte.
fn token_len(source: &str, offset: usize) -> usize {
    source
        .get(offset..)
        .and_then(|rest| rest.char_indices().find(|(_, c)| !c.is_alphanumeric() && *c != '_'))
        .map(|(pos, _)| pos)
        .unwrap_or(1)
        .max(1)
}
