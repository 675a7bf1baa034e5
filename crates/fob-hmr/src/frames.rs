//! Stack frame enrichment for the code frame endpoint.

use crate::codeframe::CodeFrameRenderer;
use crate::error::HmrError;
use crate::locator::{SourceLocation, SourceMapLocator};
use crate::sourcemap::ParsedSourceMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

fn default_context_lines() -> usize {
    3
}

/// Body of a code frame request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFrameRequest {
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    pub frames: Vec<StackFrame>,
}

/// A runtime stack frame. Unknown fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A frame with compiled and original code excerpts attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedFrame {
    #[serde(flatten)]
    pub frame: StackFrame,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiled_lines: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lines: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_column_number: Option<u32>,
}

/// A frame that could not be resolved, and why.
#[derive(Debug)]
pub struct Skipped {
    pub frame: StackFrame,
    pub reason: HmrError,
}

/// Entry of a code frame response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResolvedFrame {
    Enriched(EnrichedFrame),
    /// Returned as received, without code excerpts
    Unmodified(StackFrame),
}

/// Attach code frames to a single stack frame.
pub async fn resolve_frame(
    locator: &SourceMapLocator,
    renderer: &CodeFrameRenderer,
    frame: StackFrame,
) -> Result<EnrichedFrame, Skipped> {
    let (Some(file_name), Some(line)) = (frame.file_name.clone(), frame.line_number) else {
        return Err(Skipped {
            reason: HmrError::SourceMapNotFound("frame without a location".to_string()),
            frame,
        });
    };
    let column = frame.column_number.unwrap_or(1);

    let resolved = match locator.resolve(&file_name).await {
        Ok(resolved) => resolved,
        Err(reason) => return Err(Skipped { frame, reason }),
    };

    let mut enriched = EnrichedFrame {
        frame,
        compiled_lines: None,
        source_lines: None,
        source_file_name: None,
        source_line_number: None,
        source_column_number: None,
    };

    if let SourceLocation::Source(file) = &resolved.location {
        enriched.source_lines = renderer.render(&resolved.code, line, column);
        enriched.source_file_name = Some(locator.relative_name(file));
        enriched.source_line_number = Some(line);
        enriched.source_column_number = Some(column);
        return Ok(enriched);
    }

    enriched.compiled_lines = renderer.render(&resolved.code, line, column);

    let Some(map) = &resolved.map else {
        return Ok(enriched);
    };
    let map = match ParsedSourceMap::parse(map) {
        Ok(map) => map,
        Err(reason) => {
            return Err(Skipped {
                frame: enriched.frame,
                reason,
            });
        }
    };

    if let Some(original) = map.find_closest_mapping(line.saturating_sub(1), column.saturating_sub(1)) {
        let content = match original.source_content {
            Some(content) => Some(content),
            None => {
                let base = match &resolved.location {
                    SourceLocation::Bundle(file) => file.parent().map(Path::to_path_buf),
                    _ => None,
                };
                read_original(locator, base, &original.source).await
            }
        };
        enriched.source_lines =
            content.and_then(|c| renderer.render(&c, original.line, original.column));
        enriched.source_file_name = Some(original.source);
        enriched.source_line_number = Some(original.line);
        enriched.source_column_number = Some(original.column);
    }

    Ok(enriched)
}

async fn read_original(
    locator: &SourceMapLocator,
    base: Option<PathBuf>,
    source: &str,
) -> Option<String> {
    let path = Path::new(source);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.unwrap_or_else(|| locator.options().project_root.clone())
            .join(path)
    };
    tokio::fs::read_to_string(path).await.ok()
}

/// Resolve a batch of frames. Frames that fail are returned unmodified.
pub async fn resolve_frames(
    locator: &SourceMapLocator,
    request: CodeFrameRequest,
) -> Vec<ResolvedFrame> {
    let renderer = CodeFrameRenderer::default().with_context_lines(request.context_lines);
    let results = join_all(
        request
            .frames
            .into_iter()
            .map(|frame| resolve_frame(locator, &renderer, frame)),
    )
    .await;

    results
        .into_iter()
        .map(|result| match result {
            Ok(enriched) => ResolvedFrame::Enriched(enriched),
            Err(skipped) => {
                tracing::debug!(reason = %skipped.reason, "Skipping stack frame");
                ResolvedFrame::Unmodified(skipped.frame)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_context_lines() {
        let request: CodeFrameRequest =
            serde_json::from_str(r#"{"frames":[{"fileName":"a.js","lineNumber":1}]}"#).unwrap();
        assert_eq!(request.context_lines, 3);
        assert_eq!(request.frames[0].file_name.as_deref(), Some("a.js"));
        assert_eq!(request.frames[0].column_number, None);
    }

    #[test]
    fn test_unknown_frame_fields_round_trip() {
        let frame: StackFrame = serde_json::from_str(
            r#"{"fileName":"a.js","lineNumber":2,"columnNumber":3,"functionName":"run"}"#,
        )
        .unwrap();
        let value = serde_json::to_value(ResolvedFrame::Unmodified(frame)).unwrap();
        assert_eq!(value["functionName"], "run");
        assert_eq!(value["lineNumber"], 2);
        assert!(value.get("compiledLines").is_none());
    }

    mod resolution {
        use super::super::*;
        use crate::graph::memory::MemoryBundleGraph;
        use crate::locator::LocatorOptions;
        use std::fs;
        use std::sync::Arc;
        use tempfile::TempDir;

        fn frame(file: &str, line: u32, column: u32) -> StackFrame {
            StackFrame {
                file_name: Some(file.to_string()),
                line_number: Some(line),
                column_number: Some(column),
                extra: Map::new(),
            }
        }

        #[tokio::test]
        async fn test_bundle_frame_maps_to_original_source() {
            let temp = TempDir::new().unwrap();
            let root = temp.path();
            fs::create_dir_all(root.join("dist")).unwrap();
            fs::write(root.join("dist/app.js"), "var a = 1;\nthrow new Error(a);\n").unwrap();
            fs::write(
                root.join("dist/app.js.map"),
                r#"{"version":3,"sources":["../src/a.ts"],"sourcesContent":["let a: number = 1;\nthrow new Error(String(a));\n"],"names":[],"mappings":"AAAA;AACA"}"#,
            )
            .unwrap();

            let locator = SourceMapLocator::new(
                LocatorOptions {
                    project_root: root.to_path_buf(),
                    dist_dir: root.join("dist"),
                    public_url: "/".to_string(),
                    origin: "http://localhost:1234".to_string(),
                },
                Arc::new(MemoryBundleGraph::new()),
            );

            let request = CodeFrameRequest {
                context_lines: 1,
                frames: vec![
                    frame("http://localhost:1234/app.js", 2, 1),
                    frame("/nowhere/else.js", 1, 1),
                ],
            };
            let frames = resolve_frames(&locator, request).await;
            assert_eq!(frames.len(), 2);

            let ResolvedFrame::Enriched(enriched) = &frames[0] else {
                panic!("first frame should resolve");
            };
            assert!(enriched.compiled_lines.as_deref().unwrap().contains("> 2 | throw new Error(a);"));
            assert!(enriched.source_lines.as_deref().unwrap().contains("throw new Error(String(a));"));
            assert_eq!(enriched.source_file_name.as_deref(), Some("../src/a.ts"));
            assert_eq!(enriched.source_line_number, Some(2));
            assert_eq!(enriched.source_column_number, Some(1));

            assert_eq!(frames[1], ResolvedFrame::Unmodified(frame("/nowhere/else.js", 1, 1)));
        }
    }
}
