//! Source map parsing, lookup and serialization helpers.

use crate::error::{HmrError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oxc_sourcemap::SourceMap;
use serde_json::Value;

/// Original position a generated position maps back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: String,
    /// 1-based
    pub line: u32,
    /// 1-based
    pub column: u32,
    pub source_content: Option<String>,
}

/// A parsed map ready for position lookups.
pub struct ParsedSourceMap {
    map: SourceMap,
}

impl ParsedSourceMap {
    pub fn parse(json: &str) -> Result<Self> {
        let map = SourceMap::from_json_string(json)
            .map_err(|e| HmrError::InvalidSourceMap(format!("{e:?}")))?;
        Ok(Self { map })
    }

    /// Closest mapping at or before a 0-based generated position.
    pub fn find_closest_mapping(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let table = self.map.generate_lookup_table();
        let token = self.map.lookup_token(&table, line, column)?;
        let source_id = token.get_source_id()?;
        let source = self.map.get_source(source_id)?.to_string();
        let source_content = self
            .map
            .get_source_content(source_id)
            .map(|content| content.to_string());

        Some(OriginalPosition {
            source,
            line: token.get_src_line() + 1,
            column: token.get_src_col() + 1,
            source_content,
        })
    }
}

/// Rewrite the `sourceRoot` of a JSON source map.
pub fn with_source_root(json: &str, source_root: &str) -> Result<String> {
    let mut value: Value = serde_json::from_str(json)?;
    let Some(object) = value.as_object_mut() else {
        return Err(HmrError::InvalidSourceMap("expected a JSON object".to_string()));
    };
    object.insert("sourceRoot".to_string(), Value::String(source_root.to_string()));
    Ok(serde_json::to_string(&value)?)
}

/// Encode a JSON source map as an inline `data:` URL.
pub fn inline_data_url(json: &str) -> String {
    format!(
        "data:application/json;charset=utf-8;base64,{}",
        STANDARD.encode(json.as_bytes())
    )
}

/// Identity map for a file that is already original source.
pub fn empty_map(source_name: &str, contents: &str) -> String {
    let lines = contents.lines().count().max(1);
    let mut mappings = String::from("AAAA");
    for _ in 1..lines {
        mappings.push_str(";AACA");
    }

    serde_json::json!({
        "version": 3,
        "sources": [source_name],
        "sourcesContent": [contents],
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // a.js: two lines, each mapped to the same line in src/a.ts
    const MAP: &str = r#"{"version":3,"sources":["src/a.ts"],"sourcesContent":["let a = 1;\nlet b = 2;\n"],"names":[],"mappings":"AAAA;AACA"}"#;

    #[test]
    fn test_find_closest_mapping_is_one_based() {
        let map = ParsedSourceMap::parse(MAP).unwrap();
        let pos = map.find_closest_mapping(1, 4).unwrap();
        assert_eq!(pos.source, "src/a.ts");
        assert_eq!(pos.line, 2);
        assert_eq!(pos.column, 1);
        assert!(pos.source_content.unwrap().contains("let b"));
    }

    #[test]
    fn test_invalid_map_is_rejected() {
        assert!(matches!(
            ParsedSourceMap::parse("{not json"),
            Err(HmrError::InvalidSourceMap(_))
        ));
    }

    #[test]
    fn test_with_source_root() {
        let out = with_source_root(MAP, "/__parcel_source_root/").unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["sourceRoot"], "/__parcel_source_root/");
        assert_eq!(value["mappings"], "AAAA;AACA");
    }

    #[test]
    fn test_empty_map_maps_every_line() {
        let json = empty_map("src/a.ts", "one\ntwo\nthree\n");
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mappings"], "AAAA;AACA;AACA");
        assert_eq!(value["sources"][0], "src/a.ts");

        let map = ParsedSourceMap::parse(&json).unwrap();
        assert_eq!(map.find_closest_mapping(2, 0).unwrap().line, 3);
    }

    #[test]
    fn test_inline_data_url() {
        let url = inline_data_url("{}");
        assert_eq!(url, "data:application/json;charset=utf-8;base64,e30=");
    }
}
