//! Hot payload construction.
//!
//! A hot payload is the compiled code of one JS asset wrapped so that the
//! client runtime can re-register the module without reloading the page:
//!
//! ```text
//! parcelHotUpdate['<publicId>'] = function (require, module, exports) {<code>
//! }
//! //# sourceMappingURL=data:application/json;charset=utf-8;base64,...
//! //# sourceURL=<hot asset url>
//! ```
//!
//! The opening brace shares its line with the first line of code, so the
//! inline source map stays valid without shifting its mappings.

use crate::error::Result;
use crate::graph::{Asset, BundleGraph};
use crate::sourcemap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;

/// URL prefix the hot asset endpoint is served under.
pub const HMR_ENDPOINT: &str = "/__parcel_hmr";

/// URL prefix raw project sources are served under.
pub const SOURCES_ENDPOINT: &str = "/__parcel_source_root";

/// Characters `encodeURI` leaves untouched.
const URI: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// URL a client fetches an asset's hot payload from.
pub fn hot_asset_url(origin: &str, asset_id: &str) -> String {
    format!("{}{}/{}", origin.trim_end_matches('/'), HMR_ENDPOINT, asset_id)
}

/// `sourceRoot` for hot payload maps: Node reads sources straight from disk,
/// browsers fetch them from the sources endpoint.
pub fn source_root_for(asset: &Asset, project_root: &Path) -> String {
    if asset.env.context.is_node() {
        let mut root = project_root.to_string_lossy().into_owned();
        if !root.ends_with('/') {
            root.push('/');
        }
        root
    } else {
        format!("{SOURCES_ENDPOINT}/")
    }
}

/// Build the hot payload for a JS asset.
pub async fn hot_asset_contents(
    graph: &dyn BundleGraph,
    asset: &Asset,
    origin: &str,
    project_root: &Path,
) -> Result<String> {
    let code = graph.get_code(asset).await?;
    let public_id = graph.get_asset_public_id(asset);
    let mut contents = format!(
        "parcelHotUpdate['{public_id}'] = function (require, module, exports) {{{code}\n}}"
    );

    if let Some(map) = graph.get_map(asset).await? {
        let map = sourcemap::with_source_root(&map, &source_root_for(asset, project_root))?;
        let url = hot_asset_url(origin, &asset.id);
        contents.push_str("\n//# sourceMappingURL=");
        contents.push_str(&sourcemap::inline_data_url(&map));
        contents.push_str("\n//# sourceURL=");
        contents.push_str(&utf8_percent_encode(&url, URI).to_string());
        contents.push('\n');
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Environment;
    use crate::graph::memory::MemoryBundleGraph;

    #[test]
    fn test_hot_asset_url() {
        assert_eq!(
            hot_asset_url("http://localhost:1234/", "abc"),
            "http://localhost:1234/__parcel_hmr/abc"
        );
    }

    #[test]
    fn test_source_root_depends_on_context() {
        let root = Path::new("/project");
        let browser = Asset::new("a", "js", "/project/a.js", Environment::browser("e"));
        let node = Asset::new("b", "js", "/project/b.js", Environment::node("e"));
        assert_eq!(source_root_for(&browser, root), "/__parcel_source_root/");
        assert_eq!(source_root_for(&node, root), "/project/");
    }

    #[tokio::test]
    async fn test_payload_without_map() {
        let asset = Asset::new("a1", "js", "/project/a.js", Environment::browser("e"));
        let mut graph = MemoryBundleGraph::new();
        graph.add_asset(asset.clone(), "module.exports = 1;");
        graph.set_public_id("a1", "xYz");

        let out = hot_asset_contents(&graph, &asset, "http://localhost:1234", Path::new("/project"))
            .await
            .unwrap();
        assert_eq!(
            out,
            "parcelHotUpdate['xYz'] = function (require, module, exports) {module.exports = 1;\n}"
        );
    }

    #[tokio::test]
    async fn test_payload_with_map_has_trailers() {
        let asset = Asset::new("a b", "js", "/project/a.js", Environment::browser("e"));
        let mut graph = MemoryBundleGraph::new();
        graph.add_asset(asset.clone(), "x();");
        graph.set_map("a b", r#"{"version":3,"sources":["a.js"],"names":[],"mappings":"AAAA"}"#);

        let out = hot_asset_contents(&graph, &asset, "http://localhost:1234", Path::new("/project"))
            .await
            .unwrap();
        assert!(out.contains("\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,"));
        assert!(out.ends_with("\n//# sourceURL=http://localhost:1234/__parcel_hmr/a%20b\n"));
    }
}
