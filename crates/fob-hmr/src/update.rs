//! Computation of the HMR message for a successful build.

use crate::error::Result;
use crate::graph::{Asset, BundleGraph};
use crate::payload::{hot_asset_contents, hot_asset_url};
use crate::protocol::{HmrAsset, HmrMessage};
use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Maximum number of assets processed concurrently.
pub const MAX_CONCURRENT_JOBS: usize = 64;

/// Updates with at least this many assets are sent as a reload instead.
pub const RELOAD_THRESHOLD: usize = 10_000;

/// Turns a build's changed assets into an [`HmrMessage`].
#[derive(Debug, Clone)]
pub struct UpdateComputer {
    origin: String,
    project_root: PathBuf,
}

impl UpdateComputer {
    pub fn new(origin: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            origin: origin.into(),
            project_root: project_root.into(),
        }
    }

    /// Compute the update for `changed`.
    ///
    /// Returns `None` when nothing needs to be sent.
    pub async fn get_update(
        &self,
        graph: &dyn BundleGraph,
        changed: &[Asset],
    ) -> Result<Option<HmrMessage>> {
        let mut seen = FxHashSet::default();
        let mut worklist: VecDeque<Asset> = changed
            .iter()
            .filter(|asset| seen.insert(asset.id.clone()))
            .cloned()
            .collect();
        let mut queue = Vec::with_capacity(worklist.len());

        // Assets that are only reachable through a JS or CSS loader are
        // replaced by that loader; re-running it refetches the content.
        while let Some(asset) = worklist.pop_front() {
            if !asset.is_live_patchable() {
                if let Some(runtimes) = loader_runtimes(graph, &asset) {
                    tracing::debug!(asset = %asset.id, runtimes = runtimes.len(), "Promoting asset to its loaders");
                    worklist.extend(runtimes.into_iter().filter(|r| seen.insert(r.id.clone())));
                    continue;
                }
            }
            queue.push(asset);
        }

        let assets: Vec<HmrAsset> = stream::iter(queue.iter())
            .map(|asset| self.hmr_asset(graph, asset))
            .buffered(MAX_CONCURRENT_JOBS)
            .try_collect()
            .await?;

        if assets.len() >= RELOAD_THRESHOLD {
            tracing::debug!(assets = assets.len(), "Update too large, sending reload");
            return Ok(Some(HmrMessage::Reload));
        }
        if assets.is_empty() {
            return Ok(None);
        }
        Ok(Some(HmrMessage::Update { assets }))
    }

    async fn hmr_asset(&self, graph: &dyn BundleGraph, asset: &Asset) -> Result<HmrAsset> {
        let mut deps_by_bundle = IndexMap::new();
        for bundle in graph.get_bundles_with_asset(asset) {
            let mut deps = IndexMap::new();
            for dep in graph.get_dependencies(asset) {
                if let Some(resolved) = graph.get_resolved_asset(&dep, Some(&bundle)) {
                    deps.insert(
                        dep.effective_specifier().to_string(),
                        graph.get_asset_public_id(&resolved),
                    );
                }
            }
            deps_by_bundle.insert(bundle.id, deps);
        }

        let output = if asset.is_js() {
            hot_asset_contents(graph, asset, &self.origin, &self.project_root).await?
        } else {
            String::new()
        };

        Ok(HmrAsset {
            id: graph.get_asset_public_id(asset),
            url: hot_asset_url(&self.origin, &asset.id),
            asset_type: asset.asset_type.clone(),
            output,
            env_hash: asset.env.id.clone(),
            output_format: asset.env.output_format,
            deps_by_bundle,
        })
    }
}

/// Live-patchable assets standing in for `asset`, when every incoming
/// dependency resolves to one of them. An asset nothing depends on is never promoted.
fn loader_runtimes(graph: &dyn BundleGraph, asset: &Asset) -> Option<Vec<Asset>> {
    let incoming = graph.get_incoming_dependencies(asset);
    if incoming.is_empty() {
        return None;
    }

    let mut runtimes: Vec<Asset> = Vec::new();
    for dep in &incoming {
        let resolved = graph.get_resolved_asset(dep, None)?;
        if !resolved.is_live_patchable() || resolved.id == asset.id {
            return None;
        }
        if !runtimes.iter().any(|r| r.id == resolved.id) {
            runtimes.push(resolved);
        }
    }
    Some(runtimes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryBundleGraph;
    use crate::graph::{Bundle, Dependency, Environment};

    fn computer() -> UpdateComputer {
        UpdateComputer::new("http://localhost:1234", "/project")
    }

    fn js(id: &str) -> Asset {
        Asset::new(id, "js", format!("/project/src/{id}.js"), Environment::browser("env1"))
    }

    #[tokio::test]
    async fn test_empty_changes_produce_no_message() {
        let graph = MemoryBundleGraph::new();
        let update = computer().get_update(&graph, &[]).await.unwrap();
        assert!(update.is_none());
    }

    #[tokio::test]
    async fn test_asset_in_three_bundles_is_reported_once() {
        let a = js("a");
        let env = Environment::browser("env1");
        let mut graph = MemoryBundleGraph::new();
        graph.add_asset(a.clone(), "console.log('a');");
        for name in ["one", "two", "three"] {
            graph.add_bundle(
                Bundle::new(name, "js", format!("/project/dist/{name}.js"), env.clone()),
                &["a"],
                true,
            );
        }

        let changed = vec![a.clone(), a.clone(), a];
        let Some(HmrMessage::Update { assets }) = computer().get_update(&graph, &changed).await.unwrap()
        else {
            panic!("expected an update");
        };
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].deps_by_bundle.len(), 3);
        assert!(assets[0].output.starts_with("parcelHotUpdate['a']"));
    }

    #[tokio::test]
    async fn test_huge_update_becomes_reload() {
        let mut graph = MemoryBundleGraph::new();
        let changed: Vec<Asset> = (0..RELOAD_THRESHOLD).map(|i| js(&format!("m{i}"))).collect();
        for asset in &changed {
            graph.add_asset(asset.clone(), "0;");
        }

        let update = computer().get_update(&graph, &changed).await.unwrap();
        assert_eq!(update, Some(HmrMessage::Reload));
    }

    #[tokio::test]
    async fn test_deps_use_effective_specifier_and_public_id() {
        let a = js("a");
        let b = js("b");
        let mut graph = MemoryBundleGraph::new();
        graph
            .add_asset(a.clone(), "require('x');")
            .add_asset(b, "")
            .set_public_id("b", "pb")
            .add_bundle(
                Bundle::new("main", "js", "/project/dist/main.js", Environment::browser("env1")),
                &["a", "b"],
                true,
            )
            .add_dependency("a", Dependency::new("d1", "./b").with_placeholder("x"), "b");

        let Some(HmrMessage::Update { assets }) = computer().get_update(&graph, &[a]).await.unwrap()
        else {
            panic!("expected an update");
        };
        assert_eq!(assets[0].deps_by_bundle["main"]["x"], "pb");
        assert_eq!(assets[0].url, "http://localhost:1234/__parcel_hmr/a");
    }

    #[tokio::test]
    async fn test_loader_wrapped_asset_is_replaced_by_its_loader() {
        let env = Environment::browser("env1");
        let a = js("a");
        let b = Asset::new("b", "css", "/project/src/b.css", env.clone());
        let c = Asset::new("c", "svg", "/project/src/c.svg", env.clone());
        let d = js("d");
        let mut graph = MemoryBundleGraph::new();
        graph
            .add_asset(a.clone(), "import './c.svg';")
            .add_asset(b.clone(), "body {}")
            .add_asset(c.clone(), "<svg/>")
            .add_asset(d, "module.exports = '/c.123.svg';")
            .add_bundle(
                Bundle::new("main", "js", "/project/dist/main.js", env),
                &["a", "d"],
                true,
            )
            .add_runtime_dependency("a", Dependency::new("d1", "./c.svg"), "c", "d");

        let Some(HmrMessage::Update { assets }) = computer()
            .get_update(&graph, &[a, b, c])
            .await
            .unwrap()
        else {
            panic!("expected an update");
        };

        let ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
        assert!(assets[1].output.is_empty());
        assert!(!assets[2].output.is_empty());
    }

    #[tokio::test]
    async fn test_asset_behind_css_loader_is_replaced_by_it() {
        let env = Environment::browser("env1");
        let font = Asset::new("f", "woff2", "/project/src/f.woff2", env.clone());
        let styles = Asset::new("s", "css", "/project/src/s.css", env.clone());
        let mut graph = MemoryBundleGraph::new();
        graph
            .add_asset(font.clone(), "")
            .add_asset(styles, "@font-face { src: url(f.woff2); }")
            .add_asset(js("a"), "import './s.css';")
            .add_bundle(
                Bundle::new("main", "js", "/project/dist/main.js", env),
                &["a", "s"],
                true,
            )
            .add_runtime_dependency("a", Dependency::new("d1", "./f.woff2"), "f", "s");

        let Some(HmrMessage::Update { assets }) =
            computer().get_update(&graph, &[font]).await.unwrap()
        else {
            panic!("expected an update");
        };
        let ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["s"]);
    }

    #[tokio::test]
    async fn test_unreferenced_asset_is_kept() {
        let c = Asset::new("c", "svg", "/project/src/c.svg", Environment::browser("env1"));
        let mut graph = MemoryBundleGraph::new();
        graph.add_asset(c.clone(), "<svg/>");

        let Some(HmrMessage::Update { assets }) = computer().get_update(&graph, &[c]).await.unwrap()
        else {
            panic!("expected an update");
        };
        assert_eq!(assets[0].id, "c");
        assert!(assets[0].output.is_empty());
    }
}
