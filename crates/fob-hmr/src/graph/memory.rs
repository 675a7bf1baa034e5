//! In-memory [`BundleGraph`] for tests.

use super::{Asset, Bundle, BundleGraph, Dependency};
use crate::error::{HmrError, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

struct Edge {
    from: String,
    dependency: Dependency,
    to: String,
    /// Asset the dependency resolves to when it differs from `to`
    resolved: Option<String>,
}

/// Bundle graph assembled by hand.
///
/// Assets registered without an explicit public id use their full id.
#[derive(Default)]
pub struct MemoryBundleGraph {
    assets: IndexMap<String, Asset>,
    public_ids: FxHashMap<String, String>,
    bundles: Vec<(Bundle, Vec<String>)>,
    entries: Vec<String>,
    edges: Vec<Edge>,
    code: FxHashMap<String, String>,
    maps: FxHashMap<String, String>,
}

impl MemoryBundleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_asset(&mut self, asset: Asset, code: impl Into<String>) -> &mut Self {
        self.code.insert(asset.id.clone(), code.into());
        self.assets.insert(asset.id.clone(), asset);
        self
    }

    pub fn set_public_id(&mut self, asset_id: &str, public_id: impl Into<String>) -> &mut Self {
        self.public_ids.insert(asset_id.to_string(), public_id.into());
        self
    }

    pub fn set_map(&mut self, asset_id: &str, map: impl Into<String>) -> &mut Self {
        self.maps.insert(asset_id.to_string(), map.into());
        self
    }

    /// Register a bundle containing the given asset ids.
    pub fn add_bundle(&mut self, bundle: Bundle, asset_ids: &[&str], entry: bool) -> &mut Self {
        if entry {
            self.entries.push(bundle.id.clone());
        }
        let ids = asset_ids.iter().map(|id| id.to_string()).collect();
        self.bundles.push((bundle, ids));
        self
    }

    pub fn add_dependency(&mut self, from: &str, dependency: Dependency, to: &str) -> &mut Self {
        self.edges.push(Edge {
            from: from.to_string(),
            dependency,
            to: to.to_string(),
            resolved: None,
        });
        self
    }

    /// Register a dependency on `to` that resolves to the loader asset
    /// `runtime` instead, like a URL import wrapped by a JS runtime.
    pub fn add_runtime_dependency(
        &mut self,
        from: &str,
        dependency: Dependency,
        to: &str,
        runtime: &str,
    ) -> &mut Self {
        self.edges.push(Edge {
            from: from.to_string(),
            dependency,
            to: to.to_string(),
            resolved: Some(runtime.to_string()),
        });
        self
    }
}

#[async_trait]
impl BundleGraph for MemoryBundleGraph {
    fn get_asset_by_id(&self, id: &str) -> Option<Asset> {
        self.assets.get(id).cloned()
    }

    fn get_asset_public_id(&self, asset: &Asset) -> String {
        self.public_ids
            .get(&asset.id)
            .cloned()
            .unwrap_or_else(|| asset.id.clone())
    }

    fn get_bundles(&self) -> Vec<Bundle> {
        self.bundles.iter().map(|(b, _)| b.clone()).collect()
    }

    fn get_entry_bundles(&self) -> Vec<Bundle> {
        self.bundles
            .iter()
            .filter(|(b, _)| self.entries.contains(&b.id))
            .map(|(b, _)| b.clone())
            .collect()
    }

    fn get_bundles_with_asset(&self, asset: &Asset) -> Vec<Bundle> {
        self.bundles
            .iter()
            .filter(|(_, ids)| ids.contains(&asset.id))
            .map(|(b, _)| b.clone())
            .collect()
    }

    fn get_dependencies(&self, asset: &Asset) -> Vec<Dependency> {
        self.edges
            .iter()
            .filter(|e| e.from == asset.id)
            .map(|e| e.dependency.clone())
            .collect()
    }

    fn get_incoming_dependencies(&self, asset: &Asset) -> Vec<Dependency> {
        self.edges
            .iter()
            .filter(|e| e.to == asset.id)
            .map(|e| e.dependency.clone())
            .collect()
    }

    fn get_resolved_asset(&self, dependency: &Dependency, _bundle: Option<&Bundle>) -> Option<Asset> {
        self.edges
            .iter()
            .find(|e| e.dependency.id == dependency.id)
            .and_then(|e| self.assets.get(e.resolved.as_ref().unwrap_or(&e.to)))
            .cloned()
    }

    async fn get_code(&self, asset: &Asset) -> Result<String> {
        self.code
            .get(&asset.id)
            .cloned()
            .ok_or_else(|| HmrError::AssetNotFound(asset.id.clone()))
    }

    async fn get_map(&self, asset: &Asset) -> Result<Option<String>> {
        Ok(self.maps.get(&asset.id).cloned())
    }
}
