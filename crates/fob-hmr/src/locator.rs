//! Resolution of runtime-reported file references.
//!
//! Stack traces and overlay requests refer to code in many shapes: dev server
//! URLs, `file://` URLs, absolute paths, hot asset URLs and server component
//! references. [`SourceMapLocator::locate`] collapses all of them into one of
//! three [`SourceLocation`]s. The classification is order-sensitive; each
//! step below only sees what the previous steps left behind:
//!
//! 1. `rsc://` references embedding a `file://` URL are unwrapped.
//! 2. The dev server origin plus public URL is stripped.
//! 3. `file://` URLs become paths, HTTP URLs are reduced to their path and a
//!    remaining public URL prefix is stripped.
//! 4. Hot asset paths name an asset by id.
//! 5. Relative paths are resolved against the dist directory.
//! 6. Paths inside the dist directory are bundles.
//! 7. Paths inside the project root are original sources.
//!
//! Anything else is [`HmrError::SourceMapNotFound`].

use crate::error::{HmrError, Result};
use crate::graph::{Asset, SharedBundleGraph};
use crate::payload::HMR_ENDPOINT;
use crate::sourcemap;
use dashmap::DashMap;
use path_clean::PathClean;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use url::Url;

static RSC_LINE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?\d+$").expect("valid regex"));

/// What a reported path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// An emitted bundle inside the dist directory
    Bundle(PathBuf),
    /// A compiled asset served through the hot asset endpoint
    Asset(Asset),
    /// An original source file inside the project root
    Source(PathBuf),
}

/// Code and map behind a [`SourceLocation`].
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub location: SourceLocation,
    pub code: String,
    pub map: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocatorOptions {
    pub project_root: PathBuf,
    pub dist_dir: PathBuf,
    /// Public URL bundles are served under, `/` by default
    pub public_url: String,
    /// Dev server origin, e.g. `http://localhost:1234`
    pub origin: String,
}

/// Resolves reported paths against one build.
///
/// A locator is created per successful build; results are memoized for its
/// lifetime only.
pub struct SourceMapLocator {
    options: LocatorOptions,
    graph: SharedBundleGraph,
    cache: DashMap<String, Arc<ResolvedSource>>,
}

impl SourceMapLocator {
    pub fn new(options: LocatorOptions, graph: SharedBundleGraph) -> Self {
        Self {
            options,
            graph,
            cache: DashMap::new(),
        }
    }

    pub fn options(&self) -> &LocatorOptions {
        &self.options
    }

    pub fn graph(&self) -> &SharedBundleGraph {
        &self.graph
    }

    /// Classify a reported path.
    pub fn locate(&self, reported: &str) -> Result<SourceLocation> {
        let public_url = self.options.public_url.as_str();
        let mut path = unwrap_rsc(reported).to_string();

        // Step 2: origin + public URL. An absolute public URL may also appear
        // without its scheme.
        let mut prefixes = Vec::new();
        if is_http_url(public_url) {
            prefixes.push(public_url.to_string());
            if let Some((_, rest)) = public_url.split_once(':') {
                prefixes.push(rest.to_string());
            }
        } else {
            prefixes.push(format!(
                "{}{}",
                self.options.origin.trim_end_matches('/'),
                public_url
            ));
        }
        if let Some(rest) = prefixes.iter().find_map(|p| path.strip_prefix(p.as_str())) {
            path = rest.to_string();
        }

        // Step 3
        if path.starts_with("file://") {
            let url = Url::parse(&path)
                .map_err(|_| HmrError::SourceMapNotFound(reported.to_string()))?;
            let file = url
                .to_file_path()
                .map_err(|_| HmrError::SourceMapNotFound(reported.to_string()))?;
            path = file.to_string_lossy().into_owned();
        } else if is_http_url(&path) {
            let url = Url::parse(&path)
                .map_err(|_| HmrError::SourceMapNotFound(reported.to_string()))?;
            let decoded = urlencoding::decode(url.path())
                .map(|p| p.into_owned())
                .unwrap_or_else(|_| url.path().to_string());
            path = strip_public_url(&decoded, url_path(public_url)).to_string();
        } else if public_url != "/" {
            path = strip_public_url(&path, url_path(public_url)).to_string();
        }

        // Step 4
        let hot_prefix = format!("{}/", HMR_ENDPOINT.trim_start_matches('/'));
        if let Some(id) = path.trim_start_matches('/').strip_prefix(hot_prefix.as_str()) {
            return self
                .graph
                .get_asset_by_id(id)
                .map(SourceLocation::Asset)
                .ok_or_else(|| HmrError::AssetNotFound(id.to_string()));
        }

        // Steps 5 through 7
        let mut file = PathBuf::from(&path);
        if file.is_relative() {
            file = self.options.dist_dir.join(file);
        }
        let file = file.clean();

        if file.starts_with(&self.options.dist_dir) {
            Ok(SourceLocation::Bundle(file))
        } else if file.starts_with(&self.options.project_root) {
            Ok(SourceLocation::Source(file))
        } else {
            Err(HmrError::SourceMapNotFound(reported.to_string()))
        }
    }

    /// Locate a reported path and load its code and map.
    pub async fn resolve(&self, reported: &str) -> Result<Arc<ResolvedSource>> {
        if let Some(hit) = self.cache.get(reported) {
            return Ok(Arc::clone(hit.value()));
        }

        let location = self.locate(reported)?;
        let resolved = Arc::new(self.load(location).await?);
        self.cache.insert(reported.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    async fn load(&self, location: SourceLocation) -> Result<ResolvedSource> {
        let (code, map) = match &location {
            SourceLocation::Bundle(file) => {
                let code = tokio::fs::read_to_string(file).await?;
                let mut map_path = file.clone().into_os_string();
                map_path.push(".map");
                let map = match tokio::fs::read_to_string(&map_path).await {
                    Ok(map) => Some(map),
                    Err(e) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                };
                (code, map)
            }
            SourceLocation::Asset(asset) => {
                let code = self.graph.get_code(asset).await?;
                let map = self.graph.get_map(asset).await?;
                (code, map)
            }
            SourceLocation::Source(file) => (tokio::fs::read_to_string(file).await?, None),
        };
        Ok(ResolvedSource {
            location,
            code,
            map,
        })
    }

    /// Full source map for a reported path.
    ///
    /// Original sources get a synthesized identity map so clients can treat
    /// every location uniformly.
    pub async fn raw_source_map(&self, reported: &str) -> Result<String> {
        let resolved = self.resolve(reported).await?;
        match (&resolved.location, &resolved.map) {
            (SourceLocation::Source(file), _) => Ok(sourcemap::empty_map(
                &self.relative_name(file),
                &resolved.code,
            )),
            (_, Some(map)) => Ok(map.clone()),
            (_, None) => Err(HmrError::SourceMapNotFound(reported.to_string())),
        }
    }

    /// Path relative to the project root, `/`-separated.
    pub fn relative_name(&self, file: &Path) -> String {
        let relative = file.strip_prefix(&self.options.project_root).unwrap_or(file);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// `rsc://React/Server/file:///app/page.js?3` -> `file:///app/page.js`
fn unwrap_rsc(path: &str) -> &str {
    if !path.starts_with("rsc://") {
        return path;
    }
    match path.find("file://") {
        Some(idx) => {
            let inner = &path[idx..];
            match RSC_LINE_SUFFIX.find(inner) {
                Some(m) => &inner[..m.start()],
                None => inner,
            }
        }
        None => path,
    }
}

/// Path component of a public URL, which may itself be absolute.
fn url_path(public_url: &str) -> &str {
    if let Some((_, rest)) = public_url.split_once("://") {
        rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
    } else {
        public_url
    }
}

fn strip_public_url<'a>(path: &'a str, public_path: &str) -> &'a str {
    let prefix = public_path.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => path,
    }
}
