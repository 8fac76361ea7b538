//! Pages and transitions discovered while crawling.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::RunError;
use crate::observation::Observation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snapshot: Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Link,
    Button,
    Nav,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub dst: String,
    pub kind: EdgeKind,
    #[serde(default)]
    pub label: Option<String>,
}

/// Node ids map to nodes in discovery order; the start page comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteGraph {
    pub base_url: String,
    pub created_at: i64,
    #[serde(
        serialize_with = "nodes_as_list",
        deserialize_with = "nodes_from_list",
        default
    )]
    pub nodes: IndexMap<String, Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

fn nodes_as_list<S: Serializer>(
    nodes: &IndexMap<String, Node>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(nodes.values())
}

fn nodes_from_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<String, Node>, D::Error> {
    let list = Vec::<Node>::deserialize(deserializer)?;
    let mut nodes = IndexMap::with_capacity(list.len());
    for node in list {
        nodes.entry(node.id.clone()).or_insert(node);
    }
    Ok(nodes)
}

impl SiteGraph {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            created_at: chrono::Utc::now().timestamp(),
            nodes: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    /// Keeps the first node registered under an id.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.entry(node.id.clone()).or_insert(node);
    }

    /// Returns false when an identical edge is already present.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if self.edges.contains(&edge) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn save(&self, path: &Path) -> Result<(), RunError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RunError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

pub fn strip_hash(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// `scheme://host[:port]` of an absolute URL.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

pub fn same_origin(a: &str, b: &str) -> bool {
    match (origin_of(a), origin_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Resolve `href` against `base`, dropping the fragment. Script pseudo-links
/// and unparsable targets yield `None`.
pub fn normalize_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }
    let mut joined = Url::parse(base).ok()?.join(href).ok()?;
    joined.set_fragment(None);
    Some(joined.to_string())
}

/// Path plus query, `/` for the home page.
pub fn node_id_from_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = if parsed.path().is_empty() { "/" } else { parsed.path() };
            match parsed.query() {
                Some(q) if !q.is_empty() => format!("{path}?{q}"),
                _ => path.to_string(),
            }
        }
        Err(_) => {
            let bare = strip_hash(url).trim();
            if bare.is_empty() { "/".to_string() } else { bare.to_string() }
        }
    }
}
