//! Bounded breadth-first exploration of one origin.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::driver::Page;
use crate::error::RunError;
use crate::graph::{
    Edge, EdgeKind, Node, SiteGraph, node_id_from_url, normalize_href, origin_of, same_origin,
    strip_hash,
};
use crate::observation::{observe, summarize};

pub const GRAPH_FILE: &str = "site_graph.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    /// Nodes created, in total.
    pub max_pages: usize,
    /// Links followed away from the start page.
    pub max_depth: usize,
    pub links_per_page: usize,
    pub nav_timeout: Duration,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_depth: 2,
            links_per_page: 80,
            nav_timeout: Duration::from_secs(20),
        }
    }
}

/// Crawl from `start_url`, never leaving its origin.
///
/// Pages that fail to load are skipped without creating a node.
pub fn crawl<P: Page + ?Sized>(page: &P, start_url: &str, limits: &CrawlLimits) -> SiteGraph {
    let base = origin_of(start_url).unwrap_or_else(|| start_url.to_string());
    let mut graph = SiteGraph::new(&base);

    let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start_url.to_string(), 0)]);
    let mut queued: HashSet<String> = HashSet::from([strip_hash(start_url).to_string()]);
    let mut visited: HashSet<String> = HashSet::new();

    while let Some((url, depth)) = queue.pop_front() {
        if graph.nodes.len() >= limits.max_pages {
            break;
        }
        let url = strip_hash(&url).to_string();
        if !visited.insert(url.clone()) {
            continue;
        }
        if !same_origin(&base, &url) {
            debug!(%url, "skipping foreign origin");
            continue;
        }

        if let Err(err) = page.goto(&url, limits.nav_timeout) {
            warn!(%url, error = %err, "navigation failed, skipping page");
            continue;
        }

        let obs = observe(page);
        let node_id = node_id_from_url(&url);
        let links = obs.links.clone();
        let summary = summarize(&obs);
        graph.add_node(Node {
            id: node_id.clone(),
            url: url.clone(),
            title: obs.title.clone(),
            snapshot: obs,
        });
        info!(node = %node_id, depth, pages = graph.nodes.len(), %summary, "page explored");

        if depth >= limits.max_depth {
            continue;
        }

        let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
        for link in links.iter().take(limits.links_per_page) {
            let Some(href) = link.href.as_deref().and_then(|h| normalize_href(&url, h)) else {
                continue;
            };
            if !same_origin(&base, &href) {
                debug!(%href, "discovered foreign link");
                continue;
            }
            let label = link.text.clone().filter(|t| !t.is_empty());
            if !seen.insert((href.clone(), label.clone())) {
                continue;
            }
            graph.add_edge(Edge {
                src: node_id.clone(),
                dst: node_id_from_url(&href),
                kind: EdgeKind::Link,
                label,
            });
            if !visited.contains(&href)
                && !queued.contains(&href)
                && graph.nodes.len() + queue.len() < limits.max_pages
            {
                queued.insert(href.clone());
                queue.push_back((href, depth + 1));
            }
        }
    }

    info!(
        base = %graph.base_url,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "crawl finished"
    );
    graph
}

/// Crawl and write `site_graph.json` under `reports_dir`.
pub fn explore_and_save<P: Page + ?Sized>(
    page: &P,
    start_url: &str,
    reports_dir: &Path,
    limits: &CrawlLimits,
) -> Result<PathBuf, RunError> {
    let graph = crawl(page, start_url, limits);
    let out = reports_dir.join(GRAPH_FILE);
    graph.save(&out)?;
    Ok(out)
}
