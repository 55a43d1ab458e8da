//! Token ownership read from a TOML file, for offline planning.
//!
//! ```toml
//! [[vnodes]]
//! start = -9223372036854775808
//! end = 0
//! replicas = ["node-a@dc1", "node-b@dc1", "node-c@dc2"]
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tidemark_types::{Node, ReplicaSet, TokenRange};

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    vnodes: Vec<VnodeEntry>,
}

#[derive(Debug, Deserialize)]
struct VnodeEntry {
    start: i64,
    end: i64,
    replicas: Vec<String>,
}

/// Parse `"host@datacenter"`.
fn parse_replica(s: &str) -> Result<Node> {
    let Some((host, dc)) = s.split_once('@') else {
        bail!("invalid replica '{s}': expected 'host@datacenter'");
    };
    if host.is_empty() || dc.is_empty() {
        bail!("invalid replica '{s}': expected 'host@datacenter'");
    }
    Ok(Node::new(host, dc))
}

pub fn parse(content: &str) -> Result<Vec<(TokenRange, ReplicaSet)>> {
    let file: TopologyFile = toml::from_str(content)?;
    file.vnodes
        .into_iter()
        .map(|v| {
            let nodes = v
                .replicas
                .iter()
                .map(|r| parse_replica(r))
                .collect::<Result<Vec<_>>>()?;
            if nodes.is_empty() {
                bail!("vnode ({}, {}] has no replicas", v.start, v.end);
            }
            Ok((TokenRange::new(v.start, v.end), ReplicaSet::new(nodes)))
        })
        .collect()
}

pub fn load(path: &Path) -> Result<Vec<(TokenRange, ReplicaSet)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read topology file {}", path.display()))?;
    parse(&content).with_context(|| format!("invalid topology file {}", path.display()))
}
