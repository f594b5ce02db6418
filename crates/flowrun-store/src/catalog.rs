use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::FlowDefinition;
use flowrun_core::traits::FlowCatalog;

/// Numeric versions compare numerically, everything else lexically.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let num = |v: &str| v.trim_start_matches('v').parse::<u64>().ok();
    match (num(a), num(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Flow definitions held in memory, keyed by code then version.
#[derive(Default)]
pub struct MemoryFlowCatalog {
    flows: RwLock<HashMap<String, HashMap<String, Arc<FlowDefinition>>>>,
}

impl MemoryFlowCatalog {
    pub fn from_flows(flows: Vec<FlowDefinition>) -> Self {
        let catalog = Self::default();
        for flow in flows {
            catalog.insert(flow);
        }
        catalog
    }

    /// Add or replace a flow version.
    pub fn insert(&self, flow: FlowDefinition) {
        if let Ok(mut flows) = self.flows.write() {
            flows
                .entry(flow.code.clone())
                .or_default()
                .insert(flow.version.clone(), Arc::new(flow));
        }
    }

    /// Every stored flow, sorted by code then version.
    pub fn flows(&self) -> Vec<Arc<FlowDefinition>> {
        let Ok(flows) = self.flows.read() else {
            return Vec::new();
        };
        let mut all: Vec<Arc<FlowDefinition>> =
            flows.values().flat_map(|v| v.values().cloned()).collect();
        all.sort_by(|a, b| {
            a.code
                .cmp(&b.code)
                .then_with(|| compare_versions(&a.version, &b.version))
        });
        all
    }

    fn get(&self, code: &str, version: Option<&str>) -> Result<Arc<FlowDefinition>> {
        let flows = self
            .flows
            .read()
            .map_err(|e| FlowError::Database(e.to_string()))?;
        let versions = flows
            .get(code)
            .ok_or_else(|| FlowError::FlowNotFound(code.to_string()))?;

        let found = match version {
            Some(v) => versions.get(v).cloned(),
            None => versions
                .values()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
                .cloned(),
        };
        found.ok_or_else(|| {
            FlowError::FlowNotFound(format!("{}@{}", code, version.unwrap_or("latest")))
        })
    }
}

impl FlowCatalog for MemoryFlowCatalog {
    fn load(&self, code: &str, version: Option<&str>) -> BoxFuture<'_, Result<Arc<FlowDefinition>>> {
        let result = self.get(code, version);
        Box::pin(async move { result })
    }
}

/// Flow definitions loaded from `*.json` files in a directory.
///
/// The directory is read once at open. A missing directory yields an empty
/// catalog; a file that fails to parse or validate is an error.
pub struct FileFlowCatalog {
    dir: PathBuf,
    inner: MemoryFlowCatalog,
}

impl FileFlowCatalog {
    pub fn open(dir: &Path) -> Result<Self> {
        let inner = MemoryFlowCatalog::default();

        if !dir.exists() {
            warn!(dir = %dir.display(), "Flows directory not found, catalog is empty");
            return Ok(Self {
                dir: dir.to_path_buf(),
                inner,
            });
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let flow = Self::read_flow(&path)?;
            debug!(path = %path.display(), code = %flow.code, version = %flow.version, "Loaded flow");
            inner.insert(flow);
        }

        info!(dir = %dir.display(), count = inner.flows().len(), "Flow catalog loaded");
        Ok(Self {
            dir: dir.to_path_buf(),
            inner,
        })
    }

    fn read_flow(path: &Path) -> Result<FlowDefinition> {
        let content = std::fs::read_to_string(path)?;
        let flow: FlowDefinition = serde_json::from_str(&content)
            .map_err(|e| FlowError::Validation(format!("{}: {}", path.display(), e)))?;
        flow.validate()
            .map_err(|e| FlowError::Validation(format!("{}: {}", path.display(), e)))?;
        Ok(flow)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn flows(&self) -> Vec<Arc<FlowDefinition>> {
        self.inner.flows()
    }
}

impl FlowCatalog for FileFlowCatalog {
    fn load(&self, code: &str, version: Option<&str>) -> BoxFuture<'_, Result<Arc<FlowDefinition>>> {
        self.inner.load(code, version)
    }
}
