use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use crate::error::{ErrorList, ShedError, ShedResult};
use crate::global::cache::Cache;
use crate::lock::Lockfile;
use crate::tool::{check_import_path, Reference, Tool, ToolSpec};

/// What should happen to one tool when an [`InstallSet`] is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Build the tool if it isn't cached and pin it at `version`.
    EnsurePresent { import_path: String, version: String },
    /// Unpin the tool. `pinned` is the version that was in the lockfile, if
    /// any, so its cache entry can be evicted.
    EnsureAbsent {
        import_path: String,
        pinned: Option<String>,
    },
}

impl Operation {
    pub fn import_path(&self) -> &str {
        match self {
            Self::EnsurePresent { import_path, .. } | Self::EnsureAbsent { import_path, .. } => {
                import_path
            }
        }
    }
}

/// A cancellation signal shared by every operation of an apply.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything an [`InstallSet`] reads from and writes to.
#[derive(Debug, Clone, Copy)]
pub struct Workspace<'a> {
    pub lockfile: &'a Mutex<Lockfile>,
    pub lockfile_path: &'a Path,
    pub cache: &'a Cache,
    /// Worker threads used by [`InstallSet::apply`], `None` for one per CPU.
    pub jobs: Option<usize>,
    /// Evict the cache entries of removed tools.
    pub evict: bool,
}

enum Outcome {
    Put(Tool),
    Remove(String),
    Failed(ShedError),
}

/// The operations needed to bring the lockfile and cache in line with a
/// set of requested tool specs.
///
/// Every pinned tool gets an implicit `EnsurePresent` at its pinned
/// version, explicit specs override that per import path. Nothing is
/// changed until [`InstallSet::apply`] runs.
#[derive(Debug)]
pub struct InstallSet<'a> {
    workspace: Workspace<'a>,
    operations: BTreeMap<String, Operation>,
}

impl<'a> InstallSet<'a> {
    /// Builds the install set for `specs` (`name[@ref]`).
    ///
    /// Specs that fail to resolve are reported in the returned [`ErrorList`]
    /// keyed by the spec as written; all other specs are still resolved and
    /// end up in the set.
    pub fn resolve<S: AsRef<str>>(workspace: Workspace<'a>, specs: &[S]) -> (Self, ErrorList) {
        let snapshot = workspace
            .lockfile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut operations: BTreeMap<String, Operation> = snapshot
            .iter()
            .map(|tool| {
                let op = Operation::EnsurePresent {
                    import_path: tool.import_path.clone(),
                    version: tool.version.clone(),
                };
                (tool.import_path.clone(), op)
            })
            .collect();

        let mut errors = ErrorList::new();
        for raw in specs {
            let raw = raw.as_ref();
            let spec = ToolSpec::parse(raw);
            match resolve_spec(&snapshot, workspace.cache, &spec) {
                Ok(op) => {
                    debug!("{} -> {:?}", raw, op);
                    operations.insert(op.import_path().to_string(), op);
                }
                Err(e) => errors.push(raw, e),
            }
        }

        info!(
            "Resolved {} operation(s) from {} spec(s), {} failed",
            operations.len(),
            specs.len(),
            errors.len()
        );
        (
            InstallSet {
                workspace,
                operations,
            },
            errors,
        )
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations in import path order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> + '_ {
        self.operations.values()
    }

    pub fn get(&self, import_path: &str) -> Option<&Operation> {
        self.operations.get(import_path)
    }

    /// Runs every operation concurrently, then writes the lockfile once.
    ///
    /// Failed and canceled operations leave their tool untouched in the
    /// lockfile and are returned together as [`ShedError::Tools`]. The
    /// lockfile is written either way and reflects every operation that
    /// succeeded.
    pub fn apply(&self, cancel: &CancelToken) -> ShedResult<()> {
        let ops: Vec<&Operation> = self.operations.values().collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workspace.jobs.unwrap_or(0))
            .thread_name(|i| format!("shed-apply-{i}"))
            .build()
            .map_err(|e| ShedError::io("starting worker threads", std::io::Error::other(e)))?;

        info!("Applying {} operation(s)", ops.len());
        // Each operation fills its own slot; only the fold below touches the lockfile.
        let outcomes: Vec<Outcome> =
            pool.install(|| ops.par_iter().map(|op| self.run(op, cancel)).collect());

        let mut errors = ErrorList::new();
        let mut removes = Vec::new();
        let mut puts = Vec::new();
        for (op, outcome) in ops.iter().zip(outcomes) {
            match outcome {
                Outcome::Put(tool) => puts.push(tool),
                Outcome::Remove(import_path) => removes.push(import_path),
                Outcome::Failed(e) => errors.push(op.import_path(), e),
            }
        }

        let mut lock = self
            .workspace
            .lockfile
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for import_path in removes {
            if let Err(e) = lock.remove(&import_path) {
                errors.push(import_path, e);
            }
        }
        for tool in puts {
            let import_path = tool.import_path.clone();
            if let Err(e) = lock.put(tool) {
                errors.push(import_path, e);
            }
        }
        lock.save(self.workspace.lockfile_path)?;
        drop(lock);

        info!(
            "Applied {} operation(s), {} failed",
            self.operations.len() - errors.len(),
            errors.len()
        );
        errors.into_result().map_err(ShedError::Tools)
    }

    fn run(&self, op: &Operation, cancel: &CancelToken) -> Outcome {
        if cancel.is_canceled() {
            return Outcome::Failed(ShedError::Canceled(op.import_path().to_string()));
        }
        let cache = self.workspace.cache;
        match op {
            Operation::EnsurePresent {
                import_path,
                version,
            } => match cache.ensure(import_path, version) {
                Ok((version, _)) => Outcome::Put(Tool::new(import_path.clone(), version)),
                Err(e) => Outcome::Failed(e),
            },
            Operation::EnsureAbsent {
                import_path,
                pinned,
            } => {
                if let (true, Some(version)) = (self.workspace.evict, pinned) {
                    if let Err(e) = cache.evict(import_path, version) {
                        warn!("Could not evict {}@{}: {}", import_path, version, e);
                    }
                }
                Outcome::Remove(import_path.clone())
            }
        }
    }
}

fn resolve_spec(lock: &Lockfile, cache: &Cache, spec: &ToolSpec) -> ShedResult<Operation> {
    let (import_path, pinned) = match lock.get(&spec.name) {
        Ok(tool) => (tool.import_path.clone(), Some(tool.version.clone())),
        Err(ShedError::NotFound(_)) => {
            check_import_path(&spec.name)?;
            (spec.name.clone(), None)
        }
        Err(e) => return Err(e),
    };
    match &spec.reference {
        Reference::Remove => Ok(Operation::EnsureAbsent {
            import_path,
            pinned,
        }),
        reference => {
            let version = cache.resolve(&import_path, reference.as_str())?;
            Ok(Operation::EnsurePresent {
                import_path,
                version,
            })
        }
    }
}
