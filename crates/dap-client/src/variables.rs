//! Variable reference tree.
//! - resolve: generation-checked, single-flight `variables` requests
//! - expand/collapse: local expansion state over the cache
//! - purge: drop everything issued by dead generations
//! - set_variable: write through a variable's container

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::client::DapClient;
use crate::error::{DapError, DapResult};
use crate::protocol::{
    SetVariableArguments, SetVariableResponseBody, VariablesArguments, VariablesResponseBody,
};
use crate::types::{Generation, Variable, VariableRef};

type Resolution = DapResult<Arc<[Variable]>>;
type Slot = Arc<OnceCell<Resolution>>;

#[derive(Debug, Default)]
struct TreeState {
    live: FxHashSet<Generation>,
    cache: FxHashMap<VariableRef, Slot>,
    expanded: FxHashSet<VariableRef>,
}

impl TreeState {
    fn check_live(&self, key: VariableRef) -> DapResult<()> {
        if self.live.contains(&key.generation) {
            Ok(())
        } else {
            Err(stale(key))
        }
    }
}

fn stale(key: VariableRef) -> DapError {
    DapError::StaleReference {
        reference: key.reference,
        generation: key.generation.get(),
    }
}

/// Lazily resolved scopes/variables keyed by `(reference, generation)`.
#[derive(Debug)]
pub struct VariableTree {
    client: DapClient,
    inner: Mutex<TreeState>,
}

impl VariableTree {
    #[must_use]
    pub fn new(client: DapClient) -> Self {
        Self {
            client,
            inner: Mutex::new(TreeState::default()),
        }
    }

    /// Replace the set of live generations and purge everything else.
    pub fn purge(&self, live: FxHashSet<Generation>) {
        let mut state = self.inner.lock();
        let before = state.cache.len();
        state.cache.retain(|key, _| live.contains(&key.generation));
        state.expanded.retain(|key| live.contains(&key.generation));
        let purged = before - state.cache.len();
        if purged > 0 {
            debug!(purged, "discarded stale variable resolutions");
        }
        state.live = live;
    }

    /// Children of `key`. Repeated and concurrent calls within one generation
    /// share a single adapter request.
    pub async fn resolve(&self, key: VariableRef) -> Resolution {
        self.check_open()?;
        let slot = {
            let mut state = self.inner.lock();
            state.check_live(key)?;
            if key.reference <= 0 {
                return Ok(Arc::from(Vec::new()));
            }
            Arc::clone(state.cache.entry(key).or_default())
        };

        let outcome = slot.get_or_init(|| self.fetch(key)).await.clone();

        let mut state = self.inner.lock();
        if let Err(err) = &outcome {
            let same_slot = state
                .cache
                .get(&key)
                .is_some_and(|cached| Arc::ptr_eq(cached, &slot));
            if same_slot {
                state.cache.remove(&key);
            }
            // Transport loss purges every generation; report the loss itself.
            if *err == DapError::Disconnected {
                return outcome;
            }
        }
        state.check_live(key)?;
        outcome
    }

    fn check_open(&self) -> DapResult<()> {
        if self.client.is_closed() {
            return Err(DapError::Disconnected);
        }
        Ok(())
    }

    async fn fetch(&self, key: VariableRef) -> Resolution {
        trace!(
            reference = key.reference,
            generation = %key.generation,
            "resolving variables"
        );
        let body: VariablesResponseBody = self
            .client
            .request(
                "variables",
                VariablesArguments {
                    variables_reference: key.reference,
                },
            )
            .await?;
        let variables = body
            .variables
            .iter()
            .map(|json| Variable::from_json(json, key))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::from(variables))
    }

    /// Mark `key` expanded and resolve its children.
    pub async fn expand(&self, key: VariableRef) -> Resolution {
        self.check_open()?;
        {
            let mut state = self.inner.lock();
            state.check_live(key)?;
            state.expanded.insert(key);
        }
        let outcome = self.resolve(key).await;
        if outcome.is_err() {
            self.inner.lock().expanded.remove(&key);
        }
        outcome
    }

    /// Local only; resolved children stay cached for this generation.
    pub fn collapse(&self, key: VariableRef) {
        self.inner.lock().expanded.remove(&key);
    }

    /// Flip expansion. Returns children when the node is now expanded.
    pub async fn toggle(&self, key: VariableRef) -> DapResult<Option<Arc<[Variable]>>> {
        if self.is_expanded(key) {
            self.collapse(key);
            return Ok(None);
        }
        self.expand(key).await.map(Some)
    }

    #[must_use]
    pub fn is_expanded(&self, key: VariableRef) -> bool {
        self.inner.lock().expanded.contains(&key)
    }

    /// Assign `value` through the variable's container and drop the
    /// container's cached children.
    pub async fn set_variable(&self, variable: &Variable, value: &str) -> DapResult<Variable> {
        let Some(container) = variable.container() else {
            return Err(DapError::NotEditable {
                name: variable.name.clone(),
            });
        };
        self.check_open()?;
        self.inner.lock().check_live(container)?;

        let body: SetVariableResponseBody = self
            .client
            .request(
                "setVariable",
                SetVariableArguments {
                    variables_reference: container.reference,
                    name: variable.name.clone(),
                    value: value.to_string(),
                },
            )
            .await?;

        let mut state = self.inner.lock();
        state.check_live(container)?;
        state.cache.remove(&container);
        if let Some(children) = variable.children() {
            state.cache.remove(&children);
            state.expanded.remove(&children);
        }
        Ok(Variable::new(
            variable.name.clone(),
            body.value,
            body.variables_reference,
            Some(container),
            container.generation,
        ))
    }
}
