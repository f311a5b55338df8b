//! Batch wrapper: per-item fan-out of the wrapped chain.
//!
//! `items` is resolved once at the start of the node. Each item executes the
//! wrapped inner chain (namespacing downward) against an isolated store
//! carrying the item binding at its root. Parallel mode runs a bounded pool
//! of OS threads; every worker owns a deep copy of the chain because
//! wrappers are stateful between phases. Result order always equals input
//! order.
//!
//! The shared store is only reachable from `prep` and `post` under the node
//! contract, so the fan-out itself runs in `post`; `exec` passes the
//! resolved item list through untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::ir::{BatchSpec, ErrorHandling, ValueType, MAX_CONCURRENT_CEILING};
use crate::node::{execute_node, Action, BoxedNode, Node, Params};
use crate::store::SharedStore;
use crate::template::resolver::{resolve_param_value, Overlay};

#[derive(Debug, Clone)]
pub struct BatchWrapper {
    inner: BoxedNode,
    node_id: String,
    spec: BatchSpec,
}

/// What one item produced: its result entry and the isolated store to merge
/// back into the parent.
struct ItemOutcome {
    entry: Map<String, Value>,
    error: Option<EngineError>,
    child: SharedStore,
}

impl BatchWrapper {
    pub fn new(inner: BoxedNode, node_id: impl Into<String>, spec: BatchSpec) -> Self {
        Self {
            inner,
            node_id: node_id.into(),
            spec,
        }
    }

    fn resolve_items(&self, shared: &SharedStore) -> Result<Vec<Value>> {
        let overlay = Overlay::new(None, shared.namespace(&self.node_id), shared.root());
        let resolved =
            resolve_param_value(&self.spec.items, &overlay, Some(ValueType::Array))
                .map_err(|e| e.with_node_id(self.node_id.clone()))?;
        match resolved {
            Value::Array(items) => Ok(items),
            other => Err(EngineError::batch(format!(
                "batch_items_not_list: items resolved to {} instead of a list",
                type_name(&other)
            ))
            .with_node_id(self.node_id.clone())
            .with_details(other)),
        }
    }

    fn run_item(&self, chain: &mut BoxedNode, shared: &SharedStore, index: usize, item: &Value) -> ItemOutcome {
        let mut child = shared.child_for_item(&self.spec.as_name, item.clone(), index);
        let mut entry = Map::new();
        entry.insert("item".to_string(), item.clone());

        match execute_node(chain.as_mut(), &mut child) {
            Ok(_) => {
                if let Some(outputs) = child.namespace(&self.node_id) {
                    for (key, value) in outputs {
                        entry.insert(key.clone(), value.clone());
                    }
                }
                ItemOutcome {
                    entry,
                    error: None,
                    child,
                }
            }
            Err(err) => {
                let err = err.with_node_id(self.node_id.clone());
                entry.insert(
                    "error".to_string(),
                    serde_json::to_value(&err).unwrap_or(Value::Null),
                );
                ItemOutcome {
                    entry,
                    error: Some(err),
                    child,
                }
            }
        }
    }

    fn skipped_outcome(&self, shared: &SharedStore, index: usize, item: &Value, reason: &str) -> ItemOutcome {
        let err = EngineError::runtime(reason).with_node_id(self.node_id.clone());
        let mut entry = Map::new();
        entry.insert("item".to_string(), item.clone());
        entry.insert(
            "error".to_string(),
            serde_json::to_value(&err).unwrap_or(Value::Null),
        );
        ItemOutcome {
            entry,
            error: Some(err),
            child: shared.child_for_item(&self.spec.as_name, item.clone(), index),
        }
    }

    fn run_sequential(&self, items: &[Value], shared: &SharedStore) -> Vec<ItemOutcome> {
        let fail_fast = self.spec.error_handling == ErrorHandling::FailFast;
        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if shared.coordination.is_cancelled() {
                outcomes.push(self.skipped_outcome(shared, index, item, "item skipped: run cancelled"));
                continue;
            }
            let mut chain = self.inner.clone_node();
            let outcome = self.run_item(&mut chain, shared, index, item);
            let failed = outcome.error.is_some();
            outcomes.push(outcome);
            if failed && fail_fast {
                break;
            }
        }
        outcomes
    }

    fn run_parallel(&self, items: &[Value], shared: &SharedStore) -> Vec<ItemOutcome> {
        let workers = items
            .len()
            .min(self.spec.max_concurrent)
            .min(MAX_CONCURRENT_CEILING)
            .max(1);
        debug!(node_id = %self.node_id, items = items.len(), workers, "batch fan-out");

        let fail_fast = self.spec.error_handling == ErrorHandling::FailFast;
        let aborted = AtomicBool::new(false);

        // Every worker owns a deep copy of the chain per item; the copies are
        // made up front so the queue entries carry everything an item needs.
        let queue: Mutex<Vec<(usize, BoxedNode)>> = Mutex::new(
            (0..items.len())
                .rev()
                .map(|i| (i, self.inner.clone_node()))
                .collect(),
        );
        let slots: Vec<Mutex<Option<ItemOutcome>>> =
            (0..items.len()).map(|_| Mutex::new(None)).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if aborted.load(Ordering::SeqCst) || shared.coordination.is_cancelled() {
                        return;
                    }
                    let Some((index, mut chain)) = queue.lock().expect("queue lock").pop()
                    else {
                        return;
                    };
                    let outcome = self.run_item(&mut chain, shared, index, &items[index]);
                    if outcome.error.is_some() && fail_fast {
                        aborted.store(true, Ordering::SeqCst);
                    }
                    *slots[index].lock().expect("slot lock") = Some(outcome);
                });
            }
        });

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.into_inner().expect("slot lock").unwrap_or_else(|| {
                    self.skipped_outcome(
                        shared,
                        index,
                        &items[index],
                        "item skipped: batch aborted",
                    )
                })
            })
            .collect()
    }
}

impl Node for BatchWrapper {
    fn node_name(&self) -> String {
        format!("Batch({})", self.inner.node_name())
    }

    fn set_params(&mut self, params: Params) -> Result<()> {
        self.inner.set_params(params)
    }

    fn prep(&mut self, shared: &SharedStore) -> Result<Value> {
        Ok(Value::Array(self.resolve_items(shared)?))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        Ok(prep_result)
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        let items = match exec_result {
            Value::Array(items) => items,
            other => {
                return Err(EngineError::internal(format!(
                    "batch exec result must be a list, got {}",
                    type_name(&other)
                )))
            }
        };

        let outcomes = if self.spec.parallel {
            self.run_parallel(&items, shared)
        } else {
            self.run_sequential(&items, shared)
        };

        // Cost attribution from every isolated store merges into the parent
        // before the stores are discarded; losing this silently loses spend.
        let mut results = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();
        let mut success_count = 0usize;
        let mut first_error: Option<EngineError> = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            shared.absorb_child(outcome.child);
            match outcome.error {
                Some(err) => {
                    let mut detail = serde_json::to_value(&err)?;
                    if let Some(obj) = detail.as_object_mut() {
                        obj.insert("index".to_string(), Value::from(index));
                    }
                    errors.push(detail);
                    first_error.get_or_insert(err);
                }
                None => success_count += 1,
            }
            results.push(Value::Object(outcome.entry));
        }

        let error_count = errors.len();
        shared.namespaced_write(&self.node_id, "results", Value::Array(results));
        shared.namespaced_write(&self.node_id, "count", Value::from(items.len()));
        shared.namespaced_write(&self.node_id, "success_count", Value::from(success_count));
        shared.namespaced_write(&self.node_id, "error_count", Value::from(error_count));
        shared.namespaced_write(&self.node_id, "errors", Value::Array(errors.clone()));

        if self.spec.error_handling == ErrorHandling::FailFast {
            if let Some(err) = first_error {
                return Err(EngineError::batch(format!(
                    "{} of {} batch item(s) failed: {}",
                    error_count,
                    items.len(),
                    err.message
                ))
                .with_node_id(self.node_id.clone())
                .with_details(Value::Array(errors)));
            }
        }
        Ok(crate::ir::DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
