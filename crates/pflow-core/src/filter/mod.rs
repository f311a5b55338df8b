//! # Smart Filter
//!
//! Large output surfaces drown agents in irrelevant paths. When a node's
//! flattened path list exceeds the threshold, a small LLM collaborator is
//! asked to pick the 8-15 most useful paths. The filter is strictly
//! best-effort: any failure (transport, parse, empty or out-of-set
//! selection) degrades to returning the input unchanged. It never blocks a
//! result, and it never invents a path.
//!
//! Decisions are cached across nodes with identical surfaces: the key is an
//! order-independent MD5 fingerprint of the sorted path list, held in a
//! bounded process-lifetime LRU.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use crate::error::Result;

/// Path count above which filtering engages.
pub const DEFAULT_FILTER_THRESHOLD: usize = 30;

/// Bounded decision cache size.
const CACHE_CAPACITY: usize = 100;

/// Guidance handed to selection models alongside the path list.
pub const SELECTION_GUIDANCE: &str = "Select the 8-15 paths an agent acting on this output would \
     need. Keep business-meaningful fields; drop URLs, internal ids, timestamps, and metadata. \
     For array-typed fields, always keep 2-5 `[0].<key>` sample paths regardless of nesting depth.";

/// The LLM collaborator seam. Implementations receive `(path, type)` pairs
/// and return the paths worth keeping.
pub trait PathSelectionModel: Send + Sync {
    fn select_paths(&self, paths: &[(String, String)]) -> Result<Vec<String>>;
}

pub struct SmartFilter {
    model: Option<Arc<dyn PathSelectionModel>>,
    threshold: usize,
    cache: Mutex<LruCache<String, Vec<String>>>,
}

impl std::fmt::Debug for SmartFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartFilter")
            .field("threshold", &self.threshold)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

impl SmartFilter {
    pub fn new(threshold: usize) -> Self {
        Self {
            model: None,
            threshold,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn PathSelectionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Reduce a flattened surface. The result is always a subset of the
    /// input; every failure mode returns the input unchanged.
    pub fn filter(&self, paths: &[(String, String)]) -> Vec<(String, String)> {
        if paths.len() <= self.threshold {
            return paths.to_vec();
        }
        let Some(model) = &self.model else {
            return paths.to_vec();
        };

        let key = fingerprint(paths);
        if let Some(selection) = self
            .cache
            .lock()
            .expect("filter cache lock")
            .get(&key)
            .cloned()
        {
            debug!(fingerprint = %key, "smart filter cache hit");
            return apply_selection(paths, &selection);
        }

        let selection = match model.select_paths(paths) {
            Ok(selection) => selection,
            Err(err) => {
                debug!("smart filter model failed, keeping all paths: {}", err.message);
                return paths.to_vec();
            }
        };
        // Only paths that actually exist survive; an empty survivor set
        // means the selection was useless.
        let kept = apply_selection(paths, &selection);
        if kept.len() == paths.len() || kept.is_empty() && !paths.is_empty() {
            return paths.to_vec();
        }
        let validated: Vec<String> = kept.iter().map(|(p, _)| p.clone()).collect();
        self.cache
            .lock()
            .expect("filter cache lock")
            .put(key, validated);
        kept
    }
}

fn apply_selection(
    paths: &[(String, String)],
    selection: &[String],
) -> Vec<(String, String)> {
    paths
        .iter()
        .filter(|(path, _)| selection.iter().any(|s| s == path))
        .cloned()
        .collect()
}

/// Order-independent fingerprint of a path list.
pub fn fingerprint(paths: &[(String, String)]) -> String {
    let mut names: Vec<&str> = paths.iter().map(|(p, _)| p.as_str()).collect();
    names.sort_unstable();
    format!("{:x}", md5::compute(names.join("\n").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn surface(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("field_{}", i), "string".to_string()))
            .collect()
    }

    struct FixedModel {
        selection: Vec<String>,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn new(selection: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                selection: selection.into_iter().map(str::to_string).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PathSelectionModel for FixedModel {
        fn select_paths(&self, _paths: &[(String, String)]) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.selection.clone())
        }
    }

    struct FailingModel;

    impl PathSelectionModel for FailingModel {
        fn select_paths(&self, _paths: &[(String, String)]) -> Result<Vec<String>> {
            Err(EngineError::runtime("model unreachable"))
        }
    }

    #[test]
    fn small_surfaces_pass_untouched() {
        let filter = SmartFilter::new(DEFAULT_FILTER_THRESHOLD)
            .with_model(FixedModel::new(vec!["field_0"]));
        let paths = surface(10);
        assert_eq!(filter.filter(&paths), paths);
    }

    #[test]
    fn selection_reduces_to_named_subset() {
        let filter = SmartFilter::new(5).with_model(FixedModel::new(vec!["field_1", "field_3"]));
        let kept = filter.filter(&surface(40));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, "field_1");
    }

    #[test]
    fn out_of_set_paths_never_appear() {
        let filter = SmartFilter::new(5)
            .with_model(FixedModel::new(vec!["field_2", "made_up_field"]));
        let kept = filter.filter(&surface(40));
        assert_eq!(kept, vec![("field_2".to_string(), "string".to_string())]);
    }

    #[test]
    fn failures_keep_everything() {
        let filter = SmartFilter::new(5).with_model(Arc::new(FailingModel));
        let paths = surface(40);
        assert_eq!(filter.filter(&paths), paths);
    }

    #[test]
    fn empty_selection_keeps_everything() {
        let filter = SmartFilter::new(5).with_model(FixedModel::new(vec![]));
        let paths = surface(40);
        assert_eq!(filter.filter(&paths), paths);
    }

    #[test]
    fn no_model_keeps_everything() {
        let filter = SmartFilter::new(5);
        let paths = surface(40);
        assert_eq!(filter.filter(&paths), paths);
    }

    #[test]
    fn decisions_are_cached_order_independently() {
        let model = FixedModel::new(vec!["field_1"]);
        let filter = SmartFilter::new(5).with_model(model.clone());

        let paths = surface(40);
        let mut shuffled = paths.clone();
        shuffled.reverse();

        filter.filter(&paths);
        filter.filter(&shuffled);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fingerprint(&paths), fingerprint(&shuffled));
    }
}
