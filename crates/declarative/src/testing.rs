//! In-memory provider used by the engine's tests

use crate::error::ProviderError;
use crate::provider::{Created, Provider};
use crate::types::PropertyDiff;
use crate::value::Properties;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One provider call as observed by a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: String,
    pub verb: &'static str,
    pub id: String,
}

/// Call log shared between providers so tests can see global ordering.
pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Live resources keyed by physical ID.
pub type LiveStore = Arc<Mutex<BTreeMap<String, Properties>>>;

#[derive(Debug)]
pub struct MockProvider {
    kind: String,
    updatable: BTreeSet<String>,
    replace: BTreeSet<String>,
    stable: BTreeSet<String>,
    log: CallLog,
    live: LiveStore,
    next_id: AtomicUsize,
}

impl MockProvider {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            updatable: BTreeSet::new(),
            replace: BTreeSet::new(),
            stable: BTreeSet::new(),
            log: CallLog::default(),
            live: LiveStore::default(),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Properties that can be changed in place.
    pub fn updatable<const N: usize>(mut self, props: [&str; N]) -> Self {
        self.updatable.extend(props.iter().map(ToString::to_string));
        self
    }

    /// Properties that force replacement.
    pub fn replacing<const N: usize>(mut self, props: [&str; N]) -> Self {
        self.replace.extend(props.iter().map(ToString::to_string));
        self
    }

    /// Outputs that keep their value across an update.
    pub fn stable_outputs<const N: usize>(mut self, props: [&str; N]) -> Self {
        self.stable.extend(props.iter().map(ToString::to_string));
        self
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = Arc::clone(log);
        self
    }

    pub fn with_live(mut self, live: &LiveStore) -> Self {
        self.live = Arc::clone(live);
        self
    }

    fn record(&self, verb: &'static str, id: &str) {
        self.log.lock().unwrap().push(Call {
            kind: self.kind.clone(),
            verb,
            id: id.to_string(),
        });
    }

    fn outputs(&self, id: &str, inputs: &Properties) -> Properties {
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), json!(id));
        outputs.insert("selfLink".into(), json!(format!("https://mock/{id}")));
        outputs.insert("address".into(), json!(format!("10.0.0.{}", id.len())));
        outputs
    }

    fn should_fail(inputs: &Properties) -> bool {
        inputs.get("fail") == Some(&Value::Bool(true))
    }
}

impl Provider for MockProvider {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn create(&self, inputs: &Properties) -> Result<Created, ProviderError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}", self.kind.rsplit(':').next().unwrap_or("r"), n);
        self.record("create", &id);
        if Self::should_fail(inputs) {
            return Err(ProviderError::failed("quota exceeded"));
        }
        let outputs = self.outputs(&id, inputs);
        self.live.lock().unwrap().insert(id.clone(), outputs.clone());
        Ok(Created { id, outputs })
    }

    fn read(&self, id: &str) -> Result<Properties, ProviderError> {
        self.record("read", id);
        self.live
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })
    }

    fn update(
        &self,
        id: &str,
        _olds: &Properties,
        news: &Properties,
        _diff: &PropertyDiff,
    ) -> Result<Properties, ProviderError> {
        self.record("update", id);
        if Self::should_fail(news) {
            return Err(ProviderError::failed("update rejected"));
        }
        let outputs = self.outputs(id, news);
        self.live.lock().unwrap().insert(id.to_string(), outputs.clone());
        Ok(outputs)
    }

    fn delete(&self, id: &str) -> Result<(), ProviderError> {
        self.record("delete", id);
        match self.live.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound { id: id.to_string() }),
        }
    }

    fn replace_semantics(&self, property: &str) -> Option<bool> {
        if self.updatable.contains(property) {
            Some(false)
        } else if self.replace.contains(property) {
            Some(true)
        } else {
            None
        }
    }

    fn output_survives_update(&self, property: &str) -> bool {
        self.stable.contains(property)
    }
}
