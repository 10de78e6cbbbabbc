//! Scripted backend for unit tests

use super::{GenerationBackend, GenerationRequest, LLMError, ModelDescriptor};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Backend whose answers are scripted per model name
///
/// Unscripted calls answer `"<model>: <contents>"`.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    scripted: Mutex<HashMap<String, VecDeque<Result<String, LLMError>>>>,
    broken: Mutex<HashSet<String>>,
    delay: Duration,
    calls: Mutex<Vec<(String, GenerationRequest)>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue one result for the next call to `model`
    pub(crate) fn push(&self, model: &str, result: Result<String, LLMError>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make every call to `model` fail with a non-transient error
    pub(crate) fn break_model(&self, model: &str) {
        self.broken.lock().unwrap().insert(model.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<(String, GenerationRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, model: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == model)
            .count()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        model: &ModelDescriptor,
        request: &GenerationRequest,
    ) -> super::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((model.name.clone(), request.clone()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.broken.lock().unwrap().contains(&model.name) {
            return Err(LLMError::InvalidRequest(format!("{} is broken", model.name)));
        }

        let next = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&model.name)
            .and_then(|q| q.pop_front());

        next.unwrap_or_else(|| Ok(format!("{}: {}", model.name, request.contents)))
    }
}
