//! Scope handles handed to artifacts at creation time.

use parking_lot::Mutex;
use std::sync::Arc;

use super::Item;
use crate::definition::Properties;
use crate::models::OpaqueData;

/// Mutable view of the running step (or partition) shared with its artifacts.
///
/// Artifacts set the exit status and persistent user data here; the runtime
/// copies persistent data into the execution record at every checkpoint and
/// at step end.
#[derive(Debug)]
pub struct StepScope {
    step_name: String,
    partition_index: Option<usize>,
    properties: Properties,
    data: Mutex<ScopeData>,
}

#[derive(Debug, Default)]
struct ScopeData {
    exit_status: Option<String>,
    persistent_user_data: Option<OpaqueData>,
    transient_user_data: Option<Item>,
}

impl StepScope {
    pub fn new(
        step_name: impl Into<String>,
        partition_index: Option<usize>,
        properties: Properties,
        persistent_user_data: Option<OpaqueData>,
    ) -> Arc<Self> {
        Arc::new(Self {
            step_name: step_name.into(),
            partition_index,
            properties,
            data: Mutex::new(ScopeData {
                persistent_user_data,
                ..ScopeData::default()
            }),
        })
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn partition_index(&self) -> Option<usize> {
        self.partition_index
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn exit_status(&self) -> Option<String> {
        self.data.lock().exit_status.clone()
    }

    pub fn set_exit_status(&self, exit_status: impl Into<String>) {
        self.data.lock().exit_status = Some(exit_status.into());
    }

    pub fn persistent_user_data(&self) -> Option<OpaqueData> {
        self.data.lock().persistent_user_data.clone()
    }

    pub fn set_persistent_user_data(&self, data: Option<OpaqueData>) {
        self.data.lock().persistent_user_data = data;
    }

    pub fn transient_user_data(&self) -> Option<Item> {
        self.data.lock().transient_user_data.clone()
    }

    pub fn set_transient_user_data(&self, data: Option<Item>) {
        self.data.lock().transient_user_data = data;
    }
}

/// Where an artifact is being created: the job run and, for step-scoped
/// artifacts, the step or partition it belongs to.
#[derive(Debug, Clone)]
pub struct ArtifactContext {
    pub job_name: String,
    pub job_execution_id: i64,
    pub job_parameters: Properties,
    pub job_properties: Properties,
    pub step: Option<Arc<StepScope>>,
}

impl ArtifactContext {
    pub fn for_step(&self, step: Arc<StepScope>) -> Self {
        Self {
            step: Some(step),
            ..self.clone()
        }
    }

    /// Job parameter first, then step property, then job property
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.job_parameters
            .get(name)
            .map(String::as_str)
            .or_else(|| self.step.as_ref().and_then(|s| s.property(name)))
            .or_else(|| self.job_properties.get(name).map(String::as_str))
    }
}
