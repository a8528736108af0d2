//! # Job Definition Graph
//!
//! Resolved, read-only model of a job: steps, flows, splits and decisions
//! connected by transitions. Parsing and inheritance resolution happen before
//! a definition reaches the runtime; the runtime never mutates it.
//!
//! Builders on each element keep test and embedding code short:
//!
//! ```rust
//! use tasker_batch::definition::{Chunk, Job, JobElement, RefArtifact, Step};
//!
//! let job = Job::new("import")
//!     .with_element(JobElement::Step(
//!         Step::new("load")
//!             .with_chunk(Chunk::new(RefArtifact::new("csvReader"), RefArtifact::new("dbWriter")))
//!             .with_next("report"),
//!     ))
//!     .with_element(JobElement::Step(Step::new("report").with_batchlet(RefArtifact::new("mailer"))));
//! assert_eq!(job.elements.len(), 2);
//! ```

pub mod exception_filter;
pub mod flow;
pub mod properties;
pub mod step;
pub mod transition;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use exception_filter::ExceptionClassFilter;
pub use flow::{Decision, Flow, Split};
pub use properties::resolve_partition_plan_properties;
pub use step::{Chunk, Partition, PartitionPlan, Step};
pub use transition::Transition;

/// Ordered name/value property set
pub type Properties = BTreeMap<String, String>;

/// Reference to a user artifact plus the properties it is configured with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefArtifact {
    pub reference: String,
    pub properties: Properties,
}

impl RefArtifact {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub restartable: bool,
    pub properties: Properties,
    pub listeners: Vec<RefArtifact>,
    pub elements: Vec<JobElement>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            restartable: true,
            properties: Properties::new(),
            listeners: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: JobElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_listener(mut self, listener: RefArtifact) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Top-level element by id
    pub fn element(&self, id: &str) -> Option<&JobElement> {
        find_element(&self.elements, id)
    }
}

/// Node of the job graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobElement {
    Step(Step),
    Flow(Flow),
    Split(Split),
    Decision(Decision),
}

impl JobElement {
    pub fn id(&self) -> &str {
        match self {
            Self::Step(step) => &step.id,
            Self::Flow(flow) => &flow.id,
            Self::Split(split) => &split.id,
            Self::Decision(decision) => &decision.id,
        }
    }

    /// Abstract elements are templates and never run as a head element
    pub fn is_abstract(&self) -> bool {
        match self {
            Self::Step(step) => step.is_abstract,
            Self::Flow(flow) => flow.is_abstract,
            Self::Split(_) | Self::Decision(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Flow(_) => "flow",
            Self::Split(_) => "split",
            Self::Decision(_) => "decision",
        }
    }
}

/// Element lookup within one composite scope
pub fn find_element<'a>(elements: &'a [JobElement], id: &str) -> Option<&'a JobElement> {
    elements.iter().find(|element| element.id() == id)
}
