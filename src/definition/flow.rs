//! Composite elements: flows, splits and decisions.

use serde::{Deserialize, Serialize};

use super::{JobElement, Properties, RefArtifact, Transition};

/// Sequential group of elements with its own transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub next: Option<String>,
    pub is_abstract: bool,
    pub elements: Vec<JobElement>,
    pub transitions: Vec<Transition>,
}

impl Flow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: None,
            is_abstract: false,
            elements: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: JobElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }
}

/// Flows run concurrently. A split has no transitions of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub id: String,
    pub next: Option<String>,
    pub flows: Vec<Flow>,
}

impl Split {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: None,
            flows: Vec::new(),
        }
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub decider: RefArtifact,
    pub properties: Properties,
    pub transitions: Vec<Transition>,
}

impl Decision {
    pub fn new(id: impl Into<String>, decider: RefArtifact) -> Self {
        Self {
            id: id.into(),
            decider,
            properties: Properties::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }
}
