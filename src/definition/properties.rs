//! Partition plan property substitution.
//!
//! Step and artifact properties may reference a partition's own properties
//! with `#{partitionPlan['name']}`. Each partition runs against a copy of the
//! step with those references resolved; unknown names resolve to an empty
//! string.

use super::{Properties, Step};
use crate::constants::PARTITION_PLAN_TOKEN;

const TOKEN_END: &str = "']}";

/// Resolve every partition plan reference in `value`
pub fn resolve_partition_plan_properties(value: &str, plan: &Properties) -> String {
    let mut resolved = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find(PARTITION_PLAN_TOKEN) {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + PARTITION_PLAN_TOKEN.len()..];
        match after.find(TOKEN_END) {
            Some(end) => {
                let name = &after[..end];
                if let Some(replacement) = plan.get(name) {
                    resolved.push_str(replacement);
                }
                rest = &after[end + TOKEN_END.len()..];
            }
            None => {
                // unterminated reference is kept verbatim
                resolved.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    resolved.push_str(rest);
    resolved
}

fn resolve_all(properties: &mut Properties, plan: &Properties) {
    for value in properties.values_mut() {
        if value.contains(PARTITION_PLAN_TOKEN) {
            *value = resolve_partition_plan_properties(value, plan);
        }
    }
}

impl Step {
    /// Copy of this step with partition plan references resolved against `plan`
    pub fn resolve_for_partition(&self, plan: &Properties) -> Step {
        let mut step = self.clone();
        resolve_all(&mut step.properties, plan);
        for listener in &mut step.listeners {
            resolve_all(&mut listener.properties, plan);
        }
        if let Some(batchlet) = step.batchlet.as_mut() {
            resolve_all(&mut batchlet.properties, plan);
        }
        if let Some(chunk) = step.chunk.as_mut() {
            for artifact in chunk.artifacts_mut() {
                resolve_all(&mut artifact.properties, plan);
            }
        }
        if let Some(collector) = step
            .partition
            .as_mut()
            .and_then(|partition| partition.collector.as_mut())
        {
            resolve_all(&mut collector.properties, plan);
        }
        step
    }
}
