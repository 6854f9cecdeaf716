//! Job graph — explicit DAG of refresh job descriptors.
//!
//! The graph is data: named specs with declared triggers and upstream
//! edges, validated for cycles before the first wave. The executor in
//! scheduler.rs is generic over it, so scheduling logic is testable
//! apart from the business jobs.

use crate::{
    error::{CoreError, CoreResult},
    types::{JobName, SourceId},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// What causes a job to run in a wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fixed cadence: due when `next_run <= now` (or never run).
    Cadence { every_secs: i64 },
    /// Due when any named change log has unconsumed entries.
    ChangePending { sources: Vec<SourceId> },
    /// Runs after all named upstreams succeed in the current wave.
    After { upstream: Vec<JobName> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: JobName,
    pub trigger: Trigger,
    /// Soft target: wave start to job completion. Breach is a WARNING.
    pub staleness_target_secs: i64,
    /// Hard budget: jobs with a publish step abort before committing.
    pub hard_deadline_secs: i64,
}

impl JobSpec {
    pub fn upstreams(&self) -> &[JobName] {
        match &self.trigger {
            Trigger::After { upstream } => upstream,
            _ => &[],
        }
    }

    pub fn is_root(&self) -> bool {
        !matches!(self.trigger, Trigger::After { .. })
    }
}

#[derive(Default)]
pub struct JobGraph {
    specs: Vec<JobSpec>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, spec: JobSpec) {
        self.specs.push(spec);
    }

    pub fn specs(&self) -> &[JobSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&JobSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Reject unknown upstream names and cycles. Called once at build
    /// time; a graph that validates cannot deadlock a wave.
    pub fn validate(&self) -> CoreResult<()> {
        for spec in &self.specs {
            for up in spec.upstreams() {
                if self.get(up).is_none() {
                    return Err(CoreError::UnknownUpstream {
                        job: spec.name.clone(),
                        upstream: up.clone(),
                    });
                }
            }
        }
        self.topo_order().map(|_| ())
    }

    /// Kahn's algorithm over insertion order, so the result is stable
    /// across runs. Leftover nodes mean a cycle.
    pub fn topo_order(&self) -> CoreResult<Vec<JobName>> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
        for spec in &self.specs {
            indegree.entry(spec.name.as_str()).or_insert(0);
            for up in spec.upstreams() {
                *indegree.entry(spec.name.as_str()).or_insert(0) += 1;
                downstream
                    .entry(up.as_str())
                    .or_default()
                    .push(spec.name.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .specs
            .iter()
            .filter(|s| indegree[s.name.as_str()] == 0)
            .map(|s| s.name.as_str())
            .collect();

        let mut order = Vec::with_capacity(self.specs.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            for &down in downstream.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                let d = indegree.get_mut(down).expect("downstream node is registered");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(down);
                }
            }
        }

        if order.len() != self.specs.len() {
            let stuck = self
                .specs
                .iter()
                .find(|s| !order.contains(&s.name))
                .map(|s| s.name.clone())
                .unwrap_or_default();
            return Err(CoreError::CycleDetected { job: stuck });
        }
        Ok(order)
    }

    /// All jobs reachable downstream of `name`, including itself,
    /// in topological order. Drives targeted refresh-now.
    pub fn descendants(&self, name: &str) -> CoreResult<Vec<JobName>> {
        let order = self.topo_order()?;
        let mut reached: Vec<JobName> = Vec::new();
        for job in &order {
            if job == name
                || self
                    .get(job)
                    .map(|s| s.upstreams().iter().any(|u| reached.contains(u)))
                    .unwrap_or(false)
            {
                reached.push(job.clone());
            }
        }
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence(name: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            trigger: Trigger::Cadence { every_secs: 60 },
            staleness_target_secs: 300,
            hard_deadline_secs: 600,
        }
    }

    fn after(name: &str, upstream: &[&str]) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            trigger: Trigger::After {
                upstream: upstream.iter().map(|s| s.to_string()).collect(),
            },
            staleness_target_secs: 300,
            hard_deadline_secs: 600,
        }
    }

    #[test]
    fn topo_order_respects_edges() {
        let mut g = JobGraph::new();
        g.add(cadence("a"));
        g.add(after("b", &["a"]));
        g.add(after("c", &["a", "b"]));
        let order = g.topo_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut g = JobGraph::new();
        g.add(after("a", &["b"]));
        g.add(after("b", &["a"]));
        assert!(matches!(
            g.validate(),
            Err(CoreError::CycleDetected { .. })
        ));
    }

    #[test]
    fn unknown_upstream_is_rejected() {
        let mut g = JobGraph::new();
        g.add(after("a", &["ghost"]));
        assert!(matches!(
            g.validate(),
            Err(CoreError::UnknownUpstream { .. })
        ));
    }

    #[test]
    fn descendants_include_transitive_downstreams() {
        let mut g = JobGraph::new();
        g.add(cadence("root"));
        g.add(after("mid", &["root"]));
        g.add(after("leaf", &["mid"]));
        g.add(cadence("other"));
        let d = g.descendants("mid").unwrap();
        assert_eq!(d, vec!["mid", "leaf"]);
    }
}
