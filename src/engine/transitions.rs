//! Transition tables: static workflow topology over actions.
//!
//! A table maps the [`ActionResult`] of one action to the next action to
//! run. Edges are evaluated in registration order and the first matching
//! predicate wins; every action with outgoing edges must also register a
//! default edge so no workflow can get stuck on an unmatched result.
//! Tables are built once at startup and validated: unknown actions,
//! unreachable actions, and missing default edges are rejected.

use crate::engine::action::ActionResult;
use crate::engine::errors::{EngineError, EngineResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Predicate over an action result.
#[derive(Clone)]
pub enum TransitionPredicate {
    OnSuccess,
    OnFailure,
    /// Matches when `result.data[key] == value`.
    DataEquals { key: String, value: Value },
    /// Catch-all; the mandatory default edge uses this.
    Always,
    Custom(Arc<dyn Fn(&ActionResult) -> bool + Send + Sync>),
}

impl TransitionPredicate {
    pub fn matches(&self, result: &ActionResult) -> bool {
        match self {
            Self::OnSuccess => result.success,
            Self::OnFailure => !result.success,
            Self::DataEquals { key, value } => result.data(key) == Some(value),
            Self::Always => true,
            Self::Custom(f) => f(result),
        }
    }
}

impl fmt::Debug for TransitionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSuccess => write!(f, "OnSuccess"),
            Self::OnFailure => write!(f, "OnFailure"),
            Self::DataEquals { key, value } => write!(f, "DataEquals({key}={value})"),
            Self::Always => write!(f, "Always"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Where a matched edge leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    /// Run the named action next.
    Action(String),
    /// The workflow is finished.
    End,
}

/// One edge of the table.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from_action: String,
    pub predicate: TransitionPredicate,
    pub to: TransitionTarget,
}

/// Statically validated transition table for one workflow.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    initial_action: String,
    edges: Vec<Transition>,
}

impl TransitionTable {
    pub fn builder(initial_action: impl Into<String>) -> TransitionTableBuilder {
        TransitionTableBuilder {
            initial_action: initial_action.into(),
            edges: Vec::new(),
            defaults: HashSet::new(),
        }
    }

    pub fn initial_action(&self) -> &str {
        &self.initial_action
    }

    /// Select the next target for `from_action` given `result`. Order of
    /// predicates matters: the first matching edge wins. The mandatory
    /// default edge guarantees a match exists.
    pub fn next(&self, from_action: &str, result: &ActionResult) -> EngineResult<&TransitionTarget> {
        self.edges
            .iter()
            .filter(|t| t.from_action == from_action)
            .find(|t| t.predicate.matches(result))
            .map(|t| &t.to)
            .ok_or_else(|| EngineError::unknown_action(from_action))
    }
}

/// Builder collecting edges before validation.
pub struct TransitionTableBuilder {
    initial_action: String,
    edges: Vec<Transition>,
    defaults: HashSet<String>,
}

impl TransitionTableBuilder {
    /// Register an edge. Edges for one action match in registration order.
    pub fn edge(
        mut self,
        from: impl Into<String>,
        predicate: TransitionPredicate,
        to: TransitionTarget,
    ) -> Self {
        self.edges.push(Transition {
            from_action: from.into(),
            predicate,
            to,
        });
        self
    }

    pub fn on_success(self, from: impl Into<String>, to: TransitionTarget) -> Self {
        self.edge(from, TransitionPredicate::OnSuccess, to)
    }

    pub fn on_failure(self, from: impl Into<String>, to: TransitionTarget) -> Self {
        self.edge(from, TransitionPredicate::OnFailure, to)
    }

    /// Register the mandatory catch-all edge for an action. It is appended
    /// after that action's other edges regardless of call order.
    pub fn default_edge(mut self, from: impl Into<String>, to: TransitionTarget) -> Self {
        let from = from.into();
        self.defaults.insert(from.clone());
        self.edges.push(Transition {
            from_action: from,
            predicate: TransitionPredicate::Always,
            to,
        });
        self
    }

    /// Validate topology against the set of registered action names.
    ///
    /// Rejects: edges naming unregistered actions, actions without a
    /// default edge, and actions unreachable from the initial action.
    pub fn build(self, registered_actions: &HashSet<String>) -> EngineResult<TransitionTable> {
        if !registered_actions.contains(&self.initial_action) {
            return Err(EngineError::invalid_table(format!(
                "initial action '{}' is not registered",
                self.initial_action
            )));
        }

        let mut sources: HashSet<&str> = HashSet::new();
        for edge in &self.edges {
            sources.insert(edge.from_action.as_str());
            if !registered_actions.contains(&edge.from_action) {
                return Err(EngineError::invalid_table(format!(
                    "edge source '{}' is not a registered action",
                    edge.from_action
                )));
            }
            if let TransitionTarget::Action(to) = &edge.to {
                if !registered_actions.contains(to) {
                    return Err(EngineError::invalid_table(format!(
                        "edge target '{to}' is not a registered action"
                    )));
                }
            }
        }

        for source in &sources {
            if !self.defaults.contains(*source) {
                return Err(EngineError::invalid_table(format!(
                    "action '{source}' has no default edge; workflows could get stuck"
                )));
            }
        }

        // Reachability from the initial action over all edges.
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            if let TransitionTarget::Action(to) = &edge.to {
                adjacency
                    .entry(edge.from_action.as_str())
                    .or_default()
                    .push(to.as_str());
            }
        }
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([self.initial_action.as_str()]);
        while let Some(action) = queue.pop_front() {
            if reachable.insert(action) {
                if let Some(next) = adjacency.get(action) {
                    queue.extend(next.iter());
                }
            }
        }
        for source in &sources {
            if !reachable.contains(*source) {
                return Err(EngineError::invalid_table(format!(
                    "action '{source}' is unreachable from initial action '{}'",
                    self.initial_action
                )));
            }
        }

        // Sink each action's default edge below its specific edges so a
        // default declared early cannot shadow them. The sort is stable,
        // so specific edges keep their declared order.
        let mut edges = self.edges;
        let defaults = self.defaults;
        edges.sort_by_key(|e| {
            matches!(e.predicate, TransitionPredicate::Always) && defaults.contains(&e.from_action)
        });

        Ok(TransitionTable {
            initial_action: self.initial_action,
            edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actions(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn publish_table() -> TransitionTable {
        TransitionTable::builder("validate")
            .on_success("validate", TransitionTarget::Action("publish".into()))
            .default_edge("validate", TransitionTarget::Action("edit".into()))
            .on_success("publish", TransitionTarget::End)
            .default_edge("publish", TransitionTarget::Action("edit".into()))
            .default_edge("edit", TransitionTarget::Action("validate".into()))
            .build(&actions(&["validate", "publish", "edit"]))
            .unwrap()
    }

    #[test]
    fn test_first_matching_predicate_wins() {
        let table = publish_table();

        let ok = ActionResult::success("valid");
        assert_eq!(
            table.next("validate", &ok).unwrap(),
            &TransitionTarget::Action("publish".into())
        );

        let failed = ActionResult::failure("missing title");
        assert_eq!(
            table.next("validate", &failed).unwrap(),
            &TransitionTarget::Action("edit".into())
        );
    }

    #[test]
    fn test_data_predicate() {
        let table = TransitionTable::builder("triage")
            .edge(
                "triage",
                TransitionPredicate::DataEquals {
                    key: "severity".into(),
                    value: json!("high"),
                },
                TransitionTarget::Action("escalate".into()),
            )
            .default_edge("triage", TransitionTarget::End)
            .default_edge("escalate", TransitionTarget::End)
            .build(&actions(&["triage", "escalate"]))
            .unwrap();

        let high = ActionResult::success("found").with_data("severity", json!("high"));
        assert_eq!(
            table.next("triage", &high).unwrap(),
            &TransitionTarget::Action("escalate".into())
        );

        let low = ActionResult::success("found").with_data("severity", json!("low"));
        assert_eq!(table.next("triage", &low).unwrap(), &TransitionTarget::End);
    }

    #[test]
    fn test_missing_default_edge_rejected() {
        let err = TransitionTable::builder("validate")
            .on_success("validate", TransitionTarget::End)
            .build(&actions(&["validate"]))
            .unwrap_err();
        assert!(err.to_string().contains("no default edge"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = TransitionTable::builder("validate")
            .on_success("validate", TransitionTarget::Action("missing".into()))
            .default_edge("validate", TransitionTarget::End)
            .build(&actions(&["validate"]))
            .unwrap_err();
        assert!(err.to_string().contains("not a registered action"));
    }

    #[test]
    fn test_unreachable_action_rejected() {
        let err = TransitionTable::builder("a")
            .default_edge("a", TransitionTarget::End)
            .default_edge("orphan", TransitionTarget::End)
            .build(&actions(&["a", "orphan"]))
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn test_initial_action_must_be_registered() {
        let err = TransitionTable::builder("ghost")
            .default_edge("ghost", TransitionTarget::End)
            .build(&actions(&["other"]))
            .unwrap_err();
        assert!(err.to_string().contains("initial action"));
    }
}
