//! Static subscription graph: cycle detection and Mermaid rendering.
//!
//! Nodes are event types and handlers. Edges run from an event type to each
//! handler subscribed to it, and from a handler to every type it declares it
//! may emit. A cycle means some finite input can grow the queue forever, so
//! wiring should be checked with [`Topology::validate`] before running.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Errors reported by topology validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The graph contains a cycle. `path` alternates type and handler names
    /// and starts and ends on the same type.
    #[error("subscription cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

#[derive(Debug, Clone)]
struct Handler {
    name: String,
    input_type: String,
    outputs: Vec<String>,
}

/// Declared subscriptions of an engine or reactor.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    handlers: Vec<Handler>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler consuming `input_type` and possibly emitting `outputs`.
    pub fn add_handler<I, S>(&mut self, name: &str, input_type: &str, outputs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handlers.push(Handler {
            name: name.to_string(),
            input_type: input_type.to_string(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        });
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Every type named as an input or an output, sorted.
    pub fn types(&self) -> BTreeSet<&str> {
        self.handlers
            .iter()
            .flat_map(|h| {
                std::iter::once(h.input_type.as_str()).chain(h.outputs.iter().map(String::as_str))
            })
            .collect()
    }

    fn subscribers(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut map: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, handler) in self.handlers.iter().enumerate() {
            map.entry(handler.input_type.as_str()).or_default().push(index);
        }
        map
    }

    /// Checks that the graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Cycle`] with the first cycle found, searching
    /// types in lexicographic order.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let subscribers = self.subscribers();
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut path: Vec<String> = Vec::new();

        for event_type in self.types() {
            if !marks.contains_key(event_type) {
                self.visit(event_type, &subscribers, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        event_type: &'a str,
        subscribers: &BTreeMap<&'a str, Vec<usize>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), TopologyError> {
        marks.insert(event_type, Mark::Visiting);
        path.push(event_type.to_string());

        for &index in subscribers.get(event_type).into_iter().flatten() {
            let handler = &self.handlers[index];
            path.push(handler.name.clone());
            for output in &handler.outputs {
                match marks.get(output.as_str()) {
                    Some(Mark::Visiting) => {
                        // Types sit at even indices; handlers at odd ones.
                        let start = path
                            .iter()
                            .step_by(2)
                            .position(|node| node == output)
                            .map(|i| i * 2)
                            .unwrap_or_default();
                        let mut cycle = path[start..].to_vec();
                        cycle.push(output.clone());
                        return Err(TopologyError::Cycle { path: cycle });
                    }
                    Some(Mark::Done) => {}
                    None => self.visit(output, subscribers, marks, path)?,
                }
            }
            path.pop();
        }

        path.pop();
        marks.insert(event_type, Mark::Done);
        Ok(())
    }

    /// Renders the graph as a Mermaid `graph TB` diagram.
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph TB".to_string()];
        for event_type in self.types() {
            lines.push(format!("    t_{}[\"{}\"]", node_id(event_type), event_type));
        }
        for (index, handler) in self.handlers.iter().enumerate() {
            lines.push(format!("    h{index}([\"{}\"])", handler.name));
        }
        for (index, handler) in self.handlers.iter().enumerate() {
            lines.push(format!(
                "    t_{} -->|handled by| h{index}",
                node_id(&handler.input_type)
            ));
            for output in &handler.outputs {
                lines.push(format!("    h{index} -->|emits| t_{}", node_id(output)));
            }
        }
        lines.join("\n") + "\n"
    }
}

fn node_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_subscribing_listener_is_a_cycle() {
        let mut topology = Topology::new();
        topology.add_handler("X", "T1", ["T1"]);

        let err = topology.validate().expect_err("X feeds itself");
        assert_eq!(
            err,
            TopologyError::Cycle {
                path: vec!["T1".to_string(), "X".to_string(), "T1".to_string()]
            }
        );
        assert_eq!(err.to_string(), "subscription cycle: T1 -> X -> T1");
    }

    #[test]
    fn layered_pipeline_is_acyclic() {
        let mut topology = Topology::new();
        topology.add_handler("A", "T1", ["T2"]);
        topology.add_handler("B", "T2", ["T3"]);
        topology.add_handler("C", "T3", Vec::<String>::new());
        assert_eq!(topology.validate(), Ok(()));
    }

    #[test]
    fn diamond_is_acyclic() {
        let mut topology = Topology::new();
        topology.add_handler("split-left", "Root", ["Left"]);
        topology.add_handler("split-right", "Root", ["Right"]);
        topology.add_handler("join-left", "Left", ["Joined"]);
        topology.add_handler("join-right", "Right", ["Joined"]);
        assert_eq!(topology.validate(), Ok(()));
    }

    #[test]
    fn indirect_cycle_reports_the_loop_only() {
        let mut topology = Topology::new();
        topology.add_handler("entry", "Start", ["A"]);
        topology.add_handler("a-to-b", "A", ["B"]);
        topology.add_handler("b-to-a", "B", ["A"]);

        let TopologyError::Cycle { path } = topology.validate().expect_err("A and B feed each other");
        assert_eq!(path, vec!["A", "a-to-b", "B", "b-to-a", "A"]);
    }

    #[test]
    fn types_include_outputs_without_subscribers() {
        let mut topology = Topology::new();
        topology.add_handler("A", "T1", ["T2"]);
        let types: Vec<&str> = topology.types().into_iter().collect();
        assert_eq!(types, vec!["T1", "T2"]);
    }

    #[test]
    fn mermaid_lists_nodes_and_edges() {
        let mut topology = Topology::new();
        topology.add_handler("hash-file", "FileItemScanned", ["ItemHashed"]);
        let diagram = topology.to_mermaid();

        assert!(diagram.starts_with("graph TB\n"));
        assert!(diagram.contains("t_FileItemScanned[\"FileItemScanned\"]"));
        assert!(diagram.contains("h0([\"hash-file\"])"));
        assert!(diagram.contains("t_FileItemScanned -->|handled by| h0"));
        assert!(diagram.contains("h0 -->|emits| t_ItemHashed"));
    }
}
