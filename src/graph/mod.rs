//! The processing graph: a small dataflow network of typed nodes connecting
//! observers to decoders to the instantiator, scheduled under the same
//! main-thread time budget the expansion scheduler respects.
//!
//! Nodes only ever see work they're ready for (`ready_for_data`) and are
//! polled for main-thread-bound work (`schedule_main_thread`) up to a time
//! budget per tick — back-pressure happens naturally because a node that
//! isn't ready simply isn't ticked, so its upstream producer's output queue
//! grows until the consumer catches up.

pub mod multiplex;

use std::time::Duration;

/// A single stage in the processing graph.
pub trait GraphNode {
    /// Whether this node has buffered input ready to process.
    fn ready_for_data(&self) -> bool;

    /// Whether this node wants main-thread time this tick at all.
    fn schedule_main_thread(&self) -> bool {
        self.ready_for_data()
    }

    /// Do as much work as fits in `budget`. Returns the time actually
    /// spent, so the graph scheduler can subtract it from the remaining
    /// tick budget.
    fn main_thread_process(&mut self, budget: Duration) -> Duration;
}

/// Runs each registered node in order, once per tick, until the tick's time
/// budget is exhausted. Nodes are visited in a fixed order (the order
/// they're registered in) rather than round-robin, matching a simple
/// dataflow pipeline's natural stage ordering.
pub struct ProcessingGraph {
    nodes: Vec<Box<dyn GraphNode>>,
}

impl ProcessingGraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add_node(&mut self, node: Box<dyn GraphNode>) {
        self.nodes.push(node);
    }

    /// Process every ready node once, stopping early once `budget` is
    /// exhausted. Returns the number of nodes actually given time.
    pub fn tick(&mut self, budget: Duration) -> usize {
        let mut remaining = budget;
        let mut serviced = 0;
        for node in &mut self.nodes {
            if remaining.is_zero() {
                break;
            }
            if !node.schedule_main_thread() {
                continue;
            }
            let spent = node.main_thread_process(remaining);
            remaining = remaining.saturating_sub(spent);
            serviced += 1;
        }
        serviced
    }
}

impl Default for ProcessingGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingNode {
        calls: usize,
        cost: Duration,
    }

    impl GraphNode for CountingNode {
        fn ready_for_data(&self) -> bool {
            true
        }
        fn main_thread_process(&mut self, _budget: Duration) -> Duration {
            self.calls += 1;
            self.cost
        }
    }

    #[test]
    fn stops_once_budget_is_exhausted() {
        let mut graph = ProcessingGraph::new();
        graph.add_node(Box::new(CountingNode {
            calls: 0,
            cost: Duration::from_millis(5),
        }));
        graph.add_node(Box::new(CountingNode {
            calls: 0,
            cost: Duration::from_millis(5),
        }));

        let serviced = graph.tick(Duration::from_millis(6));
        assert_eq!(serviced, 1);
    }

    struct NeverReady;
    impl GraphNode for NeverReady {
        fn ready_for_data(&self) -> bool {
            false
        }
        fn main_thread_process(&mut self, _budget: Duration) -> Duration {
            panic!("should never be scheduled");
        }
    }

    #[test]
    fn unready_nodes_are_skipped() {
        let mut graph = ProcessingGraph::new();
        graph.add_node(Box::new(NeverReady));
        let serviced = graph.tick(Duration::from_millis(10));
        assert_eq!(serviced, 0);
    }
}
