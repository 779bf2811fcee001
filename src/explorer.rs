//! Session-level orchestration of compile-and-execute requests.
//!
//! All graph mutation and propagation is synchronous; the only asynchronous
//! boundary is handing compiled IR to the engine. [`AnalysisSession`] keeps
//! that boundary single-flight per session: a request arriving while one is
//! running replaces any still-pending request, so only the latest pending
//! request runs once the current one completes, and a completion can be
//! recognized as stale when a newer request superseded it.

use crate::compiler;
use crate::error::GraphError;
use crate::graph::QueryGraph;
use crate::ir::StructuredQuery;
use crate::node::{NodeId, NodeState, TimeRangeMode};
use crate::services::SelectionService;

/// One analysis request handed to the host to run against the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTicket {
    pub node_id: NodeId,
    pub query: StructuredQuery,
    generation: u64,
}

/// The outcome of reporting a finished ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// A newer request arrived after this one started; its result should be
    /// discarded rather than displayed.
    pub stale: bool,
    /// The coalesced follow-up to run next, if one was pending.
    pub next: Option<AnalysisTicket>,
}

/// Single-flight, last-request-wins request coalescing.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    generation: u64,
    in_flight: Option<u64>,
    pending: Option<AnalysisTicket>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Compiles the node and requests an analysis run. `Some` means the host
    /// should execute the returned ticket now; `None` means either the node
    /// is not compilable, or a run is already in flight and this request was
    /// parked as the (single) pending follow-up.
    pub fn request(&mut self, graph: &QueryGraph, node_id: &NodeId) -> Option<AnalysisTicket> {
        let query = compiler::structured_query(graph, node_id)?;
        self.generation += 1;
        let ticket = AnalysisTicket {
            node_id: node_id.clone(),
            query,
            generation: self.generation,
        };
        if self.in_flight.is_some() {
            // Last request wins; any previously parked ticket is dropped.
            self.pending = Some(ticket);
            return None;
        }
        self.in_flight = Some(ticket.generation);
        Some(ticket)
    }

    /// Reports that a ticket's engine call finished. When a pending ticket
    /// exists it becomes the new in-flight run and is returned for execution.
    pub fn complete(&mut self, finished: &AnalysisTicket) -> Completion {
        if self.in_flight == Some(finished.generation) {
            self.in_flight = None;
        }
        let stale = finished.generation != self.generation;
        let next = self.pending.take().inspect(|ticket| {
            self.in_flight = Some(ticket.generation);
        });
        Completion { stale, next }
    }
}

/// Refreshes every dynamic TimeRange node from the host's current selection
/// (falling back to the full trace bounds), returning the refreshed node ids.
/// Call before compiling so time-dependent queries see the live span.
pub fn resolve_time_ranges(
    graph: &mut QueryGraph,
    selection: &dyn SelectionService,
) -> Result<Vec<NodeId>, GraphError> {
    let span = selection
        .current_time_span()
        .unwrap_or_else(|| selection.trace_bounds());
    let dynamic: Vec<NodeId> = graph
        .iter()
        .filter(|node| {
            matches!(
                &node.state,
                NodeState::TimeRange(s) if s.mode == TimeRangeMode::Dynamic
            )
        })
        .map(|node| node.id.clone())
        .collect();

    let mut refreshed = Vec::new();
    for id in dynamic {
        let batch = graph.update_state(&id, |state| {
            if let NodeState::TimeRange(s) = state {
                s.ts = Some(span.start);
                s.dur = Some(span.duration());
            }
        })?;
        refreshed.extend(batch);
    }
    Ok(refreshed)
}
