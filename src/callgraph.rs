//! A minimal call graph (SPEC_FULL.md §14), grounded in the reference
//! implementation's `Passes/CallGraph.h`: nodes are functions (identified
//! by address), arcs are call-site edges carrying a profile weight. Built
//! once, read-only, as a by-product of lifting so pluggable block-ordering
//! strategies can consult cross-function call frequency; the core never
//! mutates it after construction.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Arc {
    pub caller: u64,
    pub callee: u64,
    pub weight: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// function address -> outgoing arcs.
    out_arcs: BTreeMap<u64, Vec<Arc>>,
    /// function address -> incoming arcs.
    in_arcs: BTreeMap<u64, Vec<Arc>>,
}

impl CallGraph {
    pub fn new() -> CallGraph {
        CallGraph::default()
    }

    pub fn add_call(&mut self, caller: u64, callee: u64, weight: u64) {
        let arc = Arc { caller, callee, weight };
        if let Some(existing) = self.out_arcs.entry(caller).or_default().iter_mut().find(|a| a.callee == callee) {
            existing.weight += weight;
        } else {
            self.out_arcs.entry(caller).or_default().push(arc);
        }
        if let Some(existing) = self.in_arcs.entry(callee).or_default().iter_mut().find(|a| a.caller == caller) {
            existing.weight += weight;
        } else {
            self.in_arcs.entry(callee).or_default().push(arc);
        }
    }

    pub fn callees(&self, function: u64) -> &[Arc] {
        self.out_arcs.get(&function).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn callers(&self, function: u64) -> &[Arc] {
        self.in_arcs.get(&function).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total weight of calls into `function`, the figure ordering
    /// strategies most often want (hottest-callee-first heuristics).
    pub fn total_incoming_weight(&self, function: u64) -> u64 {
        self.callers(function).iter().map(|a| a.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_calls_accumulate_weight() {
        let mut cg = CallGraph::new();
        cg.add_call(0x1000, 0x2000, 10);
        cg.add_call(0x1000, 0x2000, 5);
        assert_eq!(cg.callees(0x1000), &[Arc { caller: 0x1000, callee: 0x2000, weight: 15 }]);
        assert_eq!(cg.total_incoming_weight(0x2000), 15);
    }

    #[test]
    fn unknown_function_has_no_arcs() {
        let cg = CallGraph::new();
        assert!(cg.callees(0xdead).is_empty());
    }
}
