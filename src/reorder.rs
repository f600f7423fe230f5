//! Pluggable block-ordering strategies (spec.md §2 "Rewriter Orchestrator"
//! row: "run the chosen block-ordering strategy (pluggable)"). Treated as
//! a black-box extension point per spec.md §1's Non-goals: the core only
//! depends on the [`ReorderStrategy`] trait, never on a specific
//! heuristic's internals.

use crate::basic_block::BlockId;
use crate::callgraph::CallGraph;
use crate::function::Function;

pub trait ReorderStrategy {
    /// Returns the new block order (a permutation of `0..func.blocks.len()`).
    fn order(&self, func: &Function, call_graph: &CallGraph) -> Vec<BlockId>;
}

/// `-reorder-blocks=none`: keep creation order.
pub struct NoReorder;

impl ReorderStrategy for NoReorder {
    fn order(&self, func: &Function, _call_graph: &CallGraph) -> Vec<BlockId> {
        (0..func.blocks.len()).collect()
    }
}

/// `-reorder-blocks=reverse`: reverse creation order, excluding the entry
/// block (which must stay first).
pub struct ReverseReorder;

impl ReorderStrategy for ReverseReorder {
    fn order(&self, func: &Function, _call_graph: &CallGraph) -> Vec<BlockId> {
        if func.blocks.is_empty() {
            return Vec::new();
        }
        let mut order: Vec<BlockId> = (1..func.blocks.len()).rev().collect();
        order.insert(0, 0);
        order
    }
}

/// `-reorder-blocks=normal`: a single reverse post-order DFS from the
/// entry block, falling through to unvisited successors depth-first --
/// the simplest layout that keeps taken-branch targets close to their
/// source.
pub struct NormalReorder;

impl ReorderStrategy for NormalReorder {
    fn order(&self, func: &Function, _call_graph: &CallGraph) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(func.blocks.len());
        let mut visited = vec![false; func.blocks.len()];
        let mut stack: Vec<BlockId> = func.entry_points.iter().filter_map(|&off| func.block_containing_offset(off)).collect();
        if stack.is_empty() && !func.blocks.is_empty() {
            stack.push(0);
        }
        while let Some(id) = stack.pop() {
            if visited[id] {
                continue;
            }
            visited[id] = true;
            order.push(id);
            for &succ in func.blocks[id].successors.iter().rev() {
                if !visited[succ] {
                    stack.push(succ);
                }
            }
        }
        for id in 0..func.blocks.len() {
            if !visited[id] {
                order.push(id);
            }
        }
        order
    }
}

/// `-reorder-blocks=cache`: greedily places the highest-weight unplaced
/// successor immediately after each block (spec.md §8 S2: "must place B1
/// immediately after B0" when `B0->B1` outweighs `B0->B2`).
pub struct CacheReorder;

impl ReorderStrategy for CacheReorder {
    fn order(&self, func: &Function, _call_graph: &CallGraph) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(func.blocks.len());
        let mut placed = vec![false; func.blocks.len()];
        let mut frontier: Vec<BlockId> = func.entry_points.iter().filter_map(|&off| func.block_containing_offset(off)).collect();
        if frontier.is_empty() && !func.blocks.is_empty() {
            frontier.push(0);
        }

        while let Some(id) = frontier.pop() {
            if placed[id] {
                continue;
            }
            placed[id] = true;
            order.push(id);

            let mut candidates: Vec<(BlockId, u64)> = func.blocks[id]
                .successors
                .iter()
                .zip(func.blocks[id].branch_info.iter())
                .filter(|(&s, _)| !placed[s])
                .map(|(&s, info)| (s, info.count))
                .collect();
            candidates.sort_by(|a, b| b.1.cmp(&a.1));

            if let Some(&(hottest, _)) = candidates.first() {
                frontier.push(hottest);
            }
            for &(other, _) in candidates.iter().skip(1) {
                frontier.insert(0, other);
            }
        }

        for id in 0..func.blocks.len() {
            if !placed[id] {
                order.push(id);
            }
        }
        order
    }
}

/// `-reorder-blocks=branch-predictor`: like cache, but additionally moves
/// cold (zero-execution-count) blocks to the end regardless of the
/// greedy walk's placement, matching the goal "reduce mispredicted
/// fall-throughs seen by the branch predictor" without needing a full
/// cost model in this scoped implementation.
pub struct BranchPredictorReorder;

impl ReorderStrategy for BranchPredictorReorder {
    fn order(&self, func: &Function, call_graph: &CallGraph) -> Vec<BlockId> {
        let base = CacheReorder.order(func, call_graph);
        let (hot, cold): (Vec<BlockId>, Vec<BlockId>) = base.into_iter().partition(|&id| func.blocks[id].execution_count > 0);
        hot.into_iter().chain(cold).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_block::{BasicBlock, BranchInfo};

    fn s2_function() -> Function {
        let mut f = Function::new("f".into(), 0x2000, 11, 11);
        f.blocks.push(BasicBlock::new("BB0".into(), 0));
        f.blocks.push(BasicBlock::new("BB1".into(), 9));
        f.blocks.push(BasicBlock::new("BB2".into(), 10));
        f.blocks[0].successors = vec![1, 2];
        f.blocks[0].branch_info = vec![
            BranchInfo { count: 100, mispredicted_count: 0 },
            BranchInfo { count: 10, mispredicted_count: 0 },
        ];
        f.layout = vec![0, 1, 2];
        f
    }

    #[test]
    fn cache_reorder_places_hottest_successor_immediately_after() {
        let f = s2_function();
        let cg = CallGraph::new();
        let order = CacheReorder.order(&f, &cg);
        let pos0 = order.iter().position(|&b| b == 0).unwrap();
        let pos1 = order.iter().position(|&b| b == 1).unwrap();
        assert_eq!(pos1, pos0 + 1);
    }

    #[test]
    fn reverse_reorder_keeps_entry_first() {
        let f = s2_function();
        let cg = CallGraph::new();
        let order = ReverseReorder.order(&f, &cg);
        assert_eq!(order[0], 0);
        assert_eq!(order[1..], [2, 1]);
    }
}
