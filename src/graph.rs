use std::collections::{BTreeSet, HashMap};

use crate::program::{FuncId, Program};

pub type CallGraph = HashMap<FuncId, BTreeSet<FuncId>>;

/// Direct callees of every function.
pub fn call_graph(prog: &Program) -> CallGraph {
    prog.func_ids().map(|f| (f, prog.callees(f))).collect()
}

/// Direct callers of every function.
pub fn callers(prog: &Program) -> CallGraph {
    let mut callers: CallGraph = prog.func_ids().map(|f| (f, BTreeSet::new())).collect();
    for f in prog.func_ids() {
        for g in prog.callees(f) {
            callers.entry(g).or_default().insert(f);
        }
    }
    callers
}

/// Functions reachable from each function through one or more calls. A
/// function is its own transitive callee only when it is recursive.
pub fn transitive_callees(graph: &CallGraph) -> CallGraph {
    graph
        .iter()
        .map(|(f, direct)| {
            let mut reached = BTreeSet::new();
            let mut work: Vec<_> = direct.iter().copied().collect();
            while let Some(g) = work.pop() {
                if reached.insert(g) {
                    let succs = graph
                        .get(&g)
                        .unwrap_or_else(|| panic!("{:?} is not in the call graph", g));
                    work.extend(succs.iter().copied());
                }
            }
            (*f, reached)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;

    /// `f0 -> f1 -> f2`, `f3 -> f3`.
    fn chain() -> (Program, Vec<FuncId>) {
        let mut b = ProgramBuilder::new();
        let fs: Vec<_> = (0..4)
            .map(|i| b.function(&format!("f{}", i), Program::VOID))
            .collect();
        for (caller, callee) in [(0, 1), (1, 2), (3, 3)] {
            let body = b.body(fs[caller]);
            let call = b.call(fs[callee], vec![]);
            b.expr_stmt(body, call);
        }
        (b.finish(), fs)
    }

    #[test]
    fn test_transitive_callees() {
        let (prog, fs) = chain();
        let t = transitive_callees(&call_graph(&prog));
        assert_eq!(t[&fs[0]], [fs[1], fs[2]].into_iter().collect());
        assert_eq!(t[&fs[1]], [fs[2]].into_iter().collect());
        assert!(t[&fs[2]].is_empty());
        assert_eq!(t[&fs[3]], [fs[3]].into_iter().collect());
    }

    #[test]
    fn test_callers() {
        let (prog, fs) = chain();
        let callers = callers(&prog);
        assert!(callers[&fs[0]].is_empty());
        assert_eq!(callers[&fs[2]], [fs[1]].into_iter().collect());
        assert_eq!(callers[&fs[3]], [fs[3]].into_iter().collect());
    }
}
