use super::*;
use crate::{
    error::GenError,
    facts::*,
    options::Options,
    program::*,
    scenarios,
};

fn run(prog: &Program, opts: &Options) -> Result<Report, GenError> {
    let arena = FactArena::new();
    let mut analyzer = Analyzer::new(prog, &arena, opts);
    analyzer.analyze_program()
}

fn var(prog: &Program, name: &str) -> VarId {
    VarId(prog.vars.iter().position(|v| v.name == name).unwrap())
}

fn func(prog: &Program, name: &str) -> FuncId {
    prog.func_by_name(name).unwrap()
}

fn pointees(env: &FactEnv<'_>, v: VarId) -> Vec<VarId> {
    env.point_to(v).map(|f| f.point_to.clone()).unwrap_or_default()
}

#[test]
fn test_permutations() {
    assert_eq!(permutations(0), vec![Vec::<usize>::new()]);
    let mut perms = permutations(3);
    assert_eq!(perms.len(), 6);
    perms.sort();
    perms.dedup();
    assert_eq!(perms.len(), 6);
}

#[test]
fn test_null_deref() {
    let prog = scenarios::null_deref();
    let report = run(&prog, &Options::default()).unwrap();
    assert!(report.function("main").unwrap().rejected);

    let opts = Options {
        null_pointer_dereference_prob: 100,
        ..Options::default()
    };
    let report = run(&prog, &opts).unwrap();
    let main = report.function("main").unwrap();
    assert!(!main.rejected);
    assert_eq!(main.visits, 1);
}

#[test]
fn test_unordered_calls() {
    let prog = scenarios::unordered_calls(false);
    let report = run(&prog, &Options::default()).unwrap();
    assert!(!report.function("main").unwrap().rejected);

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let main = func(&prog, "main");
    let StmtKind::Expr(sum) = prog[prog[prog[main].body].stmts[0]].kind else {
        panic!()
    };
    let Expr::Call(inv) = &prog[sum] else {
        panic!()
    };
    let (cf, cg) = (inv.args[0], inv.args[1]);

    let env = analyzer.initial_facts();
    let mut ctx = analyzer.context(main);
    let fg = analyzer
        .visit_unordered_params(&[cf, cg], &env, &mut ctx)
        .unwrap();
    let gf = analyzer
        .visit_unordered_params(&[cg, cf], &env, &mut ctx)
        .unwrap();
    assert_eq!(fg, gf);
    assert_eq!(pointees(&fg, var(&prog, "p")), vec![var(&prog, "x")]);
    assert_eq!(pointees(&fg, var(&prog, "q")), vec![var(&prog, "y")]);

    let accum = ctx.accum().unwrap();
    assert!(accum.is_written(var(&prog, "p"), &prog));
    assert!(accum.is_written(var(&prog, "q"), &prog));
}

#[test]
fn test_racing_calls() {
    let prog = scenarios::unordered_calls(true);
    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let report = analyzer.analyze_program().unwrap();
    assert!(report.function("main").unwrap().rejected);

    let f = analyzer.summary(func(&prog, "f"));
    let g = analyzer.summary(func(&prog, "g"));
    assert!(f.built && g.built);
    assert!(f.feffect.has_race_with(&g.feffect, &prog));

    let main = func(&prog, "main");
    let StmtKind::Expr(sum) = prog[prog[prog[main].body].stmts[0]].kind else {
        panic!()
    };
    let Expr::Call(inv) = &prog[sum] else {
        panic!()
    };
    let env = analyzer.initial_facts();
    let ctx = analyzer.context(main);
    assert!(analyzer.combine_operands(&inv.args, &env, &ctx).is_err());
}

#[test]
fn test_loop_fixed_point() {
    let prog = scenarios::loop_program();
    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let report = analyzer.analyze_program().unwrap();

    let main = func(&prog, "main");
    let lp = prog
        .func_stmts(main)
        .into_iter()
        .find(|s| matches!(prog[*s].kind, StmtKind::For(_)))
        .unwrap();
    let fm = analyzer.fm(main);
    assert_eq!(fm.loop_visits(lp), 3);

    let (x, y) = (var(&prog, "x"), var(&prog, "y"));
    let out = fm.final_fact_out(lp).unwrap();
    assert_eq!(pointees(out, var(&prog, "p")), vec![x, y]);
    assert_eq!(pointees(out, var(&prog, "q")), vec![x, y]);

    let main = report.function("main").unwrap();
    assert_eq!(
        main.assertions[0],
        vec!["p == &y".to_string(), "q == &y".to_string()]
    );
}

#[test]
fn test_fixed_point_limit() {
    let prog = scenarios::loop_program();
    let opts = Options {
        max_fixed_point_iterations: 1,
        ..Options::default()
    };
    assert_eq!(
        run(&prog, &opts).unwrap_err(),
        GenError::FixedPointDiverged { iterations: 1 }
    );
}

#[test]
fn test_union_fields() {
    let prog = scenarios::union_program();
    let report = run(&prog, &Options::default()).unwrap();
    let main = report.function("main").unwrap();
    assert!(!main.rejected);
    assert!(main.assertions.iter().flatten().any(|a| a == "u.f1 == &x"));
    assert!(report.function("peek").unwrap().rejected);
}

#[test]
fn test_backward_goto() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let y = b.global("y", int);
    let p = b.global("p", pint);
    let q = b.global("q", pint);
    for v in [p, q] {
        let addr = b.addr_of(y);
        b.set_init(v, addr);
    }
    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let read_q = b.var(q);
    let s0 = b.assign(body, Lhs::new(p), read_q);
    let addr = b.addr_of(x);
    b.assign(body, Lhs::new(q), addr);
    let cond = b.constant(int, 1);
    b.goto(body, cond, Some(s0));
    let prog = b.finish();

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    analyzer.analyze_program().unwrap();
    let facts = analyzer.fm(main).final_fact_in(s0).unwrap();
    assert_eq!(pointees(facts, p), vec![x, y]);
    assert_eq!(pointees(facts, q), vec![x, y]);
}

#[test]
fn test_call_memoization() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);

    let g = b.function("g", Program::VOID);
    let body = b.body(g);
    let one = b.constant(int, 1);
    b.assign(body, Lhs::new(x), one);

    let h = b.function("h", Program::VOID);
    let a = b.param(h, "a", pint);
    let body = b.body(h);
    let one = b.constant(int, 1);
    b.assign(body, Lhs::deref(a, 1), one);

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    for _ in 0..2 {
        let call = b.call(g, vec![]);
        b.expr_stmt(body, call);
        let addr = b.addr_of(x);
        let call = b.call(h, vec![addr]);
        b.expr_stmt(body, call);
    }
    let prog = b.finish();

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let report = analyzer.analyze_program().unwrap();
    assert!(!report.function("main").unwrap().rejected);

    assert!(!analyzer.summary(g).needs_revisit());
    assert_eq!(analyzer.summary(g).visited_cnt, 1);
    assert!(analyzer.summary(h).pointer_referenced);
    assert_eq!(analyzer.summary(h).visited_cnt, 2);
    assert!(analyzer.summary(main).pointer_referenced);
    assert!(analyzer.summary(main).feffect.is_written(x, &prog));
}

#[test]
fn test_recursion_without_summary() {
    let mut b = ProgramBuilder::new();
    let f = b.function("f", Program::VOID);
    let body = b.body(f);
    let call = b.call(f, vec![]);
    b.expr_stmt(body, call);
    let prog = b.finish();

    let report = run(&prog, &Options::default()).unwrap();
    assert!(report.function("f").unwrap().rejected);
}

#[test]
fn test_revisit_depth() {
    let mut b = ProgramBuilder::new();
    let fs: Vec<_> = (0..3)
        .map(|i| b.function(&format!("f{}", i), Program::VOID))
        .collect();
    for w in fs.windows(2) {
        let body = b.body(w[0]);
        let call = b.call(w[1], vec![]);
        b.expr_stmt(body, call);
    }
    let prog = b.finish();

    let opts = Options {
        max_revisit_depth: 2,
        ..Options::default()
    };
    assert_eq!(
        run(&prog, &opts).unwrap_err(),
        GenError::RevisitDepthExceeded {
            func: "f2".to_string(),
            depth: 2
        }
    );
    assert!(run(&prog, &Options::default()).is_ok());
}

#[test]
fn test_depth_limits() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let x = b.global("x", int);
    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let (_, inner) = b.nested_block(body);
    let read = b.var(x);
    let one = b.constant(int, 1);
    let sum = b.binary(BinOp::Add, read, one);
    let one = b.constant(int, 1);
    let sum = b.binary(BinOp::Add, sum, one);
    b.expr_stmt(inner, sum);
    let prog = b.finish();

    let opts = Options {
        max_blk_depth: 1,
        ..Options::default()
    };
    assert_eq!(
        run(&prog, &opts).unwrap_err(),
        GenError::DepthExceeded { depth: 2, limit: 1 }
    );
    let opts = Options {
        max_expr_depth: 1,
        ..Options::default()
    };
    assert_eq!(
        run(&prog, &opts).unwrap_err(),
        GenError::ExprDepthExceeded { depth: 2, limit: 1 }
    );
    assert!(run(&prog, &Options::default()).is_ok());
}

#[test]
fn test_choose_stmt() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let p = b.global("p", pint);
    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let (bad, inner) = b.nested_block(body);
    let one = b.constant(int, 1);
    let first = b.assign(inner, Lhs::new(x), one);
    let deref = b.deref(p, 1);
    b.assign(inner, Lhs::new(x), deref);
    let addr = b.addr_of(x);
    let good = b.assign(body, Lhs::new(p), addr);
    let prog = b.finish();

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let env = analyzer.initial_facts();
    assert_eq!(pointees(&env, p), vec![Program::NULL]);
    let mut ctx = analyzer.context(main);
    let (chosen, out) = analyzer.choose_stmt(&[bad, good], &env, &mut ctx).unwrap();
    assert_eq!(chosen, good);
    assert_eq!(pointees(&out, p), vec![x]);
    assert!(analyzer.fm(main).fact_out(first).is_none());
    assert!(analyzer.fm(main).fact_out(good).is_some());
    assert_eq!(ctx.accum().unwrap().write_vars(), &[p]);
    assert!(analyzer.choose_stmt(&[bad], &env, &mut ctx).is_err());
}

#[test]
fn test_returned_pointers() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let p = b.global("p", pint);

    let f = b.function("f", pint);
    let body = b.body(f);
    let l = b.local(body, "l", int);
    b.ret(body, Some(ExprVar { var: l, indirect: -1 }));

    let g = b.function("g", pint);
    let body = b.body(g);
    b.ret(body, Some(ExprVar { var: x, indirect: -1 }));

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let call = b.call(g, vec![]);
    let s = b.assign(body, Lhs::new(p), call);
    let prog = b.finish();

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let report = analyzer.analyze_program().unwrap();
    assert!(report.function("f").unwrap().rejected);
    assert!(!report.function("main").unwrap().rejected);

    let rv = prog[g].rv;
    let fact = analyzer
        .return_facts()
        .get_return_fact_for_invocation(call, rv, Category::PointTo)
        .unwrap();
    assert_eq!(fact.as_point_to().unwrap().point_to, vec![x]);
    let out = analyzer.fm(main).final_fact_out(s).unwrap();
    assert_eq!(pointees(out, p), vec![x]);
    assert!(out.point_to(rv).is_none());
}

#[test]
fn test_union_sibling_pointers() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let ut = b.union_type(vec![Field::new(pint), Field::new(pint)]);
    let x = b.global("x", int);
    let u = b.global("u", ut);
    let (fa, fb) = (b.field(u, 0), b.field(u, 1));
    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let addr = b.addr_of(x);
    b.assign(body, Lhs::new(fa), addr);
    let zero = b.constant(pint, 0);
    let s1 = b.assign(body, Lhs::new(fb), zero);
    let one = b.constant(int, 1);
    b.assign(body, Lhs::deref(fa, 1), one);
    let prog = b.finish();

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let report = analyzer.analyze_program().unwrap();
    assert!(report.function("main").unwrap().rejected);
    let out = analyzer.fm(main).fact_out(s1).unwrap();
    assert_eq!(pointees(out, fa), vec![Program::NULL]);
    assert_eq!(pointees(out, fb), vec![Program::NULL]);
    assert_eq!(out.union_field(u), Some(UnionField::Field(1)));

    let opts = Options {
        null_pointer_dereference_prob: 100,
        ..Options::default()
    };
    let report = run(&prog, &opts).unwrap();
    assert!(!report.function("main").unwrap().rejected);
}

#[test]
fn test_rejected_candidate_rollback() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let p = b.global("p", pint);

    let f = b.function("f", Program::VOID);
    let body = b.body(f);
    let one = b.constant(int, 1);
    let sf = b.assign(body, Lhs::new(x), one);

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let call = b.call(f, vec![]);
    let deref = b.deref(p, 1);
    let sum = b.binary(BinOp::Add, call, deref);
    let bad = b.expr_stmt(body, sum);
    let addr = b.addr_of(x);
    let good = b.assign(body, Lhs::new(p), addr);
    let prog = b.finish();

    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let env = analyzer.initial_facts();
    let mut ctx = analyzer.context(main);
    let (chosen, _) = analyzer.choose_stmt(&[bad, good], &env, &mut ctx).unwrap();
    assert_eq!(chosen, good);

    let summary = analyzer.summary(f);
    assert!(!summary.built);
    assert_eq!(summary.visited_cnt, 0);
    assert!(summary.feffect.is_empty());
    assert!(analyzer.fm(f).fact_out(sf).is_none());
    assert!(!analyzer.return_facts().contains(call));
    assert!(analyzer.fm(main).fact_out(bad).is_none());
}

#[test]
fn test_operand_trials_leave_no_trace() {
    let prog = scenarios::unordered_calls(false);
    let arena = FactArena::new();
    let opts = Options::default();
    let mut analyzer = Analyzer::new(&prog, &arena, &opts);
    let main = func(&prog, "main");
    let StmtKind::Expr(sum) = prog[prog[prog[main].body].stmts[0]].kind else {
        panic!()
    };
    let Expr::Call(inv) = &prog[sum] else {
        panic!()
    };
    let env = analyzer.initial_facts();
    let ctx = analyzer.context(main);
    assert!(analyzer.combine_operands(&inv.args, &env, &ctx).is_ok());
    for name in ["f", "g"] {
        let summary = analyzer.summary(func(&prog, name));
        assert!(!summary.built);
        assert_eq!(summary.visited_cnt, 0);
    }
    assert!(!analyzer.return_facts().contains(inv.args[0]));
}
