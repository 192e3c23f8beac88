use super::*;

fn sample() -> (Program, FuncId, VarId, VarId) {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let f = b.function("f", Program::VOID);
    let body = b.body(f);
    let p = b.local(body, "p", pint);
    let e = b.addr_of(x);
    b.assign(body, Lhs::new(p), e);
    (b.finish(), f, x, p)
}

#[test]
fn test_sentinels() {
    let (prog, _, x, _) = sample();
    assert!(Program::is_special(Program::NULL));
    assert!(Program::is_special(Program::GARBAGE));
    assert!(Program::is_special(Program::TBD));
    assert!(!Program::is_special(x));
    assert_eq!(prog.name(Program::NULL), "null");
}

#[test]
fn test_scopes() {
    let (prog, f, x, p) = sample();
    assert!(prog.is_global(x));
    assert!(prog.is_local(p));
    assert!(prog.is_pointer(p));
    assert!(prog.is_visible_in(x, prog[f].body));
    assert!(prog.is_visible_in(p, prog[f].body));
    assert_eq!(prog.scope(prog[f].rv), Scope::ReturnValue(f));
}

#[test]
fn test_type_sizes() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let long = b.long();
    let pint = b.pointer(int);
    let s = b.struct_type(vec![Field::new(int), Field::new(long)]);
    let u = b.union_type(vec![Field::new(int), Field::new(pint)]);
    let bf = b.struct_type(vec![Field::bitfield(int, 3)]);
    let prog = b.finish();
    assert_eq!(prog.size_in_bytes(int), Some(4));
    assert_eq!(prog.size_in_bytes(pint), Some(8));
    assert_eq!(prog.size_in_bytes(s), Some(16));
    assert_eq!(prog.size_in_bytes(u), Some(8));
    assert_eq!(prog.size_in_bytes(bf), None);
    assert_eq!(prog.size_in_bytes(Program::VOID), None);
    assert!(prog.has_tracked_facts(u));
    assert!(!prog.has_tracked_facts(s));
}

#[test]
fn test_fields_and_unions() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let u = b.union_type(vec![Field::new(int), Field::new(pint)]);
    let s = b.struct_type(vec![Field::new(int), Field::new(u)]);
    let g = b.global("g", s);
    b.set_volatile(g, 0);
    let prog = b.finish();

    let inner = prog[g].fields[1];
    let leaf = prog[inner].fields[1];
    assert!(prog.is_union_field(leaf));
    assert!(!prog.is_union_field(inner));
    assert_eq!(prog.enclosing_unions(leaf), vec![(inner, 1)]);
    assert!(prog.is_within(leaf, g));
    assert!(!prog.is_within(g, leaf));
    assert_eq!(prog.root_var(leaf), g);
    assert!(prog.is_volatile(leaf));
    assert!(prog.is_global(leaf));
    assert_eq!(prog.derived_vars(g).len(), 5);
}

#[test]
fn test_array_members() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let a = b.global_array("a", int, vec![4]);
    let i = b.global("i", int);
    let a0 = b.member(a, vec![Index::Const(0)]);
    let a1 = b.member(a, vec![Index::Const(1)]);
    let ai = b.member(a, vec![Index::Var(i)]);
    assert_eq!(b.member(a, vec![Index::Const(0)]), a0);
    let prog = b.finish();

    assert_eq!(prog.get_collective(a0), a);
    assert!(prog.is_itemized(a0));
    assert!(!prog.is_itemized(a));
    assert!(prog.loose_match(a0, a));
    assert!(!prog.loose_match(a0, a1));
    assert!(prog.loose_match(a0, ai));
    assert_eq!(prog.index_vars(ai), vec![i]);
    assert_eq!(prog.name(ai), "a[i]");
}

#[test]
fn test_cfg_edges() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let f = b.function("f", Program::VOID);
    let body = b.body(f);
    let i = b.local(body, "i", int);
    let x = b.local(body, "x", int);
    let c = b.constant(int, 0);
    let head = b.assign(body, Lhs::new(x), c);
    let (lp, lbody) = b.for_stmt(body, i, 0, 3);
    let c = b.var(x);
    let brk = b.break_stmt(lbody, c);
    let c = b.var(x);
    let cont = b.continue_stmt(lbody, c);
    let c = b.var(x);
    let back = b.goto(body, c, None);
    b.set_goto_dest(back, head);
    let prog = b.finish();

    assert_eq!(prog.func_stmts(f), vec![head, lp, brk, cont, back]);
    assert!(prog.stmt_order(head) < prog.stmt_order(back));
    assert!(prog[lbody].is_looping());
    let edges = prog.cfg_edges(f);
    assert_eq!(edges.len(), 3);
    assert!(edges.contains(&CfgEdge {
        src: brk,
        dest: lp,
        kind: EdgeKind::Break,
        back: false
    }));
    assert!(edges.contains(&CfgEdge {
        src: cont,
        dest: lp,
        kind: EdgeKind::Continue,
        back: true
    }));
    assert!(edges.contains(&CfgEdge {
        src: back,
        dest: head,
        kind: EdgeKind::Goto,
        back: true
    }));
}

#[test]
fn test_callees() {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let g = b.function("g", int);
    let h = b.function("h", int);
    let f = b.function("f", Program::VOID);
    let body = b.body(f);
    let cg = b.call(g, vec![]);
    let ch = b.call(h, vec![]);
    let sum = b.binary(BinOp::Add, cg, ch);
    b.expr_stmt(body, sum);
    let prog = b.finish();

    assert_eq!(prog.callees(f).into_iter().collect::<Vec<_>>(), vec![g, h]);
    assert!(prog.has_call(sum));
    assert!(prog.callees(g).is_empty());
    assert_eq!(prog.func_by_name("h"), Some(h));
}
