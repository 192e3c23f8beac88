use super::*;

struct Vars {
    prog: Program,
    x: VarId,
    c: VarId,
    v: VarId,
    u: VarId,
    s: VarId,
    l: VarId,
    body: BlockId,
}

fn vars() -> Vars {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let un = b.union_type(vec![Field::new(int), Field::new(pint)]);
    let st = b.struct_type(vec![Field::new(int), Field::new(int)]);
    let x = b.global("x", int);
    let c = b.global("c", int);
    b.set_const(c, 0);
    let v = b.global("v", int);
    b.set_volatile(v, 0);
    let u = b.global("u", un);
    let s = b.global("s", st);
    let f = b.function("f", Program::VOID);
    let body = b.body(f);
    let l = b.local(body, "l", int);
    Vars {
        prog: b.finish(),
        x,
        c,
        v,
        u,
        s,
        l,
        body,
    }
}

#[test]
fn test_empty() {
    let e = Effect::new();
    assert!(e.is_pure());
    assert!(e.is_side_effect_free());
    assert!(e.is_empty());
}

#[test]
fn test_purity() {
    let vs = vars();
    let prog = &vs.prog;

    let mut e = Effect::new();
    e.read_var(vs.c, prog);
    assert!(e.is_pure());
    e.read_var(vs.x, prog);
    assert!(!e.is_pure());
    assert!(e.is_side_effect_free());

    let mut e = Effect::new();
    e.write_var(vs.x, prog);
    assert!(!e.is_pure());
    assert!(e.is_side_effect_free());

    let mut e = Effect::new();
    e.read_var(vs.v, prog);
    assert!(!e.is_side_effect_free());
    e.clear();
    assert!(e.is_empty() && e.is_pure() && e.is_side_effect_free());
}

#[test]
fn test_add_effect_conjunction() {
    let vs = vars();
    let prog = &vs.prog;
    let mut reads_c = Effect::new();
    reads_c.read_var(vs.c, prog);
    let mut reads_x = Effect::new();
    reads_x.read_var(vs.x, prog);
    let mut writes_v = Effect::new();
    writes_v.write_var(vs.v, prog);

    let effects = [Effect::new(), reads_c, reads_x, writes_v];
    for a in &effects {
        for b in &effects {
            let mut sum = a.clone();
            sum.add_effect(b, false);
            assert_eq!(sum.is_pure(), a.is_pure() && b.is_pure());
            assert_eq!(
                sum.is_side_effect_free(),
                a.is_side_effect_free() && b.is_side_effect_free()
            );
            if a.write_vars().contains(&vs.v) || b.write_vars().contains(&vs.v) {
                assert!(!sum.is_side_effect_free());
            }
        }
    }
}

#[test]
fn test_lhs_effects() {
    let vs = vars();
    let prog = &vs.prog;
    let mut e = Effect::new();
    e.write_lhs_var(vs.x, prog);
    let mut sum = Effect::new();
    sum.add_effect(&e, false);
    assert!(sum.lhs_write_vars().is_empty());
    sum.add_effect(&e, true);
    assert_eq!(sum.lhs_write_vars(), &[vs.x]);
}

#[test]
fn test_external_effect() {
    let vs = vars();
    let prog = &vs.prog;
    let mut callee = Effect::new();
    callee.write_var(vs.x, prog);
    callee.write_var(vs.l, prog);

    let mut e = Effect::new();
    e.add_external_effect(&callee, None, prog);
    assert_eq!(e.write_vars(), &[vs.x]);
    assert!(e.has_global_effect(prog));

    let mut e = Effect::new();
    e.add_external_effect(&callee, Some(&[vs.body]), prog);
    assert_eq!(e.write_vars(), &[vs.x, vs.l]);
}

#[test]
fn test_union_aliasing() {
    let vs = vars();
    let prog = &vs.prog;
    let (f0, f1) = (prog[vs.u].fields[0], prog[vs.u].fields[1]);

    let mut e = Effect::new();
    e.write_var(f0, prog);
    assert!(e.is_written_partially(f1, prog));
    assert!(e.sibling_union_field_is_written(f1, prog));
    assert!(e.is_written_partially(vs.u, prog));
    assert!(!e.is_read_partially(f1, prog));
    assert!(e.union_field_is_written(prog));

    let mut e = Effect::new();
    e.read_var(f0, prog);
    assert!(e.is_read_partially(f1, prog));
    assert!(e.union_field_is_read(prog));
}

#[test]
fn test_struct_fields_do_not_alias() {
    let vs = vars();
    let prog = &vs.prog;
    let (f0, f1) = (prog[vs.s].fields[0], prog[vs.s].fields[1]);
    let mut e = Effect::new();
    e.write_var(f0, prog);
    assert!(!e.is_written_partially(f1, prog));
    assert!(e.is_written_partially(vs.s, prog));
    assert!(e.field_is_written(vs.s, prog));
}

#[test]
fn test_race() {
    let vs = vars();
    let prog = &vs.prog;
    let mut w = Effect::new();
    w.write_var(vs.x, prog);
    let mut r = Effect::new();
    r.read_var(vs.x, prog);
    let mut other = Effect::new();
    other.write_var(vs.l, prog);
    other.read_var(vs.x, prog);

    assert!(w.has_race_with(&r, prog));
    assert!(r.has_race_with(&w, prog));
    assert!(w.has_race_with(&w, prog));
    assert!(!r.has_race_with(&other, prog));
    assert!(!other.has_race_with(&r, prog));
}

#[test]
fn test_consolidate_and_purity_update() {
    let vs = vars();
    let prog = &vs.prog;
    let f0 = prog[vs.s].fields[0];
    let mut e = Effect::new();
    e.read_var(f0, prog);
    e.read_var(vs.s, prog);
    e.read_var(vs.c, prog);
    e.consolidate(prog);
    assert_eq!(e.read_vars(), &[vs.s, vs.c]);

    let mut e = Effect::new();
    e.read_var(vs.c, prog);
    e.write_var(vs.x, prog);
    e.update_purity(prog);
    assert!(!e.is_pure());
    assert_eq!(e.display(prog).to_string(), "read: [c], write: [x], side-effect free");
}
