//! Small programs exercising the analysis, shared by the binary and the
//! tests.

use crate::program::*;

/// ```c
/// int *p = 0;
/// void main() { *p; }
/// ```
pub fn null_deref() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let p = b.global("p", pint);
    let zero = b.constant(pint, 0);
    b.set_init(p, zero);

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let deref = b.deref(p, 1);
    b.expr_stmt(body, deref);
    b.finish()
}

/// ```c
/// int x, y, *p, *q;
/// int f() { x = 1; p = &x; }
/// int g() { y = 2; q = &y; }   // x and &x with `same_global`
/// void main() { f() + g(); }
/// ```
pub fn unordered_calls(same_global: bool) -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let y = b.global("y", int);
    let p = b.global("p", pint);
    let q = b.global("q", pint);

    let f = b.function("f", int);
    let body = b.body(f);
    let one = b.constant(int, 1);
    b.assign(body, Lhs::new(x), one);
    let addr = b.addr_of(x);
    b.assign(body, Lhs::new(p), addr);

    let g = b.function("g", int);
    let body = b.body(g);
    let target = if same_global { x } else { y };
    let two = b.constant(int, 2);
    b.assign(body, Lhs::new(target), two);
    let addr = b.addr_of(target);
    b.assign(body, Lhs::new(q), addr);

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let cf = b.call(f, vec![]);
    let cg = b.call(g, vec![]);
    let sum = b.binary(BinOp::Add, cf, cg);
    b.expr_stmt(body, sum);
    b.finish()
}

/// ```c
/// int x, y, *p = &y, *q = &y;
/// void main() {
///     int i;
///     for (i = 0; i < 4; i = i + 1) { p = q; q = &x; }
/// }
/// ```
pub fn loop_program() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let x = b.global("x", int);
    let y = b.global("y", int);
    let p = b.global("p", pint);
    let q = b.global("q", pint);
    let addr = b.addr_of(y);
    b.set_init(p, addr);
    let addr = b.addr_of(y);
    b.set_init(q, addr);

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let i = b.local(body, "i", int);
    let (_, lp) = b.for_stmt(body, i, 0, 4);
    let read_q = b.var(q);
    b.assign(lp, Lhs::new(p), read_q);
    let addr = b.addr_of(x);
    b.assign(lp, Lhs::new(q), addr);
    b.finish()
}

/// ```c
/// int x;
/// union { int f0; int *f1; } u;
/// void main() { u.f1 = &x; *u.f1 = 1; u.f0 = 3; }
/// void peek() { u.f0 = 3; x = *u.f1; }
/// ```
pub fn union_program() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int();
    let pint = b.pointer(int);
    let ut = b.union_type(vec![Field::new(int), Field::new(pint)]);
    let x = b.global("x", int);
    let u = b.global("u", ut);
    let (f0, f1) = (b.field(u, 0), b.field(u, 1));

    let main = b.function("main", Program::VOID);
    let body = b.body(main);
    let addr = b.addr_of(x);
    b.assign(body, Lhs::new(f1), addr);
    let one = b.constant(int, 1);
    b.assign(body, Lhs::deref(f1, 1), one);
    let three = b.constant(int, 3);
    b.assign(body, Lhs::new(f0), three);

    let peek = b.function("peek", Program::VOID);
    let body = b.body(peek);
    let three = b.constant(int, 3);
    b.assign(body, Lhs::new(f0), three);
    let deref = b.deref(f1, 1);
    b.assign(body, Lhs::new(x), deref);
    b.finish()
}
