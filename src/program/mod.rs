mod ast;
mod builder;
mod ty;
mod var;
#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};

pub use ast::*;
pub use builder::*;
pub use ty::*;
pub use var::*;

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

id_type!(TypeId, "t");
id_type!(VarId, "#");
id_type!(FuncId, "fn");
id_type!(BlockId, "bb");
id_type!(StmtId, "s");
id_type!(ExprId, "e");

/// A fully built program. Every node lives in a flat table and refers to the
/// others by index.
#[derive(Debug, Clone)]
pub struct Program {
    pub types: Vec<Type>,
    pub vars: Vec<Variable>,
    pub funcs: Vec<Function>,
    pub blocks: Vec<Block>,
    pub stmts: Vec<Stmt>,
    pub exprs: Vec<Expr>,
    pub globals: Vec<VarId>,
    pub edges: HashMap<FuncId, Vec<CfgEdge>>,
    order: HashMap<StmtId, usize>,
}

impl Program {
    pub const VOID: TypeId = TypeId(0);
    pub const NULL: VarId = VarId(0);
    pub const GARBAGE: VarId = VarId(1);
    pub const TBD: VarId = VarId(2);

    fn new() -> Self {
        let mut prog = Self {
            types: vec![Type::Void],
            vars: vec![],
            funcs: vec![],
            blocks: vec![],
            stmts: vec![],
            exprs: vec![],
            globals: vec![],
            edges: HashMap::new(),
            order: HashMap::new(),
        };
        for name in ["null", "garbage", "tbd"] {
            prog.vars.push(Variable::sentinel(name, Self::VOID));
        }
        prog
    }

    #[inline]
    pub fn is_special(v: VarId) -> bool {
        v == Self::NULL || v == Self::GARBAGE || v == Self::TBD
    }

    #[inline]
    pub fn name(&self, v: VarId) -> &str {
        &self[v].name
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.funcs.len()).map(FuncId)
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs.iter().position(|f| f.name == name).map(FuncId)
    }

    /// Position of a statement in a pre-order walk of its function body.
    #[inline]
    pub fn stmt_order(&self, s: StmtId) -> usize {
        self.order[&s]
    }

    pub fn cfg_edges(&self, f: FuncId) -> &[CfgEdge] {
        self.edges.get(&f).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Statements of `f` in pre-order.
    pub fn func_stmts(&self, f: FuncId) -> Vec<StmtId> {
        let mut stmts = vec![];
        self.collect_block_stmts(self[f].body, &mut stmts);
        stmts
    }

    fn collect_block_stmts(&self, b: BlockId, stmts: &mut Vec<StmtId>) {
        for s in &self[b].stmts {
            stmts.push(*s);
            for child in self[*s].kind.child_blocks() {
                self.collect_block_stmts(child, stmts);
            }
        }
    }

    /// Every block of `f`, the body first.
    pub fn func_blocks(&self, f: FuncId) -> Vec<BlockId> {
        let mut blocks = vec![self[f].body];
        let mut i = 0;
        while let Some(b) = blocks.get(i).copied() {
            for s in &self[b].stmts {
                blocks.extend(self[*s].kind.child_blocks());
            }
            i += 1;
        }
        blocks
    }

    /// Functions directly invoked from the body of `f`.
    pub fn callees(&self, f: FuncId) -> BTreeSet<FuncId> {
        let mut callees = BTreeSet::new();
        for s in self.func_stmts(f) {
            for e in self[s].kind.exprs() {
                self.collect_callees(e, &mut callees);
            }
        }
        callees
    }

    fn collect_callees(&self, e: ExprId, callees: &mut BTreeSet<FuncId>) {
        match &self[e] {
            Expr::Constant { .. } | Expr::Var(_) => {}
            Expr::Call(inv) => {
                if let Invoke::User(f) = inv.kind {
                    callees.insert(f);
                }
                for arg in &inv.args {
                    self.collect_callees(*arg, callees);
                }
            }
            Expr::Assign(_, r) => self.collect_callees(*r, callees),
            Expr::Comma(l, r) => {
                self.collect_callees(*l, callees);
                self.collect_callees(*r, callees);
            }
        }
    }

    /// Whether evaluating `e` may invoke a user function.
    pub fn has_call(&self, e: ExprId) -> bool {
        let mut callees = BTreeSet::new();
        self.collect_callees(e, &mut callees);
        !callees.is_empty()
    }
}

macro_rules! index_impl {
    ($id:ident, $field:ident, $target:ty) => {
        impl std::ops::Index<$id> for Program {
            type Output = $target;

            #[inline]
            fn index(&self, id: $id) -> &Self::Output {
                &self.$field[id.0]
            }
        }
    };
}

index_impl!(TypeId, types, Type);
index_impl!(VarId, vars, Variable);
index_impl!(FuncId, funcs, Function);
index_impl!(BlockId, blocks, Block);
index_impl!(StmtId, stmts, Stmt);
index_impl!(ExprId, exprs, Expr);
