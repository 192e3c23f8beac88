use super::*;

/// Target of an assignment: `var` dereferenced `indirect` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lhs {
    pub var: VarId,
    pub indirect: usize,
}

impl Lhs {
    #[inline]
    pub fn new(var: VarId) -> Self {
        Self { var, indirect: 0 }
    }

    #[inline]
    pub fn deref(var: VarId, indirect: usize) -> Self {
        Self { var, indirect }
    }
}

/// A variable used as an expression. `indirect == -1` takes its address,
/// `indirect == k > 0` dereferences it `k` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprVar {
    pub var: VarId,
    pub indirect: i32,
}

impl ExprVar {
    #[inline]
    pub fn new(var: VarId) -> Self {
        Self { var, indirect: 0 }
    }

    #[inline]
    pub fn is_address_of(&self) -> bool {
        self.indirect < 0
    }

    /// Dereference levels actually performed when reading.
    #[inline]
    pub fn deref_level(&self) -> usize {
        self.indirect.max(0) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Lt,
    Eq,
    BitAnd,
    BitOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoke {
    User(FuncId),
    Binary(BinOp),
    Unary(UnOp),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub kind: Invoke,
    pub args: Vec<ExprId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Constant { ty: TypeId, value: i64 },
    Var(ExprVar),
    Call(Invocation),
    /// Assignment used as an expression; evaluates to the new LHS value.
    Assign(Lhs, ExprId),
    /// Evaluates the left operand for its effects, then the right one.
    Comma(ExprId, ExprId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForLoop {
    pub iv: VarId,
    pub bound: u32,
    pub init: ExprId,
    pub cond: ExprId,
    pub incr: ExprId,
    pub body: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    Assign(Lhs, ExprId),
    Expr(ExprId),
    Block(BlockId),
    If {
        cond: ExprId,
        then: BlockId,
        els: BlockId,
    },
    For(ForLoop),
    /// `if (cond) goto dest;`
    Goto {
        cond: ExprId,
        dest: Option<StmtId>,
    },
    /// `if (cond) break;` leaving the loop statement `lp`.
    Break {
        cond: ExprId,
        lp: StmtId,
    },
    /// `if (cond) continue;` in the loop statement `lp`.
    Continue {
        cond: ExprId,
        lp: StmtId,
    },
    Return(Option<ExprVar>),
}

impl StmtKind {
    pub fn child_blocks(&self) -> Vec<BlockId> {
        match self {
            Self::Block(b) => vec![*b],
            Self::If { then, els, .. } => vec![*then, *els],
            Self::For(lp) => vec![lp.body],
            _ => vec![],
        }
    }

    /// Expressions evaluated directly by this statement.
    pub fn exprs(&self) -> Vec<ExprId> {
        match self {
            Self::Assign(_, e) | Self::Expr(e) => vec![*e],
            Self::If { cond, .. }
            | Self::Goto { cond, .. }
            | Self::Break { cond, .. }
            | Self::Continue { cond, .. } => vec![*cond],
            Self::For(lp) => vec![lp.init, lp.cond, lp.incr],
            Self::Block(_) | Self::Return(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub block: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub func: FuncId,
    pub parent: Option<BlockId>,
    pub locals: Vec<VarId>,
    pub stmts: Vec<StmtId>,
    /// The loop statement whose body this block is.
    pub owner: Option<StmtId>,
}

impl Block {
    #[inline]
    pub fn is_looping(&self) -> bool {
        self.owner.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub ret_ty: TypeId,
    pub params: Vec<VarId>,
    pub body: BlockId,
    /// Pseudo-variable holding the returned value.
    pub rv: VarId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Goto,
    Break,
    Continue,
}

/// A non-fallthrough control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfgEdge {
    pub src: StmtId,
    pub dest: StmtId,
    pub kind: EdgeKind,
    pub back: bool,
}
