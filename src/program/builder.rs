use super::*;

/// Incrementally constructs a [`Program`].
#[derive(Debug)]
pub struct ProgramBuilder {
    prog: Program,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            prog: Program::new(),
        }
    }

    #[inline]
    pub fn program(&self) -> &Program {
        &self.prog
    }

    fn add_type(&mut self, ty: Type) -> TypeId {
        if let Some(i) = self.prog.types.iter().position(|t| *t == ty) {
            return TypeId(i);
        }
        self.prog.types.push(ty);
        TypeId(self.prog.types.len() - 1)
    }

    pub fn int_type(&mut self, size: usize, signed: bool) -> TypeId {
        self.add_type(Type::Int { size, signed })
    }

    pub fn int(&mut self) -> TypeId {
        self.int_type(4, true)
    }

    pub fn short(&mut self) -> TypeId {
        self.int_type(2, true)
    }

    pub fn long(&mut self) -> TypeId {
        self.int_type(8, true)
    }

    pub fn pointer(&mut self, ty: TypeId) -> TypeId {
        self.add_type(Type::Pointer(ty))
    }

    pub fn struct_type(&mut self, fields: Vec<Field>) -> TypeId {
        self.prog.types.push(Type::Struct(fields));
        TypeId(self.prog.types.len() - 1)
    }

    pub fn union_type(&mut self, fields: Vec<Field>) -> TypeId {
        self.prog.types.push(Type::Union(fields));
        TypeId(self.prog.types.len() - 1)
    }

    fn new_var(&mut self, name: String, ty: TypeId, scope: Scope, kind: VarKind) -> VarId {
        let levels = self.prog.indirect_level(ty) + 1;
        let id = VarId(self.prog.vars.len());
        self.prog.vars.push(Variable {
            name: name.clone(),
            ty,
            quals: Quals::none(levels),
            scope,
            kind,
            access_once: false,
            dims: vec![],
            fields: vec![],
            init: None,
        });
        let fields = self.prog[ty].fields().to_vec();
        let field_vars = fields
            .into_iter()
            .enumerate()
            .map(|(fid, f)| {
                let kind = VarKind::Field { parent: id, fid };
                self.new_var(format!("{}.f{}", name, fid), f.ty, scope, kind)
            })
            .collect();
        self.prog.vars[id.0].fields = field_vars;
        id
    }

    pub fn global(&mut self, name: &str, ty: TypeId) -> VarId {
        let v = self.new_var(name.to_string(), ty, Scope::Global, VarKind::Plain);
        self.prog.globals.push(v);
        v
    }

    pub fn local(&mut self, b: BlockId, name: &str, ty: TypeId) -> VarId {
        let v = self.new_var(name.to_string(), ty, Scope::Local(b), VarKind::Plain);
        self.prog.blocks[b.0].locals.push(v);
        v
    }

    pub fn param(&mut self, f: FuncId, name: &str, ty: TypeId) -> VarId {
        let v = self.new_var(name.to_string(), ty, Scope::Param(f), VarKind::Plain);
        self.prog.funcs[f.0].params.push(v);
        v
    }

    pub fn global_array(&mut self, name: &str, ty: TypeId, dims: Vec<usize>) -> VarId {
        let v = self.global(name, ty);
        self.prog.vars[v.0].dims = dims;
        v
    }

    pub fn local_array(&mut self, b: BlockId, name: &str, ty: TypeId, dims: Vec<usize>) -> VarId {
        let v = self.local(b, name, ty);
        self.prog.vars[v.0].dims = dims;
        v
    }

    /// The itemized element `array[indices...]`.
    pub fn member(&mut self, array: VarId, indices: Vec<Index>) -> VarId {
        assert_eq!(self.prog[array].dims.len(), indices.len());
        let existing = self.prog.vars.iter().position(|v| {
            matches!(&v.kind, VarKind::ArrayMember { collective, indices: is }
                if *collective == array && *is == indices)
        });
        if let Some(i) = existing {
            return VarId(i);
        }
        let var = &self.prog[array];
        let name = indices.iter().fold(var.name.clone(), |acc, i| match i {
            Index::Const(n) => format!("{}[{}]", acc, n),
            Index::Var(v) => format!("{}[{}]", acc, self.prog.name(*v)),
        });
        let (ty, scope, quals, access_once) =
            (var.ty, var.scope, var.quals.clone(), var.access_once);
        let kind = VarKind::ArrayMember {
            collective: array,
            indices,
        };
        let v = self.new_var(name, ty, scope, kind);
        self.prog.vars[v.0].quals = quals;
        self.prog.vars[v.0].access_once = access_once;
        v
    }

    #[inline]
    pub fn field(&self, v: VarId, fid: usize) -> VarId {
        self.prog[v].fields[fid]
    }

    pub fn set_const(&mut self, v: VarId, level: usize) {
        self.prog.vars[v.0].quals.consts[level] = true;
        if level == 0 {
            for f in self.prog[v].fields.clone() {
                self.set_const(f, 0);
            }
        }
    }

    pub fn set_volatile(&mut self, v: VarId, level: usize) {
        self.prog.vars[v.0].quals.volatiles[level] = true;
        if level == 0 {
            for f in self.prog[v].fields.clone() {
                self.set_volatile(f, 0);
            }
        }
    }

    pub fn set_access_once(&mut self, v: VarId) {
        self.prog.vars[v.0].access_once = true;
        for f in self.prog[v].fields.clone() {
            self.set_access_once(f);
        }
    }

    pub fn set_init(&mut self, v: VarId, init: ExprId) {
        self.prog.vars[v.0].init = Some(init);
    }

    fn new_block(&mut self, func: FuncId, parent: Option<BlockId>, owner: Option<StmtId>) -> BlockId {
        self.prog.blocks.push(Block {
            func,
            parent,
            locals: vec![],
            stmts: vec![],
            owner,
        });
        BlockId(self.prog.blocks.len() - 1)
    }

    pub fn function(&mut self, name: &str, ret_ty: TypeId) -> FuncId {
        let f = FuncId(self.prog.funcs.len());
        let body = self.new_block(f, None, None);
        self.prog.funcs.push(Function {
            name: name.to_string(),
            ret_ty,
            params: vec![],
            body,
            rv: Program::NULL,
        });
        let rv = self.new_var(
            format!("{}::rv", name),
            ret_ty,
            Scope::ReturnValue(f),
            VarKind::Plain,
        );
        self.prog.funcs[f.0].rv = rv;
        f
    }

    #[inline]
    pub fn body(&self, f: FuncId) -> BlockId {
        self.prog[f].body
    }

    fn push_stmt(&mut self, b: BlockId, kind: StmtKind) -> StmtId {
        let s = StmtId(self.prog.stmts.len());
        self.prog.stmts.push(Stmt { kind, block: b });
        self.prog.blocks[b.0].stmts.push(s);
        s
    }

    fn push_expr(&mut self, e: Expr) -> ExprId {
        self.prog.exprs.push(e);
        ExprId(self.prog.exprs.len() - 1)
    }

    pub fn constant(&mut self, ty: TypeId, value: i64) -> ExprId {
        self.push_expr(Expr::Constant { ty, value })
    }

    pub fn var(&mut self, v: VarId) -> ExprId {
        self.push_expr(Expr::Var(ExprVar::new(v)))
    }

    pub fn deref(&mut self, v: VarId, indirect: i32) -> ExprId {
        self.push_expr(Expr::Var(ExprVar { var: v, indirect }))
    }

    pub fn addr_of(&mut self, v: VarId) -> ExprId {
        self.deref(v, -1)
    }

    pub fn call(&mut self, f: FuncId, args: Vec<ExprId>) -> ExprId {
        assert_eq!(self.prog[f].params.len(), args.len());
        self.push_expr(Expr::Call(Invocation {
            kind: Invoke::User(f),
            args,
        }))
    }

    pub fn binary(&mut self, op: BinOp, l: ExprId, r: ExprId) -> ExprId {
        self.push_expr(Expr::Call(Invocation {
            kind: Invoke::Binary(op),
            args: vec![l, r],
        }))
    }

    pub fn unary(&mut self, op: UnOp, e: ExprId) -> ExprId {
        self.push_expr(Expr::Call(Invocation {
            kind: Invoke::Unary(op),
            args: vec![e],
        }))
    }

    pub fn assign_expr(&mut self, lhs: Lhs, rhs: ExprId) -> ExprId {
        self.push_expr(Expr::Assign(lhs, rhs))
    }

    pub fn comma(&mut self, l: ExprId, r: ExprId) -> ExprId {
        self.push_expr(Expr::Comma(l, r))
    }

    pub fn assign(&mut self, b: BlockId, lhs: Lhs, rhs: ExprId) -> StmtId {
        self.push_stmt(b, StmtKind::Assign(lhs, rhs))
    }

    pub fn expr_stmt(&mut self, b: BlockId, e: ExprId) -> StmtId {
        self.push_stmt(b, StmtKind::Expr(e))
    }

    pub fn nested_block(&mut self, b: BlockId) -> (StmtId, BlockId) {
        let func = self.prog[b].func;
        let child = self.new_block(func, Some(b), None);
        (self.push_stmt(b, StmtKind::Block(child)), child)
    }

    pub fn if_stmt(&mut self, b: BlockId, cond: ExprId) -> (StmtId, BlockId, BlockId) {
        let func = self.prog[b].func;
        let then = self.new_block(func, Some(b), None);
        let els = self.new_block(func, Some(b), None);
        (self.push_stmt(b, StmtKind::If { cond, then, els }), then, els)
    }

    /// `for (iv = init; iv < bound; iv = iv + 1) { ... }`
    pub fn for_stmt(&mut self, b: BlockId, iv: VarId, init: i64, bound: u32) -> (StmtId, BlockId) {
        let ty = self.prog[iv].ty;
        let c = self.constant(ty, init);
        let init = self.assign_expr(Lhs::new(iv), c);
        let read = self.var(iv);
        let limit = self.constant(ty, bound as i64);
        let cond = self.binary(BinOp::Lt, read, limit);
        let read = self.var(iv);
        let one = self.constant(ty, 1);
        let next = self.binary(BinOp::Add, read, one);
        let incr = self.assign_expr(Lhs::new(iv), next);

        let func = self.prog[b].func;
        let s = StmtId(self.prog.stmts.len());
        let body = self.new_block(func, Some(b), Some(s));
        let lp = ForLoop {
            iv,
            bound,
            init,
            cond,
            incr,
            body,
        };
        (self.push_stmt(b, StmtKind::For(lp)), body)
    }

    pub fn goto(&mut self, b: BlockId, cond: ExprId, dest: Option<StmtId>) -> StmtId {
        self.push_stmt(b, StmtKind::Goto { cond, dest })
    }

    pub fn set_goto_dest(&mut self, goto: StmtId, dest: StmtId) {
        let StmtKind::Goto { dest: d, .. } = &mut self.prog.stmts[goto.0].kind else {
            panic!("{:?} is not a goto", goto)
        };
        *d = Some(dest);
    }

    fn innermost_loop(&self, b: BlockId) -> StmtId {
        let mut curr = Some(b);
        while let Some(blk) = curr {
            if let Some(owner) = self.prog[blk].owner {
                return owner;
            }
            curr = self.prog[blk].parent;
        }
        panic!("no enclosing loop for {:?}", b)
    }

    pub fn break_stmt(&mut self, b: BlockId, cond: ExprId) -> StmtId {
        let lp = self.innermost_loop(b);
        self.push_stmt(b, StmtKind::Break { cond, lp })
    }

    pub fn continue_stmt(&mut self, b: BlockId, cond: ExprId) -> StmtId {
        let lp = self.innermost_loop(b);
        self.push_stmt(b, StmtKind::Continue { cond, lp })
    }

    pub fn ret(&mut self, b: BlockId, e: Option<ExprVar>) -> StmtId {
        self.push_stmt(b, StmtKind::Return(e))
    }

    pub fn finish(mut self) -> Program {
        let prog = &mut self.prog;
        for f in prog.func_ids().collect::<Vec<_>>() {
            let stmts = prog.func_stmts(f);
            for (i, s) in stmts.iter().enumerate() {
                prog.order.insert(*s, i);
            }
            let mut edges = vec![];
            for s in stmts {
                let edge = match prog[s].kind {
                    StmtKind::Goto { dest, .. } => {
                        let dest = dest.unwrap_or_else(|| panic!("goto {:?} has no label", s));
                        assert!(
                            prog.block_encloses(prog[dest].block, prog[s].block),
                            "goto {:?} jumps into a nested block",
                            s
                        );
                        let back = prog.order[&dest] <= prog.order[&s];
                        CfgEdge {
                            src: s,
                            dest,
                            kind: EdgeKind::Goto,
                            back,
                        }
                    }
                    StmtKind::Break { lp, .. } => CfgEdge {
                        src: s,
                        dest: lp,
                        kind: EdgeKind::Break,
                        back: false,
                    },
                    StmtKind::Continue { lp, .. } => CfgEdge {
                        src: s,
                        dest: lp,
                        kind: EdgeKind::Continue,
                        back: true,
                    },
                    _ => continue,
                };
                edges.push(edge);
            }
            prog.edges.insert(f, edges);
        }
        self.prog
    }
}
