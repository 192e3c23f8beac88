use etrace::some_or;

use super::*;
use crate::{
    context::{CGContext, Derive},
    effect::Effect,
    error::{GenError, Rejected, VisitResult},
    fact_mgr::FactMgr,
    facts::*,
    program::*,
};

/// Every ordering of `0..n`.
pub fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![vec![]];
    }
    let mut perms = vec![];
    for perm in permutations(n - 1) {
        for i in 0..=perm.len() {
            let mut p = perm.clone();
            p.insert(i, n - 1);
            perms.push(p);
        }
    }
    perms
}

impl<'a, 'p> Analyzer<'a, 'p> {
    /// Visits the body of `f` entered with `inputs`. Returns the facts at
    /// the exit of the function.
    pub fn visit_function(
        &mut self,
        f: FuncId,
        inputs: FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let lat = self.lat;
        self.fm_mut(f).begin_visit(inputs.clone());
        let body = self.prog[f].body;
        let mut exit = self.visit_block(body, &inputs, ctx)?;
        let fm = self.fm_mut(f);
        if let Some(r) = fm.return_env() {
            exit.merge_facts(r, &lat);
        }
        fm.global_facts = exit.clone();
        Ok(exit)
    }

    pub fn visit_block(
        &mut self,
        b: BlockId,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let prog = self.prog;
        let lat = self.lat;
        let func = ctx.func();
        let mut bctx = ctx.derive(Derive::Block(b));
        if bctx.blk_depth() > self.opts.max_blk_depth {
            return self.fail(GenError::DepthExceeded {
                depth: bctx.blk_depth(),
                limit: self.opts.max_blk_depth,
            });
        }

        let block = &prog[b];
        let targets: Vec<_> = block
            .stmts
            .iter()
            .copied()
            .filter(|s| self.fm(func).has_back_edge_to(*s))
            .collect();
        let mut iterations = 0;
        let mut out = loop {
            let mut env = env.clone();
            for v in &block.locals {
                match prog[*v].init {
                    Some(init) => {
                        env = self.visit_expr(init, &env, &mut bctx)?;
                        self.fm(func).update_fact_for_assign(
                            &lat,
                            Lhs::new(*v),
                            init,
                            &mut env,
                            &self.return_facts,
                        );
                    }
                    None => self.fm(func).add_new_var_fact(&lat, *v, &mut env),
                }
            }

            let snapshot = |this: &Self| -> Vec<Option<FactEnv<'a>>> {
                targets
                    .iter()
                    .map(|s| this.fm(func).jump_facts(*s, EdgeKind::Goto).cloned())
                    .collect()
            };
            let before = snapshot(self);
            for s in &block.stmts {
                env = self.visit_stmt(*s, &env, &mut bctx)?;
            }
            if snapshot(self) == before {
                break env;
            }
            iterations += 1;
            if iterations >= self.opts.max_fixed_point_iterations {
                return self.fail(GenError::FixedPointDiverged { iterations });
            }
            tracing::debug!("revisiting {:?} for backward jumps", b);
        };
        lat.update_facts_for_oos_vars(&block.locals, &mut out);
        ctx.merge_param_context(&bctx);
        Ok(out)
    }

    pub fn visit_stmt(
        &mut self,
        s: StmtId,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        if self.error().is_some() {
            return Err(Rejected);
        }
        let prog = self.prog;
        let lat = self.lat;
        let func = ctx.func();

        let mut env = env.clone();
        if let Some(jumps) = self.jumped_facts(func, s, EdgeKind::Goto) {
            env.merge_facts(&jumps, &lat);
        }
        ctx.new_stmt();

        let out = match &prog[s].kind {
            StmtKind::Assign(lhs, rhs) => self.visit_assign(*lhs, *rhs, &env, ctx)?,
            StmtKind::Expr(e) => self.visit_expr(*e, &env, ctx)?,
            StmtKind::Block(b) => self.visit_block(*b, &env, ctx)?,
            StmtKind::If { cond, then, els } => {
                let env = self.visit_expr(*cond, &env, ctx)?;
                let then = self.visit_block(*then, &env, ctx)?;
                let els = self.visit_block(*els, &env, ctx)?;
                then.join(&els, &lat)
            }
            StmtKind::For(lp) => self.visit_for(s, lp, &env, ctx)?,
            StmtKind::Goto { cond, dest } => {
                let env = self.visit_expr(*cond, &env, ctx)?;
                let dest = some_or!(dest, panic!("goto {:?} has no label", s));
                self.fm_mut(func)
                    .update_facts_for_dest(&lat, *dest, EdgeKind::Goto, &env);
                env
            }
            StmtKind::Break { cond, lp } => {
                let env = self.visit_expr(*cond, &env, ctx)?;
                self.fm_mut(func)
                    .update_facts_for_dest(&lat, *lp, EdgeKind::Break, &env);
                env
            }
            StmtKind::Continue { cond, lp } => {
                let env = self.visit_expr(*cond, &env, ctx)?;
                self.fm_mut(func)
                    .update_facts_for_dest(&lat, *lp, EdgeKind::Continue, &env);
                env
            }
            StmtKind::Return(ev) => self.visit_return(*ev, &env, ctx)?,
        };

        let stm = ctx.effect_stm().clone();
        let accum = ctx.accum().cloned().unwrap_or_default();
        let fm = self.fm_mut(func);
        fm.record_stmt(&lat, s, &env, &out);
        fm.set_effect(s, stm, accum);
        Ok(out)
    }

    /// Visits the loop until the facts at its head stop changing.
    pub fn visit_for(
        &mut self,
        s: StmtId,
        lp: &ForLoop,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let lat = self.lat;
        let func = ctx.func();
        let mut head = self.visit_expr(lp.init, env, ctx)?;

        let fm = self.fm_mut(func);
        fm.clear_jump_facts(s, EdgeKind::Break);
        fm.clear_jump_facts(s, EdgeKind::Continue);
        fm.reset_loop_visits(s);

        let mut body_ctx = ctx.derive(Derive::LoopBody {
            iv: lp.iv,
            bound: lp.bound,
            directive: None,
        });
        let mut exit = loop {
            let visits = self.fm_mut(func).record_loop_visit(s);
            if visits > self.opts.max_fixed_point_iterations {
                return self.fail(GenError::FixedPointDiverged {
                    iterations: visits - 1,
                });
            }
            let cond = self.visit_expr(lp.cond, &head, ctx)?;
            let mut tail = self.visit_block(lp.body, &cond, &mut body_ctx)?;
            if let Some(c) = self.jumped_facts(func, s, EdgeKind::Continue) {
                tail.merge_facts(&c, &lat);
            }
            let tail = self.visit_expr(lp.incr, &tail, ctx)?;
            let next = head.join(&tail, &lat);
            if next.same_facts(&head) {
                tracing::debug!("loop {:?} stable after {} visit(s)", s, visits);
                break cond;
            }
            head = next;
        };
        if let Some(b) = self.jumped_facts(func, s, EdgeKind::Break) {
            exit.merge_facts(&b, &lat);
        }
        ctx.merge_param_context(&body_ctx);
        Ok(exit)
    }

    /// Facts carried to `dest` by jumps of `kind`, without the locals of
    /// the blocks the jumps left. Break and continue jumps land in the
    /// block of their loop.
    fn jumped_facts(
        &self,
        func: FuncId,
        dest: StmtId,
        kind: EdgeKind,
    ) -> Option<FactEnv<'a>> {
        let prog = self.prog;
        let mut env = self.fm(func).jump_facts(dest, kind)?.clone();
        let block = prog[dest].block;
        let dead: Vec<_> = prog
            .func_blocks(func)
            .into_iter()
            .filter(|b| !prog.block_encloses(*b, block))
            .flat_map(|b| prog[b].locals.clone())
            .collect();
        if !dead.is_empty() {
            self.lat.update_facts_for_oos_vars(&dead, &mut env);
        }
        Some(env)
    }

    fn visit_return(
        &mut self,
        ev: Option<ExprVar>,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let prog = self.prog;
        let lat = self.lat;
        let func = ctx.func();
        let mut env = env.clone();
        if let Some(ev) = ev {
            self.visit_var(ev, &env, ctx)?;
            self.fm(func)
                .update_fact_for_return(&lat, ev, &mut env, &self.return_facts);
            let rv = prog[func].rv;
            let levels = prog.indirect_level(prog[rv].ty);
            if levels > 0 && lat.is_pointing_to_locals(rv, ctx.block(), levels, &env) {
                tracing::trace!("{} returns a pointer to its frame", prog[func].name);
                return Err(Rejected);
            }
        }
        self.fm_mut(func).record_return(&lat, &env);
        Ok(env)
    }

    fn visit_var(
        &mut self,
        ev: ExprVar,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<()> {
        let ok = if ev.is_address_of() {
            ctx.read_indices(ev.var, env)
        } else {
            ctx.read_pointed(ev, env)
        };
        if ok {
            Ok(())
        } else {
            Err(Rejected)
        }
    }

    pub fn visit_expr(
        &mut self,
        e: ExprId,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        if ctx.expr_depth() > self.opts.max_expr_depth {
            return self.fail(GenError::ExprDepthExceeded {
                depth: ctx.expr_depth(),
                limit: self.opts.max_expr_depth,
            });
        }
        let prog = self.prog;
        match &prog[e] {
            Expr::Constant { .. } => Ok(env.clone()),
            Expr::Var(ev) => {
                self.visit_var(*ev, env, ctx)?;
                Ok(env.clone())
            }
            Expr::Call(inv) => match inv.kind {
                Invoke::User(f) => self.visit_call(e, f, &inv.args, env, ctx),
                Invoke::Binary(_) | Invoke::Unary(_) => self.visit_operands(&inv.args, env, ctx),
            },
            Expr::Assign(lhs, rhs) => self.visit_assign(*lhs, *rhs, env, ctx),
            Expr::Comma(l, r) => {
                let env = self.visit_expr(*l, env, ctx)?;
                self.visit_expr(*r, &env, ctx)
            }
        }
    }

    /// `lhs = rhs`. The target must not be written by the right-hand side.
    pub fn visit_assign(
        &mut self,
        lhs: Lhs,
        rhs: ExprId,
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let lat = self.lat;
        let func = ctx.func();
        let mut rctx = ctx
            .derive(Derive::Param {
                context: ctx.effect_context().clone(),
            })
            .derive(Derive::Expr);
        let mut env = self.visit_expr(rhs, env, &mut rctx)?;
        let rhs_effect = rctx.accum().cloned().unwrap_or_default();

        let mut lctx = ctx
            .derive(Derive::Param {
                context: ctx.context_with(&rhs_effect.writes_only()),
            })
            .derive(Derive::Expr);
        if !lctx.write_pointed(lhs, &env) {
            return Err(Rejected);
        }
        ctx.merge_param_context(&rctx);
        ctx.merge_param_context(&lctx);
        self.fm(func)
            .update_fact_for_assign(&lat, lhs, rhs, &mut env, &self.return_facts);
        Ok(env)
    }

    /// Operands of a call. The relative order of operands invoking functions
    /// is unspecified, so every order must be legal.
    pub fn visit_operands(
        &mut self,
        args: &[ExprId],
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let calls = args.iter().filter(|a| self.prog.has_call(**a)).count();
        if calls > 1 {
            self.combine_operands(args, env, ctx)?;
            self.visit_unordered_params(args, env, ctx)
        } else {
            self.visit_params(args, env, ctx)
        }
    }

    /// Operands in the given order. Each one may not conflict with the
    /// operands before it.
    pub fn visit_params(
        &mut self,
        args: &[ExprId],
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let mut env = env.clone();
        let mut prior = Effect::new();
        for arg in args {
            let mut pctx = ctx
                .derive(Derive::Param {
                    context: ctx.context_with(&prior),
                })
                .derive(Derive::Expr);
            env = self.visit_expr(*arg, &env, &mut pctx)?;
            if let Some(e) = pctx.accum() {
                prior.add_effect(e, false);
            }
            ctx.merge_param_context(&pctx);
        }
        Ok(env)
    }

    /// Rejects operands whose effects would race when evaluated in an
    /// unspecified order. Nothing the trial visits survives.
    pub fn combine_operands(
        &mut self,
        args: &[ExprId],
        env: &FactEnv<'a>,
        ctx: &CGContext<'a, 'p>,
    ) -> VisitResult<()> {
        let prog = self.prog;
        let cp = self.checkpoint();
        let mut effects: Vec<Effect> = vec![];
        for arg in args.iter().filter(|a| prog.has_call(**a)) {
            let mut trial = ctx
                .derive(Derive::Param {
                    context: ctx.effect_context().clone(),
                })
                .derive(Derive::Expr);
            if self.visit_expr(*arg, env, &mut trial).is_err() {
                self.rollback(cp);
                return Err(Rejected);
            }
            let effect = trial.accum().cloned().unwrap_or_default();
            if effects.iter().any(|e| e.has_race_with(&effect, prog)) {
                tracing::trace!("racing operands {:?}", args);
                self.rollback(cp);
                return Err(Rejected);
            }
            effects.push(effect);
        }
        self.rollback(cp);
        Ok(())
    }

    /// Visits the operands in every order of the ones invoking functions and
    /// joins the results.
    pub fn visit_unordered_params(
        &mut self,
        args: &[ExprId],
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let lat = self.lat;
        let slots: Vec<_> = (0..args.len())
            .filter(|i| self.prog.has_call(args[*i]))
            .collect();
        let mut joined: Option<FactEnv<'a>> = None;
        for perm in permutations(slots.len()) {
            let mut ordered = args.to_vec();
            for (slot, i) in slots.iter().zip(perm) {
                ordered[*slot] = args[slots[i]];
            }
            let mut trial = ctx.derive(Derive::Param {
                context: ctx.effect_context().clone(),
            });
            let out = self.visit_params(&ordered, env, &mut trial)?;
            ctx.merge_param_context(&trial);
            joined = Some(match joined {
                Some(j) => j.join(&out, &lat),
                None => out,
            });
        }
        Ok(joined.unwrap_or_else(|| env.clone()))
    }

    /// Visits a call of `f`, re-running its body under the caller facts
    /// unless the summary of `f` can stand in for it.
    pub fn visit_call(
        &mut self,
        call: ExprId,
        f: FuncId,
        args: &[ExprId],
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<FactEnv<'a>> {
        let prog = self.prog;
        let lat = self.lat;
        let env = self.visit_operands(args, env, ctx)?;

        let active = self.active.contains(&f);
        let summary = self.summary(f);
        if active && !summary.built {
            tracing::trace!("recursive call of {} before its summary", prog[f].name);
            return Err(Rejected);
        }
        if summary.built && (active || !summary.needs_revisit()) {
            tracing::debug!("reusing the summary of {}", prog[f].name);
            let feffect = summary.feffect.clone();
            if ctx.in_conflict(&feffect) {
                return Err(Rejected);
            }
            ctx.add_external_effect(&feffect);
            return Ok(env);
        }

        let depth = self.active.len();
        if depth >= self.opts.max_revisit_depth {
            return self.fail(GenError::RevisitDepthExceeded {
                func: prog[f].name.clone(),
                depth,
            });
        }
        tracing::debug!("revisiting {}", prog[f].name);
        let inputs = FactMgr::caller_to_callee_handover(&lat, &self.return_facts, f, args, &env);
        let cp = self.checkpoint();
        let mut callee_ctx = ctx.derive(Derive::Callee {
            func: f,
            block: ctx.block(),
        });
        self.active.push(f);
        let res = self.visit_function(f, inputs, &mut callee_ctx);
        self.active.pop();
        let mut out = match res {
            Ok(out) => out,
            Err(rejected) => {
                self.rollback(cp);
                return Err(rejected);
            }
        };

        let mut rv_facts = FactEnv::new();
        for v in prog.derived_vars(prog[f].rv) {
            for cat in [Category::PointTo, Category::Union] {
                if let Some(fact) = out.find(v, cat) {
                    rv_facts.update_fact(fact);
                }
            }
        }
        self.return_facts.record(call, rv_facts);
        lat.update_facts_for_oos_vars(&prog[f].params, &mut out);
        self.fm(f).remove_rv_facts(prog, &mut out);

        let feffect = callee_ctx.accum().cloned().unwrap_or_default();
        let summary = self.summary_mut(f);
        summary.feffect.add_effect(&feffect, false);
        summary.visited_cnt += 1;
        summary.built = true;
        if ctx.in_conflict(&feffect) {
            return Err(Rejected);
        }
        ctx.add_external_effect(&feffect);
        Ok(out)
    }
}
