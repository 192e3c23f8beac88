use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use crate::{
    context::CGContext,
    effect::Effect,
    error::{GenError, Rejected, VisitResult},
    fact_mgr::{FactMgr, StmFactMaps},
    facts::*,
    graph,
    options::*,
    program::*,
};

/// What is known about a function across all of its visits.
#[derive(Debug, Clone, Default)]
pub struct FuncSummary {
    /// Union of the effects of every visit.
    pub feffect: Effect,
    /// The function or a callee may change pointer or union facts visible
    /// to its callers.
    pub fact_changed: bool,
    pub union_field_read: bool,
    pub pointer_referenced: bool,
    pub visited_cnt: usize,
    pub built: bool,
}

impl FuncSummary {
    /// Whether a call must re-run the body under the caller facts instead of
    /// reusing `feffect`.
    #[inline]
    pub fn needs_revisit(&self) -> bool {
        self.fact_changed || self.union_field_read || self.pointer_referenced
    }
}

/// State of a session that visits may change: the snapshots and entry facts
/// of every function, the summaries, and the return facts.
#[derive(Debug, Clone)]
pub struct Checkpoint<'a> {
    fms: Vec<(FuncId, StmFactMaps<'a>, FactEnv<'a>)>,
    summaries: HashMap<FuncId, FuncSummary>,
    return_facts: ReturnFacts<'a>,
}

/// One generation session: the dataflow state of every function of a
/// program.
pub struct Analyzer<'a, 'p> {
    pub(super) prog: &'p Program,
    pub(super) opts: &'p Options,
    pub(super) lat: Lattice<'a, 'p>,
    pub(super) fms: HashMap<FuncId, FactMgr<'a>>,
    pub(super) summaries: HashMap<FuncId, FuncSummary>,
    pub(super) return_facts: ReturnFacts<'a>,
    pub(super) dither: Rc<Dither>,
    error: Option<GenError>,
    /// Functions whose bodies are being visited, outermost first.
    pub(super) active: Vec<FuncId>,
    rejected: HashSet<FuncId>,
}

impl std::fmt::Debug for Analyzer<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("summaries", &self.summaries)
            .field("error", &self.error)
            .field("active", &self.active)
            .finish()
    }
}

impl<'a, 'p> Analyzer<'a, 'p> {
    pub fn new(prog: &'p Program, arena: &'a FactArena, opts: &'p Options) -> Self {
        let lat = Lattice::new(prog, arena, opts.union_read_type_sensitive);
        let fms = prog.func_ids().map(|f| (f, FactMgr::new(f, prog))).collect();
        let summaries = compute_summaries(prog);
        Self {
            prog,
            opts,
            lat,
            fms,
            summaries,
            return_facts: ReturnFacts::default(),
            dither: Rc::new(Dither::new()),
            error: None,
            active: vec![],
            rejected: HashSet::new(),
        }
    }

    #[inline]
    pub fn prog(&self) -> &'p Program {
        self.prog
    }

    #[inline]
    pub fn lattice(&self) -> &Lattice<'a, 'p> {
        &self.lat
    }

    /// Fresh top-level context for building the body of `f`.
    pub fn context(&self, f: FuncId) -> CGContext<'a, 'p> {
        CGContext::new(self.lat, self.opts, f, self.dither.clone())
    }

    #[inline]
    pub fn fm(&self, f: FuncId) -> &FactMgr<'a> {
        &self.fms[&f]
    }

    pub(super) fn fm_mut(&mut self, f: FuncId) -> &mut FactMgr<'a> {
        self.fms
            .get_mut(&f)
            .unwrap_or_else(|| panic!("no fact manager for {:?}", f))
    }

    #[inline]
    pub fn summary(&self, f: FuncId) -> &FuncSummary {
        &self.summaries[&f]
    }

    pub(super) fn summary_mut(&mut self, f: FuncId) -> &mut FuncSummary {
        self.summaries
            .get_mut(&f)
            .unwrap_or_else(|| panic!("no summary for {:?}", f))
    }

    #[inline]
    pub fn return_facts(&self) -> &ReturnFacts<'a> {
        &self.return_facts
    }

    /// Raises a systemic error. The first one sticks.
    pub fn set_error(&mut self, err: GenError) {
        if self.error.is_none() {
            tracing::info!("generation abandoned: {}", err);
            self.error = Some(err);
        }
    }

    #[inline]
    pub fn error(&self) -> Option<&GenError> {
        self.error.as_ref()
    }

    #[inline]
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Rejects with a sticky error.
    pub(super) fn fail<T>(&mut self, err: GenError) -> VisitResult<T> {
        self.set_error(err);
        Err(Rejected)
    }

    /// Snapshot maps are shared until written, so this is cheap.
    pub fn checkpoint(&self) -> Checkpoint<'a> {
        Checkpoint {
            fms: self
                .fms
                .iter()
                .map(|(f, fm)| (*f, fm.backup_stm_fact_maps(), fm.global_facts.clone()))
                .collect(),
            summaries: self.summaries.clone(),
            return_facts: self.return_facts.clone(),
        }
    }

    /// Undoes everything visited since `cp` was taken.
    pub fn rollback(&mut self, cp: Checkpoint<'a>) {
        for (f, maps, facts) in cp.fms {
            let fm = self.fm_mut(f);
            fm.restore_stm_fact_maps(maps);
            fm.global_facts = facts;
        }
        self.summaries = cp.summaries;
        self.return_facts = cp.return_facts;
    }

    /// Facts holding when the program starts: initialized globals take
    /// their initializer, the others are zero.
    pub fn initial_facts(&self) -> FactEnv<'a> {
        let mut env = FactEnv::new();
        for g in &self.prog.globals {
            match self.prog[*g].init {
                Some(init) => {
                    self.lat
                        .abstract_fact_for_assign(Lhs::new(*g), init, &mut env, &self.return_facts)
                }
                None => self.lat.add_new_var_fact(*g, Program::NULL, &mut env),
            }
        }
        env
    }

    /// Tries the candidates in order and keeps the first one that visits
    /// successfully. Nothing done by a rejected candidate survives, including
    /// the revisits of its callees.
    pub fn choose_stmt(
        &mut self,
        candidates: &[StmtId],
        env: &FactEnv<'a>,
        ctx: &mut CGContext<'a, 'p>,
    ) -> VisitResult<(StmtId, FactEnv<'a>)> {
        for s in candidates {
            let cp = self.checkpoint();
            let mut trial = ctx.clone();
            match self.visit_stmt(*s, env, &mut trial) {
                Ok(out) => {
                    *ctx = trial;
                    return Ok((*s, out));
                }
                Err(rejected) => {
                    self.rollback(cp);
                    if self.error.is_some() {
                        return Err(rejected);
                    }
                    tracing::trace!("candidate {:?} rejected", s);
                }
            }
        }
        Err(Rejected)
    }

    /// Visits every function, starting from the ones nobody calls.
    pub fn analyze_program(&mut self) -> Result<Report, GenError> {
        let prog = self.prog;
        let callers = graph::callers(prog);
        let (entries, rest): (Vec<_>, Vec<_>) =
            prog.func_ids().partition(|f| callers[f].is_empty());
        let globals = self.initial_facts();

        for f in entries.into_iter().chain(rest) {
            if self.summary(f).built {
                continue;
            }
            let mut env = globals.clone();
            for param in &prog[f].params {
                self.lat.add_new_var_fact(*param, Program::TBD, &mut env);
            }
            let mut ctx = self.context(f);
            self.active.push(f);
            let res = self.visit_function(f, env, &mut ctx);
            self.active.pop();
            if let Some(err) = self.error.take() {
                return Err(err);
            }
            match res {
                Ok(_) => {
                    let summary = self.summary_mut(f);
                    if let Some(e) = ctx.accum() {
                        summary.feffect.add_effect(e, false);
                    }
                    summary.visited_cnt += 1;
                    summary.built = true;
                }
                Err(Rejected) => {
                    tracing::info!("{} rejected", prog[f].name);
                    self.rejected.insert(f);
                }
            }
        }

        for fm in self.fms.values_mut() {
            fm.setup_in_out_maps();
            debug_assert!(fm.sanity_check_map(prog));
        }
        Ok(self.report())
    }

    pub fn report(&self) -> Report {
        let prog = self.prog;
        let functions = prog
            .func_ids()
            .map(|f| {
                let summary = self.summary(f);
                let fm = self.fm(f);
                let assertions = prog
                    .func_stmts(f)
                    .into_iter()
                    .map(|s| fm.assertions_at(s, prog))
                    .filter(|a| !a.is_empty())
                    .collect();
                FunctionReport {
                    name: prog[f].name.clone(),
                    rejected: self.rejected.contains(&f),
                    effect: summary.feffect.display(prog).to_string(),
                    visits: summary.visited_cnt,
                    assertions,
                }
            })
            .collect();
        Report { functions }
    }
}

fn sub_exprs(prog: &Program, e: ExprId, exprs: &mut Vec<ExprId>) {
    exprs.push(e);
    match &prog[e] {
        Expr::Constant { .. } | Expr::Var(_) => {}
        Expr::Call(inv) => {
            for arg in &inv.args {
                sub_exprs(prog, *arg, exprs);
            }
        }
        Expr::Assign(_, r) => sub_exprs(prog, *r, exprs),
        Expr::Comma(l, r) => {
            sub_exprs(prog, *l, exprs);
            sub_exprs(prog, *r, exprs);
        }
    }
}

/// Assignment targets and variable uses of a function body.
fn accesses(prog: &Program, f: FuncId) -> (Vec<Lhs>, Vec<ExprVar>) {
    let mut lhss = vec![];
    let mut uses = vec![];
    for s in prog.func_stmts(f) {
        let kind = &prog[s].kind;
        match kind {
            StmtKind::Assign(lhs, _) => lhss.push(*lhs),
            StmtKind::Return(Some(ev)) => uses.push(*ev),
            _ => {}
        }
        let mut exprs = vec![];
        for e in kind.exprs() {
            sub_exprs(prog, e, &mut exprs);
        }
        for e in exprs {
            match &prog[e] {
                Expr::Var(ev) => uses.push(*ev),
                Expr::Assign(lhs, _) => lhss.push(*lhs),
                _ => {}
            }
        }
    }
    let inits = prog
        .func_blocks(f)
        .into_iter()
        .flat_map(|b| prog[b].locals.clone())
        .filter_map(|v| prog[v].init);
    for init in inits {
        let mut exprs = vec![];
        sub_exprs(prog, init, &mut exprs);
        for e in exprs {
            if let Expr::Var(ev) = &prog[e] {
                uses.push(*ev);
            }
        }
    }
    (lhss, uses)
}

/// Call-independent predicates deciding whether calls must be revisited,
/// closed over the callees.
fn compute_summaries(prog: &Program) -> HashMap<FuncId, FuncSummary> {
    let local: HashMap<_, _> = prog
        .func_ids()
        .map(|f| {
            let (lhss, uses) = accesses(prog, f);
            let fact_changed = lhss.iter().any(|l| {
                l.indirect > 0
                    || (prog.is_global(l.var) && prog.has_tracked_facts(prog[l.var].ty))
            });
            let union_field_read = uses.iter().any(|ev| {
                !prog.enclosing_unions(ev.var).is_empty()
                    || (ev.deref_level() > 0
                        && prog[prog.deref_type(prog[ev.var].ty, ev.deref_level())].is_union())
            });
            let pointer_referenced = uses.iter().any(|ev| ev.indirect != 0)
                || lhss.iter().any(|l| l.indirect > 0)
                || prog[f]
                    .params
                    .iter()
                    .any(|p| prog.has_tracked_facts(prog[*p].ty))
                || prog.has_tracked_facts(prog[f].ret_ty);
            (f, (fact_changed, union_field_read, pointer_referenced))
        })
        .collect();

    let closure = graph::transitive_callees(&graph::call_graph(prog));
    prog.func_ids()
        .map(|f| {
            let reach: Vec<_> = std::iter::once(f).chain(closure[&f].iter().copied()).collect();
            let any = |i: fn(&(bool, bool, bool)) -> bool| reach.iter().any(|g| i(&local[g]));
            let summary = FuncSummary {
                fact_changed: any(|l| l.0),
                union_field_read: any(|l| l.1),
                pointer_referenced: any(|l| l.2),
                ..FuncSummary::default()
            };
            (f, summary)
        })
        .collect()
}

/// Result of analyzing a whole program.
#[derive(Debug, Clone)]
pub struct Report {
    pub functions: Vec<FunctionReport>,
}

#[derive(Debug, Clone)]
pub struct FunctionReport {
    pub name: String,
    pub rejected: bool,
    pub effect: String,
    pub visits: usize,
    /// Assertions holding on entry to statements, in statement order.
    pub assertions: Vec<Vec<String>>,
}

impl Report {
    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for func in &self.functions {
            if func.rejected {
                writeln!(f, "{}: rejected", func.name)?;
                continue;
            }
            writeln!(f, "{}: {} visit(s)", func.name, func.visits)?;
            writeln!(f, "  {}", func.effect)?;
            for assertions in &func.assertions {
                for a in assertions {
                    writeln!(f, "  assert({});", a)?;
                }
            }
        }
        Ok(())
    }
}
