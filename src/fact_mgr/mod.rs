
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    rc::Rc,
};

use etrace::some_or;

use crate::{effect::Effect, facts::*, program::*};

/// Statement-keyed snapshots of one function. Cloning shares the maps; the
/// first write after a clone copies the written map only.
#[derive(Debug, Clone, Default)]
pub struct StmFactMaps<'a> {
    facts_in: Rc<HashMap<StmtId, FactEnv<'a>>>,
    facts_out: Rc<HashMap<StmtId, FactEnv<'a>>>,
    stm_effect: Rc<HashMap<StmtId, Effect>>,
    accum_effect: Rc<HashMap<StmtId, Effect>>,
    /// Facts carried by jumps, keyed by destination statement.
    jump_facts: Rc<HashMap<(StmtId, EdgeKind), FactEnv<'a>>>,
}

impl StmFactMaps<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.facts_out.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.facts_out.is_empty()
    }

    /// Whether both snapshots share every map.
    pub fn shares_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.facts_in, &other.facts_in)
            && Rc::ptr_eq(&self.facts_out, &other.facts_out)
            && Rc::ptr_eq(&self.stm_effect, &other.stm_effect)
            && Rc::ptr_eq(&self.accum_effect, &other.accum_effect)
            && Rc::ptr_eq(&self.jump_facts, &other.jump_facts)
    }
}

/// Per-function dataflow store.
#[derive(Debug, Clone)]
pub struct FactMgr<'a> {
    func: FuncId,
    /// Running environment of the function.
    pub global_facts: FactEnv<'a>,
    maps: StmFactMaps<'a>,
    map_facts_in_final: HashMap<StmtId, FactEnv<'a>>,
    map_facts_out_final: HashMap<StmtId, FactEnv<'a>>,
    map_visited: HashSet<StmtId>,
    cfg_edges: Vec<CfgEdge>,
    loop_visits: HashMap<StmtId, usize>,
    return_env: Option<FactEnv<'a>>,
}

impl<'a> FactMgr<'a> {
    pub fn new(func: FuncId, prog: &Program) -> Self {
        Self {
            func,
            global_facts: FactEnv::new(),
            maps: StmFactMaps::default(),
            map_facts_in_final: HashMap::new(),
            map_facts_out_final: HashMap::new(),
            map_visited: HashSet::new(),
            cfg_edges: prog.cfg_edges(func).to_vec(),
            loop_visits: HashMap::new(),
            return_env: None,
        }
    }

    #[inline]
    pub fn func(&self) -> FuncId {
        self.func
    }

    #[inline]
    pub fn cfg_edges(&self) -> &[CfgEdge] {
        &self.cfg_edges
    }

    /// Edges leaving `s`.
    pub fn edges_from(&self, s: StmtId) -> impl Iterator<Item = &CfgEdge> + '_ {
        self.cfg_edges.iter().filter(move |e| e.src == s)
    }

    pub fn has_back_edge_to(&self, s: StmtId) -> bool {
        self.cfg_edges
            .iter()
            .any(|e| e.dest == s && e.kind == EdgeKind::Goto && e.back)
    }

    #[inline]
    pub fn set_fact_in(&mut self, s: StmtId, env: FactEnv<'a>) {
        Rc::make_mut(&mut self.maps.facts_in).insert(s, env);
    }

    #[inline]
    pub fn set_fact_out(&mut self, s: StmtId, env: FactEnv<'a>) {
        Rc::make_mut(&mut self.maps.facts_out).insert(s, env);
    }

    #[inline]
    pub fn fact_in(&self, s: StmtId) -> Option<&FactEnv<'a>> {
        self.maps.facts_in.get(&s)
    }

    #[inline]
    pub fn fact_out(&self, s: StmtId) -> Option<&FactEnv<'a>> {
        self.maps.facts_out.get(&s)
    }

    pub fn set_effect(&mut self, s: StmtId, stm: Effect, accum: Effect) {
        Rc::make_mut(&mut self.maps.stm_effect).insert(s, stm);
        Rc::make_mut(&mut self.maps.accum_effect).insert(s, accum);
    }

    #[inline]
    pub fn stm_effect(&self, s: StmtId) -> Option<&Effect> {
        self.maps.stm_effect.get(&s)
    }

    #[inline]
    pub fn accum_effect(&self, s: StmtId) -> Option<&Effect> {
        self.maps.accum_effect.get(&s)
    }

    #[inline]
    pub fn mark_visited(&mut self, s: StmtId) {
        self.map_visited.insert(s);
    }

    #[inline]
    pub fn is_visited(&self, s: StmtId) -> bool {
        self.map_visited.contains(&s)
    }

    #[inline]
    pub fn clear_map_visited(&mut self) {
        self.map_visited.clear();
    }

    pub fn add_new_var_fact(&self, lat: &Lattice<'a, '_>, v: VarId, env: &mut FactEnv<'a>) {
        lat.add_new_var_fact(v, Program::GARBAGE, env);
    }

    pub fn update_fact_for_assign(
        &self,
        lat: &Lattice<'a, '_>,
        lhs: Lhs,
        rhs: ExprId,
        env: &mut FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) {
        lat.abstract_fact_for_assign(lhs, rhs, env, ret);
    }

    pub fn update_fact_for_return(
        &self,
        lat: &Lattice<'a, '_>,
        ev: ExprVar,
        env: &mut FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) {
        lat.abstract_fact_for_return(ev, lat.prog[self.func].rv, env, ret);
    }

    /// Merges the facts flowing along a jump into its destination. Returns
    /// whether the destination gained anything.
    pub fn update_facts_for_dest(
        &mut self,
        lat: &Lattice<'a, '_>,
        dest: StmtId,
        kind: EdgeKind,
        env: &FactEnv<'a>,
    ) -> bool {
        match Rc::make_mut(&mut self.maps.jump_facts).entry((dest, kind)) {
            Entry::Occupied(mut e) => e.get_mut().merge_facts(env, lat),
            Entry::Vacant(e) => {
                e.insert(env.clone());
                true
            }
        }
    }

    #[inline]
    pub fn jump_facts(&self, dest: StmtId, kind: EdgeKind) -> Option<&FactEnv<'a>> {
        self.maps.jump_facts.get(&(dest, kind))
    }

    pub fn clear_jump_facts(&mut self, dest: StmtId, kind: EdgeKind) {
        if self.maps.jump_facts.contains_key(&(dest, kind)) {
            Rc::make_mut(&mut self.maps.jump_facts).remove(&(dest, kind));
        }
    }

    /// Entry environment of `callee`: the caller facts with every parameter
    /// bound to its argument. Arguments are all evaluated in the caller
    /// environment.
    pub fn caller_to_callee_handover(
        lat: &Lattice<'a, '_>,
        ret: &ReturnFacts<'a>,
        callee: FuncId,
        args: &[ExprId],
        env: &FactEnv<'a>,
    ) -> FactEnv<'a> {
        let prog = lat.prog;
        let params = &prog[callee].params;
        assert_eq!(params.len(), args.len());
        let mut inputs = env.clone();
        for (param, arg) in params.iter().zip(args) {
            let mut bound = env.clone();
            lat.abstract_fact_for_assign(Lhs::new(*param), *arg, &mut bound, ret);
            for v in prog.derived_vars(*param) {
                for cat in [Category::PointTo, Category::Union] {
                    if let Some(fact) = bound.find(v, cat) {
                        inputs.update_fact(fact);
                    }
                }
            }
        }
        inputs
    }

    /// Drops the facts about the return value and its fields.
    pub fn remove_rv_facts(&self, prog: &Program, env: &mut FactEnv<'a>) {
        for v in prog.derived_vars(prog[self.func].rv) {
            env.remove_var(v);
        }
    }

    #[inline]
    pub fn backup_stm_fact_maps(&self) -> StmFactMaps<'a> {
        self.maps.clone()
    }

    #[inline]
    pub fn restore_stm_fact_maps(&mut self, maps: StmFactMaps<'a>) {
        self.maps = maps;
    }

    /// Starts a visit of the function body under `inputs`. Snapshots of
    /// earlier visits are kept and joined with the new ones.
    pub fn begin_visit(&mut self, inputs: FactEnv<'a>) {
        self.global_facts = inputs;
        self.maps.jump_facts = Rc::default();
        self.map_visited.clear();
        self.loop_visits.clear();
        self.return_env = None;
    }

    /// Records the snapshots of a visited statement, joined with those of
    /// previous visits.
    pub fn record_stmt(
        &mut self,
        lat: &Lattice<'a, '_>,
        s: StmtId,
        facts_in: &FactEnv<'a>,
        facts_out: &FactEnv<'a>,
    ) {
        let mut joined_in = self.fact_in(s).cloned().unwrap_or_default();
        joined_in.merge_facts_visits(facts_in, lat);
        let mut joined_out = self.fact_out(s).cloned().unwrap_or_default();
        joined_out.merge_facts_visits(facts_out, lat);
        self.set_fact_in(s, joined_in);
        self.set_fact_out(s, joined_out);
        self.mark_visited(s);
    }

    pub fn reset_stm_fact_maps(&mut self) {
        self.maps = StmFactMaps::default();
        self.map_visited.clear();
        self.loop_visits.clear();
        self.return_env = None;
    }

    /// Freezes the current maps as the final result of the function.
    pub fn setup_in_out_maps(&mut self) {
        self.map_facts_in_final = (*self.maps.facts_in).clone();
        self.map_facts_out_final = (*self.maps.facts_out).clone();
    }

    #[inline]
    pub fn final_fact_in(&self, s: StmtId) -> Option<&FactEnv<'a>> {
        self.map_facts_in_final.get(&s)
    }

    #[inline]
    pub fn final_fact_out(&self, s: StmtId) -> Option<&FactEnv<'a>> {
        self.map_facts_out_final.get(&s)
    }

    /// Whether every visited statement of the function has both snapshots.
    pub fn sanity_check_map(&self, prog: &Program) -> bool {
        prog.func_stmts(self.func).into_iter().all(|s| {
            !self.is_visited(s) || (self.fact_in(s).is_some() && self.fact_out(s).is_some())
        })
    }

    #[inline]
    pub fn reset_loop_visits(&mut self, lp: StmtId) {
        self.loop_visits.insert(lp, 0);
    }

    #[inline]
    pub fn record_loop_visit(&mut self, lp: StmtId) -> usize {
        let cnt = self.loop_visits.entry(lp).or_insert(0);
        *cnt += 1;
        *cnt
    }

    #[inline]
    pub fn loop_visits(&self, lp: StmtId) -> usize {
        self.loop_visits.get(&lp).copied().unwrap_or(0)
    }

    pub fn record_return(&mut self, lat: &Lattice<'a, '_>, env: &FactEnv<'a>) {
        self.return_env
            .get_or_insert_with(FactEnv::new)
            .merge_facts(env, lat);
    }

    #[inline]
    pub fn return_env(&self) -> Option<&FactEnv<'a>> {
        self.return_env.as_ref()
    }

    /// Runtime assertions that hold on entry to `s`.
    pub fn assertions_at(&self, s: StmtId, prog: &Program) -> Vec<String> {
        let env = some_or!(
            self.map_facts_in_final.get(&s).or_else(|| self.fact_in(s)),
            return vec![]
        );
        env.iter()
            .filter(|f| f.is_assertable(s, prog))
            .filter_map(|f| f.assertion(prog))
            .collect()
    }
}
