use std::collections::HashMap;

use etrace::some_or;

use super::*;
use crate::program::*;

/// Facts about callee return values, recorded per call expression the last
/// time the callee was analyzed from it.
#[derive(Debug, Clone, Default)]
pub struct ReturnFacts<'a> {
    calls: HashMap<ExprId, FactEnv<'a>>,
}

impl<'a> ReturnFacts<'a> {
    pub fn record(&mut self, call: ExprId, facts: FactEnv<'a>) {
        self.calls.insert(call, facts);
    }

    pub fn get_return_fact_for_invocation(
        &self,
        call: ExprId,
        var: VarId,
        cat: Category,
    ) -> Option<&'a Fact> {
        self.calls.get(&call)?.find(var, cat)
    }

    #[inline]
    pub fn contains(&self, call: ExprId) -> bool {
        self.calls.contains_key(&call)
    }
}

/// Where the value of an expression comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// A pointer value with known targets.
    Address(Vec<VarId>),
    /// Copied out of one of these storage locations.
    Stored(Vec<VarId>),
    /// Returned by the callee of a call expression.
    Returned { call: ExprId, rv: VarId },
}

impl<'a> Lattice<'a, '_> {
    /// Locations reached from `ptr` after `k` dereferences. Sentinels are
    /// carried through unchanged.
    pub fn merge_pointees_of_pointer(&self, ptr: VarId, k: usize, env: &FactEnv<'a>) -> Vec<VarId> {
        self.merge_pointees_of_pointers(&[ptr], k, env)
    }

    pub fn merge_pointees_of_pointers(
        &self,
        ptrs: &[VarId],
        k: usize,
        env: &FactEnv<'a>,
    ) -> Vec<VarId> {
        let mut curr: Vec<_> = ptrs.to_vec();
        for _ in 0..k {
            let mut next = vec![];
            for v in curr {
                if Program::is_special(v) {
                    next.push(v);
                    continue;
                }
                let fact = some_or!(env.point_to(self.prog.get_collective(v)), continue);
                next.extend(fact.point_to.iter().copied());
            }
            next.sort();
            next.dedup();
            curr = next;
        }
        curr
    }

    #[inline]
    pub fn is_dangling_ptr(&self, ptr: VarId, env: &FactEnv<'a>) -> bool {
        self.merge_pointees_of_pointer(ptr, 1, env)
            .contains(&Program::GARBAGE)
    }

    /// Points somewhere, and only to real variables.
    pub fn is_valid_ptr(&self, ptr: VarId, env: &FactEnv<'a>) -> bool {
        let pointees = self.merge_pointees_of_pointer(ptr, 1, env);
        !pointees.is_empty() && pointees.iter().all(|v| !Program::is_special(*v))
    }

    #[inline]
    pub fn is_special_ptr(&self, ptr: VarId, env: &FactEnv<'a>) -> bool {
        self.merge_pointees_of_pointer(ptr, 1, env)
            .iter()
            .any(|v| Program::is_special(*v))
    }

    /// Whether any of the first `indirection` levels of pointees of `ptr`
    /// lives in the frame of the function owning `block`.
    pub fn is_pointing_to_locals(
        &self,
        ptr: VarId,
        block: BlockId,
        indirection: usize,
        env: &FactEnv<'a>,
    ) -> bool {
        let func = self.prog[block].func;
        (1..=indirection).any(|k| {
            self.merge_pointees_of_pointer(ptr, k, env)
                .into_iter()
                .any(|v| self.is_frame_var_of(v, func))
        })
    }

    fn is_frame_var_of(&self, v: VarId, func: FuncId) -> bool {
        match self.prog.scope(v) {
            Scope::Param(f) => f == func,
            Scope::Local(b) => self.prog[b].func == func,
            _ => false,
        }
    }

    pub fn value_source(&self, e: ExprId, env: &FactEnv<'a>) -> ValueSource {
        match &self.prog[e] {
            Expr::Constant { ty, value } => {
                let null = *value == 0 && self.prog.size_in_bytes(*ty).map_or(false, |s| s >= 8);
                let target = if null { Program::NULL } else { Program::GARBAGE };
                ValueSource::Address(vec![target])
            }
            Expr::Var(ev) if ev.is_address_of() => ValueSource::Address(vec![ev.var]),
            Expr::Var(ev) => {
                ValueSource::Stored(self.merge_pointees_of_pointer(ev.var, ev.deref_level(), env))
            }
            Expr::Call(inv) => match inv.kind {
                Invoke::User(f) => ValueSource::Returned {
                    call: e,
                    rv: self.prog[f].rv,
                },
                _ => ValueSource::Address(vec![Program::GARBAGE]),
            },
            Expr::Assign(_, r) | Expr::Comma(_, r) => self.value_source(*r, env),
        }
    }

    /// Follows a field path from a location.
    fn sub_location(&self, v: VarId, path: &[usize]) -> Option<VarId> {
        path.iter()
            .try_fold(v, |v, fid| self.prog[v].fields.get(*fid).copied())
    }

    /// Pointees of the pointer reached through `path` in a value.
    fn source_pointees(
        &self,
        src: &ValueSource,
        path: &[usize],
        env: &FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) -> Vec<VarId> {
        match src {
            ValueSource::Address(targets) if path.is_empty() => targets.clone(),
            ValueSource::Address(_) => vec![Program::GARBAGE],
            ValueSource::Stored(locs) => {
                let mut subs = vec![];
                for l in locs {
                    if Program::is_special(*l) {
                        subs.push(*l);
                    } else if let Some(s) = self.sub_location(*l, path) {
                        subs.push(s);
                    }
                }
                self.merge_pointees_of_pointers(&subs, 1, env)
            }
            ValueSource::Returned { call, rv } => {
                let sub = some_or!(self.sub_location(*rv, path), return vec![Program::GARBAGE]);
                let fact = ret.get_return_fact_for_invocation(*call, sub, Category::PointTo);
                fact.and_then(|f| f.as_point_to())
                    .map_or_else(|| vec![Program::TBD], |f| f.point_to.clone())
            }
        }
    }

    fn source_union(
        &self,
        src: &ValueSource,
        path: &[usize],
        env: &FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) -> UnionField {
        match src {
            ValueSource::Address(_) => UnionField::Bottom,
            ValueSource::Stored(locs) => {
                // all locations share the union type, so the first one
                // stands in as the subject of the joined state
                let mut state: Option<Fact> = None;
                for l in locs {
                    let sub = some_or!(self.sub_location(*l, path), continue);
                    let sub = self.prog.get_collective(sub);
                    let field = env.union_field(sub).unwrap_or(UnionField::Bottom);
                    match &mut state {
                        None => state = Some(Fact::Union(FactUnion::new(sub, field))),
                        Some(s) => {
                            let other = Fact::Union(FactUnion::new(s.var(), field));
                            s.join(&other, self);
                        }
                    }
                }
                state
                    .as_ref()
                    .and_then(|s| s.as_union())
                    .map_or(UnionField::Bottom, |u| u.last_written)
            }
            ValueSource::Returned { call, rv } => {
                let sub = some_or!(self.sub_location(*rv, path), return UnionField::Bottom);
                ret.get_return_fact_for_invocation(*call, sub, Category::Union)
                    .and_then(|f| f.as_union())
                    .map_or(UnionField::Bottom, |u| u.last_written)
            }
        }
    }

    /// Writes the value of `src` at `path` into location `target`, field by
    /// field for aggregates.
    fn assign_location(
        &self,
        target: VarId,
        src: &ValueSource,
        path: &mut Vec<usize>,
        strong: bool,
        env: &mut FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) {
        let ty = self.prog[target].ty;
        let subject = self.prog.get_collective(target);
        let fact = match &self.prog[ty] {
            Type::Pointer(_) => {
                let pointees = self.source_pointees(src, path, env, ret);
                Some(self.make_point_to(subject, pointees))
            }
            Type::Union(_) => {
                let field = self.source_union(src, path, env, ret);
                Some(self.make_union(subject, field))
            }
            _ => None,
        };
        if let Some(fact) = fact {
            if strong {
                env.update_fact(fact);
            } else {
                env.merge_fact(fact, self);
            }
        }
        for (fid, field) in self.prog[target].fields.clone().into_iter().enumerate() {
            if !self.prog.has_tracked_facts(self.prog[field].ty) {
                continue;
            }
            path.push(fid);
            self.assign_location(field, src, path, strong, env, ret);
            path.pop();
        }
    }

    /// Storage locations written by `lhs`.
    pub fn lhs_locations(&self, lhs: Lhs, env: &FactEnv<'a>) -> Vec<VarId> {
        let mut locs = self.merge_pointees_of_pointer(lhs.var, lhs.indirect, env);
        locs.retain(|v| !Program::is_special(*v));
        locs
    }

    fn is_strong_target(&self, locs: &[VarId]) -> bool {
        let [v] = locs else { return false };
        !self.prog.is_itemized(*v) && !self.prog.is_array(self.prog.root_var(*v))
    }

    /// Points-to and union transfer for `lhs = rhs`.
    pub fn abstract_fact_for_assign(
        &self,
        lhs: Lhs,
        rhs: ExprId,
        env: &mut FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) {
        let src = self.value_source(rhs, env);
        let locs = self.lhs_locations(lhs, env);
        let strong = self.is_strong_target(&locs);
        for loc in &locs {
            self.assign_location(*loc, &src, &mut vec![], strong, env, ret);
            self.record_union_write(*loc, strong, env);
        }
        for loc in locs {
            self.update_facts_with_modified_index(env, loc);
        }
    }

    /// Writing inside a union makes the enclosing field the live one. Pointer
    /// storage in the other fields no longer holds a usable value.
    fn record_union_write(&self, loc: VarId, strong: bool, env: &mut FactEnv<'a>) {
        for (u, fid) in self.prog.enclosing_unions(loc) {
            let subject = self.prog.get_collective(u);
            let fact = self.make_union(subject, UnionField::Field(fid));
            if strong {
                env.update_fact(fact);
            } else {
                env.merge_fact(fact, self);
            }
            let live = self.prog[u].fields[fid];
            for (i, sibling) in self.prog[u].fields.iter().enumerate() {
                if i == fid {
                    continue;
                }
                for v in self.prog.derived_vars(*sibling) {
                    if !self.prog.is_pointer(v) || self.prog.is_within(v, live) {
                        continue;
                    }
                    let fact = if self.prog.is_pointer(live) && v == *sibling {
                        let pointees = self.merge_pointees_of_pointer(live, 1, env);
                        self.make_point_to(self.prog.get_collective(v), pointees)
                    } else {
                        self.make_point_to(self.prog.get_collective(v), [Program::GARBAGE])
                    };
                    env.update_fact(fact);
                }
            }
        }
    }

    /// The return pseudo-variable takes the value of the returned expression.
    pub fn abstract_fact_for_return(
        &self,
        ev: ExprVar,
        rv: VarId,
        env: &mut FactEnv<'a>,
        ret: &ReturnFacts<'a>,
    ) {
        let src = if ev.is_address_of() {
            ValueSource::Address(vec![ev.var])
        } else {
            ValueSource::Stored(self.merge_pointees_of_pointer(ev.var, ev.deref_level(), env))
        };
        self.assign_location(rv, &src, &mut vec![], true, env, ret);
    }

    /// Initial facts of a variable declared without an initializer.
    pub fn add_new_var_fact(&self, v: VarId, uninit: VarId, env: &mut FactEnv<'a>) {
        let subject = self.prog.get_collective(v);
        match &self.prog[self.prog[v].ty] {
            Type::Pointer(_) => {
                env.update_fact(self.make_point_to(subject, [uninit]));
            }
            Type::Union(_) => {
                env.update_fact(self.make_union(subject, UnionField::Field(0)));
            }
            _ => {}
        }
        for f in self.prog[v].fields.clone() {
            self.add_new_var_fact(f, uninit, env);
        }
    }

    /// Array members indexed by a variable that was just written no longer
    /// denote a known element; degrade them to their collective array.
    pub fn update_facts_with_modified_index(&self, env: &mut FactEnv<'a>, index: VarId) {
        let stale = |v: &VarId| {
            self.prog
                .index_vars(*v)
                .iter()
                .any(|i| self.prog.loose_match(*i, index))
        };
        let facts: Vec<_> = env.iter().collect();
        for fact in facts {
            let Fact::PointTo(p) = fact else { continue };
            if !p.point_to.iter().any(stale) {
                continue;
            }
            let pointees = p.point_to.iter().map(|v| {
                if stale(v) {
                    self.prog.get_collective(*v)
                } else {
                    *v
                }
            });
            env.update_fact(self.make_point_to(p.var, pointees));
        }
    }

    /// Drops facts about variables leaving scope and turns pointers to them
    /// into dangling pointers.
    pub fn update_facts_for_oos_vars(&self, vars: &[VarId], env: &mut FactEnv<'a>) {
        let dead: Vec<_> = vars
            .iter()
            .flat_map(|v| self.prog.derived_vars(*v))
            .collect();
        env.retain(|f| !dead.contains(&f.var()));
        let facts: Vec<_> = env.iter().collect();
        for fact in facts {
            let Fact::PointTo(p) = fact else { continue };
            if !p.point_to.iter().any(|v| dead.contains(v)) {
                continue;
            }
            let pointees = p.point_to.iter().map(|v| {
                if dead.contains(v) {
                    Program::GARBAGE
                } else {
                    *v
                }
            });
            env.update_fact(self.make_point_to(p.var, pointees));
        }
    }

    #[inline]
    pub fn mark_dead_vars(&self, vars: &[VarId], env: &mut FactEnv<'a>) {
        self.update_facts_for_oos_vars(vars, env)
    }
}

/// Whether reading `v` would observe a union field other than the live one.
pub fn is_nonreadable_field(
    prog: &Program,
    v: VarId,
    env: &FactEnv<'_>,
    type_sensitive: bool,
) -> bool {
    prog.enclosing_unions(v).into_iter().any(|(u, fid)| {
        let subject = prog.get_collective(u);
        let field = some_or!(env.union_field(subject), return false);
        let state = FactUnion::new(subject, field);
        let read = FactUnion::new(subject, UnionField::Field(fid));
        !state.imply(&read, prog, type_sensitive)
    })
}
