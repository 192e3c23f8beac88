#[cfg(test)]
mod tests;

use crate::program::*;

/// Read/write footprint of a piece of code.
#[derive(Clone, PartialEq, Eq)]
pub struct Effect {
    read_vars: Vec<VarId>,
    write_vars: Vec<VarId>,
    /// Writes performed by assignment targets, a subset of `write_vars`.
    lhs_write_vars: Vec<VarId>,
    pure: bool,
    side_effect_free: bool,
}

impl Default for Effect {
    fn default() -> Self {
        Self {
            read_vars: vec![],
            write_vars: vec![],
            lhs_write_vars: vec![],
            pure: true,
            side_effect_free: true,
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "R{:?} W{:?}{}{}",
            self.read_vars,
            self.write_vars,
            if self.pure { " pure" } else { "" },
            if self.side_effect_free { " sef" } else { "" },
        )
    }
}

#[inline]
fn insert(vars: &mut Vec<VarId>, v: VarId) -> bool {
    if vars.contains(&v) {
        false
    } else {
        vars.push(v);
        true
    }
}

impl Effect {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn read_vars(&self) -> &[VarId] {
        &self.read_vars
    }

    #[inline]
    pub fn write_vars(&self) -> &[VarId] {
        &self.write_vars
    }

    #[inline]
    pub fn lhs_write_vars(&self) -> &[VarId] {
        &self.lhs_write_vars
    }

    #[inline]
    pub fn is_pure(&self) -> bool {
        self.pure
    }

    #[inline]
    pub fn is_side_effect_free(&self) -> bool {
        self.side_effect_free
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_vars.is_empty() && self.write_vars.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[inline]
    fn is_pure_read(v: VarId, prog: &Program) -> bool {
        prog.is_const(v) && !prog.is_volatile(v) && !prog.is_access_once(v)
    }

    #[inline]
    fn is_quiet(v: VarId, prog: &Program) -> bool {
        !prog.is_volatile(v) && !prog.is_access_once(v)
    }

    pub fn read_var(&mut self, v: VarId, prog: &Program) {
        if insert(&mut self.read_vars, v) {
            self.pure &= Self::is_pure_read(v, prog);
            self.side_effect_free &= Self::is_quiet(v, prog);
        }
    }

    pub fn write_var(&mut self, v: VarId, prog: &Program) {
        insert(&mut self.write_vars, v);
        self.pure = false;
        self.side_effect_free &= Self::is_quiet(v, prog);
    }

    pub fn write_lhs_var(&mut self, v: VarId, prog: &Program) {
        self.write_var(v, prog);
        insert(&mut self.lhs_write_vars, v);
    }

    pub fn add_effect(&mut self, other: &Self, include_lhs_effects: bool) {
        for v in &other.read_vars {
            insert(&mut self.read_vars, *v);
        }
        for v in &other.write_vars {
            insert(&mut self.write_vars, *v);
        }
        if include_lhs_effects {
            for v in &other.lhs_write_vars {
                insert(&mut self.lhs_write_vars, *v);
            }
        }
        self.pure &= other.pure;
        self.side_effect_free &= other.side_effect_free;
    }

    /// Adds the part of `other` observable outside a callee: globals, and
    /// with a call chain, variables visible in some block of the chain.
    pub fn add_external_effect(&mut self, other: &Self, call_chain: Option<&[BlockId]>, prog: &Program) {
        let visible = |v: VarId| {
            prog.is_global(v)
                || call_chain.map_or(false, |chain| chain.iter().any(|b| prog.is_visible_in(v, *b)))
        };
        for v in &other.read_vars {
            if visible(*v) {
                insert(&mut self.read_vars, *v);
            }
        }
        for v in &other.write_vars {
            if visible(*v) {
                insert(&mut self.write_vars, *v);
            }
        }
        self.pure &= other.pure;
        self.side_effect_free &= other.side_effect_free;
    }

    /// Only the writes of this effect.
    pub fn writes_only(&self) -> Self {
        Self {
            read_vars: vec![],
            write_vars: self.write_vars.clone(),
            lhs_write_vars: self.lhs_write_vars.clone(),
            pure: self.write_vars.is_empty(),
            side_effect_free: self.side_effect_free,
        }
    }

    pub fn is_read(&self, v: VarId, prog: &Program) -> bool {
        self.read_vars.iter().any(|r| prog.loose_match(*r, v))
    }

    pub fn is_written(&self, v: VarId, prog: &Program) -> bool {
        self.write_vars.iter().any(|w| prog.loose_match(*w, v))
    }

    /// Some proper part of `v` or some aggregate containing it is in `vars`.
    fn overlaps(vars: &[VarId], v: VarId, prog: &Program) -> bool {
        let cv = prog.get_collective(v);
        vars.iter().any(|u| {
            let cu = prog.get_collective(*u);
            prog.is_within(cu, cv) || prog.is_within(cv, cu)
        })
    }

    pub fn field_is_read(&self, v: VarId, prog: &Program) -> bool {
        Self::overlaps(&self.read_vars, v, prog)
    }

    pub fn field_is_written(&self, v: VarId, prog: &Program) -> bool {
        Self::overlaps(&self.write_vars, v, prog)
    }

    /// Another field of a union enclosing `v` is in `vars`.
    fn sibling_in(vars: &[VarId], v: VarId, prog: &Program) -> bool {
        prog.enclosing_unions(v).into_iter().any(|(u, fid)| {
            let cu = prog.get_collective(u);
            let live = prog[cu].fields[fid];
            vars.iter().any(|w| {
                let cw = prog.get_collective(*w);
                cw != cu && prog.is_within(cw, cu) && !prog.is_within(cw, live)
            })
        })
    }

    pub fn sibling_union_field_is_read(&self, v: VarId, prog: &Program) -> bool {
        Self::sibling_in(&self.read_vars, v, prog)
    }

    pub fn sibling_union_field_is_written(&self, v: VarId, prog: &Program) -> bool {
        Self::sibling_in(&self.write_vars, v, prog)
    }

    pub fn is_read_partially(&self, v: VarId, prog: &Program) -> bool {
        self.is_read(v, prog)
            || self.field_is_read(v, prog)
            || self.sibling_union_field_is_read(v, prog)
    }

    pub fn is_written_partially(&self, v: VarId, prog: &Program) -> bool {
        self.is_written(v, prog)
            || self.field_is_written(v, prog)
            || self.sibling_union_field_is_written(v, prog)
    }

    pub fn union_field_is_read(&self, prog: &Program) -> bool {
        self.read_vars.iter().any(|v| prog.is_union_field(*v))
    }

    pub fn union_field_is_written(&self, prog: &Program) -> bool {
        self.write_vars.iter().any(|v| prog.is_union_field(*v))
    }

    /// The two effects cannot be evaluated in unspecified order.
    pub fn has_race_with(&self, other: &Self, prog: &Program) -> bool {
        self.read_vars
            .iter()
            .any(|v| other.is_written_partially(*v, prog))
            || self
                .write_vars
                .iter()
                .any(|v| other.is_read_partially(*v, prog) || other.is_written_partially(*v, prog))
    }

    pub fn has_global_effect(&self, prog: &Program) -> bool {
        self.read_vars
            .iter()
            .chain(self.write_vars.iter())
            .any(|v| prog.is_global(*v))
    }

    /// Recomputes the flags from the recorded accesses.
    pub fn update_purity(&mut self, prog: &Program) {
        self.pure = self.write_vars.is_empty()
            && self.read_vars.iter().all(|v| Self::is_pure_read(*v, prog));
        self.side_effect_free = self
            .read_vars
            .iter()
            .chain(self.write_vars.iter())
            .all(|v| Self::is_quiet(*v, prog));
    }

    /// Drops accesses already covered by an enclosing aggregate or collective
    /// array in the same set.
    pub fn consolidate(&mut self, prog: &Program) {
        fn covered(vars: &[VarId], prog: &Program) -> Vec<VarId> {
            vars.iter()
                .copied()
                .filter(|v| {
                    !vars.iter().any(|u| {
                        u != v
                            && (prog.is_within(*v, *u)
                                || (prog.is_itemized(*v) && prog.get_collective(*v) == *u))
                    })
                })
                .collect()
        }
        self.read_vars = covered(&self.read_vars, prog);
        self.write_vars = covered(&self.write_vars, prog);
        self.lhs_write_vars = covered(&self.lhs_write_vars, prog);
    }

    pub fn display<'e>(&'e self, prog: &'e Program) -> EffectDisplay<'e> {
        EffectDisplay { effect: self, prog }
    }
}

pub struct EffectDisplay<'e> {
    effect: &'e Effect,
    prog: &'e Program,
}

impl std::fmt::Display for EffectDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |vars: &[VarId]| {
            vars.iter()
                .map(|v| self.prog.name(*v))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "read: [{}], write: [{}]",
            names(&self.effect.read_vars),
            names(&self.effect.write_vars)
        )?;
        if self.effect.pure {
            write!(f, ", pure")?;
        }
        if self.effect.side_effect_free {
            write!(f, ", side-effect free")?;
        }
        Ok(())
    }
}
