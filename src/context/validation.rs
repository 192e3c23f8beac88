use super::*;
use crate::facts::{is_nonreadable_field, FactEnv};

/// Where a variable lives relative to the current construction point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Global,
    Param,
    /// Local of an enclosing block at the given nesting depth.
    Block(usize),
    /// In the frame of some caller but not lexically visible.
    Invisible,
    Inactive,
}

impl<'a> CGContext<'a, '_> {
    pub fn is_nonreadable(&self, v: VarId) -> bool {
        let prog = self.prog();
        self.rw_directive
            .as_deref()
            .map_or(false, |d| d.no_read.iter().any(|u| prog.loose_match(*u, v)))
    }

    /// Also true for (any part overlapping) a loop induction variable.
    pub fn is_nonwritable(&self, v: VarId) -> bool {
        let prog = self.prog();
        self.rw_directive
            .as_deref()
            .map_or(false, |d| d.no_write.iter().any(|u| prog.loose_match(*u, v)))
            || self.iv_bounds.keys().any(|iv| {
                prog.loose_match(*iv, v) || prog.is_within(*iv, v) || prog.is_within(v, *iv)
            })
    }

    /// Volatile accesses are only allowed when nothing around them has side
    /// effects.
    #[inline]
    pub fn allow_volatile(&self) -> bool {
        self.effect_context.is_side_effect_free()
    }

    #[inline]
    pub fn allow_const(&self, v: VarId) -> bool {
        !self.prog().is_const(v)
    }

    #[inline]
    fn is_noisy(&self, v: VarId) -> bool {
        self.prog().is_volatile(v) || self.prog().is_access_once(v)
    }

    /// Whether `v` belongs to the frame of the current function.
    pub fn is_frame_var(&self, v: VarId) -> bool {
        match self.prog().scope(v) {
            Scope::Param(f) | Scope::ReturnValue(f) => f == self.func,
            Scope::Local(b) => self.prog()[b].func == self.func,
            Scope::Global | Scope::Sentinel => false,
        }
    }

    /// Runs `check`, dropping the effects it recorded unless it passes.
    fn all_or_nothing<F>(&mut self, check: F) -> bool
    where F: FnOnce(&mut Self) -> bool {
        let saved = (self.effect_accum.clone(), self.effect_stm.clone());
        let ok = check(self);
        if !ok {
            (self.effect_accum, self.effect_stm) = saved;
        }
        ok
    }

    pub fn read_indices(&mut self, v: VarId, env: &FactEnv<'a>) -> bool {
        let indices = self.prog().index_vars(v);
        self.all_or_nothing(|this| indices.into_iter().all(|i| this.check_read_var(i, env)))
    }

    pub fn check_read_var(&mut self, v: VarId, env: &FactEnv<'a>) -> bool {
        self.check_read(v, env, false)
    }

    /// A pointer read in order to be dereferenced may be dangling; the
    /// dereference itself decides.
    fn check_read(&mut self, v: VarId, env: &FactEnv<'a>, deref: bool) -> bool {
        self.all_or_nothing(|this| this.try_check_read(v, env, deref))
    }

    fn try_check_read(&mut self, v: VarId, env: &FactEnv<'a>, deref: bool) -> bool {
        let prog = self.prog();
        if !self.read_indices(v, env) {
            return false;
        }
        if is_nonreadable_field(prog, v, env, self.opts.union_read_type_sensitive)
            || self.is_nonreadable(v)
            || self.effect_context.is_written_partially(v, prog)
            || (self.is_noisy(v) && !self.allow_volatile())
            || (!deref && prog.is_pointer(v) && self.lat.is_dangling_ptr(v, env))
        {
            tracing::trace!("read of {} rejected", prog.name(v));
            return false;
        }
        self.read_var(v);
        true
    }

    pub fn check_write_var(&mut self, v: VarId, env: &FactEnv<'a>) -> bool {
        self.check_write(v, env, false)
    }

    fn check_write(&mut self, v: VarId, env: &FactEnv<'a>, lhs: bool) -> bool {
        self.all_or_nothing(|this| this.try_check_write(v, env, lhs))
    }

    fn try_check_write(&mut self, v: VarId, env: &FactEnv<'a>, lhs: bool) -> bool {
        let prog = self.prog();
        if !self.allow_const(v) || !self.read_indices(v, env) {
            return false;
        }
        if self.is_nonwritable(v)
            || self.effect_context.is_read_partially(v, prog)
            || self.effect_context.is_written_partially(v, prog)
            || (self.is_noisy(v) && !self.allow_volatile())
            || (self.flags.contains(Flags::NO_DANGLING_PTR)
                && prog.is_pointer(v)
                && self.lat.is_dangling_ptr(v, env))
        {
            tracing::trace!("write of {} rejected", prog.name(v));
            return false;
        }
        self.write_var(v, lhs);
        true
    }

    /// Under the strict volatile rule, no dereference may reach a volatile
    /// object while the surrounding code has side effects.
    pub fn check_deref_volatile(&self, v: VarId, level: usize) -> bool {
        !(self.opts.strict_volatile_rule
            && !self.effect_context.is_side_effect_free()
            && self.prog().is_volatile_after_deref(v, level))
    }

    /// Resolves the dereferences of `var` level by level, validating every
    /// intermediate pointer read and the final access. Rolls back recorded
    /// effects on failure.
    fn access_pointed(&mut self, var: VarId, levels: usize, write: bool, env: &FactEnv<'a>) -> bool {
        self.all_or_nothing(|this| this.try_access_pointed(var, levels, write, env))
    }

    fn try_access_pointed(&mut self, var: VarId, levels: usize, write: bool, env: &FactEnv<'a>) -> bool {
        if levels == 0 {
            return if write {
                self.check_write(var, env, true)
            } else {
                self.check_read_var(var, env)
            };
        }
        if !self.check_read(var, env, true) {
            return false;
        }
        let mut curr = vec![var];
        for level in 1..=levels {
            if !self.check_deref_volatile(var, level) {
                return false;
            }
            let mut pointees = self.lat.merge_pointees_of_pointers(&curr, 1, env);
            if pointees.is_empty() {
                return false;
            }
            pointees.retain(|v| *v != Program::TBD);
            if pointees.contains(&Program::NULL)
                && !self.dither.allow(self.opts.null_pointer_dereference_prob)
            {
                tracing::trace!("null dereference of {} rejected", self.prog().name(var));
                return false;
            }
            if pointees.contains(&Program::GARBAGE)
                && !self.dither.allow(self.opts.dead_pointer_dereference_prob)
            {
                tracing::trace!("dead dereference of {} rejected", self.prog().name(var));
                return false;
            }
            pointees.retain(|v| !Program::is_special(*v));
            for p in &pointees {
                let ok = if level < levels {
                    self.check_read(*p, env, true)
                } else if write {
                    self.check_write(*p, env, true)
                } else {
                    self.check_read_var(*p, env)
                };
                if !ok {
                    return false;
                }
            }
            curr = pointees;
        }
        true
    }

    pub fn read_pointed(&mut self, ev: ExprVar, env: &FactEnv<'a>) -> bool {
        self.access_pointed(ev.var, ev.deref_level(), false, env)
    }

    pub fn write_pointed(&mut self, lhs: Lhs, env: &FactEnv<'a>) -> bool {
        self.access_pointed(lhs.var, lhs.indirect, true, env)
    }

    pub fn find_variable_scope(&self, v: VarId) -> Visibility {
        let prog = self.prog();
        match prog.scope(v) {
            Scope::Global | Scope::Sentinel => Visibility::Global,
            Scope::Param(f) | Scope::ReturnValue(f) if f == self.func => Visibility::Param,
            Scope::Param(f) | Scope::ReturnValue(f) => {
                if self.call_chain.iter().any(|b| prog[*b].func == f) {
                    Visibility::Invisible
                } else {
                    Visibility::Inactive
                }
            }
            Scope::Local(b) => {
                if prog.block_encloses(b, self.block) {
                    Visibility::Block(prog.block_depth(b))
                } else if self.call_chain.iter().any(|c| prog.block_encloses(b, *c)) {
                    Visibility::Invisible
                } else {
                    Visibility::Inactive
                }
            }
        }
    }

    /// Whether calling code with effect `e` from here would break a
    /// constraint of this context.
    pub fn in_conflict(&self, e: &Effect) -> bool {
        let prog = self.prog();
        let volatile_blocked = !self.allow_volatile();
        e.read_vars().iter().any(|v| {
            self.is_nonreadable(*v)
                || self.effect_context.is_written_partially(*v, prog)
                || (volatile_blocked && self.is_noisy(*v))
        }) || e.write_vars().iter().any(|v| {
            self.is_nonwritable(*v)
                || !self.allow_const(*v)
                || self.effect_context.is_read_partially(*v, prog)
                || self.effect_context.is_written_partially(*v, prog)
                || (volatile_blocked && self.is_noisy(*v))
        })
    }

    pub fn choose_readable(&mut self, candidates: &[VarId], env: &FactEnv<'a>) -> Option<VarId> {
        candidates
            .iter()
            .copied()
            .find(|v| self.check_read_var(*v, env))
    }

    pub fn choose_writable(&mut self, candidates: &[VarId], env: &FactEnv<'a>) -> Option<VarId> {
        candidates
            .iter()
            .copied()
            .find(|v| self.check_write_var(*v, env))
    }
}
