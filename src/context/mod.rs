mod derive;
mod validation;

use std::{collections::HashMap, rc::Rc};

pub use derive::*;
pub use validation::*;

use crate::{effect::Effect, facts::Lattice, options::*, program::*};

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Self = Self(0);
    pub const NO_RETURN: Self = Self(1);
    pub const IN_LOOP: Self = Self(1 << 1);
    pub const NO_DANGLING_PTR: Self = Self(1 << 2);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = vec![];
        if self.contains(Self::NO_RETURN) {
            names.push("NO_RETURN");
        }
        if self.contains(Self::IN_LOOP) {
            names.push("IN_LOOP");
        }
        if self.contains(Self::NO_DANGLING_PTR) {
            names.push("NO_DANGLING_PTR");
        }
        write!(f, "{}", names.join("|"))
    }
}

/// Variables that must or must not be read or written by the code being
/// generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RwDirective {
    pub must_read: Vec<VarId>,
    pub must_write: Vec<VarId>,
    pub no_read: Vec<VarId>,
    pub no_write: Vec<VarId>,
}

/// State threaded through the construction of one piece of code.
#[derive(Clone)]
pub struct CGContext<'a, 'p> {
    lat: Lattice<'a, 'p>,
    opts: &'p Options,
    func: FuncId,
    block: BlockId,
    blk_depth: usize,
    expr_depth: usize,
    flags: Flags,
    /// Blocks of the callers, outermost first.
    call_chain: Vec<BlockId>,
    /// Induction variables of the enclosing loops.
    iv_bounds: HashMap<VarId, u32>,
    rw_directive: Option<Rc<RwDirective>>,
    effect_context: Effect,
    /// `None` disables tracking.
    effect_accum: Option<Effect>,
    effect_stm: Effect,
    dither: Rc<Dither>,
}

impl std::fmt::Debug for CGContext<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CGContext")
            .field("func", &self.func)
            .field("block", &self.block)
            .field("blk_depth", &self.blk_depth)
            .field("expr_depth", &self.expr_depth)
            .field("flags", &self.flags)
            .field("call_chain", &self.call_chain)
            .field("effect_context", &self.effect_context)
            .field("effect_accum", &self.effect_accum)
            .finish()
    }
}

impl<'a, 'p> CGContext<'a, 'p> {
    pub fn new(lat: Lattice<'a, 'p>, opts: &'p Options, func: FuncId, dither: Rc<Dither>) -> Self {
        Self {
            lat,
            opts,
            func,
            block: lat.prog[func].body,
            blk_depth: 0,
            expr_depth: 0,
            flags: Flags::NONE,
            call_chain: vec![],
            iv_bounds: HashMap::new(),
            rw_directive: None,
            effect_context: Effect::new(),
            effect_accum: Some(Effect::new()),
            effect_stm: Effect::new(),
            dither,
        }
    }

    #[inline]
    pub fn prog(&self) -> &'p Program {
        self.lat.prog
    }

    #[inline]
    pub fn lattice(&self) -> &Lattice<'a, 'p> {
        &self.lat
    }

    #[inline]
    pub fn opts(&self) -> &'p Options {
        self.opts
    }

    #[inline]
    pub fn func(&self) -> FuncId {
        self.func
    }

    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }

    #[inline]
    pub fn blk_depth(&self) -> usize {
        self.blk_depth
    }

    #[inline]
    pub fn expr_depth(&self) -> usize {
        self.expr_depth
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flags) {
        self.flags.insert(flag);
    }

    #[inline]
    pub fn call_chain(&self) -> &[BlockId] {
        &self.call_chain
    }

    #[inline]
    pub fn iv_bounds(&self) -> &HashMap<VarId, u32> {
        &self.iv_bounds
    }

    #[inline]
    pub fn rw_directive(&self) -> Option<&RwDirective> {
        self.rw_directive.as_deref()
    }

    #[inline]
    pub fn set_rw_directive(&mut self, directive: RwDirective) {
        self.rw_directive = Some(Rc::new(directive));
    }

    #[inline]
    pub fn effect_context(&self) -> &Effect {
        &self.effect_context
    }

    #[inline]
    pub fn accum(&self) -> Option<&Effect> {
        self.effect_accum.as_ref()
    }

    #[inline]
    pub fn effect_stm(&self) -> &Effect {
        &self.effect_stm
    }

    #[inline]
    pub fn disable_tracking(&mut self) {
        self.effect_accum = None;
    }

    /// Starts accumulating the effect of a new statement.
    #[inline]
    pub fn new_stmt(&mut self) {
        self.effect_stm.clear();
    }

    #[inline]
    pub fn dither(&self) -> &Dither {
        &self.dither
    }

    pub(crate) fn read_var(&mut self, v: VarId) {
        let prog = self.prog();
        if let Some(accum) = &mut self.effect_accum {
            accum.read_var(v, prog);
        }
        self.effect_stm.read_var(v, prog);
    }

    pub(crate) fn write_var(&mut self, v: VarId, lhs: bool) {
        let prog = self.prog();
        if let Some(accum) = &mut self.effect_accum {
            if lhs {
                accum.write_lhs_var(v, prog);
            } else {
                accum.write_var(v, prog);
            }
        }
        if lhs {
            self.effect_stm.write_lhs_var(v, prog);
        } else {
            self.effect_stm.write_var(v, prog);
        }
    }

    pub fn add_effect(&mut self, e: &Effect, include_lhs_effects: bool) {
        if let Some(accum) = &mut self.effect_accum {
            accum.add_effect(e, include_lhs_effects);
        }
        self.effect_stm.add_effect(e, include_lhs_effects);
    }

    /// The caller blocks plus the current one.
    pub fn extend_call_chain(&self) -> Vec<BlockId> {
        let mut chain = self.call_chain.clone();
        chain.push(self.block);
        chain
    }

    /// Adds the part of a callee effect visible from this point.
    pub fn add_external_effect(&mut self, e: &Effect) {
        let chain = self.extend_call_chain();
        let prog = self.prog();
        if let Some(accum) = &mut self.effect_accum {
            accum.add_external_effect(e, Some(&chain), prog);
        }
        self.effect_stm.add_external_effect(e, Some(&chain), prog);
    }

    /// Adds the accesses of `e` to variables visible in `block` only.
    pub fn add_visible_effect(&mut self, e: &Effect, block: BlockId) {
        let prog = self.prog();
        let mut visible = Effect::new();
        for v in e.read_vars() {
            if prog.is_visible_in(*v, block) {
                visible.read_var(*v, prog);
            }
        }
        for v in e.write_vars() {
            if prog.is_visible_in(*v, block) {
                visible.write_var(*v, prog);
            }
        }
        self.add_effect(&visible, false);
    }

    /// Absorbs what a derived context accumulated.
    pub fn merge_param_context(&mut self, child: &Self) {
        if let Some(e) = &child.effect_accum {
            self.add_effect(e, true);
        }
    }
}
