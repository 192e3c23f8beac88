use std::rc::Rc;

use super::*;

/// How a child context is derived from its parent. Every kind starts with
/// fresh accumulators, to be merged back with `merge_param_context`.
///
/// | kind       | changed                                               |
/// |------------|-------------------------------------------------------|
/// | `Param`    | effect context replaced                               |
/// | `Callee`   | depths 0, caller block appended to the chain, no ivs, no directive, no `IN_LOOP` |
/// | `LoopBody` | iv added, `IN_LOOP`, directive replaced if given      |
/// | `Block`    | current block, block depth + 1                        |
/// | `Expr`     | expression depth + 1                                  |
#[derive(Debug, Clone)]
pub enum Derive {
    Param {
        context: Effect,
    },
    Callee {
        func: FuncId,
        block: BlockId,
    },
    LoopBody {
        iv: VarId,
        bound: u32,
        directive: Option<Rc<RwDirective>>,
    },
    Block(BlockId),
    Expr,
}

impl CGContext<'_, '_> {
    pub fn derive(&self, kind: Derive) -> Self {
        let mut ctx = self.clone();
        ctx.effect_accum = Some(Effect::new());
        ctx.effect_stm = Effect::new();
        match kind {
            Derive::Param { context } => {
                ctx.effect_context = context;
            }
            Derive::Callee { func, block } => {
                ctx.func = func;
                ctx.block = ctx.prog()[func].body;
                ctx.blk_depth = 0;
                ctx.expr_depth = 0;
                ctx.call_chain.push(block);
                ctx.iv_bounds.clear();
                ctx.rw_directive = None;
                ctx.flags.remove(Flags::IN_LOOP);
            }
            Derive::LoopBody {
                iv,
                bound,
                directive,
            } => {
                ctx.iv_bounds.insert(iv, bound);
                ctx.flags.insert(Flags::IN_LOOP);
                if directive.is_some() {
                    ctx.rw_directive = directive;
                }
            }
            Derive::Block(b) => {
                ctx.block = b;
                ctx.blk_depth += 1;
            }
            Derive::Expr => {
                ctx.expr_depth += 1;
            }
        }
        ctx
    }

    /// Effect context for code evaluated after `prior` without a sequence
    /// point in between.
    pub fn context_with(&self, prior: &Effect) -> Effect {
        let mut e = self.effect_context.clone();
        e.add_effect(prior, false);
        e
    }
}
