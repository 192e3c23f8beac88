use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Param(FuncId),
    Local(BlockId),
    ReturnValue(FuncId),
    Sentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    Const(u64),
    Var(VarId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKind {
    Plain,
    Field { parent: VarId, fid: usize },
    /// An itemized array element such as `a[i][2]`.
    ArrayMember { collective: VarId, indices: Vec<Index> },
}

/// Const/volatile qualifiers, one entry per dereference level starting with
/// the variable itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quals {
    pub consts: Vec<bool>,
    pub volatiles: Vec<bool>,
}

impl Quals {
    pub fn none(levels: usize) -> Self {
        Self {
            consts: vec![false; levels],
            volatiles: vec![false; levels],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: TypeId,
    pub quals: Quals,
    pub scope: Scope,
    pub kind: VarKind,
    pub access_once: bool,
    /// Array dimensions of a collective array variable.
    pub dims: Vec<usize>,
    /// Field variables of an aggregate, in field order.
    pub fields: Vec<VarId>,
    pub init: Option<ExprId>,
}

impl Variable {
    pub(super) fn sentinel(name: &str, ty: TypeId) -> Self {
        Self {
            name: name.to_string(),
            ty,
            quals: Quals::none(1),
            scope: Scope::Sentinel,
            kind: VarKind::Plain,
            access_once: false,
            dims: vec![],
            fields: vec![],
            init: None,
        }
    }
}

impl Program {
    #[inline]
    pub fn is_pointer(&self, v: VarId) -> bool {
        self[self[v].ty].is_pointer()
    }

    #[inline]
    pub fn is_const(&self, v: VarId) -> bool {
        self.is_const_after_deref(v, 0)
    }

    #[inline]
    pub fn is_volatile(&self, v: VarId) -> bool {
        self.is_volatile_after_deref(v, 0)
    }

    #[inline]
    pub fn is_access_once(&self, v: VarId) -> bool {
        self[v].access_once
    }

    #[inline]
    pub fn is_const_after_deref(&self, v: VarId, n: usize) -> bool {
        self[v].quals.consts.get(n).copied().unwrap_or(false)
    }

    #[inline]
    pub fn is_volatile_after_deref(&self, v: VarId, n: usize) -> bool {
        self[v].quals.volatiles.get(n).copied().unwrap_or(false)
    }

    #[inline]
    pub fn is_array(&self, v: VarId) -> bool {
        !self[v].dims.is_empty()
    }

    /// The declared variable that `v` is a field or member of.
    pub fn root_var(&self, v: VarId) -> VarId {
        match &self[v].kind {
            VarKind::Plain => v,
            VarKind::Field { parent, .. } => self.root_var(*parent),
            VarKind::ArrayMember { collective, .. } => self.root_var(*collective),
        }
    }

    #[inline]
    pub fn is_global(&self, v: VarId) -> bool {
        self[self.root_var(v)].scope == Scope::Global
    }

    #[inline]
    pub fn is_local(&self, v: VarId) -> bool {
        matches!(self[self.root_var(v)].scope, Scope::Local(_))
    }

    #[inline]
    pub fn scope(&self, v: VarId) -> Scope {
        self[self.root_var(v)].scope
    }

    #[inline]
    pub fn field_var_of(&self, v: VarId) -> Option<(VarId, usize)> {
        match self[v].kind {
            VarKind::Field { parent, fid } => Some((parent, fid)),
            _ => None,
        }
    }

    pub fn is_union_field(&self, v: VarId) -> bool {
        self.field_var_of(v)
            .map_or(false, |(parent, _)| self[self[parent].ty].is_union())
    }

    /// Union variables enclosing `v`, each with the field index leading to
    /// `v`, innermost first.
    pub fn enclosing_unions(&self, v: VarId) -> Vec<(VarId, usize)> {
        let mut unions = vec![];
        let mut curr = v;
        while let Some((parent, fid)) = self.field_var_of(curr) {
            if self[self[parent].ty].is_union() {
                unions.push((parent, fid));
            }
            curr = parent;
        }
        unions
    }

    /// Whether `v` is `agg` or nested (through fields) inside it.
    pub fn is_within(&self, v: VarId, agg: VarId) -> bool {
        let mut curr = v;
        loop {
            if curr == agg {
                return true;
            }
            curr = match self.field_var_of(curr) {
                Some((parent, _)) => parent,
                None => return false,
            };
        }
    }

    /// The representative variable used for aggregate-level tracking: array
    /// members map to their array and fields of members to the matching
    /// field of the array.
    pub fn get_collective(&self, v: VarId) -> VarId {
        match &self[v].kind {
            VarKind::Plain => v,
            VarKind::ArrayMember { collective, .. } => self.get_collective(*collective),
            VarKind::Field { parent, fid } => {
                let c = self.get_collective(*parent);
                if c == *parent {
                    v
                } else {
                    self[c].fields[*fid]
                }
            }
        }
    }

    #[inline]
    pub fn is_itemized(&self, v: VarId) -> bool {
        self.get_collective(v) != v
    }

    /// Index variables controlling which element `v` denotes.
    pub fn index_vars(&self, v: VarId) -> Vec<VarId> {
        match &self[v].kind {
            VarKind::Plain => vec![],
            VarKind::Field { parent, .. } => self.index_vars(*parent),
            VarKind::ArrayMember { indices, .. } => indices
                .iter()
                .filter_map(|i| match i {
                    Index::Var(v) => Some(*v),
                    Index::Const(_) => None,
                })
                .collect(),
        }
    }

    /// Two variables may denote overlapping storage: identical, one is the
    /// collective of the other, or members of one array whose indices are
    /// not provably different.
    pub fn loose_match(&self, a: VarId, b: VarId) -> bool {
        if a == b {
            return true;
        }
        let ca = self.get_collective(a);
        let cb = self.get_collective(b);
        if ca != cb {
            return false;
        }
        if ca == a || cb == b {
            return true;
        }
        self.member_path(a)
            .iter()
            .zip(self.member_path(b).iter())
            .all(|(x, y)| !matches!((x, y), (Index::Const(n), Index::Const(m)) if n != m))
    }

    fn member_path(&self, v: VarId) -> Vec<Index> {
        match &self[v].kind {
            VarKind::Plain => vec![],
            VarKind::Field { parent, .. } => self.member_path(*parent),
            VarKind::ArrayMember { indices, .. } => indices.clone(),
        }
    }

    /// Whether a local declared in some block is in scope inside `b`.
    pub fn is_visible_in(&self, v: VarId, b: BlockId) -> bool {
        match self.scope(v) {
            Scope::Global | Scope::Sentinel => true,
            Scope::Param(f) | Scope::ReturnValue(f) => self[b].func == f,
            Scope::Local(decl) => self.block_encloses(decl, b),
        }
    }

    /// Whether `outer` is `inner` or one of its ancestors.
    pub fn block_encloses(&self, outer: BlockId, inner: BlockId) -> bool {
        let mut curr = Some(inner);
        while let Some(b) = curr {
            if b == outer {
                return true;
            }
            curr = self[b].parent;
        }
        false
    }

    /// Nesting depth of a block, the function body being 1.
    pub fn block_depth(&self, b: BlockId) -> usize {
        match self[b].parent {
            None => 1,
            Some(p) => 1 + self.block_depth(p),
        }
    }

    /// `v` together with every field and itemized member derived from it,
    /// at any depth.
    pub fn derived_vars(&self, v: VarId) -> Vec<VarId> {
        (0..self.vars.len())
            .map(VarId)
            .filter(|d| self.derives_from(*d, v))
            .collect()
    }

    fn derives_from(&self, d: VarId, v: VarId) -> bool {
        let mut curr = d;
        loop {
            if curr == v {
                return true;
            }
            curr = match &self[curr].kind {
                VarKind::Plain => return false,
                VarKind::Field { parent, .. } => *parent,
                VarKind::ArrayMember { collective, .. } => *collective,
            };
        }
    }
}
