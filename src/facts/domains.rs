use typed_arena::Arena;

use crate::program::*;

pub type FactArena = Arena<Fact>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    PointTo,
    Union,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnionField {
    /// Nothing written yet.
    Top,
    /// Unknown or conflicting writes.
    Bottom,
    Field(usize),
}

impl std::fmt::Debug for UnionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Top => write!(f, "T"),
            Self::Bottom => write!(f, "B"),
            Self::Field(i) => write!(f, "f{}", i),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FactPointTo {
    pub var: VarId,
    /// Sorted and deduplicated.
    pub point_to: Vec<VarId>,
}

impl std::fmt::Debug for FactPointTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} -> {:?}", self.var, self.point_to)
    }
}

impl FactPointTo {
    pub fn new<I: IntoIterator<Item = VarId>>(var: VarId, pointees: I) -> Self {
        let mut point_to: Vec<_> = pointees.into_iter().collect();
        point_to.sort();
        point_to.dedup();
        Self { var, point_to }
    }

    #[inline]
    pub fn contains(&self, v: VarId) -> bool {
        self.point_to.binary_search(&v).is_ok()
    }

    #[inline]
    fn insert(&mut self, v: VarId) -> bool {
        match self.point_to.binary_search(&v) {
            Ok(_) => false,
            Err(i) => {
                self.point_to.insert(i, v);
                true
            }
        }
    }

    fn join(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for v in &other.point_to {
            changed |= self.insert(*v);
        }
        changed
    }

    fn join_visits(&mut self, other: &Self) -> bool {
        let old = self.point_to.clone();
        self.join(other);
        if self.point_to.len() > 1 {
            if let Ok(i) = self.point_to.binary_search(&Program::TBD) {
                self.point_to.remove(i);
            }
        }
        old != self.point_to
    }

    /// Every pointee is also a pointee of `other`, either directly or through
    /// its collective array.
    fn imply(&self, other: &Self, prog: &Program) -> bool {
        self.point_to
            .iter()
            .all(|v| other.contains(*v) || other.contains(prog.get_collective(*v)))
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FactUnion {
    pub var: VarId,
    pub last_written: UnionField,
}

impl std::fmt::Debug for FactUnion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {:?}", self.var, self.last_written)
    }
}

impl FactUnion {
    #[inline]
    pub fn new(var: VarId, last_written: UnionField) -> Self {
        Self { var, last_written }
    }

    fn join(&mut self, other: &Self, prog: &Program, type_sensitive: bool) -> bool {
        let new = if self.last_written == other.last_written
            || other.last_written == UnionField::Top
            || other.imply(self, prog, type_sensitive)
        {
            return false;
        } else if self.last_written == UnionField::Top || self.imply(other, prog, type_sensitive) {
            other.last_written
        } else {
            UnionField::Bottom
        };
        let changed = new != self.last_written;
        self.last_written = new;
        changed
    }

    /// Whether a union in state `self` may be read as `other` expects.
    pub fn imply(&self, other: &Self, prog: &Program, type_sensitive: bool) -> bool {
        assert_eq!(self.var, other.var);
        match (self.last_written, other.last_written) {
            (_, UnionField::Bottom) | (UnionField::Top, _) => true,
            (a, b) if a == b => true,
            (UnionField::Field(written), UnionField::Field(read)) if type_sensitive => {
                is_compatible_field(prog, prog[self.var].ty, written, read)
            }
            _ => false,
        }
    }
}

/// Reading field `read` after writing field `written` observes valid bits.
fn is_compatible_field(prog: &Program, union: TypeId, written: usize, read: usize) -> bool {
    let ty = &prog[union];
    if ty.is_bitfield(written) || ty.is_bitfield(read) {
        return false;
    }
    let fields = ty.fields();
    let (w, r) = (fields[written].ty, fields[read].ty);
    if prog[w].is_aggregate() || prog[r].is_aggregate() {
        return false;
    }
    let (Some(ws), Some(rs)) = (prog.size_in_bytes(w), prog.size_in_bytes(r)) else {
        return false;
    };
    ws >= rs && prog[w].is_pointer() == prog[r].is_pointer()
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Fact {
    PointTo(FactPointTo),
    Union(FactUnion),
}

impl std::fmt::Debug for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PointTo(p) => write!(f, "{:?}", p),
            Self::Union(u) => write!(f, "{:?}", u),
        }
    }
}

impl Fact {
    #[inline]
    pub fn var(&self) -> VarId {
        match self {
            Self::PointTo(p) => p.var,
            Self::Union(u) => u.var,
        }
    }

    #[inline]
    pub fn category(&self) -> Category {
        match self {
            Self::PointTo(_) => Category::PointTo,
            Self::Union(_) => Category::Union,
        }
    }

    #[inline]
    pub fn key(&self) -> (VarId, Category) {
        (self.var(), self.category())
    }

    #[inline]
    pub fn is_related(&self, other: &Self) -> bool {
        self.key() == other.key()
    }

    #[inline]
    pub fn as_point_to(&self) -> Option<&FactPointTo> {
        match self {
            Self::PointTo(p) => Some(p),
            Self::Union(_) => None,
        }
    }

    #[inline]
    pub fn as_union(&self) -> Option<&FactUnion> {
        match self {
            Self::Union(u) => Some(u),
            Self::PointTo(_) => None,
        }
    }

    pub fn is_top(&self) -> bool {
        match self {
            Self::PointTo(p) => p.point_to.is_empty(),
            Self::Union(u) => u.last_written == UnionField::Top,
        }
    }

    pub fn is_bottom(&self) -> bool {
        match self {
            Self::PointTo(p) => p.contains(Program::GARBAGE),
            Self::Union(u) => u.last_written == UnionField::Bottom,
        }
    }

    pub fn join(&mut self, other: &Self, lat: &Lattice<'_, '_>) -> bool {
        assert!(self.is_related(other), "{:?} and {:?}", self, other);
        match (self, other) {
            (Self::PointTo(a), Self::PointTo(b)) => a.join(b),
            (Self::Union(a), Self::Union(b)) => a.join(b, lat.prog, lat.type_sensitive_unions),
            _ => unreachable!(),
        }
    }

    /// Joins facts from two independent visits of the same code, where a
    /// `tbd` pointee only stands for information not known yet.
    pub fn join_visits(&mut self, other: &Self, lat: &Lattice<'_, '_>) -> bool {
        assert!(self.is_related(other), "{:?} and {:?}", self, other);
        match (self, other) {
            (Self::PointTo(a), Self::PointTo(b)) => a.join_visits(b),
            (Self::Union(a), Self::Union(b)) => a.join(b, lat.prog, lat.type_sensitive_unions),
            _ => unreachable!(),
        }
    }

    pub fn imply(&self, other: &Self, lat: &Lattice<'_, '_>) -> bool {
        if !self.is_related(other) {
            return false;
        }
        match (self, other) {
            (Self::PointTo(a), Self::PointTo(b)) => a.imply(b, lat.prog),
            (Self::Union(a), Self::Union(b)) => a.imply(b, lat.prog, lat.type_sensitive_unions),
            _ => false,
        }
    }

    /// A single, concrete pointee whose variables are all in scope at `s`.
    pub fn is_assertable(&self, s: StmtId, prog: &Program) -> bool {
        let Self::PointTo(p) = self else { return false };
        let [target] = p.point_to[..] else {
            return false;
        };
        if target == Program::GARBAGE || target == Program::TBD {
            return false;
        }
        let b = prog[s].block;
        if prog.is_array(prog.root_var(p.var)) || !prog.is_visible_in(p.var, b) {
            return false;
        }
        target == Program::NULL
            || (!prog.is_array(prog.root_var(target)) && prog.is_visible_in(target, b))
    }

    /// C assertion text for an assertable fact.
    pub fn assertion(&self, prog: &Program) -> Option<String> {
        let p = self.as_point_to()?;
        let [target] = p.point_to[..] else {
            return None;
        };
        let lhs = prog.name(p.var);
        if target == Program::NULL {
            Some(format!("{} == 0", lhs))
        } else {
            Some(format!("{} == &{}", lhs, prog.name(target)))
        }
    }

    pub fn display(&self, prog: &Program) -> String {
        match self {
            Self::PointTo(p) => {
                let targets: Vec<_> = p.point_to.iter().map(|v| prog.name(*v)).collect();
                format!("{} -> {{{}}}", prog.name(p.var), targets.join(", "))
            }
            Self::Union(u) => {
                let field = match u.last_written {
                    UnionField::Top => "top".to_string(),
                    UnionField::Bottom => "bottom".to_string(),
                    UnionField::Field(i) => format!("f{}", i),
                };
                format!("{}: last written {}", prog.name(u.var), field)
            }
        }
    }
}

/// Allocation context for facts, plus the policies the lattice depends on.
#[derive(Clone, Copy)]
pub struct Lattice<'a, 'p> {
    pub prog: &'p Program,
    pub arena: &'a FactArena,
    pub type_sensitive_unions: bool,
}

impl std::fmt::Debug for Lattice<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lattice")
            .field("type_sensitive_unions", &self.type_sensitive_unions)
            .finish()
    }
}

impl<'a, 'p> Lattice<'a, 'p> {
    pub fn new(prog: &'p Program, arena: &'a FactArena, type_sensitive_unions: bool) -> Self {
        Self {
            prog,
            arena,
            type_sensitive_unions,
        }
    }

    #[inline]
    pub fn alloc(&self, fact: Fact) -> &'a Fact {
        self.arena.alloc(fact)
    }

    #[inline]
    pub fn make_point_to<I: IntoIterator<Item = VarId>>(&self, var: VarId, pointees: I) -> &'a Fact {
        self.alloc(Fact::PointTo(FactPointTo::new(var, pointees)))
    }

    #[inline]
    pub fn make_union(&self, var: VarId, field: UnionField) -> &'a Fact {
        self.alloc(Fact::Union(FactUnion::new(var, field)))
    }
}

/// Facts holding at one program point, at most one per variable and
/// category, kept sorted by key. A missing fact is top.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FactEnv<'a> {
    facts: Vec<&'a Fact>,
}

impl std::fmt::Debug for FactEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.facts.iter()).finish()
    }
}

impl<'a> FactEnv<'a> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'a Fact> + '_ {
        self.facts.iter().copied()
    }

    #[inline]
    fn position(&self, key: (VarId, Category)) -> Result<usize, usize> {
        self.facts.binary_search_by_key(&key, |f| f.key())
    }

    pub fn find(&self, var: VarId, cat: Category) -> Option<&'a Fact> {
        let i = self.position((var, cat)).ok()?;
        Some(self.facts[i])
    }

    #[inline]
    pub fn find_related(&self, fact: &Fact) -> Option<&'a Fact> {
        self.find(fact.var(), fact.category())
    }

    #[inline]
    pub fn point_to(&self, var: VarId) -> Option<&'a FactPointTo> {
        self.find(var, Category::PointTo)?.as_point_to()
    }

    #[inline]
    pub fn union_field(&self, var: VarId) -> Option<UnionField> {
        Some(self.find(var, Category::Union)?.as_union()?.last_written)
    }

    /// Replaces the related fact, if any. Returns whether the environment
    /// changed.
    pub fn update_fact(&mut self, fact: &'a Fact) -> bool {
        match self.position(fact.key()) {
            Ok(i) => {
                let changed = self.facts[i] != fact;
                self.facts[i] = fact;
                changed
            }
            Err(i) => {
                self.facts.insert(i, fact);
                true
            }
        }
    }

    pub fn remove(&mut self, var: VarId, cat: Category) -> Option<&'a Fact> {
        let i = self.position((var, cat)).ok()?;
        Some(self.facts.remove(i))
    }

    pub fn remove_var(&mut self, var: VarId) {
        self.facts.retain(|f| f.var() != var);
    }

    pub fn retain<F: FnMut(&'a Fact) -> bool>(&mut self, mut f: F) {
        self.facts.retain(|fact| f(fact));
    }

    fn merge_with<F>(&mut self, fact: &'a Fact, lat: &Lattice<'a, '_>, join: F) -> bool
    where F: Fn(&mut Fact, &Fact, &Lattice<'a, '_>) -> bool {
        match self.position(fact.key()) {
            Ok(i) => {
                let mut new = self.facts[i].clone();
                if join(&mut new, fact, lat) {
                    self.facts[i] = lat.alloc(new);
                    true
                } else {
                    false
                }
            }
            Err(i) => {
                self.facts.insert(i, fact);
                true
            }
        }
    }

    pub fn merge_fact(&mut self, fact: &'a Fact, lat: &Lattice<'a, '_>) -> bool {
        self.merge_with(fact, lat, Fact::join)
    }

    pub fn merge_facts(&mut self, other: &Self, lat: &Lattice<'a, '_>) -> bool {
        let mut changed = false;
        for f in &other.facts {
            changed |= self.merge_fact(f, lat);
        }
        changed
    }

    pub fn merge_facts_visits(&mut self, other: &Self, lat: &Lattice<'a, '_>) -> bool {
        let mut changed = false;
        for f in &other.facts {
            changed |= self.merge_with(f, lat, Fact::join_visits);
        }
        changed
    }

    /// `self` is below `other`: merging `self` into `other` changes nothing.
    pub fn ord(&self, other: &Self, lat: &Lattice<'a, '_>) -> bool {
        self.facts.iter().all(|f| match other.find_related(f) {
            Some(g) => f.imply(g, lat),
            None => f.is_top(),
        })
    }

    #[inline]
    pub fn same_facts(&self, other: &Self) -> bool {
        self == other
    }

    pub fn join(&self, other: &Self, lat: &Lattice<'a, '_>) -> Self {
        let mut env = self.clone();
        env.merge_facts(other, lat);
        env
    }

    pub fn display(&self, prog: &Program) -> String {
        let facts: Vec<_> = self.facts.iter().map(|f| f.display(prog)).collect();
        format!("[{}]", facts.join("; "))
    }
}
