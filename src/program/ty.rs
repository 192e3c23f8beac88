use super::*;

pub const POINTER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Int { size: usize, signed: bool },
    Pointer(TypeId),
    Struct(Vec<Field>),
    Union(Vec<Field>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub ty: TypeId,
    pub bits: Option<u32>,
}

impl Field {
    #[inline]
    pub fn new(ty: TypeId) -> Self {
        Self { ty, bits: None }
    }

    #[inline]
    pub fn bitfield(ty: TypeId, bits: u32) -> Self {
        Self {
            ty,
            bits: Some(bits),
        }
    }
}

impl Type {
    #[inline]
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }

    #[inline]
    pub fn is_union(&self) -> bool {
        matches!(self, Self::Union(_))
    }

    #[inline]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Struct(_) | Self::Union(_))
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        match self {
            Self::Struct(fs) | Self::Union(fs) => fs,
            _ => &[],
        }
    }

    #[inline]
    pub fn is_bitfield(&self, fid: usize) -> bool {
        self.fields().get(fid).map_or(false, |f| f.bits.is_some())
    }
}

impl Program {
    /// `None` when the layout is implementation defined, i.e. the aggregate
    /// (transitively) contains a bit-field.
    pub fn size_in_bytes(&self, ty: TypeId) -> Option<usize> {
        match &self[ty] {
            Type::Void => None,
            Type::Int { size, .. } => Some(*size),
            Type::Pointer(_) => Some(POINTER_SIZE),
            Type::Struct(fs) => {
                let mut offset: usize = 0;
                let mut max_align: usize = 1;
                for f in fs {
                    if f.bits.is_some() {
                        return None;
                    }
                    let size = self.size_in_bytes(f.ty)?;
                    let align = self.align_of(f.ty)?;
                    offset = offset.next_multiple_of(align) + size;
                    max_align = max_align.max(align);
                }
                Some(offset.next_multiple_of(max_align))
            }
            Type::Union(fs) => {
                let mut size: usize = 0;
                let mut max_align: usize = 1;
                for f in fs {
                    if f.bits.is_some() {
                        return None;
                    }
                    size = size.max(self.size_in_bytes(f.ty)?);
                    max_align = max_align.max(self.align_of(f.ty)?);
                }
                Some(size.next_multiple_of(max_align))
            }
        }
    }

    fn align_of(&self, ty: TypeId) -> Option<usize> {
        match &self[ty] {
            Type::Void => None,
            Type::Int { size, .. } => Some(*size),
            Type::Pointer(_) => Some(POINTER_SIZE),
            Type::Struct(fs) | Type::Union(fs) => fs
                .iter()
                .map(|f| self.align_of(f.ty))
                .try_fold(1usize, |acc, a| Some(acc.max(a?))),
        }
    }

    /// Number of `*` between the type and its base type.
    pub fn indirect_level(&self, ty: TypeId) -> usize {
        match &self[ty] {
            Type::Pointer(t) => 1 + self.indirect_level(*t),
            _ => 0,
        }
    }

    #[inline]
    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match &self[ty] {
            Type::Pointer(t) => Some(*t),
            _ => None,
        }
    }

    /// The type reached from `ty` after `n` dereferences.
    pub fn deref_type(&self, mut ty: TypeId, n: usize) -> TypeId {
        for _ in 0..n {
            ty = self
                .pointee(ty)
                .unwrap_or_else(|| panic!("dereferencing non-pointer type {:?}", ty));
        }
        ty
    }

    /// Pointers and unions, or aggregates holding either, carry facts.
    pub fn has_tracked_facts(&self, ty: TypeId) -> bool {
        match &self[ty] {
            Type::Pointer(_) | Type::Union(_) => true,
            Type::Struct(fs) => fs.iter().any(|f| self.has_tracked_facts(f.ty)),
            _ => false,
        }
    }
}
