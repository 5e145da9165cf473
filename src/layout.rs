//! Component kinds, primitive field kinds, and the three layout policies
//! (`Sequential`, `Padding`, `Explicit`) used to compute a
//! [`ComponentDescriptor`] from caller-supplied field specs.

use crate::error::{EcsError, Result};
use crate::registry::ComponentTypeId;

/// The four storage paths a registered component can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    InstanceUnmanaged,
    InstanceManaged,
    SharedUnmanaged,
    SharedManaged,
}

impl ComponentKind {
    pub fn is_shared(self) -> bool {
        matches!(self, ComponentKind::SharedUnmanaged | ComponentKind::SharedManaged)
    }

    pub fn is_managed(self) -> bool {
        matches!(self, ComponentKind::InstanceManaged | ComponentKind::SharedManaged)
    }
}

/// Fixed primitive kind set a leaf field may hold (Design Notes, Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    U16,
}

impl PrimitiveKind {
    pub fn size(self) -> usize {
        match self {
            PrimitiveKind::I8 | PrimitiveKind::Bool => 1,
            PrimitiveKind::I16 | PrimitiveKind::U16 => 2,
            PrimitiveKind::I32 | PrimitiveKind::F32 => 4,
            PrimitiveKind::I64 | PrimitiveKind::F64 => 8,
        }
    }

    pub fn align(self) -> usize {
        // Primitive natural alignment equals its size on every target we support.
        self.size()
    }
}

/// What a field (pre-flattening) is made of: a leaf primitive, or another
/// component (referenced by its registration key) whose own fields get
/// inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    Composite(String),
}

/// Caller-supplied description of one field before layout is computed.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Required and meaningful only under [`LayoutPolicy::Explicit`].
    pub explicit_offset: Option<usize>,
    /// Optional alignment override; defaults to the kind's natural alignment.
    pub declared_align: Option<usize>,
}

impl FieldSpec {
    pub fn primitive(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Primitive(kind),
            explicit_offset: None,
            declared_align: None,
        }
    }

    pub fn composite(name: impl Into<String>, component_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Composite(component_key.into()),
            explicit_offset: None,
            declared_align: None,
        }
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.explicit_offset = Some(offset);
        self
    }

    pub fn aligned(mut self, align: usize) -> Self {
        self.declared_align = Some(align);
        self
    }
}

/// One flattened leaf field in a fully-laid-out [`ComponentDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: PrimitiveKind,
    pub offset: usize,
    pub size: usize,
    pub align: usize,
}

/// Layout policy controlling how field offsets and total size are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPolicy {
    Sequential,
    Padding,
    Explicit,
}

/// Per-type descriptor: id, kind, size/alignment, and the flattened field list.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub id: ComponentTypeId,
    pub name: String,
    pub kind: ComponentKind,
    pub total_size: usize,
    pub align: usize,
    pub fields: Vec<FieldDescriptor>,
    pub layout_policy: LayoutPolicy,
}

fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

/// Flatten `fields` (possibly containing composite references already
/// resolved to `ComponentDescriptor`s in `resolved_composites`) into a byte
/// layout according to `policy`.
pub fn compute_layout(
    id: ComponentTypeId,
    name: &str,
    kind: ComponentKind,
    fields: &[FieldSpec],
    policy: LayoutPolicy,
    resolve_composite: impl Fn(&str) -> Option<ComponentDescriptor>,
) -> Result<ComponentDescriptor> {
    // Managed kinds carry no byte payload; storage is a ticket, not columns.
    if kind.is_managed() {
        return Ok(ComponentDescriptor {
            id,
            name: name.to_string(),
            kind,
            total_size: 0,
            align: 1,
            fields: Vec::new(),
            layout_policy: policy,
        });
    }

    match policy {
        LayoutPolicy::Sequential => layout_sequential(id, name, kind, fields, &resolve_composite),
        LayoutPolicy::Padding => layout_padding(id, name, kind, fields, &resolve_composite),
        LayoutPolicy::Explicit => layout_explicit(id, name, kind, fields, &resolve_composite),
    }
}

fn flatten_leaf(
    field: &FieldSpec,
    base_offset: usize,
    resolve_composite: &impl Fn(&str) -> Option<ComponentDescriptor>,
    out: &mut Vec<FieldDescriptor>,
) -> Result<usize> {
    match &field.kind {
        FieldKind::Primitive(p) => {
            let p = *p;
            out.push(FieldDescriptor {
                name: field.name.clone(),
                kind: p,
                offset: base_offset,
                size: p.size(),
                align: field.declared_align.unwrap_or_else(|| p.align()),
            });
            Ok(p.size())
        }
        FieldKind::Composite(child_key) => {
            let child = resolve_composite(child_key).ok_or_else(|| {
                EcsError::BadArgument(format!(
                    "composite field '{}' references unregistered component '{child_key}'",
                    field.name
                ))
            })?;
            for child_field in &child.fields {
                out.push(FieldDescriptor {
                    name: format!("{}.{}", field.name, child_field.name),
                    kind: child_field.kind,
                    offset: base_offset + child_field.offset,
                    size: child_field.size,
                    align: child_field.align,
                });
            }
            Ok(child.total_size)
        }
    }
}

fn layout_sequential(
    id: ComponentTypeId,
    name: &str,
    kind: ComponentKind,
    fields: &[FieldSpec],
    resolve_composite: &impl Fn(&str) -> Option<ComponentDescriptor>,
) -> Result<ComponentDescriptor> {
    let mut out = Vec::with_capacity(fields.len());
    let mut cursor = 0usize;
    for field in fields {
        cursor += flatten_leaf(field, cursor, resolve_composite, &mut out)?;
    }
    Ok(ComponentDescriptor {
        id,
        name: name.to_string(),
        kind,
        total_size: cursor,
        align: 1,
        fields: out,
        layout_policy: LayoutPolicy::Sequential,
    })
}

fn layout_padding(
    id: ComponentTypeId,
    name: &str,
    kind: ComponentKind,
    fields: &[FieldSpec],
    resolve_composite: &impl Fn(&str) -> Option<ComponentDescriptor>,
) -> Result<ComponentDescriptor> {
    let mut out = Vec::with_capacity(fields.len());
    let mut cursor = 0usize;
    let mut max_align = 1usize;
    for field in fields {
        let natural_align = match &field.kind {
            FieldKind::Primitive(p) => p.align(),
            FieldKind::Composite(child_key) => {
                let child = resolve_composite(child_key).ok_or_else(|| {
                    EcsError::BadArgument(format!(
                        "composite field '{}' references unregistered component '{child_key}'",
                        field.name
                    ))
                })?;
                child.align
            }
        };
        let align = field.declared_align.unwrap_or(natural_align).max(natural_align);
        max_align = max_align.max(align);
        cursor = align_up(cursor, align);
        cursor += flatten_leaf(field, cursor, resolve_composite, &mut out)?;
    }
    let total_size = align_up(cursor, max_align);
    Ok(ComponentDescriptor {
        id,
        name: name.to_string(),
        kind,
        total_size,
        align: max_align,
        fields: out,
        layout_policy: LayoutPolicy::Padding,
    })
}

fn layout_explicit(
    id: ComponentTypeId,
    name: &str,
    kind: ComponentKind,
    fields: &[FieldSpec],
    resolve_composite: &impl Fn(&str) -> Option<ComponentDescriptor>,
) -> Result<ComponentDescriptor> {
    let mut out = Vec::with_capacity(fields.len());
    let mut max_end = 0usize;
    let mut max_align = 1usize;

    // Flatten each field at its explicit offset first, then sort and check overlaps.
    let mut ordered: Vec<&FieldSpec> = fields.iter().collect();
    for field in &ordered {
        if field.explicit_offset.is_none() {
            return Err(EcsError::BadLayout(format!(
                "field '{}' missing required explicit offset",
                field.name
            )));
        }
    }
    ordered.sort_by_key(|f| f.explicit_offset.unwrap());

    for field in ordered {
        let offset = field.explicit_offset.unwrap();
        let before = out.len();
        let consumed = flatten_leaf(field, offset, resolve_composite, &mut out)?;
        for fd in &out[before..] {
            max_align = max_align.max(fd.align);
        }
        let end = offset + consumed;
        max_end = max_end.max(end);
    }

    // Detect overlapping byte ranges among the flattened leaves.
    let mut by_offset = out.clone();
    by_offset.sort_by_key(|f| f.offset);
    for pair in by_offset.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.offset + a.size > b.offset {
            return Err(EcsError::BadLayout(format!(
                "fields '{}' and '{}' overlap at byte {}",
                a.name, b.name, b.offset
            )));
        }
    }

    Ok(ComponentDescriptor {
        id,
        name: name.to_string(),
        kind,
        total_size: max_end,
        align: max_align,
        fields: out,
        layout_policy: LayoutPolicy::Explicit,
    })
}
