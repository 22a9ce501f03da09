//! Named uniform blocks sub-allocated from a [`UniformArena`].

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::ArenaError;
use crate::uniform::arena::{ArenaKind, UniformArena};
use crate::uniform::value::{align_up, UniformValue};

/// Produces a member's current value at populate time.
pub type ValueSupplier = Arc<dyn Fn() -> UniformValue + Send + Sync>;

struct UniformMember {
    name: String,
    supplier: ValueSupplier,
    /// Offset dictated by a reflected shader layout
    fixed_offset: Option<usize>,
    /// Bytes and block-relative range written by the previous populate
    cached: Option<(Range<usize>, Vec<u8>)>,
}

/// A named list of members serialized into one arena region.
pub struct UniformBlock {
    name: String,
    arena: ArenaKind,
    members: Vec<UniformMember>,
    offset: Option<usize>,
    size: usize,
}

impl fmt::Debug for UniformBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformBlock")
            .field("name", &self.name)
            .field("arena", &self.arena)
            .field("members", &self.member_names().collect::<Vec<_>>())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

impl UniformBlock {
    pub fn new(name: impl Into<String>, arena: ArenaKind) -> Self {
        Self {
            name: name.into(),
            arena,
            members: Vec::new(),
            offset: None,
            size: 0,
        }
    }

    /// Append a member laid out after the previous one.
    pub fn add<F>(&mut self, name: impl Into<String>, supplier: F) -> &mut Self
    where
        F: Fn() -> UniformValue + Send + Sync + 'static,
    {
        self.add_supplier(name, Arc::new(supplier), None)
    }

    /// Append a member at a fixed block-relative offset.
    pub fn add_at<F>(&mut self, name: impl Into<String>, offset: usize, supplier: F) -> &mut Self
    where
        F: Fn() -> UniformValue + Send + Sync + 'static,
    {
        self.add_supplier(name, Arc::new(supplier), Some(offset))
    }

    pub fn add_supplier(
        &mut self,
        name: impl Into<String>,
        supplier: ValueSupplier,
        fixed_offset: Option<usize>,
    ) -> &mut Self {
        self.members.push(UniformMember {
            name: name.into(),
            supplier,
            fixed_offset,
            cached: None,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arena(&self) -> ArenaKind {
        self.arena
    }

    /// Offset assigned by the last populate.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Size in bytes written by the last populate, padded to 16.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    /// Arena-absolute byte range of a member as of the last populate.
    pub fn member_range(&self, name: &str) -> Option<Range<usize>> {
        let offset = self.offset?;
        self.members
            .iter()
            .find(|m| m.name == name)
            .and_then(|m| m.cached.as_ref())
            .map(|(range, _)| offset + range.start..offset + range.end)
    }

    /// Serialize every member into `arena` at `offset`, in declaration order.
    ///
    /// Returns whether any member's bytes or the block's offset differ from the previous call.
    /// The arena cursor is moved past the block.
    pub fn populate(
        &mut self,
        arena: &mut UniformArena,
        offset: usize,
    ) -> Result<bool, ArenaError> {
        let mut changed = self.offset != Some(offset);
        let mut cursor = 0;
        let mut bytes = Vec::with_capacity(64);

        for member in &mut self.members {
            let value = (member.supplier)();
            bytes.clear();
            value.write_bytes(&mut bytes);

            let start = member
                .fixed_offset
                .unwrap_or_else(|| align_up(cursor, value.alignment()));
            let range = start..start + bytes.len();
            arena.write(offset + start, &bytes)?;

            let same = matches!(&member.cached, Some((r, b)) if *r == range && *b == bytes);
            if !same {
                changed = true;
                member.cached = Some((range.clone(), bytes.clone()));
            }
            cursor = cursor.max(range.end);
        }

        self.size = align_up(cursor, 16);
        arena.reserve_until(offset + self.size)?;
        self.offset = Some(offset);

        if !changed {
            log::trace!("UBO {} unchanged at offset {}", self.name, offset);
        }
        Ok(changed)
    }
}
