//! Code Buffer: a growable byte vector with backpatch support for
//! forward branches, accumulating its instruction stream via
//! `emit`/`emit_u8`/`emit_u16`-style helpers, with a proper
//! patch-list-then-resolve label mechanism instead of an ad hoc
//! forward-reference map.

use std::collections::HashMap;

use crate::error::CompileError;
use crate::opcode::Opcode;

/// An opaque forward-branch target, bound exactly once before
/// `finalize()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Clone, Copy)]
struct PatchSite {
    /// Offset of the first byte of the 4-byte placeholder.
    offset: usize,
    label: Label,
}

#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    next_label: u32,
    bound: HashMap<Label, u32>,
    pending: Vec<PatchSite>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer::default()
    }

    pub fn pos(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn new_label(&mut self) -> Label {
        let id = self.next_label;
        self.next_label += 1;
        Label(id)
    }

    /// Records that `label` resolves to the current write position.
    pub fn bind_label(&mut self, label: Label) {
        self.bound.insert(label, self.pos());
    }

    pub fn emit_op(&mut self, op: Opcode) {
        self.bytes.push(op as u8);
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i32_placeholder(&mut self) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(&0i32.to_le_bytes());
        offset
    }

    /// Writes `op` followed by a 4-byte placeholder, recording a patch
    /// site against `label`. The placeholder is filled with the
    /// label's bound offset at `finalize()`.
    pub fn emit_jump(&mut self, op: Opcode, label: Label) {
        self.emit_op(op);
        let offset = self.emit_i32_placeholder();
        self.pending.push(PatchSite { offset, label });
    }

    /// Overwrites the 4 bytes at `offset` with `target` — used for
    /// already-bound backward jumps (e.g. a `while` loop's back-edge),
    /// where no patch-list entry is needed because the target is known
    /// at emission time.
    pub fn patch_addr(&mut self, offset: usize, target: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&(target as i32).to_le_bytes());
    }

    /// Resolves every pending forward-jump patch site against its
    /// bound label. Any label that was never bound is a generator bug
    /// surfaced as `CompileError::UnresolvedLabel`.
    pub fn finalize(mut self) -> Result<Vec<u8>, CompileError> {
        for site in &self.pending {
            let target = *self
                .bound
                .get(&site.label)
                .ok_or(CompileError::UnresolvedLabel { label: site.label.0 })?;
            self.bytes[site.offset..site.offset + 4]
                .copy_from_slice(&(target as i32).to_le_bytes());
        }
        Ok(self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jump_resolves_to_bind_site() {
        let mut buf = CodeBuffer::new();
        let end = buf.new_label();
        buf.emit_jump(Opcode::Jmp, end);
        buf.emit_op(Opcode::Nop);
        buf.bind_label(end);
        let code = buf.finalize().unwrap();
        let target = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(target, 6);
    }

    #[test]
    fn unbound_label_fails_finalize() {
        let mut buf = CodeBuffer::new();
        let never = buf.new_label();
        buf.emit_jump(Opcode::Jmp, never);
        assert!(matches!(
            buf.finalize(),
            Err(CompileError::UnresolvedLabel { .. })
        ));
    }
}
