//! Architecture parameters
//!
//! Everything the generators need to know about the target is collected
//! here: word and instruction widths, register numbering conventions, vector
//! table layout, and the translation-table geometry driving the walker. The
//! generators themselves stay architecture-agnostic and read these values
//! instead of hard-coding constants.

use serde::{Deserialize, Serialize};

/// Index field of one translation level: which bits of the faulting address
/// select the descriptor at that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    /// Least significant bit of the field.
    pub lsb: u8,
    /// Field width in bits.
    pub width: u8,
}

impl IndexField {
    /// Mask for the extracted (right-aligned) field value.
    pub fn mask(&self) -> u64 {
        (1u64 << self.width) - 1
    }
}

/// Parameters of the multi-level translation-table walk.
///
/// Levels count down: the walk starts at `level_count - 1` and terminates at
/// level 0 unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationGeometry {
    /// Number of levels walked.
    pub level_count: usize,
    /// Index field per level, element `i` describing level `i`.
    pub index_fields: Vec<IndexField>,
    /// log2 of the descriptor size in bytes.
    pub descriptor_shift: u8,
    /// Mask selecting the descriptor type bits.
    pub type_mask: u64,
    /// Type-bit value denoting a terminal (block) mapping.
    pub terminal_type: u64,
    /// Next-level table pointer field within a descriptor.
    pub table_field: IndexField,
}

impl TranslationGeometry {
    /// Four-level walk over a 4KiB translation granule with 48-bit input
    /// addresses and 8-byte descriptors.
    pub fn four_level_4k() -> Self {
        Self {
            level_count: 4,
            index_fields: vec![
                IndexField { lsb: 12, width: 9 }, // level 0
                IndexField { lsb: 21, width: 9 }, // level 1
                IndexField { lsb: 30, width: 9 }, // level 2
                IndexField { lsb: 39, width: 9 }, // level 3
            ],
            descriptor_shift: 3,
            type_mask: 0b11,
            terminal_type: 0b01,
            table_field: IndexField { lsb: 12, width: 36 },
        }
    }

    /// Level the walk starts at.
    pub fn start_level(&self) -> usize {
        self.level_count - 1
    }

    /// Index field for a given level.
    pub fn index_field(&self, level: usize) -> IndexField {
        self.index_fields[level]
    }

    /// Byte offset of the descriptor selected by `address` at `level`,
    /// relative to that level's table base. Host-side mirror of the emitted
    /// index extraction, used by reference walks in tests.
    pub fn descriptor_offset(&self, level: usize, address: u64) -> u64 {
        let field = self.index_field(level);
        ((address >> field.lsb) & field.mask()) << self.descriptor_shift
    }

    /// Whether the type bits denote a terminal mapping.
    pub fn is_terminal(&self, descriptor: u64) -> bool {
        descriptor & self.type_mask == self.terminal_type
    }

    /// Next-level table base encoded in a non-terminal descriptor.
    pub fn table_base(&self, descriptor: u64) -> u64 {
        ((descriptor >> self.table_field.lsb) & self.table_field.mask()) << self.table_field.lsb
    }
}

/// Register numbering and layout constants for the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchParams {
    /// Architecture word size in bytes (stack stride, descriptor loads).
    pub word_size: u64,
    /// Instruction width in bytes.
    pub instr_width: u64,
    /// Number of general-purpose registers.
    pub register_count: u8,
    /// Link register index.
    pub link_register: u8,
    /// General-purpose registers the handler generators may claim as
    /// scratch, lowest preference first.
    pub scratch_registers: Vec<u8>,
    /// Alignment of a vector table region.
    pub vector_align: u64,
    /// Byte stride between vector slots.
    pub vector_slot_stride: u64,
    /// Number of fault-origin slots per vector table.
    pub vector_slots: u64,
    /// Translation-table geometry for the walker.
    pub translation: TranslationGeometry,
}

impl Default for ArchParams {
    fn default() -> Self {
        Self {
            word_size: 8,
            instr_width: 4,
            register_count: 31,
            link_register: 30,
            scratch_registers: (13..30).collect(),
            vector_align: 0x800,
            vector_slot_stride: 0x80,
            vector_slots: 4,
            translation: TranslationGeometry::four_level_4k(),
        }
    }
}

impl ArchParams {
    /// Size in bytes of one vector table region.
    pub fn vector_region_size(&self) -> u64 {
        self.vector_slots * self.vector_slot_stride
    }
}
