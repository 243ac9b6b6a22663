//! Recording emitter
//!
//! An in-crate implementation of the emission service backed by a small
//! architectural model: a register file, system registers, word-granular
//! memory, per-bank bump allocation, and label fixups. Generated code lands
//! at a monotone cursor; the companion interpreter (see [`crate::interp`])
//! executes recorded ranges against the same state.

use log::trace;
use std::collections::BTreeMap;

use vex_common::{
    Address, ArchParams, FaultClass, GenError, GenResult, LabelId, MemoryBank, RecordId,
};

use crate::emitter::{Emitter, HandlerInfoReport, MemKind, OffsetResolution, ReserveKind};
use crate::instr::{Instr, Reg, SysReg};

/// One emitted instruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub address: Address,
    pub instr: Instr,
}

/// Default base address code is emitted at.
const CODE_BASE: Address = 0x0001_0000;

/// Base of the default-bank data heap.
const DEFAULT_HEAP_BASE: Address = 0x8000_0000;

/// Base of the secure-bank data heap.
const SECURE_HEAP_BASE: Address = 0xc000_0000;

/// Emission service implementation recording into an architectural model.
pub struct RecordingEmitter {
    pub(crate) arch: ArchParams,
    pub(crate) records: Vec<Record>,
    pub(crate) code_index: BTreeMap<Address, usize>,
    cursor: Address,
    next_record: RecordId,
    pub(crate) labels: Vec<Option<Address>>,
    reservations: BTreeMap<u8, ReserveKind>,
    pub(crate) gprs: Vec<u64>,
    pub(crate) sysregs: BTreeMap<SysReg, u64>,
    pub(crate) memory: BTreeMap<Address, u64>,
    heap_next: BTreeMap<MemoryBank, Address>,
    exception_counts: BTreeMap<FaultClass, u64>,
    last_report: Option<HandlerInfoReport>,
}

impl RecordingEmitter {
    pub fn new(arch: ArchParams) -> Self {
        Self::with_base(arch, CODE_BASE)
    }

    /// Start emitting at a chosen code base address.
    pub fn with_base(arch: ArchParams, base: Address) -> Self {
        let mut heap_next = BTreeMap::new();
        heap_next.insert(MemoryBank::Default, DEFAULT_HEAP_BASE);
        heap_next.insert(MemoryBank::Secure, SECURE_HEAP_BASE);
        let gprs = vec![0; arch.register_count as usize];
        Self {
            arch,
            records: Vec::new(),
            code_index: BTreeMap::new(),
            cursor: base,
            next_record: 0,
            labels: Vec::new(),
            reservations: BTreeMap::new(),
            gprs,
            sysregs: BTreeMap::new(),
            memory: BTreeMap::new(),
            heap_next,
            exception_counts: BTreeMap::new(),
            last_report: None,
        }
    }

    pub fn arch(&self) -> &ArchParams {
        &self.arch
    }

    /// All records emitted so far.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Record of a previously emitted instruction, by its id.
    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Instructions only, in emission order.
    pub fn instructions(&self) -> Vec<Instr> {
        self.records.iter().map(|r| r.instr).collect()
    }

    /// Human-readable listing of everything emitted.
    pub fn listing(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for record in &self.records {
            let _ = writeln!(out, "{:#010x}: {}", record.address, record.instr);
        }
        out
    }

    /// Value of a general-purpose register in the model.
    pub fn gpr(&self, reg: Reg) -> u64 {
        self.gprs[reg.index() as usize]
    }

    pub fn set_gpr(&mut self, reg: Reg, value: u64) {
        self.gprs[reg.index() as usize] = value;
    }

    /// Read a word of modeled memory; unmapped words read as zero.
    pub fn read_word(&self, addr: Address) -> u64 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    pub fn write_word(&mut self, addr: Address, value: u64) {
        self.memory.insert(addr, value);
    }

    /// Address a label was bound to, if bound.
    pub fn label_address(&self, label: LabelId) -> Option<Address> {
        self.labels.get(label as usize).copied().flatten()
    }

    pub fn is_reserved(&self, reg: Reg) -> bool {
        self.reservations.contains_key(&reg.index())
    }

    /// Seed the exception-record counter for a fault class.
    pub fn set_exception_count(&mut self, fault: FaultClass, count: u64) {
        self.exception_counts.insert(fault, count);
    }

    /// Last handler info report delivered, if any.
    pub fn handler_info(&self) -> Option<&HandlerInfoReport> {
        self.last_report.as_ref()
    }

    pub(crate) fn sysreg(&self, reg: SysReg) -> u64 {
        self.sysregs.get(&reg).copied().unwrap_or(0)
    }
}

impl Emitter for RecordingEmitter {
    fn emit(&mut self, instr: Instr) -> RecordId {
        let id = self.next_record;
        self.next_record += 1;
        trace!("emit {:#010x}: {instr}", self.cursor);
        self.code_index.insert(self.cursor, self.records.len());
        self.records.push(Record {
            id,
            address: self.cursor,
            instr,
        });
        self.cursor += self.arch.instr_width;
        id
    }

    fn cursor(&self) -> Address {
        self.cursor
    }

    fn align(&mut self, align: u64) -> Address {
        debug_assert!(align.is_power_of_two());
        self.cursor = (self.cursor + align - 1) & !(align - 1);
        self.cursor
    }

    fn new_label(&mut self) -> LabelId {
        self.labels.push(None);
        (self.labels.len() - 1) as LabelId
    }

    fn bind_label(&mut self, label: LabelId) -> GenResult<Address> {
        let slot = self
            .labels
            .get_mut(label as usize)
            .ok_or(GenError::UnboundLabel { label })?;
        *slot = Some(self.cursor);
        Ok(self.cursor)
    }

    fn read_register(&mut self, reg: SysReg, field: Option<&str>) -> (u64, bool) {
        let value = match self.sysregs.get(&reg) {
            Some(&v) => v,
            None => return (0, false),
        };
        match field {
            None => (value, true),
            Some("ec") => ((value >> crate::instr::SYNDROME_EC_LSB) & 0x3f, true),
            Some("pl") => ((value >> crate::instr::STATUS_PL_LSB) & 0x3, true),
            Some(_) => (0, false),
        }
    }

    fn write_register(&mut self, reg: SysReg, value: u64) {
        self.sysregs.insert(reg, value);
    }

    fn initialize_register(&mut self, reg: SysReg, value: u64) {
        self.sysregs.insert(reg, value);
    }

    fn reserve_register(&mut self, reg: Reg, kind: ReserveKind) -> GenResult<()> {
        if self.reservations.contains_key(&reg.index()) {
            return Err(GenError::RegisterReserved { index: reg.index() });
        }
        self.reservations.insert(reg.index(), kind);
        Ok(())
    }

    fn unreserve_register(&mut self, reg: Reg) {
        self.reservations.remove(&reg.index());
    }

    fn allocate_memory(
        &mut self,
        size: u64,
        align: u64,
        _kind: MemKind,
        bank: MemoryBank,
    ) -> GenResult<Address> {
        debug_assert!(align.is_power_of_two());
        let next = self.heap_next.get_mut(&bank).ok_or(GenError::AllocationFailed {
            size,
            bank: bank.to_string(),
        })?;
        let base = (*next + align - 1) & !(align - 1);
        *next = base + size;
        Ok(base)
    }

    fn exception_count(&self, fault: FaultClass) -> u64 {
        self.exception_counts.get(&fault).copied().unwrap_or(0)
    }

    fn resolve_offset(&self, from: Address, to: Address, bits: u8) -> OffsetResolution {
        let delta = to.wrapping_sub(from) as i64;
        let width = self.arch.instr_width as i64;
        if delta % width != 0 {
            return OffsetResolution {
                offset: 0,
                valid: false,
                instruction_count: 0,
            };
        }
        let offset = delta / width;
        let bound = 1i64 << (bits - 1);
        OffsetResolution {
            offset,
            valid: (-bound..bound).contains(&offset),
            instruction_count: offset.unsigned_abs(),
        }
    }

    fn notify_handler_info(&mut self, report: &HandlerInfoReport) {
        self.last_report = Some(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vex_common::PrivilegeLevel;

    fn emitter() -> RecordingEmitter {
        RecordingEmitter::new(ArchParams::default())
    }

    #[test]
    fn test_cursor_advances_per_instruction() {
        let mut e = emitter();
        let start = e.cursor();
        e.emit(Instr::Nop);
        e.emit(Instr::Nop);
        assert_eq!(e.cursor(), start + 8);
        assert_eq!(e.records()[1].address, start + 4);
    }

    #[test]
    fn test_records_retrievable_by_id() {
        let mut e = emitter();
        e.emit(Instr::Nop);
        let id = e.emit(Instr::Ret);
        let record = e.record(id).unwrap();
        assert_eq!(record.instr, Instr::Ret);
        assert_eq!(record.address, CODE_BASE + 4);
        assert!(e.record(99).is_none());
    }

    #[test]
    fn test_align_rounds_up() {
        let mut e = emitter();
        e.emit(Instr::Nop);
        let aligned = e.align(0x800);
        assert_eq!(aligned % 0x800, 0);
        assert!(aligned >= CODE_BASE + 4);
    }

    #[test]
    fn test_label_bind_and_lookup() {
        let mut e = emitter();
        let label = e.new_label();
        assert_eq!(e.label_address(label), None);
        e.emit(Instr::Nop);
        let bound = e.bind_label(label).unwrap();
        assert_eq!(e.label_address(label), Some(bound));
    }

    #[test]
    fn test_reservation_is_exclusive() {
        let mut e = emitter();
        e.reserve_register(Reg(20), ReserveKind::ReadWrite).unwrap();
        let err = e.reserve_register(Reg(20), ReserveKind::Read).unwrap_err();
        assert!(matches!(err, GenError::RegisterReserved { index: 20 }));
        e.unreserve_register(Reg(20));
        assert!(!e.is_reserved(Reg(20)));
    }

    #[test]
    fn test_allocation_respects_alignment_and_bank() {
        let mut e = emitter();
        let a = e
            .allocate_memory(24, 16, MemKind::Data, MemoryBank::Default)
            .unwrap();
        let b = e
            .allocate_memory(8, 16, MemKind::Data, MemoryBank::Default)
            .unwrap();
        assert_eq!(a % 16, 0);
        assert!(b >= a + 24);
        let s = e
            .allocate_memory(8, 8, MemKind::Data, MemoryBank::Secure)
            .unwrap();
        assert!(s >= SECURE_HEAP_BASE);
    }

    #[test]
    fn test_resolve_offset_range_check() {
        let e = emitter();
        let near = e.resolve_offset(0x1000, 0x1010, 26);
        assert!(near.valid);
        assert_eq!(near.offset, 4);
        assert_eq!(near.instruction_count, 4);

        let far = e.resolve_offset(0x1000, 0x1000 + (1 << 22), 19);
        assert!(!far.valid);

        let back = e.resolve_offset(0x1010, 0x1000, 26);
        assert_eq!(back.offset, -4);
        assert!(back.valid);
    }

    #[test]
    fn test_syndrome_field_read() {
        let mut e = emitter();
        let syn = SysReg::Syndrome(PrivilegeLevel::Pl1);
        e.write_register(syn, 0x15u64 << crate::instr::SYNDROME_EC_LSB);
        assert_eq!(e.read_register(syn, Some("ec")), (0x15, true));
        assert_eq!(e.read_register(SysReg::CurrentPrivilege, None), (0, false));
    }
}
