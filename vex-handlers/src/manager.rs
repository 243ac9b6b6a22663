//! Exception handler manager
//!
//! The top-level orchestrator. It owns this thread's handler stack and
//! routine registry, loads the handler-set assignment table, triggers the
//! one-time shared-body generation, and initializes the thread's vector
//! base address registers.
//!
//! ## States
//!
//! `Uninitialized -> StackAllocated -> HandlersAssigned ->
//! SharedCodeGenerated -> VectorsInitialized`
//!
//! `SharedCodeGenerated` is process-wide: several generator threads may
//! each construct a manager, but exactly one emits the shared handler body.
//! The guard is an explicit [`SharedCode`] value owned by the test run and
//! handed to every manager, not ambient static state. A secondary thread
//! obtains its manager through [`ExceptionHandlerManager::adopt`], which
//! shares the assignment table and the guard while owning a fresh stack and
//! registry.

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use vex_common::{
    Address, ArchParams, FaultClass, GenError, GenResult, GeneratorConfig, HandlerKind,
    HandlerSet, MemoryBank, PrivilegeLevel, RegisterRole, RoleMap, SecurityState,
};
use vex_emit::{
    materialize_imm, Emitter, HandlerInfoReport, Instr, MemKind, Reg, ReserveKind, SysReg,
    Target, SYNDROME_EC_LSB,
};

use crate::dispatch::SyscallDispatchGenerator;
use crate::redirect::TrapRedirectGenerator;
use crate::registry::HandlerRegistry;
use crate::resolver::AssignmentTable;
use crate::routines::LevelRoutineSource;
use crate::sequencer::{RoutineId, RoutineSequencer};
use crate::stack::{HandlerStack, StackParams};

/// Bytes reserved for one translation-table level.
const TABLE_ROOT_BYTES: u64 = 0x1000;

/// Generation progress of one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ManagerState {
    Uninitialized,
    StackAllocated,
    HandlersAssigned,
    SharedCodeGenerated,
    VectorsInitialized,
}

/// Addresses fixed by the one-time shared-body generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedLayout {
    vector_bases: BTreeMap<(PrivilegeLevel, SecurityState), Address>,
    table_roots: BTreeMap<MemoryBank, Address>,
}

/// Process-wide one-time guard for the shared handler body. Owned by the
/// test run and shared between managers via `Arc`; the first manager to
/// claim it generates the body and publishes the layout, every later
/// manager reads the layout and skips emission.
#[derive(Debug, Default)]
pub struct SharedCode {
    layout: Mutex<Option<SharedLayout>>,
}

impl SharedCode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some manager has generated the shared body.
    pub fn is_generated(&self) -> bool {
        self.layout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// User-supplied dispatcher body generator for fast mode.
pub type DispatcherFn = Box<dyn FnMut(&mut dyn Emitter, &RoleMap) -> GenResult<()> + Send>;

/// Top-level orchestrator for handler generation.
pub struct ExceptionHandlerManager {
    arch: ArchParams,
    config: GeneratorConfig,
    set: HandlerSet,
    table: Option<Arc<AssignmentTable>>,
    shared: Arc<SharedCode>,
    stack: HandlerStack,
    registry: HandlerRegistry,
    roles: BTreeMap<PrivilegeLevel, RoleMap>,
    assignments: BTreeMap<(FaultClass, PrivilegeLevel, SecurityState), HandlerKind>,
    layout: SharedLayout,
    custom_dispatcher: Option<DispatcherFn>,
    state: ManagerState,
}

impl ExceptionHandlerManager {
    pub fn new(arch: ArchParams, config: GeneratorConfig) -> GenResult<Self> {
        let set = HandlerSet::from_name(&config.handler_set)?;
        let mut roles = BTreeMap::new();
        for level in PrivilegeLevel::handler_levels() {
            roles.insert(level, RoleMap::standard(&arch)?);
        }
        let stack = HandlerStack::new(&arch);
        Ok(Self {
            arch,
            config,
            set,
            table: None,
            shared: Arc::new(SharedCode::new()),
            stack,
            registry: HandlerRegistry::new(),
            roles,
            assignments: BTreeMap::new(),
            layout: SharedLayout::default(),
            custom_dispatcher: None,
            state: ManagerState::Uninitialized,
        })
    }

    /// Structurally independent manager for a secondary generator thread:
    /// shares the assignment table and the one-time guard, owns a fresh
    /// stack, registry, and routine state.
    pub fn adopt(&self) -> Self {
        debug!("adopting manager for a secondary thread");
        Self {
            arch: self.arch.clone(),
            config: self.config.clone(),
            set: self.set,
            table: self.table.clone(),
            shared: Arc::clone(&self.shared),
            stack: HandlerStack::new(&self.arch),
            registry: HandlerRegistry::new(),
            roles: self.roles.clone(),
            assignments: BTreeMap::new(),
            layout: SharedLayout::default(),
            custom_dispatcher: None,
            state: ManagerState::Uninitialized,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn handler_set(&self) -> HandlerSet {
        self.set
    }

    /// The one-time guard, for handing to adopted managers constructed
    /// elsewhere or for inspection.
    pub fn shared(&self) -> &Arc<SharedCode> {
        &self.shared
    }

    /// Vector base address initialized for a privilege level and security
    /// state.
    pub fn vector_base(&self, level: PrivilegeLevel, security: SecurityState) -> Option<Address> {
        self.layout.vector_bases.get(&(level, security)).copied()
    }

    /// Translation-table root laid out for a memory bank.
    pub fn translation_root(&self, bank: MemoryBank) -> Option<Address> {
        self.layout.table_roots.get(&bank).copied()
    }

    /// Default handler kind registered for a combination.
    pub fn assignment_for(
        &self,
        fault: FaultClass,
        level: PrivilegeLevel,
        security: SecurityState,
    ) -> Option<HandlerKind> {
        self.assignments.get(&(fault, level, security)).copied()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// This thread's handler stack.
    pub fn stack(&self) -> &HandlerStack {
        &self.stack
    }

    /// Register a user dispatcher body for the fast handler set. The
    /// comprehensive set's dispatch machinery does not take replacements.
    pub fn register_dispatcher(&mut self, dispatcher: DispatcherFn) -> GenResult<()> {
        if self.set != HandlerSet::Fast {
            return Err(GenError::DispatcherNotSupported {
                set: self.set.name().to_string(),
            });
        }
        self.custom_dispatcher = Some(dispatcher);
        Ok(())
    }

    /// Run generation for this thread: stack, one-time shared body, vector
    /// base initialization, and the handler info report.
    pub fn generate(&mut self, emit: &mut dyn Emitter) -> GenResult<()> {
        info!("handler generation, set '{}'", self.set.name());

        if self.state == ManagerState::Uninitialized {
            self.reserve_role_registers(emit)?;
        }

        // (a) This thread's handler stack; fast mode runs without one.
        if self.set != HandlerSet::Fast && !self.stack.is_generated() {
            self.stack.generate(emit, StackParams::default())?;
        }
        self.state = self.state.max(ManagerState::StackAllocated);

        // (b) First invocation: assignment table, default handlers, shared
        // body.
        if self.table.is_none() {
            self.table = Some(Arc::new(AssignmentTable::load(self.set)?));
        }
        if self.assignments.is_empty() && !self.config.suppress_handlers {
            self.register_default_handlers()?;
        }
        self.state = self.state.max(ManagerState::HandlersAssigned);

        let stray: u64 = FaultClass::ALL
            .iter()
            .map(|&fault| emit.exception_count(fault))
            .sum();
        if stray > 0 {
            debug!("{stray} exception records on file before handler generation");
        }

        let shared = Arc::clone(&self.shared);
        {
            let mut guard = shared
                .layout
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                let layout = self.generate_shared_body(emit)?;
                *guard = Some(layout);
            } else {
                debug!("shared body already generated, skipping emission");
            }
            if let Some(layout) = guard.as_ref() {
                self.layout = layout.clone();
            }
        }
        self.state = self.state.max(ManagerState::SharedCodeGenerated);

        // (c) This thread's vector base registers, every invocation.
        for (&(level, security), &base) in &self.layout.vector_bases {
            emit.initialize_register(SysReg::VectorBase(level, security), base);
        }

        // (d) Scratch-register role report for downstream validation.
        let report = HandlerInfoReport {
            fast_mode: self.set == HandlerSet::Fast,
            roles: self.roles.clone(),
        };
        emit.notify_handler_info(&report);
        self.state = ManagerState::VectorsInitialized;
        Ok(())
    }

    /// Claim every role register exclusively so the surrounding engine
    /// keeps them out of random operand selection.
    fn reserve_role_registers(&self, emit: &mut dyn Emitter) -> GenResult<()> {
        let mut seen = BTreeSet::new();
        for map in self.roles.values() {
            for (_, index) in map.iter() {
                if seen.insert(index) {
                    emit.reserve_register(Reg(index), ReserveKind::ReadWrite)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve a default handler for every reachable combination. An
    /// unresolved combination aborts generation here, before any body is
    /// emitted.
    fn register_default_handlers(&mut self) -> GenResult<()> {
        let table = self.table.as_ref().ok_or_else(|| GenError::InvalidState {
            message: "assignment table not loaded".to_string(),
        })?;
        for fault in FaultClass::ALL {
            for level in PrivilegeLevel::ALL {
                for security in SecurityState::ALL {
                    let assignment = table.resolve(fault, None, level, security)?;
                    self.assignments
                        .insert((fault, level, security), assignment.kind);
                }
            }
        }
        debug!("registered {} default handlers", self.assignments.len());
        Ok(())
    }

    fn generate_shared_body(&mut self, emit: &mut dyn Emitter) -> GenResult<SharedLayout> {
        let mut layout = SharedLayout::default();
        let reduced = self.set == HandlerSet::Fast || self.config.suppress_handlers;
        info!(
            "generating shared handler body ({})",
            if reduced { "reduced" } else { "comprehensive" }
        );

        for security in SecurityState::ALL {
            for level in PrivilegeLevel::handler_levels() {
                let root = if reduced {
                    self.generate_reduced_landing(emit, level)?
                } else {
                    self.generate_level_handlers(emit, level, security, &mut layout)?
                };
                let base = self.generate_vector_region(emit, root);
                layout.vector_bases.insert((level, security), base);
            }
        }
        Ok(layout)
    }

    /// Reduced landing body: the user dispatcher if one is registered,
    /// otherwise the bare skip tail.
    fn generate_reduced_landing(
        &mut self,
        emit: &mut dyn Emitter,
        level: PrivilegeLevel,
    ) -> GenResult<Address> {
        let roles = self.level_roles(level)?;
        let entry = emit.cursor();
        if let Some(dispatcher) = self.custom_dispatcher.as_mut() {
            debug!("user dispatcher body for {level}");
            dispatcher(emit, &roles)?;
        } else {
            let t0 = Reg(roles.resolve(RegisterRole::Temporary0)?);
            let ret = SysReg::ReturnAddress(level);
            emit.emit(Instr::Mrs(t0, ret));
            emit.emit(Instr::AddI(t0, t0, self.arch.instr_width as u16));
            emit.emit(Instr::Msr(ret, t0));
            emit.emit(Instr::Eret);
        }
        Ok(entry)
    }

    /// Full handler generation for one (privilege level, security state):
    /// shared routines, one body per handler kind, and the root dispatcher
    /// the vectors land on. Returns the root entry.
    fn generate_level_handlers(
        &mut self,
        emit: &mut dyn Emitter,
        level: PrivilegeLevel,
        security: SecurityState,
        layout: &mut SharedLayout,
    ) -> GenResult<Address> {
        let bank = MemoryBank::for_security_state(security);
        let roles = self.level_roles(level)?;
        let table_root = Self::bank_table_root(emit, layout, bank)?;
        debug!("level handlers for {level}/{security} in bank {bank}");

        let mut seq = RoutineSequencer::new(&self.arch);
        {
            let mut source =
                LevelRoutineSource::new(level, &roles, &self.arch, &mut self.stack);
            seq.generate_routine(emit, &mut source, RoutineId::LowerReturn)?;
            seq.generate_routine(emit, &mut source, RoutineId::ContextLoad)?;
            seq.generate_routine(emit, &mut source, RoutineId::TableWalk)?;
        }
        let skip_entry = seq.entry(RoutineId::SkipInstruction).ok_or_else(|| {
            GenError::RoutineNotGenerated {
                routine: RoutineId::SkipInstruction.to_string(),
            }
        })?;

        let kinds: BTreeSet<HandlerKind> = self
            .assignments
            .iter()
            .filter(|((_, _, ss), _)| *ss == security)
            .map(|(_, kind)| *kind)
            .chain([HandlerKind::DefaultFallback])
            .collect();

        for kind in kinds {
            if self.registry.instance(kind, bank).has_entry(level) {
                continue;
            }
            let entry = self.generate_kind_body(
                emit, &seq, kind, level, security, &roles, table_root, skip_entry,
            )?;
            self.registry.instance(kind, bank).set_entry(level, entry);
        }

        self.generate_root_dispatcher(emit, &seq, level, security, bank, &roles, skip_entry)
    }

    /// Body for one handler kind at one level. Kinds with no dedicated
    /// machinery land on the shared skip tail.
    #[allow(clippy::too_many_arguments)]
    fn generate_kind_body(
        &mut self,
        emit: &mut dyn Emitter,
        seq: &RoutineSequencer,
        kind: HandlerKind,
        level: PrivilegeLevel,
        security: SecurityState,
        roles: &RoleMap,
        table_root: Address,
        skip_entry: Address,
    ) -> GenResult<Address> {
        match kind {
            HandlerKind::SkipInstruction | HandlerKind::DefaultFallback => Ok(skip_entry),
            HandlerKind::SyscallDispatch => {
                let entry = emit.cursor();
                SyscallDispatchGenerator::new().generate(emit, seq, roles)?;
                Ok(entry)
            }
            HandlerKind::TranslationFault => {
                let entry = emit.cursor();
                let fault = Reg(roles.resolve(RegisterRole::FaultAddress)?);
                let base = Reg(roles.resolve(RegisterRole::TableBase)?);
                let scratch = Reg(roles.resolve(RegisterRole::Temporary0)?);
                emit.emit(Instr::Mrs(fault, SysReg::FaultAddress(level)));
                materialize_imm(emit, base, table_root);
                seq.call_routine(emit, &mut self.stack, RoutineId::TableWalk, &[])?;
                // Walk level and descriptor stay in their role registers
                // for fault classification downstream.
                seq.jump_to_routine(emit, RoutineId::SkipInstruction, scratch)?;
                Ok(entry)
            }
            HandlerKind::TrapRedirect => {
                if level == PrivilegeLevel::TOP && self.config.delegation_enabled() {
                    let entry = emit.cursor();
                    TrapRedirectGenerator::new(security).generate(emit, roles)?;
                    Ok(entry)
                } else {
                    // Nothing below the top level to redirect from.
                    Ok(skip_entry)
                }
            }
        }
    }

    /// Root dispatcher the vector stubs land on: classify the trap by its
    /// exception-class code and branch to the registered kind's body.
    #[allow(clippy::too_many_arguments)]
    fn generate_root_dispatcher(
        &mut self,
        emit: &mut dyn Emitter,
        seq: &RoutineSequencer,
        level: PrivilegeLevel,
        security: SecurityState,
        bank: MemoryBank,
        roles: &RoleMap,
        skip_entry: Address,
    ) -> GenResult<Address> {
        let ec = Reg(roles.resolve(RegisterRole::EcValue)?);
        let scratch = Reg(roles.resolve(RegisterRole::Temporary2)?);
        let root = emit.cursor();

        emit.emit(Instr::Mrs(ec, SysReg::Syndrome(level)));
        emit.emit(Instr::Lsr(ec, ec, SYNDROME_EC_LSB));
        emit.emit(Instr::AndI(ec, ec, 0x3f));

        for fault in FaultClass::ALL {
            let kind = match self.assignments.get(&(fault, level, security)) {
                Some(kind) => *kind,
                None => continue,
            };
            let entry = self
                .registry
                .get(kind, bank)
                .and_then(|instance| instance.entry(level))
                .unwrap_or(skip_entry);
            emit.emit(Instr::SubI(scratch, ec, fault.ec_code()));
            emit.emit(Instr::Cbz(scratch, Target::Addr(entry)));
        }

        // Unclassified traps take the skip tail.
        seq.jump_to_routine(emit, RoutineId::SkipInstruction, scratch)?;
        Ok(root)
    }

    /// Vector table region: one stub per fault-origin slot, each branching
    /// to the root dispatcher. Returns the region base.
    fn generate_vector_region(&mut self, emit: &mut dyn Emitter, root: Address) -> Address {
        let base = emit.align(self.arch.vector_align);
        for slot in 0..self.arch.vector_slots {
            if slot > 0 {
                emit.align(self.arch.vector_slot_stride);
            }
            emit.emit(Instr::B(Target::Addr(root)));
        }
        base
    }

    fn level_roles(&self, level: PrivilegeLevel) -> GenResult<RoleMap> {
        self.roles
            .get(&level)
            .cloned()
            .ok_or_else(|| GenError::RoleUnassigned {
                role: format!("role map for {level}"),
            })
    }

    fn bank_table_root(
        emit: &mut dyn Emitter,
        layout: &mut SharedLayout,
        bank: MemoryBank,
    ) -> GenResult<Address> {
        if let Some(&root) = layout.table_roots.get(&bank) {
            return Ok(root);
        }
        let root = emit.allocate_memory(TABLE_ROOT_BYTES, TABLE_ROOT_BYTES, MemKind::Data, bank)?;
        layout.table_roots.insert(bank, root);
        Ok(root)
    }
}
