//! Trap redirection to the next-lower privilege level
//!
//! Generated for the top privilege level only. When a trap arrives at the
//! top but originated below it, the handler copies the cause, faulting
//! address, and return address from the top level's trap state into the
//! next-lower level's, synthesizes the lower level's previous-privilege
//! field from the top level's, and retargets the top level's trap return at
//! the lower level's vectors, so the eventual return lands in the lower
//! level's handler instead of back in the interrupted code.

use log::debug;

use vex_common::{GenResult, PrivilegeLevel, RegisterRole, RoleMap, SecurityState};
use vex_emit::{Emitter, Instr, Reg, SysReg, Target, STATUS_PL_LSB};

/// Generator for the top-level trap redirection body.
#[derive(Debug, Clone, Copy)]
pub struct TrapRedirectGenerator {
    security: SecurityState,
}

impl TrapRedirectGenerator {
    pub fn new(security: SecurityState) -> Self {
        Self { security }
    }

    /// Emit the redirection body for the top privilege level.
    pub fn generate(&self, emit: &mut dyn Emitter, roles: &RoleMap) -> GenResult<()> {
        let top = PrivilegeLevel::TOP;
        // The top level always has a lower neighbour.
        let lower = top.lower().ok_or_else(|| vex_common::GenError::InvalidState {
            message: "redirect generated with no lower level".to_string(),
        })?;
        let t0 = Reg(roles.resolve(RegisterRole::Temporary0)?);
        let t1 = Reg(roles.resolve(RegisterRole::Temporary1)?);
        debug!("trap redirect body: {top} -> {lower} ({})", self.security);

        // Traps that already originated at the top level return untouched.
        let skip = emit.new_label();
        emit.emit(Instr::Mrs(t0, SysReg::SavedStatus(top)));
        emit.emit(Instr::Lsr(t0, t0, STATUS_PL_LSB));
        emit.emit(Instr::AndI(t0, t0, 0x3));
        emit.emit(Instr::SubI(t0, t0, u16::from(top.number())));
        emit.emit(Instr::Cbz(t0, Target::Label(skip)));

        // Copy the trap context down one level. The lower level's
        // previous-privilege field comes with the copied status.
        emit.emit(Instr::Mrs(t1, SysReg::Syndrome(top)));
        emit.emit(Instr::Msr(SysReg::Syndrome(lower), t1));
        emit.emit(Instr::Mrs(t1, SysReg::FaultAddress(top)));
        emit.emit(Instr::Msr(SysReg::FaultAddress(lower), t1));
        emit.emit(Instr::Mrs(t1, SysReg::ReturnAddress(top)));
        emit.emit(Instr::Msr(SysReg::ReturnAddress(lower), t1));
        emit.emit(Instr::Mrs(t1, SysReg::SavedStatus(top)));
        emit.emit(Instr::Msr(SysReg::SavedStatus(lower), t1));

        // Land the trap return in the lower level's vectors.
        emit.emit(Instr::Mrs(t1, SysReg::VectorBase(lower, self.security)));
        emit.emit(Instr::Msr(SysReg::ReturnAddress(top), t1));

        // Drop the top level's saved privilege to the lower level so the
        // return changes mode.
        emit.emit(Instr::Mrs(t1, SysReg::SavedStatus(top)));
        emit.emit(Instr::AndI(t1, t1, !(0x3u64 << STATUS_PL_LSB)));
        emit.emit(Instr::OrrI(
            t1,
            t1,
            u64::from(lower.number()) << STATUS_PL_LSB,
        ));
        emit.emit(Instr::Msr(SysReg::SavedStatus(top), t1));

        emit.bind_label(skip)?;
        emit.emit(Instr::Eret);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vex_common::{Address, ArchParams};
    use vex_emit::{RecordingEmitter, StopReason};

    const TOP: PrivilegeLevel = PrivilegeLevel::TOP;
    const LOWER: PrivilegeLevel = PrivilegeLevel::Pl2;

    fn generate() -> (RecordingEmitter, Address) {
        let arch = ArchParams::default();
        let mut e = RecordingEmitter::new(arch.clone());
        let roles = RoleMap::standard(&arch).unwrap();
        let entry = e.cursor();
        TrapRedirectGenerator::new(SecurityState::NonSecure)
            .generate(&mut e, &roles)
            .unwrap();
        (e, entry)
    }

    #[test]
    fn test_lower_origin_trap_is_redirected() {
        let (mut e, entry) = generate();
        // Trap from Pl1 arrived at the top.
        e.write_register(
            SysReg::SavedStatus(TOP),
            u64::from(PrivilegeLevel::Pl1.number()) << STATUS_PL_LSB,
        );
        e.write_register(SysReg::Syndrome(TOP), 0xabcd);
        e.write_register(SysReg::FaultAddress(TOP), 0x7000_0000);
        e.write_register(SysReg::ReturnAddress(TOP), 0x1234_5678);
        e.write_register(SysReg::VectorBase(LOWER, SecurityState::NonSecure), 0x2_0000);

        let outcome = e.execute(entry, 64).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);

        // Context copied down to the lower level.
        assert_eq!(e.read_register(SysReg::Syndrome(LOWER), None), (0xabcd, true));
        assert_eq!(
            e.read_register(SysReg::FaultAddress(LOWER), None),
            (0x7000_0000, true)
        );
        assert_eq!(
            e.read_register(SysReg::ReturnAddress(LOWER), None),
            (0x1234_5678, true)
        );
        // The lower level's previous privilege is the original origin.
        assert_eq!(e.read_register(SysReg::SavedStatus(LOWER), Some("pl")), (1, true));

        // The top's return now lands in the lower level's vectors, at the
        // lower privilege.
        assert_eq!(
            e.read_register(SysReg::ReturnAddress(TOP), None),
            (0x2_0000, true)
        );
        assert_eq!(
            e.read_register(SysReg::SavedStatus(TOP), Some("pl")),
            (u64::from(LOWER.number()), true)
        );
    }

    #[test]
    fn test_top_origin_trap_is_untouched() {
        let (mut e, entry) = generate();
        e.write_register(
            SysReg::SavedStatus(TOP),
            u64::from(TOP.number()) << STATUS_PL_LSB,
        );
        e.write_register(SysReg::ReturnAddress(TOP), 0x1234_5678);

        let outcome = e.execute(entry, 64).unwrap();
        assert_eq!(outcome.stop, StopReason::TrapReturn);
        assert_eq!(
            e.read_register(SysReg::ReturnAddress(TOP), None),
            (0x1234_5678, true)
        );
        // Nothing was copied down.
        assert_eq!(e.read_register(SysReg::Syndrome(LOWER), None), (0, false));
    }
}
