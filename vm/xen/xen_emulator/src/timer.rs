// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-shot timer emulation over the host preemption timer.
//!
//! The preemption timer counts host TSC ticks shifted right by the
//! platform's PET shift and fires a VM exit at zero. The guest's
//! `VCPUOP_set_singleshot_timer` deadline is converted from absolute
//! nanoseconds to PET ticks; time the vCPU spends away from the guest
//! between an exit and the matching resume is stolen back from the
//! programmed count so the deadline stays in wall time.

use crate::time::ns_to_tsc;
use crate::time::tsc_to_pet;
use crate::xen::ProcessorXen;
use crate::VcpuRuntime;
use xendef::Runstate;
use xendef::VcpuSetSingleshotTimer;
use xendef::XenErrno;
use xendef::VCPU_SSHOTTMR_FUTURE;
use xendef::VIRQ_TIMER;

impl ProcessorXen {
    /// Disarms the preemption timer.
    pub(crate) fn stop_timer(&mut self, vp: &mut impl VcpuRuntime) {
        vp.disable_preemption_timer();
        self.pet_enabled = false;
    }

    /// Programs the preemption timer for an absolute-nanosecond deadline.
    pub(crate) fn set_timer(
        &mut self,
        vp: &mut impl VcpuRuntime,
        sst: &VcpuSetSingleshotTimer,
    ) -> Result<(), XenErrno> {
        let system_time = self.kernel_system_time();

        let pet = if system_time >= sst.timeout_abs_ns {
            if sst.flags & VCPU_SSHOTTMR_FUTURE != 0 {
                return Err(XenErrno::ETIME);
            }
            0
        } else {
            let ns = sst.timeout_abs_ns - system_time;
            let tsc = ns_to_tsc(ns, self.tsc_shift, self.tsc_mul);
            tsc_to_pet(tsc, self.pet_shift)
        };

        vp.set_preemption_timer(pet);
        vp.enable_preemption_timer();
        self.pet_enabled = true;

        Ok(())
    }

    /// Reduces the programmed PET count by the ticks that elapsed while the
    /// vCPU was away from the guest, floored at zero.
    pub(crate) fn steal_pet_ticks(&mut self, vp: &mut impl VcpuRuntime) {
        if self.tsc_at_exit == 0 {
            return;
        }

        let pet = vp.preemption_timer();
        let shinfo = self
            .shinfo
            .as_ref()
            .expect("stealing timer ticks before shared info is bound");
        let tsc: u64 = shinfo.read_obj(
            self.kernel_vti_offset() + std::mem::offset_of!(xendef::VcpuTimeInfo, tsc_timestamp),
        );
        let stolen = tsc_to_pet(tsc.wrapping_sub(self.tsc_at_exit), self.pet_shift);

        vp.set_preemption_timer(pet.saturating_sub(stolen));
    }

    /// VM-exit hook: snapshots the TSC so the matching resume can steal the
    /// elapsed ticks.
    pub(crate) fn vmexit_save_tsc(&mut self, vp: &mut impl VcpuRuntime) {
        if self.pet_enabled {
            self.tsc_at_exit = vp.read_tsc();
        }
    }

    /// Resume hook: brings the guest clocks and runstate back to running
    /// and re-aims the timer.
    pub(crate) fn resume_update(&mut self, vp: &mut impl VcpuRuntime) {
        self.update_runstate(vp, Runstate::RUNNING);

        if self.pet_enabled {
            self.steal_pet_ticks(vp);
        }
    }

    /// Preemption-timer fire: disarm and deliver the timer VIRQ.
    pub(crate) fn handle_pet(&mut self, vp: &mut impl VcpuRuntime) -> bool {
        self.stop_timer(vp);
        self.queue_virq(vp, VIRQ_TIMER);
        true
    }
}
