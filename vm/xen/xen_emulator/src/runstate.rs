// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-vCPU runstate accounting.

use crate::xen::ProcessorXen;
use crate::VcpuRuntime;
use std::mem::offset_of;
use std::sync::atomic::fence;
use std::sync::atomic::Ordering;
use xendef::Runstate;
use xendef::VcpuRunstateInfo;
use xendef::XEN_RUNSTATE_UPDATE;

impl ProcessorXen {
    /// Advances the guest clocks to now and moves the vCPU to `new_state`,
    /// charging the elapsed time to the state being left.
    ///
    /// Each of the three guest-visible areas (kernel time info, registered
    /// user time info, registered runstate info) is skipped if the guest
    /// has not bound it yet.
    pub(crate) fn update_runstate(&mut self, vp: &mut impl VcpuRuntime, new_state: Runstate) {
        let Some(system_time) = self.advance_clock(vp) else {
            return;
        };

        let Some(runstate) = &self.runstate else {
            return;
        };

        let old_state: u32 = runstate.read_at(offset_of!(VcpuRunstateInfo, state));
        let old_entry: u64 = runstate.read_at(offset_of!(VcpuRunstateInfo, state_entry_time));
        let old_entry = old_entry & !XEN_RUNSTATE_UPDATE;

        let time_off = offset_of!(VcpuRunstateInfo, time) + old_state as usize * 8;
        let accumulated: u64 = runstate.read_at(time_off);
        runstate.write_at(
            time_off,
            &accumulated.wrapping_add(system_time.wrapping_sub(old_entry)),
        );
        runstate.write_at(offset_of!(VcpuRunstateInfo, state), &new_state.0);

        let entry_off = offset_of!(VcpuRunstateInfo, state_entry_time);
        if self.runstate_assist {
            // Guests that enabled the runstate-update assist poll the high
            // bit to read a consistent snapshot.
            runstate.write_at(entry_off, &XEN_RUNSTATE_UPDATE);
            fence(Ordering::Release);
            runstate.write_at(entry_off, &(XEN_RUNSTATE_UPDATE | system_time));
            fence(Ordering::Release);
            runstate.write_at(entry_off, &system_time);
            fence(Ordering::Release);
        } else {
            runstate.write_at(entry_off, &system_time);
        }
    }

    /// Initializes a freshly registered runstate area: the vCPU is running
    /// and has been since boot.
    pub(crate) fn reset_runstate_area(&self) {
        let Some(runstate) = &self.runstate else {
            return;
        };
        let system_time = self.kernel_system_time();
        let mut info = VcpuRunstateInfo {
            state: Runstate::RUNNING.0,
            pad: 0,
            state_entry_time: system_time,
            time: [0; xendef::RUNSTATE_COUNT],
        };
        info.time[Runstate::RUNNING.0 as usize] = system_time;
        runstate.write(&info);
    }
}
