// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TSC and wall-clock arithmetic.
//!
//! The guest converts TSC deltas to nanoseconds with the fixed-point
//! multiplier published in `vcpu_time_info`:
//!
//! ```text
//! ns = ((ticks << tsc_shift) * tsc_to_system_mul) >> 32
//! ```
//!
//! The multiplier is the ratio of the reference frequency (1e9 ns/sec) to
//! the TSC frequency, kept as a 0.32 fixed-point fraction. With the TSC
//! frequency supplied in kHz that is `(1e6 << 32) / tsc_khz`, which only
//! fits the ABI's u32 multiplier for hosts above 1 GHz; since `tsc_shift`
//! is pinned to 0 here, slower hosts are rejected outright.

use crate::pages::GuestMemoryError;
use crate::pages::GuestPage;
use crate::xen::ProcessorXen;
use crate::VcpuRuntime;
use std::mem::offset_of;
use std::mem::size_of;
use std::sync::atomic::fence;
use std::sync::atomic::Ordering;
use xendef::SharedInfo;
use xendef::VcpuInfo;
use xendef::VcpuTimeInfo;
use xendef::XenpfSettime64;
use xendef::PVCLOCK_TSC_STABLE_BIT;

pub(crate) const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Converts a TSC tick count to nanoseconds.
pub(crate) fn tsc_to_ns(ticks: u64, shift: i8, mul: u32) -> u64 {
    let scaled = if shift >= 0 {
        (ticks as u128) << shift as u32
    } else {
        (ticks as u128) >> (-(shift as i32)) as u32
    };
    ((scaled * mul as u128) >> 32) as u64
}

/// Converts nanoseconds to a TSC tick count.
pub(crate) fn ns_to_tsc(ns: u64, shift: i8, mul: u32) -> u64 {
    let scaled = ((ns as u128) << 32) / mul as u128;
    let ticks = if shift >= 0 {
        scaled >> shift as u32
    } else {
        scaled << (-(shift as i32)) as u32
    };
    ticks as u64
}

/// Converts a TSC tick count to preemption-timer ticks.
pub(crate) fn tsc_to_pet(tsc: u64, pet_shift: u32) -> u64 {
    tsc >> pet_shift
}

/// Computes the 0.32 fixed-point ns-per-tick multiplier for a TSC frequency
/// in kHz.
pub(crate) fn tsc_freq_to_mul(tsc_khz: u64) -> u32 {
    let mul = (1_000_000u128 << 32) / tsc_khz as u128;
    assert!(
        mul <= u32::MAX as u128,
        "TSC frequency {tsc_khz} kHz is too low for a 0.32 multiplier"
    );
    mul as u32
}

/// Runs `update` under the sequence lock whose u32 version word is at
/// `version_offset`. Readers observe an odd version while the update is in
/// flight and a delta of +2 once it completes.
pub(crate) fn seqlocked(page: &GuestPage, version_offset: usize, update: impl FnOnce()) {
    let version: u32 = page.read_obj(version_offset);
    page.write_obj(version_offset, &version.wrapping_add(1));
    fence(Ordering::Release);
    update();
    fence(Ordering::Release);
    page.write_obj(version_offset, &version.wrapping_add(2));
}

impl ProcessorXen {
    /// Byte offset of this vCPU's `vcpu_time_info` within the shared-info
    /// page.
    pub(crate) fn kernel_vti_offset(&self) -> usize {
        offset_of!(SharedInfo, vcpu_info)
            + self.vcpuid as usize * size_of::<VcpuInfo>()
            + offset_of!(VcpuInfo, time)
    }

    /// The guest's monotonic clock as of the last update.
    pub(crate) fn kernel_system_time(&self) -> u64 {
        let shinfo = self
            .shinfo
            .as_ref()
            .expect("clock read before shared info is bound");
        shinfo.read_obj(self.kernel_vti_offset() + offset_of!(VcpuTimeInfo, system_time))
    }

    /// Advances the kernel `vcpu_time_info` to now and mirrors it into the
    /// guest-registered copy, both under their sequence locks. Returns the
    /// new `system_time`, or `None` if shared info is not bound yet.
    pub(crate) fn advance_clock(&mut self, vp: &mut impl VcpuRuntime) -> Option<u64> {
        let shinfo = self.shinfo.as_ref()?;
        let off = self.kernel_vti_offset();
        let vti: VcpuTimeInfo = shinfo.read_obj(off);

        let next = vp.read_tsc();
        let delta = tsc_to_ns(
            next.wrapping_sub(vti.tsc_timestamp),
            vti.tsc_shift,
            vti.tsc_to_system_mul,
        );
        let system_time = vti.system_time.wrapping_add(delta);

        seqlocked(shinfo, off + offset_of!(VcpuTimeInfo, version), || {
            shinfo.write_obj(off + offset_of!(VcpuTimeInfo, system_time), &system_time);
            shinfo.write_obj(off + offset_of!(VcpuTimeInfo, tsc_timestamp), &next);
        });

        if let Some(user_vti) = &self.user_vti {
            let page = user_vti.page();
            let base = user_vti.offset();
            seqlocked(page, base + offset_of!(VcpuTimeInfo, version), || {
                page.write_obj(base + offset_of!(VcpuTimeInfo, system_time), &system_time);
                page.write_obj(base + offset_of!(VcpuTimeInfo, tsc_timestamp), &next);
            });
        }

        Some(system_time)
    }

    /// Binds the shared-info page at guest page `gpfn`, seeds this vCPU's
    /// time info with the TSC parameters, and derives the wall clock from
    /// the domain's start-of-day anchor plus the TSC delta to now.
    pub(crate) fn init_shared_info(
        &mut self,
        vp: &mut impl VcpuRuntime,
        gpfn: u64,
    ) -> Result<(), GuestMemoryError> {
        let shinfo = self.guest_memory.lock_gpn(gpfn)?;
        let now = vp.read_tsc();

        let off = self.kernel_vti_offset();
        let mut vti: VcpuTimeInfo = shinfo.read_obj(off);
        vti.flags |= PVCLOCK_TSC_STABLE_BIT;
        vti.tsc_shift = self.tsc_shift;
        vti.tsc_to_system_mul = self.tsc_mul;
        vti.tsc_timestamp = now;
        shinfo.write_obj(off, &vti);

        let sod = self.dom.sod_info();
        let mut wc_nsec =
            tsc_to_ns(now.wrapping_sub(sod.tsc), self.tsc_shift, self.tsc_mul) + sod.wc_nsec;
        let wc_sec = sod.wc_sec + wc_nsec / NSEC_PER_SEC;
        wc_nsec %= NSEC_PER_SEC;

        seqlocked(&shinfo, offset_of!(SharedInfo, wc_version), || {
            shinfo.write_obj(offset_of!(SharedInfo, wc_sec), &(wc_sec as u32));
            shinfo.write_obj(offset_of!(SharedInfo, wc_sec_hi), &((wc_sec >> 32) as u32));
            shinfo.write_obj(offset_of!(SharedInfo, wc_nsec), &(wc_nsec as u32));
        });

        self.shinfo = Some(shinfo);
        self.shinfo_gpfn = gpfn;
        Ok(())
    }

    /// Rewrites the shared-info wall clock from a `XENPF_settime64`
    /// request: the new wall time less the guest's current monotonic time
    /// gives the boot-time offset the guest adds to `system_time`.
    pub(crate) fn update_wallclock(&mut self, time: &XenpfSettime64) {
        let Some(shinfo) = &self.shinfo else {
            panic!("wall clock update before shared info is bound");
        };

        let ns = time
            .secs
            .wrapping_mul(NSEC_PER_SEC)
            .wrapping_add(time.nsecs as u64)
            .wrapping_sub(time.system_time);
        let sec = ns / NSEC_PER_SEC;
        let rem = ns % NSEC_PER_SEC;

        seqlocked(shinfo, offset_of!(SharedInfo, wc_version), || {
            shinfo.write_obj(offset_of!(SharedInfo, wc_sec), &(sec as u32));
            shinfo.write_obj(offset_of!(SharedInfo, wc_sec_hi), &((sec >> 32) as u32));
            shinfo.write_obj(offset_of!(SharedInfo, wc_nsec), &(rem as u32));
        });
    }
}
