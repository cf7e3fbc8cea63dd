// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-domain and per-vCPU Xen interface emulators.

use crate::pages::GuestMemory;
use crate::pages::GuestMemoryError;
use crate::pages::LockedPage;
use crate::pages::MappedArea;
use crate::services::Evtchn;
use crate::services::GrantTable;
use crate::time::tsc_freq_to_mul;
use crate::x86::Gp;
use crate::VcpuRuntime;
use crate::XenDomain;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::RngCore;
use rand::SeedableRng;
use std::sync::Arc;
use xendef::Runstate;
use xendef::VcpuRunstateInfo;
use xendef::VcpuTimeInfo;
use xendef::APIC_MSR_TSC_DEADLINE;
use xendef::HYPERCALL_TRAMPOLINE_COUNT;
use xendef::HYPERCALL_TRAMPOLINE_SIZE;
use xendef::VIRQ_TIMER;
use xendef::X2APIC_MSR_SELF_IPI;
use xendef::XEN_CPUID_LEAF_BASE;
use xendef::XEN_CPUID_LEAF_COUNT;
use xendef::XEN_CPUID_SIGNATURE_EBX;
use xendef::XEN_CPUID_SIGNATURE_ECX;
use xendef::XEN_CPUID_SIGNATURE_EDX;
use xendef::XEN_DOMAIN_HANDLE_SIZE;
use xendef::XEN_HVM_CPUID_DOMID_PRESENT;
use xendef::XEN_HVM_CPUID_VCPU_ID_PRESENT;
use xendef::XEN_HVM_CPUID_X2APIC_VIRT;
use xendef::XEN_LEGACY_MAX_VCPUS;
use xendef::XEN_MSR_HYPERCALL_PAGE;
use xendef::XEN_VERSION_VALUE;
use xendef::hypercall_trampoline;

/// Domain ids handed to non-privileged domains, process-wide.
static NEXT_DOMID: Mutex<u32> = Mutex::new(0);

/// Parameters for constructing a [`GlobalXen`].
pub struct GlobalXenParams {
    /// The enclosing domain.
    pub dom: Arc<dyn XenDomain>,
    /// The guest memory accessor.
    pub guest_memory: GuestMemory,
    /// The guest's TSC frequency in kHz.
    pub tsc_khz: u64,
    /// log2 of the TSC-to-preemption-timer tick ratio.
    pub pet_shift: u32,
}

/// The domain-wide Xen interface state.
pub struct GlobalXen {
    dom: Arc<dyn XenDomain>,
    guest_memory: GuestMemory,
    domid: u32,
    tsc_khz: u64,
    pet_shift: u32,
}

impl GlobalXen {
    /// Returns a new emulator instance for one domain, drawing a fresh
    /// domain id unless this is the privileged init domain.
    pub fn new(params: GlobalXenParams) -> Self {
        let domid = if params.dom.initdom() {
            0
        } else {
            let mut next = NEXT_DOMID.lock();
            *next += 1;
            *next
        };

        Self {
            dom: params.dom,
            guest_memory: params.guest_memory,
            domid,
            tsc_khz: params.tsc_khz,
            pet_shift: params.pet_shift,
        }
    }

    /// The Xen domain id presented to the guest.
    pub fn domid(&self) -> u32 {
        self.domid
    }

    /// Adds the domain's virtual processor.
    ///
    /// The host must route this vCPU's CPUID (leaves base+0..4), WRMSR
    /// (hypercall page, self-IPI, TSC deadline), VM-call, HLT,
    /// preemption-timer, exception, and external-interrupt exits to the
    /// returned emulator, and invoke its [`ProcessorXen::on_vmexit`] /
    /// [`ProcessorXen::on_resume`] hooks around every guest entry, before
    /// the guest runs its first instruction.
    pub fn add_vp(&self) -> ProcessorXen {
        // The guest calibrates its TSC from vcpu_info[0] before it can ask
        // which vCPU it is running on, so all the ids stay pinned to slot
        // zero regardless of the domain id.
        let vcpuid = 0;
        assert!(vcpuid < XEN_LEGACY_MAX_VCPUS);

        let mut domain_handle = [0; XEN_DOMAIN_HANDLE_SIZE];
        StdRng::seed_from_u64(self.dom.id()).fill_bytes(&mut domain_handle);

        ProcessorXen {
            dom: self.dom.clone(),
            guest_memory: self.guest_memory.clone(),
            domid: self.domid,
            vcpuid,
            apicid: 0,
            acpiid: 0,
            tsc_khz: self.tsc_khz,
            tsc_mul: tsc_freq_to_mul(self.tsc_khz),
            tsc_shift: 0,
            pet_shift: self.pet_shift,
            domain_handle,
            shinfo: None,
            shinfo_gpfn: 0,
            user_vti: None,
            runstate: None,
            runstate_assist: false,
            pet_enabled: false,
            pet_handlers_added: false,
            tsc_at_exit: 0,
            evtchn: Evtchn::new(),
            gnttab: GrantTable::new(),
        }
    }
}

/// The per-vCPU Xen interface emulator.
pub struct ProcessorXen {
    pub(crate) dom: Arc<dyn XenDomain>,
    pub(crate) guest_memory: GuestMemory,
    pub(crate) domid: u32,
    pub(crate) vcpuid: u32,
    pub(crate) apicid: u32,
    pub(crate) acpiid: u32,
    pub(crate) tsc_khz: u64,
    pub(crate) tsc_mul: u32,
    pub(crate) tsc_shift: i8,
    pub(crate) pet_shift: u32,
    pub(crate) domain_handle: [u8; XEN_DOMAIN_HANDLE_SIZE],
    pub(crate) shinfo: Option<LockedPage>,
    pub(crate) shinfo_gpfn: u64,
    pub(crate) user_vti: Option<MappedArea<VcpuTimeInfo>>,
    pub(crate) runstate: Option<MappedArea<VcpuRunstateInfo>>,
    pub(crate) runstate_assist: bool,
    pub(crate) pet_enabled: bool,
    pub(crate) pet_handlers_added: bool,
    pub(crate) tsc_at_exit: u64,
    pub(crate) evtchn: Evtchn,
    pub(crate) gnttab: GrantTable,
}

impl ProcessorXen {
    /// The Xen domain id presented to the guest.
    pub fn domid(&self) -> u32 {
        self.domid
    }

    /// The Xen vCPU id presented to the guest.
    pub fn vcpuid(&self) -> u32 {
        self.vcpuid
    }

    /// True while the single-shot timer is armed.
    pub fn pet_enabled(&self) -> bool {
        self.pet_enabled
    }

    /// The guest page number the shared-info page is bound at, or 0 if the
    /// guest has not mapped it.
    pub fn shinfo_gpfn(&self) -> u64 {
        self.shinfo_gpfn
    }

    /// Services a CPUID exit for `leaf`. Leaves outside the Xen range are
    /// left to the host.
    pub fn handle_cpuid(&mut self, vp: &mut impl VcpuRuntime, leaf: u32) -> bool {
        let [eax, ebx, ecx, edx] = match leaf.wrapping_sub(XEN_CPUID_LEAF_BASE) {
            0 => [
                XEN_CPUID_LEAF_BASE + XEN_CPUID_LEAF_COUNT,
                XEN_CPUID_SIGNATURE_EBX,
                XEN_CPUID_SIGNATURE_ECX,
                XEN_CPUID_SIGNATURE_EDX,
            ],
            1 => [XEN_VERSION_VALUE, 0, 0, 0],
            2 => [1, XEN_MSR_HYPERCALL_PAGE, 0, 0],
            4 => [
                XEN_HVM_CPUID_X2APIC_VIRT
                    | XEN_HVM_CPUID_VCPU_ID_PRESENT
                    | XEN_HVM_CPUID_DOMID_PRESENT,
                self.vcpuid,
                self.domid,
                0,
            ],
            _ => return false,
        };

        vp.set_gp(Gp::Rax, eax.into());
        vp.set_gp(Gp::Rbx, ebx.into());
        vp.set_gp(Gp::Rcx, ecx.into());
        vp.set_gp(Gp::Rdx, edx.into());
        vp.advance_ip();
        true
    }

    /// Services a WRMSR exit for the synthetic MSRs this interface claims.
    pub fn handle_wrmsr(&mut self, vp: &mut impl VcpuRuntime, msr: u32, value: u64) -> bool {
        match msr {
            XEN_MSR_HYPERCALL_PAGE => match self.write_hypercall_page(value) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        gpa = value,
                        error = &err as &dyn std::error::Error,
                        "bad hypercall page address"
                    );
                    false
                }
            },
            X2APIC_MSR_SELF_IPI => {
                vp.queue_external_interrupt(value as u8);
                true
            }
            APIC_MSR_TSC_DEADLINE if self.pet_handlers_added => {
                tracing::warn!("TSC deadline write after single-shot timer armed");
                true
            }
            _ => false,
        }
    }

    /// Fills the page at `gpa` with hypercall trampolines, one 32-byte
    /// slot per hypercall number.
    fn write_hypercall_page(&self, gpa: u64) -> Result<(), GuestMemoryError> {
        let page = self.guest_memory.lock_gpn(gpa >> 12)?;
        // int3 in the gaps to catch jumps to a bogus hypercall number.
        page.fill(0xcc);
        for i in 0..HYPERCALL_TRAMPOLINE_COUNT {
            page.write(i as usize * HYPERCALL_TRAMPOLINE_SIZE, &hypercall_trampoline(i));
        }
        Ok(())
    }

    /// Services an exception exit. NMIs are passed back to the host;
    /// everything else is logged with the faulting bytes and suppressed.
    pub fn handle_exception(&mut self, vp: &mut impl VcpuRuntime, vector: u8) -> bool {
        const NMI_VECTOR: u8 = 2;
        if vector == NMI_VECTOR {
            return false;
        }

        let rip = vp.rip();
        let bytes = self.read_guest_bytes(vp, rip);
        tracing::error!(vector, rip, bytes = %bytes, "guest exception");

        vp.clear_exception_bitmap();
        true
    }

    /// Reads and hex-formats 32 bytes of guest code at `gva` for exception
    /// logging.
    fn read_guest_bytes(&self, vp: &mut impl VcpuRuntime, gva: u64) -> String {
        match self.map_arg::<[u8; 32]>(vp, gva) {
            Ok(area) => area.read().iter().map(|b| format!("{b:02x}")).collect(),
            Err(err) => format!("<unmapped: {err}>"),
        }
    }

    /// Services an external-interrupt exit: deliver a guest MSI locally or
    /// to its owning vCPU, or reflect the interrupt to the parent.
    pub fn handle_interrupt(&mut self, vp: &mut impl VcpuRuntime, vector: u8) -> bool {
        if let Some(msi) = vp.find_guest_msi(vector) {
            if msi.guest_vcpu == self.vcpuid {
                vp.queue_external_interrupt(msi.vector);
            } else {
                vp.push_external_interrupt(msi.guest_vcpu, msi.vector);
            }
        } else {
            vp.save_xstate();
            self.update_runstate(vp, Runstate::RUNNABLE);

            let parent = vp.parent();
            parent.load();
            parent.queue_external_interrupt(vector);
            parent.return_resume_after_interrupt();
        }

        true
    }

    /// Services a HLT exit by yielding the remaining timer budget to the
    /// parent. Declines if interrupts are disabled (the host's default HLT
    /// emulation applies) or if the guest has never armed the timer.
    pub fn handle_hlt(&mut self, vp: &mut impl VcpuRuntime) -> bool {
        if !self.pet_handlers_added {
            return false;
        }
        if !vp.interrupts_enabled() {
            return false;
        }

        vp.advance_ip();
        self.queue_virq(vp, VIRQ_TIMER);
        self.update_runstate(vp, Runstate::BLOCKED);
        vp.clear_sti_blocking();

        let pet = vp.preemption_timer();
        let budget_us = (((pet as u128) << self.pet_shift) * 1000 / self.tsc_khz as u128) as u64;

        vp.save_xstate();
        let parent = vp.parent();
        parent.load();
        parent.return_yield(budget_us);

        true
    }

    /// Services a preemption-timer exit.
    pub fn handle_preemption_timer(&mut self, vp: &mut impl VcpuRuntime) -> bool {
        if !self.pet_handlers_added {
            return false;
        }
        self.handle_pet(vp)
    }

    /// VM-exit hook, run on every exit before any handler.
    pub fn on_vmexit(&mut self, vp: &mut impl VcpuRuntime) {
        self.vmexit_save_tsc(vp);
    }

    /// Resume hook, run before every guest entry.
    pub fn on_resume(&mut self, vp: &mut impl VcpuRuntime) {
        self.resume_update(vp);
    }
}
