// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tests for the Xen interface emulator, driven through a mock host vCPU.

use crate::pages::GuestMemory;
use crate::pages::GuestMemoryError;
use crate::x86::Gp;
use crate::x86::X64RegisterState;
use crate::xen::GlobalXen;
use crate::xen::GlobalXenParams;
use crate::xen::ProcessorXen;
use crate::MsiRoute;
use crate::ParentVcpu;
use crate::StartOfDay;
use crate::VcpuRuntime;
use crate::XenDomain;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem::offset_of;
use std::sync::Arc;
use xendef::*;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

const TSC_KHZ: u64 = 2_500_000;
const PET_SHIFT: u32 = 3;

// Guest physical layout used by the tests; GVA translation is identity.
const ARG_GPA: u64 = 0x1000;
const AREA_GPA: u64 = 0x3000;
const SHINFO_GPFN: u64 = 2;
const HCALL_PAGE_GPA: u64 = 0x10_0000;
const RAM_PAGES: usize = 0x110;

const CALLBACK_VECTOR: u8 = 0x30;

struct TestDomain {
    initdom: bool,
    id: u64,
    sod: StartOfDay,
    rx: Mutex<VecDeque<u8>>,
    tx: Mutex<Vec<u8>>,
}

impl TestDomain {
    fn new(initdom: bool, id: u64, sod: StartOfDay) -> Arc<Self> {
        Arc::new(Self {
            initdom,
            id,
            sod,
            rx: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Vec::new()),
        })
    }
}

impl XenDomain for TestDomain {
    fn initdom(&self) -> bool {
        self.initdom
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn sod_info(&self) -> StartOfDay {
        self.sod
    }

    fn hvc_rx_get(&self, buf: &mut [u8]) -> usize {
        let mut rx = self.rx.lock();
        let n = buf.len().min(rx.len());
        for b in &mut buf[..n] {
            *b = rx.pop_front().unwrap();
        }
        n
    }

    fn hvc_tx_put(&self, buf: &[u8]) -> usize {
        self.tx.lock().extend_from_slice(buf);
        buf.len()
    }
}

#[derive(Default)]
struct TestParent {
    loads: u32,
    queued: Vec<u8>,
    resumes: u32,
    yields: Vec<u64>,
}

impl ParentVcpu for TestParent {
    fn load(&mut self) {
        self.loads += 1;
    }

    fn queue_external_interrupt(&mut self, vector: u8) {
        self.queued.push(vector);
    }

    fn return_resume_after_interrupt(&mut self) {
        self.resumes += 1;
    }

    fn return_yield(&mut self, budget_us: u64) {
        self.yields.push(budget_us);
    }
}

struct TestVcpu {
    regs: [u64; 8],
    rip: u64,
    advances: u32,
    tsc: u64,
    pet: u64,
    pet_on: bool,
    queued: Vec<u8>,
    pushed: Vec<(u32, u8)>,
    if_flag: bool,
    sti_cleared: bool,
    exception_bitmap_cleared: bool,
    xstate_saves: u32,
    msi_routes: Vec<(u8, MsiRoute)>,
    bad_gvas: Vec<u64>,
    parent: TestParent,
}

impl TestVcpu {
    fn new() -> Self {
        Self {
            regs: [0; 8],
            rip: 0xffff_ffff_8100_0000,
            advances: 0,
            tsc: 0,
            pet: 0,
            pet_on: false,
            queued: Vec::new(),
            pushed: Vec::new(),
            if_flag: true,
            sti_cleared: false,
            exception_bitmap_cleared: false,
            xstate_saves: 0,
            msi_routes: Vec::new(),
            bad_gvas: Vec::new(),
            parent: TestParent::default(),
        }
    }
}

impl X64RegisterState for TestVcpu {
    fn rip(&mut self) -> u64 {
        self.rip
    }

    fn set_rip(&mut self, rip: u64) {
        self.rip = rip;
    }

    fn gp(&mut self, n: Gp) -> u64 {
        self.regs[n as usize]
    }

    fn set_gp(&mut self, n: Gp, value: u64) {
        self.regs[n as usize] = value;
    }

    fn advance_ip(&mut self) {
        self.advances += 1;
        self.rip = self.rip.wrapping_add(3);
    }
}

impl VcpuRuntime for TestVcpu {
    fn read_tsc(&mut self) -> u64 {
        self.tsc
    }

    fn preemption_timer(&mut self) -> u64 {
        self.pet
    }

    fn set_preemption_timer(&mut self, ticks: u64) {
        self.pet = ticks;
    }

    fn enable_preemption_timer(&mut self) {
        self.pet_on = true;
    }

    fn disable_preemption_timer(&mut self) {
        self.pet_on = false;
    }

    fn queue_external_interrupt(&mut self, vector: u8) {
        self.queued.push(vector);
    }

    fn push_external_interrupt(&mut self, guest_vcpu: u32, vector: u8) {
        self.pushed.push((guest_vcpu, vector));
    }

    fn interrupts_enabled(&mut self) -> bool {
        self.if_flag
    }

    fn clear_sti_blocking(&mut self) {
        self.sti_cleared = true;
    }

    fn clear_exception_bitmap(&mut self) {
        self.exception_bitmap_cleared = true;
    }

    fn save_xstate(&mut self) {
        self.xstate_saves += 1;
    }

    fn translate_gva(&mut self, gva: u64, _len: usize) -> Result<u64, GuestMemoryError> {
        if self.bad_gvas.contains(&(gva & !0xfff)) {
            return Err(GuestMemoryError::UnmappedGva { gva });
        }
        Ok(gva)
    }

    fn find_guest_msi(&mut self, host_vector: u8) -> Option<MsiRoute> {
        self.msi_routes
            .iter()
            .find(|(v, _)| *v == host_vector)
            .map(|(_, r)| *r)
    }

    fn parent(&mut self) -> &mut dyn ParentVcpu {
        &mut self.parent
    }
}

struct TestBed {
    xen: ProcessorXen,
    vp: TestVcpu,
    mem: GuestMemory,
    dom: Arc<TestDomain>,
    timer_port: u32,
}

impl TestBed {
    fn new(initdom: bool, sod: StartOfDay) -> Self {
        let mem = GuestMemory::allocate(RAM_PAGES);
        let dom = TestDomain::new(initdom, 7, sod);
        let global = GlobalXen::new(GlobalXenParams {
            dom: dom.clone(),
            guest_memory: mem.clone(),
            tsc_khz: TSC_KHZ,
            pet_shift: PET_SHIFT,
        });
        let xen = global.add_vp();
        Self {
            xen,
            vp: TestVcpu::new(),
            mem,
            dom,
            timer_port: 0,
        }
    }

    fn new_domu() -> Self {
        Self::new(
            false,
            StartOfDay {
                tsc: 0,
                wc_sec: 1_700_000_000,
                wc_nsec: 0,
            },
        )
    }

    fn write_obj<T: IntoBytes + Immutable>(&self, gpa: u64, value: &T) {
        let page = self.mem.lock_gpn(gpa >> 12).unwrap();
        page.write_obj((gpa & 0xfff) as usize, value);
    }

    fn read_obj<T: FromBytes + IntoBytes>(&self, gpa: u64) -> T {
        let page = self.mem.lock_gpn(gpa >> 12).unwrap();
        page.read_obj((gpa & 0xfff) as usize)
    }

    fn hypercall(&mut self, num: HypercallNum, rdi: u64, rsi: u64, rdx: u64) -> (bool, u64) {
        self.vp.set_gp(Gp::Rax, num.0);
        self.vp.set_gp(Gp::Rdi, rdi);
        self.vp.set_gp(Gp::Rsi, rsi);
        self.vp.set_gp(Gp::Rdx, rdx);
        let handled = self.xen.handle_hypercall(&mut self.vp);
        (handled, self.vp.gp(Gp::Rax))
    }

    fn cpuid(&mut self, leaf: u32) -> [u32; 4] {
        assert!(self.xen.handle_cpuid(&mut self.vp, leaf));
        [
            self.vp.gp(Gp::Rax) as u32,
            self.vp.gp(Gp::Rbx) as u32,
            self.vp.gp(Gp::Rcx) as u32,
            self.vp.gp(Gp::Rdx) as u32,
        ]
    }

    fn init_shared_info(&mut self) {
        let (handled, rax) = self.add_to_physmap(MapSpace::SHARED_INFO, SHINFO_GPFN);
        assert!(handled);
        assert_eq!(rax, 0);
    }

    fn add_to_physmap(&mut self, space: MapSpace, gpfn: u64) -> (bool, u64) {
        self.write_obj(
            ARG_GPA,
            &XenAddToPhysmap {
                domid: DOMID_SELF,
                size: 0,
                space: space.0,
                idx: 0,
                gpfn,
            },
        );
        self.hypercall(
            HypercallNum::MEMORY_OP,
            MemoryOp::ADD_TO_PHYSMAP.0,
            ARG_GPA,
            0,
        )
    }

    fn set_callback_vector(&mut self, value: u64) -> (bool, u64) {
        self.write_obj(
            ARG_GPA,
            &XenHvmParam {
                domid: DOMID_SELF,
                pad: [0; 2],
                index: HVM_PARAM_CALLBACK_IRQ,
                value,
            },
        );
        self.hypercall(HypercallNum::HVM_OP, HvmOp::SET_PARAM.0, ARG_GPA, 0)
    }

    fn bind_virq(&mut self, virq: u32) -> u32 {
        self.write_obj(
            ARG_GPA,
            &EvtchnBindVirq {
                virq,
                vcpu: 0,
                port: 0,
            },
        );
        let (handled, rax) = self.hypercall(
            HypercallNum::EVENT_CHANNEL_OP,
            EvtchnOp::BIND_VIRQ.0,
            ARG_GPA,
            0,
        );
        assert!(handled);
        assert_eq!(rax, 0);
        self.read_obj::<EvtchnBindVirq>(ARG_GPA).port
    }

    fn set_singleshot_timer(&mut self, timeout_abs_ns: u64, flags: u32) -> (bool, u64) {
        self.write_obj(
            ARG_GPA,
            &VcpuSetSingleshotTimer {
                timeout_abs_ns,
                flags,
                pad: 0,
            },
        );
        self.hypercall(
            HypercallNum::VCPU_OP,
            VcpuOp::SET_SINGLESHOT_TIMER.0,
            0,
            ARG_GPA,
        )
    }

    fn register_runstate_area(&mut self) {
        self.write_obj(ARG_GPA, &VcpuRegisterRunstateMemoryArea { addr: AREA_GPA });
        let (handled, rax) = self.hypercall(
            HypercallNum::VCPU_OP,
            VcpuOp::REGISTER_RUNSTATE_MEMORY_AREA.0,
            0,
            ARG_GPA,
        );
        assert!(handled);
        assert_eq!(rax, 0);
    }

    fn shinfo(&self) -> SharedInfo {
        self.read_obj(SHINFO_GPFN << 12)
    }

    // A fully booted PV guest: shared info bound, callback vector
    // registered, timer VIRQ bound.
    fn booted() -> Self {
        let mut t = Self::new_domu();
        t.init_shared_info();
        let (handled, rax) = t.set_callback_vector(
            (u64::from(HVM_PARAM_CALLBACK_TYPE_VECTOR) << 56) | u64::from(CALLBACK_VECTOR),
        );
        assert!(handled);
        assert_eq!(rax, 0);
        t.timer_port = t.bind_virq(VIRQ_TIMER);
        t.vp.queued.clear();
        t
    }
}

#[test]
fn init_domain_ids_are_all_zero() {
    let t = TestBed::new(
        true,
        StartOfDay {
            tsc: 0,
            wc_sec: 0,
            wc_nsec: 0,
        },
    );
    assert_eq!(t.xen.domid(), 0);
    assert_eq!(t.xen.vcpuid(), 0);
    assert_eq!(t.xen.apicid, 0);
    assert_eq!(t.xen.acpiid, 0);
}

#[test]
fn unprivileged_domains_get_distinct_nonzero_ids() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(|| TestBed::new_domu().xen.domid()))
        .collect();
    let mut ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert!(ids.iter().all(|&id| id != 0));

    let t = TestBed::new_domu();
    assert!(t.xen.vcpuid() < XEN_LEGACY_MAX_VCPUS);
    assert_eq!(t.xen.vcpuid(), 0);
    assert_eq!(t.xen.apicid, 0);
    assert_eq!(t.xen.acpiid, 0);
}

#[test]
fn boot_probe_reports_signature_version_and_hypercall_msr() {
    let mut t = TestBed::new_domu();

    let leaf0 = t.cpuid(xen_cpuid_leaf(0));
    assert_eq!(leaf0[0], xen_cpuid_leaf(5));
    assert_eq!(leaf0[1], u32::from_le_bytes(*b"XenV"));
    assert_eq!(leaf0[2], u32::from_le_bytes(*b"MMXe"));
    assert_eq!(leaf0[3], u32::from_le_bytes(*b"nVMM"));

    let leaf1 = t.cpuid(xen_cpuid_leaf(1));
    assert_eq!(leaf1, [0x0004_000D, 0, 0, 0]);

    let leaf2 = t.cpuid(xen_cpuid_leaf(2));
    assert_eq!(leaf2, [1, 0xC000_0500, 0, 0]);

    assert!(!t.xen.handle_cpuid(&mut t.vp, xen_cpuid_leaf(3)));
}

#[test]
fn features_leaf_reports_ids_and_feature_bits() {
    let mut t = TestBed::new_domu();
    let domid = t.xen.domid();
    let leaf4 = t.cpuid(xen_cpuid_leaf(4));
    assert_eq!(
        leaf4[0],
        XEN_HVM_CPUID_X2APIC_VIRT | XEN_HVM_CPUID_VCPU_ID_PRESENT | XEN_HVM_CPUID_DOMID_PRESENT
    );
    assert_eq!(leaf4[1], 0);
    assert_eq!(leaf4[2], domid);
}

#[test]
fn hypercall_page_write_installs_trampolines() {
    let mut t = TestBed::new_domu();
    assert!(t
        .xen
        .handle_wrmsr(&mut t.vp, XEN_MSR_HYPERCALL_PAGE, HCALL_PAGE_GPA));

    let page = t.mem.lock_gpn(HCALL_PAGE_GPA >> 12).unwrap();
    for i in 0..HYPERCALL_TRAMPOLINE_COUNT {
        let mut slot = [0u8; 9];
        page.read(i as usize * HYPERCALL_TRAMPOLINE_SIZE, &mut slot);
        assert_eq!(slot, [0xb8, i, 0x00, 0x00, 0x00, 0x0f, 0x01, 0xc1, 0xc3]);
    }
}

#[test]
fn hypercall_page_write_to_unbacked_address_is_unhandled() {
    let mut t = TestBed::new_domu();
    assert!(!t
        .xen
        .handle_wrmsr(&mut t.vp, XEN_MSR_HYPERCALL_PAGE, 0xffff_f000));
}

#[test]
fn self_ipi_msr_queues_the_vector() {
    let mut t = TestBed::new_domu();
    assert!(t.xen.handle_wrmsr(&mut t.vp, X2APIC_MSR_SELF_IPI, 0x41));
    assert_eq!(t.vp.queued, [0x41]);
}

#[test]
fn tsc_deadline_msr_is_swallowed_only_after_timer_arming() {
    let mut t = TestBed::booted();
    assert!(!t.xen.handle_wrmsr(&mut t.vp, APIC_MSR_TSC_DEADLINE, 123));
    t.set_singleshot_timer(1_000_000, 0);
    assert!(t.xen.handle_wrmsr(&mut t.vp, APIC_MSR_TSC_DEADLINE, 123));
}

#[test]
fn shared_info_init_derives_wall_clock_from_start_of_day() {
    let mut t = TestBed::new_domu();
    // Two seconds of cycles since the start-of-day anchor.
    t.vp.tsc = 2 * TSC_KHZ * 1000;
    t.init_shared_info();

    assert_eq!(t.xen.shinfo_gpfn(), SHINFO_GPFN);
    let shinfo = t.shinfo();
    assert_eq!(shinfo.wc_sec, 1_700_000_002);
    assert_eq!(shinfo.wc_nsec, 0);
    assert_eq!(shinfo.wc_sec_hi, 0);
    assert_eq!(shinfo.wc_version % 2, 0);

    let vti = shinfo.vcpu_info[0].time;
    assert_eq!(vti.tsc_timestamp, t.vp.tsc);
    assert_eq!(vti.tsc_shift, 0);
    assert_ne!(vti.tsc_to_system_mul, 0);
    assert_eq!(vti.flags & PVCLOCK_TSC_STABLE_BIT, PVCLOCK_TSC_STABLE_BIT);
}

#[test]
fn settime64_rewrites_the_wall_clock_under_the_seqlock() {
    let mut t = TestBed::booted();
    let version_before = t.shinfo().wc_version;

    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: PlatformOp::SETTIME64.0,
        interface_version: XENPF_INTERFACE_VERSION,
    });
    t.write_obj(
        ARG_GPA + XENPF_PAYLOAD_OFFSET as u64,
        &XenpfSettime64 {
            secs: 1_800_000_000,
            nsecs: 500,
            mbz: 0,
            system_time: 100,
        },
    );
    let (handled, rax) = t.hypercall(HypercallNum::PLATFORM_OP, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, 0);

    let shinfo = t.shinfo();
    assert_eq!(shinfo.wc_sec, 1_800_000_000);
    assert_eq!(shinfo.wc_nsec, 400);
    assert_eq!(shinfo.wc_version, version_before + 2);
}

#[test]
fn settime64_rejects_nonzero_mbz() {
    let mut t = TestBed::booted();
    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: PlatformOp::SETTIME64.0,
        interface_version: XENPF_INTERFACE_VERSION,
    });
    t.write_obj(
        ARG_GPA + XENPF_PAYLOAD_OFFSET as u64,
        &XenpfSettime64 {
            secs: 1,
            nsecs: 0,
            mbz: 1,
            system_time: 0,
        },
    );
    let (handled, rax) = t.hypercall(HypercallNum::PLATFORM_OP, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, XenErrno::EINVAL.as_ret());
}

#[test]
fn platform_op_rejects_stale_interface_version() {
    let mut t = TestBed::booted();
    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: PlatformOp::SETTIME64.0,
        interface_version: 0x0300_0000,
    });
    let (handled, rax) = t.hypercall(HypercallNum::PLATFORM_OP, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, XenErrno::EACCES.as_ret());
}

#[test]
fn callback_vector_registration_validates_type_and_range() {
    let mut t = TestBed::new_domu();
    let vector_type = u64::from(HVM_PARAM_CALLBACK_TYPE_VECTOR) << 56;

    let (handled, rax) = t.set_callback_vector(vector_type | 0x30);
    assert!(handled);
    assert_eq!(rax, 0);

    let (handled, rax) = t.set_callback_vector(vector_type | 0x10);
    assert!(handled);
    assert_eq!(rax, XenErrno::EINVAL.as_ret());

    let gsi_type = u64::from(HVM_PARAM_CALLBACK_TYPE_GSI) << 56;
    let (handled, rax) = t.set_callback_vector(gsi_type | 0x30);
    assert!(handled);
    assert_eq!(rax, XenErrno::EINVAL.as_ret());
}

#[test]
fn hvm_get_param_is_unimplemented() {
    let mut t = TestBed::new_domu();
    t.write_obj(
        ARG_GPA,
        &XenHvmParam {
            domid: DOMID_SELF,
            pad: [0; 2],
            index: HVM_PARAM_CONSOLE_PFN,
            value: 0,
        },
    );
    let (handled, rax) = t.hypercall(HypercallNum::HVM_OP, HvmOp::GET_PARAM.0, ARG_GPA, 0);
    assert!(handled);
    assert_eq!(rax, XenErrno::ENOSYS.as_ret());
}

#[test]
fn single_shot_timer_programs_the_scaled_deadline() {
    let mut t = TestBed::booted();
    let (handled, rax) = t.set_singleshot_timer(1_000_000, 0);
    assert!(handled);
    assert_eq!(rax, 0);

    // 1 ms at 2.5 GHz is 2.5M cycles, shifted down into PET ticks.
    assert_eq!(t.vp.pet, 2_500_000 >> PET_SHIFT);
    assert!(t.vp.pet_on);
    assert!(t.xen.pet_enabled());
}

#[test]
fn single_shot_timer_fire_queues_the_timer_virq_once() {
    let mut t = TestBed::booted();
    t.set_singleshot_timer(1_000_000, 0);

    assert!(t.xen.handle_preemption_timer(&mut t.vp));
    assert!(!t.xen.pet_enabled());
    assert!(!t.vp.pet_on);
    assert_eq!(t.vp.queued, [CALLBACK_VECTOR]);

    let shinfo = t.shinfo();
    let port = t.timer_port;
    assert_ne!(shinfo.evtchn_pending[(port / 64) as usize] & (1 << (port % 64)), 0);
    assert_eq!(shinfo.vcpu_info[0].evtchn_upcall_pending, 1);
}

#[test]
fn stale_deadline_with_future_flag_fails_with_etime() {
    let mut t = TestBed::booted();
    // Advance the clock so system_time is past the deadline.
    t.vp.tsc += TSC_KHZ * 1000;
    t.xen.on_resume(&mut t.vp);

    let now = t.xen.kernel_system_time();
    let (handled, rax) = t.set_singleshot_timer(now - 1, VCPU_SSHOTTMR_FUTURE);
    assert!(handled);
    assert_eq!(rax, XenErrno::ETIME.as_ret());

    let (handled, rax) = t.set_singleshot_timer(now - 1, 0);
    assert!(handled);
    assert_eq!(rax, 0);
    assert_eq!(t.vp.pet, 0);
    assert!(t.vp.pet_on);
}

#[test]
fn stop_singleshot_timer_disarms() {
    let mut t = TestBed::booted();
    t.set_singleshot_timer(1_000_000, 0);
    let (handled, rax) = t.hypercall(
        HypercallNum::VCPU_OP,
        VcpuOp::STOP_SINGLESHOT_TIMER.0,
        0,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);
    assert!(!t.xen.pet_enabled());
    assert!(!t.vp.pet_on);
}

#[test]
fn exits_steal_elapsed_ticks_from_the_timer() {
    let mut t = TestBed::booted();
    t.set_singleshot_timer(1_000_000, 0);
    let programmed = t.vp.pet;

    t.xen.on_vmexit(&mut t.vp);
    t.vp.tsc += 80_000;
    t.xen.on_resume(&mut t.vp);
    assert_eq!(t.vp.pet, programmed - (80_000 >> PET_SHIFT));

    // A long absence floors the count at zero rather than wrapping.
    t.xen.on_vmexit(&mut t.vp);
    t.vp.tsc += 10 * TSC_KHZ * 1000;
    t.xen.on_resume(&mut t.vp);
    assert_eq!(t.vp.pet, 0);
}

#[test]
fn first_exit_does_not_steal_without_a_snapshot() {
    let mut t = TestBed::booted();
    t.set_singleshot_timer(1_000_000, 0);
    let programmed = t.vp.pet;

    // No on_vmexit yet, so tsc_at_exit is still the init guard value.
    t.vp.tsc += 80_000;
    t.xen.on_resume(&mut t.vp);
    assert_eq!(t.vp.pet, programmed);
}

#[test]
fn hlt_yields_the_remaining_timer_budget_to_the_parent() {
    let mut t = TestBed::booted();
    t.register_runstate_area();
    t.set_singleshot_timer(1_000_000, 0);
    let rip_before = t.vp.rip;

    assert!(t.xen.handle_hlt(&mut t.vp));

    // (pet << pet_shift) ticks at 2.5e6 ticks/ms is exactly 1000 us here.
    assert_eq!(t.vp.parent.yields, [1000]);
    assert_eq!(t.vp.parent.loads, 1);
    assert!(t.vp.rip > rip_before);
    assert!(t.vp.sti_cleared);
    assert_eq!(t.vp.xstate_saves, 1);
    assert_eq!(t.vp.queued, [CALLBACK_VECTOR]);

    let runstate: VcpuRunstateInfo = t.read_obj(AREA_GPA);
    assert_eq!(runstate.state, Runstate::BLOCKED.0);
}

#[test]
fn hlt_with_interrupts_disabled_is_left_to_the_host() {
    let mut t = TestBed::booted();
    t.set_singleshot_timer(1_000_000, 0);
    t.vp.if_flag = false;
    assert!(!t.xen.handle_hlt(&mut t.vp));
    assert!(t.vp.parent.yields.is_empty());
}

#[test]
fn hlt_before_timer_arming_is_left_to_the_host() {
    let mut t = TestBed::booted();
    assert!(!t.xen.handle_hlt(&mut t.vp));
}

#[test]
fn external_interrupt_without_msi_is_reflected_to_the_parent() {
    let mut t = TestBed::booted();
    t.register_runstate_area();

    assert!(t.xen.handle_interrupt(&mut t.vp, 0x60));
    assert_eq!(t.vp.parent.queued, [0x60]);
    assert_eq!(t.vp.parent.loads, 1);
    assert_eq!(t.vp.parent.resumes, 1);
    assert_eq!(t.vp.xstate_saves, 1);

    let runstate: VcpuRunstateInfo = t.read_obj(AREA_GPA);
    assert_eq!(runstate.state, Runstate::RUNNABLE.0);
}

#[test]
fn guest_msi_is_routed_to_the_owning_vcpu() {
    let mut t = TestBed::booted();
    t.vp.msi_routes.push((
        0x61,
        MsiRoute {
            guest_vcpu: 0,
            vector: 0x71,
        },
    ));
    t.vp.msi_routes.push((
        0x62,
        MsiRoute {
            guest_vcpu: 5,
            vector: 0x72,
        },
    ));

    assert!(t.xen.handle_interrupt(&mut t.vp, 0x61));
    assert_eq!(t.vp.queued, [0x71]);
    assert!(t.vp.parent.queued.is_empty());

    assert!(t.xen.handle_interrupt(&mut t.vp, 0x62));
    assert_eq!(t.vp.pushed, [(5, 0x72)]);
}

#[test]
fn runstate_accumulators_cover_all_elapsed_time() {
    let mut t = TestBed::booted();
    t.register_runstate_area();

    let steps = [
        (40_000, Runstate::RUNNABLE),
        (25_000, Runstate::RUNNING),
        (125_000, Runstate::BLOCKED),
        (10_000, Runstate::RUNNING),
    ];
    for (ticks, state) in steps {
        t.vp.tsc += ticks;
        t.xen.update_runstate(&mut t.vp, state);
    }

    let runstate: VcpuRunstateInfo = t.read_obj(AREA_GPA);
    let total: u64 = runstate.time.iter().sum();
    assert_eq!(total, t.xen.kernel_system_time());
    assert_eq!(runstate.state, Runstate::RUNNING.0);
    assert_eq!(runstate.state_entry_time, t.xen.kernel_system_time());
}

#[test]
fn runstate_assist_leaves_no_update_bit_behind() {
    let mut t = TestBed::booted();
    t.register_runstate_area();

    let (handled, rax) = t.hypercall(
        HypercallNum::VM_ASSIST,
        VmAssistCmd::ENABLE.0,
        VMASST_TYPE_RUNSTATE_UPDATE_FLAG,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);

    t.vp.tsc += 50_000;
    t.xen.update_runstate(&mut t.vp, Runstate::BLOCKED);

    let runstate: VcpuRunstateInfo = t.read_obj(AREA_GPA);
    assert_eq!(runstate.state_entry_time & XEN_RUNSTATE_UPDATE, 0);
    assert_eq!(runstate.state_entry_time, t.xen.kernel_system_time());
}

#[test]
fn vm_assist_rejects_other_types() {
    let mut t = TestBed::new_domu();
    let (handled, _) = t.hypercall(HypercallNum::VM_ASSIST, VmAssistCmd::ENABLE.0, 4, 0);
    assert!(!handled);
    let (handled, _) = t.hypercall(
        HypercallNum::VM_ASSIST,
        VmAssistCmd::DISABLE.0,
        VMASST_TYPE_RUNSTATE_UPDATE_FLAG,
        0,
    );
    assert!(!handled);
}

#[test]
fn registered_time_area_mirrors_the_kernel_copy() {
    let mut t = TestBed::booted();
    t.write_obj(ARG_GPA, &VcpuRegisterTimeMemoryArea { addr: AREA_GPA });
    let (handled, rax) = t.hypercall(
        HypercallNum::VCPU_OP,
        VcpuOp::REGISTER_VCPU_TIME_MEMORY_AREA.0,
        0,
        ARG_GPA,
    );
    assert!(handled);
    assert_eq!(rax, 0);

    let kernel = t.shinfo().vcpu_info[0].time;
    let user: VcpuTimeInfo = t.read_obj(AREA_GPA);
    assert_eq!(user.tsc_timestamp, kernel.tsc_timestamp);
    assert_eq!(user.tsc_to_system_mul, kernel.tsc_to_system_mul);

    t.vp.tsc += 100_000;
    t.xen.on_resume(&mut t.vp);

    let kernel = t.shinfo().vcpu_info[0].time;
    let user: VcpuTimeInfo = t.read_obj(AREA_GPA);
    assert_eq!(user.system_time, kernel.system_time);
    assert_eq!(user.tsc_timestamp, t.vp.tsc);
    assert_eq!(user.version % 2, 0);
    assert_eq!(kernel.version % 2, 0);
}

#[test]
fn console_io_copies_through_the_domain_rings() {
    let mut t = TestBed::new(
        true,
        StartOfDay {
            tsc: 0,
            wc_sec: 0,
            wc_nsec: 0,
        },
    );

    let msg = b"(XEN) booting";
    t.write_obj(ARG_GPA, msg);
    let (handled, rax) = t.hypercall(
        HypercallNum::CONSOLE_IO,
        ConsoleIo::WRITE.0,
        msg.len() as u64,
        ARG_GPA,
    );
    assert!(handled);
    assert_eq!(rax, msg.len() as u64);
    assert_eq!(t.dom.tx.lock().as_slice(), msg);

    t.dom.rx.lock().extend(b"ok\n");
    let (handled, rax) = t.hypercall(HypercallNum::CONSOLE_IO, ConsoleIo::READ.0, 16, ARG_GPA);
    assert!(handled);
    assert_eq!(rax, 3);
    let buf: [u8; 3] = t.read_obj(ARG_GPA);
    assert_eq!(&buf, b"ok\n");
}

#[test]
fn version_subservice_answers_the_probe_set() {
    let mut t = TestBed::new_domu();

    let (handled, rax) = t.hypercall(HypercallNum::XEN_VERSION, XenVer::VERSION.0, 0, 0);
    assert!(handled);
    assert_eq!(rax, 0x0004_000D);

    let (handled, rax) = t.hypercall(HypercallNum::XEN_VERSION, XenVer::PAGESIZE.0, 0, 0);
    assert!(handled);
    assert_eq!(rax, 4096);

    t.write_obj(ARG_GPA, &XenFeatureInfo { submap_idx: 0, submap: 0 });
    let (handled, rax) =
        t.hypercall(HypercallNum::XEN_VERSION, XenVer::GET_FEATURES.0, ARG_GPA, 0);
    assert!(handled);
    assert_eq!(rax, 0);
    let features: XenFeatureInfo = t.read_obj(ARG_GPA);
    assert_ne!(features.submap & (1 << XENFEAT_HVM_CALLBACK_VECTOR), 0);
    assert_ne!(features.submap & (1 << XENFEAT_HVM_SAFE_PVCLOCK), 0);

    let (handled, rax) =
        t.hypercall(HypercallNum::XEN_VERSION, XenVer::GUEST_HANDLE.0, ARG_GPA, 0);
    assert!(handled);
    assert_eq!(rax, 0);
    let handle: [u8; XEN_DOMAIN_HANDLE_SIZE] = t.read_obj(ARG_GPA);
    assert_ne!(handle, [0; XEN_DOMAIN_HANDLE_SIZE]);
}

#[test]
fn grant_table_pins_version_one() {
    let mut t = TestBed::new_domu();

    t.write_obj(ARG_GPA, &GnttabSetVersion { version: 2 });
    let (handled, rax) = t.hypercall(
        HypercallNum::GRANT_TABLE_OP,
        GnttabOp::SET_VERSION.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, XenErrno::ENOSYS.as_ret());

    t.write_obj(ARG_GPA, &GnttabSetVersion { version: 1 });
    let (handled, rax) = t.hypercall(
        HypercallNum::GRANT_TABLE_OP,
        GnttabOp::SET_VERSION.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);

    t.write_obj(
        ARG_GPA,
        &GnttabQuerySize {
            dom: DOMID_SELF,
            pad0: [0; 2],
            nr_frames: 0,
            max_nr_frames: 0,
            status: -1,
            pad1: [0; 2],
        },
    );
    let (handled, rax) = t.hypercall(
        HypercallNum::GRANT_TABLE_OP,
        GnttabOp::QUERY_SIZE.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);
    let info: GnttabQuerySize = t.read_obj(ARG_GPA);
    assert_eq!(info.status, GNTST_OKAY);
    assert_ne!(info.max_nr_frames, 0);

    t.write_obj(
        ARG_GPA,
        &GnttabGetVersion {
            dom: DOMID_SELF,
            pad: [0; 2],
            version: 99,
        },
    );
    let (handled, rax) = t.hypercall(
        HypercallNum::GRANT_TABLE_OP,
        GnttabOp::GET_VERSION.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);
    assert_eq!(t.read_obj::<GnttabGetVersion>(ARG_GPA).version, 1);
}

#[test]
fn event_channel_ports_allocate_and_close() {
    let mut t = TestBed::new_domu();

    t.write_obj(
        ARG_GPA,
        &EvtchnAllocUnbound {
            dom: DOMID_SELF,
            remote_dom: 0,
            port: 0,
        },
    );
    let (handled, rax) = t.hypercall(
        HypercallNum::EVENT_CHANNEL_OP,
        EvtchnOp::ALLOC_UNBOUND.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);
    let port = t.read_obj::<EvtchnAllocUnbound>(ARG_GPA).port;
    assert_ne!(port, 0);

    t.write_obj(ARG_GPA, &EvtchnClose { port });
    let (handled, rax) = t.hypercall(
        HypercallNum::EVENT_CHANNEL_OP,
        EvtchnOp::CLOSE.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);

    // Double close fails.
    let (handled, rax) = t.hypercall(
        HypercallNum::EVENT_CHANNEL_OP,
        EvtchnOp::CLOSE.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, XenErrno::EINVAL.as_ret());
}

#[test]
fn fifo_event_channel_abi_is_refused() {
    let mut t = TestBed::new_domu();
    let (handled, rax) = t.hypercall(
        HypercallNum::EVENT_CHANNEL_OP,
        EvtchnOp::INIT_CONTROL.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, XenErrno::ENOSYS.as_ret());
}

#[test]
fn masked_event_channel_suppresses_the_upcall() {
    let mut t = TestBed::booted();
    let port = t.timer_port;

    // Mask the port, then fire the timer.
    let page = t.mem.lock_gpn(SHINFO_GPFN).unwrap();
    let mask_off = offset_of!(SharedInfo, evtchn_mask) + (port / 64) as usize * 8;
    page.write_obj(mask_off, &(1u64 << (port % 64)));
    drop(page);

    t.set_singleshot_timer(1_000_000, 0);
    t.vp.queued.clear();
    assert!(t.xen.handle_preemption_timer(&mut t.vp));

    let shinfo = t.shinfo();
    assert_ne!(shinfo.evtchn_pending[(port / 64) as usize] & (1 << (port % 64)), 0);
    assert_eq!(shinfo.vcpu_info[0].evtchn_upcall_pending, 0);
    assert!(t.vp.queued.is_empty());
}

#[test]
fn xsm_op_is_refused_for_the_init_domain() {
    let mut t = TestBed::new(
        true,
        StartOfDay {
            tsc: 0,
            wc_sec: 0,
            wc_nsec: 0,
        },
    );
    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: FlaskOp::SID_TO_CONTEXT.0,
        interface_version: XEN_FLASK_INTERFACE_VERSION,
    });
    let (handled, rax) = t.hypercall(HypercallNum::XSM_OP, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, XenErrno::EACCES.as_ret());
}

#[test]
fn cpu_info_reports_one_online_cpu() {
    let mut t = TestBed::new(
        true,
        StartOfDay {
            tsc: 0,
            wc_sec: 0,
            wc_nsec: 0,
        },
    );
    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: PlatformOp::GET_CPUINFO.0,
        interface_version: XENPF_INTERFACE_VERSION,
    });
    t.write_obj(
        ARG_GPA + XENPF_PAYLOAD_OFFSET as u64,
        &XenpfPcpuinfo {
            xen_cpuid: 0,
            max_present: 0,
            flags: 0,
            apic_id: 77,
            acpi_id: 77,
        },
    );
    let (handled, rax) = t.hypercall(HypercallNum::PLATFORM_OP, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, 0);
    let info: XenpfPcpuinfo = t.read_obj(ARG_GPA + XENPF_PAYLOAD_OFFSET as u64);
    assert_eq!(info.max_present, 1);
    assert_eq!(info.flags, XEN_PCPU_FLAGS_ONLINE);
    assert_eq!(info.apic_id, 0);
    assert_eq!(info.acpi_id, 0);
}

#[test]
fn pci_device_add_is_acknowledged() {
    let mut t = TestBed::new_domu();
    t.write_obj(
        ARG_GPA,
        &PhysdevPciDeviceAdd {
            seg: 0,
            bus: 3,
            devfn: 0x18,
            flags: 0,
        },
    );
    let (handled, rax) = t.hypercall(
        HypercallNum::PHYSDEV_OP,
        PhysdevOp::PCI_DEVICE_ADD.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 0);
}

#[test]
fn sysctl_and_domctl_gate_on_interface_version() {
    let mut t = TestBed::new_domu();
    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: 6,
        interface_version: 0xdead,
    });
    let (handled, rax) = t.hypercall(HypercallNum::SYSCTL, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, XenErrno::EACCES.as_ret());

    let (handled, rax) = t.hypercall(HypercallNum::DOMCTL, ARG_GPA, 0, 0);
    assert!(handled);
    assert_eq!(rax, XenErrno::EACCES.as_ret());

    // A current interface version with an unimplemented command is left
    // unhandled.
    t.write_obj(ARG_GPA, &XenOpHeader {
        cmd: 6,
        interface_version: XEN_SYSCTL_INTERFACE_VERSION,
    });
    let (handled, _) = t.hypercall(HypercallNum::SYSCTL, ARG_GPA, 0, 0);
    assert!(!handled);
}

#[test]
fn unknown_hypercalls_are_unhandled() {
    let mut t = TestBed::new_domu();
    let (handled, _) = t.hypercall(HypercallNum::SET_TRAP_TABLE, 0, 0, 0);
    assert!(!handled);
    let (handled, _) = t.hypercall(HypercallNum(999), 0, 0, 0);
    assert!(!handled);
}

#[test]
fn argument_mapping_faults_are_reported_as_unhandled() {
    let mut t = TestBed::new_domu();
    t.vp.bad_gvas.push(ARG_GPA);
    t.write_obj(
        ARG_GPA,
        &XenHvmParam {
            domid: DOMID_SELF,
            pad: [0; 2],
            index: HVM_PARAM_CALLBACK_IRQ,
            value: 0,
        },
    );
    let (handled, _) = t.hypercall(HypercallNum::HVM_OP, HvmOp::SET_PARAM.0, ARG_GPA, 0);
    assert!(!handled);
}

#[test]
fn handled_hypercalls_advance_rip() {
    let mut t = TestBed::new_domu();
    let before = t.vp.advances;
    let (handled, _) = t.hypercall(HypercallNum::XEN_VERSION, XenVer::VERSION.0, 0, 0);
    assert!(handled);
    assert_eq!(t.vp.advances, before + 1);

    let (handled, _) = t.hypercall(HypercallNum(999), 0, 0, 0);
    assert!(!handled);
    assert_eq!(t.vp.advances, before + 1);
}

#[test]
fn exceptions_are_logged_and_suppressed_except_nmi() {
    let mut t = TestBed::new_domu();
    assert!(!t.xen.handle_exception(&mut t.vp, 2));
    assert!(!t.vp.exception_bitmap_cleared);

    t.vp.rip = ARG_GPA;
    assert!(t.xen.handle_exception(&mut t.vp, 14));
    assert!(t.vp.exception_bitmap_cleared);
}

#[test]
fn vcpu_op_for_a_foreign_vcpu_is_fatal() {
    let mut t = TestBed::new_domu();
    let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        t.hypercall(HypercallNum::VCPU_OP, VcpuOp::STOP_PERIODIC_TIMER.0, 1, 0)
    }));
    assert!(err.is_err());
}

#[test]
fn decrease_reservation_releases_all_extents() {
    let mut t = TestBed::new_domu();
    t.write_obj(
        ARG_GPA,
        &XenMemoryReservation {
            extent_start: 0,
            nr_extents: 17,
            extent_order: 0,
            mem_flags: 0,
            domid: DOMID_SELF,
            pad: [0; 6],
        },
    );
    let (handled, rax) = t.hypercall(
        HypercallNum::MEMORY_OP,
        MemoryOp::DECREASE_RESERVATION.0,
        ARG_GPA,
        0,
    );
    assert!(handled);
    assert_eq!(rax, 17);
}
