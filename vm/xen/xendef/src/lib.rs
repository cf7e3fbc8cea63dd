// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Xen guest ABI definitions.
//!
//! These are the constants and guest-visible memory layouts of the subset of
//! the Xen hypervisor interface that a PV-on-HVM guest kernel probes and
//! uses: the CPUID signature leaves, the hypercall-page MSR, the hypercall
//! and sub-operation numbers, and the shared-info/time/runstate structures.
//! Layouts match the public Xen headers byte for byte.

#![no_std]
#![forbid(unsafe_code)]

use bitfield_struct::bitfield;
use core::mem::offset_of;
use core::mem::size_of;
use open_enum::open_enum;
use static_assertions::const_assert;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub const XEN_PAGE_SIZE: u64 = 4096;
pub const XEN_PAGE_SIZE_USIZE: usize = 4096;
pub const XEN_PAGE_SHIFT: u64 = 12;

/// The base of the CPUID leaf range used when Xen is presented alongside
/// another hypervisor interface (the "Viridian coexistence" offset).
pub const XEN_CPUID_LEAF_BASE: u32 = 0x4000_0100;

/// Number of CPUID leaves the interface exposes starting at the base.
pub const XEN_CPUID_LEAF_COUNT: u32 = 5;

/// Returns the `index`th CPUID leaf of the Xen range.
pub const fn xen_cpuid_leaf(index: u32) -> u32 {
    XEN_CPUID_LEAF_BASE + index
}

// "XenVMMXenVMM", returned in ebx/ecx/edx of the base leaf.
pub const XEN_CPUID_SIGNATURE_EBX: u32 = u32::from_le_bytes(*b"XenV");
pub const XEN_CPUID_SIGNATURE_ECX: u32 = u32::from_le_bytes(*b"MMXe");
pub const XEN_CPUID_SIGNATURE_EDX: u32 = u32::from_le_bytes(*b"nVMM");

pub const XEN_VERSION_MAJOR: u32 = 4;
pub const XEN_VERSION_MINOR: u32 = 13;

/// The packed version value returned by leaf base+1 and `XENVER_version`.
pub const XEN_VERSION_VALUE: u32 = (XEN_VERSION_MAJOR << 16) | XEN_VERSION_MINOR;

// Leaf base+4 feature bits.
pub const XEN_HVM_CPUID_APIC_ACCESS_VIRT: u32 = 1 << 0;
pub const XEN_HVM_CPUID_X2APIC_VIRT: u32 = 1 << 1;
pub const XEN_HVM_CPUID_IOMMU_MAPPINGS: u32 = 1 << 2;
pub const XEN_HVM_CPUID_VCPU_ID_PRESENT: u32 = 1 << 3;
pub const XEN_HVM_CPUID_DOMID_PRESENT: u32 = 1 << 4;

/// MSR whose write installs the hypercall trampoline page at the written
/// guest physical address.
pub const XEN_MSR_HYPERCALL_PAGE: u32 = 0xC000_0500;

/// x2APIC self-IPI MSR; the written value is the vector to inject.
pub const X2APIC_MSR_SELF_IPI: u32 = 0x83F;

/// APIC TSC-deadline MSR, written by guests that race their local timer
/// against the single-shot timer hypercall.
pub const APIC_MSR_TSC_DEADLINE: u32 = 0x6E0;

/// Size of one hypercall trampoline slot in the hypercall page.
pub const HYPERCALL_TRAMPOLINE_SIZE: usize = 32;

/// Number of trampolines written to the hypercall page.
pub const HYPERCALL_TRAMPOLINE_COUNT: u8 = 55;

/// The encoded instructions of hypercall trampoline `index`:
/// `mov eax, index; vmcall; ret`.
pub const fn hypercall_trampoline(index: u8) -> [u8; 9] {
    [0xb8, index, 0x00, 0x00, 0x00, 0x0f, 0x01, 0xc1, 0xc3]
}

/// Highest vCPU count representable in the legacy `shared_info` layout.
pub const XEN_LEGACY_MAX_VCPUS: u32 = 32;

pub const DOMID_SELF: u16 = 0x7FF0;

    /// Errno values of the guest ABI (the Linux numbering).
#[open_enum]
    #[derive(Debug)]
    #[repr(u32)]
    pub enum XenErrno {
        EPERM = 1,
        ENOENT = 2,
        EACCES = 13,
        EBUSY = 16,
        EEXIST = 17,
        EINVAL = 22,
        ENOSYS = 38,
        ETIME = 62,
    }

impl XenErrno {
    /// The negative-errno form returned to the guest in rax.
    pub const fn as_ret(self) -> u64 {
        (self.0 as i64).wrapping_neg() as u64
    }
}

    /// Top-level hypercall numbers, selected in rax by the trampoline index.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum HypercallNum {
        SET_TRAP_TABLE = 0,
        MMU_UPDATE = 1,
        SET_GDT = 2,
        STACK_SWITCH = 3,
        SET_CALLBACKS = 4,
        FPU_TASKSWITCH = 5,
        SCHED_OP_COMPAT = 6,
        PLATFORM_OP = 7,
        SET_DEBUGREG = 8,
        GET_DEBUGREG = 9,
        UPDATE_DESCRIPTOR = 10,
        MEMORY_OP = 12,
        MULTICALL = 13,
        UPDATE_VA_MAPPING = 14,
        SET_TIMER_OP = 15,
        EVENT_CHANNEL_OP_COMPAT = 16,
        XEN_VERSION = 17,
        CONSOLE_IO = 18,
        PHYSDEV_OP_COMPAT = 19,
        GRANT_TABLE_OP = 20,
        VM_ASSIST = 21,
        UPDATE_VA_MAPPING_OTHERDOMAIN = 22,
        IOMMU_OP = 23,
        VCPU_OP = 24,
        SET_SEGMENT_BASE = 25,
        MMUEXT_OP = 26,
        XSM_OP = 27,
        NMI_OP = 28,
        SCHED_OP = 29,
        CALLBACK_OP = 30,
        XENOPROF_OP = 31,
        EVENT_CHANNEL_OP = 32,
        PHYSDEV_OP = 33,
        HVM_OP = 34,
        SYSCTL = 35,
        DOMCTL = 36,
        KEXEC_OP = 37,
        ARGO_OP = 39,
        XENPMU_OP = 40,
    }

    /// `VCPUOP_*` sub-operations of `HYPERVISOR_vcpu_op`.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum VcpuOp {
        INITIALISE = 0,
        UP = 1,
        DOWN = 2,
        IS_UP = 3,
        GET_RUNSTATE_INFO = 4,
        REGISTER_RUNSTATE_MEMORY_AREA = 5,
        SET_PERIODIC_TIMER = 6,
        STOP_PERIODIC_TIMER = 7,
        SET_SINGLESHOT_TIMER = 8,
        STOP_SINGLESHOT_TIMER = 9,
        REGISTER_VCPU_INFO = 10,
        SEND_NMI = 11,
        GET_PHYSID = 12,
        REGISTER_VCPU_TIME_MEMORY_AREA = 13,
    }

/// `VCPU_SSHOTTMR_future`: fail the single-shot timer request with ETIME if
/// the deadline has already passed.
pub const VCPU_SSHOTTMR_FUTURE: u32 = 1 << 0;

    /// `HVMOP_*` sub-operations of `HYPERVISOR_hvm_op`.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum HvmOp {
        SET_PARAM = 0,
        GET_PARAM = 1,
        SET_PCI_INTX_LEVEL = 2,
        SET_ISA_IRQ_LEVEL = 3,
        SET_PCI_LINK_ROUTE = 4,
        FLUSH_TLBS = 5,
        TRACK_DIRTY_VRAM = 6,
        MODIFIED_MEMORY = 7,
        SET_MEM_TYPE = 8,
        PAGETABLE_DYING = 9,
    }

// HVM parameter indices.
pub const HVM_PARAM_CALLBACK_IRQ: u32 = 0;
pub const HVM_PARAM_STORE_PFN: u32 = 1;
pub const HVM_PARAM_STORE_EVTCHN: u32 = 2;
pub const HVM_PARAM_CONSOLE_PFN: u32 = 17;
pub const HVM_PARAM_CONSOLE_EVTCHN: u32 = 18;

// Delivery types encoded in bits 63:56 of the CALLBACK_IRQ parameter.
pub const HVM_PARAM_CALLBACK_TYPE_GSI: u8 = 0;
pub const HVM_PARAM_CALLBACK_TYPE_PCI_INTX: u8 = 1;
pub const HVM_PARAM_CALLBACK_TYPE_VECTOR: u8 = 2;

/// The value written to `HVM_PARAM_CALLBACK_IRQ`.
#[bitfield(u64)]
pub struct HvmParamCallbackIrq {
    pub vector: u8,
    #[bits(48)]
    _reserved: u64,
    pub via_type: u8,
}

    /// `XENPF_*` platform-op commands answered by this interface.
#[open_enum]
    #[derive(Debug)]
    #[repr(u32)]
    pub enum PlatformOp {
        GET_CPUINFO = 55,
        SETTIME64 = 62,
    }

pub const XENPF_INTERFACE_VERSION: u32 = 0x0300_0001;

/// Offset of the command payload union within `xen_platform_op`.
pub const XENPF_PAYLOAD_OFFSET: usize = 8;

pub const XEN_PCPU_FLAGS_ONLINE: u32 = 1;

    /// `CONSOLEIO_*` sub-operations.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum ConsoleIo {
        WRITE = 0,
        READ = 1,
    }

    /// `VMASST_CMD_*`.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum VmAssistCmd {
        ENABLE = 0,
        DISABLE = 1,
    }

pub const VMASST_TYPE_RUNSTATE_UPDATE_FLAG: u64 = 5;

    /// `EVTCHNOP_*` sub-operations.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum EvtchnOp {
        BIND_INTERDOMAIN = 0,
        BIND_VIRQ = 1,
        BIND_PIRQ = 2,
        CLOSE = 3,
        SEND = 4,
        STATUS = 5,
        ALLOC_UNBOUND = 6,
        BIND_IPI = 7,
        BIND_VCPU = 8,
        UNMASK = 9,
        RESET = 10,
        INIT_CONTROL = 11,
        EXPAND_ARRAY = 12,
        SET_PRIORITY = 13,
    }

    /// `XENMEM_*` sub-operations.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum MemoryOp {
        INCREASE_RESERVATION = 0,
        DECREASE_RESERVATION = 1,
        MAXIMUM_RAM_PAGE = 2,
        CURRENT_RESERVATION = 3,
        MAXIMUM_RESERVATION = 4,
        MACHPHYS_MFN_LIST = 5,
        POPULATE_PHYSMAP = 6,
        ADD_TO_PHYSMAP = 7,
        MEMORY_MAP = 9,
        MACHINE_MEMORY_MAP = 10,
        EXCHANGE = 11,
        GET_SHARING_FREED_PAGES = 18,
        GET_SHARING_SHARED_PAGES = 19,
    }

    /// `XENMAPSPACE_*` values for `XENMEM_add_to_physmap`.
#[open_enum]
    #[derive(Debug)]
    #[repr(u32)]
    pub enum MapSpace {
        SHARED_INFO = 0,
        GRANT_TABLE = 1,
        GMFN = 2,
        GMFN_RANGE = 3,
        GMFN_FOREIGN = 4,
    }

    /// `XENVER_*` sub-operations.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum XenVer {
        VERSION = 0,
        EXTRAVERSION = 1,
        COMPILE_INFO = 2,
        CAPABILITIES = 3,
        CHANGESET = 4,
        PLATFORM_PARAMETERS = 5,
        GET_FEATURES = 6,
        PAGESIZE = 7,
        GUEST_HANDLE = 8,
        COMMANDLINE = 9,
        BUILD_ID = 10,
    }

// `XENFEAT_*` bit positions reported by `XENVER_get_features`.
pub const XENFEAT_HVM_CALLBACK_VECTOR: u32 = 8;
pub const XENFEAT_HVM_SAFE_PVCLOCK: u32 = 9;
pub const XENFEAT_HVM_PIRQS: u32 = 10;
pub const XENFEAT_NR_SUBMAPS: u32 = 1;

    /// `GNTTABOP_*` sub-operations.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum GnttabOp {
        MAP_GRANT_REF = 0,
        UNMAP_GRANT_REF = 1,
        SETUP_TABLE = 2,
        DUMP_TABLE = 3,
        TRANSFER = 4,
        COPY = 5,
        QUERY_SIZE = 6,
        UNMAP_AND_REPLACE = 7,
        SET_VERSION = 8,
        GET_STATUS_FRAMES = 9,
        GET_VERSION = 10,
    }

/// `GNTST_okay`.
pub const GNTST_OKAY: i16 = 0;

    /// `PHYSDEVOP_*` sub-operations.
#[open_enum]
    #[derive(Debug)]
    #[repr(u64)]
    pub enum PhysdevOp {
        EOI = 12,
        MAP_PIRQ = 13,
        UNMAP_PIRQ = 14,
        MANAGE_PCI_ADD = 15,
        MANAGE_PCI_REMOVE = 16,
        PCI_DEVICE_ADD = 25,
        PCI_DEVICE_REMOVE = 26,
    }

    /// `FLASK_*` XSM commands.
#[open_enum]
    #[derive(Debug)]
    #[repr(u32)]
    pub enum FlaskOp {
        LOAD = 1,
        GETENFORCE = 2,
        SETENFORCE = 3,
        CONTEXT_TO_SID = 4,
        SID_TO_CONTEXT = 5,
        ACCESS = 6,
    }

pub const XEN_FLASK_INTERFACE_VERSION: u32 = 1;
pub const XEN_SYSCTL_INTERFACE_VERSION: u32 = 0x13;
pub const XEN_DOMCTL_INTERFACE_VERSION: u32 = 0x12;

    /// Runstate values published in `vcpu_runstate_info.state`.
#[open_enum]
    #[derive(Debug)]
    #[repr(u32)]
    pub enum Runstate {
        RUNNING = 0,
        RUNNABLE = 1,
        BLOCKED = 2,
        OFFLINE = 3,
    }

/// Number of runstate time accumulators.
pub const RUNSTATE_COUNT: usize = 4;

/// High bit of `state_entry_time`, set while an update is in progress when
/// the guest has enabled `VMASST_TYPE_runstate_update_flag`.
pub const XEN_RUNSTATE_UPDATE: u64 = 1 << 63;

/// `vcpu_time_info.flags` bit advertising an invariant TSC.
pub const PVCLOCK_TSC_STABLE_BIT: u8 = 1 << 0;

// Virtual IRQ numbers.
pub const VIRQ_TIMER: u32 = 0;
pub const VIRQ_DEBUG: u32 = 1;
pub const VIRQ_CONSOLE: u32 = 2;
pub const VIRQ_DOM_EXC: u32 = 3;

/// Number of event-channel ports in the 2-level ABI (64 words of 64 bits).
pub const EVTCHN_2L_NR_CHANNELS: u32 = 4096;

/// Per-vCPU time snapshot, sequence-locked by `version`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VcpuTimeInfo {
    pub version: u32,
    pub pad0: u32,
    pub tsc_timestamp: u64,
    pub system_time: u64,
    pub tsc_to_system_mul: u32,
    pub tsc_shift: i8,
    pub flags: u8,
    pub pad1: [u8; 2],
}

const_assert_eq!(size_of::<VcpuTimeInfo>(), 32);

#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ArchVcpuInfo {
    pub cr2: u64,
    pub pad: u64,
}

/// One slot of the `shared_info.vcpu_info` array.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VcpuInfo {
    pub evtchn_upcall_pending: u8,
    pub evtchn_upcall_mask: u8,
    pub pad0: [u8; 6],
    pub evtchn_pending_sel: u64,
    pub arch: ArchVcpuInfo,
    pub time: VcpuTimeInfo,
}

const_assert_eq!(size_of::<VcpuInfo>(), 64);

#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ArchSharedInfo {
    pub max_pfn: u64,
    pub pfn_to_mfn_frame_list_list: u64,
    pub nmi_reason: u64,
    pub p2m_cr3: u64,
    pub p2m_vaddr: u64,
    pub p2m_generation: u64,
}

/// The guest-visible shared-info page: per-vCPU time snapshots, 2-level
/// event-channel bitmaps, and the sequence-locked wall clock.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SharedInfo {
    pub vcpu_info: [VcpuInfo; XEN_LEGACY_MAX_VCPUS as usize],
    pub evtchn_pending: [u64; 64],
    pub evtchn_mask: [u64; 64],
    pub wc_version: u32,
    pub wc_sec: u32,
    pub wc_nsec: u32,
    pub wc_sec_hi: u32,
    pub arch: ArchSharedInfo,
}

const_assert_eq!(offset_of!(SharedInfo, wc_version), 3072);
const_assert!(size_of::<SharedInfo>() <= XEN_PAGE_SIZE_USIZE);

/// Per-vCPU runstate accounting, registered by the guest.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VcpuRunstateInfo {
    pub state: u32,
    pub pad: u32,
    pub state_entry_time: u64,
    pub time: [u64; RUNSTATE_COUNT],
}

const_assert_eq!(size_of::<VcpuRunstateInfo>(), 48);

/// Argument of `VCPUOP_set_singleshot_timer`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VcpuSetSingleshotTimer {
    pub timeout_abs_ns: u64,
    pub flags: u32,
    pub pad: u32,
}

/// Argument of `VCPUOP_register_vcpu_time_memory_area`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VcpuRegisterTimeMemoryArea {
    pub addr: u64,
}

/// Argument of `VCPUOP_register_runstate_memory_area`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct VcpuRegisterRunstateMemoryArea {
    pub addr: u64,
}

/// Argument of `HVMOP_set_param` and `HVMOP_get_param`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenHvmParam {
    pub domid: u16,
    pub pad: [u8; 2],
    pub index: u32,
    pub value: u64,
}

const_assert_eq!(size_of::<XenHvmParam>(), 16);

/// Header common to `xen_platform_op`, `xen_sysctl`, `xen_domctl`, and
/// `xen_flask_op`: a command and an interface version, payload following.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenOpHeader {
    pub cmd: u32,
    pub interface_version: u32,
}

/// `XENPF_settime64` payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenpfSettime64 {
    pub secs: u64,
    pub nsecs: u32,
    pub mbz: u32,
    pub system_time: u64,
}

const_assert_eq!(size_of::<XenpfSettime64>(), 24);

/// `XENPF_get_cpuinfo` payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenpfPcpuinfo {
    pub xen_cpuid: u32,
    pub max_present: u32,
    pub flags: u32,
    pub apic_id: u32,
    pub acpi_id: u32,
}

/// Argument of `XENMEM_add_to_physmap`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenAddToPhysmap {
    pub domid: u16,
    pub size: u16,
    pub space: u32,
    pub idx: u64,
    pub gpfn: u64,
}

const_assert_eq!(size_of::<XenAddToPhysmap>(), 24);

/// Argument of the `XENMEM` reservation operations.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenMemoryReservation {
    pub extent_start: u64,
    pub nr_extents: u64,
    pub extent_order: u32,
    pub mem_flags: u32,
    pub domid: u16,
    pub pad: [u8; 6],
}

/// Argument of `GNTTABOP_query_size`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GnttabQuerySize {
    pub dom: u16,
    pub pad0: [u8; 2],
    pub nr_frames: u32,
    pub max_nr_frames: u32,
    pub status: i16,
    pub pad1: [u8; 2],
}

const_assert_eq!(size_of::<GnttabQuerySize>(), 16);

/// Argument of `GNTTABOP_set_version`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GnttabSetVersion {
    pub version: u32,
}

/// Argument of `GNTTABOP_get_version`; `version` is written back.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GnttabGetVersion {
    pub dom: u16,
    pub pad: [u8; 2],
    pub version: u32,
}

/// Argument of `XENVER_get_features`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct XenFeatureInfo {
    pub submap_idx: u32,
    pub submap: u32,
}

/// Argument of `EVTCHNOP_alloc_unbound`; `port` is written back.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnAllocUnbound {
    pub dom: u16,
    pub remote_dom: u16,
    pub port: u32,
}

/// Argument of `EVTCHNOP_bind_virq`; `port` is written back.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnBindVirq {
    pub virq: u32,
    pub vcpu: u32,
    pub port: u32,
}

/// Argument of `EVTCHNOP_bind_interdomain`; `local_port` is written back.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnBindInterdomain {
    pub remote_dom: u16,
    pub pad: [u8; 2],
    pub remote_port: u32,
    pub local_port: u32,
}

/// Argument of `EVTCHNOP_send`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnSend {
    pub port: u32,
}

/// Argument of `EVTCHNOP_close`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnClose {
    pub port: u32,
}

/// Argument of `EVTCHNOP_bind_vcpu`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnBindVcpu {
    pub port: u32,
    pub vcpu: u32,
}

/// Argument of `EVTCHNOP_set_priority`.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EvtchnSetPriority {
    pub port: u32,
    pub priority: u32,
}

/// Argument of `PHYSDEVOP_pci_device_add` (fixed-size prefix).
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PhysdevPciDeviceAdd {
    pub seg: u16,
    pub bus: u8,
    pub devfn: u8,
    pub flags: u32,
}

/// Size of the opaque per-domain handle returned by `XENVER_guest_handle`.
pub const XEN_DOMAIN_HANDLE_SIZE: usize = 32;
