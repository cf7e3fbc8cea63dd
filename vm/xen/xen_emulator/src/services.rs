// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hypercall sub-services.
//!
//! Each sub-service answers the narrow set of sub-operations the guest
//! kernels this interface targets actually issue; everything else is left
//! unhandled so the host delivers a fault to the guest.

use crate::pages::GuestMemoryError;
use crate::pages::LockedPage;
use crate::x86::Gp;
use crate::xen::ProcessorXen;
use crate::VcpuRuntime;
use std::mem::offset_of;
use std::mem::size_of;
use xendef::EvtchnAllocUnbound;
use xendef::EvtchnBindInterdomain;
use xendef::EvtchnBindVcpu;
use xendef::EvtchnBindVirq;
use xendef::EvtchnClose;
use xendef::EvtchnOp;
use xendef::EvtchnSend;
use xendef::FlaskOp;
use xendef::GnttabGetVersion;
use xendef::GnttabOp;
use xendef::GnttabQuerySize;
use xendef::GnttabSetVersion;
use xendef::MapSpace;
use xendef::MemoryOp;
use xendef::PhysdevOp;
use xendef::PhysdevPciDeviceAdd;
use xendef::SharedInfo;
use xendef::VcpuInfo;
use xendef::XenAddToPhysmap;
use xendef::XenErrno;
use xendef::XenFeatureInfo;
use xendef::XenMemoryReservation;
use xendef::XenOpHeader;
use xendef::XenVer;
use xendef::GNTST_OKAY;
use xendef::XENFEAT_HVM_CALLBACK_VECTOR;
use xendef::XENFEAT_HVM_SAFE_PVCLOCK;
use xendef::XENFEAT_NR_SUBMAPS;
use xendef::XEN_DOMCTL_INTERFACE_VERSION;
use xendef::XEN_FLASK_INTERFACE_VERSION;
use xendef::XEN_PAGE_SIZE;
use xendef::XEN_SYSCTL_INTERFACE_VERSION;
use xendef::XEN_VERSION_VALUE;

/// Upper bound on guest-allocated event-channel ports; enough for the
/// console, the store, and the VIRQs this interface delivers.
const MAX_PORTS: usize = 128;

const NR_VIRQS: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PortBinding {
    Closed,
    Unbound,
    Interdomain,
    Virq(u32),
}

/// The per-vCPU event-channel state: the registered upcall vector, the
/// port table, and the VIRQ bindings.
pub(crate) struct Evtchn {
    callback_vector: Option<u8>,
    // Port numbers are 1-based; slot i holds port i + 1.
    ports: Vec<PortBinding>,
    virq_ports: [Option<u32>; NR_VIRQS],
}

impl Evtchn {
    pub(crate) fn new() -> Self {
        Self {
            callback_vector: None,
            ports: Vec::new(),
            virq_ports: [None; NR_VIRQS],
        }
    }

    pub(crate) fn set_callback_via(&mut self, vector: u8) {
        self.callback_vector = Some(vector);
    }

    fn alloc_port(&mut self, binding: PortBinding) -> Result<u32, XenErrno> {
        if let Some(slot) = self.ports.iter().position(|p| *p == PortBinding::Closed) {
            self.ports[slot] = binding;
            return Ok(slot as u32 + 1);
        }
        if self.ports.len() >= MAX_PORTS {
            return Err(XenErrno::EBUSY);
        }
        self.ports.push(binding);
        Ok(self.ports.len() as u32)
    }

    fn alloc_unbound(&mut self, remote_dom: u16) -> Result<u32, XenErrno> {
        let port = self.alloc_port(PortBinding::Unbound)?;
        tracing::debug!(port, remote_dom, "allocated unbound event channel");
        Ok(port)
    }

    fn bind_interdomain(&mut self, remote_dom: u16) -> Result<u32, XenErrno> {
        let port = self.alloc_port(PortBinding::Interdomain)?;
        tracing::debug!(port, remote_dom, "bound interdomain event channel");
        Ok(port)
    }

    fn bind_virq(&mut self, virq: u32) -> Result<u32, XenErrno> {
        if virq as usize >= NR_VIRQS {
            return Err(XenErrno::EINVAL);
        }
        if self.virq_ports[virq as usize].is_some() {
            return Err(XenErrno::EEXIST);
        }
        let port = self.alloc_port(PortBinding::Virq(virq))?;
        self.virq_ports[virq as usize] = Some(port);
        Ok(port)
    }

    fn close(&mut self, port: u32) -> Result<(), XenErrno> {
        let slot = port
            .checked_sub(1)
            .and_then(|i| self.ports.get_mut(i as usize))
            .ok_or(XenErrno::EINVAL)?;
        if let PortBinding::Virq(virq) = *slot {
            self.virq_ports[virq as usize] = None;
        }
        *slot = PortBinding::Closed;
        Ok(())
    }

    fn is_bound(&self, port: u32) -> bool {
        port.checked_sub(1)
            .and_then(|i| self.ports.get(i as usize))
            .is_some_and(|p| *p != PortBinding::Closed)
    }

    pub(crate) fn virq_port(&self, virq: u32) -> Option<u32> {
        *self.virq_ports.get(virq as usize)?
    }

    /// Marks `port` pending in the 2-level bitmaps and, unless the guest
    /// has masked delivery, raises the registered upcall vector.
    pub(crate) fn set_pending(
        &self,
        shinfo: &LockedPage,
        vcpu_info_offset: usize,
        vp: &mut impl VcpuRuntime,
        port: u32,
    ) {
        let word = (port / 64) as usize;
        let bit = port % 64;

        let pending_off = offset_of!(SharedInfo, evtchn_pending) + word * 8;
        let pending: u64 = shinfo.read_obj(pending_off);
        shinfo.write_obj(pending_off, &(pending | 1 << bit));

        let mask_off = offset_of!(SharedInfo, evtchn_mask) + word * 8;
        let mask: u64 = shinfo.read_obj(mask_off);
        if mask & (1 << bit) != 0 {
            return;
        }

        let sel_off = vcpu_info_offset + offset_of!(VcpuInfo, evtchn_pending_sel);
        let sel: u64 = shinfo.read_obj(sel_off);
        shinfo.write_obj(sel_off, &(sel | 1 << word));
        shinfo.write_obj(
            vcpu_info_offset + offset_of!(VcpuInfo, evtchn_upcall_pending),
            &1u8,
        );

        let upcall_mask: u8 =
            shinfo.read_obj(vcpu_info_offset + offset_of!(VcpuInfo, evtchn_upcall_mask));
        if upcall_mask == 0 {
            if let Some(vector) = self.callback_vector {
                vp.queue_external_interrupt(vector);
            }
        }
    }
}

/// Grant-table state; this interface pins the v1 ABI.
pub(crate) struct GrantTable {
    version: u32,
    nr_frames: u32,
    max_nr_frames: u32,
}

impl GrantTable {
    pub(crate) fn new() -> Self {
        Self {
            version: 1,
            nr_frames: 1,
            max_nr_frames: 64,
        }
    }
}

impl ProcessorXen {
    /// Delivers `virq` to this vCPU's bound port, if any.
    pub(crate) fn queue_virq(&mut self, vp: &mut impl VcpuRuntime, virq: u32) {
        let Some(port) = self.evtchn.virq_port(virq) else {
            return;
        };
        let Some(shinfo) = &self.shinfo else {
            return;
        };
        let vcpu_info_offset =
            offset_of!(SharedInfo, vcpu_info) + self.vcpuid as usize * size_of::<VcpuInfo>();
        self.evtchn.set_pending(shinfo, vcpu_info_offset, vp, port);
    }

    pub(crate) fn event_channel_op(
        &mut self,
        vp: &mut impl VcpuRuntime,
    ) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rsi);
        match EvtchnOp(vp.gp(Gp::Rdi)) {
            EvtchnOp::ALLOC_UNBOUND => {
                let area = self.map_arg::<EvtchnAllocUnbound>(vp, arg)?;
                let mut req = area.read();
                let ret = match self.evtchn.alloc_unbound(req.remote_dom) {
                    Ok(port) => {
                        req.port = port;
                        area.write(&req);
                        0
                    }
                    Err(err) => err.as_ret(),
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            EvtchnOp::BIND_INTERDOMAIN => {
                let area = self.map_arg::<EvtchnBindInterdomain>(vp, arg)?;
                let mut req = area.read();
                let ret = match self.evtchn.bind_interdomain(req.remote_dom) {
                    Ok(port) => {
                        req.local_port = port;
                        area.write(&req);
                        0
                    }
                    Err(err) => err.as_ret(),
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            EvtchnOp::BIND_VIRQ => {
                let area = self.map_arg::<EvtchnBindVirq>(vp, arg)?;
                let mut req = area.read();
                let ret = if req.vcpu != self.vcpuid {
                    XenErrno::EINVAL.as_ret()
                } else {
                    match self.evtchn.bind_virq(req.virq) {
                        Ok(port) => {
                            req.port = port;
                            area.write(&req);
                            0
                        }
                        Err(err) => err.as_ret(),
                    }
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            EvtchnOp::SEND => {
                let req = self.map_arg::<EvtchnSend>(vp, arg)?.read();
                let ret = if self.evtchn.is_bound(req.port) {
                    if let Some(shinfo) = &self.shinfo {
                        let vcpu_info_offset = offset_of!(SharedInfo, vcpu_info)
                            + self.vcpuid as usize * size_of::<VcpuInfo>();
                        self.evtchn.set_pending(shinfo, vcpu_info_offset, vp, req.port);
                    }
                    0
                } else {
                    XenErrno::EINVAL.as_ret()
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            EvtchnOp::CLOSE => {
                let req = self.map_arg::<EvtchnClose>(vp, arg)?.read();
                let ret = match self.evtchn.close(req.port) {
                    Ok(()) => 0,
                    Err(err) => err.as_ret(),
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            EvtchnOp::BIND_VCPU => {
                let req = self.map_arg::<EvtchnBindVcpu>(vp, arg)?.read();
                let ret = if req.vcpu == self.vcpuid && self.evtchn.is_bound(req.port) {
                    0
                } else {
                    XenErrno::EINVAL.as_ret()
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            // The FIFO ABI is not offered; failing these keeps the guest on
            // the 2-level bitmaps.
            EvtchnOp::INIT_CONTROL | EvtchnOp::EXPAND_ARRAY | EvtchnOp::SET_PRIORITY => {
                vp.set_gp(Gp::Rax, XenErrno::ENOSYS.as_ret());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn grant_table_op(
        &mut self,
        vp: &mut impl VcpuRuntime,
    ) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rsi);
        match GnttabOp(vp.gp(Gp::Rdi)) {
            GnttabOp::QUERY_SIZE => {
                let area = self.map_arg::<GnttabQuerySize>(vp, arg)?;
                let mut req = area.read();
                req.nr_frames = self.gnttab.nr_frames;
                req.max_nr_frames = self.gnttab.max_nr_frames;
                req.status = GNTST_OKAY;
                area.write(&req);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            GnttabOp::SET_VERSION => {
                let area = self.map_arg::<GnttabSetVersion>(vp, arg)?;
                let req = area.read();
                let ret = if req.version == 1 {
                    self.gnttab.version = req.version;
                    0
                } else {
                    XenErrno::ENOSYS.as_ret()
                };
                vp.set_gp(Gp::Rax, ret);
                Ok(true)
            }
            GnttabOp::GET_VERSION => {
                let area = self.map_arg::<GnttabGetVersion>(vp, arg)?;
                let mut req = area.read();
                req.version = self.gnttab.version;
                area.write(&req);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn memory_op(
        &mut self,
        vp: &mut impl VcpuRuntime,
    ) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rsi);
        match MemoryOp(vp.gp(Gp::Rdi)) {
            MemoryOp::ADD_TO_PHYSMAP => {
                let req = self.map_arg::<XenAddToPhysmap>(vp, arg)?.read();
                match MapSpace(req.space) {
                    MapSpace::SHARED_INFO => {
                        self.init_shared_info(vp, req.gpfn)?;
                        vp.set_gp(Gp::Rax, 0);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            MemoryOp::DECREASE_RESERVATION => {
                let req = self.map_arg::<XenMemoryReservation>(vp, arg)?.read();
                // The balloon pages are not backed by anything the guest
                // can reclaim here; report them all released.
                vp.set_gp(Gp::Rax, req.nr_extents);
                Ok(true)
            }
            MemoryOp::GET_SHARING_FREED_PAGES | MemoryOp::GET_SHARING_SHARED_PAGES => {
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn xen_version(
        &mut self,
        vp: &mut impl VcpuRuntime,
    ) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rsi);
        match XenVer(vp.gp(Gp::Rdi)) {
            XenVer::VERSION => {
                vp.set_gp(Gp::Rax, XEN_VERSION_VALUE as u64);
                Ok(true)
            }
            XenVer::EXTRAVERSION => {
                self.map_arg::<[u8; 16]>(vp, arg)?.write(&[0; 16]);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::COMPILE_INFO => {
                // xen_compile_info_t: compiler, compile_by, compile_domain,
                // compile_date.
                self.map_arg::<[u8; 144]>(vp, arg)?.write(&[0; 144]);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::CAPABILITIES => {
                let area = self.map_arg::<[u8; 1024]>(vp, arg)?;
                let mut caps = [0u8; 1024];
                caps[..15].copy_from_slice(b"hvm-3.0-x86_64\0");
                area.write(&caps);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::CHANGESET => {
                self.map_arg::<[u8; 64]>(vp, arg)?.write(&[0; 64]);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::PLATFORM_PARAMETERS => {
                // xen_platform_parameters_t.virt_start.
                self.map_arg::<u64>(vp, arg)?.write(&0xffff_8000_0000_0000);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::GET_FEATURES => {
                let area = self.map_arg::<XenFeatureInfo>(vp, arg)?;
                let mut req = area.read();
                if req.submap_idx >= XENFEAT_NR_SUBMAPS {
                    vp.set_gp(Gp::Rax, XenErrno::EINVAL.as_ret());
                    return Ok(true);
                }
                req.submap =
                    1 << XENFEAT_HVM_CALLBACK_VECTOR | 1 << XENFEAT_HVM_SAFE_PVCLOCK;
                area.write(&req);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::PAGESIZE => {
                vp.set_gp(Gp::Rax, XEN_PAGE_SIZE);
                Ok(true)
            }
            XenVer::GUEST_HANDLE => {
                self.map_arg::<[u8; xendef::XEN_DOMAIN_HANDLE_SIZE]>(vp, arg)?
                    .write(&self.domain_handle);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::COMMANDLINE => {
                self.map_arg::<[u8; 1024]>(vp, arg)?.write(&[0; 1024]);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            XenVer::BUILD_ID => {
                // No build id to report; zero length.
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn physdev_op(
        &mut self,
        vp: &mut impl VcpuRuntime,
    ) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rsi);
        match PhysdevOp(vp.gp(Gp::Rdi)) {
            PhysdevOp::PCI_DEVICE_ADD => {
                let req = self.map_arg::<PhysdevPciDeviceAdd>(vp, arg)?.read();
                tracing::debug!(
                    seg = req.seg,
                    bus = req.bus,
                    devfn = req.devfn,
                    "pci device add"
                );
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn sysctl(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rdi);
        let header = self.map_arg::<XenOpHeader>(vp, arg)?.read();
        if header.interface_version != XEN_SYSCTL_INTERFACE_VERSION {
            vp.set_gp(Gp::Rax, XenErrno::EACCES.as_ret());
            return Ok(true);
        }
        tracing::warn!(cmd = header.cmd, "unimplemented sysctl");
        Ok(false)
    }

    pub(crate) fn domctl(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rdi);
        let header = self.map_arg::<XenOpHeader>(vp, arg)?.read();
        if header.interface_version != XEN_DOMCTL_INTERFACE_VERSION {
            vp.set_gp(Gp::Rax, XenErrno::EACCES.as_ret());
            return Ok(true);
        }
        tracing::warn!(cmd = header.cmd, "unimplemented domctl");
        Ok(false)
    }

    pub(crate) fn xsm_op(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        assert!(self.dom.initdom(), "xsm op from a non-privileged domain");
        let arg = vp.gp(Gp::Rdi);
        let header = self.map_arg::<XenOpHeader>(vp, arg)?.read();
        if header.interface_version != XEN_FLASK_INTERFACE_VERSION {
            vp.set_gp(Gp::Rax, XenErrno::EACCES.as_ret());
            return Ok(true);
        }
        match FlaskOp(header.cmd) {
            FlaskOp::SID_TO_CONTEXT => {}
            cmd => tracing::warn!(?cmd, "unhandled flask op"),
        }
        vp.set_gp(Gp::Rax, XenErrno::EACCES.as_ret());
        Ok(true)
    }
}
