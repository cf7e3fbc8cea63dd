// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hypercall dispatch.
//!
//! A VM-call selects a handler by the hypercall number in rax; arguments
//! are sub-op integers and guest-virtual pointers in rdi/rsi/rdx. Any
//! fault raised while mapping guest arguments is funneled to the dispatch
//! boundary and reported as "not handled", which lets the host deliver a
//! fault to the guest instead of killing the vCPU.

use crate::pages::GuestMemoryError;
use crate::pages::MappedArea;
use crate::x86::Gp;
use crate::xen::ProcessorXen;
use crate::VcpuRuntime;
use std::mem::size_of;
use xendef::ConsoleIo;
use xendef::HvmOp;
use xendef::HvmParamCallbackIrq;
use xendef::HypercallNum;
use xendef::PlatformOp;
use xendef::VcpuOp;
use xendef::VcpuRegisterRunstateMemoryArea;
use xendef::VcpuRegisterTimeMemoryArea;
use xendef::VcpuSetSingleshotTimer;
use xendef::VcpuTimeInfo;
use xendef::VmAssistCmd;
use xendef::XenErrno;
use xendef::XenHvmParam;
use xendef::XenOpHeader;
use xendef::XenpfPcpuinfo;
use xendef::XenpfSettime64;
use xendef::HVM_PARAM_CALLBACK_IRQ;
use xendef::HVM_PARAM_CALLBACK_TYPE_VECTOR;
use xendef::VMASST_TYPE_RUNSTATE_UPDATE_FLAG;
use xendef::XENPF_INTERFACE_VERSION;
use xendef::XENPF_PAYLOAD_OFFSET;
use xendef::XEN_PAGE_SIZE_USIZE;
use xendef::XEN_PCPU_FLAGS_ONLINE;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

impl ProcessorXen {
    /// Maps a hypercall argument structure passed by guest-virtual pointer.
    pub(crate) fn map_arg<T: FromBytes + IntoBytes + Immutable>(
        &self,
        vp: &mut impl VcpuRuntime,
        gva: u64,
    ) -> Result<MappedArea<T>, GuestMemoryError> {
        let gpa = vp.translate_gva(gva, size_of::<T>())?;
        MappedArea::new(&self.guest_memory, gpa)
    }

    /// Services a VM-call exit. Returns true if the hypercall was fully
    /// handled, with the result in rax and RIP advanced.
    pub fn handle_hypercall(&mut self, vp: &mut impl VcpuRuntime) -> bool {
        let num = HypercallNum(vp.gp(Gp::Rax));
        let arg0 = vp.gp(Gp::Rdi);

        // The console and single-shot-timer paths run hot; keep them out
        // of the log.
        if num != HypercallNum::CONSOLE_IO
            && !(num == HypercallNum::VCPU_OP && VcpuOp(arg0) == VcpuOp::SET_SINGLESHOT_TIMER)
        {
            tracing::debug!(?num, arg0, "hypercall");
        }

        let result = match num {
            HypercallNum::MEMORY_OP => self.memory_op(vp),
            HypercallNum::XEN_VERSION => self.xen_version(vp),
            HypercallNum::HVM_OP => self.hvm_op(vp),
            HypercallNum::EVENT_CHANNEL_OP => self.event_channel_op(vp),
            HypercallNum::GRANT_TABLE_OP => self.grant_table_op(vp),
            HypercallNum::PLATFORM_OP => self.platform_op(vp),
            HypercallNum::CONSOLE_IO => self.console_io(vp),
            HypercallNum::SYSCTL => self.sysctl(vp),
            HypercallNum::DOMCTL => self.domctl(vp),
            HypercallNum::XSM_OP => self.xsm_op(vp),
            HypercallNum::PHYSDEV_OP => self.physdev_op(vp),
            HypercallNum::VCPU_OP => self.vcpu_op(vp),
            HypercallNum::VM_ASSIST => Ok(self.vm_assist(vp)),
            _ => Ok(false),
        };

        let handled = result.unwrap_or_else(|err| {
            tracing::warn!(
                ?num,
                error = &err as &dyn std::error::Error,
                "fault mapping hypercall arguments"
            );
            false
        });

        if handled {
            vp.advance_ip();
        }
        handled
    }

    fn hvm_op(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rsi);
        match HvmOp(vp.gp(Gp::Rdi)) {
            HvmOp::SET_PARAM => {
                let param = self.map_arg::<XenHvmParam>(vp, arg)?.read();
                match param.index {
                    HVM_PARAM_CALLBACK_IRQ => {
                        let via = HvmParamCallbackIrq::from(param.value);
                        if via.via_type() == HVM_PARAM_CALLBACK_TYPE_VECTOR && via.vector() >= 0x20
                        {
                            self.evtchn.set_callback_via(via.vector());
                            vp.set_gp(Gp::Rax, 0);
                        } else {
                            vp.set_gp(Gp::Rax, XenErrno::EINVAL.as_ret());
                        }
                        Ok(true)
                    }
                    index => {
                        tracing::warn!(index, "unsupported HVM set_param");
                        Ok(false)
                    }
                }
            }
            HvmOp::GET_PARAM => {
                assert!(
                    !self.dom.initdom(),
                    "HVM get_param from the privileged domain"
                );
                vp.set_gp(Gp::Rax, XenErrno::ENOSYS.as_ret());
                Ok(true)
            }
            HvmOp::PAGETABLE_DYING => {
                vp.set_gp(Gp::Rax, XenErrno::ENOSYS.as_ret());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn platform_op(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        let arg = vp.gp(Gp::Rdi);
        let header = self.map_arg::<XenOpHeader>(vp, arg)?.read();
        if header.interface_version != XENPF_INTERFACE_VERSION {
            vp.set_gp(Gp::Rax, XenErrno::EACCES.as_ret());
            return Ok(true);
        }

        let payload = arg.wrapping_add(XENPF_PAYLOAD_OFFSET as u64);
        match PlatformOp(header.cmd) {
            PlatformOp::GET_CPUINFO => {
                assert!(
                    self.dom.initdom(),
                    "cpu info requested by a non-privileged domain"
                );
                let area = self.map_arg::<XenpfPcpuinfo>(vp, payload)?;
                let mut info = area.read();
                info.max_present = 1;
                info.flags = XEN_PCPU_FLAGS_ONLINE;
                info.apic_id = self.apicid;
                info.acpi_id = self.acpiid;
                area.write(&info);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            PlatformOp::SETTIME64 => {
                let time = self.map_arg::<XenpfSettime64>(vp, payload)?.read();
                if time.mbz != 0 {
                    vp.set_gp(Gp::Rax, XenErrno::EINVAL.as_ret());
                } else {
                    self.update_wallclock(&time);
                    vp.set_gp(Gp::Rax, 0);
                }
                Ok(true)
            }
            cmd => {
                tracing::warn!(?cmd, "unimplemented platform op");
                Ok(false)
            }
        }
    }

    fn vcpu_op(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        assert_eq!(
            vp.gp(Gp::Rsi),
            self.vcpuid as u64,
            "vcpu op for a foreign vcpu"
        );
        let arg = vp.gp(Gp::Rdx);
        match VcpuOp(vp.gp(Gp::Rdi)) {
            VcpuOp::STOP_PERIODIC_TIMER => {
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            VcpuOp::STOP_SINGLESHOT_TIMER => {
                self.stop_timer(vp);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            VcpuOp::SET_SINGLESHOT_TIMER => {
                let sst = self.map_arg::<VcpuSetSingleshotTimer>(vp, arg)?.read();
                let ret = match self.set_timer(vp, &sst) {
                    Ok(()) => 0,
                    Err(err) => err.as_ret(),
                };
                vp.set_gp(Gp::Rax, ret);
                // The first arming also takes over the HLT, PET-fire,
                // save-TSC, and TSC-deadline exits.
                self.pet_handlers_added = true;
                Ok(true)
            }
            VcpuOp::REGISTER_VCPU_TIME_MEMORY_AREA => {
                let Some(shinfo) = &self.shinfo else {
                    panic!("time area registered before shared info is bound");
                };
                let kvti: VcpuTimeInfo = shinfo.read_obj(self.kernel_vti_offset());
                let tma = self.map_arg::<VcpuRegisterTimeMemoryArea>(vp, arg)?.read();
                let user_vti = self.map_arg::<VcpuTimeInfo>(vp, tma.addr)?;
                user_vti.write(&kvti);
                self.user_vti = Some(user_vti);
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            VcpuOp::REGISTER_RUNSTATE_MEMORY_AREA => {
                let rma = self
                    .map_arg::<VcpuRegisterRunstateMemoryArea>(vp, arg)?
                    .read();
                self.runstate = Some(self.map_arg(vp, rma.addr)?);
                self.reset_runstate_area();
                vp.set_gp(Gp::Rax, 0);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn vm_assist(&mut self, vp: &mut impl VcpuRuntime) -> bool {
        if VmAssistCmd(vp.gp(Gp::Rdi)) != VmAssistCmd::ENABLE {
            return false;
        }
        match vp.gp(Gp::Rsi) {
            VMASST_TYPE_RUNSTATE_UPDATE_FLAG => {
                self.runstate_assist = true;
                vp.set_gp(Gp::Rax, 0);
                true
            }
            _ => false,
        }
    }

    fn console_io(&mut self, vp: &mut impl VcpuRuntime) -> Result<bool, GuestMemoryError> {
        assert!(
            self.dom.initdom(),
            "console io from a non-privileged domain"
        );

        let len = vp.gp(Gp::Rsi) as usize;
        let gva = vp.gp(Gp::Rdx);
        let gpa = vp.translate_gva(gva, len)?;
        let offset = (gpa & (XEN_PAGE_SIZE_USIZE as u64 - 1)) as usize;
        if len > XEN_PAGE_SIZE_USIZE - offset {
            return Err(GuestMemoryError::Straddle { gpa });
        }
        let page = self.guest_memory.lock_gpn(gpa >> 12)?;

        match ConsoleIo(vp.gp(Gp::Rdi)) {
            ConsoleIo::WRITE => {
                let mut buf = vec![0; len];
                page.read(offset, &mut buf);
                let n = self.dom.hvc_tx_put(&buf);
                vp.set_gp(Gp::Rax, n as u64);
                Ok(true)
            }
            ConsoleIo::READ => {
                let mut buf = vec![0; len];
                let n = self.dom.hvc_rx_get(&mut buf);
                page.write(offset, &buf[..n]);
                vp.set_gp(Gp::Rax, n as u64);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
