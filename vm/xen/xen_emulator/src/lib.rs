// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Xen hypervisor interface emulator.
//!
//! This crate impersonates the Xen PV-on-HVM ABI to a single guest vCPU
//! running on a different host hypervisor: it answers the guest's CPUID
//! capability probing, installs the hypercall trampoline page, services
//! hypercalls, maintains the guest-visible clocks and runstate accounting,
//! drives the single-shot preemption timer, and relays interrupts between
//! the guest and its parent (root) vCPU.
//!
//! The host VM-exit framework is reached through the [`VcpuRuntime`] and
//! [`x86::X64RegisterState`] traits; the enclosing domain through
//! [`XenDomain`]. The emulator itself never owns a thread: the host calls
//! its entry points from the vCPU's exit loop and each returns a verdict
//! indicating whether the exit was fully handled.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod hypercall;
pub mod pages;
mod runstate;
mod services;
#[cfg(test)]
mod tests;
mod time;
mod timer;
pub mod x86;
pub mod xen;

use pages::GuestMemoryError;
use x86::X64RegisterState;

/// The wall-clock anchor captured when the domain was started.
#[derive(Copy, Clone, Debug)]
pub struct StartOfDay {
    /// TSC value at the anchor point.
    pub tsc: u64,
    /// Wall-clock seconds at the anchor point.
    pub wc_sec: u64,
    /// Wall-clock nanoseconds at the anchor point.
    pub wc_nsec: u64,
}

/// Access to the enclosing domain: identity, the start-of-day clock, and
/// the HVC console rings.
pub trait XenDomain: Send + Sync {
    /// Returns true if this is the initial (privileged) domain.
    fn initdom(&self) -> bool;

    /// The host-side domain identifier.
    fn id(&self) -> u64;

    /// The start-of-day wall clock anchor.
    fn sod_info(&self) -> StartOfDay;

    /// Drains up to `buf.len()` bytes from the console receive ring,
    /// returning the count copied.
    fn hvc_rx_get(&self, buf: &mut [u8]) -> usize;

    /// Appends `buf` to the console transmit ring, returning the count
    /// accepted.
    fn hvc_tx_put(&self, buf: &[u8]) -> usize;
}

/// A guest MSI binding resolved by the parent vCPU from a host vector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MsiRoute {
    /// The guest vCPU owning the device the MSI belongs to.
    pub guest_vcpu: u32,
    /// The vector to deliver to that vCPU.
    pub vector: u8,
}

/// The parent (root) vCPU backing this guest vCPU.
pub trait ParentVcpu {
    /// Makes the parent's state current on this host thread.
    fn load(&mut self);

    /// Queues an external interrupt on the parent.
    fn queue_external_interrupt(&mut self, vector: u8);

    /// Returns to the parent with a resume-after-interrupt exit.
    fn return_resume_after_interrupt(&mut self);

    /// Returns to the parent with a yield-for-`budget_us`-microseconds
    /// exit.
    fn return_yield(&mut self, budget_us: u64);
}

/// Host vCPU services available to the emulator during an exit, beyond raw
/// register access.
pub trait VcpuRuntime: X64RegisterState {
    /// Reads the current TSC.
    fn read_tsc(&mut self) -> u64;

    /// Returns the remaining preemption-timer tick count.
    fn preemption_timer(&mut self) -> u64;

    /// Programs the preemption-timer tick count.
    fn set_preemption_timer(&mut self, ticks: u64);

    /// Enables the preemption-timer exit.
    fn enable_preemption_timer(&mut self);

    /// Disables the preemption-timer exit.
    fn disable_preemption_timer(&mut self);

    /// Queues an external interrupt on this vCPU.
    fn queue_external_interrupt(&mut self, vector: u8);

    /// Pushes an external interrupt onto another guest vCPU's pending
    /// list.
    fn push_external_interrupt(&mut self, guest_vcpu: u32, vector: u8);

    /// Returns true if the guest's RFLAGS.IF is set.
    fn interrupts_enabled(&mut self) -> bool;

    /// Clears STI blocking in the guest interruptibility state.
    fn clear_sti_blocking(&mut self);

    /// Clears the exception bitmap so further guest exceptions are not
    /// intercepted.
    fn clear_exception_bitmap(&mut self);

    /// Saves the guest's extended register state before switching to the
    /// parent.
    fn save_xstate(&mut self);

    /// Translates a guest virtual address, checking that `len` bytes are
    /// accessible.
    fn translate_gva(&mut self, gva: u64, len: usize) -> Result<u64, GuestMemoryError>;

    /// Looks up a guest MSI binding for a host interrupt vector.
    fn find_guest_msi(&mut self, host_vector: u8) -> Option<MsiRoute>;

    /// The parent vCPU backing this one.
    fn parent(&mut self) -> &mut dyn ParentVcpu;
}
