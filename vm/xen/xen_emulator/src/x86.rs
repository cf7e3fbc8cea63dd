// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! X86-64 register state access.

/// Register state access for x86-64 exits.
pub trait X64RegisterState {
    /// RIP register.
    fn rip(&mut self) -> u64;

    /// Sets the RIP register.
    fn set_rip(&mut self, rip: u64);

    /// Gets a general purpose register.
    fn gp(&mut self, n: Gp) -> u64;

    /// Sets a general purpose register.
    fn set_gp(&mut self, n: Gp, value: u64);

    /// Advances RIP past the instruction that caused the current exit.
    fn advance_ip(&mut self);
}

impl<T: X64RegisterState> X64RegisterState for &'_ mut T {
    fn rip(&mut self) -> u64 {
        (**self).rip()
    }

    fn set_rip(&mut self, rip: u64) {
        (**self).set_rip(rip)
    }

    fn gp(&mut self, n: Gp) -> u64 {
        (**self).gp(n)
    }

    fn set_gp(&mut self, n: Gp, value: u64) {
        (**self).set_gp(n, value)
    }

    fn advance_ip(&mut self) {
        (**self).advance_ip()
    }
}

/// An x64 GP register. This just contains the subset used in the Xen
/// hypercall and CPUID ABI.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Gp {
    /// RAX
    Rax,
    /// RBX
    Rbx,
    /// RCX
    Rcx,
    /// RDX
    Rdx,
    /// RSI
    Rsi,
    /// RDI
    Rdi,
    /// R8
    R8,
    /// R9
    R9,
}
