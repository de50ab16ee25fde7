// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the external memory allocator.
//!
//! The allocator itself (a free-list heap with a separate stack pool) is
//! not part of this kernel; the platform supplies it. This module pins
//! down exactly what the kernel consumes from it: word-granular heap
//! blocks for the `getmem`/`freemem` system calls, and process stacks.
//! Stacks grow toward lower addresses and `getstk` returns the *high*
//! end; `freestk` takes that same high address back.

use abi::KernelError;

/// The allocator operations the kernel consumes.
///
/// All sizes are in bytes. Implementations may round sizes up; the kernel
/// always frees with the same size it allocated, so symmetric rounding is
/// fine.
pub trait MemPool {
    /// Allocates `nbytes` of heap and returns its lowest address.
    fn getmem(&mut self, nbytes: u32) -> Result<u32, KernelError>;

    /// Returns a heap block obtained from `getmem`.
    fn freemem(&mut self, addr: u32, nbytes: u32) -> Result<(), KernelError>;

    /// Allocates an `nbytes` stack and returns its high end, the initial
    /// top of stack.
    fn getstk(&mut self, nbytes: u32) -> Result<u32, KernelError>;

    /// Returns a stack obtained from `getstk`, identified by its high
    /// end.
    fn freestk(&mut self, stktop: u32, nbytes: u32)
        -> Result<(), KernelError>;
}

// Allocator fake for testing!
//
// Hands out non-overlapping fake addresses and keeps byte accounting so
// tests can assert that create/kill round-trips return the pool to its
// prior state. Nothing is ever dereferenced.
#[cfg(not(target_os = "none"))]
mod fakes {
    use super::MemPool;
    use abi::KernelError;

    pub struct TestPool {
        next_heap: u32,
        next_stack: u32,
        heap_out: u32,
        stack_out: u32,
        fail_next: bool,
    }

    impl Default for TestPool {
        fn default() -> Self {
            Self {
                next_heap: 0x2000_0000,
                next_stack: 0x2010_0000,
                heap_out: 0,
                stack_out: 0,
                fail_next: false,
            }
        }
    }

    impl TestPool {
        pub fn new() -> Self {
            Self::default()
        }

        /// Bytes of heap currently allocated.
        pub fn heap_outstanding(&self) -> u32 {
            self.heap_out
        }

        /// Bytes of stack currently allocated.
        pub fn stack_outstanding(&self) -> u32 {
            self.stack_out
        }

        /// Makes the next allocation fail, for error-path tests.
        pub fn fail_next_alloc(&mut self) {
            self.fail_next = true;
        }

        fn check_fail(&mut self) -> Result<(), KernelError> {
            if core::mem::take(&mut self.fail_next) {
                Err(KernelError::NoMem)
            } else {
                Ok(())
            }
        }
    }

    impl MemPool for TestPool {
        fn getmem(&mut self, nbytes: u32) -> Result<u32, KernelError> {
            self.check_fail()?;
            let addr = self.next_heap;
            self.next_heap += (nbytes + 7) & !7;
            self.heap_out += nbytes;
            Ok(addr)
        }

        fn freemem(
            &mut self,
            _addr: u32,
            nbytes: u32,
        ) -> Result<(), KernelError> {
            if nbytes > self.heap_out {
                return Err(KernelError::BadState);
            }
            self.heap_out -= nbytes;
            Ok(())
        }

        fn getstk(&mut self, nbytes: u32) -> Result<u32, KernelError> {
            self.check_fail()?;
            // Stacks grow down; hand out descending regions and return
            // the high end of each.
            let top = self.next_stack;
            self.next_stack -= (nbytes + 7) & !7;
            self.stack_out += nbytes;
            Ok(top)
        }

        fn freestk(
            &mut self,
            _stktop: u32,
            nbytes: u32,
        ) -> Result<(), KernelError> {
            if nbytes > self.stack_out {
                return Err(KernelError::BadState);
            }
            self.stack_out -= nbytes;
            Ok(())
        }
    }
}

#[cfg(not(target_os = "none"))]
pub use self::fakes::TestPool;
