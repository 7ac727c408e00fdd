//! The debug transport the flash engine drives.
//!
//! The engine does not talk to a probe directly. It assumes three working
//! primitives: write bytes to target memory, read bytes from target memory,
//! and call target code at an address with register arguments, running until
//! it returns or a timeout expires. Everything probe- and
//! architecture-specific (register banks, halt polling, the Thumb-bit fixup
//! of the return address) lives behind the [`Transport`] trait.

use chipflash_target::Architecture;
use std::time::Duration;
use thiserror::Error;

/// A call into a routine of the flash algorithm loaded on the target.
///
/// The transport is expected to place `arguments` into the architecture's
/// argument registers, point the return address register at
/// `return_address`, and, when present, set up the static base and stack
/// pointer registers before resuming the core at `entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Absolute address of the routine to call.
    pub entry: u64,
    /// Up to four register arguments, in calling-convention order.
    pub arguments: Vec<u32>,
    /// Initial value of the static base register, set on the first call of
    /// an operation.
    pub static_base: Option<u64>,
    /// Initial stack pointer, set on the first call of an operation.
    pub stack_pointer: Option<u64>,
    /// Where the routine returns to. Points at a breakpoint trap so that the
    /// core halts on return.
    pub return_address: u64,
}

/// An error originating in the debug transport.
///
/// Transport errors are transient from the engine's point of view: the
/// caller may retry the whole run a bounded number of times. The exception
/// is [`TransportError::Timeout`], which the engine treats as a fatal target
/// failure (a non-responding algorithm indicates a corrupted load or a wrong
/// algorithm selection).
#[derive(Debug, Error)]
pub enum TransportError {
    /// A memory read or write failed.
    #[error("memory access of {count} bytes at {address:#010x} failed")]
    MemoryAccess {
        /// The address of the failed access.
        address: u64,
        /// The number of bytes that should have been transferred.
        count: usize,
    },
    /// The called routine did not return within the allotted time.
    #[error("target routine at {entry:#010x} did not return within {timeout:?}")]
    Timeout {
        /// The entry address of the routine that was called.
        entry: u64,
        /// The timeout that expired.
        timeout: Duration,
    },
    /// Any other probe-side failure.
    #[error("probe error: {0}")]
    Probe(String),
}

/// The primitives the flash engine needs from a debug transport.
///
/// All calls are blocking; no call may block indefinitely. One engine
/// instance owns one transport handle at a time.
pub trait Transport {
    /// The instruction set architecture of the core this transport talks to.
    fn architecture(&self) -> Architecture;

    /// Writes `data` to target memory at `address`.
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), TransportError>;

    /// Reads `data.len()` bytes from target memory at `address`.
    fn read_memory(&mut self, address: u64, data: &mut [u8]) -> Result<(), TransportError>;

    /// Calls target code and blocks until it returns or `timeout` expires.
    ///
    /// Returns the routine's return value.
    fn call_function(
        &mut self,
        call: &FunctionCall,
        timeout: Duration,
    ) -> Result<u32, TransportError>;

    /// Whether [`start_function_call`] / [`wait_for_function_call`] are
    /// implemented.
    ///
    /// Overlapped calls let the engine download the next page buffer while
    /// the target is still programming the previous one (double buffering).
    /// Transports that cannot access memory while the core runs keep the
    /// default.
    ///
    /// [`start_function_call`]: Transport::start_function_call
    /// [`wait_for_function_call`]: Transport::wait_for_function_call
    fn supports_overlapped_calls(&self) -> bool {
        false
    }

    /// Starts a call without waiting for it to return.
    fn start_function_call(&mut self, call: &FunctionCall) -> Result<(), TransportError> {
        let _ = call;
        Err(TransportError::Probe(
            "overlapped calls are not supported by this transport".into(),
        ))
    }

    /// Waits for a call started with [`Transport::start_function_call`] and
    /// returns the routine's return value.
    fn wait_for_function_call(&mut self, timeout: Duration) -> Result<u32, TransportError> {
        let _ = timeout;
        Err(TransportError::Probe(
            "overlapped calls are not supported by this transport".into(),
        ))
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn architecture(&self) -> Architecture {
        (**self).architecture()
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_memory(address, data)
    }

    fn read_memory(&mut self, address: u64, data: &mut [u8]) -> Result<(), TransportError> {
        (**self).read_memory(address, data)
    }

    fn call_function(
        &mut self,
        call: &FunctionCall,
        timeout: Duration,
    ) -> Result<u32, TransportError> {
        (**self).call_function(call, timeout)
    }

    fn supports_overlapped_calls(&self) -> bool {
        (**self).supports_overlapped_calls()
    }

    fn start_function_call(&mut self, call: &FunctionCall) -> Result<(), TransportError> {
        (**self).start_function_call(call)
    }

    fn wait_for_function_call(&mut self, timeout: Duration) -> Result<u32, TransportError> {
        (**self).wait_for_function_call(timeout)
    }
}
