use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chipflash_target::{MemoryRegion, RawFlashAlgorithm};

use super::error::into_reg;
use super::{
    FlashAlgorithm, FlashBuilder, FlashEncoder, FlashError, FlashLayout, FlashPage, FlashProgress,
    FlashSector,
};
use crate::target::Target;
use crate::transport::{FunctionCall, Transport};

/// The timeout for init and uninit routine calls when the caller does not
/// override it. Unlike erase and program timeouts it is not part of the
/// descriptor.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(2);

/// The timeout for the erase-all routine. Full-chip erases are slow, and the
/// descriptor carries no timeout for them.
const CHIP_ERASE_TIMEOUT: Duration = Duration::from_secs(30);

const STACK_CANARY: u32 = 0xCCCC_CCCC;

/// The function code passed to the algorithm's init and uninit routines,
/// telling it which kind of operation follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Erase sectors or the whole chip.
    Erase,
    /// Program pages.
    Program,
    /// Verify or read back flash contents.
    Verify,
}

impl Operation {
    pub(super) fn code(self) -> u32 {
        match self {
            Operation::Erase => 1,
            Operation::Program => 2,
            Operation::Verify => 3,
        }
    }

    pub(super) fn name(self) -> &'static str {
        match self {
            Operation::Erase => "erase",
            Operation::Program => "program",
            Operation::Verify => "verify",
        }
    }
}

/// A shareable flag to abort a programming run between planned operations.
///
/// The engine never interrupts a call into target code; a cancelled run
/// finishes the call in flight, attempts the uninit cleanup and surfaces
/// [`FlashError::Cancelled`].
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the run holding a clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for a programming run.
pub struct ProgramOptions<'a> {
    /// Verify the programmed contents using the algorithm's verify routine.
    /// Rejected before any target contact when the algorithm has none.
    pub verify: bool,
    /// Erase the whole chip with the erase-all routine instead of erasing
    /// the planned sectors. Rejected when the algorithm has no erase-all
    /// routine.
    pub erase_all: bool,
    /// Program with this algorithm instead of the region's default one.
    pub algorithm: Option<String>,
    /// Read unwritten bytes of erased sectors back before erasing, and
    /// program them again afterwards. Requires the algorithm's read
    /// routine; without one the bytes are left at the erased value.
    pub restore_unwritten_bytes: bool,
    /// Use two page buffers when the RAM layout and the transport allow
    /// overlapping the data transfer with the programming.
    pub enable_double_buffering: bool,
    /// The clock frequency handed to the init routine. `0` when absent.
    pub clock_frequency: Option<u32>,
    /// The timeout for init and uninit calls.
    pub init_timeout: Duration,
    /// Progress reporting for this run.
    pub progress: Option<&'a FlashProgress>,
    /// Cooperative cancellation for this run.
    pub cancel: Option<&'a CancelToken>,
}

impl Default for ProgramOptions<'_> {
    fn default() -> Self {
        Self {
            verify: false,
            erase_all: false,
            algorithm: None,
            restore_unwritten_bytes: false,
            enable_double_buffering: true,
            clock_frequency: None,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            progress: None,
            cancel: None,
        }
    }
}

/// A single operation the engine performed against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedOperation {
    /// The init routine ran for the given function code.
    Init {
        /// The operation the init call announced.
        operation: Operation,
    },
    /// The whole chip was erased.
    EraseAll,
    /// A sector was erased.
    EraseSector {
        /// Base address of the sector.
        address: u64,
        /// Size of the sector in bytes.
        size: u64,
    },
    /// A page was programmed.
    ProgramPage {
        /// Base address of the page.
        address: u64,
        /// Number of bytes transferred for the page.
        size: u32,
    },
    /// A page was verified.
    VerifyPage {
        /// Base address of the page.
        address: u64,
        /// Size of the page in bytes.
        size: u32,
    },
    /// Data was written directly into target RAM.
    RamWrite {
        /// The address of the write.
        address: u64,
        /// The number of bytes written.
        size: u64,
    },
    /// The uninit cleanup ran.
    Uninit {
        /// Whether the uninit routine reported success.
        success: bool,
    },
}

/// What a programming run did: the operations in execution order, the bytes
/// that went over the transport into flash, and the wall-clock time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlashReport {
    /// Operations performed, in order.
    pub operations: Vec<CompletedOperation>,
    /// The number of bytes transferred into the flash.
    pub bytes_written: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl FlashReport {
    pub(super) fn merge(&mut self, other: FlashReport) {
        self.operations.extend(other.operations);
        self.bytes_written += other.bytes_written;
    }
}

/// A structure to control the flash of an attached microchip.
///
/// One flasher drives one algorithm on one core. It owns its transport
/// handle for the duration of its life; concurrent flashers require their
/// own handles and are serialized by the target's
/// [`FlashInterlock`](super::FlashInterlock) where they could touch the
/// same physical cells.
pub struct Flasher<T: Transport> {
    transport: T,
    algorithm: FlashAlgorithm,
    needs_register_setup: bool,
}

impl<T: Transport> Flasher<T> {
    /// Prepares a flasher for the given algorithm on the given core.
    ///
    /// This assembles the algorithm against a RAM region accessible by the
    /// core, but does not touch the target yet.
    pub fn new(
        target: &Target,
        core_name: &str,
        raw: &RawFlashAlgorithm,
        transport: T,
    ) -> Result<Self, FlashError> {
        if transport.architecture() != target.architecture() {
            return Err(FlashError::UnsupportedCore {
                name: raw.name.clone(),
                core: core_name.to_string(),
                architecture: transport.architecture(),
            });
        }

        if !raw.cores.is_empty() && !raw.cores.iter().any(|core| core == core_name) {
            return Err(FlashError::UnsupportedCore {
                name: raw.name.clone(),
                core: core_name.to_string(),
                architecture: transport.architecture(),
            });
        }

        // Find a RAM region to run the algo from. It must be accessible
        // from the core we run the algo on.
        let ram = target
            .memory_map
            .iter()
            .filter_map(MemoryRegion::as_ram_region)
            .find(|ram| ram.accessible_by(core_name))
            .ok_or_else(|| FlashError::NoRamDefined {
                chip: target.name.clone(),
                core: core_name.to_string(),
            })?;

        tracing::debug!("chosen RAM to run the algo: {:x?}", ram);

        // The data buffers may live in a different region.
        let data_ram = match raw.data_load_address {
            Some(address) => target
                .memory_map
                .iter()
                .filter_map(MemoryRegion::as_ram_region)
                .find(|ram| ram.accessible_by(core_name) && ram.range.contains(&address))
                .ok_or_else(|| FlashError::NoRamDefined {
                    chip: target.name.clone(),
                    core: core_name.to_string(),
                })?,
            None => ram,
        };

        let algorithm = FlashAlgorithm::assemble(raw, ram, data_ram, target.architecture())?;

        Ok(Self {
            transport,
            algorithm,
            needs_register_setup: true,
        })
    }

    /// The algorithm as assembled for this target.
    pub fn flash_algorithm(&self) -> &FlashAlgorithm {
        &self.algorithm
    }

    /// Whether the RAM layout holds two page buffers.
    pub fn double_buffering_supported(&self) -> bool {
        self.algorithm.page_buffers.len() > 1
    }

    /// Programs the staged data of `builder` into the flash.
    ///
    /// Runs the full sequence: plan, load, (fill,) erase, program and
    /// optionally verify, with an uninit cleanup after every phase. See
    /// [`ProgramOptions`] for the knobs.
    pub fn program(
        &mut self,
        builder: &FlashBuilder,
        options: &ProgramOptions<'_>,
    ) -> Result<FlashReport, FlashError> {
        let started = Instant::now();
        let empty_progress = FlashProgress::empty();
        let progress = options.progress.unwrap_or(&empty_progress);

        // Capability preflight. Failing these must not touch the target.
        if options.verify && self.algorithm.pc_verify.is_none() {
            return Err(FlashError::VerifyNotSupported);
        }
        if options.erase_all && self.algorithm.pc_erase_all.is_none() {
            return Err(FlashError::ChipEraseNotSupported);
        }

        let mut layout = builder.build_layout(&self.algorithm.flash_properties)?;
        progress.initialized(
            options.erase_all,
            layout.sectors().len(),
            layout.pages().len(),
        );

        let mut report = FlashReport::default();

        self.load()?;

        if options.restore_unwritten_bytes {
            self.fill_pages(&mut layout, options, progress, &mut report)?;
        }

        self.erase(&layout, options, progress, &mut report)?;
        self.program_pages(&layout, options, progress, &mut report)?;

        if options.verify {
            self.verify(&layout, options, progress, &mut report)?;
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            "programmed {} bytes in {:?}",
            report.bytes_written,
            report.elapsed
        );
        Ok(report)
    }

    /// Copies the algorithm into target RAM and verifies the copy.
    fn load(&mut self) -> Result<(), FlashError> {
        let algorithm = &self.algorithm;
        let span = tracing::debug_span!(
            "loading flash algorithm",
            address = algorithm.load_address,
            words = algorithm.instructions.len()
        )
        .entered();

        let bytes: Vec<u8> = algorithm
            .instructions
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();

        self.transport
            .write_memory(algorithm.load_address, &bytes)
            .map_err(FlashError::Transport)?;

        let mut readback = vec![0u8; bytes.len()];
        self.transport
            .read_memory(algorithm.load_address, &mut readback)
            .map_err(FlashError::Transport)?;

        if readback != bytes {
            tracing::error!("the flash algorithm did not read back intact");
            return Err(FlashError::AlgorithmNotLoaded);
        }

        drop(span);
        tracing::debug!("RAM contents match the algorithm blob");

        // The first routine call after a load sets up stack and static base.
        self.needs_register_setup = true;

        Ok(())
    }

    /// Reads the old contents of all fill spans back into the layout, so
    /// that erase collateral is restored instead of left blank.
    fn fill_pages(
        &mut self,
        layout: &mut FlashLayout,
        options: &ProgramOptions<'_>,
        progress: &FlashProgress,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        if layout.fills().is_empty() {
            return Ok(());
        }

        let Some(pc_read) = self.algorithm.pc_read else {
            tracing::warn!(
                "the algorithm has no read routine; erased bytes outside the image are lost"
            );
            return Ok(());
        };

        progress.started_filling();

        let fills = layout.fills().to_vec();
        let result = self.run_operation(Operation::Verify, options, report, |flasher, _| {
            for fill in &fills {
                flasher.check_cancelled(options)?;

                let started = Instant::now();
                let data = flasher.read_flash(pc_read, fill.address(), fill.size() as usize)?;

                let page = &mut layout.pages_mut()[fill.page_index()];
                let offset = (fill.address() - page.address()) as usize;
                page.data_mut()[offset..offset + fill.size() as usize].copy_from_slice(&data);

                progress.page_filled(fill.size(), started.elapsed());
            }
            Ok(())
        });

        if result.is_ok() {
            progress.finished_filling();
        } else {
            progress.failed_filling();
        }
        result
    }

    /// Erases either the planned sectors or, on request, the whole chip.
    fn erase(
        &mut self,
        layout: &FlashLayout,
        options: &ProgramOptions<'_>,
        progress: &FlashProgress,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        if !options.erase_all && layout.sectors().is_empty() {
            return Ok(());
        }

        progress.started_erasing();

        let result = self.run_operation(Operation::Erase, options, report, |flasher, report| {
            if options.erase_all {
                flasher.erase_all()?;
                report.operations.push(CompletedOperation::EraseAll);
                return Ok(());
            }

            for sector in layout.sectors() {
                flasher.check_cancelled(options)?;

                let started = Instant::now();
                flasher.erase_sector(sector)?;
                report.operations.push(CompletedOperation::EraseSector {
                    address: sector.address(),
                    size: sector.size(),
                });
                progress.sector_erased(sector.size(), started.elapsed());
            }
            Ok(())
        });

        if result.is_ok() {
            progress.finished_erasing();
        } else {
            progress.failed_erasing();
        }
        result
    }

    /// Programs all (encoded) pages of the layout.
    fn program_pages(
        &mut self,
        layout: &FlashLayout,
        options: &ProgramOptions<'_>,
        progress: &FlashProgress,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        if layout.pages().is_empty() {
            return Ok(());
        }

        let encoder = FlashEncoder::new(self.algorithm.transfer_encoding, layout);
        tracing::debug!(
            "transferring {} bytes in {} pages",
            encoder.program_size(),
            encoder.pages().len()
        );

        let double_buffered = options.enable_double_buffering
            && self.double_buffering_supported()
            && self.transport.supports_overlapped_calls();

        progress.started_programming();

        let result = self.run_operation(Operation::Program, options, report, |flasher, report| {
            if double_buffered {
                flasher.program_double_buffered(&encoder, progress, report)
            } else {
                flasher.program_simple(&encoder, options, progress, report)
            }
        });

        if result.is_ok() {
            progress.finished_programming();
        } else {
            progress.failed_programming();
        }
        result
    }

    fn program_simple(
        &mut self,
        encoder: &FlashEncoder,
        options: &ProgramOptions<'_>,
        progress: &FlashProgress,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        for page in encoder.pages() {
            self.check_cancelled(options)?;

            let started = Instant::now();
            self.program_page(page)?;
            report.operations.push(CompletedOperation::ProgramPage {
                address: page.address(),
                size: page.data().len() as u32,
            });
            report.bytes_written += page.data().len() as u64;
            progress.page_programmed(page.data().len() as u32, started.elapsed());
        }
        Ok(())
    }

    /// Program using two buffers: while the target programs one page, the
    /// next page's data is already downloaded into the other buffer.
    fn program_double_buffered(
        &mut self,
        encoder: &FlashEncoder,
        progress: &FlashProgress,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        let timeout =
            Duration::from_millis(self.algorithm.flash_properties.program_page_timeout as u64);
        let mut current_buffer = 0;
        let mut in_flight: Option<&FlashPage> = None;
        let mut started = Instant::now();

        for page in encoder.pages() {
            let buffer = self.algorithm.page_buffers[current_buffer];
            self.transport
                .write_memory(buffer, page.data())
                .map_err(FlashError::Transport)?;

            if let Some(previous) = in_flight.take() {
                self.finish_page_program(previous, timeout, progress, report, &mut started)?;
            }

            let call = self.function_call(
                self.algorithm.pc_program_page,
                vec![
                    into_reg(page.address())?,
                    page.data().len() as u32,
                    into_reg(buffer)?,
                ],
            );
            self.write_stack_canary()?;
            self.transport
                .start_function_call(&call)
                .map_err(|error| FlashError::from_call("program_page", error))?;

            in_flight = Some(page);
            current_buffer ^= 1;
        }

        if let Some(previous) = in_flight {
            self.finish_page_program(previous, timeout, progress, report, &mut started)?;
        }

        Ok(())
    }

    fn finish_page_program(
        &mut self,
        page: &FlashPage,
        timeout: Duration,
        progress: &FlashProgress,
        report: &mut FlashReport,
        started: &mut Instant,
    ) -> Result<(), FlashError> {
        let code = self
            .transport
            .wait_for_function_call(timeout)
            .map_err(|error| FlashError::from_call("program_page", error))?;
        self.check_stack_canary("program_page")?;

        if code != 0 {
            return Err(FlashError::ProgramFailed {
                page_address: page.address(),
                code,
            });
        }

        report.operations.push(CompletedOperation::ProgramPage {
            address: page.address(),
            size: page.data().len() as u32,
        });
        report.bytes_written += page.data().len() as u64;
        progress.page_programmed(page.data().len() as u32, started.elapsed());
        *started = Instant::now();
        Ok(())
    }

    /// Verifies the layout's pages against the flash contents.
    fn verify(
        &mut self,
        layout: &FlashLayout,
        options: &ProgramOptions<'_>,
        progress: &FlashProgress,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        let pc_verify = self.algorithm.pc_verify.ok_or(FlashError::VerifyNotSupported)?;

        progress.started_verifying();

        let result = self.run_operation(Operation::Verify, options, report, |flasher, report| {
            for page in layout.pages() {
                flasher.check_cancelled(options)?;

                flasher.verify_page(pc_verify, page)?;
                report.operations.push(CompletedOperation::VerifyPage {
                    address: page.address(),
                    size: page.size(),
                });
            }
            Ok(())
        });

        if result.is_ok() {
            progress.finished_verifying();
        } else {
            progress.failed_verifying();
        }
        result
    }

    /// Runs `f` bracketed by the init and uninit routines for `operation`.
    ///
    /// Uninit is always attempted, also when init or `f` failed. An uninit
    /// failure is reported, but never replaces an earlier failure as the
    /// run's cause.
    fn run_operation<R>(
        &mut self,
        operation: Operation,
        options: &ProgramOptions<'_>,
        report: &mut FlashReport,
        f: impl FnOnce(&mut Self, &mut FlashReport) -> Result<R, FlashError>,
    ) -> Result<R, FlashError> {
        self.needs_register_setup = true;

        let result = match self.init(operation, options, report) {
            Ok(()) => f(self, report),
            Err(error) => Err(error),
        };

        let uninit_result = self.uninit(operation, options);
        report.operations.push(CompletedOperation::Uninit {
            success: uninit_result.is_ok(),
        });

        match (result, uninit_result) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(uninit_error)) => {
                tracing::warn!(
                    "uninit failed after an earlier error, keeping the original cause: {uninit_error}"
                );
                Err(error)
            }
        }
    }

    fn init(
        &mut self,
        operation: Operation,
        options: &ProgramOptions<'_>,
        report: &mut FlashReport,
    ) -> Result<(), FlashError> {
        tracing::debug!("initializing the flash algorithm for {}", operation.name());

        if let Some(pc_init) = self.algorithm.pc_init {
            let address = into_reg(self.algorithm.flash_properties.address_range.start)?;
            let clock = options.clock_frequency.unwrap_or(0);

            let result = self.call_routine(
                "init",
                pc_init,
                vec![address, clock, operation.code()],
                options.init_timeout,
            )?;

            if result != 0 {
                return Err(FlashError::Init { code: result });
            }

            report
                .operations
                .push(CompletedOperation::Init { operation });
        }

        Ok(())
    }

    fn uninit(
        &mut self,
        operation: Operation,
        options: &ProgramOptions<'_>,
    ) -> Result<(), FlashError> {
        tracing::debug!("running the uninit routine for {}", operation.name());

        if let Some(pc_uninit) = self.algorithm.pc_uninit {
            let result = self.call_routine(
                "uninit",
                pc_uninit,
                vec![operation.code()],
                options.init_timeout,
            )?;

            if result != 0 {
                return Err(FlashError::Uninit { code: result });
            }
        }

        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), FlashError> {
        tracing::debug!("erasing the entire chip");
        let pc_erase_all = self
            .algorithm
            .pc_erase_all
            .ok_or(FlashError::ChipEraseNotSupported)?;

        let result = self.call_routine("erase_all", pc_erase_all, vec![], CHIP_ERASE_TIMEOUT)?;

        if result != 0 {
            return Err(FlashError::ChipEraseFailed { code: result });
        }
        Ok(())
    }

    fn erase_sector(&mut self, sector: &FlashSector) -> Result<(), FlashError> {
        tracing::debug!("erasing sector at {:#010x}", sector.address());
        let timeout =
            Duration::from_millis(self.algorithm.flash_properties.erase_sector_timeout as u64);

        let result = self.call_routine(
            "erase_sector",
            self.algorithm.pc_erase_sector,
            vec![into_reg(sector.address())?],
            timeout,
        )?;

        if result != 0 {
            return Err(FlashError::EraseFailed {
                sector_address: sector.address(),
                code: result,
            });
        }
        Ok(())
    }

    fn program_page(&mut self, page: &FlashPage) -> Result<(), FlashError> {
        tracing::debug!(
            "programming page at {:#010x} with {} bytes",
            page.address(),
            page.data().len()
        );

        let buffer = self.algorithm.begin_data();
        self.transport
            .write_memory(buffer, page.data())
            .map_err(FlashError::Transport)?;

        let timeout =
            Duration::from_millis(self.algorithm.flash_properties.program_page_timeout as u64);
        let result = self.call_routine(
            "program_page",
            self.algorithm.pc_program_page,
            vec![
                into_reg(page.address())?,
                page.data().len() as u32,
                into_reg(buffer)?,
            ],
            timeout,
        )?;

        if result != 0 {
            return Err(FlashError::ProgramFailed {
                page_address: page.address(),
                code: result,
            });
        }
        Ok(())
    }

    fn verify_page(&mut self, pc_verify: u64, page: &FlashPage) -> Result<(), FlashError> {
        tracing::debug!("verifying page at {:#010x}", page.address());

        let buffer = self.algorithm.begin_data();
        self.transport
            .write_memory(buffer, page.data())
            .map_err(FlashError::Transport)?;

        let timeout =
            Duration::from_millis(self.algorithm.flash_properties.program_page_timeout as u64);
        let result = self.call_routine(
            "verify",
            pc_verify,
            vec![
                into_reg(page.address())?,
                page.data().len() as u32,
                into_reg(buffer)?,
            ],
            timeout,
        )?;

        // The verify routine returns the end of the range on a match, and
        // the first mismatching address otherwise.
        let expected = into_reg(page.address() + page.data().len() as u64)?;
        if result != expected {
            return Err(FlashError::VerifyFailed {
                address: result as u64,
            });
        }
        Ok(())
    }

    fn read_flash(
        &mut self,
        pc_read: u64,
        address: u64,
        length: usize,
    ) -> Result<Vec<u8>, FlashError> {
        let buffer = self.algorithm.begin_data();
        let timeout =
            Duration::from_millis(self.algorithm.flash_properties.program_page_timeout as u64);

        let result = self.call_routine(
            "read",
            pc_read,
            vec![into_reg(address)?, length as u32, into_reg(buffer)?],
            timeout,
        )?;

        if result != 0 {
            return Err(FlashError::ReadFailed {
                address,
                code: result,
            });
        }

        let mut data = vec![0u8; length];
        self.transport
            .read_memory(buffer, &mut data)
            .map_err(FlashError::Transport)?;
        Ok(data)
    }

    fn call_routine(
        &mut self,
        name: &'static str,
        entry: u64,
        arguments: Vec<u32>,
        timeout: Duration,
    ) -> Result<u32, FlashError> {
        tracing::debug!("calling {} at {:#010x} ({:x?})", name, entry, arguments);

        let call = self.function_call(entry, arguments);
        self.write_stack_canary()?;

        let result = self
            .transport
            .call_function(&call, timeout)
            .map_err(|error| FlashError::from_call(name, error))?;

        self.check_stack_canary(name)?;

        Ok(result)
    }

    fn function_call(&mut self, entry: u64, arguments: Vec<u32>) -> FunctionCall {
        let setup = std::mem::take(&mut self.needs_register_setup);
        FunctionCall {
            entry,
            arguments,
            static_base: setup.then_some(self.algorithm.static_base),
            stack_pointer: setup.then_some(self.algorithm.begin_stack),
            return_address: self.algorithm.load_address,
        }
    }

    fn write_stack_canary(&mut self) -> Result<(), FlashError> {
        if !self.algorithm.stack_overflow_check {
            return Ok(());
        }

        self.transport
            .write_memory(self.algorithm.stack_limit(), &STACK_CANARY.to_le_bytes())
            .map_err(FlashError::Transport)
    }

    fn check_stack_canary(&mut self, routine: &'static str) -> Result<(), FlashError> {
        if !self.algorithm.stack_overflow_check {
            return Ok(());
        }

        let mut canary = [0u8; 4];
        self.transport
            .read_memory(self.algorithm.stack_limit(), &mut canary)
            .map_err(FlashError::Transport)?;

        if u32::from_le_bytes(canary) != STACK_CANARY {
            return Err(FlashError::StackOverflow { routine });
        }
        Ok(())
    }

    fn check_cancelled(&self, options: &ProgramOptions<'_>) -> Result<(), FlashError> {
        match options.cancel {
            Some(token) if token.is_cancelled() => Err(FlashError::Cancelled),
            _ => Ok(()),
        }
    }
}
