//! An in-process target simulator.
//!
//! `MockTarget` implements [`Transport`] over a simulated RAM and flash. It
//! interprets calls to the five flash algorithm routines semantically:
//! erase fills sectors with the erased byte value, program copies the data
//! buffer into flash (and refuses to program bytes that were not erased
//! first), verify compares, read copies flash into the buffer. Failures of
//! each routine can be injected.

use chipflash::config::{
    Architecture, Chip, ChipFamily, Core, CoreAccessOptions, CoreType, FlashProperties,
    MemoryRegion, NvmRegion, RamRegion, RawFlashAlgorithm, SectorDescription,
    TargetDescriptionSource, TransferEncoding,
};
use chipflash::flashing::{decompress, FlashAlgorithm};
use chipflash::transport::{FunctionCall, Transport, TransportError};
use chipflash::Target;

use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;

pub const FLASH_RANGE: Range<u64> = 0x0800_0000..0x0801_0000;
pub const RAM_RANGE: Range<u64> = 0x2000_0000..0x2000_4000;
pub const PAGE_SIZE: u32 = 0x100;
pub const SECTOR_SIZE: u64 = 0x400;
pub const ERASED: u8 = 0xff;

/// A raw algorithm exercising every capability the engine knows.
pub fn demo_algorithm() -> RawFlashAlgorithm {
    RawFlashAlgorithm {
        name: "demo_flash".into(),
        description: "Simulated flash".into(),
        default: true,
        instructions: vec![0x55; 0x80],
        pc_init: Some(0x0),
        pc_uninit: Some(0x4),
        pc_program_page: 0x8,
        pc_erase_sector: 0xc,
        pc_erase_all: Some(0x10),
        pc_verify: Some(0x14),
        pc_read: Some(0x18),
        data_section_offset: 0x40,
        flash_properties: FlashProperties {
            address_range: FLASH_RANGE,
            page_size: PAGE_SIZE,
            erased_byte_value: ERASED,
            program_page_timeout: 300,
            erase_sector_timeout: 3000,
            sectors: vec![SectorDescription {
                size: SECTOR_SIZE,
                address: 0,
            }],
        },
        ..Default::default()
    }
}

/// A single-core family around [`demo_algorithm`]-style algorithms.
pub fn demo_family(algorithms: Vec<RawFlashAlgorithm>) -> ChipFamily {
    ChipFamily {
        name: "MOCK_FAMILY".into(),
        variants: vec![Chip {
            name: "MOCK_CHIP".into(),
            cores: vec![Core {
                name: "main".into(),
                core_type: CoreType::Armv7em,
                core_access_options: CoreAccessOptions::Arm(Default::default()),
            }],
            memory_map: vec![
                MemoryRegion::Nvm(NvmRegion {
                    name: Some("FLASH".into()),
                    range: FLASH_RANGE,
                    cores: vec!["main".into()],
                    is_alias: false,
                    access: None,
                }),
                MemoryRegion::Ram(RamRegion {
                    name: Some("SRAM".into()),
                    range: RAM_RANGE,
                    cores: vec!["main".into()],
                    access: None,
                }),
            ],
            flash_algorithms: algorithms.iter().map(|a| a.name.clone()).collect(),
            jtag: None,
            default_binary_format: None,
        }],
        flash_algorithms: algorithms,
        source: TargetDescriptionSource::External,
    }
}

pub fn demo_target(raw: &RawFlashAlgorithm) -> Target {
    Target::from_family(&demo_family(vec![raw.clone()]), "MOCK_CHIP").unwrap()
}

/// Assembles `raw` exactly like the engine will, so tests and the mock know
/// the entry addresses and the RAM layout up front.
pub fn assembled(raw: &RawFlashAlgorithm) -> FlashAlgorithm {
    let ram = RamRegion {
        name: Some("SRAM".into()),
        range: RAM_RANGE,
        cores: vec!["main".into()],
        access: None,
    };
    FlashAlgorithm::assemble(raw, &ram, &ram, Architecture::Arm).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routine {
    Init,
    Uninit,
    EraseSector,
    EraseAll,
    ProgramPage,
    Verify,
    Read,
}

impl Routine {
    fn name(self) -> &'static str {
        match self {
            Routine::Init => "init",
            Routine::Uninit => "uninit",
            Routine::EraseSector => "erase_sector",
            Routine::EraseAll => "erase_all",
            Routine::ProgramPage => "program_page",
            Routine::Verify => "verify",
            Routine::Read => "read",
        }
    }
}

/// State of an in-flight compressed image transfer.
#[derive(Default)]
struct MinizState {
    start: Option<u64>,
    total: usize,
    data: Vec<u8>,
}

pub struct MockTarget {
    properties: FlashProperties,
    encoding: TransferEncoding,
    load_address: u64,

    ram: Vec<u8>,
    pub flash: Vec<u8>,
    erased: Vec<bool>,

    routines: HashMap<u64, Routine>,
    /// Every routine call, as `(name, arguments)`, in order.
    pub calls: Vec<(String, Vec<u32>)>,
    /// Whether any memory access or routine call happened.
    pub touched: bool,
    /// How many overlapped (start/wait) calls ran.
    pub overlapped_calls: usize,

    // Failure injection.
    pub fail_init_code: Option<u32>,
    pub fail_uninit_code: Option<u32>,
    pub fail_program_code: Option<u32>,
    pub hang_erase: bool,
    pub corrupt_algorithm_load: bool,
    pub corrupt_after_program: bool,
    /// RAM address to scribble over during every routine call.
    pub scribble: Option<u64>,
    pub support_overlapped: bool,

    miniz: MinizState,
    pending: Option<FunctionCall>,
}

impl MockTarget {
    pub fn new(algorithm: &FlashAlgorithm) -> Self {
        let mut routines = HashMap::new();
        let mut register = |entry: Option<u64>, routine: Routine| {
            if let Some(entry) = entry {
                routines.insert(entry, routine);
            }
        };
        register(algorithm.pc_init, Routine::Init);
        register(algorithm.pc_uninit, Routine::Uninit);
        register(Some(algorithm.pc_program_page), Routine::ProgramPage);
        register(Some(algorithm.pc_erase_sector), Routine::EraseSector);
        register(algorithm.pc_erase_all, Routine::EraseAll);
        register(algorithm.pc_verify, Routine::Verify);
        register(algorithm.pc_read, Routine::Read);

        let flash_len =
            (algorithm.flash_properties.address_range.end - algorithm.flash_properties.address_range.start) as usize;

        Self {
            properties: algorithm.flash_properties.clone(),
            encoding: algorithm.transfer_encoding,
            load_address: algorithm.load_address,
            ram: vec![0; (RAM_RANGE.end - RAM_RANGE.start) as usize],
            // The flash starts in a programmed (not erased) state, so that
            // programming without a prior erase is detectable.
            flash: vec![0x11; flash_len],
            erased: vec![false; flash_len],
            routines,
            calls: Vec::new(),
            touched: false,
            overlapped_calls: 0,
            fail_init_code: None,
            fail_uninit_code: None,
            fail_program_code: None,
            hang_erase: false,
            corrupt_algorithm_load: false,
            corrupt_after_program: false,
            scribble: None,
            support_overlapped: false,
            miniz: MinizState::default(),
            pending: None,
        }
    }

    /// Prefills the whole flash with a byte value, marking it not erased.
    pub fn prefill_flash(&mut self, value: u8) {
        self.flash.fill(value);
        self.erased.fill(false);
    }

    /// The names of all routine calls, in order.
    pub fn call_names(&self) -> Vec<&str> {
        self.calls.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn flash_slice(&self, range: Range<u64>) -> &[u8] {
        let start = (range.start - FLASH_RANGE.start) as usize;
        let end = (range.end - FLASH_RANGE.start) as usize;
        &self.flash[start..end]
    }

    fn ram_slice(&self, address: u64, len: usize) -> Result<&[u8], TransportError> {
        let start = address
            .checked_sub(RAM_RANGE.start)
            .filter(|_| address + len as u64 <= RAM_RANGE.end)
            .ok_or(TransportError::MemoryAccess {
                address,
                count: len,
            })? as usize;
        Ok(&self.ram[start..start + len])
    }

    fn flash_offset(&self, address: u64, len: usize) -> Option<usize> {
        let range = &self.properties.address_range;
        if address < range.start || address + len as u64 > range.end {
            return None;
        }
        Some((address - range.start) as usize)
    }

    fn program_bytes(&mut self, address: u64, data: &[u8]) -> u32 {
        let Some(offset) = self.flash_offset(address, data.len()) else {
            return 1;
        };
        // Programming can only clear bits of erased cells; refuse anything
        // that was not erased first.
        if !self.erased[offset..offset + data.len()].iter().all(|e| *e) {
            return 2;
        }
        self.flash[offset..offset + data.len()].copy_from_slice(data);
        self.erased[offset..offset + data.len()].fill(false);

        if self.corrupt_after_program {
            self.flash[offset] ^= 0x80;
        }
        0
    }

    fn run_routine(&mut self, call: &FunctionCall) -> Result<u32, TransportError> {
        self.touched = true;
        let routine = self.routines.get(&call.entry).copied();
        let name = routine.map_or("unknown", Routine::name);
        self.calls.push((name.to_string(), call.arguments.clone()));

        if let Some(address) = self.scribble {
            let offset = (address - RAM_RANGE.start) as usize;
            self.ram[offset..offset + 4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        }

        let code = match routine {
            None => 0xdead,
            Some(Routine::Init) => self.fail_init_code.unwrap_or(0),
            Some(Routine::Uninit) => self.fail_uninit_code.unwrap_or(0),
            Some(Routine::EraseAll) => {
                self.flash.fill(self.properties.erased_byte_value);
                self.erased.fill(true);
                0
            }
            Some(Routine::EraseSector) => {
                if self.hang_erase {
                    return Err(TransportError::Timeout {
                        entry: call.entry,
                        timeout: Duration::from_millis(0),
                    });
                }
                let address = call.arguments[0] as u64;
                match self.properties.sector_containing(address) {
                    Some(sector) if sector.base_address == address => {
                        let offset = (address - self.properties.address_range.start) as usize;
                        let len = sector.size as usize;
                        self.flash[offset..offset + len].fill(self.properties.erased_byte_value);
                        self.erased[offset..offset + len].fill(true);
                        0
                    }
                    _ => 1,
                }
            }
            Some(Routine::ProgramPage) => {
                if let Some(code) = self.fail_program_code {
                    code
                } else {
                    let address = call.arguments[0] as u64;
                    let len = call.arguments[1] as usize;
                    let buffer = call.arguments[2] as u64;
                    let data = self.ram_slice(buffer, len)?.to_vec();

                    match self.encoding {
                        TransferEncoding::Raw => self.program_bytes(address, &data),
                        TransferEncoding::Miniz => self.program_compressed_chunk(address, &data),
                    }
                }
            }
            Some(Routine::Verify) => {
                let address = call.arguments[0] as u64;
                let len = call.arguments[1] as usize;
                let buffer = call.arguments[2] as u64;
                let expected = self.ram_slice(buffer, len)?.to_vec();

                let Some(offset) = self.flash_offset(address, len) else {
                    return Ok(address as u32);
                };
                match expected
                    .iter()
                    .zip(&self.flash[offset..offset + len])
                    .position(|(a, b)| a != b)
                {
                    Some(mismatch) => (address + mismatch as u64) as u32,
                    None => (address + len as u64) as u32,
                }
            }
            Some(Routine::Read) => {
                let address = call.arguments[0] as u64;
                let len = call.arguments[1] as usize;
                let buffer = call.arguments[2] as u64;

                let Some(offset) = self.flash_offset(address, len) else {
                    return Ok(1);
                };
                let data = self.flash[offset..offset + len].to_vec();
                let ram_offset = (buffer - RAM_RANGE.start) as usize;
                self.ram[ram_offset..ram_offset + len].copy_from_slice(&data);
                0
            }
        };

        Ok(code)
    }

    /// Mirrors the on-target miniz loader: chunks of one image all carry the
    /// image start address, the first chunk leads with the total compressed
    /// length.
    fn program_compressed_chunk(&mut self, address: u64, chunk: &[u8]) -> u32 {
        if self.miniz.start != Some(address) {
            if chunk.len() < 4 {
                return 3;
            }
            self.miniz.start = Some(address);
            self.miniz.total =
                u32::from_le_bytes(chunk[..4].try_into().unwrap()) as usize;
            self.miniz.data = chunk[4..].to_vec();
        } else {
            self.miniz.data.extend_from_slice(chunk);
        }

        if self.miniz.data.len() >= self.miniz.total {
            let compressed = self.miniz.data[..self.miniz.total].to_vec();
            let Ok(image) = decompress(&compressed) else {
                return 4;
            };
            let start = self.miniz.start.take().unwrap();
            self.miniz = MinizState::default();
            return self.program_bytes(start, &image);
        }

        0
    }
}

impl Transport for MockTarget {
    fn architecture(&self) -> Architecture {
        Architecture::Arm
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), TransportError> {
        self.touched = true;
        if address >= RAM_RANGE.start && address + data.len() as u64 <= RAM_RANGE.end {
            let offset = (address - RAM_RANGE.start) as usize;
            self.ram[offset..offset + data.len()].copy_from_slice(data);

            if self.corrupt_algorithm_load && address == self.load_address {
                self.ram[offset] ^= 0x01;
            }
            return Ok(());
        }
        Err(TransportError::MemoryAccess {
            address,
            count: data.len(),
        })
    }

    fn read_memory(&mut self, address: u64, data: &mut [u8]) -> Result<(), TransportError> {
        self.touched = true;
        let slice = self.ram_slice(address, data.len())?.to_vec();
        data.copy_from_slice(&slice);
        Ok(())
    }

    fn call_function(
        &mut self,
        call: &FunctionCall,
        _timeout: Duration,
    ) -> Result<u32, TransportError> {
        self.run_routine(call)
    }

    fn supports_overlapped_calls(&self) -> bool {
        self.support_overlapped
    }

    fn start_function_call(&mut self, call: &FunctionCall) -> Result<(), TransportError> {
        assert!(self.pending.is_none(), "a call is already in flight");
        self.pending = Some(call.clone());
        Ok(())
    }

    fn wait_for_function_call(&mut self, _timeout: Duration) -> Result<u32, TransportError> {
        let call = self.pending.take().expect("no call in flight");
        self.overlapped_calls += 1;
        self.run_routine(&call)
    }
}
