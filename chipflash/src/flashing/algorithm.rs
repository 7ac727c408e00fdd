use super::FlashError;
use chipflash_target::{
    Architecture, FlashProperties, RamRegion, RawFlashAlgorithm, TransferEncoding,
};
use std::mem::{size_of, size_of_val};

/// The stack size used when an algorithm does not specify one.
pub(super) const DEFAULT_STACK_SIZE: u32 = 512;

/// A flash algorithm which has been assembled for a specific chip.
///
/// Assembling resolves the RAM layout: where the instructions go, where the
/// page buffers and the stack live, and the absolute address of every entry
/// point. To create a [`FlashAlgorithm`], call [`FlashAlgorithm::assemble`].
#[derive(Debug, Default, Clone)]
pub struct FlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// Whether this flash algorithm is the default one or not.
    pub default: bool,
    /// Memory address where the flash algo instructions will be loaded to.
    pub load_address: u64,
    /// List of 32-bit words containing the position-independent code for the
    /// algo, with the architecture header prepended.
    pub instructions: Vec<u32>,
    /// Address of the `Init()` entry point. Optional.
    pub pc_init: Option<u64>,
    /// Address of the `UnInit()` entry point. Optional.
    pub pc_uninit: Option<u64>,
    /// Address of the `ProgramPage()` entry point.
    pub pc_program_page: u64,
    /// Address of the `EraseSector()` entry point.
    pub pc_erase_sector: u64,
    /// Address of the `EraseAll()` entry point. Optional.
    pub pc_erase_all: Option<u64>,
    /// Address of the `Verify()` entry point. Optional.
    pub pc_verify: Option<u64>,
    /// Address of the `Read()` entry point. Optional.
    pub pc_read: Option<u64>,
    /// Initial value of the static base register, which determines where the
    /// position-independent data resides.
    pub static_base: u64,
    /// Initial value of the stack pointer when calling any flash algo API.
    pub begin_stack: u64,
    /// The size of the stack in bytes.
    pub stack_size: u32,
    /// Whether the engine guards the stack with a canary word.
    pub stack_overflow_check: bool,
    /// A list of base addresses for page buffers. The buffers are at least
    /// as large as `flash_properties.page_size`. With two buffers, double
    /// buffered programming is possible.
    pub page_buffers: Vec<u64>,
    /// The properties of the flash on the device.
    pub flash_properties: FlashProperties,
    /// The encoding format accepted by the flash algorithm.
    pub transfer_encoding: TransferEncoding,
    /// The cores this algorithm may run on.
    pub cores: Vec<String>,
}

// Breakpoint trampoline the algorithm returns into; the Cortex-M blob
// doubles as a CRC helper in the CMSIS pack convention.
const ARM_FLASH_BLOB_HEADER: [u32; 8] = [
    0xE00A_BE00,
    0x062D_780D,
    0x2408_4068,
    0xD300_0040,
    0x1E64_4058,
    0x1C49_D1FA,
    0x2A00_1E52,
    0x0477_0D1F,
];

const RISCV_EBREAK: u32 = 0x0010_0073;
const RISCV_FLASH_BLOB_HEADER: [u32; 2] = [RISCV_EBREAK, RISCV_EBREAK];

// Xtensa targets trap on return without a header blob.
const XTENSA_FLASH_BLOB_HEADER: [u32; 0] = [];

impl FlashAlgorithm {
    /// The address of the data buffer used by single buffered programming.
    pub fn begin_data(&self) -> u64 {
        self.page_buffers[0]
    }

    /// The lowest address the stack may grow down to.
    pub fn stack_limit(&self) -> u64 {
        self.begin_stack - self.stack_size as u64
    }

    fn algorithm_header(architecture: Architecture) -> &'static [u32] {
        match architecture {
            Architecture::Arm => &ARM_FLASH_BLOB_HEADER,
            Architecture::Riscv => &RISCV_FLASH_BLOB_HEADER,
            Architecture::Xtensa => &XTENSA_FLASH_BLOB_HEADER,
        }
    }

    /// Constructs a complete flash algorithm, tailored to the flash and the
    /// RAM region(s) given.
    ///
    /// The RAM is laid out as header, code, data buffer(s) and stack, with
    /// the stack placed directly below the data when both share a region.
    /// `data_ram_region` may be the same region as `ram_region`.
    pub fn assemble(
        raw: &RawFlashAlgorithm,
        ram_region: &RamRegion,
        data_ram_region: &RamRegion,
        architecture: Architecture,
    ) -> Result<Self, FlashError> {
        if raw.flash_properties.page_size == 0 || raw.flash_properties.page_size % 4 != 0 {
            return Err(FlashError::InvalidPageSize {
                size: raw.flash_properties.page_size,
            });
        }

        let word_chunks = raw.instructions.chunks_exact(size_of::<u32>());
        let remainder = word_chunks.remainder();
        let last_word = if remainder.is_empty() {
            None
        } else {
            let mut bytes = [0u8; 4];
            bytes[..remainder.len()].copy_from_slice(remainder);
            Some(u32::from_le_bytes(bytes))
        };

        let header = Self::algorithm_header(architecture);
        let instructions: Vec<u32> = header
            .iter()
            .copied()
            .chain(word_chunks.map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap())))
            .chain(last_word)
            .collect();

        let header_size = size_of_val(header) as u64;

        // The start address where we load the flash algorithm.
        let load_address = match raw.load_address {
            // Adjust the raw load address to account for the algo header.
            Some(address) => address
                .checked_sub(header_size)
                .ok_or(FlashError::InvalidLoadAddress { address })?,
            // Position independent code runs from the RAM base.
            None => ram_region.range.start,
        };

        if load_address < ram_region.range.start {
            return Err(FlashError::InvalidLoadAddress {
                address: load_address,
            });
        }

        // Memory layout:
        // - Header
        // - Code
        // - Data
        // - Stack
        let code_start = load_address + header_size;
        let code_size = (instructions.len() * size_of::<u32>()) as u64;
        let code_end = code_start + code_size;

        let page_size = raw.flash_properties.page_size as u64;
        let stack_size = raw.stack_size.unwrap_or(DEFAULT_STACK_SIZE) as u64;

        let same_region = ram_region == data_ram_region;

        // One page buffer plus the stack must fit behind the code. The
        // buffer only occupies this region when the data is not placed
        // elsewhere.
        let buffer_size_in_instr_region = if same_region { page_size } else { 0 };
        let available = ram_region.range.end.saturating_sub(code_end);
        if buffer_size_in_instr_region + stack_size > available {
            return Err(FlashError::AlgorithmTooLarge {
                name: raw.name.clone(),
                requested: header_size + code_size + buffer_size_in_instr_region + stack_size,
                available: ram_region.range.end - ram_region.range.start,
            });
        }

        tracing::debug!(
            "The flash algorithm will be configured with {} bytes of stack",
            stack_size
        );

        // Determine the bounds of the data region.
        let data_start = if let Some(data_load_address) = raw.data_load_address {
            data_load_address
        } else if same_region {
            let remaining = available - stack_size;

            // Two buffers if they fit, one otherwise.
            let data_size = if remaining >= 2 * page_size {
                2 * page_size
            } else {
                page_size
            };

            ram_region.range.end - data_size
        } else {
            data_ram_region.range.start
        };
        let data_end = data_ram_region.range.end;

        if data_start + page_size > data_end {
            return Err(FlashError::AlgorithmTooLarge {
                name: raw.name.clone(),
                requested: page_size,
                available: data_end.saturating_sub(data_start),
            });
        }

        // The stack lives directly under the data, or at the top of the
        // instruction region when the data is placed elsewhere.
        let stack_top = if same_region {
            data_start
        } else {
            ram_region.range.end
        };
        tracing::debug!("Stack top: {:#010x}", stack_top);

        let first_buffer = data_start;
        let second_buffer = first_buffer + page_size;
        let page_buffers = if second_buffer + page_size <= data_end {
            vec![first_buffer, second_buffer]
        } else {
            vec![first_buffer]
        };

        tracing::debug!("Page buffers: {:#010x?}", page_buffers);

        Ok(FlashAlgorithm {
            name: raw.name.clone(),
            default: raw.default,
            load_address,
            instructions,
            pc_init: raw.pc_init.map(|v| code_start + v),
            pc_uninit: raw.pc_uninit.map(|v| code_start + v),
            pc_program_page: code_start + raw.pc_program_page,
            pc_erase_sector: code_start + raw.pc_erase_sector,
            pc_erase_all: raw.pc_erase_all.map(|v| code_start + v),
            pc_verify: raw.pc_verify.map(|v| code_start + v),
            pc_read: raw.pc_read.map(|v| code_start + v),
            static_base: code_start + raw.data_section_offset,
            begin_stack: stack_top,
            stack_size: stack_size as u32,
            stack_overflow_check: raw.stack_overflow_check(),
            page_buffers,
            flash_properties: raw.flash_properties.clone(),
            transfer_encoding: raw.transfer_encoding(),
            cores: raw.cores.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chipflash_target::SectorDescription;

    fn demo_raw() -> RawFlashAlgorithm {
        RawFlashAlgorithm {
            name: "demo".into(),
            instructions: vec![0u8; 0x200],
            pc_init: Some(0x10),
            pc_uninit: Some(0x20),
            pc_program_page: 0x30,
            pc_erase_sector: 0x40,
            pc_erase_all: None,
            data_section_offset: 0x180,
            flash_properties: FlashProperties {
                address_range: 0x0800_0000..0x0808_0000,
                page_size: 0x400,
                erased_byte_value: 0xff,
                program_page_timeout: 300,
                erase_sector_timeout: 3000,
                sectors: vec![SectorDescription {
                    size: 0x800,
                    address: 0,
                }],
            },
            ..Default::default()
        }
    }

    fn ram(range: std::ops::Range<u64>) -> RamRegion {
        RamRegion {
            name: None,
            range,
            cores: vec!["main".to_string()],
            access: None,
        }
    }

    #[test]
    fn entry_points_are_absolutized() {
        let ram = ram(0x2000_0000..0x2000_4000);
        let algo =
            FlashAlgorithm::assemble(&demo_raw(), &ram, &ram, Architecture::Arm).unwrap();

        // The ARM header is eight words long.
        let code_start = 0x2000_0000 + 0x20;
        assert_eq!(algo.load_address, 0x2000_0000);
        assert_eq!(algo.pc_init, Some(code_start + 0x10));
        assert_eq!(algo.pc_uninit, Some(code_start + 0x20));
        assert_eq!(algo.pc_program_page, code_start + 0x30);
        assert_eq!(algo.pc_erase_sector, code_start + 0x40);
        assert_eq!(algo.pc_erase_all, None);
        assert_eq!(algo.pc_verify, None);
        assert_eq!(algo.static_base, code_start + 0x180);
    }

    #[test]
    fn arm_header_is_prepended() {
        let ram = ram(0x2000_0000..0x2000_4000);
        let algo =
            FlashAlgorithm::assemble(&demo_raw(), &ram, &ram, Architecture::Arm).unwrap();
        assert_eq!(&algo.instructions[..8], &ARM_FLASH_BLOB_HEADER);
        assert_eq!(algo.instructions.len(), 8 + 0x200 / 4);
    }

    #[test]
    fn riscv_header_is_prepended() {
        let ram = ram(0x2000_0000..0x2000_4000);
        let algo =
            FlashAlgorithm::assemble(&demo_raw(), &ram, &ram, Architecture::Riscv).unwrap();
        assert_eq!(&algo.instructions[..2], &[RISCV_EBREAK, RISCV_EBREAK]);
    }

    #[test]
    fn unaligned_blob_is_padded_to_words() {
        let mut raw = demo_raw();
        raw.instructions = vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee];
        let ram = ram(0x2000_0000..0x2000_4000);
        let algo = FlashAlgorithm::assemble(&raw, &ram, &ram, Architecture::Arm).unwrap();
        assert_eq!(algo.instructions[8], 0xddccbbaa);
        assert_eq!(algo.instructions[9], 0x0000_00ee);
    }

    #[test]
    fn double_buffering_when_ram_allows() {
        // 16 KiB: code + stack + two 1 KiB buffers fit easily.
        let ram = ram(0x2000_0000..0x2000_4000);
        let algo =
            FlashAlgorithm::assemble(&demo_raw(), &ram, &ram, Architecture::Arm).unwrap();
        assert_eq!(algo.page_buffers.len(), 2);
        assert_eq!(algo.page_buffers[0], 0x2000_4000 - 2 * 0x400);
        assert_eq!(algo.begin_stack, algo.page_buffers[0]);
        assert_eq!(algo.stack_limit(), algo.begin_stack - 512);
    }

    #[test]
    fn single_buffer_when_ram_is_tight() {
        // 0x220 code + 0x200 stack + 0x400 buffer fits, a second buffer
        // does not.
        let ram = ram(0x2000_0000..0x2000_0000 + 0xa20);
        let algo =
            FlashAlgorithm::assemble(&demo_raw(), &ram, &ram, Architecture::Arm).unwrap();
        assert_eq!(algo.page_buffers.len(), 1);
    }

    #[test]
    fn algorithm_too_large_is_rejected() {
        let ram = ram(0x2000_0000..0x2000_0400);
        let result = FlashAlgorithm::assemble(&demo_raw(), &ram, &ram, Architecture::Arm);
        assert!(matches!(
            result,
            Err(FlashError::AlgorithmTooLarge { .. })
        ));
    }

    #[test]
    fn separate_data_region() {
        let mut raw = demo_raw();
        raw.data_load_address = Some(0x2001_0000);
        let code_ram = ram(0x2000_0000..0x2000_1000);
        let data_ram = ram(0x2001_0000..0x2001_0800);
        let algo =
            FlashAlgorithm::assemble(&raw, &code_ram, &data_ram, Architecture::Arm).unwrap();
        assert_eq!(algo.page_buffers, vec![0x2001_0000, 0x2001_0400]);
        // With the data placed elsewhere the stack tops out the code region.
        assert_eq!(algo.begin_stack, 0x2000_1000);
    }

    #[test]
    fn unaligned_page_size_is_rejected() {
        let mut raw = demo_raw();
        raw.flash_properties.page_size = 0x3fe;
        let ram = ram(0x2000_0000..0x2000_4000);
        let result = FlashAlgorithm::assemble(&raw, &ram, &ram, Architecture::Arm);
        assert!(matches!(result, Err(FlashError::InvalidPageSize { size: 0x3fe })));
    }
}
