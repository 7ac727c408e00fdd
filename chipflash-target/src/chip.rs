use super::memory::MemoryRegion;
use crate::CoreType;
use serde::{Deserialize, Serialize};

/// A single chip variant.
///
/// This describes an exact chip variant, including the cores, flash and
/// memory size. For example, the `nRF52832` chip has two variants,
/// `nRF52832_xxAA` and `nRF52832_xxBB`. For this case, the struct will
/// correspond to one of the variants, e.g. `nRF52832_xxAA`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    /// This is the name of the chip in base form.
    /// E.g. `nRF52832`.
    pub name: String,
    /// The cores available on the chip.
    pub cores: Vec<Core>,
    /// The memory regions available on the chip.
    pub memory_map: Vec<MemoryRegion>,
    /// Names of all flash algorithms available for this chip.
    ///
    /// This can be used to look up the flash algorithm in the
    /// [`ChipFamily::flash_algorithms`] field.
    ///
    /// [`ChipFamily::flash_algorithms`]: crate::ChipFamily::flash_algorithms
    #[serde(default)]
    pub flash_algorithms: Vec<String>,
    /// JTAG-specific options, such as the scan chain in front of the chip.
    #[serde(default)]
    pub jtag: Option<Jtag>,
    /// The binary format assumed for images when the caller does not name
    /// one.
    #[serde(default)]
    pub default_binary_format: Option<String>,
}

impl Chip {
    /// Returns the core with the given name, if the chip has one.
    pub fn core_by_name(&self, name: &str) -> Option<&Core> {
        self.cores.iter().find(|core| core.name == name)
    }
}

/// An individual core inside a chip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Core {
    /// The core name.
    pub name: String,

    /// The core type.
    /// E.g. `M0` or `M4`.
    #[serde(rename = "type")]
    pub core_type: CoreType,

    /// The data required to access the core.
    pub core_access_options: CoreAccessOptions,
}

/// The data required to access a core.
///
/// This is a closed variant set: call-convention dispatch matches on it
/// exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreAccessOptions {
    /// Arm specific options
    Arm(ArmCoreAccessOptions),
    /// Riscv specific options
    Riscv(RiscvCoreAccessOptions),
    /// Xtensa specific options
    Xtensa(XtensaCoreAccessOptions),
}

/// The data required to access an ARM core
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArmCoreAccessOptions {
    /// The access port number to access the core
    #[serde(default)]
    pub ap: u8,
    /// The TARGETSEL value to access the core
    #[serde(default)]
    pub targetsel: Option<u32>,
    /// The base address of the debug registers for the core
    #[serde(default)]
    pub debug_base: Option<u64>,
}

/// The data required to access a Risc-V core
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiscvCoreAccessOptions {
    /// The hart id
    #[serde(default)]
    pub hart_id: Option<u32>,
}

/// The data required to access an Xtensa core
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XtensaCoreAccessOptions {}

/// JTAG options for a chip variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jtag {
    /// Describes the scan chain the chip sits in.
    ///
    /// See <https://developer.arm.com/documentation/101416/0100/Debug-Probe-Firmware/Advanced-Usage/Scan-Chain>
    #[serde(default)]
    pub scan_chain: Option<Vec<ScanChainElement>>,
}

/// A single element of a JTAG scan chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanChainElement {
    /// The name of the element.
    #[serde(default)]
    pub name: Option<String>,
    /// The length of the element's instruction register.
    #[serde(default)]
    pub ir_len: Option<u8>,
}
