use super::flash_properties::FlashProperties;
use crate::serialize::hex_u_int;

use base64::{engine::general_purpose as base64_engine, Engine as _};
use serde::{Deserialize, Serialize};

/// The raw flash algorithm is the description of a flash algorithm,
/// and is usually read from a target description file.
///
/// Before it can be used for flashing, it has to be assembled for
/// a specific chip, which determines the RAM addresses used during
/// flashing.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// The description of the algorithm.
    #[serde(default)]
    pub description: String,
    /// Whether this flash algorithm is the default one or not.
    #[serde(default)]
    pub default: bool,
    /// The position-independent code for the algo, copied byte-exact into
    /// target RAM.
    #[serde(deserialize_with = "deserialize")]
    #[serde(serialize_with = "serialize")]
    pub instructions: Vec<u8>,
    /// If present, the address where the algo is loaded into RAM.
    /// Otherwise a reserved RAM base is picked by the runtime.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub load_address: Option<u64>,
    /// If present, a separate RAM address for the data buffers. Otherwise
    /// the data is placed after the algo, per `data_section_offset`.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub data_load_address: Option<u64>,
    /// Offset of the `Init()` entry point from the load address. Optional.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub pc_init: Option<u64>,
    /// Offset of the `UnInit()` entry point. Optional.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub pc_uninit: Option<u64>,
    /// Offset of the `ProgramPage()` entry point.
    #[serde(serialize_with = "hex_u_int")]
    pub pc_program_page: u64,
    /// Offset of the `EraseSector()` entry point.
    #[serde(serialize_with = "hex_u_int")]
    pub pc_erase_sector: u64,
    /// Offset of the `EraseAll()` entry point. Optional.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub pc_erase_all: Option<u64>,
    /// Offset of the `Verify()` entry point. Optional.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub pc_verify: Option<u64>,
    /// Offset of the `Read()` entry point. Optional.
    #[serde(default)]
    #[serde(serialize_with = "crate::serialize::hex_option")]
    pub pc_read: Option<u64>,
    /// The offset from the start of RAM to the data section.
    #[serde(serialize_with = "hex_u_int")]
    pub data_section_offset: u64,
    /// The stack size in bytes required by the algo routines. A runtime
    /// default applies when absent.
    #[serde(default)]
    pub stack_size: Option<u32>,
    /// Whether the runtime should guard the algo stack with a canary.
    /// Defaults to true.
    #[serde(default)]
    pub stack_overflow_check: Option<bool>,
    /// The properties of the flash on the device.
    pub flash_properties: FlashProperties,
    /// The encoding format accepted by the flash algorithm.
    #[serde(default)]
    pub transfer_encoding: Option<TransferEncoding>,
    /// The cores this algorithm is valid for. Empty means all of the
    /// variant's cores.
    #[serde(default)]
    pub cores: Vec<String>,
}

impl RawFlashAlgorithm {
    /// The encoding the data must be in when it reaches the algo's buffer.
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.transfer_encoding.unwrap_or_default()
    }

    /// Whether the runtime must guard the algo's stack usage.
    pub fn stack_overflow_check(&self) -> bool {
        self.stack_overflow_check.unwrap_or(true)
    }
}

/// The encoding format accepted by the flash algorithm.
#[derive(Debug, Default, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferEncoding {
    /// Raw binary encoding. Probably the most common one.
    #[default]
    Raw,
    /// Zlib-compressed data, decompressed by the on-target loader.
    Miniz,
}

pub(crate) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&base64_engine::STANDARD.encode(bytes))
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Base64Visitor;

    impl<'de> serde::de::Visitor<'de> for Base64Visitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "base64 ASCII text")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            base64_engine::STANDARD
                .decode(v)
                .map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_str(Base64Visitor)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn algorithm_deserializes_from_yaml() {
        let yaml = r#"
name: main_flash
description: Main flash algorithm
default: true
instructions: AL5wRwAgcEc=
pc_init: 0x0
pc_uninit: 0x4
pc_program_page: 0x8
pc_erase_sector: 0xc
pc_verify: 0x10
data_section_offset: 0x100
transfer_encoding: miniz
flash_properties:
  address_range:
    start: 0x08000000
    end: 0x08100000
  page_size: 0x400
  erased_byte_value: 0xff
  program_page_timeout: 300
  erase_sector_timeout: 3000
  sectors:
    - size: 0x800
      address: 0x0
"#;

        let algo: RawFlashAlgorithm = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(algo.name, "main_flash");
        assert!(algo.default);
        assert_eq!(
            algo.instructions,
            vec![0x00, 0xbe, 0x70, 0x47, 0x00, 0x20, 0x70, 0x47]
        );
        assert_eq!(algo.pc_init, Some(0x0));
        assert_eq!(algo.pc_verify, Some(0x10));
        assert_eq!(algo.pc_read, None);
        assert_eq!(algo.pc_program_page, 0x8);
        assert_eq!(algo.transfer_encoding(), TransferEncoding::Miniz);
        assert_eq!(algo.flash_properties.address_range, 0x0800_0000..0x0810_0000);
        assert_eq!(algo.flash_properties.erased_byte_value, 0xff);
        assert_eq!(algo.flash_properties.sectors.len(), 1);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        // Forward compatibility: newer descriptor documents may carry fields
        // this version does not know about.
        let yaml = r#"
name: main_flash
instructions: AL5wRw==
pc_program_page: 0x8
pc_erase_sector: 0xc
data_section_offset: 0x100
some_future_field: 42
flash_properties:
  address_range:
    start: 0x0
    end: 0x1000
  page_size: 0x100
  erased_byte_value: 0xff
  program_page_timeout: 300
  erase_sector_timeout: 3000
"#;

        let algo: RawFlashAlgorithm = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(algo.pc_program_page, 0x8);
    }

    #[test]
    fn missing_required_field_is_a_load_error() {
        // No pc_erase_sector.
        let yaml = r#"
name: main_flash
instructions: AL5wRw==
pc_program_page: 0x8
data_section_offset: 0x100
flash_properties:
  address_range:
    start: 0x0
    end: 0x1000
  page_size: 0x100
  erased_byte_value: 0xff
  program_page_timeout: 300
  erase_sector_timeout: 3000
"#;

        assert!(serde_yaml::from_str::<RawFlashAlgorithm>(yaml).is_err());
    }

    #[test]
    fn instructions_are_base64_in_yaml() {
        let algo = RawFlashAlgorithm {
            name: "blob".into(),
            instructions: vec![0xde, 0xad, 0xbe, 0xef],
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&algo).unwrap();
        assert!(yaml.contains("3q2+7w=="), "yaml was: {yaml}");
    }

    #[test]
    fn accessor_defaults() {
        let algo = RawFlashAlgorithm::default();
        assert_eq!(algo.transfer_encoding(), TransferEncoding::Raw);
        assert!(algo.stack_overflow_check());
    }
}
