use std::collections::HashMap;
use std::ops::Range;

use itertools::Itertools;
use thiserror::Error;
use tracing::warn;

use super::packet::Packet;
use super::types::{crc5_check, Pid};

type SymbolTable = &'static [(u64, &'static str)];

#[derive(Debug, Clone, Copy)]
pub enum Symbols {
    Raw,
    Table(SymbolTable),
    /// The table only applies when an earlier field holds the given value.
    When {
        field: &'static str,
        equals: u64,
        table: SymbolTable,
    },
}

/// Describes a bit field of a packet payload. Bits are numbered from the LSB
/// of the first payload byte, multi-byte fields being little endian.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub bits: Range<u32>,
    pub symbols: Symbols,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub description: &'static str,
    pub raw: u64,
    pub symbol: Option<&'static str>,
    /// Position of the field in its table.
    pub order: usize,
}

#[derive(Error, Debug, PartialEq)]
pub enum FieldError {
    #[error("payload holds {actual} byte(s), {needed} needed")]
    Truncated { needed: usize, actual: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(HashMap<&'static str, Field>);

impl Fields {
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields in the order their table declares them.
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.0.values().sorted_by_key(|field| field.order)
    }
}

const TOKEN_TYPES: [Pid; 4] = [Pid::Out, Pid::In, Pid::Setup, Pid::Ping];

pub const TOKEN_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "ADDR",
        description: "Device address",
        bits: 0..7,
        symbols: Symbols::Raw,
    },
    FieldSpec {
        name: "ENDP",
        description: "Endpoint number",
        bits: 7..11,
        symbols: Symbols::Raw,
    },
    FieldSpec {
        name: "CRC5",
        description: "Token CRC",
        bits: 11..16,
        symbols: Symbols::Raw,
    },
];

pub const SOF_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "FRAME",
        description: "Frame number",
        bits: 0..11,
        symbols: Symbols::Raw,
    },
    FieldSpec {
        name: "CRC5",
        description: "Token CRC",
        bits: 11..16,
        symbols: Symbols::Raw,
    },
];

const STANDARD_REQUESTS: SymbolTable = &[
    (0x00, "GET_STATUS"),
    (0x01, "CLEAR_FEATURE"),
    (0x03, "SET_FEATURE"),
    (0x05, "SET_ADDRESS"),
    (0x06, "GET_DESCRIPTOR"),
    (0x07, "SET_DESCRIPTOR"),
    (0x08, "GET_CONFIGURATION"),
    (0x09, "SET_CONFIGURATION"),
    (0x0A, "GET_INTERFACE"),
    (0x0B, "SET_INTERFACE"),
    (0x0C, "SYNC_FRAME"),
];

/// Device request carried by the data stage of a SETUP transaction (USB 2.0 table 9-2).
pub const SETUP_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "bmRequestType:dir",
        description: "Data transfer direction",
        bits: 7..8,
        symbols: Symbols::Table(&[(0, "Host-to-device"), (1, "Device-to-host")]),
    },
    FieldSpec {
        name: "bmRequestType:type",
        description: "Request type",
        bits: 5..7,
        symbols: Symbols::Table(&[(0, "Standard"), (1, "Class"), (2, "Vendor")]),
    },
    FieldSpec {
        name: "bmRequestType:rcp",
        description: "Recipient",
        bits: 0..5,
        symbols: Symbols::Table(&[
            (0, "Device"),
            (1, "Interface"),
            (2, "Endpoint"),
            (3, "Other"),
        ]),
    },
    FieldSpec {
        name: "bRequest",
        description: "Request",
        bits: 8..16,
        symbols: Symbols::When {
            field: "bmRequestType:type",
            equals: 0,
            table: STANDARD_REQUESTS,
        },
    },
    FieldSpec {
        name: "wValue",
        description: "Value",
        bits: 16..32,
        symbols: Symbols::Raw,
    },
    FieldSpec {
        name: "wIndex",
        description: "Index or offset",
        bits: 32..48,
        symbols: Symbols::Raw,
    },
    FieldSpec {
        name: "wLength",
        description: "Number of bytes to transfer",
        bits: 48..64,
        symbols: Symbols::Raw,
    },
];

fn extract(data: &[u8], bits: &Range<u32>) -> u64 {
    let width = bits.end - bits.start;
    let first = (bits.start / 8) as usize;
    let last = ((bits.end + 7) / 8) as usize;
    let word = data[first..last]
        .iter()
        .rev()
        .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
    let value = word >> (bits.start % 8);
    (value & ((1u128 << width) - 1)) as u64
}

fn lookup(table: SymbolTable, raw: u64) -> Option<&'static str> {
    table
        .iter()
        .find(|(value, _)| *value == raw)
        .map(|(_, symbol)| *symbol)
}

/// Decodes `data` according to `specs`.
pub fn parse(specs: &[FieldSpec], data: &[u8]) -> Result<Fields, FieldError> {
    let needed = specs
        .iter()
        .map(|spec| ((spec.bits.end + 7) / 8) as usize)
        .max()
        .unwrap_or(0);
    if data.len() < needed {
        return Err(FieldError::Truncated {
            needed,
            actual: data.len(),
        });
    }

    let mut fields = Fields::default();
    for (order, spec) in specs.iter().enumerate() {
        let raw = extract(data, &spec.bits);
        let table = match spec.symbols {
            Symbols::Raw => None,
            Symbols::Table(table) => Some(table),
            Symbols::When {
                field,
                equals,
                table,
            } => Some(table).filter(|_| fields.get(field).map(|f| f.raw) == Some(equals)),
        };
        let symbol = table.and_then(|table| {
            let symbol = lookup(table, raw);
            if symbol.is_none() {
                warn!("{} holds unknown value {:#x}", spec.name, raw);
            }
            symbol
        });

        fields.0.insert(
            spec.name,
            Field {
                name: spec.name,
                description: spec.description,
                raw,
                symbol,
                order,
            },
        );
    }
    Ok(fields)
}

#[derive(Debug, PartialEq)]
enum TransactionState {
    Idle,
    Setup,
}

/// Attaches fields to the packets whose meaning is known from their PID and
/// from the packet preceding them.
pub fn annotate(packets: &mut [Packet]) {
    let mut transaction_state = TransactionState::Idle;

    for packet in packets.iter_mut() {
        let kind = if packet.is_invalid { None } else { packet.kind() };
        let previous = std::mem::replace(&mut transaction_state, TransactionState::Idle);

        let specs = match kind {
            Some(Pid::Setup) => {
                transaction_state = TransactionState::Setup;
                TOKEN_FIELDS
            }
            Some(pid) if TOKEN_TYPES.contains(&pid) => TOKEN_FIELDS,
            Some(Pid::Sof) => SOF_FIELDS,
            Some(Pid::Data0) if previous == TransactionState::Setup => SETUP_FIELDS,
            _ => continue,
        };

        let has_crc5 = specs.iter().any(|spec| spec.name == "CRC5");
        if has_crc5 && packet.payload().len() == 2 && !crc5_check(packet.payload()) {
            warn!(
                "[{:.9}] {} CRC5 mismatch over {:02x?}",
                packet.start_time(),
                packet.pid_name().unwrap_or("?"),
                packet.payload()
            );
        }

        match parse(specs, packet.payload()) {
            Ok(fields) => packet.fields = Some(fields),
            Err(e) => warn!(
                "[{:.9}] {} fields not decoded: {}",
                packet.start_time(),
                packet.pid_name().unwrap_or("?"),
                e
            ),
        }
    }
}
