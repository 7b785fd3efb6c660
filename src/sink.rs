//! Human readable dump of decoded packets.

use std::fmt;

use colored::Colorize;
use itertools::Itertools;

use crate::usb::{Fields, Packet};

/// `[INVALID 0.000012345 SETUP 3 bytes CRC OK]`
pub struct Header<'a>(pub &'a Packet);

impl fmt::Display for Header<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packet = self.0;
        f.write_str("[")?;
        if packet.is_invalid {
            f.write_str("INVALID ")?;
        }
        write!(f, "{:.9} ", packet.start_time())?;
        match (packet.is_keep_alive, packet.pid_name(), packet.pid) {
            (true, _, _) => f.write_str("KEEP-ALIVE")?,
            (false, Some(name), _) => f.write_str(name)?,
            (false, None, Some(pid)) => write!(f, "PID {:#x}", pid)?,
            (false, None, None) => f.write_str("?")?,
        }
        write!(f, " {} bytes", packet.bytes.len())?;
        if let (Some(crc), Some(expected)) = (packet.crc, packet.crc_expected) {
            if crc == expected {
                f.write_str(" CRC OK")?;
            } else {
                write!(f, " CRC ERR {:04x}/{:04x}", crc, expected)?;
            }
        }
        f.write_str("]")
    }
}

/// Eight bytes per row followed by their printable characters.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, chunk) in self.0.chunks(8).enumerate() {
            if row != 0 {
                f.write_str("\n")?;
            }
            write!(f, "{:02x}: ", row * 8)?;
            for i in 0..8 {
                if i == 4 {
                    f.write_str(" ")?;
                }
                match chunk.get(i) {
                    Some(byte) => write!(f, "{:02x} ", byte)?,
                    None => f.write_str(".. ")?,
                }
            }
            let ascii: String = chunk
                .iter()
                .map(|&b| match b {
                    0x20..=0x7e => b as char,
                    _ => '.',
                })
                .collect();
            write!(f, " |{}|", ascii)?;
        }
        Ok(())
    }
}

pub struct FieldList<'a>(pub &'a Fields);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self.0.iter().map(|field| {
            let symbol = field.symbol.map(|s| format!(" {}", s)).unwrap_or_default();
            format!(
                "  {}: {:#x}{} ({})",
                field.name, field.raw, symbol, field.description
            )
        });
        write!(f, "{}", lines.format("\n"))
    }
}

/// Nibbles as a row of four LEDs, LSB first, low nibble of each byte first.
pub struct DebugLeds<'a>(pub &'a [u8]);

impl fmt::Display for DebugLeds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nibbles = self
            .0
            .iter()
            .flat_map(|&byte| vec![byte & 0xf, byte >> 4])
            .enumerate()
            .map(|(idx, nibble)| {
                let leds: String = (0..4)
                    .map(|i| if nibble & (1 << i) != 0 { '*' } else { '.' })
                    .collect();
                format!("{:3}.  {}", idx, leds)
            });
        write!(f, "{}", nibbles.format("\n"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    pub dbg_leds: bool,
}

/// Prints every packet it pulls from the inner iterator.
pub struct PrintSink<T> {
    inner: T,
    options: DumpOptions,
}

impl<T> PrintSink<T> {
    pub fn new(inner: T, options: DumpOptions) -> Self {
        Self { inner, options }
    }
}

impl<'a, T: Iterator<Item = &'a Packet>> Iterator for PrintSink<T> {
    type Item = ();
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|packet| {
            let header = Header(packet).to_string();
            if packet.is_invalid {
                println!("\n{}", header.red().bold());
            } else {
                println!("\n{}", header.bold());
            }
            if !packet.bytes.is_empty() {
                println!("{}", HexDump(&packet.bytes));
            }
            if let Some(fields) = packet.fields.as_ref().filter(|f| !f.is_empty()) {
                println!("{}", FieldList(fields));
            }
            if self.options.dbg_leds && !packet.bytes.is_empty() {
                println!("Debug LEDs sequence:");
                println!("{}", DebugLeds(&packet.bytes));
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::usb::test_util::{Level, TraceWriter};
    use crate::usb::{decode, BusConfig};

    #[test]
    fn hex_dump_layout() {
        assert_eq!(HexDump(&[]).to_string(), "");
        assert_eq!(
            HexDump(&[0x41, 0x42, 0x00]).to_string(),
            "00: 41 42 00 ..  .. .. .. ..  |AB.|"
        );

        let data: Vec<u8> = (0x30..0x3a).collect();
        assert_eq!(
            HexDump(&data).to_string(),
            "00: 30 31 32 33  34 35 36 37  |01234567|\n\
             08: 38 39 .. ..  .. .. .. ..  |89|"
        );
    }

    #[test]
    fn debug_leds() {
        assert_eq!(
            DebugLeds(&[0x81, 0x0f]).to_string(),
            "  0.  *...\n  1.  ...*\n  2.  ****\n  3.  ...."
        );
    }

    #[test]
    fn headers() {
        let mut trace = TraceWriter::new();
        trace.idle(10);
        trace.packet(&[0xD2]);
        trace.idle(10);
        trace.packet(&[0xC3, 0x01, 0x02, 0x00, 0x00]);
        trace.idle(10);
        trace.hold(Level::SE0, 2);
        trace.idle(10);
        let packets = decode(&trace.samples(), &BusConfig::default()).unwrap();
        assert_eq!(packets.len(), 3);

        let ack = Header(&packets[0]).to_string();
        assert!(ack.starts_with("[0.0000"), "{}", ack);
        assert!(ack.ends_with(" ACK 1 bytes]"), "{}", ack);

        let data = Header(&packets[1]).to_string();
        assert!(data.starts_with("[INVALID "), "{}", data);
        let crc = packets[1].crc_expected.unwrap();
        assert!(
            data.ends_with(&format!(" DATA0 5 bytes CRC ERR 0000/{:04x}]", crc)),
            "{}",
            data
        );

        let keep_alive = Header(&packets[2]).to_string();
        assert!(keep_alive.ends_with(" KEEP-ALIVE 0 bytes]"), "{}", keep_alive);
    }

    #[test]
    fn field_list_follows_declaration_order() {
        let mut trace = TraceWriter::new();
        trace.idle(10);
        trace.packet(&[0xE1, 0x15, 0x19]);
        trace.idle(10);
        let packets = decode(&trace.samples(), &BusConfig::default()).unwrap();
        let fields = packets[0].fields.as_ref().unwrap();
        let text = FieldList(fields).to_string();
        let names: Vec<_> = text
            .lines()
            .map(|l| l.trim().split(':').next().unwrap())
            .collect();
        assert_eq!(names, ["ADDR", "ENDP", "CRC5"]);
        assert!(text.contains("ADDR: 0x15"), "{}", text);
    }
}
