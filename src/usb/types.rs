use std::convert::TryFrom;

/// Packet identifiers, USB 2.0 table 8-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pid {
    Out,
    In,
    Sof,
    Setup,
    Data0,
    Data1,
    Data2,
    MData,
    Ack,
    Nak,
    Stall,
    NYet,
    Pre,
    Split,
    Ping,
}

impl TryFrom<u8> for Pid {
    type Error = u8;
    fn try_from(pid: u8) -> Result<Self, Self::Error> {
        Ok(match pid {
            0b0001 => Pid::Out,
            0b1001 => Pid::In,
            0b0101 => Pid::Sof,
            0b1101 => Pid::Setup,
            0b0011 => Pid::Data0,
            0b1011 => Pid::Data1,
            0b0111 => Pid::Data2,
            0b1111 => Pid::MData,
            0b0010 => Pid::Ack,
            0b1010 => Pid::Nak,
            0b1110 => Pid::Stall,
            0b0110 => Pid::NYet,
            0b1100 => Pid::Pre,
            0b1000 => Pid::Split,
            0b0100 => Pid::Ping,
            _ => return Err(pid),
        })
    }
}

impl Pid {
    pub fn name(self) -> &'static str {
        match self {
            Pid::Out => "OUT",
            Pid::In => "IN",
            Pid::Sof => "SOF",
            Pid::Setup => "SETUP",
            Pid::Data0 => "DATA0",
            Pid::Data1 => "DATA1",
            Pid::Data2 => "DATA2",
            Pid::MData => "MDATA",
            Pid::Ack => "ACK",
            Pid::Nak => "NAK",
            Pid::Stall => "STALL",
            Pid::NYet => "NYET",
            Pid::Pre => "PRE",
            Pid::Split => "SPLIT",
            Pid::Ping => "PING",
        }
    }

    pub fn is_data(self) -> bool {
        matches!(self, Pid::Data0 | Pid::Data1 | Pid::Data2 | Pid::MData)
    }
}

/// The high nibble of a PID byte must be the complement of the low one.
pub fn pid_check(byte: u8) -> bool {
    (byte & 0x0F) ^ (byte >> 4) == 0x0F
}

/// Checks the CRC5 protecting the 11 bits of a token.
///
/// `v` holds the two bytes following the PID, CRC included. An intact token
/// leaves the residual 0b01100 in the register.
pub fn crc5_check(v: &[u8]) -> bool {
    let mut acc = 0x1F;
    for b in v {
        let mut b = *b;
        for _ in 0..8 {
            let do_xor = (b & 1) != ((acc >> 4) & 1);
            acc <<= 1;
            if do_xor {
                acc ^= 5
            }
            acc &= 0x1F;
            b >>= 1;
        }
    }
    acc == 0x0C
}

/// CRC16 of a data payload, returned in the order its two bytes travel on the
/// bus, i.e. comparable with `(trailer[0] << 8) | trailer[1]`.
///
/// This is the byte-wise parity formulation used by AVR firmware rather than a
/// bit-by-bit shift of the 0x8005 polynomial, so that both can be checked
/// against each other.
pub fn crc16(v: &[u8]) -> u16 {
    let mut resid: u16 = 0xFFFF;
    for &b in v {
        let mut x = (u16::from(b) ^ resid) & 0xFF;

        let mut parity = x ^ (x >> 4);
        parity ^= parity >> 2;
        parity = (parity ^ (parity >> 1)) & 1;

        x = (x << 6) ^ (x << 7);
        if parity != 0 {
            x ^= 0xC001;
        }
        resid = x ^ (resid >> 8);
    }
    (!resid).swap_bytes()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    // Reference implementation: reflected 0x8005, init 0xFFFF, final complement.
    fn crc16_bitwise(v: &[u8]) -> u16 {
        let mut acc: u16 = 0xFFFF;
        for &b in v {
            acc ^= u16::from(b);
            for _ in 0..8 {
                acc = if acc & 1 == 1 { (acc >> 1) ^ 0xA001 } else { acc >> 1 };
            }
        }
        !acc
    }

    #[test]
    fn crc16_of_nothing_is_zero() {
        assert_eq!(crc16(&[]), 0x0000);
    }

    #[test]
    fn crc16_matches_captured_setup_stages() {
        // GET_DESCRIPTOR(Device, 64)
        assert_eq!(crc16(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]), 0xDD94);
        // SET_ADDRESS(1)
        assert_eq!(crc16(&[0x00, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]), 0xEB25);
        // SET_CONFIGURATION(1)
        assert_eq!(crc16(&[0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]), 0x2725);
    }

    #[test]
    fn crc16_agrees_with_bitwise_polynomial() {
        assert_eq!(crc16_bitwise(b"123456789"), 0xB4C8);
        for payload in [
            &b"123456789"[..],
            &[0x12, 0x01, 0x10, 0x01, 0x00, 0x00, 0x00, 0x08],
            &[0xFF; 8],
            &[0x00],
        ]
        .iter()
        {
            assert_eq!(crc16(payload), crc16_bitwise(payload).swap_bytes());
        }
    }

    #[test]
    fn crc5_accepts_intact_tokens() {
        // SETUP/OUT/IN to address 0 endpoint 0
        assert!(crc5_check(&[0x00, 0x10]));
        // address 0x15 endpoint 2
        assert!(crc5_check(&[0x15, 0x19]));
        // address 0x7F endpoint 15
        assert!(crc5_check(&[0xFF, 0x47]));
        assert!(!crc5_check(&[0x00, 0x18]));
        assert!(!crc5_check(&[0x01, 0x10]));
    }

    #[test]
    fn every_pid_validates_with_its_complement() {
        for pid in 0u8..16 {
            let byte = pid | ((!pid & 0x0F) << 4);
            assert!(pid_check(byte), "{:#04x}", byte);
            for bit in 4..8 {
                assert!(!pid_check(byte ^ (1 << bit)), "{:#04x} ^ bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn pid_table() {
        assert_eq!(Pid::try_from(0b0001), Ok(Pid::Out));
        assert_eq!(Pid::try_from(0b1101).map(Pid::name), Ok("SETUP"));
        assert_eq!(Pid::try_from(0b1010).map(Pid::name), Ok("NAK"));
        assert_eq!(Pid::try_from(0b0000), Err(0));
        let data: Vec<_> = (0u8..16)
            .filter_map(|p| Pid::try_from(p).ok())
            .filter(|p| p.is_data())
            .collect();
        assert_eq!(data, vec![Pid::Data0, Pid::Data2, Pid::Data1, Pid::MData]);
    }
}
