/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! VISA style USB resource addresses

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// USB vendor and product ids of Rigol instruments
pub mod ids {
    pub const RIGOL: u16 = 0x1ab1;
    pub const DS2000A: u16 = 0x04b0;
    pub const DS1000Z: u16 = 0x04ce;
    /// Shared by the DG1000 generators and the DS1000E scopes
    pub const DG1000: u16 = 0x0588;
    pub const DS1000E: u16 = DG1000;
}

/// Default discovery expression, every USB instrument
pub const USB_INSTR_PATTERN: &str = "USB?*::INSTR";

/// What sort of instrument sits behind a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentKind {
    Oscilloscope,
    FunctionGenerator,
    Unknown,
}

impl InstrumentKind {
    /// Rigol serial numbers start with the model family
    pub fn from_serial(serial: &str) -> InstrumentKind {
        Self::from_model(serial)
    }

    pub fn from_model(model: &str) -> InstrumentKind {
        let model = model.trim().to_ascii_uppercase();
        if model.starts_with("DS") || model.starts_with("MSO") {
            InstrumentKind::Oscilloscope
        } else if model.starts_with("DG") {
            InstrumentKind::FunctionGenerator
        } else {
            InstrumentKind::Unknown
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            InstrumentKind::Oscilloscope => "oscilloscope",
            InstrumentKind::FunctionGenerator => "function generator",
            InstrumentKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Address of a USB instrument, `USB0::0x1AB1::0x04B0::DS2A000000001::INSTR`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceString {
    pub board: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: String,
    pub interface: Option<u8>,
}

impl ResourceString {
    pub fn new(vendor_id: u16, product_id: u16, serial: &str) -> ResourceString {
        ResourceString {
            board: 0,
            vendor_id,
            product_id,
            serial: serial.to_string(),
            interface: None,
        }
    }

    /// Whether this resource is the given vendor / product pair
    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    pub fn kind(&self) -> InstrumentKind {
        InstrumentKind::from_serial(&self.serial)
    }

    /// DS1000E scopes speak the older command set without a waveform preamble
    pub fn is_legacy_scope(&self) -> bool {
        self.matches_ids(ids::RIGOL, ids::DS1000E) && self.kind() == InstrumentKind::Oscilloscope
    }
}

/// Parse a vendor or product id written in hex (`0x1AB1`) or decimal (`6833`)
pub fn parse_id(s: &str) -> Result<u16, Error> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|_| Error::InvalidResource(s.to_string()))
}

impl FromStr for ResourceString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidResource(s.to_string());
        let fields: Vec<&str> = s.trim().split("::").collect();

        if fields.len() != 5 && fields.len() != 6 {
            return Err(invalid());
        }

        let head = fields[0];
        let board_digits = match head.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("USB") => &head[3..],
            _ => return Err(invalid()),
        };
        let board = match board_digits {
            "" => 0,
            digits => digits.parse().map_err(|_| invalid())?,
        };

        if !fields[fields.len() - 1].eq_ignore_ascii_case("INSTR") {
            return Err(invalid());
        }

        let serial = fields[3];
        if serial.is_empty() {
            return Err(invalid());
        }

        let interface = match fields.len() {
            6 => Some(fields[4].parse().map_err(|_| invalid())?),
            _ => None,
        };

        Ok(ResourceString {
            board,
            vendor_id: parse_id(fields[1])?,
            product_id: parse_id(fields[2])?,
            serial: serial.to_string(),
            interface,
        })
    }
}

impl fmt::Display for ResourceString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "USB{}::0x{:04X}::0x{:04X}::{}",
            self.board, self.vendor_id, self.product_id, self.serial
        )?;
        if let Some(iface) = self.interface {
            write!(f, "::{}", iface)?;
        }
        f.write_str("::INSTR")
    }
}

/// Match a VISA discovery expression: `?` is any one character, `*` any run
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_uppercase()).collect();
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_uppercase()).collect();

    let (mut p, mut t) = (0, 0);
    // last star seen in the pattern, and the text position it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, tried)) = backtrack {
            p = star + 1;
            t = tried + 1;
            backtrack = Some((star, tried + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
