/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! IEEE 488.2 common commands

use std::fmt;
use std::str::FromStr;

use crate::resource::InstrumentKind;
use crate::Error;

pub const RST: &str = "*RST";
pub const IDN: &str = "*IDN?";
pub const CLS: &str = "*CLS";

/// Answer to `*IDN?`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    pub fn kind(&self) -> InstrumentKind {
        InstrumentKind::from_model(&self.model)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(Error::InvalidResponse(format!("not an identification: '{}'", s)));
        }

        // some firmwares put an empty field before the version
        let firmware = fields[3..]
            .iter()
            .filter(|f| !f.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(",");

        Ok(Identity {
            manufacturer: fields[0].to_string(),
            model: fields[1].to_string(),
            serial: fields[2].to_string(),
            firmware,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}, {}, {} ({})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}
