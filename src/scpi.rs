/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! Decoding of SCPI responses

use crate::Error;

/// Rigol answers `9.9E37` when a measurement has no valid value
pub const INVALID_THRESHOLD: f64 = 1e37;

pub fn parse_f64(response: &str) -> Result<f64, Error> {
    Ok(response.trim().parse::<f64>()?)
}

/// A measured value, `None` when the instrument could not measure it
pub fn parse_reading(response: &str) -> Result<Option<f64>, Error> {
    let value = parse_f64(response)?;
    if value.abs() > INVALID_THRESHOLD {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Payload of an IEEE 488.2 arbitrary block, `#<n><length><data>`
///
/// The header `#0` marks an indefinite block which runs until the final newline.
pub fn parse_block(raw: &[u8]) -> Result<&[u8], Error> {
    let err = |msg: &str| Error::InvalidBlock(msg.to_string());

    if raw.first() != Some(&b'#') {
        return Err(err("missing '#'"));
    }

    let digits = match raw.get(1) {
        Some(d) if d.is_ascii_digit() => (d - b'0') as usize,
        _ => return Err(err("missing length digit count")),
    };

    if digits == 0 {
        let body = &raw[2..];
        return Ok(body.strip_suffix(b"\n").unwrap_or(body));
    }

    let len_field = raw
        .get(2..2 + digits)
        .ok_or_else(|| err("truncated length field"))?;
    let len: usize = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| err("length field is not a number"))?;

    let start = 2 + digits;
    raw.get(start..start + len).ok_or_else(|| {
        Error::InvalidBlock(format!(
            "expected {} bytes, got {}",
            len,
            raw.len().saturating_sub(start)
        ))
    })
}

/// Split a comma separated response into trimmed fields
pub fn fields(response: &str) -> Vec<&str> {
    response.trim().split(',').map(str::trim).collect()
}
