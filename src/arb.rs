/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! Arbitrary waveforms as 14-bit DAC codes

use std::f64::consts::PI;

use crate::Error;

pub const DAC_MAX: u16 = 16383;
const DAC_MID: f64 = 8192.0;
const DAC_AMPLITUDE: f64 = 8191.0;

/// One period of DAC codes for the generator's volatile memory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbWaveform {
    samples: Vec<u16>,
}

fn dac(value: f64) -> u16 {
    // codes are truncated, not rounded
    value.clamp(0.0, f64::from(DAC_MAX)) as u16
}

fn normalized_sinc(t: f64) -> f64 {
    if t == 0.0 {
        1.0
    } else {
        (PI * t).sin() / (PI * t)
    }
}

impl ArbWaveform {
    pub fn from_samples(samples: Vec<u16>) -> Result<ArbWaveform, Error> {
        if samples.is_empty() {
            return Err(Error::InvalidResponse("empty waveform".to_string()));
        }
        if let Some(s) = samples.iter().find(|&&s| s > DAC_MAX) {
            return Err(Error::InvalidResponse(format!(
                "DAC code {} above {}",
                s, DAC_MAX
            )));
        }
        Ok(ArbWaveform { samples })
    }

    /// Full sine period, 512 points
    pub fn sine() -> ArbWaveform {
        let n = 512;
        let samples = (-n / 2..n / 2)
            .map(|i| dac(DAC_AMPLITUDE * (2.0 * PI * f64::from(i) / f64::from(n)).sin() + DAC_MID))
            .collect();
        ArbWaveform { samples }
    }

    /// Rectified sine, 512 points
    pub fn half_wave_sine() -> ArbWaveform {
        let n = 512;
        let samples = (-n / 2..n / 2)
            .map(|i| dac(DAC_AMPLITUDE * (PI * f64::from(i) / f64::from(n)).sin().abs() + DAC_MID))
            .collect();
        ArbWaveform { samples }
    }

    /// Square wave, high for the first `duty` fraction of 1024 points
    pub fn square(duty: f64) -> ArbWaveform {
        let n = 1024;
        let samples = (0..n)
            .map(|i| if f64::from(i) < duty * f64::from(n) { DAC_MAX } else { 0 })
            .collect();
        ArbWaveform { samples }
    }

    /// Rising ramp, 2048 points
    pub fn sawtooth() -> ArbWaveform {
        let n = 2048;
        let samples = (0..n)
            .map(|i| dac(f64::from(DAC_MAX) * f64::from(i) / f64::from(n)))
            .collect();
        ArbWaveform { samples }
    }

    /// sin(x)/x pulse centred in 1024 points
    pub fn sinc() -> ArbWaveform {
        let n = 512;
        let k = 2.0;
        let samples = (-n..n)
            .map(|i| {
                let t = PI * k * f64::from(i) / f64::from(n);
                dac(DAC_AMPLITUDE * normalized_sinc(t) + DAC_MID)
            })
            .collect();
        ArbWaveform { samples }
    }

    /// Cosine under a symmetric exponential envelope, 512 points
    pub fn exp_cos() -> ArbWaveform {
        let n = 256;
        let k = 4.0;
        let samples = (-n..n)
            .map(|i| {
                let x = k * f64::from(i);
                let envelope = (-x.abs() / f64::from(n)).exp();
                dac(DAC_AMPLITUDE * envelope * (PI * x / f64::from(n)).cos() + DAC_MID)
            })
            .collect();
        ArbWaveform { samples }
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Comma separated codes as `DATA:DAC` expects them
    pub fn to_dac_list(&self) -> String {
        self.samples
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
