/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! Frequency response of a circuit, driven by a generator and read by a scope
//!
//! The generator feeds the circuit input, which is probed on one scope channel
//! while the circuit output goes to another.

use std::time::Duration;

use log::{debug, info};

use crate::generator::{FunctionGenerator, VoltageUnit};
use crate::scope::{ChannelConfig, Coupling, EdgeTrigger, Measurement, Oscilloscope, Sweep};
use crate::transport::Transport;
use crate::Error;

#[derive(Clone, Debug)]
pub struct BodeConfig {
    pub frequencies: Vec<f64>,
    /// Generator amplitude, volts peak-to-peak
    pub amplitude: f64,
    pub probe: u32,
    pub input_channel: u8,
    pub output_channel: u8,
    /// Wait after changing the generator frequency
    pub settle: Duration,
    /// Wait for the scope to acquire after a timebase change, below 10 Hz
    pub acquire_slow: Duration,
    pub acquire: Duration,
    /// Wait after changing the output channel scale
    pub rescale: Duration,
    pub poll_interval: Duration,
    pub max_polls: usize,
    /// The sweep ends once the output falls below this amplitude
    pub min_output_vpp: f64,
}

impl Default for BodeConfig {
    fn default() -> Self {
        BodeConfig {
            frequencies: vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0],
            amplitude: 5.0,
            probe: 10,
            input_channel: 1,
            output_channel: 2,
            settle: Duration::from_secs(1),
            acquire_slow: Duration::from_secs(5),
            acquire: Duration::from_secs(3),
            rescale: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            max_polls: 20,
            min_output_vpp: 0.1,
        }
    }
}

/// One point of the response
#[derive(Clone, Debug, PartialEq)]
pub struct BodePoint {
    /// Frequency measured on the input channel
    pub frequency: f64,
    /// Vpp(output) / Vpp(input)
    pub gain: f64,
    /// Output phase relative to the input, degrees
    pub phase: f64,
}

/// Vertical scale for the output channel given its current amplitude
pub fn select_vertical_scale(vpp: f64) -> f64 {
    if vpp < 0.1 {
        0.02
    } else if vpp < 0.2 {
        0.05
    } else if vpp < 0.5 {
        0.1
    } else {
        1.0
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

/// Repeat a measurement until the instrument has a valid value
fn poll<F>(config: &BodeConfig, mut measure: F) -> Result<f64, Error>
where
    F: FnMut() -> Result<Option<f64>, Error>,
{
    for _ in 0..config.max_polls {
        if let Some(value) = measure()? {
            return Ok(value);
        }
        debug!("no valid measurement yet");
        pause(config.poll_interval);
    }
    Err(Error::Timeout)
}

/// Put both instruments in a known state for the sweep
pub fn setup<G: Transport, S: Transport>(
    dg: &mut FunctionGenerator<G>,
    ds: &mut Oscilloscope<S>,
    config: &BodeConfig,
) -> Result<(), Error> {
    dg.remote()?;
    dg.set_voltage_unit(VoltageUnit::Vpp)?;
    let start = config.frequencies.first().copied().unwrap_or(10.0);
    dg.apply_sine(start, config.amplitude, 0.0)?;
    dg.set_phase(0.0)?;
    dg.output(true)?;

    ds.remote()?;
    ds.run()?;
    ds.clear_measurements()?;
    ds.set_timebase_scale(0.01)?;
    ds.set_edge_trigger(&EdgeTrigger {
        source: config.input_channel,
        sweep: Sweep::Auto,
        ..Default::default()
    })?;
    ds.set_averaging(8)?;

    for channel in [config.input_channel, config.output_channel] {
        ds.configure_channel(
            channel,
            &ChannelConfig {
                probe: config.probe,
                coupling: Coupling::Ac,
                ..Default::default()
            },
        )?;
        ds.enable_measurement(Measurement::Frequency, channel)?;
        ds.enable_measurement(Measurement::Period, channel)?;
        ds.enable_measurement(Measurement::Vpp, channel)?;
    }

    ds.set_phase_sources(config.input_channel, config.output_channel)
}

/// Step through the configured frequencies, stops early once the output is too small
pub fn run<G: Transport, S: Transport>(
    dg: &mut FunctionGenerator<G>,
    ds: &mut Oscilloscope<S>,
    config: &BodeConfig,
) -> Result<Vec<BodePoint>, Error> {
    let (input, output) = (config.input_channel, config.output_channel);
    let mut points = Vec::with_capacity(config.frequencies.len());

    for &frequency in &config.frequencies {
        dg.set_frequency(frequency)?;
        pause(config.settle);

        // two periods on screen
        ds.set_timebase_scale(0.5 / frequency)?;
        pause(if frequency < 10.0 {
            config.acquire_slow
        } else {
            config.acquire
        });

        let measured = poll(config, || ds.measure(Measurement::Frequency, input))?;

        let vpp_out = ds.measure(Measurement::Vpp, output)?.unwrap_or(0.0);
        ds.set_channel_scale(output, select_vertical_scale(vpp_out))?;
        pause(config.rescale);

        let vpp_out = ds.measure(Measurement::Vpp, output)?.unwrap_or(0.0);
        if vpp_out < config.min_output_vpp {
            info!("output below {} V at {} Hz, stopping", config.min_output_vpp, frequency);
            break;
        }
        let vpp_in = poll(config, || ds.measure(Measurement::Vpp, input))?;

        let phase = poll(config, || ds.measure_phase(input, output))?;

        let point = BodePoint {
            frequency: measured,
            gain: vpp_out / vpp_in,
            phase: -phase,
        };
        info!(
            "{:.1} Hz: gain {:.3}, phase {:.1} deg",
            point.frequency, point.gain, point.phase
        );
        points.push(point);
    }

    Ok(points)
}
