/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! SCPI commands of the Rigol DS1000Z / DS2000A oscilloscopes, and the DS1000E capture

use std::fmt;
use std::io::Write;
use std::time::Duration;

use log::{debug, info};

use crate::scpi;
use crate::session::Session;
use crate::transport::Transport;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
    Gnd,
}

impl Coupling {
    fn as_scpi(self) -> &'static str {
        match self {
            Coupling::Ac => "AC",
            Coupling::Dc => "DC",
            Coupling::Gnd => "GND",
        }
    }
}

/// Vertical settings of one analog channel
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    /// Probe attenuation ratio, 1 or 10 usually
    pub probe: u32,
    pub coupling: Coupling,
    /// Volts per division
    pub scale: f64,
    /// Vertical offset in volts
    pub offset: f64,
    pub display: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            probe: 10,
            coupling: Coupling::Dc,
            scale: 1.0,
            offset: 0.0,
            display: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slope {
    Positive,
    Negative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sweep {
    Auto,
    Normal,
    Single,
}

impl Sweep {
    fn as_scpi(self) -> &'static str {
        match self {
            Sweep::Auto => "AUTO",
            Sweep::Normal => "NORM",
            Sweep::Single => "SING",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EdgeTrigger {
    pub source: u8,
    /// Trigger level in volts
    pub level: f64,
    pub slope: Slope,
    pub sweep: Sweep,
}

impl Default for EdgeTrigger {
    fn default() -> Self {
        EdgeTrigger {
            source: 1,
            level: 0.0,
            slope: Slope::Positive,
            sweep: Sweep::Auto,
        }
    }
}

/// Answer to `:TRIG:STAT?`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerStatus {
    Triggered,
    Wait,
    Run,
    Auto,
    Stop,
}

impl std::str::FromStr for TriggerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "TD" => Ok(TriggerStatus::Triggered),
            "WAIT" => Ok(TriggerStatus::Wait),
            "RUN" => Ok(TriggerStatus::Run),
            "AUTO" => Ok(TriggerStatus::Auto),
            "STOP" => Ok(TriggerStatus::Stop),
            other => Err(Error::InvalidResponse(format!("trigger status '{}'", other))),
        }
    }
}

/// Automatic measurements with a per channel source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measurement {
    Frequency,
    Period,
    Vpp,
}

impl Measurement {
    fn as_scpi(self) -> &'static str {
        match self {
            Measurement::Frequency => "FREQ",
            Measurement::Period => "PER",
            Measurement::Vpp => "VPP",
        }
    }
}

/// Scaling parameters returned by `:WAV:PRE?`
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformPreamble {
    pub format: u8,
    pub kind: u8,
    pub points: usize,
    pub count: u32,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

impl std::str::FromStr for WaveformPreamble {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = scpi::fields(s);
        if fields.len() != 10 {
            return Err(Error::InvalidResponse(format!(
                "waveform preamble has {} fields, expected 10",
                fields.len()
            )));
        }

        let int = |field: &str| -> Result<u64, Error> {
            // some firmwares send integers as floats
            let value = scpi::parse_f64(field)?;
            Ok(value as u64)
        };

        Ok(WaveformPreamble {
            format: int(fields[0])? as u8,
            kind: int(fields[1])? as u8,
            points: int(fields[2])? as usize,
            count: int(fields[3])? as u32,
            x_increment: scpi::parse_f64(fields[4])?,
            x_origin: scpi::parse_f64(fields[5])?,
            x_reference: scpi::parse_f64(fields[6])?,
            y_increment: scpi::parse_f64(fields[7])?,
            y_origin: scpi::parse_f64(fields[8])?,
            y_reference: scpi::parse_f64(fields[9])?,
        })
    }
}

/// Samples read from the instrument together with their scaling
#[derive(Clone, Debug)]
pub struct Waveform {
    pub channel: u8,
    pub preamble: WaveformPreamble,
    pub samples: Vec<u8>,
}

impl Waveform {
    /// Sample values in volts
    pub fn voltages(&self) -> Vec<f64> {
        let p = &self.preamble;
        self.samples
            .iter()
            .map(|&s| (f64::from(s) - p.y_reference - p.y_origin) * p.y_increment)
            .collect()
    }

    /// Time of each sample in seconds, relative to the trigger
    pub fn times(&self) -> Vec<f64> {
        let p = &self.preamble;
        (0..self.samples.len())
            .map(|i| (i as f64 - p.x_reference) * p.x_increment + p.x_origin)
            .collect()
    }

    /// Write `time,voltage` rows, time scaled to a readable unit
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), Error> {
        write_trace(out, self.channel, &self.times(), &self.voltages())
    }
}

fn write_trace<W: Write>(mut out: W, channel: u8, times: &[f64], voltages: &[f64]) -> Result<(), Error> {
    let unit = TimeUnit::for_span(times.last().copied().unwrap_or(0.0));

    writeln!(out, "time [{}],CH{} [V]", unit, channel)?;
    for (t, v) in times.iter().zip(voltages) {
        writeln!(out, "{:e},{:e}", unit.scale(*t), v)?;
    }
    Ok(())
}

/// Byte to volts for the older DS1000E series, which has no preamble
pub fn legacy_voltage(sample: u8, volts_per_div: f64, offset: f64) -> f64 {
    (240.0 - f64::from(sample)) * (volts_per_div / 25.0) - (offset + volts_per_div * 4.6)
}

/// DS1000E samples with the settings they were taken with
#[derive(Clone, Debug)]
pub struct LegacyWaveform {
    pub channel: u8,
    pub volts_per_div: f64,
    /// Vertical offset in volts
    pub offset: f64,
    /// Horizontal offset in seconds
    pub time_offset: f64,
    /// Samples per second
    pub sample_rate: f64,
    pub samples: Vec<u8>,
}

impl LegacyWaveform {
    pub fn voltages(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|&s| legacy_voltage(s, self.volts_per_div, self.offset))
            .collect()
    }

    /// Sample times in seconds, centered on the horizontal offset
    pub fn times(&self) -> Vec<f64> {
        let n = self.samples.len();
        let half_span = n as f64 / 2.0 / self.sample_rate;
        let start = self.time_offset - half_span;
        if n < 2 {
            return vec![start; n];
        }

        let step = 2.0 * half_span / (n - 1) as f64;
        (0..n).map(|i| start + i as f64 * step).collect()
    }

    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), Error> {
        write_trace(out, self.channel, &self.times(), &self.voltages())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
}

impl TimeUnit {
    /// Unit to print a time axis ending at `end` seconds
    pub fn for_span(end: f64) -> TimeUnit {
        if end < 1e-3 {
            TimeUnit::Microseconds
        } else if end < 1.0 {
            TimeUnit::Milliseconds
        } else {
            TimeUnit::Seconds
        }
    }

    pub fn scale(self, seconds: f64) -> f64 {
        match self {
            TimeUnit::Seconds => seconds,
            TimeUnit::Milliseconds => seconds * 1e3,
            TimeUnit::Microseconds => seconds * 1e6,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Microseconds => "us",
        })
    }
}

/// Rigol oscilloscope on top of a session
pub struct Oscilloscope<T: Transport> {
    session: Session<T>,
    poll_interval: Duration,
    max_polls: usize,
}

impl<T: Transport> Oscilloscope<T> {
    pub fn new(session: Session<T>) -> Oscilloscope<T> {
        Oscilloscope {
            session,
            poll_interval: Duration::from_millis(500),
            max_polls: 120,
        }
    }

    /// How often and how long to wait for trigger and waveform states
    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    pub fn session(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<T> {
        self.session
    }

    fn sleep(&self) {
        if !self.poll_interval.is_zero() {
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Take the front panel out of local mode
    pub fn remote(&mut self) -> Result<(), Error> {
        self.session.write(":SYST:REM")
    }

    pub fn local(&mut self) -> Result<(), Error> {
        self.session.write(":SYST:LOC")
    }

    pub fn run(&mut self) -> Result<(), Error> {
        self.session.write(":RUN")
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        self.session.write(":STOP")
    }

    pub fn single(&mut self) -> Result<(), Error> {
        self.set_sweep(Sweep::Single)
    }

    pub fn autoscale(&mut self) -> Result<(), Error> {
        self.session.write(":SYST:AUT ON")
    }

    pub fn configure_channel(&mut self, channel: u8, config: &ChannelConfig) -> Result<(), Error> {
        debug!("CHAN{}: {:?}", channel, config);
        self.session.write(&format!(":CHAN{}:PROB {}", channel, config.probe))?;
        self.session.write(&format!(":CHAN{}:COUP {}", channel, config.coupling.as_scpi()))?;
        self.session.write(&format!(":CHAN{}:SCAL {:.3e}", channel, config.scale))?;
        self.session.write(&format!(":CHAN{}:OFFS {:.3e}", channel, config.offset))?;
        self.set_display(channel, config.display)
    }

    pub fn set_display(&mut self, channel: u8, on: bool) -> Result<(), Error> {
        let state = if on { "ON" } else { "OFF" };
        self.session.write(&format!(":CHAN{}:DISP {}", channel, state))
    }

    pub fn set_channel_scale(&mut self, channel: u8, volts_per_div: f64) -> Result<(), Error> {
        self.session.write(&format!(":CHAN{}:SCAL {:.3e}", channel, volts_per_div))
    }

    pub fn channel_scale(&mut self, channel: u8) -> Result<f64, Error> {
        self.session.query_f64(&format!(":CHAN{}:SCAL?", channel))
    }

    pub fn channel_offset(&mut self, channel: u8) -> Result<f64, Error> {
        self.session.query_f64(&format!(":CHAN{}:OFFS?", channel))
    }

    pub fn set_timebase_scale(&mut self, seconds_per_div: f64) -> Result<(), Error> {
        self.session.write(&format!(":TIM:MAIN:SCAL {:.3e}", seconds_per_div))
    }

    pub fn set_timebase_offset(&mut self, seconds: f64) -> Result<(), Error> {
        self.session.write(&format!(":TIM:MAIN:OFFS {:.3e}", seconds))
    }

    pub fn timebase_scale(&mut self) -> Result<f64, Error> {
        self.session.query_f64(":TIM:MAIN:SCAL?")
    }

    pub fn timebase_offset(&mut self) -> Result<f64, Error> {
        self.session.query_f64(":TIM:MAIN:OFFS?")
    }

    pub fn set_sweep(&mut self, sweep: Sweep) -> Result<(), Error> {
        self.session.write(&format!(":TRIG:SWE {}", sweep.as_scpi()))
    }

    pub fn set_edge_trigger(&mut self, trigger: &EdgeTrigger) -> Result<(), Error> {
        let slope = match trigger.slope {
            Slope::Positive => "POS",
            Slope::Negative => "NEG",
        };
        self.session.write(":TRIG:MODE EDGE")?;
        self.session.write(&format!(":TRIG:EDG:SOUR CHAN{}", trigger.source))?;
        self.session.write(&format!(":TRIG:EDG:LEV {:.3e}", trigger.level))?;
        self.session.write(&format!(":TRIG:EDG:SLOP {}", slope))?;
        self.set_sweep(trigger.sweep)
    }

    pub fn trigger_status(&mut self) -> Result<TriggerStatus, Error> {
        self.session.query(":TRIG:STAT?")?.parse()
    }

    /// Poll until a single acquisition has completed
    pub fn wait_for_stop(&mut self) -> Result<(), Error> {
        for _ in 0..self.max_polls {
            if self.trigger_status()? == TriggerStatus::Stop {
                return Ok(());
            }
            debug!("waiting for trigger");
            self.sleep();
        }
        Err(Error::Timeout)
    }

    /// Average `count` acquisitions, a power of two
    pub fn set_averaging(&mut self, count: u32) -> Result<(), Error> {
        self.session.write(":ACQ:TYP AVER")?;
        self.session.write(&format!(":ACQ:AVER {}", count))
    }

    pub fn set_memory_depth(&mut self, points: usize) -> Result<(), Error> {
        self.session.write(&format!(":ACQ:MDEP {}", points))
    }

    pub fn memory_depth(&mut self) -> Result<usize, Error> {
        Ok(self.session.query_f64(":ACQ:MDEP?")? as usize)
    }

    /// Samples per second
    pub fn sample_rate(&mut self) -> Result<f64, Error> {
        self.session.query_f64(":ACQ:SRAT?")
    }

    pub fn clear_measurements(&mut self) -> Result<(), Error> {
        self.session.write(":MEAS:CLE ALL")
    }

    /// Show a measurement on screen
    pub fn enable_measurement(&mut self, item: Measurement, channel: u8) -> Result<(), Error> {
        self.session.write(&format!(":MEAS:{} CHAN{}", item.as_scpi(), channel))
    }

    pub fn measure(&mut self, item: Measurement, channel: u8) -> Result<Option<f64>, Error> {
        self.session
            .query_reading(&format!(":MEAS:{}? CHAN{}", item.as_scpi(), channel))
    }

    /// Averaged peak-to-peak voltage from the statistics
    pub fn measure_vpp_average(&mut self, channel: u8) -> Result<Option<f64>, Error> {
        self.enable_measurement(Measurement::Vpp, channel)?;
        self.session
            .query_reading(&format!(":MEAS:VPP:SAV? CHAN{}", channel))
    }

    /// Sources of phase and delay measurements
    pub fn set_phase_sources(&mut self, a: u8, b: u8) -> Result<(), Error> {
        self.session.write(&format!(":MEAS:SET:PSA CHAN{}", a))?;
        self.session.write(&format!(":MEAS:SET:PSB CHAN{}", b))
    }

    /// Phase of `b` relative to `a`, rising edges, in degrees
    pub fn measure_phase(&mut self, a: u8, b: u8) -> Result<Option<f64>, Error> {
        self.session
            .query_reading(&format!(":MEAS:RPH? CHAN{},CHAN{}", a, b))
    }

    /// Average delay between the falling edges of `a` and `b`, in seconds
    pub fn measure_falling_delay(&mut self, a: u8, b: u8) -> Result<Option<f64>, Error> {
        self.session.write(&format!(":MEAS:FDEL CHAN{},CHAN{}", a, b))?;
        self.session.query_reading(":MEAS:FDEL:SAV?")
    }

    pub fn waveform_preamble(&mut self) -> Result<WaveformPreamble, Error> {
        self.session.query(":WAV:PRE?")?.parse()
    }

    /// Wait until the waveform reader is idle, returns the points it holds
    fn wait_waveform_idle(&mut self) -> Result<usize, Error> {
        for _ in 0..self.max_polls {
            let status = self.session.query(":WAV:STAT?")?;
            let fields = scpi::fields(&status);
            if fields.len() != 2 {
                return Err(Error::InvalidResponse(format!("waveform status '{}'", status)));
            }
            if fields[0] == "IDLE" {
                return Ok(scpi::parse_f64(fields[1])? as usize);
            }
            debug!("waveform reader {}, {} points", fields[0], fields[1]);
            self.sleep();
        }
        Err(Error::Timeout)
    }

    /// Read `points` raw samples of `channel` from acquisition memory
    ///
    /// The scope must be stopped; call [`Oscilloscope::wait_for_stop`] after a single trigger.
    pub fn capture(&mut self, channel: u8, points: usize) -> Result<Waveform, Error> {
        self.session.write(":WAV:MODE RAW")?;
        self.session.write(":WAV:FORM BYTE")?;
        self.session.write(&format!(":WAV:SOUR CHAN{}", channel))?;
        self.session.write(":WAV:STAR 1")?;
        self.session.write(&format!(":WAV:STOP {}", points))?;
        self.session.write(":WAV:RES")?;
        self.session.write(":WAV:BEG")?;

        let preamble = self.waveform_preamble()?;
        let ready = self.wait_waveform_idle()?;
        info!("reading {} of {} points from CHAN{}", ready, preamble.points, channel);

        let raw = self.session.query_raw(":WAV:DATA?")?;
        let samples = scpi::parse_block(&raw)?.to_vec();
        self.session.write(":WAV:END")?;

        Ok(Waveform {
            channel,
            preamble,
            samples,
        })
    }

    /// Single long-memory acquisition on a DS1000E, triggered by `channel`
    pub fn arm_legacy_single(&mut self, channel: u8, seconds_per_div: f64) -> Result<(), Error> {
        self.stop()?;
        self.session.write(&format!(":TIM:SCAL {:.3e}", seconds_per_div))?;
        self.session.write(":ACQ:MEMD LONG")?;
        self.session.write(":WAV:POIN:MODE RAW")?;
        self.session.write(":TRIG:MODE EDGE")?;
        self.session.write(&format!(":TRIG:EDGE:SOUR CHAN{}", channel))?;
        self.session.write(":TRIG:EDGE:SWE SING")?;
        self.run()
    }

    /// Read the whole memory of `channel` from a stopped DS1000E
    ///
    /// Hands the front panel back with `:KEY:FORCE` once the data is read.
    pub fn capture_legacy(&mut self, channel: u8) -> Result<LegacyWaveform, Error> {
        let sample_rate = self.session.query_f64(":ACQ:SAMP?")?;
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(Error::InvalidResponse(format!("sample rate {}", sample_rate)));
        }
        let time_offset = self.session.query_f64(":TIM:OFFS?")?;
        let volts_per_div = self.channel_scale(channel)?;
        let offset = self.channel_offset(channel)?;
        debug!(
            "CHAN{}: {} V/div, offset {} V, {} Sa/s, time offset {} s",
            channel, volts_per_div, offset, sample_rate, time_offset
        );

        self.session.write(":WAV:MODE RAW")?;
        self.session.write(":WAV:FORM BYTE")?;
        self.session.write(":WAV:POIN:MODE MAX")?;
        self.session.write(&format!(":WAV:SOUR CHAN{}", channel))?;
        self.session.write(":WAV:STAR 1")?;
        self.session.write(":WAV:RES")?;
        self.session.write(":WAV:BEG")?;

        let raw = self.session.query_raw(&format!(":WAV:DATA? CHAN{}", channel))?;
        let samples = scpi::parse_block(&raw)?.to_vec();
        info!("read {} points from CHAN{}", samples.len(), channel);
        self.session.write(":KEY:FORCE")?;

        Ok(LegacyWaveform {
            channel,
            volts_per_div,
            offset,
            time_offset,
            sample_rate,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    const PREAMBLE: &str = "0,2,1400000,1,1.000000e-09,-7.000000e-04,0,4.000000e-02,0,127\n";

    fn scope(mock: MockTransport) -> Oscilloscope<MockTransport> {
        Oscilloscope::new(mock.into_session()).with_polling(Duration::ZERO, 5)
    }

    #[test]
    fn channel_setup_commands() {
        let mut ds = scope(MockTransport::new());
        ds.configure_channel(
            1,
            &ChannelConfig {
                probe: 10,
                coupling: Coupling::Ac,
                scale: 0.5,
                offset: -1.0,
                display: true,
            },
        )
        .unwrap();

        assert_eq!(
            ds.session().transport().written,
            vec![
                ":CHAN1:PROB 10",
                ":CHAN1:COUP AC",
                ":CHAN1:SCAL 5.000e-1",
                ":CHAN1:OFFS -1.000e0",
                ":CHAN1:DISP ON",
            ]
        );
    }

    #[test]
    fn edge_trigger_commands() {
        let mut ds = scope(MockTransport::new());
        ds.set_edge_trigger(&EdgeTrigger {
            source: 2,
            level: 2.0,
            slope: Slope::Negative,
            sweep: Sweep::Single,
        })
        .unwrap();

        assert_eq!(
            ds.session().transport().written,
            vec![
                ":TRIG:MODE EDGE",
                ":TRIG:EDG:SOUR CHAN2",
                ":TRIG:EDG:LEV 2.000e0",
                ":TRIG:EDG:SLOP NEG",
                ":TRIG:SWE SING",
            ]
        );
    }

    #[test]
    fn measurements() {
        let mut ds = scope(
            MockTransport::new()
                .respond(":MEAS:FREQ? CHAN1", "1.000000e+03\n")
                .respond(":MEAS:PER? CHAN2", "9.9E37\n")
                .respond(":MEAS:VPP:SAV? CHAN1", "2.04e+00\n")
                .respond(":MEAS:RPH? CHAN1,CHAN2", "-4.5e+01\n")
                .respond(":MEAS:FDEL:SAV?", "1.2e-04\n"),
        );

        assert_eq!(ds.measure(Measurement::Frequency, 1).unwrap(), Some(1000.0));
        assert_eq!(ds.measure(Measurement::Period, 2).unwrap(), None);
        assert_eq!(ds.measure_vpp_average(1).unwrap(), Some(2.04));
        assert_eq!(ds.measure_phase(1, 2).unwrap(), Some(-45.0));
        assert_eq!(ds.measure_falling_delay(1, 2).unwrap(), Some(1.2e-4));
        assert!(ds
            .session()
            .transport()
            .written
            .contains(&":MEAS:FDEL CHAN1,CHAN2".to_string()));
    }

    #[test]
    fn waits_for_stop() {
        let mut ds = scope(
            MockTransport::new()
                .respond(":TRIG:STAT?", "WAIT\n")
                .respond(":TRIG:STAT?", "TD\n")
                .respond(":TRIG:STAT?", "STOP\n"),
        );
        ds.wait_for_stop().unwrap();
        assert_eq!(ds.session().transport().written.len(), 3);
    }

    #[test]
    fn gives_up_waiting() {
        let mut ds = scope(MockTransport::new().respond(":TRIG:STAT?", "WAIT\n"));
        assert!(matches!(ds.wait_for_stop(), Err(Error::Timeout)));
    }

    #[test]
    fn unknown_trigger_status() {
        assert!("BUSY".parse::<TriggerStatus>().is_err());
        assert_eq!("TD\n".parse::<TriggerStatus>().unwrap(), TriggerStatus::Triggered);
    }

    #[test]
    fn preamble() {
        let p: WaveformPreamble = PREAMBLE.parse().unwrap();
        assert_eq!(p.points, 1_400_000);
        assert_eq!(p.x_increment, 1e-9);
        assert_eq!(p.y_reference, 127.0);
        assert!("0,2,100".parse::<WaveformPreamble>().is_err());
    }

    #[test]
    fn capture_sequence() {
        let mut ds = scope(
            MockTransport::new()
                .respond(":WAV:PRE?", "0,2,4,1,1.0e-03,0,0,5.0e-01,0,127\n")
                .respond(":WAV:STAT?", "READ,2\n")
                .respond(":WAV:STAT?", "IDLE,4\n")
                .respond_raw(":WAV:DATA?", b"#9000000004\x7f\x81\x7d\xff\n"),
        );

        let wf = ds.capture(1, 4).unwrap();
        assert_eq!(wf.samples, vec![0x7f, 0x81, 0x7d, 0xff]);
        assert_eq!(wf.voltages(), vec![0.0, 1.0, -1.0, 64.0]);
        assert_eq!(wf.times(), vec![0.0, 1e-3, 2e-3, 3e-3]);

        let written = &ds.session().transport().written;
        assert_eq!(written[0], ":WAV:MODE RAW");
        assert_eq!(written[4], ":WAV:STOP 4");
        assert_eq!(written.last().unwrap(), ":WAV:END");
    }

    #[test]
    fn csv_output() {
        let wf = Waveform {
            channel: 1,
            preamble: "0,2,2,1,1.0e-06,0,0,1.0,0,0".parse().unwrap(),
            samples: vec![1, 2],
        };
        let mut out = Vec::new();
        wf.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time [us],CH1 [V]");
        assert_eq!(lines[1], "0e0,1e0");
        assert_eq!(lines[2], "1e0,2e0");
    }

    #[test]
    fn legacy_scaling() {
        // 240 is the bottom of the screen
        let v = legacy_voltage(240, 1.0, 0.0);
        assert!((v + 4.6).abs() < 1e-12);
        let v = legacy_voltage(115, 1.0, 0.0);
        assert!((v - 0.4).abs() < 1e-12);
    }

    #[test]
    fn legacy_arm_commands() {
        let mut ds = scope(MockTransport::new());
        ds.arm_legacy_single(1, 0.1).unwrap();
        assert_eq!(
            ds.session().transport().written,
            vec![
                ":STOP",
                ":TIM:SCAL 1.000e-1",
                ":ACQ:MEMD LONG",
                ":WAV:POIN:MODE RAW",
                ":TRIG:MODE EDGE",
                ":TRIG:EDGE:SOUR CHAN1",
                ":TRIG:EDGE:SWE SING",
                ":RUN",
            ]
        );
    }

    #[test]
    fn legacy_capture_sequence() {
        let mut ds = scope(
            MockTransport::new()
                .respond(":ACQ:SAMP?", "1.000000e+00\n")
                .respond(":TIM:OFFS?", "0.000000e+00\n")
                .respond(":CHAN1:SCAL?", "1.000e+00\n")
                .respond(":CHAN1:OFFS?", "0.000e+00\n")
                .respond_raw(":WAV:DATA? CHAN1", b"#800000005\xf0\x73\xf0\x73\xf0"),
        );

        let wf = ds.capture_legacy(1).unwrap();
        assert_eq!(wf.samples, vec![240, 115, 240, 115, 240]);
        assert_eq!(wf.times(), vec![-2.5, -1.25, 0.0, 1.25, 2.5]);

        let volts = wf.voltages();
        assert!((volts[0] + 4.6).abs() < 1e-12);
        assert!((volts[1] - 0.4).abs() < 1e-12);

        assert_eq!(
            ds.session().transport().written,
            vec![
                ":ACQ:SAMP?",
                ":TIM:OFFS?",
                ":CHAN1:SCAL?",
                ":CHAN1:OFFS?",
                ":WAV:MODE RAW",
                ":WAV:FORM BYTE",
                ":WAV:POIN:MODE MAX",
                ":WAV:SOUR CHAN1",
                ":WAV:STAR 1",
                ":WAV:RES",
                ":WAV:BEG",
                ":WAV:DATA? CHAN1",
                ":KEY:FORCE",
            ]
        );
    }

    #[test]
    fn legacy_capture_needs_sample_rate() {
        let mut ds = scope(MockTransport::new().respond(":ACQ:SAMP?", "0.0\n"));
        assert!(matches!(ds.capture_legacy(1), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn legacy_time_axis_follows_offset() {
        let wf = LegacyWaveform {
            channel: 2,
            volts_per_div: 0.5,
            offset: 0.0,
            time_offset: 1.0,
            sample_rate: 2.0,
            samples: vec![100; 3],
        };
        assert_eq!(wf.times(), vec![0.25, 1.0, 1.75]);

        let mut out = Vec::new();
        wf.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next(), Some("time [s],CH2 [V]"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn time_units() {
        assert_eq!(TimeUnit::for_span(5e-4), TimeUnit::Microseconds);
        assert_eq!(TimeUnit::for_span(0.5), TimeUnit::Milliseconds);
        assert_eq!(TimeUnit::for_span(2.0), TimeUnit::Seconds);
        assert_eq!(TimeUnit::Milliseconds.scale(0.25), 250.0);
    }
}
