/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;

use rigoltmc::arb::ArbWaveform;
use rigoltmc::generator::{Function, FunctionGenerator, VoltageUnit};
use rigoltmc::manager::UsbSession;
use rigoltmc::resource;
use rigoltmc::scope::{
    ChannelConfig, Coupling, EdgeTrigger, Measurement, Oscilloscope, Slope, Sweep,
};
use rigoltmc::sweep::{self, BodeConfig};
use rigoltmc::{ieee488, InstrumentKind, ResourceManager, SessionConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Control Rigol oscilloscopes and function generators over USB")]
struct Cli {
    /// I/O timeout in milliseconds
    #[arg(long, default_value_t = 5000, global = true)]
    timeout: u64,

    /// Pause after every command in milliseconds
    #[arg(long, default_value_t = 100, global = true)]
    delay: u64,

    #[command(subcommand)]
    command: Command,
}

/// Which instrument to talk to
#[derive(Args, Debug)]
struct Target {
    /// USB vendor id, hex (0x1ab1) or decimal
    #[arg(long, value_parser = parse_id, default_value = "0x1ab1")]
    vendor: u16,

    /// USB product id; without it the first instrument of the right kind is used
    #[arg(long, value_parser = parse_id)]
    product: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB instruments
    List {
        #[arg(default_value = resource::USB_INSTR_PATTERN)]
        pattern: String,
    },
    /// Reset an instrument and read its identification
    Idn {
        #[arg(long, value_parser = parse_id, default_value = "0x1ab1")]
        vendor: u16,
        #[arg(long, value_parser = parse_id, default_value = "0x04b0")]
        product: u16,
    },
    /// Step a sine through frequencies on the function generator
    FgenSweep {
        #[command(flatten)]
        target: Target,
        #[arg(long, value_delimiter = ',', default_values_t = [100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0])]
        freqs: Vec<f64>,
        /// Amplitude, volts peak-to-peak
        #[arg(long, default_value_t = 2.0)]
        volt: f64,
        #[arg(long, default_value_t = 0.0)]
        offset: f64,
        /// Seconds on each frequency
        #[arg(long, value_parser = parse_seconds, default_value = "2")]
        dwell: Duration,
    },
    /// Upload an arbitrary waveform to the function generator
    Arb {
        #[command(flatten)]
        target: Target,
        #[arg(long, value_enum, default_value_t = Shape::Sawtooth)]
        shape: Shape,
        /// Duty cycle of the square shape
        #[arg(long, default_value_t = 0.25)]
        duty: f64,
        #[arg(long, default_value_t = 1000.0)]
        freq: f64,
        #[arg(long, default_value_t = 5.0)]
        volt: f64,
        #[arg(long, default_value_t = 0.0)]
        offset: f64,
    },
    /// Print oscilloscope measurements over a range of timebases
    Measure {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 10)]
        probe: u32,
        /// Timebase scales in microseconds per division
        #[arg(long, value_delimiter = ',', default_values_t = [20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0])]
        scales: Vec<f64>,
        /// Seconds between timebases
        #[arg(long, value_parser = parse_seconds, default_value = "4")]
        interval: Duration,
    },
    /// Capture one triggered waveform to a CSV file
    ///
    /// A DS1000E is read with its own command set and gives its whole memory,
    /// `--points` does not apply there.
    Capture {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 1)]
        channel: u8,
        #[arg(long, default_value_t = 1_400_000)]
        points: usize,
        /// Seconds per division
        #[arg(long, default_value_t = 0.1)]
        timescale: f64,
        /// Trigger level in volts
        #[arg(long, default_value_t = 2.0)]
        level: f64,
        #[arg(long, default_value_t = 10)]
        probe: u32,
        #[arg(short, long, default_value = "capture.csv")]
        output: PathBuf,
    },
    /// Measure gain and phase of a circuit between scope channels 1 and 2
    Bode {
        #[arg(long, value_delimiter = ',', default_values_t = [1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0])]
        freqs: Vec<f64>,
        /// Generator amplitude, volts peak-to-peak
        #[arg(long, default_value_t = 5.0)]
        volt: f64,
        #[arg(long, default_value_t = 10)]
        probe: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Shape {
    Sine,
    HalfWave,
    Square,
    Sawtooth,
    Sinc,
    ExpCos,
}

fn parse_id(s: &str) -> Result<u16, String> {
    resource::parse_id(s).map_err(|e| e.to_string())
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s.trim().parse().map_err(|e| format!("'{}': {}", s, e))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("'{}': {}", s, e))
}

fn show(value: Option<f64>, scale: f64, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.3} {}", v * scale, unit),
        None => format!("---- {}", unit),
    }
}

fn open_target(
    rm: &ResourceManager,
    target: &Target,
    kind: InstrumentKind,
    config: SessionConfig,
) -> Result<UsbSession, Box<dyn Error>> {
    let resource = match target.product {
        Some(product) => rm.find(target.vendor, product)?,
        None => rm.find_kind(kind)?,
    };
    let mut session = rm.open(&resource, config)?;
    println!("{}", session.identify()?);
    Ok(session)
}

fn list(rm: &ResourceManager, pattern: &str) -> Result<(), Box<dyn Error>> {
    let resources = rm.list_resources(pattern)?;
    println!("Number of device(s) found: {}", resources.len());
    for (n, r) in resources.iter().enumerate() {
        println!("{}) {} ({})", n + 1, r, r.kind());
    }
    Ok(())
}

fn idn(
    rm: &ResourceManager,
    vendor: u16,
    product: u16,
    config: SessionConfig,
) -> Result<(), Box<dyn Error>> {
    list(rm, resource::USB_INSTR_PATTERN)?;

    let resource = rm.find(vendor, product)?;
    println!("Found: 0x{:04x}, 0x{:04x}", vendor, product);

    let query_delay = config.query_delay;
    let mut session = rm.open(&resource, config)?;
    println!("Open device OK");

    session.reset()?;

    // once as separate write and read, once as a query
    session.write_with_delay(ieee488::IDN, query_delay)?;
    println!("> '{}'", session.read()?);
    println!("> '{}'", session.query(ieee488::IDN)?);

    session.close();
    Ok(())
}

fn fgen_sweep(
    session: UsbSession,
    freqs: &[f64],
    volt: f64,
    offset: f64,
    dwell: Duration,
) -> Result<(), Box<dyn Error>> {
    let mut dg = FunctionGenerator::new(session);
    dg.remote()?;
    dg.session().reset()?;

    dg.output(false)?;
    dg.set_function(Function::Sine)?;
    dg.set_frequency(freqs.first().copied().unwrap_or(100.0))?;
    dg.set_voltage_unit(VoltageUnit::Vpp)?;
    dg.set_amplitude(volt)?;
    dg.set_offset(offset)?;
    dg.set_phase(0.0)?;
    dg.output(true)?;

    for &freq in freqs {
        dg.apply_sine(freq, volt, offset)?;
        let readback = dg.readback()?;
        println!("Freq:      {:8.1} Hz", readback.frequency);
        println!("VOLT:LOW:  {:+.1} V", readback.low);
        println!("VOLT:HIGH: {:+.1} V", readback.high);
        println!("{}", "-".repeat(40));
        sleep(dwell);
    }

    Ok(())
}

fn arb(
    session: UsbSession,
    waveform: &ArbWaveform,
    freq: f64,
    volt: f64,
    offset: f64,
) -> Result<(), Box<dyn Error>> {
    let mut dg = FunctionGenerator::new(session);
    dg.remote()?;

    dg.output(false)?;
    dg.set_function(Function::User)?;

    let max_points = dg.max_volatile_points()?;
    println!("max. volatile memory depth: {}", max_points);
    if waveform.len() > max_points {
        return Err(format!("waveform has {} points, memory holds {}", waveform.len(), max_points).into());
    }

    dg.set_frequency(freq)?;
    dg.set_voltage_unit(VoltageUnit::Vpp)?;
    dg.set_amplitude(volt)?;
    dg.set_offset(offset)?;
    dg.upload_volatile(waveform)?;
    dg.output(true)?;

    Ok(())
}

fn measure(
    session: UsbSession,
    probe: u32,
    scales: &[f64],
    interval: Duration,
) -> Result<(), Box<dyn Error>> {
    let mut ds = Oscilloscope::new(session);
    ds.remote()?;
    ds.stop()?;
    ds.run()?;
    ds.autoscale()?;
    ds.clear_measurements()?;

    for channel in [1, 2] {
        ds.enable_measurement(Measurement::Frequency, channel)?;
        ds.enable_measurement(Measurement::Period, channel)?;
        ds.configure_channel(
            channel,
            &ChannelConfig {
                probe,
                coupling: Coupling::Dc,
                scale: 0.5,
                offset: 0.0,
                display: true,
            },
        )?;
    }
    ds.set_phase_sources(1, 2)?;
    ds.set_edge_trigger(&EdgeTrigger::default())?;
    info!("using {}x probes", probe);

    for &scale in scales {
        ds.set_timebase_scale(scale * 1e-6)?;
        println!("time scale: {:.6} s/div", scale * 1e-6);

        for channel in [1, 2] {
            let freq = ds.measure(Measurement::Frequency, channel)?;
            println!("CH{} Freq: {}", channel, show(freq, 1.0, "Hz"));
        }
        for channel in [1, 2] {
            let period = ds.measure(Measurement::Period, channel)?;
            println!("CH{} Period: {}", channel, show(period, 1e3, "msec"));
        }
        for channel in [1, 2] {
            let vpp = ds.measure_vpp_average(channel)?;
            println!("CH{} Vpp(avg): {}", channel, show(vpp, 1.0, "V"));
        }
        let delay = ds.measure_falling_delay(1, 2)?;
        println!("Delay CH1->CH2: {}", show(delay, 1e3, "msec"));
        println!("{}", "-".repeat(40));

        sleep(interval);
    }

    Ok(())
}

fn capture(
    session: UsbSession,
    channel: u8,
    points: usize,
    timescale: f64,
    level: f64,
    probe: u32,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let mut ds = Oscilloscope::new(session);
    ds.remote()?;
    ds.session().reset()?;

    for other in (1..=2).filter(|&c| c != channel) {
        ds.set_display(other, false)?;
    }
    ds.set_timebase_scale(timescale)?;
    ds.set_timebase_offset(5.0 * timescale)?;
    ds.configure_channel(
        channel,
        &ChannelConfig {
            probe,
            coupling: Coupling::Dc,
            scale: 0.5,
            offset: -1.0,
            display: true,
        },
    )?;
    ds.set_edge_trigger(&EdgeTrigger {
        source: channel,
        level,
        slope: Slope::Positive,
        sweep: Sweep::Auto,
    })?;

    ds.run()?;
    ds.set_memory_depth(points)?;
    ds.single()?;
    info!("waiting for trigger");
    ds.wait_for_stop()?;
    ds.stop()?;

    let sample_rate = ds.sample_rate()?;
    println!("Sampling Rate   : {:.3} MHz", sample_rate * 1e-6);
    println!("Time/Div        : {}", ds.timebase_scale()?);
    println!("Time Offset     : {}", ds.timebase_offset()?);
    println!("Volt/Div CH{}    : {}", channel, ds.channel_scale(channel)?);
    println!("Volt Offset CH{} : {}", channel, ds.channel_offset(channel)?);
    println!("Memory Depth    : {}", ds.memory_depth()?);

    let waveform = ds.capture(channel, points)?;
    ds.local()?;

    println!("data points     : {}", waveform.samples.len());
    waveform.write_csv(BufWriter::new(File::create(output)?))?;
    println!("written to {}", output.display());

    Ok(())
}

fn capture_legacy(
    session: UsbSession,
    channel: u8,
    timescale: f64,
    probe: u32,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let mut ds = Oscilloscope::new(session);
    ds.remote()?;

    for other in (1..=2).filter(|&c| c != channel) {
        ds.set_display(other, false)?;
    }
    ds.configure_channel(
        channel,
        &ChannelConfig {
            probe,
            coupling: Coupling::Dc,
            scale: 1.0,
            offset: 0.0,
            display: true,
        },
    )?;

    ds.arm_legacy_single(channel, timescale)?;
    info!("waiting for trigger");
    ds.wait_for_stop()?;

    let waveform = ds.capture_legacy(channel)?;
    println!("Sampling Rate   : {:.3} MHz", waveform.sample_rate * 1e-6);
    println!("Time Offset     : {}", waveform.time_offset);
    println!("Volt/Div CH{}    : {}", channel, waveform.volts_per_div);
    println!("Volt Offset CH{} : {}", channel, waveform.offset);

    println!("data points     : {}", waveform.samples.len());
    waveform.write_csv(BufWriter::new(File::create(output)?))?;
    println!("written to {}", output.display());

    Ok(())
}

fn bode(
    rm: &ResourceManager,
    config: SessionConfig,
    freqs: Vec<f64>,
    volt: f64,
    probe: u32,
) -> Result<(), Box<dyn Error>> {
    let scope = rm.find_kind(InstrumentKind::Oscilloscope)?;
    let generator = rm.find_kind(InstrumentKind::FunctionGenerator)?;

    let mut ds = Oscilloscope::new(rm.open(&scope, config.clone())?);
    let mut dg = FunctionGenerator::new(rm.open(&generator, config)?);
    println!("{}", ds.session().identify()?);
    println!("{}", dg.session().identify()?);

    let bode_config = BodeConfig {
        frequencies: freqs,
        amplitude: volt,
        probe,
        ..Default::default()
    };

    sweep::setup(&mut dg, &mut ds, &bode_config)?;
    sleep(Duration::from_secs(1));

    for point in sweep::run(&mut dg, &mut ds, &bode_config)? {
        println!(
            "Freq(Hz): {:.1}, Vpp2/Vpp1: {:.3}, Phase(Deg.): {:.1}",
            point.frequency, point.gain, point.phase
        );
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = SessionConfig::default()
        .with_timeout(Duration::from_millis(cli.timeout))
        .with_command_delay(Duration::from_millis(cli.delay));

    let rm = ResourceManager::new()?;
    info!("resource manager ready");

    match cli.command {
        Command::List { pattern } => list(&rm, &pattern)?,
        Command::Idn { vendor, product } => idn(&rm, vendor, product, config)?,
        Command::FgenSweep {
            target,
            freqs,
            volt,
            offset,
            dwell,
        } => {
            let session = open_target(&rm, &target, InstrumentKind::FunctionGenerator, config)?;
            fgen_sweep(session, &freqs, volt, offset, dwell)?
        }
        Command::Arb {
            target,
            shape,
            duty,
            freq,
            volt,
            offset,
        } => {
            let waveform = match shape {
                Shape::Sine => ArbWaveform::sine(),
                Shape::HalfWave => ArbWaveform::half_wave_sine(),
                Shape::Square => ArbWaveform::square(duty),
                Shape::Sawtooth => ArbWaveform::sawtooth(),
                Shape::Sinc => ArbWaveform::sinc(),
                Shape::ExpCos => ArbWaveform::exp_cos(),
            };
            let session = open_target(&rm, &target, InstrumentKind::FunctionGenerator, config)?;
            arb(session, &waveform, freq, volt, offset)?
        }
        Command::Measure {
            target,
            probe,
            scales,
            interval,
        } => {
            let session = open_target(&rm, &target, InstrumentKind::Oscilloscope, config)?;
            measure(session, probe, &scales, interval)?
        }
        Command::Capture {
            target,
            channel,
            points,
            timescale,
            level,
            probe,
            output,
        } => {
            let session = open_target(&rm, &target, InstrumentKind::Oscilloscope, config)?;
            if session.resource().is_legacy_scope() {
                info!("{} is a DS1000E, reading its whole memory", session.resource());
                capture_legacy(session, channel, timescale, probe, &output)?
            } else {
                capture(session, channel, points, timescale, level, probe, &output)?
            }
        }
        Command::Bode { freqs, volt, probe } => bode(&rm, config, freqs, volt, probe)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rigoltmc::resource::ids;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ids_and_lists() {
        let cli = Cli::parse_from([
            "rigoltmc", "measure", "--product", "0x04ce", "--scales", "10,20",
        ]);
        match cli.command {
            Command::Measure { target, scales, .. } => {
                assert_eq!(target.vendor, ids::RIGOL);
                assert_eq!(target.product, Some(ids::DS1000Z));
                assert_eq!(scales, vec![10.0, 20.0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn idn_defaults_to_ds2000a() {
        let cli = Cli::parse_from(["rigoltmc", "idn"]);
        match cli.command {
            Command::Idn { vendor, product } => {
                assert_eq!(vendor, ids::RIGOL);
                assert_eq!(product, ids::DS2000A);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn durations_must_be_valid() {
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("soon").is_err());

        assert!(Cli::try_parse_from(["rigoltmc", "fgen-sweep", "--dwell=-1"]).is_err());
        assert!(Cli::try_parse_from(["rigoltmc", "measure", "--interval", "NaN"]).is_err());

        let cli = Cli::parse_from(["rigoltmc", "fgen-sweep"]);
        match cli.command {
            Command::FgenSweep { dwell, .. } => assert_eq!(dwell, Duration::from_secs(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn blank_measurement() {
        assert_eq!(show(None, 1.0, "Hz"), "---- Hz");
        assert_eq!(show(Some(0.0125), 1e3, "msec"), "12.500 msec");
    }
}
