/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! SCPI commands of the Rigol DG1000 function generators

use std::time::Duration;

use log::info;

use crate::arb::ArbWaveform;
use crate::session::Session;
use crate::transport::Transport;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Sine,
    Square,
    Ramp,
    Pulse,
    Noise,
    Dc,
    User,
}

impl Function {
    fn as_scpi(self) -> &'static str {
        match self {
            Function::Sine => "SIN",
            Function::Square => "SQU",
            Function::Ramp => "RAMP",
            Function::Pulse => "PULS",
            Function::Noise => "NOIS",
            Function::Dc => "DC",
            Function::User => "USER",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoltageUnit {
    Vpp,
    Vrms,
    Dbm,
}

impl VoltageUnit {
    fn as_scpi(self) -> &'static str {
        match self {
            VoltageUnit::Vpp => "VPP",
            VoltageUnit::Vrms => "VRMS",
            VoltageUnit::Dbm => "DBM",
        }
    }
}

/// Output settings read back from the instrument
#[derive(Clone, Debug, PartialEq)]
pub struct Readback {
    pub frequency: f64,
    pub low: f64,
    pub high: f64,
}

/// Rigol function generator on top of a session
pub struct FunctionGenerator<T: Transport> {
    session: Session<T>,
    /// Pause around volatile memory operations, the instrument is slow to store data
    memory_delay: Duration,
}

impl<T: Transport> FunctionGenerator<T> {
    pub fn new(session: Session<T>) -> FunctionGenerator<T> {
        FunctionGenerator {
            session,
            memory_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_memory_delay(mut self, delay: Duration) -> Self {
        self.memory_delay = delay;
        self
    }

    pub fn session(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<T> {
        self.session
    }

    pub fn remote(&mut self) -> Result<(), Error> {
        self.session.write("SYST:REM")
    }

    pub fn local(&mut self) -> Result<(), Error> {
        self.session.write("SYST:LOC")
    }

    /// Switch CH1 on or off
    pub fn output(&mut self, on: bool) -> Result<(), Error> {
        self.session.write(if on { "OUTP ON" } else { "OUTP OFF" })
    }

    pub fn set_function(&mut self, function: Function) -> Result<(), Error> {
        self.session.write(&format!("FUNC {}", function.as_scpi()))
    }

    pub fn set_frequency(&mut self, hz: f64) -> Result<(), Error> {
        self.session.write(&format!("FREQ {:.3e}", hz))
    }

    pub fn set_voltage_unit(&mut self, unit: VoltageUnit) -> Result<(), Error> {
        self.session.write(&format!("VOLT:UNIT {}", unit.as_scpi()))
    }

    pub fn set_amplitude(&mut self, volts: f64) -> Result<(), Error> {
        self.session.write(&format!("VOLT {:.3}", volts))
    }

    pub fn set_offset(&mut self, volts: f64) -> Result<(), Error> {
        self.session.write(&format!("VOLT:OFFS {:.3}", volts))
    }

    pub fn set_phase(&mut self, degrees: f64) -> Result<(), Error> {
        self.session.write(&format!("PHAS {:.1}", degrees))
    }

    /// Sine of the given frequency, peak-to-peak amplitude and offset in one command
    pub fn apply_sine(&mut self, hz: f64, vpp: f64, offset: f64) -> Result<(), Error> {
        self.session
            .write(&format!("APPL:SIN {:.3e},{:.3e},{:.3e}", hz, vpp, offset))
    }

    pub fn frequency(&mut self) -> Result<f64, Error> {
        self.session.query_f64("FREQ?")
    }

    pub fn voltage_low(&mut self) -> Result<f64, Error> {
        self.session.query_f64("VOLT:LOW?")
    }

    pub fn voltage_high(&mut self) -> Result<f64, Error> {
        self.session.query_f64("VOLT:HIGH?")
    }

    pub fn readback(&mut self) -> Result<Readback, Error> {
        Ok(Readback {
            frequency: self.frequency()?,
            low: self.voltage_low()?,
            high: self.voltage_high()?,
        })
    }

    /// Largest waveform the volatile memory accepts
    pub fn max_volatile_points(&mut self) -> Result<usize, Error> {
        Ok(self.session.query_f64("DATA:ATTR:POIN? VOLATILE")? as usize)
    }

    /// Replace volatile memory with `waveform` and select it as output function
    pub fn upload_volatile(&mut self, waveform: &ArbWaveform) -> Result<(), Error> {
        info!("uploading {} point waveform", waveform.len());
        self.session.write_with_delay("DATA:DEL VOLATILE", self.memory_delay)?;
        let data = format!("DATA:DAC VOLATILE,{}", waveform.to_dac_list());
        self.session.write_with_delay(&data, self.memory_delay)?;
        self.session.write_with_delay("FUNC:USER VOLATILE", self.memory_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn generator(mock: MockTransport) -> FunctionGenerator<MockTransport> {
        FunctionGenerator::new(mock.into_session()).with_memory_delay(Duration::ZERO)
    }

    #[test]
    fn sine_setup() {
        let mut dg = generator(MockTransport::new());
        dg.output(false).unwrap();
        dg.set_function(Function::Sine).unwrap();
        dg.set_frequency(100.0).unwrap();
        dg.set_voltage_unit(VoltageUnit::Vpp).unwrap();
        dg.set_amplitude(1.0).unwrap();
        dg.set_offset(0.0).unwrap();
        dg.set_phase(0.0).unwrap();
        dg.apply_sine(1000.0, 2.0, 0.0).unwrap();
        dg.output(true).unwrap();

        assert_eq!(
            dg.session().transport().written,
            vec![
                "OUTP OFF",
                "FUNC SIN",
                "FREQ 1.000e2",
                "VOLT:UNIT VPP",
                "VOLT 1.000",
                "VOLT:OFFS 0.000",
                "PHAS 0.0",
                "APPL:SIN 1.000e3,2.000e0,0.000e0",
                "OUTP ON",
            ]
        );
    }

    #[test]
    fn reads_back_output() {
        let mut dg = generator(
            MockTransport::new()
                .respond("FREQ?", "1000.000000\n")
                .respond("VOLT:LOW?", "-1.000000\n")
                .respond("VOLT:HIGH?", "1.000000\n"),
        );
        assert_eq!(
            dg.readback().unwrap(),
            Readback {
                frequency: 1000.0,
                low: -1.0,
                high: 1.0,
            }
        );
    }

    #[test]
    fn uploads_arbitrary_waveform() {
        let mut dg = generator(MockTransport::new().respond("DATA:ATTR:POIN? VOLATILE", "4096\n"));
        assert_eq!(dg.max_volatile_points().unwrap(), 4096);

        let wave = ArbWaveform::from_samples(vec![0, 16383, 8192]).unwrap();
        dg.upload_volatile(&wave).unwrap();

        let written = &dg.session().transport().written;
        assert_eq!(
            &written[1..],
            &[
                "DATA:DEL VOLATILE",
                "DATA:DAC VOLATILE,0,16383,8192",
                "FUNC:USER VOLATILE",
            ]
        );
    }
}
