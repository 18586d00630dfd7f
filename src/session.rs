/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

use std::time::Duration;

use log::{debug, info};

use crate::config::SessionConfig;
use crate::ieee488::{self, Identity};
use crate::resource::ResourceString;
use crate::scpi;
use crate::transport::Transport;
use crate::Error;

/// Open communication channel to one instrument
pub struct Session<T: Transport> {
    transport: T,
    resource: ResourceString,
    config: SessionConfig,
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

impl<T: Transport> Session<T> {
    pub fn new(mut transport: T, resource: ResourceString, config: SessionConfig) -> Session<T> {
        transport.set_timeout(config.timeout);
        Session {
            transport,
            resource,
            config,
        }
    }

    pub fn resource(&self) -> &ResourceString {
        &self.resource
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.transport.timeout()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
        self.transport.set_timeout(timeout);
    }

    fn terminated(&self, command: &str) -> String {
        let mut message = command.to_string();
        if !message.ends_with(self.config.terminator) {
            message.push(self.config.terminator);
        }
        message
    }

    /// Send a command, then wait the configured command delay
    pub fn write(&mut self, command: &str) -> Result<(), Error> {
        self.write_with_delay(command, self.config.command_delay)
    }

    pub fn write_with_delay(&mut self, command: &str, delay: Duration) -> Result<(), Error> {
        let message = self.terminated(command);
        debug!("{} << {}", self.resource.serial, message.trim_end());
        self.transport.write_raw(message.as_bytes())?;
        pause(delay);
        Ok(())
    }

    /// Send data as is, no terminator is added
    pub fn write_raw(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.transport.write_raw(data)
    }

    pub fn read_raw(&mut self) -> Result<Vec<u8>, Error> {
        self.transport.read_raw()
    }

    /// Read a response with its trailing terminator removed
    pub fn read(&mut self) -> Result<String, Error> {
        let mut response = String::from_utf8(self.read_raw()?)?;
        if response.ends_with(self.config.terminator) {
            response.pop();
        }
        if response.ends_with('\r') {
            response.pop();
        }
        debug!("{} >> {}", self.resource.serial, response);
        Ok(response)
    }

    /// Write, wait the query delay, read
    pub fn query(&mut self, command: &str) -> Result<String, Error> {
        self.query_with_delay(command, self.config.query_delay)
    }

    pub fn query_with_delay(&mut self, command: &str, delay: Duration) -> Result<String, Error> {
        self.write_with_delay(command, delay)?;
        self.read()
    }

    pub fn query_raw(&mut self, command: &str) -> Result<Vec<u8>, Error> {
        self.query_raw_with_delay(command, self.config.query_delay)
    }

    pub fn query_raw_with_delay(&mut self, command: &str, delay: Duration) -> Result<Vec<u8>, Error> {
        self.write_with_delay(command, delay)?;
        self.read_raw()
    }

    pub fn query_f64(&mut self, command: &str) -> Result<f64, Error> {
        scpi::parse_f64(&self.query(command)?)
    }

    /// Query a measurement, `None` if the instrument reports no valid value
    pub fn query_reading(&mut self, command: &str) -> Result<Option<f64>, Error> {
        scpi::parse_reading(&self.query(command)?)
    }

    /// `*RST` and give the instrument time to settle
    pub fn reset(&mut self) -> Result<(), Error> {
        info!("resetting {}", self.resource);
        self.write_with_delay(ieee488::RST, self.config.reset_delay)
    }

    pub fn identify(&mut self) -> Result<Identity, Error> {
        self.query(ieee488::IDN)?.parse()
    }

    /// Device clear, then `*CLS` to reset the status registers
    pub fn clear(&mut self) -> Result<(), Error> {
        self.transport.clear()?;
        self.write(ieee488::CLS)
    }

    pub fn close(&mut self) {
        info!("closing {}", self.resource);
        self.transport.close();
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("resource", &self.resource.to_string())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn write_appends_terminator_once() {
        let mut session = MockTransport::new().into_session();
        session.write("*RST").unwrap();
        session.write(":RUN\n").unwrap();
        assert_eq!(session.transport().written, vec!["*RST", ":RUN"]);
    }

    #[test]
    fn query_strips_newline() {
        let mut session = MockTransport::new()
            .respond("FREQ?", "1.000000e+03\r\n")
            .into_session();
        assert_eq!(session.query("FREQ?").unwrap(), "1.000000e+03");
        assert_eq!(session.query_f64("FREQ?").unwrap(), 1000.0);
    }

    #[test]
    fn read_without_answer_times_out() {
        let mut session = MockTransport::new().into_session();
        assert!(matches!(
            session.query("*IDN?"),
            Err(Error::Rusb(rusb::Error::Timeout))
        ));
    }

    #[test]
    fn reset_and_identify() {
        let mut session = MockTransport::new()
            .respond("*IDN?", "RIGOL TECHNOLOGIES,DS2072A,DS2A160800123,00.03.05\n")
            .into_session();

        session.reset().unwrap();
        let id = session.identify().unwrap();
        assert_eq!(id.model, "DS2072A");
        assert_eq!(session.transport().written, vec!["*RST", "*IDN?"]);
    }

    #[test]
    fn invalid_reading_is_none() {
        let mut session = MockTransport::new()
            .respond(":MEAS:FREQ? CHAN1", "9.9E37\n")
            .into_session();
        assert_eq!(session.query_reading(":MEAS:FREQ? CHAN1").unwrap(), None);
    }

    #[test]
    fn timeout_reaches_transport() {
        let mut session = MockTransport::new().into_session();
        assert_eq!(session.timeout(), Duration::from_millis(5000));
        session.set_timeout(Duration::from_millis(250));
        assert_eq!(session.transport().timeout(), Duration::from_millis(250));
        assert_eq!(session.config().timeout, Duration::from_millis(250));
    }

    #[test]
    fn close_and_clear_forward() {
        let mut session = MockTransport::new().into_session();
        session.clear().unwrap();
        session.close();
        assert_eq!(session.transport().clears, 1);
        assert_eq!(session.transport().written, vec!["*CLS"]);
        assert!(session.transport().closed);
    }
}
