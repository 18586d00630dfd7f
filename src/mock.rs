/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! Scripted transport for tests

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::resource::ResourceString;
use crate::session::Session;
use crate::transport::Transport;
use crate::Error;

/// Answers queries from a table, remembers every command written
#[derive(Default)]
pub struct MockTransport {
    pub written: Vec<String>,
    responses: HashMap<String, VecDeque<Vec<u8>>>,
    pending: VecDeque<Vec<u8>>,
    timeout: Duration,
    pub clears: usize,
    pub closed: bool,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Queue an answer to `command`, the last one queued repeats forever
    pub fn respond(self, command: &str, response: &str) -> MockTransport {
        self.respond_raw(command, response.as_bytes())
    }

    pub fn respond_raw(mut self, command: &str, response: &[u8]) -> MockTransport {
        self.responses
            .entry(command.to_string())
            .or_default()
            .push_back(response.to_vec());
        self
    }

    pub fn into_session(self) -> Session<MockTransport> {
        Session::new(
            self,
            ResourceString::new(0x1ab1, 0x04b0, "DS2A000000001"),
            SessionConfig::without_delays(),
        )
    }
}

impl Transport for MockTransport {
    fn write_raw(&mut self, data: &[u8]) -> Result<usize, Error> {
        let command = String::from_utf8_lossy(data).trim_end().to_string();

        if let Some(queue) = self.responses.get_mut(&command) {
            let answer = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(answer) = answer {
                self.pending.push_back(answer);
            }
        }

        self.written.push(command);
        Ok(data.len())
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, Error> {
        self.pending
            .pop_front()
            .ok_or(Error::Rusb(rusb::Error::Timeout))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn clear(&mut self) -> Result<(), Error> {
        self.pending.clear();
        self.clears += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
