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

/// Timing and framing of a session
///
/// Rigol instruments do not queue commands reliably, so every write is
/// followed by a short pause before the next command goes out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// I/O timeout of a single transfer
    pub timeout: Duration,
    /// Pause after each command
    pub command_delay: Duration,
    /// Pause between a query and reading its response
    pub query_delay: Duration,
    /// Pause after `*RST`
    pub reset_delay: Duration,
    /// Appended to commands that do not end with it, stripped from responses
    pub terminator: char,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout: Duration::from_millis(5000),
            command_delay: Duration::from_millis(100),
            query_delay: Duration::from_millis(100),
            reset_delay: Duration::from_secs(1),
            terminator: '\n',
        }
    }
}

impl SessionConfig {
    /// Same framing, no pauses at all
    pub fn without_delays() -> Self {
        SessionConfig {
            command_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
            reset_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn with_terminator(mut self, terminator: char) -> Self {
        self.terminator = terminator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(config.query_delay, Duration::from_millis(100));
        assert_eq!(config.reset_delay, Duration::from_secs(1));
        assert_eq!(config.terminator, '\n');
    }

    #[test]
    fn builder() {
        let config = SessionConfig::without_delays()
            .with_timeout(Duration::from_millis(500))
            .with_query_delay(Duration::from_millis(200));
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.command_delay, Duration::ZERO);
        assert_eq!(config.query_delay, Duration::from_millis(200));
    }
}
