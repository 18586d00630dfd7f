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

use crate::Error;

/// Message based link to an instrument
pub trait Transport {
    /// Send one complete message, returns the number of bytes put on the bus
    fn write_raw(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Receive one complete message
    fn read_raw(&mut self) -> Result<Vec<u8>, Error>;

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration);

    /// Discard pending input and output on the device
    fn clear(&mut self) -> Result<(), Error>;

    fn close(&mut self);
}
