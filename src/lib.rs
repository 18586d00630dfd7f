/// Rigol instrument control over USB Test and Measurement Class (USBTMC)

/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

use thiserror::Error;

pub mod arb;
pub mod config;
pub mod generator;
pub mod ieee488;
pub mod manager;
pub mod protocol;
pub mod resource;
pub mod scope;
pub mod scpi;
pub mod session;
pub mod sweep;
pub mod transport;
pub mod usbtmc;

#[cfg(test)]
mod mock;

pub use config::SessionConfig;
pub use ieee488::Identity;
pub use manager::ResourceManager;
pub use resource::{InstrumentKind, ResourceString};
pub use session::Session;
pub use transport::Transport;
pub use usbtmc::UsbtmcDevice;

#[derive(Error, Debug)]
pub enum Error {
    #[error("error on low level USB: {0}")]
    Rusb(#[from] rusb::Error),
    #[error("device not found")]
    DeviceNotFound,
    #[error("not a usbtmc device")]
    NotUsbtmcDevice,
    #[error("no usb handle")]
    NoHandle,
    #[error("not connected")]
    NotConnected,
    #[error("request failed")]
    Request,
    #[error("device does not support the request type")]
    NotSupported,
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("decoding error (utf-8)")]
    Decoding(#[from] std::string::FromUtf8Error),
    #[error("invalid number in response: {0}")]
    Number(#[from] std::num::ParseFloatError),
    #[error("invalid resource string '{0}'")]
    InvalidResource(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid data block: {0}")]
    InvalidBlock(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
