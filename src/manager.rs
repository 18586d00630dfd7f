/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! Discovery of USB instruments and opening of sessions

use log::{debug, info, warn};

use crate::config::SessionConfig;
use crate::resource::{self, InstrumentKind, ResourceString};
use crate::session::Session;
use crate::usbtmc::{self, UsbtmcDevice};
use crate::Error;

pub type UsbSession = Session<UsbtmcDevice<rusb::GlobalContext>>;

/// Entry point to the instruments attached to this host
#[derive(Debug)]
pub struct ResourceManager {
    board: u16,
}

fn serial_number(device: &rusb::Device<rusb::GlobalContext>) -> Result<String, Error> {
    let desc = device.device_descriptor()?;
    let handle = device.open()?;
    let serial = handle.read_serial_number_string_ascii(&desc)?;
    Ok(serial.trim().to_string())
}

/// First resource with the given ids
pub fn select(resources: &[ResourceString], vendor_id: u16, product_id: u16) -> Option<&ResourceString> {
    resources.iter().find(|r| r.matches_ids(vendor_id, product_id))
}

/// First resource of the given kind, judged by its serial number
pub fn select_kind(resources: &[ResourceString], kind: InstrumentKind) -> Option<&ResourceString> {
    resources.iter().find(|r| r.kind() == kind)
}

impl ResourceManager {
    /// Checks that the USB stack is usable
    pub fn new() -> Result<ResourceManager, Error> {
        let version = rusb::version();
        rusb::devices()?;
        info!(
            "libusb {}.{}.{} initialized",
            version.major(),
            version.minor(),
            version.micro()
        );
        Ok(ResourceManager { board: 0 })
    }

    /// List the instruments whose address matches a VISA expression such as `USB?*::INSTR`
    pub fn list_resources(&self, pattern: &str) -> Result<Vec<ResourceString>, Error> {
        let mut resources = Vec::new();

        for device in rusb::devices()?.iter() {
            if !usbtmc::is_usbtmc(&device) {
                continue;
            }

            let desc = device.device_descriptor()?;
            let serial = match serial_number(&device) {
                Ok(serial) => serial,
                Err(e) => {
                    warn!(
                        "skipping {:04x}:{:04x} on bus {} address {}: no serial number ({})",
                        desc.vendor_id(),
                        desc.product_id(),
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            let resource = ResourceString {
                board: self.board,
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                serial,
                interface: None,
            };

            if resource::glob_match(pattern, &resource.to_string()) {
                debug!("found {}", resource);
                resources.push(resource);
            }
        }

        Ok(resources)
    }

    /// The first USB instrument with the given vendor and product id
    pub fn find(&self, vendor_id: u16, product_id: u16) -> Result<ResourceString, Error> {
        let resources = self.list_resources(resource::USB_INSTR_PATTERN)?;
        select(&resources, vendor_id, product_id)
            .cloned()
            .ok_or(Error::DeviceNotFound)
    }

    pub fn find_kind(&self, kind: InstrumentKind) -> Result<ResourceString, Error> {
        let resources = self.list_resources(resource::USB_INSTR_PATTERN)?;
        select_kind(&resources, kind)
            .cloned()
            .ok_or(Error::DeviceNotFound)
    }

    /// Open a session to the instrument at `resource`
    pub fn open(&self, resource: &ResourceString, config: SessionConfig) -> Result<UsbSession, Error> {
        for device in rusb::devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() != resource.vendor_id || desc.product_id() != resource.product_id {
                continue;
            }
            match serial_number(&device) {
                Ok(serial) if serial == resource.serial => {}
                _ => continue,
            }

            let mut instrument = UsbtmcDevice::new(device);
            instrument.open()?;
            info!("opened {}", resource);
            match instrument.get_capabilities() {
                Ok(caps) => debug!("capabilities {:?}, usb488 {}", caps, instrument.is_usb488()),
                Err(e) => debug!("no capabilities: {}", e),
            }
            debug!("{:?}", instrument);

            return Ok(Session::new(instrument, resource.clone(), config));
        }

        Err(Error::DeviceNotFound)
    }
}
