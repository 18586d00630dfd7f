/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! USB Test and Measurement Class (USBTMC) driver on top of rusb

use std::time::Duration;

use log::{debug, warn};

use crate::protocol::{
    self, Attributes, BulkInTransfer, Capabilities, Direction, MsgId, RequestType, Status,
    HEADER_SIZE, TRANSFER_SIZE,
};
use crate::transport::Transport;
use crate::Error;

/// Polls of a CHECK_*_STATUS request before giving up
const MAX_STATUS_POLLS: usize = 50;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Location of the USBTMC interface inside the device
#[derive(Clone, Copy, Debug)]
struct Endpoints {
    iface: u8,
    bulk_out: u8,
    bulk_in: u8,
}

/// 'High level' USBTMC wrapper around rusb::Device
pub struct UsbtmcDevice<C: rusb::UsbContext> {
    connected: bool,
    // rusb objects
    pub device: rusb::Device<C>,
    handle: Option<rusb::DeviceHandle<C>>,
    // usbtmc capabilites
    capabilities: Option<Capabilities>,
    usb488: bool,
    // for linux kernel
    has_kernel_driver: bool,
    // addresses in the usb device
    config_num: Option<u8>,
    iface_num: Option<u8>,
    ep_bulk_in: Option<u8>,
    ep_bulk_out: Option<u8>,
    ep_interrupt_in: Option<u8>,
    // btag number to keep track of packet parts
    btag: u8,
    term_char: Option<u8>,
    timeout: Duration,
}

/// Error of a failed bulk transfer once the abort sequence has run
///
/// A failing abort is only logged, the transfer error is what the caller sees.
fn transfer_failed(e: rusb::Error, abort: Result<(), Error>) -> Error {
    if let Err(abort_err) = abort {
        warn!("abort after failed transfer did not complete: {}", abort_err);
    }
    Error::Rusb(e)
}

/// Whether the device exposes an interface with the USBTMC class and subclass
pub fn is_usbtmc<C: rusb::UsbContext>(device: &rusb::Device<C>) -> bool {
    let desc = match device.device_descriptor() {
        Ok(desc) => desc,
        Err(_) => return false,
    };

    (0..desc.num_configurations())
        .filter_map(|num| device.config_descriptor(num).ok())
        .any(|cfg_desc| {
            cfg_desc
                .interfaces()
                .flat_map(|iface| iface.descriptors())
                .any(|iface_desc| {
                    iface_desc.class_code() == protocol::USBTMC_BINTERFACE_CLASS
                        && iface_desc.sub_class_code() == protocol::USBTMC_BINTERFACE_SUBCLASS
                })
        })
}

impl<C: rusb::UsbContext> UsbtmcDevice<C> {
    /// Creates an unopened device from a rusb Device
    pub fn new(device: rusb::Device<C>) -> UsbtmcDevice<C> {
        UsbtmcDevice {
            connected: false,
            device,
            handle: None,
            capabilities: None,
            usb488: false,
            has_kernel_driver: false,
            config_num: None,
            iface_num: None,
            ep_bulk_in: None,
            ep_bulk_out: None,
            ep_interrupt_in: None,
            btag: 0,
            term_char: None,
            timeout: Duration::from_millis(5000),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the interface speaks the USB488 subclass protocol
    pub fn is_usb488(&self) -> bool {
        self.usb488
    }

    pub fn interrupt_endpoint(&self) -> Option<u8> {
        self.ep_interrupt_in
    }

    /// Ask the device to end bulk-in transfers on this byte (needs TermChar capability)
    pub fn set_term_char(&mut self, term_char: Option<u8>) {
        self.term_char = term_char;
    }

    fn handle(&self) -> Result<&rusb::DeviceHandle<C>, Error> {
        self.handle.as_ref().ok_or(Error::NoHandle)
    }

    fn handle_mut(&mut self) -> Result<&mut rusb::DeviceHandle<C>, Error> {
        self.handle.as_mut().ok_or(Error::NoHandle)
    }

    fn endpoints(&self) -> Result<Endpoints, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        match (self.iface_num, self.ep_bulk_out, self.ep_bulk_in) {
            (Some(iface), Some(bulk_out), Some(bulk_in)) => Ok(Endpoints {
                iface,
                bulk_out,
                bulk_in,
            }),
            _ => Err(Error::NotUsbtmcDevice),
        }
    }

    fn advance_btag(&mut self) -> u8 {
        self.btag = protocol::next_btag(self.btag);
        self.btag
    }

    /// Class specific IN control request, returns the number of bytes received
    fn control_in(
        &self,
        recipient: rusb::Recipient,
        request: RequestType,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let n = self.handle()?.read_control(
            rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, recipient),
            request as u8,
            value,
            index,
            buf,
            self.timeout,
        )?;
        Ok(n)
    }

    /// Opens (searches for) the USBTMC interface of the device
    ///
    /// It loops through the available usb interfaces and uses the first that
    /// matches the USBTMC class and subclass
    pub fn open(&mut self) -> Result<(), Error> {
        if self.connected {
            debug!("device already connected");
            return Ok(());
        }

        if self.handle.is_none() {
            self.handle = Some(self.device.open()?);
        }

        let desc = self.device.device_descriptor()?;

        'outer: for cfg_desc in (0..desc.num_configurations())
            .filter_map(|num| self.device.config_descriptor(num).ok())
        {
            for iface_desc in cfg_desc.interfaces().flat_map(|iface| iface.descriptors()) {
                if iface_desc.class_code() != protocol::USBTMC_BINTERFACE_CLASS
                    || iface_desc.sub_class_code() != protocol::USBTMC_BINTERFACE_SUBCLASS
                {
                    continue;
                }

                self.usb488 = iface_desc.protocol_code() == protocol::USB488_BINTERFACE_PROTOCOL;
                self.config_num = Some(cfg_desc.number());
                self.iface_num = Some(iface_desc.interface_number());

                for ep_desc in iface_desc.endpoint_descriptors() {
                    match (ep_desc.transfer_type(), ep_desc.direction()) {
                        (rusb::TransferType::Bulk, rusb::Direction::Out) => {
                            self.ep_bulk_out = Some(ep_desc.address());
                        }
                        (rusb::TransferType::Bulk, rusb::Direction::In) => {
                            self.ep_bulk_in = Some(ep_desc.address());
                        }
                        (rusb::TransferType::Interrupt, rusb::Direction::In) => {
                            self.ep_interrupt_in = Some(ep_desc.address());
                        }
                        _ => {}
                    }
                }

                // found first interface = happy
                break 'outer;
            }
        }

        // the interrupt endpoint is optional for plain USBTMC
        let (config_num, iface_num) = match (
            self.config_num,
            self.iface_num,
            self.ep_bulk_out,
            self.ep_bulk_in,
        ) {
            (Some(config_num), Some(iface_num), Some(_), Some(_)) => (config_num, iface_num),
            _ => return Err(Error::NotUsbtmcDevice),
        };

        let handle = self.handle.as_mut().ok_or(Error::NoHandle)?;

        // detach kernel driver if necessary
        self.has_kernel_driver = match handle.kernel_driver_active(iface_num) {
            Ok(true) => {
                handle.detach_kernel_driver(iface_num)?;
                debug!("detached kernel driver from interface {}", iface_num);
                true
            }
            _ => false,
        };

        // set configuration if not correct
        if handle.active_configuration() != Ok(config_num) {
            handle.set_active_configuration(config_num)?;
            debug!("set configuration to {}", config_num);
        }

        handle.claim_interface(iface_num)?;

        self.connected = true;
        self.clear()
    }

    /// Closes the device, giving the interface back to the kernel driver
    pub fn close(&mut self) {
        if !self.connected {
            return;
        }

        let iface_num = self.iface_num;
        let has_kernel_driver = self.has_kernel_driver;

        if let (Some(handle), Some(iface_num)) = (self.handle.as_mut(), iface_num) {
            if let Err(e) = handle.release_interface(iface_num) {
                warn!("failed to release interface {}: {}", iface_num, e);
            }

            if has_kernel_driver {
                if let Err(e) = handle.attach_kernel_driver(iface_num) {
                    warn!("failed to attach kernel driver: {}", e);
                }
            }
        }

        self.connected = false;
        self.has_kernel_driver = false;

        self.ep_bulk_out = None;
        self.ep_bulk_in = None;
        self.ep_interrupt_in = None;
    }

    /// Sends a clear request and waits for it to complete
    pub fn clear(&mut self) -> Result<(), Error> {
        let ep = self.endpoints()?;

        let mut buf = [0u8; 1];
        self.control_in(
            rusb::Recipient::Interface,
            RequestType::InitiateClear,
            0x0000,
            ep.iface.into(),
            &mut buf,
        )?;

        if buf[0] != Status::Success as u8 {
            return Err(Error::Request);
        }

        self.poll_status(
            rusb::Recipient::Interface,
            RequestType::CheckClearStatus,
            ep.iface.into(),
            2,
        )?;

        // clear halt condition
        self.handle_mut()?.clear_halt(ep.bulk_out)?;

        Ok(())
    }

    /// Repeats a CHECK_*_STATUS request while the device reports it is pending
    fn poll_status(
        &self,
        recipient: rusb::Recipient,
        request: RequestType,
        index: u16,
        len: usize,
    ) -> Result<(), Error> {
        let mut buf = vec![0u8; len];

        for _ in 0..MAX_STATUS_POLLS {
            self.control_in(recipient, request, 0x0000, index, &mut buf)?;

            match Status::from_byte(buf[0]) {
                Some(Status::Pending) => std::thread::sleep(STATUS_POLL_INTERVAL),
                Some(Status::Success) => return Ok(()),
                _ => return Err(Error::Request),
            }
        }

        Err(Error::Timeout)
    }

    /// Ask to the device which features are supported
    pub fn get_capabilities(&mut self) -> Result<Capabilities, Error> {
        let ep = self.endpoints()?;

        let mut buf = [0u8; 0x18];
        let n = self.control_in(
            rusb::Recipient::Interface,
            RequestType::GetCapabilities,
            0x0000,
            ep.iface.into(),
            &mut buf,
        )?;

        let capabilities = Capabilities::from_response(&buf[..n])?;
        self.capabilities = Some(capabilities.clone());
        Ok(capabilities)
    }

    /// Flash the identification indicator of the device
    pub fn pulse(&mut self) -> Result<(), Error> {
        let ep = self.endpoints()?;

        let can_pulse = match &self.capabilities {
            Some(c) => c.pulse,
            None => self.get_capabilities()?.pulse,
        };

        if !can_pulse {
            return Err(Error::NotSupported);
        }

        let mut buf = [0u8; 1];
        self.control_in(
            rusb::Recipient::Interface,
            RequestType::IndicatorPulse,
            0x0000,
            ep.iface.into(),
            &mut buf,
        )?;

        if buf[0] != Status::Success as u8 {
            return Err(Error::Request);
        }

        Ok(())
    }

    /// Write a string to the instrument
    pub fn write(&mut self, message: &str) -> Result<usize, Error> {
        self.write_raw(message.as_bytes())
    }

    /// Write binary data to the instrument
    pub fn write_raw(&mut self, data: &[u8]) -> Result<usize, Error> {
        let ep = self.endpoints()?;

        let mut sent_bytes = 0;
        for packet in protocol::bulk_out_packets(data, protocol::next_btag(self.btag)) {
            self.btag = packet.btag;

            let result = self.handle()?.write_bulk(ep.bulk_out, &packet.bytes, self.timeout);
            if let Err(e) = result {
                warn!("failed to send chunk during bulk out: {}", e);
                let abort = self.abort_bulk_out(ep, packet.btag);
                return Err(transfer_failed(e, abort));
            }

            sent_bytes += packet.payload_len;
        }

        Ok(sent_bytes)
    }

    /// Abort a bulk-out operation
    fn abort_bulk_out(&mut self, ep: Endpoints, btag: u8) -> Result<(), Error> {
        let mut buf = [0u8; 2];
        self.control_in(
            rusb::Recipient::Endpoint,
            RequestType::InitiateAbortBulkOut,
            u16::from(btag),
            ep.bulk_out.into(),
            &mut buf,
        )?;

        if buf[0] != Status::Success as u8 {
            // nothing was in flight
            return Ok(());
        }

        self.poll_status(
            rusb::Recipient::Endpoint,
            RequestType::CheckAbortBulkOutStatus,
            ep.bulk_out.into(),
            8,
        )?;
        self.handle_mut()?.clear_halt(ep.bulk_out)?;

        Ok(())
    }

    /// Abort a bulk-in operation
    fn abort_bulk_in(&mut self, ep: Endpoints, btag: u8) -> Result<(), Error> {
        let mut buf = [0u8; 2];
        self.control_in(
            rusb::Recipient::Endpoint,
            RequestType::InitiateAbortBulkIn,
            u16::from(btag),
            ep.bulk_in.into(),
            &mut buf,
        )?;

        if buf[0] != Status::Success as u8 {
            return Ok(());
        }

        // drain what the device still has queued
        let mut scratch = vec![0u8; 512];
        while let Ok(n) = self.handle()?.read_bulk(ep.bulk_in, &mut scratch, self.timeout) {
            if n < scratch.len() {
                break;
            }
        }

        self.poll_status(
            rusb::Recipient::Endpoint,
            RequestType::CheckAbortBulkInStatus,
            ep.bulk_in.into(),
            8,
        )
    }

    /// Read binary data from the device and decode into an utf-8 string
    pub fn read(&mut self) -> Result<String, Error> {
        let data = self.read_raw()?;
        Ok(String::from_utf8(data)?)
    }

    /// Read binary data from the device
    pub fn read_raw(&mut self) -> Result<Vec<u8>, Error> {
        let ep = self.endpoints()?;

        let mut data = Vec::new();
        let mut buf = vec![0u8; HEADER_SIZE + TRANSFER_SIZE + 3];

        loop {
            let btag = self.advance_btag();
            let request = protocol::make_bulk_header(
                MsgId::DeviceDependent,
                Direction::In,
                btag,
                TRANSFER_SIZE as u32,
                Attributes {
                    end_of_message: false,
                    term_char: self.term_char,
                },
            );

            let result = self.handle()?.write_bulk(ep.bulk_out, &request, self.timeout);
            if let Err(e) = result {
                warn!("failed to request bulk in: {}", e);
                let abort = self.abort_bulk_out(ep, btag);
                return Err(transfer_failed(e, abort));
            }

            let result = self.handle()?.read_bulk(ep.bulk_in, &mut buf, self.timeout);
            let n = match result {
                Ok(n) => n,
                Err(e) => {
                    warn!("failed to read bulk in: {}", e);
                    let abort = self.abort_bulk_in(ep, btag);
                    return Err(transfer_failed(e, abort));
                }
            };

            let mut transfer = BulkInTransfer::start(&buf[..n], btag)?;
            while !transfer.is_complete() {
                let n = self.handle()?.read_bulk(ep.bulk_in, &mut buf, self.timeout)?;
                if n == 0 {
                    return Err(Error::InvalidResponse(format!(
                        "transfer ended after {} of {} bytes",
                        transfer.received(),
                        transfer.expected()
                    )));
                }
                transfer.extend(&buf[..n]);
            }

            let end_of_message = transfer.end_of_message();
            debug!(
                "bulk in btag {}: {} bytes, eom {}",
                btag,
                transfer.expected(),
                end_of_message
            );
            data.extend_from_slice(&transfer.into_payload());

            if end_of_message {
                break;
            }
        }

        Ok(data)
    }
}

impl<C: rusb::UsbContext> Transport for UsbtmcDevice<C> {
    fn write_raw(&mut self, data: &[u8]) -> Result<usize, Error> {
        UsbtmcDevice::write_raw(self, data)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, Error> {
        UsbtmcDevice::read_raw(self)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn clear(&mut self) -> Result<(), Error> {
        UsbtmcDevice::clear(self)
    }

    fn close(&mut self) {
        UsbtmcDevice::close(self)
    }
}

impl<C: rusb::UsbContext> Drop for UsbtmcDevice<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: rusb::UsbContext> std::fmt::Debug for UsbtmcDevice<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("UsbtmcDevice")
            .field("bus", &self.device.bus_number())
            .field("address", &self.device.address())
            .field("connected", &self.connected)
            .field("usb488", &self.usb488)
            .field("capabilities", &self.capabilities)
            .field("has_kernel_driver", &self.has_kernel_driver)
            .field("config_num", &self.config_num)
            .field("iface_num", &self.iface_num)
            .field("ep_bulk_in", &self.ep_bulk_in)
            .field("ep_bulk_out", &self.ep_bulk_out)
            .field("ep_interrupt_in", &self.ep_interrupt_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_survives_failed_abort() {
        let err = transfer_failed(rusb::Error::Pipe, Err(Error::Request));
        assert!(matches!(err, Error::Rusb(rusb::Error::Pipe)));

        let err = transfer_failed(rusb::Error::Timeout, Err(Error::Timeout));
        assert!(matches!(err, Error::Rusb(rusb::Error::Timeout)));
    }

    #[test]
    fn transfer_error_after_clean_abort() {
        let err = transfer_failed(rusb::Error::Io, Ok(()));
        assert!(matches!(err, Error::Rusb(rusb::Error::Io)));
    }
}
