//! Vendor-specific USB class carrying the sample stream.
//!
//! One interface with a bulk IN endpoint (measurements) and a bulk OUT endpoint (output levels).
//! Packets are moved in max-packet-size chunks straight from and into the leased packet halves.
//! Vendor control requests are decoded here. Those that only read device state are answered
//! directly, the rest are queued for the main loop.
use heapless::Deque;
use usb_device::{
    class_prelude::*,
    control::{Recipient, RequestType},
};

use super::hal::stm32;
use crate::command::{frame_response, Request, SetupPacket};
use crate::scheduler::{Completion, HostLink, InLease, OutLease, TransferError};
use crate::synchronizer::Frame;

/// Full speed bulk endpoints.
const MAX_PACKET_SIZE: u16 = 64;

const VENDOR_CLASS: u8 = 0xff;

/// Current (micro)frame number of the OTG2 core.
pub fn frame_number() -> Frame {
    // Note(unsafe): Read-only access to a status register.
    let dsts = unsafe { &*stm32::OTG2_HS_DEVICE::ptr() }.dsts.read().bits();
    ((dsts >> 8) & 0x3fff) as Frame
}

pub struct BulkLink<'a, B: UsbBus> {
    interface: InterfaceNumber,
    bulk_in: EndpointIn<'a, B>,
    bulk_out: EndpointOut<'a, B>,
    /// Lease and bytes written to the endpoint.
    inbound: Option<(InLease, usize)>,
    /// Lease and bytes read from the endpoint.
    outbound: Option<(OutLease, usize)>,
    completions: Deque<Completion, 2>,
    requests: Deque<Request, 4>,
    info: [&'static str; 2],
}

impl<'a, B: UsbBus> BulkLink<'a, B> {
    /// # Args
    /// * `alloc` - USB bus allocator.
    /// * `info` - Hardware and firmware identification strings.
    pub fn new(alloc: &'a UsbBusAllocator<B>, info: [&'static str; 2]) -> Self {
        Self {
            interface: alloc.interface(),
            bulk_in: alloc.bulk(MAX_PACKET_SIZE),
            bulk_out: alloc.bulk(MAX_PACKET_SIZE),
            inbound: None,
            outbound: None,
            completions: Deque::new(),
            requests: Deque::new(),
            info,
        }
    }

    /// Next vendor request for the main loop.
    pub fn take_request(&mut self) -> Option<Request> {
        self.requests.pop_front()
    }

    fn complete(&mut self, completion: Completion) {
        if self.completions.push_back(completion).is_err() {
            log::error!("Completion queue full");
        }
    }

    fn write_in(&mut self) {
        let Some((lease, written)) = self.inbound.as_mut() else {
            return;
        };
        let bytes = lease.bytes();
        if *written == bytes.len() {
            if let Some((lease, _)) = self.inbound.take() {
                self.complete(Completion::In(lease, Ok(())));
            }
            return;
        }
        let end = bytes.len().min(*written + MAX_PACKET_SIZE as usize);
        match self.bulk_in.write(&bytes[*written..end]) {
            Ok(n) => *written += n,
            Err(UsbError::WouldBlock) => {}
            Err(e) => {
                log::warn!("Bulk IN: {e:?}");
                if let Some((lease, _)) = self.inbound.take() {
                    self.complete(Completion::In(lease, Err(TransferError::Link)));
                }
            }
        }
    }

    fn read_out(&mut self) {
        let Some((lease, received)) = self.outbound.as_mut() else {
            return;
        };
        let buf = &mut lease.bytes_mut()[*received..];
        let result = match self.bulk_out.read(buf) {
            Ok(n) => {
                *received += n;
                if buf.len() == n {
                    Some(Ok(()))
                } else if n < MAX_PACKET_SIZE as usize {
                    Some(Err(TransferError::Short(*received)))
                } else {
                    None
                }
            }
            Err(UsbError::WouldBlock) => None,
            Err(e) => {
                log::warn!("Bulk OUT: {e:?}");
                Some(Err(TransferError::Link))
            }
        };
        if let Some(result) = result {
            if let Some((lease, _)) = self.outbound.take() {
                self.complete(Completion::Out(lease, result));
            }
        }
    }

    fn vendor_request(&self, xfer_request: &usb_device::control::Request) -> Option<SetupPacket> {
        (xfer_request.request_type == RequestType::Vendor
            && xfer_request.recipient == Recipient::Device)
            .then_some(SetupPacket {
                request: xfer_request.request,
                value: xfer_request.value,
                index: xfer_request.index,
            })
    }

    fn queue(&mut self, request: Request) -> bool {
        self.requests.push_back(request).is_ok()
    }
}

impl<B: UsbBus> UsbClass<B> for BulkLink<'_, B> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface(self.interface, VENDOR_CLASS, 0, 0)?;
        writer.endpoint(&self.bulk_in)?;
        writer.endpoint(&self.bulk_out)?;
        Ok(())
    }

    fn reset(&mut self) {
        if let Some((lease, _)) = self.inbound.take() {
            self.complete(Completion::In(lease, Err(TransferError::Aborted)));
        }
        if let Some((lease, _)) = self.outbound.take() {
            self.complete(Completion::Out(lease, Err(TransferError::Aborted)));
        }
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let Some(setup) = self.vendor_request(xfer.request()) else {
            return;
        };
        match Request::try_from(setup) {
            Ok(Request::Info(info)) => {
                xfer.accept_with_static(self.info[info as usize].as_bytes())
                    .ok();
            }
            Ok(Request::FrameNumber) => {
                xfer.accept_with(&frame_response(frame_number())).ok();
            }
            // Host software issues the remaining requests with an empty IN data stage.
            Ok(request) if self.queue(request) => {
                xfer.accept_with(&[]).ok();
            }
            Ok(request) => {
                log::warn!("Request queue full, dropping {request:?}");
                xfer.reject().ok();
            }
            Err(e) => {
                log::warn!("Rejecting vendor request: {e:?}");
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let Some(setup) = self.vendor_request(xfer.request()) else {
            return;
        };
        match Request::try_from(setup) {
            Ok(request) if !request.has_response() && self.queue(request) => {
                xfer.accept().ok();
            }
            other => {
                log::warn!("Rejecting vendor request: {other:?}");
                xfer.reject().ok();
            }
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr == self.bulk_in.address() {
            self.write_in();
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.bulk_out.address() {
            self.read_out();
        }
    }
}

impl<B: UsbBus> HostLink for BulkLink<'_, B> {
    fn submit_in(&mut self, lease: InLease) {
        self.inbound = Some((lease, 0));
        self.write_in();
    }

    fn submit_out(&mut self, lease: OutLease) {
        self.outbound = Some((lease, 0));
        self.read_out();
    }

    fn abort_in(&mut self) -> Option<InLease> {
        self.inbound.take().map(|(lease, _)| lease)
    }

    fn abort_out(&mut self) -> Option<OutLease> {
        self.outbound.take().map(|(lease, _)| lease)
    }

    fn poll_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }
}
