//! BVLC-SC message kinds the core produces or consumes.
//!
//! Message-kind level only: no wire codec. Encoding/decoding into bytes is a transport
//! concern, out of scope here.
use crate::ids::Vmac;

/// BVLC-SC function codes, at the granularity this core cares about.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvlcFunction {
    Result = 0x00,
    EncapsulatedNpdu = 0x01,
    AddressResolution = 0x02,
    AddressResolutionAck = 0x03,
    AdvertisementSolicitation = 0x04,
    Advertisement = 0x05,
}

/// Error class carried in a `RESULT` NAK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Communication,
}

/// Error code carried in a `RESULT` NAK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    HeaderNotUnderstood,
    OptionalFunctionalityNotSupported,
}

/// A single destination option header, as carried in a BVLC-SC frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationOption {
    /// Marker byte identifying the option, echoed back in a NAK `RESULT`.
    pub marker: u8,
    pub must_understand: bool,
    /// Whether this node recognizes the option code.
    pub known: bool,
}

/// Current status of the node's hub uplink, as reported in an `ADVERTISEMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubConnectionStatus {
    NotConnected,
    ConnectedPrimary,
    ConnectedFailover,
}

/// A decoded BVLC-SC control or data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BvlcMessage {
    /// A NAK or informational result. `nak_function` is set when this result is a NAK for
    /// a request of the named function code (used to detect resolution NAKs).
    Result {
        nak_function: Option<BvlcFunction>,
        error_class: ErrorClass,
        error_code: ErrorCode,
        marker: Option<u8>,
    },
    /// Advertises this node's capabilities; always ignored on receipt.
    Advertisement {
        hub_connection_status: HubConnectionStatus,
        accept_direct_connections: bool,
        max_bvlc_len: u16,
        max_npdu_len: u16,
    },
    /// Requests that the peer send an `Advertisement`.
    AdvertisementSolicitation,
    /// Requests the accept-URIs of the addressed peer.
    AddressResolution,
    /// Carries the accept-URIs of the addressed peer as a raw, undecoded payload; the
    /// space-separated URL list is parsed by [`crate::resolution`].
    AddressResolutionAck { payload: Vec<u8> },
    /// An encapsulated NPDU, surfaced to the application unmodified.
    EncapsulatedNpdu { npdu: Vec<u8> },
}

impl BvlcMessage {
    pub fn function(&self) -> BvlcFunction {
        match self {
            Self::Result { .. } => BvlcFunction::Result,
            Self::Advertisement { .. } => BvlcFunction::Advertisement,
            Self::AdvertisementSolicitation => BvlcFunction::AdvertisementSolicitation,
            Self::AddressResolution => BvlcFunction::AddressResolution,
            Self::AddressResolutionAck { .. } => BvlcFunction::AddressResolutionAck,
            Self::EncapsulatedNpdu { .. } => BvlcFunction::EncapsulatedNpdu,
        }
    }
}

/// A decoded inbound frame, as handed to the Supervisor by any sub-component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub origin: Vmac,
    pub destination_options: Vec<DestinationOption>,
    pub message: BvlcMessage,
}

impl InboundFrame {
    /// The first unknown `must_understand` option, if any.
    pub fn unknown_must_understand_option(&self) -> Option<&DestinationOption> {
        self.destination_options
            .iter()
            .find(|opt| opt.must_understand && !opt.known)
    }
}

/// Encodes a message-kind-level [`BvlcMessage`] addressed to `dest` into a wire PDU.
///
/// The wire codec itself is external; the Supervisor only ever hands a
/// decoded message and its destination to this trait and forwards the resulting bytes to
/// the sub-component that owns the socket the reply goes out on.
#[cfg_attr(feature = "mocks", mockall::automock)]
pub trait BvlcEncoder: Send {
    fn encode(&self, dest: Vmac, message: &BvlcMessage) -> Vec<u8>;
}

impl<F: Fn(Vmac, &BvlcMessage) -> Vec<u8> + Send> BvlcEncoder for F {
    fn encode(&self, dest: Vmac, message: &BvlcMessage) -> Vec<u8> {
        self(dest, message)
    }
}
