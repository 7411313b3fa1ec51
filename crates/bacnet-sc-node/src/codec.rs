//! BVLC-SC wire codec.
//!
//! `bacnet-sc-core` treats wire encoding as external (`bvlc.rs`'s explicit non-goal): the
//! Supervisor only ever produces message-kind-level [`BvlcMessage`]s and expects decoded
//! [`InboundFrame`]s back. This is the concrete codec this binary pairs with its transport —
//! JSON framing, chosen for inspectability over matching the ASHRAE 135 binary format byte
//! for byte.
use std::sync::{Arc, Mutex};

use bacnet_sc_core::bvlc::{DestinationOption, ErrorClass, ErrorCode, HubConnectionStatus};
use bacnet_sc_core::{BvlcEncoder, BvlcFunction, BvlcMessage, InboundFrame, Vmac};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct WireOption {
    marker: u8,
    must_understand: bool,
    known: bool,
}

impl From<&DestinationOption> for WireOption {
    fn from(opt: &DestinationOption) -> Self {
        Self {
            marker: opt.marker,
            must_understand: opt.must_understand,
            known: opt.known,
        }
    }
}

impl From<WireOption> for DestinationOption {
    fn from(opt: WireOption) -> Self {
        DestinationOption {
            marker: opt.marker,
            must_understand: opt.must_understand,
            known: opt.known,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireFunction {
    Result,
    EncapsulatedNpdu,
    AddressResolution,
    AddressResolutionAck,
    AdvertisementSolicitation,
    Advertisement,
}

impl From<BvlcFunction> for WireFunction {
    fn from(f: BvlcFunction) -> Self {
        match f {
            BvlcFunction::Result => Self::Result,
            BvlcFunction::EncapsulatedNpdu => Self::EncapsulatedNpdu,
            BvlcFunction::AddressResolution => Self::AddressResolution,
            BvlcFunction::AddressResolutionAck => Self::AddressResolutionAck,
            BvlcFunction::AdvertisementSolicitation => Self::AdvertisementSolicitation,
            BvlcFunction::Advertisement => Self::Advertisement,
        }
    }
}

impl From<WireFunction> for BvlcFunction {
    fn from(f: WireFunction) -> Self {
        match f {
            WireFunction::Result => Self::Result,
            WireFunction::EncapsulatedNpdu => Self::EncapsulatedNpdu,
            WireFunction::AddressResolution => Self::AddressResolution,
            WireFunction::AddressResolutionAck => Self::AddressResolutionAck,
            WireFunction::AdvertisementSolicitation => Self::AdvertisementSolicitation,
            WireFunction::Advertisement => Self::Advertisement,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireErrorClass {
    Communication,
}

impl From<ErrorClass> for WireErrorClass {
    fn from(_: ErrorClass) -> Self {
        Self::Communication
    }
}

impl From<WireErrorClass> for ErrorClass {
    fn from(_: WireErrorClass) -> Self {
        ErrorClass::Communication
    }
}

#[derive(Serialize, Deserialize)]
enum WireErrorCode {
    HeaderNotUnderstood,
    OptionalFunctionalityNotSupported,
}

impl From<ErrorCode> for WireErrorCode {
    fn from(c: ErrorCode) -> Self {
        match c {
            ErrorCode::HeaderNotUnderstood => Self::HeaderNotUnderstood,
            ErrorCode::OptionalFunctionalityNotSupported => Self::OptionalFunctionalityNotSupported,
        }
    }
}

impl From<WireErrorCode> for ErrorCode {
    fn from(c: WireErrorCode) -> Self {
        match c {
            WireErrorCode::HeaderNotUnderstood => Self::HeaderNotUnderstood,
            WireErrorCode::OptionalFunctionalityNotSupported => Self::OptionalFunctionalityNotSupported,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireHubStatus {
    NotConnected,
    ConnectedPrimary,
    ConnectedFailover,
}

impl From<HubConnectionStatus> for WireHubStatus {
    fn from(s: HubConnectionStatus) -> Self {
        match s {
            HubConnectionStatus::NotConnected => Self::NotConnected,
            HubConnectionStatus::ConnectedPrimary => Self::ConnectedPrimary,
            HubConnectionStatus::ConnectedFailover => Self::ConnectedFailover,
        }
    }
}

impl From<WireHubStatus> for HubConnectionStatus {
    fn from(s: WireHubStatus) -> Self {
        match s {
            WireHubStatus::NotConnected => Self::NotConnected,
            WireHubStatus::ConnectedPrimary => Self::ConnectedPrimary,
            WireHubStatus::ConnectedFailover => Self::ConnectedFailover,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireMessage {
    Result {
        nak_function: Option<WireFunction>,
        error_class: WireErrorClass,
        error_code: WireErrorCode,
        marker: Option<u8>,
    },
    Advertisement {
        hub_connection_status: WireHubStatus,
        accept_direct_connections: bool,
        max_bvlc_len: u16,
        max_npdu_len: u16,
    },
    AdvertisementSolicitation,
    AddressResolution,
    AddressResolutionAck {
        payload: Vec<u8>,
    },
    EncapsulatedNpdu {
        npdu: Vec<u8>,
    },
}

impl From<&BvlcMessage> for WireMessage {
    fn from(message: &BvlcMessage) -> Self {
        match message.clone() {
            BvlcMessage::Result {
                nak_function,
                error_class,
                error_code,
                marker,
            } => Self::Result {
                nak_function: nak_function.map(Into::into),
                error_class: error_class.into(),
                error_code: error_code.into(),
                marker,
            },
            BvlcMessage::Advertisement {
                hub_connection_status,
                accept_direct_connections,
                max_bvlc_len,
                max_npdu_len,
            } => Self::Advertisement {
                hub_connection_status: hub_connection_status.into(),
                accept_direct_connections,
                max_bvlc_len,
                max_npdu_len,
            },
            BvlcMessage::AdvertisementSolicitation => Self::AdvertisementSolicitation,
            BvlcMessage::AddressResolution => Self::AddressResolution,
            BvlcMessage::AddressResolutionAck { payload } => Self::AddressResolutionAck { payload },
            BvlcMessage::EncapsulatedNpdu { npdu } => Self::EncapsulatedNpdu { npdu },
        }
    }
}

impl From<WireMessage> for BvlcMessage {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Result {
                nak_function,
                error_class,
                error_code,
                marker,
            } => Self::Result {
                nak_function: nak_function.map(Into::into),
                error_class: error_class.into(),
                error_code: error_code.into(),
                marker,
            },
            WireMessage::Advertisement {
                hub_connection_status,
                accept_direct_connections,
                max_bvlc_len,
                max_npdu_len,
            } => Self::Advertisement {
                hub_connection_status: hub_connection_status.into(),
                accept_direct_connections,
                max_bvlc_len,
                max_npdu_len,
            },
            WireMessage::AdvertisementSolicitation => Self::AdvertisementSolicitation,
            WireMessage::AddressResolution => Self::AddressResolution,
            WireMessage::AddressResolutionAck { payload } => Self::AddressResolutionAck { payload },
            WireMessage::EncapsulatedNpdu { npdu } => Self::EncapsulatedNpdu { npdu },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    origin: [u8; 6],
    destination_options: Vec<WireOption>,
    message: WireMessage,
}

/// Encodes outbound [`BvlcMessage`]s, handed to [`bacnet_sc_core::NodeSupervisor::init`].
///
/// The wire frame's `origin` field always carries this node's own VMAC, not `encode`'s
/// `dest` argument: `dest` only tells the Supervisor which socket to write the resulting
/// bytes to (point-to-point over one WSS connection already implies the recipient), while
/// a receiving peer needs the sender's VMAC to populate `InboundFrame::origin`. The VMAC can
/// change across a restart, so it's threaded in as a shared cell rather than baked in at
/// construction.
pub struct JsonEncoder {
    self_vmac: Arc<Mutex<Vmac>>,
}

impl JsonEncoder {
    pub fn new(self_vmac: Arc<Mutex<Vmac>>) -> Self {
        Self { self_vmac }
    }
}

impl BvlcEncoder for JsonEncoder {
    fn encode(&self, _dest: Vmac, message: &BvlcMessage) -> Vec<u8> {
        let origin = *self.self_vmac.lock().unwrap();
        let frame = WireFrame {
            origin: *origin.as_bytes(),
            destination_options: Vec::new(),
            message: message.into(),
        };
        serde_json::to_vec(&frame).expect("WireFrame always serializes")
    }
}

/// Decodes a raw PDU into a structured [`InboundFrame`]; `None` on malformed input, which
/// the caller should log and drop rather than propagate.
pub fn decode(pdu: &[u8]) -> Option<InboundFrame> {
    let frame: WireFrame = serde_json::from_slice(pdu).ok()?;
    Some(InboundFrame {
        origin: Vmac::new(frame.origin),
        destination_options: frame
            .destination_options
            .into_iter()
            .map(Into::into)
            .collect(),
        message: frame.message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_encapsulated_npdu() {
        let self_vmac = Vmac::new([1, 2, 3, 4, 5, 6]);
        let encoder = JsonEncoder::new(Arc::new(Mutex::new(self_vmac)));
        let message = BvlcMessage::EncapsulatedNpdu {
            npdu: vec![0xaa, 0xbb],
        };
        let pdu = encoder.encode(Vmac::new([9, 9, 9, 9, 9, 9]), &message);
        let frame = decode(&pdu).expect("valid frame");
        assert_eq!(frame.origin, self_vmac);
        assert_eq!(frame.message, message);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"not json").is_none());
    }
}
