/// Wire codec for events.
///
/// Layout: `<sig_len:1><signature packet:sig_len><encoded event>`. An
/// unsigned event starts with `0x00` and the encoded envelope immediately
/// after. The signature covers exactly the encoded-envelope bytes that
/// follow it, never the length byte itself.
use std::sync::Arc;

use crate::error::ProtocolError;
use crate::event::Event;
use crate::signature::{
    encode_packet, parse_packet, Signer, Verifier, SIG_TYPE_ED25519, SIG_TYPE_X509,
};
use crate::types::Encoding;

/// Resolves a verifier for an event creator's `(name, uuid)` identity.
/// Key distribution is the application's problem; this is the seam it
/// plugs into.
pub type VerifierLookup = Arc<dyn Fn(&str, &str) -> Option<Arc<dyn Verifier>> + Send + Sync>;

/// Longest raw signature a packet can carry (type and length bytes
/// included, the packet must still fit the one-byte wire prefix).
const MAX_RAW_SIGNATURE: usize = u8::MAX as usize - 2;

impl Event {
    /// Serialize into the transport payload, signing if a signer is given.
    ///
    /// A signer that produces a signature shorter than 8 bytes is a
    /// misconfiguration and fails serialization — the event is never
    /// silently sent unsigned.
    pub fn serialize(&self, signer: Option<&dyn Signer>) -> Result<Vec<u8>, ProtocolError> {
        if !self.is_prepared() {
            return Err(ProtocolError::Unprepared);
        }
        let data = self.encoding.encode(self)?;
        let mut out = Vec::with_capacity(1 + data.len() + 66);
        match signer {
            None => out.push(0),
            Some(signer) => {
                let raw = signer.sign(&data);
                if raw.len() < 8 {
                    return Err(ProtocolError::SignatureTooShort { len: raw.len() });
                }
                if raw.len() > MAX_RAW_SIGNATURE {
                    return Err(ProtocolError::SignatureLengthMismatch {
                        declared: MAX_RAW_SIGNATURE,
                        actual: raw.len(),
                    });
                }
                let packet = encode_packet(signer.sig_type(), &raw)?;
                out.push(packet.len() as u8);
                out.extend_from_slice(&packet);
            }
        }
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Deserialize a transport payload, verifying the signature if present.
    ///
    /// A failed verification never delivers the event. A missing verifier
    /// for a signed event is a configuration error ([`ProtocolError::NoVerifier`]),
    /// deliberately distinct from [`ProtocolError::SignatureInvalid`].
    pub fn deserialize(
        input: &[u8],
        lookup: Option<&VerifierLookup>,
        encoding: Encoding,
    ) -> Result<Event, ProtocolError> {
        if input.len() < 4 {
            return Err(ProtocolError::TooShort { len: input.len() });
        }
        let sig_len = input[0] as usize;
        if input.len() < 4 + sig_len {
            return Err(ProtocolError::TruncatedSignature {
                sig_len,
                len: input.len(),
            });
        }
        let packet = &input[1..1 + sig_len];
        let data = &input[1 + sig_len..];

        let mut ev: Event = encoding.decode(data)?;
        ev.encoding = encoding;

        if sig_len > 0 {
            let (sig_type, raw) = parse_packet(packet)?;
            match sig_type {
                0 => return Err(ProtocolError::InvalidSignatureType),
                SIG_TYPE_ED25519 | SIG_TYPE_X509 => {
                    let no_verifier = || ProtocolError::NoVerifier {
                        node_name: ev.node_name.clone(),
                        node_uuid: ev.node_uuid.clone(),
                    };
                    let lookup = lookup.ok_or_else(no_verifier)?;
                    let verifier = lookup(&ev.node_name, &ev.node_uuid).ok_or_else(no_verifier)?;
                    if verifier.sig_type() != sig_type || !verifier.verify(data, raw) {
                        return Err(ProtocolError::SignatureInvalid);
                    }
                }
                other => return Err(ProtocolError::UnknownSignatureType(other)),
            }
            ev.signature = packet.to_vec();
        }
        Ok(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Ed25519Signer;

    fn prepared_event(body: &[u8]) -> Event {
        let mut ev = Event::new(
            "testnode",
            "77ab2b23-4f1b-4247-be45-dcc2d93ffb94",
            Encoding::MsgPack,
        );
        ev.body = body.to_vec();
        ev.prepare();
        ev
    }

    fn lookup_for(signer: &Ed25519Signer) -> VerifierLookup {
        let verifier: Arc<dyn Verifier> = Arc::new(
            crate::signature::Ed25519Verifier::from_public_key(&signer.public_key()).unwrap(),
        );
        Arc::new(move |_name, _uuid| Some(verifier.clone()))
    }

    #[test]
    fn unsigned_roundtrip() {
        let ev = prepared_event(b"hello");
        let bytes = ev.serialize(None).expect("serialize");
        assert_eq!(bytes[0], 0, "unsigned events start with a zero byte");

        let decoded = Event::deserialize(&bytes, None, Encoding::MsgPack).expect("deserialize");
        assert_eq!(ev, decoded);
        assert!(decoded.signature.is_empty());
    }

    #[test]
    fn signed_roundtrip() {
        let signer = Ed25519Signer::generate();
        let ev = prepared_event(b"signed payload");
        let bytes = ev.serialize(Some(&signer)).expect("serialize");
        assert_eq!(bytes[0] as usize, 66, "ed25519 packet is 66 bytes");

        let lookup = lookup_for(&signer);
        let decoded =
            Event::deserialize(&bytes, Some(&lookup), Encoding::MsgPack).expect("deserialize");
        assert_eq!(ev, decoded);
        assert_eq!(decoded.signature.len(), 66);
    }

    #[test]
    fn tampered_signature_rejected() {
        let signer = Ed25519Signer::generate();
        let ev = prepared_event(b"payload");
        let mut bytes = ev.serialize(Some(&signer)).unwrap();
        bytes[10] ^= 0x01; // inside the signature packet

        let lookup = lookup_for(&signer);
        let err = Event::deserialize(&bytes, Some(&lookup), Encoding::MsgPack).unwrap_err();
        assert!(matches!(err, ProtocolError::SignatureInvalid));
    }

    #[test]
    fn tampered_body_rejected() {
        let signer = Ed25519Signer::generate();
        let ev = prepared_event(b"payload");
        let mut bytes = ev.serialize(Some(&signer)).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01; // inside the encoded envelope

        let lookup = lookup_for(&signer);
        let err = Event::deserialize(&bytes, Some(&lookup), Encoding::MsgPack).unwrap_err();
        assert!(matches!(err, ProtocolError::SignatureInvalid));
    }

    #[test]
    fn short_inputs_rejected() {
        for len in 0..4 {
            let input = vec![0u8; len];
            let err = Event::deserialize(&input, None, Encoding::MsgPack).unwrap_err();
            assert!(
                matches!(err, ProtocolError::TooShort { .. }),
                "{len}-byte input must be too short"
            );
        }
    }

    #[test]
    fn truncated_signature_rejected() {
        // Claims a 66-byte signature but carries only 8 more bytes.
        let mut input = vec![66u8];
        input.extend_from_slice(&[0xAA; 8]);
        let err = Event::deserialize(&input, None, Encoding::MsgPack).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedSignature { sig_len: 66, .. }
        ));
    }

    #[test]
    fn signature_type_zero_rejected() {
        let signer = Ed25519Signer::generate();
        let ev = prepared_event(b"payload");
        let mut bytes = ev.serialize(Some(&signer)).unwrap();
        bytes[1] = 0; // type byte inside the packet

        let lookup = lookup_for(&signer);
        let err = Event::deserialize(&bytes, Some(&lookup), Encoding::MsgPack).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSignatureType));
    }

    #[test]
    fn unknown_signature_type_rejected() {
        let signer = Ed25519Signer::generate();
        let ev = prepared_event(b"payload");
        let mut bytes = ev.serialize(Some(&signer)).unwrap();
        bytes[1] = 9;

        let lookup = lookup_for(&signer);
        let err = Event::deserialize(&bytes, Some(&lookup), Encoding::MsgPack).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownSignatureType(9)));
    }

    #[test]
    fn signed_event_without_verifier_is_config_error() {
        let signer = Ed25519Signer::generate();
        let ev = prepared_event(b"payload");
        let bytes = ev.serialize(Some(&signer)).unwrap();

        // No lookup at all.
        let err = Event::deserialize(&bytes, None, Encoding::MsgPack).unwrap_err();
        assert!(matches!(err, ProtocolError::NoVerifier { .. }));

        // Lookup that knows nothing about this node.
        let lookup: VerifierLookup = Arc::new(|_, _| None);
        let err = Event::deserialize(&bytes, Some(&lookup), Encoding::MsgPack).unwrap_err();
        assert!(matches!(err, ProtocolError::NoVerifier { .. }));
    }

    #[test]
    fn unprepared_event_refuses_to_serialize() {
        let mut ev = Event::new("testnode", "uuid", Encoding::MsgPack);
        ev.body = b"data".to_vec();
        assert!(matches!(
            ev.serialize(None),
            Err(ProtocolError::Unprepared)
        ));
    }

    #[test]
    fn short_signer_output_is_fatal() {
        struct StubSigner;
        impl Verifier for StubSigner {
            fn verify(&self, _: &[u8], _: &[u8]) -> bool {
                true
            }
            fn sig_type(&self) -> u8 {
                SIG_TYPE_ED25519
            }
            fn public_key(&self) -> Vec<u8> {
                Vec::new()
            }
        }
        impl Signer for StubSigner {
            fn sign(&self, _: &[u8]) -> Vec<u8> {
                vec![1, 2, 3]
            }
            fn private_key(&self) -> Vec<u8> {
                Vec::new()
            }
        }

        let ev = prepared_event(b"payload");
        let err = ev.serialize(Some(&StubSigner)).unwrap_err();
        assert!(matches!(err, ProtocolError::SignatureTooShort { len: 3 }));
    }

    #[test]
    fn json_encoding_roundtrip() {
        let mut ev = Event::new("testnode", "uuid-1", Encoding::Json);
        ev.body = b"{\"k\":1}".to_vec();
        ev.prepare();
        let bytes = ev.serialize(None).unwrap();
        let decoded = Event::deserialize(&bytes, None, Encoding::Json).unwrap();
        assert_eq!(ev, decoded);
    }
}
