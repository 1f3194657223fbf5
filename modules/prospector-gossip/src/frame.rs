use prospector_wal::WalRecord;

use crate::error::{GossipError, Result};

/// Probe sent by address-range discovery.
const ENQ: u8 = 0x05;
/// Reply to a probe.
const ACK: u8 = 0x06;

/// One datagram. Records travel in their journal encoding, one per
/// datagram; control frames are a marker byte followed by a node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Record(WalRecord),
    Probe { node_id: String },
    ProbeReply { node_id: String },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Record(record) => Ok(record.encode()?.into_bytes()),
            Self::Probe { node_id } => Ok(control(ENQ, node_id)),
            Self::ProbeReply { node_id } => Ok(control(ACK, node_id)),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            None => Err(GossipError::Frame("empty datagram".into())),
            Some(&ENQ) => Ok(Self::Probe {
                node_id: node_id(&bytes[1..])?,
            }),
            Some(&ACK) => Ok(Self::ProbeReply {
                node_id: node_id(&bytes[1..])?,
            }),
            Some(_) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| GossipError::Frame(format!("not utf-8: {e}")))?;
                Ok(Self::Record(WalRecord::decode(text)?))
            }
        }
    }
}

fn control(marker: u8, node_id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(node_id.len() + 1);
    out.push(marker);
    out.extend_from_slice(node_id.as_bytes());
    out
}

fn node_id(bytes: &[u8]) -> Result<String> {
    let id = std::str::from_utf8(bytes)
        .map_err(|e| GossipError::Frame(format!("node id not utf-8: {e}")))?
        .trim();
    if id.is_empty() {
        return Err(GossipError::Frame("control frame without node id".into()));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_frames_use_journal_encoding() {
        let record = WalRecord::new("node-a", "acme", "phone", "555");
        let bytes = Frame::Record(record.clone()).encode().unwrap();
        assert_eq!(bytes, record.encode().unwrap().into_bytes());
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Record(record));
    }

    #[test]
    fn control_frames_carry_node_id() {
        let probe = Frame::Probe {
            node_id: "coder".into(),
        };
        let bytes = probe.encode().unwrap();
        assert_eq!(bytes[0], 0x05);
        assert_eq!(Frame::decode(&bytes).unwrap(), probe);
        assert!(Frame::decode(&[0x06]).is_err());
        assert!(Frame::decode(&[]).is_err());
        assert!(Frame::decode(b"garbage").is_err());
    }
}
