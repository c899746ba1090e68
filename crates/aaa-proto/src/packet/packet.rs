use super::Code;
use crate::attributes::Attribute;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    #[error("declared length {declared} does not fit the datagram ({available} bytes)")]
    LengthMismatch { declared: usize, available: usize },
    #[error("unknown packet code: {0}")]
    UnknownCode(u8),
    #[error("encoded packet too large: {0} bytes")]
    TooLarge(usize),
    #[error("attribute error: {0}")]
    Attribute(String),
}

/// RADIUS packet as defined in RFC 2865 Section 3
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Authenticator                         |
/// |                           (16 bytes)                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
#[derive(Debug, Clone)]
pub struct Packet {
    pub code: Code,
    /// Echoed from request to response; the NAS uses it to match
    /// retransmissions with replies.
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// Fixed header: code + identifier + length + authenticator.
    pub const HEADER_SIZE: usize = 20;
    /// Maximum packet size per RFC 2865.
    pub const MAX_PACKET_SIZE: usize = 4096;

    pub fn new(code: Code, identifier: u8, authenticator: [u8; 16]) -> Self {
        Packet {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Total encoded length, header included.
    pub fn length(&self) -> usize {
        Self::HEADER_SIZE
            + self
                .attributes
                .iter()
                .map(Attribute::encoded_length)
                .sum::<usize>()
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let total = self.length();
        if total > Self::MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(total));
        }

        let mut buf = Vec::with_capacity(total);
        buf.push(self.code.as_u8());
        buf.push(self.identifier);
        buf.extend_from_slice(&(total as u16).to_be_bytes());
        buf.extend_from_slice(&self.authenticator);
        for attr in &self.attributes {
            attr.encode_into(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(PacketError::Truncated(data.len()));
        }

        let code = Code::from_u8(data[0]).ok_or(PacketError::UnknownCode(data[0]))?;
        let identifier = data[1];
        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;

        // RFC 2865 Section 3: octets outside the declared length are
        // padding and ignored; a declared length beyond the datagram
        // is a malformed packet.
        if declared < Self::HEADER_SIZE || declared > Self::MAX_PACKET_SIZE || declared > data.len()
        {
            return Err(PacketError::LengthMismatch {
                declared,
                available: data.len(),
            });
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..20]);

        let mut attributes = Vec::new();
        let mut rest = &data[Self::HEADER_SIZE..declared];
        while !rest.is_empty() {
            let attr = Attribute::decode(rest)?;
            rest = &rest[attr.encoded_length()..];
            attributes.push(attr);
        }

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// First attribute of the given type, if present.
    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}
