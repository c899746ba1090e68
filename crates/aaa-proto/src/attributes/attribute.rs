use super::AttributeType;
use crate::packet::PacketError;
use std::net::Ipv4Addr;

/// RADIUS attribute TLV as defined in RFC 2865 Section 5
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |    Length     |  Value ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The length octet covers the two header octets, so a value carries
/// at most 253 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Type + length octets.
    pub const HEADER_LENGTH: usize = 2;
    pub const MAX_VALUE_LENGTH: usize = 253;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::Attribute(format!(
                "value too long: {} bytes (max {})",
                value.len(),
                Self::MAX_VALUE_LENGTH
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    pub fn string(attr_type: AttributeType, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type as u8, value.into().into_bytes())
    }

    /// 32-bit big-endian integer attribute.
    pub fn integer(attr_type: AttributeType, value: u32) -> Result<Self, PacketError> {
        Self::new(attr_type as u8, value.to_be_bytes().to_vec())
    }

    pub fn ipv4(attr_type: AttributeType, addr: Ipv4Addr) -> Result<Self, PacketError> {
        Self::new(attr_type as u8, addr.octets().to_vec())
    }

    pub fn encoded_length(&self) -> usize {
        Self::HEADER_LENGTH + self.value.len()
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), PacketError> {
        let length = self.encoded_length();
        if length > u8::MAX as usize {
            return Err(PacketError::Attribute(format!(
                "encoded attribute too long: {length} bytes"
            )));
        }
        buf.push(self.attr_type);
        buf.push(length as u8);
        buf.extend_from_slice(&self.value);
        Ok(())
    }

    /// Decode one attribute from the front of `data`. The caller
    /// advances by [`Attribute::encoded_length`].
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(PacketError::Attribute(format!(
                "attribute header truncated: {} bytes",
                data.len()
            )));
        }

        let attr_type = data[0];
        let length = data[1] as usize;

        if length < Self::HEADER_LENGTH {
            return Err(PacketError::Attribute(format!(
                "invalid attribute length: {length}"
            )));
        }
        if length > data.len() {
            return Err(PacketError::Attribute(format!(
                "attribute length {length} exceeds remaining {} bytes",
                data.len()
            )));
        }

        Ok(Attribute {
            attr_type,
            value: data[Self::HEADER_LENGTH..length].to_vec(),
        })
    }

    pub fn as_string(&self) -> Option<String> {
        String::from_utf8(self.value.clone()).ok()
    }

    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }
}
