//! RADIUS wire protocol subset for the AAA server.
//!
//! Implements the pieces of RFC 2865 and RFC 2866 the server actually
//! speaks: the packet and attribute codecs, Request/Response
//! Authenticator calculation, accounting-request authenticator
//! verification and User-Password obfuscation. Everything here is pure
//! byte-level code; sockets and policy live in `aaa-server`.
//!
//! # Example
//!
//! ```rust
//! use aaa_proto::{Packet, Code, Attribute, AttributeType};
//! use aaa_proto::auth::{generate_request_authenticator, encrypt_user_password};
//!
//! let req_auth = generate_request_authenticator();
//! let mut packet = Packet::new(Code::AccessRequest, 1, req_auth);
//! packet.add_attribute(Attribute::string(AttributeType::UserName, "alice").unwrap());
//!
//! let encrypted = encrypt_user_password("password", b"s3cret", &req_auth);
//! packet.add_attribute(Attribute::new(AttributeType::UserPassword as u8, encrypted).unwrap());
//!
//! let bytes = packet.encode().unwrap();
//! assert_eq!(Packet::decode(&bytes).unwrap().identifier, 1);
//! ```

pub mod accounting;
pub mod attributes;
pub mod auth;
pub mod packet;

pub use accounting::{AcctStatusType, AcctTerminateCause};
pub use attributes::{Attribute, AttributeType};
pub use auth::{
    calculate_response_authenticator, decrypt_user_password, encrypt_user_password,
    generate_request_authenticator, sign_accounting_request,
    verify_accounting_request_authenticator, PasswordError,
};
pub use packet::{Code, Packet, PacketError};
