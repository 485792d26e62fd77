//! mimic-protocol: RESP2 wire protocol.
//!
//! Incremental parsing and direct-to-buffer serialization of the frames
//! stock Redis clients speak, plus typed command parsing.
//!
//! ```
//! use bytes::BytesMut;
//! use mimic_protocol::{parse_frame, Command, Frame};
//!
//! let input = b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n";
//! let (frame, consumed) = parse_frame(input).unwrap().unwrap();
//! assert_eq!(consumed, input.len());
//! assert!(matches!(Command::from_frame(frame).unwrap(), Command::Get { .. }));
//!
//! let mut buf = BytesMut::new();
//! Frame::Null.serialize(&mut buf);
//! assert_eq!(&buf[..], b"$-1\r\n");
//! ```

pub mod command;
pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use command::{Command, ExpireUnit, ListEnd, SetExpire, SetOp};
pub use error::ProtocolError;
pub use parse::{parse_frame, parse_frame_bytes};
pub use types::Frame;
