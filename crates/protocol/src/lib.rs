//! Wire types for the tether protocol.
//!
//! Every message on the wire is one UTF-8 JSON object terminated by `\n`.
//! Clients send [`Request`]s; the server answers each request that carries an
//! `id` with exactly one [`Response`] echoing that `id`.
//!
//! ```json
//! {"id":1,"method":"surface.write","params":{"surfaceId":"surface-3","text":"hi"}}
//! {"jsonrpc":"2.0","id":1,"result":{"written":2}}
//! ```
//!
//! On failure the response carries an [`ErrorObject`] instead of a result:
//!
//! ```json
//! {"jsonrpc":"2.0","id":1,"error":{"code":-32001,"message":"surface-3 not found"}}
//! ```
//!
//! Types in this crate are pure data: decoding, encoding and the stable error
//! code table. Routing lives in `tether-cli`.

pub mod error;
pub mod message;

pub use error::{DecodeError, ErrorCode, ErrorObject};
pub use message::{JSONRPC_VERSION, Params, Request, RequestId, Response};
