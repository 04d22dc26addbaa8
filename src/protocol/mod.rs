//! Client-facing wire protocol
//!
//! Requests, responses and pushed event frames all share one JSON envelope:
//!
//! ```text
//!   request:  {"id":"1","method":"subscribe","params":{...}}
//!   response: {"id":"1","result":true,"error":null}
//!   rejected: {"id":"1","result":null,"error":{"code":-32602,"message":"invalid params"}}
//!   pushed:   {"id":null,"result":{"offset":9,"events":[...]},"error":null}
//! ```
//!
//! [`parse_request`] validates an inbound frame into a [`Method`]; the
//! session then drives execute → acknowledge → after.

pub mod message;
pub mod method;

pub use message::{
    new_event_message, EventMessage, ProtocolError, RequestMessage, ResponseError,
    ResponseMessage, CODE_APPLICATION, CODE_INVALID_PARAMS, CODE_METHOD_NOT_FOUND, CODE_PARSE,
};
pub use method::{
    parse_request, BatchSubscribeParams, BatchUnsubscribeParams, Method, SubscribeParams,
    UnsubscribeParams,
};
