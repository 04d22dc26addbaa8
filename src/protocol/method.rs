//! Request parsing and method dispatch.
//!
//! Parsing walks the envelope in a fixed order so the client always gets the
//! most specific rejection: malformed JSON, then missing params, then an
//! unknown method, then params that do not unmarshal, then params that
//! unmarshal but fail validation. The response id is captured as soon as the
//! envelope parses so every later rejection can echo it.

use serde::Deserialize;
use serde_json::Value;

use crate::session::Session;

use super::message::{ProtocolError, RequestMessage, ResponseMessage};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscribeParams {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UnsubscribeParams {
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchSubscribeParams {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchUnsubscribeParams {
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A parsed, validated request ready to run against a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Subscribe(SubscribeParams),
    Unsubscribe(UnsubscribeParams),
    BatchSubscribe(BatchSubscribeParams),
    BatchUnsubscribe(BatchUnsubscribeParams),
}

impl Method {
    fn is_valid(&self) -> bool {
        match self {
            Method::Subscribe(params) => !params.topic.is_empty(),
            Method::Unsubscribe(params) => !params.topic.is_empty(),
            Method::BatchSubscribe(params) => !params.topics.is_empty(),
            Method::BatchUnsubscribe(params) => !params.topics.is_empty(),
        }
    }

    /// Run the method. The returned value lands in the response's `result`
    /// slot; errors land in `error` with the application code.
    pub async fn execute(&self, session: &Session) -> crate::Result<Value> {
        match self {
            Method::Subscribe(params) => {
                session.authorize(&params.token).await?;
                session.set_offset(params.offset);
                session.subscribe_topic(&params.topic).await?;
                Ok(Value::Bool(true))
            }
            Method::Unsubscribe(params) => {
                let removed = session.unsubscribe_topic(&params.topic).await?;
                Ok(Value::Bool(removed))
            }
            Method::BatchSubscribe(params) => {
                session.authorize(&params.token).await?;
                session.set_offset(params.offset);
                for topic in &params.topics {
                    session.subscribe_topic(topic).await?;
                }
                Ok(Value::Bool(true))
            }
            Method::BatchUnsubscribe(params) => {
                // Topics are independent; only the last topic's outcome
                // lands in the response slot.
                let mut last = Ok(false);
                for topic in &params.topics {
                    last = session.unsubscribe_topic(topic).await;
                }
                Ok(Value::Bool(last?))
            }
        }
    }

    /// Post-acknowledgement step, run only after `execute` succeeded and the
    /// acknowledgement was written. Subscribes replay the backlog and open
    /// the live gate; unsubscribes have nothing to do.
    pub async fn after(&self, session: &Session) -> crate::Result<()> {
        match self {
            Method::Subscribe(params) => {
                session
                    .finish_subscribe(std::slice::from_ref(&params.topic), params.offset)
                    .await
            }
            Method::BatchSubscribe(params) => {
                session.finish_subscribe(&params.topics, params.offset).await
            }
            Method::Unsubscribe(_) | Method::BatchUnsubscribe(_) => Ok(()),
        }
    }
}

/// Parse one inbound text frame into a [`Method`], filling `response.id`
/// from the envelope as soon as it is known.
pub fn parse_request(
    raw: &[u8],
    response: &mut ResponseMessage,
) -> Result<Method, ProtocolError> {
    let request: RequestMessage =
        serde_json::from_slice(raw).map_err(|_| ProtocolError::Parse)?;
    response.id = request.id;

    let params = match request.params {
        Some(params) if !params.is_null() => params,
        _ => return Err(ProtocolError::InvalidParams),
    };

    let method = match request.method.as_deref() {
        Some("subscribe") => Method::Subscribe(
            serde_json::from_value(params).map_err(|_| ProtocolError::Parse)?,
        ),
        Some("unsubscribe") => Method::Unsubscribe(
            serde_json::from_value(params).map_err(|_| ProtocolError::Parse)?,
        ),
        Some("batchSubscribe") => Method::BatchSubscribe(
            serde_json::from_value(params).map_err(|_| ProtocolError::Parse)?,
        ),
        Some("batchUnsubscribe") => Method::BatchUnsubscribe(
            serde_json::from_value(params).map_err(|_| ProtocolError::Parse)?,
        ),
        _ => return Err(ProtocolError::MethodNotFound),
    };

    if !method.is_valid() {
        return Err(ProtocolError::InvalidParams);
    }
    Ok(method)
}
