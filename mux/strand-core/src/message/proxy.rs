// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Proxy handshake messages. The multiplexer relays these verbatim; only
//! the codec understands their shape.

use crate::{
    codec::{decode_string, encode_str},
    endpoint::Endpoint,
    message::{tag, Error, Fields, Tag},
};
use s2n_codec::{DecoderBuffer, DecoderError, Encoder, EncoderValue};

/// Asks the proxy to fan the listen request out to further proxies
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MultiProxyRequest;

impl MultiProxyRequest {
    pub const fn tag(&self) -> Tag {
        tag::MULTI_PROXY_REQUEST
    }
}

impl EncoderValue for MultiProxyRequest {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }
}

/// Announces that the dialing end is a server wishing to be proxied
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProxyServerRequest;

impl ProxyServerRequest {
    pub const fn tag(&self) -> Tag {
        tag::PROXY_SERVER_REQUEST
    }
}

impl EncoderValue for ProxyServerRequest {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }
}

/// The proxy's answer: the endpoints it listens on for the server
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyResponse {
    pub endpoints: Vec<Endpoint>,
}

impl ProxyResponse {
    pub const fn tag(&self) -> Tag {
        tag::PROXY_RESPONSE
    }

    pub(crate) fn decode(buffer: DecoderBuffer, size: u64) -> Result<Self, Error> {
        let mut fields = Fields::new(tag::PROXY_RESPONSE, size);
        let mut endpoints = Vec::new();
        let mut buffer = buffer;
        while !buffer.is_empty() {
            let (text, rest) = fields.track(decode_string(buffer))?;
            let endpoint = fields.track(
                text.parse()
                    .map_err(|_| DecoderError::InvariantViolation("malformed endpoint")),
            )?;
            endpoints.push(endpoint);
            buffer = rest;
        }
        Ok(Self { endpoints })
    }
}

impl EncoderValue for ProxyResponse {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        for endpoint in &self.endpoints {
            encode_str(encoder, &endpoint.to_string());
        }
    }
}

/// The proxy could not complete the requested relay
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProxyErrorResponse {
    pub error: String,
}

impl ProxyErrorResponse {
    pub const fn tag(&self) -> Tag {
        tag::PROXY_ERROR_RESPONSE
    }

    pub(crate) fn decode(buffer: DecoderBuffer) -> Result<Self, Error> {
        let error = String::from_utf8_lossy(buffer.into_less_safe_slice()).into_owned();
        Ok(Self { error })
    }
}

impl EncoderValue for ProxyErrorResponse {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.write_slice(self.error.as_bytes());
    }
}
