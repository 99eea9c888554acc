// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::message::{tag, Tag};
use s2n_codec::{Encoder, EncoderValue};

/// Keepalive probe
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HealthCheckRequest;

impl HealthCheckRequest {
    pub const fn tag(&self) -> Tag {
        tag::HEALTH_CHECK_REQUEST
    }
}

impl EncoderValue for HealthCheckRequest {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }
}

/// Keepalive answer
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HealthCheckResponse;

impl HealthCheckResponse {
    pub const fn tag(&self) -> Tag {
        tag::HEALTH_CHECK_RESPONSE
    }
}

impl EncoderValue for HealthCheckResponse {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }
}
