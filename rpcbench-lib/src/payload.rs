//! Request and response synthesis shared by both benchmark sides.

use tonic::Status;

use crate::proto::{Payload, PayloadType, SimpleRequest, SimpleResponse};

/// Body size of the canned response used by the "both ways" streaming mode.
pub const CANNED_RESPONSE_SIZE: usize = 100;

/// Build a request carrying a zero filled body of `req_len` bytes,
/// asking for a `resp_len` bytes response.
pub fn make_request(payload_type: PayloadType, req_len: usize, resp_len: usize) -> SimpleRequest {
    SimpleRequest {
        response_type: payload_type as i32,
        response_size: i32::try_from(resp_len).unwrap_or(i32::MAX),
        payload: Some(Payload {
            r#type: payload_type as i32,
            body: vec![0; req_len],
        }),
    }
}

/// Synthesize the response a request asks for.
///
/// A non positive size yields the default (empty) response. Only
/// compressable payloads are supported.
pub fn make_response(request: &SimpleRequest) -> Result<SimpleResponse, Status> {
    let Ok(size) = usize::try_from(request.response_size) else {
        return Ok(SimpleResponse::default());
    };
    if size == 0 {
        return Ok(SimpleResponse::default());
    }
    if PayloadType::try_from(request.response_type) != Ok(PayloadType::Compressable) {
        return Err(Status::internal("Error creating payload."));
    }
    Ok(SimpleResponse {
        payload: Some(Payload {
            r#type: PayloadType::Compressable as i32,
            body: vec![0; size],
        }),
    })
}

/// The fixed response streamed back while inputs are drained.
pub fn canned_response() -> SimpleResponse {
    SimpleResponse {
        payload: Some(Payload {
            r#type: PayloadType::Compressable as i32,
            body: vec![0; CANNED_RESPONSE_SIZE],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_len(response: &SimpleResponse) -> usize {
        response.payload.as_ref().map(|p| p.body.len()).unwrap_or_default()
    }

    #[test]
    fn request_roundtrip_yields_exact_size() {
        let request = make_request(PayloadType::Compressable, 1000, 1000);
        assert_eq!(request.payload.as_ref().unwrap().body.len(), 1000);

        let response = make_response(&request).unwrap();
        let payload = response.payload.unwrap();
        assert_eq!(payload.body.len(), 1000);
        assert_eq!(payload.r#type(), PayloadType::Compressable);
    }

    #[test]
    fn response_size_matches_request() {
        for size in [1, 7, 4096, 1 << 20] {
            let request = make_request(PayloadType::Compressable, 0, size);
            assert_eq!(body_len(&make_response(&request).unwrap()), size);
        }
    }

    #[test]
    fn zero_size_yields_default_response() {
        let request = make_request(PayloadType::Compressable, 10, 0);
        assert_eq!(make_response(&request).unwrap(), SimpleResponse::default());

        // the payload type is irrelevant when nothing is asked for
        let request = make_request(PayloadType::Uncompressable, 10, 0);
        assert_eq!(make_response(&request).unwrap(), SimpleResponse::default());
    }

    #[test]
    fn negative_size_yields_default_response() {
        let request = SimpleRequest {
            response_size: -3,
            ..Default::default()
        };
        assert_eq!(make_response(&request).unwrap(), SimpleResponse::default());
    }

    #[test]
    fn unsupported_payload_type_is_internal_error() {
        for payload_type in [PayloadType::Uncompressable, PayloadType::Random] {
            let request = make_request(payload_type, 0, 10);
            let status = make_response(&request).unwrap_err();
            assert_eq!(status.code(), tonic::Code::Internal);
        }

        let request = SimpleRequest {
            response_type: 42,
            response_size: 10,
            payload: None,
        };
        assert_eq!(make_response(&request).unwrap_err().code(), tonic::Code::Internal);
    }

    #[test]
    fn canned_response_size() {
        assert_eq!(body_len(&canned_response()), CANNED_RESPONSE_SIZE);
    }
}
