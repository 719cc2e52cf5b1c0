//! Multipart batch codec for batch-style HTTP APIs.
//!
//! # Overview
//! Packs a list of logical API calls into one multipart body and unpacks the
//! multipart response into one result per call. Nothing here touches the
//! network (host-does-IO pattern); the caller executes the batch request.
//!
//! # Design
//! - `create_batch_body` and `parse_batch_response` are pure functions over
//!   strings; they are the whole wire format.
//! - Results correspond to calls by position only. No request ids are sent.
//! - A response part that holds no parseable JSON becomes
//!   `PartResult::Unparsed` instead of failing the batch, and renders as
//!   `{"errors":[{"message": <raw part>}]}` like an upstream error would.
//! - `BatchClient` wraps both functions in the `HttpRequest` / `HttpResponse`
//!   plain-data types for callers who want the outer request built too.

pub mod client;
pub mod error;
pub mod http;
pub mod multipart;
pub mod types;

pub use client::{boundary_from_content_type, BatchClient};
pub use error::BatchError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use multipart::{create_batch_body, encode_query, generate_boundary, parse_batch_response};
pub use types::{CallDescriptor, ErrorBody, ErrorEntry, PartResult, QueryValue, DEFAULT_METHOD};
