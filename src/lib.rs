//! A pluggable JWT authentication strategy.
//!
//! A [`JwtStrategy`] pulls a token out of a request with a [`TokenExtractor`],
//! verifies it with a [`JwtVerifier`] (by default a thin layer over the
//! `jsonwebtoken` crate, with static keys or remote JWKS), and hands the
//! decoded [`Sections`] to a callback that decides the [`Outcome`].

mod axum;
mod error;
pub mod extractors;
mod remote;
mod request;
mod sections;
mod strategy;
mod verifier;

pub use crate::axum::{Authenticated, Rejection};
pub use crate::error::{Error, ErrorRecord, TokenError, TokenErrorCode, TOKEN_NOT_FOUND};
pub use crate::extractors::TokenExtractor;
pub use crate::remote::{RemoteJwks, RemoteJwksBuilder, RemoteJwksConfig, RemoteJwksConfigBuilder};
pub use crate::request::{AuthRequest, RequestField};
pub use crate::sections::{RawVerified, Sections};
pub use crate::strategy::{
    AuthHost, JwtStrategy, Outcome, Resolve, Status, VerifierSource, VerifyCallback,
};
pub use crate::verifier::{
    jwt_verifier, FnKeyFetcher, FnVerifier, JwtVerifier, KeyFetcher, KeyFuture, KeySource,
    OptionsVerifier, VerifierOptions, VerifierOptionsBuilder, VerifyFuture,
};
