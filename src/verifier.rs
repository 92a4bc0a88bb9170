use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use derive_builder::Builder;
use futures::future::BoxFuture;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, TokenError, TokenErrorCode};
use crate::sections::{RawVerified, Sections};

/// Verifies a token and returns its decoded contents.
///
/// This is the seam to the cryptography: implementations decide how
/// signatures, algorithms and keys are checked.
#[async_trait]
pub trait JwtVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<RawVerified, TokenError>;
}

/// Resolves the verification key for a token at verification time.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch(&self, header: &Header) -> Result<DecodingKey, Error>;
}

/// Boxed future returned by closures wrapped in [`FnVerifier`].
pub type VerifyFuture = BoxFuture<'static, Result<RawVerified, TokenError>>;

/// Boxed future returned by closures wrapped in [`FnKeyFetcher`].
pub type KeyFuture = BoxFuture<'static, Result<DecodingKey, Error>>;

/// A [`JwtVerifier`] backed by a closure.
pub struct FnVerifier<F>(F);

impl<F> FnVerifier<F>
where
    F: Fn(&str) -> VerifyFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> JwtVerifier for FnVerifier<F>
where
    F: Fn(&str) -> VerifyFuture + Send + Sync,
{
    async fn verify(&self, token: &str) -> Result<RawVerified, TokenError> {
        (self.0)(token).await
    }
}

/// A [`KeyFetcher`] backed by a closure.
pub struct FnKeyFetcher<F>(F);

impl<F> FnKeyFetcher<F>
where
    F: Fn(&Header) -> KeyFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> KeyFetcher for FnKeyFetcher<F>
where
    F: Fn(&Header) -> KeyFuture + Send + Sync,
{
    async fn fetch(&self, header: &Header) -> Result<DecodingKey, Error> {
        (self.0)(header).await
    }
}

/// Where the verification key comes from.
#[derive(Clone)]
pub enum KeySource {
    Static(DecodingKey),
    Fetcher(Arc<dyn KeyFetcher>),
    /// Only unsigned (`alg: "none"`) tokens are accepted and no key is used.
    Unsigned,
}

/// Key settings collected by [`VerifierOptionsBuilder`] before they are
/// resolved into a [`KeySource`].
#[derive(Clone, Default)]
struct KeyChoice {
    key: Option<DecodingKey>,
    key_fetcher: Option<Arc<dyn KeyFetcher>>,
    allow_unsigned: bool,
}

impl KeyChoice {
    fn resolve(&self) -> Result<KeySource, String> {
        if self.allow_unsigned {
            if self.key.is_some() || self.key_fetcher.is_some() {
                tracing::warn!(
                    "A key was provided although only unsigned tokens are allowed; the key will be ignored"
                );
            }
            return Ok(KeySource::Unsigned);
        }

        match (&self.key, &self.key_fetcher) {
            (Some(key), None) => Ok(KeySource::Static(key.clone())),
            (None, Some(fetcher)) => Ok(KeySource::Fetcher(fetcher.clone())),
            _ => Err("exactly one of key or key_fetcher must be provided".to_string()),
        }
    }
}

/// Configuration for the built-in [`OptionsVerifier`].
///
/// Exactly one of `key` or `key_fetcher` must be set, unless
/// `allow_unsigned` is enabled, in which case neither is used. The choice is
/// checked by `build()`, so a built value always carries a usable key source.
#[derive(Clone, Builder)]
pub struct VerifierOptions {
    /// Claim validation settings passed to `jsonwebtoken`
    #[builder(default = "Validation::default()")]
    validation: Validation,
    /// Accepted algorithms; overrides `validation.algorithms` when non-empty
    #[builder(default)]
    algorithms: Vec<Algorithm>,
    #[builder(
        setter(custom),
        field(
            ty = "KeyChoice",
            build = "self.key_source.resolve().map_err(VerifierOptionsBuilderError::ValidationError)?"
        )
    )]
    key_source: KeySource,
    /// Return header, signature and input alongside the claims
    #[builder(default)]
    complete: bool,
}

impl VerifierOptionsBuilder {
    /// A static key or secret
    pub fn key(&mut self, key: DecodingKey) -> &mut Self {
        self.key_source.key = Some(key);
        self
    }

    /// Resolves the key per token, e.g. from a JWKS endpoint
    pub fn key_fetcher(&mut self, key_fetcher: Arc<dyn KeyFetcher>) -> &mut Self {
        self.key_source.key_fetcher = Some(key_fetcher);
        self
    }

    /// Accept only unsigned tokens (`alg: "none"`, empty signature)
    pub fn allow_unsigned(&mut self, allow_unsigned: bool) -> &mut Self {
        self.key_source.allow_unsigned = allow_unsigned;
        self
    }
}

impl From<VerifierOptionsBuilderError> for Error {
    fn from(err: VerifierOptionsBuilderError) -> Self {
        Error::Config(err.to_string())
    }
}

impl VerifierOptions {
    pub fn builder() -> VerifierOptionsBuilder {
        VerifierOptionsBuilder::default()
    }
}

/// Verifies tokens with `jsonwebtoken` according to [`VerifierOptions`].
pub struct OptionsVerifier {
    key: KeySource,
    validation: Validation,
    complete: bool,
}

impl From<VerifierOptions> for OptionsVerifier {
    fn from(options: VerifierOptions) -> Self {
        let mut validation = options.validation;
        if !options.algorithms.is_empty() {
            validation.algorithms = options.algorithms;
        }

        Self {
            key: options.key_source,
            validation,
            complete: options.complete,
        }
    }
}

impl OptionsVerifier {
    async fn decode(&self, token: &str) -> Result<(Map<String, Value>, Value), TokenError> {
        let data = match &self.key {
            KeySource::Static(key) => jsonwebtoken::decode::<Value>(token, key, &self.validation)?,
            KeySource::Fetcher(fetcher) => {
                let header = jsonwebtoken::decode_header(token)?;
                let key = fetcher.fetch(&header).await.map_err(|e| {
                    TokenError::new(TokenErrorCode::KeyFetch, format!("Cannot fetch key: {e}"))
                })?;
                jsonwebtoken::decode::<Value>(token, &key, &self.validation)?
            }
            KeySource::Unsigned => return decode_unsigned(token, &self.validation),
        };

        let header = match serde_json::to_value(&data.header) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Ok((header, data.claims))
    }
}

/// Decodes an unsigned token by hand, since `jsonwebtoken` has no `none`
/// algorithm. Signed tokens are refused.
fn decode_unsigned(
    token: &str,
    validation: &Validation,
) -> Result<(Map<String, Value>, Value), TokenError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenErrorCode::Malformed.into());
    };

    let header: Map<String, Value> = decode_segment(header)?;
    if header.get("alg").and_then(Value::as_str) != Some("none") {
        return Err(TokenError::new(
            TokenErrorCode::InvalidAlgorithm,
            "Only unsigned tokens with alg \"none\" are accepted",
        ));
    }
    if !signature.is_empty() {
        return Err(TokenError::new(
            TokenErrorCode::InvalidSignature,
            "Unsigned tokens must have an empty signature",
        ));
    }

    let claims: Value = decode_segment(payload)?;
    validate_time_claims(&claims, validation)?;

    Ok((header, claims))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::new(TokenErrorCode::Malformed, e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::new(TokenErrorCode::Malformed, e.to_string()))
}

fn numeric_claim(claims: &Value, name: &str) -> Option<u64> {
    let value = claims.get(name)?;
    value.as_u64().or_else(|| value.as_f64().map(|f| f as u64))
}

/// The `exp`/`nbf` checks `jsonwebtoken` would apply, honoring the same
/// `Validation` switches and leeway.
fn validate_time_claims(claims: &Value, validation: &Validation) -> Result<(), TokenError> {
    let now = jsonwebtoken::get_current_timestamp();

    let exp = numeric_claim(claims, "exp");
    if exp.is_none() && validation.required_spec_claims.contains("exp") {
        return Err(TokenErrorCode::MissingRequiredClaim("exp".to_string()).into());
    }
    if let Some(exp) = exp.filter(|_| validation.validate_exp) {
        if exp < now.saturating_sub(validation.leeway) {
            return Err(TokenErrorCode::ExpiredSignature.into());
        }
    }

    if let Some(nbf) = numeric_claim(claims, "nbf").filter(|_| validation.validate_nbf) {
        if nbf > now.saturating_add(validation.leeway) {
            return Err(TokenErrorCode::ImmatureSignature.into());
        }
    }

    Ok(())
}

#[async_trait]
impl JwtVerifier for OptionsVerifier {
    async fn verify(&self, token: &str) -> Result<RawVerified, TokenError> {
        let (header, claims) = self.decode(token).await?;

        if !self.complete {
            return Ok(RawVerified::Payload(claims));
        }

        let signature = token.rsplit('.').next().unwrap_or_default();

        Ok(RawVerified::Complete(Sections {
            header,
            payload: claims,
            signature: signature.to_owned(),
            input: token.to_owned(),
        }))
    }
}

/// Builds a verifier that always returns complete sections.
///
/// Exactly one of `key` or `key_fetcher` must be given; anything else is a
/// configuration error reported immediately.
pub fn jwt_verifier(
    validation: Validation,
    key: Option<DecodingKey>,
    key_fetcher: Option<Arc<dyn KeyFetcher>>,
) -> Result<OptionsVerifier, Error> {
    let key = KeyChoice {
        key,
        key_fetcher,
        allow_unsigned: false,
    }
    .resolve()
    .map_err(Error::Config)?;

    Ok(OptionsVerifier {
        key,
        validation,
        complete: true,
    })
}
