use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::{Error, ErrorRecord, TokenError};
use crate::extractors::TokenExtractor;
use crate::request::AuthRequest;
use crate::sections::Sections;
use crate::verifier::{JwtVerifier, OptionsVerifier, VerifierOptions};

const UNAUTHORIZED: u16 = 401;

/// The single result of an authentication attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<U> {
    Success { user: U, info: Option<Value> },
    Fail { challenge: Option<Value>, status: u16 },
    Error(ErrorRecord),
}

impl<U> Outcome<U> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Forwards the outcome to the matching host hook.
    pub fn dispatch<H: AuthHost<U> + ?Sized>(self, host: &mut H) {
        match self {
            Outcome::Success { user, info } => host.success(user, info),
            Outcome::Fail { challenge, status } => host.fail(challenge, status),
            Outcome::Error(err) => host.error(err),
        }
    }
}

/// The three exits of an authentication attempt, as seen by the host.
pub trait AuthHost<U> {
    fn success(&mut self, user: U, info: Option<Value>);
    fn fail(&mut self, challenge: Option<Value>, status: u16);
    fn error(&mut self, err: ErrorRecord);
}

/// HTTP status passed to [`Resolve::done`] for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Code(u16),
    /// A list of sub-statuses. Missing entries are dropped and the survivors
    /// travel with the challenge; the attempt itself fails with 401.
    Many(Vec<Option<u16>>),
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status::Code(code)
    }
}

impl From<Vec<Option<u16>>> for Status {
    fn from(statuses: Vec<Option<u16>>) -> Self {
        Status::Many(statuses)
    }
}

/// Resume point handed to the verify callback.
///
/// Consuming `self` means an attempt can be resolved at most once. Dropping it
/// without resolving ends the attempt with an error.
pub struct Resolve<U> {
    tx: oneshot::Sender<Outcome<U>>,
}

impl<U> Resolve<U> {
    fn channel() -> (Self, oneshot::Receiver<Outcome<U>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Error-first resolution: an error always wins, then a user means
    /// success, and no user means failure with `info` as the challenge.
    pub fn done(
        self,
        error: Option<Box<dyn StdError + Send + Sync>>,
        user: Option<U>,
        info: Option<Value>,
        status: Option<Status>,
    ) {
        let outcome = match (error, user) {
            (Some(err), _) => Outcome::Error(Error::Callback(err).into()),
            (None, Some(user)) => Outcome::Success { user, info },
            (None, None) => match status {
                Some(Status::Many(statuses)) => {
                    let statuses: Vec<u16> = statuses.into_iter().flatten().collect();
                    Outcome::Fail {
                        challenge: Some(json!({ "info": info, "status": statuses })),
                        status: UNAUTHORIZED,
                    }
                }
                Some(Status::Code(code)) => Outcome::Fail {
                    challenge: info,
                    status: code,
                },
                None => Outcome::Fail {
                    challenge: info,
                    status: UNAUTHORIZED,
                },
            },
        };

        self.send(outcome);
    }

    pub fn success(self, user: U, info: Option<Value>) {
        self.send(Outcome::Success { user, info });
    }

    pub fn fail(self, challenge: impl Into<Value>, status: u16) {
        self.send(Outcome::Fail {
            challenge: Some(challenge.into()),
            status,
        });
    }

    pub fn error(self, err: impl Into<Box<dyn StdError + Send + Sync>>) {
        self.send(Outcome::Error(Error::Callback(err.into()).into()));
    }

    fn send(self, outcome: Outcome<U>) {
        // The receiver lives until the callback returns; a send after that
        // has nobody to report to.
        let _ = self.tx.send(outcome);
    }
}

/// Decides whether a verified token authenticates the request.
///
/// Any `Fn(Sections, Resolve<U>, Option<AuthRequest>) -> impl Future` closure
/// implements this trait. `request` is only `Some` when the strategy was
/// built with [`JwtStrategy::pass_request`].
#[async_trait]
pub trait VerifyCallback<U>: Send + Sync {
    async fn verified(&self, sections: Sections, resolve: Resolve<U>, request: Option<AuthRequest>);

    /// Called when verification rejects the token.
    ///
    /// This is the error-delegating callback shape: implement it to receive
    /// verification errors alongside successful verifications. It observes
    /// only; the attempt fails with 401 and the error's `{message, type}`
    /// challenge regardless of what this hook does, and is never escalated to
    /// an error.
    fn rejected(&self, _error: &TokenError) {}
}

#[async_trait]
impl<U, F, Fut> VerifyCallback<U> for F
where
    U: Send + 'static,
    F: Fn(Sections, Resolve<U>, Option<AuthRequest>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn verified(&self, sections: Sections, resolve: Resolve<U>, request: Option<AuthRequest>) {
        self(sections, resolve, request).await
    }
}

/// How a strategy obtains its verifier.
pub enum VerifierSource {
    /// A ready-made verifier, used as is
    Prebuilt(Arc<dyn JwtVerifier>),
    /// Options turned into an [`OptionsVerifier`] once, at construction
    FromOptions(VerifierOptions),
}

impl From<VerifierOptions> for VerifierSource {
    fn from(options: VerifierOptions) -> Self {
        VerifierSource::FromOptions(options)
    }
}

impl From<OptionsVerifier> for VerifierSource {
    fn from(verifier: OptionsVerifier) -> Self {
        VerifierSource::Prebuilt(Arc::new(verifier))
    }
}

impl From<Arc<dyn JwtVerifier>> for VerifierSource {
    fn from(verifier: Arc<dyn JwtVerifier>) -> Self {
        VerifierSource::Prebuilt(verifier)
    }
}

/// JWT authentication strategy.
///
/// Holds only immutable configuration, so one instance can serve any number
/// of concurrent requests. Cloning is cheap.
///
/// # Examples
///
/// ```
/// use jsonwebtoken::{DecodingKey, Validation};
/// use jwt_auth_strategy::{extractors, jwt_verifier, AuthRequest, JwtStrategy, Resolve, Sections};
///
/// let verifier = jwt_verifier(
///     Validation::default(),
///     Some(DecodingKey::from_secret(b"secret")),
///     None,
/// )
/// .unwrap();
///
/// let strategy: JwtStrategy<String> = JwtStrategy::new(
///     verifier,
///     extractors::from_auth_header_as_bearer_token(),
///     |sections: Sections, done: Resolve<String>, _req: Option<AuthRequest>| async move {
///         match sections.subject() {
///             Some(sub) => done.success(sub.to_owned(), None),
///             None => done.fail("User not found", 404),
///         }
///     },
/// );
/// # let _ = strategy;
/// ```
pub struct JwtStrategy<U> {
    extractor: Arc<dyn TokenExtractor>,
    verifier: Arc<dyn JwtVerifier>,
    callback: Arc<dyn VerifyCallback<U>>,
    pass_request: bool,
}

impl<U> Clone for JwtStrategy<U> {
    fn clone(&self) -> Self {
        Self {
            extractor: self.extractor.clone(),
            verifier: self.verifier.clone(),
            callback: self.callback.clone(),
            pass_request: self.pass_request,
        }
    }
}

impl<U: Send + 'static> JwtStrategy<U> {
    /// Name under which the strategy is registered with a host.
    pub const NAME: &'static str = "jwt";

    pub fn new(
        verifier: impl Into<VerifierSource>,
        extractor: impl TokenExtractor + 'static,
        callback: impl VerifyCallback<U> + 'static,
    ) -> Self {
        let verifier = match verifier.into() {
            VerifierSource::Prebuilt(verifier) => verifier,
            VerifierSource::FromOptions(options) => Arc::new(OptionsVerifier::from(options)),
        };

        Self {
            extractor: Arc::new(extractor),
            verifier,
            callback: Arc::new(callback),
            pass_request: false,
        }
    }

    /// Forward a copy of the request to the verify callback.
    #[must_use]
    pub fn pass_request(mut self, pass_request: bool) -> Self {
        self.pass_request = pass_request;
        self
    }

    /// Runs one authentication attempt: extract, verify, then let the
    /// callback decide. Always produces exactly one [`Outcome`].
    pub async fn authenticate(&self, request: &AuthRequest) -> Outcome<U> {
        let token = match self.extractor.extract(request) {
            Some(token) if !token.is_empty() => token,
            _ => {
                tracing::debug!("No auth token found in request");
                return Outcome::Error(Error::TokenNotFound.into());
            }
        };

        let raw = match self.verifier.verify(&token).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(code = err.code().as_str(), "Token verification failed: {}", err);
                self.callback.rejected(&err);
                return Outcome::Fail {
                    challenge: Some(err.challenge()),
                    status: UNAUTHORIZED,
                };
            }
        };

        let sections = Sections::normalize(Some(raw));
        let request = self.pass_request.then(|| request.clone());
        let (resolve, mut outcome) = Resolve::channel();

        let finished = AssertUnwindSafe(self.callback.verified(sections, resolve, request))
            .catch_unwind()
            .await;

        if finished.is_err() {
            tracing::error!("Verify callback panicked");
            return match outcome.try_recv() {
                Ok(outcome) => outcome,
                Err(_) => Outcome::Error(Error::Callback("verify callback panicked".into()).into()),
            };
        }

        match outcome.await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("Verify callback finished without resolving");
                Outcome::Error(Error::Unresolved.into())
            }
        }
    }
}
