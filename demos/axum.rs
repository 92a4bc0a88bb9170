use std::sync::Arc;

use axum::{
    extract::FromRef,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use jsonwebtoken::{Algorithm, Validation};

use jwt_auth_strategy::extractors::{from_auth_header_as_bearer_token, from_cookie, from_extractors};
use jwt_auth_strategy::{
    jwt_verifier, AuthRequest, Authenticated, JwtStrategy, KeyFetcher, RemoteJwks, Resolve,
    Sections, TokenExtractor,
};

#[derive(Clone, FromRef)]
struct AppState {
    strategy: JwtStrategy<String>,
}

async fn handler(auth: Authenticated<String>) -> Response {
    format!("Hello, {}!", auth.user).into_response()
}

async fn find_user(sections: Sections, done: Resolve<String>, _: Option<AuthRequest>) {
    match sections.subject() {
        Some(sub) => done.success(sub.to_owned(), None),
        None => done.fail("User not found", 404),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let jwks = Arc::new(RemoteJwks::new("https://www.googleapis.com/oauth2/v3/certs"));
    tokio::spawn({
        let jwks = jwks.clone();
        async move { jwks.refresh_keys_periodically().await }
    });

    let fetcher: Arc<dyn KeyFetcher> = jwks;
    let verifier = jwt_verifier(Validation::new(Algorithm::RS256), None, Some(fetcher))
        .expect("exactly one key source is configured");

    let extractor = from_extractors(vec![
        from_auth_header_as_bearer_token().boxed(),
        from_cookie("auth_token").boxed(),
    ]);

    let state = AppState {
        strategy: JwtStrategy::new(verifier, extractor, find_user),
    };

    let app = Router::new().route("/", get(handler)).with_state(state);

    // run it on localhost:3000
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
