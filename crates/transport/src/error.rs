use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("chat endpoint URL '{raw}' is invalid"))]
    InvalidEndpoint {
        stage: &'static str,
        raw: String,
        source: url::ParseError,
    },
    #[snafu(display("failed to build the HTTP client"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("feedback submission failed on `{stage}`: {source}"))]
    FeedbackRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("feedback endpoint returned status {status}: {body}"))]
    FeedbackStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;
