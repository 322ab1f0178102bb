use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {source}")]
    BuildClientFailed {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid proxy URL '{url}': {source}")]
    InvalidProxyUrl {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to build runtime for event loop worker {index}: {source}")]
    BuildRuntime {
        index: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn thread '{name}': {source}")]
    SpawnThread {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Task panicked before producing a result.")]
    TaskPanicked,
    #[error("Task was dropped before producing a result.")]
    TaskDropped,
}
