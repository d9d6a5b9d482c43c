use thiserror::Error;

/// Why a rebuild did not produce an active version.
///
/// Every variant leaves the previously active version serving.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The source yielded no usable records; no version was created
    #[error("source yielded no usable records")]
    EmptySource,

    /// The snapshot could not be read
    #[error("failed to read source: {0:#}")]
    Source(anyhow::Error),

    /// Creating, populating or discarding the version failed
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    /// An index could not be built for the new version
    #[error("failed to build {index} index: {source:#}")]
    Index {
        index: String,
        #[source]
        source: anyhow::Error,
    },

    /// The fully built version could not be activated
    #[error("failed to activate version {version_id}: {source:#}")]
    Activation {
        version_id: String,
        #[source]
        source: anyhow::Error,
    },
}
