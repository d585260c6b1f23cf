use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Canonical failure kinds. Every public operation returns an [`Error`] whose
/// chain is rooted at one of these, regardless of which backend produced it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("invalid or missing input")]
    Input,
    #[error("disk detection error")]
    Detection,
    #[error("partition detection error")]
    DetectPartitions,
    #[error("no match found")]
    NoMatch,
    #[error("no qualifying results")]
    Empty,
    #[error("partition not mounted")]
    NotMounted,
    #[error("read error")]
    Read,
    #[error("device error")]
    Device,
    #[error("backend command failed")]
    BackendCommand,
    #[error("backend reported failure")]
    BackendOutput,
    #[error("unmarshal error")]
    Unmarshal,
    #[error("resource unavailable")]
    ResourceUnavailable,
    #[error("access path unavailable")]
    AccessPath,
    #[error("unsupported file system")]
    UnsupportedFileSystem,
    #[error("disk wipe error")]
    Wipe,
    #[error("partition style conversion error")]
    PartitionStyle,
    #[error("partition error")]
    Partition,
    #[error("formatting error")]
    Format,
    #[error("mount error")]
    Mount,
    #[error("dismount error")]
    Dismount,
    #[error("eject error")]
    Eject,
}

/// Renders as `kind: context: source`, skipping empty parts.
#[derive(Error, Debug)]
#[error("{kind}{}{}", suffix(.context), source_suffix(.source))]
pub struct Error {
    kind: ErrorKind,
    context: String,
    #[source]
    source: Option<BoxError>,
}

fn suffix(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(": {context}")
    }
}

fn source_suffix(source: &Option<BoxError>) -> String {
    source
        .as_ref()
        .map(|source| format!(": {source}"))
        .unwrap_or_default()
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        context: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Outermost kind of the chain.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Reports whether `kind` appears anywhere in the chain.
    pub fn is(&self, kind: ErrorKind) -> bool {
        let mut current: Option<&Error> = Some(self);
        while let Some(err) = current {
            if err.kind == kind {
                return true;
            }
            current = err
                .source
                .as_deref()
                .and_then(|source| source.downcast_ref::<Error>());
        }
        false
    }

    /// Innermost taxonomy kind of the chain.
    pub fn root_kind(&self) -> ErrorKind {
        let mut root = self;
        while let Some(next) = root
            .source
            .as_deref()
            .and_then(|source| source.downcast_ref::<Error>())
        {
            root = next;
        }
        root.kind
    }
}

pub trait ResultExt<T> {
    /// Re-wraps the error into `kind`, keeping the original as the source.
    fn kind_context<C, F>(self, kind: ErrorKind, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<BoxError>,
{
    fn kind_context<C, F>(self, kind: ErrorKind, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| Error::with_source(kind, context(), err))
    }
}
