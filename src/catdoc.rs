//! Named catdoc operations.
//!
//! Each [`Operation`] maps to one export of the catdoc module. The
//! crate-level functions use the process-wide runtime; build a [`Catdoc`]
//! for a runtime with its own configuration.

use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;

use crate::error::{CatdocError, Result};
use crate::sandbox::config::CatdocConfig;
use crate::sandbox::dispatch;
use crate::sandbox::fs::SingleFileFs;
use crate::sandbox::runtime::{global_runtime, Runtime};

/// An extraction the catdoc module knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Document body text.
    Text,
    /// Summary information: title.
    Title,
    /// Summary information: subject.
    Subject,
    /// Summary information: keywords.
    Keywords,
    /// Summary information: comments.
    Comments,
    /// Summary information: author.
    Author,
    /// Summary information: last saved by.
    LastAuthor,
    /// Authors of annotations, one per line.
    AnnotationAuthors,
    /// catdoc's version banner.
    Version,
}

impl Operation {
    /// Every operation, in catalog order.
    pub const ALL: [Operation; 9] = [
        Operation::Text,
        Operation::Title,
        Operation::Subject,
        Operation::Keywords,
        Operation::Comments,
        Operation::Author,
        Operation::LastAuthor,
        Operation::AnnotationAuthors,
        Operation::Version,
    ];

    /// Name of the module export implementing this operation.
    pub fn export_name(self) -> &'static str {
        match self {
            Operation::Text => "get_text",
            Operation::Title => "get_title",
            Operation::Subject => "get_subject",
            Operation::Keywords => "get_keywords",
            Operation::Comments => "get_comments",
            Operation::Author => "get_author",
            Operation::LastAuthor => "get_last_author",
            Operation::AnnotationAuthors => "get_annotation_authors",
            Operation::Version => "get_version",
        }
    }

    /// Whether a document must be mounted for this operation.
    pub fn requires_input(self) -> bool {
        !matches!(self, Operation::Version)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

/// Split a multi-valued result into lines, keeping order and duplicates.
///
/// An empty result means no values.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n').map(str::to_string).collect()
}

/// Handle for running operations against one [`Runtime`].
///
/// The per-operation methods take the document by value and keep it until
/// the call returns, so readers must be `Send + 'static`. Pass a borrowed
/// stream through [`SingleFileFs::buffered`] and [`Catdoc::run`] instead.
#[derive(Debug, Clone)]
pub struct Catdoc {
    runtime: Arc<Runtime>,
}

impl Catdoc {
    /// Create a handle with its own runtime.
    pub fn new(config: CatdocConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runtime: Arc::new(Runtime::new(config)),
        })
    }

    /// Handle on the process-wide runtime.
    pub fn global() -> Self {
        Self {
            runtime: global_runtime(),
        }
    }

    /// Wrap an existing runtime.
    pub fn from_runtime(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// The runtime backing this handle.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    fn check_input(op: Operation, input: &Option<SingleFileFs>) -> Result<()> {
        if op.requires_input() && input.is_none() {
            return Err(CatdocError::MissingInput(op.export_name()));
        }
        Ok(())
    }

    /// Run `op`, blocking the current thread.
    pub fn run(&self, op: Operation, input: Option<SingleFileFs>) -> Result<String> {
        Self::check_input(op, &input)?;
        dispatch::call(&self.runtime, op.export_name(), input, None)
    }

    /// Run `op` on the blocking pool, giving up after the configured timeout.
    pub async fn run_async(&self, op: Operation, input: Option<SingleFileFs>) -> Result<String> {
        Self::check_input(op, &input)?;
        let timeout = self.runtime.config().timeout;
        dispatch::call_with_timeout(Arc::clone(&self.runtime), op.export_name(), input, timeout)
            .await
    }

    fn run_on<R>(&self, op: Operation, reader: R) -> Result<String>
    where
        R: Read + Seek + Send + 'static,
    {
        self.run(op, Some(SingleFileFs::new(reader)?))
    }

    /// Extract the document's body text.
    pub fn text<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::Text, reader)
    }

    /// Extract the document title.
    pub fn title<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::Title, reader)
    }

    /// Extract the document subject.
    pub fn subject<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::Subject, reader)
    }

    /// Extract the document keywords.
    pub fn keywords<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::Keywords, reader)
    }

    /// Extract the document comments.
    pub fn comments<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::Comments, reader)
    }

    /// Extract the document author.
    pub fn author<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::Author, reader)
    }

    /// Extract who last saved the document.
    pub fn last_author<R: Read + Seek + Send + 'static>(&self, reader: R) -> Result<String> {
        self.run_on(Operation::LastAuthor, reader)
    }

    /// Extract annotation authors, one entry per line of catdoc's output.
    pub fn annotation_authors<R: Read + Seek + Send + 'static>(
        &self,
        reader: R,
    ) -> Result<Vec<String>> {
        self.run_on(Operation::AnnotationAuthors, reader)
            .map(|text| split_lines(&text))
    }

    /// catdoc's version banner. Needs no document.
    pub fn version(&self) -> Result<String> {
        self.run(Operation::Version, None)
    }
}

/// Extract the document's body text.
pub fn text<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().text(reader)
}

/// Extract the document title.
pub fn title<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().title(reader)
}

/// Extract the document subject.
pub fn subject<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().subject(reader)
}

/// Extract the document keywords.
pub fn keywords<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().keywords(reader)
}

/// Extract the document comments.
pub fn comments<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().comments(reader)
}

/// Extract the document author.
pub fn author<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().author(reader)
}

/// Extract who last saved the document.
pub fn last_author<R: Read + Seek + Send + 'static>(reader: R) -> Result<String> {
    Catdoc::global().last_author(reader)
}

/// Extract annotation authors.
pub fn annotation_authors<R: Read + Seek + Send + 'static>(reader: R) -> Result<Vec<String>> {
    Catdoc::global().annotation_authors(reader)
}

/// catdoc's version banner.
pub fn version() -> Result<String> {
    Catdoc::global().version()
}
