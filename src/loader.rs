//! Document loading: read YAML, parse, and gate on the DSL version.

use std::path::Path;

use tracing::debug;

use crate::document::Document;
use crate::error::Error;

/// The only DSL version this interpreter implements.
pub const SUPPORTED_DSL: &str = "1.0.0";

/// Read and parse a workflow document from a YAML file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Document, Error> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading workflow file");

    let data = std::fs::read_to_string(path)?;
    load_from_str(&data)
}

/// Parse a workflow document from YAML source.
pub fn load_from_str(data: &str) -> Result<Document, Error> {
    let doc: Document = serde_yaml::from_str(data)?;

    // Only support dsl v1.0.0 - we may support later versions
    if doc.document.dsl != SUPPORTED_DSL {
        return Err(Error::UnsupportedDsl(doc.document.dsl.clone()));
    }

    Ok(doc)
}
