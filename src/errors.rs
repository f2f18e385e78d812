//! The errors encountered in this crate.

use failure::Error;
use failure_derive::Fail;
use reqwest::StatusCode;
use std::io::Write;
use std::path::PathBuf;

/// The hub responded with a non-successful status code.
#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "Request to {} failed with {}", url, status)]
pub struct FailedRequest {
    pub status: StatusCode,
    pub url: String,
}

impl FailedRequest {
    /// Does this look like the repository (or file) is missing or gated?
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
            || self.status == StatusCode::UNAUTHORIZED
    }
}

/// The hub listed a file whose path would escape the destination directory.
#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(display = "Refusing to write outside the destination directory: {:?}", path)]
pub struct UnsafePath {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(
    display = "Unknown repository type {:?}, expected one of \"model\", \"dataset\" or \"space\"",
    given
)]
pub struct InvalidRepoType {
    pub given: String,
}

#[derive(Debug, Fail)]
#[fail(display = "One or more errors encountered while downloading files")]
pub struct DownloadFailure {
    pub(crate) errors: Vec<(String, Error)>,
}

impl DownloadFailure {
    /// The files which couldn't be downloaded.
    pub fn failed_files(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|(name, _)| name.as_str())
    }

    pub fn display<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writeln!(
            writer,
            "There were {} errors downloading files",
            self.errors.len()
        )?;

        for (filename, err) in &self.errors {
            writeln!(writer, "Error: {} failed with {}", filename, err)?;
            for cause in err.iter_chain().skip(1) {
                writeln!(writer, "\tCaused By: {}", cause)?;
            }
        }

        Ok(())
    }
}
