// Copyright 2024 chonkfs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chonk_types::{context::Context, Errno, ToErrno};
use snafu::{ensure, Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{name:?} is not a directory"))]
    NotDirectory {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{name:?} is not a file"))]
    NotFile {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("read end {end} is before read start {start}"))]
    ReadEndBeforeReadStart {
        start:    usize,
        end:      usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("operation cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        location: Location,
    },

    StorageError {
        source: chonk_storage::err::Error,
    },
}

impl Error {
    /// The storage error behind this one, if any.
    pub fn storage(&self) -> Option<&chonk_storage::err::Error> {
        match self {
            Error::StorageError { source } => Some(source),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool { self.storage().is_some_and(|e| e.is_not_found()) }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled { .. } => true,
            Error::StorageError { source } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<chonk_storage::err::Error> for Error {
    fn from(value: chonk_storage::err::Error) -> Self { Self::StorageError { source: value } }
}

/// Converts a storage error raised while resolving `name` inside a
/// directory, the kind mismatches become naming errors of this layer.
pub(crate) fn from_lookup(name: &str, err: chonk_storage::err::Error) -> Error {
    use chonk_storage::err::Error as StorageError;
    match err {
        StorageError::IsFile { .. } => NotDirectorySnafu { name }.build(),
        StorageError::IsDirectory { .. } => NotFileSnafu { name }.build(),
        err => err.into(),
    }
}

pub(crate) fn check_cancelled(ctx: &Context) -> Result<()> {
    ensure!(!ctx.is_cancelled(), CancelledSnafu);
    Ok(())
}

impl ToErrno for Error {
    fn to_errno(&self) -> Errno {
        match self {
            Self::NotDirectory { .. } => libc::ENOTDIR,
            Self::NotFile { .. } => libc::EISDIR,
            Self::ReadEndBeforeReadStart { .. } => libc::EINVAL,
            Self::Cancelled { .. } => libc::EIO,
            Self::StorageError { source } => source.to_errno(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chonk_storage::err::{FileNotFoundSnafu, IsDirectorySnafu, IsFileSnafu, NoChunkSnafu};

    use super::*;

    #[test]
    fn lookup_mismatches_are_remapped() {
        let e = from_lookup("a", IsFileSnafu { name: "a" }.build());
        assert!(matches!(e, Error::NotDirectory { .. }));
        assert_eq!(e.to_errno(), libc::ENOTDIR);

        let e = from_lookup("a", IsDirectorySnafu { name: "a" }.build());
        assert!(matches!(e, Error::NotFile { .. }));
        assert_eq!(e.to_errno(), libc::EISDIR);

        let e = from_lookup("a", FileNotFoundSnafu { name: "a" }.build());
        assert!(e.is_not_found());
        assert_eq!(e.to_errno(), libc::ENOENT);
    }

    #[test]
    fn errno() {
        let e: Error = NoChunkSnafu.build().into();
        assert_eq!(e.to_errno(), libc::EINVAL);
        let e = ReadEndBeforeReadStartSnafu { start: 2usize, end: 1usize }.build();
        assert_eq!(e.to_errno(), libc::EINVAL);
        assert_eq!(CancelledSnafu.build().to_errno(), libc::EIO);
        let e: Error = chonk_storage::err::CancelledSnafu.build().into();
        assert_eq!(e.to_errno(), libc::EIO);
    }
}
