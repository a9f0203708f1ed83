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
    // ====Naming====
    #[snafu(display("directory {name:?} already exists"))]
    DirectoryAlreadyExists {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("file {name:?} already exists"))]
    FileAlreadyExists {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("directory {name:?} not found"))]
    DirectoryNotFound {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("file {name:?} not found"))]
    FileNotFound {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{name:?} is a file"))]
    IsFile {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{name:?} is a directory"))]
    IsDirectory {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid entry name {name:?}"))]
    InvalidName {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },

    // ====Chunk geometry====
    #[snafu(display("invalid chunk size {size}"))]
    InvalidChunkSize {
        size:     usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid chunk number {index}"))]
    InvalidChunkNb {
        index:    usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid start offset {offset} in a chunk of {chunk_len} bytes"))]
    InvalidStartOffset {
        offset:    usize,
        chunk_len: usize,
        #[snafu(implicit)]
        location:  Location,
    },
    #[snafu(display("invalid end offset {offset} in a chunk of {chunk_len} bytes"))]
    InvalidEndOffset {
        offset:    usize,
        chunk_len: usize,
        #[snafu(implicit)]
        location:  Location,
    },
    #[snafu(display("the file has no chunk"))]
    NoChunk {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("the last chunk is not full"))]
    LastChunkNotFull {
        #[snafu(implicit)]
        location: Location,
    },

    // ====Generic====
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        reason:   String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("operation cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unexpected: {reason}"))]
    Unexpected {
        reason:   String,
        #[snafu(implicit)]
        location: Location,
    },

    // ====Disk====
    #[snafu(display("io error on {path}"))]
    Io {
        path:     String,
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },
    #[snafu(display("corrupted file info at {path}"))]
    FileInfoCorrupted {
        path:     String,
        #[snafu(implicit)]
        location: Location,
        source:   serde_json::Error,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        self.is_file_not_found() || self.is_directory_not_found()
    }

    pub fn is_file_not_found(&self) -> bool { matches!(self, Error::FileNotFound { .. }) }

    pub fn is_directory_not_found(&self) -> bool {
        matches!(self, Error::DirectoryNotFound { .. })
    }

    pub fn is_invalid_chunk_nb(&self) -> bool { matches!(self, Error::InvalidChunkNb { .. }) }

    pub fn is_cancelled(&self) -> bool { matches!(self, Error::Cancelled { .. }) }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn check_cancelled(ctx: &Context) -> Result<()> {
    ensure!(!ctx.is_cancelled(), CancelledSnafu);
    Ok(())
}

impl ToErrno for Error {
    fn to_errno(&self) -> Errno {
        match self {
            Error::DirectoryAlreadyExists { .. } | Error::FileAlreadyExists { .. } => libc::EEXIST,
            Error::DirectoryNotFound { .. } | Error::FileNotFound { .. } => libc::ENOENT,
            // a directory was looked up but a file was found.
            Error::IsFile { .. } => libc::ENOTDIR,
            Error::IsDirectory { .. } => libc::EISDIR,
            Error::InvalidName { .. }
            | Error::InvalidChunkSize { .. }
            | Error::InvalidChunkNb { .. }
            | Error::InvalidStartOffset { .. }
            | Error::InvalidEndOffset { .. }
            | Error::NoChunk { .. }
            | Error::LastChunkNotFull { .. }
            | Error::InvalidArgument { .. } => libc::EINVAL,
            Error::Cancelled { .. }
            | Error::Io { .. }
            | Error::Unexpected { .. }
            | Error::FileInfoCorrupted { .. } => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno() {
        let e = FileNotFoundSnafu { name: "a" }.build();
        assert_eq!(e.to_errno(), libc::ENOENT);
        assert!(e.is_not_found());
        assert!(e.is_file_not_found());
        assert!(!e.is_directory_not_found());

        let e = DirectoryAlreadyExistsSnafu { name: "a" }.build();
        assert_eq!(e.to_errno(), libc::EEXIST);

        assert_eq!(LastChunkNotFullSnafu.build().to_errno(), libc::EINVAL);
        assert_eq!(NoChunkSnafu.build().to_errno(), libc::EINVAL);
        assert_eq!(
            UnexpectedSnafu { reason: "boom" }.build().to_errno(),
            libc::EIO
        );
    }

    #[test]
    fn interruptions_and_os_errors_are_eio() {
        use snafu::IntoError;

        assert_eq!(CancelledSnafu.build().to_errno(), libc::EIO);
        let full = std::io::Error::from_raw_os_error(libc::ENOSPC);
        let e = IoSnafu { path: "/tmp/chunk" }.into_error(full);
        assert_eq!(e.to_errno(), libc::EIO);
        let short = std::io::Error::new(std::io::ErrorKind::WriteZero, "short write");
        let e = IoSnafu { path: "/tmp/chunk" }.into_error(short);
        assert_eq!(e.to_errno(), libc::EIO);
    }

    #[test]
    fn cancelled_context() {
        let ctx = Context::background();
        assert!(check_cancelled(&ctx).is_ok());
        ctx.cancel();
        assert!(check_cancelled(&ctx).unwrap_err().is_cancelled());
    }
}
