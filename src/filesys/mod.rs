use alloc::string::String;
use core::fmt;
use core::result::Result;

pub mod block;
pub mod fat16;

/// Broad classes of filesystem failures
///
/// Callers (a shell, a file API) decide how to react by kind rather than by
/// individual variant: structural and I/O failures abort the operation, the
/// rest are ordinary outcomes to report to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// On-disk data violates the format; the volume needs repair
    StructuralInconsistency,
    InvalidArgument,
    StateConflict,
    NotFound,
    ResourceExhausted,
    Io,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::StructuralInconsistency | ErrorKind::Io)
    }
}

/// Why an on-disk long-name chain was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfnChainError {
    /// Ordinals must run 1..N without gaps
    SequenceGap { expected: u8, found: u8 },
    /// The highest ordinal does not carry the "last" flag, or another one does
    LastFlagMisplaced,
    /// More long-name slots in a row than any valid name needs
    TooLong,
    /// A chain is followed by a free slot instead of its short entry
    Orphaned,
    /// A chain runs off the end of the directory region
    Dangling,
    /// An entry names a long-name chain whose slots are not in front of it
    Detached,
}

// Define error types for the filesystem operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Malformed long-name chain found while scanning a directory
    LfnChain {
        sector: u32,
        offset: usize,
        reason: LfnChainError,
    },
    /// Cycle, out-of-range link or free cluster inside a cluster chain
    CorruptChain { cluster: u16 },
    InvalidBootSector(&'static str),
    NotDirectory,
    /// Children of a folded directory were accessed without unfolding it
    Folded,
    /// Handle refers to a node that was folded away or reloaded
    StaleNode,
    /// The synthetic root has no slot of its own
    RootNode,
    InvalidName,
    InvalidGeometry(&'static str),
    AlreadyExists,
    /// All nine `~N` short names for a prefix are taken
    TooManyDuplicates { prefix: String },
    DirectoryNotEmpty,
    NotFound,
    DirectoryFull,
    NoFreeCluster,
    IOError,
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::LfnChain { .. } | FsError::CorruptChain { .. } | FsError::InvalidBootSector(_) => {
                ErrorKind::StructuralInconsistency
            }
            FsError::NotDirectory
            | FsError::Folded
            | FsError::StaleNode
            | FsError::RootNode
            | FsError::InvalidName
            | FsError::InvalidGeometry(_) => ErrorKind::InvalidArgument,
            FsError::AlreadyExists
            | FsError::TooManyDuplicates { .. }
            | FsError::DirectoryNotEmpty => ErrorKind::StateConflict,
            FsError::NotFound => ErrorKind::NotFound,
            FsError::DirectoryFull | FsError::NoFreeCluster => ErrorKind::ResourceExhausted,
            FsError::IOError => ErrorKind::Io,
        }
    }
}

impl fmt::Display for LfnChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LfnChainError::SequenceGap { expected, found } => {
                write!(f, "expected ordinal {}, found {}", expected, found)
            }
            LfnChainError::LastFlagMisplaced => write!(f, "last-slot flag missing or misplaced"),
            LfnChainError::TooLong => write!(f, "too many long-name slots"),
            LfnChainError::Orphaned => write!(f, "long name not followed by an entry"),
            LfnChainError::Dangling => write!(f, "long name runs past the directory end"),
            LfnChainError::Detached => write!(f, "long name slots missing before entry"),
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::LfnChain {
                sector,
                offset,
                reason,
            } => write!(
                f,
                "Malformed long name at sector {} offset {}: {}",
                sector, offset, reason
            ),
            FsError::CorruptChain { cluster } => {
                write!(f, "Corrupt cluster chain at cluster {}", cluster)
            }
            FsError::InvalidBootSector(why) => write!(f, "Invalid boot sector: {}", why),
            FsError::NotDirectory => write!(f, "Not a directory"),
            FsError::Folded => write!(f, "Directory contents not loaded"),
            FsError::StaleNode => write!(f, "Stale node handle"),
            FsError::RootNode => write!(f, "Operation not valid on the root directory"),
            FsError::InvalidName => write!(f, "Invalid file name"),
            FsError::InvalidGeometry(why) => write!(f, "Invalid geometry: {}", why),
            FsError::AlreadyExists => write!(f, "File exists"),
            FsError::TooManyDuplicates { prefix } => write!(
                f,
                "Only 9 files may share the short name prefix \"{}\"",
                prefix
            ),
            FsError::DirectoryNotEmpty => write!(f, "Directory not empty"),
            FsError::NotFound => write!(f, "No such file or directory"),
            FsError::DirectoryFull => write!(f, "Directory full"),
            FsError::NoFreeCluster => write!(f, "No free cluster"),
            FsError::IOError => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for FsError {}

// Core traits for filesystem abstraction

/// Represents a block device that can be read from and written to
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), FsError>;
    fn write_block(&mut self, block_num: u64, buf: &[u8]) -> Result<(), FsError>;
    fn block_size(&self) -> usize;
    fn total_blocks(&self) -> u64;
}

/// Source of the epoch-seconds value stamped into directory entries
pub trait Clock: Send + Sync {
    fn now(&self) -> u32;
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.0
    }
}

/// Wall clock, truncated to 32-bit seconds since the Unix epoch
#[cfg(any(test, feature = "std"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[cfg(any(test, feature = "std"))]
impl Clock for SystemClock {
    fn now(&self) -> u32 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// Represents a directory entry
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub metadata: FileMetadata,
}

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub is_dir: bool,
    pub created: u64,
    pub modified: u64,
    pub permissions: FilePermissions,
}

#[derive(Debug, Clone)]
pub struct FilePermissions {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_structural_errors_are_fatal() {
        let err = FsError::LfnChain {
            sector: 3,
            offset: 64,
            reason: LfnChainError::Dangling,
        };
        assert_eq!(err.kind(), ErrorKind::StructuralInconsistency);
        assert!(!err.kind().is_recoverable());
        assert!(!FsError::IOError.kind().is_recoverable());
        assert!(FsError::DirectoryFull.kind().is_recoverable());
        assert!(FsError::NotFound.kind().is_recoverable());
    }

    #[test]
    fn test_display_names_location() {
        let err = FsError::LfnChain {
            sector: 3,
            offset: 64,
            reason: LfnChainError::SequenceGap {
                expected: 1,
                found: 2,
            },
        };
        assert_eq!(
            err.to_string(),
            "Malformed long name at sector 3 offset 64: expected ordinal 1, found 2"
        );
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
        assert_eq!(FixedClock(42).now(), 42);
    }
}
