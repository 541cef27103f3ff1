#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]
extern crate alloc;

pub mod filesys;
pub mod logging;

pub use filesys::fat16::{Fat16, Geometry, NodeId};
pub use filesys::{BlockDevice, Clock, ErrorKind, FixedClock, FsError};
