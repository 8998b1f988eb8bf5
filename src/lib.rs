//! This library exercises **USB mass storage** block devices with read/write/verify
//! loops during driver and hardware bring-up.
//!
//! A fixed catalog of test cases writes the transmit buffer to the device in
//! varying shapes (whole buffer, fixed sector counts, scatter-gather lists of
//! uneven segments, known patterns), reads it back and verifies that the data
//! survived the round trip. Boundary probes check that the device rejects
//! accesses beyond its last sector.
//!
//! ### Requirements
//!
//! A block device node (e.g. `/dev/sdb`) of a USB mass storage device, or any
//! other block device or image file. **All data on the device is overwritten.**
//!
//! Direct I/O is used by default, thus write permissions on the device node
//! are required.
//!
//! ### Usage
//!
//! Open the device with [`BlockDevice::open`], create a [`Context`] from it
//! and a [`Config`], and call [`run_test`] with a test number from the
//! [`Catalog`].

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(not(target_os = "linux"))]
compile_error!("usb_msc_test only supports Linux");

use std::sync::OnceLock;

mod error;
pub use error::*;

pub mod buffer;
pub use buffer::{AlignedBuf, Fill};

pub mod catalog;
pub use catalog::{parse_test, run_test, Catalog, TestCase, TestId};

pub mod config;
pub use config::{BoundaryPolicy, Config};

mod context;
pub use context::*;

pub mod transfer;
pub use transfer::Segment;

pub mod report;

pub mod target;
pub use target::{BlockDevice, MemTarget, OpenFlags, Target};

mod verify;
pub use verify::compare;

/// Gets the system page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(rustix::param::page_size)
}

#[cfg(test)]
mod test {
    #[test]
    fn page_size() {
        let page_size = super::page_size();
        println!("page size {page_size}");
        assert!(page_size.is_power_of_two());
    }
}
