//! Host ABI: storage, parameter lists and fixed-layout control blocks.
//!
//! - **bytes**: big-endian field readers and writers
//! - **storage**: simulated 31-bit GETMAIN/FREEMAIN arena
//! - **plist**: OS-linkage parameter lists with an explicit terminator
//! - **dair**: TSODALC/TSODFRE work area (DAPL, DAPB08, DAPB18)
//! - **eftsr**: IKJEFTSI/IKJEFTSR blocks and flags
//! - **irx**: IRXEXEC EXECBLK, EVALBLK and argument table

pub mod bytes;
pub mod dair;
pub mod eftsr;
pub mod irx;
pub mod plist;
pub mod storage;

pub use plist::{Last, ParmList};
pub use storage::Storage;
