//! Low-level wire formats shared by CAR archives and CAR indexes:
//! varints, multihashes, CIDs and CAR headers.

pub mod cid;
pub mod header;
pub mod multihash;
pub mod varint;
