//! Strongly-typed identifiers used across the compiler and launcher.
//!
//! Downstream crates should *not* pass raw integers around for plan operators,
//! graph nodes, or submitted jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }
    };
}

new_id!(OpId, "op");
new_id!(NodeId, "node");
new_id!(JobId, "job");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        assert_eq!(NodeId::new(3).to_string(), "node-3");
        assert_eq!(JobId::new(0).to_string(), "job-0");
        assert_eq!(OpId::new(12).index(), 12);
    }

    #[test]
    fn serializes_transparently() {
        let s = serde_json::to_string(&NodeId::new(7)).unwrap();
        assert_eq!(s, "7");
    }
}
